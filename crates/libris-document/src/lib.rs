//! Libris Document - Document Store Engine
//!
//! In-memory document store with a JSON filter language, secondary
//! indexes, a rule-based planner with explain output, and aggregation
//! pipelines.
//!
//! Key Features:
//! - Schema-flexible documents with optional per-collection schemas
//! - `$`-operator filters, sorting, paging and projection
//! - Single and compound ordered indexes
//! - `$match`/`$group`/`$sort`/`$addFields` style pipelines
//!
//! @version 0.1.0
//! @author Libris Development Team

pub mod aggregation;
pub mod collection;
pub mod engine;
pub mod index;
pub mod planner;
pub mod query;
pub mod types;
pub mod update;
pub mod validation;

pub use aggregation::{Expression, Pipeline, Stage};
pub use collection::{Collection, InsertManyResult};
pub use engine::{CollectionStats, DocumentEngine, EngineStats};
pub use index::{DocumentIndex, IndexInfo, IndexSpec};
pub use planner::{ExecutionStats, ExplainOutput, PlanStage};
pub use query::{Filter, Projection, Query, QueryBuilder, QueryResult, SortSpec};
pub use types::{Document, DocumentId, Value};
pub use update::{DeleteResult, UpdateResult, UpdateSpec};
pub use validation::{FieldSchema, FieldType, Schema, ValidationResult};
