//! Libris Catalog - Book Catalog Operations
//!
//! A typed book model, the seed dataset, and a runner that performs the
//! catalog's lookups, mutations, paging, reports, index creation and explain
//! calls against a `libris-document` engine.
//!
//! @version 0.1.0
//! @author Libris Development Team

pub mod book;
pub mod dataset;
pub mod runner;

pub use book::{book_schema, Book, BookSummary};
pub use runner::{
    AuthorStats, CatalogRunner, DecadeBucket, GenrePriceStats, RunReport, StepOutcome, StepReport,
    EXPLAIN_AFTER_YEAR, RECENT_YEAR,
};
