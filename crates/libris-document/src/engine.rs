//! Libris Document Engine
//!
//! Core engine that owns the named collections and routes every document
//! operation to the right one.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::aggregation::Pipeline;
use crate::collection::{Collection, InsertManyResult};
use crate::index::{IndexInfo, IndexSpec};
use crate::planner::ExplainOutput;
use crate::query::{Query, QueryResult};
use crate::types::{Document, DocumentId, Value};
use crate::update::{DeleteResult, UpdateResult, UpdateSpec};
use crate::validation::Schema;
use libris_common::config::EngineConfig;
use libris_common::{ExplainVerbosity, LibrisError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

// =============================================================================
// Document Engine
// =============================================================================

/// The main document storage and query engine.
pub struct DocumentEngine {
    config: EngineConfig,
    collections: RwLock<HashMap<String, Arc<Collection>>>,
    stats: RwLock<EngineStats>,
}

impl DocumentEngine {
    /// Create a new document engine with default configuration.
    pub fn new() -> Self {
        Self::with_config(EngineConfig::default())
    }

    pub fn with_config(config: EngineConfig) -> Self {
        Self {
            config,
            collections: RwLock::new(HashMap::new()),
            stats: RwLock::new(EngineStats::default()),
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // -------------------------------------------------------------------------
    // Collection Management
    // -------------------------------------------------------------------------

    pub fn create_collection(&self, name: impl Into<String>) -> Result<()> {
        let name = name.into();
        self.register(Collection::new(name))
    }

    /// Create a collection that validates documents against `schema`.
    ///
    /// With `validate_on_insert` turned off the schema is not attached.
    pub fn create_collection_with_schema(&self, name: impl Into<String>, schema: Schema) -> Result<()> {
        let name = name.into();
        if !self.config.validate_on_insert {
            tracing::debug!(collection = %name, "schema validation disabled, ignoring schema");
            return self.register(Collection::new(name));
        }
        self.register(Collection::with_schema(name, schema))
    }

    fn register(&self, collection: Collection) -> Result<()> {
        let collection = collection.with_max_document_size(self.config.max_document_size);
        let mut collections = self.collections.write();

        if collections.contains_key(collection.name()) {
            return Err(LibrisError::CollectionExists(collection.name().to_string()));
        }
        if collections.len() >= self.config.max_collections {
            return Err(LibrisError::TooManyCollections(self.config.max_collections));
        }

        tracing::info!(collection = %collection.name(), "created collection");
        collections.insert(collection.name().to_string(), Arc::new(collection));
        Ok(())
    }

    pub fn drop_collection(&self, name: &str) -> Result<()> {
        if self.collections.write().remove(name).is_none() {
            return Err(LibrisError::CollectionNotFound(name.to_string()));
        }
        tracing::info!(collection = %name, "dropped collection");
        Ok(())
    }

    /// Collection names in sorted order.
    pub fn list_collections(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn collection_exists(&self, name: &str) -> bool {
        self.collections.read().contains_key(name)
    }

    pub fn collection(&self, name: &str) -> Result<Arc<Collection>> {
        self.collections
            .read()
            .get(name)
            .cloned()
            .ok_or_else(|| LibrisError::CollectionNotFound(name.to_string()))
    }

    /// Collection for a write, created on demand when the engine allows it.
    fn collection_for_write(&self, name: &str) -> Result<Arc<Collection>> {
        match self.collection(name) {
            Err(LibrisError::CollectionNotFound(_)) if self.config.auto_create_collections => {
                match self.create_collection(name) {
                    Ok(()) | Err(LibrisError::CollectionExists(_)) => self.collection(name),
                    Err(err) => Err(err),
                }
            }
            other => other,
        }
    }

    pub fn collection_stats(&self, name: &str) -> Result<CollectionStats> {
        let collection = self.collection(name)?;
        Ok(CollectionStats {
            name: name.to_string(),
            document_count: collection.count(),
            index_count: collection.list_indexes().len(),
        })
    }

    // -------------------------------------------------------------------------
    // Document Operations
    // -------------------------------------------------------------------------

    pub fn insert(&self, collection: &str, doc: Document) -> Result<DocumentId> {
        let id = self.collection_for_write(collection)?.insert(doc)?;
        self.stats.write().documents_inserted += 1;
        Ok(id)
    }

    pub fn insert_many(&self, collection: &str, docs: Vec<Document>) -> Result<InsertManyResult> {
        let result = self.collection_for_write(collection)?.insert_many(docs)?;
        self.stats.write().documents_inserted += result.inserted_count as u64;
        tracing::debug!(collection = %collection, inserted = result.inserted_count, "insert_many");
        Ok(result)
    }

    pub fn get(&self, collection: &str, id: &DocumentId) -> Result<Option<Document>> {
        Ok(self.collection(collection)?.get(id))
    }

    pub fn update_one(&self, collection: &str, query: &Query, update: &UpdateSpec) -> Result<UpdateResult> {
        let result = self.collection(collection)?.update_one(query, update)?;
        self.stats.write().documents_updated += result.modified_count;
        Ok(result)
    }

    pub fn update_many(&self, collection: &str, query: &Query, update: &UpdateSpec) -> Result<UpdateResult> {
        let result = self.collection(collection)?.update_many(query, update)?;
        self.stats.write().documents_updated += result.modified_count;
        Ok(result)
    }

    pub fn delete_one(&self, collection: &str, query: &Query) -> Result<DeleteResult> {
        let result = self.collection(collection)?.delete_one(query);
        self.stats.write().documents_deleted += result.deleted_count;
        Ok(result)
    }

    pub fn delete_many(&self, collection: &str, query: &Query) -> Result<DeleteResult> {
        let result = self.collection(collection)?.delete_many(query);
        self.stats.write().documents_deleted += result.deleted_count;
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Query Operations
    // -------------------------------------------------------------------------

    pub fn find(&self, collection: &str, query: &Query) -> Result<QueryResult> {
        let result = self.collection(collection)?.find(query);
        self.stats.write().queries_executed += 1;
        Ok(result)
    }

    pub fn find_one(&self, collection: &str, query: &Query) -> Result<Option<Value>> {
        let result = self.collection(collection)?.find_one(query);
        self.stats.write().queries_executed += 1;
        Ok(result)
    }

    /// Count documents matching a query.
    pub fn count(&self, collection: &str, query: &Query) -> Result<usize> {
        Ok(self.collection(collection)?.count_matching(query))
    }

    pub fn aggregate(&self, collection: &str, pipeline: &Pipeline) -> Result<Vec<Value>> {
        let result = self.collection(collection)?.aggregate(pipeline)?;
        self.stats.write().aggregations_executed += 1;
        Ok(result)
    }

    pub fn explain(&self, collection: &str, query: &Query, verbosity: ExplainVerbosity) -> Result<ExplainOutput> {
        Ok(self.collection(collection)?.explain(query, verbosity))
    }

    // -------------------------------------------------------------------------
    // Index Operations
    // -------------------------------------------------------------------------

    pub fn create_index(&self, collection: &str, spec: IndexSpec) -> Result<String> {
        self.collection_for_write(collection)?.create_index(spec)
    }

    pub fn drop_index(&self, collection: &str, name: &str) -> Result<()> {
        self.collection(collection)?.drop_index(name)
    }

    pub fn list_indexes(&self, collection: &str) -> Result<Vec<IndexInfo>> {
        Ok(self.collection(collection)?.list_indexes())
    }

    // -------------------------------------------------------------------------
    // Statistics
    // -------------------------------------------------------------------------

    pub fn stats(&self) -> EngineStats {
        self.stats.read().clone()
    }

    pub fn reset_stats(&self) {
        *self.stats.write() = EngineStats::default();
    }
}

impl Default for DocumentEngine {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Engine Statistics
// =============================================================================

/// Operation counters for the document engine.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineStats {
    pub documents_inserted: u64,
    pub documents_updated: u64,
    pub documents_deleted: u64,
    pub queries_executed: u64,
    pub aggregations_executed: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectionStats {
    pub name: String,
    pub document_count: usize,
    pub index_count: usize,
}

// =============================================================================
// Tests
// =============================================================================
