//! Libris Document Collection
//!
//! A named set of documents kept in insertion order, with secondary indexes
//! and an optional schema.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::aggregation::Pipeline;
use crate::index::{DocumentIndex, IndexInfo, IndexSpec};
use crate::planner::{AccessPath, ExecutionStats, ExplainOutput, PlanChoice, Planner};
use crate::query::{Query, QueryResult};
use crate::types::{Document, DocumentId, Value};
use crate::update::{DeleteResult, UpdateResult, UpdateSpec};
use crate::validation::Schema;
use libris_common::{ExplainVerbosity, LibrisError, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

// =============================================================================
// Insert Result
// =============================================================================

/// Outcome of a bulk insert.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InsertManyResult {
    pub inserted_count: usize,
    pub inserted_ids: Vec<DocumentId>,
}

// =============================================================================
// Collection State
// =============================================================================

/// Documents plus the indexes over them, guarded by one lock so a write
/// never leaves the two out of step.
#[derive(Default)]
struct CollectionState {
    /// Insertion sequence number to document; iteration is natural order.
    documents: BTreeMap<u64, Document>,
    positions: HashMap<DocumentId, u64>,
    next_seq: u64,
    indexes: Vec<DocumentIndex>,
}

/// Documents an access path produced, before the residual filter.
struct Scan<'a> {
    docs: Vec<&'a Document>,
    keys_examined: usize,
}

impl CollectionState {
    fn get(&self, id: &DocumentId) -> Option<&Document> {
        self.positions.get(id).and_then(|seq| self.documents.get(seq))
    }

    fn scan(&self, path: &AccessPath) -> Scan<'_> {
        match path {
            AccessPath::CollectionScan => Scan {
                docs: self.documents.values().collect(),
                keys_examined: 0,
            },
            AccessPath::IdLookup(id) => {
                let docs: Vec<&Document> = self.get(id).into_iter().collect();
                Scan {
                    keys_examined: docs.len(),
                    docs,
                }
            }
            AccessPath::IndexScan {
                index_name,
                prefix,
                range,
                ..
            } => {
                let Some(index) = self.indexes.iter().find(|idx| idx.name() == index_name) else {
                    return self.scan(&AccessPath::CollectionScan);
                };
                let scan = index.scan(prefix, range.as_ref());

                // Back to natural order so results match a collection scan.
                let mut seqs: Vec<u64> = scan.ids.iter().filter_map(|id| self.positions.get(id).copied()).collect();
                seqs.sort_unstable();
                Scan {
                    docs: seqs.iter().filter_map(|seq| self.documents.get(seq)).collect(),
                    keys_examined: scan.keys_examined,
                }
            }
        }
    }

    /// Documents matching the query's filter, in sort order when the query
    /// has one and natural order otherwise.
    fn matching(&self, query: &Query) -> Vec<&Document> {
        let choice = Planner::choose(query, &self.indexes);
        let mut docs: Vec<&Document> = self
            .scan(&choice.winning)
            .docs
            .into_iter()
            .filter(|doc| query.matches(*doc))
            .collect();
        if let Some(ref sort) = query.sort {
            docs.sort_by(|a, b| sort.compare(*a, *b));
        }
        docs
    }

    fn execute(&self, query: &Query, choice: &PlanChoice) -> QueryResult {
        let start = Instant::now();
        let scan = self.scan(&choice.winning);
        let total_scanned = scan.docs.len();
        let matched: Vec<&Document> = scan.docs.into_iter().filter(|doc| query.matches(*doc)).collect();

        QueryResult {
            documents: query.shape(matched),
            total_scanned,
            keys_examined: scan.keys_examined,
            execution_time_ms: start.elapsed().as_millis() as u64,
        }
    }

    fn check_unique(&self, doc: &Document) -> Result<()> {
        self.indexes.iter().try_for_each(|index| index.check_unique(doc))
    }

    fn insert(&mut self, doc: Document) -> Result<DocumentId> {
        if self.positions.contains_key(&doc.id) {
            return Err(LibrisError::DuplicateId(doc.id.to_string()));
        }
        self.check_unique(&doc)?;

        for index in self.indexes.iter_mut() {
            index.index_document(&doc)?;
        }
        let id = doc.id.clone();
        let seq = self.next_seq;
        self.next_seq += 1;
        self.positions.insert(id.clone(), seq);
        self.documents.insert(seq, doc);
        Ok(id)
    }

    fn replace(&mut self, updated: Document) -> Result<()> {
        let Some(&seq) = self.positions.get(&updated.id) else {
            return Ok(());
        };
        self.check_unique(&updated)?;

        if let Some(old) = self.documents.get(&seq) {
            for index in self.indexes.iter_mut() {
                index.unindex_document(old);
            }
        }
        for index in self.indexes.iter_mut() {
            index.index_document(&updated)?;
        }
        self.documents.insert(seq, updated);
        Ok(())
    }

    fn remove(&mut self, id: &DocumentId) -> Option<Document> {
        let seq = self.positions.remove(id)?;
        let doc = self.documents.remove(&seq)?;
        for index in self.indexes.iter_mut() {
            index.unindex_document(&doc);
        }
        Some(doc)
    }
}

// =============================================================================
// Collection
// =============================================================================

/// A collection of documents.
pub struct Collection {
    name: String,
    state: RwLock<CollectionState>,
    schema: Option<Schema>,
    max_document_size: usize,
}

impl Collection {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            state: RwLock::new(CollectionState::default()),
            schema: None,
            max_document_size: usize::MAX,
        }
    }

    /// Create a collection whose documents must satisfy `schema`.
    pub fn with_schema(name: impl Into<String>, schema: Schema) -> Self {
        let mut collection = Self::new(name);
        collection.schema = Some(schema);
        collection
    }

    /// Reject documents whose encoded size exceeds `limit` bytes.
    pub fn with_max_document_size(mut self, limit: usize) -> Self {
        self.max_document_size = limit;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    fn check_document(&self, doc: &Document) -> Result<()> {
        if let Some(ref schema) = self.schema {
            schema.check(doc)?;
        }
        let size = doc.encoded_size();
        if size > self.max_document_size {
            return Err(LibrisError::DocumentTooLarge {
                size,
                limit: self.max_document_size,
            });
        }
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Document Operations
    // -------------------------------------------------------------------------

    /// Insert a document.
    pub fn insert(&self, doc: Document) -> Result<DocumentId> {
        self.check_document(&doc)?;
        self.state.write().insert(doc)
    }

    /// Insert a batch. Either every document is inserted or none is.
    pub fn insert_many(&self, docs: Vec<Document>) -> Result<InsertManyResult> {
        for doc in &docs {
            self.check_document(doc)?;
        }

        let mut state = self.state.write();
        let mut inserted_ids = Vec::with_capacity(docs.len());
        for doc in docs {
            match state.insert(doc) {
                Ok(id) => inserted_ids.push(id),
                Err(err) => {
                    for id in &inserted_ids {
                        state.remove(id);
                    }
                    return Err(err);
                }
            }
        }

        Ok(InsertManyResult {
            inserted_count: inserted_ids.len(),
            inserted_ids,
        })
    }

    /// Get a document by ID.
    pub fn get(&self, id: &DocumentId) -> Option<Document> {
        self.state.read().get(id).cloned()
    }

    pub fn contains(&self, id: &DocumentId) -> bool {
        self.state.read().positions.contains_key(id)
    }

    pub fn count(&self) -> usize {
        self.state.read().documents.len()
    }

    /// All documents in natural order.
    pub fn all(&self) -> Vec<Document> {
        self.state.read().documents.values().cloned().collect()
    }

    /// Remove every document; index definitions are kept.
    pub fn clear(&self) {
        let mut state = self.state.write();
        state.documents.clear();
        state.positions.clear();
        for index in state.indexes.iter_mut() {
            index.clear();
        }
    }

    // -------------------------------------------------------------------------
    // Query Operations
    // -------------------------------------------------------------------------

    /// Find documents matching a query.
    pub fn find(&self, query: &Query) -> QueryResult {
        let state = self.state.read();
        let choice = Planner::choose(query, &state.indexes);
        let result = state.execute(query, &choice);
        tracing::debug!(
            collection = %self.name,
            plan = ?choice.winning,
            returned = result.count(),
            scanned = result.total_scanned,
            "find"
        );
        result
    }

    /// First document the query would return.
    pub fn find_one(&self, query: &Query) -> Option<Value> {
        let mut first = query.clone();
        first.limit = Some(1);
        self.find(&first).documents.into_iter().next()
    }

    /// Count documents matching the query's filter; paging is ignored.
    pub fn count_matching(&self, query: &Query) -> usize {
        let mut filter_only = query.clone();
        filter_only.sort = None;
        self.state.read().matching(&filter_only).len()
    }

    /// Apply `update` to the first matching document.
    pub fn update_one(&self, query: &Query, update: &UpdateSpec) -> Result<UpdateResult> {
        self.update_matching(query, update, Some(1))
    }

    /// Apply `update` to every matching document. Documents updated before
    /// a failing one keep their changes.
    pub fn update_many(&self, query: &Query, update: &UpdateSpec) -> Result<UpdateResult> {
        self.update_matching(query, update, None)
    }

    fn update_matching(&self, query: &Query, update: &UpdateSpec, limit: Option<usize>) -> Result<UpdateResult> {
        let mut state = self.state.write();
        let targets: Vec<Document> = state
            .matching(query)
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .cloned()
            .collect();

        let mut result = UpdateResult {
            matched_count: targets.len() as u64,
            modified_count: 0,
        };

        for mut doc in targets {
            if !update.apply(&mut doc)? {
                continue;
            }
            self.check_document(&doc)?;
            state.replace(doc)?;
            result.modified_count += 1;
        }

        Ok(result)
    }

    /// Delete the first matching document.
    pub fn delete_one(&self, query: &Query) -> DeleteResult {
        self.delete_matching(query, Some(1))
    }

    /// Delete every matching document.
    pub fn delete_many(&self, query: &Query) -> DeleteResult {
        self.delete_matching(query, None)
    }

    fn delete_matching(&self, query: &Query, limit: Option<usize>) -> DeleteResult {
        let mut state = self.state.write();
        let ids: Vec<DocumentId> = state
            .matching(query)
            .into_iter()
            .take(limit.unwrap_or(usize::MAX))
            .map(|doc| doc.id.clone())
            .collect();

        let deleted = ids.iter().filter(|id| state.remove(id).is_some()).count();
        DeleteResult {
            deleted_count: deleted as u64,
        }
    }

    /// Run an aggregation pipeline over the collection in natural order.
    pub fn aggregate(&self, pipeline: &Pipeline) -> Result<Vec<Value>> {
        let docs: Vec<Value> = self.state.read().documents.values().map(Document::to_value).collect();
        pipeline.execute(docs)
    }

    /// Describe, and optionally run, the plan for a query.
    pub fn explain(&self, query: &Query, verbosity: ExplainVerbosity) -> ExplainOutput {
        let state = self.state.read();
        let choice = Planner::choose(query, &state.indexes);
        let mut output = ExplainOutput::new(&self.name, query, &choice);

        if verbosity == ExplainVerbosity::ExecutionStats {
            let result = state.execute(query, &choice);
            output.execution_stats = Some(ExecutionStats {
                n_returned: result.count(),
                execution_time_ms: result.execution_time_ms,
                total_keys_examined: result.keys_examined,
                total_docs_examined: result.total_scanned,
            });
        }

        output
    }

    // -------------------------------------------------------------------------
    // Index Operations
    // -------------------------------------------------------------------------

    /// Create an index and build it from existing documents.
    ///
    /// Creating an index whose keys match an existing one returns the
    /// existing name and changes nothing.
    pub fn create_index(&self, spec: IndexSpec) -> Result<String> {
        spec.validate()?;
        let mut state = self.state.write();

        if let Some(existing) = state.indexes.iter().find(|idx| idx.spec().same_keys(&spec)) {
            if existing.spec().unique != spec.unique {
                return Err(LibrisError::Execution(format!(
                    "index {} already exists with different options",
                    existing.name()
                )));
            }
            return Ok(existing.name().to_string());
        }
        let name = spec.index_name();
        if state.indexes.iter().any(|idx| idx.name() == name) {
            return Err(LibrisError::Execution(format!(
                "index name {} is already used by a different key pattern",
                name
            )));
        }

        let mut index = DocumentIndex::new(spec);
        for doc in state.documents.values() {
            index.index_document(doc)?;
        }

        tracing::info!(
            collection = %self.name,
            index = %name,
            entries = index.entry_count(),
            "created index"
        );
        state.indexes.push(index);
        Ok(name)
    }

    pub fn drop_index(&self, name: &str) -> Result<()> {
        let mut state = self.state.write();
        let before = state.indexes.len();
        state.indexes.retain(|idx| idx.name() != name);
        if state.indexes.len() == before {
            return Err(LibrisError::IndexNotFound(name.to_string()));
        }
        tracing::info!(collection = %self.name, index = %name, "dropped index");
        Ok(())
    }

    pub fn list_indexes(&self) -> Vec<IndexInfo> {
        self.state.read().indexes.iter().map(DocumentIndex::info).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::QueryBuilder;
    use crate::validation::FieldSchema;
    use libris_common::SortDirection;
    use serde_json::json;

    fn book(title: &str, author: &str, year: i64, price: f64) -> Document {
        let mut doc = Document::new();
        doc.set("title", title);
        doc.set("author", author);
        doc.set("published_year", year);
        doc.set("price", price);
        doc
    }

    fn shelf() -> Collection {
        let collection = Collection::new("books");
        collection
            .insert_many(vec![
                book("Untamed", "Glennon Doyle", 2020, 18.0),
                book("Educated", "Tara Westover", 2018, 15.5),
                book("The Art of War", "Sun Tzu", -500, 7.99),
                book("The Alchemist", "Paulo Coelho", 1988, 16.0),
                book("Brida", "Paulo Coelho", 1990, 12.0),
            ])
            .unwrap();
        collection
    }

    fn titles(result: &QueryResult) -> Vec<String> {
        result
            .documents
            .iter()
            .filter_map(|d| d.get_path("title").and_then(|t| t.as_str()).map(String::from))
            .collect()
    }

    #[test]
    fn test_insert_and_get() {
        let collection = Collection::new("test");
        let mut doc = Document::with_id("doc1");
        doc.set("name", "Alice");

        let id = collection.insert(doc).unwrap();
        assert_eq!(id.as_str(), "doc1");
        assert_eq!(
            collection.get(&id).and_then(|d| d.get("name").cloned()),
            Some(Value::from("Alice"))
        );
        assert!(matches!(
            collection.insert(Document::with_id("doc1")),
            Err(LibrisError::DuplicateId(_))
        ));
    }

    #[test]
    fn test_find_natural_order() {
        let collection = shelf();
        let query = QueryBuilder::new().eq("author", "Paulo Coelho").build();
        assert_eq!(titles(&collection.find(&query)), vec!["The Alchemist", "Brida"]);
    }

    #[test]
    fn test_results_identical_with_index() {
        let collection = shelf();
        let query = Query::from_json(&json!({ "author": "Paulo Coelho", "published_year": { "$gt": 1980 } }))
            .unwrap()
            .with_sort("price", SortDirection::Ascending);
        let before = collection.find(&query);

        collection
            .create_index(IndexSpec::ascending("author").key("published_year", SortDirection::Descending))
            .unwrap();
        let after = collection.find(&query);

        assert_eq!(before.documents, after.documents);
        assert_eq!(titles(&after), vec!["Brida", "The Alchemist"]);
        assert_eq!(before.total_scanned, 5);
        assert_eq!(after.total_scanned, 2);
    }

    #[test]
    fn test_update_one() {
        let collection = shelf();
        let query = QueryBuilder::new().eq("title", "The Alchemist").build();
        let update = UpdateSpec::new().set("price", 19.99f64);

        let result = collection.update_one(&query, &update).unwrap();
        assert_eq!(result, UpdateResult { matched_count: 1, modified_count: 1 });

        let found = collection.find_one(&query).unwrap();
        assert_eq!(found.get_path("price"), Some(&Value::Float(19.99)));

        let result = collection.update_one(&query, &update).unwrap();
        assert_eq!(result, UpdateResult { matched_count: 1, modified_count: 0 });

        let missing = QueryBuilder::new().eq("title", "Nope").build();
        let result = collection.update_one(&missing, &update).unwrap();
        assert_eq!(result, UpdateResult::default());
    }

    #[test]
    fn test_update_many_keeps_indexes_current() {
        let collection = shelf();
        collection.create_index(IndexSpec::ascending("author")).unwrap();

        let query = QueryBuilder::new().eq("author", "Paulo Coelho").build();
        let result = collection
            .update_many(&query, &UpdateSpec::new().set("author", "P. Coelho"))
            .unwrap();
        assert_eq!(result.modified_count, 2);

        assert!(collection.find(&query).is_empty());
        let renamed = QueryBuilder::new().eq("author", "P. Coelho").build();
        assert_eq!(collection.find(&renamed).count(), 2);
    }

    #[test]
    fn test_delete_one_and_many() {
        let collection = shelf();
        let query = QueryBuilder::new().eq("author", "Paulo Coelho").build();

        assert_eq!(collection.delete_one(&query).deleted_count, 1);
        assert_eq!(collection.count(), 4);
        assert_eq!(titles(&collection.find(&query)), vec!["Brida"]);

        let missing = QueryBuilder::new().eq("title", "Who Moved My Cheese?").build();
        assert_eq!(collection.delete_one(&missing).deleted_count, 0);

        let everything = Query::new();
        assert_eq!(collection.delete_many(&everything).deleted_count, 4);
        assert_eq!(collection.count(), 0);
    }

    #[test]
    fn test_paging() {
        let collection = shelf();
        let page = |skip| {
            let query = Query::new()
                .with_sort("price", SortDirection::Ascending)
                .with_skip(skip)
                .with_limit(2);
            titles(&collection.find(&query))
        };

        assert_eq!(page(0), vec!["The Art of War", "Brida"]);
        assert_eq!(page(2), vec!["Educated", "The Alchemist"]);
        assert_eq!(page(4), vec!["Untamed"]);
        assert!(page(6).is_empty());
    }

    #[test]
    fn test_create_index_idempotent() {
        let collection = shelf();
        assert_eq!(collection.create_index(IndexSpec::ascending("title")).unwrap(), "title_1");
        assert_eq!(collection.create_index(IndexSpec::ascending("title")).unwrap(), "title_1");
        assert_eq!(collection.list_indexes().len(), 1);
        assert_eq!(collection.list_indexes()[0].entries, 5);

        assert!(matches!(
            collection.create_index(IndexSpec::ascending("title").unique()),
            Err(LibrisError::Execution(_))
        ));

        collection.drop_index("title_1").unwrap();
        assert!(matches!(collection.drop_index("title_1"), Err(LibrisError::IndexNotFound(_))));
    }

    #[test]
    fn test_unique_index() {
        let collection = shelf();
        collection.create_index(IndexSpec::ascending("title").unique()).unwrap();

        let err = collection.insert(book("Brida", "Someone", 2000, 1.0)).unwrap_err();
        assert!(matches!(err, LibrisError::UniqueViolation(_)));
        assert_eq!(collection.count(), 5);

        let query = QueryBuilder::new().eq("title", "Educated").build();
        let err = collection
            .update_one(&query, &UpdateSpec::new().set("title", "Untamed"))
            .unwrap_err();
        assert!(matches!(err, LibrisError::UniqueViolation(_)));
        assert_eq!(collection.find(&query).count(), 1);
    }

    #[test]
    fn test_insert_many_is_atomic() {
        let collection = shelf();
        let duplicate = collection.all()[0].clone();
        let err = collection
            .insert_many(vec![book("New", "Author", 2001, 3.0), duplicate])
            .unwrap_err();

        assert!(matches!(err, LibrisError::DuplicateId(_)));
        assert_eq!(collection.count(), 5);
    }

    #[test]
    fn test_schema_enforced_on_insert_and_update() {
        let schema = Schema::new("book")
            .required_field("title", FieldSchema::string())
            .required_field("price", FieldSchema::number())
            .additional_properties(false);
        let collection = Collection::with_schema("books", schema);

        let mut doc = Document::new();
        doc.set("title", "Brida");
        doc.set("price", 12.0f64);
        collection.insert(doc).unwrap();

        let mut extra = Document::new();
        extra.set("title", "Brida 2");
        extra.set("price", 1i64);
        extra.set("isbn", "x");
        assert!(matches!(collection.insert(extra), Err(LibrisError::ValidationFailed(_))));

        let query = Query::new();
        let err = collection
            .update_one(&query, &UpdateSpec::new().set("price", "free"))
            .unwrap_err();
        assert!(matches!(err, LibrisError::ValidationFailed(_)));
    }

    #[test]
    fn test_document_size_limit() {
        let collection = Collection::new("tiny").with_max_document_size(32);
        let mut doc = Document::with_id("a");
        doc.set("blurb", "x".repeat(64));
        assert!(matches!(collection.insert(doc), Err(LibrisError::DocumentTooLarge { .. })));
    }

    #[test]
    fn test_explain() {
        let collection = shelf();
        let query = QueryBuilder::new().eq("title", "The Alchemist").build();

        let before = collection.explain(&query, ExplainVerbosity::ExecutionStats);
        assert_eq!(before.query_planner.winning_plan.stage, "COLLSCAN");
        assert_eq!(before.execution_stats.map(|s| s.total_docs_examined), Some(5));

        collection.create_index(IndexSpec::ascending("title")).unwrap();
        let after = collection.explain(&query, ExplainVerbosity::ExecutionStats);
        assert_eq!(after.winning_index(), Some("title_1"));
        let stats = after.execution_stats.unwrap();
        assert_eq!(stats.n_returned, 1);
        assert_eq!(stats.total_docs_examined, 1);
        assert_eq!(stats.total_keys_examined, 1);

        let planner_only = collection.explain(&query, ExplainVerbosity::QueryPlanner);
        assert!(planner_only.execution_stats.is_none());
    }

    #[test]
    fn test_aggregate_natural_order() {
        let collection = shelf();
        let pipeline = Pipeline::from_json(&json!([
            { "$group": { "_id": "$author", "books": { "$push": "$title" } } }
        ]))
        .unwrap();

        let out = collection.aggregate(&pipeline).unwrap();
        assert_eq!(out.len(), 4);
        assert_eq!(
            out[3].get_path("books").map(Value::to_json),
            Some(json!(["The Alchemist", "Brida"]))
        );
    }
}
