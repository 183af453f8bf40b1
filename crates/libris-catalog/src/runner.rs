//! Libris Catalog Runner
//!
//! Runs the catalog operations against a document engine: seeding, lookups,
//! the price update and removal, paging, the three reports, index creation
//! and explain.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::book::{book_schema, int_field, number_field, string_field, Book, BookSummary};
use crate::dataset;
use libris_common::config::CatalogConfig;
use libris_common::{LibrisError, Result, SortDirection};
use libris_document::{
    DeleteResult, DocumentEngine, ExplainOutput, IndexSpec, InsertManyResult, Pipeline, Projection, Query,
    QueryBuilder, UpdateResult, UpdateSpec, Value,
};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value as JsonValue};
use std::sync::Arc;

/// Books published after this year count as recent.
pub const RECENT_YEAR: i64 = 2010;

/// Lower year bound of the author / year explain lookup.
pub const EXPLAIN_AFTER_YEAR: i64 = 2000;

// =============================================================================
// Report Types
// =============================================================================

/// Average price and size of one genre.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GenrePriceStats {
    pub genre: String,
    #[serde(rename = "averagePrice")]
    pub average_price: f64,
    pub count: i64,
}

/// The author with the most books and their titles in insertion order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorStats {
    pub author: String,
    #[serde(rename = "bookCount")]
    pub book_count: i64,
    pub books: Vec<String>,
}

/// Books grouped by the decade they were published in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DecadeBucket {
    pub decade: i64,
    pub count: i64,
    pub books: Vec<String>,
}

/// How one step of a full run ended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", content = "result", rename_all = "snake_case")]
pub enum StepOutcome {
    Completed(JsonValue),
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub outcome: StepOutcome,
}

impl StepReport {
    pub fn is_completed(&self) -> bool {
        matches!(self.outcome, StepOutcome::Completed(_))
    }
}

/// Every step of a full run, in execution order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub steps: Vec<StepReport>,
}

impl RunReport {
    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }

    pub fn failures(&self) -> impl Iterator<Item = &StepReport> {
        self.steps.iter().filter(|s| !s.is_completed())
    }

    pub fn succeeded(&self) -> bool {
        self.failures().next().is_none()
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

// =============================================================================
// Catalog Runner
// =============================================================================

/// Catalog operations over one collection of a shared engine.
pub struct CatalogRunner {
    engine: Arc<DocumentEngine>,
    config: CatalogConfig,
}

impl CatalogRunner {
    pub fn new(engine: Arc<DocumentEngine>, config: CatalogConfig) -> Self {
        Self { engine, config }
    }

    pub fn engine(&self) -> &Arc<DocumentEngine> {
        &self.engine
    }

    pub fn config(&self) -> &CatalogConfig {
        &self.config
    }

    fn collection(&self) -> &str {
        &self.config.collection
    }

    /// Create the books collection with its schema unless it already exists.
    pub fn prepare(&self) -> Result<()> {
        match self.engine.create_collection_with_schema(self.collection(), book_schema()) {
            Ok(()) | Err(LibrisError::CollectionExists(_)) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Insert the ten seed books.
    pub fn seed(&self) -> Result<InsertManyResult> {
        self.prepare()?;
        self.insert_books(&dataset::books())
    }

    pub fn insert_books(&self, books: &[Book]) -> Result<InsertManyResult> {
        let docs = books.iter().map(Book::to_document).collect();
        let result = self.engine.insert_many(self.collection(), docs)?;
        tracing::info!(collection = %self.collection(), inserted = result.inserted_count, "seeded books");
        Ok(result)
    }

    /// Number of books currently stored.
    pub fn count(&self) -> Result<usize> {
        self.engine.count(self.collection(), &Query::new())
    }

    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Run a query and read the results back as books, in natural order.
    pub fn find_books(&self, query: &Query) -> Result<Vec<Book>> {
        self.engine
            .find(self.collection(), query)?
            .documents
            .iter()
            .map(Book::from_value)
            .collect()
    }

    /// Books whose genre is exactly `genre`.
    pub fn books_in_genre(&self, genre: &str) -> Result<Vec<Book>> {
        self.find_books(&QueryBuilder::new().eq("genre", genre).build())
    }

    pub fn books_published_after(&self, year: i64) -> Result<Vec<Book>> {
        self.find_books(&QueryBuilder::new().gt("published_year", year).build())
    }

    pub fn books_by_author(&self, author: &str) -> Result<Vec<Book>> {
        self.find_books(&QueryBuilder::new().eq("author", author).build())
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Set the price of the first book titled `title`. No match is not an
    /// error; the result reports zero counts.
    pub fn update_price(&self, title: &str, price: f64) -> Result<UpdateResult> {
        let query = QueryBuilder::new().eq("title", title).build();
        let result = self
            .engine
            .update_one(self.collection(), &query, &UpdateSpec::new().set("price", price))?;
        tracing::debug!(title, matched = result.matched_count, modified = result.modified_count, "update_price");
        Ok(result)
    }

    /// Remove the first book titled `title`.
    pub fn delete_by_title(&self, title: &str) -> Result<DeleteResult> {
        let query = QueryBuilder::new().eq("title", title).build();
        let result = self.engine.delete_one(self.collection(), &query)?;
        tracing::debug!(title, deleted = result.deleted_count, "delete_by_title");
        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Paging
    // -------------------------------------------------------------------------

    /// Query behind [`in_stock_page`](Self::in_stock_page). Pages are
    /// numbered from 1; page 0 is read as page 1.
    pub fn in_stock_query(&self, page: usize, direction: SortDirection) -> Query {
        let page_size = self.config.page_size;
        QueryBuilder::new()
            .eq("in_stock", true)
            .gt("published_year", RECENT_YEAR)
            .sort("price", direction)
            .sort("title", SortDirection::Ascending)
            .skip(page.saturating_sub(1).saturating_mul(page_size))
            .limit(page_size)
            .project(Projection::include(["title", "author", "price"]).without_id())
            .build()
    }

    /// One page of recent in-stock books ordered by price, ties by title.
    pub fn in_stock_page(&self, page: usize, direction: SortDirection) -> Result<Vec<BookSummary>> {
        self.engine
            .find(self.collection(), &self.in_stock_query(page, direction))?
            .documents
            .iter()
            .map(BookSummary::from_value)
            .collect()
    }

    // -------------------------------------------------------------------------
    // Reports
    // -------------------------------------------------------------------------

    fn aggregate(&self, pipeline: JsonValue) -> Result<Vec<Value>> {
        let pipeline = Pipeline::from_json(&pipeline)?;
        self.engine.aggregate(self.collection(), &pipeline)
    }

    /// Average price and count for each distinct genre, in the order genres
    /// first appear.
    pub fn average_price_by_genre(&self) -> Result<Vec<GenrePriceStats>> {
        let rows = self.aggregate(json!([
            { "$group": {
                "_id": "$genre",
                "averagePrice": { "$avg": "$price" },
                "count": { "$sum": 1 }
            } }
        ]))?;

        rows.iter()
            .map(|row| {
                Ok(GenrePriceStats {
                    genre: string_field(row, "_id")?,
                    average_price: number_field(row, "averagePrice")?,
                    count: int_field(row, "count")?,
                })
            })
            .collect()
    }

    /// Author with the most books; ties go to the alphabetically first name.
    pub fn top_author(&self) -> Result<Option<AuthorStats>> {
        let rows = self.aggregate(json!([
            { "$group": {
                "_id": "$author",
                "bookCount": { "$sum": 1 },
                "books": { "$push": "$title" }
            } },
            { "$sort": { "bookCount": -1, "_id": 1 } },
            { "$limit": 1 }
        ]))?;

        rows.first()
            .map(|row| {
                Ok(AuthorStats {
                    author: string_field(row, "_id")?,
                    book_count: int_field(row, "bookCount")?,
                    books: string_list(row, "books")?,
                })
            })
            .transpose()
    }

    /// Book counts and titles per decade, oldest decade first.
    ///
    /// The decade is `year - year % 10` with a truncated remainder, so
    /// `-505` falls in `-500`.
    pub fn books_by_decade(&self) -> Result<Vec<DecadeBucket>> {
        let rows = self.aggregate(json!([
            { "$addFields": {
                "decade": { "$subtract": ["$published_year", { "$mod": ["$published_year", 10] }] }
            } },
            { "$group": {
                "_id": "$decade",
                "count": { "$sum": 1 },
                "books": { "$push": "$title" }
            } },
            { "$sort": { "_id": 1 } }
        ]))?;

        rows.iter()
            .map(|row| {
                Ok(DecadeBucket {
                    decade: int_field(row, "_id")?,
                    count: int_field(row, "count")?,
                    books: string_list(row, "books")?,
                })
            })
            .collect()
    }

    // -------------------------------------------------------------------------
    // Indexes & Explain
    // -------------------------------------------------------------------------

    /// Title index plus the author / newest-first year compound index.
    pub fn create_indexes(&self) -> Result<Vec<String>> {
        let specs = [
            IndexSpec::ascending("title"),
            IndexSpec::ascending("author").key("published_year", SortDirection::Descending),
        ];
        specs
            .into_iter()
            .map(|spec| self.engine.create_index(self.collection(), spec))
            .collect()
    }

    pub fn explain_title_lookup(&self, title: &str) -> Result<ExplainOutput> {
        let query = QueryBuilder::new().eq("title", title).build();
        self.engine
            .explain(self.collection(), &query, self.config.explain_verbosity)
    }

    pub fn explain_author_year(&self, author: &str, after_year: i64) -> Result<ExplainOutput> {
        let query = QueryBuilder::new()
            .eq("author", author)
            .gt("published_year", after_year)
            .build();
        self.engine
            .explain(self.collection(), &query, self.config.explain_verbosity)
    }

    // -------------------------------------------------------------------------
    // Full Run
    // -------------------------------------------------------------------------

    /// Run every catalog operation in order. A failing step is logged and
    /// recorded; the remaining steps still run.
    pub fn run_all(&self) -> RunReport {
        tracing::info!(collection = %self.collection(), "starting catalog run");
        let mut report = RunReport::default();
        let mut record = |name: &str, step: StepOutcome| {
            if let StepOutcome::Failed(ref reason) = step {
                tracing::warn!(step = name, %reason, "catalog step failed");
            }
            report.steps.push(StepReport {
                name: name.to_string(),
                outcome: step,
            });
        };

        record("insert_many", outcome(self.seed()));
        record("find_by_genre", outcome(self.books_in_genre("Self-help")));
        record("find_published_after", outcome(self.books_published_after(RECENT_YEAR)));
        record("find_by_author", outcome(self.books_by_author("Paulo Coelho")));
        record("update_price", outcome(self.update_price("The Alchemist", 19.99)));
        record("delete_by_title", outcome(self.delete_by_title("Who Moved My Cheese?")));
        record("page_1_price_ascending", outcome(self.in_stock_page(1, SortDirection::Ascending)));
        record("page_2_price_ascending", outcome(self.in_stock_page(2, SortDirection::Ascending)));
        record("page_1_price_descending", outcome(self.in_stock_page(1, SortDirection::Descending)));
        record("average_price_by_genre", outcome(self.average_price_by_genre()));
        record("top_author", outcome(self.top_author()));
        record("books_by_decade", outcome(self.books_by_decade()));
        record("create_indexes", outcome(self.create_indexes()));
        record("explain_title", outcome(self.explain_title_lookup("The Alchemist")));
        record(
            "explain_author_year",
            outcome(self.explain_author_year("Paulo Coelho", EXPLAIN_AFTER_YEAR)),
        );

        let failed = report.failures().count();
        tracing::info!(steps = report.steps.len(), failed, "catalog run finished");
        report
    }
}

fn outcome<T: Serialize>(result: Result<T>) -> StepOutcome {
    match result.and_then(|value| {
        serde_json::to_value(value).map_err(|e| LibrisError::Serialization(e.to_string()))
    }) {
        Ok(json) => StepOutcome::Completed(json),
        Err(err) => StepOutcome::Failed(err.to_string()),
    }
}

fn string_list(row: &Value, name: &str) -> Result<Vec<String>> {
    match row.get_path(name) {
        Some(Value::Array(items)) => items
            .iter()
            .map(|item| {
                item.as_str()
                    .map(String::from)
                    .ok_or_else(|| LibrisError::TypeError(format!("'{}' should hold strings", name)))
            })
            .collect(),
        _ => Err(LibrisError::TypeError(format!("field '{}' should be an array", name))),
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn runner() -> CatalogRunner {
        let runner = CatalogRunner::new(Arc::new(DocumentEngine::new()), CatalogConfig::default());
        runner.seed().unwrap();
        runner
    }

    #[test]
    fn test_page_query_shape() {
        let runner = CatalogRunner::new(Arc::new(DocumentEngine::new()), CatalogConfig::default());
        let query = runner.in_stock_query(2, SortDirection::Descending);

        assert_eq!(query.skip, Some(5));
        assert_eq!(query.limit, Some(5));
        assert_eq!(query.sort.as_ref().map(|s| s.keys.len()), Some(2));
        assert_eq!(runner.in_stock_query(0, SortDirection::Ascending).skip, Some(0));
    }

    #[test]
    fn test_zero_match_mutations() {
        let runner = runner();
        let update = runner.update_price("Missing Book", 1.0).unwrap();
        assert_eq!(update, UpdateResult::default());

        let delete = runner.delete_by_title("Missing Book").unwrap();
        assert_eq!(delete.deleted_count, 0);
        assert_eq!(runner.count().unwrap(), 10);
    }

    #[test]
    fn test_run_report_json() {
        let runner = CatalogRunner::new(Arc::new(DocumentEngine::new()), CatalogConfig::default());
        let report = runner.run_all();
        assert!(report.succeeded());
        assert_eq!(report.steps.len(), 15);

        let json = report.to_json();
        assert_eq!(json["steps"][0]["name"], "insert_many");
        assert_eq!(json["steps"][0]["outcome"]["status"], "completed");
        assert_eq!(json["steps"][0]["outcome"]["result"]["inserted_count"], 10);

        let by_genre = &json["steps"][9]["outcome"]["result"][0];
        assert_eq!(json["steps"][9]["name"], "average_price_by_genre");
        assert!(by_genre.get("averagePrice").is_some());
        let top = &json["steps"][10]["outcome"]["result"];
        assert_eq!(top["bookCount"], 1);
        assert_eq!(top["author"], "Blake Pierce");
    }

    #[test]
    fn test_failed_step_is_recorded() {
        let engine = Arc::new(DocumentEngine::new());
        let runner = CatalogRunner::new(Arc::clone(&engine), CatalogConfig::default());
        runner.prepare().unwrap();
        engine.drop_collection("books").unwrap();

        let report = RunReport {
            steps: vec![StepReport {
                name: "find_by_genre".to_string(),
                outcome: outcome(runner.books_in_genre("Self-help")),
            }],
        };
        assert!(!report.succeeded());
        assert_eq!(report.failures().count(), 1);
        assert_eq!(report.to_json()["steps"][0]["outcome"]["status"], "failed");
    }
}
