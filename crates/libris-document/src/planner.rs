//! Libris Document Planner
//!
//! Chooses how a query reaches its documents (collection scan, `_id`
//! lookup, or index scan) and renders the choice as an explain plan.
//!
//! The access path only decides which documents get examined. Every
//! candidate is re-checked against the full filter, so results are the same
//! with or without indexes.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::index::{DocumentIndex, RangeBound};
use crate::query::{filters_to_json, Filter, Projection, Query};
use crate::types::{DocumentId, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

// =============================================================================
// Access Path
// =============================================================================

/// How candidate documents are located.
#[derive(Debug, Clone, PartialEq)]
pub enum AccessPath {
    CollectionScan,
    IdLookup(DocumentId),
    IndexScan {
        index_name: String,
        key_pattern: JsonValue,
        /// Equality values bound to the leading key fields.
        prefix: Vec<Value>,
        /// Optional interval on the key field after the prefix.
        range: Option<RangeBound>,
        /// Per-field bounds, in key order, for explain output.
        bounds: Vec<(String, String)>,
    },
}

impl AccessPath {
    /// Base stage of the plan tree for this access path.
    fn stage(&self) -> PlanStage {
        match self {
            Self::CollectionScan => PlanStage::new("COLLSCAN"),
            Self::IdLookup(_) => PlanStage::new("IDHACK"),
            Self::IndexScan {
                index_name,
                key_pattern,
                bounds,
                ..
            } => {
                let mut ixscan = PlanStage::new("IXSCAN");
                ixscan.index_name = Some(index_name.clone());
                ixscan.key_pattern = Some(key_pattern.clone());
                let mut index_bounds = serde_json::Map::new();
                for (field, interval) in bounds {
                    index_bounds.insert(field.clone(), JsonValue::Array(vec![JsonValue::from(interval.as_str())]));
                }
                ixscan.index_bounds = Some(JsonValue::Object(index_bounds));
                PlanStage::new("FETCH").wrap(ixscan)
            }
        }
    }
}

// =============================================================================
// Planner
// =============================================================================

/// Constraints a query places on individual fields.
#[derive(Debug, Default)]
struct FieldConstraints {
    equalities: HashMap<String, Value>,
    ranges: HashMap<String, RangeBound>,
}

impl FieldConstraints {
    /// Collect top-level scalar conditions; anything else stays a residual
    /// filter only.
    fn collect(filters: &[Filter]) -> Self {
        let mut constraints = Self::default();

        for filter in filters {
            match filter {
                Filter::Eq { field, value } if is_scalar(value) => {
                    constraints.equalities.insert(field.clone(), value.clone());
                }
                Filter::Gt { field, value } if is_scalar(value) => {
                    constraints.narrow(field, |r| r.with_lower(value.clone(), false));
                }
                Filter::Gte { field, value } if is_scalar(value) => {
                    constraints.narrow(field, |r| r.with_lower(value.clone(), true));
                }
                Filter::Lt { field, value } if is_scalar(value) => {
                    constraints.narrow(field, |r| r.with_upper(value.clone(), false));
                }
                Filter::Lte { field, value } if is_scalar(value) => {
                    constraints.narrow(field, |r| r.with_upper(value.clone(), true));
                }
                _ => {}
            }
        }

        constraints
    }

    fn narrow(&mut self, field: &str, f: impl FnOnce(RangeBound) -> RangeBound) {
        let current = self.ranges.remove(field).unwrap_or_default();
        self.ranges.insert(field.to_string(), f(current));
    }
}

fn is_scalar(value: &Value) -> bool {
    !matches!(value, Value::Null | Value::Array(_) | Value::Object(_))
}

/// A candidate index plan and how well it matches the query.
struct Candidate {
    path: AccessPath,
    score: usize,
    width: usize,
}

/// Outcome of planning: the winner plus every other viable path.
#[derive(Debug, Clone)]
pub struct PlanChoice {
    pub winning: AccessPath,
    pub rejected: Vec<AccessPath>,
}

/// Rule-based access path selection.
pub struct Planner;

impl Planner {
    /// Pick the access path for `query` given the collection's indexes.
    ///
    /// An `_id` equality always wins. Otherwise the index binding the most
    /// leading fields (equalities count double, one trailing range counts
    /// once) is used; ties prefer the narrower index, then the name.
    pub fn choose(query: &Query, indexes: &[DocumentIndex]) -> PlanChoice {
        let constraints = FieldConstraints::collect(&query.filters);

        if let Some(Value::String(id)) = constraints.equalities.get("_id") {
            return PlanChoice {
                winning: AccessPath::IdLookup(DocumentId::new(id.clone())),
                rejected: Vec::new(),
            };
        }

        let mut candidates: Vec<Candidate> = indexes
            .iter()
            .filter(|index| !index.is_multikey())
            .filter_map(|index| Self::candidate(index, &constraints))
            .collect();

        candidates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then(a.width.cmp(&b.width))
                .then_with(|| index_name(&a.path).cmp(index_name(&b.path)))
        });

        let mut paths = candidates.into_iter().map(|c| c.path);
        match paths.next() {
            Some(winning) => PlanChoice {
                winning,
                rejected: paths.collect(),
            },
            None => PlanChoice {
                winning: AccessPath::CollectionScan,
                rejected: Vec::new(),
            },
        }
    }

    fn candidate(index: &DocumentIndex, constraints: &FieldConstraints) -> Option<Candidate> {
        let mut prefix = Vec::new();
        let mut bounds = Vec::new();
        let mut range = None;

        for field in index.fields() {
            if let Some(value) = constraints.equalities.get(field) {
                prefix.push(value.clone());
                bounds.push((field.to_string(), format!("[{}, {}]", value, value)));
                continue;
            }
            if let Some(bound) = constraints.ranges.get(field) {
                bounds.push((field.to_string(), bound.describe()));
                range = Some(bound.clone());
            }
            break;
        }

        if prefix.is_empty() && range.is_none() {
            return None;
        }

        // Fields past the bound part of the key are scanned in full.
        for field in index.fields().skip(bounds.len()) {
            bounds.push((field.to_string(), "[MinKey, MaxKey]".to_string()));
        }

        let score = prefix.len() * 2 + usize::from(range.is_some());
        Some(Candidate {
            path: AccessPath::IndexScan {
                index_name: index.name().to_string(),
                key_pattern: index.spec().key_pattern(),
                prefix,
                range,
                bounds,
            },
            score,
            width: index.spec().keys.len(),
        })
    }
}

fn index_name(path: &AccessPath) -> &str {
    match path {
        AccessPath::IndexScan { index_name, .. } => index_name,
        _ => "",
    }
}

// =============================================================================
// Explain Output
// =============================================================================

/// One node of an explain plan tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanStage {
    pub stage: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_pattern: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub index_bounds: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sort_pattern: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub projection: Option<JsonValue>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_stage: Option<Box<PlanStage>>,
}

impl PlanStage {
    pub fn new(stage: impl Into<String>) -> Self {
        Self {
            stage: stage.into(),
            index_name: None,
            key_pattern: None,
            index_bounds: None,
            sort_pattern: None,
            amount: None,
            projection: None,
            input_stage: None,
        }
    }

    fn wrap(mut self, input: PlanStage) -> Self {
        self.input_stage = Some(Box::new(input));
        self
    }

    /// Walk down the `input_stage` chain looking for a stage by name.
    pub fn find(&self, stage: &str) -> Option<&PlanStage> {
        if self.stage == stage {
            return Some(self);
        }
        self.input_stage.as_deref().and_then(|input| input.find(stage))
    }

    /// Full plan tree for a query: the access path wrapped in sort, skip,
    /// limit and projection stages as the query requires.
    pub fn for_query(path: &AccessPath, query: &Query) -> Self {
        let mut stage = path.stage();

        if let Some(ref sort) = query.sort {
            let mut pattern = serde_json::Map::new();
            for key in &sort.keys {
                pattern.insert(key.field.clone(), JsonValue::from(key.direction.as_i64()));
            }
            let mut node = PlanStage::new("SORT");
            node.sort_pattern = Some(JsonValue::Object(pattern));
            stage = node.wrap(stage);
        }
        if let Some(skip) = query.skip {
            let mut node = PlanStage::new("SKIP");
            node.amount = Some(skip);
            stage = node.wrap(stage);
        }
        if let Some(limit) = query.limit {
            let mut node = PlanStage::new("LIMIT");
            node.amount = Some(limit);
            stage = node.wrap(stage);
        }
        if let Some(ref projection) = query.projection {
            let mut node = PlanStage::new("PROJECTION");
            node.projection = Some(projection_to_json(projection));
            stage = node.wrap(stage);
        }

        stage
    }
}

fn projection_to_json(projection: &Projection) -> JsonValue {
    let mut obj = serde_json::Map::new();
    match projection {
        Projection::Include { fields, include_id } => {
            for field in fields {
                obj.insert(field.clone(), JsonValue::from(1));
            }
            if !include_id {
                obj.insert("_id".to_string(), JsonValue::from(0));
            }
        }
        Projection::Exclude { fields } => {
            for field in fields {
                obj.insert(field.clone(), JsonValue::from(0));
            }
        }
    }
    JsonValue::Object(obj)
}

/// Planner section of an explain result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryPlannerInfo {
    pub namespace: String,
    pub parsed_filter: JsonValue,
    pub winning_plan: PlanStage,
    pub rejected_plans: Vec<PlanStage>,
}

/// Counters gathered by running the winning plan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExecutionStats {
    pub n_returned: usize,
    pub execution_time_ms: u64,
    pub total_keys_examined: usize,
    pub total_docs_examined: usize,
}

/// Result of an explain call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExplainOutput {
    pub query_planner: QueryPlannerInfo,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub execution_stats: Option<ExecutionStats>,
}

impl ExplainOutput {
    pub(crate) fn new(namespace: &str, query: &Query, choice: &PlanChoice) -> Self {
        Self {
            query_planner: QueryPlannerInfo {
                namespace: namespace.to_string(),
                parsed_filter: filters_to_json(&query.filters),
                winning_plan: PlanStage::for_query(&choice.winning, query),
                rejected_plans: choice
                    .rejected
                    .iter()
                    .map(|path| PlanStage::for_query(path, query))
                    .collect(),
            },
            execution_stats: None,
        }
    }

    /// Name of the index the winning plan scans, if any.
    pub fn winning_index(&self) -> Option<&str> {
        self.query_planner
            .winning_plan
            .find("IXSCAN")
            .and_then(|stage| stage.index_name.as_deref())
    }

    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).unwrap_or(JsonValue::Null)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexSpec;
    use libris_common::SortDirection;
    use serde_json::json;

    fn indexes() -> Vec<DocumentIndex> {
        vec![
            DocumentIndex::new(IndexSpec::ascending("title")),
            DocumentIndex::new(
                IndexSpec::ascending("author").key("published_year", SortDirection::Descending),
            ),
            DocumentIndex::new(IndexSpec::ascending("author")),
        ]
    }

    #[test]
    fn test_collection_scan_without_usable_index() {
        let query = Query::from_json(&json!({ "genre": "Self-help" })).unwrap();
        let choice = Planner::choose(&query, &indexes());
        assert_eq!(choice.winning, AccessPath::CollectionScan);
        assert!(choice.rejected.is_empty());
    }

    #[test]
    fn test_single_field_equality() {
        let query = Query::from_json(&json!({ "title": "The Alchemist" })).unwrap();
        let choice = Planner::choose(&query, &indexes());
        assert_eq!(index_name(&choice.winning), "title_1");
    }

    #[test]
    fn test_compound_index_preferred_for_equality_plus_range() {
        let query = Query::from_json(&json!({
            "author": "Paulo Coelho",
            "published_year": { "$gt": 2000 }
        }))
        .unwrap();
        let choice = Planner::choose(&query, &indexes());

        assert_eq!(index_name(&choice.winning), "author_1_published_year_-1");
        assert_eq!(choice.rejected.len(), 1);
        match choice.winning {
            AccessPath::IndexScan { prefix, range, bounds, .. } => {
                assert_eq!(prefix, vec![Value::from("Paulo Coelho")]);
                assert!(range.is_some());
                assert_eq!(bounds[1], ("published_year".to_string(), "(2000, inf]".to_string()));
            }
            other => panic!("unexpected plan {:?}", other),
        }
    }

    #[test]
    fn test_narrower_index_wins_tie() {
        let query = Query::from_json(&json!({ "author": "Sun Tzu" })).unwrap();
        let choice = Planner::choose(&query, &indexes());
        assert_eq!(index_name(&choice.winning), "author_1");
    }

    #[test]
    fn test_id_lookup() {
        let query = Query::from_json(&json!({ "_id": "abc", "title": "x" })).unwrap();
        let choice = Planner::choose(&query, &indexes());
        assert_eq!(choice.winning, AccessPath::IdLookup(DocumentId::new("abc")));
    }

    #[test]
    fn test_plan_tree() {
        let query = Query::from_json(&json!({ "title": "The Alchemist" }))
            .unwrap()
            .with_sort("price", SortDirection::Ascending)
            .with_limit(5)
            .with_skip(0)
            .with_projection(Projection::include(["title"]).without_id());
        let choice = Planner::choose(&query, &indexes());
        let explain = ExplainOutput::new("books", &query, &choice);

        let plan = &explain.query_planner.winning_plan;
        assert_eq!(plan.stage, "PROJECTION");
        assert!(plan.find("SORT").is_some());
        assert_eq!(plan.find("LIMIT").and_then(|s| s.amount), Some(5));
        assert_eq!(explain.winning_index(), Some("title_1"));

        let json = explain.to_json();
        assert_eq!(json["queryPlanner"]["namespace"], "books");
        assert_eq!(json["queryPlanner"]["parsedFilter"], json!({ "title": { "$eq": "The Alchemist" } }));
        assert!(json.get("executionStats").is_none());
    }
}
