//! Libris Document Query
//!
//! Query language for document filtering and retrieval. Filters can be built
//! programmatically or parsed from the shell-style JSON filter language
//! (`{"published_year": {"$gt": 2010}}`).
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::types::{Document, Value};
use libris_common::{LibrisError, Result, SortDirection};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::borrow::Cow;
use std::cmp::Ordering;
use std::collections::HashMap;

/// Compiled size cap for user supplied regex patterns.
const REGEX_SIZE_LIMIT: usize = 1024 * 1024;

// =============================================================================
// Field Source
// =============================================================================

/// Anything filters, sorts and projections can read fields from.
///
/// Implemented for stored documents and for the plain object values that
/// flow between aggregation stages.
pub trait FieldSource {
    /// Look up a (possibly dotted) field path.
    fn field(&self, path: &str) -> Option<Cow<'_, Value>>;

    /// All top-level fields as an owned map.
    fn to_object(&self) -> HashMap<String, Value>;
}

impl FieldSource for Document {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        if path == "_id" {
            return Some(Cow::Owned(Value::String(self.id.0.clone())));
        }
        self.get(path).map(Cow::Borrowed)
    }

    fn to_object(&self) -> HashMap<String, Value> {
        let mut obj = self.data.clone();
        obj.insert("_id".to_string(), Value::String(self.id.0.clone()));
        obj
    }
}

impl FieldSource for Value {
    fn field(&self, path: &str) -> Option<Cow<'_, Value>> {
        self.get_path(path).map(Cow::Borrowed)
    }

    fn to_object(&self) -> HashMap<String, Value> {
        self.as_object().cloned().unwrap_or_default()
    }
}

// =============================================================================
// Query
// =============================================================================

/// A query for filtering documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Query {
    pub filters: Vec<Filter>,
    pub sort: Option<SortSpec>,
    pub skip: Option<usize>,
    pub limit: Option<usize>,
    pub projection: Option<Projection>,
}

impl Query {
    pub fn new() -> Self {
        Self {
            filters: Vec::new(),
            sort: None,
            skip: None,
            limit: None,
            projection: None,
        }
    }

    /// Build a query from a JSON filter document.
    ///
    /// Top-level conjunctions are flattened so the planner can see each
    /// field condition on its own.
    pub fn from_json(filter: &JsonValue) -> Result<Self> {
        let mut query = Self::new();
        match Filter::from_json(filter)? {
            Filter::And(filters) => query.filters = filters,
            other => query.filters.push(other),
        }
        Ok(query)
    }

    /// Check if a document matches this query.
    pub fn matches<S: FieldSource + ?Sized>(&self, doc: &S) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Add a filter.
    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filters.push(filter);
        self
    }

    /// Add a sort key after any existing ones.
    pub fn with_sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        let spec = self.sort.take().unwrap_or_default();
        self.sort = Some(spec.then_by(field, direction));
        self
    }

    /// Add skip.
    pub fn with_skip(mut self, skip: usize) -> Self {
        self.skip = Some(skip);
        self
    }

    /// Add limit.
    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Add projection.
    pub fn with_projection(mut self, projection: Projection) -> Self {
        self.projection = Some(projection);
        self
    }

    /// Sort, page and project matched documents.
    ///
    /// Skip always applies before limit, whatever order the caller set them.
    pub(crate) fn shape(&self, mut docs: Vec<&Document>) -> Vec<Value> {
        if let Some(ref sort) = self.sort {
            docs.sort_by(|a, b| sort.compare(*a, *b));
        }

        docs.into_iter()
            .skip(self.skip.unwrap_or(0))
            .take(self.limit.unwrap_or(usize::MAX))
            .map(|doc| match self.projection {
                Some(ref projection) => projection.apply(doc),
                None => doc.to_value(),
            })
            .collect()
    }
}

impl Default for Query {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Filter
// =============================================================================

/// A filter condition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Filter {
    Eq { field: String, value: Value },
    Ne { field: String, value: Value },
    Gt { field: String, value: Value },
    Gte { field: String, value: Value },
    Lt { field: String, value: Value },
    Lte { field: String, value: Value },
    In { field: String, values: Vec<Value> },
    Nin { field: String, values: Vec<Value> },
    Exists { field: String, exists: bool },
    Regex { field: String, pattern: String },
    Contains { field: String, value: String },
    StartsWith { field: String, value: String },
    EndsWith { field: String, value: String },
    And(Vec<Filter>),
    Or(Vec<Filter>),
    Not(Box<Filter>),
}

impl Filter {
    /// Check if a document matches this filter.
    ///
    /// A condition on an array field matches when the array itself or any
    /// of its elements satisfies it. Equality with null also matches a
    /// missing field.
    pub fn matches<S: FieldSource + ?Sized>(&self, doc: &S) -> bool {
        match self {
            Self::Eq { field, value } => eq_matches(doc.field(field).as_deref(), value),
            Self::Ne { field, value } => !eq_matches(doc.field(field).as_deref(), value),
            Self::Gt { field, value } => range_matches(doc, field, value, |o| o == Ordering::Greater),
            Self::Gte { field, value } => range_matches(doc, field, value, |o| o != Ordering::Less),
            Self::Lt { field, value } => range_matches(doc, field, value, |o| o == Ordering::Less),
            Self::Lte { field, value } => range_matches(doc, field, value, |o| o != Ordering::Greater),
            Self::In { field, values } => {
                let found = doc.field(field);
                values.iter().any(|v| eq_matches(found.as_deref(), v))
            }
            Self::Nin { field, values } => {
                let found = doc.field(field);
                !values.iter().any(|v| eq_matches(found.as_deref(), v))
            }
            Self::Exists { field, exists } => doc.field(field).is_some() == *exists,
            Self::Regex { field, pattern } => {
                let Ok(re) = compile_regex(pattern) else {
                    return false;
                };
                string_matches(doc, field, |s| re.is_match(s))
            }
            Self::Contains { field, value } => string_matches(doc, field, |s| s.contains(value.as_str())),
            Self::StartsWith { field, value } => {
                string_matches(doc, field, |s| s.starts_with(value.as_str()))
            }
            Self::EndsWith { field, value } => string_matches(doc, field, |s| s.ends_with(value.as_str())),
            Self::And(filters) => filters.iter().all(|f| f.matches(doc)),
            Self::Or(filters) => filters.iter().any(|f| f.matches(doc)),
            Self::Not(filter) => !filter.matches(doc),
        }
    }

    /// Parse a JSON filter document.
    ///
    /// Supports implicit equality, the comparison operators `$eq $ne $gt
    /// $gte $lt $lte $in $nin $exists $regex $not`, and the logical
    /// operators `$and $or $nor`.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| LibrisError::Parse(format!("filter must be an object, got {}", json)))?;

        let mut clauses = Vec::new();
        for (key, value) in obj {
            match key.as_str() {
                "$and" => clauses.push(Self::And(parse_filter_list(key, value)?)),
                "$or" => clauses.push(Self::Or(parse_filter_list(key, value)?)),
                "$nor" => clauses.push(Self::Not(Box::new(Self::Or(parse_filter_list(key, value)?)))),
                op if op.starts_with('$') => {
                    return Err(LibrisError::Parse(format!("unknown top-level operator: {}", op)));
                }
                field => clauses.extend(parse_field_condition(field, value)?),
            }
        }

        Ok(collapse(clauses))
    }

    /// Render the filter back to the JSON filter language, with every
    /// operator spelled out.
    pub fn to_json(&self) -> JsonValue {
        let field_op = |field: &str, op: &str, operand: JsonValue| {
            let mut condition = serde_json::Map::new();
            condition.insert(op.to_string(), operand);
            let mut obj = serde_json::Map::new();
            obj.insert(field.to_string(), JsonValue::Object(condition));
            JsonValue::Object(obj)
        };
        let list = |values: &[Value]| JsonValue::Array(values.iter().map(Value::to_json).collect());

        match self {
            Self::Eq { field, value } => field_op(field, "$eq", value.to_json()),
            Self::Ne { field, value } => field_op(field, "$ne", value.to_json()),
            Self::Gt { field, value } => field_op(field, "$gt", value.to_json()),
            Self::Gte { field, value } => field_op(field, "$gte", value.to_json()),
            Self::Lt { field, value } => field_op(field, "$lt", value.to_json()),
            Self::Lte { field, value } => field_op(field, "$lte", value.to_json()),
            Self::In { field, values } => field_op(field, "$in", list(values)),
            Self::Nin { field, values } => field_op(field, "$nin", list(values)),
            Self::Exists { field, exists } => field_op(field, "$exists", JsonValue::Bool(*exists)),
            Self::Regex { field, pattern } => field_op(field, "$regex", JsonValue::from(pattern.as_str())),
            Self::Contains { field, value } => {
                field_op(field, "$regex", JsonValue::from(regex::escape(value)))
            }
            Self::StartsWith { field, value } => {
                field_op(field, "$regex", JsonValue::from(format!("^{}", regex::escape(value))))
            }
            Self::EndsWith { field, value } => {
                field_op(field, "$regex", JsonValue::from(format!("{}$", regex::escape(value))))
            }
            Self::And(filters) => {
                serde_json::json!({ "$and": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Self::Or(filters) => {
                serde_json::json!({ "$or": filters.iter().map(Filter::to_json).collect::<Vec<_>>() })
            }
            Self::Not(filter) => serde_json::json!({ "$nor": [filter.to_json()] }),
        }
    }
}

/// JSON form of a conjunction of filters; `{}` when there are none.
pub fn filters_to_json(filters: &[Filter]) -> JsonValue {
    match filters {
        [] => JsonValue::Object(serde_json::Map::new()),
        [only] => only.to_json(),
        many => serde_json::json!({ "$and": many.iter().map(Filter::to_json).collect::<Vec<_>>() }),
    }
}

fn collapse(mut clauses: Vec<Filter>) -> Filter {
    if clauses.len() == 1 {
        if let Some(only) = clauses.pop() {
            return only;
        }
    }
    Filter::And(clauses)
}

fn parse_filter_list(op: &str, value: &JsonValue) -> Result<Vec<Filter>> {
    let items = value
        .as_array()
        .filter(|items| !items.is_empty())
        .ok_or_else(|| LibrisError::Parse(format!("{} requires a non-empty array", op)))?;
    items.iter().map(Filter::from_json).collect()
}

fn is_operator_object(value: &JsonValue) -> bool {
    value
        .as_object()
        .map(|obj| !obj.is_empty() && obj.keys().all(|k| k.starts_with('$')))
        .unwrap_or(false)
}

fn parse_field_condition(field: &str, value: &JsonValue) -> Result<Vec<Filter>> {
    if !is_operator_object(value) {
        return Ok(vec![Filter::Eq {
            field: field.to_string(),
            value: Value::from_json(value.clone()),
        }]);
    }

    let Some(ops) = value.as_object() else {
        return Ok(Vec::new());
    };
    let mut filters = Vec::with_capacity(ops.len());

    for (op, operand) in ops {
        let field = field.to_string();
        let filter = match op.as_str() {
            "$eq" => Filter::Eq { field, value: Value::from_json(operand.clone()) },
            "$ne" => Filter::Ne { field, value: Value::from_json(operand.clone()) },
            "$gt" => Filter::Gt { field, value: Value::from_json(operand.clone()) },
            "$gte" => Filter::Gte { field, value: Value::from_json(operand.clone()) },
            "$lt" => Filter::Lt { field, value: Value::from_json(operand.clone()) },
            "$lte" => Filter::Lte { field, value: Value::from_json(operand.clone()) },
            "$in" => Filter::In { field, values: parse_value_list(op, operand)? },
            "$nin" => Filter::Nin { field, values: parse_value_list(op, operand)? },
            "$exists" => Filter::Exists { field, exists: truthy(op, operand)? },
            "$regex" => {
                let pattern = operand
                    .as_str()
                    .ok_or_else(|| LibrisError::Parse("$regex requires a string".to_string()))?;
                let options = ops.get("$options").and_then(|o| o.as_str()).unwrap_or("");
                let pattern = if options.is_empty() {
                    pattern.to_string()
                } else {
                    format!("(?{}){}", options, pattern)
                };
                compile_regex(&pattern)?;
                Filter::Regex { field, pattern }
            }
            "$options" => {
                if !ops.contains_key("$regex") {
                    return Err(LibrisError::Parse("$options requires $regex".to_string()));
                }
                continue;
            }
            "$not" => {
                if !is_operator_object(operand) {
                    return Err(LibrisError::Parse("$not requires an operator object".to_string()));
                }
                Filter::Not(Box::new(collapse(parse_field_condition(&field, operand)?)))
            }
            other => {
                return Err(LibrisError::Parse(format!("unknown query operator: {}", other)));
            }
        };
        filters.push(filter);
    }

    Ok(filters)
}

fn parse_value_list(op: &str, operand: &JsonValue) -> Result<Vec<Value>> {
    operand
        .as_array()
        .map(|items| items.iter().cloned().map(Value::from_json).collect())
        .ok_or_else(|| LibrisError::Parse(format!("{} requires an array", op)))
}

/// Shell-style flag: booleans, or numbers where zero is false.
pub(crate) fn truthy(op: &str, operand: &JsonValue) -> Result<bool> {
    match operand {
        JsonValue::Bool(b) => Ok(*b),
        JsonValue::Number(n) => Ok(n.as_f64().map(|f| f != 0.0).unwrap_or(false)),
        other => Err(LibrisError::Parse(format!(
            "{} expects a boolean or number, got {}",
            op, other
        ))),
    }
}

fn compile_regex(pattern: &str) -> Result<regex::Regex> {
    regex::RegexBuilder::new(pattern)
        .size_limit(REGEX_SIZE_LIMIT)
        .build()
        .map_err(|e| LibrisError::Parse(format!("invalid regex pattern: {}", e)))
}

fn eq_matches(found: Option<&Value>, expected: &Value) -> bool {
    match found {
        None => expected.is_null(),
        Some(v) => {
            v.loose_eq(expected)
                || v.as_array()
                    .map(|items| items.iter().any(|item| item.loose_eq(expected)))
                    .unwrap_or(false)
        }
    }
}

fn range_matches<S, F>(doc: &S, field: &str, bound: &Value, accept: F) -> bool
where
    S: FieldSource + ?Sized,
    F: Fn(Ordering) -> bool,
{
    let Some(found) = doc.field(field) else {
        return false;
    };
    let check = |v: &Value| v.type_rank() == bound.type_rank() && accept(v.compare(bound));

    match &*found {
        Value::Array(items) if !bound.is_array() => items.iter().any(check),
        v => check(v),
    }
}

fn string_matches<S, F>(doc: &S, field: &str, pred: F) -> bool
where
    S: FieldSource + ?Sized,
    F: Fn(&str) -> bool,
{
    match doc.field(field).as_deref() {
        Some(Value::String(s)) => pred(s),
        Some(Value::Array(items)) => items.iter().filter_map(|v| v.as_str()).any(pred),
        _ => false,
    }
}

// =============================================================================
// Sort
// =============================================================================

/// One key of a sort specification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

/// Ordered list of sort keys; later keys break ties of earlier ones.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortSpec {
    pub keys: Vec<SortKey>,
}

impl SortSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn by(field: impl Into<String>, direction: SortDirection) -> Self {
        Self::new().then_by(field, direction)
    }

    pub fn then_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.keys.push(SortKey {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    /// Parse `{"price": 1, "title": -1}`; key order is significant.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| LibrisError::Parse(format!("sort must be an object, got {}", json)))?;
        if obj.is_empty() {
            return Err(LibrisError::Parse("sort requires at least one key".to_string()));
        }

        let mut spec = Self::new();
        for (field, dir) in obj {
            let direction = dir.as_i64().and_then(SortDirection::from_i64).ok_or_else(|| {
                LibrisError::Parse(format!("sort direction for '{}' must be 1 or -1", field))
            })?;
            spec = spec.then_by(field.clone(), direction);
        }
        Ok(spec)
    }

    /// Compare two sources; missing fields sort as null.
    pub fn compare<S: FieldSource + ?Sized>(&self, a: &S, b: &S) -> Ordering {
        for key in &self.keys {
            let va = a.field(&key.field).unwrap_or(Cow::Owned(Value::Null));
            let vb = b.field(&key.field).unwrap_or(Cow::Owned(Value::Null));
            let ord = match key.direction {
                SortDirection::Ascending => va.compare(&vb),
                SortDirection::Descending => vb.compare(&va),
            };
            if ord != Ordering::Equal {
                return ord;
            }
        }
        Ordering::Equal
    }
}

// =============================================================================
// Projection
// =============================================================================

/// Which fields a query returns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Projection {
    /// Only the listed fields, plus `_id` unless turned off.
    Include { fields: Vec<String>, include_id: bool },
    /// Everything except the listed fields (which may name `_id`).
    Exclude { fields: Vec<String> },
}

impl Projection {
    pub fn include<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Include {
            fields: fields.into_iter().map(Into::into).collect(),
            include_id: true,
        }
    }

    /// Drop `_id` from an inclusion projection.
    pub fn without_id(self) -> Self {
        match self {
            Self::Include { fields, .. } => Self::Include {
                fields,
                include_id: false,
            },
            Self::Exclude { mut fields } => {
                if !fields.iter().any(|f| f == "_id") {
                    fields.push("_id".to_string());
                }
                Self::Exclude { fields }
            }
        }
    }

    /// Parse `{"title": 1, "author": 1, "_id": 0}`.
    ///
    /// Inclusion and exclusion cannot be mixed, except for `_id`.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let obj = json.as_object().ok_or_else(|| {
            LibrisError::Parse(format!("projection must be an object, got {}", json))
        })?;

        let mut id_setting = None;
        let mut included = Vec::new();
        let mut excluded = Vec::new();

        for (field, flag) in obj {
            let keep = truthy("projection", flag)?;
            if field == "_id" {
                id_setting = Some(keep);
            } else if keep {
                included.push(field.clone());
            } else {
                excluded.push(field.clone());
            }
        }

        if !included.is_empty() && !excluded.is_empty() {
            return Err(LibrisError::Parse(
                "projection cannot mix inclusion and exclusion".to_string(),
            ));
        }

        if !included.is_empty() {
            return Ok(Self::Include {
                fields: included,
                include_id: id_setting.unwrap_or(true),
            });
        }

        if id_setting == Some(false) {
            excluded.push("_id".to_string());
        }
        Ok(Self::Exclude { fields: excluded })
    }

    /// Project a source into a plain object value.
    pub fn apply<S: FieldSource + ?Sized>(&self, source: &S) -> Value {
        match self {
            Self::Include { fields, include_id } => {
                let mut obj = HashMap::with_capacity(fields.len() + 1);
                if *include_id {
                    if let Some(id) = source.field("_id") {
                        obj.insert("_id".to_string(), id.into_owned());
                    }
                }
                for field in fields {
                    if let Some(value) = source.field(field) {
                        obj.insert(field.clone(), value.into_owned());
                    }
                }
                Value::Object(obj)
            }
            Self::Exclude { fields } => {
                let mut obj = source.to_object();
                for field in fields {
                    obj.remove(field);
                }
                Value::Object(obj)
            }
        }
    }
}

// =============================================================================
// Query Builder
// =============================================================================

/// Builder for constructing queries.
pub struct QueryBuilder {
    query: Query,
}

impl QueryBuilder {
    pub fn new() -> Self {
        Self {
            query: Query::new(),
        }
    }

    pub fn filter(mut self, filter: Filter) -> Self {
        self.query.filters.push(filter);
        self
    }

    pub fn eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.filters.push(Filter::Eq {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn ne(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.filters.push(Filter::Ne {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn gt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.filters.push(Filter::Gt {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn gte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.filters.push(Filter::Gte {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn lt(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.filters.push(Filter::Lt {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn lte(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.query.filters.push(Filter::Lte {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn in_values(mut self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.query.filters.push(Filter::In {
            field: field.into(),
            values,
        });
        self
    }

    pub fn exists(mut self, field: impl Into<String>, exists: bool) -> Self {
        self.query.filters.push(Filter::Exists {
            field: field.into(),
            exists,
        });
        self
    }

    pub fn contains(mut self, field: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.filters.push(Filter::Contains {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn regex(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.query.filters.push(Filter::Regex {
            field: field.into(),
            pattern: pattern.into(),
        });
        self
    }

    pub fn or(mut self, filters: Vec<Filter>) -> Self {
        self.query.filters.push(Filter::Or(filters));
        self
    }

    pub fn sort(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.query = self.query.with_sort(field, direction);
        self
    }

    pub fn skip(mut self, skip: usize) -> Self {
        self.query.skip = Some(skip);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.query.limit = Some(limit);
        self
    }

    pub fn project(mut self, projection: Projection) -> Self {
        self.query.projection = Some(projection);
        self
    }

    pub fn build(self) -> Query {
        self.query
    }
}

impl Default for QueryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Query Result
// =============================================================================

/// Result of a document query.
#[derive(Debug, Clone)]
pub struct QueryResult {
    /// Matching documents after sort, paging and projection.
    pub documents: Vec<Value>,
    pub total_scanned: usize,
    pub keys_examined: usize,
    pub execution_time_ms: u64,
}

impl QueryResult {
    pub fn empty() -> Self {
        Self {
            documents: Vec::new(),
            total_scanned: 0,
            keys_examined: 0,
            execution_time_ms: 0,
        }
    }

    pub fn count(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn first(&self) -> Option<&Value> {
        self.documents.first()
    }

    pub fn to_json(&self) -> Vec<JsonValue> {
        self.documents.iter().map(Value::to_json).collect()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn create_test_doc() -> Document {
        let mut doc = Document::with_id("test");
        doc.set("title", "Untamed");
        doc.set("author", "Glennon Doyle");
        doc.set("genre", "Memoir / Self-help");
        doc.set("published_year", 2020i64);
        doc.set("price", 17.99f64);
        doc.set("in_stock", true);
        doc
    }

    #[test]
    fn test_eq_filter() {
        let doc = create_test_doc();

        let filter = Filter::Eq {
            field: "author".to_string(),
            value: Value::from("Glennon Doyle"),
        };
        assert!(filter.matches(&doc));

        // Equality is exact, not substring.
        let filter = Filter::Eq {
            field: "genre".to_string(),
            value: Value::from("Self-help"),
        };
        assert!(!filter.matches(&doc));
    }

    #[test]
    fn test_eq_null_matches_missing() {
        let doc = create_test_doc();
        let filter = Filter::Eq {
            field: "isbn".to_string(),
            value: Value::Null,
        };
        assert!(filter.matches(&doc));
    }

    #[test]
    fn test_comparison_filters() {
        let doc = create_test_doc();

        let filter = Filter::Gt {
            field: "published_year".to_string(),
            value: Value::Int(2010),
        };
        assert!(filter.matches(&doc));

        let filter = Filter::Lt {
            field: "published_year".to_string(),
            value: Value::Int(2010),
        };
        assert!(!filter.matches(&doc));

        let filter = Filter::Gte {
            field: "price".to_string(),
            value: Value::Float(17.99),
        };
        assert!(filter.matches(&doc));

        // Comparisons never cross type classes.
        let filter = Filter::Gt {
            field: "title".to_string(),
            value: Value::Int(0),
        };
        assert!(!filter.matches(&doc));
    }

    #[test]
    fn test_string_filters() {
        let doc = create_test_doc();

        let filter = Filter::Contains {
            field: "genre".to_string(),
            value: "Self-help".to_string(),
        };
        assert!(filter.matches(&doc));

        let filter = Filter::StartsWith {
            field: "genre".to_string(),
            value: "Memoir".to_string(),
        };
        assert!(filter.matches(&doc));

        let filter = Filter::EndsWith {
            field: "genre".to_string(),
            value: "help".to_string(),
        };
        assert!(filter.matches(&doc));
    }

    #[test]
    fn test_logical_filters() {
        let doc = create_test_doc();

        let filter = Filter::And(vec![
            Filter::Eq {
                field: "in_stock".to_string(),
                value: Value::Bool(true),
            },
            Filter::Gt {
                field: "published_year".to_string(),
                value: Value::Int(2010),
            },
        ]);
        assert!(filter.matches(&doc));

        let filter = Filter::Or(vec![
            Filter::Eq {
                field: "author".to_string(),
                value: Value::from("Sun Tzu"),
            },
            Filter::Eq {
                field: "in_stock".to_string(),
                value: Value::Bool(false),
            },
        ]);
        assert!(!filter.matches(&doc));
    }

    #[test]
    fn test_from_json_implicit_and_operators() {
        let doc = create_test_doc();

        let query = Query::from_json(&json!({
            "in_stock": true,
            "published_year": { "$gt": 2010 }
        }))
        .unwrap();
        assert_eq!(query.filters.len(), 2);
        assert!(query.matches(&doc));

        let query = Query::from_json(&json!({ "published_year": { "$gt": 2010, "$lt": 2020 } })).unwrap();
        assert!(!query.matches(&doc));
    }

    #[test]
    fn test_from_json_logical_operators() {
        let doc = create_test_doc();

        let filter = Filter::from_json(&json!({
            "$or": [{ "author": "Sun Tzu" }, { "price": { "$lte": 18 } }]
        }))
        .unwrap();
        assert!(filter.matches(&doc));

        let filter = Filter::from_json(&json!({
            "$nor": [{ "author": "Glennon Doyle" }]
        }))
        .unwrap();
        assert!(!filter.matches(&doc));

        let filter = Filter::from_json(&json!({
            "price": { "$not": { "$gt": 100 } }
        }))
        .unwrap();
        assert!(filter.matches(&doc));
    }

    #[test]
    fn test_from_json_in_and_regex() {
        let doc = create_test_doc();

        let filter = Filter::from_json(&json!({
            "author": { "$in": ["Sun Tzu", "Glennon Doyle"] }
        }))
        .unwrap();
        assert!(filter.matches(&doc));

        let filter = Filter::from_json(&json!({
            "genre": { "$regex": "self-HELP$", "$options": "i" }
        }))
        .unwrap();
        assert!(filter.matches(&doc));
    }

    #[test]
    fn test_from_json_errors() {
        assert!(matches!(
            Filter::from_json(&json!({ "price": { "$near": 3 } })),
            Err(LibrisError::Parse(_))
        ));
        assert!(matches!(
            Filter::from_json(&json!({ "$where": "1" })),
            Err(LibrisError::Parse(_))
        ));
        assert!(matches!(
            Filter::from_json(&json!({ "author": { "$in": "Sun Tzu" } })),
            Err(LibrisError::Parse(_))
        ));
        assert!(matches!(
            Filter::from_json(&json!({ "title": { "$regex": "(" } })),
            Err(LibrisError::Parse(_))
        ));
        assert!(matches!(Filter::from_json(&json!([1])), Err(LibrisError::Parse(_))));
    }

    #[test]
    fn test_filter_to_json() {
        let query = Query::from_json(&json!({
            "author": "Paulo Coelho",
            "published_year": { "$gt": 2000 }
        }))
        .unwrap();

        assert_eq!(
            filters_to_json(&query.filters),
            json!({ "$and": [
                { "author": { "$eq": "Paulo Coelho" } },
                { "published_year": { "$gt": 2000 } }
            ] })
        );
        assert_eq!(filters_to_json(&[]), json!({}));
    }

    #[test]
    fn test_projection() {
        let doc = create_test_doc();

        let projection =
            Projection::from_json(&json!({ "title": 1, "author": 1, "price": 1, "_id": 0 })).unwrap();
        let projected = projection.apply(&doc);
        let obj = projected.as_object().unwrap();
        assert_eq!(obj.len(), 3);
        assert!(!obj.contains_key("_id"));
        assert_eq!(obj.get("price"), Some(&Value::Float(17.99)));

        let projection = Projection::from_json(&json!({ "genre": 0 })).unwrap();
        let obj = projection.apply(&doc);
        assert!(obj.get_path("genre").is_none());
        assert_eq!(obj.get_path("_id"), Some(&Value::from("test")));

        assert!(Projection::from_json(&json!({ "title": 1, "genre": 0 })).is_err());
    }

    #[test]
    fn test_sort_spec() {
        let mut cheap = Document::with_id("a");
        cheap.set("price", 9.99f64);
        cheap.set("title", "The Art of War");
        let mut dear = Document::with_id("b");
        dear.set("price", 20i64);
        dear.set("title", "What Happened to You?");

        let spec = SortSpec::from_json(&json!({ "price": -1 })).unwrap();
        assert_eq!(spec.compare(&dear, &cheap), Ordering::Less);

        let spec = SortSpec::by("missing", SortDirection::Ascending)
            .then_by("title", SortDirection::Ascending);
        assert_eq!(spec.compare(&cheap, &dear), Ordering::Less);

        assert!(SortSpec::from_json(&json!({ "price": 2 })).is_err());
    }

    #[test]
    fn test_query_shape_skips_before_limit() {
        let docs: Vec<Document> = (0..8)
            .map(|i| {
                let mut doc = Document::with_id(format!("doc{}", i));
                doc.set("rank", i as i64);
                doc
            })
            .collect();

        let query = QueryBuilder::new()
            .limit(3)
            .skip(2)
            .sort("rank", SortDirection::Descending)
            .project(Projection::include(["rank"]).without_id())
            .build();
        let shaped = query.shape(docs.iter().collect());

        let ranks: Vec<i64> = shaped
            .iter()
            .filter_map(|v| v.get_path("rank").and_then(Value::as_i64))
            .collect();
        assert_eq!(ranks, vec![5, 4, 3]);
    }

    #[test]
    fn test_query_builder() {
        let doc = create_test_doc();

        let query = QueryBuilder::new()
            .eq("author", "Glennon Doyle")
            .gt("published_year", 2010i64)
            .build();
        assert!(query.matches(&doc));

        let query = QueryBuilder::new().eq("author", "Sun Tzu").build();
        assert!(!query.matches(&doc));
    }

    #[test]
    fn test_query_builder_in_and_or() {
        let doc = create_test_doc();

        let query = QueryBuilder::new()
            .in_values("genre", vec!["Self-help".into(), "Memoir / Self-help".into()])
            .build();
        assert!(query.matches(&doc));

        let query = QueryBuilder::new()
            .in_values("genre", vec!["Self-help".into()])
            .build();
        assert!(!query.matches(&doc));

        let query = QueryBuilder::new()
            .or(vec![
                Filter::Eq {
                    field: "author".to_string(),
                    value: "Sun Tzu".into(),
                },
                Filter::Lt {
                    field: "price".to_string(),
                    value: 18.0f64.into(),
                },
            ])
            .build();
        assert!(query.matches(&doc));
        assert_eq!(
            filters_to_json(&query.filters),
            json!({ "$or": [
                { "author": { "$eq": "Sun Tzu" } },
                { "price": { "$lt": 18.0 } }
            ] })
        );
    }

    #[test]
    fn test_exists_filter() {
        let doc = create_test_doc();

        let filter = Filter::Exists {
            field: "title".to_string(),
            exists: true,
        };
        assert!(filter.matches(&doc));

        let filter = Filter::Exists {
            field: "isbn".to_string(),
            exists: false,
        };
        assert!(filter.matches(&doc));
    }
}
