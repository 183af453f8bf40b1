//! Libris Document Index
//!
//! Ordered single-field and compound indexes. Keys are tuples of field
//! values; a lookup binds equality values to a prefix of the key fields and
//! may put one range on the next field.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::query::FieldSource;
use crate::types::{Document, DocumentId, Value};
use libris_common::{LibrisError, Result, SortDirection};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::{BTreeMap, BTreeSet};
use std::ops::Bound;

// =============================================================================
// Index Specification
// =============================================================================

/// One field of an index key pattern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexField {
    pub field: String,
    pub direction: SortDirection,
}

/// Key pattern and options of an index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexSpec {
    pub keys: Vec<IndexField>,
    pub unique: bool,
    pub name: Option<String>,
}

impl IndexSpec {
    pub fn new() -> Self {
        Self {
            keys: Vec::new(),
            unique: false,
            name: None,
        }
    }

    /// Single ascending field.
    pub fn ascending(field: impl Into<String>) -> Self {
        Self::new().key(field, SortDirection::Ascending)
    }

    pub fn key(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.keys.push(IndexField {
            field: field.into(),
            direction,
        });
        self
    }

    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Parse a key pattern such as `{"author": 1, "published_year": -1}`.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let obj = json.as_object().ok_or_else(|| {
            LibrisError::Parse(format!("index key pattern must be an object, got {}", json))
        })?;

        let mut spec = Self::new();
        for (field, dir) in obj {
            let direction = dir.as_i64().and_then(SortDirection::from_i64).ok_or_else(|| {
                LibrisError::Parse(format!("index direction for '{}' must be 1 or -1", field))
            })?;
            spec = spec.key(field.clone(), direction);
        }
        spec.validate()?;
        Ok(spec)
    }

    pub fn validate(&self) -> Result<()> {
        if self.keys.is_empty() {
            return Err(LibrisError::Parse("index key pattern is empty".to_string()));
        }
        let mut seen = BTreeSet::new();
        for key in &self.keys {
            if key.field.is_empty() {
                return Err(LibrisError::Parse("index field name is empty".to_string()));
            }
            if !seen.insert(key.field.as_str()) {
                return Err(LibrisError::Parse(format!(
                    "field '{}' appears twice in index key pattern",
                    key.field
                )));
            }
        }
        Ok(())
    }

    /// Explicit name, or the `field_1_other_-1` convention.
    pub fn index_name(&self) -> String {
        if let Some(ref name) = self.name {
            return name.clone();
        }
        self.keys
            .iter()
            .map(|k| format!("{}_{}", k.field, k.direction))
            .collect::<Vec<_>>()
            .join("_")
    }

    /// Key pattern as JSON, e.g. `{"title": 1}`.
    pub fn key_pattern(&self) -> JsonValue {
        let mut obj = serde_json::Map::new();
        for key in &self.keys {
            obj.insert(key.field.clone(), JsonValue::from(key.direction.as_i64()));
        }
        JsonValue::Object(obj)
    }

    /// True when both specs index the same fields in the same directions.
    pub fn same_keys(&self, other: &IndexSpec) -> bool {
        self.keys == other.keys
    }
}

impl Default for IndexSpec {
    fn default() -> Self {
        Self::new()
    }
}

/// Description of an index, as listed by a collection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IndexInfo {
    pub name: String,
    pub key: JsonValue,
    pub unique: bool,
    pub entries: usize,
}

// =============================================================================
// Range Bound
// =============================================================================

/// Interval on one key field, built from `$gt/$gte/$lt/$lte` conditions.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RangeBound {
    pub lower: Option<(Value, bool)>,
    pub upper: Option<(Value, bool)>,
}

impl RangeBound {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the lower bound if `value` is tighter.
    pub fn with_lower(mut self, value: Value, inclusive: bool) -> Self {
        let tighter = match self.lower {
            None => true,
            Some((ref current, current_inclusive)) => match value.compare(current) {
                Ordering::Greater => true,
                Ordering::Equal => current_inclusive && !inclusive,
                Ordering::Less => false,
            },
        };
        if tighter {
            self.lower = Some((value, inclusive));
        }
        self
    }

    /// Lower the upper bound if `value` is tighter.
    pub fn with_upper(mut self, value: Value, inclusive: bool) -> Self {
        let tighter = match self.upper {
            None => true,
            Some((ref current, current_inclusive)) => match value.compare(current) {
                Ordering::Less => true,
                Ordering::Equal => current_inclusive && !inclusive,
                Ordering::Greater => false,
            },
        };
        if tighter {
            self.upper = Some((value, inclusive));
        }
        self
    }

    pub fn is_unbounded(&self) -> bool {
        self.lower.is_none() && self.upper.is_none()
    }

    /// Whether a key value falls inside the interval. Values of another
    /// type class than the bounds never match.
    pub fn contains(&self, value: &Value) -> bool {
        if let Some((ref low, inclusive)) = self.lower {
            if value.type_rank() != low.type_rank() {
                return false;
            }
            match value.compare(low) {
                Ordering::Less => return false,
                Ordering::Equal if !inclusive => return false,
                _ => {}
            }
        }
        if let Some((ref high, inclusive)) = self.upper {
            if value.type_rank() != high.type_rank() {
                return false;
            }
            match value.compare(high) {
                Ordering::Greater => return false,
                Ordering::Equal if !inclusive => return false,
                _ => {}
            }
        }
        true
    }

    /// Interval notation used in explain output, e.g. `(2000, inf]`.
    pub fn describe(&self) -> String {
        let (open, low) = match self.lower {
            Some((ref v, true)) => ("[", v.to_string()),
            Some((ref v, false)) => ("(", v.to_string()),
            None => ("[", "-inf".to_string()),
        };
        let (close, high) = match self.upper {
            Some((ref v, true)) => ("]", v.to_string()),
            Some((ref v, false)) => (")", v.to_string()),
            None => ("]", "inf".to_string()),
        };
        format!("{}{}, {}{}", open, low, high, close)
    }
}

// =============================================================================
// Index Key
// =============================================================================

/// A single key component, ordered with `Value::compare`.
#[derive(Debug, Clone)]
pub struct IndexKey(pub Value);

impl PartialEq for IndexKey {
    fn eq(&self, other: &Self) -> bool {
        self.0.compare(&other.0) == Ordering::Equal
    }
}

impl Eq for IndexKey {}

impl PartialOrd for IndexKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for IndexKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.0.compare(&other.0)
    }
}

// =============================================================================
// Document Index
// =============================================================================

/// Ids produced by an index scan.
#[derive(Debug, Clone, Default)]
pub struct IndexScan {
    pub ids: Vec<DocumentId>,
    pub keys_examined: usize,
}

/// Ordered index over one or more document fields.
#[derive(Debug, Clone)]
pub struct DocumentIndex {
    name: String,
    spec: IndexSpec,
    entries: BTreeMap<Vec<IndexKey>, BTreeSet<DocumentId>>,
    /// Set once an array value has been indexed. Array keys are stored
    /// whole, so such an index cannot answer element-wise predicates.
    multikey: bool,
}

impl DocumentIndex {
    /// Create a new, empty index.
    pub fn new(spec: IndexSpec) -> Self {
        Self {
            name: spec.index_name(),
            spec,
            entries: BTreeMap::new(),
            multikey: false,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn spec(&self) -> &IndexSpec {
        &self.spec
    }

    /// Field names in key order.
    pub fn fields(&self) -> impl Iterator<Item = &str> {
        self.spec.keys.iter().map(|k| k.field.as_str())
    }

    pub fn info(&self) -> IndexInfo {
        IndexInfo {
            name: self.name.clone(),
            key: self.spec.key_pattern(),
            unique: self.spec.unique,
            entries: self.entry_count(),
        }
    }

    /// Missing fields index as null.
    fn key_for(&self, doc: &Document) -> Vec<IndexKey> {
        self.spec
            .keys
            .iter()
            .map(|k| IndexKey(doc.field(&k.field).map(|v| v.into_owned()).unwrap_or_default()))
            .collect()
    }

    /// Fail if adding `doc` would break a unique constraint.
    pub fn check_unique(&self, doc: &Document) -> Result<()> {
        if !self.spec.unique {
            return Ok(());
        }
        let key = self.key_for(doc);
        match self.entries.get(&key) {
            Some(ids) if ids.iter().any(|id| id != &doc.id) => Err(LibrisError::UniqueViolation(
                format!("duplicate key for index {}", self.name),
            )),
            _ => Ok(()),
        }
    }

    /// Index a document.
    pub fn index_document(&mut self, doc: &Document) -> Result<()> {
        self.check_unique(doc)?;
        let key = self.key_for(doc);
        if key.iter().any(|k| k.0.is_array()) {
            self.multikey = true;
        }
        self.entries.entry(key).or_default().insert(doc.id.clone());
        Ok(())
    }

    /// Remove a document from the index.
    pub fn unindex_document(&mut self, doc: &Document) {
        let key = self.key_for(doc);
        if let Some(ids) = self.entries.get_mut(&key) {
            ids.remove(&doc.id);
            if ids.is_empty() {
                self.entries.remove(&key);
            }
        }
    }

    /// Scan keys whose leading fields equal `prefix`, optionally
    /// restricting the following field to `range`.
    pub fn scan(&self, prefix: &[Value], range: Option<&RangeBound>) -> IndexScan {
        let start: Vec<IndexKey> = prefix.iter().cloned().map(IndexKey).collect();
        let mut scan = IndexScan::default();

        for (key, ids) in self.entries.range((Bound::Included(start.clone()), Bound::Unbounded)) {
            if key.len() < start.len() || key[..start.len()] != start[..] {
                break;
            }
            scan.keys_examined += 1;

            let in_range = match (range, key.get(start.len())) {
                (Some(bound), Some(next)) => bound.contains(&next.0),
                (Some(_), None) => false,
                (None, _) => true,
            };
            if in_range {
                scan.ids.extend(ids.iter().cloned());
            }
        }

        scan
    }

    /// Find documents by exact value of the leading field.
    pub fn find_eq(&self, value: &Value) -> Vec<DocumentId> {
        self.scan(std::slice::from_ref(value), None).ids
    }

    /// Clear the index.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.multikey = false;
    }

    pub fn is_multikey(&self) -> bool {
        self.multikey
    }

    /// Get the number of distinct keys.
    pub fn key_count(&self) -> usize {
        self.entries.len()
    }

    /// Get the number of indexed documents.
    pub fn entry_count(&self) -> usize {
        self.entries.values().map(BTreeSet::len).sum()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn book(id: &str, author: &str, year: i64) -> Document {
        let mut doc = Document::with_id(id);
        doc.set("author", author);
        doc.set("published_year", year);
        doc
    }

    #[test]
    fn test_index_names() {
        assert_eq!(IndexSpec::ascending("title").index_name(), "title_1");

        let spec = IndexSpec::from_json(&json!({ "author": 1, "published_year": -1 })).unwrap();
        assert_eq!(spec.index_name(), "author_1_published_year_-1");
        assert_eq!(spec.key_pattern(), json!({ "author": 1, "published_year": -1 }));

        assert_eq!(IndexSpec::ascending("title").named("by_title").index_name(), "by_title");
    }

    #[test]
    fn test_spec_errors() {
        assert!(IndexSpec::from_json(&json!({})).is_err());
        assert!(IndexSpec::from_json(&json!({ "title": 2 })).is_err());
        assert!(IndexSpec::from_json(&json!("title")).is_err());
    }

    #[test]
    fn test_single_field_index() {
        let mut index = DocumentIndex::new(IndexSpec::ascending("author"));

        index.index_document(&book("a", "Paulo Coelho", 1988)).unwrap();
        index.index_document(&book("b", "Paulo Coelho", 2014)).unwrap();
        index.index_document(&book("c", "Sun Tzu", -500)).unwrap();

        assert_eq!(index.find_eq(&Value::from("Paulo Coelho")).len(), 2);
        assert_eq!(index.find_eq(&Value::from("Sun Tzu")).len(), 1);
        assert!(index.find_eq(&Value::from("Nobody")).is_empty());
        assert_eq!(index.key_count(), 2);
        assert_eq!(index.entry_count(), 3);
    }

    #[test]
    fn test_compound_prefix_and_range() {
        let spec = IndexSpec::ascending("author").key("published_year", SortDirection::Descending);
        let mut index = DocumentIndex::new(spec);

        index.index_document(&book("a", "Paulo Coelho", 1988)).unwrap();
        index.index_document(&book("b", "Paulo Coelho", 2014)).unwrap();
        index.index_document(&book("c", "Paulo Coelho", 2005)).unwrap();
        index.index_document(&book("d", "Sun Tzu", -500)).unwrap();

        let range = RangeBound::new().with_lower(Value::Int(2000), false);
        let scan = index.scan(&[Value::from("Paulo Coelho")], Some(&range));
        assert_eq!(scan.ids.len(), 2);
        assert_eq!(scan.keys_examined, 3);
    }

    #[test]
    fn test_unique_index() {
        let mut index = DocumentIndex::new(IndexSpec::ascending("author").unique());
        index.index_document(&book("a", "Sun Tzu", -500)).unwrap();

        let result = index.index_document(&book("b", "Sun Tzu", 2000));
        assert!(matches!(result, Err(LibrisError::UniqueViolation(_))));

        // Re-indexing the same document is fine.
        assert!(index.check_unique(&book("a", "Sun Tzu", -500)).is_ok());
    }

    #[test]
    fn test_range_bound() {
        let range = RangeBound::new()
            .with_lower(Value::Int(2000), true)
            .with_lower(Value::Int(2010), false)
            .with_upper(Value::Int(2020), true);

        assert!(!range.contains(&Value::Int(2010)));
        assert!(range.contains(&Value::Int(2011)));
        assert!(range.contains(&Value::Int(2020)));
        assert!(!range.contains(&Value::from("2015")));
        assert_eq!(range.describe(), "(2010, 2020]");
        assert_eq!(RangeBound::new().describe(), "[-inf, inf]");
    }

    #[test]
    fn test_unindex() {
        let mut index = DocumentIndex::new(IndexSpec::ascending("author"));
        let doc = book("a", "Mark Manson", 2016);

        index.index_document(&doc).unwrap();
        assert_eq!(index.find_eq(&Value::from("Mark Manson")).len(), 1);

        index.unindex_document(&doc);
        assert!(index.find_eq(&Value::from("Mark Manson")).is_empty());
        assert_eq!(index.key_count(), 0);
    }

    #[test]
    fn test_missing_field_indexes_as_null() {
        let mut index = DocumentIndex::new(IndexSpec::ascending("publisher"));
        index.index_document(&Document::with_id("bare")).unwrap();
        assert_eq!(index.find_eq(&Value::Null).len(), 1);
    }
}
