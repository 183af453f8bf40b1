//! Libris Document Types
//!
//! Core data types for document storage.
//!
//! @version 0.1.0
//! @author Libris Development Team

use libris_common::{LibrisError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;

// =============================================================================
// Document ID
// =============================================================================

/// Unique identifier for a document.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DocumentId(pub String);

impl DocumentId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<String> for DocumentId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DocumentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

// =============================================================================
// Value
// =============================================================================

/// A document value that can be any JSON-compatible type.
///
/// Integers and floats are kept apart so integral fields survive arithmetic
/// without turning into floats.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    pub fn is_bool(&self) -> bool {
        matches!(self, Self::Bool(_))
    }

    pub fn is_number(&self) -> bool {
        matches!(self, Self::Int(_) | Self::Float(_))
    }

    pub fn is_string(&self) -> bool {
        matches!(self, Self::String(_))
    }

    pub fn is_array(&self) -> bool {
        matches!(self, Self::Array(_))
    }

    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Float(f) => Some(*f as i64),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Float(f) => Some(*f),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_array(&self) -> Option<&Vec<Value>> {
        match self {
            Self::Array(arr) => Some(arr),
            _ => None,
        }
    }

    pub fn as_object(&self) -> Option<&HashMap<String, Value>> {
        match self {
            Self::Object(obj) => Some(obj),
            _ => None,
        }
    }

    /// Name of the value's type, as used in error messages.
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::Int(_) => "int",
            Self::Float(_) => "float",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Object(_) => "object",
        }
    }

    /// Get a value at a path (e.g., "user.address.city").
    pub fn get_path(&self, path: &str) -> Option<&Value> {
        let parts: Vec<&str> = path.split('.').collect();
        self.get_path_parts(&parts)
    }

    fn get_path_parts(&self, parts: &[&str]) -> Option<&Value> {
        if parts.is_empty() {
            return Some(self);
        }

        let key = parts[0];
        let rest = &parts[1..];

        match self {
            Self::Object(obj) => obj.get(key).and_then(|v| v.get_path_parts(rest)),
            Self::Array(arr) => key
                .parse::<usize>()
                .ok()
                .and_then(|idx| arr.get(idx))
                .and_then(|v| v.get_path_parts(rest)),
            _ => None,
        }
    }

    /// Total ordering across all values.
    ///
    /// Types order as null < numbers < strings < objects < arrays < booleans.
    /// Ints and floats compare numerically with each other.
    pub fn compare(&self, other: &Value) -> Ordering {
        match (self, other) {
            (Self::Int(a), Self::Int(b)) => a.cmp(b),
            (Self::Int(_) | Self::Float(_), Self::Int(_) | Self::Float(_)) => {
                let a = self.as_f64().unwrap_or_default();
                let b = other.as_f64().unwrap_or_default();
                a.total_cmp(&b)
            }
            (Self::String(a), Self::String(b)) => a.cmp(b),
            (Self::Bool(a), Self::Bool(b)) => a.cmp(b),
            (Self::Array(a), Self::Array(b)) => {
                for (x, y) in a.iter().zip(b.iter()) {
                    let ord = x.compare(y);
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            (Self::Object(a), Self::Object(b)) => {
                let mut a: Vec<_> = a.iter().collect();
                let mut b: Vec<_> = b.iter().collect();
                a.sort_by(|x, y| x.0.cmp(y.0));
                b.sort_by(|x, y| x.0.cmp(y.0));
                for ((ka, va), (kb, vb)) in a.iter().zip(b.iter()) {
                    let ord = ka.cmp(kb).then_with(|| va.compare(vb));
                    if ord != Ordering::Equal {
                        return ord;
                    }
                }
                a.len().cmp(&b.len())
            }
            _ => self.type_rank().cmp(&other.type_rank()),
        }
    }

    /// Equality that treats `Int(20)` and `Float(20.0)` as the same value.
    pub fn loose_eq(&self, other: &Value) -> bool {
        self.compare(other) == Ordering::Equal
    }

    pub(crate) fn type_rank(&self) -> u8 {
        match self {
            Self::Null => 0,
            Self::Int(_) | Self::Float(_) => 1,
            Self::String(_) => 2,
            Self::Object(_) => 3,
            Self::Array(_) => 4,
            Self::Bool(_) => 5,
        }
    }

    /// Convert from serde_json::Value.
    pub fn from_json(json: JsonValue) -> Self {
        match json {
            JsonValue::Null => Self::Null,
            JsonValue::Bool(b) => Self::Bool(b),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Self::Int(i)
                } else if let Some(f) = n.as_f64() {
                    Self::Float(f)
                } else {
                    Self::Float(0.0)
                }
            }
            JsonValue::String(s) => Self::String(s),
            JsonValue::Array(arr) => Self::Array(arr.into_iter().map(Self::from_json).collect()),
            JsonValue::Object(obj) => {
                Self::Object(obj.into_iter().map(|(k, v)| (k, Self::from_json(v))).collect())
            }
        }
    }

    /// Convert to serde_json::Value.
    pub fn to_json(&self) -> JsonValue {
        match self {
            Self::Null => JsonValue::Null,
            Self::Bool(b) => JsonValue::Bool(*b),
            Self::Int(n) => JsonValue::Number((*n).into()),
            Self::Float(f) => serde_json::Number::from_f64(*f)
                .map(JsonValue::Number)
                .unwrap_or(JsonValue::Null),
            Self::String(s) => JsonValue::String(s.clone()),
            Self::Array(arr) => JsonValue::Array(arr.iter().map(|v| v.to_json()).collect()),
            Self::Object(obj) => {
                let mut entries: Vec<_> = obj.iter().collect();
                entries.sort_by(|a, b| a.0.cmp(b.0));
                JsonValue::Object(
                    entries
                        .into_iter()
                        .map(|(k, v)| (k.clone(), v.to_json()))
                        .collect(),
                )
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_json())
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<u32> for Value {
    fn from(n: u32) -> Self {
        Self::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Self::Float(f)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_string())
    }
}

impl From<Vec<Value>> for Value {
    fn from(arr: Vec<Value>) -> Self {
        Self::Array(arr)
    }
}

impl From<HashMap<String, Value>> for Value {
    fn from(obj: HashMap<String, Value>) -> Self {
        Self::Object(obj)
    }
}

// =============================================================================
// Document
// =============================================================================

/// A document in the document store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    #[serde(rename = "_id")]
    pub id: DocumentId,
    #[serde(flatten)]
    pub data: HashMap<String, Value>,
}

impl Document {
    /// Create a new document with an auto-generated ID.
    pub fn new() -> Self {
        Self {
            id: DocumentId::generate(),
            data: HashMap::new(),
        }
    }

    /// Create a document with a specific ID.
    pub fn with_id(id: impl Into<DocumentId>) -> Self {
        Self {
            id: id.into(),
            data: HashMap::new(),
        }
    }

    /// Create a document from a JSON object.
    ///
    /// A string `_id` is kept; any other `_id` is rendered to text. Without
    /// one, an id is generated.
    pub fn from_json(json: JsonValue) -> Result<Self> {
        let mut obj = match json {
            JsonValue::Object(obj) => obj,
            other => {
                return Err(LibrisError::TypeError(format!(
                    "document must be a JSON object, got {}",
                    other
                )))
            }
        };

        let id = match obj.remove("_id") {
            Some(JsonValue::String(s)) => DocumentId::new(s),
            Some(JsonValue::Null) | None => DocumentId::generate(),
            Some(other) => DocumentId::new(other.to_string()),
        };

        let data = obj
            .into_iter()
            .map(|(k, v)| (k, Value::from_json(v)))
            .collect();

        Ok(Self { id, data })
    }

    /// Convert to JSON, including `_id`.
    pub fn to_json(&self) -> JsonValue {
        let mut obj = serde_json::Map::new();
        obj.insert("_id".to_string(), JsonValue::String(self.id.0.clone()));

        let mut fields: Vec<_> = self.data.iter().collect();
        fields.sort_by(|a, b| a.0.cmp(b.0));
        for (k, v) in fields {
            obj.insert(k.clone(), v.to_json());
        }
        JsonValue::Object(obj)
    }

    /// Convert to an object value, including `_id`.
    pub fn to_value(&self) -> Value {
        let mut obj = self.data.clone();
        obj.insert("_id".to_string(), Value::String(self.id.0.clone()));
        Value::Object(obj)
    }

    /// Get a field value; dotted keys descend into nested objects.
    pub fn get(&self, key: &str) -> Option<&Value> {
        if key.contains('.') {
            let (head, rest) = key.split_once('.')?;
            self.data.get(head).and_then(|v| v.get_path(rest))
        } else {
            self.data.get(key)
        }
    }

    /// Get a field value as an owned value, resolving `_id` too.
    pub fn get_owned(&self, key: &str) -> Option<Value> {
        if key == "_id" {
            return Some(Value::String(self.id.0.clone()));
        }
        self.get(key).cloned()
    }

    /// Set a field value.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.data.insert(key.into(), value.into());
    }

    /// Remove a field.
    pub fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    /// Check if a field exists.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Get all field names.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.data.keys()
    }

    /// Get the number of fields.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Check if the document is empty.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Approximate encoded size, used for the engine's document size limit.
    pub fn encoded_size(&self) -> usize {
        self.to_json().to_string().len()
    }
}

impl Default for Document {
    fn default() -> Self {
        Self::new()
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_id() {
        let id1 = DocumentId::generate();
        let id2 = DocumentId::generate();
        assert_ne!(id1, id2);
        assert_eq!(id1.as_str().len(), 32);

        let id3 = DocumentId::new("custom-id");
        assert_eq!(id3.as_str(), "custom-id");
    }

    #[test]
    fn test_value_types() {
        assert!(Value::Null.is_null());

        let boolean = Value::Bool(true);
        assert!(boolean.is_bool());
        assert_eq!(boolean.as_bool(), Some(true));

        let number = Value::Int(-500);
        assert!(number.is_number());
        assert_eq!(number.as_i64(), Some(-500));
        assert_eq!(number.type_name(), "int");

        let string = Value::String("Harper".to_string());
        assert!(string.is_string());
        assert_eq!(string.as_str(), Some("Harper"));
    }

    #[test]
    fn test_value_path() {
        let mut inner = HashMap::new();
        inner.insert("city".to_string(), Value::String("London".to_string()));

        let mut outer = HashMap::new();
        outer.insert("address".to_string(), Value::Object(inner));

        let value = Value::Object(outer);

        assert_eq!(
            value.get_path("address.city").and_then(|v| v.as_str()),
            Some("London")
        );
        assert!(value.get_path("address.zip").is_none());
    }

    #[test]
    fn test_compare_numbers_across_types() {
        assert_eq!(Value::Int(20).compare(&Value::Float(20.0)), Ordering::Equal);
        assert_eq!(Value::Float(19.99).compare(&Value::Int(20)), Ordering::Less);
        assert!(Value::Int(20).loose_eq(&Value::Float(20.0)));
        assert_ne!(Value::Int(20), Value::Float(20.0));
    }

    #[test]
    fn test_compare_type_ranks() {
        assert_eq!(Value::Null.compare(&Value::Int(0)), Ordering::Less);
        assert_eq!(Value::Int(9999).compare(&Value::from("a")), Ordering::Less);
        assert_eq!(Value::from("z").compare(&Value::Bool(false)), Ordering::Less);
        assert_eq!(
            Value::Array(vec![Value::Int(1)]).compare(&Value::Array(vec![Value::Int(1), Value::Int(0)])),
            Ordering::Less
        );
    }

    #[test]
    fn test_document() {
        let mut doc = Document::new();
        doc.set("title", "Untamed");
        doc.set("pages", 352i64);

        assert_eq!(doc.get("title").and_then(|v| v.as_str()), Some("Untamed"));
        assert_eq!(doc.get("pages").and_then(|v| v.as_i64()), Some(352));

        assert!(doc.contains("title"));
        assert!(!doc.contains("isbn"));

        assert_eq!(doc.remove("pages"), Some(Value::Int(352)));
        assert_eq!(doc.len(), 1);
    }

    #[test]
    fn test_document_from_json() {
        let json = serde_json::json!({
            "_id": "doc123",
            "title": "The Art of War",
            "published_year": -500,
            "in_stock": true
        });

        let doc = Document::from_json(json).unwrap();
        assert_eq!(doc.id.as_str(), "doc123");
        assert_eq!(doc.get("title").and_then(|v| v.as_str()), Some("The Art of War"));
        assert_eq!(doc.get("published_year"), Some(&Value::Int(-500)));
        assert!(!doc.contains("_id"));
        assert_eq!(doc.get_owned("_id"), Some(Value::from("doc123")));
    }

    #[test]
    fn test_document_from_non_object() {
        let result = Document::from_json(serde_json::json!([1, 2, 3]));
        assert!(matches!(result, Err(LibrisError::TypeError(_))));
    }

    #[test]
    fn test_json_conversion() {
        let mut doc = Document::with_id("test-doc");
        doc.set("pages", 96i64);
        doc.set("price", 11.95f64);

        let json = doc.to_json();
        assert_eq!(json["_id"], "test-doc");
        assert_eq!(json["pages"], 96);
        assert_eq!(json["price"], 11.95);
    }
}
