//! Libris Document Validation
//!
//! Per-collection schemas checked on insert and after every update.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::types::{Document, Value};
use libris_common::{LibrisError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// =============================================================================
// Schema
// =============================================================================

/// Shape every document of a collection must have.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schema {
    pub name: String,
    /// Keyed in name order so violations are reported deterministically.
    pub fields: BTreeMap<String, FieldSchema>,
    pub required: Vec<String>,
    pub additional_properties: bool,
}

impl Schema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            fields: BTreeMap::new(),
            required: Vec::new(),
            additional_properties: true,
        }
    }

    pub fn field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        self.fields.insert(name.into(), schema);
        self
    }

    /// Declare a field and mark it required in one step.
    pub fn required_field(mut self, name: impl Into<String>, schema: FieldSchema) -> Self {
        let name = name.into();
        self.fields.insert(name.clone(), schema);
        self.required.push(name);
        self
    }

    pub fn additional_properties(mut self, allow: bool) -> Self {
        self.additional_properties = allow;
        self
    }

    /// Collect every violation in `doc`.
    pub fn validate(&self, doc: &Document) -> ValidationResult {
        let mut errors = Vec::new();

        for required in &self.required {
            if !doc.contains(required) {
                errors.push(format!("missing required field '{}'", required));
            }
        }

        for (name, field_schema) in &self.fields {
            if let Some(value) = doc.get(name) {
                if let Err(err) = field_schema.validate(value) {
                    errors.push(format!("field '{}': {}", name, err));
                }
            }
        }

        if !self.additional_properties {
            let mut unknown: Vec<&String> = doc.keys().filter(|k| !self.fields.contains_key(*k)).collect();
            unknown.sort();
            for key in unknown {
                errors.push(format!("unknown field '{}'", key));
            }
        }

        ValidationResult::from_errors(errors)
    }

    /// Validate and turn violations into an error.
    pub fn check(&self, doc: &Document) -> Result<()> {
        self.validate(doc).into_result()
    }
}

// =============================================================================
// Field Schema
// =============================================================================

/// Constraints on a single field.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldSchema {
    pub field_type: FieldType,
    pub nullable: bool,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub min_length: Option<usize>,
    pub max_length: Option<usize>,
    pub pattern: Option<String>,
    pub enum_values: Option<Vec<Value>>,
    pub items: Option<Box<FieldSchema>>,
}

impl FieldSchema {
    pub fn new(field_type: FieldType) -> Self {
        Self {
            field_type,
            nullable: false,
            min: None,
            max: None,
            min_length: None,
            max_length: None,
            pattern: None,
            enum_values: None,
            items: None,
        }
    }

    pub fn string() -> Self {
        Self::new(FieldType::String)
    }

    pub fn int() -> Self {
        Self::new(FieldType::Int)
    }

    /// Int or float.
    pub fn number() -> Self {
        Self::new(FieldType::Number)
    }

    pub fn bool() -> Self {
        Self::new(FieldType::Bool)
    }

    pub fn array(items: FieldSchema) -> Self {
        let mut schema = Self::new(FieldType::Array);
        schema.items = Some(Box::new(items));
        schema
    }

    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    pub fn min(mut self, min: f64) -> Self {
        self.min = Some(min);
        self
    }

    pub fn max(mut self, max: f64) -> Self {
        self.max = Some(max);
        self
    }

    pub fn min_length(mut self, len: usize) -> Self {
        self.min_length = Some(len);
        self
    }

    pub fn max_length(mut self, len: usize) -> Self {
        self.max_length = Some(len);
        self
    }

    pub fn pattern(mut self, pattern: impl Into<String>) -> Self {
        self.pattern = Some(pattern.into());
        self
    }

    pub fn enum_values(mut self, values: Vec<Value>) -> Self {
        self.enum_values = Some(values);
        self
    }

    /// Check one value; the error text names the first violated constraint.
    pub fn validate(&self, value: &Value) -> std::result::Result<(), String> {
        if value.is_null() {
            return if self.nullable {
                Ok(())
            } else {
                Err("value cannot be null".to_string())
            };
        }

        if !self.field_type.matches(value) {
            return Err(format!(
                "expected {}, got {}",
                self.field_type.name(),
                value.type_name()
            ));
        }

        if let Some(ref allowed) = self.enum_values {
            if !allowed.iter().any(|v| v.loose_eq(value)) {
                return Err(format!("{} is not an allowed value", value));
            }
        }

        if let Some(n) = value.as_f64() {
            if let Some(min) = self.min.filter(|min| n < *min) {
                return Err(format!("{} is less than minimum {}", value, min));
            }
            if let Some(max) = self.max.filter(|max| n > *max) {
                return Err(format!("{} is greater than maximum {}", value, max));
            }
        }

        let length = match value {
            Value::String(s) => Some(s.chars().count()),
            Value::Array(items) => Some(items.len()),
            _ => None,
        };
        if let Some(len) = length {
            if let Some(min_len) = self.min_length.filter(|min_len| len < *min_len) {
                return Err(format!("length {} is less than minimum {}", len, min_len));
            }
            if let Some(max_len) = self.max_length.filter(|max_len| len > *max_len) {
                return Err(format!("length {} is greater than maximum {}", len, max_len));
            }
        }

        if let (Some(pattern), Value::String(s)) = (&self.pattern, value) {
            let re = regex::RegexBuilder::new(pattern)
                .size_limit(1024 * 1024)
                .build()
                .map_err(|e| format!("invalid pattern: {}", e))?;
            if !re.is_match(s) {
                return Err(format!("'{}' does not match pattern {}", s, pattern));
            }
        }

        if let (Some(item_schema), Value::Array(items)) = (&self.items, value) {
            for (i, item) in items.iter().enumerate() {
                item_schema
                    .validate(item)
                    .map_err(|e| format!("item {}: {}", i, e))?;
            }
        }

        Ok(())
    }
}

// =============================================================================
// Field Type
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FieldType {
    String,
    Int,
    Float,
    Number,
    Bool,
    Array,
    Object,
    Any,
}

impl FieldType {
    fn matches(&self, value: &Value) -> bool {
        matches!(
            (self, value),
            (Self::Any, _)
                | (Self::String, Value::String(_))
                | (Self::Int, Value::Int(_))
                | (Self::Float, Value::Float(_))
                | (Self::Number, Value::Int(_) | Value::Float(_))
                | (Self::Bool, Value::Bool(_))
                | (Self::Array, Value::Array(_))
                | (Self::Object, Value::Object(_))
        )
    }

    fn name(&self) -> &'static str {
        match self {
            Self::String => "string",
            Self::Int => "int",
            Self::Float => "float",
            Self::Number => "number",
            Self::Bool => "bool",
            Self::Array => "array",
            Self::Object => "object",
            Self::Any => "any",
        }
    }
}

// =============================================================================
// Validation Result
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidationResult {
    pub is_valid: bool,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn valid() -> Self {
        Self {
            is_valid: true,
            errors: Vec::new(),
        }
    }

    fn from_errors(errors: Vec<String>) -> Self {
        Self {
            is_valid: errors.is_empty(),
            errors,
        }
    }

    pub fn into_result(self) -> Result<()> {
        if self.is_valid {
            Ok(())
        } else {
            Err(LibrisError::ValidationFailed(self.errors))
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn book_schema() -> Schema {
        Schema::new("book")
            .required_field("title", FieldSchema::string().min_length(1))
            .required_field("published_year", FieldSchema::int())
            .required_field("price", FieldSchema::number().min(0.0))
            .field("tags", FieldSchema::array(FieldSchema::string()).max_length(3))
            .additional_properties(false)
    }

    fn book() -> Document {
        let mut doc = Document::with_id("b1");
        doc.set("title", "The Art of War");
        doc.set("published_year", -500i64);
        doc.set("price", 7.99f64);
        doc
    }

    #[test]
    fn test_valid_document() {
        assert!(book_schema().validate(&book()).is_valid);
        assert!(book_schema().check(&book()).is_ok());
    }

    #[test]
    fn test_missing_and_mistyped() {
        let mut doc = book();
        doc.remove("title");
        doc.set("published_year", "ancient");

        let result = book_schema().validate(&doc);
        assert!(!result.is_valid);
        assert_eq!(result.errors.len(), 2);
        assert!(result.errors[0].contains("title"));
        assert!(result.errors[1].contains("expected int, got string"));
    }

    #[test]
    fn test_unknown_field_rejected() {
        let mut doc = book();
        doc.set("isbn", "978-0");

        let err = book_schema().check(&doc).unwrap_err();
        match err {
            LibrisError::ValidationFailed(errors) => assert_eq!(errors, vec!["unknown field 'isbn'"]),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_number_accepts_int_and_float() {
        let schema = FieldSchema::number().min(0.0);
        assert!(schema.validate(&Value::Int(12)).is_ok());
        assert!(schema.validate(&Value::Float(12.5)).is_ok());
        assert!(schema.validate(&Value::Float(-0.5)).is_err());
    }

    #[test]
    fn test_nullable() {
        assert!(FieldSchema::string().validate(&Value::Null).is_err());
        assert!(FieldSchema::string().nullable().validate(&Value::Null).is_ok());
    }

    #[test]
    fn test_pattern_enum_and_items() {
        let schema = FieldSchema::string().pattern(r"^\d{4}$");
        assert!(schema.validate(&Value::from("2011")).is_ok());
        assert!(schema.validate(&Value::from("MMXI")).is_err());

        let schema = FieldSchema::string().enum_values(vec![Value::from("Fiction"), Value::from("Memoir")]);
        assert!(schema.validate(&Value::from("Memoir")).is_ok());
        assert!(schema.validate(&Value::from("Poetry")).is_err());

        let mut doc = book();
        doc.set("tags", Value::Array(vec![Value::from("war"), Value::Int(1)]));
        let result = book_schema().validate(&doc);
        assert!(result.errors.iter().any(|e| e.contains("item 1")));
    }
}
