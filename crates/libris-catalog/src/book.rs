//! Libris Catalog Book
//!
//! The typed book record and its mapping to store documents.
//!
//! @version 0.1.0
//! @author Libris Development Team

use libris_common::{LibrisError, Result};
use libris_document::{Document, FieldSchema, Schema, Value};
use serde::{Deserialize, Serialize};

// =============================================================================
// Book
// =============================================================================

/// One catalog record. Every field is required.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Book {
    pub title: String,
    pub author: String,
    /// Free text; may hold several slash-separated labels.
    pub genre: String,
    /// Negative for dates before the common era.
    pub published_year: i64,
    pub price: f64,
    pub in_stock: bool,
    pub pages: i64,
    pub publisher: String,
}

impl Book {
    /// Document form of the book, with a generated id.
    pub fn to_document(&self) -> Document {
        let mut doc = Document::new();
        doc.set("title", self.title.as_str());
        doc.set("author", self.author.as_str());
        doc.set("genre", self.genre.as_str());
        doc.set("published_year", self.published_year);
        doc.set("price", self.price);
        doc.set("in_stock", self.in_stock);
        doc.set("pages", self.pages);
        doc.set("publisher", self.publisher.as_str());
        doc
    }

    /// Read a book back from a stored document or query result.
    ///
    /// `_id` and any other extra field are ignored; a missing or mistyped
    /// book field is a type error.
    pub fn from_value(value: &Value) -> Result<Self> {
        if !value.is_object() {
            return Err(LibrisError::TypeError(format!(
                "book must be an object, got {}",
                value.type_name()
            )));
        }
        Ok(Self {
            title: string_field(value, "title")?,
            author: string_field(value, "author")?,
            genre: string_field(value, "genre")?,
            published_year: int_field(value, "published_year")?,
            price: number_field(value, "price")?,
            in_stock: bool_field(value, "in_stock")?,
            pages: int_field(value, "pages")?,
            publisher: string_field(value, "publisher")?,
        })
    }
}

impl TryFrom<&Value> for Book {
    type Error = LibrisError;

    fn try_from(value: &Value) -> Result<Self> {
        Self::from_value(value)
    }
}

impl TryFrom<&Document> for Book {
    type Error = LibrisError;

    fn try_from(doc: &Document) -> Result<Self> {
        Self::from_value(&doc.to_value())
    }
}

/// Projection returned by the paginated in-stock query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookSummary {
    pub title: String,
    pub author: String,
    pub price: f64,
}

impl BookSummary {
    pub fn from_value(value: &Value) -> Result<Self> {
        Ok(Self {
            title: string_field(value, "title")?,
            author: string_field(value, "author")?,
            price: number_field(value, "price")?,
        })
    }
}

/// Schema of the books collection: exactly the eight book fields.
pub fn book_schema() -> Schema {
    Schema::new("book")
        .required_field("title", FieldSchema::string().min_length(1))
        .required_field("author", FieldSchema::string())
        .required_field("genre", FieldSchema::string())
        .required_field("published_year", FieldSchema::int())
        .required_field("price", FieldSchema::number().min(0.0))
        .required_field("in_stock", FieldSchema::bool())
        .required_field("pages", FieldSchema::int().min(1.0))
        .required_field("publisher", FieldSchema::string())
        .additional_properties(false)
}

// =============================================================================
// Field Access
// =============================================================================

fn field<'a>(value: &'a Value, name: &str) -> Result<&'a Value> {
    value
        .get_path(name)
        .ok_or_else(|| LibrisError::TypeError(format!("missing field '{}'", name)))
}

fn mistyped(name: &str, expected: &str, found: &Value) -> LibrisError {
    LibrisError::TypeError(format!(
        "field '{}' should be {}, found {}",
        name,
        expected,
        found.type_name()
    ))
}

pub(crate) fn string_field(value: &Value, name: &str) -> Result<String> {
    let found = field(value, name)?;
    found
        .as_str()
        .map(String::from)
        .ok_or_else(|| mistyped(name, "a string", found))
}

pub(crate) fn int_field(value: &Value, name: &str) -> Result<i64> {
    match field(value, name)? {
        Value::Int(n) => Ok(*n),
        other => Err(mistyped(name, "an integer", other)),
    }
}

pub(crate) fn number_field(value: &Value, name: &str) -> Result<f64> {
    let found = field(value, name)?;
    found.as_f64().ok_or_else(|| mistyped(name, "a number", found))
}

fn bool_field(value: &Value, name: &str) -> Result<bool> {
    let found = field(value, name)?;
    found.as_bool().ok_or_else(|| mistyped(name, "a boolean", found))
}

// =============================================================================
// Tests
// =============================================================================
