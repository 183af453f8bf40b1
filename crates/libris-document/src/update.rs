//! Libris Document Update
//!
//! Update operators (`$set`, `$unset`, `$inc`) and write results.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::types::{Document, Value};
use libris_common::{LibrisError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

// =============================================================================
// Update Operations
// =============================================================================

/// A single field modification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum UpdateOp {
    Set { field: String, value: Value },
    Unset { field: String },
    Inc { field: String, amount: Value },
}

/// An ordered list of field modifications applied to one document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpdateSpec {
    pub ops: Vec<UpdateOp>,
}

impl UpdateSpec {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Set {
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn unset(mut self, field: impl Into<String>) -> Self {
        self.ops.push(UpdateOp::Unset { field: field.into() });
        self
    }

    pub fn inc(mut self, field: impl Into<String>, amount: impl Into<Value>) -> Self {
        self.ops.push(UpdateOp::Inc {
            field: field.into(),
            amount: amount.into(),
        });
        self
    }

    /// Parse `{"$set": {"price": 19.99}}`.
    ///
    /// Whole-document replacement is not supported; every top-level key
    /// must be an operator.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let obj = json
            .as_object()
            .ok_or_else(|| LibrisError::Parse(format!("update must be an object, got {}", json)))?;
        if obj.is_empty() {
            return Err(LibrisError::Parse("update document is empty".to_string()));
        }

        let mut spec = Self::new();
        for (op, fields) in obj {
            let fields = fields.as_object().ok_or_else(|| {
                LibrisError::Parse(format!("{} requires an object of fields", op))
            })?;

            for (field, operand) in fields {
                check_field(field)?;
                let update_op = match op.as_str() {
                    "$set" => UpdateOp::Set {
                        field: field.clone(),
                        value: Value::from_json(operand.clone()),
                    },
                    "$unset" => UpdateOp::Unset { field: field.clone() },
                    "$inc" => {
                        let amount = Value::from_json(operand.clone());
                        if !amount.is_number() {
                            return Err(LibrisError::Parse(format!(
                                "$inc amount for '{}' must be numeric",
                                field
                            )));
                        }
                        UpdateOp::Inc {
                            field: field.clone(),
                            amount,
                        }
                    }
                    other if other.starts_with('$') => {
                        return Err(LibrisError::Parse(format!("unknown update operator: {}", other)));
                    }
                    other => {
                        return Err(LibrisError::Parse(format!(
                            "replacement updates are not supported (found field '{}')",
                            other
                        )));
                    }
                };
                spec.ops.push(update_op);
            }
        }

        Ok(spec)
    }

    /// Apply every operation; returns whether the document changed.
    pub fn apply(&self, doc: &mut Document) -> Result<bool> {
        let mut modified = false;

        for op in &self.ops {
            match op {
                UpdateOp::Set { field, value } => {
                    if doc.get(field) != Some(value) {
                        set_path(&mut doc.data, field, value.clone())?;
                        modified = true;
                    }
                }
                UpdateOp::Unset { field } => {
                    if remove_path(&mut doc.data, field).is_some() {
                        modified = true;
                    }
                }
                UpdateOp::Inc { field, amount } => {
                    let next = match doc.get(field) {
                        None | Some(Value::Null) => amount.clone(),
                        Some(current) => add_numbers(current, amount).ok_or_else(|| {
                            LibrisError::TypeError(format!(
                                "cannot apply $inc to '{}' of type {}",
                                field,
                                current.type_name()
                            ))
                        })??,
                    };
                    if doc.get(field) != Some(&next) {
                        set_path(&mut doc.data, field, next)?;
                        modified = true;
                    }
                }
            }
        }

        Ok(modified)
    }
}

fn check_field(field: &str) -> Result<()> {
    if field == "_id" || field.starts_with("_id.") {
        return Err(LibrisError::Parse("the _id field is immutable".to_string()));
    }
    if field.is_empty() || field.split('.').any(str::is_empty) {
        return Err(LibrisError::Parse(format!("invalid field path: '{}'", field)));
    }
    Ok(())
}

/// Sum two numbers; `None` when either side is not numeric.
fn add_numbers(current: &Value, amount: &Value) -> Option<Result<Value>> {
    match (current, amount) {
        (Value::Int(a), Value::Int(b)) => Some(
            a.checked_add(*b)
                .map(Value::Int)
                .ok_or_else(|| LibrisError::Execution("integer overflow in $inc".to_string())),
        ),
        (a, b) if a.is_number() && b.is_number() => {
            Some(Ok(Value::Float(a.as_f64()? + b.as_f64()?)))
        }
        _ => None,
    }
}

pub(crate) fn set_path(data: &mut HashMap<String, Value>, path: &str, value: Value) -> Result<()> {
    match path.split_once('.') {
        None => {
            data.insert(path.to_string(), value);
            Ok(())
        }
        Some((head, rest)) => {
            let child = data
                .entry(head.to_string())
                .or_insert_with(|| Value::Object(HashMap::new()));
            match child {
                Value::Object(inner) => set_path(inner, rest, value),
                other => Err(LibrisError::TypeError(format!(
                    "cannot create field '{}' inside {} '{}'",
                    rest,
                    other.type_name(),
                    head
                ))),
            }
        }
    }
}

fn remove_path(data: &mut HashMap<String, Value>, path: &str) -> Option<Value> {
    match path.split_once('.') {
        None => data.remove(path),
        Some((head, rest)) => match data.get_mut(head) {
            Some(Value::Object(inner)) => remove_path(inner, rest),
            _ => None,
        },
    }
}

// =============================================================================
// Write Results
// =============================================================================

/// Outcome of an update; zero matches is not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateResult {
    pub matched_count: u64,
    pub modified_count: u64,
}

/// Outcome of a delete; zero matches is not an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeleteResult {
    pub deleted_count: u64,
}

// =============================================================================
// Tests
// =============================================================================
