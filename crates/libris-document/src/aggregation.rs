//! Libris Document Aggregation
//!
//! Aggregation pipelines: an ordered list of stages, each transforming the
//! stream of documents produced by the previous one.
//!
//! @version 0.1.0
//! @author Libris Development Team

use crate::index::IndexKey;
use crate::query::{FieldSource, Projection, Query, SortSpec};
use crate::types::Value;
use crate::update::set_path;
use libris_common::{LibrisError, Result};
use serde_json::Value as JsonValue;
use std::collections::{BTreeMap, HashMap};

// =============================================================================
// Expression
// =============================================================================

/// A value computed from the current document.
#[derive(Debug, Clone, PartialEq)]
pub enum Expression {
    /// `"$field.path"`
    Field(String),
    Literal(Value),
    /// `{"a": <expr>, "b": <expr>}`, used for compound group keys.
    Object(Vec<(String, Expression)>),
    Arithmetic(ArithmeticOp, Vec<Expression>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArithmeticOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Mod,
}

impl ArithmeticOp {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "$add" => Some(Self::Add),
            "$subtract" => Some(Self::Subtract),
            "$multiply" => Some(Self::Multiply),
            "$divide" => Some(Self::Divide),
            "$mod" => Some(Self::Mod),
            _ => None,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::Add => "$add",
            Self::Subtract => "$subtract",
            Self::Multiply => "$multiply",
            Self::Divide => "$divide",
            Self::Mod => "$mod",
        }
    }

    /// `$add` and `$multiply` take any number of operands, the rest exactly two.
    fn is_variadic(&self) -> bool {
        matches!(self, Self::Add | Self::Multiply)
    }
}

impl Expression {
    pub fn field(path: impl Into<String>) -> Self {
        Self::Field(path.into())
    }

    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    pub fn from_json(json: &JsonValue) -> Result<Self> {
        match json {
            JsonValue::String(s) if s.starts_with('$') => {
                let path = &s[1..];
                if path.is_empty() || path.starts_with('$') {
                    return Err(LibrisError::Parse(format!("invalid field path: '{}'", s)));
                }
                Ok(Self::Field(path.to_string()))
            }
            JsonValue::Object(obj) => match obj.iter().next() {
                Some((key, operand)) if key.starts_with('$') => {
                    if obj.len() != 1 {
                        return Err(LibrisError::Parse(format!(
                            "expression operator {} must be the only key",
                            key
                        )));
                    }
                    if key == "$literal" {
                        return Ok(Self::Literal(Value::from_json(operand.clone())));
                    }
                    let op = ArithmeticOp::from_name(key)
                        .ok_or_else(|| LibrisError::Parse(format!("unknown expression operator: {}", key)))?;
                    Self::parse_arithmetic(op, operand)
                }
                _ => {
                    let mut fields = Vec::with_capacity(obj.len());
                    for (name, value) in obj {
                        if name.starts_with('$') {
                            return Err(LibrisError::Parse(format!(
                                "operator {} cannot be mixed with field names",
                                name
                            )));
                        }
                        fields.push((name.clone(), Self::from_json(value)?));
                    }
                    Ok(Self::Object(fields))
                }
            },
            other => Ok(Self::Literal(Value::from_json(other.clone()))),
        }
    }

    fn parse_arithmetic(op: ArithmeticOp, operand: &JsonValue) -> Result<Self> {
        let args = operand
            .as_array()
            .ok_or_else(|| LibrisError::Parse(format!("{} requires an array of operands", op.name())))?;

        let arity_ok = if op.is_variadic() {
            !args.is_empty()
        } else {
            args.len() == 2
        };
        if !arity_ok {
            return Err(LibrisError::Parse(format!(
                "{} got {} operands",
                op.name(),
                args.len()
            )));
        }

        let args = args.iter().map(Self::from_json).collect::<Result<Vec<_>>>()?;
        Ok(Self::Arithmetic(op, args))
    }

    /// Evaluate against a document; a missing field evaluates to null.
    pub fn evaluate<S: FieldSource + ?Sized>(&self, doc: &S) -> Result<Value> {
        match self {
            Self::Field(path) => Ok(doc.field(path).map(|v| v.into_owned()).unwrap_or_default()),
            Self::Literal(value) => Ok(value.clone()),
            Self::Object(fields) => {
                let mut obj = HashMap::with_capacity(fields.len());
                for (name, expr) in fields {
                    obj.insert(name.clone(), expr.evaluate(doc)?);
                }
                Ok(Value::Object(obj))
            }
            Self::Arithmetic(op, args) => {
                let values = args
                    .iter()
                    .map(|arg| arg.evaluate(doc))
                    .collect::<Result<Vec<_>>>()?;
                arithmetic(*op, &values)
            }
        }
    }
}

fn arithmetic(op: ArithmeticOp, values: &[Value]) -> Result<Value> {
    if values.iter().any(Value::is_null) {
        return Ok(Value::Null);
    }
    if let Some(bad) = values.iter().find(|v| !v.is_number()) {
        return Err(LibrisError::TypeError(format!(
            "{} only supports numeric types, not {}",
            op.name(),
            bad.type_name()
        )));
    }

    let mut iter = values.iter();
    let Some(first) = iter.next() else {
        return Ok(Value::Null);
    };
    iter.try_fold(first.clone(), |acc, next| binary(op, &acc, next))
}

fn binary(op: ArithmeticOp, a: &Value, b: &Value) -> Result<Value> {
    let divide_by_zero = || LibrisError::TypeError(format!("{} by zero", op.name()));

    if let (Value::Int(x), Value::Int(y)) = (a, b) {
        let exact = match op {
            ArithmeticOp::Add => x.checked_add(*y),
            ArithmeticOp::Subtract => x.checked_sub(*y),
            ArithmeticOp::Multiply => x.checked_mul(*y),
            ArithmeticOp::Mod if *y == 0 => return Err(divide_by_zero()),
            // Truncated remainder: the sign follows the dividend.
            ArithmeticOp::Mod => x.checked_rem(*y),
            ArithmeticOp::Divide => None,
        };
        if let Some(n) = exact {
            return Ok(Value::Int(n));
        }
    }

    let x = a.as_f64().unwrap_or_default();
    let y = b.as_f64().unwrap_or_default();
    let result = match op {
        ArithmeticOp::Add => x + y,
        ArithmeticOp::Subtract => x - y,
        ArithmeticOp::Multiply => x * y,
        ArithmeticOp::Divide | ArithmeticOp::Mod if y == 0.0 => return Err(divide_by_zero()),
        ArithmeticOp::Divide => x / y,
        ArithmeticOp::Mod => x % y,
    };
    Ok(Value::Float(result))
}

// =============================================================================
// Accumulator
// =============================================================================

/// Group accumulator operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccumulatorOp {
    Sum,
    Avg,
    Min,
    Max,
    Push,
    First,
    Last,
}

impl AccumulatorOp {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "$sum" => Some(Self::Sum),
            "$avg" => Some(Self::Avg),
            "$min" => Some(Self::Min),
            "$max" => Some(Self::Max),
            "$push" => Some(Self::Push),
            "$first" => Some(Self::First),
            "$last" => Some(Self::Last),
            _ => None,
        }
    }
}

/// Output field of a `$group` stage.
#[derive(Debug, Clone, PartialEq)]
pub struct Accumulator {
    pub name: String,
    pub op: AccumulatorOp,
    pub expr: Expression,
}

impl Accumulator {
    fn from_json(name: &str, json: &JsonValue) -> Result<Self> {
        let spec = json
            .as_object()
            .filter(|obj| obj.len() == 1)
            .ok_or_else(|| LibrisError::Parse(format!("group field '{}' must be a single accumulator", name)))?;
        let (op_name, operand) = spec
            .iter()
            .next()
            .ok_or_else(|| LibrisError::Parse(format!("group field '{}' is empty", name)))?;
        let op = AccumulatorOp::from_name(op_name)
            .ok_or_else(|| LibrisError::Parse(format!("unknown accumulator: {}", op_name)))?;

        Ok(Self {
            name: name.to_string(),
            op,
            expr: Expression::from_json(operand)?,
        })
    }
}

/// Running state of one accumulator within one group.
#[derive(Debug, Clone)]
enum AccumulatorState {
    Sum { int: i64, float: f64, is_float: bool },
    Avg { total: f64, count: usize },
    Extreme(Option<Value>),
    Push(Vec<Value>),
    First(Option<Value>),
    Last(Value),
}

impl AccumulatorState {
    fn new(op: AccumulatorOp) -> Self {
        match op {
            AccumulatorOp::Sum => Self::Sum { int: 0, float: 0.0, is_float: false },
            AccumulatorOp::Avg => Self::Avg { total: 0.0, count: 0 },
            AccumulatorOp::Min | AccumulatorOp::Max => Self::Extreme(None),
            AccumulatorOp::Push => Self::Push(Vec::new()),
            AccumulatorOp::First => Self::First(None),
            AccumulatorOp::Last => Self::Last(Value::Null),
        }
    }

    fn add(&mut self, op: AccumulatorOp, value: Value) {
        match self {
            Self::Sum { int, float, is_float } => match value {
                Value::Int(n) if !*is_float => match int.checked_add(n) {
                    Some(sum) => *int = sum,
                    None => {
                        *float = *int as f64 + n as f64;
                        *is_float = true;
                    }
                },
                Value::Int(n) => *float += n as f64,
                Value::Float(f) => {
                    if !*is_float {
                        *float = *int as f64;
                        *is_float = true;
                    }
                    *float += f;
                }
                _ => {}
            },
            Self::Avg { total, count } => {
                if let Some(n) = value.as_f64() {
                    *total += n;
                    *count += 1;
                }
            }
            Self::Extreme(current) => {
                if value.is_null() {
                    return;
                }
                let replace = match current {
                    None => true,
                    Some(existing) => {
                        let ord = value.compare(existing);
                        match op {
                            AccumulatorOp::Min => ord.is_lt(),
                            _ => ord.is_gt(),
                        }
                    }
                };
                if replace {
                    *current = Some(value);
                }
            }
            Self::Push(items) => items.push(value),
            Self::First(first) => {
                if first.is_none() {
                    *first = Some(value);
                }
            }
            Self::Last(last) => *last = value,
        }
    }

    fn finish(self) -> Value {
        match self {
            Self::Sum { int, float, is_float } => {
                if is_float {
                    Value::Float(float)
                } else {
                    Value::Int(int)
                }
            }
            Self::Avg { total, count } => {
                if count == 0 {
                    Value::Null
                } else {
                    Value::Float(total / count as f64)
                }
            }
            Self::Extreme(value) | Self::First(value) => value.unwrap_or_default(),
            Self::Push(items) => Value::Array(items),
            Self::Last(value) => value,
        }
    }
}

// =============================================================================
// Stages
// =============================================================================

/// `$project` with optional computed fields.
#[derive(Debug, Clone, PartialEq)]
pub struct ProjectStage {
    pub projection: Projection,
    pub computed: Vec<(String, Expression)>,
}

/// A single pipeline stage.
#[derive(Debug, Clone, PartialEq)]
pub enum Stage {
    Match(Query),
    Group {
        id: Expression,
        accumulators: Vec<Accumulator>,
    },
    Sort(SortSpec),
    Skip(usize),
    Limit(usize),
    AddFields(Vec<(String, Expression)>),
    Project(ProjectStage),
    Count(String),
}

impl Stage {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Match(_) => "$match",
            Self::Group { .. } => "$group",
            Self::Sort(_) => "$sort",
            Self::Skip(_) => "$skip",
            Self::Limit(_) => "$limit",
            Self::AddFields(_) => "$addFields",
            Self::Project(_) => "$project",
            Self::Count(_) => "$count",
        }
    }

    /// Parse one `{"$stage": spec}` object.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let obj = json
            .as_object()
            .filter(|obj| obj.len() == 1)
            .ok_or_else(|| LibrisError::Parse(format!("pipeline stage must have exactly one key, got {}", json)))?;
        let (name, spec) = obj
            .iter()
            .next()
            .ok_or_else(|| LibrisError::Parse("empty pipeline stage".to_string()))?;

        match name.as_str() {
            "$match" => Ok(Self::Match(Query::from_json(spec)?)),
            "$group" => parse_group(spec),
            "$sort" => Ok(Self::Sort(SortSpec::from_json(spec)?)),
            "$skip" => Ok(Self::Skip(parse_count(name, spec, true)?)),
            "$limit" => Ok(Self::Limit(parse_count(name, spec, false)?)),
            "$addFields" | "$set" => Ok(Self::AddFields(parse_field_exprs(name, spec)?)),
            "$project" => parse_project(spec),
            "$count" => {
                let field = spec
                    .as_str()
                    .filter(|f| !f.is_empty() && !f.starts_with('$') && !f.contains('.'))
                    .ok_or_else(|| LibrisError::Parse("$count requires a plain field name".to_string()))?;
                Ok(Self::Count(field.to_string()))
            }
            other => Err(LibrisError::Parse(format!("unknown pipeline stage: {}", other))),
        }
    }

    fn apply(&self, docs: Vec<Value>) -> Result<Vec<Value>> {
        match self {
            Self::Match(query) => Ok(docs.into_iter().filter(|doc| query.matches(doc)).collect()),
            Self::Group { id, accumulators } => group(docs, id, accumulators),
            Self::Sort(sort) => {
                let mut docs = docs;
                docs.sort_by(|a, b| sort.compare(a, b));
                Ok(docs)
            }
            Self::Skip(n) => Ok(docs.into_iter().skip(*n).collect()),
            Self::Limit(n) => Ok(docs.into_iter().take(*n).collect()),
            Self::AddFields(fields) => docs
                .into_iter()
                .map(|doc| {
                    let mut obj = doc.to_object();
                    for (name, expr) in fields {
                        let value = expr.evaluate(&doc)?;
                        set_path(&mut obj, name, value)?;
                    }
                    Ok(Value::Object(obj))
                })
                .collect(),
            Self::Project(stage) => docs
                .into_iter()
                .map(|doc| {
                    let mut projected = stage.projection.apply(&doc).to_object();
                    for (name, expr) in &stage.computed {
                        set_path(&mut projected, name, expr.evaluate(&doc)?)?;
                    }
                    Ok(Value::Object(projected))
                })
                .collect(),
            Self::Count(field) => {
                if docs.is_empty() {
                    return Ok(Vec::new());
                }
                let mut obj = HashMap::new();
                obj.insert(field.clone(), Value::Int(docs.len() as i64));
                Ok(vec![Value::Object(obj)])
            }
        }
    }
}

fn parse_count(stage: &str, spec: &JsonValue, allow_zero: bool) -> Result<usize> {
    let n = spec
        .as_u64()
        .or_else(|| spec.as_f64().filter(|f| f.fract() == 0.0 && *f >= 0.0).map(|f| f as u64))
        .ok_or_else(|| LibrisError::Parse(format!("{} requires a non-negative integer, got {}", stage, spec)))?;
    if n == 0 && !allow_zero {
        return Err(LibrisError::Parse(format!("{} must be positive", stage)));
    }
    usize::try_from(n).map_err(|_| LibrisError::Parse(format!("{} value {} is too large", stage, n)))
}

fn parse_field_exprs(stage: &str, spec: &JsonValue) -> Result<Vec<(String, Expression)>> {
    let obj = spec
        .as_object()
        .filter(|obj| !obj.is_empty())
        .ok_or_else(|| LibrisError::Parse(format!("{} requires a non-empty object", stage)))?;
    obj.iter()
        .map(|(name, expr)| {
            if name.starts_with('$') || name.split('.').any(str::is_empty) {
                return Err(LibrisError::Parse(format!("invalid field name '{}' in {}", name, stage)));
            }
            Ok((name.clone(), Expression::from_json(expr)?))
        })
        .collect()
}

fn parse_group(spec: &JsonValue) -> Result<Stage> {
    let obj = spec
        .as_object()
        .ok_or_else(|| LibrisError::Parse("$group requires an object".to_string()))?;
    let id = obj
        .get("_id")
        .ok_or_else(|| LibrisError::Parse("$group requires an _id expression".to_string()))?;

    let mut accumulators = Vec::with_capacity(obj.len().saturating_sub(1));
    for (name, acc) in obj.iter().filter(|(name, _)| name.as_str() != "_id") {
        if name.contains('.') || name.starts_with('$') {
            return Err(LibrisError::Parse(format!("invalid group field name '{}'", name)));
        }
        accumulators.push(Accumulator::from_json(name, acc)?);
    }

    Ok(Stage::Group {
        id: Expression::from_json(id)?,
        accumulators,
    })
}

fn parse_project(spec: &JsonValue) -> Result<Stage> {
    let obj = spec
        .as_object()
        .filter(|obj| !obj.is_empty())
        .ok_or_else(|| LibrisError::Parse("$project requires a non-empty object".to_string()))?;

    let mut flags = serde_json::Map::new();
    let mut computed = Vec::new();
    for (name, value) in obj {
        match value {
            JsonValue::Bool(_) | JsonValue::Number(_) => {
                flags.insert(name.clone(), value.clone());
            }
            expr => computed.push((name.clone(), Expression::from_json(expr)?)),
        }
    }

    let projection = match Projection::from_json(&JsonValue::Object(flags))? {
        Projection::Exclude { fields } if !computed.is_empty() => {
            if fields.iter().any(|f| f != "_id") {
                return Err(LibrisError::Parse(
                    "$project cannot combine exclusions with computed fields".to_string(),
                ));
            }
            Projection::Include {
                fields: Vec::new(),
                include_id: fields.is_empty(),
            }
        }
        projection => projection,
    };

    Ok(Stage::Project(ProjectStage { projection, computed }))
}

fn group(docs: Vec<Value>, id: &Expression, accumulators: &[Accumulator]) -> Result<Vec<Value>> {
    let mut slots: BTreeMap<IndexKey, usize> = BTreeMap::new();
    let mut groups: Vec<(Value, Vec<AccumulatorState>)> = Vec::new();

    for doc in &docs {
        let key = id.evaluate(doc)?;
        let slot = match slots.get(&IndexKey(key.clone())) {
            Some(&slot) => slot,
            None => {
                let states = accumulators.iter().map(|a| AccumulatorState::new(a.op)).collect();
                groups.push((key.clone(), states));
                slots.insert(IndexKey(key), groups.len() - 1);
                groups.len() - 1
            }
        };

        let states = &mut groups[slot].1;
        for (acc, state) in accumulators.iter().zip(states.iter_mut()) {
            state.add(acc.op, acc.expr.evaluate(doc)?);
        }
    }

    Ok(groups
        .into_iter()
        .map(|(key, states)| {
            let mut obj = HashMap::with_capacity(accumulators.len() + 1);
            obj.insert("_id".to_string(), key);
            for (acc, state) in accumulators.iter().zip(states) {
                obj.insert(acc.name.clone(), state.finish());
            }
            Value::Object(obj)
        })
        .collect())
}

// =============================================================================
// Pipeline
// =============================================================================

/// An ordered sequence of stages.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Pipeline {
    pub stages: Vec<Stage>,
}

impl Pipeline {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stage(mut self, stage: Stage) -> Self {
        self.stages.push(stage);
        self
    }

    /// Parse a JSON array of stages. The whole pipeline is parsed before
    /// anything runs, so a malformed stage never yields partial output.
    pub fn from_json(json: &JsonValue) -> Result<Self> {
        let stages = json
            .as_array()
            .ok_or_else(|| LibrisError::Parse(format!("pipeline must be an array, got {}", json)))?;
        Ok(Self {
            stages: stages.iter().map(Stage::from_json).collect::<Result<_>>()?,
        })
    }

    /// Run the pipeline over documents in the order given.
    pub fn execute<I>(&self, docs: I) -> Result<Vec<Value>>
    where
        I: IntoIterator<Item = Value>,
    {
        let mut current: Vec<Value> = docs.into_iter().collect();
        for stage in &self.stages {
            let input = current.len();
            current = stage.apply(current)?;
            tracing::trace!(stage = stage.name(), input, output = current.len(), "pipeline stage");
        }
        Ok(current)
    }
}

// =============================================================================
// Tests
// =============================================================================
