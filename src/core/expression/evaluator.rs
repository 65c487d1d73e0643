//! Formula evaluator
//!
//! Walks the AST against an [`EvalContext`]: current field values, the
//! coefficient tables, and the formula results computed so far in this pass.
//! Supports scalar mode and row mode (one row of an array field).

use super::parser::{format_number, Expr, Reference};
use crate::core::lookup::lookup;
use crate::types::{CoefficientTable, FieldValue, FieldValues, FormulaResult, ResultMap};
use std::collections::BTreeMap;
use thiserror::Error;

/// Value type that can be returned from evaluation
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Number(f64),
    Text(String),
    Boolean(bool),
    /// A whole array field or an unindexed array-formula result
    Array(Vec<Value>),
    /// Missing field
    Null,
}

impl Value {
    fn from_field(value: &FieldValue) -> Self {
        match value {
            FieldValue::Null => Value::Null,
            FieldValue::Bool(b) => Value::Boolean(*b),
            FieldValue::Number(n) => Value::Number(*n),
            FieldValue::Text(s) => Value::Text(s.clone()),
            FieldValue::List(items) => Value::Array(items.iter().map(Value::from_field).collect()),
            FieldValue::Record(map) => Value::Array(map.values().map(Value::from_field).collect()),
        }
    }

    /// Numeric view used by arithmetic: numeric text counts, null is 0
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
            Value::Text(s) => s.trim().parse::<f64>().ok().filter(|n| n.is_finite()),
            Value::Null => Some(0.0),
            Value::Array(_) => None,
        }
    }

    /// Text used as a LOOKUP key
    pub fn as_key(&self) -> Option<String> {
        match self {
            Value::Number(n) => Some(format_number(*n)),
            Value::Text(s) => Some(s.clone()),
            Value::Boolean(b) => Some(b.to_string()),
            Value::Null => Some(String::new()),
            Value::Array(_) => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Text(s) => match s.trim().parse::<f64>() {
                Ok(n) => n != 0.0,
                Err(_) => !s.is_empty(),
            },
            other => other.as_number().is_some_and(|n| n != 0.0 && !n.is_nan()),
        }
    }
}

/// Row being evaluated by an array formula
#[derive(Debug, Clone, Copy)]
pub struct RowScope<'a> {
    pub index: usize,
    /// The row's own item-field values, overlaid on top-level field values
    pub record: Option<&'a BTreeMap<String, FieldValue>>,
}

/// Evaluation context for one formula (or one row of an array formula)
#[derive(Debug, Clone, Copy)]
pub struct EvalContext<'a> {
    pub field_values: &'a FieldValues,
    pub tables: &'a [CoefficientTable],
    pub results: &'a ResultMap,
    pub row: Option<RowScope<'a>>,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        field_values: &'a FieldValues,
        tables: &'a [CoefficientTable],
        results: &'a ResultMap,
    ) -> Self {
        Self {
            field_values,
            tables,
            results,
            row: None,
        }
    }

    /// Switch to row mode
    pub fn with_row(mut self, index: usize, record: Option<&'a BTreeMap<String, FieldValue>>) -> Self {
        self.row = Some(RowScope { index, record });
        self
    }

    /// Resolve `$id`
    pub fn field(&self, id: &str) -> Value {
        if let Some(value) = self.row.and_then(|row| row.record).and_then(|r| r.get(id)) {
            return Value::from_field(value);
        }

        match (self.field_values.get(id), self.row) {
            (None, _) => Value::Null,
            // Row mode over a sequence: take this row's entry for the same id
            (Some(FieldValue::List(items)), Some(row)) => match items.get(row.index) {
                Some(FieldValue::Record(record)) => {
                    record.get(id).map(Value::from_field).unwrap_or(Value::Null)
                }
                Some(item) => Value::from_field(item),
                None => Value::Null,
            },
            (Some(value), _) => Value::from_field(value),
        }
    }

    /// Resolve `@id`; missing results are 0
    pub fn formula(&self, id: &str) -> Value {
        match (self.results.get(id), self.row) {
            (None, _) => Value::Number(0.0),
            (Some(FormulaResult::Scalar(n)), _) => Value::Number(*n),
            (Some(FormulaResult::Vector(values)), Some(row)) => {
                Value::Number(values.get(row.index).copied().unwrap_or(0.0))
            }
            (Some(FormulaResult::Vector(values)), None) => {
                Value::Array(values.iter().copied().map(Value::Number).collect())
            }
        }
    }
}

/// Error during evaluation
#[derive(Debug, Clone, PartialEq, Error)]
#[error("Eval error: {message}")]
pub struct EvalError {
    pub message: String,
}

impl EvalError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Evaluate an expression in the given context
pub fn evaluate(expr: &Expr, ctx: &EvalContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Number(n) => Ok(Value::Number(*n)),

        Expr::Text(s) => Ok(Value::Text(s.clone())),

        Expr::Reference(Reference::Field(id)) => Ok(ctx.field(id)),
        Expr::Reference(Reference::Formula(id)) => Ok(ctx.formula(id)),
        Expr::Reference(Reference::Name(name)) => Ok(Value::Text(name.clone())),

        Expr::FunctionCall { name, args } => evaluate_function(name, args, ctx),

        Expr::BinaryOp { op, left, right } => {
            let left_val = evaluate(left, ctx)?;
            let right_val = evaluate(right, ctx)?;
            evaluate_binary_op(op, &left_val, &right_val)
        }

        Expr::UnaryOp { op, operand } => {
            let n = require_number(&evaluate(operand, ctx)?, "Operand")?;
            match op.as_str() {
                "-" => Ok(Value::Number(-n)),
                "+" => Ok(Value::Number(n)),
                _ => Err(EvalError::new(format!("Unknown unary operator: {}", op))),
            }
        }
    }
}

/// Evaluate and coerce to the final numeric result
pub fn evaluate_number(expr: &Expr, ctx: &EvalContext) -> Result<f64, EvalError> {
    require_number(&evaluate(expr, ctx)?, "Result")
}

fn require_number(value: &Value, what: &str) -> Result<f64, EvalError> {
    match value {
        Value::Array(_) => Err(EvalError::new(format!(
            "{} is an array; reference it from an array formula or aggregate it with SUM/MIN/MAX/AVG",
            what
        ))),
        Value::Text(s) => value
            .as_number()
            .ok_or_else(|| EvalError::new(format!("{} must be a number, got text '{}'", what, s))),
        other => other
            .as_number()
            .ok_or_else(|| EvalError::new(format!("{} must be a number", what))),
    }
}

fn evaluate_binary_op(op: &str, left: &Value, right: &Value) -> Result<Value, EvalError> {
    match op {
        "==" => return Ok(Value::Boolean(values_equal(left, right))),
        "!=" => return Ok(Value::Boolean(!values_equal(left, right))),
        _ => {}
    }

    let l = require_number(left, "Left operand")?;
    let r = require_number(right, "Right operand")?;

    match op {
        "+" => Ok(Value::Number(l + r)),
        "-" => Ok(Value::Number(l - r)),
        "*" => Ok(Value::Number(l * r)),
        "/" => {
            if r == 0.0 {
                Err(EvalError::new("Division by zero"))
            } else {
                Ok(Value::Number(l / r))
            }
        }
        "<" => Ok(Value::Boolean(l < r)),
        ">" => Ok(Value::Boolean(l > r)),
        "<=" => Ok(Value::Boolean(l <= r)),
        ">=" => Ok(Value::Boolean(l >= r)),
        _ => Err(EvalError::new(format!("Unknown operator: {}", op))),
    }
}

/// Equality: numeric when both sides are numeric, exact text otherwise
fn values_equal(left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::Text(l), Value::Text(r)) => l == r,
        (Value::Array(_), _) | (_, Value::Array(_)) => false,
        (Value::Text(s), other) | (other, Value::Text(s)) => {
            match (s.trim().parse::<f64>(), other.as_number()) {
                (Ok(n), Some(m)) => n == m,
                _ => matches!(other, Value::Null) && s.is_empty(),
            }
        }
        (l, r) => l.as_number() == r.as_number(),
    }
}

fn evaluate_function(name: &str, args: &[Expr], ctx: &EvalContext) -> Result<Value, EvalError> {
    let upper_name = name.to_uppercase();

    match upper_name.as_str() {
        "ROUND" => {
            require_args_range(&upper_name, args, 1, 2)?;
            let val = number_arg(&upper_name, &args[0], ctx)?;
            let decimals = match args.get(1) {
                Some(arg) => number_arg(&upper_name, arg, ctx)?.trunc() as i32,
                None => 0,
            };
            Ok(Value::Number(round_to(val, decimals)))
        }

        "FLOOR" => {
            require_args(&upper_name, args, 1)?;
            Ok(Value::Number(number_arg(&upper_name, &args[0], ctx)?.floor()))
        }

        "CEIL" => {
            require_args(&upper_name, args, 1)?;
            Ok(Value::Number(number_arg(&upper_name, &args[0], ctx)?.ceil()))
        }

        "ABS" => {
            require_args(&upper_name, args, 1)?;
            Ok(Value::Number(number_arg(&upper_name, &args[0], ctx)?.abs()))
        }

        "SUM" => {
            let values = collect_numeric_values(&upper_name, args, ctx)?;
            Ok(Value::Number(values.iter().sum()))
        }

        "MIN" => {
            let values = non_empty(&upper_name, collect_numeric_values(&upper_name, args, ctx)?)?;
            Ok(Value::Number(values.iter().copied().fold(f64::INFINITY, f64::min)))
        }

        "MAX" => {
            let values = non_empty(&upper_name, collect_numeric_values(&upper_name, args, ctx)?)?;
            Ok(Value::Number(values.iter().copied().fold(f64::NEG_INFINITY, f64::max)))
        }

        "AVG" => {
            let values = non_empty(&upper_name, collect_numeric_values(&upper_name, args, ctx)?)?;
            Ok(Value::Number(values.iter().sum::<f64>() / values.len() as f64))
        }

        "IF" => {
            require_args_range(&upper_name, args, 2, 3)?;
            let condition = evaluate(&args[0], ctx)?;
            if let Value::Array(_) = condition {
                return Err(EvalError::new("IF condition is an array"));
            }
            if condition.is_truthy() {
                evaluate(&args[1], ctx)
            } else if let Some(otherwise) = args.get(2) {
                evaluate(otherwise, ctx)
            } else {
                Ok(Value::Number(0.0))
            }
        }

        "LOOKUP" => {
            require_args(&upper_name, args, 3)?;
            let table_id = key_arg("table id", &args[0], ctx)?;
            let row_key = key_arg("row key", &args[1], ctx)?;
            let col_key = key_arg("column key", &args[2], ctx)?;
            Ok(Value::Number(lookup(ctx.tables, &table_id, &row_key, &col_key)))
        }

        _ => Err(EvalError::new(format!("Unknown function: {}", name))),
    }
}

/// `round(value * 10^decimals) / 10^decimals`, ties away from zero
pub fn round_to(value: f64, decimals: i32) -> f64 {
    let multiplier = 10_f64.powi(decimals);
    (value * multiplier).round() / multiplier
}

fn number_arg(func: &str, arg: &Expr, ctx: &EvalContext) -> Result<f64, EvalError> {
    let value = evaluate(arg, ctx)?;
    require_number(&value, &format!("{} argument", func))
}

fn key_arg(what: &str, arg: &Expr, ctx: &EvalContext) -> Result<String, EvalError> {
    evaluate(arg, ctx)?
        .as_key()
        .ok_or_else(|| EvalError::new(format!("LOOKUP {} cannot be an array", what)))
}

fn require_args(func: &str, args: &[Expr], count: usize) -> Result<(), EvalError> {
    if args.len() != count {
        Err(EvalError::new(format!(
            "{} requires {} argument(s), got {}",
            func,
            count,
            args.len()
        )))
    } else {
        Ok(())
    }
}

fn require_args_range(func: &str, args: &[Expr], min: usize, max: usize) -> Result<(), EvalError> {
    if args.len() < min || args.len() > max {
        Err(EvalError::new(format!(
            "{} requires {}-{} arguments, got {}",
            func,
            min,
            max,
            args.len()
        )))
    } else {
        Ok(())
    }
}

fn non_empty(func: &str, values: Vec<f64>) -> Result<Vec<f64>, EvalError> {
    if values.is_empty() {
        Err(EvalError::new(format!("{} requires at least one value", func)))
    } else {
        Ok(values)
    }
}

/// Collect numeric arguments; arrays (unindexed array-formula results) are flattened
fn collect_numeric_values(func: &str, args: &[Expr], ctx: &EvalContext) -> Result<Vec<f64>, EvalError> {
    let mut values = Vec::new();

    for arg in args {
        match evaluate(arg, ctx)? {
            Value::Array(items) => {
                for item in items {
                    values.push(require_number(&item, &format!("{} array element", func))?);
                }
            }
            other => values.push(require_number(&other, &format!("{} argument", func))?),
        }
    }

    Ok(values)
}
