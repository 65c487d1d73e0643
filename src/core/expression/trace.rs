//! Substitution trace for formula audits
//!
//! Rewrites an AST with every `$field`, `@formula` and resolvable `LOOKUP(...)`
//! replaced by the literal it evaluates to, so authors can see the arithmetic
//! that actually ran.

use super::evaluator::{evaluate, EvalContext, Value};
use super::parser::{format_number, Expr, Reference};
use crate::diagnostics::Diagnostic;

/// One referenced input and the value it resolved to
#[derive(Debug, Clone, PartialEq)]
pub struct DependencyValue {
    /// `$id` or `@id`
    pub reference: String,
    pub value: String,
}

/// Step-by-step view of one formula evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct FormulaTrace {
    pub formula_id: String,
    pub original: String,
    /// Expression with references and lookups replaced by literals
    pub substituted: String,
    /// Final result for this formula (one entry per row for array formulas)
    pub result: Vec<f64>,
    pub dependencies: Vec<DependencyValue>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Replace references and LOOKUP calls with literals
pub fn substitute(expr: &Expr, ctx: &EvalContext) -> Expr {
    match expr {
        Expr::Reference(Reference::Field(id)) => literal(&ctx.field(id)).unwrap_or_else(|| expr.clone()),
        Expr::Reference(Reference::Formula(id)) => {
            literal(&ctx.formula(id)).unwrap_or_else(|| expr.clone())
        }
        Expr::FunctionCall { name, args } => {
            if name.eq_ignore_ascii_case("LOOKUP") {
                if let Ok(Value::Number(n)) = evaluate(expr, ctx) {
                    return Expr::Number(n);
                }
            }
            Expr::FunctionCall {
                name: name.clone(),
                args: args.iter().map(|a| substitute(a, ctx)).collect(),
            }
        }
        Expr::BinaryOp { op, left, right } => Expr::BinaryOp {
            op: op.clone(),
            left: Box::new(substitute(left, ctx)),
            right: Box::new(substitute(right, ctx)),
        },
        Expr::UnaryOp { op, operand } => Expr::UnaryOp {
            op: op.clone(),
            operand: Box::new(substitute(operand, ctx)),
        },
        Expr::Number(_) | Expr::Text(_) | Expr::Reference(Reference::Name(_)) => expr.clone(),
    }
}

fn literal(value: &Value) -> Option<Expr> {
    match value {
        Value::Number(n) => Some(Expr::Number(*n)),
        Value::Text(s) => Some(Expr::Text(s.clone())),
        Value::Boolean(b) => Some(Expr::Number(if *b { 1.0 } else { 0.0 })),
        Value::Null => Some(Expr::Number(0.0)),
        Value::Array(_) => None,
    }
}

/// `$field` and `@formula` references in order of first appearance
pub fn references(expr: &Expr) -> Vec<Reference> {
    let mut found = Vec::new();
    collect_references(expr, &mut found);
    found
}

fn collect_references(expr: &Expr, found: &mut Vec<Reference>) {
    match expr {
        Expr::Reference(r @ (Reference::Field(_) | Reference::Formula(_))) => {
            if !found.contains(r) {
                found.push(r.clone());
            }
        }
        Expr::FunctionCall { args, .. } => {
            for arg in args {
                collect_references(arg, found);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            collect_references(left, found);
            collect_references(right, found);
        }
        Expr::UnaryOp { operand, .. } => collect_references(operand, found),
        Expr::Number(_) | Expr::Text(_) | Expr::Reference(Reference::Name(_)) => {}
    }
}

/// Resolved value of every reference in `expr`
pub fn dependency_values(expr: &Expr, ctx: &EvalContext) -> Vec<DependencyValue> {
    references(expr)
        .into_iter()
        .map(|r| match r {
            Reference::Field(id) => DependencyValue {
                value: render_value(&ctx.field(&id)),
                reference: format!("${}", id),
            },
            Reference::Formula(id) => DependencyValue {
                value: render_value(&ctx.formula(&id)),
                reference: format!("@{}", id),
            },
            Reference::Name(name) => DependencyValue {
                value: name.clone(),
                reference: name,
            },
        })
        .collect()
}

/// Human-readable rendering of an evaluated value
pub fn render_value(value: &Value) -> String {
    match value {
        Value::Number(n) => format_number(*n),
        Value::Text(s) => format!("'{}'", s),
        Value::Boolean(b) => b.to_string(),
        Value::Null => "(empty)".to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(render_value).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}
