//! Formula expression language
//!
//! `tokenizer` -> `parser` (AST) -> `evaluator`. [`evaluate_expression`] is the
//! fail-soft entry point used by the calculator: any failure yields 0 and a
//! diagnostic.

pub mod evaluator;
pub mod parser;
pub mod tokenizer;
pub mod trace;

pub use evaluator::{evaluate, EvalContext, EvalError, Value};
pub use parser::{format_number, Expr, ParseError, Reference};
pub use tokenizer::{Token, TokenizeError};

use crate::diagnostics::{Diagnostic, DiagnosticKind, DiagnosticSink};
use thiserror::Error;

/// Any failure while turning an expression string into a number
#[derive(Debug, Clone, PartialEq, Error)]
pub enum FormulaError {
    #[error(transparent)]
    Tokenize(#[from] TokenizeError),

    #[error(transparent)]
    Parse(#[from] ParseError),

    #[error(transparent)]
    Eval(#[from] EvalError),
}

impl FormulaError {
    pub fn kind(&self) -> DiagnosticKind {
        match self {
            FormulaError::Tokenize(_) => DiagnosticKind::Tokenize,
            FormulaError::Parse(_) => DiagnosticKind::Parse,
            FormulaError::Eval(_) => DiagnosticKind::Eval,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            FormulaError::Tokenize(e) => &e.message,
            FormulaError::Parse(e) => &e.message,
            FormulaError::Eval(e) => &e.message,
        }
    }
}

/// Tokenize and parse. Blank expressions compile to `None`.
pub fn compile(expression: &str) -> Result<Option<Expr>, FormulaError> {
    let tokens = tokenizer::tokenize(expression)?;
    if tokens.is_empty() {
        return Ok(None);
    }
    Ok(Some(parser::parse(tokens)?))
}

/// Strict evaluation: the first failure is returned
pub fn try_evaluate(expression: &str, ctx: &EvalContext) -> Result<f64, FormulaError> {
    match compile(expression)? {
        None => Ok(0.0),
        Some(ast) => {
            let n = evaluator::evaluate_number(&ast, ctx)?;
            if n.is_finite() {
                Ok(n)
            } else {
                Err(EvalError::new("Result is not a finite number").into())
            }
        }
    }
}

/// Evaluate one expression to a number, never failing.
///
/// Errors are reported to `sink` tagged with `formula_id` and the expression,
/// and the result is 0.
pub fn evaluate_expression(
    expression: &str,
    ctx: &EvalContext,
    formula_id: Option<&str>,
    sink: &dyn DiagnosticSink,
) -> f64 {
    match try_evaluate(expression, ctx) {
        Ok(n) => n,
        Err(e) => {
            let mut diagnostic =
                Diagnostic::new(e.kind(), e.message()).with_expression(expression);
            if let Some(id) = formula_id {
                diagnostic = diagnostic.for_formula(id);
            }
            sink.emit(diagnostic);
            0.0
        }
    }
}
