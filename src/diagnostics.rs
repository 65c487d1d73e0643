//! Diagnostics emitted during a calculation pass
//!
//! Evaluation never fails outward: a broken formula evaluates to 0 and the
//! reason is handed to a [`DiagnosticSink`] supplied by the caller.

use std::cell::RefCell;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DiagnosticKind {
    /// Unterminated string, malformed number or bare `$`/`@` in an expression
    Tokenize,
    /// Malformed expression (unbalanced parentheses, dangling operator, ...)
    Parse,
    /// Runtime failure: bad argument count, non-numeric operand, division by zero
    Eval,
    /// Formula is part of a reference cycle and was evaluated with a partial value
    CircularDependency,
    /// More than one array field; array formulas broadcast over the first one
    MultipleArrayFields,
}

impl fmt::Display for DiagnosticKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DiagnosticKind::Tokenize => "tokenize",
            DiagnosticKind::Parse => "parse",
            DiagnosticKind::Eval => "eval",
            DiagnosticKind::CircularDependency => "circular-dependency",
            DiagnosticKind::MultipleArrayFields => "multiple-array-fields",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub formula_id: Option<String>,
    pub expression: Option<String>,
    pub message: String,
}

impl Diagnostic {
    pub fn new(kind: DiagnosticKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            formula_id: None,
            expression: None,
            message: message.into(),
        }
    }

    pub fn for_formula(mut self, formula_id: impl Into<String>) -> Self {
        self.formula_id = Some(formula_id.into());
        self
    }

    pub fn with_expression(mut self, expression: impl Into<String>) -> Self {
        self.expression = Some(expression.into());
        self
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}]", self.kind)?;
        if let Some(id) = &self.formula_id {
            write!(f, " {}:", id)?;
        }
        write!(f, " {}", self.message)?;
        if let Some(expr) = &self.expression {
            write!(f, " (in `{}`)", expr)?;
        }
        Ok(())
    }
}

/// Receiver for evaluation diagnostics
pub trait DiagnosticSink {
    fn emit(&self, diagnostic: Diagnostic);
}

/// Default sink: forwards every diagnostic to `tracing` at warn level
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl DiagnosticSink for TracingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        tracing::warn!(
            kind = %diagnostic.kind,
            formula = diagnostic.formula_id.as_deref().unwrap_or("-"),
            expression = diagnostic.expression.as_deref().unwrap_or(""),
            "{}",
            diagnostic.message
        );
    }
}

/// Keeps diagnostics in memory (audit view, tests)
#[derive(Debug, Default)]
pub struct CollectingSink {
    diagnostics: RefCell<Vec<Diagnostic>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn diagnostics(&self) -> Vec<Diagnostic> {
        self.diagnostics.borrow().clone()
    }

    pub fn len(&self) -> usize {
        self.diagnostics.borrow().len()
    }

    pub fn is_empty(&self) -> bool {
        self.diagnostics.borrow().is_empty()
    }

    pub fn into_inner(self) -> Vec<Diagnostic> {
        self.diagnostics.into_inner()
    }
}

impl DiagnosticSink for CollectingSink {
    fn emit(&self, diagnostic: Diagnostic) {
        self.diagnostics.borrow_mut().push(diagnostic);
    }
}

/// Drops everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl DiagnosticSink for NullSink {
    fn emit(&self, _diagnostic: Diagnostic) {}
}
