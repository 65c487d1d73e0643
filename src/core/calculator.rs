use super::broadcast::{broadcast, rows};
use super::expression::trace::{dependency_values, substitute, FormulaTrace};
use super::expression::{compile, evaluate_expression, EvalContext};
use super::resolver;
use crate::diagnostics::{CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink, TracingSink};
use crate::types::{Field, FieldValues, FormulaResult, QuoterConfig, ResultMap};

/// Quote calculator: orders the configuration's formulas and evaluates them
/// against a set of field values.
///
/// Calculation never fails. Broken formulas come out as 0 and the reason goes
/// to the diagnostic sink (`tracing` by default).
pub struct QuoteCalculator<'a> {
    config: &'a QuoterConfig,
    sink: &'a dyn DiagnosticSink,
}

impl<'a> QuoteCalculator<'a> {
    #[must_use]
    pub fn new(config: &'a QuoterConfig) -> Self {
        Self {
            config,
            sink: &TracingSink,
        }
    }

    /// Send diagnostics somewhere other than `tracing`
    #[must_use]
    pub fn with_sink(mut self, sink: &'a dyn DiagnosticSink) -> Self {
        self.sink = sink;
        self
    }

    /// Field array formulas broadcast over. With several array fields the
    /// first one wins and a diagnostic is emitted.
    fn array_field(&self) -> Option<&'a Field> {
        let mut array_fields = self.config.array_fields();
        let first = array_fields.next()?;
        let others: Vec<&str> = array_fields.map(|f| f.id.as_str()).collect();
        if !others.is_empty() {
            self.sink.emit(Diagnostic::new(
                DiagnosticKind::MultipleArrayFields,
                format!(
                    "Array formulas use '{}'; also found: {}",
                    first.id,
                    others.join(", ")
                ),
            ));
        }
        Some(first)
    }

    /// Calculate every formula and return formula id -> result.
    ///
    /// Results accumulate in dependency order, so later formulas see earlier
    /// ones. The map is rebuilt from scratch on every call.
    pub fn calculate_all(&self, values: &FieldValues) -> ResultMap {
        let ordered = resolver::order(&self.config.formulas, self.sink);

        let needs_rows = ordered.iter().any(|f| f.is_array_formula());
        let array_field = if needs_rows { self.array_field() } else { None };

        let mut results = ResultMap::new();
        for formula in ordered {
            // duplicate ids: the first definition wins
            if results.contains_key(&formula.id) {
                tracing::debug!(formula = %formula.id, "skipping duplicate formula id");
                continue;
            }
            let ctx = EvalContext::new(values, &self.config.coefficient_tables, &results);

            let result = match array_field {
                Some(field) if formula.is_array_formula() => {
                    FormulaResult::Vector(broadcast(formula, field, &ctx, self.sink))
                }
                _ => FormulaResult::Scalar(evaluate_expression(
                    &formula.expression,
                    &ctx,
                    Some(&formula.id),
                    self.sink,
                )),
            };

            tracing::debug!(formula = %formula.id, result = ?result, "evaluated");
            results.insert(formula.id.clone(), result);
        }

        results
    }

    /// Run a full pass and explain how `formula_id` got its value.
    ///
    /// Returns `None` when no formula has that id. For array formulas the
    /// substitution shows the first row.
    pub fn trace(&self, values: &FieldValues, formula_id: &str) -> Option<FormulaTrace> {
        let formula = self.config.formula(formula_id)?;

        let collected = CollectingSink::new();
        let results = QuoteCalculator::new(self.config)
            .with_sink(&collected)
            .calculate_all(values);

        let ctx = EvalContext::new(values, &self.config.coefficient_tables, &results);
        let ctx = match self.config.array_fields().next() {
            Some(field) if formula.is_array_formula() => match rows(field, &ctx).first() {
                Some(row) => ctx.with_row(0, row.as_record()),
                None => ctx,
            },
            _ => ctx,
        };

        let (substituted, dependencies) = match compile(&formula.expression) {
            Ok(Some(ast)) => (substitute(&ast, &ctx).to_string(), dependency_values(&ast, &ctx)),
            Ok(None) | Err(_) => (formula.expression.clone(), Vec::new()),
        };

        let result = match results.get(formula_id) {
            Some(FormulaResult::Scalar(n)) => vec![*n],
            Some(FormulaResult::Vector(v)) => v.clone(),
            None => Vec::new(),
        };

        let diagnostics: Vec<Diagnostic> = collected
            .into_inner()
            .into_iter()
            .filter(|d| d.formula_id.as_deref().map_or(true, |id| id == formula_id))
            .collect();
        for diagnostic in &diagnostics {
            self.sink.emit(diagnostic.clone());
        }

        Some(FormulaTrace {
            formula_id: formula.id.clone(),
            original: formula.expression.clone(),
            substituted,
            result,
            dependencies,
            diagnostics,
        })
    }
}

/// Calculate every formula in `config`, logging diagnostics through `tracing`
pub fn calculate_all(config: &QuoterConfig, values: &FieldValues) -> ResultMap {
    QuoteCalculator::new(config).calculate_all(values)
}

/// Audit trace for one formula; `None` if the id is unknown
pub fn trace_formula(config: &QuoterConfig, values: &FieldValues, formula_id: &str) -> Option<FormulaTrace> {
    QuoteCalculator::new(config).trace(values, formula_id)
}
