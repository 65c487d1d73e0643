//! Core calculation engine with dependency resolution

pub mod broadcast;
pub mod calculator;
pub mod expression;
pub mod lookup;
pub mod resolver;

pub use calculator::{calculate_all, trace_formula, QuoteCalculator};
pub use expression::trace::{DependencyValue, FormulaTrace};
pub use expression::{evaluate_expression, try_evaluate, EvalContext, FormulaError};
pub use lookup::lookup;
pub use resolver::{cycle_groups, order};
