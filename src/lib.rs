//! Quoter - formula engine for insurance quote forms
//!
//! A quoter is a form (fields), a set of coefficient tables (rate tables keyed
//! by row and column), and formulas written in a small expression language:
//!
//! - `$id` reads a form field, `@id` reads another formula's result
//! - `LOOKUP(table, rowKey, colKey)` reads a coefficient, falling back to the
//!   nearest lower numeric column key
//! - `ROUND`, `FLOOR`, `CEIL`, `ABS`, `MIN`, `MAX`, `SUM`, `AVG`, `IF`
//! - `+ - * /`, comparisons, parentheses
//!
//! Formulas are evaluated in dependency order. Array formulas run once per row
//! of the configuration's array field and produce a vector. Evaluation never
//! fails: a broken formula yields 0 and a diagnostic.
//!
//! # Example
//!
//! ```no_run
//! use quoter_engine::parser::{initial_field_values, load_config};
//! use quoter_engine::core::calculate_all;
//! use std::path::Path;
//!
//! let config = load_config(Path::new("personal-accident.yaml"))?;
//! let values = initial_field_values(&config);
//!
//! let results = calculate_all(&config, &values);
//! println!("Premium: {:?}", results.get("mainPremium"));
//! # Ok::<(), quoter_engine::error::QuoterError>(())
//! ```

pub mod cli;
pub mod core;
pub mod diagnostics;
pub mod error;
pub mod parser;
pub mod types;

// Re-export commonly used types
pub use crate::core::{calculate_all, trace_formula, QuoteCalculator};
pub use diagnostics::{CollectingSink, Diagnostic, DiagnosticKind, DiagnosticSink, TracingSink};
pub use error::{QuoterError, QuoterResult};
pub use types::{
    CoefficientTable, Field, FieldType, FieldValue, FieldValues, Formula, FormulaResult,
    QuoterConfig, ResultMap,
};
