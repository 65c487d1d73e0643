//! Coefficient table lookup
//!
//! `LOOKUP(table, row, col)` resolves a coefficient with exact-match first,
//! then a step-function ("floor") match on numeric column keys. Anything that
//! cannot be resolved is 0, never an error.

use crate::types::CoefficientTable;

/// Look up `tables[table_id][row_key][col_key]`.
///
/// - unknown table or row: 0
/// - exact column key: that value
/// - numeric column key: value at the largest numeric column key <= `col_key`
///   (0 if `col_key` is below every numeric key)
/// - otherwise: 0
pub fn lookup(tables: &[CoefficientTable], table_id: &str, row_key: &str, col_key: &str) -> f64 {
    let Some(table) = tables.iter().find(|t| t.id == table_id) else {
        return 0.0;
    };
    let Some(row) = table.data.get(row_key) else {
        return 0.0;
    };

    if let Some(&value) = row.get(col_key) {
        return value;
    }

    let Some(target) = parse_numeric_key(col_key) else {
        return 0.0;
    };

    let mut numeric_keys: Vec<(f64, &String)> = row
        .keys()
        .filter_map(|k| parse_numeric_key(k).map(|n| (n, k)))
        .collect();
    numeric_keys.sort_by(|a, b| a.0.total_cmp(&b.0));

    numeric_keys
        .iter()
        .take_while(|(n, _)| *n <= target)
        .last()
        .and_then(|(_, key)| row.get(*key))
        .copied()
        .unwrap_or(0.0)
}

/// A key counts as numeric when it parses to a finite number.
/// Empty or blank keys are not numeric.
fn parse_numeric_key(key: &str) -> Option<f64> {
    let trimmed = key.trim();
    if trimmed.is_empty() {
        return None;
    }
    trimmed.parse::<f64>().ok().filter(|n| n.is_finite())
}
