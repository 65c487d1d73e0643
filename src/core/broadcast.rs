//! Array formula broadcasting
//!
//! An array formula runs once per row of the configuration's array field. Each
//! row sees its own item-field values layered over the top-level values, and
//! `@formula` vectors are indexed at the current row.

use super::expression::{evaluate_expression, EvalContext};
use crate::diagnostics::DiagnosticSink;
use crate::types::{Field, FieldValue, Formula};

/// Rows of `array_field` in the current values; empty when absent or not a list
pub fn rows<'a>(array_field: &Field, ctx: &EvalContext<'a>) -> &'a [FieldValue] {
    ctx.field_values
        .get(&array_field.id)
        .and_then(FieldValue::as_list)
        .unwrap_or(&[])
}

/// Evaluate `formula` once per row of `array_field`, in row order
pub fn broadcast(
    formula: &Formula,
    array_field: &Field,
    ctx: &EvalContext,
    sink: &dyn DiagnosticSink,
) -> Vec<f64> {
    rows(array_field, ctx)
        .iter()
        .enumerate()
        .map(|(index, row)| {
            let row_ctx = ctx.with_row(index, row.as_record());
            evaluate_expression(&formula.expression, &row_ctx, Some(&formula.id), sink)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::diagnostics::{CollectingSink, NullSink};
    use crate::types::{ArrayConfig, FieldType, FieldValues, FormulaResult, ResultMap};

    fn members_field() -> Field {
        Field::new("members", FieldType::Array).with_array_config(ArrayConfig {
            min_items: 1,
            max_items: 10,
            item_fields: vec![Field::new("peopleCount", FieldType::Number)],
        })
    }

    fn members(counts: &[i32]) -> FieldValue {
        FieldValue::List(
            counts
                .iter()
                .map(|&n| FieldValue::record([("peopleCount", n)]))
                .collect(),
        )
    }

    #[test]
    fn test_broadcast_per_row() {
        let mut values = FieldValues::new();
        values.insert("members".to_string(), members(&[5, 10, 3]));
        let results = ResultMap::new();
        let ctx = EvalContext::new(&values, &[], &results);

        let formula = Formula::new("perRow", "ROUND($peopleCount * 2, 0)").array();
        assert_eq!(
            broadcast(&formula, &members_field(), &ctx, &NullSink),
            vec![10.0, 20.0, 6.0]
        );
    }

    #[test]
    fn test_broadcast_mixes_top_level_fields_and_vectors() {
        let mut values = FieldValues::new();
        values.insert("members".to_string(), members(&[1, 2]));
        values.insert("rate".to_string(), FieldValue::from(100));
        let mut results = ResultMap::new();
        results.insert("coef".to_string(), FormulaResult::Vector(vec![0.5, 1.5]));
        let ctx = EvalContext::new(&values, &[], &results);

        let formula = Formula::new("premium", "$peopleCount * $rate * @coef").array();
        assert_eq!(
            broadcast(&formula, &members_field(), &ctx, &NullSink),
            vec![50.0, 300.0]
        );
    }

    #[test]
    fn test_broadcast_absent_or_empty_is_empty() {
        let results = ResultMap::new();
        let formula = Formula::new("perRow", "$peopleCount").array();

        let values = FieldValues::new();
        let ctx = EvalContext::new(&values, &[], &results);
        assert!(broadcast(&formula, &members_field(), &ctx, &NullSink).is_empty());

        let mut values = FieldValues::new();
        values.insert("members".to_string(), FieldValue::List(vec![]));
        let ctx = EvalContext::new(&values, &[], &results);
        assert!(broadcast(&formula, &members_field(), &ctx, &NullSink).is_empty());
    }

    #[test]
    fn test_broadcast_failing_row_is_zero() {
        let mut values = FieldValues::new();
        values.insert(
            "members".to_string(),
            FieldValue::List(vec![
                FieldValue::record([("peopleCount", FieldValue::from(4))]),
                FieldValue::record([("peopleCount", FieldValue::from("many"))]),
            ]),
        );
        let results = ResultMap::new();
        let ctx = EvalContext::new(&values, &[], &results);
        let sink = CollectingSink::new();

        let formula = Formula::new("perRow", "$peopleCount * 2").array();
        assert_eq!(
            broadcast(&formula, &members_field(), &ctx, &sink),
            vec![8.0, 0.0]
        );
        assert_eq!(sink.len(), 1);
    }
}
