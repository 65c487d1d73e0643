//! End-to-end calculation tests against the fixture quoters in test-data/

use pretty_assertions::assert_eq;
use quoter_engine::core::{calculate_all, order, trace_formula, QuoteCalculator};
use quoter_engine::diagnostics::{CollectingSink, DiagnosticKind, NullSink};
use quoter_engine::parser::{initial_field_values, load_config, load_values};
use quoter_engine::types::{FieldValue, FieldValues, Formula, FormulaResult, QuoterConfig, ResultMap};
use std::path::PathBuf;

fn test_data_path(filename: &str) -> PathBuf {
    let mut path = PathBuf::from(env!("CARGO_MANIFEST_DIR"));
    path.push("test-data");
    path.push(filename);
    path
}

fn load(filename: &str) -> QuoterConfig {
    load_config(&test_data_path(filename)).expect("fixture should load")
}

fn scalar(results: &ResultMap, id: &str) -> f64 {
    results
        .get(id)
        .and_then(FormulaResult::as_scalar)
        .unwrap_or_else(|| panic!("{} should be a scalar result", id))
}

fn vector(results: &ResultMap, id: &str) -> Vec<f64> {
    results
        .get(id)
        .and_then(FormulaResult::as_vector)
        .unwrap_or_else(|| panic!("{} should be a vector result", id))
        .to_vec()
}

// ========== Personal accident ==========

#[test]
fn personal_accident_defaults() {
    let config = load("personal-accident.json");
    let values = initial_field_values(&config);
    let results = calculate_all(&config, &values);

    // ROUND(20 * 10000 * 0.000842 * 0.9 * 0.671 * 1.2, 2) = ROUND(122.036112, 2)
    assert_eq!(scalar(&results, "mainPremium"), 122.04);
    assert_eq!(scalar(&results, "medicalPremium"), 47.5);
    assert_eq!(scalar(&results, "hospitalPremium"), 19.7);
    assert_eq!(scalar(&results, "totalPremium"), 189.24);
    assert_eq!(results.len(), 4);
}

#[test]
fn personal_accident_age_between_breakpoints_uses_lower_band() {
    let config = load("personal-accident.json");
    let mut values = initial_field_values(&config);
    values.insert("gender".to_string(), FieldValue::from("female"));
    values.insert("age".to_string(), FieldValue::from(42));
    values.insert("occupation".to_string(), FieldValue::from("class4"));

    let results = calculate_all(&config, &values);
    // female age 42 -> band 40 (0.333), class4 -> 1.6
    assert_eq!(scalar(&results, "mainPremium"), 80.75);
    assert_eq!(scalar(&results, "medicalPremium"), 33.0);
    assert_eq!(scalar(&results, "hospitalPremium"), 31.4);
    assert_eq!(scalar(&results, "totalPremium"), 145.15);
}

#[test]
fn personal_accident_age_above_last_breakpoint() {
    let config = load("personal-accident.json");
    let mut values = initial_field_values(&config);
    values.insert("age".to_string(), FieldValue::from(99));

    let results = calculate_all(&config, &values);
    assert_eq!(scalar(&results, "mainPremium"), 397.94);
}

#[test]
fn personal_accident_age_as_text_behaves_like_number() {
    let config = load("personal-accident.json");
    let mut values = initial_field_values(&config);
    values.insert("age".to_string(), FieldValue::from("30"));

    let results = calculate_all(&config, &values);
    assert_eq!(scalar(&results, "mainPremium"), 122.04);
}

#[test]
fn personal_accident_unknown_occupation_is_zero_not_error() {
    let config = load("personal-accident.json");
    let mut values = initial_field_values(&config);
    values.insert("occupation".to_string(), FieldValue::from("astronaut"));
    let sink = CollectingSink::new();

    let results = QuoteCalculator::new(&config).with_sink(&sink).calculate_all(&values);
    assert_eq!(scalar(&results, "mainPremium"), 0.0);
    assert_eq!(scalar(&results, "totalPremium"), 0.0);
    // lookup misses are not diagnostics
    assert!(sink.is_empty());
}

#[test]
fn personal_accident_trace() {
    let config = load("personal-accident.json");
    let values = initial_field_values(&config);

    let trace = trace_formula(&config, &values, "mainPremium").unwrap();
    assert_eq!(
        trace.substituted,
        "ROUND(20 * 10000 * 0.000842 * 0.9 * 0.671 * 1.2, 2)"
    );
    assert_eq!(trace.result, vec![122.04]);

    let total = trace_formula(&config, &values, "totalPremium").unwrap();
    assert_eq!(total.substituted, "ROUND(122.04 + 47.5 + 19.7, 2)");
}

#[test]
fn calculation_does_not_mutate_config() {
    let config = load("personal-accident.json");
    let before = config.clone();
    let values = initial_field_values(&config);

    let first = calculate_all(&config, &values);
    let second = calculate_all(&config, &values);
    assert_eq!(config, before);
    assert_eq!(first, second);
}

// ========== Group accident (array formulas) ==========

#[test]
fn group_accident_broadcasts_per_row() {
    let config = load("group-accident.yaml");
    let mut values = initial_field_values(&config);
    values.extend(load_values(&test_data_path("group-members.yaml")).unwrap());

    let results = calculate_all(&config, &values);
    assert_eq!(vector(&results, "doubledHeadcount"), vec![10.0, 20.0, 6.0]);
    assert_eq!(vector(&results, "categoryPremium"), vec![25.0, 80.0, 36.0]);
    assert_eq!(scalar(&results, "headcount"), 18.0);
    assert_eq!(scalar(&results, "groupDiscount"), 0.95);
    assert_eq!(scalar(&results, "totalPremium"), 133.95);
}

#[test]
fn group_accident_defaults_use_min_items_rows() {
    let config = load("group-accident.yaml");
    let values = initial_field_values(&config);

    let results = calculate_all(&config, &values);
    assert_eq!(vector(&results, "categoryPremium"), vec![5.0]);
    assert_eq!(scalar(&results, "headcount"), 1.0);
    assert_eq!(scalar(&results, "totalPremium"), 5.0);
}

#[test]
fn group_accident_no_rows() {
    let config = load("group-accident.yaml");
    let mut values = initial_field_values(&config);
    values.insert("members".to_string(), FieldValue::List(vec![]));

    let results = calculate_all(&config, &values);
    assert_eq!(vector(&results, "categoryPremium"), Vec::<f64>::new());
    assert_eq!(scalar(&results, "headcount"), 0.0);
    assert_eq!(scalar(&results, "totalPremium"), 0.0);
}

// ========== Car insurance (comparisons, stale dependency cache) ==========

#[test]
fn car_insurance_defaults() {
    let config = load("car-insurance.yaml");
    let values = initial_field_values(&config);

    let results = calculate_all(&config, &values);
    assert_eq!(scalar(&results, "thirdPartyPremium"), 840.0);
    assert_eq!(scalar(&results, "damageInsurancePremium"), 1039.5);
    assert_eq!(scalar(&results, "commercialInsuranceTotal"), 1879.5);
    assert_eq!(scalar(&results, "compulsoryInsurance"), 950.0);
    assert_eq!(scalar(&results, "vehicleTax"), 660.0);
    assert_eq!(scalar(&results, "totalPremium"), 3489.5);
}

#[test]
fn car_insurance_without_commercial_cover() {
    let config = load("car-insurance.yaml");
    let mut values = initial_field_values(&config);
    values.insert("hasCommercialInsurance".to_string(), FieldValue::from("no"));
    values.insert("hasDamageInsurance".to_string(), FieldValue::from("no"));

    let results = calculate_all(&config, &values);
    assert_eq!(scalar(&results, "damageInsurancePremium"), 0.0);
    assert_eq!(scalar(&results, "commercialInsuranceTotal"), 0.0);
    assert_eq!(scalar(&results, "totalPremium"), 1610.0);
}

#[test]
fn car_insurance_high_risk_profile() {
    let config = load("car-insurance.yaml");
    let mut values = initial_field_values(&config);
    values.insert("cityLevel".to_string(), FieldValue::from("tier1"));
    values.insert("accidentCount".to_string(), FieldValue::from(2));
    values.insert("carValue".to_string(), FieldValue::from(30));
    values.insert("carAge".to_string(), FieldValue::from(5));

    let results = calculate_all(&config, &values);
    assert_eq!(scalar(&results, "thirdPartyPremium"), 1725.0);
    assert_eq!(scalar(&results, "damageInsurancePremium"), 4050.0);
    assert_eq!(scalar(&results, "vehicleTax"), 1200.0);
    assert_eq!(scalar(&results, "totalPremium"), 7925.0);
}

#[test]
fn stale_dependency_cache_does_not_break_ordering() {
    // Put the dependent formula first; its cache names no formulas at all
    let mut config = load("car-insurance.yaml");
    let total = config.formulas.pop().unwrap();
    config.formulas.insert(0, total);
    let values = initial_field_values(&config);

    let results = calculate_all(&config, &values);
    assert_eq!(scalar(&results, "totalPremium"), 3489.5);
}

// ========== Ordering and fail-soft behavior ==========

#[test]
fn order_puts_referenced_formulas_first() {
    for fixture in ["personal-accident.json", "group-accident.yaml", "car-insurance.yaml"] {
        let config = load(fixture);
        let ordered = order(&config.formulas, &NullSink);
        assert_eq!(ordered.len(), config.formulas.len());

        let position = |id: &str| ordered.iter().position(|f| f.id == id);
        for formula in &ordered {
            let refs = quoter_engine::parser::extract_references(&formula.expression);
            for dep in refs.formulas {
                assert!(
                    position(dep.as_str()) < position(formula.id.as_str()),
                    "{}: @{} must come before {}",
                    fixture,
                    dep,
                    formula.id
                );
            }
        }
    }
}

#[test]
fn cyclic_formulas_terminate_with_numbers() {
    let mut config = QuoterConfig::new("cyclic");
    config.formulas = vec![
        Formula::new("A", "@B * 2 + 1"),
        Formula::new("B", "@A + 10"),
        Formula::new("C", "@A + @B"),
    ];
    let sink = CollectingSink::new();

    let results = QuoteCalculator::new(&config)
        .with_sink(&sink)
        .calculate_all(&FieldValues::new());

    assert_eq!(scalar(&results, "B"), 10.0);
    assert_eq!(scalar(&results, "A"), 21.0);
    assert_eq!(scalar(&results, "C"), 31.0);
    assert!(sink
        .diagnostics()
        .iter()
        .any(|d| d.kind == DiagnosticKind::CircularDependency));
}

#[test]
fn malformed_formula_is_zero_and_others_unaffected() {
    let mut config = QuoterConfig::new("broken");
    config.formulas = vec![
        Formula::new("before", "$x * 3"),
        Formula::new("broken", "$x + )"),
        Formula::new("after", "@before + @broken + 1"),
    ];
    let mut values = FieldValues::new();
    values.insert("x".to_string(), FieldValue::from(2));
    let sink = CollectingSink::new();

    let results = QuoteCalculator::new(&config).with_sink(&sink).calculate_all(&values);
    assert_eq!(scalar(&results, "before"), 6.0);
    assert_eq!(scalar(&results, "broken"), 0.0);
    assert_eq!(scalar(&results, "after"), 7.0);

    let diags = sink.into_inner();
    assert_eq!(diags.len(), 1);
    assert_eq!(diags[0].kind, DiagnosticKind::Parse);
    assert_eq!(diags[0].formula_id.as_deref(), Some("broken"));
}

#[test]
fn round_lookup_example() {
    let mut config = QuoterConfig::new("example");
    config.coefficient_tables =
        vec![quoter_engine::types::CoefficientTable::new("t").with_row("r", [("c", 3.5)])];
    config.formulas = vec![Formula::new("result", "ROUND($a * LOOKUP(t, $r, $c), 2)")];

    let mut values = FieldValues::new();
    values.insert("a".to_string(), FieldValue::from(10));
    values.insert("r".to_string(), FieldValue::from("r"));
    values.insert("c".to_string(), FieldValue::from("c"));

    let results = QuoteCalculator::new(&config)
        .with_sink(&NullSink)
        .calculate_all(&values);
    assert_eq!(scalar(&results, "result"), 35.0);
}
