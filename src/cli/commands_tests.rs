use super::*;
use std::io::Write;
use tempfile::TempDir;

const CONFIG_YAML: &str = r#"
id: pa
title: Personal accident
fields:
  - id: amount
    type: number
    defaultValue: 20
  - id: gender
    type: radio
    defaultValue: male
coefficientTables:
  - id: genderCoef
    rowKeyName: factor
    colKeyName: gender
    data:
      factor:
        male: 1.5
        female: 1.0
formulas:
  - id: base
    expression: "$amount * 10"
    showInResult: false
  - id: premium
    expression: "ROUND(@base * LOOKUP(genderCoef, 'factor', $gender), 2)"
    showInResult: true
    unit: CNY
"#;

fn write_file(dir: &TempDir, name: &str, content: &str) -> PathBuf {
    let path = dir.path().join(name);
    let mut file = std::fs::File::create(&path).unwrap();
    file.write_all(content.as_bytes()).unwrap();
    path
}

// =========================================================================
// format_number Tests
// =========================================================================

#[test]
fn test_format_number_integer() {
    assert_eq!(format_number(100.0), "100");
    assert_eq!(format_number(0.0), "0");
    assert_eq!(format_number(-50.0), "-50");
}

#[test]
fn test_format_number_decimal() {
    assert_eq!(format_number(122.0), "122");
    assert_eq!(format_number(0.671), "0.671");
    assert_eq!(format_number(-2.75), "-2.75");
}

#[test]
fn test_format_number_precision() {
    assert_eq!(format_number(0.123456789), "0.123457");
    assert_eq!(format_number(1.0000001), "1");
}

#[test]
fn test_format_result_vector() {
    assert_eq!(
        format_result(&FormulaResult::Vector(vec![10.0, 20.5, 6.0])),
        "[10, 20.5, 6]"
    );
    assert_eq!(format_result(&FormulaResult::Vector(vec![])), "[]");
}

// =========================================================================
// --set parsing
// =========================================================================

#[test]
fn test_parse_set_number_and_text() {
    assert_eq!(
        parse_set("age=42").unwrap(),
        ("age".to_string(), FieldValue::Number(42.0))
    );
    assert_eq!(
        parse_set("gender=female").unwrap(),
        ("gender".to_string(), FieldValue::Text("female".to_string()))
    );
    // only the first '=' splits
    assert_eq!(
        parse_set("note=a=b").unwrap(),
        ("note".to_string(), FieldValue::Text("a=b".to_string()))
    );
}

#[test]
fn test_parse_set_rejects_malformed() {
    assert!(parse_set("age").is_err());
    assert!(parse_set("=5").is_err());
}

// =========================================================================
// Inputs
// =========================================================================

#[test]
fn test_load_inputs_layers_defaults_file_and_overrides() {
    let dir = TempDir::new().unwrap();
    let config = write_file(&dir, "pa.yaml", CONFIG_YAML);
    let values = write_file(&dir, "values.json", r#"{"amount": 50, "gender": "female"}"#);

    let (_, merged) = load_inputs(&config, Some(&values), &["amount=70".to_string()]).unwrap();
    assert_eq!(merged["amount"], FieldValue::Number(70.0));
    assert_eq!(merged["gender"], FieldValue::Text("female".to_string()));
}

#[test]
fn test_calculate_internal_lists_shown_formulas() {
    let dir = TempDir::new().unwrap();
    let config = write_file(&dir, "pa.yaml", CONFIG_YAML);

    let lines = calculate_internal(&config, None).unwrap();
    assert_eq!(lines, vec!["premium = 300".to_string()]);
}

// =========================================================================
// Commands
// =========================================================================

#[test]
fn test_calculate_command() {
    let dir = TempDir::new().unwrap();
    let config = write_file(&dir, "pa.yaml", CONFIG_YAML);

    assert!(calculate(config.clone(), None, vec![], false, false).is_ok());
    assert!(calculate(config, None, vec!["gender=female".to_string()], true, true).is_ok());
}

#[test]
fn test_calculate_command_bad_override() {
    let dir = TempDir::new().unwrap();
    let config = write_file(&dir, "pa.yaml", CONFIG_YAML);

    let result = calculate(config, None, vec!["oops".to_string()], false, false);
    assert!(matches!(result, Err(QuoterError::Parse(_))));
}

#[test]
fn test_validate_command() {
    let dir = TempDir::new().unwrap();
    let good = write_file(&dir, "pa.yaml", CONFIG_YAML);
    let bad = write_file(&dir, "bad.yaml", "formulas:\n  - id: x\n");

    assert!(validate(vec![good.clone()]).is_ok());
    assert!(matches!(
        validate(vec![good, bad]),
        Err(QuoterError::Validation(_))
    ));
}

#[test]
fn test_audit_command() {
    let dir = TempDir::new().unwrap();
    let config = write_file(&dir, "pa.yaml", CONFIG_YAML);

    assert!(audit(config.clone(), "premium".to_string(), None, vec![]).is_ok());
    assert!(audit(config, "nope".to_string(), None, vec![]).is_err());
}

#[test]
fn test_order_command() {
    let dir = TempDir::new().unwrap();
    let config = write_file(&dir, "pa.yaml", CONFIG_YAML);
    assert!(order_command(config).is_ok());
}

#[test]
fn test_watch_missing_file() {
    let dir = TempDir::new().unwrap();
    let result = watch(dir.path().join("missing.yaml"), None, false);
    assert!(matches!(result, Err(QuoterError::Watch(_))));
}

// =========================================================================
// chrono_lite_timestamp Tests
// =========================================================================

#[test]
fn test_chrono_lite_timestamp_format() {
    let ts = chrono_lite_timestamp();
    assert!(ts.ends_with(" UTC"));
    assert_eq!(ts.len(), 12);
    assert_eq!(&ts[2..3], ":");
    assert_eq!(&ts[5..6], ":");
}
