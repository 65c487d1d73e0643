//! Loading and checking quoter configurations
//!
//! Configurations and field-value files are JSON or YAML. Configurations are
//! checked against the embedded JSON Schema before being deserialized.

use crate::core::expression::{compile, Expr, Reference};
use crate::core::resolver::cycle_groups;
use crate::error::{QuoterError, QuoterResult};
use crate::types::{FieldType, FieldValue, FieldValues, QuoterConfig};
use jsonschema::JSONSchema;
use regex::Regex;
use serde::de::DeserializeOwned;
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::path::Path;
use std::sync::OnceLock;

//==============================================================================
// Files
//==============================================================================

/// On-disk document format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocumentFormat {
    Json,
    Yaml,
}

impl DocumentFormat {
    /// Format by file extension; `None` when the extension is not recognised
    pub fn from_path(path: &Path) -> Option<Self> {
        let ext = path.extension()?.to_str()?.to_ascii_lowercase();
        match ext.as_str() {
            "json" => Some(DocumentFormat::Json),
            "yaml" | "yml" => Some(DocumentFormat::Yaml),
            _ => None,
        }
    }
}

/// Parse a document into a JSON value. Without a known format JSON is tried
/// first, then YAML.
fn parse_document(content: &str, format: Option<DocumentFormat>) -> QuoterResult<serde_json::Value> {
    match format {
        Some(DocumentFormat::Json) => Ok(serde_json::from_str(content)?),
        Some(DocumentFormat::Yaml) => Ok(serde_yaml::from_str(content)?),
        None => match serde_json::from_str(content) {
            Ok(value) => Ok(value),
            Err(_) => Ok(serde_yaml::from_str(content)?),
        },
    }
}

fn from_document<T: DeserializeOwned>(document: serde_json::Value, what: &str) -> QuoterResult<T> {
    serde_json::from_value(document)
        .map_err(|e| QuoterError::Parse(format!("Invalid {}: {}", what, e)))
}

/// Load a quoter configuration from a `.json`, `.yaml` or `.yml` file.
///
/// # Example
/// ```no_run
/// use quoter_engine::parser::load_config;
/// use std::path::Path;
///
/// let config = load_config(Path::new("personal-accident.yaml"))?;
/// println!("Formulas: {}", config.formulas.len());
/// # Ok::<(), quoter_engine::error::QuoterError>(())
/// ```
pub fn load_config(path: &Path) -> QuoterResult<QuoterConfig> {
    let content = std::fs::read_to_string(path)?;
    let config = parse_config(&content, DocumentFormat::from_path(path))?;
    tracing::debug!(
        path = %path.display(),
        fields = config.fields.len(),
        tables = config.coefficient_tables.len(),
        formulas = config.formulas.len(),
        "loaded configuration"
    );
    Ok(config)
}

/// Parse and schema-check configuration text
pub fn parse_config(content: &str, format: Option<DocumentFormat>) -> QuoterResult<QuoterConfig> {
    let document = parse_document(content, format)?;
    validate_against_schema(&document)?;
    from_document(document, "configuration")
}

/// Load a field-value map (field id -> value) from JSON or YAML
pub fn load_values(path: &Path) -> QuoterResult<FieldValues> {
    let content = std::fs::read_to_string(path)?;
    parse_values(&content, DocumentFormat::from_path(path))
}

pub fn parse_values(content: &str, format: Option<DocumentFormat>) -> QuoterResult<FieldValues> {
    match parse_document(content, format)? {
        serde_json::Value::Null => Ok(FieldValues::new()),
        document @ serde_json::Value::Object(_) => from_document(document, "field values"),
        _ => Err(QuoterError::Parse(
            "Field values must be a mapping of field id to value".to_string(),
        )),
    }
}

/// Validate a configuration document against the quoter JSON Schema
fn validate_against_schema(document: &serde_json::Value) -> QuoterResult<()> {
    let schema_str = include_str!("../../schema/quoter-config.schema.json");
    let schema_value: serde_json::Value = serde_json::from_str(schema_str)
        .map_err(|e| QuoterError::Validation(format!("Failed to parse schema: {}", e)))?;

    let compiled_schema = JSONSchema::compile(&schema_value)
        .map_err(|e| QuoterError::Validation(format!("Failed to compile schema: {}", e)))?;

    if let Err(errors) = compiled_schema.validate(document) {
        let error_messages: Vec<String> = errors.map(|e| format!("  - {}", e)).collect();
        return Err(QuoterError::Validation(format!(
            "Schema validation failed:\n{}",
            error_messages.join("\n")
        )));
    }

    Ok(())
}

//==============================================================================
// Dependencies
//==============================================================================

/// `$field` and `@formula` ids named in an expression, each list deduplicated
/// in order of first appearance
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExpressionReferences {
    pub fields: Vec<String>,
    pub formulas: Vec<String>,
}

fn reference_re() -> &'static Regex {
    static REFERENCE_RE: OnceLock<Regex> = OnceLock::new();
    REFERENCE_RE.get_or_init(|| {
        Regex::new(r"([$@])([A-Za-z0-9_]+)").expect("reference regex must compile")
    })
}

/// Scan an expression for `$id` and `@id` references.
///
/// This is a textual scan: it works on expressions that do not parse.
pub fn extract_references(expression: &str) -> ExpressionReferences {
    let mut refs = ExpressionReferences::default();
    for cap in reference_re().captures_iter(expression) {
        let target = if &cap[1] == "$" {
            &mut refs.fields
        } else {
            &mut refs.formulas
        };
        let id = cap[2].to_string();
        if !target.contains(&id) {
            target.push(id);
        }
    }
    refs
}

/// Dependency list as cached on a formula: field ids first, then formula ids
pub fn extract_dependencies(expression: &str) -> Vec<String> {
    let refs = extract_references(expression);
    let mut deps = refs.fields;
    for id in refs.formulas {
        if !deps.contains(&id) {
            deps.push(id);
        }
    }
    deps
}

//==============================================================================
// Initial values
//==============================================================================

/// Starting field values for a fresh form.
///
/// Every field with a default contributes it. An array field without a
/// default gets `minItems` rows built from its item fields' defaults (empty
/// text where an item field has none).
pub fn initial_field_values(config: &QuoterConfig) -> FieldValues {
    let mut values = FieldValues::new();

    for field in &config.fields {
        if let Some(default) = &field.default_value {
            values.insert(field.id.clone(), default.clone());
            continue;
        }

        if field.field_type == FieldType::Array {
            if let Some(array_config) = &field.array_config {
                let row = FieldValue::Record(
                    array_config
                        .item_fields
                        .iter()
                        .map(|item| {
                            let value = item
                                .default_value
                                .clone()
                                .unwrap_or_else(|| FieldValue::Text(String::new()));
                            (item.id.clone(), value)
                        })
                        .collect(),
                );
                values.insert(
                    field.id.clone(),
                    FieldValue::List(vec![row; array_config.min_items]),
                );
            }
        }
    }

    values
}

//==============================================================================
// Validation
//==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningKind {
    MultipleArrayFields,
    ArrayFormulaWithoutArrayField,
    UnknownField,
    UnknownFormula,
    UnknownTable,
    StaleDependencies,
    DuplicateId,
    InvalidExpression,
    CircularDependency,
}

/// A non-fatal problem found in a configuration
#[derive(Debug, Clone, PartialEq)]
pub struct ConfigWarning {
    pub kind: WarningKind,
    /// Formula, field or table id the warning is about
    pub subject: String,
    pub message: String,
}

impl ConfigWarning {
    fn new(kind: WarningKind, subject: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind,
            subject: subject.into(),
            message: message.into(),
        }
    }
}

impl fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.subject, self.message)
    }
}

fn duplicate_ids<'a>(ids: impl Iterator<Item = &'a str>) -> Vec<&'a str> {
    let mut seen = HashSet::new();
    let mut duplicates = Vec::new();
    for id in ids {
        if !seen.insert(id) && !duplicates.contains(&id) {
            duplicates.push(id);
        }
    }
    duplicates
}

/// Table ids named literally as the first argument of `LOOKUP(...)` calls
fn lookup_table_names(expr: &Expr, out: &mut Vec<String>) {
    match expr {
        Expr::FunctionCall { name, args } => {
            if name.eq_ignore_ascii_case("LOOKUP") {
                match args.first() {
                    Some(Expr::Reference(Reference::Name(id))) | Some(Expr::Text(id)) => {
                        out.push(id.clone());
                    }
                    _ => {}
                }
            }
            for arg in args {
                lookup_table_names(arg, out);
            }
        }
        Expr::BinaryOp { left, right, .. } => {
            lookup_table_names(left, out);
            lookup_table_names(right, out);
        }
        Expr::UnaryOp { operand, .. } => lookup_table_names(operand, out),
        Expr::Number(_) | Expr::Text(_) | Expr::Reference(_) => {}
    }
}

/// Check a configuration for problems that make results ambiguous or
/// surprising. Warnings never stop calculation.
pub fn validate_config(config: &QuoterConfig) -> Vec<ConfigWarning> {
    let mut warnings = Vec::new();

    let array_fields: Vec<&str> = config.array_fields().map(|f| f.id.as_str()).collect();
    if array_fields.len() > 1 {
        warnings.push(ConfigWarning::new(
            WarningKind::MultipleArrayFields,
            array_fields[0],
            format!(
                "{} array fields ({}); array formulas only broadcast over '{}'",
                array_fields.len(),
                array_fields.join(", "),
                array_fields[0]
            ),
        ));
    }

    for (what, ids) in [
        ("field", duplicate_ids(config.fields.iter().map(|f| f.id.as_str()))),
        ("formula", duplicate_ids(config.formulas.iter().map(|f| f.id.as_str()))),
        (
            "table",
            duplicate_ids(config.coefficient_tables.iter().map(|t| t.id.as_str())),
        ),
    ] {
        for id in ids {
            warnings.push(ConfigWarning::new(
                WarningKind::DuplicateId,
                id,
                format!("{} id is used more than once; the first definition wins", what),
            ));
        }
    }

    // Item fields of array fields are addressable as `$id` in row mode
    let mut field_ids: HashSet<&str> = HashSet::new();
    for field in &config.fields {
        field_ids.insert(field.id.as_str());
        if let Some(array_config) = &field.array_config {
            field_ids.extend(array_config.item_fields.iter().map(|f| f.id.as_str()));
        }
    }
    let formula_ids: HashSet<&str> = config.formulas.iter().map(|f| f.id.as_str()).collect();
    let table_ids: HashSet<&str> = config.coefficient_tables.iter().map(|t| t.id.as_str()).collect();

    for formula in &config.formulas {
        let id = formula.id.as_str();

        if formula.is_array_formula() && array_fields.is_empty() {
            warnings.push(ConfigWarning::new(
                WarningKind::ArrayFormulaWithoutArrayField,
                id,
                "marked as an array formula but there is no array field; it is evaluated as a scalar",
            ));
        }

        match compile(&formula.expression) {
            Ok(Some(ast)) => {
                let mut tables = Vec::new();
                lookup_table_names(&ast, &mut tables);
                for table in tables {
                    if !table_ids.contains(table.as_str()) {
                        warnings.push(ConfigWarning::new(
                            WarningKind::UnknownTable,
                            id,
                            format!("LOOKUP uses unknown table '{}' (always 0)", table),
                        ));
                    }
                }
            }
            Ok(None) => {}
            Err(e) => warnings.push(ConfigWarning::new(
                WarningKind::InvalidExpression,
                id,
                format!("expression does not parse ({}); it always evaluates to 0", e),
            )),
        }

        let refs = extract_references(&formula.expression);

        for field in refs.fields.iter().filter(|f| !field_ids.contains(f.as_str())) {
            warnings.push(ConfigWarning::new(
                WarningKind::UnknownField,
                id,
                format!("references unknown field '${}'", field),
            ));
        }
        for other in refs.formulas.iter().filter(|f| !formula_ids.contains(f.as_str())) {
            warnings.push(ConfigWarning::new(
                WarningKind::UnknownFormula,
                id,
                format!("references unknown formula '@{}'", other),
            ));
        }

        if !formula.dependencies.is_empty() {
            let cached: BTreeSet<&str> = formula.dependencies.iter().map(String::as_str).collect();
            let scanned: BTreeSet<&str> = refs
                .fields
                .iter()
                .chain(refs.formulas.iter())
                .map(String::as_str)
                .collect();
            if cached != scanned {
                warnings.push(ConfigWarning::new(
                    WarningKind::StaleDependencies,
                    id,
                    format!(
                        "cached dependencies [{}] differ from the expression [{}]",
                        cached.into_iter().collect::<Vec<_>>().join(", "),
                        scanned.into_iter().collect::<Vec<_>>().join(", ")
                    ),
                ));
            }
        }
    }

    for group in cycle_groups(&config.formulas) {
        warnings.push(ConfigWarning::new(
            WarningKind::CircularDependency,
            group[0].clone(),
            format!(
                "circular dependency between {}; values depend on evaluation order",
                group.join(", ")
            ),
        ));
    }

    warnings
}
