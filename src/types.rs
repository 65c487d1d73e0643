use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

//==============================================================================
// Field values
//==============================================================================

/// A value entered into the quoter form.
///
/// Array fields hold a `List` of `Record`s, one record per repeated-group row,
/// keyed by item field id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    Null,
    Bool(bool),
    Number(f64),
    Text(String),
    List(Vec<FieldValue>),
    Record(BTreeMap<String, FieldValue>),
}

impl FieldValue {
    /// Build a record from `(item field id, value)` pairs
    pub fn record<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<FieldValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        FieldValue::Record(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    pub fn as_list(&self) -> Option<&[FieldValue]> {
        match self {
            FieldValue::List(items) => Some(items),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&BTreeMap<String, FieldValue>> {
        match self {
            FieldValue::Record(map) => Some(map),
            _ => None,
        }
    }

    /// Parse a command-line style value: finite numbers become numbers, the rest text
    pub fn parse_loose(raw: &str) -> Self {
        match raw.trim().parse::<f64>() {
            Ok(n) if n.is_finite() => FieldValue::Number(n),
            _ => FieldValue::Text(raw.to_string()),
        }
    }
}

impl From<f64> for FieldValue {
    fn from(n: f64) -> Self {
        FieldValue::Number(n)
    }
}

impl From<i32> for FieldValue {
    fn from(n: i32) -> Self {
        FieldValue::Number(f64::from(n))
    }
}

impl From<bool> for FieldValue {
    fn from(b: bool) -> Self {
        FieldValue::Bool(b)
    }
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        FieldValue::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        FieldValue::Text(s)
    }
}

impl From<Vec<FieldValue>> for FieldValue {
    fn from(items: Vec<FieldValue>) -> Self {
        FieldValue::List(items)
    }
}

/// Current form input, keyed by field id
pub type FieldValues = HashMap<String, FieldValue>;

//==============================================================================
// Formula results
//==============================================================================

/// Result of one formula: a scalar, or one number per array row for array formulas
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FormulaResult {
    Scalar(f64),
    Vector(Vec<f64>),
}

impl FormulaResult {
    pub fn as_scalar(&self) -> Option<f64> {
        match self {
            FormulaResult::Scalar(n) => Some(*n),
            FormulaResult::Vector(_) => None,
        }
    }

    pub fn as_vector(&self) -> Option<&[f64]> {
        match self {
            FormulaResult::Vector(v) => Some(v),
            FormulaResult::Scalar(_) => None,
        }
    }
}

/// Formula id -> result, rebuilt on every calculation pass
pub type ResultMap = HashMap<String, FormulaResult>;

//==============================================================================
// Configuration
//==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FieldType {
    Text,
    Number,
    Select,
    Radio,
    Array,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldOption {
    pub label: String,
    pub value: FieldValue,
}

/// Repeated-group settings for `FieldType::Array`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArrayConfig {
    #[serde(default)]
    pub min_items: usize,
    #[serde(default = "default_max_items")]
    pub max_items: usize,
    #[serde(default)]
    pub item_fields: Vec<Field>,
}

fn default_max_items() -> usize {
    100
}

/// A form field. Only `id`, `field_type`, `default_value` and `array_config`
/// matter to the engine; the rest is authoring metadata kept for round-trips.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Field {
    pub id: String,
    #[serde(rename = "type")]
    pub field_type: FieldType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub label: Option<String>,
    #[serde(default)]
    pub required: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<Vec<FieldOption>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub suffix: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tooltip: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_value: Option<FieldValue>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_config: Option<ArrayConfig>,
}

impl Field {
    pub fn new(id: impl Into<String>, field_type: FieldType) -> Self {
        Self {
            id: id.into(),
            field_type,
            name: None,
            label: None,
            required: false,
            options: None,
            min: None,
            max: None,
            suffix: None,
            tooltip: None,
            default_value: None,
            array_config: None,
        }
    }

    pub fn with_default(mut self, value: impl Into<FieldValue>) -> Self {
        self.default_value = Some(value.into());
        self
    }

    pub fn with_array_config(mut self, config: ArrayConfig) -> Self {
        self.array_config = Some(config);
        self
    }

    pub fn is_array(&self) -> bool {
        self.field_type == FieldType::Array
    }
}

/// A 2-D rate table: row key -> column key -> coefficient
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoefficientTable {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub row_key_name: String,
    #[serde(default)]
    pub col_key_name: String,
    #[serde(default)]
    pub data: BTreeMap<String, BTreeMap<String, f64>>,
}

impl CoefficientTable {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            row_key_name: String::new(),
            col_key_name: String::new(),
            data: BTreeMap::new(),
        }
    }

    /// Builder: add (or replace) a full row
    pub fn with_row<'a, I>(mut self, row: &str, cells: I) -> Self
    where
        I: IntoIterator<Item = (&'a str, f64)>,
    {
        let cells = cells
            .into_iter()
            .map(|(col, v)| (col.to_string(), v))
            .collect();
        self.data.insert(row.to_string(), cells);
        self
    }

    /// Set one cell, creating the row if needed
    pub fn set_cell(&mut self, row: &str, col: &str, value: f64) {
        self.data
            .entry(row.to_string())
            .or_default()
            .insert(col.to_string(), value);
    }

    /// Add an empty row carrying the column keys of the first existing row.
    /// Returns false if the row already exists.
    pub fn add_row(&mut self, row: &str) -> bool {
        if self.data.contains_key(row) {
            return false;
        }
        let cols: BTreeMap<String, f64> = self
            .data
            .values()
            .next()
            .map(|first| first.keys().map(|k| (k.clone(), 0.0)).collect())
            .unwrap_or_default();
        self.data.insert(row.to_string(), cols);
        true
    }

    /// Add a column with value 0 to every row
    pub fn add_column(&mut self, col: &str) {
        for cells in self.data.values_mut() {
            cells.insert(col.to_string(), 0.0);
        }
    }

    pub fn remove_row(&mut self, row: &str) -> bool {
        self.data.remove(row).is_some()
    }

    /// Remove a column from every row; returns how many rows had it
    pub fn remove_column(&mut self, col: &str) -> usize {
        self.data
            .values_mut()
            .filter_map(|cells| cells.remove(col))
            .count()
    }
}

/// A named computed value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Formula {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub expression: String,
    /// Cached `$field` / `@formula` ids scanned from `expression`; may be stale
    #[serde(default)]
    pub dependencies: Vec<String>,
    #[serde(default)]
    pub show_in_result: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub array_formula: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub unit: Option<String>,
}

impl Formula {
    pub fn new(id: impl Into<String>, expression: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
            description: None,
            expression: expression.into(),
            dependencies: Vec::new(),
            show_in_result: true,
            array_formula: None,
            unit: None,
        }
    }

    pub fn with_dependencies<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = deps.into_iter().map(Into::into).collect();
        self
    }

    pub fn array(mut self) -> Self {
        self.array_formula = Some(true);
        self
    }

    pub fn is_array_formula(&self) -> bool {
        self.array_formula.unwrap_or(false)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Section {
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub field_ids: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub collapsible: Option<bool>,
}

/// A complete quoter definition as produced by the authoring tool
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QuoterConfig {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fields: Vec<Field>,
    #[serde(default)]
    pub coefficient_tables: Vec<CoefficientTable>,
    #[serde(default)]
    pub formulas: Vec<Formula>,
    #[serde(default)]
    pub sections: Vec<Section>,
}

impl QuoterConfig {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            ..Self::default()
        }
    }

    pub fn field(&self, id: &str) -> Option<&Field> {
        self.fields.iter().find(|f| f.id == id)
    }

    pub fn formula(&self, id: &str) -> Option<&Formula> {
        self.formulas.iter().find(|f| f.id == id)
    }

    pub fn table(&self, id: &str) -> Option<&CoefficientTable> {
        self.coefficient_tables.iter().find(|t| t.id == id)
    }

    pub fn table_mut(&mut self, id: &str) -> Option<&mut CoefficientTable> {
        self.coefficient_tables.iter_mut().find(|t| t.id == id)
    }

    /// Array-typed fields in declaration order
    pub fn array_fields(&self) -> impl Iterator<Item = &Field> {
        self.fields.iter().filter(|f| f.is_array())
    }

    /// Regenerate every formula's cached `dependencies` from its expression
    pub fn refresh_dependencies(&mut self) {
        for formula in &mut self.formulas {
            formula.dependencies = crate::parser::extract_dependencies(&formula.expression);
        }
    }
}
