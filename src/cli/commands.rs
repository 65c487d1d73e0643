use crate::core::{cycle_groups, order, QuoteCalculator};
use crate::diagnostics::{CollectingSink, Diagnostic, NullSink};
use crate::error::{QuoterError, QuoterResult};
use crate::parser::{self, ConfigWarning};
use crate::types::{FieldValue, FieldValues, FormulaResult, QuoterConfig};
use colored::Colorize;
use notify::RecursiveMode;
use notify_debouncer_mini::{new_debouncer, DebouncedEventKind};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::mpsc::channel;
use std::time::Duration;

/// Format a number for display, removing unnecessary decimal places
fn format_number(n: f64) -> String {
    // Round to 6 decimal places for display
    let rounded = (n * 1e6).round() / 1e6;
    format!("{:.6}", rounded)
        .trim_end_matches('0')
        .trim_end_matches('.')
        .to_string()
}

fn format_result(result: &FormulaResult) -> String {
    match result {
        FormulaResult::Scalar(n) => format_number(*n),
        FormulaResult::Vector(values) => {
            let parts: Vec<String> = values.iter().map(|n| format_number(*n)).collect();
            format!("[{}]", parts.join(", "))
        }
    }
}

/// Parse a `--set id=value` override
pub fn parse_set(raw: &str) -> QuoterResult<(String, FieldValue)> {
    let (id, value) = raw.split_once('=').ok_or_else(|| {
        QuoterError::Parse(format!("Invalid --set '{}': expected id=value", raw))
    })?;
    let id = id.trim();
    if id.is_empty() {
        return Err(QuoterError::Parse(format!(
            "Invalid --set '{}': field id is empty",
            raw
        )));
    }
    Ok((id.to_string(), FieldValue::parse_loose(value)))
}

/// Configuration plus the field values to calculate with: defaults, then the
/// values file, then `--set` overrides
fn load_inputs(
    config_path: &Path,
    values_path: Option<&Path>,
    overrides: &[String],
) -> QuoterResult<(QuoterConfig, FieldValues)> {
    let config = parser::load_config(config_path)?;
    let mut values = parser::initial_field_values(&config);

    if let Some(path) = values_path {
        values.extend(parser::load_values(path)?);
    }
    for raw in overrides {
        let (id, value) = parse_set(raw)?;
        values.insert(id, value);
    }

    Ok((config, values))
}

fn print_diagnostics(diagnostics: &[Diagnostic]) {
    if diagnostics.is_empty() {
        return;
    }
    eprintln!("{}", format!("⚠️  {} diagnostic(s):", diagnostics.len()).yellow());
    for diagnostic in diagnostics {
        eprintln!("   {}", diagnostic.to_string().yellow());
    }
}

fn print_warnings(warnings: &[ConfigWarning]) {
    for warning in warnings {
        println!(
            "   {} {}: {}",
            "⚠️".yellow(),
            warning.subject.bright_blue(),
            warning.message.yellow()
        );
    }
}

/// Execute the calculate command
pub fn calculate(
    config_path: PathBuf,
    values_path: Option<PathBuf>,
    overrides: Vec<String>,
    json: bool,
    all: bool,
) -> QuoterResult<()> {
    let (config, values) = load_inputs(&config_path, values_path.as_deref(), &overrides)?;

    let sink = CollectingSink::new();
    let results = QuoteCalculator::new(&config).with_sink(&sink).calculate_all(&values);

    let shown: Vec<_> = config
        .formulas
        .iter()
        .filter(|f| all || f.show_in_result)
        .filter_map(|f| results.get(&f.id).map(|r| (f, r)))
        .collect();

    if json {
        let map: BTreeMap<&str, &FormulaResult> =
            shown.iter().map(|(f, r)| (f.id.as_str(), *r)).collect();
        println!("{}", serde_json::to_string_pretty(&map)?);
        print_diagnostics(&sink.into_inner());
        return Ok(());
    }

    println!("{}", "🧮 Quoter - Calculation Results".bold().green());
    println!("   Config: {}", config_path.display());
    if !config.title.is_empty() {
        println!("   Quoter: {}", config.title.bright_yellow());
    }
    println!();

    for (formula, result) in &shown {
        let label = formula
            .name
            .as_deref()
            .map(|name| format!(" ({})", name))
            .unwrap_or_default();
        let unit = formula
            .unit
            .as_deref()
            .map(|u| format!(" {}", u))
            .unwrap_or_default();
        println!(
            "   {}{} = {}{}",
            formula.id.bright_blue(),
            label,
            format_result(result).bold(),
            unit
        );
    }
    if shown.is_empty() {
        println!("   {}", "No formulas to show (use --all)".yellow());
    }
    println!();

    print_diagnostics(&sink.into_inner());
    Ok(())
}

/// Execute the validate command
pub fn validate(files: Vec<PathBuf>) -> QuoterResult<()> {
    let mut failed = Vec::new();

    for file in &files {
        println!("{}", "✅ Validating quoter".bold().green());
        println!("   File: {}", file.display());

        match parser::load_config(file) {
            Ok(config) => {
                println!(
                    "   Found {} fields, {} tables, {} formulas",
                    config.fields.len(),
                    config.coefficient_tables.len(),
                    config.formulas.len()
                );
                let warnings = parser::validate_config(&config);
                if warnings.is_empty() {
                    println!("{}", "   No problems found".green());
                } else {
                    println!(
                        "{}",
                        format!("   {} warning(s):", warnings.len()).yellow()
                    );
                    print_warnings(&warnings);
                }
            }
            Err(e) => {
                println!("{}", format!("❌ {}", e).bold().red());
                failed.push(file.display().to_string());
            }
        }
        println!();
    }

    if failed.is_empty() {
        Ok(())
    } else {
        Err(QuoterError::Validation(format!(
            "{} of {} file(s) failed to load: {}",
            failed.len(),
            files.len(),
            failed.join(", ")
        )))
    }
}

/// Execute the audit command - show how one formula got its value
pub fn audit(
    config_path: PathBuf,
    formula_id: String,
    values_path: Option<PathBuf>,
    overrides: Vec<String>,
) -> QuoterResult<()> {
    let (config, values) = load_inputs(&config_path, values_path.as_deref(), &overrides)?;

    let trace = QuoteCalculator::new(&config)
        .with_sink(&NullSink)
        .trace(&values, &formula_id)
        .ok_or_else(|| QuoterError::Validation(format!("Formula '{}' not found", formula_id)))?;

    println!("{}", "🔍 Quoter - Audit Trail".bold().green());
    println!("   Config: {}", config_path.display());
    println!("   Formula: {}\n", trace.formula_id.bright_blue().bold());

    println!("{}", "📋 Expression:".bold().cyan());
    println!("   {}", trace.original.bright_yellow());
    println!("   = {}", trace.substituted.yellow());
    let result = match trace.result.as_slice() {
        [single] => format_number(*single),
        many => format_result(&FormulaResult::Vector(many.to_vec())),
    };
    println!("   = {}\n", result.bold().green());

    println!("{}", "🌳 Inputs:".bold().cyan());
    if trace.dependencies.is_empty() {
        println!("   No references (literal expression)");
    }
    for dep in &trace.dependencies {
        println!("   └─ {} = {}", dep.reference.bright_blue(), dep.value.green());
    }
    println!();

    if !trace.diagnostics.is_empty() {
        println!("{}", "⚠️  Diagnostics:".bold().yellow());
        for diagnostic in &trace.diagnostics {
            println!("   {}", diagnostic.to_string().yellow());
        }
        println!();
    }

    println!("{}", "✅ Audit complete".bold().green());
    Ok(())
}

/// Execute the order command - print evaluation order and cycles
pub fn order_command(config_path: PathBuf) -> QuoterResult<()> {
    let config = parser::load_config(&config_path)?;

    println!("{}", "🔗 Quoter - Evaluation Order".bold().green());
    println!("   Config: {}\n", config_path.display());

    for (i, formula) in order(&config.formulas, &NullSink).iter().enumerate() {
        let marker = if formula.is_array_formula() { " [array]" } else { "" };
        println!(
            "   {:>3}. {}{}  {}",
            i + 1,
            formula.id.bright_blue(),
            marker.cyan(),
            formula.expression.dimmed()
        );
    }

    let groups = cycle_groups(&config.formulas);
    if !groups.is_empty() {
        println!();
        println!("{}", "⚠️  Circular dependencies:".bold().yellow());
        for group in &groups {
            println!("   {}", group.join(" <-> ").yellow());
        }
    }
    Ok(())
}

/// Execute the watch command - recalculate when the config or values change
pub fn watch(config_path: PathBuf, values_path: Option<PathBuf>, verbose: bool) -> QuoterResult<()> {
    println!("{}", "👁️  Quoter - Watch Mode".bold().green());
    println!("   Watching: {}", config_path.display());
    if let Some(path) = &values_path {
        println!("   Values: {}", path.display());
    }
    println!("   Press {} to stop\n", "Ctrl+C".bold().yellow());

    let mut watched = vec![config_path.clone()];
    watched.extend(values_path.iter().cloned());

    let mut canonical_paths = Vec::new();
    for path in &watched {
        if !path.exists() {
            return Err(QuoterError::Watch(format!(
                "File not found: {}",
                path.display()
            )));
        }
        canonical_paths.push(path.canonicalize()?);
    }

    let (tx, rx) = channel();

    // Debounce so an editor save triggers one recalculation
    let mut debouncer = new_debouncer(Duration::from_millis(200), tx)
        .map_err(|e| QuoterError::Watch(format!("Failed to create file watcher: {}", e)))?;

    for path in &canonical_paths {
        let parent_dir = path
            .parent()
            .ok_or_else(|| QuoterError::Watch("Cannot determine parent directory".to_string()))?;
        debouncer
            .watcher()
            .watch(parent_dir, RecursiveMode::NonRecursive)
            .map_err(|e| QuoterError::Watch(format!("Failed to watch directory: {}", e)))?;
        if verbose {
            println!("   {} {}", "Watching directory:".cyan(), parent_dir.display());
        }
    }

    println!("{}", "🔄 Initial run...".cyan());
    run_watch_action(&config_path, values_path.as_deref());
    println!();

    loop {
        match rx.recv() {
            Ok(Ok(events)) => {
                let relevant = events.iter().any(|event| {
                    event.kind == DebouncedEventKind::Any
                        && event
                            .path
                            .canonicalize()
                            .map(|p| canonical_paths.contains(&p))
                            .unwrap_or(false)
                });

                if relevant {
                    println!(
                        "\n{} {}",
                        "🔄 Change detected at".cyan(),
                        chrono_lite_timestamp().cyan()
                    );
                    run_watch_action(&config_path, values_path.as_deref());
                    println!();
                }
            }
            Ok(Err(error)) => {
                eprintln!("{} Watch error: {}", "❌".red(), error);
            }
            Err(e) => {
                eprintln!("{} Channel error: {}", "❌".red(), e);
                break;
            }
        }
    }

    Ok(())
}

/// Get a simple timestamp without external dependencies
fn chrono_lite_timestamp() -> String {
    use std::time::SystemTime;
    let now = SystemTime::now()
        .duration_since(SystemTime::UNIX_EPOCH)
        .unwrap_or_default();
    let secs = now.as_secs();
    let hours = (secs / 3600) % 24;
    let minutes = (secs / 60) % 60;
    let seconds = secs % 60;
    format!("{:02}:{:02}:{:02} UTC", hours, minutes, seconds)
}

/// One recalculation for watch mode; errors are printed, never fatal
fn run_watch_action(config_path: &Path, values_path: Option<&Path>) {
    match calculate_internal(config_path, values_path) {
        Ok(lines) => {
            for line in lines {
                println!("   {}", line);
            }
            println!("{}", "✅ Calculation complete".bold().green());
        }
        Err(e) => println!("{} {}", "❌ Calculation failed:".bold().red(), e),
    }
}

/// Calculate and render `id = value` lines for the shown formulas
fn calculate_internal(config_path: &Path, values_path: Option<&Path>) -> QuoterResult<Vec<String>> {
    let (config, values) = load_inputs(config_path, values_path, &[])?;

    let sink = CollectingSink::new();
    let results = QuoteCalculator::new(&config).with_sink(&sink).calculate_all(&values);
    print_diagnostics(&sink.into_inner());

    Ok(config
        .formulas
        .iter()
        .filter(|f| f.show_in_result)
        .filter_map(|f| {
            results
                .get(&f.id)
                .map(|r| format!("{} = {}", f.id, format_result(r)))
        })
        .collect())
}

#[cfg(test)]
#[path = "commands_tests.rs"]
mod tests;
