use clap::{Parser, Subcommand};
use quoter_engine::cli;
use quoter_engine::error::QuoterResult;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "quoter")]
#[command(about = "Evaluate insurance quoter formulas from the command line.")]
#[command(long_about = "Quoter - formula engine for insurance quote forms

Loads a quoter configuration (fields, coefficient tables, formulas) from
JSON or YAML and evaluates every formula in dependency order.

COMMANDS:
  calculate   - Evaluate all formulas for a set of field values
  validate    - Check configurations for problems
  audit       - Show how one formula got its value
  order       - Show evaluation order and circular dependencies
  watch       - Recalculate on file changes

EXAMPLES:
  quoter calculate accident.yaml --set age=42 --set gender=female
  quoter calculate group.json --values members.yaml --json
  quoter audit accident.yaml mainPremium
  quoter validate *.yaml

LOGGING:
  Diagnostics go through RUST_LOG (default: quoter_engine=warn).")]
#[command(version)]
struct Cli {
    /// Log debug output (per-formula evaluation)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    #[command(long_about = "Calculate all formulas in a quoter configuration.

Field values start from each field's defaultValue (array fields get
minItems rows), then the --values file is applied, then --set overrides.

Formulas that fail to evaluate come out as 0 and a diagnostic is printed.")]
    /// Calculate all formulas in a quoter configuration
    Calculate {
        /// Path to the configuration (.json, .yaml or .yml)
        config: PathBuf,

        /// Field values file (JSON or YAML mapping of field id to value)
        #[arg(long)]
        values: Option<PathBuf>,

        /// Override one field value (repeatable): --set age=42
        #[arg(short, long = "set", value_name = "ID=VALUE")]
        set: Vec<String>,

        /// Print results as JSON
        #[arg(long)]
        json: bool,

        /// Include formulas not marked showInResult
        #[arg(short, long)]
        all: bool,
    },

    /// Check quoter configurations for problems
    Validate {
        /// Configuration file(s) to validate
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Show the substitution trace for one formula
    Audit {
        /// Path to the configuration
        config: PathBuf,

        /// Formula id to audit
        formula: String,

        /// Field values file
        #[arg(long)]
        values: Option<PathBuf>,

        /// Override one field value (repeatable)
        #[arg(short, long = "set", value_name = "ID=VALUE")]
        set: Vec<String>,
    },

    /// Show formula evaluation order and circular dependencies
    Order {
        /// Path to the configuration
        config: PathBuf,
    },

    /// Watch the configuration (and values file) and recalculate on change
    Watch {
        /// Path to the configuration
        config: PathBuf,

        /// Field values file
        #[arg(long)]
        values: Option<PathBuf>,
    },
}

fn init_tracing(verbose: bool) {
    let default_filter = if verbose {
        "quoter_engine=debug"
    } else {
        "quoter_engine=warn"
    };
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default_filter.into()),
        )
        .init();
}

fn main() -> QuoterResult<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match cli.command {
        Commands::Calculate {
            config,
            values,
            set,
            json,
            all,
        } => cli::calculate(config, values, set, json, all),

        Commands::Validate { files } => cli::validate(files),

        Commands::Audit {
            config,
            formula,
            values,
            set,
        } => cli::audit(config, formula, values, set),

        Commands::Order { config } => cli::order_command(config),

        Commands::Watch { config, values } => cli::watch(config, values, cli.verbose),
    }
}
