//! CLI command handlers

pub mod commands;

pub use commands::{audit, calculate, order_command, parse_set, validate, watch};
