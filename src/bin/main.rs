//! Strata CLI - Compile analytical query requests to native Druid queries
//!
//! Usage:
//!   strata compile <request.json> [--config <strata.toml>]
//!   strata decode <request.json> <response.json> [--header <header.json>]
//!   strata formula <expression> [--native]
//!
//! Examples:
//!   strata compile requests/revenue.json
//!   strata decode requests/revenue.json responses/revenue.json
//!   strata formula "(revenue - cost) / orders"
//!
//! Log output goes to stderr and is controlled by `STRATA_LOG`
//! (e.g. `STRATA_LOG=strata=debug`).

use clap::{Parser, Subcommand};
use serde_json::Value;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use strata::compile::compile_request;
use strata::config::Settings;
use strata::formula;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "strata")]
#[command(about = "Strata - Compile and optimize analytical queries for Druid")]
#[command(version)]
struct Cli {
    /// Settings file (defaults to STRATA_CONFIG, ./strata.toml, then the user config dir)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Compile a request to native query JSON
    Compile {
        /// Path to the request JSON
        request: PathBuf,
    },

    /// Decode a datastore response for a request
    Decode {
        /// Path to the request JSON the response answers
        request: PathBuf,

        /// Path to the response JSON
        response: PathBuf,

        /// JSON array naming the columns of array-shaped rows
        #[arg(long)]
        header: Option<PathBuf>,
    },

    /// Compile a single formula to a post-aggregator
    Formula {
        /// The formula text
        expression: String,

        /// Validate only and emit a native expression post-aggregator
        #[arg(long)]
        native: bool,
    },
}

fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("STRATA_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let settings = match load_settings(cli.config.as_deref()) {
        Ok(s) => s,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match cli.command {
        Commands::Compile { request } => cmd_compile(&settings, request),
        Commands::Decode {
            request,
            response,
            header,
        } => cmd_decode(&settings, request, response, header),
        Commands::Formula { expression, native } => cmd_formula(&expression, native),
    }
}

fn load_settings(path: Option<&Path>) -> Result<Settings, strata::config::SettingsError> {
    match path {
        Some(path) => Settings::from_file(path),
        None => Settings::load(),
    }
}

fn read_file(path: &Path) -> Option<String> {
    match fs::read_to_string(path) {
        Ok(s) => Some(s),
        Err(e) => {
            eprintln!("Error reading file '{}': {}", path.display(), e);
            None
        }
    }
}

fn read_json(path: &Path) -> Option<Value> {
    let source = read_file(path)?;
    match serde_json::from_str(&source) {
        Ok(v) => Some(v),
        Err(e) => {
            eprintln!("Invalid JSON in '{}': {}", path.display(), e);
            None
        }
    }
}

fn print_json(value: &impl serde::Serialize) -> ExitCode {
    match serde_json::to_string_pretty(value) {
        Ok(s) => {
            println!("{}", s);
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Serialization error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_compile(settings: &Settings, request: PathBuf) -> ExitCode {
    let Some(source) = read_file(&request) else {
        return ExitCode::FAILURE;
    };

    let mut prepared = match compile_request(&source, settings) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    match prepared.serialize() {
        Ok(wire) => print_json(&wire),
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_decode(
    settings: &Settings,
    request: PathBuf,
    response: PathBuf,
    header: Option<PathBuf>,
) -> ExitCode {
    let Some(source) = read_file(&request) else {
        return ExitCode::FAILURE;
    };
    let Some(body) = read_json(&response) else {
        return ExitCode::FAILURE;
    };
    let header: Option<Vec<String>> = match header {
        Some(path) => {
            let Some(value) = read_json(&path) else {
                return ExitCode::FAILURE;
            };
            match serde_json::from_value(value) {
                Ok(h) => Some(h),
                Err(e) => {
                    eprintln!("Invalid header in '{}': {}", path.display(), e);
                    return ExitCode::FAILURE;
                }
            }
        }
        None => None,
    };

    let mut prepared = match compile_request(&source, settings) {
        Ok(p) => p,
        Err(e) => {
            eprintln!("Compilation error: {}", e);
            return ExitCode::FAILURE;
        }
    };

    let rows = prepared
        .serialize()
        .and_then(|_| prepared.parse_response(&body, header.as_deref()));

    match rows {
        Ok(rows) => print_json(&rows),
        Err(e) => {
            eprintln!("Decode error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn cmd_formula(expression: &str, native: bool) -> ExitCode {
    let result = if native {
        formula::compile_native(expression)
    } else {
        formula::compile(expression)
    };

    match result {
        Ok(post) => print_json(&post.to_druid("formula")),
        Err(e) => {
            eprintln!("Formula error: {}", e);
            ExitCode::FAILURE
        }
    }
}
