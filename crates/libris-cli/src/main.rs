//! Libris CLI - Command Line Interface
//!
//! Runs the book catalog operations against an in-memory document engine and
//! prints their results as JSON.
//!
//! Subcommands:
//! - `run` performs every catalog step in order and prints the run report
//! - `page`, `aggregate` and `explain` seed a fresh catalog and run one step
//!
//! @version 0.1.0
//! @author Libris Development Team

use clap::{Parser, Subcommand, ValueEnum};
use libris_catalog::{CatalogRunner, EXPLAIN_AFTER_YEAR};
use libris_common::config::LibrisConfig;
use libris_common::{LibrisError, Result, SortDirection};
use libris_document::DocumentEngine;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

// =============================================================================
// CLI Arguments
// =============================================================================

#[derive(Parser)]
#[command(name = "libris")]
#[command(author = "Libris Development Team")]
#[command(version = "0.1.0")]
#[command(about = "Libris book catalog", long_about = None)]
struct Cli {
    /// TOML configuration file; defaults apply when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run every catalog step and print the report
    Run,
    /// Print one page of recent in-stock books ordered by price
    Page {
        #[arg(short, long, default_value_t = 1)]
        page: usize,
        #[arg(short, long)]
        descending: bool,
    },
    /// Print one of the catalog reports
    Aggregate {
        #[arg(value_enum)]
        report: Report,
    },
    /// Explain one of the catalog lookups
    Explain {
        #[arg(value_enum)]
        lookup: Lookup,
        /// Create the catalog indexes first
        #[arg(short, long)]
        indexes: bool,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Report {
    Genre,
    Author,
    Decade,
}

#[derive(Clone, Copy, ValueEnum)]
enum Lookup {
    Title,
    AuthorYear,
}

// =============================================================================
// Commands
// =============================================================================

fn load_config(path: Option<&Path>) -> Result<LibrisConfig> {
    match path {
        Some(path) => LibrisConfig::from_file(path),
        None => Ok(LibrisConfig::default()),
    }
}

fn seeded_runner(config: &LibrisConfig) -> Result<CatalogRunner> {
    let engine = Arc::new(DocumentEngine::with_config(config.engine.clone()));
    let runner = CatalogRunner::new(engine, config.catalog.clone());
    runner.seed()?;
    Ok(runner)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)
        .map_err(|e| LibrisError::Serialization(e.to_string()))?;
    println!("{}", text);
    Ok(())
}

fn execute(command: Commands, config: &LibrisConfig) -> Result<()> {
    match command {
        Commands::Run => {
            let engine = Arc::new(DocumentEngine::with_config(config.engine.clone()));
            let report = CatalogRunner::new(engine, config.catalog.clone()).run_all();
            print_json(&report)
        }
        Commands::Page { page, descending } => {
            let direction = if descending {
                SortDirection::Descending
            } else {
                SortDirection::Ascending
            };
            print_json(&seeded_runner(config)?.in_stock_page(page, direction)?)
        }
        Commands::Aggregate { report } => {
            let runner = seeded_runner(config)?;
            match report {
                Report::Genre => print_json(&runner.average_price_by_genre()?),
                Report::Author => print_json(&runner.top_author()?),
                Report::Decade => print_json(&runner.books_by_decade()?),
            }
        }
        Commands::Explain { lookup, indexes } => {
            let runner = seeded_runner(config)?;
            if indexes {
                runner.create_indexes()?;
            }
            let output = match lookup {
                Lookup::Title => runner.explain_title_lookup("The Alchemist")?,
                Lookup::AuthorYear => runner.explain_author_year("Paulo Coelho", EXPLAIN_AFTER_YEAR)?,
            };
            print_json(&output)
        }
    }
}

// =============================================================================
// Main Entry Point
// =============================================================================

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(cli.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("failed to load configuration: {}", err);
            return ExitCode::FAILURE;
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.logging.level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match execute(cli.command, &config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %err, "command failed");
            ExitCode::FAILURE
        }
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn tiny_documents() -> LibrisConfig {
        let mut config = LibrisConfig::default();
        config.engine.max_document_size = 10;
        config
    }

    #[test]
    fn test_missing_config_file_fails() {
        assert!(load_config(None).is_ok());
        let result = load_config(Some(Path::new("/nonexistent/libris.toml")));
        assert!(matches!(result, Err(LibrisError::Io(_))));
    }

    #[test]
    fn test_single_step_failure_is_an_error() {
        let command = Commands::Page {
            page: 1,
            descending: false,
        };
        let err = execute(command, &tiny_documents()).unwrap_err();
        assert!(matches!(err, LibrisError::DocumentTooLarge { .. }));
    }

    #[test]
    fn test_run_reports_step_failures() {
        assert!(execute(Commands::Run, &tiny_documents()).is_ok());
        assert!(execute(Commands::Run, &LibrisConfig::default()).is_ok());
    }
}
