//! procflow - Minimal workflow engine
//!
//! Validates process definitions, drives instances from the command line and
//! provides an interactive REPL.

mod commands;
mod repl;

use clap::{Parser, Subcommand};
use colored::Colorize;
use procflow_core::{Config, ProcessEngine};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "procflow")]
#[command(about = "Deploy process definitions and drive their instances")]
#[command(version)]
struct Cli {
    /// Path to a YAML config file
    #[arg(short, long, env = "PROCFLOW_CONFIG")]
    config: Option<PathBuf>,

    /// Fail when more than one gateway branch matches
    #[arg(long)]
    strict: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Start interactive REPL
    Repl {
        /// Definition files to deploy first
        files: Vec<PathBuf>,
    },

    /// Compile definition files and report what they contain
    Validate {
        /// Definition files (.json, or YAML otherwise)
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },

    /// Deploy a definition, start an instance and complete tasks in order
    Run {
        /// Definition file
        file: PathBuf,

        /// Start directly before this node instead of at the start event
        #[arg(short, long)]
        start_before: Option<String>,

        /// Initial variables (JSON object, @file.json, or name=value pairs)
        #[arg(long)]
        vars: Option<String>,

        /// Complete the current task with these variables; repeatable
        #[arg(short, long = "complete", value_name = "VARS")]
        complete: Vec<String>,
    },

    /// Print the effective configuration
    PrintConfig,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let mut config = match Config::load_from(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("{}: {}", "Error".red(), e);
            std::process::exit(1);
        }
    };
    if cli.strict {
        config.engine.strict_gateways = true;
    }

    let engine = ProcessEngine::new(config.engine.clone());
    for path in &config.definitions.paths {
        match engine.deploy_file(path) {
            Ok(result) => tracing::info!(
                "Deployed {} from {} (checksum: {})",
                result.key,
                path.display(),
                result.checksum
            ),
            Err(e) => {
                eprintln!(
                    "{}: failed to deploy {}: {}",
                    "Error".red(),
                    path.display(),
                    e
                );
                std::process::exit(1);
            }
        }
    }

    match cli.command {
        Some(Commands::Repl { files }) => {
            repl::run(engine, &files)?;
        }
        None => {
            repl::run(engine, &[])?;
        }
        Some(cmd) => match commands::execute(&engine, &config, cmd) {
            Ok(output) => println!("{}", output),
            Err(e) => {
                eprintln!("{}: {}", "Error".red(), e);
                std::process::exit(1);
            }
        },
    }

    Ok(())
}
