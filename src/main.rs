//! `sunwell` binary entry point: parses the CLI surface (spec §6), wires
//! every service together behind the ports they depend on, and dispatches
//! to the handler in `cli::commands`.
//!
//! Grounded on the teacher's own `main.rs` split between "load config,
//! init logging, build the service graph" and "hand off to a command
//! dispatcher" — generalized from the teacher's task-queue/agent-pool
//! graph to sunwell's Backlog/Memory/ModelGateway/ExecutionManager graph.

use clap::Parser;
use std::process::ExitCode;

use sunwell::cli::Cli;
use sunwell::infrastructure::config::ConfigLoader;
use sunwell::infrastructure::logging;

/// Process exit codes (spec §6): `0` success, `1` goal failure, `2`
/// configuration error.
const EXIT_SUCCESS: u8 = 0;
const EXIT_GOAL_FAILURE: u8 = 1;
const EXIT_CONFIG_ERROR: u8 = 2;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match ConfigLoader::load() {
        Ok(config) => config,
        Err(err) => {
            eprintln!("[SW-5001] configuration error: {err}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };

    let _logger_guard = match logging::init(&config.logging) {
        Ok(guard) => guard,
        Err(err) => {
            eprintln!("[SW-5002] failed to initialize logging: {err}");
            return ExitCode::from(EXIT_CONFIG_ERROR);
        }
    };
    if let Err(err) = _logger_guard.cleanup_old_logs() {
        tracing::warn!(error = %err, "failed to clean up rotated logs");
    }

    match sunwell::cli::commands::dispatch(cli, config).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("{}", err.render());
            match err.category {
                sunwell::domain::models::ErrorCategory::Config => ExitCode::from(EXIT_CONFIG_ERROR),
                _ => ExitCode::from(EXIT_GOAL_FAILURE),
            }
        }
    }
}

#[allow(dead_code)]
const fn _exit_codes_are_documented() -> (u8, u8, u8) {
    (EXIT_SUCCESS, EXIT_GOAL_FAILURE, EXIT_CONFIG_ERROR)
}
