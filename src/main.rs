//! cloudmosaic CLI entrypoint.
//!
//! Provides a thin wrapper over the `cli` module: parse args, run the pipeline,
//! and exit non-zero with the full error chain logged on failure.
//! For programmatic use, prefer the library API (`cloudmosaic::api`).
use std::error::Error;
use std::process::ExitCode;

use clap::Parser;

mod cli;

fn main() -> ExitCode {
    let args = cli::CliArgs::parse();
    match cli::run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            let mut message = e.to_string();
            let mut source = e.source();
            while let Some(cause) = source {
                message.push_str(&format!("\n  caused by: {}", cause));
                source = cause.source();
            }
            tracing::error!("{}", message);
            ExitCode::FAILURE
        }
    }
}
