//! Command Line Interface (CLI) layer for cloudmosaic.
//!
//! This module defines argument parsing (`args`), error types (`errors`),
//! and the orchestration logic (`runner`) that merges flags over an optional
//! config file and runs the pipeline on the sized execution pool.
//!
//! If you are embedding cloudmosaic into another application, prefer using
//! the high-level `cloudmosaic::api` module instead of calling the CLI code.
pub mod args;
pub mod errors;
pub mod runner;

pub use args::CliArgs;
pub use runner::run;
