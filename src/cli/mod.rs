//! Command line interface

pub mod args;
pub mod commands;
pub mod errors;

pub use args::{Cli, Command};
pub use commands::{dispatch, execute};
pub use errors::{CliError, CliResult, EXIT_USAGE};
