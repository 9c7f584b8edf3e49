//! Command-line interface for fact-forge.
//!
//! Provides the feeder and the two worker roles.

mod commands;

pub use commands::{parse_cli, run_with_cli, Cli};
