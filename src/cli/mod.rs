//! Command-line interface for agentflow.

pub mod commands;

pub use commands::Cli;
