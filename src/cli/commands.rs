//! CLI command definitions using clap.
//!
//! A single top-level command: run a query through the configured agent
//! flow, or start an interactive session when no query is given.

use clap::Parser;
use std::path::PathBuf;

/// agentflow - multi-agent tool orchestration over MCP servers
#[derive(Parser, Debug)]
#[command(name = "agentflow")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// The query to run through the agent flow; omit for interactive mode
    pub query: Option<String>,

    /// Optional config file path
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Comma-separated agent names overriding the configured flow
    #[arg(short, long)]
    pub flow: Option<String>,

    /// Force an interactive session even when a query is given
    #[arg(short, long)]
    pub interactive: bool,

    /// Verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    pub fn is_interactive(&self) -> bool {
        self.interactive || self.query.is_none()
    }
}
