//! agentflow - multi-agent tool orchestration over MCP servers.
//!
//! Agents defined in configuration take turns answering a query over a
//! shared transcript, each restricted to the tools its servers expose and
//! its own allowlist permits, with a bounded execution loop per turn.

pub mod agent;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod llm;
pub mod mcp;
pub mod orchestrator;
pub mod transcript;

pub use error::{AgentFlowError, Result};
