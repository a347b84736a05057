//! Error types for agentflow
//!
//! Centralized error handling using thiserror.

use thiserror::Error;

/// All error types that can occur in agentflow
#[derive(Debug, Error)]
pub enum AgentFlowError {
    /// Malformed or missing configuration - fatal, aborts startup
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// One server's tool catalog is unavailable - isolated, other servers continue
    #[error("Discovery failed for server '{server}': {reason}")]
    Discovery { server: String, reason: String },

    /// Transport unreachable at call time - retryable per engine policy
    #[error("Connection error: {0}")]
    Connection(String),

    /// Tool not present in the agent's effective tool set - terminal for that
    /// invocation only, the remote server is never contacted
    #[error("Tool '{tool}' is not allowed for agent '{agent}'")]
    ToolNotAllowed { agent: String, tool: String },

    /// Remote server reported a tool failure
    #[error("Tool execution error: {0}")]
    ToolExecution(String),

    /// Named agent in a flow override does not exist or is disabled - fatal
    /// to that session only
    #[error("Flow configuration error: {0}")]
    FlowConfiguration(String),

    /// Reasoning service (LLM) error
    #[error("LLM error: {0}")]
    Llm(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for agentflow operations
pub type Result<T> = std::result::Result<T, AgentFlowError>;
