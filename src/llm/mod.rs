//! Reasoning-service layer
//!
//! The `LlmClient` trait is the seam between the orchestration core and
//! whatever model backs an agent. Tool invocation is structured end to end.

pub mod client;
pub mod openai;
pub mod types;

pub use client::{LlmClient, ScriptedClient};
pub use openai::OpenAiClient;
pub use types::{
    CompletionRequest, CompletionResponse, FinishReason, Message, Role, ToolSchema, ToolUse,
};
