//! Reasoning-service client trait and deterministic test double

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::error::{AgentFlowError, Result};
use crate::llm::types::{CompletionRequest, CompletionResponse};

/// External reasoning service consumed by an Agent.
///
/// Each call is independent; the full conversation context travels in the
/// request's message list.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse>;

    /// Model identifier, for logging
    fn model(&self) -> &str;
}

/// Deterministic client that replays a fixed script of responses.
///
/// Used by tests and the replay determinism property: the same script fed
/// through the same agents produces the same transcript.
pub struct ScriptedClient {
    responses: Mutex<VecDeque<CompletionResponse>>,
    calls: AtomicUsize,
}

impl ScriptedClient {
    pub fn new(responses: Vec<CompletionResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            calls: AtomicUsize::new(0),
        }
    }

    /// How many completions have been requested
    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl LlmClient for ScriptedClient {
    async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.responses
            .lock()
            .expect("script mutex poisoned")
            .pop_front()
            .ok_or_else(|| AgentFlowError::Llm("scripted client exhausted".to_string()))
    }

    fn model(&self) -> &str {
        "scripted"
    }
}
