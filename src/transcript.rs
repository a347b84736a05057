//! Conversation transcript types
//!
//! The ordered sequence of turns is the single source of shared context for
//! every agent in a session. Turns are append-only; nothing ever rewrites
//! history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What a turn records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Message,
    ToolCall,
    ToolResult,
}

/// The content of a turn
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TurnPayload {
    Message {
        text: String,
    },
    ToolCall {
        tool: String,
        arguments: Value,
        attempt: u32,
    },
    ToolResult {
        ok: bool,
        content: String,
    },
}

impl TurnPayload {
    pub fn kind(&self) -> TurnKind {
        match self {
            TurnPayload::Message { .. } => TurnKind::Message,
            TurnPayload::ToolCall { .. } => TurnKind::ToolCall,
            TurnPayload::ToolResult { .. } => TurnKind::ToolResult,
        }
    }
}

/// One recorded unit of conversation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub agent: String,
    pub payload: TurnPayload,
    pub timestamp: DateTime<Utc>,
}

impl ConversationTurn {
    pub fn message(agent: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            payload: TurnPayload::Message { text: text.into() },
            timestamp: Utc::now(),
        }
    }

    pub fn tool_call(agent: impl Into<String>, tool: impl Into<String>, arguments: Value, attempt: u32) -> Self {
        Self {
            agent: agent.into(),
            payload: TurnPayload::ToolCall {
                tool: tool.into(),
                arguments,
                attempt,
            },
            timestamp: Utc::now(),
        }
    }

    pub fn tool_result(agent: impl Into<String>, ok: bool, content: impl Into<String>) -> Self {
        Self {
            agent: agent.into(),
            payload: TurnPayload::ToolResult {
                ok,
                content: content.into(),
            },
            timestamp: Utc::now(),
        }
    }

    pub fn kind(&self) -> TurnKind {
        self.payload.kind()
    }
}

/// A single user query's conversation state: the original query plus the
/// append-only turn sequence. Created per query, discarded afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    pub query: String,
    turns: Vec<ConversationTurn>,
}

impl Session {
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            turns: Vec::new(),
        }
    }

    pub fn push(&mut self, turn: ConversationTurn) {
        self.turns.push(turn);
    }

    pub fn turns(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    /// The text of each agent's final `Message` turn, in flow order
    pub fn final_answers(&self) -> Vec<(&str, &str)> {
        self.turns
            .iter()
            .filter_map(|t| match &t.payload {
                TurnPayload::Message { text } => Some((t.agent.as_str(), text.as_str())),
                _ => None,
            })
            .collect()
    }
}
