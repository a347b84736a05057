//! Agent runtime
//!
//! An `Agent` binds a configured persona (system prompt, tool permissions,
//! iteration budget) to a reasoning client. Its one job is `decide`:
//! render the shared transcript into the model's view of the conversation
//! and report whether the model wants to answer or call a tool.

use std::sync::Arc;

use serde_json::Value;

use crate::config::AgentConfig;
use crate::error::Result;
use crate::llm::{CompletionRequest, LlmClient, Message, ToolSchema, ToolUse};
use crate::mcp::EffectiveToolSet;
use crate::transcript::{Session, TurnPayload};

/// A tool invocation the model asked for
#[derive(Debug, Clone, PartialEq)]
pub struct ToolRequest {
    pub tool: String,
    pub arguments: Value,
}

/// What the model chose to do with its turn
#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    FinalAnswer(String),
    CallTool(ToolRequest),
}

pub struct Agent {
    config: AgentConfig,
    client: Arc<dyn LlmClient>,
    tools: EffectiveToolSet,
}

impl Agent {
    pub fn new(config: AgentConfig, client: Arc<dyn LlmClient>, tools: EffectiveToolSet) -> Self {
        Self { config, client, tools }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn max_tool_iterations(&self) -> u32 {
        self.config.max_tool_iterations
    }

    pub fn reflect(&self) -> bool {
        self.config.reflect
    }

    pub fn can_terminate(&self) -> bool {
        self.config.can_terminate
    }

    /// Owning server for an allowed tool; `None` means the tool is not in
    /// this agent's effective set
    pub fn server_for(&self, tool: &str) -> Option<&str> {
        self.tools.get(tool).map(|t| t.server.as_str())
    }

    fn schemas(&self) -> Vec<ToolSchema> {
        self.tools.values().map(|tool| tool.to_schema()).collect()
    }

    /// Render the shared transcript into this agent's private view.
    ///
    /// Its own turns become assistant messages; everyone else's become
    /// attributed user messages. Tool calls and their results are paired
    /// with synthetic call ids in transcript order.
    fn render_messages(&self, session: &Session) -> Vec<Message> {
        let mut messages = vec![
            Message::system(&self.config.system_prompt),
            Message::user(session.query.as_str()),
        ];

        let mut call_seq = 0usize;
        let mut pending_call: Option<String> = None;

        for turn in session.turns() {
            let own = turn.agent == self.config.name;
            match &turn.payload {
                TurnPayload::Message { text } => {
                    if own {
                        messages.push(Message::assistant(text));
                    } else {
                        messages.push(Message::user(format!("[{}]: {}", turn.agent, text)));
                    }
                }
                TurnPayload::ToolCall { tool, arguments, .. } => {
                    if !own {
                        continue;
                    }
                    let id = format!("call_{}", call_seq);
                    call_seq += 1;
                    messages.push(Message::assistant_tool_call(ToolUse {
                        id: id.clone(),
                        name: tool.clone(),
                        arguments: arguments.clone(),
                    }));
                    pending_call = Some(id);
                }
                TurnPayload::ToolResult { ok, content } => {
                    let Some(id) = pending_call.take() else {
                        continue;
                    };
                    let body = if *ok {
                        content.clone()
                    } else {
                        format!("Error: {}", content)
                    };
                    messages.push(Message::tool_result(id, body));
                }
            }
        }
        messages
    }

    /// Ask the model what to do next given the transcript so far
    pub async fn decide(&self, session: &Session) -> Result<Decision> {
        let request = CompletionRequest::new(self.render_messages(session))
            .with_tools(self.schemas());
        let response = self.client.complete(request).await?;

        if let Some(call) = response.tool_calls.first() {
            log::debug!("Agent '{}' requested tool '{}'", self.config.name, call.name);
            return Ok(Decision::CallTool(ToolRequest {
                tool: call.name.clone(),
                arguments: call.arguments.clone(),
            }));
        }

        Ok(Decision::FinalAnswer(response.content))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ToolFilter;
    use crate::llm::{CompletionResponse, ScriptedClient};
    use crate::mcp::Tool;
    use serde_json::json;

    fn config(name: &str) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            enabled: true,
            servers: vec!["k8s".to_string()],
            tools: ToolFilter::Wildcard,
            system_prompt: "You are a cluster operator.".to_string(),
            max_tool_iterations: 5,
            reflect: true,
            can_terminate: false,
            order: 0,
        }
    }

    fn tools(names: &[&str]) -> EffectiveToolSet {
        names
            .iter()
            .map(|n| (n.to_string(), Tool::new(*n, "k8s")))
            .collect()
    }

    #[tokio::test]
    async fn test_decide_final_answer() {
        let client = Arc::new(ScriptedClient::new(vec![CompletionResponse::text(
            "All pods healthy.",
        )]));
        let agent = Agent::new(config("ops"), client, tools(&["podList"]));
        let session = Session::new("check the cluster");

        let decision = agent.decide(&session).await.unwrap();
        assert_eq!(decision, Decision::FinalAnswer("All pods healthy.".to_string()));
    }

    #[tokio::test]
    async fn test_decide_tool_call() {
        let client = Arc::new(ScriptedClient::new(vec![CompletionResponse::tool_call(
            "call_0",
            "podList",
            json!({"namespace": "default"}),
        )]));
        let agent = Agent::new(config("ops"), client, tools(&["podList"]));
        let session = Session::new("list pods");

        let decision = agent.decide(&session).await.unwrap();
        match decision {
            Decision::CallTool(request) => {
                assert_eq!(request.tool, "podList");
                assert_eq!(request.arguments["namespace"], "default");
            }
            other => panic!("expected tool call, got {:?}", other),
        }
    }

    #[test]
    fn test_server_for_respects_effective_set() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let agent = Agent::new(config("ops"), client, tools(&["podList"]));
        assert_eq!(agent.server_for("podList"), Some("k8s"));
        assert_eq!(agent.server_for("podDelete"), None);
    }

    #[test]
    fn test_render_messages_attributes_other_agents() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let agent = Agent::new(config("ops"), client, tools(&[]));
        let mut session = Session::new("what is wrong?");
        session.push(crate::transcript::ConversationTurn::message(
            "triage",
            "Looks like a memory leak.",
        ));
        session.push(crate::transcript::ConversationTurn::message(
            "ops",
            "I will check pod memory.",
        ));

        let messages = agent.render_messages(&session);
        // system + query + two turns
        assert_eq!(messages.len(), 4);
        assert!(messages[2].content.starts_with("[triage]:"));
        assert_eq!(messages[3].role, crate::llm::Role::Assistant);
    }

    #[test]
    fn test_render_messages_pairs_tool_calls_with_results() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let agent = Agent::new(config("ops"), client, tools(&["podList"]));
        let mut session = Session::new("list pods");
        session.push(crate::transcript::ConversationTurn::tool_call(
            "ops",
            "podList",
            json!({}),
            1,
        ));
        session.push(crate::transcript::ConversationTurn::tool_result(
            "ops", true, "pod-a",
        ));

        let messages = agent.render_messages(&session);
        assert_eq!(messages.len(), 4);
        assert_eq!(messages[2].tool_calls.len(), 1);
        let call_id = messages[2].tool_calls[0].id.clone();
        assert_eq!(messages[3].tool_call_id.as_deref(), Some(call_id.as_str()));
        assert_eq!(messages[3].content, "pod-a");
    }

    #[test]
    fn test_render_messages_marks_errors() {
        let client = Arc::new(ScriptedClient::new(vec![]));
        let agent = Agent::new(config("ops"), client, tools(&["podList"]));
        let mut session = Session::new("list pods");
        session.push(crate::transcript::ConversationTurn::tool_call(
            "ops",
            "podList",
            json!({}),
            1,
        ));
        session.push(crate::transcript::ConversationTurn::tool_result(
            "ops", false, "connection refused",
        ));

        let messages = agent.render_messages(&session);
        assert!(messages[3].content.starts_with("Error:"));
    }
}
