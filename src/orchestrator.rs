//! Multi-agent turn orchestration
//!
//! Drives one session: agents take turns in a fixed flow order, each
//! reading the whole shared transcript and appending its own turns. The
//! flow comes from an explicit override (flag or environment), the
//! configured `conversation_flow`, or the agents' `order` fields. A bad
//! override fails the session, never the process. A terminating agent
//! (marked `can_terminate`, or the final flow position) can end the
//! session early by using a termination phrase.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::agent::Agent;
use crate::config::{AgentsDocument, ServerConfig, FLOW_ENV};
use crate::engine::ExecutionEngine;
use crate::error::{AgentFlowError, Result};
use crate::llm::LlmClient;
use crate::mcp::{effective_tools, ServerPool, ToolCatalog};
use crate::transcript::{ConversationTurn, Session};

/// Cooperative cancellation, checked at turn boundaries only. A turn in
/// progress always completes; the transcript is never left mid-turn.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Resolve the turn order for a session.
///
/// An override spec (comma-separated agent names) replaces the configured
/// flow entirely. Every overridden name must exist and be enabled;
/// otherwise the session fails with a flow configuration error. An empty
/// resolved flow is also an error.
pub fn resolve_flow(document: &AgentsDocument, override_spec: Option<&str>) -> Result<Vec<String>> {
    let flow = match override_spec {
        Some(spec) => {
            let names: Vec<String> = spec
                .split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect();
            for name in &names {
                let agent = document.get_agent(name).ok_or_else(|| {
                    AgentFlowError::FlowConfiguration(format!("unknown agent '{}' in flow override", name))
                })?;
                if !agent.enabled {
                    return Err(AgentFlowError::FlowConfiguration(format!(
                        "agent '{}' in flow override is disabled",
                        name
                    )));
                }
            }
            names
        }
        None => document.default_flow(),
    };

    if flow.is_empty() {
        return Err(AgentFlowError::FlowConfiguration(
            "conversation flow is empty: no enabled agents".to_string(),
        ));
    }
    Ok(flow)
}

/// The flow override from the environment, if set and non-empty
pub fn flow_override_from_env() -> Option<String> {
    std::env::var(FLOW_ENV).ok().filter(|s| !s.trim().is_empty())
}

pub struct Orchestrator {
    agents: Vec<Agent>,
    engine: ExecutionEngine,
    termination_phrases: Vec<String>,
    cancel: CancelFlag,
}

impl Orchestrator {
    /// Build the session's agents in flow order. Each agent gets its
    /// effective tool set computed once, against the already-completed
    /// discovery catalog.
    pub fn new(
        document: &AgentsDocument,
        servers: &[ServerConfig],
        catalog: &ToolCatalog,
        client: Arc<dyn LlmClient>,
        pool: Arc<dyn ServerPool>,
        override_spec: Option<&str>,
    ) -> Result<Self> {
        let flow = resolve_flow(document, override_spec)?;

        let mut agents = Vec::with_capacity(flow.len());
        for name in &flow {
            let config = document.get_agent(name).ok_or_else(|| {
                AgentFlowError::FlowConfiguration(format!("unknown agent '{}' in flow", name))
            })?;
            let tools = effective_tools(config, servers, catalog);
            log::info!("Agent '{}' has {} effective tools", name, tools.len());
            agents.push(Agent::new(config.clone(), client.clone(), tools));
        }

        let termination_phrases = if document.termination_phrases.is_empty() {
            crate::config::default_termination_phrases()
        } else {
            document.termination_phrases.clone()
        };

        Ok(Self {
            agents,
            engine: ExecutionEngine::new(pool),
            termination_phrases,
            cancel: CancelFlag::new(),
        })
    }

    /// Handle callers can use to stop the session between turns
    pub fn cancel_flag(&self) -> CancelFlag {
        self.cancel.clone()
    }

    pub fn flow(&self) -> Vec<&str> {
        self.agents.iter().map(Agent::name).collect()
    }

    fn is_termination(&self, answer: &str) -> bool {
        let lowered = answer.to_lowercase();
        self.termination_phrases
            .iter()
            .any(|phrase| lowered.contains(&phrase.to_lowercase()))
    }

    /// Run one full session for a query. Each agent takes exactly one
    /// turn, in flow order; the last agent may terminate early. The
    /// completed transcript is returned whole.
    pub async fn run_session(&self, query: impl Into<String>) -> Result<Session> {
        let mut session = Session::new(query);
        log::info!(
            "Starting session with flow: {}",
            self.flow().join(" -> ")
        );

        for (i, agent) in self.agents.iter().enumerate() {
            if self.cancel.is_cancelled() {
                log::info!("Session cancelled before agent '{}'", agent.name());
                break;
            }

            let answer = self.engine.run_turn(agent, &mut session).await?;
            session.push(ConversationTurn::message(agent.name(), &answer));

            // Only a terminating agent may end the session early: one
            // marked `can_terminate`, or the final flow position. A
            // mid-flow agent that happens to use a termination phrase
            // never skips the agents after it.
            let terminating_agent = agent.can_terminate() || i + 1 == self.agents.len();
            if terminating_agent && self.is_termination(&answer) {
                log::info!("Agent '{}' terminated the session", agent.name());
                break;
            }
        }

        Ok(session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AgentConfig, ToolFilter};
    use crate::llm::{CompletionResponse, ScriptedClient};
    use crate::mcp::MockServerPool;

    fn agent_config(name: &str, order: u32, enabled: bool) -> AgentConfig {
        AgentConfig {
            name: name.to_string(),
            enabled,
            servers: vec![],
            tools: ToolFilter::Wildcard,
            system_prompt: format!("You are {}.", name),
            max_tool_iterations: 5,
            reflect: true,
            can_terminate: false,
            order,
        }
    }

    fn document(agents: Vec<AgentConfig>, flow: Vec<&str>) -> AgentsDocument {
        AgentsDocument {
            agents,
            conversation_flow: flow.into_iter().map(String::from).collect(),
            termination_phrases: vec![],
        }
    }

    #[test]
    fn test_resolve_flow_explicit() {
        let doc = document(
            vec![agent_config("a", 1, true), agent_config("b", 2, true)],
            vec!["b", "a"],
        );
        assert_eq!(resolve_flow(&doc, None).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_resolve_flow_order_fallback() {
        let doc = document(
            vec![agent_config("late", 9, true), agent_config("early", 1, true)],
            vec![],
        );
        assert_eq!(resolve_flow(&doc, None).unwrap(), vec!["early", "late"]);
    }

    #[test]
    fn test_resolve_flow_override_replaces_configured() {
        let doc = document(
            vec![agent_config("a", 1, true), agent_config("b", 2, true)],
            vec!["a", "b"],
        );
        assert_eq!(resolve_flow(&doc, Some("b,a")).unwrap(), vec!["b", "a"]);
    }

    #[test]
    fn test_resolve_flow_override_unknown_agent_fails() {
        let doc = document(vec![agent_config("a", 1, true)], vec![]);
        let err = resolve_flow(&doc, Some("a,ghost")).unwrap_err();
        assert!(matches!(err, AgentFlowError::FlowConfiguration(_)));
    }

    #[test]
    fn test_resolve_flow_override_disabled_agent_fails() {
        let doc = document(
            vec![agent_config("a", 1, true), agent_config("off", 2, false)],
            vec![],
        );
        assert!(resolve_flow(&doc, Some("off")).is_err());
    }

    #[test]
    fn test_resolve_flow_empty_is_error() {
        let doc = document(vec![agent_config("off", 1, false)], vec![]);
        assert!(resolve_flow(&doc, None).is_err());
    }

    #[tokio::test]
    async fn test_session_runs_agents_in_flow_order() {
        let doc = document(
            vec![agent_config("triage", 1, true), agent_config("fixer", 2, true)],
            vec![],
        );
        let client = Arc::new(ScriptedClient::new(vec![
            CompletionResponse::text("Looks like disk pressure."),
            CompletionResponse::text("Freed 2GB of logs."),
        ]));
        let pool = Arc::new(MockServerPool::new());
        let catalog = ToolCatalog::new();

        let orchestrator =
            Orchestrator::new(&doc, &[], &catalog, client, pool, None).unwrap();
        let session = orchestrator.run_session("node is full").await.unwrap();

        assert_eq!(
            session.final_answers(),
            vec![
                ("triage", "Looks like disk pressure."),
                ("fixer", "Freed 2GB of logs."),
            ]
        );
    }

    #[tokio::test]
    async fn test_terminating_agent_phrase_ends_session_early() {
        let mut reviewer = agent_config("a", 1, true);
        reviewer.can_terminate = true;
        let mut doc = document(vec![reviewer, agent_config("b", 2, true)], vec![]);
        doc.termination_phrases = vec!["TERMINATE".to_string()];
        let client = Arc::new(ScriptedClient::new(vec![
            CompletionResponse::text("All clear. TERMINATE"),
            CompletionResponse::text("never reached"),
        ]));
        let pool = Arc::new(MockServerPool::new());
        let catalog = ToolCatalog::new();

        let orchestrator =
            Orchestrator::new(&doc, &[], &catalog, client.clone(), pool, None).unwrap();
        let session = orchestrator.run_session("status?").await.unwrap();

        assert_eq!(session.final_answers().len(), 1);
        assert_eq!(client.call_count(), 1);
    }

    #[tokio::test]
    async fn test_mid_flow_phrase_does_not_skip_later_agents() {
        // Empty config list falls back to the default phrases, which
        // include "analysis complete"
        let doc = document(
            vec![agent_config("triage", 1, true), agent_config("fixer", 2, true)],
            vec![],
        );
        let client = Arc::new(ScriptedClient::new(vec![
            CompletionResponse::text("Root-cause analysis complete: OOM in payments."),
            CompletionResponse::text("Raised the memory limit."),
        ]));
        let pool = Arc::new(MockServerPool::new());
        let catalog = ToolCatalog::new();

        let orchestrator =
            Orchestrator::new(&doc, &[], &catalog, client, pool, None).unwrap();
        let session = orchestrator.run_session("payments is down").await.unwrap();

        // triage is not a terminating agent, so fixer still runs
        let order: Vec<&str> = session.final_answers().iter().map(|(a, _)| *a).collect();
        assert_eq!(order, vec!["triage", "fixer"]);
    }

    #[tokio::test]
    async fn test_last_agent_may_always_terminate() {
        let mut doc = document(
            vec![agent_config("a", 1, true), agent_config("b", 2, true)],
            vec![],
        );
        doc.termination_phrases = vec!["APPROVED".to_string()];
        let client = Arc::new(ScriptedClient::new(vec![
            CompletionResponse::text("handing over"),
            CompletionResponse::text("APPROVED"),
        ]));
        let pool = Arc::new(MockServerPool::new());
        let catalog = ToolCatalog::new();

        let orchestrator =
            Orchestrator::new(&doc, &[], &catalog, client, pool, None).unwrap();
        // Both agents run; the last one's phrase is honored without being
        // marked can_terminate
        let session = orchestrator.run_session("q").await.unwrap();
        assert_eq!(session.final_answers().len(), 2);
    }

    #[tokio::test]
    async fn test_cancellation_stops_at_turn_boundary() {
        let doc = document(
            vec![agent_config("a", 1, true), agent_config("b", 2, true)],
            vec![],
        );
        let client = Arc::new(ScriptedClient::new(vec![CompletionResponse::text("first")]));
        let pool = Arc::new(MockServerPool::new());
        let catalog = ToolCatalog::new();

        let orchestrator =
            Orchestrator::new(&doc, &[], &catalog, client, pool, None).unwrap();
        // Cancel before the session starts: no agent runs at all
        orchestrator.cancel_flag().cancel();
        let session = orchestrator.run_session("q").await.unwrap();
        assert!(session.is_empty());
    }

    /// Completes like a scripted client, then trips the cancel flag, so
    /// cancellation lands while a turn is in flight
    struct CancelAfterFirstClient {
        inner: ScriptedClient,
        flag: std::sync::Mutex<Option<CancelFlag>>,
    }

    impl CancelAfterFirstClient {
        fn new(responses: Vec<CompletionResponse>) -> Self {
            Self {
                inner: ScriptedClient::new(responses),
                flag: std::sync::Mutex::new(None),
            }
        }

        fn arm(&self, flag: CancelFlag) {
            *self.flag.lock().unwrap() = Some(flag);
        }
    }

    #[async_trait::async_trait]
    impl LlmClient for CancelAfterFirstClient {
        async fn complete(
            &self,
            request: crate::llm::CompletionRequest,
        ) -> Result<crate::llm::CompletionResponse> {
            let response = self.inner.complete(request).await;
            if let Some(flag) = self.flag.lock().unwrap().as_ref() {
                flag.cancel();
            }
            response
        }

        fn model(&self) -> &str {
            self.inner.model()
        }
    }

    #[tokio::test]
    async fn test_cancellation_between_turns_completes_current_turn() {
        let doc = document(
            vec![agent_config("a", 1, true), agent_config("b", 2, true)],
            vec![],
        );
        let client = Arc::new(CancelAfterFirstClient::new(vec![
            CompletionResponse::text("first"),
            CompletionResponse::text("never reached"),
        ]));
        let pool = Arc::new(MockServerPool::new());
        let catalog = ToolCatalog::new();

        let orchestrator =
            Orchestrator::new(&doc, &[], &catalog, client.clone(), pool, None).unwrap();
        client.arm(orchestrator.cancel_flag());

        let session = orchestrator.run_session("q").await.unwrap();

        // The in-flight turn finished and is on the record; the second
        // agent never started
        assert_eq!(session.final_answers(), vec![("a", "first")]);
        assert_eq!(client.inner.call_count(), 1);
    }

    #[tokio::test]
    async fn test_same_script_same_transcript() {
        let doc = document(vec![agent_config("a", 1, true)], vec![]);
        let catalog = ToolCatalog::new();
        let pool = Arc::new(MockServerPool::new());

        let mut answers = Vec::new();
        for _ in 0..2 {
            let client = Arc::new(ScriptedClient::new(vec![CompletionResponse::text("same")]));
            let orchestrator =
                Orchestrator::new(&doc, &[], &catalog, client, pool.clone(), None).unwrap();
            let session = orchestrator.run_session("q").await.unwrap();
            answers.push(
                session
                    .final_answers()
                    .iter()
                    .map(|(a, t)| format!("{}:{}", a, t))
                    .collect::<Vec<_>>(),
            );
        }
        assert_eq!(answers[0], answers[1]);
    }
}
