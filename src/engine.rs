//! Bounded tool execution loop
//!
//! Runs one agent's turn: repeatedly ask the agent to decide, dispatch any
//! requested tool call, feed the outcome back, and stop either when the
//! agent produces a final answer or when its iteration budget runs out.
//! A permission violation is caught before dispatch and never reaches a
//! remote server. An agent that exhausts its budget without answering is
//! never allowed to stall the conversation: its last tool error becomes
//! its answer and the flow moves on.

use std::sync::Arc;

use crate::agent::{Agent, Decision, ToolRequest};
use crate::error::{AgentFlowError, Result};
use crate::mcp::{ServerPool, ToolOutcome};
use crate::transcript::{ConversationTurn, Session};

pub struct ExecutionEngine {
    pool: Arc<dyn ServerPool>,
}

impl ExecutionEngine {
    pub fn new(pool: Arc<dyn ServerPool>) -> Self {
        Self { pool }
    }

    /// Run one agent's complete turn against the shared transcript.
    ///
    /// Every tool call and result is appended to the session as it
    /// happens; the returned string is the agent's answer for this turn.
    /// Only reasoning-client failures propagate as errors.
    pub async fn run_turn(&self, agent: &Agent, session: &mut Session) -> Result<String> {
        let budget = agent.max_tool_iterations();
        let mut last_error: Option<String> = None;

        for attempt in 1..=budget.max(1) {
            let decision = agent.decide(session).await?;

            let request = match decision {
                Decision::FinalAnswer(answer) => return Ok(answer),
                Decision::CallTool(request) => request,
            };

            // A budget of zero means the agent may reason but never
            // dispatch; its first tool request is terminal.
            if budget == 0 {
                let reason = format!(
                    "tool '{}' requested but tool execution is disabled for agent '{}'",
                    request.tool,
                    agent.name()
                );
                log::warn!("{}", reason);
                return Ok(reason);
            }

            let outcome = self.dispatch(agent, &request, attempt, session).await;
            match outcome.ok {
                true => {
                    if !agent.reflect() {
                        // No reflection pass: the tool output is the answer
                        return Ok(outcome.content);
                    }
                    last_error = None;
                }
                false => {
                    log::warn!(
                        "Tool '{}' failed for agent '{}' (attempt {}/{}): {}",
                        request.tool,
                        agent.name(),
                        attempt,
                        budget,
                        outcome.content
                    );
                    last_error = Some(outcome.content);
                }
            }
        }

        // Budget exhausted without a final answer
        let answer = match last_error {
            Some(error) => format!(
                "Unable to complete after {} tool attempts. Last error: {}",
                budget, error
            ),
            None => format!(
                "Reached the tool iteration limit ({}) without reaching a conclusion.",
                budget
            ),
        };
        log::warn!("Agent '{}' exhausted its tool budget", agent.name());
        Ok(answer)
    }

    /// Dispatch one tool request, recording both the call and its outcome
    /// in the transcript. The permission check happens here, before any
    /// network traffic.
    async fn dispatch(
        &self,
        agent: &Agent,
        request: &ToolRequest,
        attempt: u32,
        session: &mut Session,
    ) -> ToolOutcome {
        session.push(ConversationTurn::tool_call(
            agent.name(),
            &request.tool,
            request.arguments.clone(),
            attempt,
        ));

        let outcome = match agent.server_for(&request.tool) {
            Some(server) => {
                self.pool
                    .call_tool(server, &request.tool, &request.arguments)
                    .await
            }
            None => {
                log::warn!(
                    "Agent '{}' requested disallowed tool '{}'",
                    agent.name(),
                    request.tool
                );
                let denied = AgentFlowError::ToolNotAllowed {
                    agent: agent.name().to_string(),
                    tool: request.tool.clone(),
                };
                ToolOutcome::error(denied.to_string())
            }
        };

        session.push(ConversationTurn::tool_result(
            agent.name(),
            outcome.ok,
            &outcome.content,
        ));
        outcome
    }
}
