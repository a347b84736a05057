//! Tool server connection pool
//!
//! One logical connection per configured server, created lazily on first
//! use and reused for the rest of the session. `HttpServerPool` speaks a
//! plain HTTP/JSON protocol: `GET {url}/mcp/tools` for discovery and
//! `POST {url}/mcp/tools/{name}/call` for execution. Transport failures
//! during calls are normalized into error outcomes rather than bubbling up
//! as crate errors, so the execution loop can treat them as retryable.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;

use crate::config::ServerConfig;
use crate::error::{AgentFlowError, Result};
use crate::mcp::catalog::Tool;

/// Normalized result of a tool call. Transport errors, remote errors, and
/// successful payloads all arrive in this one shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolOutcome {
    pub ok: bool,
    pub content: String,
}

impl ToolOutcome {
    pub fn success(content: impl Into<String>) -> Self {
        Self { ok: true, content: content.into() }
    }

    pub fn error(content: impl Into<String>) -> Self {
        Self { ok: false, content: content.into() }
    }
}

/// Transport seam between the orchestration loop and tool servers
#[async_trait]
pub trait ServerPool: Send + Sync {
    /// List the tools a server currently offers. Errors here are real
    /// errors: discovery needs to distinguish a failed server from one
    /// with no tools.
    async fn list_tools(&self, server: &ServerConfig) -> Result<Vec<Tool>>;

    /// Invoke a tool. Never fails at the transport level; every failure
    /// mode is folded into an error outcome.
    async fn call_tool(&self, server: &str, tool: &str, arguments: &Value) -> ToolOutcome;
}

struct Handle {
    client: reqwest::Client,
    base_url: String,
}

/// HTTP-backed pool with lazy, idempotent connection handles
pub struct HttpServerPool {
    configs: HashMap<String, ServerConfig>,
    handles: Mutex<HashMap<String, Arc<Handle>>>,
}

impl HttpServerPool {
    pub fn new(servers: &[ServerConfig]) -> Self {
        let configs = servers.iter().map(|s| (s.name.clone(), s.clone())).collect();
        Self { configs, handles: Mutex::new(HashMap::new()) }
    }

    /// Returns the existing handle for a server or builds one. Calling
    /// this twice for the same server yields the same handle.
    async fn handle(&self, config: &ServerConfig) -> Result<Arc<Handle>> {
        let mut handles = self.handles.lock().await;
        if let Some(handle) = handles.get(&config.name) {
            return Ok(handle.clone());
        }

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| AgentFlowError::Connection(format!("failed to build HTTP client for '{}': {}", config.name, e)))?;

        let handle = Arc::new(Handle {
            client,
            base_url: config.url.trim_end_matches('/').to_string(),
        });
        handles.insert(config.name.clone(), handle.clone());
        log::debug!("Opened connection handle for server '{}'", config.name);
        Ok(handle)
    }

    fn parse_tool_list(server: &str, body: &Value) -> Result<Vec<Tool>> {
        let entries = body
            .get("tools")
            .and_then(Value::as_array)
            .ok_or_else(|| AgentFlowError::Discovery {
                server: server.to_string(),
                reason: "response missing 'tools' array".to_string(),
            })?;

        let mut tools = Vec::with_capacity(entries.len());
        for entry in entries {
            let tool = match entry {
                // Bare string form: just a name
                Value::String(name) => Tool::new(name, server),
                Value::Object(obj) => {
                    let name = obj.get("name").and_then(Value::as_str).ok_or_else(|| {
                        AgentFlowError::Discovery {
                            server: server.to_string(),
                            reason: "tool entry missing 'name'".to_string(),
                        }
                    })?;
                    let description = obj
                        .get("description")
                        .and_then(Value::as_str)
                        .unwrap_or_default();
                    let schema = obj
                        .get("inputSchema")
                        .or_else(|| obj.get("input_schema"))
                        .cloned()
                        .unwrap_or_else(|| Value::Object(Default::default()));
                    Tool::new(name, server)
                        .with_description(description)
                        .with_schema(schema)
                }
                other => {
                    return Err(AgentFlowError::Discovery {
                        server: server.to_string(),
                        reason: format!("unexpected tool entry: {}", other),
                    });
                }
            };
            tools.push(tool);
        }
        Ok(tools)
    }

    /// Pull a human-readable payload out of a call response. Servers vary:
    /// some wrap output in MCP-style content blocks, some return a flat
    /// `text` or `result` field.
    fn extract_content(body: &Value) -> String {
        if let Some(text) = body
            .pointer("/content/0/text")
            .and_then(Value::as_str)
        {
            return text.to_string();
        }
        if let Some(text) = body.get("text").and_then(Value::as_str) {
            return text.to_string();
        }
        if let Some(result) = body.get("result") {
            return match result {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
        }
        body.to_string()
    }
}

#[async_trait]
impl ServerPool for HttpServerPool {
    async fn list_tools(&self, server: &ServerConfig) -> Result<Vec<Tool>> {
        let handle = self.handle(server).await?;
        let url = format!("{}/mcp/tools", handle.base_url);

        let response = handle.client.get(&url).send().await.map_err(|e| {
            AgentFlowError::Discovery { server: server.name.clone(), reason: e.to_string() }
        })?;

        if !response.status().is_success() {
            return Err(AgentFlowError::Discovery {
                server: server.name.clone(),
                reason: format!("HTTP {}", response.status()),
            });
        }

        let body: Value = response.json().await.map_err(|e| AgentFlowError::Discovery {
            server: server.name.clone(),
            reason: format!("invalid JSON: {}", e),
        })?;

        Self::parse_tool_list(&server.name, &body)
    }

    async fn call_tool(&self, server: &str, tool: &str, arguments: &Value) -> ToolOutcome {
        let config = match self.configs.get(server) {
            Some(config) => config,
            None => return ToolOutcome::error(format!("unknown server '{}'", server)),
        };
        let handle = match self.handle(config).await {
            Ok(handle) => handle,
            Err(e) => return ToolOutcome::error(e.to_string()),
        };

        let url = format!("{}/mcp/tools/{}/call", handle.base_url, tool);
        log::debug!("Calling tool '{}' on server '{}'", tool, server);

        let response = match handle.client.post(&url).json(arguments).send().await {
            Ok(response) => response,
            Err(e) => return ToolOutcome::error(format!("call to '{}' failed: {}", tool, e)),
        };

        let status = response.status();
        let body: Value = match response.json().await {
            Ok(body) => body,
            Err(e) => return ToolOutcome::error(format!("invalid response from '{}': {}", tool, e)),
        };

        if !status.is_success() {
            return ToolOutcome::error(format!("'{}' returned HTTP {}: {}", tool, status, Self::extract_content(&body)));
        }

        // Remote-side failures ride in the body
        if body.get("isError").and_then(Value::as_bool).unwrap_or(false)
            || body.get("error").is_some()
        {
            return ToolOutcome::error(Self::extract_content(&body));
        }

        ToolOutcome::success(Self::extract_content(&body))
    }
}

/// In-memory pool replaying scripted outcomes. Shared by unit and
/// integration tests.
pub struct MockServerPool {
    tools: HashMap<String, Vec<Tool>>,
    failing: Vec<String>,
    scripts: std::sync::Mutex<HashMap<String, std::collections::VecDeque<ToolOutcome>>>,
    default_outcome: Option<ToolOutcome>,
    calls: std::sync::atomic::AtomicUsize,
}

impl MockServerPool {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
            failing: Vec::new(),
            scripts: std::sync::Mutex::new(HashMap::new()),
            default_outcome: None,
            calls: std::sync::atomic::AtomicUsize::new(0),
        }
    }

    pub fn with_tools(mut self, server: &str, names: &[&str]) -> Self {
        let tools = names.iter().map(|n| Tool::new(*n, server)).collect();
        self.tools.insert(server.to_string(), tools);
        self
    }

    /// Make discovery fail for this server
    pub fn with_failing_discovery(mut self, server: &str) -> Self {
        self.failing.push(server.to_string());
        self
    }

    /// Queue outcomes a tool returns on successive calls
    pub fn with_script(self, tool: &str, outcomes: Vec<ToolOutcome>) -> Self {
        {
            let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
            scripts.insert(tool.to_string(), outcomes.into());
        }
        self
    }

    /// Outcome returned once a tool's script runs dry (or for unscripted
    /// tools)
    pub fn with_default_outcome(mut self, outcome: ToolOutcome) -> Self {
        self.default_outcome = Some(outcome);
        self
    }

    /// Total number of tool calls dispatched
    pub fn call_count(&self) -> usize {
        self.calls.load(std::sync::atomic::Ordering::SeqCst)
    }
}

impl Default for MockServerPool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ServerPool for MockServerPool {
    async fn list_tools(&self, server: &ServerConfig) -> Result<Vec<Tool>> {
        if self.failing.contains(&server.name) {
            return Err(AgentFlowError::Discovery {
                server: server.name.clone(),
                reason: "connection refused".to_string(),
            });
        }
        Ok(self.tools.get(&server.name).cloned().unwrap_or_default())
    }

    async fn call_tool(&self, _server: &str, tool: &str, _arguments: &Value) -> ToolOutcome {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        let mut scripts = self.scripts.lock().unwrap_or_else(|e| e.into_inner());
        if let Some(queue) = scripts.get_mut(tool) {
            if let Some(outcome) = queue.pop_front() {
                return outcome;
            }
        }
        self.default_outcome
            .clone()
            .unwrap_or_else(|| ToolOutcome::error(format!("no scripted outcome for '{}'", tool)))
    }
}
