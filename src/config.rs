//! Configuration loading and validation
//!
//! Two layers: a top-level YAML config file (fallback chain: explicit path,
//! `~/.config/agentflow/agentflow.yml`, `./agentflow.yml`, built-in defaults)
//! and two declarative JSON documents referenced from it - the server list
//! and the agent list. Everything is loaded once at startup into an
//! immutable `Config` that gets passed to the pool, filter, and
//! orchestrator; no ambient lookups during a session.

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::{AgentFlowError, Result};

/// Environment variable overriding the servers document path
pub const SERVERS_FILE_ENV: &str = "AGENTFLOW_SERVERS_FILE";

/// Environment variable overriding the agents document path
pub const AGENTS_FILE_ENV: &str = "AGENTFLOW_AGENTS_FILE";

/// Environment variable overriding the agent flow (comma-separated names)
pub const FLOW_ENV: &str = "AGENTFLOW_FLOW";

/// Tool allow-list at either the server or the agent level.
///
/// Field absent or `["*"]` means wildcard - no restriction at that level.
/// Names are matched case-sensitively and exactly; there is no globbing
/// beyond the single wildcard token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ToolFilter {
    Wildcard,
    Names(Vec<String>),
}

impl Default for ToolFilter {
    fn default() -> Self {
        ToolFilter::Wildcard
    }
}

impl<'de> Deserialize<'de> for ToolFilter {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let names = Vec::<String>::deserialize(deserializer)?;
        if names.iter().any(|n| n == "*") {
            Ok(ToolFilter::Wildcard)
        } else {
            Ok(ToolFilter::Names(names))
        }
    }
}

impl ToolFilter {
    /// Check whether a tool name passes this filter
    pub fn matches(&self, name: &str) -> bool {
        match self {
            ToolFilter::Wildcard => true,
            ToolFilter::Names(names) => names.iter().any(|n| n == name),
        }
    }

    pub fn is_wildcard(&self) -> bool {
        matches!(self, ToolFilter::Wildcard)
    }
}

/// A single remote tool server, as declared in the servers document.
///
/// Immutable for the process lifetime.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub name: String,
    pub url: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,
    #[serde(default)]
    pub tools: ToolFilter,
}

/// A single agent definition, as declared in the agents document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub name: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Names of servers whose tools this agent may see
    #[serde(default)]
    pub servers: Vec<String>,
    #[serde(default)]
    pub tools: ToolFilter,
    pub system_prompt: String,
    /// Upper bound on tool attempts per turn; 0 means no tool call is ever
    /// dispatched for this agent
    #[serde(default = "default_max_tool_iterations")]
    pub max_tool_iterations: u32,
    /// Grant one extra reasoning round-trip after a successful tool result
    #[serde(default = "default_true")]
    pub reflect: bool,
    /// Allow this agent to end the session early with a termination phrase;
    /// the last agent in the flow always may
    #[serde(default)]
    pub can_terminate: bool,
    /// Position in the auto-derived flow; lower runs earlier
    #[serde(default = "default_order")]
    pub order: u32,
}

fn default_true() -> bool {
    true
}

fn default_timeout() -> u64 {
    30
}

fn default_max_tool_iterations() -> u32 {
    5
}

fn default_order() -> u32 {
    99
}

/// On-disk shape of the servers document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServersDocument {
    #[serde(default)]
    pub servers: Vec<ServerConfig>,
}

/// On-disk shape of the agents document
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentsDocument {
    #[serde(default)]
    pub agents: Vec<AgentConfig>,
    /// Explicit conversation flow; when empty the flow is derived from
    /// each enabled agent's `order` field
    #[serde(default)]
    pub conversation_flow: Vec<String>,
    /// Phrases that let a terminating agent end the session early
    #[serde(default)]
    pub termination_phrases: Vec<String>,
}

/// Reasoning service settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub model: String,
    pub base_url: String,
    /// Environment variable holding the API key
    pub api_key_env: String,
    pub timeout_seconds: u64,
    pub max_tokens: u32,
    pub temperature: f64,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            model: "gpt-4o".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            timeout_seconds: 120,
            max_tokens: 4096,
            temperature: 0.7,
        }
    }
}

/// Top-level configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub log_level: Option<String>,
    pub llm: LlmConfig,
    pub servers_file: PathBuf,
    pub agents_file: PathBuf,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: Some("info".to_string()),
            llm: LlmConfig::default(),
            servers_file: PathBuf::from("servers.json"),
            agents_file: PathBuf::from("agents.json"),
        }
    }
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        // Primary location: ~/.config/agentflow/agentflow.yml
        if let Some(config_dir) = dirs::config_dir() {
            let project_name = env!("CARGO_PKG_NAME");
            let primary = config_dir
                .join(project_name)
                .join(format!("{}.yml", project_name));
            if primary.exists() {
                return Self::load_from_file(&primary);
            }
        }

        // Fallback location: ./agentflow.yml
        let fallback = PathBuf::from(format!("{}.yml", env!("CARGO_PKG_NAME")));
        if fallback.exists() {
            return Self::load_from_file(&fallback);
        }

        log::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path)?;
        let config: Self = serde_yaml::from_str(&content).map_err(|e| {
            AgentFlowError::Configuration(format!(
                "Failed to parse {}: {}",
                path.as_ref().display(),
                e
            ))
        })?;
        log::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }

    /// Resolve the servers document path, honoring the env override
    pub fn servers_path(&self) -> PathBuf {
        std::env::var(SERVERS_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.servers_file.clone())
    }

    /// Resolve the agents document path, honoring the env override
    pub fn agents_path(&self) -> PathBuf {
        std::env::var(AGENTS_FILE_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|_| self.agents_file.clone())
    }
}

/// Load and validate the servers document
pub fn load_servers<P: AsRef<Path>>(path: P) -> Result<ServersDocument> {
    let content = fs::read_to_string(&path).map_err(|e| {
        AgentFlowError::Configuration(format!(
            "Failed to read servers document {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let doc: ServersDocument = serde_json::from_str(&content).map_err(|e| {
        AgentFlowError::Configuration(format!(
            "Malformed servers document {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    validate_servers(&doc)?;
    log::info!("Loaded {} servers from {}", doc.servers.len(), path.as_ref().display());
    Ok(doc)
}

/// Load and validate the agents document against the known servers
pub fn load_agents<P: AsRef<Path>>(path: P, servers: &ServersDocument) -> Result<AgentsDocument> {
    let content = fs::read_to_string(&path).map_err(|e| {
        AgentFlowError::Configuration(format!(
            "Failed to read agents document {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    let mut doc: AgentsDocument = serde_json::from_str(&content).map_err(|e| {
        AgentFlowError::Configuration(format!(
            "Malformed agents document {}: {}",
            path.as_ref().display(),
            e
        ))
    })?;
    if doc.termination_phrases.is_empty() {
        doc.termination_phrases = default_termination_phrases();
    }
    validate_agents(&doc, servers)?;
    log::info!("Loaded {} agents from {}", doc.agents.len(), path.as_ref().display());
    Ok(doc)
}

/// Termination phrases carried over from the original deployment defaults
pub fn default_termination_phrases() -> Vec<String> {
    [
        "APPROVED",
        "workflow completed",
        "task finished",
        "query resolved",
        "analysis complete",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

fn validate_servers(doc: &ServersDocument) -> Result<()> {
    let mut seen = HashSet::new();
    for server in &doc.servers {
        if server.name.is_empty() {
            return Err(AgentFlowError::Configuration(
                "Server with empty name".to_string(),
            ));
        }
        if server.url.is_empty() {
            return Err(AgentFlowError::Configuration(format!(
                "Server '{}' has no url",
                server.name
            )));
        }
        if !seen.insert(server.name.as_str()) {
            return Err(AgentFlowError::Configuration(format!(
                "Duplicate server name '{}'",
                server.name
            )));
        }
    }
    Ok(())
}

fn validate_agents(doc: &AgentsDocument, servers: &ServersDocument) -> Result<()> {
    let server_names: HashSet<&str> = servers.servers.iter().map(|s| s.name.as_str()).collect();
    let mut seen = HashSet::new();

    for agent in &doc.agents {
        if agent.name.is_empty() {
            return Err(AgentFlowError::Configuration(
                "Agent with empty name".to_string(),
            ));
        }
        if !seen.insert(agent.name.as_str()) {
            return Err(AgentFlowError::Configuration(format!(
                "Duplicate agent name '{}'",
                agent.name
            )));
        }
        // Unknown server names are rejected at load time, not at call time
        for server in &agent.servers {
            if !server_names.contains(server.as_str()) {
                return Err(AgentFlowError::Configuration(format!(
                    "Agent '{}' references unknown server '{}'",
                    agent.name, server
                )));
            }
        }
    }

    // A configured flow may only name agents that exist
    for name in &doc.conversation_flow {
        if !seen.contains(name.as_str()) {
            return Err(AgentFlowError::Configuration(format!(
                "Conversation flow references unknown agent '{}'",
                name
            )));
        }
    }

    Ok(())
}

impl AgentsDocument {
    /// All enabled agents, document order preserved
    pub fn enabled_agents(&self) -> Vec<&AgentConfig> {
        self.agents.iter().filter(|a| a.enabled).collect()
    }

    pub fn get_agent(&self, name: &str) -> Option<&AgentConfig> {
        self.agents.iter().find(|a| a.name == name)
    }

    /// The default flow: the explicit `conversation_flow` restricted to
    /// enabled agents, or - when none is configured - enabled agents sorted
    /// by their `order` field (stable, so document order breaks ties).
    pub fn default_flow(&self) -> Vec<String> {
        if !self.conversation_flow.is_empty() {
            let enabled: HashSet<&str> =
                self.enabled_agents().iter().map(|a| a.name.as_str()).collect();
            return self
                .conversation_flow
                .iter()
                .filter(|n| enabled.contains(n.as_str()))
                .cloned()
                .collect();
        }
        let mut agents = self.enabled_agents();
        agents.sort_by_key(|a| a.order);
        agents.iter().map(|a| a.name.clone()).collect()
    }
}
