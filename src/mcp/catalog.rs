//! Tool catalog and dynamic discovery
//!
//! Discovery runs once at startup, concurrently across all enabled servers,
//! and acts as a barrier: no agent's effective tool set is computed until
//! every server has either reported its tools or been marked failed. One
//! server failing never blocks the others.

use std::collections::HashMap;

use futures::future::join_all;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ServerConfig;
use crate::llm::ToolSchema;
use crate::mcp::pool::ServerPool;

/// A named, schema-described operation offered by a tool server.
///
/// Only discovery creates Tools; a tool declared in configuration but not
/// reported by the server does not exist.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tool {
    pub name: String,
    /// Owning server's name
    pub server: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub input_schema: Value,
}

impl Tool {
    pub fn new(name: impl Into<String>, server: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            server: server.into(),
            description: String::new(),
            input_schema: Value::Object(Default::default()),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_schema(mut self, schema: Value) -> Self {
        self.input_schema = schema;
        self
    }

    /// The surface presented to the reasoning service
    pub fn to_schema(&self) -> ToolSchema {
        let description = if self.description.is_empty() {
            format!("Tool '{}' on server '{}'", self.name, self.server)
        } else {
            self.description.clone()
        };
        ToolSchema::new(&self.name, description, self.input_schema.clone())
    }
}

/// Per-server registry of discovered tools
#[derive(Debug, Default)]
pub struct ToolCatalog {
    tools: HashMap<String, Vec<Tool>>,
    failed: Vec<String>,
}

impl ToolCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Discover tools from every enabled server concurrently.
    ///
    /// Disabled servers are skipped entirely. A server whose discovery
    /// fails is recorded in `failed_servers` and contributes zero tools;
    /// an empty tool list is a valid result, not a failure.
    pub async fn discover_all(pool: &dyn ServerPool, servers: &[ServerConfig]) -> Self {
        let enabled: Vec<&ServerConfig> = servers.iter().filter(|s| s.enabled).collect();

        let results = join_all(enabled.iter().map(|server| async move {
            let result = pool.list_tools(server).await;
            (server.name.clone(), result)
        }))
        .await;

        let mut catalog = Self::new();
        for (name, result) in results {
            match result {
                Ok(tools) => {
                    log::info!("Discovered {} tools from server '{}'", tools.len(), name);
                    catalog.tools.insert(name, tools);
                }
                Err(e) => {
                    log::error!("Discovery failed for server '{}': {}", name, e);
                    catalog.tools.insert(name.clone(), Vec::new());
                    catalog.failed.push(name);
                }
            }
        }
        catalog
    }

    /// Discovered tools for a server, in the order the server reported
    /// them. Empty for disabled, failed, or never-discovered servers.
    pub fn tools_for(&self, server: &str) -> &[Tool] {
        self.tools.get(server).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Servers whose discovery failed
    pub fn failed_servers(&self) -> &[String] {
        &self.failed
    }

    /// True when every enabled server failed discovery (and there was at
    /// least one to try)
    pub fn total_failure(&self, servers: &[ServerConfig]) -> bool {
        let enabled = servers.iter().filter(|s| s.enabled).count();
        enabled > 0 && self.failed.len() == enabled
    }

    pub fn total_tools(&self) -> usize {
        self.tools.values().map(Vec::len).sum()
    }

    /// Insert tools directly, bypassing discovery. Test seam.
    pub fn insert(&mut self, server: impl Into<String>, tools: Vec<Tool>) {
        self.tools.insert(server.into(), tools);
    }
}
