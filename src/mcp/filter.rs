//! Two-level permission filtering
//!
//! Level 1 is the server's own filter: which of its discovered tools are
//! visible to anyone. Level 2 is the agent's filter: its server list plus
//! an optional tool allowlist. The effective set is the strict
//! intersection of both; a wildcard at either level is identity at that
//! level, never a bypass of the other.

use std::collections::BTreeMap;

use crate::config::{AgentConfig, ServerConfig};
use crate::mcp::catalog::{Tool, ToolCatalog};

/// An agent's allowed tools, keyed by tool name. Ordered so that the same
/// configuration always presents tools to the model in the same order.
pub type EffectiveToolSet = BTreeMap<String, Tool>;

/// Tools a server exposes after its own filter: discovered tools
/// intersected with the server-level allowlist. Disabled servers expose
/// nothing.
pub fn server_visible_tools<'a>(server: &ServerConfig, catalog: &'a ToolCatalog) -> Vec<&'a Tool> {
    if !server.enabled {
        return Vec::new();
    }
    catalog
        .tools_for(&server.name)
        .iter()
        .filter(|tool| server.tools.matches(&tool.name))
        .collect()
}

/// An agent's effective tool set: the union of visible tools across its
/// granted servers, intersected with the agent-level allowlist.
///
/// Names that match nothing are silently ignored; a misspelled entry
/// shrinks the set rather than failing the session. On a name collision
/// across servers the first granting server in the agent's list wins.
pub fn effective_tools(
    agent: &AgentConfig,
    servers: &[ServerConfig],
    catalog: &ToolCatalog,
) -> EffectiveToolSet {
    let mut effective = EffectiveToolSet::new();
    for server_name in &agent.servers {
        let Some(server) = servers.iter().find(|s| &s.name == server_name) else {
            continue;
        };
        for tool in server_visible_tools(server, catalog) {
            if !agent.tools.matches(&tool.name) {
                continue;
            }
            effective
                .entry(tool.name.clone())
                .or_insert_with(|| tool.clone());
        }
    }
    effective
}
