pub mod catalog;
pub mod filter;
pub mod pool;

pub use catalog::{Tool, ToolCatalog};
pub use filter::{effective_tools, server_visible_tools, EffectiveToolSet};
pub use pool::{HttpServerPool, MockServerPool, ServerPool, ToolOutcome};
