//! Tools module - external tool providers
//!
//! Contains the provider abstraction, the MCP client, the provider registry,
//! and the bootstrap that wires configured servers to agents.

pub mod connect;
pub mod mcp;
pub mod provider;
pub mod registry;

pub use connect::{attach_provider, connect_all, ServerStatus};
pub use mcp::McpClient;
pub use provider::{
    clean_server_name, is_valid_tool_name, namespaced, ToolInvocation, ToolProvider,
};
pub use registry::ProviderRegistry;
