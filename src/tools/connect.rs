//! Provider bootstrap
//!
//! Connects every configured server, registers it, and publishes its tools
//! on the agents that should see them. A server that fails is reported and
//! skipped; the rest still come up.

use std::sync::Arc;

use futures::future::join_all;

use crate::agent::AgentRegistry;
use crate::core::{Config, Result};
use crate::tools::mcp::McpClient;
use crate::tools::provider::ToolProvider;
use crate::tools::registry::ProviderRegistry;

/// Outcome of bringing up one server
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerStatus {
    /// Namespace the server's tools live under
    pub name: String,
    /// Tools the server advertised
    pub tool_count: usize,
    /// Failure description when the server could not be used
    pub error: Option<String>,
}

impl ServerStatus {
    /// Whether the server is registered and serving tools
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Register `provider` and append its catalogue to each relevant agent
///
/// Returns the number of tools the provider advertised. Agents that are not
/// registered are skipped with a warning.
pub async fn attach_provider(
    provider: Arc<dyn ToolProvider>,
    relevant_agents: &[String],
    agents: &AgentRegistry,
    providers: &ProviderRegistry,
) -> Result<usize> {
    let tools = provider.list_tools().await?;
    let name = provider.name().to_string();
    providers.register(provider);

    for agent in relevant_agents {
        if let Err(e) = agents.extend_tools(agent, &tools) {
            tracing::warn!(server = %name, agent = %agent, "Could not extend agent: {}", e);
        }
    }

    tracing::info!(server = %name, tools = tools.len(), "Provider attached");
    Ok(tools.len())
}

/// Connect all servers in `config` concurrently
pub async fn connect_all(
    config: &Config,
    agents: &AgentRegistry,
    providers: &ProviderRegistry,
) -> Vec<ServerStatus> {
    let attempts = config.servers.iter().map(|(name, server)| async move {
        let client = match McpClient::connect(name, server, &config.tools).await {
            Ok(client) => Arc::new(client),
            Err(e) => {
                tracing::error!(server = %name, "Failed to connect: {}", e);
                return ServerStatus {
                    name: name.clone(),
                    tool_count: 0,
                    error: Some(e.to_string()),
                };
            }
        };

        let namespace = client.name().to_string();
        match attach_provider(client.clone(), &server.relevant_agents, agents, providers).await {
            Ok(tool_count) => ServerStatus {
                name: namespace,
                tool_count,
                error: None,
            },
            Err(e) => {
                tracing::error!(server = %name, "Failed to list tools: {}", e);
                client.disconnect().await;
                providers.unregister(&namespace);
                ServerStatus {
                    name: namespace,
                    tool_count: 0,
                    error: Some(e.to_string()),
                }
            }
        }
    });

    join_all(attempts).await
}
