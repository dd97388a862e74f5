//! Switchboard - multi-agent orchestration core
//!
//! Routes a conversation through a set of specialised agents. Each agent has
//! its own instructions and tools; an agent passes the conversation on by
//! calling a handoff tool, so routing and tool use share one mechanism.
//!
//! # Architecture
//!
//! - **Core**: Shared types, configuration, and error handling
//! - **LLM**: Inference backend abstraction with an Anthropic implementation
//! - **Tools**: Tool providers, the MCP client, and provider bootstrap
//! - **Agent**: Agents, the dispatcher, and the buffered and streaming engine
//! - **CLI**: Command-line interface and REPL
//!
//! # Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use switchboard::agent::{default_registry, RunRequest, Swarm, SwarmSettings};
//! use switchboard::llm::AnthropicClient;
//! use switchboard::tools::ProviderRegistry;
//! use switchboard::{Config, Message};
//!
//! #[tokio::main]
//! async fn main() -> switchboard::Result<()> {
//!     let config = Config::load();
//!     let swarm = Swarm::new(
//!         Arc::new(default_registry(&config.anthropic.model)),
//!         Arc::new(ProviderRegistry::new()),
//!         Arc::new(AnthropicClient::from_config(&config.anthropic)?),
//!         SwarmSettings::from_config(&config),
//!     );
//!
//!     let response = swarm
//!         .run(RunRequest::new("planner_agent", vec![Message::user("What is our runway?")]))
//!         .await?;
//!     println!("{}: {:?}", response.agent_name, response.last_text());
//!     Ok(())
//! }
//! ```

pub mod agent;
pub mod cli;
pub mod core;
pub mod llm;
pub mod tools;

// Re-export commonly used items
pub use agent::{Agent, AgentRegistry, RunRequest, RunResponse, Swarm, SwarmEvent};
pub use cli::{Repl, Session};
pub use core::{Config, Message, Result, SwitchboardError};
