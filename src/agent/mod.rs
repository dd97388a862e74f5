//! Agent module - agents, routing, and the orchestration engine
//!
//! Contains agent definitions and their registry, the tool-call dispatcher,
//! and the swarm engine in buffered and streaming form.

pub mod conversation;
pub mod definition;
pub mod dispatcher;
pub mod loop_state;
pub mod registry;
pub mod roster;
pub mod stream;
pub mod swarm;

pub use conversation::Conversation;
pub use definition::{Agent, AgentBuilder, InstructionsFn};
pub use dispatcher::{handoff_payload, parse_handoff_payload, Dispatched, Dispatcher, HandoffPayload};
pub use loop_state::RunState;
pub use registry::AgentRegistry;
pub use roster::default_registry;
pub use stream::{SwarmEvent, SwarmStream};
pub use swarm::{RunRequest, RunResponse, Swarm, SwarmSettings, MISSING_CREDENTIALS_MESSAGE};
