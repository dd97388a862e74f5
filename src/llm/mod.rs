//! LLM module - inference backend integrations
//!
//! Provides the backend abstraction with Anthropic as the primary
//! implementation and a scripted backend for offline runs.

pub mod anthropic;
pub mod scripted;
pub mod traits;

pub use anthropic::AnthropicClient;
pub use scripted::ScriptedBackend;
pub use traits::{
    InferenceBackend, InferenceEvent, InferenceRequest, InferenceResponse, InferenceStream,
    TokenUsage, ToolChoice,
};
