//! Inference backend trait and request/response types
//!
//! The engine talks to any model vendor through [`InferenceBackend`]; only a
//! model identifier selects between models.

use async_trait::async_trait;
use futures::Stream;
use std::pin::Pin;

use crate::core::{ContentBlock, Result, ToolCall, ToolDefinition, WireMessage};

/// How the model may pick tools
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum ToolChoice {
    /// Model decides whether to use tools
    #[default]
    Auto,
    /// Model MUST use the named tool
    Forced(String),
    /// Model may not use tools
    None,
}

/// One inference call
#[derive(Debug, Clone)]
pub struct InferenceRequest {
    /// Preamble followed by the agent's instructions
    pub system_prompt: String,
    /// Model identifier
    pub model: String,
    /// Token budget for the response
    pub max_tokens: u32,
    /// Projected conversation history
    pub messages: Vec<WireMessage>,
    /// Tools the model may call
    pub tools: Vec<ToolDefinition>,
    /// Tool selection policy
    pub tool_choice: ToolChoice,
    /// Whether several tool calls may come back in one response
    pub parallel_tool_calls: bool,
}

/// Token usage information
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TokenUsage {
    pub input_tokens: u32,
    pub output_tokens: u32,
}

/// Ordered content blocks returned by one inference call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct InferenceResponse {
    /// Blocks in the order the model produced them
    pub content: Vec<ContentBlock>,
    /// Why the model stopped
    pub stop_reason: Option<String>,
    /// Token usage information
    pub usage: Option<TokenUsage>,
}

impl InferenceResponse {
    /// Build a response from blocks
    pub fn from_blocks(content: Vec<ContentBlock>) -> Self {
        Self {
            content,
            stop_reason: None,
            usage: None,
        }
    }

    /// Concatenated text of every text block
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Tool calls in block order
    pub fn tool_calls(&self) -> Vec<ToolCall> {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::ToolUse { id, name, input } => {
                    Some(ToolCall::new(id.clone(), name.clone(), input.clone()))
                }
                _ => None,
            })
            .collect()
    }

    /// Whether a trailing text block ends the response
    pub fn ends_with_text(&self) -> bool {
        matches!(self.content.last(), Some(ContentBlock::Text { .. }))
    }
}

/// Incremental event from a streaming inference call
#[derive(Debug, Clone, PartialEq)]
pub enum InferenceEvent {
    /// The response has started
    MessageStart,
    /// A fragment of text
    TextDelta(String),
    /// A tool-use block whose input is complete
    ToolUse(ToolCall),
    /// The whole response, equivalent to a buffered call
    MessageComplete(InferenceResponse),
}

/// Type alias for a boxed stream of inference events
pub type InferenceStream = Pin<Box<dyn Stream<Item = Result<InferenceEvent>> + Send>>;

/// Trait for inference backends
#[async_trait]
pub trait InferenceBackend: Send + Sync {
    /// Run one inference call to completion
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse>;

    /// Run one inference call, yielding events as they arrive
    ///
    /// The stream must end with [`InferenceEvent::MessageComplete`].
    async fn stream(&self, request: InferenceRequest) -> Result<InferenceStream>;

    /// Whether a usable credential is configured
    fn has_credentials(&self) -> bool;

    /// Replace the API key without rebuilding the backend
    fn set_api_key(&self, api_key: String);

    /// Get the backend name
    fn name(&self) -> &str;
}
