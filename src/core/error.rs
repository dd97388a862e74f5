//! Custom error types for Switchboard
//!
//! Provides a unified error handling system across all modules.

use thiserror::Error;

/// Main error type for Switchboard operations
#[derive(Error, Debug)]
pub enum SwitchboardError {
    /// No agent registered under the requested name
    #[error("Agent '{0}' is not registered")]
    AgentNotFound(String),

    /// A tool call named a namespace with no connected provider
    #[error("No tool provider registered for '{0}'")]
    NoProviderRegistered(String),

    /// Inference backend errors (transport, parsing, protocol)
    #[error("Inference error: {0}")]
    Inference(String),

    /// Inference backend answered with a non-success status
    #[error("Inference API error ({status}): {message}")]
    InferenceStatus { status: u16, message: String },

    /// Tool provider errors (protocol, tool-reported failures)
    #[error("Tool provider error: {0}")]
    ToolProvider(String),

    /// Tool provider server-side failure carrying a status code
    #[error("Tool provider server error ({status}): {message}")]
    ProviderServer { status: u16, message: String },

    /// A tool invocation exceeded its timeout
    #[error("Tool call timed out: {0}")]
    ToolTimeout(String),

    /// The connection to a tool provider is gone
    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON parsing errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// HTTP request errors
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error for other cases
    #[error("{0}")]
    Other(String),
}

/// Convenience Result type for Switchboard operations
pub type Result<T> = std::result::Result<T, SwitchboardError>;

impl SwitchboardError {
    /// Create an inference error
    pub fn inference(msg: impl Into<String>) -> Self {
        Self::Inference(msg.into())
    }

    /// Create a tool provider error
    pub fn tool(msg: impl Into<String>) -> Self {
        Self::ToolProvider(msg.into())
    }

    /// Create a config error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Whether a tool provider may retry the call that produced this error
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ProviderServer { status, .. } if *status >= 500)
    }

    /// Whether the inference client may retry the call that produced this error
    pub fn is_retryable_inference(&self) -> bool {
        match self {
            Self::InferenceStatus { status, .. } => matches!(status, 429 | 500 | 502 | 503 | 504 | 529),
            Self::Http(e) => e.is_connect() || e.is_timeout(),
            _ => false,
        }
    }
}
