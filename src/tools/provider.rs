//! Tool provider abstraction
//!
//! A tool provider wraps one external tool server and exposes its catalogue
//! under a namespace.

use async_trait::async_trait;
use serde_json::Value;

use crate::core::{Result, ToolDefinition, ToolName};

/// A call routed to a provider
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Local tool name, without the provider namespace
    pub tool_name: String,
    /// JSON arguments for the tool
    pub arguments: Value,
}

impl ToolInvocation {
    /// Create a new invocation
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
        }
    }
}

/// An external service exposing invocable tools
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Namespace under which this provider's tools are published
    fn name(&self) -> &str;

    /// Catalogue of tools, names already namespaced
    async fn list_tools(&self) -> Result<Vec<ToolDefinition>>;

    /// Invoke a tool; `extended_timeout` selects the long-running budget
    async fn invoke(&self, invocation: &ToolInvocation, extended_timeout: bool) -> Result<Value>;

    /// Release the underlying connection
    async fn close(&self) {}
}

/// Longest tool name the inference API accepts
pub const MAX_TOOL_NAME_LEN: usize = 64;

/// Longest namespace produced by [`clean_server_name`]
pub const MAX_NAMESPACE_LEN: usize = 24;

/// Normalise a provider name for use as a namespace
///
/// Tool names may only contain ASCII letters, digits, `_` and `-`, so scoped
/// package names like `@acme/server` are rewritten. Runs of underscores are
/// collapsed so a namespace never contains the separator, and a trailing
/// underscore is dropped so the separator stays unambiguous.
pub fn clean_server_name(name: &str) -> String {
    let mut clean: String = name
        .trim_start_matches('@')
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '_' })
        .collect();
    while clean.contains("__") {
        clean = clean.replace("__", "_");
    }
    clean.truncate(MAX_NAMESPACE_LEN);
    let clean = clean.trim_matches('_');

    if clean.is_empty() {
        "tools".to_string()
    } else {
        clean.to_string()
    }
}

/// Namespaced tool name for a provider's local tool
pub fn namespaced(provider: &str, local: &str) -> String {
    ToolName::new(provider, local).to_string()
}

/// Whether the inference API accepts `name` as a tool name
pub fn is_valid_tool_name(name: &str) -> bool {
    !name.is_empty()
        && name.len() <= MAX_TOOL_NAME_LEN
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}
