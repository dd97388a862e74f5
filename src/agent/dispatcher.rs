//! Tool-call dispatcher
//!
//! Resolves a model-issued tool call to either a provider invocation or an
//! agent handoff. Tool failures never escape: they come back as error
//! results the model can react to.

use std::sync::Arc;

use serde_json::Value;

use crate::agent::definition::Agent;
use crate::core::config::ToolConfig;
use crate::core::{
    Action, ContentBlock, Message, SwitchboardError, ToolCall, ToolName, ToolResultBlock,
    HANDOFF_COMPLETED, HANDOFF_NAMESPACE, SEPARATOR,
};
use crate::tools::{ProviderRegistry, ToolInvocation};

/// Outcome of dispatching one tool call
#[derive(Debug, Clone, PartialEq)]
pub struct Dispatched {
    /// `tool_result` message answering the call
    pub message: Message,
    /// Agent to switch to, when the call was a handoff
    pub handoff: Option<String>,
}

/// A decoded handoff result payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandoffPayload {
    pub target: String,
    pub request: Option<String>,
}

/// Build the result payload announcing a completed handoff
///
/// `_AGENT_HANDOFF___<target>___COMPLETED_HANDOFF`, followed by
/// `___<request>` when the model restated the request.
pub fn handoff_payload(target: &str, request: Option<&str>) -> String {
    let mut payload = format!(
        "{}{}{}{}{}",
        HANDOFF_NAMESPACE, SEPARATOR, target, SEPARATOR, HANDOFF_COMPLETED
    );
    if let Some(request) = request.filter(|r| !r.trim().is_empty()) {
        payload.push_str(SEPARATOR);
        payload.push_str(request);
    }
    payload
}

/// Decode a handoff payload; anything else yields `None`
pub fn parse_handoff_payload(payload: &str) -> Option<HandoffPayload> {
    let rest = payload
        .strip_prefix(HANDOFF_NAMESPACE)?
        .strip_prefix(SEPARATOR)?;
    let (target, rest) = rest.split_once(SEPARATOR)?;
    let rest = rest.strip_prefix(HANDOFF_COMPLETED)?;

    let request = match rest {
        "" => None,
        more => Some(more.strip_prefix(SEPARATOR)?.to_string()),
    };

    if target.is_empty() {
        return None;
    }
    Some(HandoffPayload {
        target: target.to_string(),
        request,
    })
}

/// Render a provider result as tool-result text
fn result_text(value: Value) -> String {
    match value {
        Value::String(text) => text,
        other => other.to_string(),
    }
}

/// Routes tool calls for the engine
#[derive(Clone)]
pub struct Dispatcher {
    providers: Arc<ProviderRegistry>,
    extended_tools: Vec<String>,
}

impl Dispatcher {
    /// Create a dispatcher over the given providers
    pub fn new(providers: Arc<ProviderRegistry>, settings: &ToolConfig) -> Self {
        Self {
            providers,
            extended_tools: settings
                .extended_tools
                .iter()
                .map(|p| p.to_lowercase())
                .collect(),
        }
    }

    /// Whether a local tool name gets the long-running timeout
    pub fn needs_extended_timeout(&self, local_name: &str) -> bool {
        let local = local_name.to_lowercase();
        self.extended_tools.iter().any(|p| local.contains(p.as_str()))
    }

    /// Dispatch one call made by `agent`
    pub async fn dispatch(&self, call: &ToolCall, agent: &Agent) -> Dispatched {
        let block = ContentBlock::tool_use(call.id.clone(), call.name.clone(), call.arguments.clone());

        let (result, handoff) = match Action::from(&block) {
            Action::HandoffTo { call, target } => {
                let request = call.get_string("request");
                tracing::info!(from = %agent.name(), to = %target, "Handoff requested");
                (
                    ToolResultBlock::success(&call.id, handoff_payload(&target, request.as_deref())),
                    Some(target),
                )
            }
            Action::CallTool(call) => (self.invoke(&call).await, None),
            Action::Say(_) => (
                ToolResultBlock::failure(&call.id, "Not a tool call"),
                None,
            ),
        };

        Dispatched {
            message: Message::tool_result(agent.name(), vec![result]),
            handoff,
        }
    }

    async fn invoke(&self, call: &ToolCall) -> ToolResultBlock {
        let Some(name) = ToolName::parse(&call.name) else {
            return ToolResultBlock::failure(
                &call.id,
                SwitchboardError::tool(format!("Malformed tool name '{}'", call.name)).to_string(),
            );
        };

        let Some(provider) = self.providers.get(&name.namespace) else {
            tracing::warn!(tool = %call.name, "No provider for tool namespace");
            return ToolResultBlock::failure(
                &call.id,
                SwitchboardError::NoProviderRegistered(name.namespace).to_string(),
            );
        };

        let extended = self.needs_extended_timeout(&name.local);
        let invocation = ToolInvocation::new(name.local.clone(), call.arguments.clone());

        match provider.invoke(&invocation, extended).await {
            Ok(value) => {
                tracing::debug!(tool = %call.name, "Tool call succeeded");
                ToolResultBlock::success(&call.id, result_text(value))
            }
            Err(e) => {
                tracing::warn!(tool = %call.name, "Tool call failed: {}", e);
                let text = e.to_string();
                ToolResultBlock::failure(
                    &call.id,
                    if text.is_empty() {
                        format!("Tool '{}' failed", call.name)
                    } else {
                        text
                    },
                )
            }
        }
    }
}
