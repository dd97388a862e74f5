//! Shared types used across Switchboard modules
//!
//! Contains the conversation message model, tool definitions, namespaced tool
//! names, and the action union the engine derives from inference output.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Separator between a namespace and a local tool name
pub const SEPARATOR: &str = "___";

/// Namespace reserved for agent handoff tools
pub const HANDOFF_NAMESPACE: &str = "_AGENT_HANDOFF";

/// Trailer written into a handoff tool result
pub const HANDOFF_COMPLETED: &str = "COMPLETED_HANDOFF";

/// Sender name used for messages typed by the user
pub const USER_SENDER: &str = "user";

/// Free-form key/value bag threaded through instruction templates
pub type ContextVariables = serde_json::Map<String, Value>;

/// Role of a message in the conversation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// Discriminant of a message's content
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Text,
    ToolUse,
    ToolResult,
}

/// Payload of a conversation message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "content", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text
    Text(String),
    /// Tool calls requested by an assistant
    ToolUse(Vec<ToolCall>),
    /// Results answering earlier tool calls
    ToolResult(Vec<ToolResultBlock>),
}

/// A message in a conversation
///
/// `sender` names the agent (or `"user"`) that produced the message. Several
/// agents all post as [`Role::Assistant`], so the role alone cannot tell them
/// apart.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender
    pub role: Role,
    /// Agent name, or `"user"`
    pub sender: String,
    /// Message payload
    #[serde(flatten)]
    pub content: MessageContent,
}

impl Message {
    /// Create a new user text message
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            sender: USER_SENDER.to_string(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create a new assistant text message authored by `sender`
    pub fn assistant(sender: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            sender: sender.into(),
            content: MessageContent::Text(content.into()),
        }
    }

    /// Create an assistant message carrying tool calls
    pub fn tool_use(sender: impl Into<String>, calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            sender: sender.into(),
            content: MessageContent::ToolUse(calls),
        }
    }

    /// Create a tool result message; tool results travel with the user role
    pub fn tool_result(sender: impl Into<String>, results: Vec<ToolResultBlock>) -> Self {
        Self {
            role: Role::User,
            sender: sender.into(),
            content: MessageContent::ToolResult(results),
        }
    }

    /// Kind of content carried by this message
    pub fn kind(&self) -> MessageKind {
        match self.content {
            MessageContent::Text(_) => MessageKind::Text,
            MessageContent::ToolUse(_) => MessageKind::ToolUse,
            MessageContent::ToolResult(_) => MessageKind::ToolResult,
        }
    }

    /// Text content, if this is a text message
    pub fn text(&self) -> Option<&str> {
        match &self.content {
            MessageContent::Text(text) => Some(text),
            _ => None,
        }
    }

    /// Extend a streamed text message in place
    ///
    /// Non-text messages are left untouched.
    pub fn push_text(&mut self, delta: &str) {
        if let MessageContent::Text(text) = &mut self.content {
            text.push_str(delta);
        }
    }

    /// Project to the `{role, content}` shape sent to the inference backend
    pub fn project(&self) -> WireMessage {
        let content = match &self.content {
            MessageContent::Text(text) => WireContent::Text(text.clone()),
            MessageContent::ToolUse(calls) => WireContent::Blocks(
                calls
                    .iter()
                    .map(|call| WireBlock::ToolUse {
                        id: call.id.clone(),
                        name: call.name.clone(),
                        input: call.arguments.clone(),
                    })
                    .collect(),
            ),
            MessageContent::ToolResult(results) => WireContent::Blocks(
                results
                    .iter()
                    .map(|result| WireBlock::ToolResult {
                        tool_use_id: result.tool_call_id.clone(),
                        content: result.content.clone(),
                        is_error: result.is_error,
                    })
                    .collect(),
            ),
        };

        WireMessage {
            role: self.role,
            content,
        }
    }
}

/// Project a whole history, dropping sender and type metadata
pub fn project_history(messages: &[Message]) -> Vec<WireMessage> {
    messages.iter().map(Message::project).collect()
}

/// Text of the most recent user-authored text message
pub fn latest_user_text(messages: &[Message]) -> Option<&str> {
    messages
        .iter()
        .rev()
        .find(|m| m.role == Role::User && m.sender == USER_SENDER)
        .and_then(Message::text)
}

/// Minimal message shape understood by the inference backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    pub role: Role,
    pub content: WireContent,
}

/// Content of a projected message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum WireContent {
    Text(String),
    Blocks(Vec<WireBlock>),
}

/// Structured block inside a projected message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireBlock {
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    ToolResult {
        tool_use_id: String,
        content: String,
        #[serde(default, skip_serializing_if = "std::ops::Not::not")]
        is_error: bool,
    },
}

/// A tool call made by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Identifier pairing the call with its result
    pub id: String,
    /// Namespaced tool name
    pub name: String,
    /// JSON arguments for the tool
    pub arguments: Value,
}

impl ToolCall {
    /// Create a new tool call
    pub fn new(id: impl Into<String>, name: impl Into<String>, arguments: Value) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            arguments,
        }
    }

    /// Get a string argument by key
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.arguments
            .get(key)
            .and_then(|v| v.as_str())
            .map(|s| s.to_string())
    }
}

/// Result answering one tool call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResultBlock {
    /// Id of the tool call this answers
    pub tool_call_id: String,
    /// Serialized result or error text
    pub content: String,
    /// Whether the content describes a failure
    #[serde(default)]
    pub is_error: bool,
}

impl ToolResultBlock {
    /// Create a successful result
    pub fn success(tool_call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: content.into(),
            is_error: false,
        }
    }

    /// Create a failed result
    pub fn failure(tool_call_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            tool_call_id: tool_call_id.into(),
            content: error.into(),
            is_error: true,
        }
    }
}

/// Definition of a tool that can be called by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Namespaced tool name
    pub name: String,
    /// Description of what the tool does
    #[serde(default)]
    pub description: String,
    /// JSON Schema for the input
    pub input_schema: Value,
}

impl ToolDefinition {
    /// Create a new tool definition
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// One block of an inference response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    Text { text: String },
    ToolUse { id: String, name: String, input: Value },
}

impl ContentBlock {
    /// Create a text block
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    /// Create a tool-use block
    pub fn tool_use(id: impl Into<String>, name: impl Into<String>, input: Value) -> Self {
        Self::ToolUse {
            id: id.into(),
            name: name.into(),
            input,
        }
    }
}

/// A namespaced tool name: `<namespace>___<local>`
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ToolName {
    pub namespace: String,
    pub local: String,
}

impl ToolName {
    /// Create a tool name from its parts
    pub fn new(namespace: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            local: local.into(),
        }
    }

    /// Name of the handoff tool targeting `agent`
    pub fn handoff(agent: impl Into<String>) -> Self {
        Self::new(HANDOFF_NAMESPACE, agent)
    }

    /// Split a namespaced name at the first separator
    pub fn parse(name: &str) -> Option<Self> {
        let (namespace, local) = name.split_once(SEPARATOR)?;
        if namespace.is_empty() || local.is_empty() {
            return None;
        }
        Some(Self::new(namespace, local))
    }

    /// Whether this names an agent handoff
    pub fn is_handoff(&self) -> bool {
        self.namespace == HANDOFF_NAMESPACE
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.namespace, SEPARATOR, self.local)
    }
}

/// What the engine does with one response block
#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    /// Append assistant text
    Say(String),
    /// Invoke a tool on an external provider
    CallTool(ToolCall),
    /// Switch the speaking agent
    HandoffTo { call: ToolCall, target: String },
}

impl From<&ContentBlock> for Action {
    fn from(block: &ContentBlock) -> Self {
        match block {
            ContentBlock::Text { text } => Action::Say(text.clone()),
            ContentBlock::ToolUse { id, name, input } => {
                let call = ToolCall::new(id.clone(), name.clone(), input.clone());
                match ToolName::parse(name) {
                    Some(tool_name) if tool_name.is_handoff() => Action::HandoffTo {
                        call,
                        target: tool_name.local,
                    },
                    _ => Action::CallTool(call),
                }
            }
        }
    }
}
