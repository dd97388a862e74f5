//! Conversation session
//!
//! Carries history, the active agent, and context variables from one run
//! to the next, so the agent that finished a run answers the next message.

use serde_json::Value;

use crate::agent::swarm::{RunRequest, RunResponse};
use crate::core::{ContextVariables, Message, USER_SENDER};

/// A multi-run conversation
#[derive(Debug, Clone)]
pub struct Conversation {
    /// Message history
    messages: Vec<Message>,
    /// Agent that answers the next message
    agent_name: String,
    /// Template values sent with every run
    context_variables: ContextVariables,
}

impl Conversation {
    /// Create a new conversation starting at `agent_name`
    pub fn new(agent_name: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            agent_name: agent_name.into(),
            context_variables: ContextVariables::new(),
        }
    }

    /// Request for a new user message; the history itself is unchanged
    pub fn request(&self, user_input: impl Into<String>) -> RunRequest {
        let mut messages = self.messages.clone();
        messages.push(Message::user(user_input));
        RunRequest::new(self.agent_name.clone(), messages).context(self.context_variables.clone())
    }

    /// Adopt the history and active agent of a finished run
    pub fn apply(&mut self, response: RunResponse) {
        self.agent_name = response.agent_name;
        self.messages = response.messages;
    }

    /// Agent that answers the next message
    pub fn agent_name(&self) -> &str {
        &self.agent_name
    }

    /// Make `agent_name` answer the next message
    pub fn set_agent(&mut self, agent_name: impl Into<String>) {
        self.agent_name = agent_name.into();
    }

    /// Full history
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Get the last assistant text
    pub fn last_assistant_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.sender != USER_SENDER)
            .find_map(Message::text)
    }

    /// Clear all history; context variables stay
    pub fn clear(&mut self) {
        self.messages.clear();
    }

    /// Get message count
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Check if empty
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Context variables
    pub fn context(&self) -> &ContextVariables {
        &self.context_variables
    }

    /// Set a context variable
    ///
    /// Text that parses as JSON is stored as that value, anything else as a
    /// string.
    pub fn set_context(&mut self, key: impl Into<String>, raw: &str) {
        let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
        self.context_variables.insert(key.into(), value);
    }

    /// Remove a context variable
    pub fn remove_context(&mut self, key: &str) -> Option<Value> {
        self.context_variables.remove(key)
    }

    /// Remove all context variables
    pub fn clear_context(&mut self) {
        self.context_variables.clear();
    }
}
