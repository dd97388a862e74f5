//! Agent definitions
//!
//! An agent is a named, immutable bundle of an instruction template, a model
//! identifier, and the tools it may call. Handoffs to other agents are
//! ordinary tools in the reserved handoff namespace.

use std::fmt;
use std::sync::Arc;

use serde_json::json;

use crate::core::{ContextVariables, ToolDefinition, ToolName};
use crate::llm::ToolChoice;

/// Builds the system prompt from context variables and the latest user text
pub type InstructionsFn = dyn Fn(&ContextVariables, Option<&str>) -> String + Send + Sync;

/// A named agent
#[derive(Clone)]
pub struct Agent {
    name: String,
    instructions: Arc<InstructionsFn>,
    model: String,
    tools: Vec<ToolDefinition>,
    tool_choice: ToolChoice,
    parallel_tool_calls: bool,
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("name", &self.name)
            .field("model", &self.model)
            .field(
                "tools",
                &self.tools.iter().map(|t| t.name.as_str()).collect::<Vec<_>>(),
            )
            .field("tool_choice", &self.tool_choice)
            .field("parallel_tool_calls", &self.parallel_tool_calls)
            .finish()
    }
}

/// Builder for creating Agents
pub struct AgentBuilder {
    name: String,
    instructions: Option<Arc<InstructionsFn>>,
    model: String,
    tools: Vec<ToolDefinition>,
    tool_choice: ToolChoice,
    parallel_tool_calls: bool,
}

impl AgentBuilder {
    /// Create a new builder with the given name
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instructions: None,
            model: String::new(),
            tools: Vec::new(),
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: true,
        }
    }

    /// Use fixed instructions
    pub fn instructions(mut self, text: impl Into<String>) -> Self {
        let text = text.into();
        self.instructions = Some(Arc::new(move |_: &ContextVariables, _: Option<&str>| {
            text.clone()
        }));
        self
    }

    /// Use an instruction template evaluated on every inference call
    pub fn instructions_fn<F>(mut self, template: F) -> Self
    where
        F: Fn(&ContextVariables, Option<&str>) -> String + Send + Sync + 'static,
    {
        self.instructions = Some(Arc::new(template));
        self
    }

    /// Set the model to use
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model = model.into();
        self
    }

    /// Add one tool
    pub fn tool(mut self, tool: ToolDefinition) -> Self {
        self.tools.push(tool);
        self
    }

    /// Add a handoff tool targeting another agent
    pub fn handoff(self, target: &str, description: impl Into<String>) -> Self {
        self.tool(Agent::handoff_tool(target, description))
    }

    /// Set the tool selection policy
    pub fn tool_choice(mut self, choice: ToolChoice) -> Self {
        self.tool_choice = choice;
        self
    }

    /// Allow or forbid several tool calls in one response
    pub fn parallel_tool_calls(mut self, allowed: bool) -> Self {
        self.parallel_tool_calls = allowed;
        self
    }

    /// Build the Agent
    ///
    /// Duplicate tool names keep their first definition.
    pub fn build(self) -> Agent {
        let mut tools: Vec<ToolDefinition> = Vec::with_capacity(self.tools.len());
        for tool in self.tools {
            if !tools.iter().any(|t| t.name == tool.name) {
                tools.push(tool);
            }
        }

        Agent {
            instructions: self.instructions.unwrap_or_else(|| {
                Arc::new(|_: &ContextVariables, _: Option<&str>| {
                    "You are a helpful agent.".to_string()
                })
            }),
            name: self.name,
            model: self.model,
            tools,
            tool_choice: self.tool_choice,
            parallel_tool_calls: self.parallel_tool_calls,
        }
    }
}

impl Agent {
    /// Start building an agent
    pub fn builder(name: impl Into<String>) -> AgentBuilder {
        AgentBuilder::new(name)
    }

    /// Tool that hands the conversation to `target`
    ///
    /// The optional `request` argument lets the model restate what the user
    /// wants so the receiving agent need not ask again.
    pub fn handoff_tool(target: &str, description: impl Into<String>) -> ToolDefinition {
        ToolDefinition::new(
            ToolName::handoff(target).to_string(),
            description,
            json!({
                "type": "object",
                "properties": {
                    "request": {
                        "type": "string",
                        "description": "The user's request, restated for the receiving agent"
                    }
                }
            }),
        )
    }

    /// Unique name of this agent
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Render the system prompt for this call
    pub fn instructions(&self, context: &ContextVariables, latest_user: Option<&str>) -> String {
        (self.instructions)(context, latest_user)
    }

    /// Model identifier
    pub fn model(&self) -> &str {
        &self.model
    }

    /// Tools in registration order
    pub fn tools(&self) -> &[ToolDefinition] {
        &self.tools
    }

    /// Tool selection policy
    pub fn tool_choice(&self) -> &ToolChoice {
        &self.tool_choice
    }

    /// Whether several tool calls may come back in one response
    pub fn parallel_tool_calls(&self) -> bool {
        self.parallel_tool_calls
    }

    /// Whether a tool with exactly this name is present
    pub fn has_tool(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    /// Agents this one can hand off to
    pub fn handoff_targets(&self) -> Vec<String> {
        self.tools
            .iter()
            .filter_map(|t| ToolName::parse(&t.name))
            .filter(ToolName::is_handoff)
            .map(|name| name.local)
            .collect()
    }

    /// Copy of this agent with new tools appended, skipping names already present
    pub(crate) fn with_tools_appended(&self, new_tools: &[ToolDefinition]) -> (Agent, usize) {
        let mut agent = self.clone();
        let mut added = 0;
        for tool in new_tools {
            if !agent.has_tool(&tool.name) {
                agent.tools.push(tool.clone());
                added += 1;
            }
        }
        (agent, added)
    }
}
