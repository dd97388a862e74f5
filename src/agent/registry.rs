//! Agent registry
//!
//! Maps agent names to agents. Agents are stored behind `Arc` and replaced
//! whole when their tool list grows, so a run holding an agent keeps a
//! consistent snapshot.

use std::collections::BTreeMap;
use std::sync::{Arc, RwLock};

use crate::agent::definition::Agent;
use crate::core::{Result, SwitchboardError, ToolDefinition};

/// Registry of agents by name
#[derive(Debug, Default)]
pub struct AgentRegistry {
    agents: RwLock<BTreeMap<String, Arc<Agent>>>,
}

impl AgentRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Store an agent under its own name; a later registration wins
    pub fn register(&self, agent: Agent) {
        let name = agent.name().to_string();
        let replaced = self
            .agents
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(name.clone(), Arc::new(agent))
            .is_some();
        if replaced {
            tracing::debug!(agent = %name, "Agent re-registered");
        }
    }

    /// Look up an agent
    pub fn get_by_name(&self, name: &str) -> Result<Arc<Agent>> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(name)
            .cloned()
            .ok_or_else(|| SwitchboardError::AgentNotFound(name.to_string()))
    }

    /// Append tools whose names the agent does not already have
    ///
    /// Returns how many were added; repeating a batch adds nothing.
    pub fn extend_tools(&self, name: &str, new_tools: &[ToolDefinition]) -> Result<usize> {
        let mut agents = self.agents.write().unwrap_or_else(|e| e.into_inner());
        let current = agents
            .get(name)
            .ok_or_else(|| SwitchboardError::AgentNotFound(name.to_string()))?;

        let (updated, added) = current.with_tools_appended(new_tools);
        if added > 0 {
            agents.insert(name.to_string(), Arc::new(updated));
        }
        tracing::info!(agent = %name, added, "Extended agent tools");
        Ok(added)
    }

    /// Whether an agent is registered under `name`
    pub fn contains(&self, name: &str) -> bool {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains_key(name)
    }

    /// Registered agent names in sorted order
    pub fn names(&self) -> Vec<String> {
        self.agents
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect()
    }

    /// Handoff targets that name no registered agent, as `(agent, target)` pairs
    pub fn dangling_handoffs(&self) -> Vec<(String, String)> {
        let agents = self.agents.read().unwrap_or_else(|e| e.into_inner());
        agents
            .values()
            .flat_map(|agent| {
                agent
                    .handoff_targets()
                    .into_iter()
                    .filter(|target| !agents.contains_key(target))
                    .map(|target| (agent.name().to_string(), target))
                    .collect::<Vec<_>>()
            })
            .collect()
    }
}
