//! Run loop state
//!
//! Tracks the speaking agent, the growing history, and the turn budget of a
//! single run. Owned exclusively by the run that created it.

use std::sync::Arc;

use crate::agent::definition::Agent;
use crate::agent::swarm::RunResponse;
use crate::core::{ContextVariables, Message};

/// State of one orchestration run
#[derive(Debug, Clone)]
pub struct RunState {
    /// Agent presently speaking
    pub agent: Arc<Agent>,
    /// Full history, including the caller's messages
    pub messages: Vec<Message>,
    /// Values threaded into instruction templates
    pub context_variables: ContextVariables,
    /// Completed turns (inference calls)
    pub turn: usize,
    /// Maximum allowed turns
    pub max_turns: usize,
    finished: bool,
}

impl RunState {
    /// Create a new run state
    pub fn new(
        agent: Arc<Agent>,
        messages: Vec<Message>,
        context_variables: ContextVariables,
        max_turns: usize,
    ) -> Self {
        Self {
            agent,
            messages,
            context_variables,
            turn: 0,
            max_turns,
            finished: false,
        }
    }

    /// Check if the loop should continue
    pub fn should_continue(&self) -> bool {
        !self.finished && self.turn < self.max_turns
    }

    /// Whether the model ended the run
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    /// Mark the run as ended by the model
    pub fn finish(&mut self) {
        self.finished = true;
    }

    /// Increment the turn counter
    pub fn next_turn(&mut self) {
        self.turn += 1;
        if !self.finished && self.turn >= self.max_turns {
            tracing::warn!(
                agent = %self.agent.name(),
                max_turns = self.max_turns,
                "Run stopped at the turn limit"
            );
        }
    }

    /// Make `agent` the speaker for subsequent turns
    pub fn switch_to(&mut self, agent: Arc<Agent>) {
        self.agent = agent;
    }

    /// Summary handed back to the caller
    pub fn into_response(self) -> RunResponse {
        RunResponse {
            agent_name: self.agent.name().to_string(),
            messages: self.messages,
        }
    }
}
