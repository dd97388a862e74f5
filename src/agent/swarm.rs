//! Swarm engine
//!
//! Drives a conversation across agents. Each turn asks the speaking agent's
//! model for a response, appends its text, dispatches its tool calls, and
//! switches speaker when a handoff comes back. The run ends when a response
//! closes with text, or at the turn limit.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::task::JoinSet;

use crate::agent::definition::Agent;
use crate::agent::dispatcher::{Dispatched, Dispatcher};
use crate::agent::loop_state::RunState;
use crate::agent::registry::AgentRegistry;
use crate::core::config::ToolConfig;
use crate::core::{
    latest_user_text, project_history, Action, Config, ContextVariables, Message, Result,
    SwitchboardError, ToolCall, ToolResultBlock,
};
use crate::llm::{InferenceBackend, InferenceRequest, InferenceResponse};
use crate::tools::ProviderRegistry;

/// Reply given instead of running when no API key is configured
pub const MISSING_CREDENTIALS_MESSAGE: &str = "Okay! Your Anthropic API key is not set. \
Set it with `set key <key>` or the ANTHROPIC_API_KEY environment variable.";

/// Engine settings
#[derive(Debug, Clone)]
pub struct SwarmSettings {
    /// Agent that answers when none is specified, and on missing credentials
    pub default_agent: String,
    /// Model used when an agent names none
    pub model: String,
    /// Default bound on inference calls per run
    pub max_turns: usize,
    /// Token budget per inference call
    pub max_tokens: u32,
    /// Replaces the dated preamble when set
    pub preamble: Option<String>,
    /// Capacity of the streaming event channel
    pub stream_buffer: usize,
    /// Tool invocation settings
    pub tools: ToolConfig,
}

impl SwarmSettings {
    /// Settings taken from a loaded configuration
    pub fn from_config(config: &Config) -> Self {
        Self {
            default_agent: config.swarm.default_agent.clone(),
            model: config.anthropic.model.clone(),
            max_turns: config.swarm.max_turns,
            max_tokens: config.anthropic.max_tokens,
            preamble: config.swarm.preamble.clone(),
            stream_buffer: config.swarm.stream_buffer,
            tools: config.tools.clone(),
        }
    }
}

impl Default for SwarmSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Input to one run
#[derive(Debug, Clone, Default)]
pub struct RunRequest {
    /// Agent that speaks first
    pub agent_name: String,
    /// History so far, ending with the new user message
    pub messages: Vec<Message>,
    /// Values for instruction templates
    pub context_variables: ContextVariables,
    /// Overrides the configured turn bound
    pub max_turns: Option<usize>,
    /// Overrides every agent's model for this run
    pub model_override: Option<String>,
}

impl RunRequest {
    /// Create a request starting at `agent_name`
    pub fn new(agent_name: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            agent_name: agent_name.into(),
            messages,
            ..Default::default()
        }
    }

    /// Replace the context variables
    pub fn context(mut self, context_variables: ContextVariables) -> Self {
        self.context_variables = context_variables;
        self
    }

    /// Set one context variable
    pub fn context_variable(mut self, key: impl Into<String>, value: Value) -> Self {
        self.context_variables.insert(key.into(), value);
        self
    }

    /// Bound the run to `max_turns` inference calls
    pub fn max_turns(mut self, max_turns: usize) -> Self {
        self.max_turns = Some(max_turns);
        self
    }

    /// Use `model` for every agent in this run
    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.model_override = Some(model.into());
        self
    }
}

/// Result of a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunResponse {
    /// Agent speaking when the run ended
    pub agent_name: String,
    /// Full history, input messages first
    pub messages: Vec<Message>,
}

impl RunResponse {
    /// Text of the last assistant text message
    pub fn last_text(&self) -> Option<&str> {
        self.messages
            .iter()
            .rev()
            .filter(|m| m.sender != crate::core::USER_SENDER)
            .find_map(Message::text)
    }
}

/// Multi-agent orchestration engine
#[derive(Clone)]
pub struct Swarm {
    pub(crate) agents: Arc<AgentRegistry>,
    pub(crate) providers: Arc<ProviderRegistry>,
    pub(crate) backend: Arc<dyn InferenceBackend>,
    pub(crate) dispatcher: Dispatcher,
    pub(crate) settings: SwarmSettings,
}

impl Swarm {
    /// Create an engine over shared registries and a backend
    pub fn new(
        agents: Arc<AgentRegistry>,
        providers: Arc<ProviderRegistry>,
        backend: Arc<dyn InferenceBackend>,
        settings: SwarmSettings,
    ) -> Self {
        let dispatcher = Dispatcher::new(Arc::clone(&providers), &settings.tools);
        Self {
            agents,
            providers,
            backend,
            dispatcher,
            settings,
        }
    }

    /// Agent registry
    pub fn agents(&self) -> &Arc<AgentRegistry> {
        &self.agents
    }

    /// Provider registry
    pub fn providers(&self) -> &Arc<ProviderRegistry> {
        &self.providers
    }

    /// Engine settings
    pub fn settings(&self) -> &SwarmSettings {
        &self.settings
    }

    /// Whether the backend has a usable credential
    pub fn has_credentials(&self) -> bool {
        self.backend.has_credentials()
    }

    /// Replace the backend's API key; later runs use it
    pub fn set_api_key(&self, api_key: impl Into<String>) {
        self.backend.set_api_key(api_key.into());
        tracing::info!(backend = %self.backend.name(), "API key updated");
    }

    /// Run to completion and return the whole history
    pub async fn run(&self, request: RunRequest) -> Result<RunResponse> {
        if !self.has_credentials() {
            return Ok(self.missing_credentials());
        }

        let mut state = self.start(&request)?;
        while state.should_continue() {
            let inference = self.inference_request(&state, &request);
            tracing::debug!(
                agent = %state.agent.name(),
                turn = state.turn + 1,
                tools = inference.tools.len(),
                "Inference call"
            );
            let response = self.backend.complete(&inference).await?;

            let speaker = Arc::clone(&state.agent);
            let dispatched = self.dispatch_sequential(&speaker, &response).await;
            self.commit(&mut state, &response, dispatched)?;
            state.next_turn();
        }

        tracing::info!(
            agent = %state.agent.name(),
            turns = state.turn,
            messages = state.messages.len(),
            "Run complete"
        );
        Ok(state.into_response())
    }

    /// Run, folding any failure into an apology message
    ///
    /// Never fails: the caller always gets the input history back.
    pub async fn respond(&self, request: RunRequest) -> RunResponse {
        let agent_name = self.answering_agent(&request.agent_name);
        let messages = request.messages.clone();

        match self.run(request).await {
            Ok(response) => response,
            Err(e) => self.apology(agent_name, messages, &e),
        }
    }

    /// Agent credited with a failure: the requested one if registered
    pub(crate) fn answering_agent(&self, requested: &str) -> String {
        if self.agents.contains(requested) {
            requested.to_string()
        } else {
            self.settings.default_agent.clone()
        }
    }

    /// The input history plus one assistant message describing `error`
    pub(crate) fn apology(
        &self,
        agent_name: String,
        mut messages: Vec<Message>,
        error: &SwitchboardError,
    ) -> RunResponse {
        tracing::error!(agent = %agent_name, "Run failed: {}", error);
        messages.push(Message::assistant(
            agent_name.clone(),
            format!("Sorry, something went wrong: {}", error),
        ));
        RunResponse {
            agent_name,
            messages,
        }
    }

    pub(crate) fn missing_credentials(&self) -> RunResponse {
        tracing::warn!("No API key configured; skipping inference");
        RunResponse {
            agent_name: self.settings.default_agent.clone(),
            messages: vec![Message::assistant(
                self.settings.default_agent.clone(),
                MISSING_CREDENTIALS_MESSAGE,
            )],
        }
    }

    pub(crate) fn start(&self, request: &RunRequest) -> Result<RunState> {
        let agent = self.agents.get_by_name(&request.agent_name)?;
        Ok(RunState::new(
            agent,
            request.messages.clone(),
            request.context_variables.clone(),
            request.max_turns.unwrap_or(self.settings.max_turns),
        ))
    }

    fn preamble(&self) -> String {
        match &self.settings.preamble {
            Some(preamble) => preamble.clone(),
            None => format!(
                "Today's date is {}.",
                chrono::Local::now().format("%Y-%m-%d")
            ),
        }
    }

    pub(crate) fn inference_request(&self, state: &RunState, request: &RunRequest) -> InferenceRequest {
        let agent = &state.agent;
        let instructions =
            agent.instructions(&state.context_variables, latest_user_text(&state.messages));

        let model = match &request.model_override {
            Some(model) => model.clone(),
            None if agent.model().is_empty() => self.settings.model.clone(),
            None => agent.model().to_string(),
        };

        InferenceRequest {
            system_prompt: format!("{} {}", self.preamble(), instructions),
            model,
            max_tokens: self.settings.max_tokens,
            messages: project_history(&state.messages),
            tools: agent.tools().to_vec(),
            tool_choice: agent.tool_choice().clone(),
            parallel_tool_calls: agent.parallel_tool_calls(),
        }
    }

    /// Dispatch calls one at a time in block order
    ///
    /// Stops after a handoff to an unknown agent; the run fails there.
    async fn dispatch_sequential(&self, speaker: &Agent, response: &InferenceResponse) -> Vec<Dispatched> {
        let mut dispatched = Vec::new();
        for call in response.tool_calls() {
            let result = self.dispatcher.dispatch(&call, speaker).await;
            let dangling = matches!(&result.handoff, Some(target) if !self.agents.contains(target));
            dispatched.push(result);
            if dangling {
                break;
            }
        }
        dispatched
    }

    /// Dispatch all calls at once, results in call order
    pub(crate) async fn dispatch_concurrent(&self, speaker: &Arc<Agent>, calls: Vec<ToolCall>) -> Vec<Dispatched> {
        let mut set = JoinSet::new();
        for (index, call) in calls.iter().cloned().enumerate() {
            let dispatcher = self.dispatcher.clone();
            let agent = Arc::clone(speaker);
            set.spawn(async move { (index, dispatcher.dispatch(&call, &agent).await) });
        }

        let mut slots: Vec<Option<Dispatched>> = vec![None; calls.len()];
        while let Some(joined) = set.join_next().await {
            match joined {
                Ok((index, result)) => slots[index] = Some(result),
                Err(e) => tracing::error!("Tool task panicked: {}", e),
            }
        }

        slots
            .into_iter()
            .zip(calls)
            .map(|(slot, call)| {
                slot.unwrap_or_else(|| Dispatched {
                    message: Message::tool_result(
                        speaker.name(),
                        vec![ToolResultBlock::failure(&call.id, "Tool task panicked")],
                    ),
                    handoff: None,
                })
            })
            .collect()
    }

    /// Append one response and its dispatch results to the history
    ///
    /// Text is attributed to the agent that produced it. Each tool call is
    /// followed immediately by its result. A trailing text block, or an
    /// empty response, ends the run.
    pub(crate) fn commit(
        &self,
        state: &mut RunState,
        response: &InferenceResponse,
        dispatched: Vec<Dispatched>,
    ) -> Result<()> {
        if response.content.is_empty() {
            tracing::debug!(agent = %state.agent.name(), "Empty response");
            state.finish();
            return Ok(());
        }

        let speaker = Arc::clone(&state.agent);
        let mut results = dispatched.into_iter();
        let last = response.content.len() - 1;

        for (index, block) in response.content.iter().enumerate() {
            match Action::from(block) {
                Action::Say(text) => {
                    if !text.is_empty() {
                        state.messages.push(Message::assistant(speaker.name(), text));
                    }
                    if index == last {
                        state.finish();
                    }
                }
                Action::CallTool(call) | Action::HandoffTo { call, .. } => {
                    let result = results.next().ok_or_else(|| {
                        SwitchboardError::Other(format!("No result for tool call '{}'", call.id))
                    })?;
                    state.messages.push(Message::tool_use(speaker.name(), vec![call]));
                    state.messages.push(result.message);

                    if let Some(target) = result.handoff {
                        let next = self.agents.get_by_name(&target)?;
                        tracing::info!(from = %speaker.name(), to = %target, "Switching agent");
                        state.switch_to(next);
                    }
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{ContentBlock, MessageKind};
    use crate::llm::ScriptedBackend;
    use serde_json::json;

    fn swarm(backend: ScriptedBackend) -> (Swarm, Arc<ScriptedBackend>) {
        let agents = AgentRegistry::new();
        agents.register(
            Agent::builder("triage")
                .instructions("Route the user.")
                .handoff("billing", "Transfer to billing")
                .build(),
        );
        agents.register(Agent::builder("billing").instructions("Handle billing.").build());

        let backend = Arc::new(backend);
        let settings = SwarmSettings {
            default_agent: "triage".to_string(),
            model: "claude-test".to_string(),
            max_turns: 5,
            preamble: Some("Today's date is 2024-01-01.".to_string()),
            ..Default::default()
        };
        let swarm = Swarm::new(
            Arc::new(agents),
            Arc::new(ProviderRegistry::new()),
            backend.clone(),
            settings,
        );
        (swarm, backend)
    }

    #[tokio::test]
    async fn test_text_reply_ends_run() {
        let (swarm, backend) = swarm(ScriptedBackend::text("Hello!"));
        let response = swarm
            .run(RunRequest::new("triage", vec![Message::user("hi")]))
            .await
            .unwrap();

        assert_eq!(response.agent_name, "triage");
        assert_eq!(response.messages.len(), 2);
        assert_eq!(response.messages[1].sender, "triage");
        assert_eq!(response.last_text(), Some("Hello!"));

        let requests = backend.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(
            requests[0].system_prompt,
            "Today's date is 2024-01-01. Route the user."
        );
        assert_eq!(requests[0].model, "claude-test");
    }

    #[tokio::test]
    async fn test_model_override() {
        let (swarm, backend) = swarm(ScriptedBackend::text("ok"));
        swarm
            .run(RunRequest::new("triage", vec![Message::user("hi")]).model("claude-other"))
            .await
            .unwrap();
        assert_eq!(backend.requests()[0].model, "claude-other");
    }

    #[tokio::test]
    async fn test_handoff_switches_speaker() {
        let (swarm, backend) = swarm(ScriptedBackend::new(vec![
            InferenceResponse::from_blocks(vec![ContentBlock::tool_use(
                "t1",
                "_AGENT_HANDOFF___billing",
                json!({}),
            )]),
            InferenceResponse::from_blocks(vec![ContentBlock::text("Refund issued.")]),
        ]));

        let response = swarm
            .run(RunRequest::new("triage", vec![Message::user("refund please")]))
            .await
            .unwrap();

        assert_eq!(response.agent_name, "billing");
        let kinds: Vec<MessageKind> = response.messages.iter().map(Message::kind).collect();
        assert_eq!(
            kinds,
            vec![
                MessageKind::Text,
                MessageKind::ToolUse,
                MessageKind::ToolResult,
                MessageKind::Text
            ]
        );
        assert_eq!(response.messages[1].sender, "triage");
        assert_eq!(response.messages[3].sender, "billing");
        assert_eq!(
            backend.requests()[1].system_prompt,
            "Today's date is 2024-01-01. Handle billing."
        );
    }

    #[tokio::test]
    async fn test_handoff_to_unknown_agent_fails() {
        let (swarm, _) = swarm(ScriptedBackend::new(vec![InferenceResponse::from_blocks(
            vec![ContentBlock::tool_use("t1", "_AGENT_HANDOFF___ghost", json!({}))],
        )]));

        let err = swarm
            .run(RunRequest::new("triage", vec![Message::user("hi")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SwitchboardError::AgentNotFound(ref n) if n == "ghost"));
    }

    #[tokio::test]
    async fn test_respond_folds_errors() {
        let (swarm, _) = swarm(ScriptedBackend::new(Vec::new()));
        let response = swarm
            .respond(RunRequest::new("triage", vec![Message::user("hi")]))
            .await;

        assert_eq!(response.agent_name, "triage");
        assert_eq!(response.messages.len(), 2);
        assert!(response.last_text().unwrap().contains("Scripted responses exhausted"));
    }

    #[tokio::test]
    async fn test_empty_response_ends_run() {
        let (swarm, backend) = swarm(ScriptedBackend::new(vec![
            InferenceResponse::default(),
            InferenceResponse::from_blocks(vec![ContentBlock::text("unreached")]),
        ]));

        let response = swarm
            .run(RunRequest::new("triage", vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(response.messages.len(), 1);
        assert_eq!(backend.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_missing_credentials() {
        let (swarm, backend) = swarm(ScriptedBackend::text("unreached").with_api_key(""));
        assert!(!swarm.has_credentials());

        let response = swarm
            .run(RunRequest::new("billing", vec![Message::user("hi")]))
            .await
            .unwrap();
        assert_eq!(response.agent_name, "triage");
        assert_eq!(response.messages.len(), 1);
        assert_eq!(response.messages[0].text(), Some(MISSING_CREDENTIALS_MESSAGE));
        assert!(backend.requests().is_empty());

        swarm.set_api_key("sk-test");
        assert!(swarm.has_credentials());
    }
}
