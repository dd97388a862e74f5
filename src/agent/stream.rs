//! Streaming runs
//!
//! The streaming run executes in its own task and reports progress over a
//! bounded channel. Its final history is the one a buffered run would have
//! produced for the same model responses.

use std::pin::Pin;
use std::sync::Arc;

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::agent::swarm::{RunRequest, RunResponse, Swarm};
use crate::core::{Message, Result, SwitchboardError, ToolCall};
use crate::llm::{InferenceEvent, InferenceResponse};

/// Progress of a streaming run
#[derive(Debug, Clone, PartialEq)]
pub enum SwarmEvent {
    /// An inference call is about to start
    TurnStart { agent: String, turn: usize },
    /// A fragment of assistant text
    TextDelta { agent: String, text: String },
    /// The model issued a tool call
    ToolUse { agent: String, call: ToolCall },
    /// The model finished its response
    MessageComplete {
        agent: String,
        response: InferenceResponse,
    },
    /// A tool call was answered
    ToolResult { agent: String, result: Message },
    /// The speaker changed
    Handoff { from: String, to: String },
    /// The turn's messages are in the history
    TurnEnd { agent: String, turn: usize },
    /// The run is over
    Done(RunResponse),
}

/// Stream of events from a streaming run
pub type SwarmStream = Pin<Box<dyn Stream<Item = Result<SwarmEvent>> + Send>>;

type EventSender = mpsc::Sender<Result<SwarmEvent>>;

impl Swarm {
    /// Start a run and stream its progress
    ///
    /// The last item is either [`SwarmEvent::Done`] or an error. Dropping the
    /// stream stops the run after the current turn; tool calls already in
    /// flight still complete.
    pub fn run_stream(&self, request: RunRequest) -> SwarmStream {
        self.spawn_stream(request, false)
    }

    /// Stream a run, folding any failure into an apology message
    ///
    /// The streaming counterpart of [`Swarm::respond`]: the stream always
    /// ends with [`SwarmEvent::Done`], whose history is the input plus one
    /// assistant message describing the error.
    pub fn respond_stream(&self, request: RunRequest) -> SwarmStream {
        self.spawn_stream(request, true)
    }

    fn spawn_stream(&self, request: RunRequest, fold_errors: bool) -> SwarmStream {
        let (tx, rx) = mpsc::channel(self.settings.stream_buffer.max(1));
        let swarm = self.clone();

        tokio::spawn(async move {
            let input = fold_errors.then(|| {
                (
                    swarm.answering_agent(&request.agent_name),
                    request.messages.clone(),
                )
            });

            if let Err(e) = swarm.drive(request, &tx).await {
                match input {
                    Some((agent_name, messages)) => {
                        let response = swarm.apology(agent_name, messages, &e);
                        emit(&tx, SwarmEvent::Done(response)).await;
                    }
                    None => {
                        tracing::error!("Streaming run failed: {}", e);
                        let _ = tx.send(Err(e)).await;
                    }
                }
            }
        });

        Box::pin(ReceiverStream::new(rx))
    }

    async fn drive(&self, request: RunRequest, tx: &EventSender) -> Result<()> {
        if !self.has_credentials() {
            emit(tx, SwarmEvent::Done(self.missing_credentials())).await;
            return Ok(());
        }

        let mut state = self.start(&request)?;
        while state.should_continue() {
            if tx.is_closed() {
                tracing::debug!(agent = %state.agent.name(), "Stream consumer gone; stopping");
                return Ok(());
            }

            let speaker = Arc::clone(&state.agent);
            let agent = speaker.name().to_string();
            let turn = state.turn + 1;
            emit(tx, SwarmEvent::TurnStart { agent: agent.clone(), turn }).await;

            let mut events = self
                .backend
                .stream(self.inference_request(&state, &request))
                .await?;

            let turn_start = state.messages.len();
            let mut live_text: Option<usize> = None;
            let mut complete = None;

            while let Some(event) = events.next().await {
                match event? {
                    InferenceEvent::MessageStart => {}
                    InferenceEvent::TextDelta(text) => {
                        match live_text {
                            Some(index) => state.messages[index].push_text(&text),
                            None => {
                                state.messages.push(Message::assistant(&agent, text.clone()));
                                live_text = Some(state.messages.len() - 1);
                            }
                        }
                        emit(tx, SwarmEvent::TextDelta { agent: agent.clone(), text }).await;
                    }
                    InferenceEvent::ToolUse(call) => {
                        live_text = None;
                        emit(tx, SwarmEvent::ToolUse { agent: agent.clone(), call }).await;
                    }
                    InferenceEvent::MessageComplete(response) => {
                        complete = Some(response);
                        break;
                    }
                }
            }

            let response = complete.ok_or_else(|| {
                SwitchboardError::inference("Stream ended without a complete message")
            })?;
            emit(
                tx,
                SwarmEvent::MessageComplete {
                    agent: agent.clone(),
                    response: response.clone(),
                },
            )
            .await;

            // Live text is replaced by the response's own blocks.
            state.messages.truncate(turn_start);

            let dispatched = self
                .dispatch_concurrent(&speaker, response.tool_calls())
                .await;
            for result in &dispatched {
                emit(
                    tx,
                    SwarmEvent::ToolResult {
                        agent: agent.clone(),
                        result: result.message.clone(),
                    },
                )
                .await;
                // Unknown targets fail the run in commit; no switch happens.
                if let Some(target) = result.handoff.as_ref().filter(|t| self.agents.contains(t)) {
                    emit(
                        tx,
                        SwarmEvent::Handoff {
                            from: agent.clone(),
                            to: target.clone(),
                        },
                    )
                    .await;
                }
            }

            self.commit(&mut state, &response, dispatched)?;
            emit(tx, SwarmEvent::TurnEnd { agent, turn }).await;
            state.next_turn();
        }

        emit(tx, SwarmEvent::Done(state.into_response())).await;
        Ok(())
    }
}

/// Send an event; a departed consumer is not an error
async fn emit(tx: &EventSender, event: SwarmEvent) {
    let _ = tx.send(Ok(event)).await;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{Agent, AgentRegistry, SwarmSettings};
    use crate::core::ContentBlock;
    use crate::llm::ScriptedBackend;
    use crate::tools::ProviderRegistry;
    use serde_json::json;

    fn swarm(backend: ScriptedBackend) -> Swarm {
        let agents = AgentRegistry::new();
        agents.register(
            Agent::builder("triage")
                .handoff("billing", "Transfer to billing")
                .build(),
        );
        agents.register(Agent::builder("billing").build());
        Swarm::new(
            Arc::new(agents),
            Arc::new(ProviderRegistry::new()),
            Arc::new(backend),
            SwarmSettings {
                default_agent: "triage".to_string(),
                max_turns: 5,
                stream_buffer: 4,
                ..Default::default()
            },
        )
    }

    async fn collect(stream: SwarmStream) -> Vec<SwarmEvent> {
        stream.map(|event| event.unwrap()).collect().await
    }

    #[tokio::test]
    async fn test_stream_text_and_done() {
        let swarm = swarm(ScriptedBackend::text("Hello there friend"));
        let events = collect(swarm.run_stream(RunRequest::new(
            "triage",
            vec![Message::user("hi")],
        )))
        .await;

        assert_eq!(
            events[0],
            SwarmEvent::TurnStart {
                agent: "triage".to_string(),
                turn: 1
            }
        );
        let deltas: String = events
            .iter()
            .filter_map(|e| match e {
                SwarmEvent::TextDelta { text, .. } => Some(text.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(deltas, "Hello there friend");

        match events.last().unwrap() {
            SwarmEvent::Done(response) => {
                assert_eq!(response.messages.len(), 2);
                assert_eq!(response.last_text(), Some("Hello there friend"));
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_reports_handoff() {
        let swarm = swarm(ScriptedBackend::new(vec![
            InferenceResponse::from_blocks(vec![
                ContentBlock::text("Let me transfer you."),
                ContentBlock::tool_use("t1", "_AGENT_HANDOFF___billing", json!({})),
            ]),
            InferenceResponse::from_blocks(vec![ContentBlock::text("Billing here.")]),
        ]));

        let events = collect(swarm.run_stream(RunRequest::new(
            "triage",
            vec![Message::user("refund")],
        )))
        .await;

        assert!(events.contains(&SwarmEvent::Handoff {
            from: "triage".to_string(),
            to: "billing".to_string()
        }));
        assert!(events.contains(&SwarmEvent::TurnStart {
            agent: "billing".to_string(),
            turn: 2
        }));
        match events.last().unwrap() {
            SwarmEvent::Done(response) => {
                assert_eq!(response.agent_name, "billing");
                assert_eq!(response.messages.len(), 5);
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_error_is_last_item() {
        let swarm = swarm(ScriptedBackend::new(Vec::new()));
        let items: Vec<Result<SwarmEvent>> = swarm
            .run_stream(RunRequest::new("triage", vec![Message::user("hi")]))
            .collect()
            .await;

        assert!(matches!(items.first(), Some(Ok(SwarmEvent::TurnStart { .. }))));
        assert!(items.last().unwrap().is_err());
    }

    #[tokio::test]
    async fn test_respond_stream_folds_error_into_done() {
        let swarm = swarm(ScriptedBackend::new(Vec::new()));
        let items: Vec<Result<SwarmEvent>> = swarm
            .respond_stream(RunRequest::new("triage", vec![Message::user("hi")]))
            .collect()
            .await;

        assert!(items.iter().all(|item| item.is_ok()));
        match items.last() {
            Some(Ok(SwarmEvent::Done(response))) => {
                assert_eq!(response.agent_name, "triage");
                assert_eq!(response.messages.len(), 2);
                assert!(response.last_text().unwrap().starts_with("Sorry, something went wrong"));
            }
            other => panic!("expected Done, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_stream_missing_credentials() {
        let swarm = swarm(ScriptedBackend::text("unreached").with_api_key(""));
        let events = collect(swarm.run_stream(RunRequest::new(
            "billing",
            vec![Message::user("hi")],
        )))
        .await;

        assert_eq!(events.len(), 1);
        assert!(matches!(&events[0], SwarmEvent::Done(r) if r.agent_name == "triage"));
    }
}
