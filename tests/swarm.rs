//! Orchestration integration tests
//!
//! Runs whole conversations against a scripted model and an in-process tool
//! provider: handoffs, tool failures, turn limits, and streaming.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use switchboard::agent::{Agent, AgentRegistry, RunRequest, Swarm, SwarmEvent, SwarmSettings};
use switchboard::core::{
    ContentBlock, Message, MessageContent, MessageKind, Result, Role, SwitchboardError,
    ToolDefinition,
};
use switchboard::llm::{InferenceResponse, ScriptedBackend};
use switchboard::tools::{attach_provider, ProviderRegistry, ToolInvocation, ToolProvider};
use tokio::sync::Barrier;
use tokio::time::timeout;
use tokio_test::{assert_err, assert_ok};

/// In-process stand-in for a banking tool server
struct Ledger {
    calls: AtomicUsize,
    /// `(started, finished)` for each invocation
    spans: Mutex<Vec<(Instant, Instant)>>,
    fail: bool,
    barrier: Option<Arc<Barrier>>,
}

impl Ledger {
    fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            spans: Mutex::new(Vec::new()),
            fail: false,
            barrier: None,
        }
    }

    fn failing() -> Self {
        Self {
            fail: true,
            ..Self::new()
        }
    }

    /// Every call waits until `parties` calls are in flight at once
    fn rendezvous(parties: usize) -> Self {
        Self {
            barrier: Some(Arc::new(Barrier::new(parties))),
            ..Self::new()
        }
    }
}

#[async_trait]
impl ToolProvider for Ledger {
    fn name(&self) -> &str {
        "ramp"
    }

    async fn list_tools(&self) -> Result<Vec<ToolDefinition>> {
        Ok(["get_balance", "list_transactions"]
            .iter()
            .map(|t| {
                ToolDefinition::new(
                    format!("ramp___{}", t),
                    format!("Ramp {}", t),
                    json!({"type": "object", "properties": {}}),
                )
            })
            .collect())
    }

    async fn invoke(&self, invocation: &ToolInvocation, _extended: bool) -> Result<Value> {
        let started = Instant::now();
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(barrier) = &self.barrier {
            barrier.wait().await;
        }
        self.spans.lock().unwrap().push((started, Instant::now()));
        if self.fail {
            return Err(SwitchboardError::tool("ledger offline"));
        }
        Ok(json!({ "tool": invocation.tool_name, "balance": 1200 }))
    }
}

fn text(reply: &str) -> InferenceResponse {
    InferenceResponse::from_blocks(vec![ContentBlock::text(reply)])
}

fn blocks(content: Vec<ContentBlock>) -> InferenceResponse {
    InferenceResponse::from_blocks(content)
}

fn handoff(id: &str, target: &str) -> ContentBlock {
    ContentBlock::tool_use(id, format!("_AGENT_HANDOFF___{}", target), json!({}))
}

fn tool(id: &str, name: &str) -> ContentBlock {
    ContentBlock::tool_use(id, name, json!({}))
}

/// Triage routes to billing; billing sees the ledger's tools
async fn build(backend: ScriptedBackend, ledger: Arc<Ledger>) -> (Swarm, Arc<ScriptedBackend>) {
    let agents = Arc::new(AgentRegistry::new());
    agents.register(
        Agent::builder("triage")
            .instructions("Route the user to the right agent.")
            .handoff("billing", "Transfer to billing")
            .build(),
    );
    agents.register(
        Agent::builder("billing")
            .instructions_fn(|ctx, _| {
                format!(
                    "Handle billing for {}.",
                    ctx.get("company").and_then(Value::as_str).unwrap_or("the user")
                )
            })
            .handoff("triage", "Transfer back to triage")
            .build(),
    );

    let providers = Arc::new(ProviderRegistry::new());
    assert_ok!(attach_provider(ledger, &["billing".to_string()], &agents, &providers).await);

    let backend = Arc::new(backend);
    let swarm = Swarm::new(
        agents,
        providers,
        backend.clone(),
        SwarmSettings {
            default_agent: "triage".to_string(),
            model: "claude-test".to_string(),
            max_turns: 10,
            preamble: Some("Today's date is 2024-06-01.".to_string()),
            ..Default::default()
        },
    );
    (swarm, backend)
}

fn request(input: &str) -> RunRequest {
    RunRequest::new("triage", vec![Message::user(input)])
}

/// Every tool_use is followed directly by the result for the same call
fn assert_paired(messages: &[Message]) {
    for (index, message) in messages.iter().enumerate() {
        if let MessageContent::ToolUse(calls) = &message.content {
            let next = messages
                .get(index + 1)
                .unwrap_or_else(|| panic!("tool_use at {} has no result", index));
            match &next.content {
                MessageContent::ToolResult(results) => {
                    assert_eq!(calls[0].id, results[0].tool_call_id);
                }
                other => panic!("tool_use at {} followed by {:?}", index, other),
            }
        }
    }
}

async fn stream_to_done(swarm: &Swarm, request: RunRequest) -> (Vec<SwarmEvent>, switchboard::RunResponse) {
    let mut events: Vec<SwarmEvent> = swarm
        .run_stream(request)
        .map(|event| event.expect("stream event"))
        .collect()
        .await;
    match events.pop() {
        Some(SwarmEvent::Done(response)) => (events, response),
        other => panic!("stream did not finish with Done: {:?}", other),
    }
}

#[tokio::test]
async fn test_single_text_reply_takes_one_turn() {
    let (swarm, backend) = build(ScriptedBackend::text("Hi! How can I help?"), Arc::new(Ledger::new())).await;

    let response = assert_ok!(swarm.run(request("hello")).await);
    assert_eq!(response.agent_name, "triage");
    assert_eq!(response.messages.len(), 2);
    assert_eq!(response.last_text(), Some("Hi! How can I help?"));
    assert_eq!(backend.requests().len(), 1);
}

#[tokio::test]
async fn test_handoff_then_tool_use() {
    let ledger = Arc::new(Ledger::new());
    let (swarm, backend) = build(
        ScriptedBackend::new(vec![
            blocks(vec![handoff("h1", "billing")]),
            blocks(vec![
                ContentBlock::text("Checking your balance."),
                tool("t1", "ramp___get_balance"),
            ]),
            text("Your balance is $1200."),
        ]),
        ledger.clone(),
    )
    .await;

    let response = assert_ok!(
        swarm
            .run(request("what's my balance?").context_variable("company", json!("Acme")))
            .await
    );

    assert_eq!(response.agent_name, "billing");
    let kinds: Vec<MessageKind> = response.messages.iter().map(Message::kind).collect();
    assert_eq!(
        kinds,
        vec![
            MessageKind::Text,
            MessageKind::ToolUse,
            MessageKind::ToolResult,
            MessageKind::Text,
            MessageKind::ToolUse,
            MessageKind::ToolResult,
            MessageKind::Text,
        ]
    );
    let senders: Vec<&str> = response.messages.iter().map(|m| m.sender.as_str()).collect();
    assert_eq!(
        senders,
        vec!["user", "triage", "triage", "billing", "billing", "billing", "billing"]
    );
    assert_paired(&response.messages);
    assert_eq!(ledger.calls.load(Ordering::SeqCst), 1);

    let requests = backend.requests();
    assert_eq!(requests.len(), 3);
    assert_eq!(
        requests[1].system_prompt,
        "Today's date is 2024-06-01. Handle billing for Acme."
    );
    assert!(requests[1].tools.iter().any(|t| t.name == "ramp___get_balance"));
    assert!(!requests[0].tools.iter().any(|t| t.name == "ramp___get_balance"));
    // The model sees the tool result on the following turn.
    assert_eq!(requests[2].messages.len(), 6);
}

#[tokio::test]
async fn test_failing_tool_does_not_end_run() {
    let (swarm, _) = build(
        ScriptedBackend::new(vec![
            blocks(vec![tool("t1", "ramp___get_balance")]),
            text("The ledger is unavailable right now."),
        ]),
        Arc::new(Ledger::failing()),
    )
    .await;

    let response = assert_ok!(swarm.run(request("balance?")).await);
    match &response.messages[2].content {
        MessageContent::ToolResult(results) => {
            assert!(results[0].is_error);
            assert!(results[0].content.contains("ledger offline"));
        }
        other => panic!("expected tool result, got {:?}", other),
    }
    assert_eq!(response.last_text(), Some("The ledger is unavailable right now."));
}

#[tokio::test]
async fn test_unknown_provider_is_reported_to_model() {
    let (swarm, _) = build(
        ScriptedBackend::new(vec![
            blocks(vec![tool("t1", "slack___post_message")]),
            text("I cannot reach Slack."),
        ]),
        Arc::new(Ledger::new()),
    )
    .await;

    let response = assert_ok!(swarm.run(request("post to slack")).await);
    match &response.messages[2].content {
        MessageContent::ToolResult(results) => {
            assert!(results[0].is_error);
            assert!(results[0].content.contains("slack"));
        }
        other => panic!("expected tool result, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_credentials_short_circuits() {
    let (swarm, backend) = build(
        ScriptedBackend::text("unreached").with_api_key(""),
        Arc::new(Ledger::new()),
    )
    .await;

    let response = assert_ok!(swarm.run(request("hello")).await);
    assert_eq!(response.agent_name, "triage");
    assert_eq!(response.messages.len(), 1);
    assert!(response.messages[0].text().unwrap().contains("API key is not set"));
    assert!(backend.requests().is_empty());
}

#[tokio::test]
async fn test_turn_limit_ends_run_normally() {
    let (swarm, backend) = build(
        ScriptedBackend::from_fn(|_| Ok(blocks(vec![tool("loop", "ramp___list_transactions")]))),
        Arc::new(Ledger::new()),
    )
    .await;

    let response = assert_ok!(swarm.run(request("spin").max_turns(3)).await);
    assert_eq!(backend.requests().len(), 3);
    assert_eq!(response.messages.len(), 1 + 3 * 2);
    assert_paired(&response.messages);
}

#[tokio::test]
async fn test_handoff_to_unregistered_agent_fails_run() {
    let (swarm, _) = build(
        ScriptedBackend::new(vec![blocks(vec![handoff("h1", "legal")])]),
        Arc::new(Ledger::new()),
    )
    .await;

    let err = assert_err!(swarm.run(request("sue them")).await);
    assert!(err.to_string().contains("legal"));

    let folded = swarm.respond(request("sue them")).await;
    assert_eq!(folded.agent_name, "triage");
    assert!(folded.last_text().unwrap().starts_with("Sorry"));
}

#[tokio::test]
async fn test_streamed_handoff_to_unregistered_agent_ends_with_apology() {
    let (swarm, _) = build(
        ScriptedBackend::new(vec![blocks(vec![handoff("h1", "legal")])]),
        Arc::new(Ledger::new()),
    )
    .await;

    let mut events = Vec::new();
    let mut stream = swarm.respond_stream(request("sue them"));
    while let Some(event) = stream.next().await {
        events.push(assert_ok!(event));
    }
    let response = match events.pop() {
        Some(SwarmEvent::Done(response)) => response,
        other => panic!("stream did not finish with Done: {:?}", other),
    };

    assert!(events
        .iter()
        .any(|e| matches!(e, SwarmEvent::ToolResult { .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, SwarmEvent::Handoff { to, .. } if to == "legal")));
    assert_eq!(response.agent_name, "triage");
    assert_eq!(response.messages.len(), 2);
    let apology = response.messages.last().unwrap();
    assert_eq!(apology.sender, "triage");
    assert_eq!(apology.role, Role::Assistant);
    assert!(apology.text().unwrap().contains("legal"));
}

#[tokio::test]
async fn test_streaming_matches_buffered_history() {
    let script = || {
        vec![
            blocks(vec![
                ContentBlock::text("One moment."),
                handoff("h1", "billing"),
            ]),
            blocks(vec![
                tool("t1", "ramp___get_balance"),
                ContentBlock::text("Also pulling transactions."),
                tool("t2", "ramp___list_transactions"),
            ]),
            text("Balance is $1200 and nothing unusual in transactions."),
        ]
    };

    let (buffered, _) = build(ScriptedBackend::new(script()), Arc::new(Ledger::new())).await;
    let (streaming, _) = build(ScriptedBackend::new(script()), Arc::new(Ledger::new())).await;

    let expected = assert_ok!(buffered.run(request("how are we doing?")).await);
    let (events, actual) = stream_to_done(&streaming, request("how are we doing?")).await;

    assert_eq!(actual, expected);
    assert_paired(&actual.messages);

    let streamed_text: String = events
        .iter()
        .filter_map(|e| match e {
            SwarmEvent::TextDelta { text, .. } => Some(text.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(
        streamed_text,
        "One moment.Also pulling transactions.Balance is $1200 and nothing unusual in transactions."
    );
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, SwarmEvent::ToolResult { .. }))
            .count(),
        3
    );
}

#[tokio::test]
async fn test_streaming_dispatches_calls_concurrently() {
    // Both calls must be in flight together to get past the barrier.
    let ledger = Arc::new(Ledger::rendezvous(2));
    let (swarm, _) = build(
        ScriptedBackend::new(vec![
            blocks(vec![
                tool("t1", "ramp___get_balance"),
                tool("t2", "ramp___list_transactions"),
            ]),
            text("Done."),
        ]),
        ledger.clone(),
    )
    .await;

    let (_, response) = timeout(
        Duration::from_secs(5),
        stream_to_done(&swarm, request("overview")),
    )
    .await
    .expect("concurrent dispatch deadlocked");

    assert_eq!(ledger.calls.load(Ordering::SeqCst), 2);
    let spans = ledger.spans.lock().unwrap().clone();
    let last_start = spans.iter().map(|(start, _)| *start).max().unwrap();
    let first_end = spans.iter().map(|(_, end)| *end).min().unwrap();
    assert!(last_start <= first_end, "calls did not overlap: {:?}", spans);

    let result_ids: Vec<&str> = response
        .messages
        .iter()
        .filter_map(|m| match &m.content {
            MessageContent::ToolResult(results) => Some(results[0].tool_call_id.as_str()),
            _ => None,
        })
        .collect();
    assert_eq!(result_ids, vec!["t1", "t2"]);
}

#[tokio::test]
async fn test_extending_tools_twice_changes_nothing() {
    let agents = AgentRegistry::new();
    agents.register(Agent::builder("billing").build());
    let providers = ProviderRegistry::new();
    let relevant = vec!["billing".to_string()];

    assert_ok!(attach_provider(Arc::new(Ledger::new()), &relevant, &agents, &providers).await);
    let first: Vec<String> = agents
        .get_by_name("billing")
        .unwrap()
        .tools()
        .iter()
        .map(|t| t.name.clone())
        .collect();

    assert_ok!(attach_provider(Arc::new(Ledger::new()), &relevant, &agents, &providers).await);
    let second: Vec<String> = agents
        .get_by_name("billing")
        .unwrap()
        .tools()
        .iter()
        .map(|t| t.name.clone())
        .collect();

    assert_eq!(first, second);
    assert_eq!(first, vec!["ramp___get_balance", "ramp___list_transactions"]);
}
