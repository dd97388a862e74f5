//! Anthropic Messages API client
//!
//! Buffered and streaming inference with tool use. Rate-limit and server
//! errors are retried with exponential backoff before anything is streamed.

use async_trait::async_trait;
use eventsource_stream::Eventsource;
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::RwLock;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::core::config::AnthropicConfig;
use crate::core::{ContentBlock, Result, SwitchboardError, ToolCall, ToolDefinition, WireMessage};
use crate::llm::traits::{
    InferenceBackend, InferenceEvent, InferenceRequest, InferenceResponse, InferenceStream,
    TokenUsage, ToolChoice,
};

const ANTHROPIC_VERSION: &str = "2023-06-01";
const STREAM_CHANNEL_SIZE: usize = 64;

/// Anthropic API client
pub struct AnthropicClient {
    client: Client,
    /// Bound on a whole buffered request
    request_timeout: Duration,
    endpoint: String,
    api_key: RwLock<String>,
    max_retries: u32,
    retry_base_delay: Duration,
}

/// Messages API request body
#[derive(Debug, Serialize)]
struct MessagesRequest<'a> {
    model: &'a str,
    max_tokens: u32,
    #[serde(skip_serializing_if = "str::is_empty")]
    system: &'a str,
    messages: &'a [WireMessage],
    #[serde(skip_serializing_if = "no_tools")]
    tools: &'a [ToolDefinition],
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_choice: Option<WireToolChoice<'a>>,
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    stream: bool,
}

fn no_tools(tools: &&[ToolDefinition]) -> bool {
    tools.is_empty()
}

/// Wire form of [`ToolChoice`]
#[derive(Debug, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
enum WireToolChoice<'a> {
    Auto {
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        disable_parallel_tool_use: bool,
    },
    Tool {
        name: &'a str,
        #[serde(skip_serializing_if = "std::ops::Not::not")]
        disable_parallel_tool_use: bool,
    },
    None,
}

/// Messages API response body
#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ResponseBlock>,
    #[serde(default)]
    stop_reason: Option<String>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ResponseBlock {
    Text {
        text: String,
    },
    ToolUse {
        id: String,
        name: String,
        input: Value,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Default, Deserialize)]
struct WireUsage {
    #[serde(default)]
    input_tokens: u32,
    #[serde(default)]
    output_tokens: u32,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error: ErrorBody,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: String,
}

#[derive(Debug, Deserialize)]
struct ModelsResponse {
    data: Vec<ModelInfo>,
}

#[derive(Debug, Deserialize)]
struct ModelInfo {
    id: String,
}

impl ResponseBlock {
    fn into_content(self) -> Option<ContentBlock> {
        match self {
            ResponseBlock::Text { text } => Some(ContentBlock::Text { text }),
            ResponseBlock::ToolUse { id, name, input } => {
                Some(ContentBlock::ToolUse { id, name, input })
            }
            ResponseBlock::Unsupported => None,
        }
    }
}

impl From<WireUsage> for TokenUsage {
    fn from(usage: WireUsage) -> Self {
        TokenUsage {
            input_tokens: usage.input_tokens,
            output_tokens: usage.output_tokens,
        }
    }
}

impl AnthropicClient {
    /// Create a new client from configuration
    pub fn from_config(config: &AnthropicConfig) -> Result<Self> {
        let timeout = Duration::from_secs(config.timeout_secs);
        // A streamed reply may outlast any whole-request bound, so the client
        // only limits connecting and each read; buffered calls add their own.
        let client = Client::builder()
            .connect_timeout(timeout)
            .read_timeout(timeout)
            .build()?;

        Ok(Self {
            client,
            request_timeout: timeout,
            endpoint: config.endpoint.clone(),
            api_key: RwLock::new(config.api_key.clone()),
            max_retries: config.max_retries,
            retry_base_delay: Duration::from_secs(1),
        })
    }

    /// Override the first backoff delay; later retries double it
    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    fn api_key(&self) -> String {
        self.api_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn models_endpoint(&self) -> String {
        match self.endpoint.strip_suffix("/messages") {
            Some(base) => format!("{}/models", base),
            None => format!("{}/models", self.endpoint.trim_end_matches('/')),
        }
    }

    fn request_body<'a>(request: &'a InferenceRequest, stream: bool) -> MessagesRequest<'a> {
        let disable_parallel_tool_use = !request.parallel_tool_calls;
        let tool_choice = if request.tools.is_empty() {
            None
        } else {
            Some(match &request.tool_choice {
                ToolChoice::Auto => WireToolChoice::Auto {
                    disable_parallel_tool_use,
                },
                ToolChoice::Forced(name) => WireToolChoice::Tool {
                    name,
                    disable_parallel_tool_use,
                },
                ToolChoice::None => WireToolChoice::None,
            })
        };

        MessagesRequest {
            model: &request.model,
            max_tokens: request.max_tokens,
            system: &request.system_prompt,
            messages: &request.messages,
            tools: &request.tools,
            tool_choice,
            stream,
        }
    }

    /// Send once, turning non-success statuses into errors
    async fn send_once(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response> {
        let mut builder = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", self.api_key())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(body);
        if !body.stream {
            builder = builder.timeout(self.request_timeout);
        }
        let response = builder.send().await?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let text = response.text().await.unwrap_or_default();
        let message = serde_json::from_str::<ErrorResponse>(&text)
            .map(|e| e.error.message)
            .unwrap_or(text);

        Err(SwitchboardError::InferenceStatus {
            status: status.as_u16(),
            message,
        })
    }

    /// Send with exponential backoff on retryable failures
    async fn send_with_retry(&self, body: &MessagesRequest<'_>) -> Result<reqwest::Response> {
        let mut attempt = 0;
        loop {
            match self.send_once(body).await {
                Ok(response) => return Ok(response),
                Err(e) if e.is_retryable_inference() && attempt < self.max_retries => {
                    let delay = self.retry_base_delay * 2u32.pow(attempt);
                    attempt += 1;
                    tracing::warn!(
                        "Inference request failed (attempt {}/{}): {}, retrying in {:?}",
                        attempt,
                        self.max_retries + 1,
                        e,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// List model identifiers available to this key
    pub async fn list_models(&self) -> Result<Vec<String>> {
        let response = self
            .client
            .get(self.models_endpoint())
            .timeout(self.request_timeout)
            .header("x-api-key", self.api_key())
            .header("anthropic-version", ANTHROPIC_VERSION)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(SwitchboardError::InferenceStatus {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            });
        }

        let models: ModelsResponse = response.json().await?;
        Ok(models.data.into_iter().map(|m| m.id).collect())
    }
}

#[async_trait]
impl InferenceBackend for AnthropicClient {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse> {
        let body = Self::request_body(request, false);
        tracing::debug!(
            model = %request.model,
            messages = request.messages.len(),
            tools = request.tools.len(),
            "Sending inference request"
        );

        let response = self.send_with_retry(&body).await?;
        let text = response.text().await?;
        let parsed: MessagesResponse = serde_json::from_str(&text).map_err(|e| {
            SwitchboardError::inference(format!("Failed to parse response: {}", e))
        })?;

        Ok(InferenceResponse {
            content: parsed
                .content
                .into_iter()
                .filter_map(ResponseBlock::into_content)
                .collect(),
            stop_reason: parsed.stop_reason,
            usage: parsed.usage.map(TokenUsage::from),
        })
    }

    async fn stream(&self, request: InferenceRequest) -> Result<InferenceStream> {
        let body = Self::request_body(&request, true);
        let response = self.send_with_retry(&body).await?;

        let (tx, rx) = mpsc::channel(STREAM_CHANNEL_SIZE);
        tokio::spawn(async move {
            let mut sse = response.bytes_stream().eventsource();
            let mut mapper = EventMapper::default();

            while let Some(event) = sse.next().await {
                let events = match event {
                    Ok(event) => mapper.map_event(&event.event, &event.data),
                    Err(e) => Err(SwitchboardError::inference(format!("Stream error: {}", e))),
                };

                match events {
                    Ok(events) => {
                        for event in events {
                            if tx.send(Ok(event)).await.is_err() {
                                return;
                            }
                        }
                    }
                    Err(e) => {
                        let _ = tx.send(Err(e)).await;
                        return;
                    }
                }

                if mapper.finished {
                    return;
                }
            }

            let _ = tx
                .send(Err(SwitchboardError::inference(
                    "Stream ended before message_stop",
                )))
                .await;
        });

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    fn has_credentials(&self) -> bool {
        !self.api_key().trim().is_empty()
    }

    fn set_api_key(&self, api_key: String) {
        *self.api_key.write().unwrap_or_else(|e| e.into_inner()) = api_key;
    }

    fn name(&self) -> &str {
        "anthropic"
    }
}

// ---------------------------------------------------------------------------
// Streaming event mapper
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum StreamPayload {
    MessageStart {
        #[serde(default)]
        message: Option<StartMessage>,
    },
    ContentBlockStart {
        index: usize,
        content_block: ResponseBlock,
    },
    ContentBlockDelta {
        index: usize,
        delta: BlockDelta,
    },
    ContentBlockStop {
        index: usize,
    },
    MessageDelta {
        delta: MessageDeltaBody,
        #[serde(default)]
        usage: Option<WireUsage>,
    },
    MessageStop,
    Ping,
    Error {
        error: ErrorBody,
    },
}

#[derive(Debug, Deserialize)]
struct StartMessage {
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum BlockDelta {
    TextDelta {
        text: String,
    },
    InputJsonDelta {
        partial_json: String,
    },
    #[serde(other)]
    Unsupported,
}

#[derive(Debug, Deserialize)]
struct MessageDeltaBody {
    #[serde(default)]
    stop_reason: Option<String>,
}

/// Block being assembled from deltas
#[derive(Debug)]
enum PartialBlock {
    Text(String),
    ToolUse {
        id: String,
        name: String,
        json: String,
    },
    Skipped,
}

/// Tracks open blocks and rebuilds the full response
#[derive(Debug, Default)]
struct EventMapper {
    blocks: Vec<PartialBlock>,
    content: Vec<ContentBlock>,
    stop_reason: Option<String>,
    usage: TokenUsage,
    finished: bool,
}

impl EventMapper {
    fn map_event(&mut self, event_type: &str, data: &str) -> Result<Vec<InferenceEvent>> {
        if event_type == "ping" || data.trim().is_empty() {
            return Ok(Vec::new());
        }

        let payload: StreamPayload = serde_json::from_str(data).map_err(|e| {
            SwitchboardError::inference(format!("Bad stream event '{}': {}", event_type, e))
        })?;

        match payload {
            StreamPayload::MessageStart { message } => {
                if let Some(usage) = message.and_then(|m| m.usage) {
                    self.usage.input_tokens = usage.input_tokens;
                }
                Ok(vec![InferenceEvent::MessageStart])
            }
            StreamPayload::ContentBlockStart {
                index,
                content_block,
            } => {
                let (block, initial) = match content_block {
                    ResponseBlock::Text { text } => (PartialBlock::Text(text.clone()), text),
                    ResponseBlock::ToolUse { id, name, .. } => (
                        PartialBlock::ToolUse {
                            id,
                            name,
                            json: String::new(),
                        },
                        String::new(),
                    ),
                    ResponseBlock::Unsupported => (PartialBlock::Skipped, String::new()),
                };
                self.open(index, block);
                if initial.is_empty() {
                    Ok(Vec::new())
                } else {
                    Ok(vec![InferenceEvent::TextDelta(initial)])
                }
            }
            StreamPayload::ContentBlockDelta { index, delta } => {
                match (self.blocks.get_mut(index), delta) {
                    (Some(PartialBlock::Text(text)), BlockDelta::TextDelta { text: delta }) => {
                        text.push_str(&delta);
                        Ok(vec![InferenceEvent::TextDelta(delta)])
                    }
                    (
                        Some(PartialBlock::ToolUse { json, .. }),
                        BlockDelta::InputJsonDelta { partial_json },
                    ) => {
                        json.push_str(&partial_json);
                        Ok(Vec::new())
                    }
                    _ => Ok(Vec::new()),
                }
            }
            StreamPayload::ContentBlockStop { index } => self.close(index),
            StreamPayload::MessageDelta { delta, usage } => {
                self.stop_reason = delta.stop_reason;
                if let Some(usage) = usage {
                    self.usage.output_tokens = usage.output_tokens;
                }
                Ok(Vec::new())
            }
            StreamPayload::MessageStop => {
                self.finished = true;
                Ok(vec![InferenceEvent::MessageComplete(InferenceResponse {
                    content: std::mem::take(&mut self.content),
                    stop_reason: self.stop_reason.take(),
                    usage: Some(self.usage.clone()),
                })])
            }
            StreamPayload::Ping => Ok(Vec::new()),
            StreamPayload::Error { error } => Err(SwitchboardError::inference(error.message)),
        }
    }

    fn open(&mut self, index: usize, block: PartialBlock) {
        while self.blocks.len() <= index {
            self.blocks.push(PartialBlock::Skipped);
        }
        self.blocks[index] = block;
    }

    fn close(&mut self, index: usize) -> Result<Vec<InferenceEvent>> {
        let Some(block) = self.blocks.get_mut(index) else {
            return Ok(Vec::new());
        };

        match std::mem::replace(block, PartialBlock::Skipped) {
            PartialBlock::Text(text) => {
                self.content.push(ContentBlock::Text { text });
                Ok(Vec::new())
            }
            PartialBlock::ToolUse { id, name, json } => {
                let input = if json.trim().is_empty() {
                    Value::Object(Default::default())
                } else {
                    serde_json::from_str(&json).map_err(|e| {
                        SwitchboardError::inference(format!(
                            "Bad tool input for '{}': {}",
                            name, e
                        ))
                    })?
                };
                self.content.push(ContentBlock::ToolUse {
                    id: id.clone(),
                    name: name.clone(),
                    input: input.clone(),
                });
                Ok(vec![InferenceEvent::ToolUse(ToolCall::new(id, name, input))])
            }
            PartialBlock::Skipped => Ok(Vec::new()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{Message, project_history};
    use serde_json::json;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    fn request(tools: Vec<ToolDefinition>) -> InferenceRequest {
        InferenceRequest {
            system_prompt: "Today's date is 2024-06-01.".to_string(),
            model: "claude-test".to_string(),
            max_tokens: 256,
            messages: project_history(&[Message::user("hi")]),
            tools,
            tool_choice: ToolChoice::Auto,
            parallel_tool_calls: false,
        }
    }

    fn config(endpoint: String) -> AnthropicConfig {
        AnthropicConfig {
            api_key: "sk-test".to_string(),
            model: "claude-test".to_string(),
            max_tokens: 256,
            endpoint,
            timeout_secs: 5,
            max_retries: 2,
        }
    }

    /// Serve canned HTTP responses, one per connection, in order
    async fn serve(responses: Vec<(u16, String)>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        tokio::spawn(async move {
            for (status, body) in responses {
                let (mut socket, _) = listener.accept().await.unwrap();
                read_request(&mut socket).await;
                let reply = format!(
                    "HTTP/1.1 {} X\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    status,
                    body.len(),
                    body
                );
                socket.write_all(reply.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });

        format!("http://{}/v1/messages", addr)
    }

    async fn read_request(socket: &mut tokio::net::TcpStream) {
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        loop {
            let n = socket.read(&mut chunk).await.unwrap();
            if n == 0 {
                return;
            }
            buf.extend_from_slice(&chunk[..n]);
            let text = String::from_utf8_lossy(&buf).to_string();
            if let Some(end) = text.find("\r\n\r\n") {
                let length = text[..end]
                    .lines()
                    .find_map(|l| {
                        l.to_ascii_lowercase()
                            .strip_prefix("content-length:")
                            .map(|v| v.trim().parse::<usize>().unwrap_or(0))
                    })
                    .unwrap_or(0);
                if buf.len() >= end + 4 + length {
                    return;
                }
            }
        }
    }

    #[test]
    fn test_request_body_omits_tool_choice_without_tools() {
        let req = request(Vec::new());
        let body = serde_json::to_value(AnthropicClient::request_body(&req, false)).unwrap();
        assert!(body.get("tools").is_none());
        assert!(body.get("tool_choice").is_none());
        assert!(body.get("stream").is_none());
        assert_eq!(body["system"], "Today's date is 2024-06-01.");
        assert_eq!(body["messages"][0], json!({"role": "user", "content": "hi"}));
    }

    #[test]
    fn test_request_body_tool_choice() {
        let mut req = request(vec![ToolDefinition::new(
            "_AGENT_HANDOFF___money_agent",
            "Transfer",
            json!({"type": "object", "properties": {}}),
        )]);
        let body = serde_json::to_value(AnthropicClient::request_body(&req, true)).unwrap();
        assert_eq!(
            body["tool_choice"],
            json!({"type": "auto", "disable_parallel_tool_use": true})
        );
        assert_eq!(body["stream"], true);

        req.tool_choice = ToolChoice::Forced("_AGENT_HANDOFF___money_agent".to_string());
        req.parallel_tool_calls = true;
        let body = serde_json::to_value(AnthropicClient::request_body(&req, false)).unwrap();
        assert_eq!(
            body["tool_choice"],
            json!({"type": "tool", "name": "_AGENT_HANDOFF___money_agent"})
        );
    }

    #[test]
    fn test_event_mapper_assembles_response() {
        let mut mapper = EventMapper::default();
        let script = [
            ("message_start", json!({"type": "message_start", "message": {"usage": {"input_tokens": 12}}})),
            ("content_block_start", json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "Let me "}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": "check."}})),
            ("content_block_stop", json!({"type": "content_block_stop", "index": 0})),
            ("content_block_start", json!({"type": "content_block_start", "index": 1, "content_block": {"type": "tool_use", "id": "t1", "name": "ramp___balance", "input": {}}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": "{\"acct\":"}})),
            ("content_block_delta", json!({"type": "content_block_delta", "index": 1, "delta": {"type": "input_json_delta", "partial_json": " \"ops\"}"}})),
            ("content_block_stop", json!({"type": "content_block_stop", "index": 1})),
            ("message_delta", json!({"type": "message_delta", "delta": {"stop_reason": "tool_use"}, "usage": {"output_tokens": 30}})),
            ("message_stop", json!({"type": "message_stop"})),
        ];

        let mut events = Vec::new();
        for (name, data) in script {
            events.extend(mapper.map_event(name, &data.to_string()).unwrap());
        }

        assert_eq!(events[0], InferenceEvent::MessageStart);
        assert_eq!(events[1], InferenceEvent::TextDelta("Let me ".to_string()));
        assert_eq!(events[2], InferenceEvent::TextDelta("check.".to_string()));
        assert_eq!(
            events[3],
            InferenceEvent::ToolUse(ToolCall::new("t1", "ramp___balance", json!({"acct": "ops"})))
        );

        let InferenceEvent::MessageComplete(response) = &events[4] else {
            panic!("expected MessageComplete, got {:?}", events[4]);
        };
        assert_eq!(response.text(), "Let me check.");
        assert_eq!(response.tool_calls()[0].arguments, json!({"acct": "ops"}));
        assert_eq!(response.stop_reason.as_deref(), Some("tool_use"));
        assert_eq!(
            response.usage,
            Some(TokenUsage {
                input_tokens: 12,
                output_tokens: 30
            })
        );
        assert!(mapper.finished);
    }

    #[test]
    fn test_event_mapper_surfaces_stream_error() {
        let mut mapper = EventMapper::default();
        let data = json!({"type": "error", "error": {"type": "overloaded_error", "message": "Overloaded"}});
        let err = mapper.map_event("error", &data.to_string()).unwrap_err();
        assert!(err.to_string().contains("Overloaded"));
    }

    #[tokio::test]
    async fn test_complete_retries_overloaded() {
        let ok = json!({
            "content": [
                {"type": "text", "text": "Hello"},
                {"type": "tool_use", "id": "t1", "name": "_AGENT_HANDOFF___money_agent", "input": {}}
            ],
            "stop_reason": "tool_use",
            "usage": {"input_tokens": 5, "output_tokens": 7}
        });
        let endpoint = serve(vec![
            (529, json!({"error": {"type": "overloaded_error", "message": "Overloaded"}}).to_string()),
            (200, ok.to_string()),
        ])
        .await;

        let client = AnthropicClient::from_config(&config(endpoint))
            .unwrap()
            .with_retry_delay(Duration::from_millis(10));
        let response = client.complete(&request(Vec::new())).await.unwrap();

        assert_eq!(response.text(), "Hello");
        assert_eq!(response.tool_calls()[0].name, "_AGENT_HANDOFF___money_agent");
    }

    #[tokio::test]
    async fn test_complete_reports_client_errors() {
        let endpoint = serve(vec![(
            401,
            json!({"error": {"type": "authentication_error", "message": "invalid x-api-key"}})
                .to_string(),
        )])
        .await;

        let client = AnthropicClient::from_config(&config(endpoint)).unwrap();
        let err = client.complete(&request(Vec::new())).await.unwrap_err();
        assert!(matches!(
            err,
            SwitchboardError::InferenceStatus { status: 401, ref message } if message == "invalid x-api-key"
        ));
    }

    #[tokio::test]
    async fn test_stream_may_outlast_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let endpoint = format!("http://{}/v1/messages", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            read_request(&mut socket).await;
            socket
                .write_all(b"HTTP/1.1 200 OK\r\ncontent-type: text/event-stream\r\nconnection: close\r\n\r\n")
                .await
                .unwrap();

            let mut events = vec![
                json!({"type": "message_start", "message": {"usage": {"input_tokens": 3}}}),
                json!({"type": "content_block_start", "index": 0, "content_block": {"type": "text", "text": ""}}),
            ];
            for word in ["Slow ", "but ", "steady."] {
                events.push(json!({"type": "content_block_delta", "index": 0, "delta": {"type": "text_delta", "text": word}}));
            }
            events.push(json!({"type": "content_block_stop", "index": 0}));
            events.push(json!({"type": "message_delta", "delta": {"stop_reason": "end_turn"}, "usage": {"output_tokens": 4}}));
            events.push(json!({"type": "message_stop"}));

            for event in events {
                let frame = format!("event: {}\ndata: {}\n\n", event["type"].as_str().unwrap(), event);
                socket.write_all(frame.as_bytes()).await.unwrap();
                tokio::time::sleep(Duration::from_millis(250)).await;
            }
            socket.shutdown().await.unwrap();
        });

        // Eight frames 250ms apart take about 2s against a 1s bound.
        let mut cfg = config(endpoint);
        cfg.timeout_secs = 1;
        let client = AnthropicClient::from_config(&cfg).unwrap();
        let events: Vec<InferenceEvent> = client
            .stream(request(Vec::new()))
            .await
            .unwrap()
            .map(|event| event.unwrap())
            .collect()
            .await;

        match events.last() {
            Some(InferenceEvent::MessageComplete(response)) => {
                assert_eq!(response.text(), "Slow but steady.");
            }
            other => panic!("expected MessageComplete, got {:?}", other),
        }
    }

    #[test]
    fn test_credentials_and_models_endpoint() {
        let mut cfg = config("https://api.anthropic.com/v1/messages".to_string());
        cfg.api_key = String::new();
        let client = AnthropicClient::from_config(&cfg).unwrap();
        assert!(!client.has_credentials());
        client.set_api_key("sk-live".to_string());
        assert!(client.has_credentials());
        assert_eq!(client.models_endpoint(), "https://api.anthropic.com/v1/models");
    }
}
