//! Scripted inference backend
//!
//! Replays canned responses without network access, and records every
//! request it receives so tests can inspect what the engine sent.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, RwLock};

use crate::core::{ContentBlock, Result, SwitchboardError, ToolCall};
use crate::llm::traits::{
    InferenceBackend, InferenceEvent, InferenceRequest, InferenceResponse, InferenceStream,
};

type Responder = dyn Fn(&InferenceRequest) -> Result<InferenceResponse> + Send + Sync;

/// Inference backend driven by a script
pub struct ScriptedBackend {
    responder: Box<Responder>,
    requests: Arc<Mutex<Vec<InferenceRequest>>>,
    api_key: RwLock<String>,
}

impl ScriptedBackend {
    /// Backend that answers each call with the next response in order
    ///
    /// Once the queue is empty every further call fails.
    pub fn new(responses: Vec<InferenceResponse>) -> Self {
        let queue = Mutex::new(VecDeque::from(responses));
        Self::from_fn(move |_| {
            queue
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .pop_front()
                .ok_or_else(|| SwitchboardError::inference("Scripted responses exhausted"))
        })
    }

    /// Backend that computes each response from the request
    pub fn from_fn<F>(responder: F) -> Self
    where
        F: Fn(&InferenceRequest) -> Result<InferenceResponse> + Send + Sync + 'static,
    {
        Self {
            responder: Box::new(responder),
            requests: Arc::new(Mutex::new(Vec::new())),
            api_key: RwLock::new("scripted".to_string()),
        }
    }

    /// Backend that always answers with one text block
    pub fn text(reply: impl Into<String>) -> Self {
        let reply = reply.into();
        Self::from_fn(move |_| {
            Ok(InferenceResponse::from_blocks(vec![ContentBlock::text(
                reply.clone(),
            )]))
        })
    }

    /// Start with the given API key (empty means unconfigured)
    pub fn with_api_key(self, api_key: impl Into<String>) -> Self {
        *self.api_key.write().unwrap_or_else(|e| e.into_inner()) = api_key.into();
        self
    }

    /// Requests received so far
    pub fn requests(&self) -> Vec<InferenceRequest> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    fn respond(&self, request: &InferenceRequest) -> Result<InferenceResponse> {
        self.requests
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(request.clone());
        (self.responder)(request)
    }
}

/// Events a streaming backend would emit for `response`
///
/// Text arrives word by word; tool uses arrive whole.
pub fn events_for(response: &InferenceResponse) -> Vec<InferenceEvent> {
    let mut events = vec![InferenceEvent::MessageStart];

    for block in &response.content {
        match block {
            ContentBlock::Text { text } => {
                events.extend(
                    text.split_inclusive(' ')
                        .map(|word| InferenceEvent::TextDelta(word.to_string())),
                );
            }
            ContentBlock::ToolUse { id, name, input } => {
                events.push(InferenceEvent::ToolUse(ToolCall::new(
                    id.clone(),
                    name.clone(),
                    input.clone(),
                )));
            }
        }
    }

    events.push(InferenceEvent::MessageComplete(response.clone()));
    events
}

#[async_trait]
impl InferenceBackend for ScriptedBackend {
    async fn complete(&self, request: &InferenceRequest) -> Result<InferenceResponse> {
        self.respond(request)
    }

    async fn stream(&self, request: InferenceRequest) -> Result<InferenceStream> {
        let response = self.respond(&request)?;
        let events = events_for(&response).into_iter().map(Ok);
        Ok(Box::pin(futures::stream::iter(events)))
    }

    fn has_credentials(&self) -> bool {
        !self
            .api_key
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .trim()
            .is_empty()
    }

    fn set_api_key(&self, api_key: String) {
        *self.api_key.write().unwrap_or_else(|e| e.into_inner()) = api_key;
    }

    fn name(&self) -> &str {
        "scripted"
    }
}
