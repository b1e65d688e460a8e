//! A backend that replays a script of failures and fragments and records what it was sent.

use crate::backend::{ChatBackend, ChunkStream, echo_chunks, echo_completion};
use crate::error::{LlmError, Result};
use crate::request::ChatRequest;
use crate::types::{ChatCompletion, ChatCompletionChunk, MessageContent};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A chunk whose delta carries `text`.
    Text { text: String },
    /// The no-content sentinel chunk.
    Finish,
    /// A transport failure in the middle of the stream.
    Fail { error: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamAttempt {
    /// The streaming call itself fails.
    Fail { error: String },
    Events { events: Vec<StreamEvent> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CompletionAttempt {
    Reply { content: String },
    Fail { error: String },
}

/// Serializable form of a script, as loaded from disk.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Script {
    #[serde(default)]
    pub streams: Vec<StreamAttempt>,
    #[serde(default)]
    pub completions: Vec<CompletionAttempt>,
}

#[derive(Debug, Default)]
struct ScriptState {
    streams: VecDeque<StreamAttempt>,
    completions: VecDeque<CompletionAttempt>,
    last_stream: Option<StreamAttempt>,
}

/// Replays scripted attempts in order.
///
/// Once the stream queue runs dry the last attempt repeats, so a single `Fail` attempt
/// fails forever. With nothing scripted at all the backend behaves like `EchoBackend`.
#[derive(Debug, Default)]
pub struct ScriptedBackend {
    state: Mutex<ScriptState>,
    requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_script(script: Script) -> Self {
        Self {
            state: Mutex::new(ScriptState {
                streams: script.streams.into(),
                completions: script.completions.into(),
                last_stream: None,
            }),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let script: Script = serde_json::from_str(json)?;
        Ok(Self::from_script(script))
    }

    pub fn push_stream(self, attempt: StreamAttempt) -> Self {
        lock(&self.state).streams.push_back(attempt);
        self
    }

    /// Queue a streaming call that fails before producing anything.
    pub fn fail_stream(self, error: impl Into<String>) -> Self {
        self.push_stream(StreamAttempt::Fail {
            error: error.into(),
        })
    }

    /// Queue a streaming call that yields `fragments` followed by the sentinel.
    pub fn stream_fragments<I, S>(self, fragments: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut events: Vec<StreamEvent> = fragments
            .into_iter()
            .map(|s| StreamEvent::Text { text: s.into() })
            .collect();
        events.push(StreamEvent::Finish);
        self.push_stream(StreamAttempt::Events { events })
    }

    pub fn push_completion(self, attempt: CompletionAttempt) -> Self {
        lock(&self.state).completions.push_back(attempt);
        self
    }

    pub fn reply(self, content: impl Into<String>) -> Self {
        self.push_completion(CompletionAttempt::Reply {
            content: content.into(),
        })
    }

    /// Every request received so far, in order.
    pub fn requests(&self) -> Vec<ChatRequest> {
        lock(&self.requests).clone()
    }

    pub fn stream_attempts(&self) -> usize {
        lock(&self.requests).iter().filter(|r| r.stream).count()
    }

    fn record(&self, request: &ChatRequest) {
        lock(&self.requests).push(request.clone());
    }

    fn next_stream(&self) -> Option<StreamAttempt> {
        let mut state = lock(&self.state);
        if let Some(next) = state.streams.pop_front() {
            state.last_stream = Some(next.clone());
            return Some(next);
        }
        state.last_stream.clone()
    }
}

#[async_trait]
impl ChatBackend for ScriptedBackend {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_completion(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        self.record(request);
        let next = lock(&self.state).completions.pop_front();
        match next {
            None => echo_completion(request),
            Some(CompletionAttempt::Fail { error }) => Err(LlmError::Transport(error)),
            Some(CompletionAttempt::Reply { content }) => {
                let mut completion = echo_completion(request)?;
                if let Some(choice) = completion.choices.first_mut() {
                    choice.message.content = MessageContent::Text(content);
                }
                Ok(completion)
            }
        }
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        self.record(request);
        let chunks: Vec<Result<ChatCompletionChunk>> = match self.next_stream() {
            None => echo_chunks(request)?.into_iter().map(Ok).collect(),
            Some(StreamAttempt::Fail { error }) => return Err(LlmError::Transport(error)),
            Some(StreamAttempt::Events { events }) => {
                let id = crate::backend::completion_id(request)?;
                let model = request.model();
                events
                    .into_iter()
                    .map(|e| match e {
                        StreamEvent::Text { text } => {
                            Ok(ChatCompletionChunk::delta(&id, model, text))
                        }
                        StreamEvent::Finish => Ok(ChatCompletionChunk::finish(&id, model, "stop")),
                        StreamEvent::Fail { error } => Err(LlmError::Transport(error)),
                    })
                    .collect()
            }
        };
        Ok(Box::pin(futures_util::stream::iter(chunks)))
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}
