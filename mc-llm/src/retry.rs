//! Bounded-retry streaming.
//!
//! A streaming call moves through `Attempting -> Streaming -> Succeeded`. A transport failure
//! at any point sends it to `BackingOff`, which sleeps a fixed interval and restarts the whole
//! call, until the attempt budget is spent and the stream ends in `Exhausted`. Fragments
//! already yielded before a failure are not taken back.

use crate::backend::{ChatBackend, ChunkStream};
use crate::error::{LlmError, Result};
use crate::request::ChatRequest;
use crate::types::ChatMessage;
use futures_util::{Stream, StreamExt};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 10;
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(2);

pub type TextStream = Pin<Box<dyn Stream<Item = Result<String>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            backoff: DEFAULT_BACKOFF,
        }
    }
}

enum Phase {
    Attempting,
    Streaming(ChunkStream),
    BackingOff,
    Succeeded,
    Exhausted,
    /// A non-retryable error was returned to the caller.
    Failed,
}

struct RetryLoop {
    backend: Arc<dyn ChatBackend>,
    request: ChatRequest,
    policy: RetryPolicy,
    attempts: u32,
    phase: Phase,
}

/// Stream text fragments for `request`, restarting the call on transport errors.
///
/// Yields one `Ok` per fragment. Ends cleanly at the first chunk without content or when the
/// backend stream ends. Ends with a single `Err` when a non-retryable error occurs or after
/// `policy.max_attempts` failed attempts.
pub fn retrying_text_stream(
    backend: Arc<dyn ChatBackend>,
    request: ChatRequest,
    policy: RetryPolicy,
) -> TextStream {
    let state = RetryLoop {
        backend,
        request,
        policy,
        attempts: 0,
        phase: Phase::Attempting,
    };
    let stream = futures_util::stream::unfold(state, |mut state| async move {
        let item = state.advance().await?;
        Some((item, state))
    });
    Box::pin(stream.fuse())
}

impl RetryLoop {
    async fn advance(&mut self) -> Option<Result<String>> {
        loop {
            match std::mem::replace(&mut self.phase, Phase::Succeeded) {
                Phase::Attempting => {
                    self.attempts += 1;
                    tracing::debug!(attempt = self.attempts, "opening chat stream");
                    match self.backend.create_stream(&self.request).await {
                        Ok(stream) => self.phase = Phase::Streaming(stream),
                        Err(e) => {
                            if let Some(e) = self.on_failure(e) {
                                return Some(Err(e));
                            }
                        }
                    }
                }
                Phase::Streaming(mut stream) => {
                    let next = stream.next().await;
                    match next {
                        Some(Ok(chunk)) => {
                            let Some(choice) = chunk.choices.into_iter().next() else {
                                self.phase = Phase::Streaming(stream);
                                continue;
                            };
                            match choice.delta.content {
                                Some(text) => {
                                    self.phase = Phase::Streaming(stream);
                                    return Some(Ok(text));
                                }
                                None => {
                                    tracing::debug!(
                                        attempts = self.attempts,
                                        "chat stream finished"
                                    );
                                    return None;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            drop(stream);
                            if let Some(e) = self.on_failure(e) {
                                return Some(Err(e));
                            }
                        }
                        None => {
                            tracing::debug!(attempts = self.attempts, "chat stream ended");
                            return None;
                        }
                    }
                }
                Phase::BackingOff => {
                    tokio::time::sleep(self.policy.backoff).await;
                    self.phase = Phase::Attempting;
                }
                Phase::Succeeded => return None,
                Phase::Exhausted => {
                    self.phase = Phase::Exhausted;
                    return None;
                }
                Phase::Failed => {
                    self.phase = Phase::Failed;
                    return None;
                }
            }
        }
    }

    /// Decide what a failure means. Returns the error to hand to the caller, if any.
    fn on_failure(&mut self, error: LlmError) -> Option<LlmError> {
        if !error.is_retryable() {
            tracing::error!(%error, "chat stream failed with non-retryable error");
            self.phase = Phase::Failed;
            return Some(error);
        }

        let messages = messages_json(&self.request.messages);
        if self.attempts >= self.policy.max_attempts {
            tracing::error!(
                attempts = self.attempts,
                %error,
                %messages,
                "chat stream failed; retries exhausted"
            );
            self.phase = Phase::Exhausted;
            return Some(LlmError::RetriesExhausted {
                attempts: self.attempts,
                last_error: error.to_string(),
                messages,
            });
        }

        tracing::warn!(
            attempt = self.attempts,
            max_attempts = self.policy.max_attempts,
            %error,
            %messages,
            backoff = ?self.policy.backoff,
            "chat stream failed; retrying with backoff"
        );
        self.phase = Phase::BackingOff;
        None
    }
}

fn messages_json(messages: &[ChatMessage]) -> String {
    serde_json::to_string(messages)
        .unwrap_or_else(|e| format!("<failed to serialize messages: {e}>"))
}
