//! The seam between `TestClient` and whatever produces completions.
//!
//! Nothing here performs network I/O. `EchoBackend` is the deterministic default; see
//! `crate::scripted` for a backend that replays failures and fragments on demand.

use crate::error::{LlmError, Result};
use crate::request::ChatRequest;
use crate::types::{ChatCompletion, ChatCompletionChunk, ChatMessage, Choice, Usage};
use async_trait::async_trait;
use futures_util::Stream;
use sha2::{Digest, Sha256};
use std::pin::Pin;

pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<ChatCompletionChunk>> + Send>>;

#[async_trait]
pub trait ChatBackend: Send + Sync {
    async fn create_completion(&self, request: &ChatRequest) -> Result<ChatCompletion>;

    async fn create_stream(&self, request: &ChatRequest) -> Result<ChunkStream>;
}

/// Replies with the text of the last message.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoBackend;

#[async_trait]
impl ChatBackend for EchoBackend {
    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_completion(&self, request: &ChatRequest) -> Result<ChatCompletion> {
        echo_completion(request)
    }

    #[tracing::instrument(level = "debug", skip_all)]
    async fn create_stream(&self, request: &ChatRequest) -> Result<ChunkStream> {
        let chunks = echo_chunks(request)?;
        Ok(Box::pin(futures_util::stream::iter(
            chunks.into_iter().map(Ok::<_, LlmError>),
        )))
    }
}

/// Deterministic placeholder completion for `request`.
///
/// The id is derived from the serialized request, `created` is fixed at 0 and token counts
/// are whitespace-separated words, so equal requests produce equal completions.
pub fn echo_completion(request: &ChatRequest) -> Result<ChatCompletion> {
    let reply = request.last_text();
    let prompt_tokens = request
        .messages
        .iter()
        .map(|m| word_count(&m.content.text()))
        .sum();
    Ok(ChatCompletion {
        id: completion_id(request)?,
        object: "chat.completion".to_string(),
        created: 0,
        model: request.model().to_string(),
        choices: vec![Choice {
            index: 0,
            message: ChatMessage::assistant(reply.clone()),
            finish_reason: "stop".to_string(),
        }],
        usage: Usage::new(prompt_tokens, word_count(&reply)),
    })
}

/// The echo reply split into word fragments, terminated by a finish chunk.
pub fn echo_chunks(request: &ChatRequest) -> Result<Vec<ChatCompletionChunk>> {
    let id = completion_id(request)?;
    let model = request.model();
    let reply = request.last_text();

    let mut chunks: Vec<ChatCompletionChunk> = reply
        .split_inclusive(' ')
        .map(|word| ChatCompletionChunk::delta(&id, model, word))
        .collect();
    chunks.push(ChatCompletionChunk::finish(&id, model, "stop"));
    Ok(chunks)
}

pub fn completion_id(request: &ChatRequest) -> Result<String> {
    let body = serde_json::to_vec(request)?;
    let digest = Sha256::digest(&body);
    let hex: String = digest.iter().take(12).map(|b| format!("{b:02x}")).collect();
    Ok(format!("chatcmpl-{hex}"))
}

fn word_count(s: &str) -> u32 {
    s.split_whitespace().count() as u32
}
