//! In-process stand-in for a chat-completion API client.
//!
//! `TestClient` shapes requests the way a hosted chat API expects them (image parts folded
//! into the last message, `tool_choice` derived from the tool list) and hands them to a
//! `ChatBackend` instead of the network. Streaming calls retry transport failures with a fixed
//! backoff.

mod backend;
mod client;
mod config;
mod credentials;
mod error;
mod request;
mod retry;
mod scripted;
mod types;

pub use backend::{ChatBackend, ChunkStream, EchoBackend, echo_completion};
pub use client::TestClient;
pub use config::{ClientConfig, DEFAULT_MODEL, DEFAULT_REQUEST_TIMEOUT, GenerateArgs};
pub use credentials::{API_KEY_ENV, lookup_api_key_with, resolve_api_key};
pub use error::{LlmError, Result};
pub use request::{
    ChatRequest, attach_images, select_tools, validate_messages, validate_tool_name,
    validate_tools,
};
pub use retry::{
    DEFAULT_BACKOFF, DEFAULT_MAX_ATTEMPTS, RetryPolicy, TextStream, retrying_text_stream,
};
pub use scripted::{CompletionAttempt, Script, ScriptedBackend, StreamAttempt, StreamEvent};
pub use types::{
    ChatCompletion, ChatCompletionChunk, ChatMessage, Choice, ChunkChoice, ChunkDelta,
    ContentPart, FunctionDefinition, ImageUrl, MessageContent, Role, ToolChoice, ToolDefinition,
    Usage,
};
