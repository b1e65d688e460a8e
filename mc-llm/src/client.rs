use crate::backend::{ChatBackend, EchoBackend};
use crate::config::{ClientConfig, GenerateArgs};
use crate::credentials;
use crate::error::{LlmError, Result};
use crate::request::{self, ChatRequest};
use crate::retry::{RetryPolicy, TextStream, retrying_text_stream};
use crate::types::{ChatCompletion, ChatMessage, ToolDefinition};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A chat client that never leaves the process.
///
/// Requests are shaped exactly as they would be for a hosted chat-completion API and handed
/// to a `ChatBackend`, which decides what comes back.
#[derive(Clone)]
pub struct TestClient {
    api_key: String,
    generate_args: GenerateArgs,
    retry: RetryPolicy,
    request_timeout: Duration,
    backend: Arc<dyn ChatBackend>,
}

impl fmt::Debug for TestClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TestClient")
            .field("api_key", &"<redacted>")
            .field("generate_args", &self.generate_args)
            .field("retry", &self.retry)
            .field("request_timeout", &self.request_timeout)
            .finish_non_exhaustive()
    }
}

impl TestClient {
    #[tracing::instrument(level = "debug", skip_all)]
    pub fn new(config: ClientConfig, backend: Arc<dyn ChatBackend>) -> Result<Self> {
        let api_key = config
            .api_key
            .map(|k| k.trim().to_string())
            .filter(|k| !k.is_empty())
            .ok_or_else(|| {
                LlmError::Configuration("the client is not available; check the API key".into())
            })?;

        let generate_args = GenerateArgs::with_overrides(&config.generate_args);
        generate_args.validate()?;

        if config.retry.max_attempts == 0 {
            return Err(LlmError::Configuration(
                "retry.max_attempts must be > 0".to_string(),
            ));
        }

        tracing::debug!(
            model = generate_args.model(),
            max_attempts = config.retry.max_attempts,
            "test client ready"
        );
        Ok(Self {
            api_key,
            generate_args,
            retry: config.retry,
            request_timeout: config.request_timeout,
            backend,
        })
    }

    /// Like `new`, but falls back to `OPENAI_API_KEY` (and `.env`) when no key is configured.
    pub fn from_env(mut config: ClientConfig, backend: Arc<dyn ChatBackend>) -> Result<Self> {
        config.api_key = Some(credentials::resolve_api_key(config.api_key.take())?);
        Self::new(config, backend)
    }

    /// A client backed by `EchoBackend`.
    pub fn echo(api_key: &str) -> Result<Self> {
        Self::new(ClientConfig::with_api_key(api_key), Arc::new(EchoBackend))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub fn generate_args(&self) -> &GenerateArgs {
        &self.generate_args
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    pub fn model(&self) -> &str {
        self.generate_args.model()
    }

    /// Non-streaming call. `tools` present and non-empty selects `tool_choice = auto`.
    #[tracing::instrument(level = "info", skip_all, fields(model = self.model()))]
    pub async fn run(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        images: &[String],
    ) -> Result<ChatCompletion> {
        let req = self.completion_request(messages, tools, images)?;
        tracing::debug!(
            messages = req.messages.len(),
            tools = req.tools.len(),
            tool_choice = ?req.tool_choice,
            images = images.len(),
            "running chat completion"
        );
        self.backend.create_completion(&req).await
    }

    /// Streaming call. Fragments arrive lazily; transport errors are retried per the client's
    /// retry policy.
    #[tracing::instrument(level = "info", skip_all, fields(model = self.model()))]
    pub fn stream_run(&self, messages: &[ChatMessage], images: &[String]) -> Result<TextStream> {
        let req = self.stream_request(messages, images)?;
        tracing::debug!(
            messages = req.messages.len(),
            images = images.len(),
            "starting chat stream"
        );
        Ok(retrying_text_stream(self.backend.clone(), req, self.retry))
    }

    /// The request `run` would send, without sending it.
    pub fn completion_request(
        &self,
        messages: &[ChatMessage],
        tools: Option<&[ToolDefinition]>,
        images: &[String],
    ) -> Result<ChatRequest> {
        request::validate_messages(messages)?;
        if let Some(tools) = tools {
            request::validate_tools(tools)?;
        }
        let messages = request::attach_images(messages, images)?;
        Ok(ChatRequest::completion(
            messages,
            tools,
            &self.generate_args,
            self.request_timeout,
        ))
    }

    /// The request `stream_run` would send, without sending it.
    pub fn stream_request(
        &self,
        messages: &[ChatMessage],
        images: &[String],
    ) -> Result<ChatRequest> {
        request::validate_messages(messages)?;
        let messages = request::attach_images(messages, images)?;
        Ok(ChatRequest::streaming(
            messages,
            &self.generate_args,
            self.request_timeout,
        ))
    }
}
