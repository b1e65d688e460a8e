use crate::config::GenerateArgs;
use crate::error::{LlmError, Result};
use crate::types::{ChatMessage, ContentPart, MessageContent, Role, ToolChoice, ToolDefinition};
use serde::Serialize;
use std::time::Duration;

const MAX_TOOL_NAME_LEN: usize = 64;

/// A fully shaped chat-completion request, as a backend receives it.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<ToolDefinition>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    pub stream: bool,
    /// Per-request timeout in seconds.
    pub timeout: f64,
    #[serde(flatten)]
    pub generate_args: GenerateArgs,
}

impl ChatRequest {
    pub fn completion(
        messages: Vec<ChatMessage>,
        tools: Option<&[ToolDefinition]>,
        generate_args: &GenerateArgs,
        timeout: Duration,
    ) -> Self {
        let (tool_choice, tools) = select_tools(tools);
        Self {
            messages,
            tools,
            tool_choice: Some(tool_choice),
            stream: false,
            timeout: timeout.as_secs_f64(),
            generate_args: generate_args.clone(),
        }
    }

    pub fn streaming(
        messages: Vec<ChatMessage>,
        generate_args: &GenerateArgs,
        timeout: Duration,
    ) -> Self {
        Self {
            messages,
            tools: Vec::new(),
            tool_choice: None,
            stream: true,
            timeout: timeout.as_secs_f64(),
            generate_args: generate_args.clone(),
        }
    }

    pub fn model(&self) -> &str {
        self.generate_args.model()
    }

    /// Text of the last message, which the echo backend replies with.
    pub fn last_text(&self) -> String {
        self.messages
            .last()
            .map(|m| m.content.text())
            .unwrap_or_default()
    }
}

/// Fold image URLs into the last message.
///
/// The last message's text becomes the first part of a structured content list, followed by
/// one `image_url` part per URL in input order. An empty image list leaves the messages as-is.
pub fn attach_images(messages: &[ChatMessage], images: &[String]) -> Result<Vec<ChatMessage>> {
    let mut out = messages.to_vec();
    if images.is_empty() {
        return Ok(out);
    }

    let Some(last) = out.pop() else {
        return Err(LlmError::InvalidInput(
            "images given but there is no message to attach them to".to_string(),
        ));
    };
    let text = match last.content {
        MessageContent::Text(text) => text,
        MessageContent::Parts(_) => {
            return Err(LlmError::InvalidInput(
                "images can only be attached to a message with text content".to_string(),
            ));
        }
    };

    let mut parts = Vec::with_capacity(images.len() + 1);
    parts.push(ContentPart::text(text));
    for url in images {
        if url.trim().is_empty() {
            return Err(LlmError::InvalidInput("image url is empty".to_string()));
        }
        parts.push(ContentPart::image_url(url.clone()));
    }

    out.push(ChatMessage {
        content: MessageContent::Parts(parts),
        ..last
    });
    Ok(out)
}

/// Tools present means `auto` with the tools carried forward; otherwise `none` and no tools.
pub fn select_tools(tools: Option<&[ToolDefinition]>) -> (ToolChoice, Vec<ToolDefinition>) {
    match tools {
        Some(tools) if !tools.is_empty() => (ToolChoice::Auto, tools.to_vec()),
        _ => (ToolChoice::None, Vec::new()),
    }
}

pub fn validate_messages(messages: &[ChatMessage]) -> Result<()> {
    if messages.is_empty() {
        return Err(LlmError::InvalidInput("messages must not be empty".to_string()));
    }
    for (i, m) in messages.iter().enumerate() {
        if m.role == Role::Tool && m.tool_call_id.as_deref().is_none_or(str::is_empty) {
            return Err(LlmError::InvalidInput(format!(
                "message {i}: tool messages require tool_call_id"
            )));
        }
        if let MessageContent::Parts(parts) = &m.content {
            if parts.is_empty() {
                return Err(LlmError::InvalidInput(format!(
                    "message {i}: content parts must not be empty"
                )));
            }
        }
    }
    Ok(())
}

pub fn validate_tools(tools: &[ToolDefinition]) -> Result<()> {
    for t in tools {
        validate_tool(t)?;
    }
    Ok(())
}

pub fn validate_tool(tool: &ToolDefinition) -> Result<()> {
    if tool.kind != "function" {
        return Err(LlmError::InvalidInput(format!(
            "unsupported tool type: {}",
            tool.kind
        )));
    }
    validate_tool_name(&tool.function.name)?;
    if !(tool.function.parameters.is_null() || tool.function.parameters.is_object()) {
        return Err(LlmError::InvalidInput(format!(
            "tool {}: parameters must be a JSON object",
            tool.function.name
        )));
    }
    Ok(())
}

/// Tool names must match `^[a-zA-Z0-9_-]{1,64}$`.
pub fn validate_tool_name(name: &str) -> Result<()> {
    if name.is_empty() || name.len() > MAX_TOOL_NAME_LEN {
        return Err(LlmError::InvalidInput(format!(
            "tool name must be 1..={MAX_TOOL_NAME_LEN} characters: {name:?}"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_ascii_alphanumeric() || *c == '_' || *c == '-'))
    {
        return Err(LlmError::InvalidInput(format!(
            "tool name {name:?} contains invalid character {bad:?}"
        )));
    }
    Ok(())
}
