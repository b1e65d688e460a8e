use crate::error::{LlmError, Result};
use crate::retry::RetryPolicy;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;

pub const DEFAULT_MODEL: &str = "gpt-4-turbo";
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Chat-completion parameters recognized without a warning. Other keys pass through.
const KNOWN_ARGS: &[&str] = &[
    "model",
    "temperature",
    "top_p",
    "n",
    "stop",
    "max_tokens",
    "max_completion_tokens",
    "presence_penalty",
    "frequency_penalty",
    "logit_bias",
    "logprobs",
    "top_logprobs",
    "user",
    "seed",
    "response_format",
    "parallel_tool_calls",
    "service_tier",
    "reasoning_effort",
    "store",
    "metadata",
    "stream_options",
    "modalities",
    "prediction",
    "audio",
    "web_search_options",
    "functions",
    "function_call",
];

/// Fields the client sets itself on every request.
const RESERVED_ARGS: &[&str] = &["messages", "tools", "tool_choice", "stream", "timeout"];

/// Generation arguments merged over the defaults. Caller values win on key collision.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct GenerateArgs(Map<String, Value>);

impl Default for GenerateArgs {
    fn default() -> Self {
        let mut m = Map::new();
        m.insert("model".to_string(), Value::from(DEFAULT_MODEL));
        m.insert("temperature".to_string(), Value::from(0.0));
        m.insert("top_p".to_string(), Value::from(1.0));
        Self(m)
    }
}

impl GenerateArgs {
    pub fn with_overrides(overrides: &Map<String, Value>) -> Self {
        let mut args = Self::default();
        for (k, v) in overrides {
            args.0.insert(k.clone(), v.clone());
        }
        args
    }

    pub fn model(&self) -> &str {
        self.0
            .get("model")
            .and_then(Value::as_str)
            .unwrap_or(DEFAULT_MODEL)
    }

    pub fn temperature(&self) -> Option<f64> {
        self.0.get("temperature").and_then(Value::as_f64)
    }

    pub fn top_p(&self) -> Option<f64> {
        self.0.get("top_p").and_then(Value::as_f64)
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn as_map(&self) -> &Map<String, Value> {
        &self.0
    }

    pub fn validate(&self) -> Result<()> {
        for key in self.0.keys() {
            if RESERVED_ARGS.contains(&key.as_str()) {
                return Err(LlmError::Configuration(format!(
                    "generate arg {key} is set by the client and cannot be overridden"
                )));
            }
            if !KNOWN_ARGS.contains(&key.as_str()) {
                tracing::warn!(arg = %key, "unrecognized generate arg; forwarding as-is");
            }
        }

        match self.0.get("model") {
            Some(Value::String(s)) if !s.trim().is_empty() => {}
            other => {
                return Err(LlmError::Configuration(format!(
                    "model must be a non-empty string, got {other:?}"
                )));
            }
        }
        check_range(&self.0, "temperature", 0.0, 2.0)?;
        check_range(&self.0, "top_p", 0.0, 1.0)?;
        Ok(())
    }
}

fn check_range(args: &Map<String, Value>, key: &str, min: f64, max: f64) -> Result<()> {
    let Some(v) = args.get(key) else {
        return Ok(());
    };
    let Some(n) = v.as_f64() else {
        return Err(LlmError::Configuration(format!(
            "{key} must be a number, got {v}"
        )));
    };
    if !(min..=max).contains(&n) {
        return Err(LlmError::Configuration(format!(
            "{key} must be within [{min}, {max}], got {n}"
        )));
    }
    Ok(())
}

/// Everything a `TestClient` needs at construction.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub api_key: Option<String>,
    /// Overrides merged over the default generation args.
    pub generate_args: Map<String, Value>,
    pub retry: RetryPolicy,
    pub request_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            api_key: None,
            generate_args: Map::new(),
            retry: RetryPolicy::default(),
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
        }
    }
}

impl ClientConfig {
    pub fn with_api_key(api_key: impl Into<String>) -> Self {
        Self {
            api_key: Some(api_key.into()),
            ..Self::default()
        }
    }

    pub fn generate_arg(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.generate_args.insert(key.into(), value.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn defaults_apply_without_overrides() {
        let args = GenerateArgs::with_overrides(&Map::new());
        assert_eq!(args.model(), "gpt-4-turbo");
        assert_eq!(args.temperature(), Some(0.0));
        assert_eq!(args.top_p(), Some(1.0));
        assert_eq!(args.as_map().len(), 3);
    }

    #[test]
    fn override_replaces_only_its_key() {
        let overrides = json!({"temperature": 0.7, "max_tokens": 128});
        let args = GenerateArgs::with_overrides(overrides.as_object().expect("object"));
        assert_eq!(args.temperature(), Some(0.7));
        assert_eq!(args.model(), "gpt-4-turbo");
        assert_eq!(args.top_p(), Some(1.0));
        assert_eq!(args.get("max_tokens"), Some(&json!(128)));
        args.validate().expect("valid args");
    }

    #[test]
    fn reserved_args_are_rejected() {
        let reserved = json!({"stream": true});
        let err = GenerateArgs::with_overrides(reserved.as_object().expect("object"))
            .validate()
            .expect_err("reserved key should fail");
        assert!(err.to_string().contains("stream"));
    }

    #[test]
    fn newer_and_unrecognized_args_pass_through() {
        let overrides = json!({
            "reasoning_effort": "low",
            "store": false,
            "metadata": {"suite": "smoke"},
            "stream_options": {"include_usage": true},
            "modalities": ["text"],
            "x_vendor_flag": 1
        });
        let args = GenerateArgs::with_overrides(overrides.as_object().expect("object"));
        args.validate().expect("extra args are forwarded");
        assert_eq!(args.get("reasoning_effort"), Some(&json!("low")));
        assert_eq!(args.get("x_vendor_flag"), Some(&json!(1)));
    }

    #[test]
    fn out_of_range_sampling_args_are_rejected() {
        for bad in [json!({"temperature": 2.5}), json!({"top_p": -0.1}), json!({"top_p": "1"})] {
            let err = GenerateArgs::with_overrides(bad.as_object().expect("object"))
                .validate()
                .expect_err("bad sampling arg");
            assert!(matches!(err, LlmError::Configuration(_)));
        }
    }

    #[test]
    fn blank_model_is_rejected() {
        let bad = json!({"model": "  "});
        assert!(
            GenerateArgs::with_overrides(bad.as_object().expect("object"))
                .validate()
                .is_err()
        );
    }
}
