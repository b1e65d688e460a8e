//! MockChat configuration loader.

use mc_llm::{ClientConfig, RetryPolicy};
use serde::Deserialize;
use serde_json::{Map, Value};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MockChatConfig {
    #[serde(default)]
    pub client: ClientSection,
    /// Generation args merged over the client defaults.
    #[serde(default)]
    pub generate: Map<String, Value>,
    #[serde(default)]
    pub retry: RetrySection,
    #[serde(default)]
    pub backend: BackendSection,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClientSection {
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

impl Default for ClientSection {
    fn default() -> Self {
        Self {
            api_key: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

fn default_request_timeout_secs() -> u64 {
    mc_llm::DEFAULT_REQUEST_TIMEOUT.as_secs()
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetrySection {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_ms")]
    pub backoff_ms: u64,
}

impl Default for RetrySection {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            backoff_ms: default_backoff_ms(),
        }
    }
}

fn default_max_attempts() -> u32 {
    mc_llm::DEFAULT_MAX_ATTEMPTS
}

fn default_backoff_ms() -> u64 {
    mc_llm::DEFAULT_BACKOFF.as_millis() as u64
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BackendSection {
    /// JSON script for a `ScriptedBackend`. Without one the echo backend is used.
    #[serde(default)]
    pub script: Option<PathBuf>,
}

impl MockChatConfig {
    /// Load from `path`, or from the default location if it exists.
    ///
    /// An explicit path must exist; a missing default file yields the built-in defaults.
    pub async fn load(path: Option<PathBuf>) -> anyhow::Result<Self> {
        let (path, explicit) = match path {
            Some(p) => (p, true),
            None => (default_config_path(), false),
        };

        let mut cfg = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => Self::from_toml_str(&contents)
                .map_err(|e| anyhow::anyhow!("parse config {}: {e}", path.display()))?,
            Err(e) if !explicit && e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %path.display(), "no config file; using defaults");
                Self::default()
            }
            Err(e) => return Err(anyhow::anyhow!("read config {}: {e}", path.display())),
        };

        cfg.apply_env_overrides_with(|name| std::env::var(name).ok());
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(contents: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(contents)?)
    }

    pub fn apply_env_overrides_with<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(v) = get(mc_llm::API_KEY_ENV) {
            self.client.api_key = Some(v);
        }
        if let Some(v) = get("MOCKCHAT_MODEL") {
            self.generate.insert("model".to_string(), Value::String(v));
        }
        if let Some(v) = get("MOCKCHAT_SCRIPT") {
            self.backend.script = Some(PathBuf::from(v));
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.retry.max_attempts == 0 {
            return Err(anyhow::anyhow!("retry.max_attempts must be > 0"));
        }
        if self.client.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("client.request_timeout_secs must be > 0"));
        }
        Ok(())
    }

    pub fn client_config(&self) -> ClientConfig {
        ClientConfig {
            api_key: self.client.api_key.clone(),
            generate_args: self.generate.clone(),
            retry: RetryPolicy {
                max_attempts: self.retry.max_attempts,
                backoff: Duration::from_millis(self.retry.backoff_ms),
            },
            request_timeout: Duration::from_secs(self.client.request_timeout_secs),
        }
    }
}

pub fn default_config_path() -> PathBuf {
    let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_string());
    Path::new(&home).join(".mockchat").join("config.toml")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn empty_file_yields_library_defaults() {
        let cfg = MockChatConfig::from_toml_str("").expect("parse");
        let client = cfg.client_config();
        assert_eq!(client.api_key, None);
        assert!(client.generate_args.is_empty());
        assert_eq!(client.retry, RetryPolicy::default());
        assert_eq!(client.request_timeout, Duration::from_secs(5));
        assert!(cfg.backend.script.is_none());
    }

    #[test]
    fn sections_map_onto_client_config() {
        let cfg = MockChatConfig::from_toml_str(
            r#"
            [client]
            api_key = "sk-file"

            [generate]
            model = "gpt-4o"
            temperature = 0.3
            stop = ["\n\n"]

            [retry]
            max_attempts = 3
            backoff_ms = 250

            [backend]
            script = "fixtures/flaky.json"
            "#,
        )
        .expect("parse");
        cfg.validate().expect("valid");

        let client = cfg.client_config();
        assert_eq!(client.api_key.as_deref(), Some("sk-file"));
        assert_eq!(client.generate_args["model"], "gpt-4o");
        assert_eq!(client.generate_args["temperature"], 0.3);
        assert_eq!(client.generate_args["stop"][0], "\n\n");
        assert_eq!(client.retry.max_attempts, 3);
        assert_eq!(client.retry.backoff, Duration::from_millis(250));
        assert_eq!(
            cfg.backend.script.as_deref(),
            Some(Path::new("fixtures/flaky.json"))
        );
    }

    #[test]
    fn env_overrides_win_and_blank_values_are_ignored() {
        let mut cfg = MockChatConfig::from_toml_str(
            r#"
            [client]
            api_key = "sk-file"
            [generate]
            model = "gpt-4o"
            "#,
        )
        .expect("parse");
        let env: HashMap<&str, &str> = HashMap::from([
            ("OPENAI_API_KEY", "sk-env"),
            ("MOCKCHAT_MODEL", "  "),
            ("MOCKCHAT_SCRIPT", "script.json"),
        ]);
        cfg.apply_env_overrides_with(|name| env.get(name).map(|v| v.to_string()));

        assert_eq!(cfg.client.api_key.as_deref(), Some("sk-env"));
        assert_eq!(cfg.generate["model"], "gpt-4o");
        assert_eq!(cfg.backend.script, Some(PathBuf::from("script.json")));
    }

    #[test]
    fn zero_attempts_is_rejected() {
        let cfg = MockChatConfig::from_toml_str("[retry]\nmax_attempts = 0\n").expect("parse");
        assert!(cfg.validate().is_err());
    }

    #[tokio::test]
    async fn explicit_missing_path_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let missing = dir.path().join("nope.toml");
        let err = MockChatConfig::load(Some(missing))
            .await
            .expect_err("missing explicit config");
        assert!(err.to_string().contains("read config"));
    }

    #[tokio::test]
    async fn loads_from_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("config.toml");
        tokio::fs::write(&path, "[retry]\nbackoff_ms = 10\n")
            .await
            .expect("write config");
        let cfg = MockChatConfig::load(Some(path)).await.expect("load");
        assert_eq!(cfg.retry.backoff_ms, 10);
        assert_eq!(cfg.retry.max_attempts, 10);
    }
}
