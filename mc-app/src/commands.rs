use crate::config::MockChatConfig;
use futures_util::StreamExt;
use mc_llm::{
    ChatBackend, ChatMessage, EchoBackend, Role, ScriptedBackend, TestClient, ToolDefinition,
};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Message-building arguments shared by `run` and `stream`.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: Option<String>,
    pub role: Role,
    pub message: String,
    pub images: Vec<String>,
}

impl Prompt {
    pub fn messages(&self) -> Vec<ChatMessage> {
        let mut out = Vec::with_capacity(2);
        if let Some(system) = self.system.as_deref() {
            out.push(ChatMessage::system(system));
        }
        out.push(ChatMessage::new(self.role, self.message.as_str()));
        out
    }
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn run(
    config_path: Option<PathBuf>,
    prompt: &Prompt,
    tools_path: Option<&Path>,
) -> anyhow::Result<()> {
    let cfg = MockChatConfig::load(config_path).await?;
    let client = build_client(&cfg).await?;
    let tools = match tools_path {
        Some(p) => Some(load_tools(p).await?),
        None => None,
    };

    let completion = client
        .run(&prompt.messages(), tools.as_deref(), &prompt.images)
        .await?;
    println!("{}", serde_json::to_string_pretty(&completion)?);
    Ok(())
}

#[tracing::instrument(level = "info", skip_all)]
pub async fn stream(config_path: Option<PathBuf>, prompt: &Prompt) -> anyhow::Result<()> {
    let cfg = MockChatConfig::load(config_path).await?;
    let client = build_client(&cfg).await?;

    let mut fragments = client.stream_run(&prompt.messages(), &prompt.images)?;
    let mut stdout = std::io::stdout();
    while let Some(fragment) = fragments.next().await {
        let fragment = fragment?;
        stdout.write_all(fragment.as_bytes())?;
        stdout.flush()?;
    }
    writeln!(stdout)?;
    Ok(())
}

pub async fn doctor(config_path: Option<PathBuf>) -> anyhow::Result<()> {
    let cfg = MockChatConfig::load(config_path).await?;
    let client = build_client(&cfg).await?;
    let retry = client.retry_policy();

    println!("mockchat doctor");
    println!("- model: {}", client.model());
    println!(
        "- generate args: {}",
        serde_json::to_string(client.generate_args())?
    );
    println!(
        "- retry: {} attempts, {:?} backoff",
        retry.max_attempts, retry.backoff
    );
    match cfg.backend.script.as_deref() {
        Some(p) => println!("- backend: scripted ({})", p.display()),
        None => println!("- backend: echo"),
    }
    println!("- api key: configured");
    Ok(())
}

async fn build_client(cfg: &MockChatConfig) -> anyhow::Result<TestClient> {
    let backend = build_backend(cfg).await?;
    Ok(TestClient::from_env(cfg.client_config(), backend)?)
}

async fn build_backend(cfg: &MockChatConfig) -> anyhow::Result<Arc<dyn ChatBackend>> {
    let Some(path) = cfg.backend.script.as_deref() else {
        return Ok(Arc::new(EchoBackend));
    };
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("read script {}: {e}", path.display()))?;
    let backend = ScriptedBackend::from_json(&contents)
        .map_err(|e| anyhow::anyhow!("parse script {}: {e}", path.display()))?;
    tracing::info!(script = %path.display(), "using scripted backend");
    Ok(Arc::new(backend))
}

async fn load_tools(path: &Path) -> anyhow::Result<Vec<ToolDefinition>> {
    let contents = tokio::fs::read_to_string(path)
        .await
        .map_err(|e| anyhow::anyhow!("read tools {}: {e}", path.display()))?;
    let tools: Vec<ToolDefinition> = serde_json::from_str(&contents)
        .map_err(|e| anyhow::anyhow!("parse tools {}: {e}", path.display()))?;
    mc_llm::validate_tools(&tools)
        .map_err(|e| anyhow::anyhow!("invalid tools {}: {e}", path.display()))?;
    Ok(tools)
}
