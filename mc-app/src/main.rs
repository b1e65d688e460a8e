//! MockChat command-line driver.

mod commands;
mod config;

use clap::{Args, Parser, Subcommand, ValueEnum};
use commands::Prompt;
use mc_llm::Role;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;
use tracing_subscriber::fmt::format::FmtSpan;

#[derive(Debug, Parser)]
#[command(
    name = "mockchat",
    version,
    about = "Offline chat-completion client for exercising LLM integrations"
)]
struct Cli {
    /// Config file. Defaults to ~/.mockchat/config.toml when present.
    #[arg(long, global = true, env = "MOCKCHAT_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Send a non-streaming request and print the completion as JSON.
    Run {
        #[command(flatten)]
        prompt: PromptArgs,
        /// JSON file holding a list of function tool definitions.
        #[arg(long)]
        tools: Option<PathBuf>,
    },
    /// Send a streaming request and print fragments as they arrive.
    Stream {
        #[command(flatten)]
        prompt: PromptArgs,
    },
    /// Validate config and credentials.
    Doctor,
}

#[derive(Debug, Args)]
struct PromptArgs {
    /// Content of the final message.
    #[arg(short, long)]
    message: String,
    #[arg(long, value_enum, default_value_t = RoleArg::User)]
    role: RoleArg,
    /// Optional system message placed before the final message.
    #[arg(long)]
    system: Option<String>,
    /// Image URL to attach to the final message. Repeatable.
    #[arg(long = "image")]
    images: Vec<String>,
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RoleArg {
    System,
    User,
    Assistant,
}

impl From<PromptArgs> for Prompt {
    fn from(args: PromptArgs) -> Self {
        let role = match args.role {
            RoleArg::System => Role::System,
            RoleArg::User => Role::User,
            RoleArg::Assistant => Role::Assistant,
        };
        Prompt {
            system: args.system,
            role,
            message: args.message,
            images: args.images,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Before tracing so RUST_LOG and MOCKCHAT_LOG_FORMAT can come from .env.
    let dotenv = dotenvy::dotenv();
    init_tracing()?;
    if let Some(problem) = dotenv_problem(&dotenv) {
        tracing::warn!(error = %problem, "failed to load .env; continuing with process env");
    }
    install_panic_hook();

    let cli = Cli::parse();
    match cli.command {
        Command::Run { prompt, tools } => {
            let prompt = Prompt::from(prompt);
            commands::run(cli.config, &prompt, tools.as_deref()).await
        }
        Command::Stream { prompt } => {
            let prompt = Prompt::from(prompt);
            commands::stream(cli.config, &prompt).await
        }
        Command::Doctor => commands::doctor(cli.config).await,
    }
}

/// A missing `.env` is normal; anything else is worth a warning.
fn dotenv_problem(result: &dotenvy::Result<PathBuf>) -> Option<&dotenvy::Error> {
    match result {
        Ok(path) => {
            tracing::debug!(path = %path.display(), "loaded .env");
            None
        }
        Err(e) if e.not_found() => None,
        Err(e) => Some(e),
    }
}

fn init_tracing() -> anyhow::Result<()> {
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(v) => v,
        Err(_) => EnvFilter::new("info,mockchat=debug,mc_llm=debug"),
    };
    let log_format = std::env::var("MOCKCHAT_LOG_FORMAT")
        .unwrap_or_else(|_| "compact".to_string())
        .to_ascii_lowercase();

    // Logs go to stderr so stdout carries only completions and fragments.
    match log_format.as_str() {
        "json" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_span_events(FmtSpan::CLOSE)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .json()
                .flatten_event(true)
                .with_current_span(true)
                .init();
        }
        "pretty" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        "compact" => {
            tracing_subscriber::fmt()
                .with_env_filter(env_filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .compact()
                .init();
        }
        other => {
            return Err(anyhow::anyhow!(
                "unsupported MOCKCHAT_LOG_FORMAT={other:?}; expected one of: json, pretty, compact"
            ));
        }
    }

    tracing::debug!(log_format = %log_format, "tracing initialized");
    Ok(())
}

fn install_panic_hook() {
    let default_hook = std::panic::take_hook();
    std::panic::set_hook(Box::new(move |info| {
        let thread = std::thread::current();
        tracing::error!(
            thread = thread.name().unwrap_or("<unnamed>"),
            location = %info
                .location()
                .map_or_else(|| "<unknown>".to_string(), ToString::to_string),
            message = %panic_message(info.payload()),
            "mockchat panicked"
        );
        default_hook(info);
    }));
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> &str {
    payload
        .downcast_ref::<&str>()
        .copied()
        .or_else(|| payload.downcast_ref::<String>().map(String::as_str))
        .unwrap_or("<non-string panic payload>")
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn stream_accepts_repeated_images() {
        let cli = Cli::try_parse_from([
            "mockchat",
            "stream",
            "-m",
            "what is this",
            "--image",
            "https://img.test/1.png",
            "--image",
            "https://img.test/2.png",
        ])
        .expect("parse");
        let Command::Stream { prompt } = cli.command else {
            panic!("expected stream command");
        };
        let prompt: Prompt = prompt.into();
        assert_eq!(prompt.images.len(), 2);
        assert_eq!(prompt.role, Role::User);
    }

    #[test]
    fn run_takes_tools_file_and_role() {
        let cli = Cli::try_parse_from([
            "mockchat",
            "run",
            "--message",
            "hi",
            "--role",
            "assistant",
            "--tools",
            "tools.json",
            "--config",
            "cfg.toml",
        ])
        .expect("parse");
        assert_eq!(cli.config, Some(PathBuf::from("cfg.toml")));
        let Command::Run { prompt, tools } = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(tools, Some(PathBuf::from("tools.json")));
        assert!(matches!(prompt.role, RoleArg::Assistant));
    }

    #[test]
    fn only_unexpected_dotenv_failures_are_reported() {
        let missing: dotenvy::Result<PathBuf> = Err(dotenvy::Error::Io(std::io::Error::new(
            std::io::ErrorKind::NotFound,
            "no .env",
        )));
        assert!(dotenv_problem(&missing).is_none());

        let loaded: dotenvy::Result<PathBuf> = Ok(PathBuf::from(".env"));
        assert!(dotenv_problem(&loaded).is_none());

        let malformed: dotenvy::Result<PathBuf> =
            Err(dotenvy::Error::LineParse("KEY=\"open".to_string(), 4));
        assert!(dotenv_problem(&malformed).is_some());
    }

    #[test]
    fn panic_messages_are_extracted_from_payloads() {
        let s: Box<dyn std::any::Any + Send> = Box::new("boom");
        assert_eq!(panic_message(s.as_ref()), "boom");
        let s: Box<dyn std::any::Any + Send> = Box::new(format!("code {}", 7));
        assert_eq!(panic_message(s.as_ref()), "code 7");
        let s: Box<dyn std::any::Any + Send> = Box::new(42_u8);
        assert_eq!(panic_message(s.as_ref()), "<non-string panic payload>");
    }
}
