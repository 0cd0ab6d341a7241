//! specdraft - two agents drafting one specification
//!
//! The user talks to a Discovery agent in the terminal. Discovery hands work
//! to a Review agent with `@review:`; Review's feedback flows back into
//! Discovery without ever being shown as a reply.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use specdraft_core::{paths, ClaudeCliService, OrchestratorConfig};

mod chat;
mod render;

/// specdraft - collaborative specification drafting
#[derive(Parser)]
#[command(name = "specdraft")]
#[command(about = "Draft a specification with a discovery agent and a silent reviewer", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Working directory (defaults to current)
    #[arg(short, long)]
    directory: Option<PathBuf>,

    /// Config file (defaults to $SPECDRAFT_CONFIG, then ~/.specdraft/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Model id to start with
    #[arg(short, long)]
    model: Option<String>,

    /// Print events as JSON lines instead of text
    #[arg(long)]
    jsonl: bool,

    /// Log to stderr instead of the log file
    #[arg(long)]
    log_stderr: bool,
}

#[derive(Subcommand, Clone, Copy)]
enum Commands {
    /// Start an interactive drafting session
    Chat,

    /// List known models
    Models,

    /// Check the agent binary and show file locations
    Check,
}

fn init_logging(to_stderr: bool) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(tracing::Level::INFO.into());

    if to_stderr {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .init();
        return Ok(());
    }

    let log_dir = paths::logs_dir();
    std::fs::create_dir_all(&log_dir)
        .with_context(|| format!("failed to create log directory {}", log_dir.display()))?;
    let log_file = std::fs::File::create(paths::log_file())
        .with_context(|| format!("failed to create {}", paths::log_file().display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::sync::Mutex::new(log_file))
        .with_ansi(false)
        .init();
    Ok(())
}

fn list_models(config: &OrchestratorConfig) {
    let registry = config.registry();
    let selected = config
        .model
        .clone()
        .or_else(|| registry.default_model().map(|m| m.id.clone()));
    for model in registry.all() {
        let marker = if Some(&model.id) == selected.as_ref() { "*" } else { " " };
        println!(
            "{} {:<10} {:<16} {}",
            marker, model.id, model.display_name, model.description
        );
    }
}

fn check(config: &OrchestratorConfig) {
    let service = ClaudeCliService::new(config.claude.clone());
    match service.binary_path() {
        Some(path) => println!("agent binary:  {}", path.display()),
        None => println!("agent binary:  '{}' not found on PATH", config.claude.binary),
    }
    println!("config file:   {}", paths::config_file().display());
    println!("log file:      {}", paths::log_file().display());
    for role in [
        specdraft_core::AgentRole::Discovery,
        specdraft_core::AgentRole::Review,
    ] {
        println!(
            "{:<14} {}",
            format!("{} dir:", role.slug()),
            config.workspace_for(role).display()
        );
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_stderr)?;

    if let Some(dir) = &cli.directory {
        std::env::set_current_dir(dir)
            .with_context(|| format!("cannot enter {}", dir.display()))?;
    }
    let root = std::env::current_dir().context("cannot determine working directory")?;

    let mut config = OrchestratorConfig::load(cli.config.as_deref())?.with_root(root);
    if let Some(model) = cli.model {
        config.model = Some(model);
    }

    match cli.command.unwrap_or(Commands::Chat) {
        Commands::Chat => chat::run(config, cli.jsonl).await,
        Commands::Models => {
            list_models(&config);
            Ok(())
        }
        Commands::Check => {
            check(&config);
            Ok(())
        }
    }
}
