//! Interactive drafting loop
//!
//! Reads lines from stdin and drives one orchestrator. The first plain line
//! starts Discovery with it; later lines are routed as user messages.

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};

use specdraft_core::{AgentRole, ClaudeCliService, Orchestrator, OrchestratorConfig};

use crate::render;

/// A parsed input line
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Message(&'a str),
    Model(Option<&'a str>),
    Models,
    Status,
    Reset,
    Stop,
    Quit,
    Help,
    Unknown(&'a str),
}

fn parse_input(line: &str) -> Option<Input<'_>> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    let Some(command) = line.strip_prefix('/') else {
        return Some(Input::Message(line));
    };

    let mut parts = command.splitn(2, char::is_whitespace);
    let name = parts.next().unwrap_or_default();
    let arg = parts.next().map(str::trim).filter(|a| !a.is_empty());
    Some(match name {
        "model" => Input::Model(arg),
        "models" => Input::Models,
        "status" => Input::Status,
        "reset" => Input::Reset,
        "stop" => Input::Stop,
        "quit" | "exit" => Input::Quit,
        "help" => Input::Help,
        _ => Input::Unknown(line),
    })
}

const HELP: &str = "\
Type to talk to Discovery AI. Commands:
  /model <id>   switch both agents to another model
  /models       list models
  /status       show orchestrator state
  /reset        start over (Discovery restarts after a short delay)
  /stop         abort both agents
  /quit         exit";

/// Returns false when the loop should end
async fn handle_input(orch: &mut Orchestrator, input: Input<'_>) -> Result<bool> {
    match input {
        Input::Message(text) => {
            let result = if orch.status().started {
                orch.route_user_message(text).await
            } else {
                orch.start_processes(Some(text.to_string())).await
            };
            if let Err(e) = result {
                eprintln!("error: {}", e);
            }
        }
        Input::Model(Some(id)) => {
            if let Err(e) = orch.change_model(id).await {
                eprintln!("error: {}", e);
            }
        }
        Input::Model(None) => println!("model: {}", orch.current_model()),
        Input::Models => {
            for model in orch.registry().all() {
                let marker = if model.id == orch.current_model() { "*" } else { " " };
                println!("{} {:<10} {}", marker, model.id, model.display_name);
            }
        }
        Input::Status => {
            let status = serde_json::to_string_pretty(&orch.status())
                .context("failed to serialize status")?;
            println!("{}", status);
        }
        Input::Reset => orch.reset_processes(),
        Input::Stop => orch.stop_all_processes(),
        Input::Quit => return Ok(false),
        Input::Help => println!("{}", HELP),
        Input::Unknown(line) => eprintln!("unknown command: {} (try /help)", line),
    }
    Ok(true)
}

pub async fn run(config: OrchestratorConfig, jsonl: bool) -> Result<()> {
    for role in [AgentRole::Discovery, AgentRole::Review] {
        let dir = config.workspace_for(role);
        std::fs::create_dir_all(&dir)
            .with_context(|| format!("failed to create workspace {}", dir.display()))?;
    }

    let service = Arc::new(ClaudeCliService::new(config.claude.clone()));
    if !service.is_available() {
        warn!(binary = %config.claude.binary, "Agent binary not found on PATH");
        eprintln!(
            "warning: '{}' was not found on PATH; agent runs will fail",
            config.claude.binary
        );
    }

    let (mut orch, events) = Orchestrator::with_service(config, service);
    let printer = tokio::spawn(render::print_events(events, jsonl));

    if !jsonl {
        println!("Describe what you want to build. /help lists commands.");
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                if let Some(input) = parse_input(&line) {
                    if !handle_input(&mut orch, input).await? {
                        break;
                    }
                }
            }
            Some(inbound) = orch.recv_inbound() => orch.handle_inbound(inbound).await,
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupted");
                break;
            }
        }
    }

    orch.shutdown();
    // Dropping the orchestrator closes the event channel and ends the printer
    drop(orch);
    let _ = printer.await;
    Ok(())
}
