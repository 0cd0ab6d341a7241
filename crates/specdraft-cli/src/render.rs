//! Terminal rendering of orchestrator events

use specdraft_core::agent::ExitReason;
use specdraft_core::orchestrator::{CollaborationKind, EventReceiver};
use specdraft_core::OrchestratorEvent;

const PREVIEW_CHARS: usize = 160;

fn preview(text: &str) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= PREVIEW_CHARS {
        flat
    } else {
        let cut: String = flat.chars().take(PREVIEW_CHARS).collect();
        format!("{}…", cut)
    }
}

/// Text for one event; `None` for events not worth a line
pub fn render(event: &OrchestratorEvent) -> Option<String> {
    let line = match event {
        OrchestratorEvent::ProcessesStarted { model } => {
            format!("· Discovery AI started ({})", model)
        }
        OrchestratorEvent::DiscoveryMessage { content, .. } => {
            format!("\nDiscovery AI:\n{}\n", content)
        }
        OrchestratorEvent::CollaborationMessage { from, to, content, .. } => format!(
            "  [{} → {}] {}",
            from.display_name(),
            to.display_name(),
            preview(content)
        ),
        OrchestratorEvent::ToolUsage { from, description, .. } => {
            format!("  · {}: {}", from.display_name(), description)
        }
        OrchestratorEvent::SpecWritingStarted { file_path, .. } => {
            format!("  · writing {}", file_path)
        }
        OrchestratorEvent::TypingIndicator {
            speaker,
            is_typing: true,
        } => format!("  … {} is working", speaker.display_name()),
        OrchestratorEvent::CollaborationDetected { kind, .. } => match kind {
            CollaborationKind::DraftReady => "  · draft detected".to_string(),
            CollaborationKind::ReviewRequested => "  · review requested".to_string(),
            CollaborationKind::FeedbackReady => "  · review feedback sent to Discovery".to_string(),
        },
        OrchestratorEvent::ProcessExit {
            process,
            reason: ExitReason::Failed,
        } => format!("  ! {} stopped after a failure", process.display_name()),
        OrchestratorEvent::Error { process, message } => match process {
            Some(role) => format!("error ({}): {}", role.display_name(), message),
            None => format!("error: {}", message),
        },
        OrchestratorEvent::ModelChanged { display_name, .. } => {
            format!("· model set to {}", display_name)
        }
        OrchestratorEvent::ProcessesStopped => "· stopped".to_string(),
        OrchestratorEvent::ProcessesReset => {
            "· reset; Discovery AI restarts shortly".to_string()
        }
        _ => return None,
    };
    Some(line)
}

/// Print events until the orchestrator is dropped
pub async fn print_events(mut events: EventReceiver, jsonl: bool) {
    while let Some(event) = events.recv().await {
        if jsonl {
            match serde_json::to_string(&event) {
                Ok(json) => println!("{}", json),
                Err(e) => tracing::warn!("Failed to serialize event: {}", e),
            }
        } else if let Some(line) = render(&event) {
            println!("{}", line);
        }
    }
}
