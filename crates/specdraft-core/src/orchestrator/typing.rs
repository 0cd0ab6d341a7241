//! Per-agent "done typing" debounce
//!
//! Each chunk from an agent re-arms the timer; when it fires the agent is
//! reported idle. This is a display heuristic only.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use super::events::OrchestratorEvent;
use crate::agent::AgentRole;

pub struct TypingDebouncer {
    speaker: AgentRole,
    delay: Duration,
    pending: Option<JoinHandle<()>>,
}

impl TypingDebouncer {
    pub fn new(speaker: AgentRole, delay: Duration) -> Self {
        Self {
            speaker,
            delay,
            pending: None,
        }
    }

    /// Cancel any pending timer and start a new one
    pub fn rearm(&mut self, events: &mpsc::UnboundedSender<OrchestratorEvent>) {
        self.cancel();
        let events = events.clone();
        let speaker = self.speaker;
        let delay = self.delay;
        self.pending = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = events.send(OrchestratorEvent::TypingIndicator {
                speaker,
                is_typing: false,
            });
        }));
    }

    pub fn cancel(&mut self) {
        if let Some(handle) = self.pending.take() {
            handle.abort();
        }
    }
}

impl Drop for TypingDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}
