//! Collaboration orchestrator
//!
//! Owns the Discovery and Review sessions and decides where every piece of
//! agent text goes:
//! - Discovery text is stripped of annotations, then split at the first valid
//!   `@review:` marker. The part before it goes to the user; the payload goes
//!   to Review.
//! - Review text never reaches the user. It is wrapped as feedback and
//!   resumed into Discovery.
//!
//! ## Key Principles
//! - Single writer: all state changes happen through `&mut self`, one inbound
//!   event at a time
//! - Review starts lazily on the first handoff, with the conversation so far
//!   as a one-time preamble
//! - Agent output is never dropped; a marker without a payload falls back to
//!   showing the whole message
//! - Terminal session events always clear that agent's typing indicator
//! - Only the live run of each agent is routed; output from a run that was
//!   replaced, stopped or reset is dropped

mod draft;
mod events;
mod history;
mod tools;
mod typing;

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::agent::{
    AgentRole, AgentService, AgentSession, ExitReason, KillOutcome, SessionEvent, SessionUpdate,
    SpawnOutcome, ToolInvocation,
};
use crate::config::OrchestratorConfig;
use crate::error::{OrchestratorError, SessionError};
use crate::models::ModelRegistry;
use crate::routing::{extract_payload, split, strip_thinking, MarkerKind, SplitSummary};

pub use draft::looks_like_draft;
pub use events::{
    ActiveProcess, CollaborationKind, CollaborationState, OrchestratorEvent, OrchestratorStatus,
};
pub use history::{ConversationHistory, HistoryRole};
pub use tools::describe as describe_tool;
pub use typing::TypingDebouncer;

/// Receiving side of the outbound event channel
pub type EventReceiver = mpsc::UnboundedReceiver<OrchestratorEvent>;

/// Work for the orchestrator's handler loop
#[derive(Debug, Clone, PartialEq)]
pub enum Inbound {
    Session(SessionUpdate),
    /// Settle delay after a reset elapsed
    RestartDiscovery { epoch: u64 },
}

/// The two-agent collaboration state machine
pub struct Orchestrator {
    config: OrchestratorConfig,
    registry: ModelRegistry,
    discovery: AgentSession,
    review: AgentSession,

    events: mpsc::UnboundedSender<OrchestratorEvent>,
    updates_rx: mpsc::UnboundedReceiver<SessionUpdate>,
    signals_tx: mpsc::UnboundedSender<Inbound>,
    signals_rx: mpsc::UnboundedReceiver<Inbound>,

    started: bool,
    active: ActiveProcess,
    state: CollaborationState,
    history: ConversationHistory,
    review_ever_engaged: bool,
    current_model: String,

    /// Review replies waiting for Discovery to go idle
    pending_feedback: Vec<String>,
    /// Handoff payloads waiting for Review to go idle
    pending_handoffs: Vec<String>,

    /// Run generation whose output is routed, per agent
    discovery_run: Option<u64>,
    review_run: Option<u64>,

    /// Bumped on reset and stop; stale restart signals are ignored
    epoch: u64,
    settle_timer: Option<JoinHandle<()>>,
    discovery_typing: TypingDebouncer,
    review_typing: TypingDebouncer,
    routing: SplitSummary,
}

impl Orchestrator {
    /// Build an orchestrator with one backend per agent
    pub fn new(
        config: OrchestratorConfig,
        registry: ModelRegistry,
        discovery_service: Arc<dyn AgentService>,
        review_service: Arc<dyn AgentService>,
    ) -> (Self, EventReceiver) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let (updates_tx, updates_rx) = mpsc::unbounded_channel();
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();

        let current_model = match config.model.as_deref() {
            Some(id) if registry.get_by_id(id).is_some() => id.to_string(),
            configured => {
                if let Some(id) = configured {
                    warn!(model = %id, "Configured model is unknown, using the default");
                }
                registry
                    .default_model()
                    .map(|m| m.id.clone())
                    .unwrap_or_default()
            }
        };

        let discovery = AgentSession::new(
            AgentRole::Discovery,
            config.workspace_for(AgentRole::Discovery),
            current_model.clone(),
            discovery_service,
            updates_tx.clone(),
        );
        let review = AgentSession::new(
            AgentRole::Review,
            config.workspace_for(AgentRole::Review),
            current_model.clone(),
            review_service,
            updates_tx,
        );

        let debounce = config.debounce();
        let orchestrator = Self {
            discovery,
            review,
            registry,
            events,
            updates_rx,
            signals_tx,
            signals_rx,
            started: false,
            active: ActiveProcess::Discovery,
            state: CollaborationState::Discovering,
            history: ConversationHistory::new(),
            review_ever_engaged: false,
            current_model,
            pending_feedback: Vec::new(),
            pending_handoffs: Vec::new(),
            discovery_run: None,
            review_run: None,
            epoch: 0,
            settle_timer: None,
            discovery_typing: TypingDebouncer::new(AgentRole::Discovery, debounce),
            review_typing: TypingDebouncer::new(AgentRole::Review, debounce),
            routing: SplitSummary::default(),
            config,
        };
        (orchestrator, events_rx)
    }

    /// Build an orchestrator whose agents share one backend and the
    /// configured model registry
    pub fn with_service(
        config: OrchestratorConfig,
        service: Arc<dyn AgentService>,
    ) -> (Self, EventReceiver) {
        let registry = config.registry();
        Self::new(config, registry, Arc::clone(&service), service)
    }

    pub fn registry(&self) -> &ModelRegistry {
        &self.registry
    }

    pub fn current_model(&self) -> &str {
        &self.current_model
    }

    pub fn status(&self) -> OrchestratorStatus {
        OrchestratorStatus {
            started: self.started,
            active_process: self.active,
            collaboration_state: self.state,
            current_model: self.current_model.clone(),
            review_engaged: self.review_ever_engaged,
            history_len: self.history.len(),
            discovery: self.discovery.status(),
            review: self.review.status(),
            routing: self.routing.clone(),
        }
    }

    // =========================================================================
    // Public Operations
    // =========================================================================

    /// Start Discovery with the initial message, or the greeting without one.
    /// Review stays dormant until the first handoff.
    pub async fn start_processes(
        &mut self,
        initial_message: Option<String>,
    ) -> Result<(), OrchestratorError> {
        info!(
            has_initial_message = initial_message.is_some(),
            discovery_workspace = %self.config.workspace_for(AgentRole::Discovery).display(),
            review_workspace = %self.config.workspace_for(AgentRole::Review).display(),
            "Starting processes"
        );
        self.cancel_settle_timer();
        self.started = true;

        let prompt = match initial_message {
            Some(message) => {
                self.history.push(HistoryRole::User, message.clone());
                message
            }
            None => self.config.greeting.clone(),
        };

        self.set_active(ActiveProcess::Discovery);
        self.emit_typing(AgentRole::Discovery, true);
        match self.spawn_agent(AgentRole::Discovery, prompt, false).await {
            Ok(_) => {
                self.emit(OrchestratorEvent::ProcessesStarted {
                    model: self.current_model.clone(),
                });
                Ok(())
            }
            Err(e) => {
                self.emit_typing(AgentRole::Discovery, false);
                Err(e.into())
            }
        }
    }

    /// Send a human message to Discovery, resuming its conversation
    pub async fn route_user_message(&mut self, message: &str) -> Result<(), OrchestratorError> {
        if !self.started {
            warn!("User message before processes were started");
            return Err(OrchestratorError::NotStarted);
        }
        if self.discovery.is_running() {
            return Err(OrchestratorError::AgentBusy(AgentRole::Discovery));
        }
        info!(
            len = message.len(),
            active = ?self.active,
            state = ?self.state,
            "Routing user message"
        );

        // A user message during the settle window restarts Discovery itself
        self.cancel_settle_timer();

        self.history.push(HistoryRole::User, message);
        let prompt = format!("The user says: \"{}\" {}", message, self.config.user_suffix);

        self.set_active(ActiveProcess::Discovery);
        self.emit_typing(AgentRole::Discovery, true);
        if let Err(e) = self.spawn_agent(AgentRole::Discovery, prompt, true).await {
            self.emit_typing(AgentRole::Discovery, false);
            return Err(e.into());
        }
        Ok(())
    }

    /// Select the agent the user is talking to. Only Discovery is selectable.
    pub fn switch_active_process(&mut self, target: AgentRole) -> Result<(), OrchestratorError> {
        match target {
            AgentRole::Review => {
                warn!("Rejected request to activate the review agent directly");
                Err(OrchestratorError::ReviewNotSelectable)
            }
            AgentRole::Discovery => {
                self.set_active(ActiveProcess::Discovery);
                Ok(())
            }
        }
    }

    /// Abort both sessions, forget the collaboration, and restart Discovery
    /// after the settle delay
    pub fn reset_processes(&mut self) {
        info!("Resetting processes");
        self.discovery.reset();
        self.review.reset();
        self.detach_runs();
        self.clear_timers();
        self.pending_feedback.clear();
        self.pending_handoffs.clear();

        self.history.clear();
        self.review_ever_engaged = false;
        self.set_active(ActiveProcess::Discovery);
        self.state = CollaborationState::Discovering;
        self.routing = SplitSummary::default();
        self.emit_typing(AgentRole::Discovery, false);
        self.emit_typing(AgentRole::Review, false);

        self.epoch += 1;
        let epoch = self.epoch;
        let delay = self.config.settle_delay();
        let signals = self.signals_tx.clone();
        self.settle_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = signals.send(Inbound::RestartDiscovery { epoch });
        }));

        self.emit(OrchestratorEvent::ProcessesReset);
    }

    /// Switch both sessions to another model. The recorded model changes only
    /// after both sessions have accepted it.
    pub async fn change_model(&mut self, model_id: &str) -> Result<(), OrchestratorError> {
        let model = self
            .registry
            .get_by_id(model_id)
            .cloned()
            .ok_or_else(|| OrchestratorError::InvalidModelId(model_id.to_string()))?;

        info!(model = %model.id, "Changing model for both agents");
        let (discovery, review) = tokio::join!(
            self.discovery.change_model(&model),
            self.review.change_model(&model)
        );
        if let Err(e) = discovery.and(review) {
            warn!(model = %model.id, "Model change failed, keeping {}", self.current_model);
            self.discovery.record_model(&self.current_model);
            self.review.record_model(&self.current_model);
            return Err(e.into());
        }

        // A model directive runs as a new generation; keep following it
        if self.discovery_run.is_some() {
            self.discovery_run = Some(self.discovery.current_run());
        }
        if self.review_run.is_some() {
            self.review_run = Some(self.review.current_run());
        }
        self.current_model = model.id.clone();
        self.emit(OrchestratorEvent::ModelChanged {
            model: model.id,
            display_name: model.display_name,
        });
        Ok(())
    }

    /// Abort both sessions and clear every timer. Never fails.
    pub fn stop_all_processes(&mut self) {
        info!("Stopping all processes");
        self.pending_feedback.clear();
        self.pending_handoffs.clear();
        self.discovery.kill();
        if self.review.kill() == KillOutcome::Requested {
            // An interrupted review conversation is not resumed
            self.review_ever_engaged = false;
        }
        self.detach_runs();
        self.clear_timers();
        self.epoch += 1;
        self.emit_typing(AgentRole::Discovery, false);
        self.emit_typing(AgentRole::Review, false);
        self.emit(OrchestratorEvent::ProcessesStopped);
    }

    /// Abort everything without emitting events
    pub fn shutdown(&mut self) {
        debug!("Shutting down orchestrator");
        self.pending_feedback.clear();
        self.pending_handoffs.clear();
        self.discovery.kill();
        self.review.kill();
        self.detach_runs();
        self.clear_timers();
        self.epoch += 1;
        self.started = false;
    }

    // =========================================================================
    // Handler Loop
    // =========================================================================

    /// Wait for the next session update or internal signal
    pub async fn recv_inbound(&mut self) -> Option<Inbound> {
        tokio::select! {
            Some(update) = self.updates_rx.recv() => Some(Inbound::Session(update)),
            Some(signal) = self.signals_rx.recv() => Some(signal),
            else => None,
        }
    }

    /// Process one inbound item
    pub async fn handle_inbound(&mut self, inbound: Inbound) {
        match inbound {
            Inbound::Session(update) => self.on_session_update(update).await,
            Inbound::RestartDiscovery { epoch } => self.on_restart(epoch).await,
        }
    }

    async fn on_restart(&mut self, epoch: u64) {
        if epoch != self.epoch {
            debug!(epoch, current = self.epoch, "Ignoring stale restart");
            return;
        }
        self.settle_timer = None;
        if self.discovery.is_running() || self.discovery.is_initialized() {
            debug!("Discovery already active after reset");
            return;
        }
        if let Err(e) = self.start_processes(None).await {
            warn!("Discovery restart failed: {}", e);
        }
    }

    async fn on_session_update(&mut self, update: SessionUpdate) {
        let SessionUpdate { role, run, event } = update;
        if self.live_run(role) != Some(run) {
            self.on_stale_update(role, run, event).await;
            return;
        }
        match event {
            SessionEvent::Started => debug!(%role, run, "Agent run started"),
            SessionEvent::SessionReady { resume_token, .. } => {
                debug!(%role, run, %resume_token, "Agent session ready");
            }
            SessionEvent::ToolUse(tool) => self.relay_tool_use(role, tool),
            SessionEvent::Text { content } => match role {
                AgentRole::Discovery => self.on_discovery_text(content).await,
                AgentRole::Review => self.on_review_text(content).await,
            },
            SessionEvent::Completed(info) => {
                info!(
                    %role,
                    run,
                    duration_ms = ?info.duration_ms,
                    cost_usd = ?info.total_cost_usd,
                    turns = ?info.num_turns,
                    is_error = info.is_error,
                    "Agent run completed"
                );
            }
            SessionEvent::ModelChanged { model, applied } => {
                debug!(%role, %model, applied, "Session model changed");
            }
            SessionEvent::Aborted => {
                debug!(%role, run, "Agent run aborted");
                self.clear_typing(role);
            }
            SessionEvent::Error { message } => {
                warn!(%role, run, "Agent error: {}", message);
                self.clear_typing(role);
                self.emit(OrchestratorEvent::Error {
                    process: Some(role),
                    message,
                });
            }
            SessionEvent::Exit { reason } => self.on_exit(role, reason).await,
        }
    }

    /// Output of a run that is no longer live. Only its exit is reported;
    /// queued deliveries may proceed now that the session is idle.
    async fn on_stale_update(&mut self, role: AgentRole, run: u64, event: SessionEvent) {
        let SessionEvent::Exit { reason } = event else {
            debug!(%role, run, "Dropping output of a replaced run");
            return;
        };
        self.emit(OrchestratorEvent::ProcessExit {
            process: role,
            reason,
        });
        match role {
            AgentRole::Review => {
                if !self.review.is_running() {
                    self.set_active(ActiveProcess::Discovery);
                }
                self.deliver_handoffs().await;
            }
            AgentRole::Discovery => self.deliver_feedback().await,
        }
    }

    async fn on_exit(&mut self, role: AgentRole, reason: ExitReason) {
        self.clear_typing(role);
        self.emit(OrchestratorEvent::ProcessExit {
            process: role,
            reason,
        });

        match role {
            AgentRole::Review => {
                // A conversation that did not end cleanly cannot be resumed
                // reliably; the next handoff starts fresh with full context
                if reason != ExitReason::Finished {
                    self.review_ever_engaged = false;
                }
                self.set_active(ActiveProcess::Discovery);
                self.deliver_handoffs().await;
            }
            AgentRole::Discovery => self.deliver_feedback().await,
        }
    }

    // =========================================================================
    // Discovery Output
    // =========================================================================

    async fn on_discovery_text(&mut self, raw: String) {
        let text = strip_thinking(&raw);
        if text.trim().is_empty() {
            debug!(raw_len = raw.len(), "Discovery text empty after stripping");
            return;
        }

        self.history.push(HistoryRole::Discovery, text.clone());

        if looks_like_draft(&text) && self.advance(CollaborationState::Reviewing) {
            self.emit(OrchestratorEvent::CollaborationDetected {
                kind: CollaborationKind::DraftReady,
                from: AgentRole::Discovery,
                to: AgentRole::Review,
                state: self.state,
            });
        }

        let result = split(&text);
        self.routing.record(&result);

        if let Some(kind) = result.marker_kind {
            match extract_payload(&result.after_marker, kind) {
                Some(payload) => {
                    debug!(
                        before_len = result.stats.before_len,
                        payload_len = payload.len(),
                        invalid = result.invalid_occurrences,
                        "Discovery handed off to review"
                    );
                    if !result.before_marker.is_empty() {
                        self.emit_discovery_message(result.before_marker);
                    }
                    self.discovery_typing.cancel();
                    self.emit_typing(AgentRole::Discovery, false);
                    self.hand_off(kind, payload).await;
                    return;
                }
                None => {
                    warn!(
                        index = ?result.marker_index,
                        "Marker without a payload, showing the whole message"
                    );
                }
            }
        }

        self.emit_discovery_message(text);
        self.discovery_typing.rearm(&self.events);
    }

    /// Queue a payload for Review and deliver it if Review is idle
    async fn hand_off(&mut self, kind: MarkerKind, payload: String) {
        self.emit(OrchestratorEvent::CollaborationMessage {
            from: AgentRole::Discovery,
            to: kind.target(),
            content: payload.clone(),
            timestamp: Utc::now(),
        });
        if self.advance(CollaborationState::Reviewing) {
            self.emit(OrchestratorEvent::CollaborationDetected {
                kind: CollaborationKind::ReviewRequested,
                from: AgentRole::Discovery,
                to: AgentRole::Review,
                state: self.state,
            });
        }
        self.pending_handoffs.push(payload);
        self.deliver_handoffs().await;
    }

    async fn deliver_handoffs(&mut self) {
        if self.pending_handoffs.is_empty() {
            return;
        }
        if self.review.is_running() {
            debug!(queued = self.pending_handoffs.len(), "Review busy, handoff queued");
            return;
        }

        let payload = self.pending_handoffs.join("\n\n");
        let first = !self.review_ever_engaged;
        let prompt = if first {
            format!("{}{}", self.history.preamble(), payload)
        } else {
            payload
        };

        info!(
            first_engagement = first,
            prompt_len = prompt.len(),
            "Delivering handoff to review"
        );
        self.set_active(ActiveProcess::Review);
        self.emit_typing(AgentRole::Review, true);
        match self.spawn_agent(AgentRole::Review, prompt, !first).await {
            Ok(SpawnOutcome::Started) => {
                self.pending_handoffs.clear();
                self.review_ever_engaged = true;
            }
            Ok(SpawnOutcome::AlreadyRunning) => {
                debug!("Review became busy, handoff stays queued");
            }
            Err(e) => {
                warn!("Handoff to review failed: {}", e);
                self.pending_handoffs.clear();
                self.clear_typing(AgentRole::Review);
                self.set_active(ActiveProcess::Discovery);
            }
        }
    }

    // =========================================================================
    // Review Output
    // =========================================================================

    async fn on_review_text(&mut self, raw: String) {
        let text = strip_thinking(&raw);
        if text.trim().is_empty() {
            debug!(raw_len = raw.len(), "Review text empty after stripping");
            return;
        }

        self.review_typing.cancel();
        self.emit_typing(AgentRole::Review, false);
        self.emit(OrchestratorEvent::CollaborationMessage {
            from: AgentRole::Review,
            to: AgentRole::Discovery,
            content: text.clone(),
            timestamp: Utc::now(),
        });
        if self.advance(CollaborationState::Refining) {
            self.emit(OrchestratorEvent::CollaborationDetected {
                kind: CollaborationKind::FeedbackReady,
                from: AgentRole::Review,
                to: AgentRole::Discovery,
                state: self.state,
            });
        }

        self.pending_feedback.push(text);
        self.deliver_feedback().await;
    }

    async fn deliver_feedback(&mut self) {
        if self.pending_feedback.is_empty() {
            return;
        }
        if self.discovery.is_running() {
            debug!(queued = self.pending_feedback.len(), "Discovery busy, feedback queued");
            return;
        }

        let feedback = self.pending_feedback.join("\n\n");
        let prompt = format!(
            "Technical review feedback:\n\n{} {}",
            feedback, self.config.feedback_suffix
        );

        self.set_active(ActiveProcess::Discovery);
        self.emit_typing(AgentRole::Discovery, true);
        match self.spawn_agent(AgentRole::Discovery, prompt, true).await {
            Ok(SpawnOutcome::Started) => self.pending_feedback.clear(),
            Ok(SpawnOutcome::AlreadyRunning) => {
                debug!("Discovery became busy, feedback stays queued");
            }
            Err(e) => {
                warn!("Feedback delivery failed: {}", e);
                self.pending_feedback.clear();
                self.clear_typing(AgentRole::Discovery);
            }
        }
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    /// Spawn a session run and make it the live one for its role
    async fn spawn_agent(
        &mut self,
        role: AgentRole,
        prompt: String,
        continue_existing: bool,
    ) -> Result<SpawnOutcome, SessionError> {
        let system_prompt = self.config.system_prompt_for(role);
        let session = match role {
            AgentRole::Discovery => &self.discovery,
            AgentRole::Review => &self.review,
        };
        let result = session
            .spawn(prompt, continue_existing, Some(system_prompt))
            .await;
        if !matches!(result, Ok(SpawnOutcome::AlreadyRunning)) {
            // A failed start still publishes Error and Exit under the new run
            let run = session.current_run();
            match role {
                AgentRole::Discovery => self.discovery_run = Some(run),
                AgentRole::Review => self.review_run = Some(run),
            }
        }
        result
    }

    fn live_run(&self, role: AgentRole) -> Option<u64> {
        match role {
            AgentRole::Discovery => self.discovery_run,
            AgentRole::Review => self.review_run,
        }
    }

    /// Stop routing output of any run started so far
    fn detach_runs(&mut self) {
        self.discovery_run = None;
        self.review_run = None;
    }

    fn relay_tool_use(&mut self, role: AgentRole, tool: ToolInvocation) {
        info!(%role, tool = %tool.name, id = %tool.id, "Tool usage");
        if role == AgentRole::Discovery {
            if let Some(file_path) = tools::spec_write_target(&tool.name, &tool.input) {
                self.emit(OrchestratorEvent::SpecWritingStarted {
                    file_path,
                    tool_id: tool.id.clone(),
                });
            }
        }
        self.emit(OrchestratorEvent::ToolUsage {
            from: role,
            description: tools::describe(&tool.name, &tool.input),
            tool_name: tool.name,
            tool_id: tool.id,
        });
    }

    /// Move the collaboration state forward; returns whether it changed
    fn advance(&mut self, next: CollaborationState) -> bool {
        if next > self.state {
            debug!(from = ?self.state, to = ?next, "Collaboration state advanced");
            self.state = next;
            true
        } else {
            false
        }
    }

    fn set_active(&mut self, active: ActiveProcess) {
        if self.active != active {
            self.active = active;
            self.emit(OrchestratorEvent::ActiveProcessChanged { active });
        }
    }

    fn emit_discovery_message(&self, content: String) {
        self.emit(OrchestratorEvent::DiscoveryMessage {
            content,
            timestamp: Utc::now(),
        });
    }

    fn clear_typing(&mut self, role: AgentRole) {
        match role {
            AgentRole::Discovery => self.discovery_typing.cancel(),
            AgentRole::Review => self.review_typing.cancel(),
        }
        self.emit_typing(role, false);
    }

    fn clear_timers(&mut self) {
        self.discovery_typing.cancel();
        self.review_typing.cancel();
        self.cancel_settle_timer();
    }

    fn cancel_settle_timer(&mut self) {
        if let Some(timer) = self.settle_timer.take() {
            timer.abort();
        }
    }

    fn emit_typing(&self, speaker: AgentRole, is_typing: bool) {
        self.emit(OrchestratorEvent::TypingIndicator { speaker, is_typing });
    }

    fn emit(&self, event: OrchestratorEvent) {
        let _ = self.events.send(event);
    }
}

impl Drop for Orchestrator {
    fn drop(&mut self) {
        self.discovery.kill();
        self.review.kill();
        self.cancel_settle_timer();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::{ContentPart, ServiceMessage};
    use crate::testing::{Script, ScriptedService};
    use serde_json::json;
    use std::time::Duration;

    struct Harness {
        orch: Orchestrator,
        events: EventReceiver,
        discovery: Arc<ScriptedService>,
        review: Arc<ScriptedService>,
    }

    fn harness() -> Harness {
        let discovery = Arc::new(ScriptedService::new("discovery"));
        let review = Arc::new(ScriptedService::new("review"));
        let config = OrchestratorConfig::default().with_root("/tmp/specdraft-test");
        let (orch, events) = Orchestrator::new(
            config,
            ModelRegistry::builtin(),
            discovery.clone(),
            review.clone(),
        );
        Harness {
            orch,
            events,
            discovery,
            review,
        }
    }

    impl Harness {
        /// Handle inbound work until nothing arrives for a while
        async fn pump(&mut self) {
            while let Ok(Some(inbound)) =
                tokio::time::timeout(Duration::from_millis(50), self.orch.recv_inbound()).await
            {
                self.orch.handle_inbound(inbound).await;
            }
        }

        fn drain(&mut self) -> Vec<OrchestratorEvent> {
            let mut out = Vec::new();
            while let Ok(event) = self.events.try_recv() {
                out.push(event);
            }
            out
        }
    }

    fn user_messages(events: &[OrchestratorEvent]) -> Vec<&str> {
        events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::DiscoveryMessage { content, .. } => Some(content.as_str()),
                _ => None,
            })
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn test_route_before_start_is_typed_error() {
        let mut h = harness();
        let err = h.orch.route_user_message("hello").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::NotStarted));
        assert!(h.discovery.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_start_spawns_discovery_only() {
        let mut h = harness();
        h.orch.start_processes(None).await.unwrap();

        let requests = h.discovery.requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].prompt, crate::constants::prompts::GREETING);
        assert_eq!(requests[0].resume_token, None);
        assert!(requests[0]
            .system_prompt
            .as_deref()
            .unwrap()
            .contains("@review:"));
        assert_eq!(
            requests[0].cwd,
            std::path::PathBuf::from("/tmp/specdraft-test/workspaces/discovery")
        );
        assert!(h.review.requests().is_empty());
        assert!(h
            .drain()
            .contains(&OrchestratorEvent::ProcessesStarted {
                model: "opus".to_string()
            }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_user_message_resumes_discovery() {
        let mut h = harness();
        h.orch
            .start_processes(Some("Build a todo app".to_string()))
            .await
            .unwrap();
        h.pump().await;
        assert_eq!(h.orch.status().history_len, 1);

        h.orch.route_user_message("For teams").await.unwrap();
        let requests = h.discovery.requests();
        assert_eq!(requests[0].prompt, "Build a todo app");
        assert_eq!(requests[1].prompt, "The user says: \"For teams\" think hard");
        assert_eq!(requests[1].resume_token.as_deref(), Some("discovery-session"));
        assert_eq!(h.orch.status().history_len, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_busy_discovery_rejects_user_message() {
        let mut h = harness();
        h.discovery.push(Script::Hang);
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;

        let err = h.orch.route_user_message("hello").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::AgentBusy(AgentRole::Discovery)
        ));
        assert_eq!(h.discovery.requests().len(), 1);
        h.orch.stop_all_processes();
    }

    #[tokio::test(start_paused = true)]
    async fn test_handoff_shows_only_text_before_marker() {
        let mut h = harness();
        h.discovery
            .push(Script::text("Plan ready.\n\n@review: check the plan. ultrathink"));
        h.orch
            .start_processes(Some("Build a todo app".to_string()))
            .await
            .unwrap();
        h.pump().await;

        let events = h.drain();
        assert_eq!(user_messages(&events), vec!["Plan ready."]);

        let requests = h.review.requests();
        assert_eq!(requests.len(), 1);
        let prompt = &requests[0].prompt;
        assert!(prompt.starts_with("=== PREVIOUS CONVERSATION CONTEXT ==="));
        assert!(prompt.contains("] USER:\nBuild a todo app"));
        assert!(prompt.ends_with(
            "=== END OF CONVERSATION CONTEXT ===\n\n\
             Now, please address the following request with full awareness of the above context:\n\n\
             check the plan. ultrathink"
        ));
        assert_eq!(requests[0].resume_token, None);
        assert!(requests[0]
            .cwd
            .ends_with("workspaces/review"));

        assert!(events.contains(&OrchestratorEvent::ActiveProcessChanged {
            active: ActiveProcess::Review
        }));
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::CollaborationMessage { from: AgentRole::Discovery, content, .. }
                if content == "check the plan. ultrathink"
        )));
        assert!(h.orch.status().review_engaged);
    }

    #[tokio::test(start_paused = true)]
    async fn test_review_feedback_goes_to_discovery_and_second_handoff_has_no_preamble() {
        let mut h = harness();
        h.discovery.push(Script::text("Draft is in spec.md.\n@review: check it"));
        h.review.push(Script::text("Add rate limits."));
        h.discovery
            .push(Script::text("Updated the draft.\n@review: check again"));
        h.orch
            .start_processes(Some("An API gateway".to_string()))
            .await
            .unwrap();
        h.pump().await;

        let discovery_requests = h.discovery.requests();
        assert_eq!(discovery_requests.len(), 2);
        assert_eq!(
            discovery_requests[1].prompt,
            "Technical review feedback:\n\nAdd rate limits. think harder"
        );
        assert_eq!(
            discovery_requests[1].resume_token.as_deref(),
            Some("discovery-session")
        );

        let review_requests = h.review.requests();
        assert_eq!(review_requests.len(), 2);
        assert!(review_requests[0].prompt.contains("PREVIOUS CONVERSATION CONTEXT"));
        assert_eq!(review_requests[1].prompt, "check again");
        assert_eq!(
            review_requests[1].resume_token.as_deref(),
            Some("review-session")
        );

        let events = h.drain();
        let shown = user_messages(&events);
        assert_eq!(shown, vec!["Draft is in spec.md.", "Updated the draft."]);
        assert!(!shown.iter().any(|m| m.contains("rate limits")));
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::CollaborationMessage { from: AgentRole::Review, to: AgentRole::Discovery, .. }
        )));
        assert_eq!(
            h.orch.status().collaboration_state,
            CollaborationState::Refining
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_inside_annotation_never_hands_off() {
        let mut h = harness();
        h.discovery.push(Script::text(
            "<thinking>\n@review: maybe later</thinking>Tell me about your users.",
        ));
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;

        assert_eq!(
            user_messages(&h.drain()),
            vec!["Tell me about your users."]
        );
        assert!(h.review.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_without_payload_shows_whole_message() {
        let mut h = harness();
        h.discovery.push(Script::text("Done.\n@review:   "));
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;

        assert_eq!(user_messages(&h.drain()), vec!["Done.\n@review:   "]);
        assert!(h.review.requests().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_plain_text_debounces_typing() {
        let mut h = harness();
        h.discovery.push(Script::text("What should it do?"));
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;
        tokio::time::sleep(Duration::from_millis(500)).await;

        let events = h.drain();
        let typing: Vec<bool> = events
            .iter()
            .filter_map(|e| match e {
                OrchestratorEvent::TypingIndicator {
                    speaker: AgentRole::Discovery,
                    is_typing,
                } => Some(*is_typing),
                _ => None,
            })
            .collect();
        assert_eq!(typing.first(), Some(&true));
        assert_eq!(typing.last(), Some(&false));
    }

    #[tokio::test(start_paused = true)]
    async fn test_review_cannot_be_selected() {
        let mut h = harness();
        assert!(matches!(
            h.orch.switch_active_process(AgentRole::Review),
            Err(OrchestratorError::ReviewNotSelectable)
        ));
        assert!(h.orch.switch_active_process(AgentRole::Discovery).is_ok());
        assert_eq!(h.orch.status().active_process, ActiveProcess::Discovery);
    }

    #[tokio::test(start_paused = true)]
    async fn test_invalid_model_leaves_state_untouched() {
        let mut h = harness();
        let err = h.orch.change_model("gpt-4").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::InvalidModelId(id) if id == "gpt-4"));
        assert_eq!(h.orch.current_model(), "opus");
        assert!(h.drain().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_change_model_updates_after_sessions() {
        let mut h = harness();
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;
        h.drain();

        h.orch.change_model("sonnet").await.unwrap();
        assert_eq!(h.orch.current_model(), "sonnet");
        assert_eq!(h.discovery.requests()[1].prompt, "/model sonnet");
        // Review was never initialized, so its change is deferred
        assert!(h.review.requests().is_empty());
        assert_eq!(h.orch.status().review.model, "sonnet");
        assert!(h.drain().contains(&OrchestratorEvent::ModelChanged {
            model: "sonnet".to_string(),
            display_name: "Claude Sonnet".to_string()
        }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_clears_typing_and_aborts() {
        let mut h = harness();
        h.discovery.push(Script::Hang);
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;
        h.drain();

        h.orch.stop_all_processes();
        h.pump().await;
        let events = h.drain();
        assert!(events.contains(&OrchestratorEvent::TypingIndicator {
            speaker: AgentRole::Review,
            is_typing: false
        }));
        assert!(events.contains(&OrchestratorEvent::ProcessesStopped));
        assert!(events.contains(&OrchestratorEvent::ProcessExit {
            process: AgentRole::Discovery,
            reason: ExitReason::Aborted
        }));
        assert!(!events
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::Error { .. })));
        assert!(!h.orch.status().discovery.running);
    }

    #[tokio::test(start_paused = true)]
    async fn test_aborted_review_is_engaged_fresh_again() {
        let mut h = harness();
        h.discovery.push(Script::text("@review: first look"));
        h.review.push(Script::Hang);
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;
        assert!(h.orch.status().review_engaged);

        h.orch.stop_all_processes();
        h.pump().await;
        assert!(!h.orch.status().review_engaged);

        h.discovery.push(Script::text("Again.\n@review: second look"));
        h.orch.route_user_message("retry").await.unwrap();
        h.pump().await;

        let requests = h.review.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[1].prompt.contains("PREVIOUS CONVERSATION CONTEXT"));
        assert_eq!(requests[1].resume_token, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_then_route_does_not_crash() {
        let mut h = harness();
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;

        h.orch.reset_processes();
        h.orch.route_user_message("still there?").await.unwrap();
        h.pump().await;
        tokio::time::sleep(Duration::from_secs(3)).await;
        h.pump().await;

        let requests = h.discovery.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].resume_token, None);
        assert!(h.drain().contains(&OrchestratorEvent::ProcessesReset));
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_restarts_discovery_after_settle() {
        let mut h = harness();
        h.discovery.push(Script::text("@review: look"));
        h.orch
            .start_processes(Some("hello".to_string()))
            .await
            .unwrap();
        h.pump().await;
        assert_eq!(h.orch.status().collaboration_state, CollaborationState::Reviewing);

        h.orch.reset_processes();
        let status = h.orch.status();
        assert_eq!(status.history_len, 0);
        assert!(!status.review_engaged);
        assert_eq!(status.collaboration_state, CollaborationState::Discovering);

        tokio::time::sleep(Duration::from_secs(3)).await;
        h.pump().await;
        let requests = h.discovery.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].prompt, crate::constants::prompts::GREETING);
        assert_eq!(requests[1].resume_token, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_cancels_pending_restart() {
        let mut h = harness();
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;

        h.orch.reset_processes();
        h.orch.stop_all_processes();
        tokio::time::sleep(Duration::from_secs(3)).await;
        h.pump().await;
        assert_eq!(h.discovery.requests().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_draft_detection_advances_state() {
        let mut h = harness();
        h.discovery.push(Script::text(
            "# Specification\n\n## Functional Requirements\n- Sign in with email\n",
        ));
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;

        assert!(h.drain().iter().any(|e| matches!(
            e,
            OrchestratorEvent::CollaborationDetected {
                kind: CollaborationKind::DraftReady,
                ..
            }
        )));
        assert_eq!(
            h.orch.status().collaboration_state,
            CollaborationState::Reviewing
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_use_is_relayed() {
        let mut h = harness();
        h.discovery.push(Script::Reply(vec![ServiceMessage::assistant(vec![
            ContentPart::tool_use("t1", "Write", json!({"file_path": "/w/spec.md", "content": "#"})),
        ])]));
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;

        let events = h.drain();
        assert!(events.contains(&OrchestratorEvent::SpecWritingStarted {
            file_path: "/w/spec.md".to_string(),
            tool_id: "t1".to_string()
        }));
        assert!(events.contains(&OrchestratorEvent::ToolUsage {
            from: AgentRole::Discovery,
            tool_name: "Write".to_string(),
            tool_id: "t1".to_string(),
            description: "Writing to: spec.md".to_string()
        }));
        assert!(user_messages(&events).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset_drops_output_of_earlier_run() {
        let mut h = harness();
        h.discovery
            .push(Script::text("Old plan.\n@review: check the old plan"));
        h.orch.start_processes(None).await.unwrap();
        // The run streams everything before the orchestrator handles it
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.orch.reset_processes();
        h.pump().await;

        let status = h.orch.status();
        assert_eq!(status.history_len, 0);
        assert!(!status.review_engaged);
        assert_eq!(status.collaboration_state, CollaborationState::Discovering);
        assert!(h.review.requests().is_empty());
        assert!(user_messages(&h.drain()).is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_drops_output_of_earlier_run() {
        let mut h = harness();
        h.discovery
            .push(Script::text("Old plan.\n@review: check the old plan"));
        h.orch.start_processes(None).await.unwrap();
        tokio::time::sleep(Duration::from_millis(1)).await;
        h.orch.stop_all_processes();
        h.pump().await;

        assert!(h.review.requests().is_empty());
        assert!(!h.orch.status().review.running);
        let events = h.drain();
        assert!(user_messages(&events).is_empty());
        assert!(!events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::CollaborationMessage { .. }
        )));
    }

    #[tokio::test(start_paused = true)]
    async fn test_killed_run_exit_keeps_new_run_typing() {
        let mut h = harness();
        h.discovery.push(Script::Hang);
        h.discovery.push(Script::Hang);
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;

        h.orch.reset_processes();
        h.orch.route_user_message("are you there?").await.unwrap();
        h.pump().await;

        let events = h.drain();
        assert!(events.contains(&OrchestratorEvent::ProcessExit {
            process: AgentRole::Discovery,
            reason: ExitReason::Aborted
        }));
        let last_typing = events.iter().rev().find_map(|e| match e {
            OrchestratorEvent::TypingIndicator {
                speaker: AgentRole::Discovery,
                is_typing,
            } => Some(*is_typing),
            _ => None,
        });
        assert_eq!(last_typing, Some(true));
        assert!(h.orch.status().discovery.running);
        assert_eq!(h.discovery.requests().len(), 2);
        h.orch.stop_all_processes();
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_model_change_keeps_both_sessions_on_current_model() {
        let mut h = harness();
        h.orch.start_processes(None).await.unwrap();
        h.pump().await;
        h.drain();

        h.discovery
            .push(Script::FailToStart("service down".to_string()));
        let err = h.orch.change_model("sonnet").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Session(_)));

        let status = h.orch.status();
        assert_eq!(status.current_model, "opus");
        assert_eq!(status.discovery.model, "opus");
        assert_eq!(status.review.model, "opus");
        assert!(!h
            .drain()
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::ModelChanged { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_handoffs_to_busy_review_are_delivered_together_on_exit() {
        let mut h = harness();
        h.discovery.push(Script::text("@review: first pass"));
        h.review.push(Script::slow(Duration::from_secs(1), &[]));
        h.discovery
            .push(Script::text("More detail.\n@review: second pass"));
        h.discovery.push(Script::text("@review: third pass"));

        h.orch
            .start_processes(Some("A chat app".to_string()))
            .await
            .unwrap();
        h.pump().await;
        h.orch.route_user_message("add groups").await.unwrap();
        h.pump().await;
        h.orch.route_user_message("and threads").await.unwrap();
        h.pump().await;
        assert_eq!(h.review.requests().len(), 1);

        tokio::time::sleep(Duration::from_secs(2)).await;
        h.pump().await;

        let requests = h.review.requests();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].prompt, "second pass\n\nthird pass");
        assert_eq!(requests[1].resume_token.as_deref(), Some("review-session"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_feedback_to_busy_discovery_is_delivered_once_on_exit() {
        let mut h = harness();
        h.discovery.push(Script::text("@review: check scope"));
        h.review.push(Script::slow(
            Duration::from_millis(500),
            &["Fix A.", "Fix B."],
        ));
        h.discovery
            .push(Script::slow(Duration::from_secs(1), &["Answer."]));

        h.orch.start_processes(None).await.unwrap();
        h.pump().await;
        h.orch.route_user_message("what about auth?").await.unwrap();

        // Review answers while Discovery is still replying to the user
        tokio::time::sleep(Duration::from_millis(600)).await;
        h.pump().await;
        assert_eq!(h.discovery.requests().len(), 2);

        tokio::time::sleep(Duration::from_secs(1)).await;
        h.pump().await;

        let requests = h.discovery.requests();
        assert_eq!(requests.len(), 3);
        assert_eq!(
            requests[2].prompt,
            "Technical review feedback:\n\nFix A.\n\nFix B. think harder"
        );
        assert_eq!(
            requests[2].resume_token.as_deref(),
            Some("discovery-session")
        );
        let events = h.drain();
        assert_eq!(user_messages(&events), vec!["Answer."]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_spawn_failure_reports_error() {
        let mut h = harness();
        h.discovery
            .push(Script::FailToStart("claude not found".to_string()));
        let err = h.orch.start_processes(None).await.unwrap_err();
        assert!(matches!(err, OrchestratorError::Session(_)));
        h.pump().await;

        let events = h.drain();
        assert!(!events
            .iter()
            .any(|e| matches!(e, OrchestratorEvent::ProcessesStarted { .. })));
        assert!(events.iter().any(|e| matches!(
            e,
            OrchestratorEvent::Error { process: Some(AgentRole::Discovery), message }
                if message.contains("claude not found")
        )));
        assert!(events.contains(&OrchestratorEvent::ProcessExit {
            process: AgentRole::Discovery,
            reason: ExitReason::Failed
        }));
        let last_typing = events.iter().rev().find_map(|e| match e {
            OrchestratorEvent::TypingIndicator {
                speaker: AgentRole::Discovery,
                is_typing,
            } => Some(*is_typing),
            _ => None,
        });
        assert_eq!(last_typing, Some(false));
    }
}
