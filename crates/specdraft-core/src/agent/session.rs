//! Agent session lifecycle
//!
//! One resumable conversation with the agent service. `spawn` starts or
//! resumes a run; a consumer task reads the run's stream and publishes
//! `SessionUpdate`s to the owner's channel. Every run ends with exactly one
//! `Exit`, whether it finished, was aborted or failed.

use std::path::PathBuf;
use std::sync::Arc;

use futures::StreamExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};
use uuid::Uuid;

use super::roles::AgentRole;
use super::service::{AgentService, MessageStream, QueryRequest, ServiceMessage};
use crate::error::SessionError;
use crate::models::ModelInfo;

/// Event published by a session, tagged with its role and run
#[derive(Debug, Clone, PartialEq)]
pub struct SessionUpdate {
    pub role: AgentRole,
    /// Run generation that produced this event
    pub run: u64,
    pub event: SessionEvent,
}

/// Lifecycle and content events
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The run is streaming; precedes any message of that run
    Started,
    /// The service initialized the conversation
    SessionReady {
        resume_token: String,
        model: Option<String>,
    },
    ToolUse(ToolInvocation),
    /// All text parts of one assistant message, joined with newlines
    Text { content: String },
    Completed(CompletionInfo),
    ModelChanged { model: String, applied: bool },
    Aborted,
    Error { message: String },
    Exit { reason: ExitReason },
}

/// A tool call made by the agent
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolInvocation {
    pub id: String,
    pub name: String,
    pub input: serde_json::Value,
}

/// Usage metadata from a terminal `result` message
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompletionInfo {
    pub duration_ms: Option<u64>,
    pub total_cost_usd: Option<f64>,
    pub num_turns: Option<u32>,
    pub is_error: bool,
    pub result: Option<String>,
}

/// Why a run stopped streaming
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitReason {
    Finished,
    Aborted,
    Failed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SpawnOutcome {
    Started,
    /// A run was already streaming; nothing was sent
    AlreadyRunning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KillOutcome {
    Requested,
    NotRunning,
}

/// Snapshot of a session for status reporting
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionStatus {
    pub role: AgentRole,
    pub model: String,
    pub running: bool,
    pub initialized: bool,
    pub resume_token: Option<String>,
}

/// Conversation runs vs. in-band control directives
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunKind {
    Conversation,
    /// Output is not conversation content and is not published as text
    Control,
}

#[derive(Debug)]
struct SessionState {
    model: String,
    resume_token: Option<String>,
    running: bool,
    cancel: Option<CancellationToken>,
    generation: u64,
}

/// One resumable agent conversation
pub struct AgentSession {
    role: AgentRole,
    workspace: PathBuf,
    service: Arc<dyn AgentService>,
    state: Arc<Mutex<SessionState>>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl AgentSession {
    pub fn new(
        role: AgentRole,
        workspace: PathBuf,
        model: String,
        service: Arc<dyn AgentService>,
        updates: mpsc::UnboundedSender<SessionUpdate>,
    ) -> Self {
        Self {
            role,
            workspace,
            service,
            state: Arc::new(Mutex::new(SessionState {
                model,
                resume_token: None,
                running: false,
                cancel: None,
                generation: 0,
            })),
            updates,
        }
    }

    pub fn role(&self) -> AgentRole {
        self.role
    }

    pub fn is_running(&self) -> bool {
        self.state.lock().running
    }

    /// Whether the service has initialized a resumable conversation
    pub fn is_initialized(&self) -> bool {
        self.state.lock().resume_token.is_some()
    }

    pub fn model(&self) -> String {
        self.state.lock().model.clone()
    }

    /// Generation of the most recent run. Events tagged with an older
    /// generation come from a run that was replaced or killed.
    pub fn current_run(&self) -> u64 {
        self.state.lock().generation
    }

    /// Set the model for the next run without contacting the service
    pub fn record_model(&self, model: &str) {
        self.state.lock().model = model.to_string();
    }

    pub fn status(&self) -> SessionStatus {
        let state = self.state.lock();
        SessionStatus {
            role: self.role,
            model: state.model.clone(),
            running: state.running,
            initialized: state.resume_token.is_some(),
            resume_token: state.resume_token.clone(),
        }
    }

    /// Start a run. With `continue_existing` and a known resume token the
    /// existing conversation is resumed; otherwise a fresh one starts.
    pub async fn spawn(
        &self,
        prompt: impl Into<String>,
        continue_existing: bool,
        system_prompt: Option<String>,
    ) -> Result<SpawnOutcome, SessionError> {
        self.spawn_run(prompt.into(), continue_existing, system_prompt, RunKind::Conversation)
            .await
    }

    async fn spawn_run(
        &self,
        prompt: String,
        continue_existing: bool,
        system_prompt: Option<String>,
        kind: RunKind,
    ) -> Result<SpawnOutcome, SessionError> {
        let (cancel, generation, request) = {
            let mut state = self.state.lock();
            if state.running {
                warn!(role = %self.role, "Spawn ignored, session already running");
                return Ok(SpawnOutcome::AlreadyRunning);
            }
            state.running = true;
            state.generation += 1;
            let cancel = CancellationToken::new();
            state.cancel = Some(cancel.clone());
            let resume_token = if continue_existing {
                state.resume_token.clone()
            } else {
                None
            };
            let request = QueryRequest {
                prompt,
                resume_token,
                system_prompt,
                model: state.model.clone(),
                cwd: self.workspace.clone(),
            };
            (cancel, state.generation, request)
        };

        let run_id = Uuid::new_v4();
        info!(
            role = %self.role,
            %run_id,
            run = generation,
            resume = request.resume_token.is_some(),
            service = self.service.name(),
            "Spawning agent run"
        );

        let stream = match self.service.query(request, cancel.clone()).await {
            Ok(stream) => stream,
            Err(source) => {
                warn!(role = %self.role, %run_id, "Agent run failed to start: {}", source);
                self.release(generation);
                self.emit(
                    generation,
                    SessionEvent::Error {
                        message: source.to_string(),
                    },
                );
                self.emit(
                    generation,
                    SessionEvent::Exit {
                        reason: ExitReason::Failed,
                    },
                );
                return Err(SessionError::SpawnFailed {
                    role: self.role,
                    source,
                });
            }
        };

        self.emit(generation, SessionEvent::Started);

        let consumer = RunConsumer {
            role: self.role,
            generation,
            kind,
            state: Arc::clone(&self.state),
            updates: self.updates.clone(),
        };
        tokio::spawn(
            consumer
                .run(stream, cancel)
                .instrument(tracing::info_span!("agent_run", role = %self.role, %run_id)),
        );

        Ok(SpawnOutcome::Started)
    }

    /// Request cancellation of the in-flight run. The resume token is kept.
    pub fn kill(&self) -> KillOutcome {
        let mut state = self.state.lock();
        if !state.running {
            debug!(role = %self.role, "Kill ignored, session not running");
            return KillOutcome::NotRunning;
        }
        if let Some(cancel) = state.cancel.take() {
            cancel.cancel();
        }
        // The aborted run still publishes Aborted and Exit but can no longer
        // touch session state; a new run may start now
        state.running = false;
        state.generation += 1;
        info!(role = %self.role, run = state.generation, "Agent run cancellation requested");
        KillOutcome::Requested
    }

    /// Switch models. Live conversations get an in-band directive; otherwise
    /// the change applies to the next fresh run. If the directive cannot be
    /// sent the previous model is kept.
    pub async fn change_model(&self, model: &ModelInfo) -> Result<(), SessionError> {
        let (previous, initialized, generation) = {
            let mut state = self.state.lock();
            let previous = std::mem::replace(&mut state.model, model.id.clone());
            (previous, state.resume_token.is_some(), state.generation)
        };

        let applied = match model.switch_directive() {
            Some(directive) if initialized => {
                match self
                    .spawn_run(directive, true, None, RunKind::Control)
                    .await
                {
                    Ok(outcome) => outcome == SpawnOutcome::Started,
                    Err(e) => {
                        warn!(
                            role = %self.role,
                            model = %model.id,
                            "Model directive failed, keeping {}",
                            previous
                        );
                        self.record_model(&previous);
                        self.emit(
                            generation,
                            SessionEvent::ModelChanged {
                                model: previous,
                                applied: false,
                            },
                        );
                        return Err(e);
                    }
                }
            }
            _ => false,
        };

        if !applied {
            debug!(role = %self.role, model = %model.id, "Model change deferred to next run");
        }
        self.emit(
            generation,
            SessionEvent::ModelChanged {
                model: model.id.clone(),
                applied,
            },
        );
        Ok(())
    }

    /// Abort any run and forget the conversation
    pub fn reset(&self) {
        self.kill();
        self.state.lock().resume_token = None;
        debug!(role = %self.role, "Session reset");
    }

    fn release(&self, generation: u64) {
        release(&self.state, generation);
    }

    fn emit(&self, run: u64, event: SessionEvent) {
        let _ = self.updates.send(SessionUpdate {
            role: self.role,
            run,
            event,
        });
    }
}

/// Clear the running flag unless a newer run has taken over
fn release(state: &Mutex<SessionState>, generation: u64) {
    let mut state = state.lock();
    if state.generation == generation {
        state.running = false;
        state.cancel = None;
    }
}

/// Reads one run's stream and publishes its events
struct RunConsumer {
    role: AgentRole,
    generation: u64,
    kind: RunKind,
    state: Arc<Mutex<SessionState>>,
    updates: mpsc::UnboundedSender<SessionUpdate>,
}

impl RunConsumer {
    async fn run(self, mut stream: MessageStream, cancel: CancellationToken) {
        let reason = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break ExitReason::Aborted,
                next = stream.next() => match next {
                    Some(Ok(message)) => self.handle(message),
                    Some(Err(e)) if e.is_cancellation() => break ExitReason::Aborted,
                    Some(Err(e)) => {
                        warn!("Agent stream failed: {}", e);
                        self.emit(SessionEvent::Error { message: e.to_string() });
                        break ExitReason::Failed;
                    }
                    None => break ExitReason::Finished,
                }
            }
        };

        if reason == ExitReason::Aborted {
            self.emit(SessionEvent::Aborted);
        }
        release(&self.state, self.generation);
        debug!(?reason, "Agent run ended");
        self.emit(SessionEvent::Exit { reason });
    }

    fn handle(&self, message: ServiceMessage) {
        match message {
            ServiceMessage::System {
                subtype,
                session_id: Some(token),
                model,
                ..
            } if subtype == "init" => {
                {
                    let mut state = self.state.lock();
                    if state.generation != self.generation {
                        debug!(run = self.generation, "Ignoring init from a replaced run");
                        return;
                    }
                    state.resume_token = Some(token.clone());
                }
                debug!(resume_token = %token, "Agent session initialized");
                self.emit(SessionEvent::SessionReady {
                    resume_token: token,
                    model,
                });
            }
            ServiceMessage::Assistant { message } => {
                for (id, name, input) in message.tool_uses() {
                    self.emit(SessionEvent::ToolUse(ToolInvocation {
                        id: id.to_string(),
                        name: name.to_string(),
                        input: input.clone(),
                    }));
                }
                if let Some(content) = message.text() {
                    if self.kind == RunKind::Control {
                        debug!(len = content.len(), "Dropping control run output");
                    } else {
                        self.emit(SessionEvent::Text { content });
                    }
                }
            }
            ServiceMessage::Result {
                result,
                duration_ms,
                total_cost_usd,
                num_turns,
                is_error,
                ..
            } => {
                self.emit(SessionEvent::Completed(CompletionInfo {
                    duration_ms,
                    total_cost_usd,
                    num_turns,
                    is_error,
                    result,
                }));
            }
            other => debug!(message = ?other, "Ignoring agent message"),
        }
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.updates.send(SessionUpdate {
            role: self.role,
            run: self.generation,
            event,
        });
    }
}
