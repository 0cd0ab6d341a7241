//! Agent service backed by the `claude` CLI
//!
//! Each query runs `claude -p <prompt> --output-format stream-json` in the
//! session workspace and turns its stdout lines into `ServiceMessage`s.

use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::service::{AgentService, MessageStream, QueryRequest, ServiceMessage};
use crate::config::ClaudeCliConfig;
use crate::error::ServiceError;

type MessageSender = mpsc::UnboundedSender<Result<ServiceMessage, ServiceError>>;

/// Runs agent queries through the `claude` binary
#[derive(Debug, Clone)]
pub struct ClaudeCliService {
    config: ClaudeCliConfig,
}

impl ClaudeCliService {
    pub fn new(config: ClaudeCliConfig) -> Self {
        Self { config }
    }

    /// Resolved path of the binary, if it is on PATH
    pub fn binary_path(&self) -> Option<PathBuf> {
        which::which(&self.config.binary).ok()
    }

    pub fn is_available(&self) -> bool {
        self.binary_path().is_some()
    }

    /// Command-line arguments for one request
    fn build_args(&self, request: &QueryRequest) -> Vec<String> {
        let mut args = vec![
            "-p".to_string(),
            request.prompt.clone(),
            "--output-format".to_string(),
            "stream-json".to_string(),
            "--verbose".to_string(),
            "--model".to_string(),
            request.model.clone(),
            "--permission-mode".to_string(),
            self.config.permission_mode.clone(),
            "--max-turns".to_string(),
            self.config.max_turns.to_string(),
        ];

        if let Some(token) = &request.resume_token {
            args.push("--resume".to_string());
            args.push(token.clone());
        }
        if let Some(system_prompt) = &request.system_prompt {
            args.push("--append-system-prompt".to_string());
            args.push(system_prompt.clone());
        }
        if let Some(fallback) = &self.config.fallback_model {
            // The CLI rejects a fallback equal to the main model
            if fallback != &request.model {
                args.push("--fallback-model".to_string());
                args.push(fallback.clone());
            }
        }
        if !self.config.allowed_tools.is_empty() {
            args.push("--allowedTools".to_string());
            args.push(self.config.allowed_tools.join(","));
        }
        args
    }
}

#[async_trait]
impl AgentService for ClaudeCliService {
    fn name(&self) -> &str {
        "claude-cli"
    }

    async fn query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<MessageStream, ServiceError> {
        let mut cmd = Command::new(&self.config.binary);
        cmd.args(self.build_args(&request))
            .current_dir(&request.cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        info!(
            binary = %self.config.binary,
            cwd = %request.cwd.display(),
            model = %request.model,
            resume = request.resume_token.is_some(),
            prompt_len = request.prompt.len(),
            "Starting agent process"
        );

        let mut child = cmd.spawn().map_err(ServiceError::Spawn)?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ServiceError::Protocol("agent stdout was not captured".to_string()))?;
        let stderr = child.stderr.take();

        // Drain stderr concurrently so the child never blocks on a full pipe
        let stderr_handle = tokio::spawn(async move {
            let mut collected = Vec::new();
            if let Some(stderr) = stderr {
                let mut reader = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = reader.next_line().await {
                    debug!(target: "specdraft::agent::stderr", "{}", line);
                    collected.push(line);
                }
            }
            collected.join("\n")
        });

        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        abort_child(&mut child, &tx).await;
                        return;
                    }
                    line = lines.next_line() => match line {
                        Ok(Some(line)) => {
                            let line = line.trim();
                            if line.is_empty() {
                                continue;
                            }
                            match ServiceMessage::parse_line(line) {
                                Ok(message) => {
                                    if tx.send(Ok(message)).is_err() {
                                        // Consumer is gone
                                        let _ = child.kill().await;
                                        return;
                                    }
                                }
                                Err(e) => warn!("Skipping unparseable agent output: {}", e),
                            }
                        }
                        Ok(None) => break,
                        Err(e) => {
                            let _ = child.kill().await;
                            let _ = tx.send(Err(ServiceError::Io(e)));
                            return;
                        }
                    }
                }
            }

            let status = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    abort_child(&mut child, &tx).await;
                    return;
                }
                status = child.wait() => status,
            };

            match status {
                Ok(status) if status.success() => debug!("Agent process finished"),
                Ok(status) => {
                    let stderr = stderr_handle.await.unwrap_or_default();
                    let _ = tx.send(Err(ServiceError::ProcessFailed {
                        code: status.code(),
                        stderr,
                    }));
                }
                Err(e) => {
                    let _ = tx.send(Err(ServiceError::Io(e)));
                }
            }
        });

        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}

async fn abort_child(child: &mut Child, tx: &MessageSender) {
    debug!("Cancelling agent process");
    if let Err(e) = child.kill().await {
        warn!("Failed to kill agent process: {}", e);
    }
    let _ = tx.send(Err(ServiceError::Cancelled));
}
