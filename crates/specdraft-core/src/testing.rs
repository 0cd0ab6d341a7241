//! Scripted agent service for unit tests

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::agent::{AgentService, ContentPart, MessageStream, QueryRequest, ServiceMessage};
use crate::error::ServiceError;

/// What the next query plays back
#[derive(Debug, Clone)]
pub(crate) enum Script {
    /// init, the given messages, then a success result
    Reply(Vec<ServiceMessage>),
    /// init, then stay open until cancelled
    Hang,
    /// init, then the messages and a success result after a delay
    Slow(Duration, Vec<ServiceMessage>),
    /// init, then a stream error
    StreamError(String),
    /// The query itself fails
    FailToStart(String),
}

impl Script {
    /// A reply with a single text part
    pub(crate) fn text(text: &str) -> Self {
        Script::Reply(vec![text_message(text)])
    }

    /// A delayed reply with one assistant message per text
    pub(crate) fn slow(delay: Duration, texts: &[&str]) -> Self {
        Script::Slow(delay, texts.iter().map(|t| text_message(t)).collect())
    }
}

fn text_message(text: &str) -> ServiceMessage {
    ServiceMessage::assistant(vec![ContentPart::text(text)])
}

/// Records every request and replays queued scripts in order.
/// An empty queue behaves like `Script::Reply(vec![])`.
pub(crate) struct ScriptedService {
    token: String,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<QueryRequest>>,
}

impl ScriptedService {
    pub(crate) fn new(label: &str) -> Self {
        Self {
            token: format!("{}-session", label),
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn push(&self, script: Script) {
        self.scripts.lock().push_back(script);
    }

    pub(crate) fn requests(&self) -> Vec<QueryRequest> {
        self.requests.lock().clone()
    }
}

#[async_trait]
impl AgentService for ScriptedService {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn query(
        &self,
        request: QueryRequest,
        cancel: CancellationToken,
    ) -> Result<MessageStream, ServiceError> {
        let model = request.model.clone();
        self.requests.lock().push(request);
        let script = self
            .scripts
            .lock()
            .pop_front()
            .unwrap_or(Script::Reply(Vec::new()));

        let (tx, rx) = mpsc::unbounded_channel();
        let init = ServiceMessage::init(&self.token, &model);
        match script {
            Script::FailToStart(message) => return Err(ServiceError::Protocol(message)),
            Script::Reply(messages) => {
                let _ = tx.send(Ok(init));
                for message in messages {
                    let _ = tx.send(Ok(message));
                }
                let _ = tx.send(Ok(ServiceMessage::success("done")));
            }
            Script::StreamError(message) => {
                let _ = tx.send(Ok(init));
                let _ = tx.send(Err(ServiceError::Protocol(message)));
            }
            Script::Hang => {
                let _ = tx.send(Ok(init));
                tokio::spawn(async move {
                    cancel.cancelled().await;
                    let _ = tx.send(Err(ServiceError::Cancelled));
                });
            }
            Script::Slow(delay, messages) => {
                let _ = tx.send(Ok(init));
                tokio::spawn(async move {
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            let _ = tx.send(Err(ServiceError::Cancelled));
                        }
                        _ = tokio::time::sleep(delay) => {
                            for message in messages {
                                let _ = tx.send(Ok(message));
                            }
                            let _ = tx.send(Ok(ServiceMessage::success("done")));
                        }
                    }
                });
            }
        }
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
