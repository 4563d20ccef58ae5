//! Unix-socket control server.
//!
//! The worker connects to the socket named by `ARNOLD_ADAPTOR_SERVER_PATH`
//! and speaks newline-delimited JSON: it polls for the next action, and
//! reports each action's outcome. One connection is served at a time; a
//! poll on an empty queue waits until an action arrives or the server is
//! shut down.

use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

use arnold_core::action::{Action, ACTION_START_RENDER};
use arnold_core::error::CoreError;
use arnold_core::protocol::{decode_line, encode_line, ServerMessage, WorkerMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::error::AdaptorResult;
use crate::queue::ActionQueue;
use crate::state::ControlState;

pub struct ControlServer {
    queue: Arc<ActionQueue>,
    state: Arc<ControlState>,
    socket_dir: PathBuf,
    path: OnceLock<PathBuf>,
    cancel: CancellationToken,
}

impl ControlServer {
    pub fn new(
        queue: Arc<ActionQueue>,
        state: Arc<ControlState>,
        socket_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            queue,
            state,
            socket_dir: socket_dir.into(),
            path: OnceLock::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Run the serve loop on its own task.
    pub fn spawn(self: &Arc<Self>) -> JoinHandle<AdaptorResult<()>> {
        let server = Arc::clone(self);
        tokio::spawn(async move { server.serve().await })
    }

    /// Socket path, once the listener is bound.
    pub fn server_path(&self) -> Option<&Path> {
        self.path.get().map(PathBuf::as_path)
    }

    /// Stop the serve loop. Safe to call more than once.
    pub fn shutdown(&self) {
        if !self.cancel.is_cancelled() {
            tracing::info!("Shutting down control server");
            self.cancel.cancel();
        }
    }

    pub fn is_shut_down(&self) -> bool {
        self.cancel.is_cancelled()
    }

    async fn serve(&self) -> AdaptorResult<()> {
        if self.path.get().is_some() {
            return Err(CoreError::Internal("control server already started".into()).into());
        }
        if self.cancel.is_cancelled() {
            return Ok(());
        }

        let path = self
            .socket_dir
            .join(format!("arnold-adaptor-{}.sock", Uuid::new_v4()));
        let listener = UnixListener::bind(&path)?;
        let _socket = SocketFile(path.clone());
        tracing::info!(path = %path.display(), "Control server listening");
        let _ = self.path.set(path);

        loop {
            let stream = tokio::select! {
                _ = self.cancel.cancelled() => break,
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => stream,
                    Err(e) => {
                        tracing::warn!(error = %e, "Failed to accept worker connection");
                        continue;
                    }
                },
            };

            tracing::debug!("Worker connected");
            if let Err(e) = self.handle_connection(stream).await {
                tracing::warn!(error = %e, "Worker connection closed with error");
            }
        }

        tracing::info!("Control server stopped");
        Ok(())
    }

    /// Answer requests on one connection until the worker hangs up or the
    /// server shuts down.
    async fn handle_connection(&self, stream: UnixStream) -> AdaptorResult<()> {
        let (read, mut write) = stream.into_split();
        let mut lines = BufReader::new(read).lines();

        loop {
            let line = tokio::select! {
                _ = self.cancel.cancelled() => return Ok(()),
                line = lines.next_line() => line?,
            };
            let Some(line) = line else {
                tracing::debug!("Worker disconnected");
                return Ok(());
            };
            if line.trim().is_empty() {
                continue;
            }

            let reply = match decode_line::<WorkerMessage>(&line)? {
                WorkerMessage::Poll => {
                    // A worker that hangs up mid-poll must not take an action with it.
                    let action = tokio::select! {
                        _ = self.cancel.cancelled() => return Ok(()),
                        request = lines.next_line() => {
                            return match request? {
                                None => {
                                    tracing::debug!("Worker disconnected while polling");
                                    Ok(())
                                }
                                Some(_) => Err(CoreError::Protocol(
                                    "request sent while a poll was pending".into(),
                                )
                                .into()),
                            };
                        }
                        action = self.queue.dequeue() => action,
                    };
                    self.deliver(&mut write, action).await?;
                    continue;
                }
                WorkerMessage::ActionComplete { name } => {
                    tracing::info!(action = %name, "Worker completed action");
                    ServerMessage::Ack
                }
                WorkerMessage::ActionFailed { name, message } => {
                    self.action_failed(&name, &message);
                    ServerMessage::Ack
                }
            };

            write.write_all(encode_line(&reply)?.as_bytes()).await?;
            write.flush().await?;
        }
    }

    /// Send `action` as a poll reply. On a write failure the action goes
    /// back to the head of the queue for the next connection.
    async fn deliver(&self, write: &mut OwnedWriteHalf, action: Action) -> AdaptorResult<()> {
        tracing::info!(action = action.name(), "Sending action to worker");
        let line = encode_line(&ServerMessage::from(action.clone()))?;

        let sent = match write.write_all(line.as_bytes()).await {
            Ok(()) => write.flush().await,
            Err(e) => Err(e),
        };
        if let Err(e) = sent {
            tracing::warn!(action = action.name(), error = %e, "Worker gone, requeuing action");
            self.queue.requeue(action);
            return Err(e.into());
        }
        Ok(())
    }

    fn action_failed(&self, name: &str, message: &str) {
        tracing::error!(action = %name, %message, "Worker failed action");
        if name == ACTION_START_RENDER {
            self.state.record_error(message);
        }
    }
}

/// Removes the socket file when the serve loop exits.
struct SocketFile(PathBuf);

impl Drop for SocketFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.0) {
            if e.kind() != std::io::ErrorKind::NotFound {
                tracing::warn!(path = %self.0.display(), error = %e, "Failed to remove socket file");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
