//! Render session lifecycle.
//!
//! ```text
//! Idle -> Initializing -> Ready -> Rendering -> Ready ... -> Stopping -> CleanedUp
//! ```
//!
//! Any transition that returns an error leaves the adaptor `Failed`.
//! [`Adaptor::cleanup`] is accepted from every state and never fails.
//!
//! Every wait here is a short sleep loop against a deadline. Errors found by
//! the output readers are recorded in [`ControlState`] and re-raised on the
//! next loop iteration.

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arnold_core::action::Action;
use arnold_core::constants::SERVER_PATH_ENV;
use arnold_core::error::CoreError;
use arnold_core::payload::{InitData, RunData};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::config::{AdaptorConfig, WorkerLaunch};
use crate::error::{AdaptorError, AdaptorResult};
use crate::monitor::OutputMonitor;
use crate::process::{locate_client, WorkerCommand, WorkerProcess};
use crate::queue::ActionQueue;
use crate::server::ControlServer;
use crate::state::ControlState;
use crate::status::{AdaptorStatus, StatusReporter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AdaptorState {
    Idle,
    Initializing,
    Ready,
    Rendering,
    Stopping,
    CleanedUp,
    Failed,
}

impl fmt::Display for AdaptorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AdaptorState::Idle => "idle",
            AdaptorState::Initializing => "initializing",
            AdaptorState::Ready => "ready",
            AdaptorState::Rendering => "rendering",
            AdaptorState::Stopping => "stopping",
            AdaptorState::CleanedUp => "cleaned up",
            AdaptorState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// One Arnold Kick render session.
pub struct Adaptor {
    config: AdaptorConfig,
    queue: Arc<ActionQueue>,
    control: Arc<ControlState>,
    status: Arc<StatusReporter>,
    server: Option<Arc<ControlServer>>,
    server_task: Option<JoinHandle<AdaptorResult<()>>>,
    worker: Option<WorkerProcess>,
    state: AdaptorState,
}

impl Adaptor {
    pub fn new(config: AdaptorConfig) -> Self {
        Self {
            config,
            queue: Arc::new(ActionQueue::new()),
            control: Arc::new(ControlState::new()),
            status: Arc::new(StatusReporter::new()),
            server: None,
            server_task: None,
            worker: None,
            state: AdaptorState::Idle,
        }
    }

    pub fn state(&self) -> AdaptorState {
        self.state
    }

    pub fn config(&self) -> &AdaptorConfig {
        &self.config
    }

    /// Whether the worker process is alive.
    pub fn is_running(&mut self) -> bool {
        self.worker.as_mut().is_some_and(WorkerProcess::is_running)
    }

    /// Last reported render progress.
    pub fn progress(&self) -> Option<f32> {
        self.status.current().progress
    }

    pub fn status(&self) -> AdaptorStatus {
        self.status.current()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<AdaptorStatus> {
        self.status.subscribe()
    }

    /// Control socket path, once the server has bound it.
    pub fn server_path(&self) -> Option<&Path> {
        self.server.as_ref().and_then(|server| server.server_path())
    }

    /// Whether the control server task is still running.
    pub fn server_is_running(&self) -> bool {
        self.server_task
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Exit code of the worker, once it has exited normally.
    pub fn worker_returncode(&self) -> Option<i32> {
        self.worker.as_ref().and_then(WorkerProcess::returncode)
    }

    // -----------------------------------------------------------------------
    // Transitions
    // -----------------------------------------------------------------------

    /// Validate the init payload, launch the server and worker, and wait
    /// for the worker to consume every init action.
    pub async fn start(&mut self, init_data: &Value) -> AdaptorResult<()> {
        self.expect_state("start", &[AdaptorState::Idle])?;
        self.state = AdaptorState::Initializing;
        let result = self.start_session(init_data).await;
        self.settle(result, AdaptorState::Ready)
    }

    /// Render one frame and wait for the worker to report completion.
    pub async fn run(&mut self, run_data: &Value) -> AdaptorResult<()> {
        if !self.is_running() {
            return self.settle(Err(AdaptorError::NotRunning), AdaptorState::Failed);
        }
        self.expect_state("run", &[AdaptorState::Ready])?;
        self.state = AdaptorState::Rendering;
        let result = self.render(run_data).await;
        self.settle(result, AdaptorState::Ready)
    }

    /// Kill the worker immediately. No-op when it is not running.
    ///
    /// A render interrupted by dropping its `run` future ends here: the
    /// rendering flag is cleared and the adaptor moves to `Failed`.
    pub async fn cancel(&mut self) -> AdaptorResult<()> {
        self.control.set_rendering(false);
        if self.state == AdaptorState::Rendering {
            tracing::warn!("Render cancelled before completion");
            self.state = AdaptorState::Failed;
        }

        let Some(worker) = self.worker.as_mut() else {
            tracing::info!("Cancel requested but Arnold Kick was never started");
            return Ok(());
        };
        if !worker.is_running() {
            tracing::info!("Cancel requested but Arnold Kick is not running");
            return Ok(());
        }
        tracing::info!(pid = worker.pid(), "Cancelling Arnold Kick");
        worker.terminate(Duration::ZERO).await
    }

    /// Nothing to do between the last run and cleanup.
    pub fn stop(&mut self) {
        if self.state == AdaptorState::Ready {
            self.state = AdaptorState::Stopping;
        }
    }

    /// Ask the worker to exit, force it if it does not, and shut down the
    /// control server. Problems are logged, never returned.
    pub async fn cleanup(&mut self) {
        self.state = AdaptorState::Stopping;
        self.control.set_cleanup_in_progress(true);
        self.queue.enqueue_front(Action::close());

        if let Some(worker) = self.worker.as_mut() {
            let timeout = self.config.end_timeout;
            let deadline = Instant::now() + timeout;
            while worker.is_running() && Instant::now() < deadline {
                tokio::time::sleep(self.config.poll_interval).await;
            }

            if worker.is_running() {
                tracing::error!(
                    timeout_secs = timeout.as_secs(),
                    "Arnold Kick did not complete cleanup actions in time. Terminating.",
                );
                if let Err(e) = worker.terminate(self.config.terminate_grace).await {
                    tracing::error!(error = %e, "Failed to terminate Arnold Kick");
                }
            }
            worker.join_readers(timeout).await;
        }

        if let Some(server) = &self.server {
            server.shutdown();
        }
        if let Some(mut task) = self.server_task.take() {
            match tokio::time::timeout(self.config.server_end_timeout, &mut task).await {
                Ok(Ok(Ok(()))) => tracing::debug!("Control server task finished"),
                Ok(Ok(Err(e))) => tracing::warn!(error = %e, "Control server exited with error"),
                Ok(Err(e)) => tracing::error!(error = %e, "Control server task panicked"),
                Err(_) => {
                    tracing::error!("Failed to shutdown the Arnold Kick Adaptor server.");
                    task.abort();
                }
            }
        }

        self.control.set_cleanup_in_progress(false);
        self.state = AdaptorState::CleanedUp;
        tracing::info!("Adaptor cleaned up");
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    async fn start_session(&mut self, init_data: &Value) -> AdaptorResult<()> {
        let init = InitData::from_value(init_data)?;
        self.status.update(Some(0.0), Some("Initializing Arnold Kick"));

        let server_path = self.start_server().await?;

        for action in init.actions() {
            self.queue.enqueue(action);
        }

        self.start_worker(&server_path, init.strict_error_checking())?;
        self.wait_for_init().await
    }

    async fn start_server(&mut self) -> AdaptorResult<PathBuf> {
        let server = Arc::new(ControlServer::new(
            Arc::clone(&self.queue),
            Arc::clone(&self.control),
            self.config.socket_dir(),
        ));
        self.server_task = Some(server.spawn());
        self.server = Some(Arc::clone(&server));

        let deadline = Instant::now() + self.config.server_start_timeout;
        loop {
            if let Some(path) = server.server_path() {
                return Ok(path.to_path_buf());
            }
            if self.server_task.as_ref().is_some_and(JoinHandle::is_finished) {
                return Err(self.server_start_failure().await);
            }
            if Instant::now() >= deadline {
                return Err(AdaptorError::ServerNotReady {
                    timeout_secs: self.config.server_start_timeout.as_secs(),
                });
            }
            tokio::time::sleep(self.config.server_poll_interval).await;
        }
    }

    /// The error a server task that exited before binding ended with.
    async fn server_start_failure(&mut self) -> AdaptorError {
        let not_ready = AdaptorError::ServerNotReady {
            timeout_secs: self.config.server_start_timeout.as_secs(),
        };
        match self.server_task.take() {
            Some(task) => match task.await {
                Ok(Err(e)) => e,
                Ok(Ok(())) => not_ready,
                Err(e) => CoreError::Internal(format!("control server task failed: {e}")).into(),
            },
            None => not_ready,
        }
    }

    fn start_worker(
        &mut self,
        server_path: &Path,
        strict_error_checking: bool,
    ) -> AdaptorResult<()> {
        let command = self
            .worker_command()?
            .env(SERVER_PATH_ENV, server_path.to_string_lossy());
        let monitor = Arc::new(OutputMonitor::for_render(
            Arc::clone(&self.control),
            Arc::clone(&self.status),
            strict_error_checking,
        ));
        self.worker = Some(WorkerProcess::spawn(&command, monitor)?);
        Ok(())
    }

    fn worker_command(&self) -> AdaptorResult<WorkerCommand> {
        match &self.config.worker {
            WorkerLaunch::Discover { search_dirs } => {
                Ok(WorkerCommand::new(locate_client(search_dirs)?))
            }
            WorkerLaunch::Command { program, args, env } => Ok(WorkerCommand {
                program: program.clone(),
                args: args.clone(),
                env: env.clone(),
            }),
        }
    }

    async fn wait_for_init(&mut self) -> AdaptorResult<()> {
        let deadline = Instant::now() + self.config.start_timeout;
        let mut timed_out = false;

        while self.is_running() && !self.queue.is_empty() {
            self.control.check()?;
            if Instant::now() >= deadline {
                timed_out = true;
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        if self.queue.is_empty() {
            tracing::info!("Arnold Kick initialized");
            return Ok(());
        }
        if timed_out {
            return Err(AdaptorError::InitTimeout {
                timeout_secs: self.config.start_timeout.as_secs(),
            });
        }
        self.control.check()?;
        let status = self
            .worker
            .as_ref()
            .map(WorkerProcess::exit_description)
            .unwrap_or_else(|| "Arnold Kick was never started.".to_string());
        Err(AdaptorError::InitFailed { status })
    }

    async fn render(&mut self, run_data: &Value) -> AdaptorResult<()> {
        let action = RunData::from_value(run_data)?.into_action();
        tracing::info!(payload = %run_data, "Starting render");

        self.control.set_rendering(true);
        self.queue.enqueue(action);

        loop {
            self.control.check()?;
            if !self.control.is_rendering() || !self.is_running() {
                break;
            }
            tokio::time::sleep(self.config.poll_interval).await;
        }

        if !self.is_running() {
            // Let the readers deliver anything the worker printed last.
            if let Some(worker) = self.worker.as_mut() {
                worker.join_readers(self.config.poll_interval).await;
            }
            self.control.check()?;
            return Err(AdaptorError::UnexpectedExit {
                exit_code: self.worker_returncode(),
            });
        }
        Ok(())
    }

    fn expect_state(&self, operation: &'static str, allowed: &[AdaptorState]) -> AdaptorResult<()> {
        if allowed.contains(&self.state) {
            Ok(())
        } else {
            Err(AdaptorError::InvalidTransition {
                operation,
                state: self.state,
            })
        }
    }

    fn settle(&mut self, result: AdaptorResult<()>, next: AdaptorState) -> AdaptorResult<()> {
        match &result {
            Ok(()) => self.state = next,
            Err(e) => {
                tracing::error!(error = %e, state = %self.state, "Adaptor transition failed");
                self.state = AdaptorState::Failed;
            }
        }
        result
    }
}

impl Drop for Adaptor {
    fn drop(&mut self) {
        if let Some(server) = &self.server {
            server.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use serde_json::json;

    use super::*;

    fn config(dir: &Path) -> AdaptorConfig {
        AdaptorConfig {
            socket_dir: Some(dir.to_path_buf()),
            end_timeout: Duration::from_millis(300),
            terminate_grace: Duration::ZERO,
            poll_interval: Duration::from_millis(20),
            ..AdaptorConfig::default()
        }
    }

    #[test]
    fn state_display() {
        assert_eq!(AdaptorState::CleanedUp.to_string(), "cleaned up");
        let err = AdaptorError::InvalidTransition {
            operation: "start",
            state: AdaptorState::Ready,
        };
        assert_eq!(err.to_string(), "Cannot start while the adaptor is ready");
    }

    #[tokio::test]
    async fn fresh_adaptor_is_idle() {
        let mut adaptor = Adaptor::new(AdaptorConfig::default());
        assert_eq!(adaptor.state(), AdaptorState::Idle);
        assert!(!adaptor.is_running());
        assert!(adaptor.server_path().is_none());
        assert_eq!(adaptor.progress(), None);
    }

    #[tokio::test]
    async fn invalid_init_payload_fails_before_launch() {
        let dir = tempfile::tempdir().unwrap();
        let mut adaptor = Adaptor::new(config(dir.path()));

        let result = adaptor.start(&json!({"scene_file": ""})).await;
        assert_matches!(result, Err(AdaptorError::Core(CoreError::Validation(_))));
        assert_eq!(adaptor.state(), AdaptorState::Failed);
        assert!(adaptor.server_path().is_none());
    }

    #[tokio::test]
    async fn missing_client_names_search_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path()).with_worker(WorkerLaunch::Discover {
            search_dirs: vec![dir.path().to_path_buf()],
        });
        let mut adaptor = Adaptor::new(cfg);

        let result = adaptor.start(&json!({})).await;
        assert_matches!(result, Err(AdaptorError::ClientNotFound { .. }));

        adaptor.cleanup().await;
        assert!(!adaptor.server_is_running());
        assert_eq!(adaptor.state(), AdaptorState::CleanedUp);
    }

    #[tokio::test]
    async fn start_twice_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path())
            .with_worker(WorkerCommand::new("/bin/sh").arg("-c").arg("sleep 30"));
        let mut adaptor = Adaptor::new(cfg);

        adaptor.start(&json!({})).await.unwrap();
        assert_eq!(adaptor.state(), AdaptorState::Ready);
        assert_matches!(
            adaptor.start(&json!({})).await,
            Err(AdaptorError::InvalidTransition { operation: "start", .. })
        );

        adaptor.cleanup().await;
        assert!(!adaptor.is_running());
    }

    #[tokio::test]
    async fn cancel_after_abandoned_run_clears_rendering() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path())
            .with_worker(WorkerCommand::new("/bin/sh").arg("-c").arg("sleep 30"));
        let mut adaptor = Adaptor::new(cfg);
        adaptor.start(&json!({})).await.unwrap();

        let abandoned =
            tokio::time::timeout(Duration::from_millis(300), adaptor.run(&json!({"frame": 1})))
                .await;
        assert!(abandoned.is_err());
        assert_eq!(adaptor.state(), AdaptorState::Rendering);
        assert!(adaptor.control.is_rendering());

        adaptor.cancel().await.unwrap();
        assert!(!adaptor.control.is_rendering());
        assert_eq!(adaptor.state(), AdaptorState::Failed);

        adaptor.cleanup().await;
    }
}
