//! Worker subprocess supervision.
//!
//! [`WorkerProcess`] owns the spawned worker: its child handle, one reader
//! task per output stream (feeding the [`OutputMonitor`]), and the exit
//! status once the worker is gone. The worker runs in its own process
//! group so termination also reaches anything it spawned (the renderer).

use std::path::PathBuf;
use std::process::{ExitStatus, Stdio};
use std::sync::Arc;
use std::time::{Duration, Instant};

use arnold_core::constants::CLIENT_EXECUTABLE_NAME;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tokio::task::JoinHandle;

use crate::error::{AdaptorError, AdaptorResult};
use crate::monitor::OutputMonitor;

/// Liveness poll interval while waiting out a termination grace period.
const TERMINATE_POLL_INTERVAL: Duration = Duration::from_millis(50);

// ---------------------------------------------------------------------------
// WorkerCommand
// ---------------------------------------------------------------------------

/// How to launch the worker.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkerCommand {
    pub program: PathBuf,
    pub args: Vec<String>,
    /// Extra environment on top of the adaptor's own.
    pub env: Vec<(String, String)>,
}

impl WorkerCommand {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            env: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }
}

/// Find the worker executable in the first search directory containing it.
pub fn locate_client(search_dirs: &[PathBuf]) -> AdaptorResult<PathBuf> {
    search_dirs
        .iter()
        .map(|dir| dir.join(CLIENT_EXECUTABLE_NAME))
        .find(|candidate| candidate.is_file())
        .ok_or_else(|| AdaptorError::ClientNotFound {
            name: CLIENT_EXECUTABLE_NAME,
            searched: search_dirs.to_vec(),
        })
}

// ---------------------------------------------------------------------------
// WorkerProcess
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub struct WorkerProcess {
    child: Child,
    pid: Option<u32>,
    exit_status: Option<ExitStatus>,
    readers: Vec<JoinHandle<()>>,
}

impl WorkerProcess {
    /// Spawn the worker with stdout/stderr wired to `monitor`.
    pub fn spawn(command: &WorkerCommand, monitor: Arc<OutputMonitor>) -> AdaptorResult<Self> {
        let mut cmd = Command::new(&command.program);
        cmd.args(&command.args)
            .envs(command.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd.spawn()?;
        let pid = child.id();
        tracing::info!(pid, program = %command.program.display(), "Worker process started");

        let mut readers = Vec::with_capacity(2);
        if let Some(stdout) = child.stdout.take() {
            readers.push(tokio::spawn(pump_lines(stdout, "stdout", Arc::clone(&monitor))));
        }
        if let Some(stderr) = child.stderr.take() {
            readers.push(tokio::spawn(pump_lines(stderr, "stderr", monitor)));
        }

        Ok(Self {
            child,
            pid,
            exit_status: None,
            readers,
        })
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// Non-blocking liveness check. Records the exit status once exited.
    pub fn is_running(&mut self) -> bool {
        if self.exit_status.is_some() {
            return false;
        }
        match self.child.try_wait() {
            Ok(Some(status)) => {
                tracing::info!(pid = self.pid, %status, "Worker process exited");
                self.exit_status = Some(status);
                false
            }
            Ok(None) => true,
            Err(e) => {
                tracing::error!(pid = self.pid, error = %e, "Failed to query worker status");
                false
            }
        }
    }

    /// Exit code once the worker has exited normally.
    pub fn returncode(&self) -> Option<i32> {
        self.exit_status.and_then(|status| status.code())
    }

    pub fn exit_status(&self) -> Option<ExitStatus> {
        self.exit_status
    }

    /// Human-readable exit status for diagnostics.
    pub fn exit_description(&self) -> String {
        match self.exit_status {
            None => "Worker has not exited.".to_string(),
            Some(status) => match status.code() {
                Some(code) => format!("Exit code {code}"),
                None => describe_signal(status),
            },
        }
    }

    /// Stop the worker: SIGTERM, wait up to `grace`, then SIGKILL.
    ///
    /// A zero `grace` skips SIGTERM and kills immediately. Returns once the
    /// worker has been reaped.
    pub async fn terminate(&mut self, grace: Duration) -> AdaptorResult<()> {
        if !self.is_running() {
            return Ok(());
        }

        if !grace.is_zero() {
            tracing::info!(
                pid = self.pid,
                grace_ms = grace.as_millis() as u64,
                "Sending SIGTERM to worker",
            );
            self.signal(Signal::Terminate)?;

            let deadline = Instant::now() + grace;
            while Instant::now() < deadline {
                if !self.is_running() {
                    return Ok(());
                }
                tokio::time::sleep(TERMINATE_POLL_INTERVAL).await;
            }
            tracing::warn!(pid = self.pid, "Worker ignored SIGTERM, killing");
        }

        tracing::info!(pid = self.pid, "Killing worker");
        self.signal(Signal::Kill)?;
        let status = self.child.wait().await?;
        tracing::info!(pid = self.pid, %status, "Worker process reaped");
        self.exit_status = Some(status);
        Ok(())
    }

    /// Wait for the output readers to drain, up to `timeout` in total.
    ///
    /// Readers still running at the deadline are aborted.
    pub async fn join_readers(&mut self, timeout: Duration) {
        let deadline = tokio::time::Instant::now() + timeout;
        for mut reader in self.readers.drain(..) {
            if tokio::time::timeout_at(deadline, &mut reader).await.is_err() {
                tracing::warn!(pid = self.pid, "Output reader did not finish, aborting");
                reader.abort();
            }
        }
    }

    fn signal(&mut self, signal: Signal) -> AdaptorResult<()> {
        #[cfg(unix)]
        if let Some(pid) = self.pid {
            return signal_group(pid, signal.as_raw()).map_err(AdaptorError::from);
        }

        match signal {
            Signal::Terminate => Ok(()),
            Signal::Kill => match self.child.start_kill() {
                Ok(()) => Ok(()),
                // Already reaped.
                Err(e) if e.kind() == std::io::ErrorKind::InvalidInput => Ok(()),
                Err(e) => Err(e.into()),
            },
        }
    }
}

impl Drop for WorkerProcess {
    fn drop(&mut self) {
        // kill_on_drop only reaches the direct child, not the renderer.
        #[cfg(unix)]
        if let (None, Some(pid)) = (self.exit_status, self.pid) {
            if let Err(e) = signal_group(pid, libc::SIGKILL) {
                tracing::warn!(pid, error = %e, "Failed to kill worker group on drop");
            }
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Signal {
    Terminate,
    Kill,
}

#[cfg(unix)]
impl Signal {
    fn as_raw(self) -> libc::c_int {
        match self {
            Signal::Terminate => libc::SIGTERM,
            Signal::Kill => libc::SIGKILL,
        }
    }
}

/// Signal every process in the worker's group.
#[cfg(unix)]
fn signal_group(pid: u32, signal: libc::c_int) -> std::io::Result<()> {
    // SAFETY: kill(2) takes plain integers and touches no memory of ours.
    let result = unsafe { libc::kill(-(pid as libc::pid_t), signal) };
    if result == 0 {
        return Ok(());
    }
    let err = std::io::Error::last_os_error();
    if err.raw_os_error() == Some(libc::ESRCH) {
        // Group already gone.
        return Ok(());
    }
    Err(err)
}

#[cfg(unix)]
fn describe_signal(status: ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;
    match status.signal() {
        Some(signal) => format!("Terminated by signal {signal}"),
        None => format!("Exited with {status}"),
    }
}

#[cfg(not(unix))]
fn describe_signal(status: ExitStatus) -> String {
    format!("Exited with {status}")
}

/// Read `stream` line by line, logging each line and feeding it to the
/// monitor. Invalid UTF-8 is replaced rather than ending the read.
async fn pump_lines<R: AsyncRead + Unpin>(
    stream: R,
    name: &'static str,
    monitor: Arc<OutputMonitor>,
) {
    let mut reader = BufReader::new(stream);
    let mut buf = Vec::new();
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => break,
            Ok(_) => {
                let line = String::from_utf8_lossy(&buf);
                let line = line.trim_end_matches(|c| c == '\r' || c == '\n');
                tracing::info!(target: "arnold_adaptor::worker", stream = name, "{line}");
                monitor.handle_line(line);
            }
            Err(e) => {
                tracing::warn!(stream = name, error = %e, "Worker output read failed");
                break;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use assert_matches::assert_matches;
    use regex::Regex;

    use super::*;
    use crate::monitor::PatternCallback;

    fn sh(script: &str) -> WorkerCommand {
        WorkerCommand::new("/bin/sh").arg("-c").arg(script)
    }

    fn silent() -> Arc<OutputMonitor> {
        Arc::new(OutputMonitor::default())
    }

    #[tokio::test]
    async fn captures_both_streams() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let monitor = Arc::new(OutputMonitor::new(vec![PatternCallback::new(
            vec![Regex::new("^(out|err)$").unwrap()],
            move |c| sink.lock().unwrap().push(c[1].to_string()),
        )]));

        let mut worker = WorkerProcess::spawn(&sh("echo out; echo err 1>&2"), monitor).unwrap();
        worker.join_readers(Duration::from_secs(5)).await;

        let mut seen = seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen, ["err", "out"]);
    }

    #[tokio::test]
    async fn records_exit_code() {
        let mut worker = WorkerProcess::spawn(&sh("exit 7"), silent()).unwrap();
        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.is_running() && Instant::now() < deadline {
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(!worker.is_running());
        assert_eq!(worker.returncode(), Some(7));
        assert_eq!(worker.exit_description(), "Exit code 7");
    }

    #[tokio::test]
    async fn zero_grace_kills_immediately() {
        let mut worker = WorkerProcess::spawn(&sh("trap '' TERM; sleep 30"), silent()).unwrap();
        assert!(worker.is_running());

        let started = Instant::now();
        worker.terminate(Duration::ZERO).await.unwrap();
        assert!(!worker.is_running());
        assert!(started.elapsed() < Duration::from_secs(5));
        assert!(worker.returncode().is_none());
        assert!(worker.exit_description().contains("signal"));
    }

    #[tokio::test]
    async fn grace_period_allows_clean_exit() {
        let mut worker = WorkerProcess::spawn(&sh("exec sleep 30"), silent()).unwrap();
        worker.terminate(Duration::from_secs(5)).await.unwrap();
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn ignored_sigterm_escalates_to_kill() {
        let script = "trap '' TERM; while true; do sleep 1; done";
        let mut worker = WorkerProcess::spawn(&sh(script), silent()).unwrap();
        // Give the shell time to install the trap.
        tokio::time::sleep(Duration::from_millis(200)).await;

        worker.terminate(Duration::from_millis(300)).await.unwrap();
        assert!(!worker.is_running());
    }

    #[tokio::test]
    async fn terminate_after_exit_is_noop() {
        let mut worker = WorkerProcess::spawn(&sh("exit 0"), silent()).unwrap();
        tokio::time::sleep(Duration::from_millis(200)).await;
        worker.terminate(Duration::ZERO).await.unwrap();
        assert_eq!(worker.returncode(), Some(0));
    }

    #[tokio::test]
    async fn spawn_missing_program_fails() {
        let result = WorkerProcess::spawn(&WorkerCommand::new("/nonexistent/worker"), silent());
        assert_matches!(result, Err(AdaptorError::Io(_)));
    }

    #[test]
    fn locate_client_reports_searched_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let result = locate_client(&[dir.path().to_path_buf()]);
        assert_matches!(
            result,
            Err(AdaptorError::ClientNotFound { searched, .. }) if searched == vec![dir.path().to_path_buf()]
        );
    }

    #[test]
    fn locate_client_picks_first_match() {
        let empty = tempfile::tempdir().unwrap();
        let first = tempfile::tempdir().unwrap();
        let second = tempfile::tempdir().unwrap();
        for dir in [&first, &second] {
            std::fs::write(dir.path().join(CLIENT_EXECUTABLE_NAME), "").unwrap();
        }

        let found = locate_client(&[
            empty.path().to_path_buf(),
            first.path().to_path_buf(),
            second.path().to_path_buf(),
        ])
        .unwrap();
        assert_eq!(found, first.path().join(CLIENT_EXECUTABLE_NAME));
    }
}
