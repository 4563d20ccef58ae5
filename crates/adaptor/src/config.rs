use std::path::PathBuf;
use std::time::Duration;

use serde::Serialize;

use crate::error::{AdaptorError, AdaptorResult};
use crate::process::WorkerCommand;

/// Where the worker executable comes from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkerLaunch {
    /// Search these directories for `arnold-client`.
    Discover { search_dirs: Vec<PathBuf> },
    /// Run exactly this command.
    Command {
        program: PathBuf,
        args: Vec<String>,
        #[serde(skip)]
        env: Vec<(String, String)>,
    },
}

impl From<WorkerCommand> for WorkerLaunch {
    fn from(command: WorkerCommand) -> Self {
        WorkerLaunch::Command {
            program: command.program,
            args: command.args,
            env: command.env,
        }
    }
}

/// Adaptor timing and discovery settings.
///
/// All fields have defaults matching production behaviour; tests shorten
/// the timeouts and supply an explicit [`WorkerLaunch::Command`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AdaptorConfig {
    /// How long to wait for the control server to publish its socket.
    pub server_start_timeout: Duration,
    /// How long cleanup waits for the server task to stop.
    pub server_end_timeout: Duration,
    /// How long start waits for the worker to drain init actions.
    pub start_timeout: Duration,
    /// How long cleanup waits for the worker to exit after `close`.
    pub end_timeout: Duration,
    /// SIGTERM grace period when cleanup has to terminate the worker.
    pub terminate_grace: Duration,
    /// Poll interval while waiting for the socket path.
    pub server_poll_interval: Duration,
    /// Poll interval for init drain, render completion and cleanup.
    pub poll_interval: Duration,
    /// Directory for the control socket (system temp dir when `None`).
    pub socket_dir: Option<PathBuf>,
    pub worker: WorkerLaunch,
}

impl Default for AdaptorConfig {
    fn default() -> Self {
        Self {
            server_start_timeout: Duration::from_secs(30),
            server_end_timeout: Duration::from_secs(30),
            start_timeout: Duration::from_secs(86_400),
            end_timeout: Duration::from_secs(30),
            terminate_grace: Duration::from_secs(10),
            server_poll_interval: Duration::from_millis(10),
            poll_interval: Duration::from_millis(100),
            socket_dir: None,
            worker: WorkerLaunch::Discover {
                search_dirs: default_search_dirs(),
            },
        }
    }
}

impl AdaptorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                                    | Default                 |
    /// |--------------------------------------------|-------------------------|
    /// | `ARNOLD_ADAPTOR_SERVER_START_TIMEOUT_SECS` | `30`                    |
    /// | `ARNOLD_ADAPTOR_SERVER_END_TIMEOUT_SECS`   | `30`                    |
    /// | `ARNOLD_ADAPTOR_START_TIMEOUT_SECS`        | `86400`                 |
    /// | `ARNOLD_ADAPTOR_END_TIMEOUT_SECS`          | `30`                    |
    /// | `ARNOLD_ADAPTOR_TERMINATE_GRACE_SECS`      | `10`                    |
    /// | `ARNOLD_ADAPTOR_SOCKET_DIR`                | system temp dir         |
    /// | `ARNOLD_ADAPTOR_CLIENT_DIRS`               | exe dir, then `PATH`    |
    pub fn from_env() -> AdaptorResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup (see [`from_env`](Self::from_env)).
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> AdaptorResult<Self> {
        let mut config = Self::default();
        let secs = |key: &str, default: Duration| -> AdaptorResult<Duration> {
            match lookup(key) {
                Some(raw) => raw
                    .trim()
                    .parse::<u64>()
                    .map(Duration::from_secs)
                    .map_err(|_| {
                        AdaptorError::Config(format!(
                            "{key} must be a whole number of seconds, got {raw:?}"
                        ))
                    }),
                None => Ok(default),
            }
        };

        config.server_start_timeout = secs(
            "ARNOLD_ADAPTOR_SERVER_START_TIMEOUT_SECS",
            config.server_start_timeout,
        )?;
        config.server_end_timeout =
            secs("ARNOLD_ADAPTOR_SERVER_END_TIMEOUT_SECS", config.server_end_timeout)?;
        config.start_timeout = secs("ARNOLD_ADAPTOR_START_TIMEOUT_SECS", config.start_timeout)?;
        config.end_timeout = secs("ARNOLD_ADAPTOR_END_TIMEOUT_SECS", config.end_timeout)?;
        config.terminate_grace =
            secs("ARNOLD_ADAPTOR_TERMINATE_GRACE_SECS", config.terminate_grace)?;

        config.socket_dir = lookup("ARNOLD_ADAPTOR_SOCKET_DIR")
            .filter(|s| !s.trim().is_empty())
            .map(PathBuf::from);

        if let Some(dirs) = lookup("ARNOLD_ADAPTOR_CLIENT_DIRS").filter(|s| !s.trim().is_empty()) {
            config.worker = WorkerLaunch::Discover {
                search_dirs: std::env::split_paths(&dirs).collect(),
            };
        }

        Ok(config)
    }

    pub fn with_worker(mut self, worker: impl Into<WorkerLaunch>) -> Self {
        self.worker = worker.into();
        self
    }

    /// Directory the control socket is created in.
    pub fn socket_dir(&self) -> PathBuf {
        self.socket_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

/// The adaptor executable's own directory, then every `PATH` entry.
pub fn default_search_dirs() -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Some(exe_dir) = std::env::current_exe()
        .ok()
        .and_then(|exe| exe.parent().map(PathBuf::from))
    {
        dirs.push(exe_dir);
    }
    if let Some(path) = std::env::var_os("PATH") {
        dirs.extend(std::env::split_paths(&path));
    }
    dirs
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use assert_matches::assert_matches;

    use super::*;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn defaults_without_env() {
        let config = AdaptorConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_start_timeout, Duration::from_secs(30));
        assert_eq!(config.start_timeout, Duration::from_secs(86_400));
        assert_eq!(config.end_timeout, Duration::from_secs(30));
        assert_eq!(config.poll_interval, Duration::from_millis(100));
        assert_eq!(config.server_poll_interval, Duration::from_millis(10));
        assert_eq!(config.socket_dir(), std::env::temp_dir());
        assert_matches!(config.worker, WorkerLaunch::Discover { .. });
    }

    #[test]
    fn overrides_from_env() {
        let config = AdaptorConfig::from_lookup(lookup(&[
            ("ARNOLD_ADAPTOR_START_TIMEOUT_SECS", "600"),
            ("ARNOLD_ADAPTOR_END_TIMEOUT_SECS", " 5 "),
            ("ARNOLD_ADAPTOR_SOCKET_DIR", "/run/arnold"),
            ("ARNOLD_ADAPTOR_CLIENT_DIRS", "/opt/a:/opt/b"),
        ]))
        .unwrap();

        assert_eq!(config.start_timeout, Duration::from_secs(600));
        assert_eq!(config.end_timeout, Duration::from_secs(5));
        assert_eq!(config.socket_dir(), PathBuf::from("/run/arnold"));
        assert_eq!(
            config.worker,
            WorkerLaunch::Discover {
                search_dirs: vec![PathBuf::from("/opt/a"), PathBuf::from("/opt/b")],
            }
        );
    }

    #[test]
    fn invalid_number_is_config_error() {
        let result =
            AdaptorConfig::from_lookup(lookup(&[("ARNOLD_ADAPTOR_END_TIMEOUT_SECS", "soon")]));
        assert_matches!(
            result,
            Err(AdaptorError::Config(msg)) if msg.contains("ARNOLD_ADAPTOR_END_TIMEOUT_SECS")
        );
    }

    #[test]
    fn explicit_worker_command() {
        let config = AdaptorConfig::default()
            .with_worker(WorkerCommand::new("/bin/sh").arg("-c").arg("true"));
        assert_matches!(config.worker, WorkerLaunch::Command { ref args, .. } if args.len() == 2);
    }
}
