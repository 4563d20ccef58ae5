use std::path::PathBuf;

use arnold_core::error::CoreError;

use crate::adaptor::AdaptorState;

/// Errors surfaced by adaptor transitions.
///
/// Cleanup never returns one of these: shutdown problems are logged and
/// escalated to forced termination instead.
#[derive(Debug, thiserror::Error)]
pub enum AdaptorError {
    /// Init/run payload rejected, or another domain error from `arnold_core`.
    #[error(transparent)]
    Core(#[from] CoreError),

    /// The worker executable is not in any search directory.
    #[error(
        "Could not find {name}. Check that it is installed in one of the following directories: {}",
        format_dirs(.searched)
    )]
    ClientNotFound {
        name: &'static str,
        searched: Vec<PathBuf>,
    },

    /// The control server never published a socket path.
    #[error("Could not find a socket path because the server did not finish initializing within {timeout_secs}s")]
    ServerNotReady { timeout_secs: u64 },

    /// A render was requested while no worker is alive.
    #[error("Cannot render because Arnold Kick is not running.")]
    NotRunning,

    /// The worker printed an error line, or reported a failed render.
    #[error("{0}")]
    WorkerReported(String),

    /// Init actions were still queued when the start deadline passed.
    #[error(
        "Arnold Kick did not complete initialization actions in {timeout_secs} seconds and failed to start."
    )]
    InitTimeout { timeout_secs: u64 },

    /// The worker stopped consuming init actions before the deadline.
    #[error(
        "Arnold Kick encountered an error and was not able to complete initialization actions. {status}"
    )]
    InitFailed { status: String },

    /// The worker died while a render was expected to be in progress.
    #[error(
        "Arnold Kick exited early and did not render successfully, please check render logs. Exit code {}",
        format_exit_code(.exit_code)
    )]
    UnexpectedExit { exit_code: Option<i32> },

    /// A transition was requested from a state that does not allow it.
    #[error("Cannot {operation} while the adaptor is {state}")]
    InvalidTransition {
        operation: &'static str,
        state: AdaptorState,
    },

    /// An environment variable held an unusable value.
    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Convenience alias for adaptor operations.
pub type AdaptorResult<T> = Result<T, AdaptorError>;

fn format_dirs(dirs: &[PathBuf]) -> String {
    let rendered: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
    format!("[{}]", rendered.join(", "))
}

fn format_exit_code(code: &Option<i32>) -> String {
    match code {
        Some(code) => code.to_string(),
        None => "unknown (terminated by signal)".to_string(),
    }
}
