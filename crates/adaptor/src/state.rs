//! State shared between the lifecycle task, the control server, and the
//! worker output readers.
//!
//! Reader-side code never returns errors to the lifecycle directly: it
//! records them here, and every lifecycle poll loop calls
//! [`ControlState::check`] once per iteration to re-raise them.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::OnceLock;

use crate::error::AdaptorError;

#[derive(Debug, Default)]
pub struct ControlState {
    rendering: AtomicBool,
    cleanup_in_progress: AtomicBool,
    /// First recorded error wins; later ones are logged and dropped.
    pending_error: OnceLock<String>,
}

impl ControlState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_rendering(&self) -> bool {
        self.rendering.load(Ordering::SeqCst)
    }

    pub fn set_rendering(&self, rendering: bool) {
        self.rendering.store(rendering, Ordering::SeqCst);
    }

    pub fn is_cleanup_in_progress(&self) -> bool {
        self.cleanup_in_progress.load(Ordering::SeqCst)
    }

    pub fn set_cleanup_in_progress(&self, in_progress: bool) {
        self.cleanup_in_progress.store(in_progress, Ordering::SeqCst);
    }

    /// Record a fatal error for the lifecycle to raise on its next poll.
    pub fn record_error(&self, message: impl Into<String>) {
        let message = message.into();
        if let Err(dropped) = self.pending_error.set(message) {
            tracing::debug!(error = %dropped, "Error already recorded, ignoring");
        } else {
            tracing::warn!("Recorded fatal worker error");
        }
    }

    /// The recorded error, regardless of the cleanup flag.
    pub fn recorded_error(&self) -> Option<&str> {
        self.pending_error.get().map(String::as_str)
    }

    /// Whether a recorded error is currently in force.
    ///
    /// Always `false` while cleanup is in progress.
    pub fn has_error(&self) -> bool {
        self.pending_error.get().is_some() && !self.is_cleanup_in_progress()
    }

    /// Re-raise the recorded error, unless cleanup is in progress.
    pub fn check(&self) -> Result<(), AdaptorError> {
        match self.pending_error.get() {
            Some(message) if !self.is_cleanup_in_progress() => {
                Err(AdaptorError::WorkerReported(message.clone()))
            }
            _ => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn fresh_state_is_clean() {
        let state = ControlState::new();
        assert!(!state.is_rendering());
        assert!(!state.has_error());
        assert!(state.check().is_ok());
    }

    #[test]
    fn first_error_wins() {
        let state = ControlState::new();
        state.record_error("first");
        state.record_error("second");
        assert_matches!(state.check(), Err(AdaptorError::WorkerReported(msg)) if msg == "first");
    }

    #[test]
    fn error_is_raised_on_every_check() {
        let state = ControlState::new();
        state.record_error("boom");
        assert!(state.check().is_err());
        assert!(state.check().is_err());
    }

    #[test]
    fn cleanup_suppresses_recorded_error() {
        let state = ControlState::new();
        state.record_error("boom");

        state.set_cleanup_in_progress(true);
        assert!(!state.has_error());
        assert!(state.check().is_ok());
        assert_eq!(state.recorded_error(), Some("boom"));

        state.set_cleanup_in_progress(false);
        assert!(state.has_error());
    }
}
