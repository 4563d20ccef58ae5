//! Pattern matching over the worker's stdout/stderr lines.
//!
//! An [`OutputMonitor`] holds an ordered list of [`PatternCallback`]s.
//! Every line is offered to each callback in order; within a callback the
//! first matching regex fires its handler, so each callback fires at most
//! once per line.
//!
//! Handlers run on the stream reader tasks. They must not block and never
//! raise: completion/progress update [`ControlState`] and the
//! [`StatusReporter`], while errors are recorded for the lifecycle to raise.

use std::sync::Arc;

use arnold_core::constants::{COMPLETION_PATTERN, ERROR_PATTERN, PROGRESS_PATTERN};
use regex::{Captures, Regex};

use crate::state::ControlState;
use crate::status::StatusReporter;

type Handler = Box<dyn Fn(&Captures<'_>) + Send + Sync>;

/// A group of regexes sharing one handler.
pub struct PatternCallback {
    regexes: Vec<Regex>,
    handler: Handler,
}

impl PatternCallback {
    pub fn new(
        regexes: Vec<Regex>,
        handler: impl Fn(&Captures<'_>) + Send + Sync + 'static,
    ) -> Self {
        Self {
            regexes,
            handler: Box::new(handler),
        }
    }

    /// Fire the handler for the first regex matching `line`.
    fn dispatch(&self, line: &str) -> bool {
        for regex in &self.regexes {
            if let Some(captures) = regex.captures(line) {
                (self.handler)(&captures);
                return true;
            }
        }
        false
    }
}

#[derive(Default)]
pub struct OutputMonitor {
    callbacks: Vec<PatternCallback>,
}

impl OutputMonitor {
    pub fn new(callbacks: Vec<PatternCallback>) -> Self {
        Self { callbacks }
    }

    /// The adaptor's standard callbacks: completion, progress and (when
    /// `strict_error_checking` is set) error detection.
    pub fn for_render(
        state: Arc<ControlState>,
        status: Arc<StatusReporter>,
        strict_error_checking: bool,
    ) -> Self {
        let mut callbacks = Vec::with_capacity(3);

        let complete_state = Arc::clone(&state);
        let complete_status = Arc::clone(&status);
        callbacks.push(PatternCallback::new(
            vec![compile(COMPLETION_PATTERN)],
            move |_| {
                if complete_state.has_error() {
                    return;
                }
                complete_state.set_rendering(false);
                complete_status.progress(100.0);
            },
        ));

        let progress_state = Arc::clone(&state);
        callbacks.push(PatternCallback::new(
            vec![compile(PROGRESS_PATTERN)],
            move |captures| {
                if progress_state.has_error() {
                    return;
                }
                match captures[1].parse::<u32>() {
                    Ok(percent) => status.progress(percent as f32),
                    Err(e) => tracing::warn!(error = %e, "Unparseable progress value"),
                }
            },
        ));

        if strict_error_checking {
            tracing::info!("Enabling strict error checking");
            callbacks.push(PatternCallback::new(
                vec![compile(ERROR_PATTERN)],
                move |captures| {
                    state.record_error(format!(
                        "Arnold Kick Encountered an Error: {}",
                        &captures[0]
                    ));
                },
            ));
        }

        Self::new(callbacks)
    }

    /// Offer one output line to every callback. Returns how many fired.
    pub fn handle_line(&self, line: &str) -> usize {
        self.callbacks
            .iter()
            .filter(|callback| callback.dispatch(line))
            .count()
    }
}

/// Compile one of the fixed patterns from `arnold_core::constants`.
fn compile(pattern: &str) -> Regex {
    Regex::new(pattern).expect("built-in output pattern is a valid regex")
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
