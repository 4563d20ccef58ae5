//! Progress and status reporting.
//!
//! The latest [`AdaptorStatus`] is kept in a `tokio::sync::watch` channel
//! so any number of observers can read or await changes. Each update is also
//! logged as an `openjd_progress` / `openjd_status` line for job-runtime log
//! scrapers.

use serde::Serialize;
use tokio::sync::watch;

/// Snapshot of what the adaptor last reported.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct AdaptorStatus {
    /// Render progress in `0.0..=100.0`.
    pub progress: Option<f32>,
    pub status_message: Option<String>,
}

pub struct StatusReporter {
    tx: watch::Sender<AdaptorStatus>,
}

impl Default for StatusReporter {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusReporter {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(AdaptorStatus::default());
        Self { tx }
    }

    /// Publish new values; `None` keeps the previous value for that field.
    pub fn update(&self, progress: Option<f32>, status_message: Option<&str>) {
        if let Some(progress) = progress {
            tracing::info!(progress, "openjd_progress: {progress}");
        }
        if let Some(message) = status_message {
            tracing::info!("openjd_status: {message}");
        }
        self.tx.send_modify(|status| {
            if let Some(progress) = progress {
                status.progress = Some(progress.clamp(0.0, 100.0));
            }
            if let Some(message) = status_message {
                status.status_message = Some(message.to_string());
            }
        });
    }

    pub fn progress(&self, percent: f32) {
        self.update(Some(percent), None);
    }

    pub fn current(&self) -> AdaptorStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AdaptorStatus> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn partial_update_keeps_other_field() {
        let reporter = StatusReporter::new();
        reporter.update(Some(0.0), Some("Initializing Arnold Kick"));
        reporter.progress(42.0);

        let status = reporter.current();
        assert_eq!(status.progress, Some(42.0));
        assert_eq!(status.status_message.as_deref(), Some("Initializing Arnold Kick"));
    }

    #[test]
    fn progress_is_clamped() {
        let reporter = StatusReporter::new();
        reporter.progress(250.0);
        assert_eq!(reporter.current().progress, Some(100.0));
    }

    #[tokio::test]
    async fn subscribers_see_changes() {
        let reporter = StatusReporter::new();
        let mut rx = reporter.subscribe();

        reporter.progress(10.0);
        rx.changed().await.expect("sender alive");
        assert_eq!(rx.borrow().progress, Some(10.0));
    }
}
