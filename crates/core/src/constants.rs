//! Well-known names shared by the adaptor and the worker client.
//!
//! The output markers must stay in sync with the regexes the adaptor's
//! output monitor installs; both sides build them from this module.

/// Environment variable through which the adaptor publishes its control
/// socket path to the worker.
pub const SERVER_PATH_ENV: &str = "ARNOLD_ADAPTOR_SERVER_PATH";

/// Environment variable overriding the renderer executable the worker runs.
pub const KICK_EXECUTABLE_ENV: &str = "ARNOLD_ADAPTOR_KICK_EXECUTABLE";

/// Renderer executable used when [`KICK_EXECUTABLE_ENV`] is unset.
pub const DEFAULT_KICK_EXECUTABLE: &str = "kick";

/// File name of the worker executable the adaptor searches for.
pub const CLIENT_EXECUTABLE_NAME: &str = "arnold-client";

/// How long either side waits for the control socket to appear.
pub const SOCKET_WAIT_TIMEOUT_SECS: u64 = 30;

// ---------------------------------------------------------------------------
// Output line contract
// ---------------------------------------------------------------------------

/// Prefix the worker puts on its own protocol lines.
pub const CLIENT_LINE_PREFIX: &str = "ArnoldClient:";

/// Regex matching the worker's per-frame completion line.
pub const COMPLETION_PATTERN: &str = "ArnoldClient: Finished Rendering Frame [0-9]+";

/// Regex matching a progress line; group 1 is the integer percentage.
pub const PROGRESS_PATTERN: &str = r"\[PROGRESS\] ([0-9]+) percent";

/// Regex matching any line treated as fatal under strict error checking.
pub const ERROR_PATTERN: &str = ".*Exception:.*|.*Error:.*|.*Warning.*";

/// The completion line the worker prints after a successful render.
pub fn completion_line(frame: i64) -> String {
    format!("{CLIENT_LINE_PREFIX} Finished Rendering Frame {frame}")
}

/// A progress line in the format the output monitor recognizes.
pub fn progress_line(percent: u32) -> String {
    format!("[PROGRESS] {percent} percent")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn completion_line_format() {
        assert_eq!(completion_line(12), "ArnoldClient: Finished Rendering Frame 12");
    }

    #[test]
    fn progress_line_format() {
        assert_eq!(progress_line(42), "[PROGRESS] 42 percent");
    }
}
