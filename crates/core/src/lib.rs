//! Shared types for the Arnold Kick adaptor and its worker client.
//!
//! Holds the [`Action`](action::Action) record exchanged over the control
//! socket, the newline-delimited JSON wire protocol, the validated init/run
//! payloads, and the well-known constants both processes agree on (env var
//! names, output line markers).

pub mod action;
pub mod constants;
pub mod error;
pub mod payload;
pub mod protocol;
