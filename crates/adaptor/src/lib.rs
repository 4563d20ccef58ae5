//! Supervision side of the Arnold Kick adaptor.
//!
//! An [`adaptor::Adaptor`] owns one render session: it runs a
//! [`server::ControlServer`] on a Unix socket, spawns the `arnold-client`
//! worker, feeds it [`arnold_core::action::Action`]s through the
//! [`queue::ActionQueue`], and watches the worker's output through the
//! [`monitor::OutputMonitor`] for progress, completion and errors.

pub mod adaptor;
pub mod config;
pub mod error;
pub mod monitor;
pub mod process;
pub mod queue;
pub mod server;
pub mod state;
pub mod status;

pub use adaptor::{Adaptor, AdaptorState};
pub use config::{AdaptorConfig, WorkerLaunch};
pub use error::{AdaptorError, AdaptorResult};
