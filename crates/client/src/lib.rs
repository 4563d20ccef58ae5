//! The Arnold Kick worker.
//!
//! Launched by the adaptor with `ARNOLD_ADAPTOR_SERVER_PATH` in its
//! environment. It polls the adaptor's control server for actions, applies
//! them to a [`handler::KickHandler`], and runs `kick` for every
//! `start_render`. Its stdout/stderr are the adaptor's only view of render
//! progress, so protocol lines are printed there verbatim.

pub mod client;
pub mod connection;
pub mod error;
pub mod handler;

pub use client::ArnoldClient;
pub use error::{ClientError, ClientResult};
