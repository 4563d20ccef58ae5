//! `arnold-client` -- the worker process started by `arnold-adaptor`.
//!
//! Not meant to be run by hand: it needs `ARNOLD_ADAPTOR_SERVER_PATH`
//! pointing at a live adaptor socket. Logs go to stderr; stdout carries the
//! render output the adaptor parses.

use std::process::ExitCode;
use std::time::Duration;

use anyhow::Context;
use arnold_client::connection::ServerConnection;
use arnold_client::handler::KickHandler;
use arnold_client::ArnoldClient;
use arnold_core::constants::{CLIENT_LINE_PREFIX, SOCKET_WAIT_TIMEOUT_SECS};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arnold_client=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_writer(std::io::stderr)
                .with_ansi(false),
        )
        .init();

    match run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("{CLIENT_LINE_PREFIX} Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn run() -> anyhow::Result<()> {
    let socket_wait = Duration::from_secs(SOCKET_WAIT_TIMEOUT_SECS);
    let connection = ServerConnection::connect_from_env(socket_wait)
        .await
        .context("Failed to reach the adaptor")?;

    let handler = KickHandler::from_env();
    tracing::info!(kick = handler.kick_executable(), "ArnoldClient started");

    let mut client = ArnoldClient::new(connection, handler);
    client.poll().await?;

    tracing::info!("ArnoldClient exiting");
    Ok(())
}
