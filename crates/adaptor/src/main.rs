//! `arnold-adaptor` -- drives one Arnold Kick render session.
//!
//! ```text
//! arnold-adaptor run --init-data '{"scene_file": "/jobs/shot.ass", "output_file_path": "/out/shot.exr"}' \
//!                    --run-data '{"frame": 1}' --run-data '{"frame": 2}'
//! arnold-adaptor show-config
//! ```
//!
//! Payloads are inline JSON or `file://<path>`. SIGINT/SIGTERM kill the
//! worker; cleanup still runs before exit.

use std::process::ExitCode;

use anyhow::{anyhow, Context};
use arnold_adaptor::{Adaptor, AdaptorConfig};
use clap::{Parser, Subcommand};
use serde_json::Value;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Debug, Parser)]
#[command(name = "arnold-adaptor", version, about = "Run Arnold Kick renders under supervision")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Start Arnold Kick, render each run payload in order, then clean up.
    Run {
        /// Init payload: JSON object or file://<path>.
        #[arg(long)]
        init_data: String,
        /// Run payload: JSON object or file://<path>. Repeat for more frames.
        #[arg(long = "run-data", required = true)]
        run_data: Vec<String>,
    },
    /// Print the effective configuration as JSON.
    ShowConfig,
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "arnold_adaptor=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    match execute(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = format!("{e:#}"), "arnold-adaptor failed");
            ExitCode::FAILURE
        }
    }
}

async fn execute(cli: Cli) -> anyhow::Result<()> {
    let config = AdaptorConfig::from_env().context("Failed to load adaptor configuration")?;

    match cli.command {
        Command::ShowConfig => {
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
        Command::Run { init_data, run_data } => {
            let init = load_payload(&init_data).context("Invalid --init-data")?;
            let runs = run_data
                .iter()
                .map(|raw| load_payload(raw).context("Invalid --run-data"))
                .collect::<anyhow::Result<Vec<_>>>()?;

            let mut adaptor = Adaptor::new(config);
            let outcome = tokio::select! {
                result = run_session(&mut adaptor, &init, &runs) => Some(result),
                () = shutdown_signal() => None,
            };

            let result = match outcome {
                Some(result) => result,
                None => {
                    if let Err(e) = adaptor.cancel().await {
                        tracing::error!(error = %e, "Failed to cancel Arnold Kick");
                    }
                    Err(anyhow!("Render interrupted by signal"))
                }
            };

            adaptor.cleanup().await;
            result
        }
    }
}

async fn run_session(adaptor: &mut Adaptor, init: &Value, runs: &[Value]) -> anyhow::Result<()> {
    adaptor.start(init).await?;
    for run in runs {
        adaptor.run(run).await?;
        tracing::info!(payload = %run, "Render finished");
    }
    adaptor.stop();
    Ok(())
}

/// Parse a payload argument: inline JSON, or `file://` followed by a path.
fn load_payload(raw: &str) -> anyhow::Result<Value> {
    let text = match raw.strip_prefix("file://") {
        Some(path) => {
            std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read payload file {path}"))?
        }
        None => raw.to_string(),
    };
    serde_json::from_str(&text).context("Payload is not valid JSON")
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl-C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => tracing::info!("Received SIGINT, cancelling render"),
        () = terminate => tracing::info!("Received SIGTERM, cancelling render"),
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn inline_payload() {
        assert_eq!(load_payload(r#"{"frame": 3}"#).unwrap(), json!({"frame": 3}));
    }

    #[test]
    fn file_payload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("init.json");
        std::fs::write(&path, r#"{"scene_file": "/jobs/a.ass"}"#).unwrap();

        let value = load_payload(&format!("file://{}", path.display())).unwrap();
        assert_eq!(value, json!({"scene_file": "/jobs/a.ass"}));
    }

    #[test]
    fn missing_file_is_an_error() {
        let err = load_payload("file:///nonexistent/init.json").unwrap_err();
        assert!(format!("{err:#}").contains("/nonexistent/init.json"));
    }

    #[test]
    fn cli_accepts_repeated_run_data() {
        let cli = Cli::try_parse_from([
            "arnold-adaptor",
            "run",
            "--init-data",
            "{}",
            "--run-data",
            r#"{"frame": 1}"#,
            "--run-data",
            r#"{"frame": 2}"#,
        ])
        .unwrap();
        assert!(matches!(cli.command, Command::Run { ref run_data, .. } if run_data.len() == 2));
    }
}
