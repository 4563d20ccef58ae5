//! Applies adaptor actions and runs the `kick` renderer.

use std::io::Write;
use std::path::PathBuf;
use std::process::Stdio;

use arnold_core::action::{Action, ACTION_START_RENDER};
use arnold_core::constants::{
    completion_line, CLIENT_LINE_PREFIX, DEFAULT_KICK_EXECUTABLE, KICK_EXECUTABLE_ENV,
};
use arnold_core::payload::{KEY_ERROR_ON_LICENSE_FAIL, KEY_OUTPUT_FILE_PATH, KEY_SCENE_FILE};
use serde_json::Value;
use tokio::process::Command;

use crate::error::{ClientError, ClientResult};

/// Render settings accumulated from init actions.
#[derive(Debug, Clone)]
pub struct KickHandler {
    kick_executable: String,
    scene_file: Option<PathBuf>,
    output_path: Option<String>,
    /// Passed verbatim to `options.abort_on_license_fail`.
    error_on_license_fail: String,
}

impl KickHandler {
    pub fn new(kick_executable: impl Into<String>) -> Self {
        Self {
            kick_executable: kick_executable.into(),
            scene_file: None,
            output_path: None,
            error_on_license_fail: "true".to_string(),
        }
    }

    /// Renderer from `ARNOLD_ADAPTOR_KICK_EXECUTABLE`, else `kick` on `PATH`.
    pub fn from_env() -> Self {
        let executable = std::env::var(KICK_EXECUTABLE_ENV)
            .ok()
            .filter(|exe| !exe.is_empty())
            .unwrap_or_else(|| DEFAULT_KICK_EXECUTABLE.to_string());
        Self::new(executable)
    }

    pub fn kick_executable(&self) -> &str {
        &self.kick_executable
    }

    pub async fn handle(&mut self, action: &Action) -> ClientResult<()> {
        match action.name() {
            KEY_SCENE_FILE => self.set_scene_file(action),
            KEY_OUTPUT_FILE_PATH => self.set_output_file_path(action),
            KEY_ERROR_ON_LICENSE_FAIL => {
                self.set_error_on_license_fail(action);
                Ok(())
            }
            ACTION_START_RENDER => self.start_render(action).await,
            other => Err(ClientError::UnknownAction(other.to_string())),
        }
    }

    fn set_scene_file(&mut self, action: &Action) -> ClientResult<()> {
        let scene_file = PathBuf::from(required_str(action, KEY_SCENE_FILE)?);
        if !scene_file.is_file() {
            return Err(ClientError::SceneFileMissing(scene_file));
        }
        tracing::info!(scene_file = %scene_file.display(), "Scene file set");
        self.scene_file = Some(scene_file);
        Ok(())
    }

    fn set_output_file_path(&mut self, action: &Action) -> ClientResult<()> {
        let output_path = required_str(action, KEY_OUTPUT_FILE_PATH)?;
        tracing::info!(output_path, "Output path set");
        self.output_path = Some(output_path.to_string());
        Ok(())
    }

    fn set_error_on_license_fail(&mut self, action: &Action) {
        self.error_on_license_fail = match action.get(KEY_ERROR_ON_LICENSE_FAIL) {
            None | Some(Value::Null) => "true".to_string(),
            Some(Value::String(s)) => s.to_lowercase(),
            Some(other) => other.to_string().to_lowercase(),
        };
    }

    /// Arguments for rendering `frame` with the current settings.
    pub fn kick_args(&self, frame: i64) -> ClientResult<Vec<String>> {
        let scene_file = self
            .scene_file
            .as_ref()
            .ok_or(ClientError::NotConfigured(KEY_SCENE_FILE))?;
        let output_path = self
            .output_path
            .as_ref()
            .ok_or(ClientError::NotConfigured(KEY_OUTPUT_FILE_PATH))?;

        Ok(vec![
            "-nstdin".into(),
            "-dw".into(),
            "-dp".into(),
            "-i".into(),
            scene_file.display().to_string(),
            "-o".into(),
            output_path.clone(),
            "-frame".into(),
            frame.to_string(),
            "-v".into(),
            "6".into(),
            "-set".into(),
            "options.abort_on_license_fail".into(),
            self.error_on_license_fail.clone(),
        ])
    }

    async fn start_render(&self, action: &Action) -> ClientResult<()> {
        let frame = action
            .get("frame")
            .and_then(Value::as_i64)
            .ok_or_else(|| ClientError::MissingField {
                action: action.name().to_string(),
                field: "frame",
            })?;
        let args = self.kick_args(frame)?;

        println!("Calling: {} {}", self.kick_executable, args.join(" "));
        println!("Rendering Frame: {frame}");
        std::io::stdout().flush()?;

        // The renderer writes straight to our stdout/stderr so the adaptor
        // sees its progress lines.
        let status = Command::new(&self.kick_executable)
            .args(&args)
            .stdin(Stdio::null())
            .status()
            .await;

        let failure = match status {
            Ok(status) if status.success() => None,
            Ok(status) => Some(match status.code() {
                Some(code) => format!("exit code {code}"),
                None => format!("{status}"),
            }),
            Err(e) => Some(e.to_string()),
        };

        if let Some(status) = failure {
            println!(
                "{CLIENT_LINE_PREFIX} Error rendering with kick executable: {}",
                self.kick_executable
            );
            std::io::stdout().flush()?;
            return Err(ClientError::RenderFailed {
                executable: self.kick_executable.clone(),
                status,
            });
        }

        println!("{}", completion_line(frame));
        std::io::stdout().flush()?;
        Ok(())
    }
}

fn required_str<'a>(action: &'a Action, key: &'static str) -> ClientResult<&'a str> {
    action
        .get(key)
        .and_then(Value::as_str)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| ClientError::MissingField {
            action: action.name().to_string(),
            field: key,
        })
}
