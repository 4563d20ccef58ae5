//! Init and run payloads accepted by the adaptor.
//!
//! Both payloads arrive as untyped JSON objects. They are checked here
//! (shape via serde with unknown keys rejected, content via `validator`)
//! before any action reaches the worker.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use validator::Validate;

use crate::action::{Action, ACTION_START_RENDER};
use crate::error::CoreError;

/// Init key naming the scene to render.
pub const KEY_SCENE_FILE: &str = "scene_file";

/// Init key naming the render output path.
pub const KEY_OUTPUT_FILE_PATH: &str = "output_file_path";

/// Init key toggling `options.abort_on_license_fail`.
pub const KEY_ERROR_ON_LICENSE_FAIL: &str = "error_on_arnold_license_fail";

/// Init keys that become worker actions, in dispatch order.
pub const INIT_ACTION_KEYS: [&str; 3] = [
    KEY_ERROR_ON_LICENSE_FAIL,
    KEY_OUTPUT_FILE_PATH,
    KEY_SCENE_FILE,
];

// ---------------------------------------------------------------------------
// InitData
// ---------------------------------------------------------------------------

/// Session-wide settings supplied once, at start.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct InitData {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "scene_file must not be empty"))]
    pub scene_file: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    #[validate(length(min = 1, message = "output_file_path must not be empty"))]
    pub output_file_path: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_on_arnold_license_fail: Option<bool>,

    /// Whether error/warning output lines are fatal. Defaults to `true`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub strict_error_checking: Option<bool>,
}

impl InitData {
    /// Parse and validate an init payload.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        let data = parse_object::<Self>(value, "init data")?;
        data.validate()?;
        Ok(data)
    }

    pub fn strict_error_checking(&self) -> bool {
        self.strict_error_checking.unwrap_or(true)
    }

    /// One action per init key present, in [`INIT_ACTION_KEYS`] order.
    ///
    /// Each action is named after its key and carries `{key: value}`.
    pub fn actions(&self) -> Vec<Action> {
        INIT_ACTION_KEYS
            .iter()
            .filter_map(|key| self.value_for(key).map(|value| Action::keyed(*key, value)))
            .collect()
    }

    fn value_for(&self, key: &str) -> Option<Value> {
        match key {
            KEY_SCENE_FILE => self.scene_file.clone().map(Value::String),
            KEY_OUTPUT_FILE_PATH => self.output_file_path.clone().map(Value::String),
            KEY_ERROR_ON_LICENSE_FAIL => self.error_on_arnold_license_fail.map(Value::Bool),
            _ => None,
        }
    }
}

// ---------------------------------------------------------------------------
// RunData
// ---------------------------------------------------------------------------

/// Per-task payload: which frame to render.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Validate)]
#[serde(deny_unknown_fields)]
pub struct RunData {
    pub frame: i64,
}

impl RunData {
    /// Parse and validate a run payload.
    pub fn from_value(value: &Value) -> Result<Self, CoreError> {
        let data = parse_object::<Self>(value, "run data")?;
        data.validate()?;
        Ok(data)
    }

    /// The `start_render` action carrying this payload.
    pub fn into_action(self) -> Action {
        let mut payload = Map::new();
        payload.insert("frame".to_string(), Value::from(self.frame));
        Action::new(ACTION_START_RENDER, payload)
    }
}

fn parse_object<T: serde::de::DeserializeOwned>(
    value: &Value,
    what: &str,
) -> Result<T, CoreError> {
    if !value.is_object() {
        return Err(CoreError::Validation(format!("{what} must be a JSON object")));
    }
    serde_json::from_value(value.clone())
        .map_err(|e| CoreError::Validation(format!("invalid {what}: {e}")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
