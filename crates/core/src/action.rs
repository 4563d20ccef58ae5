//! The command record handed from the adaptor to the worker.
//!
//! An [`Action`] is created once (by the adaptor lifecycle) and never
//! modified afterwards; the worker consumes it exactly once.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Action that tells the worker to exit its poll loop.
pub const ACTION_CLOSE: &str = "close";

/// Action that renders one frame; its payload is the full run payload.
pub const ACTION_START_RENDER: &str = "start_render";

/// A named command plus its JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Action {
    name: String,
    #[serde(default)]
    payload: Map<String, Value>,
}

impl Action {
    pub fn new(name: impl Into<String>, payload: Map<String, Value>) -> Self {
        Self {
            name: name.into(),
            payload,
        }
    }

    /// An action whose payload is the single entry `{key: value}`.
    ///
    /// Init settings are dispatched this way: the action carries the same
    /// name as the setting it applies.
    pub fn keyed(key: impl Into<String>, value: Value) -> Self {
        let key = key.into();
        let mut payload = Map::new();
        payload.insert(key.clone(), value);
        Self { name: key, payload }
    }

    /// The shutdown command, which carries no payload.
    pub fn close() -> Self {
        Self::new(ACTION_CLOSE, Map::new())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn payload(&self) -> &Map<String, Value> {
        &self.payload
    }

    /// Look up a single payload entry.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.payload.get(key)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn keyed_action_wraps_value_under_its_name() {
        let action = Action::keyed("scene_file", json!("/shots/a.ass"));
        assert_eq!(action.name(), "scene_file");
        assert_eq!(action.get("scene_file"), Some(&json!("/shots/a.ass")));
        assert_eq!(action.payload().len(), 1);
    }

    #[test]
    fn close_has_empty_payload() {
        let action = Action::close();
        assert_eq!(action.name(), ACTION_CLOSE);
        assert!(action.payload().is_empty());
    }

    #[test]
    fn missing_payload_deserializes_as_empty() {
        let action: Action = serde_json::from_str(r#"{"name":"close"}"#).expect("valid action");
        assert_eq!(action, Action::close());
    }
}
