//! Wire protocol spoken over the control socket.
//!
//! Newline-delimited JSON. The worker always speaks first; every worker
//! message gets exactly one server reply:
//!
//! | Worker sends                         | Server replies             |
//! |--------------------------------------|----------------------------|
//! | `{"type":"poll"}`                    | `{"type":"action", ...}`   |
//! | `{"type":"action_complete", ...}`    | `{"type":"ack"}`           |
//! | `{"type":"action_failed", ...}`      | `{"type":"ack"}`           |

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::action::Action;
use crate::error::CoreError;

/// Message from the worker to the adaptor's control server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkerMessage {
    /// Request the next action; the reply arrives once one is queued.
    Poll,
    ActionComplete {
        name: String,
    },
    ActionFailed {
        name: String,
        message: String,
    },
}

/// Message from the control server to the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    Action {
        name: String,
        #[serde(default)]
        payload: Map<String, Value>,
    },
    Ack,
}

impl From<Action> for ServerMessage {
    fn from(action: Action) -> Self {
        ServerMessage::Action {
            name: action.name().to_string(),
            payload: action.payload().clone(),
        }
    }
}

impl ServerMessage {
    /// The action carried by this message, if any.
    pub fn into_action(self) -> Option<Action> {
        match self {
            ServerMessage::Action { name, payload } => Some(Action::new(name, payload)),
            ServerMessage::Ack => None,
        }
    }
}

/// Serialize a message as one protocol line, trailing newline included.
pub fn encode_line<T: Serialize>(message: &T) -> Result<String, CoreError> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');
    Ok(line)
}

/// Parse one protocol line (surrounding whitespace ignored).
pub fn decode_line<T: serde::de::DeserializeOwned>(line: &str) -> Result<T, CoreError> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Err(CoreError::Protocol("empty protocol line".to_string()));
    }
    Ok(serde_json::from_str(trimmed)?)
}
