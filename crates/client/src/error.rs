use std::path::PathBuf;

use arnold_core::error::CoreError;

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error(
        "ArnoldClient cannot connect to the Adaptor because the environment variable \
         ARNOLD_ADAPTOR_SERVER_PATH does not exist"
    )]
    ServerPathUnset,

    #[error(
        "ArnoldClient cannot connect to the Adaptor because the socket at the path defined by \
         the environment variable ARNOLD_ADAPTOR_SERVER_PATH does not exist. Got: {}",
        .0.display()
    )]
    SocketMissing(PathBuf),

    #[error("The adaptor closed the connection")]
    Disconnected,

    #[error("Unexpected reply from the adaptor: {0}")]
    UnexpectedReply(String),

    #[error("The scene file '{}' does not exist", .0.display())]
    SceneFileMissing(PathBuf),

    #[error("Action {action} requires {field}")]
    MissingField {
        action: String,
        field: &'static str,
    },

    #[error("Cannot render before {0} is set")]
    NotConfigured(&'static str),

    #[error("Rendering with kick executable {executable} failed: {status}")]
    RenderFailed { executable: String, status: String },

    #[error("Unknown action: {0}")]
    UnknownAction(String),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type ClientResult<T> = Result<T, ClientError>;
