//! Line-oriented connection to the adaptor's control server.

use std::path::Path;
use std::time::Duration;

use arnold_core::constants::SERVER_PATH_ENV;
use arnold_core::protocol::{decode_line, encode_line, ServerMessage, WorkerMessage};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tokio::time::Instant;

use crate::error::{ClientError, ClientResult};

/// How often to re-check for the socket file while it does not exist yet.
const SOCKET_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug)]
pub struct ServerConnection {
    lines: Lines<BufReader<OwnedReadHalf>>,
    write: OwnedWriteHalf,
}

impl ServerConnection {
    /// Connect to the socket named by `ARNOLD_ADAPTOR_SERVER_PATH`.
    pub async fn connect_from_env(timeout: Duration) -> ClientResult<Self> {
        let path = std::env::var_os(SERVER_PATH_ENV)
            .filter(|path| !path.is_empty())
            .ok_or(ClientError::ServerPathUnset)?;
        Self::connect(Path::new(&path), timeout).await
    }

    /// Connect to `path`, waiting up to `timeout` for it to appear.
    pub async fn connect(path: &Path, timeout: Duration) -> ClientResult<Self> {
        let deadline = Instant::now() + timeout;
        while !path.exists() {
            if Instant::now() >= deadline {
                return Err(ClientError::SocketMissing(path.to_path_buf()));
            }
            tokio::time::sleep(SOCKET_POLL_INTERVAL).await;
        }

        let stream = UnixStream::connect(path).await?;
        tracing::info!(path = %path.display(), "Connected to adaptor");

        let (read, write) = stream.into_split();
        Ok(Self {
            lines: BufReader::new(read).lines(),
            write,
        })
    }

    /// Send one message and wait for its reply.
    pub async fn request(&mut self, message: &WorkerMessage) -> ClientResult<ServerMessage> {
        self.write.write_all(encode_line(message)?.as_bytes()).await?;
        self.write.flush().await?;

        let line = self
            .lines
            .next_line()
            .await?
            .ok_or(ClientError::Disconnected)?;
        Ok(decode_line(&line)?)
    }
}
