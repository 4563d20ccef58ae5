use arnold_core::action::{Action, ACTION_CLOSE};
use arnold_core::constants::CLIENT_LINE_PREFIX;
use arnold_core::protocol::{ServerMessage, WorkerMessage};

use crate::connection::ServerConnection;
use crate::error::{ClientError, ClientResult};
use crate::handler::KickHandler;

pub struct ArnoldClient {
    connection: ServerConnection,
    handler: KickHandler,
}

impl ArnoldClient {
    pub fn new(connection: ServerConnection, handler: KickHandler) -> Self {
        Self { connection, handler }
    }

    /// Poll for actions and apply them until the adaptor sends `close`.
    ///
    /// A failed action is printed to stderr and reported back to the
    /// adaptor; it does not stop the loop.
    pub async fn poll(&mut self) -> ClientResult<()> {
        loop {
            let action = self.next_action().await?;
            tracing::info!(action = action.name(), "Received action");

            if action.name() == ACTION_CLOSE {
                tracing::info!("Adaptor requested close");
                return Ok(());
            }

            let name = action.name().to_string();
            let report = match self.handler.handle(&action).await {
                Ok(()) => WorkerMessage::ActionComplete { name },
                Err(e) => {
                    eprintln!("{CLIENT_LINE_PREFIX} Error: {e}");
                    WorkerMessage::ActionFailed {
                        name,
                        message: e.to_string(),
                    }
                }
            };

            match self.connection.request(&report).await? {
                ServerMessage::Ack => {}
                other => return Err(ClientError::UnexpectedReply(format!("{other:?}"))),
            }
        }
    }

    async fn next_action(&mut self) -> ClientResult<Action> {
        self.connection
            .request(&WorkerMessage::Poll)
            .await?
            .into_action()
            .ok_or_else(|| {
                ClientError::UnexpectedReply("expected an action in reply to poll".into())
            })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use arnold_core::protocol::{decode_line, encode_line};
    use serde_json::json;
    use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
    use tokio::net::UnixListener;

    use super::*;

    #[tokio::test]
    async fn failed_action_is_reported_and_polling_continues() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("control.sock");
        let listener = UnixListener::bind(&path).unwrap();

        let server = tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (read, mut write) = stream.into_split();
            let mut lines = BufReader::new(read).lines();
            let mut received = Vec::new();

            let replies = [
                ServerMessage::from(Action::keyed("scene_file", json!("/nonexistent/shot.ass"))),
                ServerMessage::Ack,
                ServerMessage::from(Action::close()),
            ];
            for reply in replies {
                let line = lines.next_line().await.unwrap().unwrap();
                received.push(decode_line::<WorkerMessage>(&line).unwrap());
                write
                    .write_all(encode_line(&reply).unwrap().as_bytes())
                    .await
                    .unwrap();
            }
            received
        });

        let connection = ServerConnection::connect(&path, Duration::from_secs(5)).await.unwrap();
        let mut client = ArnoldClient::new(connection, KickHandler::new("kick"));
        client.poll().await.unwrap();

        let received = server.await.unwrap();
        assert_eq!(received[0], WorkerMessage::Poll);
        assert!(matches!(
            &received[1],
            WorkerMessage::ActionFailed { name, message }
                if name == "scene_file" && message.contains("does not exist")
        ));
        assert_eq!(received[2], WorkerMessage::Poll);
    }
}
