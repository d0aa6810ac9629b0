//! WebSocket connector.
//!
//! Connects to `{ws_url}/chat/{room}?token=<credential>` and exchanges JSON
//! text frames. The credential travels as a query parameter because browsers
//! cannot set headers on WebSocket handshakes and the backend follows suit.

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use recipechat_proto::credential::Credential;
use recipechat_proto::room::RoomId;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{self, Message as WsMessage};
use url::Url;

use super::{ChannelDriver, ChannelHandle, ChannelLink, Connector, EventCallback, Outbound};
use crate::error::ChatError;

/// Opens channels over WebSocket.
#[derive(Debug, Clone)]
pub struct WsConnector {
    ws_url: String,
    connect_timeout: Duration,
}

impl WsConnector {
    /// Creates a connector for the realtime base URL (e.g. `ws://127.0.0.1:8000/ws`).
    #[must_use]
    pub fn new(ws_url: &str, connect_timeout: Duration) -> Self {
        Self {
            ws_url: ws_url.trim_end_matches('/').to_string(),
            connect_timeout,
        }
    }

    /// Builds the connection URL for `room`.
    ///
    /// # Errors
    ///
    /// Returns [`ChatError::ChannelFailed`] if the base URL does not parse.
    pub fn room_url(&self, room: &RoomId, credential: &Credential) -> Result<Url, ChatError> {
        let mut url = Url::parse(&self.ws_url)
            .map_err(|e| ChatError::ChannelFailed(format!("invalid realtime URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| ChatError::ChannelFailed("realtime URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["chat", room.as_str()]);
        url.query_pairs_mut()
            .append_pair("token", credential.expose());
        Ok(url)
    }
}

impl Connector for WsConnector {
    fn open(
        &self,
        room: &RoomId,
        credential: &Credential,
        callback: EventCallback,
    ) -> ChannelHandle {
        let (handle, driver) = ChannelHandle::new(room.clone(), callback);
        match self.room_url(room, credential) {
            Ok(url) => {
                tracing::info!(room = %room, "opening realtime channel");
                tokio::spawn(drive(url, self.connect_timeout, driver));
            }
            Err(e) => driver.link.fail(e),
        }
        handle
    }
}

/// Maps a handshake error; a 401 means the credential was refused.
fn map_connect_error(err: tungstenite::Error) -> ChatError {
    match err {
        tungstenite::Error::Http(response) => {
            let status = response.status();
            if status.as_u16() == 401 {
                ChatError::CredentialInvalid(format!("realtime handshake refused: {status}"))
            } else {
                ChatError::ChannelFailed(format!("realtime handshake refused: {status}"))
            }
        }
        other => ChatError::ChannelFailed(other.to_string()),
    }
}

/// Runs one connection: handshake, then pump frames until either side closes.
async fn drive(url: Url, connect_timeout: Duration, driver: ChannelDriver) {
    let ChannelDriver { link, mut outbound } = driver;

    let stream = tokio::select! {
        connected = tokio::time::timeout(connect_timeout, connect_async(url.as_str())) => {
            match connected {
                Ok(Ok((stream, _response))) => stream,
                Ok(Err(e)) => {
                    link.fail(map_connect_error(e));
                    return;
                }
                Err(_) => {
                    link.fail(ChatError::Timeout {
                        operation: "realtime handshake",
                        after: connect_timeout,
                    });
                    return;
                }
            }
        }
        // Only `Close` (or a dropped handle) can arrive before the channel opens.
        _ = outbound.recv() => {
            tracing::debug!(room = %link.room(), "closed before handshake completed");
            return;
        }
    };

    let (mut sink, mut reader) = stream.split();
    if !link.mark_open() {
        let _ = sink.send(WsMessage::Close(None)).await;
        return;
    }

    loop {
        tokio::select! {
            frame = reader.next() => {
                if !on_frame(&link, frame) {
                    break;
                }
            }
            command = outbound.recv() => match command {
                Some(Outbound::Frame(json)) => {
                    if let Err(e) = sink.send(WsMessage::Text(json.into())).await {
                        link.fail(ChatError::ChannelFailed(format!("send failed: {e}")));
                        break;
                    }
                }
                Some(Outbound::Close) | None => {
                    let _ = sink.send(WsMessage::Close(None)).await;
                    let _ = sink.close().await;
                    break;
                }
            },
        }
    }
    tracing::debug!(room = %link.room(), "realtime driver exiting");
}

/// Handles one inbound frame. Returns `false` once the connection is over.
fn on_frame(link: &ChannelLink, frame: Option<Result<WsMessage, tungstenite::Error>>) -> bool {
    match frame {
        Some(Ok(WsMessage::Text(text))) => link.deliver_text(text.as_str()),
        Some(Ok(WsMessage::Binary(bytes))) => link.deliver_bytes(&bytes),
        Some(Ok(WsMessage::Close(_))) | None => {
            link.remote_closed();
            return false;
        }
        Some(Ok(_)) => {}
        Some(Err(e)) => {
            link.fail(ChatError::ChannelFailed(e.to_string()));
            return false;
        }
    }
    true
}
