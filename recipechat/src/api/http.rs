//! `reqwest` implementation of [`ChatApi`].
//!
//! Every request carries `Authorization: Bearer <credential>` and is bounded
//! by the configured request timeout.

use std::time::Duration;

use recipechat_proto::credential::Credential;
use recipechat_proto::message::Message;
use recipechat_proto::room::{CreateRoomRequest, CreateRoomResponse, ErrorBody, RoomId};
use recipechat_proto::user::{Contact, UserId};
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use url::Url;

use super::ChatApi;
use crate::error::ChatError;

/// Low-level outcome of a failed request, before mapping to [`ChatError`].
#[derive(Debug)]
enum HttpFailure {
    /// The request exceeded the timeout.
    Timeout,
    /// The backend rejected the credential (401).
    Unauthorized(String),
    /// The backend answered with another non-success status.
    Rejected(StatusCode, String),
    /// Connection, TLS or body decoding failure.
    Transport(String),
}

impl HttpFailure {
    fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else {
            Self::Transport(err.to_string())
        }
    }

    /// Maps the failure for `operation`; `otherwise` builds the kind used for
    /// rejections and transport errors.
    fn into_chat_error(
        self,
        operation: &'static str,
        timeout: Duration,
        otherwise: impl FnOnce(String) -> ChatError,
    ) -> ChatError {
        match self {
            Self::Timeout => ChatError::Timeout {
                operation,
                after: timeout,
            },
            Self::Unauthorized(reason) => ChatError::CredentialInvalid(reason),
            Self::Rejected(status, reason) => otherwise(format!("{status}: {reason}")),
            Self::Transport(reason) => otherwise(reason),
        }
    }
}

/// REST client for the messaging endpoints.
pub struct HttpChatApi {
    client: reqwest::Client,
    base_url: String,
    credential: Credential,
    timeout: Duration,
}

impl HttpChatApi {
    /// Creates a client for `base_url` (e.g. `http://127.0.0.1:8000/api`).
    #[must_use]
    pub fn new(base_url: &str, credential: Credential, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "falling back to default HTTP client");
                reqwest::Client::new()
            });
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            credential,
            timeout,
        }
    }

    /// Return the base URL requests are made against.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{path}", self.base_url)
    }

    /// URL of a room's message list, with the room name escaped as one
    /// path segment.
    fn messages_url(&self, room: &RoomId) -> Result<Url, HttpFailure> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| HttpFailure::Transport(format!("invalid API URL: {e}")))?;
        url.path_segments_mut()
            .map_err(|()| HttpFailure::Transport("API URL cannot carry a path".to_string()))?
            .pop_if_empty()
            .extend(["chat", "room", room.as_str(), "messages"]);
        Ok(url)
    }

    /// Sends an authenticated request and decodes a JSON success body.
    async fn request_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
    ) -> Result<T, HttpFailure> {
        let response = request
            .bearer_auth(self.credential.expose())
            .send()
            .await
            .map_err(|e| HttpFailure::from_reqwest(&e))?;

        let status = response.status();
        if !status.is_success() {
            let reason = rejection_reason(response).await;
            if status == StatusCode::UNAUTHORIZED {
                return Err(HttpFailure::Unauthorized(reason));
            }
            return Err(HttpFailure::Rejected(status, reason));
        }

        response
            .json::<T>()
            .await
            .map_err(|e| HttpFailure::from_reqwest(&e))
    }
}

/// Extracts `{"error": ..}` from a rejection body, falling back to raw text.
async fn rejection_reason(response: reqwest::Response) -> String {
    let status = response.status();
    match response.text().await {
        Ok(text) => serde_json::from_str::<ErrorBody>(&text)
            .map(|b| b.error)
            .unwrap_or_else(|_| {
                if text.is_empty() {
                    status.to_string()
                } else {
                    text
                }
            }),
        Err(_) => status.to_string(),
    }
}

impl ChatApi for HttpChatApi {
    async fn fetch_contacts(&self) -> Result<Vec<Contact>, ChatError> {
        let request = self.client.get(self.url("contacts"));
        self.request_json(request).await.map_err(|f| {
            f.into_chat_error("contact listing", self.timeout, ChatError::DirectoryUnavailable)
        })
    }

    async fn create_room(&self, peer: &UserId) -> Result<RoomId, ChatError> {
        let body = CreateRoomRequest {
            peer_id: peer.clone(),
        };
        let request = self.client.post(self.url("chat/room")).json(&body);
        match self.request_json::<CreateRoomResponse>(request).await {
            Ok(resp) => Ok(resp.room_name),
            Err(HttpFailure::Rejected(
                StatusCode::BAD_REQUEST | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND,
                reason,
            )) => Err(ChatError::InvalidPeer {
                peer: peer.clone(),
                reason,
            }),
            Err(f) => Err(f.into_chat_error(
                "room negotiation",
                self.timeout,
                ChatError::RoomNegotiationFailed,
            )),
        }
    }

    async fn fetch_messages(&self, room: &RoomId) -> Result<Vec<Message>, ChatError> {
        let result: Result<Vec<Message>, HttpFailure> = match self.messages_url(room) {
            Ok(url) => self.request_json(self.client.get(url)).await,
            Err(f) => Err(f),
        };
        result.map_err(|f| {
            f.into_chat_error("history load", self.timeout, ChatError::HistoryUnavailable)
        })
    }
}
