//! HTTP and WebSocket surface of the development backend.
//!
//! Routes:
//! - `GET  /api/contacts`: full roster (the caller is included; clients filter)
//! - `POST /api/chat/room`: body `{peer_id}`, returns `{room_name}`
//! - `GET  /api/chat/room/{room}/messages`: ascending message history
//! - `GET  /ws/chat/{room}?token=..`: realtime channel for one room
//!
//! REST calls authenticate with `Authorization: Bearer <token>`; the realtime
//! endpoint takes the token as a query parameter. Tokens are decoded but not
//! signature-checked.

use std::sync::Arc;

use axum::Json;
use axum::extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use futures_util::{SinkExt, StreamExt};
use recipechat_proto::credential::Credential;
use recipechat_proto::message::{Message, OutboundFrame};
use recipechat_proto::room::{CreateRoomRequest, CreateRoomResponse, ErrorBody, RoomId};
use recipechat_proto::user::{Contact, UserId};
use serde::Deserialize;
use tokio::sync::broadcast;

use crate::store::{BackendStore, StoreError};

/// Shared backend state.
pub struct BackendState {
    /// Roster, rooms and messages.
    pub store: BackendStore,
    /// Signals every open realtime connection to close.
    shutdown: broadcast::Sender<()>,
}

impl Default for BackendState {
    fn default() -> Self {
        Self::new(BackendStore::default())
    }
}

impl BackendState {
    /// Wraps a store in fresh backend state.
    #[must_use]
    pub fn new(store: BackendStore) -> Self {
        let (shutdown, _) = broadcast::channel(4);
        Self { store, shutdown }
    }

    /// Sends a close frame on every open realtime connection.
    ///
    /// Returns the number of connections signalled.
    pub fn close_all_connections(&self) -> usize {
        let signalled = self.shutdown.send(()).unwrap_or(0);
        tracing::info!(signalled, "closing all realtime connections");
        signalled
    }
}

/// Request rejections, rendered as `{"error": ..}` JSON bodies.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or undecodable credential, or unknown caller.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The request names an invalid peer.
    #[error("{0}")]
    BadRequest(String),

    /// The caller may not access the room.
    #[error("{0}")]
    Forbidden(String),

    /// The referenced user or room does not exist.
    #[error("{0}")]
    NotFound(String),
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::SelfConversation => Self::BadRequest(err.to_string()),
            StoreError::UnknownUser(_) | StoreError::UnknownRoom(_) => {
                Self::NotFound(err.to_string())
            }
            StoreError::NotParticipant { .. } => Self::Forbidden(err.to_string()),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match self {
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
        };
        let body = ErrorBody {
            error: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Query string of the realtime endpoint.
#[derive(Debug, Deserialize)]
struct TokenQuery {
    #[serde(default)]
    token: Option<String>,
}

/// Resolves a raw token to a known user.
async fn authenticate_token(state: &BackendState, token: Option<&str>) -> Result<UserId, ApiError> {
    let token = token.ok_or_else(|| ApiError::Unauthorized("missing credential".to_string()))?;
    let user = Credential::new(token)
        .subject()
        .map_err(|e| ApiError::Unauthorized(e.to_string()))?;
    if !state.store.has_user(&user).await {
        return Err(ApiError::Unauthorized(format!("unknown user {user}")));
    }
    Ok(user)
}

/// Resolves the `Authorization: Bearer` header to a known user.
async fn authenticate(state: &BackendState, headers: &HeaderMap) -> Result<UserId, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "));
    authenticate_token(state, token).await
}

async fn contacts_handler(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
) -> Result<Json<Vec<Contact>>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    tracing::debug!(caller = %caller, "listing contacts");
    Ok(Json(state.store.contacts().await))
}

async fn create_room_handler(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Json(body): Json<CreateRoomRequest>,
) -> Result<Json<CreateRoomResponse>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let room_name = state
        .store
        .get_or_create_room(&caller, &body.peer_id)
        .await
        .inspect_err(|e| {
            tracing::warn!(
                caller = %caller,
                peer = %body.peer_id,
                error = %e,
                "room negotiation rejected"
            );
        })?;
    Ok(Json(CreateRoomResponse { room_name }))
}

async fn messages_handler(
    State(state): State<Arc<BackendState>>,
    headers: HeaderMap,
    Path(room): Path<String>,
) -> Result<Json<Vec<Message>>, ApiError> {
    let caller = authenticate(&state, &headers).await?;
    let messages = state.store.messages(&RoomId::new(room), &caller).await?;
    Ok(Json(messages))
}

/// Authenticates, subscribes to the room feed, then upgrades.
///
/// Subscriptions are taken before the upgrade so every message posted (and
/// every shutdown signalled) after the client sees the handshake complete
/// reaches this connection.
async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<BackendState>>,
    Path(room): Path<String>,
    Query(query): Query<TokenQuery>,
) -> Result<Response, ApiError> {
    let user = authenticate_token(&state, query.token.as_deref()).await?;
    let room = RoomId::new(room);
    let feed = state.store.subscribe(&room, &user).await?;
    let shutdown = state.shutdown.subscribe();
    tracing::info!(room = %room, user = %user, "realtime connection accepted");
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, room, user, feed, shutdown, state)))
}

/// Runs one realtime connection until either side closes.
async fn handle_socket(
    socket: WebSocket,
    room: RoomId,
    user: UserId,
    mut feed: broadcast::Receiver<Message>,
    mut shutdown: broadcast::Receiver<()>,
    state: Arc<BackendState>,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();

    loop {
        tokio::select! {
            inbound = ws_receiver.next() => match inbound {
                Some(Ok(WsMessage::Text(text))) => {
                    handle_client_frame(&state, &room, &user, text.as_str()).await;
                }
                Some(Ok(WsMessage::Close(_))) | None => {
                    tracing::info!(room = %room, user = %user, "client closed realtime connection");
                    break;
                }
                Some(Ok(_)) => {
                    // Ignore binary, ping and pong frames.
                }
                Some(Err(e)) => {
                    tracing::warn!(room = %room, user = %user, error = %e, "realtime read error");
                    break;
                }
            },
            outbound = feed.recv() => match outbound {
                Ok(message) => {
                    let Ok(json) = serde_json::to_string(&message) else {
                        continue;
                    };
                    if ws_sender.send(WsMessage::Text(json.into())).await.is_err() {
                        tracing::warn!(room = %room, user = %user, "realtime write failed");
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::warn!(room = %room, user = %user, skipped, "subscriber lagged, messages skipped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
            _ = shutdown.recv() => {
                let _ = ws_sender.send(WsMessage::Close(None)).await;
                break;
            }
        }
    }

    tracing::info!(room = %room, user = %user, "realtime connection finished");
}

/// Persists and broadcasts one client frame; malformed frames are skipped.
async fn handle_client_frame(state: &BackendState, room: &RoomId, user: &UserId, text: &str) {
    let frame: OutboundFrame = match serde_json::from_str(text) {
        Ok(f) => f,
        Err(e) => {
            tracing::warn!(room = %room, user = %user, error = %e, "malformed client frame, skipping");
            return;
        }
    };
    if frame.message.trim().is_empty() {
        tracing::debug!(room = %room, user = %user, "ignoring blank message");
        return;
    }
    if let Err(e) = state.store.post(room, user, frame.message).await {
        tracing::warn!(room = %room, user = %user, error = %e, "failed to post message");
    }
}

/// Builds the backend router.
pub fn router(state: Arc<BackendState>) -> axum::Router {
    axum::Router::new()
        .route("/api/contacts", axum::routing::get(contacts_handler))
        .route("/api/chat/room", axum::routing::post(create_room_handler))
        .route(
            "/api/chat/room/{room}/messages",
            axum::routing::get(messages_handler),
        )
        .route("/ws/chat/{room}", axum::routing::get(ws_handler))
        .with_state(state)
}

/// Starts the backend with an empty roster.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server(
    addr: &str,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    start_server_with_state(addr, Arc::new(BackendState::default())).await
}

/// Starts the backend with pre-built state and returns the bound address.
///
/// This is the entry point used by both `main.rs` and test code.
///
/// # Errors
///
/// Returns an error if the TCP listener cannot bind to the given address.
pub async fn start_server_with_state(
    addr: &str,
    state: Arc<BackendState>,
) -> Result<
    (std::net::SocketAddr, tokio::task::JoinHandle<()>),
    Box<dyn std::error::Error + Send + Sync>,
> {
    let app = router(state);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let bound_addr = listener.local_addr()?;

    let handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            tracing::error!(error = %e, "backend server error");
        }
    });

    Ok((bound_addr, handle))
}
