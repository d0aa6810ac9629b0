//! Integration tests for the REST-backed components: contact directory, room
//! negotiation and history loading against the in-process backend.

use std::sync::Arc;
use std::time::Duration;

use recipechat::api::ChatApi;
use recipechat::api::http::HttpChatApi;
use recipechat::directory::list_contacts;
use recipechat::error::{ChatError, ErrorKind};
use recipechat::history::load_history;
use recipechat::room::negotiate_room;
use recipechat_backend::server::{BackendState, start_server_with_state};
use recipechat_backend::store::BackendStore;
use recipechat_proto::credential::{Credential, dev_token};
use recipechat_proto::room::RoomId;
use recipechat_proto::user::{Contact, UserId};

/// Start the backend in-process with users u1..u3 and return its API URL.
async fn start_backend() -> (String, Arc<BackendState>) {
    let store = BackendStore::new(vec![
        Contact::new("u1", "ana"),
        Contact::new("u2", "bo"),
        Contact::new("u3", "cy"),
    ]);
    let state = Arc::new(BackendState::new(store));
    let (addr, _handle) = start_server_with_state("127.0.0.1:0", Arc::clone(&state))
        .await
        .expect("failed to start backend");
    (format!("http://{addr}/api"), state)
}

fn api_as(api_url: &str, user: &str) -> HttpChatApi {
    HttpChatApi::new(api_url, dev_token(user), Duration::from_secs(5))
}

fn uid(id: &str) -> UserId {
    UserId::new(id)
}

// =============================================================================
// Contact directory
// =============================================================================

#[tokio::test]
async fn contacts_exclude_the_caller() {
    let (api_url, _state) = start_backend().await;
    let api = api_as(&api_url, "u1");

    let roster = api.fetch_contacts().await.unwrap();
    assert_eq!(roster.len(), 3, "backend roster includes the caller");

    let contacts = list_contacts(&api, &uid("u1")).await.unwrap();
    let ids: Vec<&str> = contacts.iter().map(|c| c.id.as_str()).collect();
    assert_eq!(ids, ["u2", "u3"]);
}

#[tokio::test]
async fn rejected_credential_is_not_retryable() {
    let (api_url, _state) = start_backend().await;
    let api = api_as(&api_url, "stranger");

    let err = list_contacts(&api, &uid("stranger")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::CredentialInvalid);
    assert!(!err.is_retryable());
}

#[tokio::test]
async fn garbage_credential_is_rejected() {
    let (api_url, _state) = start_backend().await;
    let api = HttpChatApi::new(&api_url, Credential::new("garbage"), Duration::from_secs(5));

    let err = api.fetch_contacts().await.unwrap_err();
    assert!(matches!(err, ChatError::CredentialInvalid(_)));
}

#[tokio::test]
async fn unreachable_backend_is_retryable() {
    let api = api_as("http://127.0.0.1:1/api", "u1");
    let err = list_contacts(&api, &uid("u1")).await.unwrap_err();
    assert!(err.is_retryable(), "unexpected error: {err:?}");
}

// =============================================================================
// Room negotiation
// =============================================================================

#[tokio::test]
async fn negotiation_is_idempotent_and_symmetric() {
    let (api_url, state) = start_backend().await;
    let from_u1 = api_as(&api_url, "u1");
    let from_u2 = api_as(&api_url, "u2");

    let first = negotiate_room(&from_u1, &uid("u1"), &uid("u2")).await.unwrap();
    let second = negotiate_room(&from_u1, &uid("u1"), &uid("u2")).await.unwrap();
    let reverse = negotiate_room(&from_u2, &uid("u2"), &uid("u1")).await.unwrap();

    assert_eq!(first, RoomId::new("room_u1_u2"));
    assert_eq!(first, second);
    assert_eq!(first, reverse);
    assert_eq!(state.store.rooms_created(), 1);
}

#[tokio::test]
async fn distinct_pairs_get_distinct_rooms() {
    let (api_url, state) = start_backend().await;
    let api = api_as(&api_url, "u1");

    let with_u2 = negotiate_room(&api, &uid("u1"), &uid("u2")).await.unwrap();
    let with_u3 = negotiate_room(&api, &uid("u1"), &uid("u3")).await.unwrap();
    assert_ne!(with_u2, with_u3);
    assert_eq!(state.store.rooms_created(), 2);
}

#[tokio::test]
async fn self_conversation_never_reaches_backend() {
    let (api_url, state) = start_backend().await;
    let api = api_as(&api_url, "u1");

    let err = negotiate_room(&api, &uid("u1"), &uid("u1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPeer);
    assert_eq!(state.store.rooms_created(), 0);
}

#[tokio::test]
async fn backend_rejections_are_invalid_peer() {
    let (api_url, _state) = start_backend().await;
    let api = api_as(&api_url, "u1");

    // Unknown peer: 404.
    let err = negotiate_room(&api, &uid("u1"), &uid("nobody")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPeer);
    assert!(!err.is_retryable());

    // Bypassing the local check: the backend answers 400.
    let err = api.create_room(&uid("u1")).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidPeer);
}

#[tokio::test]
async fn underscored_ids_get_distinct_rooms() {
    let (api_url, state) = start_backend().await;
    for (id, name) in [("a", "al"), ("a_b", "abe"), ("b_c", "bec"), ("c", "cas")] {
        state.store.add_user(Contact::new(id, name)).await;
    }

    let joined_first = negotiate_room(&api_as(&api_url, "a_b"), &uid("a_b"), &uid("c"))
        .await
        .unwrap();
    let joined_last = negotiate_room(&api_as(&api_url, "a"), &uid("a"), &uid("b_c"))
        .await
        .unwrap();
    assert_ne!(joined_first, joined_last);
    assert_eq!(state.store.rooms_created(), 2);

    // Both pairs can read their own room through the escaped path.
    state
        .store
        .post(&joined_last, &uid("b_c"), "mine".into())
        .await
        .unwrap();
    let history = load_history(&api_as(&api_url, "a"), &joined_last).await.unwrap();
    let bodies: Vec<&str> = history.iter().map(|m| m.message.as_str()).collect();
    assert_eq!(bodies, ["mine"]);
    assert!(
        load_history(&api_as(&api_url, "c"), &joined_first)
            .await
            .unwrap()
            .is_empty()
    );
}

// =============================================================================
// History
// =============================================================================

#[tokio::test]
async fn fresh_room_has_empty_history() {
    let (api_url, _state) = start_backend().await;
    let api = api_as(&api_url, "u1");

    let room = negotiate_room(&api, &uid("u1"), &uid("u3")).await.unwrap();
    let history = load_history(&api, &room).await.unwrap();
    assert!(history.is_empty());
}

#[tokio::test]
async fn history_is_ascending_and_shared() {
    let (api_url, state) = start_backend().await;
    let api = api_as(&api_url, "u1");
    let room = negotiate_room(&api, &uid("u1"), &uid("u2")).await.unwrap();

    state.store.post(&room, &uid("u2"), "hi".into()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(5)).await;
    state
        .store
        .post(&room, &uid("u1"), "hello back".into())
        .await
        .unwrap();

    let seen_by_u1 = load_history(&api, &room).await.unwrap();
    let seen_by_u2 = load_history(&api_as(&api_url, "u2"), &room).await.unwrap();
    assert_eq!(seen_by_u1, seen_by_u2);

    let pairs: Vec<(&str, &str)> = seen_by_u1
        .iter()
        .map(|m| (m.sender.as_str(), m.message.as_str()))
        .collect();
    assert_eq!(pairs, [("u2", "hi"), ("u1", "hello back")]);
    assert!(seen_by_u1[0].timestamp <= seen_by_u1[1].timestamp);
    assert!(seen_by_u1.iter().all(|m| m.id.is_some()));
}

#[tokio::test]
async fn outsiders_cannot_read_history() {
    let (api_url, _state) = start_backend().await;
    let room = negotiate_room(&api_as(&api_url, "u1"), &uid("u1"), &uid("u2"))
        .await
        .unwrap();

    let err = load_history(&api_as(&api_url, "u3"), &room).await.unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HistoryUnavailable);

    let err = load_history(&api_as(&api_url, "u1"), &RoomId::new("room_x_y"))
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::HistoryUnavailable);
}
