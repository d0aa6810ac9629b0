//! Integration tests for overlapping selections.
//!
//! A selection superseded while one of its network steps is in flight must
//! leave no trace: no room, history or channel of the stale flow may reach
//! the session, and at most one channel is live at any time.

use std::sync::Arc;
use std::time::Duration;

use chrono::{TimeZone, Utc};
use parking_lot::Mutex;
use recipechat::api::ChatApi;
use recipechat::channel::loopback::LoopbackConnector;
use recipechat::config::SessionConfig;
use recipechat::error::ChatError;
use recipechat::identity::SessionContext;
use recipechat::session::{ConversationSession, Selection, SessionEvent, SessionPhase};
use recipechat_proto::credential::dev_token;
use recipechat_proto::message::Message;
use recipechat_proto::room::RoomId;
use recipechat_proto::user::{Contact, UserId};
use tokio::sync::Notify;

/// Which backend call to hold open for the gated peer.
#[derive(Clone, Copy, PartialEq, Eq)]
enum GateAt {
    Negotiation,
    History,
}

/// Backend double that parks requests concerning one peer until released.
struct GatedApi {
    me: UserId,
    gated_peer: UserId,
    gate_at: GateAt,
    entered: Notify,
    release: Notify,
    calls: Mutex<Vec<String>>,
    reject_gated: bool,
}

impl GatedApi {
    fn new(gated_peer: &str, gate_at: GateAt) -> Self {
        Self {
            me: UserId::new("u1"),
            gated_peer: UserId::new(gated_peer),
            gate_at,
            entered: Notify::new(),
            release: Notify::new(),
            calls: Mutex::new(Vec::new()),
            reject_gated: false,
        }
    }

    /// Like [`GatedApi::new`], but the parked call answers with a rejected
    /// credential once released.
    fn rejecting(gated_peer: &str, gate_at: GateAt) -> Self {
        Self {
            reject_gated: true,
            ..Self::new(gated_peer, gate_at)
        }
    }

    async fn maybe_park(&self, at: GateAt, peer: &UserId) {
        if at == self.gate_at && *peer == self.gated_peer {
            self.entered.notify_one();
            self.release.notified().await;
        }
    }
}

impl ChatApi for GatedApi {
    async fn fetch_contacts(&self) -> Result<Vec<Contact>, ChatError> {
        Ok(Vec::new())
    }

    async fn create_room(&self, peer: &UserId) -> Result<RoomId, ChatError> {
        self.calls.lock().push(format!("room:{peer}"));
        self.maybe_park(GateAt::Negotiation, peer).await;
        if self.reject_gated && *peer == self.gated_peer {
            return Err(ChatError::CredentialInvalid("expired".into()));
        }
        Ok(RoomId::for_pair(&self.me, peer))
    }

    async fn fetch_messages(&self, room: &RoomId) -> Result<Vec<Message>, ChatError> {
        self.calls.lock().push(format!("history:{room}"));
        let peer = if room.as_str().contains(self.gated_peer.as_str()) {
            self.gated_peer.clone()
        } else {
            UserId::new("")
        };
        self.maybe_park(GateAt::History, &peer).await;
        let at = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        Ok(vec![Message::new(UserId::new("u1"), format!("from {room}"), at)])
    }
}

fn context() -> SessionContext {
    let config = SessionConfig {
        connect_timeout: Duration::from_secs(2),
        ..SessionConfig::default()
    };
    SessionContext::from_token(Some(dev_token("u1").expose()), config).unwrap()
}

fn bo() -> Contact {
    Contact::new("u2", "bo")
}

fn cy() -> Contact {
    Contact::new("u3", "cy")
}

/// Poll `cond` until it holds.
async fn wait_until(cond: impl Fn() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !cond() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not met within 5s");
}

#[tokio::test]
async fn stale_negotiation_does_not_affect_newer_selection() {
    let api = Arc::new(GatedApi::new("u2", GateAt::Negotiation));
    let connector = Arc::new(LoopbackConnector::new());
    let (session, _events) =
        ConversationSession::new(context(), Arc::clone(&api), Arc::clone(&connector));

    let bo_contact = bo();
    let (first, second) = tokio::join!(session.select_contact(&bo_contact), async {
        api.entered.notified().await;
        let second = session.select_contact(&cy()).await;
        api.release.notify_one();
        second
    });

    assert_eq!(first.unwrap(), Selection::Superseded);
    assert_eq!(second.unwrap(), Selection::Active(RoomId::new("room_u1_u3")));

    assert_eq!(session.phase(), SessionPhase::Active);
    assert_eq!(session.selected_contact(), Some(cy()));
    assert_eq!(session.active_room(), Some(RoomId::new("room_u1_u3")));
    let bodies: Vec<String> = session.messages().into_iter().map(|m| m.message).collect();
    assert_eq!(bodies, ["from room_u1_u3"]);

    // The stale flow stopped before fetching history or opening a channel.
    assert!(!api.calls.lock().contains(&"history:room_u1_u2".to_string()));
    assert_eq!(connector.open_count(), 1);
    assert_eq!(connector.live_count(), 1);
}

#[tokio::test]
async fn stale_history_is_discarded() {
    let api = Arc::new(GatedApi::new("u2", GateAt::History));
    let connector = Arc::new(LoopbackConnector::new());
    let (session, _events) =
        ConversationSession::new(context(), Arc::clone(&api), Arc::clone(&connector));

    let bo_contact = bo();
    let (first, second) = tokio::join!(session.select_contact(&bo_contact), async {
        api.entered.notified().await;
        let second = session.select_contact(&cy()).await;
        api.release.notify_one();
        second
    });

    assert_eq!(first.unwrap(), Selection::Superseded);
    assert_eq!(second.unwrap(), Selection::Active(RoomId::new("room_u1_u3")));
    let bodies: Vec<String> = session.messages().into_iter().map(|m| m.message).collect();
    assert_eq!(bodies, ["from room_u1_u3"]);
    assert_eq!(connector.open_count(), 1);
}

#[tokio::test]
async fn stale_handshake_is_closed() {
    let api = Arc::new(GatedApi::new("nobody", GateAt::Negotiation));
    let connector = Arc::new(LoopbackConnector::manual());
    let (session, _events) =
        ConversationSession::new(context(), Arc::clone(&api), Arc::clone(&connector));

    let bo_contact = bo();
    let (first, (second, stale_remote)) = tokio::join!(session.select_contact(&bo_contact), async {
        wait_until(|| connector.open_count() == 1).await;
        let stale_remote = connector.last_remote().unwrap();

        let accept_newer = async {
            wait_until(|| connector.open_count() == 2).await;
            assert!(connector.last_remote().unwrap().accept());
        };
        let cy_contact = cy();
        let (second, ()) = tokio::join!(session.select_contact(&cy_contact), accept_newer);
        (second, stale_remote)
    });

    assert_eq!(first.unwrap(), Selection::Superseded);
    assert_eq!(second.unwrap(), Selection::Active(RoomId::new("room_u1_u3")));

    assert_eq!(stale_remote.room(), &RoomId::new("room_u1_u2"));
    assert!(stale_remote.client_closed());
    assert!(!stale_remote.accept(), "a closed channel cannot open");
    assert_eq!(connector.live_count(), 1);
    assert_eq!(session.active_room(), Some(RoomId::new("room_u1_u3")));
}

#[tokio::test]
async fn sequential_selections_keep_one_live_channel() {
    let api = Arc::new(GatedApi::new("nobody", GateAt::Negotiation));
    let connector = Arc::new(LoopbackConnector::new());
    let (session, _events) =
        ConversationSession::new(context(), Arc::clone(&api), Arc::clone(&connector));

    for contact in [bo(), cy(), bo()] {
        let selection = session.select_contact(&contact).await.unwrap();
        assert!(matches!(selection, Selection::Active(_)));
        assert_eq!(connector.live_count(), 1);
    }
    assert_eq!(connector.open_count(), 3);

    let remotes = connector.remotes();
    assert!(remotes[0].client_closed());
    assert!(remotes[1].client_closed());
    assert!(!remotes[2].client_closed());
}

#[tokio::test]
async fn close_supersedes_in_flight_selection() {
    let api = Arc::new(GatedApi::new("u2", GateAt::Negotiation));
    let connector = Arc::new(LoopbackConnector::new());
    let (session, _events) =
        ConversationSession::new(context(), Arc::clone(&api), Arc::clone(&connector));

    let bo_contact = bo();
    let (first, ()) = tokio::join!(session.select_contact(&bo_contact), async {
        api.entered.notified().await;
        session.close();
        api.release.notify_one();
    });

    assert_eq!(first.unwrap(), Selection::Superseded);
    assert_eq!(session.phase(), SessionPhase::Idle);
    assert!(session.active_room().is_none());
    assert_eq!(connector.open_count(), 0);
}

#[tokio::test]
async fn stale_credential_rejection_still_marks_session_unauthenticated() {
    let api = Arc::new(GatedApi::rejecting("u2", GateAt::Negotiation));
    let connector = Arc::new(LoopbackConnector::new());
    let (session, mut events) =
        ConversationSession::new(context(), Arc::clone(&api), Arc::clone(&connector));

    let bo_contact = bo();
    let (first, second) = tokio::join!(session.select_contact(&bo_contact), async {
        api.entered.notified().await;
        let second = session.select_contact(&cy()).await;
        api.release.notify_one();
        second
    });

    // The stale flow's outcome does not touch the newer conversation...
    assert_eq!(first.unwrap(), Selection::Superseded);
    assert_eq!(second.unwrap(), Selection::Active(RoomId::new("room_u1_u3")));
    assert_eq!(session.phase(), SessionPhase::Active);

    // ...but the credential it exposed as rejected is the session's own.
    assert!(!session.is_authenticated());
    let mut rejected = 0;
    while let Ok(event) = events.try_recv() {
        if event == SessionEvent::CredentialRejected {
            rejected += 1;
        }
    }
    assert_eq!(rejected, 1);
}
