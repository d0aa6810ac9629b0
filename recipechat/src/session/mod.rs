//! Conversation session: one caller, at most one selected contact at a time.
//!
//! Selecting a contact runs a multi-step flow:
//!
//! ```text
//! teardown ─► Negotiating ─► LoadingHistory ─► Connecting ─► Active
//!                  │               │                │
//!                  └───────────────┴────────────────┴─► SelectionFailed
//! ```
//!
//! Each selection bumps a generation counter held with the rest of the state.
//! A flow re-checks its generation under the lock before every mutation it
//! makes after an `.await`; once a newer selection (or `close`) has started,
//! the older flow applies nothing, closes any channel it opened and returns
//! [`Selection::Superseded`].
//!
//! State lives in a [`parking_lot::Mutex`] that is never held across an
//! `.await`. Channel callbacks run on the connector's driver task and lock it
//! briefly.

use std::collections::VecDeque;
use std::future::Future;
use std::sync::{Arc, Weak};

use chrono::Utc;
use parking_lot::Mutex;
use recipechat_proto::message::Message;
use recipechat_proto::room::RoomId;
use recipechat_proto::user::{Contact, UserId};
use tokio::sync::mpsc;

use crate::api::ChatApi;
use crate::channel::{ChannelEvent, ChannelHandle, ChannelState, Connector, EventCallback};
use crate::config::EchoPolicy;
use crate::directory::list_contacts;
use crate::error::{ChatError, ErrorKind};
use crate::history::load_history;
use crate::identity::SessionContext;
use crate::room::negotiate_room;

/// Why the last selection did not reach [`SessionPhase::Active`], or why an
/// active conversation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    /// Error kind.
    pub kind: ErrorKind,
    /// Whether selecting the contact again may succeed.
    pub retryable: bool,
    /// Human-readable description.
    pub detail: String,
}

impl From<&ChatError> for Failure {
    fn from(err: &ChatError) -> Self {
        Self {
            kind: err.kind(),
            retryable: err.is_retryable(),
            detail: err.to_string(),
        }
    }
}

/// Where the session is in the selection flow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionPhase {
    /// No contact selected.
    Idle,
    /// Obtaining the room for the selected contact.
    Negotiating,
    /// Fetching the room's history.
    LoadingHistory,
    /// Waiting for the realtime channel to open.
    Connecting,
    /// Channel open; messages can be sent.
    Active,
    /// The selection failed or the active channel was lost.
    SelectionFailed(Failure),
}

/// Outcome of [`ConversationSession::select_contact`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    /// The conversation is active in this room.
    Active(RoomId),
    /// A newer selection took over; nothing from this one was applied.
    Superseded,
}

/// Notifications for a UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The phase changed.
    PhaseChanged(SessionPhase),
    /// History for the selected room replaced the message list.
    HistoryLoaded {
        /// The room whose history was loaded.
        room: RoomId,
        /// Number of messages loaded.
        count: usize,
    },
    /// A message was appended to the list.
    MessageAppended(Message),
    /// The backend rejected the session credential.
    CredentialRejected,
}

#[derive(Debug)]
struct SessionState {
    generation: u64,
    phase: SessionPhase,
    selected: Option<Contact>,
    room: Option<RoomId>,
    /// Room kept from a selection that failed after negotiation.
    retained: Option<(UserId, RoomId)>,
    messages: Vec<Message>,
    draft: String,
    channel: Option<ChannelHandle>,
    authenticated: bool,
    /// Locally appended bodies still awaiting their server echo.
    pending_echo: VecDeque<String>,
}

impl SessionState {
    fn set_phase(&mut self, phase: SessionPhase, events: &mpsc::Sender<SessionEvent>) {
        if self.phase != phase {
            tracing::debug!(generation = self.generation, ?phase, "session phase");
            self.phase = phase.clone();
            emit(events, SessionEvent::PhaseChanged(phase));
        }
    }
}

/// State shared with channel callbacks.
struct Inner {
    caller: UserId,
    echo: EchoPolicy,
    state: Mutex<SessionState>,
    events: mpsc::Sender<SessionEvent>,
}

fn emit(events: &mpsc::Sender<SessionEvent>, event: SessionEvent) {
    match events.try_send(event) {
        Ok(()) => {}
        Err(mpsc::error::TrySendError::Full(event)) => {
            tracing::warn!(?event, "session event buffer full, dropping event");
        }
        Err(mpsc::error::TrySendError::Closed(_)) => {}
    }
}

/// Ends an active conversation whose channel went away, retaining its room.
///
/// Before `Active` the selection flow observes the channel state itself.
fn channel_lost(
    state: &mut SessionState,
    events: &mpsc::Sender<SessionEvent>,
    detail: String,
) -> Option<ChannelHandle> {
    if state.phase != SessionPhase::Active {
        return None;
    }
    tracing::warn!(generation = state.generation, %detail, "conversation channel lost");
    if let (Some(contact), Some(room)) = (&state.selected, state.room.take()) {
        state.retained = Some((contact.id.clone(), room));
    }
    state.set_phase(
        SessionPhase::SelectionFailed(Failure {
            kind: ErrorKind::ChannelLost,
            retryable: true,
            detail,
        }),
        events,
    );
    state.channel.take()
}

impl Inner {
    /// Runs `f` only if `generation` is still the current selection.
    fn with_current<R>(
        &self,
        generation: u64,
        f: impl FnOnce(&mut SessionState, &mpsc::Sender<SessionEvent>) -> R,
    ) -> Option<R> {
        let mut state = self.state.lock();
        (state.generation == generation).then(|| f(&mut *state, &self.events))
    }

    fn on_channel_event(&self, generation: u64, event: ChannelEvent) {
        let lost = self.with_current(generation, |state, events| match event {
            ChannelEvent::Opened => None,
            ChannelEvent::Message(message) => {
                if self.is_own_echo(state, &message) {
                    tracing::debug!("suppressed server echo of local send");
                } else {
                    state.messages.push(message.clone());
                    emit(events, SessionEvent::MessageAppended(message));
                }
                None
            }
            ChannelEvent::Closed => {
                channel_lost(state, events, "channel closed by remote".to_string())
            }
            ChannelEvent::Failed(reason) => channel_lost(state, events, reason),
        });
        // Drop the dead handle outside the session lock.
        drop(lost);
    }

    /// Consumes the pending local copy matching a server echo, if any.
    fn is_own_echo(&self, state: &mut SessionState, message: &Message) -> bool {
        if self.echo != EchoPolicy::Local || message.sender != self.caller {
            return false;
        }
        match state
            .pending_echo
            .iter()
            .position(|body| *body == message.message)
        {
            Some(index) => {
                state.pending_echo.remove(index);
                true
            }
            None => false,
        }
    }

    fn note_credential(&self, err: &ChatError) {
        if err.kind() == ErrorKind::CredentialInvalid {
            let mut state = self.state.lock();
            if state.authenticated {
                tracing::warn!(caller = %self.caller, "session credential rejected");
                state.authenticated = false;
                emit(&self.events, SessionEvent::CredentialRejected);
            }
        }
    }
}

fn superseded(generation: u64) -> Selection {
    tracing::debug!(generation, "selection superseded");
    Selection::Superseded
}

/// A caller's direct-messaging session.
///
/// Generic over the backend API and the realtime connector so tests can
/// substitute in-process implementations.
pub struct ConversationSession<A: ChatApi, C: Connector> {
    ctx: SessionContext,
    api: A,
    connector: C,
    inner: Arc<Inner>,
}

impl<A: ChatApi, C: Connector> ConversationSession<A, C> {
    /// Creates an idle session and the receiver for its events.
    pub fn new(ctx: SessionContext, api: A, connector: C) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (tx, rx) = mpsc::channel(ctx.config.event_buffer.max(1));
        let inner = Arc::new(Inner {
            caller: ctx.caller.clone(),
            echo: ctx.config.echo,
            state: Mutex::new(SessionState {
                generation: 0,
                phase: SessionPhase::Idle,
                selected: None,
                room: None,
                retained: None,
                messages: Vec::new(),
                draft: String::new(),
                channel: None,
                authenticated: true,
                pending_echo: VecDeque::new(),
            }),
            events: tx,
        });
        let session = Self {
            ctx,
            api,
            connector,
            inner,
        };
        (session, rx)
    }

    /// The caller this session acts for.
    pub fn caller(&self) -> &UserId {
        &self.ctx.caller
    }

    /// Bounds an API call by the request timeout.
    async fn bounded<T>(
        &self,
        operation: &'static str,
        call: impl Future<Output = Result<T, ChatError>>,
    ) -> Result<T, ChatError> {
        let after = self.ctx.config.request_timeout;
        let result = tokio::time::timeout(after, call)
            .await
            .unwrap_or_else(|_| Err(ChatError::Timeout { operation, after }));
        // Applies to stale flows too: the credential is shared by every selection.
        if let Err(e) = &result {
            self.inner.note_credential(e);
        }
        result
    }

    /// Lists the contacts the caller can message.
    ///
    /// A failure leaves the session untouched.
    ///
    /// # Errors
    ///
    /// As [`list_contacts`], plus [`ChatError::Timeout`].
    pub async fn contacts(&self) -> Result<Vec<Contact>, ChatError> {
        self.bounded("contact listing", list_contacts(&self.api, &self.ctx.caller))
            .await
    }

    /// Opens the conversation with `contact`, replacing any current one.
    ///
    /// Returns [`Selection::Superseded`] if another selection started before
    /// this one finished.
    ///
    /// # Errors
    ///
    /// The error that moved the session to [`SessionPhase::SelectionFailed`].
    pub async fn select_contact(&self, contact: &Contact) -> Result<Selection, ChatError> {
        let (generation, retained) = self.begin_selection(contact);
        tracing::info!(generation, peer = %contact.id, "contact selected");

        let room = if let Some(room) = retained {
            tracing::debug!(room = %room, "reusing retained room");
            room
        } else {
            let negotiated = self
                .bounded(
                    "room negotiation",
                    negotiate_room(&self.api, &self.ctx.caller, &contact.id),
                )
                .await;
            let room = match negotiated {
                Ok(room) => room,
                Err(e) => return self.fail_selection(generation, e, None),
            };
            let applied = self.inner.with_current(generation, |state, events| {
                state.room = Some(room.clone());
                state.set_phase(SessionPhase::LoadingHistory, events);
            });
            if applied.is_none() {
                return Ok(superseded(generation));
            }
            room
        };

        let history = self
            .bounded("history load", load_history(&self.api, &room))
            .await;
        let history = match history {
            Ok(history) => history,
            Err(e) => return self.fail_selection(generation, e, Some(room)),
        };
        let applied = self.inner.with_current(generation, |state, events| {
            let count = history.len();
            state.messages = history;
            emit(
                events,
                SessionEvent::HistoryLoaded {
                    room: room.clone(),
                    count,
                },
            );
            state.set_phase(SessionPhase::Connecting, events);
        });
        if applied.is_none() {
            return Ok(superseded(generation));
        }

        let handle = self
            .connector
            .open(&room, &self.ctx.credential, self.callback(generation));
        let mut state_rx = handle.subscribe();
        if let Err(stale) = self.install_channel(generation, handle) {
            drop(stale);
            return Ok(superseded(generation));
        }

        let connect_timeout = self.ctx.config.connect_timeout;
        let settled = tokio::time::timeout(
            connect_timeout,
            state_rx.wait_for(|s| *s != ChannelState::Connecting),
        )
        .await
        .map(|r| r.map_or(ChannelState::Closed, |s| *s));
        let Ok(settled) = settled else {
            let err = ChatError::Timeout {
                operation: "realtime handshake",
                after: connect_timeout,
            };
            return self.fail_selection(generation, err, Some(room));
        };

        if settled == ChannelState::Open {
            let still_open = self.inner.with_current(generation, |state, events| {
                let open = state
                    .channel
                    .as_ref()
                    .is_some_and(|c| c.state() == ChannelState::Open);
                if open {
                    state.set_phase(SessionPhase::Active, events);
                }
                open
            });
            match still_open {
                None => return Ok(superseded(generation)),
                Some(true) => {
                    tracing::info!(generation, room = %room, "conversation active");
                    return Ok(Selection::Active(room));
                }
                Some(false) => {
                    let err = ChatError::ChannelFailed("channel dropped right after opening".into());
                    return self.fail_selection(generation, err, Some(room));
                }
            }
        }

        let failure = self
            .inner
            .with_current(generation, |state, _| {
                state.channel.as_ref().and_then(ChannelHandle::take_failure)
            })
            .flatten();
        let err = failure.unwrap_or_else(|| {
            ChatError::ChannelFailed(format!("channel {settled} before it opened"))
        });
        self.fail_selection(generation, err, Some(room))
    }

    /// Tears down the current conversation and starts a new generation.
    ///
    /// Returns the generation and the room retained for this peer, if any.
    fn begin_selection(&self, contact: &Contact) -> (u64, Option<RoomId>) {
        let (generation, retained, old_channel) = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            let old_channel = state.channel.take();
            state.messages.clear();
            state.pending_echo.clear();
            state.room = None;
            state.selected = Some(contact.clone());
            let retained = state
                .retained
                .take()
                .filter(|(peer, _)| *peer == contact.id)
                .map(|(_, room)| room);
            if let Some(room) = &retained {
                state.room = Some(room.clone());
                state.set_phase(SessionPhase::LoadingHistory, &self.inner.events);
            } else {
                state.set_phase(SessionPhase::Negotiating, &self.inner.events);
            }
            (state.generation, retained, old_channel)
        };
        drop(old_channel);
        (generation, retained)
    }

    fn callback(&self, generation: u64) -> EventCallback {
        let inner: Weak<Inner> = Arc::downgrade(&self.inner);
        Arc::new(move |event| {
            if let Some(inner) = inner.upgrade() {
                inner.on_channel_event(generation, event);
            }
        })
    }

    /// Stores the flow's channel, or hands it back if the flow is stale.
    fn install_channel(&self, generation: u64, handle: ChannelHandle) -> Result<(), ChannelHandle> {
        let mut state = self.inner.state.lock();
        if state.generation != generation {
            return Err(handle);
        }
        state.channel = Some(handle);
        Ok(())
    }

    /// Records a failed step, unless a newer selection has taken over.
    fn fail_selection(
        &self,
        generation: u64,
        err: ChatError,
        room: Option<RoomId>,
    ) -> Result<Selection, ChatError> {
        let dead_channel = self.inner.with_current(generation, |state, events| {
            state.room = None;
            if let (Some(contact), Some(room)) = (&state.selected, room) {
                state.retained = Some((contact.id.clone(), room));
            }
            state.set_phase(SessionPhase::SelectionFailed(Failure::from(&err)), events);
            state.channel.take()
        });
        let Some(dead_channel) = dead_channel else {
            return Ok(superseded(generation));
        };
        self.inner.note_credential(&err);
        drop(dead_channel);
        tracing::warn!(generation, error = %err, "selection failed");
        Err(err)
    }

    /// Sends `body` to the active conversation.
    ///
    /// With [`EchoPolicy::Server`] the message shows up once the backend
    /// broadcasts it back; with [`EchoPolicy::Local`] it is appended at once.
    ///
    /// # Errors
    ///
    /// - [`ChatError::ChannelNotOpen`] unless the session is `Active`.
    /// - [`ChatError::EmptyMessage`] if `body` is blank.
    pub fn send_message(&self, body: &str) -> Result<(), ChatError> {
        let mut state = self.inner.state.lock();
        if state.phase != SessionPhase::Active {
            return Err(ChatError::ChannelNotOpen);
        }
        let Some(channel) = state.channel.as_ref() else {
            return Err(ChatError::ChannelNotOpen);
        };
        channel.send(body)?;

        if self.inner.echo == EchoPolicy::Local {
            state.pending_echo.push_back(body.to_string());
            let message = Message::new(self.ctx.caller.clone(), body, Utc::now());
            state.messages.push(message.clone());
            emit(&self.inner.events, SessionEvent::MessageAppended(message));
        }
        Ok(())
    }

    /// Replaces the draft text.
    pub fn set_draft(&self, text: impl Into<String>) {
        self.inner.state.lock().draft = text.into();
    }

    /// The current draft text.
    #[must_use]
    pub fn draft(&self) -> String {
        self.inner.state.lock().draft.clone()
    }

    /// Sends the draft and clears it on success.
    ///
    /// # Errors
    ///
    /// As [`ConversationSession::send_message`]; the draft is kept on error.
    pub fn send_draft(&self) -> Result<(), ChatError> {
        let draft = self.draft();
        self.send_message(&draft)?;
        let mut state = self.inner.state.lock();
        if state.draft == draft {
            state.draft.clear();
        }
        Ok(())
    }

    /// Current phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.inner.state.lock().phase.clone()
    }

    /// The selected contact, if any.
    #[must_use]
    pub fn selected_contact(&self) -> Option<Contact> {
        self.inner.state.lock().selected.clone()
    }

    /// The room of the current conversation once negotiated.
    #[must_use]
    pub fn active_room(&self) -> Option<RoomId> {
        self.inner.state.lock().room.clone()
    }

    /// Snapshot of the conversation's messages in display order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.inner.state.lock().messages.clone()
    }

    /// `false` once the backend has rejected the credential.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.inner.state.lock().authenticated
    }

    /// Ends the current conversation and returns to [`SessionPhase::Idle`].
    ///
    /// Any selection still in flight is superseded.
    pub fn close(&self) {
        let channel = {
            let mut state = self.inner.state.lock();
            state.generation += 1;
            state.selected = None;
            state.room = None;
            state.retained = None;
            state.messages.clear();
            state.pending_echo.clear();
            state.set_phase(SessionPhase::Idle, &self.inner.events);
            state.channel.take()
        };
        drop(channel);
        tracing::info!(caller = %self.ctx.caller, "conversation closed");
    }
}
