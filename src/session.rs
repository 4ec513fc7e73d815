// SPDX-License-Identifier: AGPL-3.0-or-later

//! Connection manager / router: owns the set of live client sessions,
//! dispatches inbound messages to the right document authority, and
//! broadcasts outbound messages scoped to a document, excluding the origin.
//!
//! Fan-out never happens under a document's lock: the document authority
//! already serializes its own state behind its actor, and here the router
//! snapshots the recipient set before dispatching so a slow or closed
//! transport never stalls its peers (spec §9, "session fan-out without
//! head-of-line blocking").

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use rand::Rng;
use tokio::sync::mpsc;
use tracing::warn;

use crate::authority::DocumentRegistry;
use crate::error::ProtocolError;
use crate::presence::PresenceStore;
use crate::protocol::{ClientMessage, ServerMessage};

/// Cursor bursts within this window are coalesced to a single broadcast, so
/// cursor chatter never competes with edit processing for a session's
/// outbound queue.
const CURSOR_COALESCE_WINDOW: Duration = Duration::from_millis(50);

pub const OUTBOUND_QUEUE_CAPACITY: usize = 256;

struct SessionState {
    user_id: String,
    doc_id: StdMutex<Option<String>>,
    outbound_tx: mpsc::Sender<ServerMessage>,
    last_cursor_broadcast: StdMutex<Option<Instant>>,
}

pub struct SessionRouter {
    sessions: DashMap<String, Arc<SessionState>>,
    documents: Arc<DocumentRegistry>,
    presence: Arc<dyn PresenceStore>,
    next_session_id: AtomicU64,
}

impl SessionRouter {
    pub fn new(documents: Arc<DocumentRegistry>, presence: Arc<dyn PresenceStore>) -> Self {
        Self {
            sessions: DashMap::new(),
            documents,
            presence,
            next_session_id: AtomicU64::new(1),
        }
    }

    /// Registers a new session for an already-authenticated connection and
    /// returns its id plus the receiving half of its outbound queue. The
    /// caller owns pumping that queue onto the actual transport; that pump is
    /// this session's single writer (spec §5).
    pub fn on_connect(&self, user_id: String) -> (String, mpsc::Receiver<ServerMessage>) {
        let ordinal = self.next_session_id.fetch_add(1, Ordering::Relaxed);
        let random: u32 = rand::thread_rng().gen();
        let session_id = format!("sess-{ordinal:x}-{random:x}");

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_CAPACITY);
        let state = Arc::new(SessionState {
            user_id,
            doc_id: StdMutex::new(None),
            outbound_tx,
            last_cursor_broadcast: StdMutex::new(None),
        });
        self.sessions.insert(session_id.clone(), state);
        (session_id, outbound_rx)
    }

    /// Idempotent: if the session already left (or never joined), this is a
    /// no-op.
    pub async fn on_disconnect(&self, session_id: &str) {
        self.drop_session(session_id).await;
    }

    /// Removes a session and, if it had joined a document, leaves presence
    /// and broadcasts `USER_LEFT`. Used both for a clean disconnect and for
    /// a session whose outbound queue has backed up: the overflow policy is
    /// drop-the-session, so a stuck transport can't silently miss ops
    /// forever while still counting as a broadcast recipient.
    async fn drop_session(&self, session_id: &str) {
        let Some((_, state)) = self.sessions.remove(session_id) else {
            return;
        };
        let doc_id = state.doc_id.lock().expect("doc_id mutex poisoned").take();
        if let Some(doc_id) = doc_id {
            self.presence.leave(&doc_id, &state.user_id).await;
            self.broadcast_excluding(&doc_id, session_id, ServerMessage::UserLeft { user_id: state.user_id.clone() })
                .await;
        }
    }

    pub async fn on_message(&self, session_id: &str, message: ClientMessage) {
        match message {
            ClientMessage::JoinDocument { doc_id } => self.handle_join(session_id, doc_id).await,
            ClientMessage::ApplyOp { op } => self.handle_apply_op(session_id, op).await,
            ClientMessage::CursorUpdate { position } => self.handle_cursor_update(session_id, position).await,
        }
    }

    /// Decode failures never reach `on_message`; callers turn them directly
    /// into this single `ERROR` reply.
    pub async fn send_malformed_message_error(&self, session_id: &str) {
        self.send_to(
            session_id,
            ServerMessage::Error {
                message: "Invalid message format".to_string(),
                kind: Some(ProtocolError::MalformedMessage.kind()),
            },
        )
        .await;
    }

    async fn handle_join(&self, session_id: &str, doc_id: String) {
        let Some(state) = self.session(session_id) else { return };

        let previous = state.doc_id.lock().expect("doc_id mutex poisoned").clone();
        if let Some(previous_doc_id) = previous {
            self.leave_document(&state, session_id, &previous_doc_id).await;
        }

        let authority = match self.documents.load_or_attach(&doc_id).await {
            Ok(authority) => authority,
            Err(err) => {
                self.send_protocol_error(session_id, err.into()).await;
                return;
            }
        };

        self.presence.join(&doc_id, &state.user_id).await;
        *state.doc_id.lock().expect("doc_id mutex poisoned") = Some(doc_id.clone());

        let (content, version) = authority.snapshot().await;
        let cursors = self.presence.get_cursors(&doc_id).await;
        self.send_to(session_id, ServerMessage::SyncState { content, version, cursors }).await;

        self.broadcast_excluding(&doc_id, session_id, ServerMessage::UserJoined { user_id: state.user_id.clone() })
            .await;
    }

    async fn handle_apply_op(&self, session_id: &str, mut op: crate::ot::Operation) {
        let Some(state) = self.session(session_id) else { return };
        let Some(doc_id) = state.doc_id.lock().expect("doc_id mutex poisoned").clone() else {
            self.send_protocol_error(session_id, ProtocolError::Invalid("no document joined".to_string()))
                .await;
            return;
        };

        // The server is the sole transformer; never trust the client's claim
        // about its own identity.
        op.user_id.clone_from(&state.user_id);
        op.doc_id.clone_from(&doc_id);

        let authority = match self.documents.load_or_attach(&doc_id).await {
            Ok(authority) => authority,
            Err(err) => {
                self.send_protocol_error(session_id, err.into()).await;
                return;
            }
        };

        match authority.apply_operation(op.clone()).await {
            Ok(outcome) => {
                self.send_to(
                    session_id,
                    ServerMessage::AckOp { op_id: op.op_id.clone(), new_version: outcome.version },
                )
                .await;
                if !outcome.is_noop {
                    self.broadcast_excluding(&doc_id, session_id, ServerMessage::BroadcastOp { op: outcome.transformed })
                        .await;
                }
            }
            Err(err) => self.send_protocol_error(session_id, err.into()).await,
        }
    }

    async fn handle_cursor_update(&self, session_id: &str, position: usize) {
        let Some(state) = self.session(session_id) else { return };
        let Some(doc_id) = state.doc_id.lock().expect("doc_id mutex poisoned").clone() else {
            return;
        };

        self.presence.update_cursor(&doc_id, &state.user_id, position).await;

        let should_broadcast = {
            let mut last = state.last_cursor_broadcast.lock().expect("cursor mutex poisoned");
            let now = Instant::now();
            let due = last.map_or(true, |at| now.duration_since(at) >= CURSOR_COALESCE_WINDOW);
            if due {
                *last = Some(now);
            }
            due
        };
        if should_broadcast {
            self.broadcast_excluding(
                &doc_id,
                session_id,
                ServerMessage::CursorUpdate { user_id: state.user_id.clone(), position },
            )
            .await;
        }
    }

    async fn leave_document(&self, state: &SessionState, session_id: &str, doc_id: &str) {
        self.presence.leave(doc_id, &state.user_id).await;
        self.broadcast_excluding(doc_id, session_id, ServerMessage::UserLeft { user_id: state.user_id.clone() })
            .await;
    }

    fn session(&self, session_id: &str) -> Option<Arc<SessionState>> {
        self.sessions.get(session_id).map(|entry| entry.value().clone())
    }

    /// On a full or closed outbound queue the overflow policy is
    /// drop-the-session rather than drop-the-message: a session that can't
    /// keep up would otherwise sit registered forever, silently missing
    /// every subsequent op and broadcast while still counted as a recipient.
    async fn send_to(&self, session_id: &str, message: ServerMessage) {
        let Some(state) = self.session(session_id) else { return };
        if state.outbound_tx.try_send(message).is_err() {
            warn!(session_id, "dropping session, outbound queue full or closed");
            self.drop_session(session_id).await;
        }
    }

    async fn send_protocol_error(&self, session_id: &str, error: ProtocolError) {
        self.send_to(
            session_id,
            ServerMessage::Error { message: error.to_string(), kind: Some(error.kind()) },
        )
        .await;
    }

    /// Snapshots the recipient set and dispatches outside any per-document
    /// lock, so one slow or closed session never stalls the others. Any
    /// recipient whose outbound queue is full or closed is dropped, per the
    /// same overflow policy as [`SessionRouter::send_to`].
    async fn broadcast_excluding(&self, doc_id: &str, origin_session_id: &str, message: ServerMessage) {
        let recipients: Vec<(String, mpsc::Sender<ServerMessage>)> = self
            .sessions
            .iter()
            .filter(|entry| entry.key() != origin_session_id)
            .filter(|entry| entry.value().doc_id.lock().expect("doc_id mutex poisoned").as_deref() == Some(doc_id))
            .map(|entry| (entry.key().clone(), entry.value().outbound_tx.clone()))
            .collect();

        for (session_id, tx) in recipients {
            if tx.try_send(message.clone()).is_err() {
                warn!(doc_id, session_id, "dropping session, outbound queue full or closed during broadcast");
                self.drop_session(&session_id).await;
            }
        }
    }
}
