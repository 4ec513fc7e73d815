// SPDX-License-Identifier: AGPL-3.0-or-later

//! Per-document actor and the process-wide registry that creates them lazily.
//!
//! Grounded in the teacher's single-writer actor: one task owns a
//! [`DocumentState`], drains an `mpsc` inbox, and replies via `oneshot`. Every
//! `applyOperation` call for a given `docId` is serialized by construction
//! because it funnels through that document's single task; different
//! documents proceed in parallel.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, warn};

use crate::document::{ApplyOutcome, DocumentState};
use crate::error::DocumentError;
use crate::ot::Operation;
use crate::store::{DocumentRecord, DurableStore, StoreError};

enum AuthorityMessage {
    ApplyOperation {
        op: Operation,
        response_tx: oneshot::Sender<Result<ApplyOutcome, DocumentError>>,
    },
    Snapshot {
        response_tx: oneshot::Sender<(String, u64)>,
    },
}

struct DocumentActor {
    doc_id: String,
    state: DocumentState,
    store: Arc<dyn DurableStore>,
    inbox: mpsc::Receiver<AuthorityMessage>,
    persist_op_threshold: u32,
    persist_interval: Duration,
}

impl DocumentActor {
    async fn run(mut self) {
        // A periodic tick lets an idle-but-dirty document cross the
        // wall-clock persist threshold even without new operations arriving.
        let mut tick = tokio::time::interval(self.persist_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                message = self.inbox.recv() => {
                    let Some(message) = message else { break };
                    self.handle_message(message);
                    self.maybe_persist().await;
                }
                _ = tick.tick() => {
                    self.maybe_persist().await;
                }
            }
        }
        debug!(doc_id = %self.doc_id, "document actor shutting down, no more handles");
    }

    fn handle_message(&mut self, message: AuthorityMessage) {
        match message {
            AuthorityMessage::ApplyOperation { op, response_tx } => {
                let result = self.state.apply_operation(op);
                let _ = response_tx.send(result);
            }
            AuthorityMessage::Snapshot { response_tx } => {
                let _ = response_tx.send(self.state.snapshot());
            }
        }
    }

    async fn maybe_persist(&mut self) {
        if !self.state.needs_persist(self.persist_op_threshold, self.persist_interval) {
            return;
        }

        let (content, version) = self.state.snapshot();
        let record = DocumentRecord {
            content,
            version,
            updated_at: unix_now(),
        };
        match self.store.upsert_by_id(&self.doc_id, record).await {
            Ok(()) => {
                self.state.mark_persisted();
                debug!(doc_id = %self.doc_id, version, "persisted document");
            }
            Err(err) => {
                warn!(doc_id = %self.doc_id, %err, "write-back failed, will retry on next trigger");
                if let Some(dirty_for) = self.state.dirty_for() {
                    if dirty_for >= self.persist_interval * 10 {
                        warn!(doc_id = %self.doc_id, ?dirty_for, "document has been dirty far longer than the persist interval");
                    }
                }
            }
        }
    }
}

fn unix_now() -> u64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// A cheap, cloneable handle to a document's actor task.
#[derive(Clone)]
pub struct AuthorityHandle {
    tx: mpsc::Sender<AuthorityMessage>,
}

impl AuthorityHandle {
    pub async fn apply_operation(&self, op: Operation) -> Result<ApplyOutcome, DocumentError> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(AuthorityMessage::ApplyOperation { op, response_tx })
            .await
            .map_err(|_| DocumentError::StoreUnavailable)?;
        response_rx.await.map_err(|_| DocumentError::StoreUnavailable)?
    }

    pub async fn snapshot(&self) -> (String, u64) {
        let (response_tx, response_rx) = oneshot::channel();
        if self
            .tx
            .send(AuthorityMessage::Snapshot { response_tx })
            .await
            .is_err()
        {
            return (String::new(), 0);
        }
        response_rx.await.unwrap_or_default()
    }
}

/// The process-wide `docId -> authority` registry. Creates actors lazily on
/// first reference; creation is serialized by an async mutex so at most one
/// actor ever exists per docId, even under concurrent first-touch.
pub struct DocumentRegistry {
    handles: DashMap<String, AuthorityHandle>,
    creation_lock: Mutex<()>,
    store: Arc<dyn DurableStore>,
    tail_len: usize,
    persist_op_threshold: u32,
    persist_interval: Duration,
}

impl DocumentRegistry {
    pub fn new(
        store: Arc<dyn DurableStore>,
        tail_len: usize,
        persist_op_threshold: u32,
        persist_interval: Duration,
    ) -> Self {
        Self {
            handles: DashMap::new(),
            creation_lock: Mutex::new(()),
            store,
            tail_len,
            persist_op_threshold,
            persist_interval,
        }
    }

    /// Returns the in-memory authority for `doc_id`, fetching from the
    /// durable store and spawning its actor on first reference.
    pub async fn load_or_attach(&self, doc_id: &str) -> Result<AuthorityHandle, DocumentError> {
        if let Some(handle) = self.handles.get(doc_id) {
            return Ok(handle.clone());
        }

        let _guard = self.creation_lock.lock().await;
        if let Some(handle) = self.handles.get(doc_id) {
            return Ok(handle.clone());
        }

        let record = self.store.get(doc_id).await.map_err(|err| match err {
            StoreError::NotFound => DocumentError::NotFound,
            StoreError::Unavailable => DocumentError::StoreUnavailable,
        })?;

        let state = DocumentState::from_snapshot(record.content, record.version, self.tail_len);
        let (tx, rx) = mpsc::channel(64);
        let actor = DocumentActor {
            doc_id: doc_id.to_string(),
            state,
            store: self.store.clone(),
            inbox: rx,
            persist_op_threshold: self.persist_op_threshold,
            persist_interval: self.persist_interval,
        };
        tokio::spawn(actor.run());

        let handle = AuthorityHandle { tx };
        self.handles.insert(doc_id.to_string(), handle.clone());
        Ok(handle)
    }

    pub async fn create_document(&self, seed: String) -> Result<String, DocumentError> {
        self.store
            .create(seed)
            .await
            .map_err(|_| DocumentError::StoreUnavailable)
    }
}

#[cfg(test)]
struct AlwaysFailingStore;

#[cfg(test)]
#[async_trait::async_trait]
impl DurableStore for AlwaysFailingStore {
    async fn get(&self, _doc_id: &str) -> Result<DocumentRecord, StoreError> {
        Err(StoreError::NotFound)
    }

    async fn upsert_by_id(&self, _doc_id: &str, _record: DocumentRecord) -> Result<(), StoreError> {
        Err(StoreError::Unavailable)
    }

    async fn create(&self, _seed: String) -> Result<String, StoreError> {
        Err(StoreError::Unavailable)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ot::factories::insert;
    use crate::store::InMemoryStore;
    use pretty_assertions::assert_eq;
    use tracing_test::{logs_contain, traced_test};

    fn registry() -> DocumentRegistry {
        DocumentRegistry::new(Arc::new(InMemoryStore::default()), 10, 20, Duration::from_secs(2))
    }

    #[tokio::test]
    async fn unknown_document_is_not_found() {
        let registry = registry();
        assert_eq!(
            registry.load_or_attach("missing").await.err(),
            Some(DocumentError::NotFound)
        );
    }

    #[tokio::test]
    async fn applies_operations_serially_per_document() {
        let registry = registry();
        let doc_id = registry.create_document("hello".to_string()).await.unwrap();
        let handle = registry.load_or_attach(&doc_id).await.unwrap();

        let op = insert(&doc_id, "u1", 0, 5, " world");
        let outcome = handle.apply_operation(op).await.unwrap();
        assert_eq!(outcome.version, 1);

        let (content, version) = handle.snapshot().await;
        assert_eq!(content, "hello world");
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn repeated_load_or_attach_returns_the_same_actor() {
        let registry = registry();
        let doc_id = registry.create_document(String::new()).await.unwrap();
        let first = registry.load_or_attach(&doc_id).await.unwrap();
        let second = registry.load_or_attach(&doc_id).await.unwrap();

        first
            .apply_operation(insert(&doc_id, "u1", 0, 0, "x"))
            .await
            .unwrap();
        let (content, _) = second.snapshot().await;
        assert_eq!(content, "x");
    }

    #[tokio::test]
    #[traced_test]
    async fn persistently_failing_writeback_logs_a_long_dirty_warning() {
        let mut state = DocumentState::new("x".to_string(), 10);
        state.apply_operation(insert("d", "u1", 0, 0, "y")).unwrap();

        let (_tx, rx) = mpsc::channel(1);
        let mut actor = DocumentActor {
            doc_id: "d".to_string(),
            state,
            store: Arc::new(AlwaysFailingStore),
            inbox: rx,
            persist_op_threshold: 1000,
            persist_interval: Duration::from_millis(1),
        };

        tokio::time::sleep(Duration::from_millis(15)).await;
        actor.maybe_persist().await;

        assert!(logs_contain(
            "document has been dirty far longer than the persist interval"
        ));
    }
}
