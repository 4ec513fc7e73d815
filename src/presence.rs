// SPDX-License-Identifier: AGPL-3.0-or-later

//! The ephemeral presence/cursor registry: `(docId, userId) -> cursor`, with
//! TTL-based liveness. Modeled as a trait so the TTL-sweeping in-memory
//! implementation can later be swapped for a real external store (a
//! hash-per-document with per-key TTL, per spec §6.3) without touching the
//! session router.
//!
//! The TTL is per-document, not per-user: any write to a document (join,
//! leave, or a cursor update from any of its users) refreshes the whole
//! document's liveness clock, exactly like a single key TTL on a hash in an
//! external store. A user who crashes without a clean disconnect stays
//! listed for as long as anyone else keeps the document active, and the
//! whole document's presence is reaped together once writes to it stop.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use dashmap::DashMap;

struct DocPresence {
    cursors: HashMap<String, usize>,
    last_write: Instant,
}

impl DocPresence {
    fn new() -> Self {
        Self {
            cursors: HashMap::new(),
            last_write: Instant::now(),
        }
    }
}

#[async_trait]
pub trait PresenceStore: Send + Sync {
    async fn join(&self, doc_id: &str, user_id: &str);
    async fn leave(&self, doc_id: &str, user_id: &str);
    async fn update_cursor(&self, doc_id: &str, user_id: &str, position: usize);
    async fn list_users(&self, doc_id: &str) -> Vec<String>;
    async fn get_cursors(&self, doc_id: &str) -> HashMap<String, usize>;
}

/// TTL-sweeping in-memory presence store. The caller is expected to spawn a
/// background task calling [`InMemoryPresenceStore::reap_expired`]
/// periodically; crashed clients are reaped this way without explicit
/// cleanup.
pub struct InMemoryPresenceStore {
    docs: DashMap<String, DocPresence>,
    ttl: Duration,
}

impl InMemoryPresenceStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            docs: DashMap::new(),
            ttl,
        }
    }

    /// Sweeps for documents whose last write is older than the TTL and
    /// evicts them whole, so one active user's writes keep every other
    /// user in the same document alive.
    pub fn reap_expired(&self) {
        let ttl = self.ttl;
        self.docs.retain(|_doc_id, doc| doc.last_write.elapsed() < ttl);
    }
}

#[async_trait]
impl PresenceStore for InMemoryPresenceStore {
    async fn join(&self, doc_id: &str, user_id: &str) {
        let mut doc = self.docs.entry(doc_id.to_string()).or_insert_with(DocPresence::new);
        doc.cursors.insert(user_id.to_string(), 0);
        doc.last_write = Instant::now();
    }

    async fn leave(&self, doc_id: &str, user_id: &str) {
        if let Some(mut doc) = self.docs.get_mut(doc_id) {
            doc.cursors.remove(user_id);
            doc.last_write = Instant::now();
        }
    }

    async fn update_cursor(&self, doc_id: &str, user_id: &str, position: usize) {
        let mut doc = self.docs.entry(doc_id.to_string()).or_insert_with(DocPresence::new);
        doc.cursors.insert(user_id.to_string(), position);
        doc.last_write = Instant::now();
    }

    async fn list_users(&self, doc_id: &str) -> Vec<String> {
        self.docs
            .get(doc_id)
            .map(|doc| doc.cursors.keys().cloned().collect())
            .unwrap_or_default()
    }

    async fn get_cursors(&self, doc_id: &str) -> HashMap<String, usize> {
        self.docs.get(doc_id).map(|doc| doc.cursors.clone()).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn join_then_list_users() {
        let presence = InMemoryPresenceStore::new(Duration::from_secs(30));
        presence.join("doc1", "u1").await;
        presence.join("doc1", "u2").await;
        let mut users = presence.list_users("doc1").await;
        users.sort();
        assert_eq!(users, vec!["u1".to_string(), "u2".to_string()]);
    }

    #[tokio::test]
    async fn leave_removes_user() {
        let presence = InMemoryPresenceStore::new(Duration::from_secs(30));
        presence.join("doc1", "u1").await;
        presence.leave("doc1", "u1").await;
        assert_eq!(presence.list_users("doc1").await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn update_cursor_does_not_validate_against_content() {
        let presence = InMemoryPresenceStore::new(Duration::from_secs(30));
        presence.join("doc1", "u1").await;
        presence.update_cursor("doc1", "u1", 999_999).await;
        let cursors = presence.get_cursors("doc1").await;
        assert_eq!(cursors.get("u1"), Some(&999_999));
    }

    #[tokio::test]
    async fn reap_expired_evicts_the_whole_document_once_writes_stop() {
        let presence = InMemoryPresenceStore::new(Duration::from_millis(1));
        presence.join("doc1", "u1").await;
        presence.join("doc1", "u2").await;
        tokio::time::sleep(Duration::from_millis(10)).await;
        presence.reap_expired();
        assert_eq!(presence.list_users("doc1").await, Vec::<String>::new());
    }

    #[tokio::test]
    async fn one_users_writes_keep_a_crashed_users_presence_alive() {
        let presence = InMemoryPresenceStore::new(Duration::from_millis(20));
        presence.join("doc1", "u1").await;
        presence.join("doc1", "u2").await; // u2 crashes right after this, no clean disconnect

        tokio::time::sleep(Duration::from_millis(12)).await;
        presence.update_cursor("doc1", "u1", 5).await; // refreshes the whole document's TTL
        tokio::time::sleep(Duration::from_millis(12)).await; // 24ms since u2's join, 12ms since the last write
        presence.reap_expired();

        let mut users = presence.list_users("doc1").await;
        users.sort();
        assert_eq!(users, vec!["u1".to_string(), "u2".to_string()]);
    }
}
