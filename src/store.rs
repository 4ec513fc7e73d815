// SPDX-License-Identifier: AGPL-3.0-or-later

//! The durable document store boundary: owned outside the collaboration core
//! and implemented elsewhere in a real deployment (Postgres, object storage,
//! whatever backs document content long-term). [`InMemoryStore`] exists so
//! the crate runs and tests standalone.

use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use dashmap::DashMap;
use rand::Rng;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentRecord {
    pub content: String,
    pub version: u64,
    pub updated_at: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("document not found")]
    NotFound,
    #[error("durable store is unavailable")]
    Unavailable,
}

/// The document durable store: get/upsert/create by document id. Out of
/// scope as an implementation (spec §1); this trait is the boundary a real
/// database adapter would satisfy.
#[async_trait]
pub trait DurableStore: Send + Sync {
    async fn get(&self, doc_id: &str) -> Result<DocumentRecord, StoreError>;
    async fn upsert_by_id(&self, doc_id: &str, record: DocumentRecord) -> Result<(), StoreError>;
    async fn create(&self, seed: String) -> Result<String, StoreError>;
}

/// An in-memory stand-in for the durable store, keyed by a random id.
#[derive(Default)]
pub struct InMemoryStore {
    documents: DashMap<String, DocumentRecord>,
}

fn now_unix() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

fn random_id() -> String {
    let bytes: [u8; 12] = rand::thread_rng().gen();
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

#[async_trait]
impl DurableStore for InMemoryStore {
    async fn get(&self, doc_id: &str) -> Result<DocumentRecord, StoreError> {
        self.documents
            .get(doc_id)
            .map(|entry| entry.clone())
            .ok_or(StoreError::NotFound)
    }

    async fn upsert_by_id(&self, doc_id: &str, record: DocumentRecord) -> Result<(), StoreError> {
        self.documents.insert(doc_id.to_string(), record);
        Ok(())
    }

    async fn create(&self, seed: String) -> Result<String, StoreError> {
        let doc_id = random_id();
        self.documents.insert(
            doc_id.clone(),
            DocumentRecord {
                content: seed,
                version: 0,
                updated_at: now_unix(),
            },
        );
        Ok(doc_id)
    }
}
