// SPDX-License-Identifier: AGPL-3.0-or-later

//! The authoritative state of a single document: content, version, and the
//! bounded transform tail used to bring stale client operations up to date.
//!
//! `DocumentState` itself does no I/O; it is a plain data structure mutated
//! only through [`DocumentState::apply_operation`]. The actor in
//! [`crate::authority`] is the sole owner of a given instance and is what
//! gives the per-document FIFO guarantee its teeth.

use std::time::Instant;

use crate::error::DocumentError;
use crate::ot::{self, Operation};

/// A single entry in the transform tail: an already-applied operation, tagged
/// with the version it produced.
#[derive(Debug, Clone)]
pub struct TailEntry {
    pub version: u64,
    pub op: Operation,
}

#[derive(Debug, Clone)]
pub struct DocumentState {
    pub content: String,
    pub version: u64,
    recent_ops: Vec<TailEntry>,
    tail_len: usize,
    dirty_since: Option<Instant>,
    ops_since_persist: u32,
}

/// Outcome of a successful [`DocumentState::apply_operation`] call.
#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub version: u64,
    pub transformed: Operation,
    /// True if the transformed operation had zero effective length and was
    /// neither applied nor recorded in the tail.
    pub is_noop: bool,
}

impl DocumentState {
    pub fn new(content: String, tail_len: usize) -> Self {
        Self {
            content,
            version: 0,
            recent_ops: Vec::new(),
            tail_len: tail_len.max(10),
            dirty_since: None,
            ops_since_persist: 0,
        }
    }

    pub fn from_snapshot(content: String, version: u64, tail_len: usize) -> Self {
        Self {
            content,
            version,
            recent_ops: Vec::new(),
            tail_len: tail_len.max(10),
            dirty_since: None,
            ops_since_persist: 0,
        }
    }

    /// `(content, version)`, observed atomically since there is only one
    /// mutator and this is a plain read of its fields.
    pub fn snapshot(&self) -> (String, u64) {
        (self.content.clone(), self.version)
    }

    /// Implements the `applyOperation` contract: transform against the tail,
    /// validate, apply, version, and record. Returns the post-transform
    /// operation (or a no-op marker) on success.
    pub fn apply_operation(&mut self, mut op: Operation) -> Result<ApplyOutcome, DocumentError> {
        if op.base_version > self.version {
            return Err(DocumentError::FromTheFuture);
        }

        if op.base_version < self.version {
            let oldest_retained = self
                .recent_ops
                .first()
                .map(|entry| entry.version - 1)
                .unwrap_or(self.version);
            if op.base_version < oldest_retained {
                return Err(DocumentError::TooStale);
            }
            for entry in &self.recent_ops {
                if entry.version > op.base_version {
                    op = ot::transform(&op, &entry.op);
                }
            }
        }

        ot::validate(&self.content, &op)?;

        if ot::is_noop(&op) {
            return Ok(ApplyOutcome {
                version: self.version,
                transformed: op,
                is_noop: true,
            });
        }

        self.content = ot::apply(&self.content, &op);
        self.version += 1;
        self.recent_ops.push(TailEntry {
            version: self.version,
            op: op.clone(),
        });
        if self.recent_ops.len() > self.tail_len {
            let excess = self.recent_ops.len() - self.tail_len;
            self.recent_ops.drain(..excess);
        }

        self.ops_since_persist += 1;
        if self.dirty_since.is_none() {
            self.dirty_since = Some(Instant::now());
        }

        Ok(ApplyOutcome {
            version: self.version,
            transformed: op,
            is_noop: false,
        })
    }

    /// Whether a write-back should be triggered now, per the op-count and
    /// wall-clock dirty-time thresholds.
    pub fn needs_persist(&self, op_threshold: u32, interval: std::time::Duration) -> bool {
        if self.ops_since_persist >= op_threshold {
            return true;
        }
        match self.dirty_since {
            Some(since) => since.elapsed() >= interval,
            None => false,
        }
    }

    pub fn is_dirty(&self) -> bool {
        self.dirty_since.is_some()
    }

    pub fn dirty_for(&self) -> Option<std::time::Duration> {
        self.dirty_since.map(|since| since.elapsed())
    }

    /// Resets the persistence counters after a successful write-back. Leaves
    /// them untouched if the caller didn't actually persist (e.g. on failure).
    pub fn mark_persisted(&mut self) {
        self.ops_since_persist = 0;
        self.dirty_since = None;
    }

    #[cfg(test)]
    pub fn tail_len(&self) -> usize {
        self.tail_len
    }
}
