// SPDX-License-Identifier: AGPL-3.0-or-later

//! Operational-transform algebra: pure, stateless functions over [`Operation`]
//! and `String` content. Positions are code-point offsets — the source this
//! protocol was distilled from treated strings as JavaScript indices, which is
//! ambiguous between code units and code points; this implementation fixes
//! code points and uses that unit consistently in `validate`, `apply`, and
//! `transform`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// An atomic insert or delete, addressed by a character offset into the
/// document content it was conceived against.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "opId")]
    pub op_id: String,
    #[serde(rename = "docId")]
    pub doc_id: String,
    #[serde(rename = "userId")]
    pub user_id: String,
    #[serde(rename = "baseVersion")]
    pub base_version: u64,
    pub position: usize,
    #[serde(flatten)]
    pub kind: OperationKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationKind {
    Insert { text: String },
    Delete { length: usize },
}

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ValidationError {
    #[error("position {position} is out of bounds for content of length {len}")]
    OutOfBounds { position: usize, len: usize },
    #[error("insert text must not be empty")]
    EmptyInsert,
    #[error("delete length must be positive")]
    NonPositiveDelete,
    #[error("delete range [{position}, {end}) exceeds content of length {len}")]
    DeleteOutOfBounds { position: usize, end: usize, len: usize },
}

/// Returns `Ok(())` iff the invariants of the data model hold against `content`:
/// `0 <= position <= len(content)`, non-empty insert text, and a positive,
/// in-bounds delete length.
pub fn validate(content: &str, op: &Operation) -> Result<(), ValidationError> {
    let len = content.chars().count();
    if op.position > len {
        return Err(ValidationError::OutOfBounds {
            position: op.position,
            len,
        });
    }
    match &op.kind {
        OperationKind::Insert { text } => {
            if text.is_empty() {
                return Err(ValidationError::EmptyInsert);
            }
        }
        OperationKind::Delete { length } => {
            if *length == 0 {
                return Err(ValidationError::NonPositiveDelete);
            }
            let end = op.position + length;
            if end > len {
                return Err(ValidationError::DeleteOutOfBounds {
                    position: op.position,
                    end,
                    len,
                });
            }
        }
    }
    Ok(())
}

/// Applies an already-validated operation to `content`, returning the new content.
pub fn apply(content: &str, op: &Operation) -> String {
    let chars: Vec<char> = content.chars().collect();
    match &op.kind {
        OperationKind::Insert { text } => {
            let mut result = String::with_capacity(content.len() + text.len());
            result.extend(chars[..op.position].iter());
            result.push_str(text);
            result.extend(chars[op.position..].iter());
            result
        }
        OperationKind::Delete { length } => {
            let end = op.position + length;
            let mut result = String::with_capacity(content.len());
            result.extend(chars[..op.position].iter());
            result.extend(chars[end..].iter());
            result
        }
    }
}

fn transform_position(op_position: usize, other: &Operation) -> usize {
    match &other.kind {
        OperationKind::Insert { text } => {
            if other.position <= op_position {
                op_position + text.chars().count()
            } else {
                op_position
            }
        }
        OperationKind::Delete { length } => {
            let other_end = other.position + length;
            if other_end <= op_position {
                op_position - length
            } else if other.position < op_position && op_position < other_end {
                other.position
            } else {
                op_position
            }
        }
    }
}

/// Returns the variant of `op` that preserves its intent after `other` has
/// already been applied on the same baseline. See the module's tie-break and
/// delete/delete overlap notes for the asymmetric and lossy cases.
pub fn transform(op: &Operation, other: &Operation) -> Operation {
    let mut result = op.clone();
    result.position = transform_position(op.position, other);

    if let (OperationKind::Delete { length }, OperationKind::Delete { length: other_length }) =
        (&op.kind, &other.kind)
    {
        let op_start = op.position;
        let op_end = op.position + length;
        let other_start = other.position;
        let other_end = other.position + other_length;

        if other_start <= op_start && op_end <= other_end {
            result.kind = OperationKind::Delete { length: 0 };
        } else if other_start < op_end && op_start < other_end {
            let overlap_start = op_start.max(other_start);
            let overlap_end = op_end.min(other_end);
            let overlap = overlap_end - overlap_start;
            result.kind = OperationKind::Delete {
                length: length.saturating_sub(overlap),
            };
            if other_start <= op_start {
                result.position = other_start;
            }
        }
    }

    result
}

/// True if `op`'s effective length is zero after transform: it should be
/// acknowledged to its originator but neither applied nor broadcast.
pub fn is_noop(op: &Operation) -> bool {
    matches!(op.kind, OperationKind::Delete { length: 0 })
}


#[cfg(test)]
mod tests {
    use super::*;
    use factories::{delete, insert};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn apply_insert_basic() {
        let op = insert("d", "u1", 0, 2, "XY");
        assert_eq!(apply("hello", &op), "heXYllo");
    }

    #[test]
    fn apply_delete_basic() {
        let op = delete("d", "u1", 0, 1, 3);
        assert_eq!(apply("hello", &op), "ho");
    }

    #[test]
    fn validate_rejects_out_of_bounds_insert() {
        let op = insert("d", "u1", 0, 10, "x");
        assert_eq!(
            validate("hello", &op),
            Err(ValidationError::OutOfBounds { position: 10, len: 5 })
        );
    }

    #[test]
    fn validate_rejects_empty_insert() {
        let op = insert("d", "u1", 0, 0, "");
        assert_eq!(validate("hello", &op), Err(ValidationError::EmptyInsert));
    }

    #[test]
    fn validate_rejects_zero_length_delete() {
        let op = delete("d", "u1", 0, 0, 0);
        assert_eq!(validate("hello", &op), Err(ValidationError::NonPositiveDelete));
    }

    #[test]
    fn validate_rejects_delete_past_end() {
        let op = delete("d", "u1", 0, 3, 10);
        assert_eq!(
            validate("hello", &op),
            Err(ValidationError::DeleteOutOfBounds { position: 3, end: 13, len: 5 })
        );
    }

    // Scenario A — concurrent insert at the same position, server-side tie-break.
    #[test]
    fn scenario_concurrent_insert_same_position() {
        let content = "test";
        let u1 = insert("d", "u1", 0, 2, "A");
        let applied = apply(content, &u1);
        assert_eq!(applied, "teAst");

        let u2 = insert("d", "u2", 0, 2, "B");
        let u2_transformed = transform(&u2, &u1);
        assert_eq!(u2_transformed.position, 3);
        assert_eq!(apply(&applied, &u2_transformed), "teABst");
    }

    // Scenario B — insert shifted by a prior insert.
    #[test]
    fn scenario_insert_shifted_by_prior_insert() {
        let content = "hello world";
        let u1 = insert("d", "u1", 5, 6, "big ");
        let applied = apply(content, &u1);
        assert_eq!(applied, "hello big world");

        let u2 = insert("d", "u2", 5, 11, "!");
        let u2_transformed = transform(&u2, &u1);
        assert_eq!(u2_transformed.position, 15);
        assert_eq!(apply(&applied, &u2_transformed), "hello big world!");
    }

    // Scenario C — a delete fully covered by a prior delete becomes a no-op.
    #[test]
    fn scenario_delete_overlaps_pending_delete() {
        let content = "abcdefgh";
        let u1 = delete("d", "u1", 0, 2, 4);
        let applied = apply(content, &u1);
        assert_eq!(applied, "abgh");

        let u2 = delete("d", "u2", 0, 3, 3);
        let u2_transformed = transform(&u2, &u1);
        assert!(is_noop(&u2_transformed));
    }

    #[test]
    fn transform_delete_delete_partial_overlap_shifts_position() {
        let op = delete("d", "u1", 0, 5, 5);
        let other = delete("d", "u2", 0, 2, 6);
        let result = transform(&op, &other);
        assert_eq!(result.position, 2);
        assert_eq!(result.kind, OperationKind::Delete { length: 2 });
    }

    proptest! {
        // Property 1: transforming against a zero-length (no-op) delete is identity.
        #[test]
        fn prop_identity(content in "[a-zA-Z ]{0,32}") {
            let content_len = content.chars().count();
            prop_assume!(content_len > 0);
            let op = insert("d", "u1", 0, content_len / 2, "x");
            let mut noop = delete("d", "u2", 0, 0, 1);
            noop.kind = OperationKind::Delete { length: 0 };
            let transformed = transform(&op, &noop);
            prop_assert_eq!(transformed.position, op.position);
            prop_assert_eq!(transformed.kind, op.kind);
        }

        // Property 2: TP1 convergence for non-overlapping concurrent inserts.
        #[test]
        fn prop_tp1_concurrent_inserts(
            content in "[a-zA-Z]{4,16}",
            pos_a in 0usize..4,
            pos_b in 8usize..12,
        ) {
            let content_len = content.chars().count();
            prop_assume!(pos_a <= content_len && pos_b <= content_len && pos_a != pos_b);
            let a = insert("d", "a", 0, pos_a, "A");
            let b = insert("d", "b", 0, pos_b, "B");

            let a_then_b = apply(&apply(&content, &a), &transform(&b, &a));
            let b_then_a = apply(&apply(&content, &b), &transform(&a, &b));
            prop_assert_eq!(a_then_b, b_then_a);
        }

        // Property 3: delete/delete convergence under overlap, via the
        // overlap-subtraction rule (one side may become a no-op).
        #[test]
        fn prop_delete_delete_convergence(
            content in "[a-zA-Z]{8,20}",
            pos_a in 0usize..6,
            len_a in 2usize..6,
            pos_b in 0usize..6,
            len_b in 2usize..6,
        ) {
            let content_len = content.chars().count();
            prop_assume!(pos_a + len_a <= content_len && pos_b + len_b <= content_len);
            let a = delete("d", "a", 0, pos_a, len_a);
            let b = delete("d", "b", 0, pos_b, len_b);

            let b_prime = transform(&b, &a);
            let a_prime = transform(&a, &b);

            let mut left = apply(&content, &a);
            if !is_noop(&b_prime) {
                left = apply(&left, &b_prime);
            }
            let mut right = apply(&content, &b);
            if !is_noop(&a_prime) {
                right = apply(&right, &a_prime);
            }
            prop_assert_eq!(left, right);
        }

        // Property 4: validate soundness — generated content/op pairs that fail
        // validation are never the kind of operation `apply` is expected to handle.
        #[test]
        fn prop_validate_soundness(content in "[a-zA-Z]{0,12}", position in 0usize..20, length in 0usize..8) {
            let op = delete("d", "u1", 0, position, length);
            let valid = validate(&content, &op).is_ok();
            let content_len = content.chars().count();
            let in_bounds = position + length <= content_len && length > 0;
            prop_assert_eq!(valid, in_bounds);
        }
    }
}
