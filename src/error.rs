// SPDX-License-Identifier: AGPL-3.0-or-later

//! The error taxonomy surfaced to clients over the wire, and the internal errors
//! that get collapsed into it at the session boundary.

use thiserror::Error;

use crate::ot::ValidationError;

/// Failures the document authority can report for a single submitted operation.
///
/// All but [`DocumentError::StoreUnavailable`] are operation-level: they never
/// mutate state, never advance `version`, and are reported only to the
/// originating session.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DocumentError {
    #[error("document not found")]
    NotFound,
    #[error("operation references a version the server has not produced yet")]
    FromTheFuture,
    #[error("operation's base version predates the retained transform tail")]
    TooStale,
    #[error("operation is invalid after transform: {0}")]
    Invalid(#[from] ValidationError),
    #[error("durable store is unavailable")]
    StoreUnavailable,
}

/// The tagged error kind sent to clients in an `ERROR` frame, mirroring the
/// taxonomy of spec §7. `AuthRequired`/`AuthInvalid` never reach this type: they
/// close the connection at upgrade time instead of producing a frame.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    #[error("document not found")]
    NotFound,
    #[error("operation references a version the server has not produced yet")]
    FromTheFuture,
    #[error("operation's base version predates the retained transform tail, rejoin to resync")]
    TooStale,
    #[error("invalid operation: {0}")]
    Invalid(String),
    #[error("malformed message")]
    MalformedMessage,
    #[error("internal error")]
    Internal,
}

impl From<DocumentError> for ProtocolError {
    fn from(err: DocumentError) -> Self {
        match err {
            DocumentError::NotFound => Self::NotFound,
            DocumentError::FromTheFuture => Self::FromTheFuture,
            DocumentError::TooStale => Self::TooStale,
            DocumentError::Invalid(validation) => Self::Invalid(validation.to_string()),
            DocumentError::StoreUnavailable => Self::Internal,
        }
    }
}

impl ProtocolError {
    /// The stable machine-readable tag sent alongside the human-readable message.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound => "NotFound",
            Self::FromTheFuture => "FromTheFuture",
            Self::TooStale => "TooStale",
            Self::Invalid(_) => "Invalid",
            Self::MalformedMessage => "MalformedMessage",
            Self::Internal => "Internal",
        }
    }
}
