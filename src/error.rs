//! Error types for a fetch cycle.

use crate::domain::email::ServerId;

/// Why a cycle could not fetch messages. "No messages" is never one of these;
/// that is an empty digest.
#[derive(Debug, thiserror::Error)]
pub enum CycleError {
    #[error("authentication rejected for {username}: {reason}")]
    Authentication { username: String, reason: String },

    #[error("connection to {server} failed: {reason}")]
    Connection { server: String, reason: String },

    #[error("mailbox refused {command}: {reason}")]
    Protocol { command: String, reason: String },

    #[error("cycle abandoned before completion")]
    Cancelled,
}

impl CycleError {
    pub fn is_authentication(&self) -> bool {
        matches!(self, CycleError::Authentication { .. })
    }
}

/// A single message that could not be normalized. Attached to the cycle
/// report; the message is left out of the digest.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("message {id}: server returned no payload")]
    MissingPayload { id: ServerId },

    #[error("message {id}: unparseable MIME structure: {reason}")]
    Parse { id: ServerId, reason: String },

    #[error("message {id}: no Date header")]
    MissingDate { id: ServerId },

    #[error("message {id}: invalid Date header {value:?}")]
    InvalidDate { id: ServerId, value: String },
}

impl DecodeError {
    pub fn id(&self) -> &str {
        match self {
            DecodeError::MissingPayload { id }
            | DecodeError::Parse { id, .. }
            | DecodeError::MissingDate { id }
            | DecodeError::InvalidDate { id, .. } => id,
        }
    }
}

/// IO failure on the persisted id ledger. Logged and swallowed by callers.
#[derive(Debug, thiserror::Error)]
#[error("ledger {path}: {source}")]
pub struct LedgerError {
    pub path: String,
    #[source]
    pub source: std::io::Error,
}
