use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Server-side UID, kept as text so the ledger stores it verbatim.
pub type ServerId = String;

/// Login for one mailbox session. Never persisted by this crate.
#[derive(Clone)]
pub struct MailboxCredential {
    pub username: String,
    pub secret: String,
}

impl MailboxCredential {
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }
}

impl std::fmt::Debug for MailboxCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MailboxCredential")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// One message as the server handed it over: flags and the full RFC 822 payload.
#[derive(Debug, Clone)]
pub struct RawMessage {
    pub id: ServerId,
    pub seen: bool,
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BodyFormat {
    Plain,
    Html,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedRecord {
    pub server_id: ServerId,
    pub subject: String,
    pub sender: String,
    pub body: String,
    pub body_format: BodyFormat,
    pub timestamp: DateTime<FixedOffset>,
    /// Read-state captured before this cycle marked the message seen.
    pub read: bool,
}
