use crate::domain::email::{MailboxCredential, RawMessage, ServerId};
use crate::error::CycleError;

/// Opens a secure connection to the mailbox server (the Connecting state).
pub trait MailboxConnector {
    fn connect(&self) -> Result<Box<dyn UnauthenticatedMailbox>, CycleError>;

    /// Human-readable endpoint for logs and errors.
    fn describe(&self) -> String;
}

/// A greeted but not yet logged-in connection (the Authenticating state).
pub trait UnauthenticatedMailbox {
    /// Rejections map to [`CycleError::Authentication`] and are never retried.
    fn login(
        self: Box<Self>,
        credential: &MailboxCredential,
    ) -> Result<Box<dyn MailboxSession>, CycleError>;
}

/// An authenticated, selected INBOX for the length of one fetch cycle.
pub trait MailboxSession {
    /// UIDs matching raw IMAP search criteria.
    fn search(&mut self, query: &str) -> Result<Vec<ServerId>, CycleError>;

    /// Flags and full content in one round trip, without setting `\Seen`.
    /// `Ok(None)` if the server returned nothing for this id.
    fn fetch(&mut self, id: &ServerId) -> Result<Option<RawMessage>, CycleError>;

    /// Adds `\Seen`. Already-seen ids are a no-op on the server.
    fn mark_seen(&mut self, ids: &[ServerId]) -> Result<(), CycleError>;

    fn logout(&mut self) -> Result<(), CycleError>;
}
