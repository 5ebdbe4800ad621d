use anyhow::Result;
use notify_rust::{Hint, Notification};

use crate::domain::email::NormalizedRecord;
use crate::mail::decoders::normalize_snippet;

const SNIPPET_CHARS: usize = 140;

pub struct Notifier {
    icon: String,
}

impl Notifier {
    pub fn new() -> Self {
        Self {
            icon: "mail-unread".to_string(),
        }
    }

    /// Best-effort: a missing notification daemon is logged, not fatal.
    pub fn notify_email(&self, email: &NormalizedRecord) -> Result<()> {
        let mut n = Notification::new();
        n.summary(&format!("{} — {}", email.sender, email.subject))
            .body(&normalize_snippet(&email.body, SNIPPET_CHARS))
            .icon(&self.icon)
            .hint(Hint::Category("email.arrived".to_string()));

        if let Err(e) = n.show() {
            log::warn!("Notification error: {e}");
        }
        Ok(())
    }
}

impl Default for Notifier {
    fn default() -> Self {
        Self::new()
    }
}
