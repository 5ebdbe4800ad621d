use anyhow::{Result, anyhow};
use keyring::{Entry, Error as KeyringError};
use std::io::{BufRead, Write};

use crate::domain::email::MailboxCredential;

const SERVICE: &str = "mail_digest";
pub const PASSWORD_ENV: &str = "MAIL_DIGEST_PASSWORD";

/// Save the mailbox password into the OS keyring for the given username
pub fn save_password(username: &str, password: &str) -> Result<()> {
    let entry = Entry::new(SERVICE, username);
    entry?
        .set_password(password)
        .map_err(|e| anyhow!(e.to_string()))?;
    Ok(())
}

/// Load the mailbox password from the keyring for the given username
pub fn load_password(username: &str) -> Result<Option<String>> {
    let entry = Entry::new(SERVICE, username);
    match entry?.get_password() {
        Ok(v) => Ok(Some(v)),
        Err(KeyringError::NoEntry) => Ok(None),
        Err(e) => Err(anyhow!(e.to_string())),
    }
}

/// Keyring first, then the environment, then one line from stdin.
pub fn resolve_credential(username: &str) -> Result<MailboxCredential> {
    match load_password(username) {
        Ok(Some(p)) => return Ok(MailboxCredential::new(username, p)),
        Ok(None) => {}
        Err(e) => log::warn!("keyring unavailable: {e}"),
    }

    if let Ok(p) = std::env::var(PASSWORD_ENV)
        && !p.is_empty()
    {
        return Ok(MailboxCredential::new(username, p));
    }

    eprint!("Password for {username}: ");
    std::io::stderr().flush()?;
    let mut line = String::new();
    std::io::stdin().lock().read_line(&mut line)?;
    let secret = line.trim_end_matches(['\r', '\n']).to_string();
    if secret.is_empty() {
        return Err(anyhow!("no password given for {username}"));
    }
    Ok(MailboxCredential::new(username, secret))
}
