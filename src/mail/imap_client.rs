use std::io;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use imap::error::Error as ImapError;
use imap::types::Flag;
use native_tls::{TlsConnector, TlsStream};

use crate::domain::email::{MailboxCredential, RawMessage, ServerId};
use crate::error::CycleError;
use crate::mail::session::{MailboxConnector, MailboxSession, UnauthenticatedMailbox};

type TlsSession = imap::Session<TlsStream<TcpStream>>;

/// Flags and the whole message in one round trip. PEEK keeps the server
/// from setting `\Seen` before the original state is captured.
const FETCH_ITEMS: &str = "(UID FLAGS BODY.PEEK[])";

pub struct ImapConnector {
    pub server: String,
    pub port: u16,
    pub connect_timeout: Option<Duration>,
    pub io_timeout: Option<Duration>,
}

impl ImapConnector {
    pub fn new(server: impl Into<String>, port: u16) -> Self {
        Self {
            server: server.into(),
            port,
            connect_timeout: None,
            io_timeout: None,
        }
    }

    pub fn with_timeouts(mut self, connect: Option<Duration>, io: Option<Duration>) -> Self {
        self.connect_timeout = connect;
        self.io_timeout = io;
        self
    }

    fn connection_error(&self, reason: impl ToString) -> CycleError {
        CycleError::Connection {
            server: self.describe(),
            reason: reason.to_string(),
        }
    }

    fn open_client(&self) -> Result<imap::Client<TlsStream<TcpStream>>, CycleError> {
        let addrs = (self.server.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|e| self.connection_error(e))?;

        let tcp = first_reachable(addrs, |addr| match self.connect_timeout {
            Some(t) => TcpStream::connect_timeout(addr, t),
            None => TcpStream::connect(addr),
        })
        .map_err(|e| self.connection_error(e))?;
        tcp.set_read_timeout(self.io_timeout)
            .and_then(|_| tcp.set_write_timeout(self.io_timeout))
            .map_err(|e| self.connection_error(e))?;

        let tls = TlsConnector::builder()
            .build()
            .map_err(|e| self.connection_error(e))?;
        let stream = tls
            .connect(&self.server, tcp)
            .map_err(|e| self.connection_error(e))?;

        let mut client = imap::Client::new(stream);
        client
            .read_greeting()
            .map_err(|e| self.connection_error(e))?;
        Ok(client)
    }
}

impl MailboxConnector for ImapConnector {
    fn connect(&self) -> Result<Box<dyn UnauthenticatedMailbox>, CycleError> {
        log::info!("Connecting to {}", self.describe());
        Ok(Box::new(GreetedImap {
            server: self.describe(),
            client: self.open_client()?,
        }))
    }

    fn describe(&self) -> String {
        format!("{}:{}", self.server, self.port)
    }
}

/// Tries each resolved address in order; the error is the last one seen.
fn first_reachable<T>(
    addrs: impl IntoIterator<Item = SocketAddr>,
    mut connect: impl FnMut(&SocketAddr) -> io::Result<T>,
) -> io::Result<T> {
    let mut last_err = None;
    for addr in addrs {
        match connect(&addr) {
            Ok(conn) => return Ok(conn),
            Err(e) => {
                log::debug!("connect to {addr} failed: {e}");
                last_err = Some(e);
            }
        }
    }
    Err(last_err.unwrap_or_else(|| {
        io::Error::new(io::ErrorKind::NotFound, "host resolved to no addresses")
    }))
}

fn is_reply_for(wanted: Option<u32>, got: Option<u32>) -> bool {
    wanted.is_some() && got == wanted
}

struct GreetedImap {
    server: String,
    client: imap::Client<TlsStream<TcpStream>>,
}

impl UnauthenticatedMailbox for GreetedImap {
    fn login(
        self: Box<Self>,
        credential: &MailboxCredential,
    ) -> Result<Box<dyn MailboxSession>, CycleError> {
        let GreetedImap { server, client } = *self;

        // No retry on rejection: repeated bad logins lock university accounts.
        let mut session = match client.login(&credential.username, &credential.secret) {
            Ok(s) => s,
            Err((ImapError::No(reason), _)) | Err((ImapError::Bad(reason), _)) => {
                return Err(CycleError::Authentication {
                    username: credential.username.clone(),
                    reason,
                });
            }
            Err((e, _)) => {
                return Err(CycleError::Connection {
                    server,
                    reason: e.to_string(),
                });
            }
        };

        let mailbox = session.select("INBOX").map_err(|e| CycleError::Protocol {
            command: "SELECT INBOX".into(),
            reason: e.to_string(),
        })?;
        log::debug!("INBOX has {} messages", mailbox.exists);

        Ok(Box::new(ImapMailbox { server, session }))
    }
}

pub struct ImapMailbox {
    server: String,
    session: TlsSession,
}

impl ImapMailbox {
    fn command_error(&self, command: &str, e: ImapError) -> CycleError {
        match e {
            ImapError::No(reason) | ImapError::Bad(reason) => CycleError::Protocol {
                command: command.to_string(),
                reason,
            },
            other => CycleError::Connection {
                server: self.server.clone(),
                reason: other.to_string(),
            },
        }
    }
}

impl MailboxSession for ImapMailbox {
    fn search(&mut self, query: &str) -> Result<Vec<ServerId>, CycleError> {
        let found = match self.session.uid_search(query) {
            Ok(f) => f,
            Err(e) => return Err(self.command_error("UID SEARCH", e)),
        };
        let mut uids: Vec<u32> = found.into_iter().collect();
        uids.sort_unstable();
        Ok(uids.into_iter().map(|u| u.to_string()).collect())
    }

    fn fetch(&mut self, id: &ServerId) -> Result<Option<RawMessage>, CycleError> {
        let fetches = match self.session.uid_fetch(id, FETCH_ITEMS) {
            Ok(f) => f,
            Err(e) => return Err(self.command_error("UID FETCH", e)),
        };
        let wanted: Option<u32> = id.parse().ok();
        // unsolicited FETCH responses for other messages can share the reply
        let Some(f) = fetches.iter().find(|f| is_reply_for(wanted, f.uid)) else {
            log::warn!("UID {id} missing from FETCH reply");
            return Ok(None);
        };

        let seen = f.flags().iter().any(|fl| matches!(fl, Flag::Seen));
        let payload = f.body().map(|b| b.to_vec()).unwrap_or_default();
        if payload.is_empty() {
            log::warn!("UID {id} came back without a body");
        }

        Ok(Some(RawMessage {
            id: id.clone(),
            seen,
            payload,
        }))
    }

    fn mark_seen(&mut self, ids: &[ServerId]) -> Result<(), CycleError> {
        if ids.is_empty() {
            return Ok(());
        }
        let set = ids.join(",");
        match self.session.uid_store(&set, "+FLAGS (\\Seen)") {
            Ok(_) => Ok(()),
            Err(e) => Err(self.command_error("UID STORE", e)),
        }
    }

    fn logout(&mut self) -> Result<(), CycleError> {
        match self.session.logout() {
            Ok(()) => Ok(()),
            Err(e) => Err(self.command_error("LOGOUT", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addrs() -> Vec<SocketAddr> {
        vec![
            "[2001:db8::1]:993".parse().unwrap(),
            "192.0.2.10:993".parse().unwrap(),
            "192.0.2.11:993".parse().unwrap(),
        ]
    }

    #[test]
    fn falls_through_to_a_reachable_address() {
        let mut tried = Vec::new();
        let got = first_reachable(addrs(), |a| {
            tried.push(*a);
            if a.is_ipv6() {
                Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "no route"))
            } else {
                Ok(a.port())
            }
        });
        assert_eq!(got.unwrap(), 993);
        assert_eq!(tried, addrs()[..2].to_vec());
    }

    #[test]
    fn reports_last_failure_when_nothing_connects() {
        let err = first_reachable(addrs(), |a| -> io::Result<()> {
            Err(io::Error::other(format!("refused {}", a.ip())))
        })
        .unwrap_err();
        assert_eq!(err.to_string(), "refused 192.0.2.11");

        let none = first_reachable(Vec::new(), |_| Ok(())).unwrap_err();
        assert_eq!(none.kind(), io::ErrorKind::NotFound);
    }

    #[test]
    fn fetch_reply_must_carry_the_requested_uid() {
        assert!(is_reply_for(Some(42), Some(42)));
        assert!(!is_reply_for(Some(42), Some(7)));
        assert!(!is_reply_for(Some(42), None));
        assert!(!is_reply_for(None, None));
    }
}
