//! Mail session contract and its IMAP implementation.

use std::collections::HashSet;
use std::net::TcpStream;
use std::time::Duration;

use imap::Session;
use native_tls::{TlsConnector, TlsStream};

use crate::config::{AccountConfig, ImapSecurity};
use crate::error::{WatchError, WatchResult};

const FETCH_ITEMS: &str = "(UID RFC822.HEADER BODY.PEEK[TEXT])";

/// Attributes of one fetched message, before decoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawMessage {
    pub uid: Option<u32>,
    pub header: Option<Vec<u8>>,
    pub body: Option<Vec<u8>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MailboxInfo {
    pub exists: u32,
}

/// Identifiers matched by a server-side search.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SearchResult {
    uids: Vec<u32>,
}

impl SearchResult {
    pub fn new(uids: impl IntoIterator<Item = u32>) -> Self {
        let mut uids: Vec<u32> = uids.into_iter().collect();
        uids.sort_unstable();
        uids.dedup();
        Self { uids }
    }

    pub fn is_empty(&self) -> bool {
        self.uids.is_empty()
    }

    pub fn len(&self) -> usize {
        self.uids.len()
    }

    /// The `count` highest identifiers, newest first.
    pub fn newest(&self, count: u32) -> Vec<u32> {
        self.uids.iter().rev().take(count as usize).copied().collect()
    }
}

/// An authenticated session against a mail store. One operation at a time.
pub trait MailSession: Send {
    fn select_mailbox(&mut self, name: &str) -> WatchResult<MailboxInfo>;

    fn search(&mut self, filter: &str) -> WatchResult<SearchResult>;

    /// Fetches the `count` most recent messages of the selected mailbox,
    /// newest first. With a `scope`, only messages from that search result
    /// are considered.
    fn fetch_recent(&mut self, count: u32, scope: Option<&SearchResult>) -> WatchResult<Vec<RawMessage>>;

    fn logout(&mut self) -> WatchResult<()>;
}

/// Sequence set covering the last `count` messages out of `exists`.
pub fn recent_sequence(exists: u32, count: u32) -> Option<String> {
    if exists == 0 || count == 0 {
        return None;
    }
    let start = exists.saturating_sub(count) + 1;
    if start == exists {
        Some(exists.to_string())
    } else {
        Some(format!("{}:{}", start, exists))
    }
}

fn protocol_error(e: imap::error::Error) -> WatchError {
    WatchError::Protocol(e.to_string())
}

/// Converts fetch responses into raw messages, newest (highest sequence number) first.
fn to_raw_newest_first(fetches: &[imap::types::Fetch]) -> Vec<RawMessage> {
    let mut ordered: Vec<&imap::types::Fetch> = fetches.iter().collect();
    ordered.sort_by(|a, b| b.message.cmp(&a.message));
    ordered
        .into_iter()
        .map(|fetch| RawMessage {
            uid: fetch.uid,
            header: fetch.header().map(|h| h.to_vec()),
            body: fetch.text().map(|b| b.to_vec()),
        })
        .collect()
}

/// A connected, not yet authenticated, IMAP client.
pub struct ImapConnection {
    client: imap::Client<TlsStream<TcpStream>>,
}

impl ImapConnection {
    pub fn connect(account: &AccountConfig, io_timeout: Option<Duration>) -> WatchResult<Self> {
        let domain = account.server.as_str();
        log::debug!("Connecting to {} ({:?})", account.address(), account.security);

        let tcp_stream = TcpStream::connect((domain, account.port))
            .map_err(|e| WatchError::Connection(format!("{}: {}", account.address(), e)))?;
        tcp_stream.set_read_timeout(io_timeout)?;
        tcp_stream.set_write_timeout(io_timeout)?;

        let tls = TlsConnector::builder().build()?;
        let client = match account.security {
            ImapSecurity::Ssl => {
                let tls_stream = tls
                    .connect(domain, tcp_stream)
                    .map_err(|e| WatchError::Connection(format!("TLS handshake failed: {}", e)))?;
                let mut client = imap::Client::new(tls_stream);
                client
                    .read_greeting()
                    .map_err(|e| WatchError::Connection(e.to_string()))?;
                client
            }
            ImapSecurity::StartTls => {
                let mut client = imap::Client::new(tcp_stream);
                client
                    .read_greeting()
                    .map_err(|e| WatchError::Connection(e.to_string()))?;
                client
                    .secure(domain, &tls)
                    .map_err(|e| WatchError::Connection(format!("STARTTLS failed: {}", e)))?
            }
        };

        Ok(Self { client })
    }

    /// Logs in. Consumes the connection, so this happens once per connection.
    pub fn authenticate(self, username: &str, password: &str) -> WatchResult<ImapSession> {
        let session = self
            .client
            .login(username, password)
            .map_err(|e| WatchError::Auth(e.0.to_string()))?;
        log::info!("Authenticated as {}", username);
        Ok(ImapSession { session, exists: 0 })
    }
}

pub struct ImapSession {
    session: Session<TlsStream<TcpStream>>,
    exists: u32,
}

impl ImapSession {
    /// Connect and authenticate in one step.
    pub fn open(account: &AccountConfig, io_timeout: Option<Duration>) -> WatchResult<Self> {
        ImapConnection::connect(account, io_timeout)?.authenticate(&account.username, &account.password)
    }
}

impl MailSession for ImapSession {
    fn select_mailbox(&mut self, name: &str) -> WatchResult<MailboxInfo> {
        let mailbox = self.session.select(name).map_err(protocol_error)?;
        self.exists = mailbox.exists;
        Ok(MailboxInfo { exists: mailbox.exists })
    }

    fn search(&mut self, filter: &str) -> WatchResult<SearchResult> {
        let uids: HashSet<u32> = self.session.uid_search(filter).map_err(protocol_error)?;
        Ok(SearchResult::new(uids))
    }

    fn fetch_recent(&mut self, count: u32, scope: Option<&SearchResult>) -> WatchResult<Vec<RawMessage>> {
        match scope {
            Some(result) => {
                let uids = result.newest(count);
                if uids.is_empty() {
                    return Ok(Vec::new());
                }
                let set = uids.iter().map(|uid| uid.to_string()).collect::<Vec<_>>().join(",");
                let fetches = self.session.uid_fetch(set, FETCH_ITEMS).map_err(protocol_error)?;
                Ok(to_raw_newest_first(&fetches))
            }
            None => {
                // Relative to the total reported by the last select.
                let sequence = match recent_sequence(self.exists, count) {
                    Some(sequence) => sequence,
                    None => return Ok(Vec::new()),
                };
                let fetches = self.session.fetch(sequence, FETCH_ITEMS).map_err(protocol_error)?;
                Ok(to_raw_newest_first(&fetches))
            }
        }
    }

    fn logout(&mut self) -> WatchResult<()> {
        self.session.logout().map_err(protocol_error)
    }
}
