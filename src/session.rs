//! Per-connection session state (C3 data model).
//!
//! Mutated only by the command interpreter running on the session's own
//! task; read by the event hook (C13) to build [`crate::events::EventRecord`]s.
//! Created on connection accept, destroyed on close.

use std::net::SocketAddr;
use std::time::Instant;

use crate::address::{ForwardPath, NotifyFlag, ReversePath, Ret};

/// The primary transaction phase. Orthogonal sub-states (TLS, auth, BDAT
/// progress, post-STARTTLS re-greet requirement) live as separate fields
/// on [`Session`] rather than as additional enum variants, since they can
/// be true independently of the transaction phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Connected,
    Greeted,
    MailSet,
    RcptSet,
    DataBody,
    BdatChunks,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EndReason {
    Quit,
    Eof,
    IdleTimeout,
    ProtocolError,
    Shutdown,
    TlsError,
    RateLimited,
}

/// One accepted recipient, with its per-recipient DSN parameters.
#[derive(Debug, Clone)]
pub struct RecipientEntry {
    pub path: ForwardPath,
    pub notify: Option<Vec<NotifyFlag>>,
    pub orcpt: Option<String>,
}

#[derive(Debug, Clone)]
pub struct Session {
    pub id: String,
    pub peer_addr: SocketAddr,
    pub server_hostname: String,

    pub helo_domain: Option<String>,
    pub greeted: bool,
    pub ehlo_used: bool,

    pub tls_active: bool,
    pub authenticated: bool,
    pub authenticated_user: Option<String>,

    pub sender: Option<ReversePath>,
    pub recipients: Vec<RecipientEntry>,
    pub declared_size: Option<u64>,
    pub smtputf8: bool,
    pub dsn_ret: Option<Ret>,
    pub dsn_envid: Option<String>,

    pub bdat_in_progress: bool,
    pub must_re_ehlo_after_tls: bool,

    pub message_bytes: u64,
    /// Accumulates chunk payloads across a multi-`BDAT` transfer until the
    /// `LAST` chunk closes it out.
    pub bdat_buffer: Vec<u8>,

    pub phase: Phase,
    pub end_reason: Option<EndReason>,

    pub started_at: Instant,
}

impl Session {
    #[must_use]
    pub fn new(id: String, peer_addr: SocketAddr, server_hostname: String) -> Self {
        Session {
            id,
            peer_addr,
            server_hostname,
            helo_domain: None,
            greeted: false,
            ehlo_used: false,
            tls_active: false,
            authenticated: false,
            authenticated_user: None,
            sender: None,
            recipients: Vec::new(),
            declared_size: None,
            smtputf8: false,
            dsn_ret: None,
            dsn_envid: None,
            bdat_in_progress: false,
            must_re_ehlo_after_tls: false,
            message_bytes: 0,
            bdat_buffer: Vec::new(),
            phase: Phase::Connected,
            end_reason: None,
            started_at: Instant::now(),
        }
    }

    /// Recipients accepted so far, deduplicated preserving first-seen
    /// order (Envelope invariant).
    pub fn add_recipient(&mut self, entry: RecipientEntry) -> bool {
        if self.recipients.iter().any(|r| r.path.as_str() == entry.path.as_str()) {
            return false;
        }
        self.recipients.push(entry);
        true
    }

    /// RSET: clears the mail transaction but preserves the greeting
    /// (§4.3: "`RSET` always allowed; clears envelope but preserves
    /// greeting").
    pub fn reset_transaction(&mut self) {
        self.sender = None;
        self.recipients.clear();
        self.declared_size = None;
        self.smtputf8 = false;
        self.dsn_ret = None;
        self.dsn_envid = None;
        self.bdat_in_progress = false;
        self.message_bytes = 0;
        self.bdat_buffer.clear();
        if self.greeted {
            self.phase = Phase::Greeted;
        }
    }

    pub fn begin_mail(&mut self, sender: ReversePath, declared_size: Option<u64>, smtputf8: bool) {
        self.sender = Some(sender);
        self.declared_size = declared_size;
        self.smtputf8 = smtputf8;
        self.phase = Phase::MailSet;
    }

    pub fn set_greeted(&mut self, domain: String, ehlo: bool) {
        self.helo_domain = Some(domain);
        self.greeted = true;
        self.ehlo_used = ehlo;
        self.phase = Phase::Greeted;
    }

    #[must_use]
    pub const fn has_recipients(&self) -> bool {
        !self.recipients.is_empty()
    }
}
