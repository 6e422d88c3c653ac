//! Message store boundary (C7): the handoff point between an accepted
//! DATA/BDAT body and durable storage, plus the trace-header machinery
//! every accepted message gets stamped with before it lands.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::Utc;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use uuid::Uuid;

use crate::address::Ret;
use crate::error::StoreError;
use crate::session::Session;

/// Everything the store needs to know about the message it is about to
/// persist, beyond the raw RFC 5322 bytes.
#[derive(Debug, Clone)]
pub struct MessageMeta {
    pub session_id: String,
    pub peer_addr: SocketAddr,
    pub helo_domain: Option<String>,
    pub mail_from: String,
    pub rcpt_to: Vec<String>,
    pub smtputf8: bool,
    pub tls_active: bool,
    pub authenticated: bool,
    pub dsn_ret: Option<Ret>,
    pub dsn_envid: Option<String>,
}

impl MessageMeta {
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        MessageMeta {
            session_id: session.id.clone(),
            peer_addr: session.peer_addr,
            helo_domain: session.helo_domain.clone(),
            mail_from: session.sender.as_ref().map(|s| s.as_str().to_string()).unwrap_or_default(),
            rcpt_to: session.recipients.iter().map(|r| r.path.as_str().to_string()).collect(),
            smtputf8: session.smtputf8,
            tls_active: session.tls_active,
            authenticated: session.authenticated,
            dsn_ret: session.dsn_ret,
            dsn_envid: session.dsn_envid.clone(),
        }
    }
}

/// The `storeRfc822` collaborator boundary (§6): takes ownership of a
/// fully-received RFC 5322 message body and durably persists it,
/// returning an opaque id the caller can hand to the spool.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn store_rfc822(&self, meta: &MessageMeta, body: &[u8]) -> Result<String, StoreError>;
}

/// Build the `Received:` trace header this engine prepends to every
/// accepted message (RFC 5321 §4.4), and synthesize `Date:`/`Message-ID:`
/// when the submitter omitted them (common for MSA-style submission).
#[must_use]
pub fn build_received_header(meta: &MessageMeta, server_hostname: &str) -> String {
    let from_clause = match &meta.helo_domain {
        Some(h) => format!("from {h} ({})", meta.peer_addr.ip()),
        None => format!("from {}", meta.peer_addr.ip()),
    };
    let with_clause = if meta.tls_active { "ESMTPS" } else { "ESMTP" };
    let for_clause = meta.rcpt_to.first().map(|r| format!(" for <{r}>")).unwrap_or_default();
    format!(
        "Received: {from_clause}\r\n\tby {server_hostname} with {with_clause} id {}{for_clause};\r\n\t{}\r\n",
        meta.session_id,
        Utc::now().to_rfc2822(),
    )
}

/// Whether `body` already declares a `Date:` or `Message-ID:` header
/// (scanning only the header block, i.e. up to the first blank line).
fn header_present(body: &[u8], name: &str) -> bool {
    let header_block = body.iter().position(|w| *w == b'\n').map_or(body, |_| body);
    let text = String::from_utf8_lossy(header_block);
    for line in text.split("\r\n") {
        if line.is_empty() {
            break;
        }
        if !line.starts_with(|c: char| c.is_whitespace()) {
            if let Some((key, _)) = line.split_once(':') {
                if key.trim().eq_ignore_ascii_case(name) {
                    return true;
                }
            }
        }
    }
    false
}

/// Prepend the `Received:` trace header and synthesize `Date`/`Message-ID`
/// when missing, per §4.7's framing of what "accepted for delivery" means.
#[must_use]
pub fn stamp_message(meta: &MessageMeta, body: &[u8], server_hostname: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(body.len() + 256);
    out.extend_from_slice(build_received_header(meta, server_hostname).as_bytes());
    if !header_present(body, "Date") {
        out.extend_from_slice(format!("Date: {}\r\n", Utc::now().to_rfc2822()).as_bytes());
    }
    if !header_present(body, "Message-ID") {
        out.extend_from_slice(format!("Message-ID: <{}@{}>\r\n", Uuid::new_v4(), server_hostname).as_bytes());
    }
    out.extend_from_slice(body);
    out
}

/// Default store: write to a temp file in `directory` then atomically
/// rename to the final `{uuid}.eml` path, so a reader never observes a
/// partially-written message.
pub struct FileMessageStore {
    directory: PathBuf,
}

impl FileMessageStore {
    /// Caller must ensure `directory` exists; this mirrors the spool's
    /// own `initialize()` contract rather than creating directories
    /// implicitly on first write.
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        FileMessageStore { directory: directory.into() }
    }

    fn final_path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{id}.eml"))
    }
}

#[async_trait]
impl MessageStore for FileMessageStore {
    async fn store_rfc822(&self, meta: &MessageMeta, body: &[u8]) -> Result<String, StoreError> {
        let id = Uuid::new_v4().to_string();
        let tmp_path = self.directory.join(format!(".{id}.tmp"));
        let final_path = self.final_path(&id);

        let mut file = fs::File::create(&tmp_path).await?;
        file.write_all(body).await?;
        file.flush().await?;
        drop(file);
        fs::rename(&tmp_path, &final_path).await?;
        let _ = meta;
        Ok(id)
    }
}

/// Ensure `dir` exists before the store or spool write anything into it.
pub async fn ensure_directory(dir: impl AsRef<Path>) -> io::Result<()> {
    fs::create_dir_all(dir).await
}
