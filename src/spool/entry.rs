//! Spool metadata store (C8): durable per-message envelope + attempt
//! state on a content-addressed layout, `<spool>/<id>.eml` +
//! `<spool>/<id>.meta.json` (§6 reference layout).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::address::Ret;
use crate::error::SpoolError;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RecipientDsn {
    pub notify_wants_failure: bool,
    pub orcpt: Option<String>,
}

/// Durable per-message state. `serde(default)` on every optional field
/// keeps reads forward-compatible with metadata written by an older
/// version of this crate (§4.7: "unknown-field tolerance").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SpoolEntry {
    pub id: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub message_id: String,
    pub authenticated: bool,
    pub peer_address: String,
    #[serde(default)]
    pub dsn_ret_full: bool,
    #[serde(default)]
    pub dsn_envid: Option<String>,
    #[serde(default)]
    pub rcpt_dsn: HashMap<String, RecipientDsn>,
    #[serde(default)]
    pub attempt: u32,
    #[serde(default)]
    pub next_attempt_at_epoch_ms: u64,
    #[serde(default)]
    pub arrival_epoch_ms: u64,
}

impl SpoolEntry {
    #[must_use]
    pub fn dsn_ret(&self) -> Ret {
        if self.dsn_ret_full {
            Ret::Full
        } else {
            Ret::Hdrs
        }
    }

    #[must_use]
    pub fn is_due(&self, now_epoch_ms: u64) -> bool {
        self.next_attempt_at_epoch_ms <= now_epoch_ms
    }

    /// Recipients whose domain matches `domain`, case-insensitively.
    #[must_use]
    pub fn recipients_in_domain(&self, domain: &str) -> Vec<&str> {
        self.recipients
            .iter()
            .filter(|r| r.rsplit_once('@').is_some_and(|(_, d)| d.eq_ignore_ascii_case(domain)))
            .map(String::as_str)
            .collect()
    }
}

#[must_use]
pub fn now_epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// The C8 collaborator boundary. A local filesystem implementation ships
/// in-tree ([`FileSpoolStore`]); a distributed store behind the same
/// trait is a drop-in, same shape as [`crate::auth::AuthRateLimiter`].
#[async_trait::async_trait]
pub trait SpoolMetaStore: Send + Sync {
    async fn initialize(&self) -> Result<(), SpoolError>;
    async fn scan_pending_count(&self) -> Result<usize, SpoolError>;
    /// All known entry ids, in a deterministic (sorted) order (§4.10 step 3).
    async fn list(&self) -> Result<Vec<String>, SpoolError>;
    async fn create(&self, entry: &SpoolEntry, raw_message: &[u8]) -> Result<(), SpoolError>;
    async fn write_meta(&self, entry: &SpoolEntry) -> Result<(), SpoolError>;
    async fn read_meta(&self, id: &str) -> Result<SpoolEntry, SpoolError>;
    async fn read_raw(&self, id: &str) -> Result<Vec<u8>, SpoolError>;
    async fn remove(&self, id: &str) -> Result<(), SpoolError>;
}

pub struct FileSpoolStore {
    directory: PathBuf,
}

impl FileSpoolStore {
    #[must_use]
    pub fn new(directory: impl Into<PathBuf>) -> Self {
        FileSpoolStore { directory: directory.into() }
    }

    fn raw_path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{id}.eml"))
    }

    fn meta_path(&self, id: &str) -> PathBuf {
        self.directory.join(format!("{id}.meta.json"))
    }
}

#[async_trait::async_trait]
impl SpoolMetaStore for FileSpoolStore {
    async fn initialize(&self) -> Result<(), SpoolError> {
        fs::create_dir_all(&self.directory).await?;
        Ok(())
    }

    async fn scan_pending_count(&self) -> Result<usize, SpoolError> {
        Ok(self.list().await?.len())
    }

    async fn list(&self) -> Result<Vec<String>, SpoolError> {
        let mut ids = Vec::new();
        let mut dir = fs::read_dir(&self.directory).await?;
        while let Some(entry) = dir.next_entry().await? {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            if let Some(id) = name.strip_suffix(".meta.json") {
                ids.push(id.to_string());
            }
        }
        ids.sort();
        Ok(ids)
    }

    async fn create(&self, entry: &SpoolEntry, raw_message: &[u8]) -> Result<(), SpoolError> {
        let raw_tmp = self.directory.join(format!(".{}.eml.tmp", entry.id));
        fs::write(&raw_tmp, raw_message).await?;
        fs::rename(&raw_tmp, self.raw_path(&entry.id)).await?;

        if let Err(e) = self.write_meta(entry).await {
            let _ = fs::remove_file(self.raw_path(&entry.id)).await;
            return Err(e);
        }
        Ok(())
    }

    async fn write_meta(&self, entry: &SpoolEntry) -> Result<(), SpoolError> {
        let json = serde_json::to_vec_pretty(entry)?;
        let tmp = self.directory.join(format!(".{}.meta.json.tmp", entry.id));
        fs::write(&tmp, &json).await?;
        fs::rename(&tmp, self.meta_path(&entry.id)).await?;
        Ok(())
    }

    async fn read_meta(&self, id: &str) -> Result<SpoolEntry, SpoolError> {
        let bytes = fs::read(self.meta_path(id)).await.map_err(|_| SpoolError::NotFound(id.to_string()))?;
        Ok(serde_json::from_slice(&bytes)?)
    }

    async fn read_raw(&self, id: &str) -> Result<Vec<u8>, SpoolError> {
        fs::read(self.raw_path(id)).await.map_err(|_| SpoolError::NotFound(id.to_string()))
    }

    async fn remove(&self, id: &str) -> Result<(), SpoolError> {
        let _ = fs::remove_file(self.raw_path(id)).await;
        let _ = fs::remove_file(self.meta_path(id)).await;
        Ok(())
    }
}
