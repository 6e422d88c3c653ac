//! The `Handler` collaborator boundary: ties the session driver (§4.4)
//! to every pluggable backend -- auth, storage, rate limiting, spooling,
//! VRFY/EXPN directories, and event hooks -- generalized from the
//! teacher library's `Handler` trait, which played the same role for a
//! narrower surface (EHLO/MAIL/RCPT/DATA/BDAT/TLS callbacks only).

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::auth::AuthRateLimiter;
use crate::auth::AuthService;
use crate::config::ServerConfig;
use crate::error::{ServerError, StoreError};
use crate::events::HookChain;
use crate::ratelimit::ConnectionLimiter;
use crate::session::RecipientEntry;
use crate::spool::entry::{now_epoch_ms, RecipientDsn, SpoolEntry, SpoolMetaStore};
use crate::spool::trigger::{Trigger, TriggerCoalescer};
use crate::store::{stamp_message, MessageMeta, MessageStore};

pub type EhloKeywords = BTreeMap<String, Option<String>>;

/// `UserHandler.verify`/`MailingListHandler.expand` (§6), backing VRFY
/// and EXPN. Both default to returning nothing, which the dispatcher
/// reports as "no such user" rather than 502, keeping VRFY/EXPN
/// feature-gated by `enable_vrfy`/`enable_expn` rather than by whether
/// a directory is wired up.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    async fn verify(&self, term: &str) -> Vec<String>;
    async fn expand(&self, list_name: &str) -> Vec<String>;
}

pub struct NullUserDirectory;

#[async_trait]
impl UserDirectory for NullUserDirectory {
    async fn verify(&self, _term: &str) -> Vec<String> {
        Vec::new()
    }

    async fn expand(&self, _list_name: &str) -> Vec<String> {
        Vec::new()
    }
}

/// Aggregates every collaborator the session driver needs, so
/// `server.rs` takes one `Arc<Handler>` rather than half a dozen
/// separate injected services.
pub struct Handler {
    pub config: ServerConfig,
    pub auth: Arc<dyn AuthService>,
    pub auth_limiter: Arc<dyn AuthRateLimiter>,
    pub connection_limiter: Arc<dyn ConnectionLimiter>,
    pub store: Arc<dyn MessageStore>,
    pub spool: Arc<dyn SpoolMetaStore>,
    pub triggers: Arc<TriggerCoalescer>,
    pub hooks: Arc<HookChain>,
    pub users: Arc<dyn UserDirectory>,
}

impl Handler {
    /// Stamp, store, and spool a fully-received message, then nudge the
    /// spool engine with a per-domain trigger for each distinct
    /// recipient domain (falling back to the periodic full scan
    /// otherwise; see DESIGN.md for why a per-domain nudge beats waiting
    /// on the ticker alone).
    pub async fn accept_message(
        &self,
        meta: &MessageMeta,
        body: &[u8],
        recipients: &[RecipientEntry],
    ) -> Result<String, ServerError> {
        let stamped = stamp_message(meta, body, &self.config.hostname);
        let message_id = self.store.store_rfc822(meta, &stamped).await.map_err(ServerError::Store)?;

        let rcpt_dsn = recipients
            .iter()
            .map(|r| {
                let wants_failure = match &r.notify {
                    None => true,
                    Some(flags) if flags.contains(&crate::address::NotifyFlag::Never) => false,
                    Some(flags) => flags.contains(&crate::address::NotifyFlag::Failure),
                };
                (r.path.as_str().to_string(), RecipientDsn { notify_wants_failure: wants_failure, orcpt: r.orcpt.clone() })
            })
            .collect();

        let entry = SpoolEntry {
            id: message_id.clone(),
            sender: meta.mail_from.clone(),
            recipients: meta.rcpt_to.clone(),
            message_id: message_id.clone(),
            authenticated: meta.authenticated,
            peer_address: meta.peer_addr.to_string(),
            dsn_ret_full: meta.dsn_ret == Some(crate::address::Ret::Full),
            dsn_envid: meta.dsn_envid.clone(),
            rcpt_dsn,
            attempt: 0,
            next_attempt_at_epoch_ms: now_epoch_ms(),
            arrival_epoch_ms: now_epoch_ms(),
        };

        self.spool.create(&entry, &stamped).await.map_err(|e| ServerError::Store(StoreError::Io(std::io::Error::other(e))))?;

        let mut domains: Vec<&str> = meta.rcpt_to.iter().filter_map(|r| r.rsplit_once('@').map(|(_, d)| d)).collect();
        domains.sort_unstable();
        domains.dedup();
        for domain in domains {
            self.triggers.submit(Some(Trigger::Domain(domain.to_string())));
        }

        Ok(message_id)
    }

    /// `ETRN <domain>`: nudge the spool to attempt delivery for a
    /// domain right away, bypassing the normal backoff schedule.
    pub fn request_etrn(&self, domain: &str) {
        self.triggers.submit(Some(Trigger::Domain(domain.to_string())));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::address::ForwardPath;
    use crate::auth::NullAuthService;
    use crate::events::HookChain;
    use crate::ratelimit::InMemoryConnectionLimiter;
    use crate::spool::entry::FileSpoolStore;
    use crate::store::FileMessageStore;
    use std::net::SocketAddr;

    fn recipient(addr: &str) -> RecipientEntry {
        RecipientEntry { path: ForwardPath(addr.to_string()), notify: None, orcpt: None }
    }

    #[tokio::test]
    async fn accept_message_stores_and_spools() {
        let msg_dir = tempfile::tempdir().unwrap();
        let spool_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileMessageStore::new(msg_dir.path()));
        let spool: Arc<dyn SpoolMetaStore> = Arc::new(FileSpoolStore::new(spool_dir.path()));
        spool.initialize().await.unwrap();

        let handler = Handler {
            config: ServerConfig::default(),
            auth: Arc::new(NullAuthService),
            auth_limiter: Arc::new(crate::auth::InMemoryAuthRateLimiter::new(Default::default())),
            connection_limiter: Arc::new(InMemoryConnectionLimiter::new(Default::default())),
            store,
            spool: spool.clone(),
            triggers: Arc::new(TriggerCoalescer::new()),
            hooks: Arc::new(HookChain::new(Vec::new())),
            users: Arc::new(NullUserDirectory),
        };

        let meta = MessageMeta {
            session_id: "s1".to_string(),
            peer_addr: "127.0.0.1:2525".parse::<SocketAddr>().unwrap(),
            helo_domain: Some("client.example.com".to_string()),
            mail_from: "alice@example.com".to_string(),
            rcpt_to: vec!["bob@example.org".to_string()],
            smtputf8: false,
            tls_active: false,
            authenticated: false,
            dsn_ret: None,
            dsn_envid: None,
        };

        let id = handler.accept_message(&meta, b"Subject: hi\r\n\r\nbody", &[recipient("bob@example.org")]).await.unwrap();
        let ids = spool.list().await.unwrap();
        assert_eq!(ids, vec![id]);
    }

    #[tokio::test]
    async fn accept_message_threads_authenticated_and_dsn_params_into_spool_entry() {
        let msg_dir = tempfile::tempdir().unwrap();
        let spool_dir = tempfile::tempdir().unwrap();
        let store = Arc::new(FileMessageStore::new(msg_dir.path()));
        let spool: Arc<dyn SpoolMetaStore> = Arc::new(FileSpoolStore::new(spool_dir.path()));
        spool.initialize().await.unwrap();

        let handler = Handler {
            config: ServerConfig::default(),
            auth: Arc::new(NullAuthService),
            auth_limiter: Arc::new(crate::auth::InMemoryAuthRateLimiter::new(Default::default())),
            connection_limiter: Arc::new(InMemoryConnectionLimiter::new(Default::default())),
            store,
            spool: spool.clone(),
            triggers: Arc::new(TriggerCoalescer::new()),
            hooks: Arc::new(HookChain::new(Vec::new())),
            users: Arc::new(NullUserDirectory),
        };

        let meta = MessageMeta {
            session_id: "s1".to_string(),
            peer_addr: "127.0.0.1:2525".parse::<SocketAddr>().unwrap(),
            helo_domain: Some("client.example.com".to_string()),
            mail_from: "alice@example.com".to_string(),
            rcpt_to: vec!["bob@example.org".to_string()],
            smtputf8: false,
            tls_active: true,
            authenticated: true,
            dsn_ret: Some(crate::address::Ret::Full),
            dsn_envid: Some("env-123".to_string()),
        };

        let id = handler.accept_message(&meta, b"Subject: hi\r\n\r\nbody", &[recipient("bob@example.org")]).await.unwrap();
        let entry = spool.read_meta(&id).await.unwrap();
        assert!(entry.authenticated);
        assert!(entry.dsn_ret_full);
        assert_eq!(entry.dsn_envid, Some("env-123".to_string()));
    }
}
