//! Session event hooks (C13): a host-observable boundary a `Handler` can
//! use for metrics, audit logging, or custom policy without touching the
//! session driver itself.

use async_trait::async_trait;
use serde::Serialize;

use crate::session::{EndReason, Session};

/// A snapshot of a [`Session`] at one of the four hook points, cheap
/// enough to serialize to a log sink or a metrics event bus.
#[derive(Debug, Clone, Serialize)]
pub struct EventRecord {
    pub session_id: String,
    pub peer_addr: String,
    pub helo_domain: Option<String>,
    pub tls_active: bool,
    pub authenticated: bool,
    pub mail_from: Option<String>,
    pub rcpt_count: usize,
}

impl EventRecord {
    #[must_use]
    pub fn from_session(session: &Session) -> Self {
        EventRecord {
            session_id: session.id.clone(),
            peer_addr: session.peer_addr.to_string(),
            helo_domain: session.helo_domain.clone(),
            tls_active: session.tls_active,
            authenticated: session.authenticated,
            mail_from: session.sender.as_ref().map(|s| s.as_str().to_string()),
            rcpt_count: session.recipients.len(),
        }
    }
}

/// Four fixed hook points in the connection lifecycle (§4.13). Every
/// method has a no-op default so a host implements only what it needs.
#[async_trait]
pub trait SessionHook: Send + Sync {
    async fn on_connect(&self, _record: &EventRecord) {}
    async fn on_message_accepted(&self, _record: &EventRecord, _message_id: &str) {}
    async fn on_message_rejected(&self, _record: &EventRecord, _code: u16, _reason: &str) {}
    async fn on_disconnect(&self, _record: &EventRecord, _reason: &EndReason) {}
}

/// A hook that logs each event at `info`/`debug` via `tracing`, the
/// always-present default so a host that registers nothing still gets
/// baseline observability (ambient stack requirement).
pub struct TracingSessionHook;

#[async_trait]
impl SessionHook for TracingSessionHook {
    async fn on_connect(&self, record: &EventRecord) {
        tracing::info!(session = %record.session_id, peer = %record.peer_addr, "connection accepted");
    }

    async fn on_message_accepted(&self, record: &EventRecord, message_id: &str) {
        tracing::info!(
            session = %record.session_id,
            message_id,
            rcpt_count = record.rcpt_count,
            "message accepted for delivery"
        );
    }

    async fn on_message_rejected(&self, record: &EventRecord, code: u16, reason: &str) {
        tracing::info!(session = %record.session_id, code, reason, "message transfer rejected");
    }

    async fn on_disconnect(&self, record: &EventRecord, reason: &EndReason) {
        tracing::info!(session = %record.session_id, reason = ?reason, "connection closed");
    }
}

/// Fan a single lifecycle event out to every registered hook, in order.
/// One hook panicking/erroring never happens here since `SessionHook`
/// methods return `()`; a hook that needs fallibility should catch its
/// own errors internally and log them.
pub struct HookChain {
    hooks: Vec<Box<dyn SessionHook>>,
}

impl HookChain {
    #[must_use]
    pub fn new(hooks: Vec<Box<dyn SessionHook>>) -> Self {
        HookChain { hooks }
    }

    #[must_use]
    pub fn with_default() -> Self {
        HookChain { hooks: vec![Box::new(TracingSessionHook)] }
    }

    pub async fn on_connect(&self, record: &EventRecord) {
        for hook in &self.hooks {
            hook.on_connect(record).await;
        }
    }

    pub async fn on_message_accepted(&self, record: &EventRecord, message_id: &str) {
        for hook in &self.hooks {
            hook.on_message_accepted(record, message_id).await;
        }
    }

    pub async fn on_message_rejected(&self, record: &EventRecord, code: u16, reason: &str) {
        for hook in &self.hooks {
            hook.on_message_rejected(record, code, reason).await;
        }
    }

    pub async fn on_disconnect(&self, record: &EventRecord, reason: &EndReason) {
        for hook in &self.hooks {
            hook.on_disconnect(record, reason).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct CountingHook {
        count: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SessionHook for CountingHook {
        async fn on_connect(&self, _record: &EventRecord) {
            self.count.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn chain_invokes_every_hook() {
        let count = Arc::new(AtomicUsize::new(0));
        let chain = HookChain::new(vec![
            Box::new(CountingHook { count: count.clone() }),
            Box::new(CountingHook { count: count.clone() }),
        ]);
        let session = Session::new(
            "s1".to_string(),
            "127.0.0.1:111".parse::<SocketAddr>().unwrap(),
            "mx.example.com".to_string(),
        );
        chain.on_connect(&EventRecord::from_session(&session)).await;
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }
}
