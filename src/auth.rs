//! AUTH: SASL decoding, the `AuthService` collaborator boundary, and the
//! per-`(peer, user)` sliding-window failure limiter (C5).

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use base64::Engine;

use crate::config::AuthLimiterConfig;

/// External collaborator (§6): `AuthService.verify(user, pass) -> bool`
/// plus `enabled`/`required`.
#[async_trait]
pub trait AuthService: Send + Sync {
    fn enabled(&self) -> bool;
    fn required(&self) -> bool {
        false
    }
    async fn verify(&self, user: &str, pass: &str) -> bool;
}

/// An `AuthService` that rejects everyone; useful as a safe default and
/// in tests.
pub struct NullAuthService;

#[async_trait]
impl AuthService for NullAuthService {
    fn enabled(&self) -> bool {
        false
    }

    async fn verify(&self, _user: &str, _pass: &str) -> bool {
        false
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SaslError {
    #[error("invalid base64")]
    InvalidBase64,
    #[error("malformed SASL PLAIN payload")]
    MalformedPlain,
}

/// Decode a SASL PLAIN initial response: base64 of
/// `authzid \0 authcid \0 passwd`; empty `authzid` is permitted.
pub fn decode_sasl_plain(b64: &str) -> Result<(Option<String>, String, String), SaslError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(b64.as_bytes())
        .map_err(|_| SaslError::InvalidBase64)?;
    let mut parts = raw.split(|b| *b == 0);
    let authzid = parts.next().ok_or(SaslError::MalformedPlain)?;
    let authcid = parts.next().ok_or(SaslError::MalformedPlain)?;
    let passwd = parts.next().ok_or(SaslError::MalformedPlain)?;
    if parts.next().is_some() {
        return Err(SaslError::MalformedPlain);
    }
    let authzid = if authzid.is_empty() {
        None
    } else {
        Some(String::from_utf8(authzid.to_vec()).map_err(|_| SaslError::MalformedPlain)?)
    };
    let authcid = String::from_utf8(authcid.to_vec()).map_err(|_| SaslError::MalformedPlain)?;
    let passwd = String::from_utf8(passwd.to_vec()).map_err(|_| SaslError::MalformedPlain)?;
    Ok((authzid, authcid, passwd))
}

/// Decode a single base64 SASL LOGIN challenge response (username or
/// password, sent across two separate `334` round-trips).
pub fn decode_sasl_login_token(b64: &str) -> Result<String, SaslError> {
    let raw = base64::engine::general_purpose::STANDARD
        .decode(b64.as_bytes())
        .map_err(|_| SaslError::InvalidBase64)?;
    String::from_utf8(raw).map_err(|_| SaslError::MalformedPlain)
}

#[must_use]
pub fn encode_sasl_challenge(prompt: &str) -> String {
    base64::engine::general_purpose::STANDARD.encode(prompt.as_bytes())
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

#[derive(Debug, Default)]
struct FailureRecord {
    failures: Vec<u64>,
    locked_until: Option<u64>,
}

/// Per `(peerIp, username)` sliding-window failure tracker with lockout
/// (C5). The in-memory implementation here is the one shipped in-tree;
/// a distributed implementation (Redis ZSET + TTL key, per §4.5) is a
/// drop-in behind the same [`AuthRateLimiter`] trait.
#[async_trait]
pub trait AuthRateLimiter: Send + Sync {
    /// Record an authentication failure; returns `Some(lockout_seconds)`
    /// if this failure tripped the lockout.
    async fn record_failure(&self, key: &str) -> Option<u64>;
    /// Remove any record for `key` (successful auth).
    async fn record_success(&self, key: &str);
    /// `Some(remaining_seconds)` if `key` is currently locked out.
    async fn check_lock(&self, key: &str) -> Option<u64>;
    /// Purge stale records (empty window, no active lock).
    async fn cleanup(&self);
}

pub struct InMemoryAuthRateLimiter {
    config: AuthLimiterConfig,
    records: Mutex<HashMap<String, FailureRecord>>,
}

impl InMemoryAuthRateLimiter {
    #[must_use]
    pub fn new(config: AuthLimiterConfig) -> Self {
        InMemoryAuthRateLimiter { config, records: Mutex::new(HashMap::new()) }
    }

    #[must_use]
    pub fn key(peer_ip: Option<&str>, username: &str) -> String {
        format!("{}:{}", peer_ip.unwrap_or("unknown"), username)
    }
}

#[async_trait]
impl AuthRateLimiter for InMemoryAuthRateLimiter {
    async fn record_failure(&self, key: &str) -> Option<u64> {
        let now = now_epoch();
        let mut records = self.records.lock().unwrap();
        let record = records.entry(key.to_string()).or_default();
        record.failures.retain(|t| *t > now.saturating_sub(self.config.window_seconds));
        record.failures.push(now);
        if record.failures.len() as u32 >= self.config.max_failures_per_window {
            let locked_until = now + self.config.lockout_seconds;
            record.locked_until = Some(locked_until);
            Some(self.config.lockout_seconds)
        } else {
            None
        }
    }

    async fn record_success(&self, key: &str) {
        self.records.lock().unwrap().remove(key);
    }

    async fn check_lock(&self, key: &str) -> Option<u64> {
        let now = now_epoch();
        let mut records = self.records.lock().unwrap();
        let Some(record) = records.get_mut(key) else {
            return None;
        };
        match record.locked_until {
            Some(until) if now < until => Some(until - now),
            Some(_) => {
                record.locked_until = None;
                None
            }
            None => None,
        }
    }

    async fn cleanup(&self) {
        let now = now_epoch();
        let mut records = self.records.lock().unwrap();
        records.retain(|_, r| {
            let has_recent_failures = r.failures.iter().any(|t| *t > now.saturating_sub(self.config.window_seconds));
            let has_active_lock = r.locked_until.is_some_and(|until| until > now);
            has_recent_failures || has_active_lock
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sasl_plain_round_trip() {
        let payload = base64::engine::general_purpose::STANDARD.encode(b"\0alice\0hunter2");
        let (authzid, authcid, passwd) = decode_sasl_plain(&payload).unwrap();
        assert_eq!(authzid, None);
        assert_eq!(authcid, "alice");
        assert_eq!(passwd, "hunter2");
    }

    #[test]
    fn sasl_plain_with_authzid() {
        let payload = base64::engine::general_purpose::STANDARD.encode(b"admin\0alice\0hunter2");
        let (authzid, authcid, _) = decode_sasl_plain(&payload).unwrap();
        assert_eq!(authzid, Some("admin".to_string()));
        assert_eq!(authcid, "alice");
    }

    #[test]
    fn sasl_plain_malformed() {
        let payload = base64::engine::general_purpose::STANDARD.encode(b"onlyone");
        assert_eq!(decode_sasl_plain(&payload), Err(SaslError::MalformedPlain));
    }

    #[tokio::test]
    async fn lockout_after_threshold() {
        let limiter = InMemoryAuthRateLimiter::new(AuthLimiterConfig {
            max_failures_per_window: 3,
            window_seconds: 300,
            lockout_seconds: 60,
        });
        let key = InMemoryAuthRateLimiter::key(Some("1.2.3.4"), "bob");

        assert_eq!(limiter.record_failure(&key).await, None);
        assert_eq!(limiter.record_failure(&key).await, None);
        assert_eq!(limiter.record_failure(&key).await, Some(60));

        let remaining = limiter.check_lock(&key).await;
        assert!(remaining.is_some());
        assert!(remaining.unwrap() <= 60);
    }

    #[tokio::test]
    async fn success_clears_record() {
        let limiter = InMemoryAuthRateLimiter::new(AuthLimiterConfig::default());
        let key = InMemoryAuthRateLimiter::key(Some("1.2.3.4"), "bob");
        limiter.record_failure(&key).await;
        limiter.record_success(&key).await;
        assert_eq!(limiter.check_lock(&key).await, None);
    }

    #[tokio::test]
    async fn cleanup_purges_empty_records() {
        let limiter = InMemoryAuthRateLimiter::new(AuthLimiterConfig {
            max_failures_per_window: 100,
            window_seconds: 0,
            lockout_seconds: 60,
        });
        let key = InMemoryAuthRateLimiter::key(Some("1.2.3.4"), "bob");
        limiter.record_failure(&key).await;
        limiter.cleanup().await;
        assert_eq!(limiter.records.lock().unwrap().len(), 0);
    }
}
