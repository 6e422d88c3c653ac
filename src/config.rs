//! Configuration surface (C16, ambient).
//!
//! Every tunable named across §4-§6 of the specification lives here as a
//! `serde`-deserializable struct with a `Default` impl matching the spec's
//! stated defaults. This crate never reads a config file itself -- binding
//! configuration to a file/env/CLI surface is the host's job, same as it
//! is in the teacher library and in every other example in the pack.

use std::net::IpAddr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Minimum recommended line length per RFC 5321 (§4.1: "default >= 998
/// octets; recommend 8192 to tolerate extensions").
pub const MIN_LINE_LENGTH: usize = 998;
pub const DEFAULT_LINE_LENGTH: usize = 8192;
pub const DEFAULT_MAX_BDAT_CHUNK_SIZE: u64 = 32 * 1024 * 1024;
pub const DEFAULT_MAX_MESSAGE_SIZE: u64 = 32 * 1024 * 1024;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Hostname advertised in the greeting and used as `Reporting-MTA`.
    pub hostname: String,
    /// Free-form service identifier in the greeting banner.
    pub service_name: String,

    pub max_line_length: usize,
    pub max_bdat_chunk_size: u64,
    pub max_message_size: u64,

    pub enable_smtputf8: bool,
    pub enable_chunking: bool,
    pub enable_starttls: bool,
    pub enable_auth: bool,
    pub enable_etrn: bool,
    pub enable_vrfy: bool,
    pub enable_expn: bool,

    pub require_starttls_for_auth: bool,
    pub require_auth_for_mail: bool,

    pub auth_limiter: AuthLimiterConfig,
    pub connection_limiter: ConnectionLimiterConfig,
    pub spool: SpoolConfig,
    pub proxy_protocol: ProxyProtocolConfig,

    pub idle_timeout_seconds: u64,
    /// Max line frames buffered before a greeting has been sent (§5).
    pub pre_greeting_buffer_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            hostname: "localhost".to_string(),
            service_name: "ESMTP esmtpd-core".to_string(),
            max_line_length: DEFAULT_LINE_LENGTH,
            max_bdat_chunk_size: DEFAULT_MAX_BDAT_CHUNK_SIZE,
            max_message_size: DEFAULT_MAX_MESSAGE_SIZE,
            enable_smtputf8: true,
            enable_chunking: true,
            enable_starttls: true,
            enable_auth: false,
            enable_etrn: false,
            enable_vrfy: false,
            enable_expn: false,
            require_starttls_for_auth: true,
            require_auth_for_mail: false,
            auth_limiter: AuthLimiterConfig::default(),
            connection_limiter: ConnectionLimiterConfig::default(),
            spool: SpoolConfig::default(),
            proxy_protocol: ProxyProtocolConfig::default(),
            idle_timeout_seconds: 300,
            pre_greeting_buffer_limit: 16,
        }
    }
}

impl ServerConfig {
    #[must_use]
    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_seconds)
    }
}

/// C5 AUTH rate limiter thresholds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthLimiterConfig {
    pub max_failures_per_window: u32,
    pub window_seconds: u64,
    pub lockout_seconds: u64,
}

impl Default for AuthLimiterConfig {
    fn default() -> Self {
        AuthLimiterConfig {
            max_failures_per_window: 5,
            window_seconds: 300,
            lockout_seconds: 60,
        }
    }
}

/// C6 connection/message rate limiter caps.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionLimiterConfig {
    pub max_connections_per_ip: u32,
    pub max_messages_per_ip_per_hour: u32,
}

impl Default for ConnectionLimiterConfig {
    fn default() -> Self {
        ConnectionLimiterConfig {
            max_connections_per_ip: 10,
            max_messages_per_ip_per_hour: 1000,
        }
    }
}

/// C8-C11 spool tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SpoolConfig {
    pub workers: usize,
    pub retry_delay_seconds: u64,
    pub max_retry_delay_seconds: u64,
    pub max_retries: u32,
    pub trigger_cooldown_millis: u64,
    pub scan_interval_seconds: u64,
}

impl Default for SpoolConfig {
    fn default() -> Self {
        SpoolConfig {
            workers: 4,
            retry_delay_seconds: 300,
            max_retry_delay_seconds: 86_400,
            max_retries: 10,
            trigger_cooldown_millis: 2_000,
            scan_interval_seconds: 60,
        }
    }
}

impl SpoolConfig {
    /// `backoff(k) = retryDelaySeconds * 2^(k-1)` capped at `maxRetryDelay`.
    #[must_use]
    pub fn backoff_seconds(&self, attempt: u32) -> u64 {
        let shift = attempt.saturating_sub(1).min(32);
        let delay = self.retry_delay_seconds.saturating_mul(1u64.checked_shl(shift).unwrap_or(u64::MAX));
        delay.min(self.max_retry_delay_seconds)
    }
}

/// PROXY protocol v1 trusted-source configuration (§5, §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyProtocolConfig {
    pub enabled: bool,
    pub trusted_cidrs: Vec<String>,
}

impl Default for ProxyProtocolConfig {
    fn default() -> Self {
        ProxyProtocolConfig {
            enabled: false,
            trusted_cidrs: Vec::new(),
        }
    }
}

impl ProxyProtocolConfig {
    /// Whether `addr` is inside one of the configured trusted CIDRs.
    ///
    /// CIDR parsing is intentionally minimal (IPv4/IPv6 literal with an
    /// optional `/prefix`); malformed entries are skipped rather than
    /// rejected so a single typo in config doesn't take the whole allow
    /// list down.
    #[must_use]
    pub fn is_trusted(&self, addr: IpAddr) -> bool {
        self.trusted_cidrs.iter().any(|cidr| cidr_contains(cidr, addr))
    }
}

fn cidr_contains(cidr: &str, addr: IpAddr) -> bool {
    let (network, prefix_len) = match cidr.split_once('/') {
        Some((net, len)) => (net, len.parse::<u32>().ok()),
        None => (cidr, None),
    };

    let Ok(network) = network.parse::<IpAddr>() else {
        return false;
    };

    match (network, addr) {
        (IpAddr::V4(net), IpAddr::V4(a)) => {
            let prefix = prefix_len.unwrap_or(32).min(32);
            let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
            (u32::from(net) & mask) == (u32::from(a) & mask)
        }
        (IpAddr::V6(net), IpAddr::V6(a)) => {
            let prefix = prefix_len.unwrap_or(128).min(128);
            let mask = if prefix == 0 { 0 } else { u128::MAX << (128 - prefix) };
            (u128::from(net) & mask) == (u128::from(a) & mask)
        }
        _ => false,
    }
}
