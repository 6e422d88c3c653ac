//! Connection/message rate limiting boundary (C6): per-peer concurrent
//! connection cap and a rolling hourly message cap.

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::Mutex;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::config::ConnectionLimiterConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitDecision {
    Allow,
    /// Too many concurrent connections from this peer.
    TooManyConnections,
    /// Hourly message cap for this peer has been reached.
    TooManyMessages,
}

/// Guards both "accept a new connection from this peer" and "accept one
/// more message in this connection's transaction" decisions, so a single
/// collaborator backs both the listener loop and the post-DATA hook.
pub trait ConnectionLimiter: Send + Sync {
    /// Called on accept; if `Allow`, the caller must call
    /// [`ConnectionLimiter::release`] on disconnect.
    fn try_acquire_connection(&self, peer: IpAddr) -> LimitDecision;
    fn release(&self, peer: IpAddr);
    /// Called once a message has been fully accepted (after the final
    /// `250` on DATA/BDAT LAST), to charge it against the hourly cap.
    fn try_record_message(&self, peer: IpAddr) -> LimitDecision;
}

#[derive(Debug, Default)]
struct PeerState {
    active_connections: u32,
    message_timestamps: Vec<u64>,
}

pub struct InMemoryConnectionLimiter {
    config: ConnectionLimiterConfig,
    peers: Mutex<HashMap<IpAddr, PeerState>>,
}

impl InMemoryConnectionLimiter {
    #[must_use]
    pub fn new(config: ConnectionLimiterConfig) -> Self {
        InMemoryConnectionLimiter { config, peers: Mutex::new(HashMap::new()) }
    }
}

fn now_epoch() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_secs()
}

const HOUR_SECONDS: u64 = 3600;

impl ConnectionLimiter for InMemoryConnectionLimiter {
    fn try_acquire_connection(&self, peer: IpAddr) -> LimitDecision {
        let mut peers = self.peers.lock().unwrap();
        let state = peers.entry(peer).or_default();
        if state.active_connections >= self.config.max_connections_per_ip {
            return LimitDecision::TooManyConnections;
        }
        state.active_connections += 1;
        LimitDecision::Allow
    }

    fn release(&self, peer: IpAddr) {
        let mut peers = self.peers.lock().unwrap();
        if let Some(state) = peers.get_mut(&peer) {
            state.active_connections = state.active_connections.saturating_sub(1);
            if state.active_connections == 0 && state.message_timestamps.is_empty() {
                peers.remove(&peer);
            }
        }
    }

    fn try_record_message(&self, peer: IpAddr) -> LimitDecision {
        let now = now_epoch();
        let mut peers = self.peers.lock().unwrap();
        let state = peers.entry(peer).or_default();
        state.message_timestamps.retain(|t| *t > now.saturating_sub(HOUR_SECONDS));
        if state.message_timestamps.len() as u32 >= self.config.max_messages_per_ip_per_hour {
            return LimitDecision::TooManyMessages;
        }
        state.message_timestamps.push(now);
        LimitDecision::Allow
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn peer() -> IpAddr {
        "203.0.113.7".parse().unwrap()
    }

    #[test]
    fn connection_cap_is_enforced_and_released() {
        let limiter = InMemoryConnectionLimiter::new(ConnectionLimiterConfig {
            max_connections_per_ip: 2,
            max_messages_per_ip_per_hour: 1000,
        });
        assert_eq!(limiter.try_acquire_connection(peer()), LimitDecision::Allow);
        assert_eq!(limiter.try_acquire_connection(peer()), LimitDecision::Allow);
        assert_eq!(limiter.try_acquire_connection(peer()), LimitDecision::TooManyConnections);
        limiter.release(peer());
        assert_eq!(limiter.try_acquire_connection(peer()), LimitDecision::Allow);
    }

    #[test]
    fn message_cap_is_enforced() {
        let limiter = InMemoryConnectionLimiter::new(ConnectionLimiterConfig {
            max_connections_per_ip: 10,
            max_messages_per_ip_per_hour: 2,
        });
        assert_eq!(limiter.try_record_message(peer()), LimitDecision::Allow);
        assert_eq!(limiter.try_record_message(peer()), LimitDecision::Allow);
        assert_eq!(limiter.try_record_message(peer()), LimitDecision::TooManyMessages);
    }

    #[test]
    fn different_peers_are_independent() {
        let limiter = InMemoryConnectionLimiter::new(ConnectionLimiterConfig {
            max_connections_per_ip: 1,
            max_messages_per_ip_per_hour: 1000,
        });
        let other: IpAddr = "198.51.100.2".parse().unwrap();
        assert_eq!(limiter.try_acquire_connection(peer()), LimitDecision::Allow);
        assert_eq!(limiter.try_acquire_connection(other), LimitDecision::Allow);
    }
}
