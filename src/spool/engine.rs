//! Spool engine (C11): scans due entries, dispatches each recipient via
//! the relay boundary, classifies outcomes, reschedules or removes, and
//! enqueues DSNs for permanent per-recipient failures.
//!
//! Structured as one scheduler task merging a trigger channel with a
//! `tokio::time::interval` ticker via `tokio::select!`, handing candidate
//! ids to a bounded worker pool through a semaphore -- the same
//! ticker/shutdown-select idiom the corpus uses for its long-running
//! service loops (grounded in the empath `processor` module).

use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tokio::time::{interval, MissedTickBehavior};

use crate::config::SpoolConfig;
use crate::spool::dsn::{compose_dsn, is_bounceable, FailedRecipient};
use crate::spool::entry::{now_epoch_ms, SpoolEntry, SpoolMetaStore};
use crate::spool::lock::LockManager;
use crate::spool::trigger::{Trigger, TriggerCoalescer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Delivered,
    Transient(String),
    Permanent(String),
}

/// A single delivery attempt for one recipient of one spool entry.
#[derive(Debug, Clone)]
pub struct RelayRequest {
    pub entry_id: String,
    pub sender: String,
    pub recipient: String,
    pub raw_message: Arc<Vec<u8>>,
    pub message_id: String,
    pub authenticated: bool,
}

/// The `MailRelay.relay(request) -> result|transient|permanent` boundary
/// (§6). Out of scope: MX lookup and the wire-level outbound SMTP client
/// live behind this trait, supplied by the host.
#[async_trait::async_trait]
pub trait MailRelay: Send + Sync {
    async fn relay(&self, request: &RelayRequest) -> Outcome;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessDecision {
    Allowed,
    Denied,
}

/// The `RelayAccessPolicy.evaluate(ctx) -> Allowed|Denied` boundary
/// (§6); e.g. a host might deny relaying to domains outside an allow
/// list. Default allows everything.
#[async_trait::async_trait]
pub trait RelayAccessPolicy: Send + Sync {
    async fn evaluate(&self, request: &RelayRequest) -> AccessDecision;
}

pub struct AllowAllPolicy;

#[async_trait::async_trait]
impl RelayAccessPolicy for AllowAllPolicy {
    async fn evaluate(&self, _request: &RelayRequest) -> AccessDecision {
        AccessDecision::Allowed
    }
}

/// Classify a relay `Outcome` into the recipients that were delivered
/// and the ones that failed, permanent failures carrying their reason
/// for DSN composition (§4.10 step 5).
fn classify(recipient: &str, outcome: Outcome) -> (bool, Option<String>) {
    match outcome {
        Outcome::Delivered => (true, None),
        Outcome::Transient(_) => (false, None),
        Outcome::Permanent(reason) => {
            tracing::debug!(recipient, reason = %reason, "permanent relay failure");
            (false, Some(reason))
        }
    }
}

pub struct SpoolEngine {
    store: Arc<dyn SpoolMetaStore>,
    locks: Arc<dyn LockManager>,
    relay: Arc<dyn MailRelay>,
    policy: Arc<dyn RelayAccessPolicy>,
    coalescer: Arc<TriggerCoalescer>,
    config: SpoolConfig,
    server_hostname: String,
}

impl SpoolEngine {
    #[must_use]
    pub fn new(
        store: Arc<dyn SpoolMetaStore>,
        locks: Arc<dyn LockManager>,
        relay: Arc<dyn MailRelay>,
        policy: Arc<dyn RelayAccessPolicy>,
        coalescer: Arc<TriggerCoalescer>,
        config: SpoolConfig,
        server_hostname: String,
    ) -> Self {
        SpoolEngine { store, locks, relay, policy, coalescer, config, server_hostname }
    }

    /// Run the scheduler loop until `shutdown` resolves. Intended to be
    /// spawned as its own task by the host binary.
    pub async fn run(self: Arc<Self>, mut triggers: mpsc::Receiver<Trigger>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        let mut ticker = interval(std::time::Duration::from_secs(self.config.scan_interval_seconds.max(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let permits = Arc::new(Semaphore::new(self.config.workers.max(1)));

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
                _ = ticker.tick() => {
                    self.coalescer.submit(Some(Trigger::Full));
                }
                Some(trigger) = triggers.recv() => {
                    self.coalescer.submit(Some(trigger));
                }
            }

            while let Some(trigger) = self.coalescer.poll() {
                self.run_pass(trigger, &permits).await;
            }
        }
    }

    async fn run_pass(&self, trigger: Trigger, permits: &Arc<Semaphore>) {
        let ids = match self.store.list().await {
            Ok(ids) => ids,
            Err(e) => {
                tracing::warn!(error = %e, "spool scan failed");
                return;
            }
        };

        let domain_filter = match &trigger {
            Trigger::Full => None,
            Trigger::Domain(d) => Some(d.clone()),
        };

        let mut handles = Vec::new();
        for id in ids {
            let permit = permits.clone().acquire_owned().await.expect("semaphore never closed");
            let this = self.snapshot();
            let domain_filter = domain_filter.clone();
            handles.push(tokio::spawn(async move {
                let _permit = permit;
                this.process_entry(&id, domain_filter.as_deref()).await;
            }));
        }
        for h in handles {
            let _ = h.await;
        }
    }

    /// Cheap `Arc`-cloned view of the collaborators, used to hand work
    /// to a spawned task without borrowing `self`.
    fn snapshot(&self) -> EngineHandle {
        EngineHandle {
            store: self.store.clone(),
            locks: self.locks.clone(),
            relay: self.relay.clone(),
            policy: self.policy.clone(),
            config: self.config.clone(),
            server_hostname: self.server_hostname.clone(),
        }
    }
}

struct EngineHandle {
    store: Arc<dyn SpoolMetaStore>,
    locks: Arc<dyn LockManager>,
    relay: Arc<dyn MailRelay>,
    policy: Arc<dyn RelayAccessPolicy>,
    config: SpoolConfig,
    server_hostname: String,
}

impl EngineHandle {
    /// Steps 3-9 of §4.10 for one candidate entry.
    async fn process_entry(&self, id: &str, domain_filter: Option<&str>) {
        if !self.locks.try_lock(id).await {
            return;
        }

        let result = self.process_locked(id, domain_filter).await;
        if let Err(e) = result {
            tracing::warn!(entry = id, error = %e, "spool entry processing failed");
        }
        self.locks.unlock(id).await;
    }

    async fn process_locked(&self, id: &str, domain_filter: Option<&str>) -> Result<(), crate::error::SpoolError> {
        let mut entry = self.store.read_meta(id).await?;
        let now = now_epoch_ms();
        // A full pass respects the schedule; a domain-scoped pass bypasses
        // it, since it targets a specific relay event rather than the
        // entry's own retry clock.
        if domain_filter.is_none() && !entry.is_due(now) {
            return Ok(());
        }

        let targets: Vec<String> = match domain_filter {
            Some(d) => entry.recipients_in_domain(d).into_iter().map(String::from).collect(),
            None => entry.recipients.clone(),
        };
        if targets.is_empty() {
            return Ok(());
        }

        let raw = Arc::new(self.store.read_raw(id).await?);
        let mut delivered = Vec::new();
        let mut permanent_failures = Vec::new();

        for recipient in &targets {
            let request = RelayRequest {
                entry_id: entry.id.clone(),
                sender: entry.sender.clone(),
                recipient: recipient.clone(),
                raw_message: raw.clone(),
                message_id: entry.message_id.clone(),
                authenticated: entry.authenticated,
            };

            if matches!(self.policy.evaluate(&request).await, AccessDecision::Denied) {
                permanent_failures.push((recipient.clone(), "5.7.1 relaying denied".to_string()));
                continue;
            }

            let outcome = self.relay.relay(&request).await;
            let (ok, reason) = classify(recipient, outcome);
            if ok {
                delivered.push(recipient.clone());
            } else if let Some(reason) = reason {
                permanent_failures.push((recipient.clone(), reason));
            }
            // Transient (reason == None, ok == false): recipient stays queued.
        }

        let mut bounce_candidates = Vec::new();
        for (recipient, reason) in &permanent_failures {
            let wants_dsn = entry.rcpt_dsn.get(recipient).map_or(true, |d| d.notify_wants_failure);
            if wants_dsn {
                bounce_candidates.push(FailedRecipient {
                    address: recipient.clone(),
                    orcpt: entry.rcpt_dsn.get(recipient).and_then(|d| d.orcpt.clone()),
                    reason: reason.clone(),
                });
            }
        }

        let mut removed: Vec<String> = delivered.clone();
        removed.extend(permanent_failures.iter().map(|(r, _)| r.clone()));
        entry.recipients.retain(|r| !removed.contains(r));

        if !bounce_candidates.is_empty() && is_bounceable(&entry.sender) {
            if let Some((bounce_entry, bounce_bytes)) = compose_dsn(
                &self.server_hostname,
                &entry.sender,
                entry.dsn_envid.as_deref(),
                entry.dsn_ret(),
                &raw,
                &bounce_candidates,
            ) {
                self.store.create(&bounce_entry, &bounce_bytes).await?;
            }
        }

        if domain_filter.is_none() {
            if entry.recipients.is_empty() {
                self.store.remove(id).await?;
                return Ok(());
            }

            entry.attempt += 1;
            if entry.attempt > self.config.max_retries {
                // Treat all remaining recipients as permanent failures.
                let leftover: Vec<FailedRecipient> = entry
                    .recipients
                    .iter()
                    .filter(|r| entry.rcpt_dsn.get(*r).map_or(true, |d| d.notify_wants_failure))
                    .map(|r| FailedRecipient {
                        address: r.clone(),
                        orcpt: entry.rcpt_dsn.get(r).and_then(|d| d.orcpt.clone()),
                        reason: "4.4.7 retry count exceeded".to_string(),
                    })
                    .collect();
                if !leftover.is_empty() && is_bounceable(&entry.sender) {
                    if let Some((bounce_entry, bounce_bytes)) = compose_dsn(
                        &self.server_hostname,
                        &entry.sender,
                        entry.dsn_envid.as_deref(),
                        entry.dsn_ret(),
                        &raw,
                        &leftover,
                    ) {
                        self.store.create(&bounce_entry, &bounce_bytes).await?;
                    }
                }
                self.store.remove(id).await?;
                return Ok(());
            }

            entry.next_attempt_at_epoch_ms = now + self.config.backoff_seconds(entry.attempt) * 1000;
            self.store.write_meta(&entry).await?;
        } else if entry.recipients.is_empty() {
            self.store.remove(id).await?;
        } else {
            // Domain-scoped passes update per-recipient state but never
            // advance the entry's own attempt/nextAttemptAt (§4.10, §9).
            self.store.write_meta(&entry).await?;
        }

        Ok(())
    }
}
