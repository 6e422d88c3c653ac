//! Outbound spool/relay coordinator (C8-C12): durable metadata, a
//! single-writer lock manager, a trigger coalescer, the scheduling
//! engine that drains due entries, and DSN composition for permanent
//! failures.

pub mod dsn;
pub mod engine;
pub mod entry;
pub mod lock;
pub mod trigger;

pub use dsn::{compose_dsn, FailedRecipient};
pub use engine::{AccessDecision, AllowAllPolicy, MailRelay, Outcome, RelayAccessPolicy, RelayRequest, SpoolEngine};
pub use entry::{FileSpoolStore, SpoolEntry, SpoolMetaStore};
pub use lock::{InMemoryLockManager, LockManager};
pub use trigger::{Trigger, TriggerCoalescer};
