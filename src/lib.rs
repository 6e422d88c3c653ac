//! Embeddable asynchronous ESMTP server engine: the inbound protocol
//! core (framing, state machine, command dispatch, STARTTLS/AUTH) and
//! the outbound spool/relay coordinator (durable metadata, locking,
//! trigger coalescing, retry scheduling, DSN composition).
//!
//! A host embeds this crate by implementing the collaborator traits in
//! [`handler`], [`auth`], [`store`], [`spool`], and [`server`] for its
//! own backends, then driving [`server::serve`] per accepted connection
//! and [`spool::SpoolEngine::run`] as a background task. Nothing here
//! binds a config file, opens a listener, or installs a `tracing`
//! subscriber -- that wiring is the host binary's job (see
//! `src/bin/esmtpd-server` in this repository for a reference one).

pub mod address;
pub mod auth;
pub mod command;
pub mod config;
pub mod error;
pub mod events;
pub mod frame;
pub mod handler;
pub mod interceptor;
pub mod proxy;
pub mod ratelimit;
pub mod reply;
pub mod server;
pub mod session;
pub mod spool;
pub mod store;

pub use config::ServerConfig;
pub use error::ServerError;
pub use handler::Handler;
pub use reply::Reply;
pub use server::{serve, AsyncStream, NoTls, TlsUpgrade};
pub use session::Session;
