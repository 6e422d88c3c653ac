//! Reference host binary: wires every collaborator trait this crate
//! exposes to an in-memory/file-backed default implementation and drives
//! a plain-TCP accept loop plus the spool engine background task.
//!
//! Not meant to be a production MTA on its own -- a real deployment
//! supplies its own `AuthService`, `MailRelay`, and TLS material. This
//! is the wiring a host would copy and adapt, the same role the teacher
//! library's own `smtpbis-server` binary played for its narrower demo
//! `Handler`.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use esmtpd_core::auth::{InMemoryAuthRateLimiter, NullAuthService};
use esmtpd_core::config::ServerConfig;
use esmtpd_core::events::HookChain;
use esmtpd_core::handler::{Handler, NullUserDirectory};
use esmtpd_core::interceptor::default_chain;
use esmtpd_core::ratelimit::InMemoryConnectionLimiter;
use esmtpd_core::spool::{
    AllowAllPolicy, FileSpoolStore, InMemoryLockManager, MailRelay, Outcome, RelayRequest, SpoolEngine, SpoolMetaStore,
};
use esmtpd_core::store::FileMessageStore;
use esmtpd_core::{serve, NoTls};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, watch};

#[derive(Parser, Debug)]
#[command(name = "esmtpd-server", about = "Reference ESMTP server built on esmtpd-core")]
struct Args {
    /// Address to accept SMTP connections on.
    #[arg(long, default_value = "127.0.0.1:2525")]
    listen: SocketAddr,

    /// Hostname advertised in the greeting banner and Received headers.
    #[arg(long, default_value = "localhost")]
    hostname: String,

    /// Directory accepted messages are written to.
    #[arg(long, default_value = "./var/mail")]
    mail_dir: PathBuf,

    /// Directory spool metadata is written to.
    #[arg(long, default_value = "./var/spool")]
    spool_dir: PathBuf,
}

/// Demo relay that logs every attempted delivery instead of opening an
/// outbound connection -- a host replaces this with a real MX-resolving
/// SMTP client.
struct LoggingRelay;

#[async_trait::async_trait]
impl MailRelay for LoggingRelay {
    async fn relay(&self, request: &RelayRequest) -> Outcome {
        tracing::info!(
            entry = %request.entry_id,
            sender = %request.sender,
            recipient = %request.recipient,
            bytes = request.raw_message.len(),
            "would relay message (demo relay, not actually delivering)"
        );
        Outcome::Delivered
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();
    let args = Args::parse();

    let mut config = ServerConfig::default();
    config.hostname = args.hostname;

    let store = Arc::new(FileMessageStore::new(args.mail_dir.clone()));
    let spool: Arc<dyn SpoolMetaStore> = Arc::new(FileSpoolStore::new(args.spool_dir.clone()));
    spool.initialize().await?;

    let triggers = Arc::new(esmtpd_core::spool::TriggerCoalescer::new());
    let handler = Arc::new(Handler {
        auth: Arc::new(NullAuthService),
        auth_limiter: Arc::new(InMemoryAuthRateLimiter::new(config.auth_limiter.clone())),
        connection_limiter: Arc::new(InMemoryConnectionLimiter::new(config.connection_limiter.clone())),
        store,
        spool: spool.clone(),
        triggers: triggers.clone(),
        hooks: Arc::new(HookChain::with_default()),
        users: Arc::new(NullUserDirectory),
        config: config.clone(),
    });

    let locks = Arc::new(InMemoryLockManager::new(Duration::from_secs(300)));
    let engine = Arc::new(SpoolEngine::new(
        spool,
        locks,
        Arc::new(LoggingRelay),
        Arc::new(AllowAllPolicy),
        triggers,
        config.spool.clone(),
        config.hostname.clone(),
    ));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    // Held for the program's lifetime so the spool engine's admin-trigger
    // channel stays open; this binary has no external trigger source yet.
    let (_admin_tx, admin_rx) = mpsc::channel::<esmtpd_core::spool::Trigger>(1);

    let spool_shutdown_rx = shutdown_rx.clone();
    let spool_task = tokio::spawn(engine.run(admin_rx, spool_shutdown_rx));

    let listener = TcpListener::bind(args.listen).await?;
    tracing::info!(addr = %args.listen, "listening");
    let interceptors = Arc::new(default_chain());

    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (socket, peer_addr) = accepted?;
                let handler = handler.clone();
                let interceptors = interceptors.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    let io: Box<dyn esmtpd_core::AsyncStream> = Box::new(socket);
                    if let Err(e) = serve(io, peer_addr, handler, interceptors, Arc::new(NoTls), shutdown_rx).await {
                        tracing::warn!(peer = %peer_addr, error = %e, "session ended with error");
                    }
                });
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown signal received");
                shutdown_tx.send(true).ok();
                break;
            }
        }
    }

    spool_task.await.ok();
    Ok(())
}
