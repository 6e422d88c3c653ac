//! End-to-end protocol scenarios driven over an in-process duplex
//! transport, exercising `server::serve` the way a real TCP client would.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::sync::{mpsc, watch};

use esmtpd_core::auth::{AuthService, InMemoryAuthRateLimiter};
use esmtpd_core::config::{AuthLimiterConfig, ServerConfig};
use esmtpd_core::events::HookChain;
use esmtpd_core::handler::{Handler, NullUserDirectory};
use esmtpd_core::interceptor::default_chain;
use esmtpd_core::ratelimit::InMemoryConnectionLimiter;
use esmtpd_core::spool::{
    AllowAllPolicy, FileSpoolStore, InMemoryLockManager, MailRelay, Outcome, RelayRequest, SpoolEngine, SpoolEntry, SpoolMetaStore, Trigger,
    TriggerCoalescer,
};
use esmtpd_core::store::FileMessageStore;
use esmtpd_core::{serve, AsyncStream, NoTls};

struct TestEnv {
    handler: Arc<Handler>,
    _mail_dir: tempfile::TempDir,
    spool_dir: tempfile::TempDir,
}

async fn build_env(configure: impl FnOnce(&mut ServerConfig)) -> TestEnv {
    let mail_dir = tempfile::tempdir().unwrap();
    let spool_dir = tempfile::tempdir().unwrap();

    let mut config = ServerConfig::default();
    config.hostname = "mx.test.invalid".to_string();
    configure(&mut config);

    let store = Arc::new(FileMessageStore::new(mail_dir.path()));
    let spool: Arc<dyn SpoolMetaStore> = Arc::new(FileSpoolStore::new(spool_dir.path()));
    spool.initialize().await.unwrap();

    let handler = Arc::new(Handler {
        auth: Arc::new(FixedAuthService { user: "alice".to_string(), pass: "correct-horse".to_string() }),
        auth_limiter: Arc::new(InMemoryAuthRateLimiter::new(config.auth_limiter.clone())),
        connection_limiter: Arc::new(InMemoryConnectionLimiter::new(config.connection_limiter.clone())),
        store,
        spool: spool.clone(),
        triggers: Arc::new(TriggerCoalescer::new()),
        hooks: Arc::new(HookChain::with_default()),
        users: Arc::new(NullUserDirectory),
        config,
    });

    TestEnv { handler, _mail_dir: mail_dir, spool_dir }
}

struct FixedAuthService {
    user: String,
    pass: String,
}

#[async_trait]
impl AuthService for FixedAuthService {
    fn enabled(&self) -> bool {
        true
    }

    async fn verify(&self, user: &str, pass: &str) -> bool {
        user == self.user && pass == self.pass
    }
}

/// Spawns `serve` over an in-process duplex pair and hands back the
/// client-side half plus the session's join handle.
fn spawn_session(handler: Arc<Handler>, peer: &str) -> (tokio::io::DuplexStream, tokio::task::JoinHandle<Result<(), esmtpd_core::ServerError>>) {
    let (client, server) = tokio::io::duplex(64 * 1024);
    let peer_addr: SocketAddr = peer.parse().unwrap();
    let interceptors = Arc::new(default_chain());
    let (_shutdown_tx, shutdown_rx) = watch::channel(false);
    let io: Box<dyn AsyncStream> = Box::new(server);
    let task = tokio::spawn(serve(io, peer_addr, handler, interceptors, Arc::new(NoTls), shutdown_rx));
    (client, task)
}

/// Reads one full (possibly multi-line) SMTP reply: lines continue while
/// the separator after the 3-digit code is `-`, terminate on a ` `.
async fn read_reply(reader: &mut BufReader<tokio::io::ReadHalf<tokio::io::DuplexStream>>) -> String {
    let mut out = String::new();
    loop {
        let mut line = String::new();
        let n = reader.read_line(&mut line).await.unwrap();
        assert!(n > 0, "connection closed before a full reply was read");
        let terminal = line.as_bytes().get(3) == Some(&b' ');
        out.push_str(&line);
        if terminal {
            break;
        }
    }
    out
}

#[tokio::test]
async fn s1_minimal_delivery() {
    let env = build_env(|c| c.enable_starttls = false).await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40001");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    let greeting = read_reply(&mut reader).await;
    assert!(greeting.starts_with("220 "));

    write_half.write_all(b"EHLO c.local\r\n").await.unwrap();
    let ehlo = read_reply(&mut reader).await;
    for kw in ["PIPELINING", "8BITMIME", "SMTPUTF8", "CHUNKING", "BINARYMIME", "DSN", "ENHANCEDSTATUSCODES"] {
        assert!(ehlo.contains(kw), "missing {kw} in {ehlo}");
    }
    assert!(ehlo.lines().last().unwrap().starts_with("250 "));

    write_half.write_all(b"MAIL FROM:<a@x.test>\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "250 OK\r\n");

    write_half.write_all(b"RCPT TO:<b@y.test>\r\n").await.unwrap();
    assert_eq!(read_reply(&mut reader).await, "250 OK\r\n");

    write_half.write_all(b"DATA\r\n").await.unwrap();
    let data_reply = read_reply(&mut reader).await;
    assert!(data_reply.starts_with("354 "));

    write_half.write_all(b"Subject: t\r\n\r\nhi\r\n.\r\n").await.unwrap();
    let accepted = read_reply(&mut reader).await;
    assert!(accepted.starts_with("250 "), "{accepted}");

    write_half.write_all(b"QUIT\r\n").await.unwrap();
    let bye = read_reply(&mut reader).await;
    assert!(bye.starts_with("221 "));

    let ids = env.handler.spool.list().await.unwrap();
    assert_eq!(ids.len(), 1);
    let entry = env.handler.spool.read_meta(&ids[0]).await.unwrap();
    assert_eq!(entry.sender, "a@x.test");
    assert_eq!(entry.recipients, vec!["b@y.test".to_string()]);
}

#[tokio::test]
async fn s2_bdat_chunk_and_mid_transfer_rejection() {
    let env = build_env(|c| c.enable_starttls = false).await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40002");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await; // greeting
    write_half.write_all(b"EHLO c\r\n").await.unwrap();
    read_reply(&mut reader).await;
    write_half.write_all(b"MAIL FROM:<a@x>\r\n").await.unwrap();
    read_reply(&mut reader).await;
    write_half.write_all(b"RCPT TO:<b@y>\r\n").await.unwrap();
    read_reply(&mut reader).await;

    write_half.write_all(b"BDAT 5\r\nHELLO").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("250 "), "{reply}");

    // A non-{BDAT,RSET,NOOP,QUIT,HELP} command between chunks is rejected.
    write_half.write_all(b"MAIL FROM:<a@x>\r\n").await.unwrap();
    let rejected = read_reply(&mut reader).await;
    assert!(rejected.starts_with("503 "), "{rejected}");

    write_half.write_all(b"BDAT 0 LAST\r\n").await.unwrap();
    let finished = read_reply(&mut reader).await;
    assert!(finished.starts_with("250 "), "{finished}");

    let ids = env.handler.spool.list().await.unwrap();
    assert_eq!(ids.len(), 1);
    let raw = env.handler.spool.read_raw(&ids[0]).await.unwrap();
    assert_eq!(raw, b"HELLO");
}

#[tokio::test]
async fn s3_dot_transparency() {
    let env = build_env(|c| c.enable_starttls = false).await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40003");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await;
    write_half.write_all(b"EHLO c\r\n").await.unwrap();
    read_reply(&mut reader).await;
    write_half.write_all(b"MAIL FROM:<a@x>\r\n").await.unwrap();
    read_reply(&mut reader).await;
    write_half.write_all(b"RCPT TO:<b@y>\r\n").await.unwrap();
    read_reply(&mut reader).await;
    write_half.write_all(b"DATA\r\n").await.unwrap();
    read_reply(&mut reader).await;

    write_half.write_all(b"..foo\r\n.\r\n").await.unwrap();
    let accepted = read_reply(&mut reader).await;
    assert!(accepted.starts_with("250 "), "{accepted}");

    let ids = env.handler.spool.list().await.unwrap();
    assert_eq!(ids.len(), 1);
    let raw = env.handler.spool.read_raw(&ids[0]).await.unwrap();
    assert_eq!(raw, b".foo\r\n");
}

#[tokio::test]
async fn s4_pipelined_errors_before_greeting() {
    let env = build_env(|c| c.enable_starttls = false).await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40004");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await; // greeting

    write_half.write_all(b"MAIL FROM:<a>\r\nRCPT TO:<b>\r\n").await.unwrap();
    let first = read_reply(&mut reader).await;
    assert!(first.starts_with("503 "), "{first}");
    let second = read_reply(&mut reader).await;
    assert!(second.starts_with("503 "), "{second}");
}

#[tokio::test]
async fn s5_auth_lockout() {
    let env = build_env(|c| {
        c.enable_auth = true;
        c.require_starttls_for_auth = false;
        c.auth_limiter = AuthLimiterConfig { max_failures_per_window: 3, window_seconds: 300, lockout_seconds: 60 };
    })
    .await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40005");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await;
    write_half.write_all(b"EHLO c\r\n").await.unwrap();
    read_reply(&mut reader).await;

    use base64::Engine;
    let bad_creds = base64::engine::general_purpose::STANDARD.encode(b"\0alice\0wrong-password");
    for i in 0..5 {
        write_half.write_all(format!("AUTH PLAIN {bad_creds}\r\n").as_bytes()).await.unwrap();
        let reply = read_reply(&mut reader).await;
        if i < 3 {
            assert!(reply.starts_with("535 "), "attempt {i}: {reply}");
        } else {
            assert!(reply.starts_with("454 "), "attempt {i}: {reply}");
            assert!(reply.contains("4.7.0"), "{reply}");
        }
    }
}

struct PermanentFailRelay {
    calls: AtomicUsize,
}

#[async_trait]
impl MailRelay for PermanentFailRelay {
    async fn relay(&self, _request: &RelayRequest) -> Outcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Outcome::Permanent("5.1.1 user unknown".to_string())
    }
}

#[tokio::test]
async fn s6_permanent_relay_failure_produces_dsn() {
    let env = build_env(|_| {}).await;
    let spool = env.handler.spool.clone();

    let entry = SpoolEntry {
        id: "seed-1".to_string(),
        sender: "a@x".to_string(),
        recipients: vec!["b@y".to_string()],
        message_id: "seed-1".to_string(),
        authenticated: false,
        peer_address: "203.0.113.1:2525".to_string(),
        dsn_ret_full: false,
        dsn_envid: None,
        rcpt_dsn: HashMap::new(),
        attempt: 0,
        next_attempt_at_epoch_ms: 0,
        arrival_epoch_ms: 0,
    };
    spool.create(&entry, b"Subject: hi\r\n\r\nbody\r\n").await.unwrap();

    let locks = Arc::new(InMemoryLockManager::new(Duration::from_secs(60)));
    let relay = Arc::new(PermanentFailRelay { calls: AtomicUsize::new(0) });
    let engine = Arc::new(SpoolEngine::new(
        spool.clone(),
        locks,
        relay.clone(),
        Arc::new(AllowAllPolicy),
        Arc::new(TriggerCoalescer::new()),
        env.handler.config.spool.clone(),
        env.handler.config.hostname.clone(),
    ));

    let (admin_tx, admin_rx) = mpsc::channel::<Trigger>(1);
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let run_task = tokio::spawn(engine.run(admin_rx, shutdown_rx));

    admin_tx.send(Trigger::Full).await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        ids = spool.list().await.unwrap();
        if ids.len() == 1 && ids[0] != "seed-1" {
            break;
        }
    }

    shutdown_tx.send(true).unwrap();
    drop(admin_tx);
    run_task.await.ok();

    assert_eq!(ids.len(), 1, "expected exactly the bounce entry to remain, got {ids:?}");
    let bounce = spool.read_meta(&ids[0]).await.unwrap();
    assert_eq!(bounce.sender, "");
    assert_eq!(bounce.recipients, vec!["a@x".to_string()]);

    let raw = spool.read_raw(&ids[0]).await.unwrap();
    let raw = String::from_utf8_lossy(&raw);
    assert!(raw.contains("Content-Type: multipart/report; report-type=delivery-status"), "{raw}");
    assert!(raw.contains("Final-Recipient: rfc822; b@y"), "{raw}");
    assert!(raw.contains("Action: failed"), "{raw}");
}

#[tokio::test]
async fn boundary_mail_from_null_sender_accepted() {
    let env = build_env(|c| c.enable_starttls = false).await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40006");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await;
    write_half.write_all(b"EHLO c\r\n").await.unwrap();
    read_reply(&mut reader).await;

    write_half.write_all(b"MAIL FROM:<>\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert_eq!(reply, "250 OK\r\n");
}

#[tokio::test]
async fn boundary_empty_rcpt_domain_rejected() {
    let env = build_env(|c| c.enable_starttls = false).await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40007");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await;
    write_half.write_all(b"EHLO c\r\n").await.unwrap();
    read_reply(&mut reader).await;
    write_half.write_all(b"MAIL FROM:<a@x>\r\n").await.unwrap();
    read_reply(&mut reader).await;

    write_half.write_all(b"RCPT TO:<nodomain@>\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("553 "), "{reply}");
}

#[tokio::test]
async fn boundary_mail_before_greeting_rejected() {
    let env = build_env(|c| c.enable_starttls = false).await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40008");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await;
    write_half.write_all(b"MAIL FROM:<a@x>\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("503 "), "{reply}");
}

#[tokio::test]
async fn boundary_bdat_with_no_recipients_rejected() {
    let env = build_env(|c| c.enable_starttls = false).await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40010");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await;
    write_half.write_all(b"EHLO c\r\n").await.unwrap();
    read_reply(&mut reader).await;
    write_half.write_all(b"MAIL FROM:<a@x>\r\n").await.unwrap();
    read_reply(&mut reader).await;

    write_half.write_all(b"BDAT 5\r\nHELLO").await.unwrap();
    let chunk_reply = read_reply(&mut reader).await;
    assert!(chunk_reply.starts_with("250 "), "{chunk_reply}");

    write_half.write_all(b"BDAT 0 LAST\r\n").await.unwrap();
    let finished = read_reply(&mut reader).await;
    assert!(finished.starts_with("554 "), "{finished}");

    let ids = env.handler.spool.list().await.unwrap();
    assert!(ids.is_empty(), "expected no recipients to mean nothing got spooled, got {ids:?}");
}

#[tokio::test]
async fn boundary_zero_byte_bdat_chunk_is_valid_and_non_terminal() {
    let env = build_env(|c| c.enable_starttls = false).await;
    let (client, _task) = spawn_session(env.handler.clone(), "203.0.113.10:40009");
    let (read_half, mut write_half) = tokio::io::split(client);
    let mut reader = BufReader::new(read_half);

    read_reply(&mut reader).await;
    write_half.write_all(b"EHLO c\r\n").await.unwrap();
    read_reply(&mut reader).await;
    write_half.write_all(b"MAIL FROM:<a@x>\r\n").await.unwrap();
    read_reply(&mut reader).await;
    write_half.write_all(b"RCPT TO:<b@y>\r\n").await.unwrap();
    read_reply(&mut reader).await;

    write_half.write_all(b"BDAT 0\r\n").await.unwrap();
    let reply = read_reply(&mut reader).await;
    assert!(reply.starts_with("250 "), "{reply}");

    // still mid-transfer: anything but BDAT/RSET/NOOP/QUIT/HELP is rejected.
    write_half.write_all(b"RCPT TO:<c@y>\r\n").await.unwrap();
    let rejected = read_reply(&mut reader).await;
    assert!(rejected.starts_with("503 "), "{rejected}");

    write_half.write_all(b"BDAT 0 LAST\r\n").await.unwrap();
    let finished = read_reply(&mut reader).await;
    assert!(finished.starts_with("250 "), "{finished}");
}
