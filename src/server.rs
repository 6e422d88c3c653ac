//! Session driver (C3/C4): owns one accepted connection end to end --
//! greeting, command loop, DATA/BDAT ingestion, STARTTLS upgrade, AUTH
//! SASL exchange, and the final disconnect hooks. Generalized from the
//! teacher library's `smtp_server`/`InnerServer` loop, which drove the
//! same kind of `Framed` read-dispatch-reply cycle over a narrower
//! command set.

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::BytesMut;
use futures_util::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::watch;
use tokio::time::sleep;
use uuid::Uuid;

use crate::address::{parse_mail_from, parse_rcpt_to, MailParams, RcptParams, ReversePath};
use crate::auth::{decode_sasl_login_token, decode_sasl_plain, encode_sasl_challenge};
use crate::command::tokenize;
use crate::error::ServerError;
use crate::frame::{FrameCodec, InboundFrame};
use crate::handler::Handler;
use crate::config::ServerConfig;
use crate::interceptor::{run_chain, Action, InterceptorContext, Interceptor, Stage};
use crate::proxy::parse_proxy_v1_line;
use crate::ratelimit::LimitDecision;
use crate::reply::Reply;
use crate::session::{EndReason, Phase, RecipientEntry, Session};
use crate::store::MessageMeta;

/// Transport abstraction so a STARTTLS upgrade can swap the underlying
/// I/O type (plain TCP -> `TlsStream<...>`) without the session driver
/// itself being generic over it.
pub trait AsyncStream: AsyncRead + AsyncWrite + Unpin + Send {}
impl<T: AsyncRead + AsyncWrite + Unpin + Send> AsyncStream for T {}

type Transport = tokio_util::codec::Framed<Box<dyn AsyncStream>, FrameCodec>;

/// Supplies a TLS-upgraded transport for STARTTLS; out of scope for this
/// crate to construct (host owns certificate material), matching §6's
/// framing of TLS primitives as an external collaborator.
#[async_trait::async_trait]
pub trait TlsUpgrade: Send + Sync {
    async fn upgrade(&self, io: Box<dyn AsyncStream>) -> std::io::Result<Box<dyn AsyncStream>>;
}

pub struct NoTls;

#[async_trait::async_trait]
impl TlsUpgrade for NoTls {
    async fn upgrade(&self, _io: Box<dyn AsyncStream>) -> std::io::Result<Box<dyn AsyncStream>> {
        Err(std::io::Error::other("TLS not configured"))
    }
}

/// Drive one accepted connection from greeting to disconnect.
pub async fn serve(
    io: Box<dyn AsyncStream>,
    peer_addr: SocketAddr,
    handler: Arc<Handler>,
    interceptors: Arc<Vec<Box<dyn Interceptor>>>,
    tls: Arc<dyn TlsUpgrade>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let config = &handler.config;
    let mut socket: Transport = tokio_util::codec::Framed::new(io, FrameCodec::new(config.max_line_length, config.max_bdat_chunk_size));

    let Some(peer_addr) = resolve_peer_addr(&mut socket, config, peer_addr).await? else {
        return Ok(());
    };

    if let LimitDecision::TooManyConnections = handler.connection_limiter.try_acquire_connection(peer_addr.ip()) {
        socket.send(Reply::service_not_available(&config.hostname)).await.ok();
        return Ok(());
    }
    let _release_guard = ConnectionGuard { handler: handler.clone(), peer_addr };

    let session_id = Uuid::new_v4().to_string();
    let mut session = Session::new(session_id.clone(), peer_addr, config.hostname.clone());

    socket
        .send(Reply::new(220, None, format!("{} {} Service ready", config.hostname, config.service_name)))
        .await
        .map_err(ServerError::Framing)?;
    handler.hooks.on_connect(&crate::events::EventRecord::from_session(&session)).await;

    let result = run_command_loop(&mut socket, &mut session, &handler, &interceptors, &tls, &mut shutdown).await;

    handler.hooks.on_disconnect(&crate::events::EventRecord::from_session(&session), session.end_reason.as_ref().unwrap_or(&EndReason::Eof)).await;

    result
}

/// Session start gate (§5): when the peer is inside a configured trusted
/// CIDR, consume one leading PROXY protocol v1 header line before any
/// SMTP traffic and substitute its declared source address for the raw
/// TCP peer. Returns `Ok(None)` once a rejection reply has already been
/// written and the caller should close the connection without further
/// action.
async fn resolve_peer_addr(socket: &mut Transport, config: &ServerConfig, peer_addr: SocketAddr) -> Result<Option<SocketAddr>, ServerError> {
    if !config.proxy_protocol.enabled || !config.proxy_protocol.is_trusted(peer_addr.ip()) {
        return Ok(Some(peer_addr));
    }

    match socket.next().await {
        Some(Ok(InboundFrame::Line(line))) => match parse_proxy_v1_line(&String::from_utf8_lossy(&line)) {
            Ok(proxied) => Ok(Some(proxied.source)),
            Err(_) => {
                socket.send(Reply::syntax_error()).await.ok();
                Ok(None)
            }
        },
        Some(Ok(InboundFrame::Chunk(_))) => {
            socket.send(Reply::syntax_error()).await.ok();
            Ok(None)
        }
        Some(Err(e)) => {
            if let Some(reply) = e.as_reply() {
                socket.send(reply).await.ok();
            }
            Ok(None)
        }
        None => Ok(None),
    }
}

struct ConnectionGuard {
    handler: Arc<Handler>,
    peer_addr: SocketAddr,
}

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.handler.connection_limiter.release(self.peer_addr.ip());
    }
}

async fn run_command_loop(
    socket: &mut Transport,
    session: &mut Session,
    handler: &Arc<Handler>,
    interceptors: &Arc<Vec<Box<dyn Interceptor>>>,
    tls: &Arc<dyn TlsUpgrade>,
    shutdown: &mut watch::Receiver<bool>,
) -> Result<(), ServerError> {
    let idle = handler.config.idle_timeout();

    loop {
        let frame = tokio::select! {
            biased;
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    socket.send(Reply::service_not_available(&handler.config.hostname)).await.ok();
                    session.end_reason = Some(EndReason::Shutdown);
                    return Ok(());
                }
                continue;
            }
            frame = socket.next() => frame,
            () = sleep(idle) => {
                socket.send(Reply::idle_timeout()).await.ok();
                session.end_reason = Some(EndReason::IdleTimeout);
                return Ok(());
            }
        };

        let Some(frame) = frame else {
            session.end_reason = Some(EndReason::Eof);
            return Ok(());
        };

        let line = match frame {
            Ok(InboundFrame::Line(line)) => line,
            Ok(InboundFrame::Chunk(_)) => {
                // A chunk arriving with no BDAT command pending is a
                // protocol error; treat it as a syntax error rather than
                // panicking the session task.
                socket.send(Reply::syntax_error()).await.map_err(ServerError::Framing)?;
                continue;
            }
            Err(e) => {
                let fatal = e.is_fatal();
                if let Some(reply) = e.as_reply() {
                    socket.send(reply).await.map_err(ServerError::Framing)?;
                }
                if fatal {
                    session.end_reason = Some(EndReason::ProtocolError);
                    return Err(ServerError::Framing(e));
                }
                continue;
            }
        };

        let cmd = tokenize(&line);
        if cmd.verb.is_empty() {
            socket.send(Reply::syntax_error()).await.map_err(ServerError::Framing)?;
            continue;
        }

        let ctx = InterceptorContext { session, config: &handler.config, stage: Stage::Command, command: &cmd.verb, args: &cmd.args };
        match run_chain(interceptors, &ctx).await {
            Action::Deny(reply) => {
                socket.send(reply).await.map_err(ServerError::Framing)?;
                continue;
            }
            Action::Drop(reply) => {
                if let Some(reply) = reply {
                    socket.send(reply).await.map_err(ServerError::Framing)?;
                }
                session.end_reason = Some(EndReason::ProtocolError);
                return Ok(());
            }
            Action::Proceed => {}
        }

        match cmd.verb.as_str() {
            "EHLO" => dispatch_ehlo(socket, session, handler, &cmd.args, true).await?,
            "HELO" => dispatch_ehlo(socket, session, handler, &cmd.args, false).await?,
            "STARTTLS" => dispatch_starttls(socket, session, tls).await?,
            "AUTH" => dispatch_auth(socket, session, handler, &cmd.args).await?,
            "MAIL" => dispatch_mail(socket, session, &cmd.args).await?,
            "RCPT" => dispatch_rcpt(socket, session, &cmd.args).await?,
            "DATA" => dispatch_data(socket, session, handler).await?,
            "BDAT" => dispatch_bdat(socket, session, handler, &cmd.args).await?,
            "RSET" => {
                session.reset_transaction();
                socket.send(Reply::ok()).await.map_err(ServerError::Framing)?;
            }
            "NOOP" => socket.send(Reply::ok()).await.map_err(ServerError::Framing)?,
            "HELP" => socket.send(Reply::new(214, None, "See RFC 5321")).await.map_err(ServerError::Framing)?,
            "VRFY" => dispatch_vrfy(socket, handler, &cmd.args).await?,
            "EXPN" => dispatch_expn(socket, handler, &cmd.args).await?,
            "ETRN" => dispatch_etrn(socket, handler, &cmd.args).await?,
            "QUIT" => {
                socket.send(Reply::new(221, None, format!("{} closing connection", handler.config.hostname))).await.map_err(ServerError::Framing)?;
                session.end_reason = Some(EndReason::Quit);
                return Ok(());
            }
            _ => socket.send(Reply::not_implemented()).await.map_err(ServerError::Framing)?,
        }
    }
}

fn ehlo_keywords(handler: &Handler, session: &Session) -> Vec<String> {
    let config = &handler.config;
    let mut kws = vec!["PIPELINING".to_string(), "ENHANCEDSTATUSCODES".to_string(), "8BITMIME".to_string(), format!("SIZE {}", config.max_message_size)];
    if config.enable_smtputf8 {
        kws.push("SMTPUTF8".to_string());
    }
    if config.enable_chunking {
        kws.push("CHUNKING".to_string());
        kws.push("BINARYMIME".to_string());
    }
    kws.push("DSN".to_string());
    if config.enable_starttls && !session.tls_active {
        kws.push("STARTTLS".to_string());
    }
    if config.enable_auth && session.tls_active {
        kws.push("AUTH PLAIN LOGIN".to_string());
    }
    if config.enable_etrn {
        kws.push("ETRN".to_string());
    }
    kws
}

async fn dispatch_ehlo(socket: &mut Transport, session: &mut Session, handler: &Arc<Handler>, args: &str, ehlo: bool) -> Result<(), ServerError> {
    let domain = args.split_whitespace().next().unwrap_or("").to_string();
    if domain.is_empty() {
        socket.send(Reply::syntax_error_in_parameters()).await.map_err(ServerError::Framing)?;
        return Ok(());
    }
    session.set_greeted(domain.clone(), ehlo);
    session.must_re_ehlo_after_tls = false;

    let reply = if ehlo {
        let mut lines = vec![handler.config.hostname.clone()];
        lines.extend(ehlo_keywords(handler, session));
        Reply::new(250, None, lines.join("\n"))
    } else {
        Reply::ok()
    };
    socket.send(reply).await.map_err(ServerError::Framing)?;
    Ok(())
}

/// Upgrades the connection in place: the same [`Transport`] keeps driving
/// the command loop afterward, now backed by the TLS-wrapped I/O.
async fn dispatch_starttls(socket: &mut Transport, session: &mut Session, tls: &Arc<dyn TlsUpgrade>) -> Result<(), ServerError> {
    socket.send(Reply::new(220, None, "Ready to start TLS")).await.map_err(ServerError::Framing)?;

    let (io, codec, leftover) = {
        let parts = parts_of(socket);
        (parts.0, parts.1, parts.2)
    };
    if !leftover.is_empty() {
        return Err(ServerError::Pipelining);
    }

    let upgraded = tls.upgrade(io).await.map_err(ServerError::Io)?;
    *socket = tokio_util::codec::Framed::new(upgraded, codec);

    session.tls_active = true;
    session.must_re_ehlo_after_tls = true;
    session.greeted = false;
    session.reset_transaction();
    Ok(())
}

/// Deconstruct a `Framed` into its raw pieces so STARTTLS can rebuild it
/// atop the upgraded transport while preserving codec state (e.g. an
/// in-progress chunk-mode, though none should be in-flight here).
fn parts_of(framed: &mut Transport) -> (Box<dyn AsyncStream>, FrameCodec, BytesMut) {
    let (placeholder_io, _unused_end) = tokio::io::duplex(1);
    let placeholder = tokio_util::codec::Framed::new(Box::new(placeholder_io) as Box<dyn AsyncStream>, FrameCodec::new(998, 0));
    let owned = std::mem::replace(framed, placeholder);
    let parts = owned.into_parts();
    (parts.io, parts.codec, parts.read_buf)
}

async fn dispatch_auth(socket: &mut Transport, session: &mut Session, handler: &Arc<Handler>, args: &str) -> Result<(), ServerError> {
    let mut parts = args.splitn(2, ' ');
    let mechanism = parts.next().unwrap_or("").to_ascii_uppercase();
    let initial = parts.next();

    let (username, password) = match mechanism.as_str() {
        "PLAIN" => {
            let initial_response = match initial {
                Some(r) => r.to_string(),
                None => {
                    socket.send(Reply::new(334, None, "")).await.map_err(ServerError::Framing)?;
                    read_challenge_line(socket).await?
                }
            };
            match decode_sasl_plain(&initial_response) {
                Ok((_, user, pass)) => (user, pass),
                Err(_) => {
                    socket.send(Reply::syntax_error_in_parameters()).await.map_err(ServerError::Framing)?;
                    return Ok(());
                }
            }
        }
        "LOGIN" => {
            socket.send(Reply::new(334, None, encode_sasl_challenge("Username:"))).await.map_err(ServerError::Framing)?;
            let user_b64 = read_challenge_line(socket).await?;
            socket.send(Reply::new(334, None, encode_sasl_challenge("Password:"))).await.map_err(ServerError::Framing)?;
            let pass_b64 = read_challenge_line(socket).await?;
            match (decode_sasl_login_token(&user_b64), decode_sasl_login_token(&pass_b64)) {
                (Ok(user), Ok(pass)) => (user, pass),
                _ => {
                    socket.send(Reply::syntax_error_in_parameters()).await.map_err(ServerError::Framing)?;
                    return Ok(());
                }
            }
        }
        _ => {
            socket.send(Reply::not_implemented()).await.map_err(ServerError::Framing)?;
            return Ok(());
        }
    };

    let key = crate::auth::InMemoryAuthRateLimiter::key(Some(&session.peer_addr.ip().to_string()), &username);
    if let Some(remaining) = handler.auth_limiter.check_lock(&key).await {
        socket.send(Reply::auth_locked(remaining)).await.map_err(ServerError::Framing)?;
        return Ok(());
    }

    if handler.auth.verify(&username, &password).await {
        handler.auth_limiter.record_success(&key).await;
        session.authenticated = true;
        session.authenticated_user = Some(username);
        socket.send(Reply::new(235, None, "2.7.0 Authentication successful")).await.map_err(ServerError::Framing)?;
    } else {
        handler.auth_limiter.record_failure(&key).await;
        socket.send(Reply::auth_invalid_credentials()).await.map_err(ServerError::Framing)?;
    }
    Ok(())
}

async fn read_challenge_line(socket: &mut Transport) -> Result<String, ServerError> {
    match socket.next().await {
        Some(Ok(InboundFrame::Line(line))) => Ok(String::from_utf8_lossy(&line).to_string()),
        Some(Ok(InboundFrame::Chunk(_))) => Err(ServerError::SyntaxError(BytesMut::new())),
        Some(Err(e)) => Err(ServerError::Framing(e)),
        None => Err(ServerError::Eof),
    }
}

async fn dispatch_mail(socket: &mut Transport, session: &mut Session, args: &str) -> Result<(), ServerError> {
    let (path, raw_params) = match parse_mail_from(args) {
        Ok(v) => v,
        Err(e) => {
            socket.send(e.as_reply()).await.map_err(ServerError::Framing)?;
            return Ok(());
        }
    };
    let params = match MailParams::from_raw(&raw_params) {
        Ok(p) => p,
        Err(e) => {
            socket.send(e.as_reply()).await.map_err(ServerError::Framing)?;
            return Ok(());
        }
    };
    session.begin_mail(path, params.size, params.smtputf8);
    session.dsn_ret = params.ret;
    session.dsn_envid = params.envid;
    socket.send(Reply::ok()).await.map_err(ServerError::Framing)?;
    Ok(())
}

async fn dispatch_rcpt(socket: &mut Transport, session: &mut Session, args: &str) -> Result<(), ServerError> {
    let (path, raw_params) = match parse_rcpt_to(args) {
        Ok(v) => v,
        Err(e) => {
            socket.send(e.as_reply()).await.map_err(ServerError::Framing)?;
            return Ok(());
        }
    };
    let params = match RcptParams::from_raw(&raw_params) {
        Ok(p) => p,
        Err(e) => {
            socket.send(e.as_reply()).await.map_err(ServerError::Framing)?;
            return Ok(());
        }
    };
    let entry = RecipientEntry { path, notify: params.notify, orcpt: params.orcpt };
    session.phase = Phase::RcptSet;
    session.add_recipient(entry);
    socket.send(Reply::ok()).await.map_err(ServerError::Framing)?;
    Ok(())
}

const DOT_LINE: &[u8] = b".";

async fn dispatch_data(socket: &mut Transport, session: &mut Session, handler: &Arc<Handler>) -> Result<(), ServerError> {
    session.phase = Phase::DataBody;
    socket.send(Reply::new(354, None, "Start mail input; end with <CRLF>.<CRLF>")).await.map_err(ServerError::Framing)?;
    socket.codec_mut().set_suppress_bdat_detection(true);

    let mut body = Vec::new();
    let max = handler.config.max_message_size;
    let mut too_big = false;

    loop {
        let frame = socket.next().await;
        let Some(frame) = frame else {
            socket.codec_mut().set_suppress_bdat_detection(false);
            session.end_reason = Some(EndReason::Eof);
            return Ok(());
        };
        let line = match frame {
            Ok(InboundFrame::Line(line)) => line,
            Ok(InboundFrame::Chunk(_)) => continue,
            Err(e) => {
                socket.codec_mut().set_suppress_bdat_detection(false);
                if let Some(reply) = e.as_reply() {
                    socket.send(reply).await.map_err(ServerError::Framing)?;
                }
                return if e.is_fatal() { Err(ServerError::Framing(e)) } else { Ok(()) };
            }
        };

        if line.as_ref() == DOT_LINE {
            break;
        }

        let transformed: &[u8] = if line.starts_with(b".") { &line[1..] } else { &line[..] };
        if !too_big {
            body.extend_from_slice(transformed);
            body.extend_from_slice(b"\r\n");
            if body.len() as u64 > max {
                too_big = true;
            }
        }
    }

    socket.codec_mut().set_suppress_bdat_detection(false);

    if too_big {
        let reply = Reply::message_too_big();
        handler.hooks.on_message_rejected(&crate::events::EventRecord::from_session(session), reply.code(), reply.text()).await;
        session.reset_transaction();
        socket.send(reply).await.map_err(ServerError::Framing)?;
        return Ok(());
    }

    finalize_message(socket, session, handler, body).await
}

async fn dispatch_bdat(socket: &mut Transport, session: &mut Session, handler: &Arc<Handler>, args: &str) -> Result<(), ServerError> {
    let mut tokens = args.split_whitespace();
    let Some(size_tok) = tokens.next() else {
        socket.send(Reply::syntax_error_in_parameters()).await.map_err(ServerError::Framing)?;
        return Ok(());
    };
    let Ok(size) = size_tok.parse::<u64>() else {
        socket.send(Reply::syntax_error_in_parameters()).await.map_err(ServerError::Framing)?;
        return Ok(());
    };
    let last = tokens.next().is_some_and(|t| t.eq_ignore_ascii_case("LAST"));

    session.phase = Phase::BdatChunks;
    session.bdat_in_progress = !last;

    let chunk = match socket.next().await {
        Some(Ok(InboundFrame::Chunk(bytes))) => bytes,
        Some(Ok(InboundFrame::Line(_))) => {
            socket.send(Reply::syntax_error()).await.map_err(ServerError::Framing)?;
            return Ok(());
        }
        Some(Err(e)) => return Err(ServerError::Framing(e)),
        None => {
            session.end_reason = Some(EndReason::Eof);
            return Ok(());
        }
    };

    debug_assert_eq!(chunk.len() as u64, size, "codec always delivers exactly the chunk size it parsed off the BDAT line");

    session.message_bytes += chunk.len() as u64;
    if session.message_bytes > handler.config.max_message_size {
        let reply = Reply::message_too_big();
        handler.hooks.on_message_rejected(&crate::events::EventRecord::from_session(session), reply.code(), reply.text()).await;
        session.reset_transaction();
        socket.send(reply).await.map_err(ServerError::Framing)?;
        return Ok(());
    }
    session.bdat_buffer.extend_from_slice(&chunk);

    if !last {
        socket.send(Reply::new(250, None, format!("{} bytes received", chunk.len()))).await.map_err(ServerError::Framing)?;
        return Ok(());
    }

    session.bdat_in_progress = false;
    let body = std::mem::take(&mut session.bdat_buffer);
    finalize_message(socket, session, handler, body).await
}

async fn finalize_message(socket: &mut Transport, session: &mut Session, handler: &Arc<Handler>, body: Vec<u8>) -> Result<(), ServerError> {
    let Some(sender) = session.sender.clone() else {
        let reply = Reply::no_mail_transaction();
        handler.hooks.on_message_rejected(&crate::events::EventRecord::from_session(session), reply.code(), reply.text()).await;
        session.reset_transaction();
        socket.send(reply).await.map_err(ServerError::Framing)?;
        return Ok(());
    };

    if !session.has_recipients() {
        let reply = Reply::no_valid_recipients();
        handler.hooks.on_message_rejected(&crate::events::EventRecord::from_session(session), reply.code(), reply.text()).await;
        session.reset_transaction();
        socket.send(reply).await.map_err(ServerError::Framing)?;
        return Ok(());
    }

    match handler.connection_limiter.try_record_message(session.peer_addr.ip()) {
        LimitDecision::TooManyMessages => {
            let reply = Reply::new(452, Some(crate::reply::EnhancedCode(4, 5, 3)), "Too many messages this hour");
            handler.hooks.on_message_rejected(&crate::events::EventRecord::from_session(session), reply.code(), reply.text()).await;
            session.reset_transaction();
            socket.send(reply).await.map_err(ServerError::Framing)?;
            return Ok(());
        }
        _ => {}
    }

    let meta = MessageMeta {
        session_id: session.id.clone(),
        peer_addr: session.peer_addr,
        helo_domain: session.helo_domain.clone(),
        mail_from: sender_as_str(&sender),
        rcpt_to: session.recipients.iter().map(|r| r.path.as_str().to_string()).collect(),
        smtputf8: session.smtputf8,
        tls_active: session.tls_active,
        authenticated: session.authenticated,
        dsn_ret: session.dsn_ret,
        dsn_envid: session.dsn_envid.clone(),
    };

    let record = crate::events::EventRecord::from_session(session);
    match handler.accept_message(&meta, &body, &session.recipients).await {
        Ok(message_id) => {
            handler.hooks.on_message_accepted(&record, &message_id).await;
            session.reset_transaction();
            socket.send(Reply::new(250, None, format!("2.6.0 Message accepted for delivery as {message_id}"))).await.map_err(ServerError::Framing)?;
        }
        Err(_) => {
            let reply = Reply::storage_failure();
            handler.hooks.on_message_rejected(&record, reply.code(), reply.text()).await;
            session.reset_transaction();
            socket.send(reply).await.map_err(ServerError::Framing)?;
        }
    }
    Ok(())
}

fn sender_as_str(path: &ReversePath) -> String {
    path.as_str().to_string()
}

async fn dispatch_vrfy(socket: &mut Transport, handler: &Arc<Handler>, args: &str) -> Result<(), ServerError> {
    if !handler.config.enable_vrfy {
        socket.send(Reply::not_implemented()).await.map_err(ServerError::Framing)?;
        return Ok(());
    }
    let matches = handler.users.verify(args.trim()).await;
    let reply = match matches.as_slice() {
        [] => Reply::new(550, None, "String does not match anything"),
        [single] => Reply::new(250, None, single.clone()),
        many => Reply::new(553, None, many.join("\n")),
    };
    socket.send(reply).await.map_err(ServerError::Framing)?;
    Ok(())
}

async fn dispatch_expn(socket: &mut Transport, handler: &Arc<Handler>, args: &str) -> Result<(), ServerError> {
    if !handler.config.enable_expn {
        socket.send(Reply::not_implemented()).await.map_err(ServerError::Framing)?;
        return Ok(());
    }
    let members = handler.users.expand(args.trim()).await;
    let reply = if members.is_empty() {
        Reply::new(550, None, "No such mailing list")
    } else {
        Reply::new(250, None, members.join("\n"))
    };
    socket.send(reply).await.map_err(ServerError::Framing)?;
    Ok(())
}

async fn dispatch_etrn(socket: &mut Transport, handler: &Arc<Handler>, args: &str) -> Result<(), ServerError> {
    if !handler.config.enable_etrn {
        socket.send(Reply::not_implemented()).await.map_err(ServerError::Framing)?;
        return Ok(());
    }
    let domain = args.trim().trim_start_matches('@');
    if domain.is_empty() {
        socket.send(Reply::syntax_error_in_parameters()).await.map_err(ServerError::Framing)?;
        return Ok(());
    }
    handler.request_etrn(domain);
    socket.send(Reply::new(250, None, "Queuing started")).await.map_err(ServerError::Framing)?;
    Ok(())
}
