//! Pluggable policy interceptor chain (C3 state machine + C4 dispatch).
//!
//! The state machine in §4.3 is expressed as the default, always-present
//! interceptor in this chain rather than as hardwired `match` arms in the
//! dispatcher, so hosts can insert their own interceptors (e.g. a
//! greylisting policy, or an ETRN capability gate per the open question
//! in §9) ahead of or behind it by `order`.

use async_trait::async_trait;

use crate::config::ServerConfig;
use crate::reply::Reply;
use crate::session::{Phase, Session};

/// Recognized invocation points. Most interceptors run at `Command`, but
/// `DataPre` (right before the `354` that starts a DATA body) and `Auth`
/// (right before credential verification) are distinguished so a host
/// can hook either without parsing command text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Command,
    DataPre,
    Auth,
}

#[derive(Debug, Clone)]
pub enum Action {
    Proceed,
    Deny(Reply),
    /// Close the connection, optionally after sending a reply.
    Drop(Option<Reply>),
}

pub struct InterceptorContext<'a> {
    pub session: &'a Session,
    pub config: &'a ServerConfig,
    pub stage: Stage,
    /// Uppercased command verb, e.g. `"MAIL"`.
    pub command: &'a str,
    pub args: &'a str,
}

#[async_trait]
pub trait Interceptor: Send + Sync {
    /// Ascending sort key; lower runs first. The chain short-circuits on
    /// the first non-`Proceed`.
    fn order(&self) -> i32;

    async fn check(&self, ctx: &InterceptorContext<'_>) -> Action;
}

/// Commands allowed before a greeting has been issued (§4.3).
const PRE_GREETING_ALLOWED: &[&str] = &["NOOP", "QUIT", "HELP", "RSET", "EHLO", "HELO"];
/// Commands allowed while `BDAT_IN_PROGRESS` (§4.3).
const BDAT_IN_PROGRESS_ALLOWED: &[&str] = &["BDAT", "RSET", "NOOP", "QUIT", "HELP"];

/// The default state-machine policy (§4.3), always run first (`order =
/// i32::MIN`) so host interceptors layered on top never have to
/// re-implement these baseline transition rules.
pub struct StateMachinePolicy;

#[async_trait]
impl Interceptor for StateMachinePolicy {
    fn order(&self) -> i32 {
        i32::MIN
    }

    async fn check(&self, ctx: &InterceptorContext<'_>) -> Action {
        let s = ctx.session;

        if !s.greeted && !PRE_GREETING_ALLOWED.contains(&ctx.command) {
            return Action::Deny(Reply::bad_sequence("Send HELO/EHLO first"));
        }

        if s.must_re_ehlo_after_tls && !matches!(ctx.command, "EHLO" | "HELO") {
            return Action::Deny(Reply::bad_sequence("Must re-EHLO after STARTTLS"));
        }

        if s.bdat_in_progress && !BDAT_IN_PROGRESS_ALLOWED.contains(&ctx.command) {
            return Action::Deny(Reply::bdat_in_progress());
        }

        match ctx.command {
            "STARTTLS" => {
                if s.phase != Phase::Greeted && s.phase != Phase::Connected {
                    return Action::Deny(Reply::bad_sequence("Bad sequence of commands"));
                }
                if !s.greeted {
                    return Action::Deny(Reply::bad_sequence("Send HELO/EHLO first"));
                }
                if s.tls_active {
                    return Action::Deny(Reply::bad_sequence("TLS already active"));
                }
            }
            "AUTH" => {
                if !s.greeted {
                    return Action::Deny(Reply::bad_sequence("Send HELO/EHLO first"));
                }
                if ctx.config.require_starttls_for_auth && ctx.config.enable_auth && !s.tls_active {
                    return Action::Deny(Reply::must_starttls_first());
                }
                if s.authenticated {
                    return Action::Deny(Reply::auth_already_authenticated());
                }
            }
            "MAIL" => {
                if !s.greeted {
                    return Action::Deny(Reply::bad_sequence("Send HELO/EHLO first"));
                }
                if ctx.config.require_auth_for_mail {
                    if !s.tls_active {
                        return Action::Deny(Reply::must_starttls_first());
                    }
                    if !s.authenticated {
                        return Action::Deny(Reply::authentication_required());
                    }
                }
                if s.phase != Phase::Greeted {
                    return Action::Deny(Reply::bad_sequence("Bad sequence of commands"));
                }
            }
            "RCPT" => {
                if !matches!(s.phase, Phase::MailSet | Phase::RcptSet) {
                    return Action::Deny(Reply::bad_sequence("Send MAIL FROM first"));
                }
            }
            "DATA" => {
                if !matches!(s.phase, Phase::MailSet | Phase::RcptSet) {
                    return Action::Deny(Reply::no_mail_transaction());
                }
                if !s.has_recipients() {
                    return Action::Deny(Reply::no_valid_recipients());
                }
            }
            _ => {}
        }

        Action::Proceed
    }
}

/// Run the chain in ascending `order`, short-circuiting on the first
/// non-`Proceed`. Interceptors are expected to be cheap and
/// non-blocking; any `await` inside one is itself a suspension point
/// per §5.
pub async fn run_chain(interceptors: &[Box<dyn Interceptor>], ctx: &InterceptorContext<'_>) -> Action {
    for i in interceptors {
        match i.check(ctx).await {
            Action::Proceed => continue,
            other => return other,
        }
    }
    Action::Proceed
}

/// Build the default chain: just the state machine policy. Hosts
/// `push` more interceptors and re-sort by `order`.
#[must_use]
pub fn default_chain() -> Vec<Box<dyn Interceptor>> {
    vec![Box::new(StateMachinePolicy)]
}
