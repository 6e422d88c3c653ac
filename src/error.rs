//! Typed error hierarchy for every subsystem boundary.
//!
//! Each subsystem gets its own `thiserror` enum; [`ServerError`] is the
//! top-level sum type the session driver returns, and the others convert
//! into it via `From` so call sites don't have to re-derive context.

use std::io;

use thiserror::Error;

use crate::reply::Reply;

/// Errors raised while decoding the inbound byte stream into frames (C1).
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("line exceeds maximum length of {max} octets")]
    LineTooLong { max: usize },

    #[error("BDAT chunk size {size} exceeds maximum of {max}")]
    ChunkTooLarge { size: u64, max: u64 },

    #[error("I/O error while framing: {0}")]
    Io(#[from] io::Error),
}

impl FrameError {
    /// Map to the reply the wire protocol should see for this error.
    #[must_use]
    pub fn as_reply(&self) -> Option<Reply> {
        match self {
            FrameError::LineTooLong { .. } => {
                Some(Reply::new(500, None, "Line too long"))
            }
            FrameError::ChunkTooLarge { .. } => {
                Some(Reply::new(552, None, "BDAT chunk too large"))
            }
            FrameError::Io(_) => None,
        }
    }

    /// Syntax/framing errors that must close the connection rather than
    /// merely reject the one command (§7: "Line-too-long / chunk-too-big").
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, FrameError::LineTooLong { .. } | FrameError::ChunkTooLarge { .. })
    }
}

/// Errors raised while parsing/normalizing MAIL/RCPT addresses and
/// parameters (C2).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("syntax error in path")]
    Syntax,

    #[error("CR or LF not allowed in address")]
    InjectionAttempt,

    #[error("empty domain not allowed")]
    EmptyDomain,

    #[error("invalid IDNA domain: {0}")]
    InvalidIdna(String),

    #[error("invalid UTF-8 in SMTPUTF8 local part")]
    InvalidUtf8,

    #[error("unrecognized parameter: {0}")]
    UnknownParameter(String),

    #[error("too many parameters (max {max})")]
    TooManyParameters { max: usize },

    #[error("malformed parameter value for {0}")]
    BadParameterValue(String),
}

impl AddressError {
    #[must_use]
    pub fn as_reply(&self) -> Reply {
        match self {
            AddressError::EmptyDomain => Reply::new(553, None, "Domain required"),
            AddressError::UnknownParameter(p) => {
                Reply::new(555, None, format!("Unsupported parameter: {p}"))
            }
            _ => Reply::new(501, None, "Syntax error in parameters or arguments"),
        }
    }
}

/// Errors raised by the message store boundary (C7).
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error writing message: {0}")]
    Io(#[from] io::Error),

    #[error("message exceeds maximum size")]
    TooLarge,
}

/// Errors raised by the spool subsystem (C8-C11).
#[derive(Debug, Error)]
pub enum SpoolError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("metadata encode/decode error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("could not acquire lock for entry {0}")]
    Locked(String),

    #[error("entry {0} not found")]
    NotFound(String),
}

/// Errors raised while composing a DSN (C12).
#[derive(Debug, Error)]
pub enum DsnError {
    #[error("cannot bounce a message with empty envelope sender")]
    NullSender,

    #[error(transparent)]
    Spool(#[from] SpoolError),
}

/// Top-level session/server error. Mirrors the teacher library's
/// `ServerError`/`LineError` split, widened to cover every CORE subsystem.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("connection closed")]
    Eof,

    #[error("framing error: {0}")]
    Framing(#[from] FrameError),

    #[error("syntax error in command line")]
    SyntaxError(bytes::BytesMut),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("pipelined command after STARTTLS")]
    Pipelining,

    #[error("data/bdat transfer aborted")]
    DataAbort,

    #[error("server shutting down")]
    Shutdown,

    #[error("idle timeout")]
    IdleTimeout,

    #[error("store error: {0}")]
    Store(#[from] StoreError),
}
