//! SMTP reply formatting (C4: "Reply formatting").
//!
//! Multi-line replies use `code-text` for every line but the last, and
//! `code text` for the last (RFC 5321 §4.2). When ENHANCEDSTATUSCODES is
//! negotiated the enhanced code is interpolated ahead of the text on every
//! line. Widened from the teacher library's `Reply` with the enhanced-code
//! constructors the expanded spec needs for every required return code.

use std::borrow::Cow;
use std::fmt::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnhancedCode(pub u8, pub u16, pub u16);

impl Display for EnhancedCode {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(fmt, "{}.{}.{}", self.0, self.1, self.2)
    }
}

#[derive(Debug, Clone)]
pub struct Reply {
    code: u16,
    ecode: Option<EnhancedCode>,
    text: Cow<'static, str>,
}

impl Reply {
    /// Construct a reply, returning `None` if the numeric code is out of
    /// range or the text would break line framing by containing a `\r`.
    #[must_use]
    pub fn new_checked<S: Into<Cow<'static, str>>>(
        code: u16,
        ecode: Option<EnhancedCode>,
        text: S,
    ) -> Option<Self> {
        let text = text.into();
        if !(200..600).contains(&code) || text.contains('\r') {
            return None;
        }
        Some(Reply { code, ecode, text })
    }

    #[must_use]
    pub fn new<S: Into<Cow<'static, str>>>(code: u16, ecode: Option<EnhancedCode>, text: S) -> Self {
        Self::new_checked(code, ecode, text).expect("invalid code or CR in reply text")
    }

    #[must_use]
    pub const fn code(&self) -> u16 {
        self.code
    }

    #[must_use]
    pub const fn enhanced_code(&self) -> Option<EnhancedCode> {
        self.ecode
    }

    #[must_use]
    pub fn text(&self) -> &str {
        &self.text
    }

    /// True for 2xx/3xx replies.
    #[must_use]
    pub const fn is_positive(&self) -> bool {
        self.code < 400
    }

    /// True for 4xx replies.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        self.code >= 400 && self.code < 500
    }

    /// True for 5xx replies.
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        self.code >= 500
    }

    // -- common canned replies, mirroring the teacher library's helpers --

    #[must_use]
    pub fn ok() -> Self {
        Self::new(250, None, "OK")
    }

    #[must_use]
    pub fn bad_sequence(msg: &'static str) -> Self {
        Self::new(503, None, msg)
    }

    #[must_use]
    pub fn syntax_error() -> Self {
        Self::new(500, None, "Syntax error")
    }

    #[must_use]
    pub fn syntax_error_in_parameters() -> Self {
        Self::new(501, None, "Syntax error in parameters or arguments")
    }

    #[must_use]
    pub fn not_implemented() -> Self {
        Self::new(502, None, "Command not implemented")
    }

    #[must_use]
    pub fn no_mail_transaction() -> Self {
        Self::new(503, None, "Send MAIL FROM and RCPT TO first")
    }

    #[must_use]
    pub fn no_valid_recipients() -> Self {
        Self::new(554, None, "No valid recipients")
    }

    #[must_use]
    pub fn service_not_available(hostname: &str) -> Self {
        Self::new(
            421,
            Some(EnhancedCode(4, 3, 2)),
            format!("{hostname} Service not available, closing transmission channel"),
        )
    }

    #[must_use]
    pub fn idle_timeout() -> Self {
        Self::new(421, Some(EnhancedCode(4, 4, 2)), "Idle timeout")
    }

    #[must_use]
    pub fn auth_locked(remaining_seconds: u64) -> Self {
        Self::new(
            454,
            Some(EnhancedCode(4, 7, 0)),
            format!("Too many authentication failures, retry in {remaining_seconds}s"),
        )
    }

    #[must_use]
    pub fn auth_invalid_credentials() -> Self {
        Self::new(535, Some(EnhancedCode(5, 7, 8)), "Authentication credentials invalid")
    }

    #[must_use]
    pub fn auth_already_authenticated() -> Self {
        Self::new(503, Some(EnhancedCode(5, 5, 1)), "Already authenticated")
    }

    #[must_use]
    pub fn must_starttls_first() -> Self {
        Self::new(530, Some(EnhancedCode(5, 7, 0)), "Must issue STARTTLS first")
    }

    #[must_use]
    pub fn authentication_required() -> Self {
        Self::new(530, Some(EnhancedCode(5, 7, 0)), "Authentication required")
    }

    #[must_use]
    pub fn bdat_in_progress() -> Self {
        Self::new(503, None, "BDAT in progress; send BDAT <size> [LAST] or RSET")
    }

    #[must_use]
    pub fn message_too_big() -> Self {
        Self::new(552, Some(EnhancedCode(5, 3, 4)), "Message size exceeds fixed maximum")
    }

    #[must_use]
    pub fn storage_failure() -> Self {
        Self::new(451, Some(EnhancedCode(4, 3, 0)), "Requested action aborted: local error")
    }

    #[must_use]
    pub fn unhandled_error() -> Self {
        Self::new(451, Some(EnhancedCode(4, 3, 0)), "Requested action aborted: local error")
    }

    #[must_use]
    pub fn empty_domain() -> Self {
        Self::new(553, None, "Mailbox name not allowed: domain required")
    }
}

impl Display for Reply {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut lines = self.text.lines().peekable();
        if lines.peek().is_none() {
            // No text at all still needs exactly one terminal line.
            write!(fmt, "{} ", self.code)?;
            if let Some(ecode) = &self.ecode {
                write!(fmt, "{ecode} ")?;
            }
            return writeln!(fmt, "\r");
        }

        loop {
            let line = match (lines.next(), lines.peek()) {
                (Some(line), Some(_)) => {
                    write!(fmt, "{}-", self.code)?;
                    line
                }
                (Some(line), None) => {
                    write!(fmt, "{} ", self.code)?;
                    line
                }
                (None, _) => break,
            };

            if let Some(ecode) = &self.ecode {
                write!(fmt, "{ecode} ")?;
            }

            writeln!(fmt, "{line}\r")?;
        }

        Ok(())
    }
}
