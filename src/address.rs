//! Address & ESMTP parameter parsing/normalization (C2).
//!
//! Tokenizing a `MAIL FROM:`/`RCPT TO:` argument string into a path plus
//! parameter tokens is simple line-oriented work; the value this module
//! adds over a bare grammar parser is the normalization and policy layer
//! the spec calls for: angle-bracket stripping, CR/LF injection
//! rejection, IDNA domain normalization, parameter uppercasing/counting,
//! and an opt-in allow list per command.

use crate::error::AddressError;

pub const MAX_PARAMS: usize = 10;

/// `MAIL FROM` reverse-path: either a mailbox, or the null path `<>`
/// used on bounce messages.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReversePath {
    Null,
    Mailbox(String),
}

impl ReversePath {
    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            ReversePath::Null => "",
            ReversePath::Mailbox(s) => s,
        }
    }

    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self, ReversePath::Null)
    }
}

/// `RCPT TO` forward-path. Always a concrete mailbox in this engine
/// (source-routed paths per RFC 5321 §4.1.2 are not supported, matching
/// the spec's silence on source routing).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPath(pub String);

impl ForwardPath {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The domain part, lowercase ASCII after IDNA normalization.
    #[must_use]
    pub fn domain(&self) -> &str {
        self.0.rsplit_once('@').map_or("", |(_, d)| d)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawParam {
    pub name: String,
    pub value: Option<String>,
}

/// Split `FROM:<path> [params...]` (or `TO:...`) into the path token and
/// the remaining parameter tokens. `keyword` is `"FROM:"` or `"TO:"`.
fn split_verb_path<'a>(args: &'a str, keyword: &str) -> Result<(&'a str, &'a str), AddressError> {
    let trimmed = args.trim_start();
    if trimmed.len() < keyword.len() || !trimmed[..keyword.len()].eq_ignore_ascii_case(keyword) {
        return Err(AddressError::Syntax);
    }
    let after = &trimmed[keyword.len()..];
    let path_end = after.find(char::is_whitespace).unwrap_or(after.len());
    let path = &after[..path_end];
    let rest = after[path_end..].trim_start();
    Ok((path, rest))
}

fn strip_brackets(path: &str) -> &str {
    if let Some(inner) = path.strip_prefix('<') {
        if let Some(inner) = inner.strip_suffix('>') {
            return inner;
        }
    }
    path
}

fn reject_injection(s: &str) -> Result<(), AddressError> {
    if s.contains('\r') || s.contains('\n') {
        Err(AddressError::InjectionAttempt)
    } else {
        Ok(())
    }
}

/// Normalize a mailbox's domain part via IDNA ToASCII + lowercase,
/// leaving the local part untouched (SMTPUTF8 local parts are preserved
/// as-is and merely validated as UTF-8, which Rust `&str` already
/// guarantees).
fn normalize_mailbox(raw: &str) -> Result<String, AddressError> {
    reject_injection(raw)?;
    let Some((local, domain)) = raw.rsplit_once('@') else {
        return Err(AddressError::Syntax);
    };
    if domain.is_empty() {
        return Err(AddressError::EmptyDomain);
    }
    let ascii_domain = idna::domain_to_ascii(domain)
        .map_err(|_| AddressError::InvalidIdna(domain.to_string()))?;
    Ok(format!("{local}@{}", ascii_domain.to_ascii_lowercase()))
}

/// Parse `MAIL FROM:<reverse-path> [params...]`.
pub fn parse_mail_from(args: &str) -> Result<(ReversePath, Vec<RawParam>), AddressError> {
    let (path_token, rest) = split_verb_path(args, "FROM:")?;
    let inner = strip_brackets(path_token);
    let path = if inner.is_empty() {
        ReversePath::Null
    } else {
        ReversePath::Mailbox(normalize_mailbox(inner)?)
    };
    let params = parse_params(rest)?;
    Ok((path, params))
}

/// Parse `RCPT TO:<forward-path> [params...]`.
pub fn parse_rcpt_to(args: &str) -> Result<(ForwardPath, Vec<RawParam>), AddressError> {
    let (path_token, rest) = split_verb_path(args, "TO:")?;
    let inner = strip_brackets(path_token);
    if inner.is_empty() {
        return Err(AddressError::Syntax);
    }
    let path = ForwardPath(normalize_mailbox(inner)?);
    let params = parse_params(rest)?;
    Ok((path, params))
}

/// Tokenize and normalize the parameter portion of a MAIL/RCPT line:
/// names uppercased, at most [`MAX_PARAMS`] entries, no CR/LF.
pub fn parse_params(rest: &str) -> Result<Vec<RawParam>, AddressError> {
    let mut out = Vec::new();
    for tok in rest.split_whitespace() {
        if out.len() >= MAX_PARAMS {
            return Err(AddressError::TooManyParameters { max: MAX_PARAMS });
        }
        reject_injection(tok)?;
        let (name, value) = match tok.split_once('=') {
            Some((n, v)) => (n.to_ascii_uppercase(), Some(v.to_string())),
            None => (tok.to_ascii_uppercase(), None),
        };
        out.push(RawParam { name, value });
    }
    Ok(out)
}

/// Verify every parameter name is in `allowed`; returns the first
/// violation as [`AddressError::UnknownParameter`].
pub fn check_allow_list(params: &[RawParam], allowed: &[&str]) -> Result<(), AddressError> {
    for p in params {
        if !allowed.contains(&p.name.as_str()) {
            return Err(AddressError::UnknownParameter(p.name.clone()));
        }
    }
    Ok(())
}

pub const MAIL_PARAMS: &[&str] = &["SIZE", "BODY", "SMTPUTF8", "AUTH", "RET", "ENVID"];
pub const RCPT_PARAMS: &[&str] = &["NOTIFY", "ORCPT"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyType {
    SevenBit,
    EightBitMime,
    BinaryMime,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Ret {
    Full,
    Hdrs,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotifyFlag {
    Never,
    Success,
    Failure,
    Delay,
}

/// Structured view of `MAIL FROM` parameters, after allow-list/format
/// validation.
#[derive(Debug, Clone, Default)]
pub struct MailParams {
    pub size: Option<u64>,
    pub body: Option<BodyType>,
    pub smtputf8: bool,
    pub auth: Option<String>,
    pub ret: Option<Ret>,
    pub envid: Option<String>,
}

impl MailParams {
    pub fn from_raw(raw: &[RawParam]) -> Result<Self, AddressError> {
        check_allow_list(raw, MAIL_PARAMS)?;
        let mut out = MailParams::default();
        for p in raw {
            match p.name.as_str() {
                "SIZE" => {
                    let v = p.value.as_deref().ok_or_else(|| AddressError::BadParameterValue("SIZE".into()))?;
                    out.size = Some(v.parse().map_err(|_| AddressError::BadParameterValue("SIZE".into()))?);
                }
                "BODY" => {
                    let v = p.value.as_deref().unwrap_or("");
                    out.body = Some(match v.to_ascii_uppercase().as_str() {
                        "7BIT" => BodyType::SevenBit,
                        "8BITMIME" => BodyType::EightBitMime,
                        "BINARYMIME" => BodyType::BinaryMime,
                        _ => return Err(AddressError::BadParameterValue("BODY".into())),
                    });
                }
                "SMTPUTF8" => out.smtputf8 = true,
                "AUTH" => out.auth = p.value.clone(),
                "RET" => {
                    let v = p.value.as_deref().unwrap_or("");
                    out.ret = Some(match v.to_ascii_uppercase().as_str() {
                        "FULL" => Ret::Full,
                        "HDRS" => Ret::Hdrs,
                        _ => return Err(AddressError::BadParameterValue("RET".into())),
                    });
                }
                "ENVID" => {
                    out.envid = Some(
                        p.value.clone().ok_or_else(|| AddressError::BadParameterValue("ENVID".into()))?,
                    );
                }
                _ => unreachable!("checked by allow list"),
            }
        }
        Ok(out)
    }
}

/// Structured view of `RCPT TO` parameters.
#[derive(Debug, Clone, Default)]
pub struct RcptParams {
    pub notify: Option<Vec<NotifyFlag>>,
    pub orcpt: Option<String>,
}

impl RcptParams {
    pub fn from_raw(raw: &[RawParam]) -> Result<Self, AddressError> {
        check_allow_list(raw, RCPT_PARAMS)?;
        let mut out = RcptParams::default();
        for p in raw {
            match p.name.as_str() {
                "NOTIFY" => {
                    let v = p.value.as_deref().ok_or_else(|| AddressError::BadParameterValue("NOTIFY".into()))?;
                    let mut flags = Vec::new();
                    for item in v.split(',') {
                        flags.push(match item.to_ascii_uppercase().as_str() {
                            "NEVER" => NotifyFlag::Never,
                            "SUCCESS" => NotifyFlag::Success,
                            "FAILURE" => NotifyFlag::Failure,
                            "DELAY" => NotifyFlag::Delay,
                            _ => return Err(AddressError::BadParameterValue("NOTIFY".into())),
                        });
                    }
                    out.notify = Some(flags);
                }
                "ORCPT" => {
                    out.orcpt = Some(
                        p.value.clone().ok_or_else(|| AddressError::BadParameterValue("ORCPT".into()))?,
                    );
                }
                _ => unreachable!("checked by allow list"),
            }
        }
        Ok(out)
    }

    /// Per-recipient DSN NOTIFY rule (§4.10 step 6): absent, or containing
    /// `FAILURE`, means send a DSN on permanent failure; `NEVER` suppresses it.
    #[must_use]
    pub fn wants_failure_dsn(&self) -> bool {
        match &self.notify {
            None => true,
            Some(flags) if flags.contains(&NotifyFlag::Never) => false,
            Some(flags) => flags.contains(&NotifyFlag::Failure),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn null_reverse_path_accepted() {
        let (path, params) = parse_mail_from("FROM:<>").unwrap();
        assert_eq!(path, ReversePath::Null);
        assert!(params.is_empty());
    }

    #[test]
    fn mail_from_with_params() {
        let (path, params) = parse_mail_from("FROM:<a@EXAMPLE.com> SIZE=100 SMTPUTF8").unwrap();
        assert_eq!(path, ReversePath::Mailbox("a@example.com".to_string()));
        let parsed = MailParams::from_raw(&params).unwrap();
        assert_eq!(parsed.size, Some(100));
        assert!(parsed.smtputf8);
    }

    #[test]
    fn rcpt_to_empty_domain_rejected() {
        let err = parse_rcpt_to("TO:<user@>").unwrap_err();
        assert_eq!(err, AddressError::EmptyDomain);
    }

    #[test]
    fn rejects_cr_lf_injection() {
        let err = parse_mail_from("FROM:<a@b\rX>").unwrap_err();
        assert_eq!(err, AddressError::InjectionAttempt);
    }

    #[test]
    fn idna_domain_normalized() {
        let (path, _) = parse_mail_from("FROM:<a@EXAMPLE.COM>").unwrap();
        assert_eq!(path.as_str(), "a@example.com");
    }

    #[test]
    fn too_many_params_rejected() {
        let many: String = (0..11).map(|i| format!("P{i}=1 ")).collect();
        let err = parse_params(&many).unwrap_err();
        assert_eq!(err, AddressError::TooManyParameters { max: MAX_PARAMS });
    }

    #[test]
    fn unknown_param_rejected() {
        let (_, params) = parse_mail_from("FROM:<a@b.com> BOGUS=1").unwrap();
        let err = MailParams::from_raw(&params).unwrap_err();
        assert_eq!(err, AddressError::UnknownParameter("BOGUS".to_string()));
    }

    #[test]
    fn notify_never_suppresses_dsn() {
        let p = RcptParams { notify: Some(vec![NotifyFlag::Never]), orcpt: None };
        assert!(!p.wants_failure_dsn());
    }

    #[test]
    fn notify_absent_defaults_to_sending_dsn() {
        let p = RcptParams::default();
        assert!(p.wants_failure_dsn());
    }
}
