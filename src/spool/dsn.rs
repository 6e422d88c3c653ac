//! DSN composer (C12): builds an RFC 3464 `multipart/report` bounce
//! message for permanently failed recipients and enqueues it back into
//! the spool. Grounded in the teacher's corpus on the mail-composition
//! side (empath's `dsn` module builds the same three-part MIME
//! structure via plain `format!`, not a MIME-parsing library).

use std::fmt::Write as _;

use uuid::Uuid;

use crate::address::Ret;
use crate::spool::entry::{now_epoch_ms, RecipientDsn, SpoolEntry};

const MAX_HEADER_FIELD_LEN: usize = 500;
const MAX_ORIGINAL_MESSAGE_BYTES: usize = 256 * 1024;

/// One recipient that permanently failed, with enough context to fill
/// in a `Final-Recipient`/`Status`/`Diagnostic-Code` block.
#[derive(Debug, Clone)]
pub struct FailedRecipient {
    pub address: String,
    pub orcpt: Option<String>,
    pub reason: String,
}

/// Strip CR/LF and truncate to [`MAX_HEADER_FIELD_LEN`] octets, per
/// §4.12's "sanitize all header-interpolated values" rule.
fn sanitize(value: &str) -> String {
    let stripped: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
    stripped.chars().take(MAX_HEADER_FIELD_LEN).collect()
}

/// Pull a `5.x.x`/`4.x.x` enhanced status code out of a free-text relay
/// reason, defaulting to `5.0.0` when none is present.
#[must_use]
pub fn extract_enhanced_status(reason: &str) -> String {
    let re = regex::Regex::new(r"\b([2-5])\.\d{1,3}\.\d{1,3}\b").unwrap();
    re.find(reason).map_or_else(|| "5.0.0".to_string(), |m| m.as_str().to_string())
}

/// Whether a bounce may be generated for `sender` at all (§4.12: never
/// bounce a bounce -- envelope sender empty means this message was
/// itself a DSN).
#[must_use]
pub fn is_bounceable(sender: &str) -> bool {
    !sender.is_empty()
}

fn build_human_readable(failures: &[FailedRecipient]) -> String {
    let mut out = String::from(
        "This is the mail system.\r\n\r\nI'm sorry to have to inform you that your message could not\r\nbe delivered to one or more recipients.\r\n\r\n",
    );
    for f in failures {
        let _ = writeln!(out, "{}: {}\r", sanitize(&f.address), sanitize(&f.reason));
    }
    out
}

fn build_delivery_status(
    server_hostname: &str,
    envid: Option<&str>,
    failures: &[FailedRecipient],
) -> String {
    let mut out = format!("Reporting-MTA: dns; {}\r\n", sanitize(server_hostname));
    let _ = write!(out, "Arrival-Date: {}\r\n", chrono::Utc::now().to_rfc2822());
    if let Some(envid) = envid {
        let _ = writeln!(out, "Original-Envelope-Id: {}\r", sanitize(envid));
    }
    for f in failures {
        out.push_str("\r\n");
        let _ = writeln!(out, "Final-Recipient: rfc822; {}\r", sanitize(&f.address));
        if let Some(orcpt) = &f.orcpt {
            let _ = writeln!(out, "Original-Recipient: rfc822; {}\r", sanitize(orcpt));
        }
        out.push_str("Action: failed\r\n");
        let _ = writeln!(out, "Status: {}\r", extract_enhanced_status(&f.reason));
        let _ = writeln!(out, "Diagnostic-Code: smtp; {}\r", sanitize(&f.reason));
    }
    out
}

fn original_message_part(ret: Ret, original_raw: &[u8]) -> (&'static str, Vec<u8>) {
    match ret {
        Ret::Full => {
            let bytes = if original_raw.len() > MAX_ORIGINAL_MESSAGE_BYTES {
                &original_raw[..MAX_ORIGINAL_MESSAGE_BYTES]
            } else {
                original_raw
            };
            ("message/rfc822", bytes.to_vec())
        }
        Ret::Hdrs => {
            let header_end = original_raw
                .windows(4)
                .position(|w| w == b"\r\n\r\n")
                .unwrap_or(original_raw.len());
            ("text/rfc822-headers", original_raw[..header_end].to_vec())
        }
    }
}

/// Compose the bounce as a fresh [`SpoolEntry`] + raw RFC 5322 bytes,
/// ready for [`crate::spool::entry::SpoolMetaStore::create`]. Returns
/// `None` when `original_sender` is empty (never bounce a bounce).
#[must_use]
pub fn compose_dsn(
    server_hostname: &str,
    original_sender: &str,
    original_envid: Option<&str>,
    ret: Ret,
    original_raw: &[u8],
    failures: &[FailedRecipient],
) -> Option<(SpoolEntry, Vec<u8>)> {
    if !is_bounceable(original_sender) || failures.is_empty() {
        return None;
    }

    let boundary = format!("----=_dsn_{}", Uuid::new_v4());
    let human = build_human_readable(failures);
    let status = build_delivery_status(server_hostname, original_envid, failures);
    let (part_type, part_body) = original_message_part(ret, original_raw);

    let mut message = format!(
        "From: MAILER-DAEMON@{server_hostname}\r\n\
         To: {original_sender}\r\n\
         Subject: Delivery Status Notification (Failure)\r\n\
         Auto-Submitted: auto-replied\r\n\
         MIME-Version: 1.0\r\n\
         Content-Type: multipart/report; report-type=delivery-status; boundary=\"{boundary}\"\r\n\
         \r\n\
         --{boundary}\r\n\
         Content-Type: text/plain; charset=utf-8\r\n\
         \r\n\
         {human}\r\n\
         --{boundary}\r\n\
         Content-Type: message/delivery-status\r\n\
         \r\n\
         {status}\r\n\
         --{boundary}\r\n\
         Content-Type: {part_type}\r\n\
         \r\n",
    );
    message.push_str(&String::from_utf8_lossy(&part_body));
    let _ = write!(message, "\r\n--{boundary}--\r\n");

    let id = Uuid::new_v4().to_string();
    let entry = SpoolEntry {
        id: id.clone(),
        sender: String::new(), // null reverse-path: never bounces itself
        recipients: vec![original_sender.to_string()],
        message_id: id,
        authenticated: false,
        peer_address: "0.0.0.0:0".to_string(),
        dsn_ret_full: false,
        dsn_envid: None,
        rcpt_dsn: [(original_sender.to_string(), RecipientDsn { notify_wants_failure: false, orcpt: None })]
            .into_iter()
            .collect(),
        attempt: 0,
        next_attempt_at_epoch_ms: now_epoch_ms(),
        arrival_epoch_ms: now_epoch_ms(),
    };

    Some((entry, message.into_bytes()))
}
