//! Command-line tokenizing: splitting one decoded [`crate::frame::InboundFrame::Line`]
//! into an uppercased verb and its raw argument string. Everything past
//! this point (path/parameter parsing) is [`crate::address`]'s job.

/// A command line is 8-bit preserving per §4.1, so we decode it lossily
/// as UTF-8 only for the verb token -- SMTPUTF8 payload in the argument
/// string is kept as raw bytes converted with `from_utf8_lossy`, which is
/// adequate for argument parsing since RFC 6531 mailbox text is valid
/// UTF-8 by construction; truly invalid UTF-8 surfaces as a syntax error
/// downstream in `address::parse_mail_from`/`parse_rcpt_to`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandLine {
    pub verb: String,
    pub args: String,
}

/// Split `line` into verb + args. An empty line yields an empty verb,
/// which the dispatcher maps to a syntax error.
#[must_use]
pub fn tokenize(line: &[u8]) -> CommandLine {
    let text = String::from_utf8_lossy(line);
    let trimmed = text.trim_end();
    match trimmed.split_once(|c: char| c.is_whitespace()) {
        Some((verb, rest)) => CommandLine {
            verb: verb.to_ascii_uppercase(),
            args: rest.trim_start().to_string(),
        },
        None => CommandLine {
            verb: trimmed.to_ascii_uppercase(),
            args: String::new(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn splits_verb_and_args() {
        let cmd = tokenize(b"MAIL FROM:<a@b.com>");
        assert_eq!(cmd.verb, "MAIL");
        assert_eq!(cmd.args, "FROM:<a@b.com>");
    }

    #[test]
    fn lowercase_verb_is_normalized() {
        let cmd = tokenize(b"ehlo example.com");
        assert_eq!(cmd.verb, "EHLO");
        assert_eq!(cmd.args, "example.com");
    }

    #[test]
    fn bare_verb_has_empty_args() {
        let cmd = tokenize(b"QUIT");
        assert_eq!(cmd.verb, "QUIT");
        assert_eq!(cmd.args, "");
    }

    #[test]
    fn empty_line_yields_empty_verb() {
        let cmd = tokenize(b"");
        assert_eq!(cmd.verb, "");
    }
}
