//! SMTP reply codes and reply lines.

use crate::error::{Error, Result};

/// One line of an SMTP reply.
///
/// A reply consists of one or more lines sharing the same code. Every line
/// but the last separates the code from the text with `-`; the final line
/// uses a space:
///
/// ```text
/// 250-smtp.example.com
/// 250-PIPELINING
/// 250 STARTTLS
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    line: String,
    code: ReplyCode,
    last: bool,
}

impl Response {
    /// Parses a raw reply line.
    ///
    /// A trailing CRLF (or bare LF) is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`Error::MalformedResponse`] if the line is shorter than four
    /// characters, the first three characters are not ASCII digits, or the
    /// separator is neither a space nor a hyphen.
    pub fn parse(raw: &str) -> Result<Self> {
        let line = raw
            .strip_suffix("\r\n")
            .or_else(|| raw.strip_suffix('\n'))
            .unwrap_or(raw);

        let bytes = line.as_bytes();
        if bytes.len() < 4 {
            return Err(Error::MalformedResponse(line.to_string()));
        }
        if !bytes[..3].iter().all(u8::is_ascii_digit) {
            return Err(Error::MalformedResponse(line.to_string()));
        }

        let last = match bytes[3] {
            b' ' => true,
            b'-' => false,
            _ => return Err(Error::MalformedResponse(line.to_string())),
        };

        let code = bytes[..3]
            .iter()
            .fold(0u16, |acc, digit| acc * 10 + u16::from(digit - b'0'));

        Ok(Self {
            line: line.to_string(),
            code: ReplyCode::new(code),
            last,
        })
    }

    /// Returns the reply code.
    #[must_use]
    pub const fn code(&self) -> ReplyCode {
        self.code
    }

    /// Returns the text following the code and separator.
    #[must_use]
    pub fn text(&self) -> &str {
        &self.line[4..]
    }

    /// Returns the raw line without its terminator.
    #[must_use]
    pub fn line(&self) -> &str {
        &self.line
    }

    /// Returns true if this is the final line of a reply.
    #[must_use]
    pub const fn is_final(&self) -> bool {
        self.last
    }

    /// Returns true if this line carries the given code.
    #[must_use]
    pub fn has_code(&self, code: ReplyCode) -> bool {
        self.code == code
    }
}

impl std::fmt::Display for Response {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.line)
    }
}

/// SMTP reply code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ReplyCode(u16);

impl ReplyCode {
    /// Creates a new reply code.
    #[must_use]
    pub const fn new(code: u16) -> Self {
        Self(code)
    }

    /// Returns the numeric code.
    #[must_use]
    pub const fn as_u16(self) -> u16 {
        self.0
    }

    /// Returns true if this is a success code (2xx).
    #[must_use]
    pub const fn is_success(self) -> bool {
        self.0 >= 200 && self.0 < 300
    }

    /// Returns true if this is a transient error (4xx).
    #[must_use]
    pub const fn is_transient(self) -> bool {
        self.0 >= 400 && self.0 < 500
    }

    /// Returns true if this is a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(self) -> bool {
        self.0 >= 500 && self.0 < 600
    }

    /// Returns true if this is an intermediate reply (3xx).
    #[must_use]
    pub const fn is_intermediate(self) -> bool {
        self.0 >= 300 && self.0 < 400
    }
}

impl std::fmt::Display for ReplyCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl PartialEq<u16> for ReplyCode {
    fn eq(&self, other: &u16) -> bool {
        self.0 == *other
    }
}

impl From<ReplyCode> for u16 {
    fn from(code: ReplyCode) -> Self {
        code.0
    }
}

// Common reply codes
impl ReplyCode {
    /// 220 Service ready
    pub const SERVICE_READY: Self = Self(220);
    /// 221 Service closing transmission channel
    pub const CLOSING: Self = Self(221);
    /// 235 Authentication succeeded
    pub const AUTH_SUCCESS: Self = Self(235);
    /// 250 Requested mail action okay, completed
    pub const OK: Self = Self(250);
    /// 251 User not local; will forward
    pub const FORWARD: Self = Self(251);
    /// 334 Continue with authentication
    pub const AUTH_CONTINUE: Self = Self(334);
    /// 354 Start mail input
    pub const START_DATA: Self = Self(354);
    /// 421 Service not available, closing transmission channel
    pub const SERVICE_UNAVAILABLE: Self = Self(421);
    /// 450 Mailbox unavailable (busy)
    pub const MAILBOX_BUSY: Self = Self(450);
    /// 451 Local error in processing
    pub const LOCAL_ERROR: Self = Self(451);
    /// 452 Insufficient system storage
    pub const INSUFFICIENT_STORAGE: Self = Self(452);
    /// 500 Syntax error, command unrecognized
    pub const SYNTAX_ERROR: Self = Self(500);
    /// 501 Syntax error in parameters or arguments
    pub const PARAMETER_ERROR: Self = Self(501);
    /// 502 Command not implemented
    pub const NOT_IMPLEMENTED: Self = Self(502);
    /// 503 Bad sequence of commands
    pub const BAD_SEQUENCE: Self = Self(503);
    /// 504 Command parameter not implemented
    pub const PARAMETER_NOT_IMPLEMENTED: Self = Self(504);
    /// 535 Authentication credentials invalid
    pub const AUTH_FAILED: Self = Self(535);
    /// 550 Mailbox unavailable (not found, access denied)
    pub const MAILBOX_UNAVAILABLE: Self = Self(550);
    /// 554 Transaction failed
    pub const TRANSACTION_FAILED: Self = Self(554);
}

#[cfg(test)]
#[allow(
    clippy::unwrap_used,
    clippy::redundant_clone,
    clippy::manual_string_new,
    clippy::needless_collect,
    clippy::unreadable_literal,
    clippy::used_underscore_items,
    clippy::similar_names
)]
mod tests {
    use super::*;

    mod reply_code_tests {
        use super::*;

        #[test]
        fn success_codes() {
            assert!(ReplyCode::OK.is_success());
            assert!(ReplyCode::SERVICE_READY.is_success());
            assert!(ReplyCode::CLOSING.is_success());
            assert!(ReplyCode::AUTH_SUCCESS.is_success());
        }

        #[test]
        fn intermediate_codes() {
            assert!(ReplyCode::AUTH_CONTINUE.is_intermediate());
            assert!(ReplyCode::START_DATA.is_intermediate());
        }

        #[test]
        fn error_classes() {
            assert!(ReplyCode::SERVICE_UNAVAILABLE.is_transient());
            assert!(ReplyCode::LOCAL_ERROR.is_transient());
            assert!(ReplyCode::AUTH_FAILED.is_permanent());
            assert!(ReplyCode::NOT_IMPLEMENTED.is_permanent());
            assert!(!ReplyCode::OK.is_permanent());
        }

        #[test]
        fn compares_with_integers() {
            assert_eq!(ReplyCode::OK, 250);
            assert_eq!(u16::from(ReplyCode::AUTH_FAILED), 535);
            assert_eq!(format!("{}", ReplyCode::SYNTAX_ERROR), "500");
        }
    }

    mod response_tests {
        use super::*;
        use proptest::prelude::*;

        #[test]
        fn parse_final_line() {
            let response = Response::parse("220 smtp.example.com ESMTP ready\r\n").unwrap();
            assert_eq!(response.code(), ReplyCode::SERVICE_READY);
            assert_eq!(response.text(), "smtp.example.com ESMTP ready");
            assert_eq!(response.line(), "220 smtp.example.com ESMTP ready");
            assert!(response.is_final());
        }

        #[test]
        fn parse_continuation_line() {
            let response = Response::parse("250-PIPELINING").unwrap();
            assert_eq!(response.code(), 250);
            assert_eq!(response.text(), "PIPELINING");
            assert!(!response.is_final());
        }

        #[test]
        fn parse_empty_text() {
            let response = Response::parse("354 ").unwrap();
            assert_eq!(response.code(), ReplyCode::START_DATA);
            assert_eq!(response.text(), "");
        }

        #[test]
        fn rejects_short_lines() {
            for line in ["", "2", "25", "250", "250\r\n"] {
                assert!(matches!(
                    Response::parse(line),
                    Err(Error::MalformedResponse(_))
                ));
            }
        }

        #[test]
        fn rejects_non_digit_codes() {
            for line in ["ABC OK", "2x0 OK", " 250 OK", "-250 OK"] {
                assert!(matches!(
                    Response::parse(line),
                    Err(Error::MalformedResponse(_))
                ));
            }
        }

        #[test]
        fn rejects_unknown_separator() {
            assert!(matches!(
                Response::parse("250_OK"),
                Err(Error::MalformedResponse(_))
            ));
        }

        proptest! {
            #[test]
            fn well_formed_lines_parse(code in 0u16..1000, last in any::<bool>(), text in "[ -~]{0,64}") {
                let sep = if last { ' ' } else { '-' };
                let raw = format!("{code:03}{sep}{text}\r\n");
                let response = Response::parse(&raw).unwrap();
                prop_assert_eq!(response.code().as_u16(), code);
                prop_assert_eq!(response.is_final(), last);
                prop_assert_eq!(response.text(), text.as_str());
            }

            #[test]
            fn non_digit_prefix_is_malformed(prefix in "[A-Za-z ]{3}", text in "[ -~]{0,16}") {
                let raw = format!("{prefix} {text}");
                prop_assert!(matches!(Response::parse(&raw), Err(Error::MalformedResponse(_))));
            }
        }
    }
}
