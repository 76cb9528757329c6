//! Error types for SMTP sessions.

use std::io;
use std::time::Duration;

use crate::types::ReplyCode;

/// Result type alias for SMTP operations.
pub type Result<T> = std::result::Result<T, Error>;

/// SMTP session error types.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error on the underlying stream.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// TLS error.
    #[error("TLS error: {0}")]
    Tls(#[from] rustls::Error),

    /// Invalid DNS name for TLS.
    #[error("Invalid DNS name: {0}")]
    InvalidDnsName(#[from] rustls::pki_types::InvalidDnsNameError),

    /// A read or write did not complete within the configured timeout.
    #[error("Connection timed out after {0:?}")]
    ConnectionTimeout(Duration),

    /// Transport-level failure that leaves the connection unusable.
    #[error("Connection error: {0}")]
    Connection(String),

    /// A reply line could not be parsed.
    #[error("Malformed response: {0:?}")]
    MalformedResponse(String),

    /// Unexpected code or state during greeting, hello or STARTTLS.
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// A command's final reply code did not match the expected code.
    #[error("{verb} failed: expected {expected}, got {actual}: {text}")]
    Command {
        /// Command verb (e.g. `EHLO`).
        verb: &'static str,
        /// Code the command requires.
        expected: ReplyCode,
        /// Code the server returned.
        actual: ReplyCode,
        /// Text of the final reply line.
        text: String,
    },

    /// Credential exchange failed.
    #[error("Authentication error: {0}")]
    Authentication(String),

    /// Operation attempted after the session was closed.
    #[error("Session is closed")]
    SessionClosed,

    /// Session configuration rejected before connecting.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid email address.
    #[error("Invalid email address: {0}")]
    InvalidAddress(String),
}

impl Error {
    /// Creates a command error from the failing reply.
    #[must_use]
    pub fn command(
        verb: &'static str,
        expected: ReplyCode,
        actual: ReplyCode,
        text: impl Into<String>,
    ) -> Self {
        Self::Command {
            verb,
            expected,
            actual,
            text: text.into(),
        }
    }

    /// Returns true if the error came from the transport rather than the protocol.
    #[must_use]
    pub const fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::Io(_)
                | Self::Tls(_)
                | Self::InvalidDnsName(_)
                | Self::ConnectionTimeout(_)
                | Self::Connection(_)
        )
    }

    /// Returns true if this is a command rejected with a permanent error (5xx).
    #[must_use]
    pub const fn is_permanent(&self) -> bool {
        matches!(self, Self::Command { actual, .. } if actual.is_permanent())
    }

    /// Returns true if this is a command rejected with a transient error (4xx).
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Command { actual, .. } if actual.is_transient())
    }
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

    #[test]
    fn test_command_error_display() {
        let err = Error::command("EHLO", ReplyCode::OK, ReplyCode::new(502), "not implemented");
        assert_eq!(
            err.to_string(),
            "EHLO failed: expected 250, got 502: not implemented"
        );
    }

    #[test]
    fn test_command_error_classes() {
        let permanent = Error::command("RCPT", ReplyCode::OK, ReplyCode::new(550), "no such user");
        assert!(permanent.is_permanent());
        assert!(!permanent.is_transient());

        let transient = Error::command("MAIL", ReplyCode::OK, ReplyCode::new(451), "try later");
        assert!(transient.is_transient());
        assert!(!transient.is_permanent());
    }

    #[test]
    fn test_connection_errors() {
        assert!(Error::ConnectionTimeout(Duration::from_secs(5)).is_connection_error());
        assert!(Error::Connection("tls upgrade failed".into()).is_connection_error());
        assert!(Error::Io(io::Error::other("reset")).is_connection_error());
        assert!(!Error::SessionClosed.is_connection_error());
        assert!(!Error::Protocol("unexpected greeting".into()).is_connection_error());
    }
}
