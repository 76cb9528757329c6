//! SMTP commands.
//!
//! Every command is described by its verb, its request line and the reply
//! code that counts as success. The session runs all of them through the
//! same write/read/validate executor ([`Session::invoke`]), so adding a verb
//! only touches this module.
//!
//! [`Session::invoke`]: crate::Session::invoke

use crate::types::{Address, AuthMechanism, ReplyCode};

/// SMTP command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// HELO - Simple greeting
    Helo {
        /// Client identity
        domain: String,
    },
    /// EHLO - Extended greeting
    Ehlo {
        /// Client identity
        domain: String,
    },
    /// STARTTLS - Upgrade to TLS
    StartTls,
    /// AUTH - Begin authentication
    Auth {
        /// Authentication mechanism
        mechanism: AuthMechanism,
        /// Initial response (SASL-IR)
        initial_response: Option<String>,
    },
    /// MAIL FROM - Start mail transaction
    Mail {
        /// Sender address
        from: Address,
        /// SIZE parameter
        size: Option<usize>,
    },
    /// RCPT TO - Add recipient
    Rcpt {
        /// Recipient address
        to: Address,
    },
    /// DATA - Begin message data
    Data,
    /// RSET - Reset transaction
    Rset,
    /// VRFY - Verify address
    Vrfy {
        /// Address to verify
        address: String,
    },
    /// NOOP - No operation
    Noop,
    /// QUIT - Close connection
    Quit,
}

impl Command {
    /// Returns the command verb.
    #[must_use]
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Helo { .. } => "HELO",
            Self::Ehlo { .. } => "EHLO",
            Self::StartTls => "STARTTLS",
            Self::Auth { .. } => "AUTH",
            Self::Mail { .. } => "MAIL",
            Self::Rcpt { .. } => "RCPT",
            Self::Data => "DATA",
            Self::Rset => "RSET",
            Self::Vrfy { .. } => "VRFY",
            Self::Noop => "NOOP",
            Self::Quit => "QUIT",
        }
    }

    /// Returns the request line, without the line terminator.
    #[must_use]
    pub fn request(&self) -> String {
        match self {
            Self::Helo { domain } | Self::Ehlo { domain } => {
                format!("{} {domain}", self.verb())
            }
            Self::Auth {
                mechanism,
                initial_response: Some(response),
            } => format!("AUTH {mechanism} {response}"),
            Self::Auth {
                mechanism,
                initial_response: None,
            } => format!("AUTH {mechanism}"),
            Self::Mail { from, size: None } => format!("MAIL FROM:<{from}>"),
            Self::Mail {
                from,
                size: Some(size),
            } => format!("MAIL FROM:<{from}> SIZE={size}"),
            Self::Rcpt { to } => format!("RCPT TO:<{to}>"),
            Self::Vrfy { address } => format!("VRFY {address}"),
            Self::StartTls | Self::Data | Self::Rset | Self::Noop | Self::Quit => {
                self.verb().to_string()
            }
        }
    }

    /// Returns the reply code that completes this command successfully.
    #[must_use]
    pub const fn expected_code(&self) -> ReplyCode {
        match self {
            Self::StartTls => ReplyCode::SERVICE_READY,
            Self::Auth {
                initial_response: Some(_),
                ..
            } => ReplyCode::AUTH_SUCCESS,
            Self::Auth {
                initial_response: None,
                ..
            } => ReplyCode::AUTH_CONTINUE,
            Self::Data => ReplyCode::START_DATA,
            Self::Quit => ReplyCode::CLOSING,
            Self::Helo { .. }
            | Self::Ehlo { .. }
            | Self::Mail { .. }
            | Self::Rcpt { .. }
            | Self::Rset
            | Self::Vrfy { .. }
            | Self::Noop => ReplyCode::OK,
        }
    }

    /// Returns true if `code` completes this command.
    ///
    /// This is an exact match against [`expected_code`](Self::expected_code),
    /// except that RCPT also accepts 251 (user not local, will forward).
    #[must_use]
    pub fn accepts(&self, code: ReplyCode) -> bool {
        code == self.expected_code() || (matches!(self, Self::Rcpt { .. }) && code == ReplyCode::FORWARD)
    }

    /// Returns true if the request line carries credentials.
    #[must_use]
    pub const fn is_sensitive(&self) -> bool {
        matches!(
            self,
            Self::Auth {
                initial_response: Some(_),
                ..
            }
        )
    }

    /// Returns true if this command opens or continues a mail transaction.
    #[must_use]
    pub const fn is_transaction(&self) -> bool {
        matches!(self, Self::Mail { .. } | Self::Rcpt { .. } | Self::Data)
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
    fn test_hello_commands() {
        let helo = Command::Helo {
            domain: "client.example.com".to_string(),
        };
        assert_eq!(helo.request(), "HELO client.example.com");
        assert_eq!(helo.expected_code(), ReplyCode::OK);

        let ehlo = Command::Ehlo {
            domain: "client.example.com".to_string(),
        };
        assert_eq!(ehlo.request(), "EHLO client.example.com");
        assert_eq!(ehlo.verb(), "EHLO");
        assert_eq!(ehlo.expected_code(), ReplyCode::OK);
    }

    #[test]
    fn test_starttls_command() {
        let cmd = Command::StartTls;
        assert_eq!(cmd.request(), "STARTTLS");
        assert_eq!(cmd.expected_code(), ReplyCode::SERVICE_READY);
    }

    #[test]
    fn test_auth_commands() {
        let cmd = Command::Auth {
            mechanism: AuthMechanism::Plain,
            initial_response: None,
        };
        assert_eq!(cmd.request(), "AUTH PLAIN");
        assert_eq!(cmd.expected_code(), ReplyCode::AUTH_CONTINUE);
        assert!(!cmd.is_sensitive());

        let cmd = Command::Auth {
            mechanism: AuthMechanism::XOAuth2,
            initial_response: Some("dXNlcj0=".to_string()),
        };
        assert_eq!(cmd.request(), "AUTH XOAUTH2 dXNlcj0=");
        assert_eq!(cmd.expected_code(), ReplyCode::AUTH_SUCCESS);
        assert!(cmd.is_sensitive());
    }

    #[test]
    fn test_mail_commands() {
        let from = Address::new("sender@example.com").unwrap();
        let cmd = Command::Mail {
            from: from.clone(),
            size: None,
        };
        assert_eq!(cmd.request(), "MAIL FROM:<sender@example.com>");

        let cmd = Command::Mail {
            from,
            size: Some(12345),
        };
        assert_eq!(cmd.request(), "MAIL FROM:<sender@example.com> SIZE=12345");
        assert!(cmd.is_transaction());
    }

    #[test]
    fn test_rcpt_accepts_forward() {
        let cmd = Command::Rcpt {
            to: Address::new("recipient@example.com").unwrap(),
        };
        assert_eq!(cmd.request(), "RCPT TO:<recipient@example.com>");
        assert!(cmd.accepts(ReplyCode::OK));
        assert!(cmd.accepts(ReplyCode::FORWARD));
        assert!(!cmd.accepts(ReplyCode::MAILBOX_UNAVAILABLE));
    }

    #[test]
    fn test_exact_code_match() {
        // 251 is a success class code but not what MAIL expects.
        let cmd = Command::Mail {
            from: Address::new("sender@example.com").unwrap(),
            size: None,
        };
        assert!(!cmd.accepts(ReplyCode::FORWARD));
        assert!(!Command::Quit.accepts(ReplyCode::OK));
        assert!(Command::Quit.accepts(ReplyCode::CLOSING));
    }

    #[test]
    fn test_simple_commands() {
        for (cmd, line, code) in [
            (Command::Data, "DATA", ReplyCode::START_DATA),
            (Command::Rset, "RSET", ReplyCode::OK),
            (Command::Noop, "NOOP", ReplyCode::OK),
            (Command::Quit, "QUIT", ReplyCode::CLOSING),
        ] {
            assert_eq!(cmd.request(), line);
            assert_eq!(cmd.verb(), line);
            assert_eq!(cmd.expected_code(), code);
        }

        let vrfy = Command::Vrfy {
            address: "postmaster".to_string(),
        };
        assert_eq!(vrfy.request(), "VRFY postmaster");
    }
}
