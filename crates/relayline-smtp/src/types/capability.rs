//! Server capabilities advertised in the EHLO reply.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use super::Response;

/// SMTP service extension advertised by the server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Extension {
    /// STARTTLS (RFC 3207)
    StartTls,
    /// AUTH with the advertised mechanisms (RFC 4954)
    Auth(Vec<AuthMechanism>),
    /// SIZE with the optional maximum message size (RFC 1870)
    Size(Option<usize>),
    /// 8BITMIME
    EightBitMime,
    /// PIPELINING (RFC 2920)
    Pipelining,
    /// CHUNKING
    Chunking,
    /// SMTPUTF8
    SmtpUtf8,
    /// DSN
    Dsn,
    /// BINARYMIME
    BinaryMime,
    /// Keyword this client does not interpret
    Unknown(String),
}

impl Extension {
    /// Parses one EHLO capability line (the text after `250-`/`250 `).
    #[must_use]
    pub fn parse(line: &str) -> Self {
        let mut words = line.split_whitespace();
        let Some(keyword) = words.next() else {
            return Self::Unknown(line.to_string());
        };

        match keyword.to_ascii_uppercase().as_str() {
            "STARTTLS" => Self::StartTls,
            "AUTH" => Self::Auth(words.filter_map(|m| m.parse().ok()).collect()),
            "SIZE" => Self::Size(words.next().and_then(|s| s.parse().ok())),
            "8BITMIME" => Self::EightBitMime,
            "PIPELINING" => Self::Pipelining,
            "CHUNKING" => Self::Chunking,
            "SMTPUTF8" => Self::SmtpUtf8,
            "DSN" => Self::Dsn,
            "BINARYMIME" => Self::BinaryMime,
            _ => Self::Unknown(line.to_string()),
        }
    }
}

/// SASL authentication mechanism.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AuthMechanism {
    /// PLAIN (RFC 4616)
    Plain,
    /// LOGIN
    Login,
    /// CRAM-MD5 (RFC 2195)
    CramMd5,
    /// `XOAUTH2`
    XOAuth2,
    /// `OAUTHBEARER` (RFC 7628)
    OAuthBearer,
}

impl AuthMechanism {
    /// Returns the mechanism name as sent after `AUTH`.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Plain => "PLAIN",
            Self::Login => "LOGIN",
            Self::CramMd5 => "CRAM-MD5",
            Self::XOAuth2 => "XOAUTH2",
            Self::OAuthBearer => "OAUTHBEARER",
        }
    }
}

impl FromStr for AuthMechanism {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "PLAIN" => Ok(Self::Plain),
            "LOGIN" => Ok(Self::Login),
            "CRAM-MD5" => Ok(Self::CramMd5),
            "XOAUTH2" => Ok(Self::XOAuth2),
            "OAUTHBEARER" => Ok(Self::OAuthBearer),
            _ => Err(()),
        }
    }
}

impl fmt::Display for AuthMechanism {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What the server told us about itself.
#[derive(Debug, Clone, Default)]
pub struct ServerInfo {
    /// Server hostname from the greeting.
    pub hostname: String,
    /// Extensions from the most recent successful EHLO.
    pub extensions: HashSet<Extension>,
}

impl ServerInfo {
    /// Creates server info from the greeting line.
    #[must_use]
    pub fn from_greeting(greeting: &Response) -> Self {
        let hostname = greeting
            .text()
            .split_whitespace()
            .next()
            .unwrap_or("unknown")
            .to_string();

        Self {
            hostname,
            extensions: HashSet::new(),
        }
    }

    /// Replaces the extension set with the one advertised by an EHLO reply.
    ///
    /// The first line of the reply is the server's greeting to us and is
    /// skipped. Mechanisms from several AUTH lines are merged into one list
    /// in the order they were advertised.
    pub fn update_from_ehlo(&mut self, reply: &[Response]) {
        let mut extensions = HashSet::new();
        let mut auth: Option<Vec<AuthMechanism>> = None;

        for line in reply.iter().skip(1) {
            match Extension::parse(line.text()) {
                Extension::Auth(mechanisms) => {
                    let merged = auth.get_or_insert_with(Vec::new);
                    for mechanism in mechanisms {
                        if !merged.contains(&mechanism) {
                            merged.push(mechanism);
                        }
                    }
                }
                other => {
                    extensions.insert(other);
                }
            }
        }
        if let Some(mechanisms) = auth {
            extensions.insert(Extension::Auth(mechanisms));
        }
        self.extensions = extensions;
    }

    /// Checks if the server supports an extension.
    #[must_use]
    pub fn supports(&self, ext: &Extension) -> bool {
        self.extensions.contains(ext)
    }

    /// Checks if STARTTLS is supported.
    #[must_use]
    pub fn supports_starttls(&self) -> bool {
        self.supports(&Extension::StartTls)
    }

    /// Checks if PIPELINING is supported.
    #[must_use]
    pub fn supports_pipelining(&self) -> bool {
        self.supports(&Extension::Pipelining)
    }

    /// Checks if the SIZE parameter may be sent with MAIL.
    #[must_use]
    pub fn supports_size(&self) -> bool {
        self.extensions
            .iter()
            .any(|ext| matches!(ext, Extension::Size(_)))
    }

    /// Returns the maximum message size, if advertised.
    #[must_use]
    pub fn max_message_size(&self) -> Option<usize> {
        self.extensions.iter().find_map(|ext| match ext {
            Extension::Size(size) => *size,
            _ => None,
        })
    }

    /// Returns advertised authentication mechanisms.
    #[must_use]
    pub fn auth_mechanisms(&self) -> &[AuthMechanism] {
        self.extensions
            .iter()
            .find_map(|ext| match ext {
                Extension::Auth(mechanisms) => Some(mechanisms.as_slice()),
                _ => None,
            })
            .unwrap_or_default()
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

    fn reply(lines: &[&str]) -> Vec<Response> {
        lines.iter().map(|l| Response::parse(l).unwrap()).collect()
    }

    #[test]
    fn parse_keywords_case_insensitively() {
        assert_eq!(Extension::parse("starttls"), Extension::StartTls);
        assert_eq!(Extension::parse("PIPELINING"), Extension::Pipelining);
        assert_eq!(Extension::parse("8BITMIME"), Extension::EightBitMime);
        assert_eq!(Extension::parse("SIZE 52428800"), Extension::Size(Some(52_428_800)));
        assert_eq!(Extension::parse("SIZE"), Extension::Size(None));
        assert!(matches!(Extension::parse(""), Extension::Unknown(_)));
        assert_eq!(
            Extension::parse("X-CUSTOM foo"),
            Extension::Unknown("X-CUSTOM foo".to_string())
        );
    }

    #[test]
    fn parse_auth_skips_unknown_mechanisms() {
        assert_eq!(
            Extension::parse("AUTH PLAIN GSSAPI login CRAM-MD5"),
            Extension::Auth(vec![
                AuthMechanism::Plain,
                AuthMechanism::Login,
                AuthMechanism::CramMd5
            ])
        );
    }

    #[test]
    fn mechanism_names() {
        assert_eq!("xoauth2".parse(), Ok(AuthMechanism::XOAuth2));
        assert_eq!("OAUTHBEARER".parse(), Ok(AuthMechanism::OAuthBearer));
        assert_eq!("NTLM".parse::<AuthMechanism>(), Err(()));
        assert_eq!(AuthMechanism::CramMd5.to_string(), "CRAM-MD5");
    }

    #[test]
    fn server_info_from_ehlo() {
        let greeting = Response::parse("220 mx.example.com ESMTP Postfix").unwrap();
        let mut info = ServerInfo::from_greeting(&greeting);
        assert_eq!(info.hostname, "mx.example.com");

        info.update_from_ehlo(&reply(&[
            "250-mx.example.com Hello",
            "250-PIPELINING",
            "250-SIZE 10240000",
            "250-AUTH PLAIN LOGIN",
            "250 STARTTLS",
        ]));

        assert!(info.supports_pipelining());
        assert!(info.supports_starttls());
        assert_eq!(info.max_message_size(), Some(10_240_000));
        assert_eq!(
            info.auth_mechanisms(),
            &[AuthMechanism::Plain, AuthMechanism::Login]
        );
    }

    #[test]
    fn auth_lines_are_merged_in_order() {
        let mut info = ServerInfo::default();
        info.update_from_ehlo(&reply(&[
            "250-mx.example.com",
            "250-AUTH LOGIN PLAIN",
            "250-AUTH PLAIN CRAM-MD5",
            "250 AUTH XOAUTH2",
        ]));

        assert_eq!(
            info.auth_mechanisms(),
            &[
                AuthMechanism::Login,
                AuthMechanism::Plain,
                AuthMechanism::CramMd5,
                AuthMechanism::XOAuth2
            ]
        );
        let auth_entries = info
            .extensions
            .iter()
            .filter(|ext| matches!(ext, Extension::Auth(_)))
            .count();
        assert_eq!(auth_entries, 1);
    }

    #[test]
    fn ehlo_replaces_previous_extensions() {
        let mut info = ServerInfo::default();
        info.update_from_ehlo(&reply(&["250-mx", "250 STARTTLS"]));
        assert!(info.supports_starttls());

        info.update_from_ehlo(&reply(&["250-mx", "250 AUTH PLAIN"]));
        assert!(!info.supports_starttls());
        assert_eq!(info.auth_mechanisms(), &[AuthMechanism::Plain]);
        assert!(info.max_message_size().is_none());
    }
}
