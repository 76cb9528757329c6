//! SMTP AUTH mechanisms.
//!
//! Each [`Authentication`] variant pairs a SASL mechanism with the
//! credentials it needs and drives its own challenge/response exchange over
//! a [`Session`]. The exchange reports whether the server's terminal code
//! meant success; the session turns `false` into
//! [`Error::Authentication`](crate::Error::Authentication).

use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;

use crate::command::Command;
use crate::connection::{SessionConfig, StartTls};
use crate::error::Result;
use crate::session::Session;
use crate::types::{AuthMechanism, ReplyCode, ServerInfo};

/// Username and secret (password or OAuth2 access token).
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    username: String,
    secret: String,
}

impl Credentials {
    /// Creates credentials.
    #[must_use]
    pub fn new(username: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            secret: secret.into(),
        }
    }

    /// Takes the credentials from a configuration, if any are set.
    #[must_use]
    pub fn from_config(config: &SessionConfig) -> Option<Self> {
        config
            .has_credentials()
            .then(|| Self::new(&config.username, &config.password))
    }

    /// Returns the username.
    #[must_use]
    pub fn username(&self) -> &str {
        &self.username
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// An authentication attempt: mechanism plus credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Authentication {
    /// `AUTH PLAIN`, credentials sent after a 334 continuation.
    Plain(Credentials),
    /// `AUTH LOGIN`, username and password in two rounds.
    Login(Credentials),
    /// `AUTH CRAM-MD5`, keyed digest of the server challenge.
    CramMd5(Credentials),
    /// `AUTH XOAUTH2` with an OAuth2 access token as the secret.
    XOAuth2(Credentials),
    /// `AUTH OAUTHBEARER` with an OAuth2 access token as the secret.
    OAuthBearer(Credentials),
}

impl Authentication {
    /// Creates an attempt for the given mechanism.
    #[must_use]
    pub const fn new(mechanism: AuthMechanism, credentials: Credentials) -> Self {
        match mechanism {
            AuthMechanism::Plain => Self::Plain(credentials),
            AuthMechanism::Login => Self::Login(credentials),
            AuthMechanism::CramMd5 => Self::CramMd5(credentials),
            AuthMechanism::XOAuth2 => Self::XOAuth2(credentials),
            AuthMechanism::OAuthBearer => Self::OAuthBearer(credentials),
        }
    }

    /// Picks the strongest password mechanism the server advertises.
    ///
    /// Preference is CRAM-MD5, then LOGIN, then PLAIN. OAuth mechanisms need
    /// a token rather than a password and are never chosen here.
    #[must_use]
    pub fn negotiate(server: &ServerInfo, credentials: Credentials) -> Option<Self> {
        let offered = server.auth_mechanisms();
        [AuthMechanism::CramMd5, AuthMechanism::Login, AuthMechanism::Plain]
            .into_iter()
            .find(|mechanism| offered.contains(mechanism))
            .map(|mechanism| Self::new(mechanism, credentials))
    }

    /// Returns the SASL mechanism.
    #[must_use]
    pub const fn mechanism(&self) -> AuthMechanism {
        match self {
            Self::Plain(_) => AuthMechanism::Plain,
            Self::Login(_) => AuthMechanism::Login,
            Self::CramMd5(_) => AuthMechanism::CramMd5,
            Self::XOAuth2(_) => AuthMechanism::XOAuth2,
            Self::OAuthBearer(_) => AuthMechanism::OAuthBearer,
        }
    }

    const fn credentials(&self) -> &Credentials {
        match self {
            Self::Plain(c)
            | Self::Login(c)
            | Self::CramMd5(c)
            | Self::XOAuth2(c)
            | Self::OAuthBearer(c) => c,
        }
    }

    /// Runs the exchange and returns whether the server accepted it.
    ///
    /// # Errors
    ///
    /// Returns I/O, timeout or parse errors from the session.
    pub async fn authenticate<S: StartTls>(&self, session: &mut Session<S>) -> Result<bool> {
        let Credentials { username, secret } = self.credentials();
        let mechanism = self.mechanism();

        match self {
            Self::Plain(_) => {
                if !begin(session, mechanism).await? {
                    return Ok(false);
                }
                let blob = STANDARD.encode(format!("\0{username}\0{secret}"));
                finish(session, &blob).await
            }
            Self::Login(_) => {
                if !begin(session, mechanism).await? {
                    return Ok(false);
                }
                let reply = session.respond(&STANDARD.encode(username)).await?;
                if !reply.has_code(ReplyCode::AUTH_CONTINUE) {
                    return Ok(false);
                }
                finish(session, &STANDARD.encode(secret)).await
            }
            Self::CramMd5(_) => {
                let reply = session.exchange(&auth_command(mechanism, None)).await?;
                if !reply.has_code(ReplyCode::AUTH_CONTINUE) {
                    return Ok(false);
                }
                let Ok(challenge) = STANDARD.decode(reply.text().trim()) else {
                    tracing::debug!("undecodable CRAM-MD5 challenge, cancelling");
                    session.respond("*").await?;
                    return Ok(false);
                };
                let digest = hmac_md5(secret.as_bytes(), &challenge);
                finish(session, &STANDARD.encode(format!("{username} {digest:x}"))).await
            }
            Self::XOAuth2(_) => {
                let token =
                    STANDARD.encode(format!("user={username}\x01auth=Bearer {secret}\x01\x01"));
                // On failure the server sends a 334 with a JSON error and waits
                // for an empty line before the final 5xx.
                initial_response(session, mechanism, token, "").await
            }
            Self::OAuthBearer(_) => {
                let token =
                    STANDARD.encode(format!("n,a={username},\x01auth=Bearer {secret}\x01\x01"));
                initial_response(session, mechanism, token, "AQ==").await
            }
        }
    }
}

const fn auth_command(mechanism: AuthMechanism, initial_response: Option<String>) -> Command {
    Command::Auth {
        mechanism,
        initial_response,
    }
}

/// Sends `AUTH <mechanism>` and checks for the 334 continuation.
async fn begin<S: StartTls>(session: &mut Session<S>, mechanism: AuthMechanism) -> Result<bool> {
    let reply = session.exchange(&auth_command(mechanism, None)).await?;
    Ok(reply.has_code(ReplyCode::AUTH_CONTINUE))
}

/// Sends the last credential line and checks for 235.
async fn finish<S: StartTls>(session: &mut Session<S>, line: &str) -> Result<bool> {
    let reply = session.respond(line).await?;
    Ok(reply.has_code(ReplyCode::AUTH_SUCCESS))
}

async fn initial_response<S: StartTls>(
    session: &mut Session<S>,
    mechanism: AuthMechanism,
    token: String,
    abort: &str,
) -> Result<bool> {
    let reply = session
        .exchange(&auth_command(mechanism, Some(token)))
        .await?;
    if reply.has_code(ReplyCode::AUTH_CONTINUE) {
        tracing::debug!(error = reply.text(), "token rejected");
        session.respond(abort).await?;
        return Ok(false);
    }
    Ok(reply.has_code(ReplyCode::AUTH_SUCCESS))
}

/// HMAC-MD5 (RFC 2104) as used by CRAM-MD5.
fn hmac_md5(key: &[u8], message: &[u8]) -> md5::Digest {
    const BLOCK: usize = 64;

    let mut block = [0u8; BLOCK];
    if key.len() > BLOCK {
        block[..16].copy_from_slice(&md5::compute(key).0);
    } else {
        block[..key.len()].copy_from_slice(key);
    }

    let mut inner = block.map(|b| b ^ 0x36).to_vec();
    inner.extend_from_slice(message);
    let mut outer = block.map(|b| b ^ 0x5c).to_vec();
    outer.extend_from_slice(&md5::compute(&inner).0);
    md5::compute(&outer)
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
    use crate::error::Error;
    use crate::session::SessionState;
    use crate::session::tests::{ready, script};

    const CAPABILITIES: &[u8] = b"250-mx.example.com\r\n250 AUTH PLAIN LOGIN CRAM-MD5\r\n";

    fn credentials() -> Credentials {
        Credentials::new("user", "secret")
    }

    #[test]
    fn test_hmac_md5_rfc2195() {
        let digest = hmac_md5(
            b"tanstaaftanstaaf",
            b"<1896.697170952@postoffice.reston.mci.net>",
        );
        assert_eq!(format!("{digest:x}"), "b913a602c7eda7a495b4e6e7334d3890");
    }

    #[test]
    fn test_hmac_md5_long_key() {
        let long = [b'k'; 100];
        let hashed = md5::compute(long).0;
        assert_eq!(hmac_md5(&long, b"msg").0, hmac_md5(&hashed, b"msg").0);
    }

    #[test]
    fn test_negotiate_prefers_cram_md5() {
        let mut server = ServerInfo::default();
        server.update_from_ehlo(&[
            crate::types::Response::parse("250-mx").unwrap(),
            crate::types::Response::parse("250 AUTH PLAIN LOGIN CRAM-MD5").unwrap(),
        ]);
        let auth = Authentication::negotiate(&server, credentials()).unwrap();
        assert_eq!(auth.mechanism(), AuthMechanism::CramMd5);

        server.update_from_ehlo(&[
            crate::types::Response::parse("250-mx").unwrap(),
            crate::types::Response::parse("250 AUTH PLAIN XOAUTH2").unwrap(),
        ]);
        let auth = Authentication::negotiate(&server, credentials()).unwrap();
        assert_eq!(auth.mechanism(), AuthMechanism::Plain);

        assert!(Authentication::negotiate(&ServerInfo::default(), credentials()).is_none());
    }

    #[test]
    fn test_credentials_debug_hides_secret() {
        let debug = format!("{:?}", credentials());
        assert!(debug.contains("user"));
        assert!(!debug.contains("secret\""));
        assert!(debug.contains("<redacted>"));
    }

    #[test]
    fn test_credentials_from_config() {
        let config = SessionConfig::builder("mx.example.com")
            .credentials("user", "secret")
            .build()
            .unwrap();
        assert_eq!(Credentials::from_config(&config), Some(credentials()));
        assert!(Credentials::from_config(&SessionConfig::new("mx.example.com")).is_none());
    }

    #[tokio::test]
    async fn test_plain_success() {
        // base64("\0user\0secret")
        let mock = script(CAPABILITIES)
            .write(b"AUTH PLAIN\r\n")
            .read(b"334 \r\n")
            .write(b"AHVzZXIAc2VjcmV0\r\n")
            .read(b"235 2.7.0 Authentication successful\r\n")
            .build();
        let mut session = ready(mock).await;

        let ok = session
            .authenticate(Authentication::Plain(credentials()))
            .await
            .unwrap();
        assert!(ok);
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_plain_failure() {
        let mock = script(CAPABILITIES)
            .write(b"AUTH PLAIN\r\n")
            .read(b"334 \r\n")
            .write(b"AHVzZXIAc2VjcmV0\r\n")
            .read(b"535 5.7.8 Authentication credentials invalid\r\n")
            .build();
        let mut session = ready(mock).await;

        let err = session
            .authenticate(Authentication::Plain(credentials()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
        assert_eq!(session.state(), SessionState::PlainReady);
    }

    #[tokio::test]
    async fn test_login_rounds() {
        // base64("user"), base64("secret")
        let mock = script(CAPABILITIES)
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlcg==\r\n")
            .read(b"334 UGFzc3dvcmQ6\r\n")
            .write(b"c2VjcmV0\r\n")
            .read(b"235 ok\r\n")
            .build();
        let mut session = ready(mock).await;

        assert!(session
            .authenticate(Authentication::Login(credentials()))
            .await
            .unwrap());
    }

    #[tokio::test]
    async fn test_login_rejected_username() {
        let mock = script(CAPABILITIES)
            .write(b"AUTH LOGIN\r\n")
            .read(b"334 VXNlcm5hbWU6\r\n")
            .write(b"dXNlcg==\r\n")
            .read(b"535 no such user\r\n")
            .build();
        let mut session = ready(mock).await;

        let err = session
            .authenticate(Authentication::Login(credentials()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Authentication(_)));
    }

    #[tokio::test]
    async fn test_cram_md5() {
        // RFC 2195 example exchange.
        let mock = script(CAPABILITIES)
            .write(b"AUTH CRAM-MD5\r\n")
            .read(b"334 PDE4OTYuNjk3MTcwOTUyQHBvc3RvZmZpY2UucmVzdG9uLm1jaS5uZXQ+\r\n")
            .write(b"dGltIGI5MTNhNjAyYzdlZGE3YTQ5NWI0ZTZlNzMzNGQzODkw\r\n")
            .read(b"235 ok\r\n")
            .build();
        let mut session = ready(mock).await;

        let auth = Authentication::CramMd5(Credentials::new("tim", "tanstaaftanstaaf"));
        assert!(session.authenticate(auth).await.unwrap());
    }

    #[tokio::test]
    async fn test_cram_md5_bad_challenge_cancels() {
        let mock = script(CAPABILITIES)
            .write(b"AUTH CRAM-MD5\r\n")
            .read(b"334 !!not base64!!\r\n")
            .write(b"*\r\n")
            .read(b"501 cancelled\r\n")
            .build();
        let mut session = ready(mock).await;

        let auth = Authentication::CramMd5(credentials());
        assert!(matches!(
            session.authenticate(auth).await,
            Err(Error::Authentication(_))
        ));
    }

    #[tokio::test]
    async fn test_xoauth2_initial_response() {
        // base64("user=user\x01auth=Bearer token\x01\x01")
        let mock = script(CAPABILITIES)
            .write(b"AUTH XOAUTH2 dXNlcj11c2VyAWF1dGg9QmVhcmVyIHRva2VuAQE=\r\n")
            .read(b"235 ok\r\n")
            .build();
        let mut session = ready(mock).await;

        let auth = Authentication::XOAuth2(Credentials::new("user", "token"));
        assert!(session.authenticate(auth).await.unwrap());
    }

    #[tokio::test]
    async fn test_xoauth2_error_continuation() {
        let mock = script(CAPABILITIES)
            .write(b"AUTH XOAUTH2 dXNlcj11c2VyAWF1dGg9QmVhcmVyIHRva2VuAQE=\r\n")
            .read(b"334 eyJzdGF0dXMiOiI0MDEifQ==\r\n")
            .write(b"\r\n")
            .read(b"535 invalid token\r\n")
            .build();
        let mut session = ready(mock).await;

        let auth = Authentication::XOAuth2(Credentials::new("user", "token"));
        assert!(session.authenticate(auth).await.is_err());
        assert_eq!(session.last_response().unwrap().code(), 535);
    }

    #[tokio::test]
    async fn test_oauthbearer_initial_response() {
        // base64("n,a=user,\x01auth=Bearer token\x01\x01")
        let mock = script(CAPABILITIES)
            .write(b"AUTH OAUTHBEARER bixhPXVzZXIsAWF1dGg9QmVhcmVyIHRva2VuAQE=\r\n")
            .read(b"235 ok\r\n")
            .build();
        let mut session = ready(mock).await;

        let auth = Authentication::OAuthBearer(Credentials::new("user", "token"));
        assert!(session.authenticate(auth).await.unwrap());
        assert_eq!(session.state(), SessionState::Authenticated);
    }

    #[tokio::test]
    async fn test_oauthbearer_error_sends_abort() {
        let mock = script(CAPABILITIES)
            .write(b"AUTH OAUTHBEARER bixhPXVzZXIsAWF1dGg9QmVhcmVyIHRva2VuAQE=\r\n")
            .read(b"334 eyJzdGF0dXMiOiI0MDEifQ==\r\n")
            .write(b"AQ==\r\n")
            .read(b"535 invalid token\r\n")
            .build();
        let mut session = ready(mock).await;

        let auth = Authentication::OAuthBearer(Credentials::new("user", "token"));
        assert!(matches!(
            session.authenticate(auth).await,
            Err(Error::Authentication(_))
        ));
        assert_eq!(session.last_response().unwrap().code(), 535);
        assert_eq!(session.state(), SessionState::PlainReady);
    }

    #[tokio::test]
    async fn test_authenticate_requires_ready_state() {
        let mock = script(CAPABILITIES)
            .write(b"AUTH PLAIN\r\n")
            .read(b"334 \r\n")
            .write(b"AHVzZXIAc2VjcmV0\r\n")
            .read(b"235 ok\r\n")
            .build();
        let mut session = ready(mock).await;

        session
            .authenticate(Authentication::Plain(credentials()))
            .await
            .unwrap();
        let err = session
            .authenticate(Authentication::Plain(credentials()))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Protocol(_)));
    }
}
