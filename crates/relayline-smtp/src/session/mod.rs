//! SMTP session state machine.
//!
//! A [`Session`] owns one connection and drives it from the greeting to
//! QUIT. Construction performs the whole bootstrap (greeting, EHLO or HELO,
//! optional STARTTLS and a second hello), so a session handed to the caller
//! is always ready for AUTH or a mail transaction.
//!
//! ```text
//! Connecting -> Greeted -> HelloSent -> PlainReady ----------------+
//!                              |                                    |
//!                              +-> TlsNegotiating -> TlsReady ------+-> Authenticated -> Active
//!
//! any state -> Closed (QUIT, close(), end-of-stream, failed TLS upgrade)
//! ```

mod log;
mod transaction;

pub use log::ResponseLog;

use crate::auth::Authentication;
use crate::command::Command;
use crate::connection::{self, Connection, LINE_TERMINATOR, SessionConfig, SmtpStream, StartTls};
use crate::error::{Error, Result};
use crate::types::{ReplyCode, Response, ServerInfo};

/// Longest reply line accepted, terminator included.
pub const MAX_LINE_LENGTH: usize = 512;

/// Where a session is in the SMTP dialogue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SessionState {
    /// Transport is being opened.
    Connecting,
    /// The server sent a 220 greeting.
    Greeted,
    /// EHLO or HELO was accepted.
    HelloSent,
    /// Ready for AUTH or MAIL on a plain connection.
    PlainReady,
    /// STARTTLS was accepted and the handshake is in progress.
    TlsNegotiating,
    /// Ready for AUTH or MAIL on a TLS connection.
    TlsReady,
    /// AUTH succeeded.
    Authenticated,
    /// A mail transaction has been started.
    Active,
    /// The connection is gone; every operation fails with [`Error::SessionClosed`].
    Closed,
}

impl SessionState {
    /// Returns true if AUTH may be issued in this state.
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::PlainReady | Self::TlsReady)
    }
}

/// SMTP client session.
#[derive(Debug)]
pub struct Session<S = SmtpStream> {
    connection: Option<Connection<S>>,
    config: SessionConfig,
    state: SessionState,
    server_info: ServerInfo,
    log: ResponseLog,
}

impl Session<SmtpStream> {
    /// Connects to the configured server and runs the bootstrap.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for an invalid configuration, a
    /// connection error if the server cannot be reached, or any error from
    /// [`establish`](Self::establish).
    pub async fn connect(config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let stream = connection::connect(&config.host, config.port, config.timeout).await?;
        Self::establish(stream, config).await
    }
}

impl<S: StartTls> Session<S> {
    /// Runs the bootstrap over an already-open stream.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the greeting is not 220, both EHLO and HELO
    ///   are rejected, or STARTTLS is rejected
    /// - [`Error::Connection`] if the TLS handshake fails
    /// - I/O, timeout or parse errors from the underlying reads and writes
    pub async fn establish(stream: S, config: SessionConfig) -> Result<Self> {
        config.validate()?;
        let mut session = Self {
            connection: Some(Connection::new(stream, config.timeout)),
            config,
            state: SessionState::Connecting,
            server_info: ServerInfo::default(),
            log: ResponseLog::default(),
        };
        session.bootstrap().await?;
        Ok(session)
    }

    async fn bootstrap(&mut self) -> Result<()> {
        let greeting = self.read().await?;
        if !greeting.has_code(ReplyCode::SERVICE_READY) {
            self.close();
            return Err(Error::Protocol(format!(
                "unexpected greeting: {}",
                greeting.line()
            )));
        }
        self.server_info = ServerInfo::from_greeting(&greeting);
        self.transition(SessionState::Greeted);

        self.say_hello().await?;

        if self.config.starttls {
            self.start_tls().await?;
            self.say_hello().await?;
            self.transition(SessionState::TlsReady);
        } else {
            self.transition(SessionState::PlainReady);
        }

        tracing::info!(
            server = %self.server_info.hostname,
            tls = self.config.starttls,
            "session established"
        );
        Ok(())
    }

    /// Sends EHLO, falling back to HELO if the server rejects it.
    ///
    /// A successful EHLO replaces the known extensions; a HELO fallback
    /// clears them.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Protocol`] if both greetings are rejected.
    pub async fn say_hello(&mut self) -> Result<()> {
        let domain = self.config.client_id.clone();

        match self.invoke(&Command::Ehlo { domain: domain.clone() }).await {
            Ok(_) => {
                self.server_info.update_from_ehlo(self.log.last_reply());
            }
            Err(Error::Command { actual, .. }) => {
                tracing::warn!(%actual, "EHLO rejected, falling back to HELO");
                match self.invoke(&Command::Helo { domain }).await {
                    Ok(_) => self.server_info.extensions.clear(),
                    Err(Error::Command { .. }) => {
                        return Err(Error::Protocol("hello failed".into()));
                    }
                    Err(e) => return Err(e),
                }
            }
            Err(e) => return Err(e),
        }

        if self.state == SessionState::Greeted {
            self.transition(SessionState::HelloSent);
        }
        Ok(())
    }

    async fn start_tls(&mut self) -> Result<()> {
        self.transition(SessionState::TlsNegotiating);

        if let Err(e) = self.invoke(&Command::StartTls).await {
            self.close();
            return Err(match e {
                Error::Command { actual, text, .. } => {
                    Error::Protocol(format!("starttls rejected: {actual} {text}"))
                }
                other => other,
            });
        }

        let connection = self.connection.take().ok_or(Error::SessionClosed)?;
        match connection.upgrade_to_tls(&self.config.host).await {
            Ok(secured) => {
                self.connection = Some(secured);
                Ok(())
            }
            Err(e) => {
                tracing::warn!(error = %e, "TLS upgrade failed");
                self.transition(SessionState::Closed);
                Err(Error::Connection(format!("tls upgrade failed: {e}")))
            }
        }
    }

    /// Reads one complete reply and returns its final line.
    ///
    /// Every line of the reply, continuation lines included, is appended to
    /// the [response log](Self::responses) once the final line has arrived.
    ///
    /// # Errors
    ///
    /// - [`Error::MalformedResponse`] for a line that is not a reply; if it
    ///   follows continuation lines the session is closed
    /// - [`Error::Protocol`] if the stream ends before the final line; the
    ///   session is closed
    /// - a connection error (I/O, timeout); the session is closed
    /// - [`Error::SessionClosed`] if the session is already closed
    pub async fn read(&mut self) -> Result<Response> {
        let result = self.read_reply().await;
        self.guard(result)
    }

    async fn read_reply(&mut self) -> Result<Response> {
        let connection = self.connection.as_mut().ok_or(Error::SessionClosed)?;
        let mut pending = Vec::new();

        while !connection.is_eof() {
            let line = connection.read_line(MAX_LINE_LENGTH, LINE_TERMINATOR).await?;
            if line.is_empty() && connection.is_eof() {
                break;
            }
            tracing::trace!("<< {line}");

            let response = match Response::parse(&line) {
                Ok(response) => response,
                Err(e) => {
                    if !pending.is_empty() {
                        self.close();
                    }
                    return Err(e);
                }
            };
            if response.is_final() {
                for line in pending {
                    self.log.push(line);
                }
                self.log.push(response.clone());
                return Ok(response);
            }
            pending.push(response);
        }

        self.close();
        Err(Error::Protocol("connection closed mid-response".into()))
    }

    /// Closes the session if `result` failed at the transport level.
    fn guard<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            if e.is_connection_error() && self.connection.is_some() {
                tracing::warn!(error = %e, "connection failed, closing session");
                self.close();
            }
        }
        result
    }

    /// Writes one line to the server.
    ///
    /// At most one trailing CRLF is stripped from `line` and exactly one is
    /// appended.
    ///
    /// # Errors
    ///
    /// Returns [`Error::SessionClosed`], an I/O error or
    /// [`Error::ConnectionTimeout`]; after the latter two the session is
    /// closed.
    pub async fn write(&mut self, line: &str) -> Result<()> {
        let line = line.strip_suffix(LINE_TERMINATOR).unwrap_or(line);
        tracing::debug!(">> {}", escape_crlf(line));
        self.write_line(line.as_bytes()).await
    }

    /// Writes a line carrying credentials; the log only shows a placeholder.
    pub(crate) async fn write_redacted(&mut self, line: &str) -> Result<()> {
        let line = line.strip_suffix(LINE_TERMINATOR).unwrap_or(line);
        tracing::debug!(">> <redacted>");
        self.write_line(line.as_bytes()).await
    }

    async fn write_line(&mut self, data: &[u8]) -> Result<()> {
        let connection = self.connection.as_mut().ok_or(Error::SessionClosed)?;
        let result = connection.write(data, LINE_TERMINATOR).await;
        self.guard(result)
    }

    /// Writes a credential line and reads the reply, without validation.
    pub(crate) async fn respond(&mut self, line: &str) -> Result<Response> {
        self.write_redacted(line).await?;
        self.read().await
    }

    /// Sends a command and reads its reply without checking the code.
    ///
    /// # Errors
    ///
    /// Returns any error from [`write`](Self::write) or [`read`](Self::read).
    pub async fn exchange(&mut self, command: &Command) -> Result<Response> {
        let request = command.request();
        if command.is_sensitive() {
            tracing::debug!(">> {} <redacted>", command.verb());
            self.write_line(request.as_bytes()).await?;
        } else {
            self.write(&request).await?;
        }
        self.read().await
    }

    /// Sends a command and requires the reply code it expects.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] carrying the verb, the expected and actual
    /// codes and the reply text on a mismatch, or any error from
    /// [`exchange`](Self::exchange).
    pub async fn invoke(&mut self, command: &Command) -> Result<Response> {
        let response = self.exchange(command).await?;
        self.check(command, &response)?;
        Ok(response)
    }

    fn check(&mut self, command: &Command, response: &Response) -> Result<()> {
        if !command.accepts(response.code()) {
            return Err(Error::command(
                command.verb(),
                command.expected_code(),
                response.code(),
                response.text(),
            ));
        }
        if command.is_transaction()
            && (self.state.is_ready() || self.state == SessionState::Authenticated)
        {
            self.transition(SessionState::Active);
        }
        Ok(())
    }

    /// Authenticates with the given mechanism.
    ///
    /// Returns `Ok(true)` on success. A rejection by the server is an
    /// [`Error::Authentication`], so `Ok(false)` is never returned.
    ///
    /// # Errors
    ///
    /// - [`Error::Protocol`] if the session is not ready for AUTH
    /// - [`Error::Authentication`] if the server rejects the exchange
    /// - I/O or parse errors from the exchange itself
    pub async fn authenticate(&mut self, auth: Authentication) -> Result<bool> {
        if self.connection.is_none() {
            return Err(Error::SessionClosed);
        }
        if !self.state.is_ready() {
            return Err(Error::Protocol(format!(
                "cannot authenticate in state {:?}",
                self.state
            )));
        }

        let mechanism = auth.mechanism();
        if !auth.authenticate(self).await? {
            let reason = self
                .last_response()
                .map_or_else(|| mechanism.to_string(), ToString::to_string);
            return Err(Error::Authentication(format!(
                "authentication failed: {reason}"
            )));
        }

        self.transition(SessionState::Authenticated);
        tracing::info!(%mechanism, "authenticated");
        Ok(true)
    }

    /// Sends QUIT and closes the session.
    ///
    /// The session is closed even if the server answers with something
    /// other than 221.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] for an unexpected reply, or an I/O error.
    pub async fn quit(&mut self) -> Result<()> {
        let result = self.invoke(&Command::Quit).await;
        if let Some(mut connection) = self.connection.take() {
            if let Err(e) = connection.shutdown().await {
                tracing::debug!(error = %e, "shutdown after QUIT failed");
            }
        }
        self.transition(SessionState::Closed);
        result.map(|_| ())
    }

    /// Drops the connection without sending QUIT.
    pub fn close(&mut self) {
        if self.connection.take().is_some() {
            tracing::debug!("connection closed");
        }
        self.transition(SessionState::Closed);
    }

    fn transition(&mut self, next: SessionState) {
        if self.state != next {
            tracing::debug!(from = ?self.state, to = ?next, "state change");
            self.state = next;
        }
    }

    /// Returns the current state.
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Returns true once the session is closed.
    #[must_use]
    pub const fn is_closed(&self) -> bool {
        matches!(self.state, SessionState::Closed)
    }

    /// Returns what the server advertised.
    #[must_use]
    pub const fn server_info(&self) -> &ServerInfo {
        &self.server_info
    }

    /// Returns every reply line received so far.
    #[must_use]
    pub const fn responses(&self) -> &ResponseLog {
        &self.log
    }

    /// Returns the most recent final reply line.
    #[must_use]
    pub fn last_response(&self) -> Option<&Response> {
        self.log.last_response()
    }

    /// Returns the configuration the session was built with.
    #[must_use]
    pub const fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Returns true if the connection is TLS-encrypted.
    #[must_use]
    pub fn is_tls(&self) -> bool {
        self.connection.as_ref().is_some_and(Connection::is_tls)
    }

    /// Gets a reference to the underlying stream, if still open.
    #[must_use]
    pub fn get_ref(&self) -> Option<&S> {
        self.connection.as_ref().map(Connection::get_ref)
    }
}

/// Makes line breaks visible in log output.
fn escape_crlf(line: &str) -> String {
    line.replace("\r\n", "<CRLF>").replace('\n', "<LF>")
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
pub(crate) mod tests {
    use super::*;
    use std::time::Duration;
    use tokio_test::io::{Builder, Mock};

    pub(crate) const GREETING: &[u8] = b"220 mx.example.com ESMTP ready\r\n";
    pub(crate) const EHLO: &[u8] = b"EHLO client.example.com\r\n";

    pub(crate) fn config() -> SessionConfig {
        SessionConfig::builder("mx.example.com")
            .client_id("client.example.com")
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap()
    }

    /// Greeting plus an EHLO answered with `capabilities`.
    pub(crate) fn script(capabilities: &[u8]) -> Builder {
        let mut builder = Builder::new();
        builder.read(GREETING).write(EHLO).read(capabilities);
        builder
    }

    pub(crate) async fn ready(mock: Mock) -> Session<Mock> {
        Session::establish(mock, config()).await.unwrap()
    }

    #[tokio::test]
    async fn test_bootstrap_with_ehlo() {
        let mock = script(b"250-mx.example.com\r\n250-PIPELINING\r\n250 SIZE 1000\r\n").build();
        let session = ready(mock).await;

        assert_eq!(session.state(), SessionState::PlainReady);
        assert_eq!(session.server_info().hostname, "mx.example.com");
        assert!(session.server_info().supports_pipelining());
        assert_eq!(session.server_info().max_message_size(), Some(1000));
        assert_eq!(session.responses().len(), 4);
        assert!(!session.is_tls());
    }

    #[tokio::test]
    async fn test_bad_greeting_sends_nothing() {
        // No writes scripted: any hello attempt would fail the mock.
        let mock = Builder::new().read(b"421 too busy\r\n").build();
        let err = Session::establish(mock, config()).await.unwrap_err();

        assert!(matches!(err, Error::Protocol(_)));
    }

    #[tokio::test]
    async fn test_helo_fallback() {
        let mock = script(b"502 command not implemented\r\n")
            .write(b"HELO client.example.com\r\n")
            .read(b"250 mx.example.com\r\n")
            .build();
        let session = ready(mock).await;

        assert_eq!(session.state(), SessionState::PlainReady);
        assert!(session.server_info().extensions.is_empty());
    }

    #[tokio::test]
    async fn test_hello_failed() {
        let mock = script(b"500 syntax error\r\n")
            .write(b"HELO client.example.com\r\n")
            .read(b"501 go away\r\n")
            .build();
        let err = Session::establish(mock, config()).await.unwrap_err();

        assert!(matches!(err, Error::Protocol(msg) if msg == "hello failed"));
    }

    #[tokio::test]
    async fn test_starttls_repeats_hello() {
        let mock = script(b"250-mx.example.com\r\n250-STARTTLS\r\n250 PIPELINING\r\n")
            .write(b"STARTTLS\r\n")
            .read(b"220 go ahead\r\n")
            .write(EHLO)
            .read(b"250-mx.example.com\r\n250 AUTH PLAIN LOGIN\r\n")
            .build();
        let config = SessionConfig {
            starttls: true,
            ..config()
        };
        let session = Session::establish(mock, config).await.unwrap();

        assert_eq!(session.state(), SessionState::TlsReady);
        let hellos = session
            .responses()
            .replies()
            .filter(|reply| reply[0].has_code(ReplyCode::OK))
            .count();
        assert_eq!(hellos, 2);
        assert!(!session.server_info().supports_starttls());
        assert_eq!(session.server_info().auth_mechanisms().len(), 2);
    }

    #[tokio::test]
    async fn test_starttls_rejected() {
        let mock = script(b"250-mx.example.com\r\n250 STARTTLS\r\n")
            .write(b"STARTTLS\r\n")
            .read(b"454 TLS not available\r\n")
            .build();
        let config = SessionConfig {
            starttls: true,
            ..config()
        };
        let err = Session::establish(mock, config).await.unwrap_err();

        assert!(matches!(err, Error::Protocol(msg) if msg.starts_with("starttls rejected")));
    }

    #[tokio::test]
    async fn test_invoke_reports_mismatch() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"VRFY nobody\r\n")
            .read(b"550 no such user\r\n")
            .build();
        let mut session = ready(mock).await;

        let err = session
            .invoke(&Command::Vrfy {
                address: "nobody".to_string(),
            })
            .await
            .unwrap_err();
        match err {
            Error::Command {
                verb,
                expected,
                actual,
                text,
            } => {
                assert_eq!(verb, "VRFY");
                assert_eq!(expected, ReplyCode::OK);
                assert_eq!(actual, ReplyCode::MAILBOX_UNAVAILABLE);
                assert_eq!(text, "no such user");
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(session.last_response().unwrap().code(), 550);
    }

    #[tokio::test]
    async fn test_multiline_read_logs_every_line() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"NOOP\r\n")
            .read(b"250-first\r\n250-second\r\n250 third\r\n")
            .build();
        let mut session = ready(mock).await;
        let before = session.responses().len();

        session.write("NOOP").await.unwrap();
        let response = session.read().await.unwrap();

        assert_eq!(response.text(), "third");
        assert_eq!(session.responses().len() - before, 3);
        assert_eq!(session.responses().last_reply().len(), 3);
    }

    #[tokio::test]
    async fn test_write_does_not_double_terminate() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"NOOP\r\n")
            .write(b"RSET\r\n")
            .build();
        let mut session = ready(mock).await;

        session.write("NOOP\r\n").await.unwrap();
        session.write("RSET").await.unwrap();
    }

    #[tokio::test]
    async fn test_quit_closes_session() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"QUIT\r\n")
            .read(b"221 bye\r\n")
            .build();
        let mut session = ready(mock).await;

        session.quit().await.unwrap();
        assert!(session.is_closed());
        assert!(session.get_ref().is_none());

        let err = session.invoke(&Command::Noop).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
        assert!(matches!(session.read().await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_quit_mismatch_still_closes() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"QUIT\r\n")
            .read(b"250 ok\r\n")
            .build();
        let mut session = ready(mock).await;

        let err = session.quit().await.unwrap_err();
        assert!(matches!(err, Error::Command { verb: "QUIT", .. }));
        assert_eq!(session.state(), SessionState::Closed);
    }

    #[tokio::test]
    async fn test_eof_mid_response_closes() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"NOOP\r\n")
            .read(b"250-partial\r\n")
            .build();
        let mut session = ready(mock).await;

        let err = session.invoke(&Command::Noop).await.unwrap_err();
        assert!(matches!(err, Error::Protocol(msg) if msg == "connection closed mid-response"));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_malformed_reply() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"NOOP\r\n")
            .read(b"hello\r\n")
            .build();
        let mut session = ready(mock).await;

        let err = session.invoke(&Command::Noop).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
    }

    #[tokio::test]
    async fn test_close_without_quit() {
        let mock = script(b"250 mx.example.com\r\n").build();
        let mut session = ready(mock).await;

        session.close();
        assert!(session.is_closed());
        assert!(matches!(session.write("NOOP").await, Err(Error::SessionClosed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_closes_session() {
        // The reply to NOOP never arrives within the timeout.
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"NOOP\r\n")
            .wait(Duration::from_secs(10))
            .build();
        let mut session = ready(mock).await;

        let err = session.invoke(&Command::Noop).await.unwrap_err();
        assert!(matches!(err, Error::ConnectionTimeout(_)));
        assert!(session.is_closed());

        let err = session.invoke(&Command::Rset).await.unwrap_err();
        assert!(matches!(err, Error::SessionClosed));
    }

    #[tokio::test]
    async fn test_write_failure_closes_session() {
        let mock = script(b"250 mx.example.com\r\n")
            .write_error(std::io::Error::new(std::io::ErrorKind::BrokenPipe, "reset"))
            .build();
        let mut session = ready(mock).await;

        let err = session.write("NOOP").await.unwrap_err();
        assert!(matches!(err, Error::Io(_)));
        assert_eq!(session.state(), SessionState::Closed);
        assert!(matches!(session.read().await, Err(Error::SessionClosed)));
    }

    #[tokio::test]
    async fn test_malformed_line_mid_reply_is_not_logged() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"NOOP\r\n")
            .read(b"250-PIPELINING\r\ngarbage\r\n")
            .build();
        let mut session = ready(mock).await;
        let before = session.responses().len();

        let err = session.invoke(&Command::Noop).await.unwrap_err();
        assert!(matches!(err, Error::MalformedResponse(_)));
        assert_eq!(session.responses().len(), before);
        assert_eq!(session.responses().last_reply()[0].text(), "mx.example.com");
        assert!(session.is_closed());
    }

    #[test]
    fn test_escape_crlf() {
        assert_eq!(escape_crlf("a\r\nb\nc"), "a<CRLF>b<LF>c");
    }
}
