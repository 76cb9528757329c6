//! Integration tests for the SMTP session.
//!
//! These tests drive a full session against a mock stream that replays
//! canned server replies and records everything the client sends.

use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

use relayline_smtp::{
    Address, Authentication, Credentials, Envelope, Error, Recipient, Session, SessionConfig,
    SessionState, StartTls,
};

/// Mock stream that returns one reply chunk per read.
#[derive(Debug)]
struct MockStream {
    /// Server replies, one chunk per read.
    replies: VecDeque<Vec<u8>>,
    /// Everything the client wrote.
    sent: Arc<Mutex<Vec<u8>>>,
    /// Block forever instead of reporting end-of-stream.
    stall: bool,
    /// Fail the TLS handshake.
    refuse_tls: bool,
    tls: bool,
}

impl MockStream {
    fn new(replies: &[&[u8]]) -> (Self, Arc<Mutex<Vec<u8>>>) {
        let sent = Arc::new(Mutex::new(Vec::new()));
        let stream = Self {
            replies: replies.iter().map(|r| r.to_vec()).collect(),
            sent: Arc::clone(&sent),
            stall: false,
            refuse_tls: false,
            tls: false,
        };
        (stream, sent)
    }
}

impl AsyncRead for MockStream {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.replies.pop_front() {
            Some(chunk) => {
                buf.put_slice(&chunk);
                Poll::Ready(Ok(()))
            }
            None if self.stall => Poll::Pending,
            None => Poll::Ready(Ok(())),
        }
    }
}

impl AsyncWrite for MockStream {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        self.sent.lock().unwrap().extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl StartTls for MockStream {
    async fn start_tls(mut self, _host: &str) -> relayline_smtp::Result<Self> {
        if self.refuse_tls {
            return Err(io::Error::new(io::ErrorKind::ConnectionReset, "handshake failed").into());
        }
        self.tls = true;
        Ok(self)
    }

    fn is_tls(&self) -> bool {
        self.tls
    }
}

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("relayline_smtp=trace")
        .with_test_writer()
        .try_init();
}

fn transcript(sent: &Arc<Mutex<Vec<u8>>>) -> String {
    String::from_utf8(sent.lock().unwrap().clone()).unwrap()
}

fn config() -> SessionConfig {
    SessionConfig::from_json(
        r#"{
            "host": "mx.example.com",
            "port": 587,
            "username": "user",
            "password": "secret",
            "timeout": 5,
            "starttls": true,
            "pipelining": true,
            "client_id": "client.example.com"
        }"#,
    )
    .unwrap()
}

#[tokio::test]
async fn test_full_delivery() {
    init_tracing();

    let (stream, sent) = MockStream::new(&[
        b"220 mx.example.com ESMTP\r\n",
        b"250-mx.example.com\r\n250-STARTTLS\r\n250 PIPELINING\r\n",
        b"220 ready to start TLS\r\n",
        b"250-mx.example.com\r\n250-PIPELINING\r\n250 AUTH PLAIN\r\n",
        b"334 \r\n",
        b"235 2.7.0 accepted\r\n",
        b"250 sender ok\r\n250 recipient ok\r\n354 go ahead\r\n",
        b"250 queued as 42\r\n",
        b"221 bye\r\n",
    ]);

    let config = config();
    let credentials = Credentials::from_config(&config).unwrap();
    let mut session = Session::establish(stream, config).await.unwrap();
    assert_eq!(session.state(), SessionState::TlsReady);
    assert!(session.is_tls());

    let auth = Authentication::negotiate(session.server_info(), credentials).unwrap();
    assert!(session.authenticate(auth).await.unwrap());
    assert_eq!(session.state(), SessionState::Authenticated);

    let envelope = Envelope::new(
        Address::new("sender@example.com").unwrap(),
        vec![Recipient::to("rcpt@example.com").unwrap()],
    )
    .unwrap();
    let response = session.send(&envelope, b"Hello\n").await.unwrap();
    assert_eq!(response.text(), "queued as 42");
    assert_eq!(session.state(), SessionState::Active);

    session.quit().await.unwrap();
    assert_eq!(session.state(), SessionState::Closed);

    assert_eq!(
        transcript(&sent),
        "EHLO client.example.com\r\n\
         STARTTLS\r\n\
         EHLO client.example.com\r\n\
         AUTH PLAIN\r\n\
         AHVzZXIAc2VjcmV0\r\n\
         MAIL FROM:<sender@example.com>\r\n\
         RCPT TO:<rcpt@example.com>\r\n\
         DATA\r\n\
         Hello\r\n\
         .\r\n\
         QUIT\r\n"
    );

    // greeting, EHLO, STARTTLS, EHLO, 334, 235, MAIL, RCPT, DATA, payload, QUIT
    assert_eq!(session.responses().replies().count(), 11);
}

#[tokio::test]
async fn test_tls_upgrade_failure() {
    init_tracing();

    let (mut stream, sent) = MockStream::new(&[
        b"220 mx.example.com ESMTP\r\n",
        b"250-mx.example.com\r\n250 STARTTLS\r\n",
        b"220 ready to start TLS\r\n",
    ]);
    stream.refuse_tls = true;

    let err = Session::establish(stream, config()).await.unwrap_err();
    assert!(matches!(err, Error::Connection(_)));
    assert!(err.is_connection_error());
    assert_eq!(
        transcript(&sent),
        "EHLO client.example.com\r\nSTARTTLS\r\n"
    );
}

#[tokio::test]
async fn test_rejected_greeting() {
    let (stream, sent) = MockStream::new(&[b"554 no SMTP service here\r\n"]);

    let err = Session::establish(stream, config()).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
    assert!(transcript(&sent).is_empty());
}

#[tokio::test]
async fn test_connection_dropped_before_greeting() {
    let (stream, _sent) = MockStream::new(&[]);

    let err = Session::establish(stream, config()).await.unwrap_err();
    assert!(matches!(err, Error::Protocol(_)));
}

#[tokio::test(start_paused = true)]
async fn test_greeting_timeout() {
    let (mut stream, _sent) = MockStream::new(&[]);
    stream.stall = true;

    let err = Session::establish(stream, config()).await.unwrap_err();
    assert!(matches!(err, Error::ConnectionTimeout(t) if t == Duration::from_secs(5)));
}

#[tokio::test]
async fn test_plain_session_without_extensions() {
    let (stream, sent) = MockStream::new(&[
        b"220 old.example.com\r\n",
        b"500 unrecognized command\r\n",
        b"250 old.example.com\r\n",
        b"250 ok\r\n",
        b"221 bye\r\n",
    ]);
    let config = SessionConfig::builder("old.example.com").build().unwrap();

    let mut session = Session::establish(stream, config).await.unwrap();
    assert_eq!(session.state(), SessionState::PlainReady);
    assert!(session.server_info().extensions.is_empty());
    assert!(Authentication::negotiate(session.server_info(), Credentials::new("u", "p")).is_none());

    session.write("NOOP").await.unwrap();
    assert_eq!(session.read().await.unwrap().code(), 250);
    session.quit().await.unwrap();

    assert_eq!(
        transcript(&sent),
        "EHLO localhost\r\nHELO localhost\r\nNOOP\r\nQUIT\r\n"
    );
}
