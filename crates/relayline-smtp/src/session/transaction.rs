//! Mail transactions: MAIL, RCPT, DATA and the message payload.

use super::Session;
use crate::command::Command;
use crate::connection::{LINE_TERMINATOR, StartTls};
use crate::error::{Error, Result};
use crate::types::{Envelope, ReplyCode, Response};

impl<S: StartTls> Session<S> {
    /// Delivers one message.
    ///
    /// Sends MAIL FROM, one RCPT TO per recipient and DATA, then the payload.
    /// When pipelining is enabled in the configuration and advertised by the
    /// server, the three commands are written as one batch and their replies
    /// read back in order. Returns the server's final reply to the payload.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] for the first command the server rejected.
    /// In pipelined mode all outstanding replies are still consumed first; if
    /// DATA was accepted despite an earlier rejection the session is closed,
    /// since the server now expects message content.
    pub async fn send(&mut self, envelope: &Envelope, payload: &[u8]) -> Result<Response> {
        let body = encode_payload(payload);
        // Octets on the wire, excluding the end-of-data marker.
        let size = self.server_info.supports_size().then_some(body.len() - 1);
        let mut commands = Vec::with_capacity(envelope.recipients().len() + 2);
        commands.push(Command::Mail {
            from: envelope.sender().clone(),
            size,
        });
        commands.extend(envelope.recipients().iter().map(|recipient| Command::Rcpt {
            to: recipient.address.clone(),
        }));
        commands.push(Command::Data);

        if self.config.pipelining && self.server_info.supports_pipelining() {
            self.pipeline(&commands).await?;
        } else {
            for command in &commands {
                self.invoke(command).await?;
            }
        }

        let response = self.write_payload(&body).await?;
        tracing::info!(
            from = %envelope.sender(),
            recipients = envelope.recipients().len(),
            "message accepted"
        );
        Ok(response)
    }

    async fn pipeline(&mut self, commands: &[Command]) -> Result<()> {
        for command in commands {
            self.write(&command.request()).await?;
        }

        let mut failure = None;
        for command in commands {
            let response = self.read().await?;
            if let Err(e) = self.check(command, &response) {
                failure.get_or_insert(e);
            }
        }

        let Some(failure) = failure else {
            return Ok(());
        };
        if self
            .last_response()
            .is_some_and(|r| r.has_code(ReplyCode::START_DATA))
        {
            tracing::warn!("DATA accepted after a rejected command, dropping connection");
            self.close();
        }
        Err(failure)
    }

    /// Writes a message payload and reads the server's verdict.
    ///
    /// The payload is normalised to CRLF line endings, lines starting with a
    /// dot are dot-stuffed and the terminating `.` line is appended. Only
    /// valid after DATA was accepted.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Command`] if the server does not answer 250.
    pub async fn send_payload(&mut self, payload: &[u8]) -> Result<Response> {
        self.write_payload(&encode_payload(payload)).await
    }

    async fn write_payload(&mut self, body: &[u8]) -> Result<Response> {
        tracing::debug!(">> <{} bytes of message data>", body.len());
        self.write_line(body).await?;

        let response = self.read().await?;
        if !response.has_code(ReplyCode::OK) {
            return Err(Error::command(
                "DATA",
                ReplyCode::OK,
                response.code(),
                response.text(),
            ));
        }
        Ok(response)
    }
}

/// Normalises line endings, dot-stuffs and appends the end-of-data marker.
///
/// The result ends with the lone `.`; the caller adds the final CRLF.
fn encode_payload(payload: &[u8]) -> Vec<u8> {
    let mut body = Vec::with_capacity(payload.len() + 8);
    let trimmed = payload.strip_suffix(b"\n").unwrap_or(payload);

    if !payload.is_empty() {
        for line in trimmed.split(|&b| b == b'\n') {
            let line = line.strip_suffix(b"\r").unwrap_or(line);
            if line.first() == Some(&b'.') {
                body.push(b'.');
            }
            body.extend_from_slice(line);
            body.extend_from_slice(LINE_TERMINATOR.as_bytes());
        }
    }
    body.push(b'.');
    body
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
    use crate::connection::SessionConfig;
    use crate::session::SessionState;
    use crate::session::tests::{config, ready, script};
    use crate::types::{Address, Recipient};
    use tokio_test::io::Mock;

    fn envelope() -> Envelope {
        Envelope::new(
            Address::new("sender@example.com").unwrap(),
            vec![
                Recipient::to("alice@example.com").unwrap(),
                Recipient::bcc("bob@example.com").unwrap(),
            ],
        )
        .unwrap()
    }

    async fn pipelined(mock: Mock) -> Session<Mock> {
        let config = SessionConfig {
            pipelining: true,
            ..config()
        };
        Session::establish(mock, config).await.unwrap()
    }

    #[test]
    fn test_encode_payload() {
        assert_eq!(encode_payload(b""), b".");
        assert_eq!(encode_payload(b"hello"), b"hello\r\n.");
        assert_eq!(encode_payload(b"a\nb\n"), b"a\r\nb\r\n.");
        assert_eq!(encode_payload(b"a\r\n.b\r\n"), b"a\r\n..b\r\n.");
        assert_eq!(encode_payload(b".\n"), b"..\r\n.");
    }

    #[tokio::test]
    async fn test_send_sequential() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 sender ok\r\n")
            .write(b"RCPT TO:<alice@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<bob@example.com>\r\n")
            .read(b"251 will forward\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"Subject: hi\r\n\r\n..dot\r\n.\r\n")
            .read(b"250 queued as 1234\r\n")
            .build();
        let mut session = ready(mock).await;

        let response = session
            .send(&envelope(), b"Subject: hi\n\n.dot\n")
            .await
            .unwrap();
        assert_eq!(response.text(), "queued as 1234");
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_send_with_size() {
        let mock = script(b"250-mx.example.com\r\n250 SIZE 1000\r\n")
            .write(b"MAIL FROM:<sender@example.com> SIZE=4\r\n")
            .read(b"552 too big\r\n")
            .build();
        let mut session = ready(mock).await;

        let err = session.send(&envelope(), b"hi").await.unwrap_err();
        assert!(matches!(err, Error::Command { verb: "MAIL", .. }));
    }

    #[tokio::test]
    async fn test_size_counts_encoded_payload() {
        // ".a\nb\n" goes out as "..a\r\nb\r\n".
        let mock = script(b"250-mx.example.com\r\n250 SIZE 1000\r\n")
            .write(b"MAIL FROM:<sender@example.com> SIZE=8\r\n")
            .read(b"452 insufficient storage\r\n")
            .build();
        let mut session = ready(mock).await;

        let err = session.send(&envelope(), b".a\nb\n").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_send_pipelined() {
        let mock = script(b"250-mx.example.com\r\n250 PIPELINING\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .write(b"RCPT TO:<alice@example.com>\r\n")
            .write(b"RCPT TO:<bob@example.com>\r\n")
            .write(b"DATA\r\n")
            .read(b"250 ok\r\n250 ok\r\n250 ok\r\n354 go ahead\r\n")
            .write(b"body\r\n.\r\n")
            .read(b"250 queued\r\n")
            .build();
        let mut session = pipelined(mock).await;

        session.send(&envelope(), b"body").await.unwrap();
        assert_eq!(session.state(), SessionState::Active);
    }

    #[tokio::test]
    async fn test_pipelined_failure_drains_replies() {
        let mock = script(b"250-mx.example.com\r\n250 PIPELINING\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .write(b"RCPT TO:<alice@example.com>\r\n")
            .write(b"RCPT TO:<bob@example.com>\r\n")
            .write(b"DATA\r\n")
            .read(b"250 ok\r\n550 no such user\r\n550 no such user\r\n554 no valid recipients\r\n")
            .write(b"RSET\r\n")
            .read(b"250 flushed\r\n")
            .build();
        let mut session = pipelined(mock).await;

        let err = session.send(&envelope(), b"body").await.unwrap_err();
        assert!(matches!(err, Error::Command { verb: "RCPT", .. }));
        assert_eq!(session.last_response().unwrap().code(), 554);

        // Replies were drained, so the next command lines up.
        session.invoke(&Command::Rset).await.unwrap();
    }

    #[tokio::test]
    async fn test_pipelined_data_accepted_after_failure_closes() {
        let mock = script(b"250-mx.example.com\r\n250 PIPELINING\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .write(b"RCPT TO:<alice@example.com>\r\n")
            .write(b"RCPT TO:<bob@example.com>\r\n")
            .write(b"DATA\r\n")
            .read(b"250 ok\r\n250 ok\r\n550 no such user\r\n354 go ahead\r\n")
            .build();
        let mut session = pipelined(mock).await;

        let err = session.send(&envelope(), b"body").await.unwrap_err();
        assert!(matches!(err, Error::Command { verb: "RCPT", .. }));
        assert!(session.is_closed());
    }

    #[tokio::test]
    async fn test_pipelining_needs_advertisement() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"451 try later\r\n")
            .build();
        let mut session = pipelined(mock).await;

        let err = session.send(&envelope(), b"body").await.unwrap_err();
        assert!(err.is_transient());
    }

    #[tokio::test]
    async fn test_payload_rejected() {
        let mock = script(b"250 mx.example.com\r\n")
            .write(b"MAIL FROM:<sender@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<alice@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"RCPT TO:<bob@example.com>\r\n")
            .read(b"250 ok\r\n")
            .write(b"DATA\r\n")
            .read(b"354 go ahead\r\n")
            .write(b"spam\r\n.\r\n")
            .read(b"554 rejected as spam\r\n")
            .build();
        let mut session = ready(mock).await;

        let err = session.send(&envelope(), b"spam\r\n").await.unwrap_err();
        assert!(err.is_permanent());
    }
}
