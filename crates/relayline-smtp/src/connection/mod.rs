//! Raw line I/O over the server connection.
//!
//! [`Connection`] knows nothing about SMTP: it reads terminator-delimited
//! lines of bounded length, writes data followed by a terminator, tracks
//! end-of-stream, and bounds every operation by a timeout.

mod config;
mod stream;

pub use config::{DEFAULT_PORT, DEFAULT_TIMEOUT, LINE_TERMINATOR, SessionConfig, SessionConfigBuilder};
pub use stream::{SmtpStream, StartTls, connect};

use std::future::Future;
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};

use crate::error::{Error, Result};

/// Exclusive owner of the byte stream to the server.
#[derive(Debug)]
pub struct Connection<S> {
    reader: BufReader<S>,
    timeout: Duration,
    eof: bool,
}

impl<S: StartTls> Connection<S> {
    /// Wraps a stream; every read and write is bounded by `timeout`.
    pub fn new(stream: S, timeout: Duration) -> Self {
        Self {
            reader: BufReader::new(stream),
            timeout,
            eof: false,
        }
    }

    /// Reads one line.
    ///
    /// Stops after the first occurrence of `terminator` or after `max_bytes`
    /// bytes, whichever comes first. The terminator is not part of the
    /// returned line. At end-of-stream the partial line read so far is
    /// returned (possibly empty) and [`is_eof`](Self::is_eof) becomes true.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionTimeout`] if no data arrives in time, or an
    /// I/O error.
    pub async fn read_line(&mut self, max_bytes: usize, terminator: &str) -> Result<String> {
        let terminator = terminator.as_bytes();
        let limit = self.timeout;
        let mut line = Vec::new();

        loop {
            let available = tokio::time::timeout(limit, self.reader.fill_buf())
                .await
                .map_err(|_| Error::ConnectionTimeout(limit))??;

            if available.is_empty() {
                self.eof = true;
                break;
            }

            let mut used = 0;
            let mut complete = false;
            for &byte in available {
                line.push(byte);
                used += 1;
                if line.ends_with(terminator) || line.len() >= max_bytes {
                    complete = true;
                    break;
                }
            }
            self.reader.consume(used);

            if complete {
                break;
            }
        }

        if line.ends_with(terminator) {
            line.truncate(line.len() - terminator.len());
        }
        Ok(String::from_utf8_lossy(&line).into_owned())
    }

    /// Writes `data` followed by `terminator` and flushes.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ConnectionTimeout`] if the write does not complete in
    /// time, or an I/O error.
    pub async fn write(&mut self, data: &[u8], terminator: &str) -> Result<()> {
        let stream = self.reader.get_mut();
        timed(self.timeout, async {
            stream.write_all(data).await?;
            stream.write_all(terminator.as_bytes()).await?;
            stream.flush().await
        })
        .await
    }

    /// Returns true once a read has hit end-of-stream.
    #[must_use]
    pub const fn is_eof(&self) -> bool {
        self.eof
    }

    /// Returns the I/O timeout.
    #[must_use]
    pub const fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Gets a reference to the underlying stream.
    pub fn get_ref(&self) -> &S {
        self.reader.get_ref()
    }

    /// Gets a mutable reference to the underlying stream.
    pub fn get_mut(&mut self) -> &mut S {
        self.reader.get_mut()
    }

    /// Returns true if the stream is TLS-encrypted.
    pub fn is_tls(&self) -> bool {
        self.get_ref().is_tls()
    }

    /// Replaces the stream with a TLS-secured one.
    ///
    /// Anything the server sent before the handshake and that is still
    /// buffered is discarded.
    ///
    /// # Errors
    ///
    /// Returns the handshake error, or [`Error::ConnectionTimeout`].
    pub async fn upgrade_to_tls(self, host: &str) -> Result<Self> {
        let limit = self.timeout;
        let stream = self.reader.into_inner();
        let secured = tokio::time::timeout(limit, stream.start_tls(host))
            .await
            .map_err(|_| Error::ConnectionTimeout(limit))??;
        Ok(Self::new(secured, limit))
    }

    /// Shuts down the write half of the stream.
    ///
    /// # Errors
    ///
    /// Returns an I/O error or [`Error::ConnectionTimeout`].
    pub async fn shutdown(&mut self) -> Result<()> {
        timed(self.timeout, self.reader.get_mut().shutdown()).await
    }
}

async fn timed<F>(limit: Duration, operation: F) -> Result<()>
where
    F: Future<Output = std::io::Result<()>>,
{
    tokio::time::timeout(limit, operation)
        .await
        .map_err(|_| Error::ConnectionTimeout(limit))?
        .map_err(Error::from)
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
    use tokio_test::io::{Builder, Mock};

    /// Scripted streams never negotiate real TLS; the upgrade is a no-op.
    impl StartTls for Mock {
        async fn start_tls(self, _host: &str) -> Result<Self> {
            Ok(self)
        }

        fn is_tls(&self) -> bool {
            false
        }
    }

    fn connection(mock: Mock) -> Connection<Mock> {
        Connection::new(mock, Duration::from_secs(5))
    }

    #[tokio::test]
    async fn test_read_line_strips_terminator() {
        let mock = Builder::new().read(b"220 ready\r\n250 OK\r\n").build();
        let mut conn = connection(mock);

        assert_eq!(conn.read_line(512, "\r\n").await.unwrap(), "220 ready");
        assert_eq!(conn.read_line(512, "\r\n").await.unwrap(), "250 OK");
        assert!(!conn.is_eof());
    }

    #[tokio::test]
    async fn test_read_line_across_chunks() {
        let mock = Builder::new().read(b"250 lo").read(b"ng line\r").read(b"\n").build();
        let mut conn = connection(mock);

        assert_eq!(conn.read_line(512, "\r\n").await.unwrap(), "250 long line");
    }

    #[tokio::test]
    async fn test_read_line_bounded() {
        let mock = Builder::new().read(b"250 abcdefgh\r\n").build();
        let mut conn = connection(mock);

        assert_eq!(conn.read_line(8, "\r\n").await.unwrap(), "250 abcd");
        assert_eq!(conn.read_line(8, "\r\n").await.unwrap(), "efgh");
    }

    #[tokio::test]
    async fn test_read_line_eof() {
        let mock = Builder::new().read(b"250 partial").build();
        let mut conn = connection(mock);

        assert_eq!(conn.read_line(512, "\r\n").await.unwrap(), "250 partial");
        assert!(conn.is_eof());
        assert_eq!(conn.read_line(512, "\r\n").await.unwrap(), "");
    }

    #[tokio::test]
    async fn test_read_line_timeout() {
        let mock = Builder::new().wait(Duration::from_secs(10)).build();
        let mut conn = Connection::new(mock, Duration::from_millis(50));

        let err = conn.read_line(512, "\r\n").await.unwrap_err();
        assert!(matches!(err, Error::ConnectionTimeout(_)));
    }

    #[tokio::test]
    async fn test_write_appends_terminator() {
        let mock = Builder::new().write(b"NOOP\r\n").build();
        let mut conn = connection(mock);

        conn.write(b"NOOP", "\r\n").await.unwrap();
    }

    #[tokio::test]
    async fn test_upgrade_keeps_timeout() {
        let mock = Builder::new().write(b"EHLO x\r\n").build();
        let conn = connection(mock);

        let mut conn = conn.upgrade_to_tls("mx.example.com").await.unwrap();
        assert_eq!(conn.timeout(), Duration::from_secs(5));
        conn.write(b"EHLO x", "\r\n").await.unwrap();
    }
}
