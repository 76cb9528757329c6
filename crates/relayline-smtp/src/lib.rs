//! # relayline-smtp
//!
//! An SMTP client session engine (RFC 5321) for delivering one message at a
//! time over a single connection.
//!
//! ## Features
//!
//! - **Bootstrap on construction**: greeting check, EHLO with HELO fallback,
//!   optional STARTTLS and a second EHLO before the session is handed out
//! - **One command executor**: every verb is written, answered and checked
//!   for its exact reply code the same way
//! - **Authentication**: PLAIN, LOGIN, CRAM-MD5, XOAUTH2, OAUTHBEARER
//! - **Delivery**: MAIL/RCPT/DATA with optional PIPELINING, dot-stuffed payload
//! - **Append-only response log**: every reply line, in order
//!
//! ## Quick Start
//!
//! ```no_run
//! use relayline_smtp::{Address, Envelope, Recipient, Session, SessionConfig};
//! use relayline_smtp::auth::{Authentication, Credentials};
//!
//! # async fn run() -> relayline_smtp::Result<()> {
//! let config = SessionConfig::builder("smtp.example.com")
//!     .port(587)
//!     .starttls(true)
//!     .build()?;
//! let mut session = Session::connect(config).await?;
//!
//! let credentials = Credentials::new("user@example.com", "password");
//! if let Some(auth) = Authentication::negotiate(session.server_info(), credentials) {
//!     session.authenticate(auth).await?;
//! }
//!
//! let envelope = Envelope::new(
//!     Address::new("sender@example.com")?,
//!     vec![Recipient::to("recipient@example.com")?],
//! )?;
//! session
//!     .send(&envelope, b"Subject: Test\r\n\r\nHello, World!\r\n")
//!     .await?;
//!
//! session.quit().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Modules
//!
//! - [`auth`]: SASL mechanisms
//! - [`command`]: SMTP commands and their expected reply codes
//! - [`connection`]: Line I/O, streams and configuration
//! - [`session`]: The session state machine
//! - [`types`]: Replies, capabilities and addresses

#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

pub mod auth;
pub mod command;
pub mod connection;
mod error;
pub mod session;
pub mod types;

pub use auth::{Authentication, Credentials};
pub use command::Command;
pub use connection::{Connection, SessionConfig, SessionConfigBuilder, SmtpStream, StartTls};
pub use error::{Error, Result};
pub use session::{ResponseLog, Session, SessionState};
pub use types::{
    Address, AuthMechanism, Envelope, Extension, Recipient, RecipientKind, ReplyCode, Response,
    ServerInfo,
};
