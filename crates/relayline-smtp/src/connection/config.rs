//! Session configuration.

use std::time::Duration;

use serde::{Deserialize, Deserializer};

use crate::error::{Error, Result};

/// Line terminator for everything written to the server.
///
/// SMTP requires CRLF, so this is not configurable.
pub const LINE_TERMINATOR: &str = "\r\n";

/// Default SMTP port.
pub const DEFAULT_PORT: u16 = 25;

/// Default I/O timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// SMTP session configuration.
///
/// Resolved once before the session is constructed and never changed
/// afterwards. Can be deserialized from JSON; unknown fields are rejected.
///
/// ```
/// use relayline_smtp::SessionConfig;
///
/// let config = SessionConfig::from_json(r#"{"host": "smtp.example.com", "starttls": true}"#)?;
/// assert_eq!(config.port, 25);
/// # Ok::<(), relayline_smtp::Error>(())
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfig {
    /// Server hostname.
    pub host: String,
    /// Server port.
    pub port: u16,
    /// Username for authentication (empty for none).
    pub username: String,
    /// Password for authentication.
    pub password: String,
    /// Timeout for every read and write, in seconds when deserialized.
    #[serde(deserialize_with = "duration_from_secs")]
    pub timeout: Duration,
    /// Upgrade the connection with STARTTLS after the first hello.
    pub starttls: bool,
    /// Batch MAIL/RCPT/DATA when the server advertises PIPELINING.
    pub pipelining: bool,
    /// Identity sent with EHLO/HELO.
    pub client_id: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_PORT,
            username: String::new(),
            password: String::new(),
            timeout: DEFAULT_TIMEOUT,
            starttls: false,
            pipelining: false,
            client_id: "localhost".to_string(),
        }
    }
}

impl SessionConfig {
    /// Creates a configuration for `host` with default settings.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            ..Self::default()
        }
    }

    /// Creates a configuration builder.
    #[must_use]
    pub fn builder(host: impl Into<String>) -> SessionConfigBuilder {
        SessionConfigBuilder::new(host)
    }

    /// Parses and validates a JSON configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] for malformed JSON, unknown fields or
    /// values rejected by [`validate`](Self::validate).
    pub fn from_json(json: &str) -> Result<Self> {
        let config: Self =
            serde_json::from_str(json).map_err(|e| Error::InvalidConfig(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration before it is used to connect.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] describing the first invalid field.
    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(Error::InvalidConfig("host cannot be empty".into()));
        }
        if self.port == 0 {
            return Err(Error::InvalidConfig("port cannot be 0".into()));
        }
        if self.timeout.is_zero() {
            return Err(Error::InvalidConfig("timeout cannot be zero".into()));
        }
        if self.client_id.is_empty() || self.client_id.contains(char::is_whitespace) {
            return Err(Error::InvalidConfig(format!(
                "invalid client id: {:?}",
                self.client_id
            )));
        }
        if !self.username.is_empty() && self.password.is_empty() {
            return Err(Error::InvalidConfig(
                "username given without a password".into(),
            ));
        }
        Ok(())
    }

    /// Returns true if credentials are configured.
    #[must_use]
    pub fn has_credentials(&self) -> bool {
        !self.username.is_empty()
    }
}

fn duration_from_secs<'de, D>(deserializer: D) -> std::result::Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    u64::deserialize(deserializer).map(Duration::from_secs)
}

/// Builder for session configuration.
#[derive(Debug, Clone)]
pub struct SessionConfigBuilder {
    config: SessionConfig,
}

impl SessionConfigBuilder {
    /// Creates a new builder with the given hostname.
    #[must_use]
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            config: SessionConfig::new(host),
        }
    }

    /// Sets the port.
    #[must_use]
    pub const fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    /// Sets the credentials.
    #[must_use]
    pub fn credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.config.username = username.into();
        self.config.password = password.into();
        self
    }

    /// Sets the I/O timeout.
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.config.timeout = timeout;
        self
    }

    /// Enables or disables STARTTLS.
    #[must_use]
    pub const fn starttls(mut self, enabled: bool) -> Self {
        self.config.starttls = enabled;
        self
    }

    /// Enables or disables pipelining.
    #[must_use]
    pub const fn pipelining(mut self, enabled: bool) -> Self {
        self.config.pipelining = enabled;
        self
    }

    /// Sets the identity sent with EHLO/HELO.
    #[must_use]
    pub fn client_id(mut self, client_id: impl Into<String>) -> Self {
        self.config.client_id = client_id.into();
        self
    }

    /// Builds and validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidConfig`] if the configuration is invalid.
    pub fn build(self) -> Result<SessionConfig> {
        self.config.validate()?;
        Ok(self.config)
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
    fn test_defaults() {
        let config = SessionConfig::new("smtp.example.com");
        assert_eq!(config.port, 25);
        assert_eq!(config.timeout, Duration::from_secs(5));
        assert!(!config.starttls);
        assert!(!config.pipelining);
        assert_eq!(config.client_id, "localhost");
        assert!(!config.has_credentials());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_builder() {
        let config = SessionConfig::builder("smtp.example.com")
            .port(587)
            .credentials("user", "secret")
            .timeout(Duration::from_secs(30))
            .starttls(true)
            .pipelining(true)
            .client_id("client.example.com")
            .build()
            .unwrap();

        assert_eq!(config.port, 587);
        assert_eq!(config.username, "user");
        assert_eq!(config.timeout, Duration::from_secs(30));
        assert!(config.starttls);
        assert!(config.pipelining);
        assert!(config.has_credentials());
    }

    #[test]
    fn test_from_json() {
        let config = SessionConfig::from_json(
            r#"{
                "host": "smtp.example.com",
                "port": 587,
                "username": "user",
                "password": "secret",
                "timeout": 10,
                "starttls": true
            }"#,
        )
        .unwrap();

        assert_eq!(config.port, 587);
        assert_eq!(config.timeout, Duration::from_secs(10));
        assert!(config.starttls);
        assert!(!config.pipelining);
    }

    #[test]
    fn test_from_json_rejects_unknown_fields() {
        let err = SessionConfig::from_json(r#"{"host": "smtp.example.com", "newline": "\n"}"#)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidConfig(_)));
    }

    #[test]
    fn test_validation() {
        assert!(SessionConfig::new("").validate().is_err());
        assert!(SessionConfig::builder("smtp.example.com").port(0).build().is_err());
        assert!(SessionConfig::builder("smtp.example.com")
            .timeout(Duration::ZERO)
            .build()
            .is_err());
        assert!(SessionConfig::builder("smtp.example.com")
            .client_id("two words")
            .build()
            .is_err());
        assert!(SessionConfig::builder("smtp.example.com")
            .credentials("user", "")
            .build()
            .is_err());
    }
}
