//! Envelope types: sender and recipients of one mail transaction.

use crate::error::{Error, Result};

/// Email address for the SMTP envelope.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Address(String);

impl Address {
    /// Creates a new address from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn new(addr: impl Into<String>) -> Result<Self> {
        let addr = addr.into();
        Self::validate(&addr)?;
        Ok(Self(addr))
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(addr: &str) -> Result<()> {
        if addr.is_empty() {
            return Err(Error::InvalidAddress("Address cannot be empty".into()));
        }

        // Would break out of the MAIL/RCPT argument.
        if addr
            .chars()
            .any(|c| c.is_ascii_control() || c.is_whitespace() || c == '<' || c == '>')
        {
            return Err(Error::InvalidAddress(format!(
                "Address contains forbidden characters: {addr:?}"
            )));
        }

        let Some((local, domain)) = addr.split_once('@') else {
            return Err(Error::InvalidAddress("Address must contain @".into()));
        };

        if domain.contains('@') {
            return Err(Error::InvalidAddress(
                "Address must have exactly one @".into(),
            ));
        }

        if local.is_empty() || domain.is_empty() {
            return Err(Error::InvalidAddress(
                "Local and domain parts cannot be empty".into(),
            ));
        }

        Ok(())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role of a recipient in the message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecipientKind {
    /// Primary recipient.
    To,
    /// Carbon copy.
    Cc,
    /// Blind carbon copy.
    Bcc,
}

/// A recipient address together with its role.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    /// Recipient address.
    pub address: Address,
    /// Role of the recipient.
    pub kind: RecipientKind,
}

impl Recipient {
    /// Creates a recipient.
    #[must_use]
    pub const fn new(address: Address, kind: RecipientKind) -> Self {
        Self { address, kind }
    }

    /// Creates a `To` recipient from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn to(addr: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Address::new(addr)?, RecipientKind::To))
    }

    /// Creates a `Cc` recipient from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn cc(addr: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Address::new(addr)?, RecipientKind::Cc))
    }

    /// Creates a `Bcc` recipient from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the address is invalid.
    pub fn bcc(addr: impl Into<String>) -> Result<Self> {
        Ok(Self::new(Address::new(addr)?, RecipientKind::Bcc))
    }
}

/// Sender and ordered recipients of one mail transaction.
///
/// The role of a recipient does not change what goes on the wire; every
/// recipient gets exactly one `RCPT TO`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    from: Address,
    recipients: Vec<Recipient>,
}

impl Envelope {
    /// Creates an envelope.
    ///
    /// # Errors
    ///
    /// Returns an error if there are no recipients.
    pub fn new(from: Address, recipients: Vec<Recipient>) -> Result<Self> {
        if recipients.is_empty() {
            return Err(Error::InvalidAddress(
                "Envelope needs at least one recipient".into(),
            ));
        }
        Ok(Self { from, recipients })
    }

    /// Returns the sender.
    #[must_use]
    pub const fn sender(&self) -> &Address {
        &self.from
    }

    /// Returns the recipients in order.
    #[must_use]
    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Returns the recipients of one kind.
    pub fn recipients_of(&self, kind: RecipientKind) -> impl Iterator<Item = &Recipient> {
        self.recipients.iter().filter(move |r| r.kind == kind)
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
    fn test_valid_address() {
        let addr = Address::new("user@example.com").unwrap();
        assert_eq!(addr.as_str(), "user@example.com");
    }

    #[test]
    fn test_invalid_addresses() {
        for addr in [
            "",
            "userexample.com",
            "@example.com",
            "user@",
            "a@b@c",
            "user@example.com>\r\nRCPT TO:<x@y",
            "with space@example.com",
        ] {
            assert!(
                matches!(Address::new(addr), Err(Error::InvalidAddress(_))),
                "{addr:?} accepted"
            );
        }
    }

    #[test]
    fn test_envelope_requires_recipients() {
        let from = Address::new("sender@example.com").unwrap();
        assert!(Envelope::new(from, vec![]).is_err());
    }

    #[test]
    fn test_envelope_keeps_order_and_roles() {
        let envelope = Envelope::new(
            Address::new("sender@example.com").unwrap(),
            vec![
                Recipient::to("a@example.com").unwrap(),
                Recipient::bcc("b@example.com").unwrap(),
                Recipient::cc("c@example.com").unwrap(),
            ],
        )
        .unwrap();

        let order: Vec<_> = envelope
            .recipients()
            .iter()
            .map(|r| r.address.as_str())
            .collect();
        assert_eq!(order, ["a@example.com", "b@example.com", "c@example.com"]);
        assert_eq!(envelope.recipients_of(RecipientKind::Bcc).count(), 1);
        assert_eq!(envelope.sender().as_str(), "sender@example.com");
    }
}
