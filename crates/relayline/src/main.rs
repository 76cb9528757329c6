//! `relayline` - SMTP server probe
//!
//! Connects to the server named in a JSON configuration, reports what it
//! advertises, authenticates if credentials are configured and optionally
//! delivers a message file.
//!
//! ```text
//! relayline <config.json> [<message-file> <from> <rcpt>...]
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![forbid(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, bail};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use relayline_smtp::{
    Address, Authentication, Credentials, Envelope, Recipient, Session, SessionConfig,
};

/// A test delivery requested on the command line.
struct Delivery {
    message: PathBuf,
    from: String,
    recipients: Vec<String>,
}

/// Parsed command line.
struct Args {
    config: PathBuf,
    delivery: Option<Delivery>,
}

impl Args {
    fn parse(mut args: impl Iterator<Item = String>) -> anyhow::Result<Self> {
        let usage = "usage: relayline <config.json> [<message-file> <from> <rcpt>...]";
        let config = args.next().context(usage)?.into();

        let delivery = match args.next() {
            None => None,
            Some(message) => {
                let from = args.next().context(usage)?;
                let recipients: Vec<String> = args.collect();
                if recipients.is_empty() {
                    bail!("{usage}");
                }
                Some(Delivery {
                    message: message.into(),
                    from,
                    recipients,
                })
            }
        };

        Ok(Self { config, delivery })
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relayline=info,relayline_smtp=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse(std::env::args().skip(1))?;

    let json = std::fs::read_to_string(&args.config)
        .with_context(|| format!("reading {}", args.config.display()))?;
    let config = SessionConfig::from_json(&json)
        .with_context(|| format!("loading {}", args.config.display()))?;

    let envelope = args
        .delivery
        .as_ref()
        .map(|delivery| {
            let recipients = delivery
                .recipients
                .iter()
                .map(Recipient::to)
                .collect::<Result<Vec<_>, _>>()?;
            Envelope::new(Address::new(delivery.from.as_str())?, recipients)
        })
        .transpose()
        .context("invalid envelope")?;

    info!(host = %config.host, port = config.port, "connecting");
    let credentials = Credentials::from_config(&config);
    let mut session = Session::connect(config)
        .await
        .context("session bootstrap failed")?;

    let server = session.server_info();
    println!("server: {}", server.hostname);
    println!("tls: {}", session.is_tls());
    let mut extensions: Vec<String> = server
        .extensions
        .iter()
        .map(|e| format!("{e:?}"))
        .collect();
    extensions.sort();
    for extension in &extensions {
        println!("extension: {extension}");
    }

    if let Some(credentials) = credentials {
        let auth = Authentication::negotiate(session.server_info(), credentials)
            .context("server offers no supported AUTH mechanism")?;
        println!("auth: {}", auth.mechanism());
        session.authenticate(auth).await.context("authentication")?;
    }

    if let (Some(delivery), Some(envelope)) = (&args.delivery, &envelope) {
        let payload = std::fs::read(&delivery.message)
            .with_context(|| format!("reading {}", delivery.message.display()))?;
        let response = session
            .send(envelope, &payload)
            .await
            .context("delivery failed")?;
        println!("delivered: {response}");
    }

    session.quit().await.context("QUIT")?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> anyhow::Result<Args> {
        Args::parse(list.iter().map(ToString::to_string))
    }

    #[test]
    fn test_config_only() {
        let parsed = args(&["relay.json"]).unwrap();
        assert_eq!(parsed.config, PathBuf::from("relay.json"));
        assert!(parsed.delivery.is_none());
    }

    #[test]
    fn test_delivery() {
        let parsed = args(&[
            "relay.json",
            "msg.eml",
            "a@example.com",
            "b@example.com",
            "c@example.com",
        ])
        .unwrap();
        let delivery = parsed.delivery.unwrap();
        assert_eq!(delivery.message, PathBuf::from("msg.eml"));
        assert_eq!(delivery.from, "a@example.com");
        assert_eq!(delivery.recipients.len(), 2);
    }

    #[test]
    fn test_missing_arguments() {
        assert!(args(&[]).is_err());
        assert!(args(&["relay.json", "msg.eml"]).is_err());
        assert!(args(&["relay.json", "msg.eml", "a@example.com"]).is_err());
    }
}
