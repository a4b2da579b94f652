//! Fallback relay: re-submits the original message over SMTP via lettre.
//!
//! Used only when the Telegram text send fails. Best effort: one attempt,
//! errors are returned to the caller to log, nothing retries.

use std::sync::Arc;

use async_trait::async_trait;
use lettre::address::Envelope;
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{Tls, TlsParameters};
use lettre::{Address, SmtpTransport, Transport};
use secrecy::{ExposeSecret, SecretString};
use tracing::info;

use crate::error::RelayError;

/// Default submission port when none is configured.
pub const DEFAULT_RELAY_PORT: u16 = 25;

/// A transport that can take over a message the chat bot could not deliver.
#[async_trait]
pub trait Relay: Send + Sync {
    /// Submit `raw` unchanged with the given envelope.
    async fn relay(
        &self,
        sender: &str,
        recipients: &[String],
        raw: Arc<[u8]>,
    ) -> Result<(), RelayError>;
}

/// Backup SMTP relay settings.
#[derive(Debug)]
pub struct FallbackConfig {
    pub host: String,
    pub port: u16,
    /// Authentication is attempted only when a username is set.
    pub username: Option<String>,
    pub password: SecretString,
}

/// Synchronous SMTP submission, run on the blocking pool.
pub struct SmtpRelay {
    config: Arc<FallbackConfig>,
}

impl SmtpRelay {
    pub fn new(config: FallbackConfig) -> Self {
        Self {
            config: Arc::new(config),
        }
    }

    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.config.host, self.config.port)
    }
}

#[async_trait]
impl Relay for SmtpRelay {
    async fn relay(
        &self,
        sender: &str,
        recipients: &[String],
        raw: Arc<[u8]>,
    ) -> Result<(), RelayError> {
        let envelope = build_envelope(sender, recipients)?;
        let config = Arc::clone(&self.config);

        tokio::task::spawn_blocking(move || submit(&config, &envelope, &raw))
            .await
            .map_err(|e| RelayError::Join(e.to_string()))??;

        info!(relay = %self.endpoint(), sender = %sender, "Message handed to fallback relay");
        Ok(())
    }
}

/// Build the SMTP envelope exactly as received. An empty sender is the
/// null reverse-path (bounces).
pub fn build_envelope(sender: &str, recipients: &[String]) -> Result<Envelope, RelayError> {
    let from = if sender.is_empty() {
        None
    } else {
        Some(parse_address(sender)?)
    };
    let to = recipients
        .iter()
        .map(|r| parse_address(r))
        .collect::<Result<Vec<_>, _>>()?;

    Envelope::new(from, to).map_err(|e| RelayError::InvalidEnvelope(e.to_string()))
}

fn parse_address(address: &str) -> Result<Address, RelayError> {
    address
        .parse::<Address>()
        .map_err(|e| RelayError::InvalidAddress {
            address: address.to_string(),
            reason: e.to_string(),
        })
}

/// Blocking submission: connect, opportunistic STARTTLS, optional AUTH PLAIN, send.
fn submit(config: &FallbackConfig, envelope: &Envelope, raw: &[u8]) -> Result<(), RelayError> {
    let tls = TlsParameters::new(config.host.clone()).map_err(|e| RelayError::Tls {
        host: config.host.clone(),
        reason: e.to_string(),
    })?;

    let mut builder = SmtpTransport::builder_dangerous(&config.host)
        .port(config.port)
        .tls(Tls::Opportunistic(tls));

    if let Some(username) = &config.username {
        builder = builder
            .credentials(Credentials::new(
                username.clone(),
                config.password.expose_secret().to_string(),
            ))
            .authentication(vec![Mechanism::Plain]);
    }

    builder
        .build()
        .send_raw(envelope, raw)
        .map_err(|e| RelayError::Transport {
            host: config.host.clone(),
            port: config.port,
            reason: e.to_string(),
        })?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn envelope_keeps_sender_and_recipients() {
        let envelope = build_envelope(
            "alice@example.com",
            &["bob@example.com".to_string(), "carol@example.org".to_string()],
        )
        .unwrap();
        assert_eq!(
            envelope.from().map(ToString::to_string).as_deref(),
            Some("alice@example.com")
        );
        let to: Vec<String> = envelope.to().iter().map(ToString::to_string).collect();
        assert_eq!(to, vec!["bob@example.com", "carol@example.org"]);
    }

    #[test]
    fn empty_sender_is_null_reverse_path() {
        let envelope = build_envelope("", &["bob@example.com".to_string()]).unwrap();
        assert!(envelope.from().is_none());
    }

    #[test]
    fn no_recipients_is_invalid() {
        let err = build_envelope("alice@example.com", &[]).unwrap_err();
        assert!(matches!(err, RelayError::InvalidEnvelope(_)));
    }

    #[test]
    fn bad_address_is_reported() {
        let err = build_envelope("not an address", &["bob@example.com".to_string()]).unwrap_err();
        assert!(matches!(err, RelayError::InvalidAddress { .. }));
    }

    #[test]
    fn endpoint_formats_host_and_port() {
        let relay = SmtpRelay::new(FallbackConfig {
            host: "relay.example".into(),
            port: DEFAULT_RELAY_PORT,
            username: None,
            password: SecretString::from(String::new()),
        });
        assert_eq!(relay.endpoint(), "relay.example:25");
    }

    #[tokio::test]
    async fn unreachable_relay_is_error() {
        let _ = rustls::crypto::ring::default_provider().install_default();
        let relay = SmtpRelay::new(FallbackConfig {
            host: "127.0.0.1".into(),
            port: 9,
            username: Some("user".into()),
            password: SecretString::from("pass".to_string()),
        });
        let result = relay
            .relay(
                "alice@example.com",
                &["bob@example.com".to_string()],
                Arc::from(&b"Subject: x\r\n\r\nbody\r\n"[..]),
            )
            .await;
        assert!(matches!(result, Err(RelayError::Transport { port: 9, .. })));
    }
}
