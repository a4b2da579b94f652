//! Error types for mail2tg.

use std::time::Duration;

use crate::pipeline::types::ChatId;

/// Startup failures surfaced by the running gateway.
///
/// Intake, relay and per-message delivery failures are logged where they
/// happen and never travel this far.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),

    #[error("SMTP error: {0}")]
    Smtp(#[from] SmtpError),
}

/// Configuration-related errors. All of them are fatal at startup.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required configuration: {key}. {hint}")]
    MissingRequired { key: String, hint: String },

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Reasons an inbound transaction is discarded before it reaches a queue.
#[derive(Debug, thiserror::Error)]
pub enum IntakeError {
    #[error("Message could not be parsed")]
    Unparseable,

    #[error("Message contains no text or image parts")]
    NoDeliverableContent,

    #[error("Transaction has no recipients")]
    NoRecipients,

    #[error("No queue exists for destination {0}")]
    UnknownDestination(ChatId),

    #[error("Queue for destination {0} is closed")]
    QueueClosed(ChatId),
}

/// Chat-bot delivery errors.
#[derive(Debug, thiserror::Error)]
pub enum DeliveryError {
    #[error("Telegram {method} failed: {reason}")]
    SendFailed { method: String, reason: String },

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Image part {index} has no Content-Disposition header")]
    MissingDisposition { index: usize },

    #[error("Image part {index} has no filename in its Content-Disposition")]
    MissingFilename { index: usize },
}

/// Fallback relay errors. Terminal: nothing escalates past these.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("Invalid envelope address {address}: {reason}")]
    InvalidAddress { address: String, reason: String },

    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("TLS setup for {host} failed: {reason}")]
    Tls { host: String, reason: String },

    #[error("SMTP submission to {host}:{port} failed: {reason}")]
    Transport {
        host: String,
        port: u16,
        reason: String,
    },

    #[error("Relay task panicked: {0}")]
    Join(String),
}

/// SMTP listener and session errors.
#[derive(Debug, thiserror::Error)]
pub enum SmtpError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Client idle for more than {0:?}")]
    Timeout(Duration),

    #[error("Command line exceeds {0} bytes")]
    LineTooLong(usize),
}

/// Result type alias for the gateway.
pub type Result<T> = std::result::Result<T, Error>;
