//! Shared types for the routing and delivery pipeline.

use std::fmt;
use std::sync::Arc;

use mail_parser::Message;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ── Destination ─────────────────────────────────────────────────────

/// Telegram chat that receives relayed mail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChatId(pub i64);

impl fmt::Display for ChatId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<i64> for ChatId {
    fn from(id: i64) -> Self {
        Self(id)
    }
}

// ── Work item ───────────────────────────────────────────────────────

/// One accepted mail transaction waiting for delivery.
///
/// Built by the intake handler, owned by a destination queue until the
/// drain loop takes it. Never mutated.
#[derive(Debug)]
pub struct WorkItem {
    /// Correlates log lines for this transaction.
    pub id: Uuid,
    /// Normalized envelope sender (empty for a null reverse-path).
    pub sender: String,
    /// Normalized envelope recipients, in RCPT order.
    pub recipients: Vec<String>,
    /// Parsed MIME message.
    pub message: Message<'static>,
    /// The message exactly as received over SMTP.
    pub raw: Arc<[u8]>,
}

impl WorkItem {
    pub fn new(
        sender: String,
        recipients: Vec<String>,
        message: Message<'static>,
        raw: Arc<[u8]>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            sender,
            recipients,
            message,
            raw,
        }
    }

    /// Subject header, decoded, or empty when absent.
    pub fn subject(&self) -> &str {
        self.message.subject().unwrap_or_default()
    }
}
