//! Intake handler: turns an accepted SMTP transaction into a queued work item.
//!
//! Called once per transaction, concurrently from every SMTP session. The
//! routing table is read-only; the queue sender is the only shared state.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use mail_parser::MessageParser;
use tracing::{info, warn};

use crate::channels::smtp::MailHandler;
use crate::error::IntakeError;
use crate::pipeline::classify::classify;
use crate::pipeline::queue::QueueSender;
use crate::pipeline::routing::{RoutingTable, normalize_address};
use crate::pipeline::types::{ChatId, WorkItem};

#[derive(Clone)]
pub struct IntakeHandler {
    routes: Arc<RoutingTable>,
    queues: QueueSender,
}

impl IntakeHandler {
    pub fn new(routes: Arc<RoutingTable>, queues: QueueSender) -> Self {
        Self { routes, queues }
    }

    /// Parse, classify, route and enqueue. Waits while the destination
    /// queue is full. Returns the chat the item was queued for.
    pub async fn accept(
        &self,
        sender: &str,
        recipients: &[String],
        raw: Vec<u8>,
    ) -> Result<ChatId, IntakeError> {
        let sender = normalize_address(sender).to_string();
        let recipients: Vec<String> = recipients
            .iter()
            .map(|r| normalize_address(r).to_string())
            .collect();
        let first_recipient = recipients.first().ok_or(IntakeError::NoRecipients)?;

        let message = MessageParser::default()
            .parse(&raw[..])
            .ok_or(IntakeError::Unparseable)?
            .into_owned();

        info!(
            sender = %sender,
            recipient = %first_recipient,
            subject = message.subject().unwrap_or_default(),
            "Received mail"
        );

        if classify(&message).is_empty() {
            return Err(IntakeError::NoDeliverableContent);
        }

        let chat = self.routes.resolve(&sender);
        let item = WorkItem::new(sender, recipients, message, Arc::from(raw));
        info!(item = %item.id, chat = %chat, "Relaying message");

        self.queues.enqueue(chat, item).await?;
        Ok(chat)
    }
}

#[async_trait]
impl MailHandler for IntakeHandler {
    async fn handle(&self, origin: SocketAddr, sender: &str, recipients: &[String], raw: Vec<u8>) {
        if let Err(e) = self.accept(sender, recipients, raw).await {
            warn!(origin = %origin, sender = %sender, "Mail discarded: {e}");
        }
    }
}
