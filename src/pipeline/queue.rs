//! Per-destination bounded queues.
//!
//! One `mpsc` channel per chat, created up front for every destination the
//! routing table can produce. The producer half is cloned into every SMTP
//! session; the consumer half is owned by the single drain loop, so no
//! lock is needed around the set itself.

use std::collections::{BTreeMap, HashMap};
use std::num::NonZeroUsize;
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

use crate::error::IntakeError;
use crate::pipeline::types::{ChatId, WorkItem};

/// Default number of pending items per destination.
pub const DEFAULT_QUEUE_CAPACITY: usize = 500;

/// Create the queue set for a fixed list of destinations.
pub fn destination_queues<I>(destinations: I, capacity: NonZeroUsize) -> (QueueSender, QueueDrain)
where
    I: IntoIterator<Item = ChatId>,
{
    let mut senders = HashMap::new();
    let mut receivers = BTreeMap::new();

    for chat in destinations {
        if receivers.contains_key(&chat) {
            continue;
        }
        let (tx, rx) = mpsc::channel(capacity.get());
        senders.insert(chat, tx);
        receivers.insert(chat, rx);
    }

    debug!(
        destinations = receivers.len(),
        capacity = capacity.get(),
        "Destination queues created"
    );

    (
        QueueSender {
            senders: Arc::new(senders),
        },
        QueueDrain { receivers },
    )
}

// ── Producer side ───────────────────────────────────────────────────

/// Intake half of the queue set. Cheap to clone; safe to use from many tasks.
#[derive(Debug, Clone)]
pub struct QueueSender {
    senders: Arc<HashMap<ChatId, mpsc::Sender<WorkItem>>>,
}

impl QueueSender {
    /// Append an item to a destination's queue.
    ///
    /// Waits while the queue is full. Items are never dropped here; the
    /// caller (and through it the SMTP client) is stalled instead.
    pub async fn enqueue(&self, chat: ChatId, item: WorkItem) -> Result<(), IntakeError> {
        let tx = self
            .senders
            .get(&chat)
            .ok_or(IntakeError::UnknownDestination(chat))?;
        tx.send(item)
            .await
            .map_err(|_| IntakeError::QueueClosed(chat))
    }
}

// ── Consumer side ───────────────────────────────────────────────────

/// Drain half of the queue set, owned by exactly one drain loop.
#[derive(Debug)]
pub struct QueueDrain {
    receivers: BTreeMap<ChatId, mpsc::Receiver<WorkItem>>,
}

impl QueueDrain {
    /// Oldest pending item for one destination, without waiting.
    pub fn try_dequeue(&mut self, chat: ChatId) -> Option<WorkItem> {
        self.receivers.get_mut(&chat)?.try_recv().ok()
    }

    /// All destinations, in ascending chat id order.
    pub fn destinations(&self) -> Vec<ChatId> {
        self.receivers.keys().copied().collect()
    }

    /// Items waiting across every destination.
    pub fn pending(&self) -> usize {
        self.receivers.values().map(mpsc::Receiver::len).sum()
    }
}
