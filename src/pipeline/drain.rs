//! Drain loop: the single worker that empties the destination queues.
//!
//! Each pass visits every destination once, takes at most one ready item
//! from each, delivers it, then sleeps for a fixed interval. Empty queues
//! are skipped without waiting, so one quiet chat never holds up another,
//! and per-chat delivery order is enqueue order.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::pipeline::queue::QueueDrain;
use crate::pipeline::render::{Outcome, Renderer};

/// Default pause between passes.
pub const DEFAULT_DRAIN_INTERVAL: Duration = Duration::from_secs(1);

/// Result of one pass over every destination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Items taken off a queue this pass.
    pub dequeued: usize,
    pub delivered: usize,
    pub rerouted: usize,
    pub lost: usize,
    /// Items still waiting across all destinations after the pass.
    pub pending: usize,
    /// `pending` differs from the previous pass and was logged.
    pub pending_changed: bool,
}

/// Owns the consumer half of the queues and the renderer.
pub struct DrainLoop {
    queues: QueueDrain,
    renderer: Renderer,
    interval: Duration,
    last_pending: usize,
}

impl DrainLoop {
    pub fn new(queues: QueueDrain, renderer: Renderer, interval: Duration) -> Self {
        Self {
            queues,
            renderer,
            interval,
            last_pending: 0,
        }
    }

    /// One pass: at most one item per destination, ascending chat id order.
    pub async fn run_pass(&mut self) -> PassReport {
        let mut report = PassReport::default();

        for chat in self.queues.destinations() {
            let Some(item) = self.queues.try_dequeue(chat) else {
                continue;
            };
            report.dequeued += 1;
            debug!(item = %item.id, chat = %chat, "Dequeued");

            match self.renderer.deliver(chat, &item).await {
                Outcome::Delivered { .. } => report.delivered += 1,
                Outcome::Rerouted => report.rerouted += 1,
                Outcome::Lost => report.lost += 1,
            }
        }

        report.pending = self.queues.pending();
        report.pending_changed = report.pending != self.last_pending;
        if report.pending_changed {
            info!(pending = report.pending, "Pending messages: {}", report.pending);
            self.last_pending = report.pending;
        }

        report
    }

    /// Run passes until `shutdown` is set, sleeping `interval` after each.
    pub async fn run(mut self, shutdown: Arc<AtomicBool>) {
        info!(
            interval_ms = self.interval.as_millis() as u64,
            destinations = self.queues.destinations().len(),
            fallback = self.renderer.has_fallback(),
            "Drain loop started"
        );

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!(pending = self.queues.pending(), "Drain loop shutting down");
                return;
            }

            self.run_pass().await;
            tokio::time::sleep(self.interval).await;
        }
    }
}

/// Spawn the drain loop. Set the returned flag to stop it after the current pass.
pub fn spawn_drain_loop(drain: DrainLoop) -> (JoinHandle<()>, Arc<AtomicBool>) {
    let shutdown = Arc::new(AtomicBool::new(false));
    let shutdown_flag = Arc::clone(&shutdown);

    let handle = tokio::spawn(drain.run(shutdown));

    (handle, shutdown_flag)
}
