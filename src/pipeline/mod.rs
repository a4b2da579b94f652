//! Routing, queueing and delivery.
//!
//! Every accepted mail flows through:
//! 1. `IntakeHandler`: parse, classify, pick a chat from the `RoutingTable`
//! 2. `QueueSender::enqueue()`: bounded per-chat queue, blocks when full
//! 3. `DrainLoop::run_pass()`: at most one item per chat per pass
//! 4. `Renderer::deliver()`: text then images; fallback relay if the text fails

pub mod classify;
pub mod drain;
pub mod intake;
pub mod queue;
pub mod render;
pub mod routing;
pub mod types;
