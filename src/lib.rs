//! mail2tg: an SMTP to Telegram gateway.
//!
//! Mail accepted by the embedded SMTP server is routed by sender to a
//! Telegram chat, queued per chat, and delivered by a single drain loop.
//! Messages the bot cannot post are relayed to a fallback mail server.

pub mod channels;
pub mod config;
pub mod error;
pub mod pipeline;

pub use error::{Error, Result};
