//! Transport adapters: inbound SMTP, outbound Telegram and the fallback relay.

pub mod relay;
pub mod smtp;
pub mod telegram;

pub use relay::{FallbackConfig, Relay, SmtpRelay};
pub use smtp::{MailHandler, SessionConfig, SmtpServer};
pub use telegram::{ChatClient, TelegramBot};
