//! Configuration, loaded once at startup from a TOML file.
//!
//! Every problem found here is fatal: the gateway does not start serving
//! with a partial configuration.

use std::collections::HashMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use secrecy::SecretString;
use serde::Deserialize;

use crate::channels::relay::{DEFAULT_RELAY_PORT, FallbackConfig};
use crate::channels::smtp::{DEFAULT_MAX_MESSAGE_SIZE, SessionConfig};
use crate::channels::telegram::DEFAULT_API_URL;
use crate::error::ConfigError;
use crate::pipeline::drain::DEFAULT_DRAIN_INTERVAL;
use crate::pipeline::queue::DEFAULT_QUEUE_CAPACITY;
use crate::pipeline::routing::RoutingTable;
use crate::pipeline::types::ChatId;

/// Default config file location, relative to the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "./mail2tg.toml";

/// Overrides `bot.token` when set.
pub const BOT_TOKEN_ENV: &str = "MAIL2TG_BOT_TOKEN";

/// Overrides `fallback.password` when set.
pub const FALLBACK_PASSWORD_ENV: &str = "MAIL2TG_FALLBACK_PASSWORD";

/// Fully validated gateway configuration.
#[derive(Debug)]
pub struct Config {
    pub smtp: SmtpConfig,
    pub bot: BotConfig,
    pub routes: RoutingTable,
    pub queue: QueueConfig,
    /// `None` when no fallback host is configured.
    pub fallback: Option<FallbackConfig>,
    pub logging: LoggingConfig,
}

/// Inbound SMTP listener settings.
#[derive(Debug, Clone)]
pub struct SmtpConfig {
    /// Socket address to listen on.
    pub listen: String,
    /// Hostname announced to clients.
    pub name: String,
    pub max_message_size: usize,
}

impl SmtpConfig {
    pub fn session(&self) -> SessionConfig {
        SessionConfig {
            hostname: self.name.clone(),
            max_message_size: self.max_message_size,
        }
    }
}

/// Telegram bot settings.
#[derive(Debug)]
pub struct BotConfig {
    pub token: SecretString,
    pub api_url: String,
}

/// Queue sizing and drain pacing.
#[derive(Debug, Clone, Copy)]
pub struct QueueConfig {
    /// Pending items per destination before intake blocks.
    pub capacity: NonZeroUsize,
    /// Pause between drain passes.
    pub interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            capacity: NonZeroUsize::new(DEFAULT_QUEUE_CAPACITY).unwrap_or(NonZeroUsize::MIN),
            interval: DEFAULT_DRAIN_INTERVAL,
        }
    }
}

/// Log destination and verbosity.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LoggingConfig {
    /// Append logs to this file instead of stdout.
    #[serde(default)]
    pub file: Option<PathBuf>,
    /// Default the log level to `debug` instead of `info`.
    #[serde(default)]
    pub debug: bool,
}

impl Config {
    /// Read, apply environment overrides, validate.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let mut raw = parse(&text)?;

        if let Ok(token) = std::env::var(BOT_TOKEN_ENV) {
            raw.bot.token = Some(token);
        }
        if let Ok(password) = std::env::var(FALLBACK_PASSWORD_ENV)
            && let Some(fallback) = raw.fallback.as_mut()
        {
            fallback.password = password;
        }

        raw.resolve()
    }

    /// Validate configuration text without consulting the environment.
    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        parse(text)?.resolve()
    }
}

// ── File format ─────────────────────────────────────────────────────

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    #[serde(default)]
    smtp: RawSmtp,
    #[serde(default)]
    bot: RawBot,
    #[serde(default)]
    receivers: HashMap<String, Scalar>,
    #[serde(default)]
    queue: RawQueue,
    fallback: Option<RawFallback>,
    #[serde(default)]
    logging: LoggingConfig,
}

#[derive(Debug, Default, Deserialize)]
struct RawSmtp {
    listen: Option<String>,
    name: Option<String>,
    max_message_size: Option<usize>,
}

#[derive(Debug, Default, Deserialize)]
struct RawBot {
    token: Option<String>,
    api_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawQueue {
    capacity: Option<NonZeroUsize>,
    interval_ms: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawFallback {
    host: Option<String>,
    port: Option<Scalar>,
    #[serde(default)]
    user: String,
    #[serde(default)]
    password: String,
}

/// Chat ids and ports may be written as numbers or strings.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum Scalar {
    Int(i64),
    Text(String),
}

impl Scalar {
    fn to_i64(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            Self::Text(s) => s.trim().parse().ok(),
        }
    }
}

fn parse(text: &str) -> Result<RawConfig, ConfigError> {
    toml::from_str(text).map_err(|e| ConfigError::ParseError(e.to_string()))
}

fn required(value: Option<String>, key: &str, hint: &str) -> Result<String, ConfigError> {
    value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingRequired {
            key: key.into(),
            hint: hint.into(),
        })
}

impl RawConfig {
    fn resolve(self) -> Result<Config, ConfigError> {
        let smtp = SmtpConfig {
            listen: required(
                self.smtp.listen,
                "smtp.listen",
                "Set the address to accept mail on, e.g. \"0.0.0.0:2525\".",
            )?,
            name: required(
                self.smtp.name,
                "smtp.name",
                "Set the hostname the SMTP server announces.",
            )?,
            max_message_size: self.smtp.max_message_size.unwrap_or(DEFAULT_MAX_MESSAGE_SIZE),
        };

        let bot = BotConfig {
            token: SecretString::from(required(
                self.bot.token,
                "bot.token",
                &format!("Set it in the file or via {BOT_TOKEN_ENV}."),
            )?),
            api_url: self
                .bot
                .api_url
                .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
        };

        let routes = resolve_routes(self.receivers)?;

        let defaults = QueueConfig::default();
        let queue = QueueConfig {
            capacity: self.queue.capacity.unwrap_or(defaults.capacity),
            interval: self
                .queue
                .interval_ms
                .map(Duration::from_millis)
                .unwrap_or(defaults.interval),
        };

        let fallback = match self.fallback {
            Some(raw) => resolve_fallback(raw)?,
            None => None,
        };

        Ok(Config {
            smtp,
            bot,
            routes,
            queue,
            fallback,
            logging: self.logging,
        })
    }
}

fn resolve_routes(receivers: HashMap<String, Scalar>) -> Result<RoutingTable, ConfigError> {
    let routes = receivers
        .into_iter()
        .map(|(address, id)| match id.to_i64() {
            Some(id) => Ok((address, ChatId(id))),
            None => Err(ConfigError::InvalidValue {
                key: format!("receivers.\"{address}\""),
                message: format!("{id:?} is not a Telegram chat id (64-bit integer)"),
            }),
        })
        .collect::<Result<Vec<_>, _>>()?;

    RoutingTable::new(routes)
}

fn resolve_fallback(raw: RawFallback) -> Result<Option<FallbackConfig>, ConfigError> {
    let Some(host) = raw.host.filter(|h| !h.trim().is_empty()) else {
        return Ok(None);
    };

    let port = match raw.port {
        None => DEFAULT_RELAY_PORT,
        Some(port) => port
            .to_i64()
            .and_then(|p| u16::try_from(p).ok())
            .ok_or_else(|| ConfigError::InvalidValue {
                key: "fallback.port".into(),
                message: format!("{port:?} is not a TCP port"),
            })?,
    };

    Ok(Some(FallbackConfig {
        host,
        port,
        username: Some(raw.user).filter(|u| !u.is_empty()),
        password: SecretString::from(raw.password),
    }))
}
