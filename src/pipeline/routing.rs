//! Sender-based routing table.
//!
//! Maps an envelope sender to the chat that should receive its mail. The
//! `*` entry is mandatory and catches every sender without its own route.

use std::collections::{BTreeSet, HashMap};

use tracing::debug;

use crate::error::ConfigError;
use crate::pipeline::types::ChatId;

/// Route key that matches any sender.
pub const WILDCARD: &str = "*";

/// Trim surrounding whitespace and angle brackets from an envelope address.
pub fn normalize_address(address: &str) -> &str {
    address.trim_matches(|c: char| c.is_whitespace() || c == '<' || c == '>')
}

/// Read-only sender → destination mapping, built once at startup.
#[derive(Debug, Clone)]
pub struct RoutingTable {
    routes: HashMap<String, ChatId>,
    wildcard: ChatId,
}

impl RoutingTable {
    /// Build a table from `(address, chat)` pairs.
    ///
    /// Keys are stored lowercased. Fails when no `*` route is present or
    /// two keys collide after lowercasing.
    pub fn new<I, S>(routes: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (S, ChatId)>,
        S: AsRef<str>,
    {
        let mut table: HashMap<String, ChatId> = HashMap::new();
        for (address, chat) in routes {
            let key = normalize_address(address.as_ref()).to_ascii_lowercase();
            if table.insert(key.clone(), chat).is_some() {
                return Err(ConfigError::InvalidValue {
                    key: format!("receivers.\"{}\"", address.as_ref()),
                    message: format!("duplicates the route for {key:?} (keys are case-insensitive)"),
                });
            }
        }

        let wildcard = *table
            .get(WILDCARD)
            .ok_or_else(|| ConfigError::MissingRequired {
                key: "receivers.\"*\"".into(),
                hint: "Add a wildcard receiver that catches every unrouted sender.".into(),
            })?;

        Ok(Self {
            routes: table,
            wildcard,
        })
    }

    /// Destination for a sender; unknown senders go to the wildcard chat.
    ///
    /// The sender is only trimmed, never case-folded, so a mixed-case
    /// sender misses a lowercased key and falls through to `*`.
    pub fn resolve(&self, sender: &str) -> ChatId {
        match self.routes.get(normalize_address(sender)) {
            Some(chat) => *chat,
            None => {
                debug!(sender = %sender, wildcard = %self.wildcard, "No route for sender, using wildcard");
                self.wildcard
            }
        }
    }

    /// The wildcard destination.
    pub fn wildcard(&self) -> ChatId {
        self.wildcard
    }

    /// Every distinct destination reachable from this table, ascending.
    pub fn destinations(&self) -> BTreeSet<ChatId> {
        self.routes.values().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.routes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
