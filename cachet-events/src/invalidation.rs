//! Cross-node invalidation messages.

use cachet_core::{NodeId, Timestamp};
use chrono::Utc;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// What an invalidation covers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum InvalidationScope<K> {
    Key(K),
    Tag(String),
    All,
}

/// Why the publisher invalidated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    /// The key was overwritten on the publishing node.
    Updated,
    /// The key was explicitly invalidated.
    Removed,
    /// A tag ban.
    Ban,
    /// The whole cache was cleared.
    Cleared,
}

impl fmt::Display for InvalidationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Updated => "updated",
            Self::Removed => "removed",
            Self::Ban => "ban",
            Self::Cleared => "cleared",
        };
        f.write_str(s)
    }
}

/// Payload published on the invalidation channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvalidationMessage<K> {
    pub message_id: Uuid,
    /// Publishing node. Receivers drop their own messages.
    pub origin: NodeId,
    pub scope: InvalidationScope<K>,
    pub reason: InvalidationReason,
    pub issued_at: Timestamp,
}

impl<K> InvalidationMessage<K> {
    pub fn new(origin: NodeId, scope: InvalidationScope<K>, reason: InvalidationReason) -> Self {
        Self {
            message_id: Uuid::now_v7(),
            origin,
            scope,
            reason,
            issued_at: Utc::now(),
        }
    }

    pub fn key(origin: NodeId, key: K, reason: InvalidationReason) -> Self {
        Self::new(origin, InvalidationScope::Key(key), reason)
    }

    pub fn tag(origin: NodeId, tag: impl Into<String>) -> Self {
        Self::new(origin, InvalidationScope::Tag(tag.into()), InvalidationReason::Ban)
    }

    pub fn all(origin: NodeId) -> Self {
        Self::new(origin, InvalidationScope::All, InvalidationReason::Cleared)
    }

    pub fn is_from(&self, node: NodeId) -> bool {
        self.origin == node
    }
}

impl<K: Serialize> InvalidationMessage<K> {
    /// Encode for the wire.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl<K: DeserializeOwned> InvalidationMessage<K> {
    /// Decode from the wire.
    pub fn from_json(payload: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(payload)
    }
}
