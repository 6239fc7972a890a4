// Change-stream data model (spec.md §5.A), grounded on the teacher's
// `document_store::changes::{ChangeEvent, ResumeToken}` shape but
// trimmed to the fields this crate's subscription layer actually needs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChangeOperation {
    Insert,
    Update,
    Delete,
}

/// Opaque, serializable position in a collection's change history.
/// Two components (a monotonic counter plus a uniquifier) so tokens
/// never collide across adapters that share a clock tick.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub position: u64,
    pub uniquifier: String,
}

impl ResumeToken {
    pub fn new(position: u64) -> Self {
        Self {
            position,
            uniquifier: uuid::Uuid::new_v4().to_string(),
        }
    }

    pub fn encode(&self) -> String {
        format!("{}:{}", self.position, self.uniquifier)
    }

    pub fn decode(s: &str) -> crate::error::Result<Self> {
        let (position, uniquifier) = s
            .split_once(':')
            .ok_or_else(|| crate::error::Error::InvalidInput("malformed resume token".to_string()))?;
        let position = position
            .parse()
            .map_err(|_| crate::error::Error::InvalidInput("malformed resume token position".to_string()))?;
        Ok(Self {
            position,
            uniquifier: uniquifier.to_string(),
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub id: String,
    pub collection: String,
    pub operation: ChangeOperation,
    pub key: String,
    pub value: Option<serde_json::Value>,
    pub timestamp_micros: u64,
    pub resume_token: ResumeToken,
}

impl ChangeEvent {
    pub fn new(
        collection: impl Into<String>,
        operation: ChangeOperation,
        key: impl Into<String>,
        value: Option<serde_json::Value>,
        position: u64,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection: collection.into(),
            operation,
            key: key.into(),
            value,
            timestamp_micros: crate::wal::record::now_micros(),
            resume_token: ResumeToken::new(position),
        }
    }
}

/// Lifecycle state of a subscription (spec.md §5.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SubscriptionState {
    Active,
    Paused,
    Error,
    Closed,
}

#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: String,
    pub collection: String,
    pub state: SubscriptionState,
    pub error_count: u32,
    /// Position of the most recent event delivered to this subscription,
    /// used by the manager to drop already-seen events on redelivery
    /// (e.g. after a restart that replays from an earlier position).
    pub resume_token: Option<ResumeToken>,
}

impl Subscription {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            collection: collection.into(),
            state: SubscriptionState::Active,
            error_count: 0,
            resume_token: None,
        }
    }
}
