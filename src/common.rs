// Shared identifiers and lifecycle traits used across confluxdb's modules.
//
// Mirrors the role `common::Component` plays in the teacher codebase: a
// small set of cross-cutting types every module builds on, instead of
// each module inventing its own id types.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::Result;

/// Monotonically increasing WAL sequence number.
pub type SequenceNumber = u64;

/// Opaque transaction identifier. `0` is never issued by a coordinator
/// and is reserved for "no transaction" in code that needs a sentinel.
pub type TransactionId = u64;

/// Identifier for a node participating in replication.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct NodeId(pub String);

impl NodeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for NodeId {
    fn from(s: &str) -> Self {
        NodeId(s.to_string())
    }
}

impl From<String> for NodeId {
    fn from(s: String) -> Self {
        NodeId(s)
    }
}

/// Identifier for a registered storage adapter (one per backend instance).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct AdapterId(pub String);

impl AdapterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AdapterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for AdapterId {
    fn from(s: &str) -> Self {
        AdapterId(s.to_string())
    }
}

/// Health status reported by a lifecycle-managed component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// Base lifecycle trait implemented by every long-lived component:
/// adapters, the WAL engine, the peer network, the change-stream
/// manager. Generalizes the teacher's `common::Component` trait to an
/// async lifecycle, since every one of this crate's components suspends
/// on I/O during `initialize`/`shutdown`.
#[async_trait::async_trait]
pub trait Component: Send + Sync {
    async fn initialize(&self) -> Result<()>;
    async fn shutdown(&self) -> Result<()>;
    async fn health_check(&self) -> HealthStatus;
}

/// Sentinel collection name for system-wide WAL records (checkpoint,
/// truncation) per `spec.md` §3.
pub const SYSTEM_COLLECTION: &str = "*";
