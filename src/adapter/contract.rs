// Transactional Storage Adapter contract (spec.md §2.A/§2.B).
//
// Every backend confluxdb talks to implements this trait. It mirrors
// the shape of the teacher's `transaction::traits` lifecycle traits
// (`TransactionLifecycle`, `Recovery`) but collapses them into a single
// async trait, since every real adapter implementation in this crate
// is I/O-bound (file, network, or embedded engine).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::common::{AdapterId, TransactionId};
use crate::error::Result;

/// Capability flags an adapter advertises at registration time.
/// `CrossAdapterCoordinator` and `TransactionCoordinator` consult these
/// before routing an operation; a missing capability surfaces as
/// `Error::CapabilityMissing` rather than a runtime panic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Capabilities {
    pub read: bool,
    pub write: bool,
    pub realtime: bool,
    pub transactions: bool,
    pub batch: bool,
}

impl Capabilities {
    pub const fn full() -> Self {
        Self {
            read: true,
            write: true,
            realtime: true,
            transactions: true,
            batch: true,
        }
    }

    pub const fn read_write() -> Self {
        Self {
            read: true,
            write: true,
            realtime: false,
            transactions: true,
            batch: false,
        }
    }
}

/// Adapter lifecycle state (spec.md §2.A).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AdapterState {
    Uninitialized,
    Initializing,
    Running,
    Stopping,
    Stopped,
    Failed,
}

/// A query against a single collection. Intentionally opaque: the
/// adapter contract does not prescribe a query language, matching
/// spec.md's explicit non-goal of a unified query planner.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Query {
    pub collection: String,
    pub filter: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub key: String,
    pub value: serde_json::Value,
}

/// A single staged write, recorded against a transaction before
/// `prepare_commit` is called.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum StagedOp {
    Insert { collection: String, document: Document },
    Update { collection: String, key: String, value: serde_json::Value },
    Delete { collection: String, key: String },
}

/// The contract every storage backend must implement to participate
/// both in standalone reads/writes and in cross-adapter 2PC
/// transactions.
#[async_trait]
pub trait TransactionalStorageAdapter: Send + Sync {
    fn id(&self) -> &AdapterId;

    fn capabilities(&self) -> Capabilities;

    // -- lifecycle --
    async fn initialize(&self) -> Result<()>;
    async fn start(&self) -> Result<()>;
    async fn stop(&self) -> Result<()>;
    async fn restart(&self) -> Result<()> {
        self.stop().await?;
        self.start().await
    }
    async fn health_check(&self) -> crate::common::HealthStatus;
    async fn ping(&self) -> Result<()>;
    fn state(&self) -> AdapterState;

    // -- direct (non-transactional) access --
    async fn query(&self, query: &Query) -> Result<Vec<Document>>;
    async fn insert(&self, collection: &str, document: Document) -> Result<()>;
    async fn update(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<()>;
    async fn delete(&self, collection: &str, key: &str) -> Result<()>;
    async fn batch(&self, ops: Vec<StagedOp>) -> Result<()> {
        for op in ops {
            self.apply_staged(op).await?;
        }
        Ok(())
    }

    // -- 2PC participant surface --

    /// Stage an operation under `transaction`. Adapters buffer staged
    /// writes in memory (or a temp area) until `prepare_commit` is
    /// called; nothing is visible to direct reads before that.
    async fn stage(&self, transaction: TransactionId, op: StagedOp) -> Result<()>;

    /// Vote on whether the staged operations for `transaction` can be
    /// committed. Returning `Ok(true)` is a durable promise: once an
    /// adapter votes yes, it must honor a subsequent `finalize_commit`
    /// even across a restart. The WAL is exclusively owned by the
    /// node-local `WalEngine` (spec.md §3), so the adapter itself never
    /// writes to it — `TransactionCoordinator` durably records this
    /// vote as a PREPARE entry tagged with this adapter's id
    /// immediately after the call returns.
    async fn prepare_commit(&self, transaction: TransactionId) -> Result<bool>;

    /// Durably apply the staged operations. Must be idempotent: the
    /// coordinator retries this call on timeout without being able to
    /// distinguish "never received" from "applied but ack lost". On
    /// success the coordinator writes a COMMIT entry tagged with this
    /// adapter's id to the shared WAL.
    async fn finalize_commit(&self, transaction: TransactionId) -> Result<()>;

    /// Discard staged operations for `transaction` (either because
    /// `prepare_commit` returned false or a peer participant vetoed).
    /// Must also be idempotent. The coordinator writes a ROLLBACK entry
    /// tagged with this adapter's id to the shared WAL right after.
    async fn rollback(&self, transaction: TransactionId) -> Result<()>;

    async fn apply_staged(&self, op: StagedOp) -> Result<()> {
        match op {
            StagedOp::Insert { collection, document } => self.insert(&collection, document).await,
            StagedOp::Update { collection, key, value } => self.update(&collection, &key, value).await,
            StagedOp::Delete { collection, key } => self.delete(&collection, &key).await,
        }
    }
}
