// WAL record data model (spec.md §3).

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::common::{AdapterId, SequenceNumber, TransactionId, SYSTEM_COLLECTION};

/// Either a real transaction or the system sentinel (`"*"` in spec.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionRef {
    Transaction(TransactionId),
    System,
}

impl TransactionRef {
    pub fn id(&self) -> Option<TransactionId> {
        match self {
            TransactionRef::Transaction(id) => Some(*id),
            TransactionRef::System => None,
        }
    }
}

impl std::fmt::Display for TransactionRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionRef::Transaction(id) => write!(f, "{}", id),
            TransactionRef::System => write!(f, "*"),
        }
    }
}

/// WAL record type (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordType {
    Begin,
    Prepare,
    Commit,
    Rollback,
    Data,
    Checkpoint,
    Truncate,
}

impl RecordType {
    /// COMMIT/ROLLBACK/CHECKPOINT force an immediate flush (spec.md §4.A).
    pub fn forces_flush(&self) -> bool {
        matches!(
            self,
            RecordType::Commit | RecordType::Rollback | RecordType::Checkpoint
        )
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RecordType::Commit | RecordType::Rollback)
    }
}

/// Operation carried by a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationType {
    Insert,
    Update,
    Delete,
    Store,
    Begin,
    Prepare,
    Commit,
    Rollback,
}

/// A sequenced, checksummed WAL record. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalRecord {
    pub sequence_number: SequenceNumber,
    /// Microseconds since the Unix epoch.
    pub timestamp_micros: u64,
    pub transaction_id: TransactionRef,
    pub record_type: RecordType,
    pub collection_name: String,
    pub operation: OperationType,
    /// Which adapter this PREPARE/COMMIT/ROLLBACK record was written on
    /// behalf of. `None` for BEGIN, for system records, and for the
    /// coordinator's own aggregate decision record written once every
    /// participant has voted or been rolled back.
    pub participant: Option<AdapterId>,
    /// Opaque payload: key + old/new values for DATA ops, metadata for
    /// system records. Owned by higher-level adapters; the WAL never
    /// interprets it.
    pub data: Vec<u8>,
    pub checksum: u32,
}

/// Fields supplied by a caller of `WalEngine::write_entry`; sequence
/// number and checksum are assigned by the engine.
#[derive(Debug, Clone)]
pub struct PendingRecord {
    pub transaction_id: TransactionRef,
    pub record_type: RecordType,
    pub collection_name: String,
    pub operation: OperationType,
    pub participant: Option<AdapterId>,
    pub data: Vec<u8>,
}

impl PendingRecord {
    pub fn system(record_type: RecordType, operation: OperationType, data: Vec<u8>) -> Self {
        Self {
            transaction_id: TransactionRef::System,
            record_type,
            collection_name: SYSTEM_COLLECTION.to_string(),
            operation,
            participant: None,
            data,
        }
    }

    pub fn begin(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id: TransactionRef::Transaction(transaction_id),
            record_type: RecordType::Begin,
            collection_name: SYSTEM_COLLECTION.to_string(),
            operation: OperationType::Begin,
            participant: None,
            data: Vec::new(),
        }
    }

    /// The coordinator's own aggregate decision record, written once
    /// every participant has finalized. Carries no `participant`, since
    /// it speaks for the transaction as a whole rather than for one
    /// adapter.
    pub fn commit(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id: TransactionRef::Transaction(transaction_id),
            record_type: RecordType::Commit,
            collection_name: SYSTEM_COLLECTION.to_string(),
            operation: OperationType::Commit,
            participant: None,
            data: Vec::new(),
        }
    }

    /// The coordinator's own aggregate abort record, written once every
    /// participant has been rolled back (or was never reached).
    pub fn rollback(transaction_id: TransactionId) -> Self {
        Self {
            transaction_id: TransactionRef::Transaction(transaction_id),
            record_type: RecordType::Rollback,
            collection_name: SYSTEM_COLLECTION.to_string(),
            operation: OperationType::Rollback,
            participant: None,
            data: Vec::new(),
        }
    }

    /// A single adapter's PREPARE vote, written by the coordinator to
    /// the shared WAL on that adapter's behalf right after
    /// `prepare_commit` returns. `vote` is carried in the payload so a
    /// reader can tell a yes-vote PREPARE from a no-vote one without
    /// re-deriving it from whatever happens next in the log.
    pub fn prepare_for(transaction_id: TransactionId, adapter: AdapterId, vote: bool) -> Self {
        Self {
            transaction_id: TransactionRef::Transaction(transaction_id),
            record_type: RecordType::Prepare,
            collection_name: SYSTEM_COLLECTION.to_string(),
            operation: OperationType::Prepare,
            participant: Some(adapter),
            data: serde_json::to_vec(&serde_json::json!({ "vote": vote }))
                .expect("vote payload is always serializable"),
        }
    }

    /// A single adapter's durable COMMIT, written right after that
    /// adapter's `finalize_commit` succeeds.
    pub fn commit_for(transaction_id: TransactionId, adapter: AdapterId) -> Self {
        Self {
            transaction_id: TransactionRef::Transaction(transaction_id),
            record_type: RecordType::Commit,
            collection_name: SYSTEM_COLLECTION.to_string(),
            operation: OperationType::Commit,
            participant: Some(adapter),
            data: Vec::new(),
        }
    }

    /// A single adapter's durable ROLLBACK, written right after that
    /// adapter's `rollback` call completes.
    pub fn rollback_for(transaction_id: TransactionId, adapter: AdapterId) -> Self {
        Self {
            transaction_id: TransactionRef::Transaction(transaction_id),
            record_type: RecordType::Rollback,
            collection_name: SYSTEM_COLLECTION.to_string(),
            operation: OperationType::Rollback,
            participant: Some(adapter),
            data: Vec::new(),
        }
    }

    pub fn data(
        transaction_id: TransactionId,
        collection: impl Into<String>,
        operation: OperationType,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            transaction_id: TransactionRef::Transaction(transaction_id),
            record_type: RecordType::Data,
            collection_name: collection.into(),
            operation,
            participant: None,
            data: payload,
        }
    }
}

pub fn now_micros() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_micros() as u64)
        .unwrap_or(0)
}

/// Render a record's microsecond timestamp as an RFC 3339 string, for
/// tracing output and operator-facing recovery reports.
pub fn format_timestamp(timestamp_micros: u64) -> String {
    chrono::DateTime::<chrono::Utc>::from_timestamp_micros(timestamp_micros as i64)
        .map(|dt| dt.to_rfc3339())
        .unwrap_or_else(|| "invalid-timestamp".to_string())
}
