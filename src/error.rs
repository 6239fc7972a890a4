// Crate-wide error taxonomy.
//
// One variant family per error kind from spec.md §7. Variants carry
// structured fields (sequence numbers, transaction/participant ids)
// rather than opaque strings wherever the spec's testable properties
// need to inspect them (e.g. S6's CorruptedLog{sequence, transaction}).

use thiserror::Error;

use crate::common::{AdapterId, NodeId, SequenceNumber, TransactionId};

#[derive(Error, Debug, Clone)]
pub enum Error {
    // -- IO / durability --
    #[error("I/O error: {0}")]
    Io(String),

    #[error("shutdown in progress, rejecting write")]
    ShutdownInProgress,

    // -- Checksum / corruption --
    #[error("checksum mismatch at sequence {sequence}")]
    ChecksumMismatch { sequence: SequenceNumber },

    #[error("corrupted log at sequence {sequence} (transaction {transaction}): recovery halted")]
    CorruptedLog {
        sequence: SequenceNumber,
        transaction: TransactionId,
    },

    // -- Timeouts --
    #[error("prepare timed out for participant {adapter} on transaction {transaction}")]
    PrepareTimeout {
        transaction: TransactionId,
        adapter: AdapterId,
    },

    #[error("finalize timed out for participant {adapter} on transaction {transaction}")]
    FinalizeTimeout {
        transaction: TransactionId,
        adapter: AdapterId,
    },

    #[error("transaction {0} exceeded its global timeout")]
    GlobalTimeout(TransactionId),

    #[error("replication acknowledgement timed out for sequence {sequence}")]
    ReplicationTimeout { sequence: SequenceNumber },

    #[error("subscription {0} callback timed out")]
    SubscriptionTimeout(String),

    // -- Capability / contract violations --
    #[error("adapter {adapter} does not advertise capability {capability}")]
    CapabilityMissing {
        adapter: AdapterId,
        capability: &'static str,
    },

    // -- Transaction lifecycle --
    #[error("transaction {transaction} aborted: {reason}")]
    TransactionAborted {
        transaction: TransactionId,
        reason: AbortReason,
    },

    #[error("transaction {0} not found")]
    TransactionNotFound(TransactionId),

    #[error("transaction {transaction} is in state {state:?}, expected {expected:?}")]
    InvalidTransactionState {
        transaction: TransactionId,
        state: &'static str,
        expected: &'static str,
    },

    #[error(
        "participant drift on transaction {transaction}: {participants:?} failed to finalize after decision COMMIT"
    )]
    ParticipantDrift {
        transaction: TransactionId,
        participants: Vec<AdapterId>,
    },

    // -- Network / replication --
    #[error("peer {0} unreachable beyond failure threshold")]
    NetworkPartition(NodeId),

    #[error("peer {0} is not connected")]
    NotConnected(NodeId),

    #[error("protocol version mismatch with peer {peer}: local {local}, remote {remote}")]
    ProtocolVersionMismatch {
        peer: NodeId,
        local: u32,
        remote: u32,
    },

    #[error("replication error: {0}")]
    Replication(String),

    // -- Adapter / registry --
    #[error("adapter {0} not found")]
    AdapterNotFound(AdapterId),

    #[error("adapter {0} already registered")]
    AdapterAlreadyRegistered(AdapterId),

    #[error("adapter {adapter} is in state {state:?}, cannot {action}")]
    InvalidAdapterState {
        adapter: AdapterId,
        state: &'static str,
        action: &'static str,
    },

    #[error("unrecoverable commit failure on adapter {adapter} for transaction {transaction}: {message}")]
    UnrecoverableCommit {
        adapter: AdapterId,
        transaction: TransactionId,
        message: String,
    },

    // -- Generic --
    #[error("not found: {0}")]
    NotFound(String),

    #[error("already exists: {0}")]
    AlreadyExists(String),

    #[error("invalid input: {0}")]
    InvalidInput(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("not implemented: {0}")]
    NotImplemented(String),

    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a 2PC transaction was aborted. Kept as a structured enum rather
/// than a string so callers (and tests, e.g. S2) can match on it.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AbortReason {
    #[error("participant {participant} rejected prepare")]
    PrepareRejected { participant: AdapterId },

    #[error("participant {participant} timed out during prepare")]
    PrepareTimedOut { participant: AdapterId },

    #[error("coordinator decision record failed to write durably")]
    DecisionWriteFailed,

    #[error("global transaction timeout elapsed")]
    GlobalTimeoutElapsed,

    #[error("caller requested cancellation")]
    CallerCancelled,
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(e.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::error::EncodeError> for Error {
    fn from(e: bincode::error::EncodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}

impl From<bincode::error::DecodeError> for Error {
    fn from(e: bincode::error::DecodeError) -> Self {
        Error::Serialization(e.to_string())
    }
}
