// Transaction state machine (spec.md §2.C).

use serde::{Deserialize, Serialize};

use crate::common::{AdapterId, TransactionId};
use crate::error::AbortReason;

/// Lifecycle state of a coordinator-managed transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TransactionState {
    Active,
    Preparing,
    Prepared,
    Committing,
    Committed,
    RollingBack,
    RolledBack,
    /// A participant failed to acknowledge COMMIT/ROLLBACK after
    /// `max_finalize_attempts`; the decision is durable but the
    /// participant set has drifted and needs operator attention
    /// (spec.md's "participant drift" non-silent-failure requirement).
    Drifted,
}

impl TransactionState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack | TransactionState::Drifted
        )
    }
}

/// Durable decision record written once, before any finalize message
/// goes out. Its existence after a crash is what lets recovery resume
/// the finalize phase instead of re-running prepare.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub transaction: TransactionId,
    pub outcome: DecisionOutcome,
    pub participants: Vec<AdapterId>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DecisionOutcome {
    Commit,
    Rollback,
}

/// Point-in-time status snapshot returned by `TransactionCoordinator::status`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionStatus {
    pub transaction: TransactionId,
    pub state: TransactionState,
    pub participants: Vec<AdapterId>,
    pub abort_reason: Option<AbortReason>,
}
