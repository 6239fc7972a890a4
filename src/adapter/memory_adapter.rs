// In-memory reference adapter (spec.md §2.A, example backend).
//
// Staged writes per transaction live in a side map; `finalize_commit`
// applies them against a copy-on-write snapshot of the collection map
// so concurrent readers never observe a half-applied transaction.

use async_trait::async_trait;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use crate::adapter::contract::{
    AdapterState, Capabilities, Document, Query, StagedOp, TransactionalStorageAdapter,
};
use crate::common::{AdapterId, HealthStatus, TransactionId};
use crate::error::{Error, Result};

type Collection = HashMap<String, serde_json::Value>;

fn state_from_u8(v: u8) -> AdapterState {
    match v {
        0 => AdapterState::Uninitialized,
        1 => AdapterState::Initializing,
        2 => AdapterState::Running,
        3 => AdapterState::Stopping,
        4 => AdapterState::Stopped,
        _ => AdapterState::Failed,
    }
}

/// In-memory storage adapter. Useful as the reference implementation
/// for tests and as the non-durable participant in cross-adapter
/// scenarios.
pub struct MemoryAdapter {
    id: AdapterId,
    data: Arc<RwLock<HashMap<String, Collection>>>,
    staged: DashMap<TransactionId, Vec<StagedOp>>,
    prepared: DashMap<TransactionId, bool>,
    state: AtomicU8,
}

impl MemoryAdapter {
    pub fn new(id: impl Into<AdapterId>) -> Self {
        Self {
            id: id.into(),
            data: Arc::new(RwLock::new(HashMap::new())),
            staged: DashMap::new(),
            prepared: DashMap::new(),
            state: AtomicU8::new(0),
        }
    }

    fn set_state(&self, s: AdapterState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    fn apply_op_locked(data: &mut HashMap<String, Collection>, op: &StagedOp) {
        match op {
            StagedOp::Insert { collection, document } => {
                data.entry(collection.clone())
                    .or_default()
                    .insert(document.key.clone(), document.value.clone());
            }
            StagedOp::Update { collection, key, value } => {
                data.entry(collection.clone())
                    .or_default()
                    .insert(key.clone(), value.clone());
            }
            StagedOp::Delete { collection, key } => {
                if let Some(c) = data.get_mut(collection) {
                    c.remove(key);
                }
            }
        }
    }
}

#[async_trait]
impl TransactionalStorageAdapter for MemoryAdapter {
    fn id(&self) -> &AdapterId {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::full()
    }

    async fn initialize(&self) -> Result<()> {
        self.set_state(AdapterState::Initializing);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        self.set_state(AdapterState::Running);
        Ok(())
    }

    async fn stop(&self) -> Result<()> {
        self.set_state(AdapterState::Stopped);
        Ok(())
    }

    async fn health_check(&self) -> HealthStatus {
        match state_from_u8(self.state.load(Ordering::SeqCst)) {
            AdapterState::Running => HealthStatus::Healthy,
            AdapterState::Initializing | AdapterState::Stopping => HealthStatus::Degraded,
            AdapterState::Failed => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    async fn ping(&self) -> Result<()> {
        if state_from_u8(self.state.load(Ordering::SeqCst)) == AdapterState::Running {
            Ok(())
        } else {
            Err(Error::InvalidAdapterState {
                adapter: self.id.clone(),
                state: "not running",
                action: "ping",
            })
        }
    }

    fn state(&self) -> AdapterState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let data = self.data.read();
        let docs = data
            .get(&query.collection)
            .map(|c| {
                c.iter()
                    .map(|(k, v)| Document {
                        key: k.clone(),
                        value: v.clone(),
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(docs)
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<()> {
        let mut data = self.data.write();
        data.entry(collection.to_string())
            .or_default()
            .insert(document.key, document.value);
        Ok(())
    }

    async fn update(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let mut data = self.data.write();
        data.entry(collection.to_string())
            .or_default()
            .insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let mut data = self.data.write();
        if let Some(c) = data.get_mut(collection) {
            c.remove(key);
        }
        Ok(())
    }

    async fn stage(&self, transaction: TransactionId, op: StagedOp) -> Result<()> {
        self.staged.entry(transaction).or_default().push(op);
        Ok(())
    }

    async fn prepare_commit(&self, transaction: TransactionId) -> Result<bool> {
        let vote = self.staged.contains_key(&transaction);
        self.prepared.insert(transaction, vote);
        Ok(vote)
    }

    async fn finalize_commit(&self, transaction: TransactionId) -> Result<()> {
        // Idempotent: a transaction with nothing staged (already
        // finalized and drained) is a no-op success, not an error.
        let ops = match self.staged.remove(&transaction) {
            Some((_, ops)) => ops,
            None => return Ok(()),
        };
        let mut data = self.data.write();
        for op in &ops {
            Self::apply_op_locked(&mut data, op);
        }
        self.prepared.remove(&transaction);
        Ok(())
    }

    async fn rollback(&self, transaction: TransactionId) -> Result<()> {
        self.staged.remove(&transaction);
        self.prepared.remove(&transaction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn stage_prepare_finalize_applies_once() {
        let adapter = MemoryAdapter::new("mem-1");
        adapter.initialize().await.unwrap();
        adapter.start().await.unwrap();

        adapter
            .stage(
                1,
                StagedOp::Insert {
                    collection: "widgets".into(),
                    document: Document {
                        key: "a".into(),
                        value: serde_json::json!({"n": 1}),
                    },
                },
            )
            .await
            .unwrap();

        assert!(adapter.prepare_commit(1).await.unwrap());
        adapter.finalize_commit(1).await.unwrap();
        // Idempotent re-invocation after the staged set was drained.
        adapter.finalize_commit(1).await.unwrap();

        let docs = adapter
            .query(&Query {
                collection: "widgets".into(),
                filter: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
    }

    #[tokio::test]
    async fn rollback_discards_staged_ops() {
        let adapter = MemoryAdapter::new("mem-1");
        adapter.initialize().await.unwrap();
        adapter.start().await.unwrap();

        adapter
            .stage(
                2,
                StagedOp::Insert {
                    collection: "widgets".into(),
                    document: Document {
                        key: "b".into(),
                        value: serde_json::json!({"n": 2}),
                    },
                },
            )
            .await
            .unwrap();
        adapter.rollback(2).await.unwrap();
        adapter.finalize_commit(2).await.unwrap();

        let docs = adapter
            .query(&Query {
                collection: "widgets".into(),
                filter: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert!(docs.is_empty());
    }
}
