// File-backed reference adapter (spec.md §2.A, example backend).
//
// Each collection is one JSON file under the adapter's root directory.
// Staged writes accumulate in memory; `finalize_commit` applies them to
// an in-memory copy of the affected collections and durably replaces
// the file via write-to-temp + rename, so a crash mid-finalize leaves
// the previous durable file intact rather than a half-written one.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};

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

pub struct FileAdapter {
    id: AdapterId,
    root: PathBuf,
    staged: DashMap<TransactionId, Vec<StagedOp>>,
    state: AtomicU8,
}

impl FileAdapter {
    pub fn new(id: impl Into<AdapterId>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            staged: DashMap::new(),
            state: AtomicU8::new(0),
        }
    }

    fn collection_path(&self, collection: &str) -> PathBuf {
        self.root.join(format!("{collection}.json"))
    }

    fn load_collection(&self, collection: &str) -> Result<Collection> {
        let path = self.collection_path(collection);
        if !path.exists() {
            return Ok(Collection::new());
        }
        let bytes = std::fs::read(&path)?;
        serde_json::from_slice(&bytes).map_err(Error::from)
    }

    fn store_collection(&self, collection: &str, data: &Collection) -> Result<()> {
        let path = self.collection_path(collection);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(data).map_err(Error::from)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    fn set_state(&self, s: AdapterState) {
        self.state.store(s as u8, Ordering::SeqCst);
    }

    fn apply_ops(&self, ops: &[StagedOp]) -> Result<()> {
        let mut touched: HashMap<String, Collection> = HashMap::new();
        for op in ops {
            let collection = match op {
                StagedOp::Insert { collection, .. } => collection,
                StagedOp::Update { collection, .. } => collection,
                StagedOp::Delete { collection, .. } => collection,
            };
            if !touched.contains_key(collection) {
                touched.insert(collection.clone(), self.load_collection(collection)?);
            }
            let data = touched.get_mut(collection).unwrap();
            match op {
                StagedOp::Insert { document, .. } => {
                    data.insert(document.key.clone(), document.value.clone());
                }
                StagedOp::Update { key, value, .. } => {
                    data.insert(key.clone(), value.clone());
                }
                StagedOp::Delete { key, .. } => {
                    data.remove(key);
                }
            }
        }
        for (collection, data) in &touched {
            self.store_collection(collection, data)?;
        }
        Ok(())
    }
}

#[async_trait]
impl TransactionalStorageAdapter for FileAdapter {
    fn id(&self) -> &AdapterId {
        &self.id
    }

    fn capabilities(&self) -> Capabilities {
        Capabilities::read_write()
    }

    async fn initialize(&self) -> Result<()> {
        self.set_state(AdapterState::Initializing);
        std::fs::create_dir_all(&self.root)?;
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
            AdapterState::Running if self.root.exists() => HealthStatus::Healthy,
            AdapterState::Running => HealthStatus::Degraded,
            AdapterState::Failed => HealthStatus::Unhealthy,
            _ => HealthStatus::Unknown,
        }
    }

    async fn ping(&self) -> Result<()> {
        if self.root.exists() {
            Ok(())
        } else {
            Err(Error::InvalidAdapterState {
                adapter: self.id.clone(),
                state: "root missing",
                action: "ping",
            })
        }
    }

    fn state(&self) -> AdapterState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }

    async fn query(&self, query: &Query) -> Result<Vec<Document>> {
        let data = self.load_collection(&query.collection)?;
        Ok(data
            .into_iter()
            .map(|(key, value)| Document { key, value })
            .collect())
    }

    async fn insert(&self, collection: &str, document: Document) -> Result<()> {
        let mut data = self.load_collection(collection)?;
        data.insert(document.key, document.value);
        self.store_collection(collection, &data)
    }

    async fn update(&self, collection: &str, key: &str, value: serde_json::Value) -> Result<()> {
        let mut data = self.load_collection(collection)?;
        data.insert(key.to_string(), value);
        self.store_collection(collection, &data)
    }

    async fn delete(&self, collection: &str, key: &str) -> Result<()> {
        let mut data = self.load_collection(collection)?;
        data.remove(key);
        self.store_collection(collection, &data)
    }

    async fn stage(&self, transaction: TransactionId, op: StagedOp) -> Result<()> {
        self.staged.entry(transaction).or_default().push(op);
        Ok(())
    }

    async fn prepare_commit(&self, transaction: TransactionId) -> Result<bool> {
        Ok(self.staged.contains_key(&transaction))
    }

    async fn finalize_commit(&self, transaction: TransactionId) -> Result<()> {
        let ops = match self.staged.remove(&transaction) {
            Some((_, ops)) => ops,
            None => return Ok(()),
        };
        self.apply_ops(&ops)
    }

    async fn rollback(&self, transaction: TransactionId) -> Result<()> {
        self.staged.remove(&transaction);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn finalize_writes_durable_file_via_rename() {
        let dir = tempfile::tempdir().unwrap();
        let adapter = FileAdapter::new("file-1", dir.path());
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

        let docs = adapter
            .query(&Query {
                collection: "widgets".into(),
                filter: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert_eq!(docs.len(), 1);
        assert!(dir.path().join("widgets.json").exists());
        assert!(!dir.path().join("widgets.json.tmp").exists());
    }
}
