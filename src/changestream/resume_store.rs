// Resume token persistence (spec.md §5.A, SPEC_FULL.md Section E).
//
// Pluggable backing store for `(subscription_id -> ResumeToken)` so a
// subscriber can restart and pick up where it left off. Three modes
// per `ResumeTokenStore`: in-memory (test/ephemeral), a local file
// (one JSON blob per node), or an external document-store adapter
// (the resume tokens live alongside the data they describe).

use async_trait::async_trait;
use dashmap::DashMap;
use std::path::PathBuf;
use std::sync::Arc;

use crate::adapter::contract::{Document, TransactionalStorageAdapter};
use crate::changestream::types::ResumeToken;
use crate::error::{Error, Result};

#[async_trait]
pub trait ResumeTokenStore: Send + Sync {
    async fn save(&self, subscription_id: &str, token: ResumeToken) -> Result<()>;
    async fn get(&self, subscription_id: &str) -> Result<Option<ResumeToken>>;
    async fn clear(&self, subscription_id: &str) -> Result<()>;
}

#[derive(Default)]
pub struct MemoryResumeTokenStore {
    tokens: DashMap<String, ResumeToken>,
}

impl MemoryResumeTokenStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ResumeTokenStore for MemoryResumeTokenStore {
    async fn save(&self, subscription_id: &str, token: ResumeToken) -> Result<()> {
        self.tokens.insert(subscription_id.to_string(), token);
        Ok(())
    }

    async fn get(&self, subscription_id: &str) -> Result<Option<ResumeToken>> {
        Ok(self.tokens.get(subscription_id).map(|e| e.value().clone()))
    }

    async fn clear(&self, subscription_id: &str) -> Result<()> {
        self.tokens.remove(subscription_id);
        Ok(())
    }
}

/// One JSON file per subscription under `root`, written atomically via
/// write-temp + rename (same durability shape as `FileAdapter`).
pub struct FileResumeTokenStore {
    root: PathBuf,
}

impl FileResumeTokenStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path(&self, subscription_id: &str) -> PathBuf {
        self.root.join(format!("{subscription_id}.token.json"))
    }
}

#[async_trait]
impl ResumeTokenStore for FileResumeTokenStore {
    async fn save(&self, subscription_id: &str, token: ResumeToken) -> Result<()> {
        std::fs::create_dir_all(&self.root)?;
        let path = self.path(subscription_id);
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec(&token).map_err(Error::from)?;
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &path)?;
        Ok(())
    }

    async fn get(&self, subscription_id: &str) -> Result<Option<ResumeToken>> {
        let path = self.path(subscription_id);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = std::fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes).map_err(Error::from)?))
    }

    async fn clear(&self, subscription_id: &str) -> Result<()> {
        let path = self.path(subscription_id);
        if path.exists() {
            std::fs::remove_file(path)?;
        }
        Ok(())
    }
}

/// Stores resume tokens as documents in the `__resume_tokens` system
/// collection of an arbitrary adapter, so a cluster that already
/// replicates its adapters gets resume-token durability for free.
pub struct AdapterResumeTokenStore {
    adapter: Arc<dyn TransactionalStorageAdapter>,
    collection: String,
}

impl AdapterResumeTokenStore {
    pub fn new(adapter: Arc<dyn TransactionalStorageAdapter>) -> Self {
        Self {
            adapter,
            collection: "__resume_tokens".to_string(),
        }
    }
}

#[async_trait]
impl ResumeTokenStore for AdapterResumeTokenStore {
    async fn save(&self, subscription_id: &str, token: ResumeToken) -> Result<()> {
        self.adapter
            .insert(
                &self.collection,
                Document {
                    key: subscription_id.to_string(),
                    value: serde_json::to_value(&token).map_err(Error::from)?,
                },
            )
            .await
    }

    async fn get(&self, subscription_id: &str) -> Result<Option<ResumeToken>> {
        let docs = self
            .adapter
            .query(&crate::adapter::contract::Query {
                collection: self.collection.clone(),
                filter: serde_json::json!({}),
            })
            .await?;
        for doc in docs {
            if doc.key == subscription_id {
                return Ok(Some(serde_json::from_value(doc.value).map_err(Error::from)?));
            }
        }
        Ok(None)
    }

    async fn clear(&self, subscription_id: &str) -> Result<()> {
        self.adapter.delete(&self.collection, subscription_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn file_store_round_trips_across_instances() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileResumeTokenStore::new(dir.path());
        store.save("sub-1", ResumeToken::new(42)).await.unwrap();

        let reopened = FileResumeTokenStore::new(dir.path());
        let token = reopened.get("sub-1").await.unwrap().unwrap();
        assert_eq!(token.position, 42);
    }
}
