// Polling Change Source (spec.md §5.B): synthesizes change events for
// adapters with no native feed by periodically snapshotting a
// collection and diffing document fingerprints against the previous
// snapshot.

use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::adapter::contract::{Query, TransactionalStorageAdapter};
use crate::changestream::manager::ChangeStreamManager;
use crate::changestream::types::{ChangeEvent, ChangeOperation};
use crate::config::PollingConfig;
use crate::error::Result;

fn fingerprint(value: &serde_json::Value) -> u64 {
    crc32fast::hash(value.to_string().as_bytes()) as u64
}

/// Polls `adapter`'s `collection` on an interval, diffing document
/// fingerprints against the previous poll to emit INSERT/UPDATE/DELETE
/// events into `manager`. `debounce` collapses bursts of rapid writes
/// into a single poll cycle rather than one event per write.
pub struct PollingChangeSource {
    adapter: Arc<dyn TransactionalStorageAdapter>,
    collection: String,
    config: PollingConfig,
    last_seen: DashMap<String, u64>,
    position: AtomicU64,
}

impl PollingChangeSource {
    pub fn new(adapter: Arc<dyn TransactionalStorageAdapter>, collection: impl Into<String>, config: PollingConfig) -> Self {
        Self {
            adapter,
            collection: collection.into(),
            config,
            last_seen: DashMap::new(),
            position: AtomicU64::new(0),
        }
    }

    /// Run one poll cycle: snapshot the collection, diff against the
    /// previous fingerprints, and emit the resulting change events.
    /// Returns the number of events emitted.
    pub async fn poll_once(&self, manager: &ChangeStreamManager) -> Result<usize> {
        let docs = self
            .adapter
            .query(&Query {
                collection: self.collection.clone(),
                filter: serde_json::json!({}),
            })
            .await?;

        let mut seen_keys = std::collections::HashSet::new();
        let mut emitted = 0;

        for doc in &docs {
            seen_keys.insert(doc.key.clone());
            let fp = fingerprint(&doc.value);
            let changed = match self.last_seen.get(&doc.key) {
                Some(prev) => *prev != fp,
                None => true,
            };
            if changed {
                let operation = if self.last_seen.contains_key(&doc.key) {
                    ChangeOperation::Update
                } else {
                    ChangeOperation::Insert
                };
                let position = self.position.fetch_add(1, Ordering::SeqCst);
                manager
                    .emit(ChangeEvent::new(
                        self.collection.clone(),
                        operation,
                        doc.key.clone(),
                        Some(doc.value.clone()),
                        position,
                    ))
                    .await;
                self.last_seen.insert(doc.key.clone(), fp);
                emitted += 1;
            }
        }

        let deleted: Vec<String> = self
            .last_seen
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| !seen_keys.contains(k))
            .collect();

        for key in deleted {
            let position = self.position.fetch_add(1, Ordering::SeqCst);
            manager
                .emit(ChangeEvent::new(
                    self.collection.clone(),
                    ChangeOperation::Delete,
                    key.clone(),
                    None,
                    position,
                ))
                .await;
            self.last_seen.remove(&key);
            emitted += 1;
        }

        Ok(emitted)
    }

    /// Spawn a background loop that polls on `config.interval_ms`,
    /// coalescing calls within `config.debounce_ms` of each other.
    pub fn spawn(self: Arc<Self>, manager: Arc<ChangeStreamManager>) -> tokio::task::JoinHandle<()> {
        let interval = Duration::from_millis(self.config.interval_ms);
        let debounce = Duration::from_millis(self.config.debounce_ms);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                tokio::time::sleep(debounce).await;
                if let Err(err) = self.poll_once(&manager).await {
                    tracing::warn!(collection = %self.collection, error = %err, "polling change source failed");
                }
            }
        })
    }
}
