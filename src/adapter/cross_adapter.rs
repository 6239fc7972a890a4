// Cross-adapter fan-out (SPEC_FULL.md Section E: executeQueryOn /
// executeCrossAdapterInsert). Routes a single logical operation across
// several adapters outside of a 2PC transaction, for reads that fan
// out for coverage and writes that must land on more than one backend
// as a best-effort mirror (not atomically, unlike `TransactionCoordinator`).

use futures::stream::{self, StreamExt};

use crate::adapter::contract::{Document, Query, TransactionalStorageAdapter};
use crate::adapter::registry::AdapterRegistry;
use crate::common::AdapterId;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FanoutMode {
    Sequential,
    Parallel,
}

/// Concurrency cap for `FanoutMode::Parallel`. These calls are
/// I/O-bound (network/disk adapters), so a small multiple of the core
/// count keeps a fan-out over a large adapter set from opening an
/// unbounded number of simultaneous requests.
fn parallel_concurrency() -> usize {
    num_cpus::get().saturating_mul(4).max(4)
}

pub struct CrossAdapterCoordinator<'a> {
    registry: &'a AdapterRegistry,
}

impl<'a> CrossAdapterCoordinator<'a> {
    pub fn new(registry: &'a AdapterRegistry) -> Self {
        Self { registry }
    }

    /// Run `query` against every adapter in `targets`, collecting
    /// per-adapter results. An adapter without read capability yields
    /// `Err(CapabilityMissing)` in its slot rather than aborting the
    /// whole fan-out.
    pub async fn execute_query_on(
        &self,
        targets: &[AdapterId],
        query: Query,
        mode: FanoutMode,
    ) -> Vec<(AdapterId, Result<Vec<Document>>)> {
        let adapters: Vec<_> = targets
            .iter()
            .map(|id| (id.clone(), self.registry.get(id)))
            .collect();

        let run_one = |id: AdapterId, adapter: Result<std::sync::Arc<dyn TransactionalStorageAdapter>>, query: Query| async move {
            let result = match adapter {
                Ok(adapter) if adapter.capabilities().read => adapter.query(&query).await,
                Ok(adapter) => Err(Error::CapabilityMissing {
                    adapter: adapter.id().clone(),
                    capability: "read",
                }),
                Err(e) => Err(e),
            };
            (id, result)
        };

        match mode {
            FanoutMode::Sequential => {
                let mut out = Vec::with_capacity(adapters.len());
                for (id, adapter) in adapters {
                    out.push(run_one(id, adapter, query.clone()).await);
                }
                out
            }
            FanoutMode::Parallel => {
                stream::iter(adapters.into_iter().map(|(id, adapter)| run_one(id, adapter, query.clone())))
                    .buffer_unordered(parallel_concurrency())
                    .collect()
                    .await
            }
        }
    }

    /// Insert `document` into `collection` on every target adapter.
    /// Best-effort mirror, not atomic: use `TransactionCoordinator` when
    /// all-or-nothing semantics are required across adapters.
    pub async fn execute_cross_adapter_insert(
        &self,
        targets: &[AdapterId],
        collection: &str,
        document: Document,
        mode: FanoutMode,
    ) -> Vec<(AdapterId, Result<()>)> {
        let adapters: Vec<_> = targets
            .iter()
            .map(|id| (id.clone(), self.registry.get(id)))
            .collect();

        let run_one = |id: AdapterId,
                        adapter: Result<std::sync::Arc<dyn TransactionalStorageAdapter>>,
                        collection: String,
                        document: Document| async move {
            let result = match adapter {
                Ok(adapter) if adapter.capabilities().write => {
                    adapter.insert(&collection, document).await
                }
                Ok(adapter) => Err(Error::CapabilityMissing {
                    adapter: adapter.id().clone(),
                    capability: "write",
                }),
                Err(e) => Err(e),
            };
            (id, result)
        };

        match mode {
            FanoutMode::Sequential => {
                let mut out = Vec::with_capacity(adapters.len());
                for (id, adapter) in adapters {
                    out.push(run_one(id, adapter, collection.to_string(), document.clone()).await);
                }
                out
            }
            FanoutMode::Parallel => {
                stream::iter(
                    adapters
                        .into_iter()
                        .map(|(id, adapter)| run_one(id, adapter, collection.to_string(), document.clone())),
                )
                .buffer_unordered(parallel_concurrency())
                .collect()
                .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory_adapter::MemoryAdapter;
    use std::sync::Arc;

    #[tokio::test]
    async fn parallel_insert_lands_on_every_target() {
        let registry = AdapterRegistry::new();
        registry.register(Arc::new(MemoryAdapter::new("a"))).unwrap();
        registry.register(Arc::new(MemoryAdapter::new("b"))).unwrap();
        registry.start_all().await.unwrap();

        let coordinator = CrossAdapterCoordinator::new(&registry);
        let targets = vec![AdapterId::new("a"), AdapterId::new("b")];
        let results = coordinator
            .execute_cross_adapter_insert(
                &targets,
                "widgets",
                Document {
                    key: "k1".into(),
                    value: serde_json::json!({"n": 1}),
                },
                FanoutMode::Parallel,
            )
            .await;

        assert_eq!(results.len(), 2);
        for (_, r) in results {
            assert!(r.is_ok());
        }
    }
}
