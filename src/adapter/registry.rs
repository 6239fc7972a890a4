// Adapter Registry (spec.md §2.A supplemented: lifecycle events,
// periodic health check with auto-restart).
//
// Owns every registered `TransactionalStorageAdapter`, fans out
// lifecycle operations, and runs a background health-check loop that
// restarts an adapter that reports `Unhealthy` repeatedly rather than
// failing every request routed to it.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::adapter::contract::TransactionalStorageAdapter;
use crate::common::{AdapterId, HealthStatus};
use crate::error::{Error, Result};

#[derive(Debug, Clone)]
pub enum LifecycleEvent {
    Registered(AdapterId),
    Unregistered(AdapterId),
    Started(AdapterId),
    Stopped(AdapterId),
    Restarted(AdapterId),
    HealthDegraded(AdapterId, HealthStatus),
}

pub struct AdapterRegistry {
    adapters: DashMap<AdapterId, Arc<dyn TransactionalStorageAdapter>>,
    events: broadcast::Sender<LifecycleEvent>,
    unhealthy_restart_threshold: u32,
    unhealthy_counts: DashMap<AdapterId, u32>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(256);
        Self {
            adapters: DashMap::new(),
            events,
            unhealthy_restart_threshold: 3,
            unhealthy_counts: DashMap::new(),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LifecycleEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: LifecycleEvent) {
        let _ = self.events.send(event);
    }

    pub fn register(&self, adapter: Arc<dyn TransactionalStorageAdapter>) -> Result<()> {
        let id = adapter.id().clone();
        if self.adapters.contains_key(&id) {
            return Err(Error::AdapterAlreadyRegistered(id));
        }
        self.adapters.insert(id.clone(), adapter);
        self.emit(LifecycleEvent::Registered(id));
        Ok(())
    }

    pub async fn unregister(&self, id: &AdapterId) -> Result<()> {
        let (_, adapter) = self
            .adapters
            .remove(id)
            .ok_or_else(|| Error::AdapterNotFound(id.clone()))?;
        adapter.stop().await?;
        self.emit(LifecycleEvent::Unregistered(id.clone()));
        Ok(())
    }

    pub fn get(&self, id: &AdapterId) -> Result<Arc<dyn TransactionalStorageAdapter>> {
        self.adapters
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| Error::AdapterNotFound(id.clone()))
    }

    pub fn all(&self) -> Vec<Arc<dyn TransactionalStorageAdapter>> {
        self.adapters.iter().map(|e| e.value().clone()).collect()
    }

    pub async fn start(&self, id: &AdapterId) -> Result<()> {
        let adapter = self.get(id)?;
        adapter.initialize().await?;
        adapter.start().await?;
        self.emit(LifecycleEvent::Started(id.clone()));
        Ok(())
    }

    pub async fn stop(&self, id: &AdapterId) -> Result<()> {
        let adapter = self.get(id)?;
        adapter.stop().await?;
        self.emit(LifecycleEvent::Stopped(id.clone()));
        Ok(())
    }

    pub async fn restart(&self, id: &AdapterId) -> Result<()> {
        let adapter = self.get(id)?;
        adapter.restart().await?;
        self.unhealthy_counts.remove(id);
        self.emit(LifecycleEvent::Restarted(id.clone()));
        Ok(())
    }

    pub async fn start_all(&self) -> Result<()> {
        for adapter in self.all() {
            adapter.initialize().await?;
            adapter.start().await?;
            self.emit(LifecycleEvent::Started(adapter.id().clone()));
        }
        Ok(())
    }

    pub async fn stop_all(&self) -> Result<()> {
        for adapter in self.all() {
            adapter.stop().await?;
            self.emit(LifecycleEvent::Stopped(adapter.id().clone()));
        }
        Ok(())
    }

    /// Check every registered adapter once. An adapter that reports
    /// `Unhealthy` `unhealthy_restart_threshold` times in a row is
    /// restarted automatically; a successful check resets its counter.
    pub async fn check_all(&self) -> Vec<(AdapterId, HealthStatus)> {
        let mut results = Vec::new();
        for adapter in self.all() {
            let id = adapter.id().clone();
            let status = adapter.health_check().await;
            results.push((id.clone(), status));

            if status == HealthStatus::Unhealthy {
                let count = {
                    let mut entry = self.unhealthy_counts.entry(id.clone()).or_insert(0);
                    *entry += 1;
                    *entry
                };
                self.emit(LifecycleEvent::HealthDegraded(id.clone(), status));
                if count >= self.unhealthy_restart_threshold {
                    tracing::warn!(adapter = %id, count, "restarting adapter after repeated unhealthy checks");
                    if let Err(err) = self.restart(&id).await {
                        tracing::error!(adapter = %id, error = %err, "auto-restart failed");
                    }
                }
            } else {
                self.unhealthy_counts.remove(&id);
            }
        }
        results
    }

    /// Spawn a background task that calls `check_all` on `interval`
    /// until the returned handle is dropped/aborted.
    pub fn spawn_health_loop(self: &Arc<Self>, interval: Duration) -> tokio::task::JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                registry.check_all().await;
            }
        })
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::memory_adapter::MemoryAdapter;

    #[tokio::test]
    async fn register_rejects_duplicate_id() {
        let registry = AdapterRegistry::new();
        registry
            .register(Arc::new(MemoryAdapter::new("mem-1")))
            .unwrap();
        let err = registry
            .register(Arc::new(MemoryAdapter::new("mem-1")))
            .unwrap_err();
        assert!(matches!(err, Error::AdapterAlreadyRegistered(_)));
    }

    #[tokio::test]
    async fn start_all_brings_every_adapter_up() {
        let registry = AdapterRegistry::new();
        registry
            .register(Arc::new(MemoryAdapter::new("mem-1")))
            .unwrap();
        registry
            .register(Arc::new(MemoryAdapter::new("mem-2")))
            .unwrap();
        registry.start_all().await.unwrap();

        for (_, status) in registry.check_all().await {
            assert_eq!(status, HealthStatus::Healthy);
        }
    }
}
