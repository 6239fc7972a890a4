// Change-Stream Manager (spec.md §5.A).
//
// Owns subscriptions and a bounded, per-subscription event buffer.
// `emit` fans a change event out to every subscription watching its
// collection; a full buffer drops the oldest pending event rather than
// blocking the emitter, since change streams are at-least-once and
// resumable, never a back-pressure point for the write path. A
// subscription that reports `record_error` enough times in a row moves
// to `SubscriptionState::Error` and stops receiving events until
// `resume_stream` is called again after the backoff window.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

use crate::changestream::resume_store::ResumeTokenStore;
use crate::changestream::types::{ChangeEvent, ResumeToken, Subscription, SubscriptionState};
use crate::config::ChangeStreamConfig;
use crate::error::{Error, Result};

struct SubscriptionHandle {
    subscription: Subscription,
    buffer: Mutex<std::collections::VecDeque<ChangeEvent>>,
    last_error_at: Option<Instant>,
}

pub struct ChangeStreamManager {
    config: ChangeStreamConfig,
    resume_store: Arc<dyn ResumeTokenStore>,
    subscriptions: DashMap<String, SubscriptionHandle>,
}

impl ChangeStreamManager {
    pub fn new(config: ChangeStreamConfig, resume_store: Arc<dyn ResumeTokenStore>) -> Self {
        Self {
            config,
            resume_store,
            subscriptions: DashMap::new(),
        }
    }

    pub fn create_stream(&self, collection: impl Into<String>) -> String {
        self.create_stream_from(collection, None)
    }

    /// Create a stream that resumes from `token`: events at or before
    /// `token.position` are treated as already delivered and dropped by
    /// `emit`, the same as if this subscription had seen them itself.
    pub fn create_stream_from(&self, collection: impl Into<String>, token: Option<ResumeToken>) -> String {
        let mut subscription = Subscription::new(collection);
        subscription.resume_token = token;
        let id = subscription.id.clone();
        self.subscriptions.insert(
            id.clone(),
            SubscriptionHandle {
                subscription,
                buffer: Mutex::new(std::collections::VecDeque::new()),
                last_error_at: None,
            },
        );
        id
    }

    pub fn pause_stream(&self, subscription_id: &str) -> Result<()> {
        let mut entry = self
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription_id}")))?;
        entry.subscription.state = SubscriptionState::Paused;
        Ok(())
    }

    pub fn resume_stream(&self, subscription_id: &str) -> Result<()> {
        let mut entry = self
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription_id}")))?;
        entry.subscription.state = SubscriptionState::Active;
        entry.subscription.error_count = 0;
        Ok(())
    }

    pub fn destroy_stream(&self, subscription_id: &str) -> Result<()> {
        self.subscriptions
            .remove(subscription_id)
            .map(|_| ())
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription_id}")))
    }

    /// Record a delivery failure for `subscription_id`. After
    /// `max_retries` consecutive failures the subscription moves to
    /// `Error` state; callers should stop polling it until
    /// `resume_stream` succeeds.
    pub fn record_error(&self, subscription_id: &str) -> Result<SubscriptionState> {
        let mut entry = self
            .subscriptions
            .get_mut(subscription_id)
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription_id}")))?;
        entry.subscription.error_count += 1;
        entry.last_error_at = Some(Instant::now());
        if entry.subscription.error_count >= self.config.max_retries {
            entry.subscription.state = SubscriptionState::Error;
        }
        Ok(entry.subscription.state)
    }

    /// Backoff delay before a caller should retry an errored
    /// subscription, growing with consecutive failures up to
    /// `max_retry_delay_ms`.
    pub fn backoff_for(&self, subscription_id: &str) -> Duration {
        let entry = match self.subscriptions.get(subscription_id) {
            Some(e) => e,
            None => return Duration::from_millis(self.config.flush_interval_ms),
        };
        let exp = entry.subscription.error_count.min(10);
        let delay_ms = (self.config.flush_interval_ms.saturating_mul(1u64 << exp))
            .min(self.config.max_retry_delay_ms);
        Duration::from_millis(delay_ms)
    }

    /// Publish `event` to every active subscription watching its
    /// collection. Buffers beyond `buffer_size` drop the oldest event.
    /// A subscription whose resume token is already at or past
    /// `event.resume_token.position` has seen this event before (e.g.
    /// replay after a restart) and is skipped; otherwise the
    /// subscription's resume token is advanced before the event is
    /// queued for delivery, so a crash between the two never leaves a
    /// delivered event behind an unadvanced token.
    pub async fn emit(&self, event: ChangeEvent) {
        for mut entry in self.subscriptions.iter_mut() {
            if entry.subscription.state != SubscriptionState::Active {
                continue;
            }
            if entry.subscription.collection != event.collection {
                continue;
            }
            if let Some(seen) = &entry.subscription.resume_token {
                if event.resume_token.position <= seen.position {
                    continue;
                }
            }
            entry.subscription.resume_token = Some(event.resume_token.clone());

            let mut buffer = entry.buffer.lock().await;
            if buffer.len() >= self.config.buffer_size {
                buffer.pop_front();
            }
            buffer.push_back(event.clone());
        }
    }

    /// Drain up to `max` buffered events for `subscription_id`, in
    /// arrival order.
    pub async fn poll(&self, subscription_id: &str, max: usize) -> Result<Vec<ChangeEvent>> {
        let entry = self
            .subscriptions
            .get(subscription_id)
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription_id}")))?;
        let mut buffer = entry.buffer.lock().await;
        let n = max.min(buffer.len());
        Ok(buffer.drain(..n).collect())
    }

    pub fn state(&self, subscription_id: &str) -> Result<SubscriptionState> {
        self.subscriptions
            .get(subscription_id)
            .map(|e| e.subscription.state)
            .ok_or_else(|| Error::NotFound(format!("subscription {subscription_id}")))
    }

    pub async fn save_resume_token(&self, subscription_id: &str, token: ResumeToken) -> Result<()> {
        self.resume_store.save(subscription_id, token).await
    }

    pub async fn get_resume_token(&self, subscription_id: &str) -> Result<Option<ResumeToken>> {
        self.resume_store.get(subscription_id).await
    }

    pub async fn clear_resume_token(&self, subscription_id: &str) -> Result<()> {
        self.resume_store.clear(subscription_id).await
    }
}
