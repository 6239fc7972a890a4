//! Change-stream subscriptions and the polling fallback change source
//! (spec.md §5.A/§5.B).
//!
//! | module         | contents                                           |
//! |-----------------|----------------------------------------------------|
//! | `types`         | `ChangeEvent`, `ResumeToken`, `Subscription`        |
//! | `manager`       | `ChangeStreamManager`: subscriptions, buffering, error backoff |
//! | `polling`       | `PollingChangeSource`: fingerprint-diff based synthetic feed |
//! | `resume_store`  | pluggable memory/file/adapter-backed resume token persistence |

pub mod manager;
pub mod polling;
pub mod resume_store;
pub mod types;

pub use manager::ChangeStreamManager;
pub use polling::PollingChangeSource;
pub use resume_store::{AdapterResumeTokenStore, FileResumeTokenStore, MemoryResumeTokenStore, ResumeTokenStore};
pub use types::{ChangeEvent, ChangeOperation, ResumeToken, Subscription, SubscriptionState};
