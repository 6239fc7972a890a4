//! Transactional Storage Adapter contract and reference backends
//! (spec.md §2.A/§2.B).
//!
//! | module           | contents                                          |
//! |-------------------|---------------------------------------------------|
//! | `contract`        | `TransactionalStorageAdapter` trait, `Capabilities`, staged-op types |
//! | `memory_adapter`  | in-memory reference backend                       |
//! | `file_adapter`    | file-backed reference backend (write-temp + rename) |
//! | `registry`        | `AdapterRegistry`: lifecycle, events, health-check auto-restart |
//! | `cross_adapter`   | best-effort fan-out across adapters outside 2PC   |

pub mod contract;
pub mod cross_adapter;
pub mod file_adapter;
pub mod memory_adapter;
pub mod registry;

pub use contract::{
    AdapterState, Capabilities, Document, Query, StagedOp, TransactionalStorageAdapter,
};
pub use cross_adapter::{CrossAdapterCoordinator, FanoutMode};
pub use file_adapter::FileAdapter;
pub use memory_adapter::MemoryAdapter;
pub use registry::{AdapterRegistry, LifecycleEvent};
