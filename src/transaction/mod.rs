//! Transaction Coordinator: cross-adapter two-phase commit (spec.md §2.C).
//!
//! | module        | contents                                              |
//! |---------------|--------------------------------------------------------|
//! | `types`       | `TransactionState`, durable `Decision`, `TransactionStatus` |
//! | `coordinator` | `TransactionCoordinator`: begin/operation/commit/rollback/status |

pub mod coordinator;
pub mod types;

pub use coordinator::TransactionCoordinator;
pub use types::{Decision, DecisionOutcome, TransactionState, TransactionStatus};
