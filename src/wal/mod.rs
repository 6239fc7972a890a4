//! Write-Ahead Log (spec.md §4.A/§4.B).
//!
//! | module      | contents                                            |
//! |-------------|------------------------------------------------------|
//! | `record`    | record/operation type enums, the `WalRecord`/`PendingRecord` data model |
//! | `codec`     | framing, checksum computation, encode/decode          |
//! | `engine`    | `WalEngine`: append, flush, segment rollover, truncate, checkpoint |
//! | `recovery`  | crash recovery: replay, transaction grouping, corruption handling |

pub mod codec;
pub mod engine;
pub mod record;
pub mod recovery;

pub use engine::{Checkpoint, WalEngine, WalStats};
pub use record::{OperationType, PendingRecord, RecordType, TransactionRef, WalRecord};
pub use recovery::{recover, ReplayedRecord};
