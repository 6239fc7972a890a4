//! confluxdb: an embeddable multi-source collection store.
//!
//! Durability is provided by a node-local Write-Ahead Log
//! ([`wal`]); writes that span more than one backend go through a
//! two-phase-commit [`transaction`] coordinator talking to
//! [`adapter`]-contract storage backends; callers subscribe to data
//! changes through [`changestream`]; and a node replicates its log to
//! peers via [`network`] and [`replication`].
//!
//! | module         | responsibility                                      |
//! |-----------------|------------------------------------------------------|
//! | [`common`]      | shared ids, the async `Component` lifecycle trait    |
//! | [`error`]       | crate-wide `Error`/`Result`                          |
//! | [`config`]      | validated option structs per component, `ConfigProvider` |
//! | [`wal`]         | append-only log: framing, checksums, recovery        |
//! | [`adapter`]     | storage backend contract, reference adapters, registry |
//! | [`transaction`] | cross-adapter two-phase commit                       |
//! | [`changestream`]| subscriptions, polling change source, resume tokens  |
//! | [`network`]     | peer wire protocol and TCP transport                 |
//! | [`replication`] | leader/follower log replication                      |

pub mod adapter;
pub mod changestream;
pub mod common;
pub mod config;
pub mod error;
pub mod network;
pub mod replication;
pub mod transaction;
pub mod wal;

pub use common::{AdapterId, Component, HealthStatus, NodeId, SequenceNumber, TransactionId};
pub use error::{AbortReason, Error, Result};

/// Crate version, exposed for embedders that log it at startup.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
