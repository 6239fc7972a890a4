// Configuration contract (spec.md §6).
//
// These are the validated option structs an external Config Provider
// hands to each component; this crate never parses files or watches
// for changes. Each struct carries the defaults spec.md documents and
// rejects unknown keys when deserialized, so a provider built on serde
// gets that validation for free.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::common::NodeId;

/// Checksum algorithm selector (spec.md §4.B): fixed per node, not
/// embedded in individual records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum ChecksumAlgorithm {
    Crc32C,
    Crc32Fast,
}

impl Default for ChecksumAlgorithm {
    fn default() -> Self {
        ChecksumAlgorithm::Crc32C
    }
}

/// WAL flush policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum SyncMode {
    /// fsync after every COMMIT/ROLLBACK/CHECKPOINT.
    AlwaysSync,
    /// fsync on a periodic background tick.
    PeriodicSync,
    /// Never fsync (tests only).
    NoSync,
}

impl Default for SyncMode {
    fn default() -> Self {
        SyncMode::AlwaysSync
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WalConfig {
    /// Directory the WAL segment files live in.
    pub wal_dir: String,
    /// Maximum bytes buffered before a forced flush.
    pub max_buffer_size: usize,
    /// Segment rollover threshold in bytes.
    pub segment_size: u64,
    /// Checksum algorithm, fixed for the lifetime of the log family.
    pub checksum_algorithm: ChecksumAlgorithm,
    pub sync_mode: SyncMode,
    /// Maximum delay before a buffered (non-commit) record is flushed.
    pub max_commit_delay_ms: u64,
}

impl Default for WalConfig {
    fn default() -> Self {
        Self {
            wal_dir: "./data/wal".to_string(),
            max_buffer_size: 4 * 1024 * 1024,
            segment_size: 64 * 1024 * 1024,
            checksum_algorithm: ChecksumAlgorithm::default(),
            sync_mode: SyncMode::default(),
            max_commit_delay_ms: 10,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TransactionConfig {
    pub prepare_timeout_ms: u64,
    pub finalize_timeout_ms: u64,
    pub global_timeout_ms: u64,
    pub max_finalize_attempts: u32,
    pub finalize_backoff_base_ms: u64,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            prepare_timeout_ms: 5_000,
            finalize_timeout_ms: 5_000,
            global_timeout_ms: 30_000,
            max_finalize_attempts: 5,
            finalize_backoff_base_ms: 50,
        }
    }
}

impl TransactionConfig {
    pub fn prepare_timeout(&self) -> Duration {
        Duration::from_millis(self.prepare_timeout_ms)
    }
    pub fn finalize_timeout(&self) -> Duration {
        Duration::from_millis(self.finalize_timeout_ms)
    }
    pub fn global_timeout(&self) -> Duration {
        Duration::from_millis(self.global_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum ReplicationMode {
    MasterSlave,
    MultiMaster,
}

impl Default for ReplicationMode {
    fn default() -> Self {
        ReplicationMode::MasterSlave
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum ReplicationSyncMode {
    Sync,
    Async,
}

impl Default for ReplicationSyncMode {
    fn default() -> Self {
        ReplicationSyncMode::Async
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ReplicationConfig {
    pub mode: ReplicationMode,
    pub sync_mode: ReplicationSyncMode,
    pub heartbeat_interval_ms: u64,
    pub failure_threshold: u32,
    pub batch_size: usize,
    pub replication_ack_timeout_ms: u64,
    pub max_await_time_ms: u64,
}

impl Default for ReplicationConfig {
    fn default() -> Self {
        Self {
            mode: ReplicationMode::default(),
            sync_mode: ReplicationSyncMode::default(),
            heartbeat_interval_ms: 1_000,
            failure_threshold: 3,
            batch_size: 256,
            replication_ack_timeout_ms: 3_000,
            max_await_time_ms: 5_000,
        }
    }
}

impl ReplicationConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms)
    }
    pub fn replication_ack_timeout(&self) -> Duration {
        Duration::from_millis(self.replication_ack_timeout_ms)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum ResumeTokenStore {
    Memory,
    File,
    ExternalDocumentStore,
}

impl Default for ResumeTokenStore {
    fn default() -> Self {
        ResumeTokenStore::Memory
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ChangeStreamConfig {
    pub buffer_size: usize,
    pub flush_interval_ms: u64,
    pub max_retries: u32,
    pub max_retry_delay_ms: u64,
    pub resume_token_store: ResumeTokenStore,
    /// Root directory used when `resume_token_store == File`.
    pub token_dir: String,
}

impl Default for ChangeStreamConfig {
    fn default() -> Self {
        Self {
            buffer_size: 1_000,
            flush_interval_ms: 100,
            max_retries: 5,
            max_retry_delay_ms: 30_000,
            resume_token_store: ResumeTokenStore::default(),
            token_dir: "./data/subscriptions".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PollingConfig {
    pub interval_ms: u64,
    pub debounce_ms: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: 2_000,
            debounce_ms: 200,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PeerNetworkConfig {
    pub bind_address: String,
    pub protocol_version: u32,
    pub max_connect_retries: u32,
    pub connect_backoff_base_ms: u64,
    pub failure_threshold: u32,
}

impl Default for PeerNetworkConfig {
    fn default() -> Self {
        Self {
            bind_address: "127.0.0.1:7870".to_string(),
            protocol_version: 1,
            max_connect_retries: 10,
            connect_backoff_base_ms: 100,
            failure_threshold: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterMember {
    pub id: NodeId,
    pub address: String,
    pub port: u16,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "snake_case")]
pub enum InitialRole {
    Leader,
    Follower,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub node_id: NodeId,
    pub members: Vec<ClusterMember>,
    pub initial_role: Option<InitialRole>,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            node_id: NodeId::new("node-1"),
            members: Vec::new(),
            initial_role: None,
        }
    }
}

/// Aggregate configuration root handed to the crate by the embedder's
/// Config Provider.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RootConfig {
    pub wal: WalConfig,
    pub transaction: TransactionConfig,
    pub replication: ReplicationConfig,
    pub change_stream: ChangeStreamConfig,
    pub polling: PollingConfig,
    pub peer_network: PeerNetworkConfig,
    pub cluster: ClusterConfig,
}

/// Stand-in for the out-of-scope Config Provider: the crate only
/// depends on this trait, never on a concrete file/env loader.
pub trait ConfigProvider: Send + Sync {
    fn config(&self) -> &RootConfig;
}

/// A `ConfigProvider` over an already-materialized, in-memory config.
/// Useful for embedders that parse their own config format and just
/// need to hand the validated result to confluxdb.
pub struct StaticConfigProvider {
    config: RootConfig,
}

impl StaticConfigProvider {
    pub fn new(config: RootConfig) -> Self {
        Self { config }
    }
}

impl ConfigProvider for StaticConfigProvider {
    fn config(&self) -> &RootConfig {
        &self.config
    }
}
