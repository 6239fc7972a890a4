// End-to-end scenarios S1-S6, exercising the crate the way an embedder
// would: through `TransactionCoordinator`, `AdapterRegistry`, and the
// WAL/replication/changestream modules directly, never through
// internal-only APIs.

use std::sync::Arc;

use async_trait::async_trait;
use confluxdb::adapter::contract::{
    AdapterState, Capabilities, Document, Query, StagedOp, TransactionalStorageAdapter,
};
use confluxdb::adapter::file_adapter::FileAdapter;
use confluxdb::adapter::memory_adapter::MemoryAdapter;
use confluxdb::adapter::registry::AdapterRegistry;
use confluxdb::changestream::{ChangeStreamManager, MemoryResumeTokenStore};
use confluxdb::common::{AdapterId, HealthStatus, NodeId, TransactionId};
use confluxdb::config::{
    ChangeStreamConfig, PeerNetworkConfig, ReplicationConfig, ReplicationSyncMode, TransactionConfig,
    WalConfig,
};
use confluxdb::error::{AbortReason, Error};
use confluxdb::network::PeerNetwork;
use confluxdb::replication::{ReplicatedWal, ReplicationManager, Role};
use confluxdb::transaction::{TransactionCoordinator, TransactionState};
use confluxdb::wal::codec::{self, DecodedFrame};
use confluxdb::wal::{PendingRecord, WalEngine};

fn wal_config(dir: &std::path::Path) -> WalConfig {
    WalConfig {
        wal_dir: dir.to_string_lossy().to_string(),
        ..Default::default()
    }
}

/// Adapter that always rejects `prepare_commit`, for S2. Delegates
/// everything else to a real `MemoryAdapter` so staging/rollback
/// behavior is exercised through production code, not a stub.
struct RejectingAdapter {
    inner: MemoryAdapter,
}

impl RejectingAdapter {
    fn new(id: &str) -> Self {
        Self {
            inner: MemoryAdapter::new(id),
        }
    }
}

#[async_trait]
impl TransactionalStorageAdapter for RejectingAdapter {
    fn id(&self) -> &AdapterId {
        self.inner.id()
    }

    fn capabilities(&self) -> Capabilities {
        self.inner.capabilities()
    }

    async fn initialize(&self) -> confluxdb::error::Result<()> {
        self.inner.initialize().await
    }

    async fn start(&self) -> confluxdb::error::Result<()> {
        self.inner.start().await
    }

    async fn stop(&self) -> confluxdb::error::Result<()> {
        self.inner.stop().await
    }

    async fn health_check(&self) -> HealthStatus {
        self.inner.health_check().await
    }

    async fn ping(&self) -> confluxdb::error::Result<()> {
        self.inner.ping().await
    }

    fn state(&self) -> AdapterState {
        self.inner.state()
    }

    async fn query(&self, query: &Query) -> confluxdb::error::Result<Vec<Document>> {
        self.inner.query(query).await
    }

    async fn insert(&self, collection: &str, document: Document) -> confluxdb::error::Result<()> {
        self.inner.insert(collection, document).await
    }

    async fn update(&self, collection: &str, key: &str, value: serde_json::Value) -> confluxdb::error::Result<()> {
        self.inner.update(collection, key, value).await
    }

    async fn delete(&self, collection: &str, key: &str) -> confluxdb::error::Result<()> {
        self.inner.delete(collection, key).await
    }

    async fn stage(&self, transaction: TransactionId, op: StagedOp) -> confluxdb::error::Result<()> {
        self.inner.stage(transaction, op).await
    }

    async fn prepare_commit(&self, _transaction: TransactionId) -> confluxdb::error::Result<bool> {
        Ok(false)
    }

    async fn finalize_commit(&self, transaction: TransactionId) -> confluxdb::error::Result<()> {
        self.inner.finalize_commit(transaction).await
    }

    async fn rollback(&self, transaction: TransactionId) -> confluxdb::error::Result<()> {
        self.inner.rollback(transaction).await
    }
}

fn alice() -> Document {
    Document {
        key: "1".to_string(),
        value: serde_json::json!({"id": 1, "name": "Alice"}),
    }
}

// S1 - single-adapter commit then recover.
#[tokio::test]
async fn s1_single_adapter_commit_then_recover() {
    let dir = tempfile::tempdir().unwrap();
    let adapter_root = dir.path().join("adapter-a");

    {
        let wal = Arc::new(WalEngine::open(dir.path(), "node", wal_config(dir.path())).unwrap());
        let registry = Arc::new(AdapterRegistry::new());
        registry
            .register(Arc::new(FileAdapter::new("A", &adapter_root)))
            .unwrap();
        registry.start_all().await.unwrap();

        let coordinator = TransactionCoordinator::new(wal.clone(), registry.clone(), TransactionConfig::default());
        let tx = coordinator.begin().await.unwrap();
        coordinator
            .operation(
                tx,
                AdapterId::new("A"),
                "users",
                StagedOp::Insert {
                    collection: "users".to_string(),
                    document: alice(),
                },
            )
            .await
            .unwrap();
        coordinator.commit(tx).await.unwrap();

        // BEGIN, PREPARE-A, COMMIT-A, COMMIT-coord.
        assert_eq!(wal.current_sequence(), 4);
        wal.close().await.unwrap();
        // "crash": adapter and coordinator are dropped here without an
        // orderly shutdown of in-memory state, as in the scenario.
    }

    // Recover against a fresh engine/adapter pair over the same directory.
    // `A`'s durable state lives in its own backing file, not in WAL DATA
    // records — the WAL only carries the 2PC bookkeeping, so recovery
    // here is about the log being internally consistent, not about
    // reconstructing documents from it.
    let wal = Arc::new(WalEngine::open(dir.path(), "node", wal_config(dir.path())).unwrap());
    assert_eq!(wal.current_sequence(), 4);
    confluxdb::wal::recover(dir.path(), "node", Default::default(), |_| Ok(())).unwrap();

    let adapter = FileAdapter::new("A", &adapter_root);
    adapter.initialize().await.unwrap();
    adapter.start().await.unwrap();

    let docs = adapter
        .query(&Query {
            collection: "users".to_string(),
            filter: serde_json::json!({}),
        })
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
    assert_eq!(docs[0].value, alice().value);
}

// S2 - cross-adapter 2PC with one participant failing prepare.
#[tokio::test]
async fn s2_cross_adapter_prepare_rejection_aborts_both_participants() {
    let dir = tempfile::tempdir().unwrap();
    let wal = Arc::new(WalEngine::open(dir.path(), "node", wal_config(dir.path())).unwrap());
    let registry = Arc::new(AdapterRegistry::new());
    registry.register(Arc::new(MemoryAdapter::new("A"))).unwrap();
    registry.register(Arc::new(RejectingAdapter::new("B"))).unwrap();
    registry.start_all().await.unwrap();

    let coordinator = TransactionCoordinator::new(wal.clone(), registry.clone(), TransactionConfig::default());
    let tx = coordinator.begin().await.unwrap();

    coordinator
        .operation(
            tx,
            AdapterId::new("A"),
            "widgets",
            StagedOp::Insert {
                collection: "widgets".to_string(),
                document: Document {
                    key: "2".to_string(),
                    value: serde_json::json!({"id": 2}),
                },
            },
        )
        .await
        .unwrap();
    coordinator
        .operation(
            tx,
            AdapterId::new("B"),
            "widgets",
            StagedOp::Insert {
                collection: "widgets".to_string(),
                document: Document {
                    key: "2".to_string(),
                    value: serde_json::json!({"id": 2}),
                },
            },
        )
        .await
        .unwrap();

    let err = coordinator.commit(tx).await.unwrap_err();
    match err {
        Error::TransactionAborted {
            reason: AbortReason::PrepareRejected { participant },
            ..
        } => assert_eq!(participant, AdapterId::new("B")),
        other => panic!("expected PrepareRejected, got {other:?}"),
    }

    let status = coordinator.status(tx).unwrap();
    assert_eq!(status.state, TransactionState::RolledBack);

    // BEGIN, PREPARE-A (true), PREPARE-B (false), ROLLBACK-A,
    // ROLLBACK-B, ROLLBACK-coord.
    assert_eq!(wal.current_sequence(), 6);

    for id in ["A", "B"] {
        let adapter = registry.get(&AdapterId::new(id)).unwrap();
        let docs = adapter
            .query(&Query {
                collection: "widgets".to_string(),
                filter: serde_json::json!({}),
            })
            .await
            .unwrap();
        assert!(docs.is_empty(), "{id} should not have committed id=2");
    }
}

// S3 - follower catch-up: leader writes entries while the follower is
// connected, then more while it is disconnected; on reconnect the
// follower requests a sync and ends up with an identical log.
#[tokio::test]
async fn s3_follower_catches_up_after_reconnect() {
    let leader_dir = tempfile::tempdir().unwrap();
    let follower_dir = tempfile::tempdir().unwrap();

    let leader_wal = Arc::new(WalEngine::open(leader_dir.path(), "node", wal_config(leader_dir.path())).unwrap());
    let follower_wal = Arc::new(WalEngine::open(follower_dir.path(), "node", wal_config(follower_dir.path())).unwrap());

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let leader_network = PeerNetwork::new(
        NodeId::new("leader"),
        PeerNetworkConfig {
            bind_address: addr.to_string(),
            ..Default::default()
        },
    );
    leader_network.listen().await.unwrap();

    let follower_network = PeerNetwork::new(NodeId::new("follower"), PeerNetworkConfig::default());

    let replication_config = ReplicationConfig {
        sync_mode: ReplicationSyncMode::Async,
        batch_size: 10,
        ..Default::default()
    };

    let leader_repl = Arc::new(ReplicationManager::new(
        NodeId::new("leader"),
        Role::Leader,
        leader_wal.clone(),
        leader_network.clone(),
        replication_config.clone(),
    ));
    let follower_repl = Arc::new(ReplicationManager::new(
        NodeId::new("follower"),
        Role::Follower,
        follower_wal.clone(),
        follower_network.clone(),
        replication_config,
    ));

    let leader_replicated = Arc::new(ReplicatedWal::new(leader_wal.clone(), leader_repl.clone()));
    let follower_replicated = Arc::new(ReplicatedWal::new(follower_wal.clone(), follower_repl.clone()));

    // Dispatch loops: forward every inbound peer message to the
    // matching `ReplicatedWal`.
    for (network, replicated, remote_label) in [
        (leader_network.clone(), leader_replicated.clone(), "leader"),
        (follower_network.clone(), follower_replicated.clone(), "follower"),
    ] {
        let mut rx = network.on_message();
        tokio::spawn(async move {
            while let Ok((peer, message)) = rx.recv().await {
                if let Err(err) = replicated.handle_peer_message(&peer, message).await {
                    tracing::warn!(node = remote_label, error = %err, "dispatch failed");
                }
            }
        });
    }

    follower_network
        .connect(NodeId::new("leader"), &addr.to_string())
        .await
        .unwrap();
    leader_repl.promote_to_leader();
    // Allow the accept-side registration to land before replicating.
    tokio::time::sleep(std::time::Duration::from_millis(50)).await;

    // Commit records force an immediate flush, so `durable_upto` tracks
    // them one for one; plain DATA records would only flush once the
    // buffer threshold is crossed, which this test does not rely on.
    for tx in 1..=20u64 {
        leader_replicated.write_entry(PendingRecord::commit(tx)).await.unwrap();
    }
    tokio::time::sleep(std::time::Duration::from_millis(100)).await;
    assert_eq!(follower_wal.durable_upto(), 20);

    // Simulate the follower dropping off the network.
    follower_network.disconnect(&NodeId::new("leader")).await.unwrap();
    leader_network.disconnect(&NodeId::new("follower")).await.ok();

    for tx in 21..=100u64 {
        leader_replicated.write_entry(PendingRecord::commit(tx)).await.unwrap();
    }
    assert_eq!(leader_wal.current_sequence(), 100);
    assert_eq!(follower_wal.durable_upto(), 20);

    // Reconnect and ask the leader to catch this node up.
    follower_network
        .connect(NodeId::new("leader"), &addr.to_string())
        .await
        .unwrap();
    follower_replicated
        .sync_with_cluster(&follower_network, &NodeId::new("leader"))
        .await
        .unwrap();

    let deadline = tokio::time::Instant::now() + std::time::Duration::from_secs(5);
    while follower_wal.durable_upto() < 100 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }

    assert_eq!(follower_wal.durable_upto(), 100);
    let leader_entries = leader_wal.read_entries(1).unwrap();
    let follower_entries = follower_wal.read_entries(1).unwrap();
    assert_eq!(leader_entries.len(), follower_entries.len());
    for (l, f) in leader_entries.iter().zip(follower_entries.iter()) {
        assert_eq!(l.sequence_number, f.sequence_number);
        assert_eq!(l.data, f.data);
    }
}

// S4 - duplicate finalize is a no-op.
#[tokio::test]
async fn s4_duplicate_finalize_commit_is_a_no_op() {
    let dir = tempfile::tempdir().unwrap();
    let wal = Arc::new(WalEngine::open(dir.path(), "node", wal_config(dir.path())).unwrap());
    let registry = Arc::new(AdapterRegistry::new());
    registry.register(Arc::new(MemoryAdapter::new("A"))).unwrap();
    registry.start_all().await.unwrap();

    let coordinator = TransactionCoordinator::new(wal.clone(), registry.clone(), TransactionConfig::default());
    let tx = coordinator.begin().await.unwrap();
    coordinator
        .operation(
            tx,
            AdapterId::new("A"),
            "widgets",
            StagedOp::Insert {
                collection: "widgets".to_string(),
                document: Document {
                    key: "3".to_string(),
                    value: serde_json::json!({"id": 3}),
                },
            },
        )
        .await
        .unwrap();
    coordinator.commit(tx).await.unwrap();

    let sequence_after_commit = wal.current_sequence();
    let adapter = registry.get(&AdapterId::new("A")).unwrap();
    adapter.finalize_commit(tx).await.unwrap();

    assert_eq!(wal.current_sequence(), sequence_after_commit);
    let docs = adapter
        .query(&Query {
            collection: "widgets".to_string(),
            filter: serde_json::json!({}),
        })
        .await
        .unwrap();
    assert_eq!(docs.len(), 1);
}

// S5 - subscription with resume token across restart.
#[tokio::test]
async fn s5_resume_token_prevents_duplicate_delivery_across_restart() {
    let resume_store = Arc::new(MemoryResumeTokenStore::new());
    let manager = ChangeStreamManager::new(ChangeStreamConfig::default(), resume_store.clone());
    let sub = manager.create_stream("orders");

    for i in 1..=3u64 {
        manager
            .emit(confluxdb::changestream::ChangeEvent::new(
                "orders",
                confluxdb::changestream::ChangeOperation::Insert,
                format!("order-{i}"),
                None,
                i,
            ))
            .await;
    }
    let events = manager.poll(&sub, 10).await.unwrap();
    assert_eq!(events.len(), 3);

    let last = events.last().unwrap();
    manager
        .save_resume_token(&sub, last.resume_token.clone())
        .await
        .unwrap();

    // "Restart": build a fresh manager sharing only the resume store.
    let restarted = ChangeStreamManager::new(ChangeStreamConfig::default(), resume_store.clone());
    let token = restarted.get_resume_token(&sub).await.unwrap().unwrap();
    assert_eq!(token.position, 3);
    let new_sub = restarted.create_stream_from("orders", Some(token));

    // Replaying the same three inserts after restart must not be
    // delivered again: the manager itself drops anything at or before
    // the subscription's resume token, so the caller does no filtering.
    for i in 1..=3u64 {
        restarted
            .emit(confluxdb::changestream::ChangeEvent::new(
                "orders",
                confluxdb::changestream::ChangeOperation::Insert,
                format!("order-{i}"),
                None,
                i,
            ))
            .await;
    }
    // A genuinely new commit after restart is still observed.
    restarted
        .emit(confluxdb::changestream::ChangeEvent::new(
            "orders",
            confluxdb::changestream::ChangeOperation::Insert,
            "order-4",
            None,
            4,
        ))
        .await;

    let replayed = restarted.poll(&new_sub, 10).await.unwrap();
    assert_eq!(replayed.len(), 1);
    assert_eq!(replayed[0].key, "order-4");
}

// S6 - corrupted record detection.
#[tokio::test]
async fn s6_corrupted_record_halts_recovery_without_partial_apply() {
    let dir = tempfile::tempdir().unwrap();
    let wal = WalEngine::open(dir.path(), "node", wal_config(dir.path())).unwrap();

    // tx0: an unrelated trivial commit so the target DATA record lands
    // on sequence 5, as in the scenario's literal numbering.
    wal.write_entry(PendingRecord::begin(1)).await.unwrap();
    wal.write_entry(PendingRecord::commit(1)).await.unwrap();

    wal.write_entry(PendingRecord::begin(2)).await.unwrap();
    wal.write_entry(PendingRecord::data(2, "c1", confluxdb::wal::OperationType::Insert, b"first".to_vec()))
        .await
        .unwrap();
    wal.write_entry(PendingRecord::data(2, "c1", confluxdb::wal::OperationType::Insert, b"second".to_vec()))
        .await
        .unwrap();
    wal.write_entry(PendingRecord::commit(2)).await.unwrap();
    wal.close().await.unwrap();

    let path = dir.path().join("node.wal");
    let mut bytes = std::fs::read(&path).unwrap();
    flip_record(&mut bytes, 5);
    std::fs::write(&path, &bytes).unwrap();

    let err = confluxdb::wal::recover(dir.path(), "node", Default::default(), |_| Ok(())).unwrap_err();
    match err {
        Error::CorruptedLog { sequence, transaction } => {
            assert_eq!(sequence, 5);
            assert_eq!(transaction, 2);
        }
        other => panic!("expected CorruptedLog, got {other:?}"),
    }
}

fn flip_record(bytes: &mut [u8], target_sequence: u64) {
    let offset = {
        let mut cursor = std::io::Cursor::new(&bytes[..]);
        loop {
            let start = cursor.position() as usize;
            match codec::decode_frame(&mut cursor, Default::default()).unwrap() {
                DecodedFrame::Ok(record) => {
                    if record.sequence_number == target_sequence {
                        break start;
                    }
                }
                DecodedFrame::Eof => panic!("sequence {target_sequence} not found in log"),
                DecodedFrame::ChecksumFailed { .. } => panic!("unexpected checksum failure while locating record"),
                DecodedFrame::Malformed => panic!("unexpected malformed record while locating record"),
            }
        }
    };
    // Flip a bit two bytes into the body (past the 4-byte length
    // prefix), the same offset `detects_bit_flip_corruption` uses.
    bytes[offset + 6] ^= 0x01;
}
