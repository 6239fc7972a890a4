// Replication Manager (spec.md §4.G/§4.H).
//
// Leader-side: broadcasts each durable WAL record to followers,
// honoring SYNC (wait for every follower's ack, bounded by
// `max_await_time_ms`) or ASYNC (fire-and-forget) mode. Follower-side:
// validates that an incoming entry is contiguous with its local log;
// a gap triggers a `SyncRequest` for the missing range rather than
// silently accepting a hole. Grounded on the shape of the teacher's
// `networking::membership::raft::replication::ReplicationManager`
// (`send_heartbeats`, `replicate_logs`, `handle_append_entries`), with
// the Raft term/log-matching machinery collapsed into a simpler
// contiguous-sequence check since this crate's replication is a single
// mutable log, not a consensus-replicated state machine.

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

use crate::common::{NodeId, SequenceNumber};
use crate::config::{ReplicationConfig, ReplicationSyncMode};
use crate::error::{Error, Result};
use crate::network::peer::PeerNetwork;
use crate::network::types::PeerMessage;
use crate::replication::cluster::{ReplicationStatus, Role, RoleCell};
use crate::wal::engine::WalEngine;
use crate::wal::record::WalRecord;

/// An ASYNC-mode record awaiting acknowledgement. Tracked so a timed-out
/// send can be distinguished from one that simply hasn't been acked yet
/// and moved onto the retry queue instead of being silently forgotten.
#[derive(Clone)]
struct PendingEntry {
    record: WalRecord,
    sent_at: tokio::time::Instant,
    attempts: u32,
}

pub struct ReplicationManager {
    node_id: NodeId,
    role: Arc<RoleCell>,
    wal: Arc<WalEngine>,
    network: Arc<PeerNetwork>,
    config: ReplicationConfig,
    match_index: DashMap<NodeId, SequenceNumber>,
    pending_acks: DashMap<SequenceNumber, PendingEntry>,
    retry_queue: DashMap<SequenceNumber, PendingEntry>,
}

impl ReplicationManager {
    pub fn new(node_id: NodeId, initial_role: Role, wal: Arc<WalEngine>, network: Arc<PeerNetwork>, config: ReplicationConfig) -> Self {
        Self {
            node_id,
            role: Arc::new(RoleCell::new(initial_role)),
            wal,
            network,
            config,
            match_index: DashMap::new(),
            pending_acks: DashMap::new(),
            retry_queue: DashMap::new(),
        }
    }

    pub fn role(&self) -> Role {
        self.role.get()
    }

    pub fn promote_to_leader(&self) {
        self.role.set(Role::Leader);
        self.match_index.clear();
        for peer in self.network.get_connected_nodes() {
            self.match_index.insert(peer, self.wal.durable_upto());
        }
    }

    pub fn demote_to_follower(&self) {
        self.role.set(Role::Follower);
    }

    pub fn status(&self) -> ReplicationStatus {
        ReplicationStatus {
            node_id: self.node_id.clone(),
            role: self.role(),
            durable_upto: self.wal.durable_upto(),
            known_peers: self.network.get_connected_nodes(),
            peer_match_index: self.match_index.iter().map(|e| (e.key().clone(), *e.value())).collect(),
        }
    }

    /// Broadcast `record` to every connected follower. In `Sync` mode
    /// this blocks until a majority of connected peers ack (or
    /// `max_await_time_ms` elapses, whichever first) — not every peer,
    /// per spec.md §4.H. In `Async` mode the record is handed to
    /// `pending_acks` and this returns as soon as the sends are issued;
    /// `spawn_async_ack_loop` reconciles acks and retries in the
    /// background.
    pub async fn replicate(&self, record: WalRecord) -> Result<()> {
        if self.role() != Role::Leader {
            return Ok(());
        }

        let sequence = record.sequence_number;
        let peers = self.network.get_connected_nodes();
        if peers.is_empty() {
            return Ok(());
        }

        let mut acks = self.network.on_message();
        self.network
            .broadcast_message(&PeerMessage::WalEntry { record: record.clone() })
            .await;

        if self.config.sync_mode != ReplicationSyncMode::Sync {
            self.pending_acks.insert(
                sequence,
                PendingEntry {
                    record,
                    sent_at: tokio::time::Instant::now(),
                    attempts: 1,
                },
            );
            return Ok(());
        }

        // Majority of connected peers, excluding self: floor(N/2) + 1.
        let quorum = peers.len() / 2 + 1;
        let mut acked: std::collections::HashSet<NodeId> = std::collections::HashSet::new();
        let deadline = tokio::time::Instant::now() + Duration::from_millis(self.config.max_await_time_ms);

        while acked.len() < quorum {
            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(Error::ReplicationTimeout { sequence });
            }
            match tokio::time::timeout(remaining, acks.recv()).await {
                Ok(Ok((peer, PeerMessage::Ack { sequence: acked_seq }))) if acked_seq >= sequence => {
                    acked.insert(peer.clone());
                    self.match_index.insert(peer, acked_seq);
                }
                Ok(Ok(_)) => continue,
                Ok(Err(_)) => return Err(Error::ReplicationTimeout { sequence }),
                Err(_) => return Err(Error::ReplicationTimeout { sequence }),
            }
        }
        Ok(())
    }

    /// Background reconciliation for ASYNC-mode replication: drains
    /// acks out of `pending_acks` as they arrive, and on each sweep tick
    /// moves anything that has waited past `max_await_time_ms` into
    /// `retry_queue` and re-broadcasts everything already queued there.
    pub fn spawn_async_ack_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let mut acks = self.network.on_message();
        let sweep_interval = Duration::from_millis(self.config.max_await_time_ms.max(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(sweep_interval);
            loop {
                tokio::select! {
                    ack = acks.recv() => {
                        if let Ok((peer, PeerMessage::Ack { sequence })) = ack {
                            if let Some((_, entry)) = self.pending_acks.remove(&sequence) {
                                self.match_index.insert(peer, entry.record.sequence_number);
                            }
                            self.retry_queue.remove(&sequence);
                        }
                    }
                    _ = ticker.tick() => {
                        let timeout = Duration::from_millis(self.config.max_await_time_ms);
                        let timed_out: Vec<SequenceNumber> = self
                            .pending_acks
                            .iter()
                            .filter(|e| e.value().sent_at.elapsed() > timeout)
                            .map(|e| *e.key())
                            .collect();
                        for sequence in timed_out {
                            if let Some((_, mut entry)) = self.pending_acks.remove(&sequence) {
                                entry.attempts += 1;
                                self.retry_queue.insert(sequence, entry);
                            }
                        }

                        let retries: Vec<PendingEntry> = self.retry_queue.iter().map(|e| e.value().clone()).collect();
                        for mut entry in retries {
                            self.network
                                .broadcast_message(&PeerMessage::WalEntry { record: entry.record.clone() })
                                .await;
                            entry.sent_at = tokio::time::Instant::now();
                            self.pending_acks.insert(entry.record.sequence_number, entry.clone());
                            self.retry_queue.remove(&entry.record.sequence_number);
                        }
                    }
                }
            }
        })
    }

    /// Handle an incoming WAL_ENTRY as a follower. A contiguous record
    /// is applied directly; a gap issues a `SyncRequest` for the
    /// missing range and drops this record (it will arrive again in
    /// the resulting sync batch).
    pub async fn handle_wal_entry(&self, leader: &NodeId, record: WalRecord) -> Result<()> {
        let expected = self.wal.durable_upto() + 1;
        if record.sequence_number == expected {
            let sequence = record.sequence_number;
            self.wal.write_replicated(record).await?;
            self.network
                .send_message(leader, &PeerMessage::Ack { sequence })
                .await?;
        } else if record.sequence_number > expected {
            self.network
                .send_message(leader, &PeerMessage::SyncRequest { from_sequence: expected })
                .await?;
        }
        // record.sequence_number < expected: already applied, ignore.
        Ok(())
    }

    /// Service a follower's `SyncRequest` as leader: stream
    /// `config.batch_size`-sized batches until the follower is caught
    /// up.
    pub async fn handle_sync_request(&self, follower: &NodeId, from_sequence: SequenceNumber) -> Result<()> {
        let all = self.wal.read_entries(from_sequence)?;
        if all.is_empty() {
            self.network
                .send_message(follower, &PeerMessage::SyncBatch { records: Vec::new(), has_more: false })
                .await?;
            return Ok(());
        }

        for chunk in all.chunks(self.config.batch_size) {
            let has_more = chunk.last().map(|r| r.sequence_number) < all.last().map(|r| r.sequence_number);
            self.network
                .send_message(
                    follower,
                    &PeerMessage::SyncBatch {
                        records: chunk.to_vec(),
                        has_more,
                    },
                )
                .await?;
        }
        Ok(())
    }

    /// Apply a `SyncBatch` received as a follower catching up.
    pub async fn handle_sync_batch(&self, records: Vec<WalRecord>) -> Result<()> {
        for record in records {
            self.wal.write_replicated(record).await?;
        }
        Ok(())
    }

    pub async fn send_heartbeats(&self) -> Result<()> {
        self.network
            .broadcast_message(&PeerMessage::Heartbeat {
                node_id: self.node_id.clone(),
                term: 0,
            })
            .await;
        Ok(())
    }

    pub fn spawn_heartbeat_loop(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        let interval = self.config.heartbeat_interval();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                if self.role() == Role::Leader {
                    if let Err(err) = self.send_heartbeats().await {
                        tracing::warn!(error = %err, "heartbeat broadcast failed");
                    }
                }
            }
        })
    }
}
