// Replicated WAL (spec.md §4.H): composes a local `WalEngine` with a
// `ReplicationManager` so callers see one `write_entry` call that both
// durably appends locally and propagates to the cluster, and so
// recovery can resync any local gap against the leader before serving
// reads.

use std::sync::Arc;

use crate::common::SequenceNumber;
use crate::error::Result;
use crate::network::types::PeerMessage;
use crate::replication::cluster::Role;
use crate::replication::manager::ReplicationManager;
use crate::wal::engine::WalEngine;
use crate::wal::record::PendingRecord;

pub struct ReplicatedWal {
    wal: Arc<WalEngine>,
    replication: Arc<ReplicationManager>,
}

impl ReplicatedWal {
    pub fn new(wal: Arc<WalEngine>, replication: Arc<ReplicationManager>) -> Self {
        Self { wal, replication }
    }

    /// Append locally and, if this node is leader, replicate to the
    /// cluster per the configured sync mode.
    pub async fn write_entry(&self, pending: PendingRecord) -> Result<SequenceNumber> {
        let sequence = self.wal.write_entry(pending).await?;
        if self.replication.role() == Role::Leader {
            let record = self
                .wal
                .read_entries(sequence)?
                .into_iter()
                .find(|r| r.sequence_number == sequence)
                .expect("just-written record must be readable");
            self.replication.replicate(record).await?;
        }
        Ok(sequence)
    }

    /// Drive inbound peer messages relevant to replication. Intended
    /// to be called from the node's message dispatch loop for every
    /// message read off `PeerNetwork::on_message`.
    pub async fn handle_peer_message(&self, peer: &crate::common::NodeId, message: PeerMessage) -> Result<()> {
        match message {
            PeerMessage::WalEntry { record } => self.replication.handle_wal_entry(peer, record).await,
            PeerMessage::SyncRequest { from_sequence } => {
                self.replication.handle_sync_request(peer, from_sequence).await
            }
            PeerMessage::SyncBatch { records, .. } => self.replication.handle_sync_batch(records).await,
            _ => Ok(()),
        }
    }

    /// Called after local recovery completes: ask `leader` to catch
    /// this node up from the last durable sequence before accepting
    /// new writes. The resulting `SyncBatch` arrives asynchronously
    /// through `handle_peer_message`.
    pub async fn sync_with_cluster(&self, network: &crate::network::peer::PeerNetwork, leader: &crate::common::NodeId) -> Result<()> {
        let from_sequence = self.wal.durable_upto() + 1;
        network
            .send_message(leader, &PeerMessage::SyncRequest { from_sequence })
            .await
    }

    pub fn wal(&self) -> &Arc<WalEngine> {
        &self.wal
    }

    pub fn replication(&self) -> &Arc<ReplicationManager> {
        &self.replication
    }
}
