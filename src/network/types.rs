// Peer network wire messages (spec.md §4.G).
//
// The Raft-shaped election/replication messages mirror the teacher's
// `networking::membership::raft::{election, replication}` request
// structs; they are carried here as one pluggable message variant
// rather than wired to a full consensus implementation, per the
// spec's explicit scoping of clustering to a pluggable module.

use serde::{Deserialize, Serialize};

use crate::common::NodeId;
use crate::wal::record::WalRecord;

pub type Term = u64;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteRequest {
    pub term: Term,
    pub candidate_id: NodeId,
    pub last_log_index: u64,
    pub last_log_term: Term,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteResponse {
    pub term: Term,
    pub vote_granted: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntries {
    pub term: Term,
    pub leader_id: NodeId,
    pub prev_log_index: u64,
    pub prev_log_term: Term,
    pub entries: Vec<WalRecord>,
    pub leader_commit: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppendEntriesAck {
    pub term: Term,
    pub success: bool,
    pub match_index: u64,
}

/// Every message exchanged between cluster peers (spec.md §4.G).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum PeerMessage {
    Handshake {
        node_id: NodeId,
        protocol_version: u32,
    },
    HandshakeAck {
        node_id: NodeId,
        protocol_version: u32,
        accepted: bool,
    },
    Heartbeat {
        node_id: NodeId,
        term: Term,
    },
    WalEntry {
        record: WalRecord,
    },
    Ack {
        sequence: crate::common::SequenceNumber,
    },
    SyncRequest {
        from_sequence: crate::common::SequenceNumber,
    },
    SyncBatch {
        records: Vec<WalRecord>,
        has_more: bool,
    },
    VoteRequest(VoteRequest),
    VoteResponse(VoteResponse),
    AppendEntries(AppendEntries),
    AppendEntriesAck(AppendEntriesAck),
}

/// Connection-lifecycle events a `PeerNetwork` emits locally (spec.md
/// §4.G: `nodeConnected`/`nodeDisconnected`/`nodeError`). Unlike
/// `PeerMessage`, these never cross the wire — they describe the state
/// of a connection to this node, not something a peer sent.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    NodeConnected(NodeId),
    NodeDisconnected(NodeId),
    NodeError { peer: NodeId, message: String },
}
