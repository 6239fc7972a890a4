// Node & cluster role state (spec.md §4.G/§4.H).

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

use crate::common::{NodeId, SequenceNumber};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Leader,
    Follower,
    Candidate,
}

impl Role {
    fn as_u8(self) -> u8 {
        match self {
            Role::Leader => 0,
            Role::Follower => 1,
            Role::Candidate => 2,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            0 => Role::Leader,
            2 => Role::Candidate,
            _ => Role::Follower,
        }
    }
}

/// Atomically-readable role cell shared between the replication
/// manager and any peer-network callback that needs to check it
/// without taking a lock.
pub struct RoleCell(AtomicU8);

impl RoleCell {
    pub fn new(role: Role) -> Self {
        Self(AtomicU8::new(role.as_u8()))
    }

    pub fn get(&self) -> Role {
        Role::from_u8(self.0.load(Ordering::SeqCst))
    }

    pub fn set(&self, role: Role) {
        self.0.store(role.as_u8(), Ordering::SeqCst);
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplicationStatus {
    pub node_id: NodeId,
    pub role: Role,
    pub durable_upto: SequenceNumber,
    pub known_peers: Vec<NodeId>,
    pub peer_match_index: Vec<(NodeId, SequenceNumber)>,
}
