//! Peer Network transport (spec.md §4.G).
//!
//! | module   | contents                                                   |
//! |----------|-------------------------------------------------------------|
//! | `types`  | `PeerMessage` and the Raft-shaped vote/append-entries payloads |
//! | `codec`  | length-framed encode/decode over any `AsyncRead`/`AsyncWrite` |
//! | `peer`   | `PeerNetwork`: TCP transport, handshake, heartbeat watchdog |

pub mod codec;
pub mod peer;
pub mod types;

pub use peer::PeerNetwork;
pub use types::{AppendEntries, AppendEntriesAck, NetworkEvent, PeerMessage, Term, VoteRequest, VoteResponse};
