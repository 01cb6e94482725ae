//! A pedagogical simulator for Practical Byzantine Fault Tolerance.
//!
//! A cluster of `n = 3f + 1` replicas runs the three-phase PRE-PREPARE /
//! PREPARE / COMMIT protocol over an in-process transport, with an
//! adversary model (Byzantine primaries and replicas) and a simplified,
//! monotonic view change. It is built to make the protocol's state
//! machine and failure modes observable and testable, not to survive
//! production traffic.
//!
//! # Layout
//!
//! - [`config`]: cluster membership and quorum arithmetic.
//! - [`digest`]: the content-hash binding a request to its consensus slot.
//! - [`messages`]: wire message shapes carried by [`transport::Transport`].
//! - [`state`]: per-replica mutable state, held behind one mutex.
//! - [`adversary`]: the Byzantine/honest strategy selected at construction.
//! - [`transport`]: the transport abstraction and its in-process simulator.
//! - [`replica`]: the consensus engine itself.
//! - [`view`]: view-change bookkeeping.
//! - [`errors`]: the application/transport error taxonomies.

pub mod adversary;
pub mod config;
pub mod digest;
pub mod errors;
pub mod messages;
pub mod replica;
pub mod state;
pub mod transport;
pub mod view;

pub use config::ClusterConfig;
pub use errors::{ReplicaError, TransportError};
pub use replica::Replica;
pub use transport::{LocalTransport, PbftClient, Transport};

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifies one replica. Replicas are ordered by this value to derive
/// the primary for a given view (`sorted(replicas)[view mod n]`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NodeId(pub u32);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "N{}", self.0)
    }
}
