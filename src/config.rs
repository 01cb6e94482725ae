//! Cluster membership and quorum sizing
//!
//! Grounded on the teacher's `protocols::pbft::PBFTConfig`, generalized
//! from a single `total_nodes` count to the replica-set shape spec.md
//! describes: a `node_id` plus a `peers` list, validated as `n = 3f+1`.

use std::time::Duration;

use crate::errors::ConfigError;
use crate::NodeId;

/// Default port range used by the simulator's own client-forwarding
/// fallback (§4.5, §6). A simulator artifact, not a protocol constant.
pub const DEFAULT_PORT_RANGE: std::ops::RangeInclusive<u16> = 5001..=5010;

/// Deadline for PRE-PREPARE/PREPARE/COMMIT multicasts (§5).
pub const MULTICAST_DEADLINE: Duration = Duration::from_millis(500);

/// Deadline for a SET-VIEW broadcast (§5).
pub const SET_VIEW_DEADLINE: Duration = Duration::from_millis(500);

/// Deadline for a liveness ping against a candidate primary (§5).
pub const PING_DEADLINE: Duration = Duration::from_millis(400);

/// Default deadline a client waits for its own request to commit (§5).
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(30);

/// Static membership and quorum arithmetic for one replica.
#[derive(Debug, Clone)]
pub struct ClusterConfig {
    node_id: NodeId,
    replicas: Vec<NodeId>,
}

impl ClusterConfig {
    /// Builds the replica set as `{node_id} ∪ peers`, sorted, and
    /// validates `n = 3f + 1`.
    pub fn new(node_id: NodeId, peers: Vec<NodeId>) -> Result<Self, ConfigError> {
        if node_id.0 < 1 {
            return Err(ConfigError::InvalidNodeId(node_id));
        }

        let mut replicas: Vec<NodeId> = peers;
        replicas.push(node_id);
        replicas.sort_unstable();
        replicas.dedup();

        let n = replicas.len();
        let f = Self::f_for(n);
        if 3 * f + 1 != n {
            return Err(ConfigError::InvalidReplicaCount { n });
        }

        Ok(Self { node_id, replicas })
    }

    fn f_for(n: usize) -> usize {
        n.saturating_sub(1) / 3
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn replicas(&self) -> &[NodeId] {
        &self.replicas
    }

    pub fn peers(&self) -> impl Iterator<Item = NodeId> + '_ {
        self.replicas.iter().copied().filter(move |&id| id != self.node_id)
    }

    pub fn n(&self) -> usize {
        self.replicas.len()
    }

    pub fn f(&self) -> usize {
        Self::f_for(self.n())
    }

    /// `sorted(replicas)[view mod n]`
    pub fn primary_id(&self, view: u64) -> NodeId {
        let idx = (view as usize) % self.replicas.len();
        self.replicas[idx]
    }

    pub fn is_primary(&self, view: u64) -> bool {
        self.primary_id(view) == self.node_id
    }

    /// Count of distinct non-primary PREPAREs required (§3): `2f`.
    pub fn quorum_prepare(&self) -> usize {
        2 * self.f()
    }

    /// Count of distinct COMMITs required, including one's own (§3): `2f + 1`.
    pub fn quorum_commit(&self) -> usize {
        2 * self.f() + 1
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_non_3f_plus_1_counts() {
        let err = ClusterConfig::new(NodeId(1), vec![NodeId(2), NodeId(3)]).unwrap_err();
        assert_eq!(err, ConfigError::InvalidReplicaCount { n: 3 });
    }

    #[test]
    fn accepts_four_nodes_with_f_one() {
        let cfg = ClusterConfig::new(NodeId(1), vec![NodeId(2), NodeId(3), NodeId(4)]).unwrap();
        assert_eq!(cfg.n(), 4);
        assert_eq!(cfg.f(), 1);
        assert_eq!(cfg.quorum_prepare(), 2);
        assert_eq!(cfg.quorum_commit(), 3);
    }

    #[test]
    fn primary_rotates_by_view_mod_n() {
        let cfg = ClusterConfig::new(NodeId(1), vec![NodeId(2), NodeId(3), NodeId(4)]).unwrap();
        assert_eq!(cfg.primary_id(0), NodeId(1));
        assert_eq!(cfg.primary_id(1), NodeId(2));
        assert_eq!(cfg.primary_id(4), NodeId(1));
    }

    #[test]
    fn self_is_excluded_from_peers() {
        let cfg = ClusterConfig::new(NodeId(1), vec![NodeId(2), NodeId(3), NodeId(4)]).unwrap();
        let peers: Vec<_> = cfg.peers().collect();
        assert_eq!(peers, vec![NodeId(2), NodeId(3), NodeId(4)]);
    }
}
