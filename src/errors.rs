//! Error taxonomy for the PBFT simulator
//!
//! Two concerns are kept distinct, matching the transport/application
//! split the protocol itself relies on (§7): `TransportError` covers
//! failures to even reach a peer, while `ReplicaError` supplies the
//! `error` strings embedded in `Ack`/`ClientReply` once a peer *did*
//! answer. Application errors are never thrown across the RPC boundary;
//! they're rendered to a string and carried in-band.

use crate::NodeId;
use std::time::Duration;
use thiserror::Error;

/// Rejections a replica can report on `Ack`/`ClientReply`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ReplicaError {
    #[error("node is not alive")]
    NotAlive,

    #[error("wrong view")]
    WrongView,

    #[error("wrong primary")]
    WrongPrimary,

    #[error("digest mismatch")]
    DigestMismatch,

    #[error("buffered")]
    Buffered,

    #[error("ignored (already executed)")]
    IgnoredExecuted,

    #[error("ignored (not higher)")]
    IgnoredNotHigher,

    #[error("forward to primary failed: {0}")]
    ForwardFailed(String),

    #[error("not primary (primary_id={primary_id})")]
    NotPrimary { primary_id: NodeId },

    #[error("byzantine primary: sent chaotic PRE-PREPARE (no commit expected)")]
    ByzantinePrimary,

    #[error("request entry missing")]
    EntryMissing,

    #[error("client deadline exceeded before commit")]
    Timeout,
}

impl ReplicaError {
    /// Whether this rejection is evidence of a misbehaving primary, i.e.
    /// it is meaningful input to the view-change threshold.
    pub fn is_adversary_evidence(&self) -> bool {
        matches!(self, ReplicaError::DigestMismatch)
    }
}

/// Transport-layer failures, distinct from an application-level `Ack.error`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("peer {0} is unavailable")]
    Unavailable(NodeId),

    #[error("call to peer {0} exceeded its {1:?} deadline")]
    DeadlineExceeded(NodeId, Duration),

    #[error("no transport route to peer {0}")]
    UnknownPeer(NodeId),
}

impl TransportError {
    /// Whether a client forwarding/fallback path should keep trying other
    /// addresses after this failure (mirrors a check against
    /// `grpc.StatusCode.UNAVAILABLE` / `DEADLINE_EXCEEDED` in the original).
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            TransportError::Unavailable(_) | TransportError::DeadlineExceeded(..)
        )
    }
}

/// Raised while assembling a `ClusterConfig` from bootstrap parameters.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid replica set: n={n} is not of the form 3f+1")]
    InvalidReplicaCount { n: usize },

    #[error("node_id {0} must be >= 1")]
    InvalidNodeId(NodeId),
}
