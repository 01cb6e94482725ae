//! Adversary model (§4.3)
//!
//! The wire contract keeps Byzantine behavior as a single `byzantine:
//! bool` flag on a replica (§3, §6 bootstrap contract). Internally that
//! flag selects a `Strategy` object at construction time instead of
//! conditionals sprinkled through the consensus engine, the tagged
//! variant the Design Notes ask for, grounded in the same
//! strategy-object shape the teacher uses for its own adversary
//! (`network::ByzantineConfig` selecting loss/delay/corruption
//! behavior), here made an explicit trait so `Replica` just holds a
//! `Box<dyn Strategy>` and calls it without knowing which variant it got.

use std::fmt;

use rand::Rng;

use crate::digest;
use crate::messages::ClientRequest;
use crate::messages::PrePrepareRequest;
use crate::NodeId;

/// Per-replica adversarial behavior, selected once at construction.
pub trait Strategy: Send + Sync + fmt::Debug {
    /// Whether this replica is in Byzantine mode at all.
    fn is_byzantine(&self) -> bool;

    /// Corrupts an outgoing PREPARE/COMMIT digest before it is sent.
    /// Honest replicas pass the digest through unchanged.
    fn outgoing_digest(&self, digest: &str) -> String;
}

#[derive(Debug, Default)]
pub struct Honest;

impl Strategy for Honest {
    fn is_byzantine(&self) -> bool {
        false
    }

    fn outgoing_digest(&self, digest: &str) -> String {
        digest.to_string()
    }
}

#[derive(Debug, Default)]
pub struct Byzantine;

impl Strategy for Byzantine {
    fn is_byzantine(&self) -> bool {
        true
    }

    fn outgoing_digest(&self, digest: &str) -> String {
        crate::digest::corrupt(digest)
    }
}

/// Selects the strategy object implied by the bootstrap `byzantine` flag.
pub fn strategy_for(byzantine: bool) -> Box<dyn Strategy> {
    if byzantine {
        Box::new(Byzantine)
    } else {
        Box::new(Honest)
    }
}

/// One of the two chaos variants a Byzantine primary picks per peer (§4.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ChaosMode {
    WrongDigest,
    MutatedPayload,
}

/// Builds the per-peer chaotic PRE-PREPARE a Byzantine primary sends
/// instead of the well-formed one. `client_id`, `request_id`,
/// `timestamp_ms`, and `forwarded` are preserved either way.
pub fn chaos_pre_prepare(
    base_request: &ClientRequest,
    view: u64,
    seq: u64,
    primary_id: NodeId,
    peer_id: NodeId,
) -> PrePrepareRequest {
    let mode = if rand::thread_rng().gen_bool(0.5) {
        ChaosMode::WrongDigest
    } else {
        ChaosMode::MutatedPayload
    };

    match mode {
        ChaosMode::WrongDigest => {
            let correct = digest::digest(
                &base_request.client_id,
                &base_request.request_id,
                &base_request.payload,
            );
            PrePrepareRequest {
                view,
                seq,
                digest: digest::corrupt(&correct),
                primary_id,
                request: base_request.clone(),
            }
        }
        ChaosMode::MutatedPayload => {
            let salt: u32 = rand::thread_rng().gen_range(1..=1_000_000);
            let mutated_payload = format!("{}|BYZ:{}:{}", base_request.payload, peer_id, salt);
            let mutated = ClientRequest {
                client_id: base_request.client_id.clone(),
                request_id: base_request.request_id.clone(),
                timestamp_ms: base_request.timestamp_ms,
                payload: mutated_payload,
                forwarded: base_request.forwarded,
            };
            let mutated_digest =
                digest::digest(&mutated.client_id, &mutated.request_id, &mutated.payload);
            PrePrepareRequest {
                view,
                seq,
                digest: mutated_digest,
                primary_id,
                request: mutated,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn honest_strategy_passes_digest_through() {
        let s = strategy_for(false);
        assert!(!s.is_byzantine());
        assert_eq!(s.outgoing_digest("abc"), "abc");
    }

    #[test]
    fn byzantine_strategy_corrupts_digest() {
        let s = strategy_for(true);
        assert!(s.is_byzantine());
        assert_eq!(s.outgoing_digest("abc"), "abc:byz");
    }

    #[test]
    fn chaos_pre_prepare_preserves_client_identity() {
        let base = ClientRequest {
            client_id: "c1".into(),
            request_id: "r1".into(),
            timestamp_ms: 42,
            payload: "p".into(),
            forwarded: false,
        };
        let chaos = chaos_pre_prepare(&base, 0, 1, NodeId(1), NodeId(2));
        assert_eq!(chaos.request.client_id, base.client_id);
        assert_eq!(chaos.request.request_id, base.request_id);
        assert_eq!(chaos.request.timestamp_ms, base.timestamp_ms);
        assert_eq!(chaos.request.forwarded, base.forwarded);
    }

    #[test]
    fn chaos_pre_prepare_never_matches_the_honest_digest() {
        let base = ClientRequest {
            client_id: "c1".into(),
            request_id: "r1".into(),
            timestamp_ms: 42,
            payload: "p".into(),
            forwarded: false,
        };
        let honest_digest = digest::digest(&base.client_id, &base.request_id, &base.payload);
        for _ in 0..20 {
            let chaos = chaos_pre_prepare(&base, 0, 1, NodeId(1), NodeId(2));
            if chaos.request.payload == base.payload {
                // wrong_digest variant: payload matches but the digest must not.
                assert_ne!(chaos.digest, honest_digest);
            } else {
                // mutated_payload variant: digest matches the mutated request,
                // which is exactly why honest peers reject it too.
                let expected =
                    digest::digest(&chaos.request.client_id, &chaos.request.request_id, &chaos.request.payload);
                assert_eq!(chaos.digest, expected);
                assert_ne!(chaos.digest, honest_digest);
            }
        }
    }
}
