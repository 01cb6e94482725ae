//! Request digesting
//!
//! A digest binds a PRE-PREPARE/PREPARE/COMMIT triple to one client
//! request. It is a content hash, not a MAC: replicas are identified by
//! integer IDs on a trusted channel and no signature scheme is in scope.

use sha2::{Digest, Sha256};

/// Hex-encodes `client_id | request_id | payload` under SHA-256.
///
/// Depends only on those three fields: two requests with the same
/// triple always hash to the same digest, regardless of timestamp or
/// forwarding flag.
pub fn digest(client_id: &str, request_id: &str, payload: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(client_id.as_bytes());
    hasher.update(b"|");
    hasher.update(request_id.as_bytes());
    hasher.update(b"|");
    hasher.update(payload.as_bytes());
    encode_hex(&hasher.finalize())
}

/// Byzantine replicas corrupt an outgoing digest by appending `:byz`.
pub fn corrupt(digest: &str) -> String {
    format!("{digest}:byz")
}

fn encode_hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
