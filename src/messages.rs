//! Wire message shapes (§6)
//!
//! These are the opaque request/reply payloads the `Transport` trait
//! carries. Shapes match spec.md §6 field-for-field; serde derives are
//! kept (as the teacher derives them on its own protocol messages) so a
//! real wire binding can serialize them without touching this module.

use crate::NodeId;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientRequest {
    pub client_id: String,
    pub request_id: String,
    pub timestamp_ms: i64,
    pub payload: String,
    pub forwarded: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ClientReply {
    pub client_id: String,
    pub request_id: String,
    pub replica_id: NodeId,
    pub view: u64,
    pub seq: u64,
    pub committed: bool,
    pub result: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrePrepareRequest {
    pub view: u64,
    pub seq: u64,
    pub digest: String,
    pub primary_id: NodeId,
    pub request: ClientRequest,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PrepareRequest {
    pub view: u64,
    pub seq: u64,
    pub digest: String,
    pub replica_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CommitRequest {
    pub view: u64,
    pub seq: u64,
    pub digest: String,
    pub replica_id: NodeId,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SetViewRequest {
    pub view: u64,
    pub sender_id: NodeId,
    pub reason: String,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum Role {
    Primary,
    Replica,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::Primary => write!(f, "Primary"),
            Role::Replica => write!(f, "Replica"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StatusReply {
    pub node_id: NodeId,
    pub role: Role,
    pub view: u64,
    pub alive: bool,
    pub primary_id: NodeId,
    pub f: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Ack {
    pub ok: bool,
    pub error: String,
}

impl Ack {
    pub fn ok() -> Self {
        Self {
            ok: true,
            error: String::new(),
        }
    }

    pub fn ok_with(error: impl Into<String>) -> Self {
        Self {
            ok: true,
            error: error.into(),
        }
    }

    pub fn reject(error: impl ToString) -> Self {
        Self {
            ok: false,
            error: error.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PingReply {
    pub message: String,
}
