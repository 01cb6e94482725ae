//! Transport Facade (§4.5)
//!
//! `Transport` is the seam between the consensus engine and whatever
//! carries its RPCs. This crate ships one implementation,
//! [`LocalTransport`], which dispatches directly to in-process
//! [`crate::replica::Replica`] handles, the same shape as the teacher's
//! `ByzantineNetwork`, which simulates a network of peers without real
//! sockets. A real binding (tonic, gRPC) is a second implementation of
//! the same trait and is out of scope here.
//!
//! `PbftClient` wraps a `Transport` with the one piece of client-side
//! policy the protocol needs: `submit_client_request` falls back across
//! the default port range when it hits a transport-level failure.
//! Forwarding a request application-side to a different primary, or a
//! peer replying that it isn't alive, never goes through this path.
//! Those are ordinary, successful RPC round trips carrying a rejection
//! in-band.

use std::sync::{Arc, Weak};
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{debug, warn};

use crate::config::DEFAULT_PORT_RANGE;
use crate::errors::TransportError;
use crate::messages::{
    Ack, ClientReply, ClientRequest, CommitRequest, PingReply, PrePrepareRequest, PrepareRequest,
    SetViewRequest, StatusReply,
};
use crate::replica::Replica;
use crate::NodeId;

/// The eight RPCs a replica's consensus engine exposes to peers and
/// clients (§6). Every call carries its own deadline; a transport that
/// cannot answer in time returns [`TransportError::DeadlineExceeded`]
/// rather than blocking forever.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn ping(&self, target: NodeId, deadline: Duration) -> Result<PingReply, TransportError>;

    async fn submit_client_request(
        &self,
        target: NodeId,
        request: ClientRequest,
        deadline: Duration,
    ) -> Result<ClientReply, TransportError>;

    async fn pre_prepare(
        &self,
        target: NodeId,
        request: PrePrepareRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError>;

    async fn prepare(
        &self,
        target: NodeId,
        request: PrepareRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError>;

    async fn commit(
        &self,
        target: NodeId,
        request: CommitRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError>;

    async fn set_view(
        &self,
        target: NodeId,
        request: SetViewRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError>;

    async fn get_status(
        &self,
        target: NodeId,
        deadline: Duration,
    ) -> Result<StatusReply, TransportError>;

    async fn kill_node(&self, target: NodeId, deadline: Duration) -> Result<Ack, TransportError>;
}

/// An in-process transport backed by a registry of weak replica handles.
///
/// Holding `Weak` (rather than `Arc`) avoids a reference cycle: each
/// `Replica` holds this transport (to call out to its peers) while the
/// transport holds every replica (to dispatch inbound calls).
///
/// Two independent failure surfaces are modeled, matching the original
/// system's split between an RPC transport failure and an in-band
/// application reply: a node can be *registered but marked down*
/// (`set_down`, used to drive fallback-path tests) or simply *not yet
/// registered* (`TransportError::UnknownPeer`). Neither is the same as
/// the replica's own `alive` flag, which produces an ordinary `Ack`
/// carrying `ReplicaError::NotAlive` instead of a transport error.
#[derive(Default)]
pub struct LocalTransport {
    replicas: DashMap<NodeId, Weak<Replica>>,
    down: DashMap<NodeId, ()>,
}

impl LocalTransport {
    pub fn new() -> Self {
        Self {
            replicas: DashMap::new(),
            down: DashMap::new(),
        }
    }

    /// Registers (or replaces) the handle a peer's RPCs are dispatched to.
    pub fn register(&self, id: NodeId, replica: Weak<Replica>) {
        self.replicas.insert(id, replica);
    }

    /// Marks `id` as transport-level unreachable, independent of its
    /// `alive` flag. Used to exercise the client fallback path.
    pub fn set_down(&self, id: NodeId, down: bool) {
        if down {
            self.down.insert(id, ());
        } else {
            self.down.remove(&id);
        }
    }

    fn resolve(&self, id: NodeId) -> Result<Arc<Replica>, TransportError> {
        if self.down.contains_key(&id) {
            return Err(TransportError::Unavailable(id));
        }
        self.replicas
            .get(&id)
            .and_then(|entry| entry.upgrade())
            .ok_or(TransportError::UnknownPeer(id))
    }

    async fn with_deadline<F, T>(target: NodeId, deadline: Duration, fut: F) -> Result<T, TransportError>
    where
        F: std::future::Future<Output = T>,
    {
        tokio::time::timeout(deadline, fut)
            .await
            .map_err(|_| TransportError::DeadlineExceeded(target, deadline))
    }
}

#[async_trait]
impl Transport for LocalTransport {
    async fn ping(&self, target: NodeId, deadline: Duration) -> Result<PingReply, TransportError> {
        let replica = self.resolve(target)?;
        Self::with_deadline(target, deadline, async move { replica.on_ping() }).await
    }

    async fn submit_client_request(
        &self,
        target: NodeId,
        request: ClientRequest,
        deadline: Duration,
    ) -> Result<ClientReply, TransportError> {
        let replica = self.resolve(target)?;
        Self::with_deadline(target, deadline, async move {
            replica.submit_client_request(request, deadline).await
        })
        .await
    }

    async fn pre_prepare(
        &self,
        target: NodeId,
        request: PrePrepareRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError> {
        let replica = self.resolve(target)?;
        Self::with_deadline(target, deadline, async move { replica.on_pre_prepare(request).await }).await
    }

    async fn prepare(
        &self,
        target: NodeId,
        request: PrepareRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError> {
        let replica = self.resolve(target)?;
        Self::with_deadline(target, deadline, async move { replica.on_prepare(request).await }).await
    }

    async fn commit(
        &self,
        target: NodeId,
        request: CommitRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError> {
        let replica = self.resolve(target)?;
        Self::with_deadline(target, deadline, async move { replica.on_commit(request) }).await
    }

    async fn set_view(
        &self,
        target: NodeId,
        request: SetViewRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError> {
        let replica = self.resolve(target)?;
        Self::with_deadline(target, deadline, async move { replica.on_set_view(request) }).await
    }

    async fn get_status(
        &self,
        target: NodeId,
        deadline: Duration,
    ) -> Result<StatusReply, TransportError> {
        let replica = self.resolve(target)?;
        Self::with_deadline(target, deadline, async move { replica.on_get_status() }).await
    }

    async fn kill_node(&self, target: NodeId, deadline: Duration) -> Result<Ack, TransportError> {
        let replica = self.resolve(target)?;
        Self::with_deadline(target, deadline, async move { replica.on_kill_node() }).await
    }
}

/// Client-side wrapper adding the one piece of retry policy the
/// protocol calls for: falling back across the default port range when
/// `submit_client_request` hits a transport failure.
pub struct PbftClient {
    transport: Arc<dyn Transport>,
}

impl PbftClient {
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self { transport }
    }

    pub async fn ping(&self, target: NodeId, deadline: Duration) -> Result<PingReply, TransportError> {
        self.transport.ping(target, deadline).await
    }

    pub async fn pre_prepare(
        &self,
        target: NodeId,
        request: PrePrepareRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError> {
        self.transport.pre_prepare(target, request, deadline).await
    }

    pub async fn prepare(
        &self,
        target: NodeId,
        request: PrepareRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError> {
        self.transport.prepare(target, request, deadline).await
    }

    pub async fn commit(
        &self,
        target: NodeId,
        request: CommitRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError> {
        self.transport.commit(target, request, deadline).await
    }

    pub async fn set_view(
        &self,
        target: NodeId,
        request: SetViewRequest,
        deadline: Duration,
    ) -> Result<Ack, TransportError> {
        self.transport.set_view(target, request, deadline).await
    }

    pub async fn get_status(
        &self,
        target: NodeId,
        deadline: Duration,
    ) -> Result<StatusReply, TransportError> {
        self.transport.get_status(target, deadline).await
    }

    pub async fn kill_node(&self, target: NodeId, deadline: Duration) -> Result<Ack, TransportError> {
        self.transport.kill_node(target, deadline).await
    }

    /// Submits to `preferred`; on a retryable transport failure, tries
    /// every other node address in the default port range before giving
    /// up. An application-level rejection (a successful RPC whose
    /// `ClientReply.error` is non-empty) is returned immediately. It is
    /// not grounds for trying another address.
    pub async fn submit_client_request(
        &self,
        preferred: NodeId,
        request: ClientRequest,
        deadline: Duration,
    ) -> Result<ClientReply, TransportError> {
        match self
            .transport
            .submit_client_request(preferred, request.clone(), deadline)
            .await
        {
            Ok(reply) => Ok(reply),
            Err(err) if err.is_retryable() => {
                warn!(%preferred, %err, "client request transport failure, falling back across port range");
                self.fallback(preferred, request, deadline, err).await
            }
            Err(err) => Err(err),
        }
    }

    async fn fallback(
        &self,
        preferred: NodeId,
        request: ClientRequest,
        deadline: Duration,
        mut last_err: TransportError,
    ) -> Result<ClientReply, TransportError> {
        for port in DEFAULT_PORT_RANGE {
            let candidate = NodeId((port - 5000) as u32);
            if candidate == preferred {
                continue;
            }
            debug!(%candidate, "trying fallback address");
            match self
                .transport
                .submit_client_request(candidate, request.clone(), deadline)
                .await
            {
                Ok(reply) => return Ok(reply),
                Err(err) if err.is_retryable() => {
                    last_err = err;
                    continue;
                }
                Err(err) => return Err(err),
            }
        }
        Err(last_err)
    }
}
