//! The consensus engine (§4.1, §4.2)
//!
//! `Replica` owns one node's entire mutable state behind a single
//! `std::sync::Mutex` (§5). There is one lock for the whole replica,
//! not one per log entry, matching the teacher's own single-writer
//! state-machine style in `protocols/pbft.rs`. RPC fan-out to peers
//! happens with the lock released; a primary awaiting its own commit
//! parks on the target entry's `Notify` rather than polling.
//!
//! A PREPARE or COMMIT a replica "sends" also gets counted locally by
//! calling its own handler directly, the same way it would handle an
//! inbound RPC from a peer (§4.2). That local call is what lets a
//! backup's own vote count toward quorum. Since every replica's peer
//! list includes the primary, it is also how the primary accumulates
//! its own entry's PREPAREs and COMMITs, without ever calling
//! `on_pre_prepare` on itself.

use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, info, warn};

use crate::adversary::{self, Strategy};
use crate::config::{ClusterConfig, MULTICAST_DEADLINE};
use crate::digest;
use crate::errors::ReplicaError;
use crate::messages::{
    Ack, ClientReply, ClientRequest, CommitRequest, PingReply, PrePrepareRequest, PrepareRequest,
    Role, SetViewRequest, StatusReply,
};
use crate::state::{LogEntry, LogEntrySnapshot, ReplicaState};
use crate::transport::Transport;
use crate::NodeId;

pub struct Replica {
    config: ClusterConfig,
    state: Mutex<ReplicaState>,
    strategy: Box<dyn Strategy>,
    transport: Arc<dyn Transport>,
}

impl Replica {
    pub fn new(config: ClusterConfig, byzantine: bool, transport: Arc<dyn Transport>) -> Arc<Self> {
        info!(
            node_id = %config.node_id(),
            n = config.n(),
            f = config.f(),
            byzantine,
            "replica starting"
        );
        Arc::new(Self {
            strategy: adversary::strategy_for(byzantine),
            state: Mutex::new(ReplicaState::new(byzantine)),
            config,
            transport,
        })
    }

    pub fn node_id(&self) -> NodeId {
        self.config.node_id()
    }

    pub fn config(&self) -> &ClusterConfig {
        &self.config
    }

    pub(crate) fn state_lock(&self) -> MutexGuard<'_, ReplicaState> {
        self.state.lock().expect("replica state mutex poisoned")
    }

    pub(crate) fn transport_handle(&self) -> Arc<dyn Transport> {
        Arc::clone(&self.transport)
    }

    /// Read-only view of one log entry, for tests and diagnostics.
    pub fn snapshot(&self, view: u64, seq: u64) -> Option<LogEntrySnapshot> {
        let state = self.state_lock();
        state.log.get(&(view, seq)).map(LogEntrySnapshot::from)
    }

    // -- simple, single-lock RPC handlers --------------------------------

    pub fn on_ping(&self) -> PingReply {
        PingReply {
            message: format!("pong from {}", self.config.node_id()),
        }
    }

    pub fn on_get_status(&self) -> StatusReply {
        let state = self.state_lock();
        let role = if self.config.is_primary(state.view) {
            Role::Primary
        } else {
            Role::Replica
        };
        StatusReply {
            node_id: self.config.node_id(),
            role,
            view: state.view,
            alive: state.alive,
            primary_id: self.config.primary_id(state.view),
            f: self.config.f(),
        }
    }

    /// Flips `alive` to false. The replica keeps answering RPCs, just
    /// with `ReplicaError::NotAlive`, which is distinct from being
    /// unreachable at the transport layer (§3, §4.5).
    pub fn on_kill_node(&self) -> Ack {
        let mut state = self.state_lock();
        state.alive = false;
        warn!(node_id = %self.config.node_id(), "node killed (alive=false)");
        Ack::ok()
    }

    /// Raises the local view if `req.view` is strictly higher. Always
    /// acknowledges; `error` carries "ignored (not higher)" when the
    /// view didn't move.
    pub fn on_set_view(&self, req: SetViewRequest) -> Ack {
        let mut state = self.state_lock();
        if !state.alive {
            return Ack::reject(ReplicaError::NotAlive);
        }
        if req.view > state.view {
            info!(
                from = %req.sender_id,
                new_view = req.view,
                reason = %req.reason,
                "adopting higher view via SET-VIEW"
            );
            state.view = req.view;
            Ack::ok()
        } else {
            Ack::ok_with(ReplicaError::IgnoredNotHigher.to_string())
        }
    }

    /// The preamble shared by the four protocol RPCs (§4.2): reject if
    /// not alive; adopt a strictly higher incoming view; reject if the
    /// (possibly just-adjusted) views still disagree.
    fn apply_preamble(&self, incoming_view: u64, phase: &str) -> Result<(), Ack> {
        let mut state = self.state_lock();
        if !state.alive {
            return Err(Ack::reject(ReplicaError::NotAlive));
        }
        if incoming_view > state.view {
            let reason = format!("observed higher view in {phase}");
            info!(new_view = incoming_view, %reason, "raising own view");
            state.view = incoming_view;
        }
        if incoming_view != state.view {
            return Err(Ack::reject(ReplicaError::WrongView));
        }
        Ok(())
    }

    // -- client entrypoint (§4.1) ----------------------------------------

    pub async fn submit_client_request(
        self: &Arc<Self>,
        request: ClientRequest,
        deadline: Duration,
    ) -> ClientReply {
        let (view, alive) = {
            let state = self.state_lock();
            (state.view, state.alive)
        };

        if !alive {
            return self.reply_error(&request, view, 0, ReplicaError::NotAlive);
        }

        if !self.config.is_primary(view) {
            return self.route_to_primary(request, view, deadline).await;
        }

        if self.strategy.is_byzantine() {
            return self.byzantine_pre_prepare_round(request, view).await;
        }

        self.honest_pre_prepare_round(request, view, deadline).await
    }

    /// Non-primary handling: loop prevention, then a bounded attempt to
    /// catch up to a live primary before forwarding (§4.1, §4.4).
    async fn route_to_primary(
        self: &Arc<Self>,
        request: ClientRequest,
        view: u64,
        deadline: Duration,
    ) -> ClientReply {
        if request.forwarded {
            return self.reply_error(
                &request,
                view,
                0,
                ReplicaError::NotPrimary {
                    primary_id: self.config.primary_id(view),
                },
            );
        }

        self.ensure_live_primary(self.config.n() as u64).await;

        let current_view = self.state_lock().view;
        if self.config.is_primary(current_view) {
            // Recursing through a boxed future breaks the otherwise
            // infinitely-sized async-fn cycle between this and
            // `submit_client_request`.
            return Box::pin(self.submit_client_request(request, deadline)).await;
        }

        self.forward_to_primary(request, current_view, deadline).await
    }

    async fn forward_to_primary(&self, mut request: ClientRequest, view: u64, deadline: Duration) -> ClientReply {
        let primary_id = self.config.primary_id(view);
        request.forwarded = true;
        debug!(%primary_id, "forwarding client request to primary");
        match self
            .transport
            .submit_client_request(primary_id, request.clone(), deadline)
            .await
        {
            Ok(reply) => reply,
            Err(err) => {
                self.reply_error(&request, view, 0, ReplicaError::ForwardFailed(err.to_string()))
            }
        }
    }

    async fn honest_pre_prepare_round(
        self: &Arc<Self>,
        request: ClientRequest,
        view: u64,
        deadline: Duration,
    ) -> ClientReply {
        let computed_digest = digest::digest(&request.client_id, &request.request_id, &request.payload);

        let (seq, done) = {
            let mut state = self.state_lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            let key = (view, seq);
            let pkey = (view, seq, computed_digest.clone());
            state.get_or_create_entry(
                key,
                &pkey,
                computed_digest.clone(),
                request.client_id.clone(),
                request.request_id.clone(),
                request.payload.clone(),
            );
            let done = state.log.get(&key).expect("just inserted").done.clone();
            (seq, done)
        };

        info!(view, seq, digest = %computed_digest, "primary broadcasting PRE-PREPARE");

        let primary_id = self.config.node_id();
        let fanout = self.config.peers().map(|peer| {
            let transport = self.transport_handle();
            let req = PrePrepareRequest {
                view,
                seq,
                digest: computed_digest.clone(),
                primary_id,
                request: request.clone(),
            };
            async move {
                if let Err(err) = transport.pre_prepare(peer, req, MULTICAST_DEADLINE).await {
                    warn!(%peer, %err, "PRE-PREPARE delivery failed");
                }
            }
        });
        join_all(fanout).await;

        let got_notified = tokio::time::timeout(deadline, done.notified()).await.is_ok();
        self.build_client_reply(&request.client_id, &request.request_id, view, seq, got_notified)
    }

    /// A Byzantine primary still creates its own (correctly digested)
    /// log entry, but sends every peer a chaotic PRE-PREPARE instead
    /// of the honest one, so it has no honest commit path coming and
    /// returns immediately (§4.1, §4.3).
    async fn byzantine_pre_prepare_round(
        self: &Arc<Self>,
        request: ClientRequest,
        view: u64,
    ) -> ClientReply {
        let computed_digest = digest::digest(&request.client_id, &request.request_id, &request.payload);

        let seq = {
            let mut state = self.state_lock();
            let seq = state.next_seq;
            state.next_seq += 1;
            let key = (view, seq);
            let pkey = (view, seq, computed_digest.clone());
            state.get_or_create_entry(
                key,
                &pkey,
                computed_digest.clone(),
                request.client_id.clone(),
                request.request_id.clone(),
                request.payload.clone(),
            );
            seq
        };

        warn!(view, seq, "byzantine primary broadcasting chaotic PRE-PREPARE");

        let primary_id = self.config.node_id();
        let fanout = self.config.peers().map(|peer| {
            let transport = self.transport_handle();
            let chaos = adversary::chaos_pre_prepare(&request, view, seq, primary_id, peer);
            async move {
                if let Err(err) = transport.pre_prepare(peer, chaos, MULTICAST_DEADLINE).await {
                    warn!(%peer, %err, "chaotic PRE-PREPARE delivery failed");
                }
            }
        });
        join_all(fanout).await;

        ClientReply {
            client_id: request.client_id,
            request_id: request.request_id,
            replica_id: self.config.node_id(),
            view,
            seq,
            committed: false,
            result: String::new(),
            error: ReplicaError::ByzantinePrimary.to_string(),
        }
    }

    // -- protocol RPCs (§4.2) ---------------------------------------------

    pub async fn on_pre_prepare(self: &Arc<Self>, req: PrePrepareRequest) -> Ack {
        if let Err(ack) = self.apply_preamble(req.view, "PRE-PREPARE") {
            return ack;
        }

        let expected_primary = self.config.primary_id(req.view);
        if req.primary_id != expected_primary {
            return Ack::reject(ReplicaError::WrongPrimary);
        }

        let expected_digest =
            digest::digest(&req.request.client_id, &req.request.request_id, &req.request.payload);
        if req.digest != expected_digest {
            debug!(view = req.view, seq = req.seq, "PRE-PREPARE digest doesn't match its own payload");
            self.broadcast_set_view(req.view + 1, "PRE-PREPARE digest mismatch").await;
            return Ack::reject(ReplicaError::DigestMismatch);
        }

        let key = (req.view, req.seq);
        {
            let mut state = self.state_lock();
            let pkey = (req.view, req.seq, req.digest.clone());
            state.get_or_create_entry(
                key,
                &pkey,
                req.digest.clone(),
                req.request.client_id.clone(),
                req.request.request_id.clone(),
                req.request.payload.clone(),
            );
        }

        debug!(view = req.view, seq = req.seq, digest = %req.digest, "accepted PRE-PREPARE, broadcasting PREPARE");

        let prepare = PrepareRequest {
            view: req.view,
            seq: req.seq,
            digest: self.strategy.outgoing_digest(&req.digest),
            replica_id: self.config.node_id(),
        };
        self.multicast_prepare(prepare).await;

        Ack::ok()
    }

    /// Locally counts this replica's own PREPARE, then fans it out to
    /// every peer. Since a replica's peer list always includes the
    /// primary, this is also how the primary's own entry accumulates
    /// PREPAREs without ever running `on_pre_prepare` on itself.
    async fn multicast_prepare(self: &Arc<Self>, prepare: PrepareRequest) {
        self.on_prepare(prepare.clone()).await;

        let fanout = self.config.peers().map(|peer| {
            let transport = self.transport_handle();
            let req = prepare.clone();
            async move {
                if let Err(err) = transport.prepare(peer, req, MULTICAST_DEADLINE).await {
                    warn!(%peer, %err, "PREPARE delivery failed");
                }
            }
        });
        join_all(fanout).await;
    }

    pub async fn on_prepare(self: &Arc<Self>, req: PrepareRequest) -> Ack {
        if let Err(ack) = self.apply_preamble(req.view, "PREPARE") {
            return ack;
        }

        let key = (req.view, req.seq);
        let pkey = (req.view, req.seq, req.digest.clone());

        let should_commit = {
            let mut state = self.state_lock();
            match state.log.get_mut(&key) {
                Some(entry) if entry.executed => {
                    return Ack::ok_with(ReplicaError::IgnoredExecuted.to_string());
                }
                Some(entry) if entry.digest == req.digest => {
                    entry.prepares.insert(req.replica_id);
                    let quorum = self.config.quorum_prepare();
                    if !entry.prepared && entry.prepares.len() >= quorum {
                        entry.prepared = true;
                        true
                    } else {
                        false
                    }
                }
                Some(_) => {
                    let error = ReplicaError::DigestMismatch;
                    if error.is_adversary_evidence() {
                        let conflicts = state.conflicting_prepares.entry(key).or_default();
                        conflicts.insert(req.replica_id);
                        if conflicts.len() >= self.config.f() + 1 {
                            warn!(view = req.view, seq = req.seq, "f+1 conflicting PREPAREs, suspecting primary");
                            drop(state);
                            self.broadcast_set_view(req.view + 1, "f+1 conflicting PREPAREs, suspect primary")
                                .await;
                        }
                    }
                    return Ack::reject(error);
                }
                None => {
                    state.pending_prepares.entry(pkey).or_default().insert(req.replica_id);
                    return Ack::ok_with(ReplicaError::Buffered.to_string());
                }
            }
        };

        if should_commit {
            debug!(view = req.view, seq = req.seq, "prepare quorum reached, broadcasting COMMIT");
            let commit = CommitRequest {
                view: req.view,
                seq: req.seq,
                digest: self.strategy.outgoing_digest(&req.digest),
                replica_id: self.config.node_id(),
            };
            self.multicast_commit(commit).await;
        }

        Ack::ok()
    }

    /// Symmetric to `multicast_prepare`: self-counts, then fans out to
    /// peers.
    async fn multicast_commit(self: &Arc<Self>, commit: CommitRequest) {
        let _ = self.on_commit(commit.clone());

        let fanout = self.config.peers().map(|peer| {
            let transport = self.transport_handle();
            let req = commit.clone();
            async move {
                if let Err(err) = transport.commit(peer, req, MULTICAST_DEADLINE).await {
                    warn!(%peer, %err, "COMMIT delivery failed");
                }
            }
        });
        join_all(fanout).await;
    }

    /// No conflict tracking on COMMIT (§4.2). A digest mismatch here is
    /// simply rejected, not recorded as view-change evidence.
    pub fn on_commit(&self, req: CommitRequest) -> Ack {
        if let Err(ack) = self.apply_preamble(req.view, "COMMIT") {
            return ack;
        }

        let key = (req.view, req.seq);
        let pkey = (req.view, req.seq, req.digest.clone());

        let mut state = self.state_lock();
        match state.log.get_mut(&key) {
            Some(entry) if entry.executed => Ack::ok_with(ReplicaError::IgnoredExecuted.to_string()),
            Some(entry) if entry.digest == req.digest => {
                entry.commits.insert(req.replica_id);
                let quorum = self.config.quorum_commit();
                if !entry.committed && entry.commits.len() >= quorum {
                    entry.committed = true;
                    Self::execute(entry);
                }
                Ack::ok()
            }
            Some(_) => Ack::reject(ReplicaError::DigestMismatch),
            None => {
                state.pending_commits.entry(pkey).or_default().insert(req.replica_id);
                Ack::ok_with(ReplicaError::Buffered.to_string())
            }
        }
    }

    /// Echo semantics: the result is the client's own payload, verbatim.
    fn execute(entry: &mut LogEntry) {
        entry.executed = true;
        entry.result = Some(entry.payload.clone());
        info!(view = entry.view, seq = entry.seq, "entry executed");
        entry.done.notify_one();
    }

    // -- reply construction -------------------------------------------------

    fn reply_error(
        &self,
        request: &ClientRequest,
        view: u64,
        seq: u64,
        error: ReplicaError,
    ) -> ClientReply {
        ClientReply {
            client_id: request.client_id.clone(),
            request_id: request.request_id.clone(),
            replica_id: self.config.node_id(),
            view,
            seq,
            committed: false,
            result: String::new(),
            error: error.to_string(),
        }
    }

    fn build_client_reply(
        &self,
        client_id: &str,
        request_id: &str,
        view: u64,
        seq: u64,
        got_notified: bool,
    ) -> ClientReply {
        let state = self.state_lock();
        if let Some(entry) = state.log.get(&(view, seq)) {
            if entry.executed {
                return ClientReply {
                    client_id: client_id.to_string(),
                    request_id: request_id.to_string(),
                    replica_id: self.config.node_id(),
                    view,
                    seq,
                    committed: true,
                    result: entry.result.clone().unwrap_or_default(),
                    error: String::new(),
                };
            }
        }

        let error = if got_notified {
            ReplicaError::EntryMissing
        } else {
            ReplicaError::Timeout
        };
        ClientReply {
            client_id: client_id.to_string(),
            request_id: request_id.to_string(),
            replica_id: self.config.node_id(),
            view,
            seq,
            committed: false,
            result: String::new(),
            error: error.to_string(),
        }
    }
}
