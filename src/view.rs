//! View Manager (§4.4)
//!
//! A simplified view change: there is no NEW-VIEW certificate exchange
//! (explicit non-goal), only a monotonic "raise my view" plus a
//! best-effort broadcast so peers converge without a round-trip
//! handshake. A restarted replica separately syncs its view from peers
//! once at startup before serving traffic.

use std::time::Duration;

use futures::future::join_all;
use tracing::{info, warn};

use crate::config::{PING_DEADLINE, SET_VIEW_DEADLINE};
use crate::messages::SetViewRequest;
use crate::replica::Replica;

impl Replica {
    /// Raises this replica's own view to `new_view` if it's higher than
    /// the current one. Never moves the view backward.
    pub fn set_view(&self, new_view: u64, reason: &str) {
        let mut state = self.state_lock();
        if new_view > state.view {
            info!(new_view, reason, "raising own view");
            state.view = new_view;
        }
    }

    /// Raises this replica's view, then best-effort broadcasts the
    /// change to every peer. Per-peer failures are logged and otherwise
    /// ignored. There is no certificate for peers to acknowledge.
    pub async fn broadcast_set_view(&self, new_view: u64, reason: &str) {
        self.set_view(new_view, reason);

        let request = SetViewRequest {
            view: new_view,
            sender_id: self.node_id(),
            reason: reason.to_string(),
        };
        let fanout = self.config().peers().map(|peer| {
            let transport = self.transport_handle();
            let req = request.clone();
            async move {
                if let Err(err) = transport.set_view(peer, req, SET_VIEW_DEADLINE).await {
                    warn!(%peer, %err, "SET-VIEW broadcast failed");
                }
            }
        });
        join_all(fanout).await;
    }

    /// Startup-only: queries every peer's status and adopts the highest
    /// observed view before this replica serves traffic. Failures
    /// querying individual peers are swallowed; there is no scheduled
    /// re-sync once this has run.
    pub async fn sync_view_from_peers(&self, deadline: Duration) {
        let queries = self.config().peers().map(|peer| {
            let transport = self.transport_handle();
            async move { transport.get_status(peer, deadline).await.ok() }
        });
        let statuses = join_all(queries).await;
        if let Some(max_view) = statuses.into_iter().flatten().map(|status| status.view).max() {
            self.set_view(max_view, "startup sync with peers");
        }
    }

    /// Advances the view until this replica becomes primary, or until
    /// `max_hops` candidate primaries have been tried and found
    /// unreachable. A liveness probe, not a substitute for a real
    /// view-change protocol: each unreachable hop just raises the view
    /// by one (broadcasting the change) and tries the next primary.
    ///
    /// Returns `true` iff this replica is now primary.
    pub async fn ensure_live_primary(&self, max_hops: u64) -> bool {
        for _ in 0..max_hops {
            let view = self.state_lock().view;
            let primary = self.config().primary_id(view);
            if primary == self.node_id() {
                return true;
            }
            if self.transport_handle().ping(primary, PING_DEADLINE).await.is_ok() {
                return false;
            }
            self.broadcast_set_view(view + 1, "primary unreachable").await;
        }
        self.config().is_primary(self.state_lock().view)
    }
}
