//! Shared harness for integration tests: an in-process cluster of
//! `n` replicas wired together over one `LocalTransport`.

use std::sync::Arc;

use pbft_sim::config::ClusterConfig;
use pbft_sim::messages::ClientRequest;
use pbft_sim::replica::Replica;
use pbft_sim::transport::{LocalTransport, PbftClient, Transport};
use pbft_sim::NodeId;

pub struct Cluster {
    pub transport: Arc<LocalTransport>,
    pub replicas: Vec<Arc<Replica>>,
    pub client: PbftClient,
}

impl Cluster {
    /// Builds a cluster of `n` replicas (ids `1..=n`), marking the given
    /// ids as Byzantine at construction.
    pub fn new(n: u32, byzantine_ids: &[u32]) -> Self {
        let transport = Arc::new(LocalTransport::new());
        let ids: Vec<NodeId> = (1..=n).map(NodeId).collect();

        let replicas: Vec<Arc<Replica>> = ids
            .iter()
            .map(|&id| {
                let peers: Vec<NodeId> = ids.iter().copied().filter(|&p| p != id).collect();
                let config = ClusterConfig::new(id, peers).expect("valid cluster size");
                let byzantine = byzantine_ids.contains(&id.0);
                let dyn_transport: Arc<dyn Transport> = transport.clone();
                let replica = Replica::new(config, byzantine, dyn_transport);
                transport.register(id, Arc::downgrade(&replica));
                replica
            })
            .collect();

        let dyn_transport: Arc<dyn Transport> = transport.clone();
        let client = PbftClient::new(dyn_transport);

        Self {
            transport,
            replicas,
            client,
        }
    }

    pub fn replica(&self, id: u32) -> &Arc<Replica> {
        self.replicas
            .iter()
            .find(|r| r.node_id() == NodeId(id))
            .expect("replica exists")
    }
}

pub fn request(client_id: &str, request_id: &str, payload: &str) -> ClientRequest {
    ClientRequest {
        client_id: client_id.to_string(),
        request_id: request_id.to_string(),
        timestamp_ms: 0,
        payload: payload.to_string(),
        forwarded: false,
    }
}
