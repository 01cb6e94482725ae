//! Integration tests over an in-process cluster, one per scenario.

mod common;

use std::time::Duration;

use common::{request, Cluster};
use pbft_sim::NodeId;

const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test]
async fn s1_all_honest_single_request_commits_everywhere() {
    let cluster = Cluster::new(4, &[]);

    let reply = cluster
        .client
        .submit_client_request(NodeId(1), request("c1", "r1", "hello"), TIMEOUT)
        .await
        .expect("transport succeeds");

    assert!(reply.committed);
    assert_eq!(reply.view, 0);
    assert_eq!(reply.seq, 1);
    assert_eq!(reply.result, "hello");
    assert_eq!(reply.error, "");

    for id in 1..=4 {
        let snapshot = cluster
            .replica(id)
            .snapshot(0, 1)
            .unwrap_or_else(|| panic!("replica {id} missing entry (0,1)"));
        assert!(snapshot.executed, "replica {id} did not execute");
        assert_eq!(snapshot.commits, 4, "replica {id} commit count");
    }
    for id in 2..=4 {
        let snapshot = cluster.replica(id).snapshot(0, 1).unwrap();
        assert_eq!(snapshot.prepares, 3, "non-primary replica {id} prepare count");
    }
}

#[tokio::test]
async fn s2_one_crashed_replica_still_commits() {
    let cluster = Cluster::new(4, &[]);

    cluster
        .client
        .kill_node(NodeId(4), TIMEOUT)
        .await
        .expect("kill_node reaches node 4");

    let reply = cluster
        .client
        .submit_client_request(NodeId(1), request("c1", "r1", "x"), TIMEOUT)
        .await
        .expect("transport succeeds");

    assert!(reply.committed);
    assert_eq!(reply.seq, 1);
    assert!(cluster.replica(4).snapshot(0, 1).is_none());
}

#[tokio::test]
async fn s3_byzantine_primary_triggers_view_bump_and_rejects_client() {
    let cluster = Cluster::new(4, &[1]);

    let reply = cluster
        .client
        .submit_client_request(NodeId(1), request("c1", "r1", "p"), TIMEOUT)
        .await
        .expect("transport succeeds");

    assert!(!reply.committed);
    assert!(reply.error.contains("byzantine primary"), "error was: {}", reply.error);

    // Chaos PRE-PREPAREs are delivered inline by the time the primary's
    // call above returns, so every honest replica has already had a
    // chance to detect the mismatch and bump its view.
    for id in 2..=4u32 {
        let status = cluster.replica(id).on_get_status();
        assert!(status.view >= 1, "replica {id} view did not advance: {status:?}");
    }
    let status = cluster.replica(2).on_get_status();
    assert_eq!(status.primary_id, NodeId(2));
}

#[tokio::test]
async fn s4_byzantine_replica_is_rejected_but_quorum_still_reached() {
    let cluster = Cluster::new(4, &[4]);

    let reply = cluster
        .client
        .submit_client_request(NodeId(1), request("c1", "r1", "y"), TIMEOUT)
        .await
        .expect("transport succeeds");

    assert!(reply.committed);
    assert_eq!(reply.result, "y");

    let primary_snapshot = cluster.replica(1).snapshot(0, 1).unwrap();
    assert_eq!(primary_snapshot.commits, 3);

    // Node 4's own PREPARE/COMMIT are corrupted and rejected everywhere
    // (including by itself), but it still receives and correctly
    // processes the three honest replicas' votes on its own copy of
    // the entry. A limited adversary that only corrupts its own
    // outgoing messages doesn't get to block anyone else's quorum.
    let node4 = cluster.replica(4).snapshot(0, 1).unwrap();
    assert_eq!(node4.digest, primary_snapshot.digest);
}

#[tokio::test]
async fn s5_forwarding_from_a_non_primary_replica() {
    let cluster = Cluster::new(4, &[]);

    let reply = cluster
        .client
        .submit_client_request(NodeId(3), request("c1", "r1", "forwarded-payload"), TIMEOUT)
        .await
        .expect("transport succeeds");

    assert!(reply.committed);
    assert_eq!(reply.result, "forwarded-payload");
}

#[tokio::test]
async fn s6_client_falls_back_across_the_port_range_when_node_one_is_unreachable() {
    let cluster = Cluster::new(4, &[]);
    cluster.transport.set_down(NodeId(1), true);

    let reply = cluster
        .client
        .submit_client_request(NodeId(1), request("c1", "r1", "z"), TIMEOUT)
        .await
        .expect("fallback finds a reachable replica");

    assert!(reply.committed, "reply: {reply:?}");
    assert_eq!(reply.result, "z");
}
