//! End-to-end tests for membership-sim.
//!
//! Drives a cluster over the simulated network with a manual clock: joins,
//! delayed activation, resync rounds, overload and departure.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use membership_core::{ManualClock, MembershipTransport, Node, TransportError};
use membership_sim::frame::{read_frame, write_frame};
use membership_sim::{Cluster, Config, Response, ResponseBody, SimConfig, Status};

const T0: u64 = 1_000;

fn config(bandwidth_bytes_per_sec: u64) -> Config {
    Config {
        sim: SimConfig {
            bandwidth_bytes_per_sec,
            ..Default::default()
        },
        ..Default::default()
    }
}

/// Unthrottled cluster of `nodes` nodes on a manual clock.
fn cluster(nodes: usize) -> (Cluster, Arc<ManualClock>) {
    cluster_with(config(0), nodes)
}

fn cluster_with(config: Config, nodes: usize) -> (Cluster, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(T0));
    let mut cluster = Cluster::new(config, clock.clone());
    for _ in 0..nodes {
        cluster.spawn_node();
    }
    (cluster, clock)
}

fn node(cluster: &Cluster, index: usize) -> Node {
    cluster.node(index).unwrap().node.clone()
}

fn view_of(cluster: &Cluster, index: usize) -> Vec<Node> {
    cluster.node(index).unwrap().registry.active_nodes()
}

/// Found node 0 and join the rest through it.
async fn form(cluster: &Cluster, nodes: usize) {
    cluster.found(0).unwrap();
    for index in 1..nodes {
        cluster.join(index, 0).await.unwrap();
    }
}

// ============================================================================
// Transport
// ============================================================================

#[tokio::test]
async fn test_fetch_member_list_over_network() {
    let (cluster, _clock) = cluster(2);
    cluster.found(0).unwrap();

    let members = cluster
        .node(1)
        .unwrap()
        .transport
        .fetch_member_list(&node(&cluster, 0))
        .await
        .unwrap();

    assert_eq!(members, vec![node(&cluster, 0)]);
}

#[tokio::test]
async fn test_ping() {
    let (cluster, _clock) = cluster(2);
    cluster.ping(1, 0).await.unwrap();
}

#[tokio::test]
async fn test_unknown_address() {
    let (cluster, _clock) = cluster(1);
    let ghost = Node::new(membership_core::NodeIp::new(99), "sim://ghost");

    let err = cluster
        .node(0)
        .unwrap()
        .transport
        .fetch_member_list(&ghost)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::PeerNotFound(_)));
}

#[tokio::test]
async fn test_malformed_request_gets_error_response() {
    let (cluster, _clock) = cluster(1);
    let mut stream = cluster
        .network()
        .connect(&node(&cluster, 0).address)
        .unwrap();

    write_frame(&mut stream, "not json at all").await.unwrap();
    let reply = read_frame(&mut stream).await.unwrap().unwrap();
    let response = Response::from_json(&reply).unwrap();

    assert_eq!(response.status, Status::Error);
    assert!(matches!(response.body, ResponseBody::Error { .. }));
}

#[tokio::test(start_paused = true)]
async fn test_overloaded_endpoint_rejects() {
    // Slow enough that all six requests overlap
    let (cluster, _clock) = cluster_with(config(10), 2);
    cluster.found(0).unwrap();
    let target = node(&cluster, 0);
    let transport = &cluster.node(1).unwrap().transport;

    let results = join_all((0..6).map(|_| transport.fetch_member_list(&target))).await;

    let overloaded = results
        .iter()
        .filter(|r| matches!(r, Err(e) if e.is_overload()))
        .count();
    let ok = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(overloaded, 1);
    assert_eq!(ok, 5);
}

// ============================================================================
// Join and activation
// ============================================================================

#[tokio::test]
async fn test_join_bootstraps_from_seed() {
    let (cluster, _clock) = cluster(2);
    form(&cluster, 2).await;

    let view = view_of(&cluster, 1);
    assert_eq!(view, vec![node(&cluster, 0), node(&cluster, 1)]);
    assert!(cluster.node(1).unwrap().registry.identity().is_joined());
    assert_eq!(cluster.node(1).unwrap().registry.events().subscriber_count(), 1);
}

#[tokio::test]
async fn test_announcement_activates_after_delay() {
    let (cluster, clock) = cluster(3);
    form(&cluster, 3).await;

    let founder = &cluster.node(0).unwrap().registry;
    assert_eq!(founder.len(), 1);
    assert_eq!(founder.pending_len(), 2);
    assert_eq!(founder.list_with_coming_soon().len(), 3);

    clock.advance(Duration::from_millis(29_999));
    assert_eq!(cluster.run_due().await, 0);

    clock.advance(Duration::from_millis(1));
    assert_eq!(cluster.run_due().await, 2);
    assert_eq!(
        founder.active_nodes(),
        vec![node(&cluster, 0), node(&cluster, 1), node(&cluster, 2)]
    );
    assert_eq!(founder.pending_len(), 0);
}

// ============================================================================
// Refresh rounds
// ============================================================================

#[tokio::test]
async fn test_resync_round_keeps_self() {
    let (cluster, clock) = cluster(3);
    form(&cluster, 3).await;
    clock.advance(Duration::from_millis(30_000));
    cluster.run_due().await;

    assert_eq!(cluster.refresh_all().await, 3);
    clock.advance(Duration::from_millis(30_000));
    assert_eq!(cluster.run_due().await, 3);

    for index in 0..3 {
        let view = view_of(&cluster, index);
        assert!(view.contains(&node(&cluster, index)), "node {} lost itself", index);
        assert!(view.contains(&node(&cluster, 0)));
        assert!(view.windows(2).all(|w| w[0].ip < w[1].ip));
    }
}

#[tokio::test]
async fn test_views_converge_through_founder() {
    let (cluster, clock) = cluster(4);
    form(&cluster, 4).await;
    clock.advance(Duration::from_millis(30_000));
    cluster.run_due().await;

    // Founder knows everyone; the others only know the founder and
    // themselves, so a resync through the founder fills them in
    for index in 1..4 {
        let count = cluster.node(index).unwrap().registry.resync().await.unwrap();
        assert_eq!(count, 4);
    }
    assert!(cluster.converged());
}

// ============================================================================
// Departure
// ============================================================================

#[tokio::test]
async fn test_depart_quarantines_in_known_views() {
    let (cluster, clock) = cluster(3);
    form(&cluster, 3).await;
    clock.advance(Duration::from_millis(30_000));
    cluster.run_due().await;

    let gone = node(&cluster, 2);
    // Node 1 never learned of node 2
    assert_eq!(cluster.depart(2).unwrap(), 1);

    let founder = &cluster.node(0).unwrap().registry;
    assert!(!founder.contains(gone.ip));
    assert_eq!(founder.recently_removed(), vec![gone.clone()]);
    assert!(founder.current_and_recent_nodes().contains(&gone));
    assert_eq!(cluster.network().endpoint_count(), 2);

    clock.advance(Duration::from_millis(60_000));
    cluster.run_due().await;
    assert_eq!(founder.recently_removed_len(), 0);

    let summary = cluster.summary();
    assert_eq!(summary[0].active, 2);
    assert_eq!(summary[0].recently_removed, 0);
}

#[tokio::test]
async fn test_depart_before_activation_stays_gone() {
    let (cluster, clock) = cluster(3);
    form(&cluster, 3).await;

    let founder = &cluster.node(0).unwrap().registry;
    assert_eq!(founder.pending_len(), 2);

    // Still pending everywhere, so no view counts as changed
    assert_eq!(cluster.depart(2).unwrap(), 0);
    assert_eq!(founder.pending_len(), 1);

    clock.advance(Duration::from_millis(30_000));
    cluster.run_due().await;

    assert_eq!(
        founder.active_nodes(),
        vec![node(&cluster, 0), node(&cluster, 1)]
    );
    assert!(!founder.contains(node(&cluster, 2).ip));
    assert_eq!(founder.recently_removed_len(), 0);
}
