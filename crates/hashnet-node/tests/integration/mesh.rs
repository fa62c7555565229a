//! Connection table behaviour across live links: probing, slot reuse,
//! capacity and shutdown.

use std::time::Duration;

use hashnet_node::transport::memory_pair;
use hashnet_node::{AdmissionError, Peer, PeerConfig};

use crate::harness::{test_config, wait_closed, TestNet};

/// Three peers, zero-delay full mesh, 100 ms probing: every connection
/// learns its neighbour's id within 300 ms.
#[tokio::test(start_paused = true)]
async fn test_rtt_convergence_full_mesh() {
    let net = TestNet::new(3, test_config(100, 2000));
    net.full_mesh(0).await;
    net.settle(300).await;

    for from in 0..3 {
        let connections = net.peer(from).connections().await;
        assert_eq!(connections.len(), 2);
        for to in (0..3).filter(|&to| to != from) {
            let conn = net.direct(from, to).await.expect("neighbour id learned");
            assert_eq!(conn.rtt_ms, Some(0));
        }
    }
    net.shutdown_all().await;
}

/// Probed RTT is the link's round trip.
#[tokio::test(start_paused = true)]
async fn test_rtt_matches_link_delay() {
    let net = TestNet::new(2, test_config(100, 2000));
    net.connect(0, 1, 30).await;
    net.settle(250).await;

    let conn = net.direct(0, 1).await.unwrap();
    assert_eq!(conn.slot, 1);
    assert_eq!(conn.rtt_ms, Some(60));
    net.shutdown_all().await;
}

/// With different one-way delays both ends measure the same round trip,
/// and a two-hop route costs the sum of both links' round trips.
#[tokio::test(start_paused = true)]
async fn test_asymmetric_link_rtt_is_sum_of_directions() {
    let net = TestNet::new(3, test_config(100, 2000));
    net.connect_asym(0, 1, 3, 17).await;
    net.connect_asym(1, 2, 29, 5).await;
    net.settle(250).await;

    assert_eq!(net.direct(0, 1).await.unwrap().rtt_ms, Some(20));
    assert_eq!(net.direct(1, 0).await.unwrap().rtt_ms, Some(20));
    assert_eq!(net.direct(1, 2).await.unwrap().rtt_ms, Some(34));
    assert_eq!(net.direct(2, 1).await.unwrap().rtt_ms, Some(34));

    let route = net.peer(0).find_peer(&net.id(2)).await.unwrap();
    assert_eq!(route.rtt, 54);
    assert_eq!(route.route_label.to_string(), "0010");
    net.shutdown_all().await;
}

/// A slow neighbour times out without blocking the others in later ticks.
#[tokio::test(start_paused = true)]
async fn test_slow_neighbour_times_out() {
    let net = TestNet::new(3, test_config(1000, 300));
    net.connect(0, 1, 500).await;
    net.connect(0, 2, 10).await;
    net.settle(2500).await;

    assert!(net.direct(0, 1).await.is_none());
    assert_eq!(net.direct(0, 2).await.unwrap().rtt_ms, Some(20));
    net.shutdown_all().await;
}

/// Fill slots 1..=4, lose the peer on slot 2, the next link takes slot 2.
#[tokio::test(start_paused = true)]
async fn test_closed_slot_is_reused() {
    let net = TestNet::new(6, test_config(100, 2000));
    for other in 1..=4 {
        net.connect(0, other, 0).await;
    }
    let mut events = net.peer(0).subscribe();

    net.peer(2).shutdown().await;
    assert_eq!(wait_closed(&mut events).await, 2);
    assert!(net.peer(0).connection(2).await.is_none());

    net.connect(0, 5, 0).await;
    net.settle(150).await;
    let conn = net.direct(0, 5).await.unwrap();
    assert_eq!(conn.slot, 2);
    net.shutdown_all().await;
}

/// The link past `max_connections` is refused and handed back intact.
#[tokio::test(start_paused = true)]
async fn test_capacity_bound() {
    let config = PeerConfig {
        max_connections: 2,
        ..test_config(100, 2000)
    };
    let peer = Peer::new(config).unwrap();
    let mut remote_ends = Vec::new();
    for _ in 0..2 {
        let (ours, theirs) = memory_pair(Duration::ZERO, Duration::ZERO);
        peer.add_connection(ours, None).await.unwrap();
        remote_ends.push(theirs);
    }

    let (ours, mut theirs) = memory_pair(Duration::ZERO, Duration::ZERO);
    let link = match peer.add_connection(ours, None).await {
        Err(AdmissionError::Full { max, link }) => {
            assert_eq!(max, 2);
            link
        }
        other => panic!("expected rejection, got {other:?}"),
    };
    assert_eq!(peer.connections().await.len(), 2);

    // Still usable: the caller decides what to do with it.
    link.transport.send(bytes::Bytes::from_static(b"x"));
    assert!(matches!(
        theirs.events.recv().await,
        Some(hashnet_node::TransportEvent::Data(_))
    ));
    link.destroy();
    peer.shutdown().await;
}

/// Shutting a peer down closes its links on the far side too.
#[tokio::test(start_paused = true)]
async fn test_shutdown_closes_remote_ends() {
    let net = TestNet::new(3, test_config(100, 2000));
    net.connect(0, 1, 5).await;
    net.connect(0, 2, 5).await;
    let mut events_b = net.peer(1).subscribe();
    let mut events_c = net.peer(2).subscribe();

    net.peer(0).shutdown().await;
    net.peer(0).shutdown().await;

    assert_eq!(wait_closed(&mut events_b).await, 1);
    assert_eq!(wait_closed(&mut events_c).await, 1);
    assert!(net.peer(1).connections().await.is_empty());
    assert!(!net.peer(0).is_running());
    net.shutdown_all().await;
}
