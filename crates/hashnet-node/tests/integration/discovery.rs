//! Least-RTT route discovery over multi-hop topologies.

use std::time::Duration;

use hashnet_node::PeerError;
use hashnet_node::Call;

use crate::harness::{test_config, TestNet};

const A: usize = 0;
const B: usize = 1;
const C: usize = 2;
const D: usize = 3;
const E: usize = 4;

/// One-way delays differ per direction; round trips are A-B 20 ms,
/// B-C 40 ms, C-A 100 ms, C-D 200 ms, D-E 400 ms.
///
/// Slots follow link order:
///   A: B=1 C=2   B: A=1 C=2   C: B=1 A=2 D=3   D: C=1 E=2   E: D=1
async fn five_node_net() -> TestNet {
    let net = TestNet::new(5, test_config(500, 2000));
    net.connect_asym(A, B, 5, 15).await;
    net.connect_asym(B, C, 30, 10).await;
    net.connect_asym(C, A, 60, 40).await;
    net.connect_asym(C, D, 120, 80).await;
    net.connect_asym(D, E, 150, 250).await;
    net.settle(2000).await;
    net
}

#[tokio::test(start_paused = true)]
async fn test_routes_follow_least_rtt() {
    let net = five_node_net().await;

    let expected = [
        (A, B, ""),
        (A, C, "0010"),
        (A, D, "00100011"),
        (A, E, "001000110010"),
        (B, A, ""),
        (B, C, ""),
        (B, D, "0011"),
        (B, E, "00110010"),
        (C, A, "0001"),
        (C, B, ""),
        (C, D, ""),
        (C, E, "0010"),
        (D, A, "00010001"),
        (D, B, "0001"),
        (D, C, ""),
        (D, E, ""),
        (E, A, "000100010001"),
        (E, B, "00010001"),
        (E, C, "0001"),
        (E, D, ""),
    ];

    for (from, to, label) in expected {
        let route = net
            .peer(from)
            .find_peer(&net.id(to))
            .await
            .unwrap_or_else(|| panic!("no route {from} -> {to}"));
        assert_eq!(route.id, net.id(to));
        assert_eq!(route.route_label.to_string(), label, "route {from} -> {to}");
    }
    net.shutdown_all().await;
}

/// The route to C through B is cheaper than the direct A-C link, and its
/// cost is the sum of the two probed hops.
#[tokio::test(start_paused = true)]
async fn test_route_cost_is_accumulated_rtt() {
    let net = five_node_net().await;

    let ab = net.direct(A, B).await.unwrap().rtt_ms.unwrap();
    let bc = net.direct(B, C).await.unwrap().rtt_ms.unwrap();
    let ac = net.direct(A, C).await.unwrap().rtt_ms.unwrap();
    assert_eq!((ab, bc, ac), (20, 40, 100));

    let route = net.peer(A).find_peer(&net.id(C)).await.unwrap();
    assert_eq!(route.rtt, ab + bc);
    assert!(route.rtt < ac);
    assert_eq!(route.slot, net.direct(A, B).await.unwrap().slot);
    net.shutdown_all().await;
}

/// A-B-C-D with 200 ms links and a 700 ms call timeout: two-hop discovery
/// round trips (800 ms) time out, so the line ends are mutually unreachable.
#[tokio::test(start_paused = true)]
async fn test_discovery_step_timeout() {
    let net = TestNet::new(4, test_config(1000, 700));
    net.connect(A, B, 200).await;
    net.connect(B, C, 200).await;
    net.connect(C, D, 200).await;
    net.settle(3000).await;

    for from in [A, B, C, D] {
        for to in [A, B, C, D] {
            if from == to {
                continue;
            }
            let found = net.peer(from).find_peer(&net.id(to)).await;
            let ends = (from == A && to == D) || (from == D && to == A);
            assert_eq!(found.is_none(), ends, "route {from} -> {to}");
        }
    }
    net.shutdown_all().await;
}

/// A failed search costs at most one timeout per candidate it expands.
#[tokio::test(start_paused = true)]
async fn test_failed_search_is_time_bounded() {
    let net = TestNet::new(4, test_config(1000, 700));
    net.connect(A, B, 200).await;
    net.connect(B, C, 200).await;
    net.connect(C, D, 200).await;
    net.settle(3000).await;

    let start = tokio::time::Instant::now();
    assert!(net.peer(A).find_peer(&net.id(D)).await.is_none());
    let elapsed = start.elapsed();
    // One answered step through B (400 ms) plus one timed-out step via C.
    assert!(elapsed >= Duration::from_millis(1100), "{elapsed:?}");
    assert!(elapsed <= Duration::from_millis(2 * 700), "{elapsed:?}");

    let err = net
        .peer(A)
        .call_procedure(Call::new("ping").to(net.id(D)))
        .await
        .unwrap_err();
    assert!(matches!(err, PeerError::NoPath(id) if id == net.id(D)));
    net.shutdown_all().await;
}

/// A route that would overflow the wire label is never offered.
#[tokio::test(start_paused = true)]
async fn test_routes_limited_by_label_width() {
    // One-byte labels with 4-bit fields leave room for a single hop.
    let config = hashnet_node::PeerConfig {
        route_label_size: 1,
        ..test_config(100, 1000)
    };
    let net = TestNet::new(4, config);
    net.connect(A, B, 1).await;
    net.connect(B, C, 1).await;
    net.connect(C, D, 1).await;
    net.settle(500).await;

    assert!(net.peer(A).find_peer(&net.id(B)).await.is_some());
    let c = net.peer(A).find_peer(&net.id(C)).await.unwrap();
    assert_eq!(c.route_label.to_string(), "0010");
    assert!(net.peer(A).find_peer(&net.id(D)).await.is_none());
    net.shutdown_all().await;
}
