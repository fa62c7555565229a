//! Test harness for in-process hashnet networks.
//!
//! `TestNet` owns N peers and wires them with delayed in-memory links.
//! Tests index peers by position; links are created in call order, so each
//! peer assigns slots in the order its `connect` calls were made.

use std::time::Duration;

use hashnet_node::transport::memory_pair;
use hashnet_node::{ConnectionInfo, Peer, PeerConfig, PeerEvent, PeerId};

/// Peer config with fast timers for tests.
pub fn test_config(interval_ms: u64, timeout_ms: u64) -> PeerConfig {
    PeerConfig {
        interval_ms,
        timeout_ms,
        ..Default::default()
    }
}

pub struct TestNet {
    pub peers: Vec<Peer>,
}

#[allow(dead_code)]
impl TestNet {
    pub fn new(n: usize, config: PeerConfig) -> Self {
        let peers = (0..n)
            .map(|_| Peer::new(config.clone()).expect("valid test config"))
            .collect();
        Self { peers }
    }

    pub fn peer(&self, index: usize) -> &Peer {
        &self.peers[index]
    }

    pub fn id(&self, index: usize) -> PeerId {
        self.peers[index].id()
    }

    /// Link two peers. `delay_ms` applies to each direction, so the
    /// probed RTT of the link is twice that.
    pub async fn connect(&self, a: usize, b: usize, delay_ms: u64) {
        self.connect_asym(a, b, delay_ms, delay_ms).await;
    }

    /// Link two peers with a different delay per direction: `ab_ms` on
    /// frames sent by `a`, `ba_ms` on frames sent by `b`.
    pub async fn connect_asym(&self, a: usize, b: usize, ab_ms: u64, ba_ms: u64) {
        let (left, right) = memory_pair(
            Duration::from_millis(ab_ms),
            Duration::from_millis(ba_ms),
        );
        self.peers[a]
            .add_connection(left, None)
            .await
            .expect("admission");
        self.peers[b]
            .add_connection(right, None)
            .await
            .expect("admission");
    }

    /// Link every pair of peers.
    pub async fn full_mesh(&self, delay_ms: u64) {
        for a in 0..self.peers.len() {
            for b in (a + 1)..self.peers.len() {
                self.connect(a, b, delay_ms).await;
            }
        }
    }

    /// Let probes run for `ms` of (paused) time.
    pub async fn settle(&self, ms: u64) {
        tokio::time::sleep(Duration::from_millis(ms)).await;
    }

    /// Connection of peer `from` that leads directly to peer `to`.
    pub async fn direct(&self, from: usize, to: usize) -> Option<ConnectionInfo> {
        let target = self.id(to);
        self.peers[from]
            .connections()
            .await
            .into_iter()
            .find(|c| c.id == Some(target))
    }

    pub async fn shutdown_all(&self) {
        for peer in &self.peers {
            peer.shutdown().await;
        }
    }
}

/// Wait until `events` yields a `ConnectionClosed`, returning its slot.
#[allow(dead_code)]
pub async fn wait_closed(events: &mut tokio::sync::broadcast::Receiver<PeerEvent>) -> usize {
    loop {
        match events.recv().await {
            Ok(PeerEvent::ConnectionClosed { slot }) => return slot,
            Ok(_) => continue,
            Err(e) => panic!("event stream ended: {e}"),
        }
    }
}
