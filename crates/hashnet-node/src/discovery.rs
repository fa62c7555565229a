//! Path discovery -- uniform-cost search over accumulated RTT.
//!
//! Starting from our probed connections, repeatedly expand the cheapest
//! known peer by asking it for its connection table (`discovery.connection`,
//! sent along the route found so far). The first time the target is popped
//! its route is the least-RTT one among those explored. Expansion is a
//! serial chain of round trips; a peer that does not answer in time is
//! skipped.

use std::collections::HashSet;

use serde_json::Value;

use hashnet_protocol::{ConnectionEntry, PeerId, RouteLabel, PROC_DISCOVERY_CONNECTION};

use crate::connection::Slot;
use crate::peer::Peer;

/// A source route to a peer: leave through `slot`, then follow `route_label`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub id: PeerId,
    /// Accumulated round-trip time in milliseconds.
    pub rtt: u64,
    pub slot: Slot,
    pub(crate) link_id: u64,
    pub route_label: RouteLabel,
}

impl Peer {
    /// Least-RTT route to `target`, or `None` when it cannot be reached.
    /// Direct connections with a known id but no probe yet are explored
    /// last, at `u64::MAX` cost; remote rows without an RTT are skipped.
    pub async fn find_peer(&self, target: &PeerId) -> Option<Route> {
        let shared = &self.shared;
        let max_label = RouteLabel::max_len(shared.config.route_label_size, shared.field_bits);

        let mut closed: HashSet<PeerId> = HashSet::from([shared.id]);
        let mut open: Vec<Route> = shared
            .connections
            .read()
            .await
            .iter()
            .filter_map(|conn| {
                Some(Route {
                    id: conn.id?,
                    rtt: conn.rtt_ms.unwrap_or(u64::MAX),
                    slot: conn.slot,
                    link_id: conn.link_id,
                    route_label: RouteLabel::empty(),
                })
            })
            .collect();
        open.sort_by_key(|route| route.rtt);

        while !open.is_empty() {
            let current = open.remove(0);
            if current.id == *target {
                tracing::debug!(
                    peer = %target,
                    rtt = current.rtt,
                    route = %current.route_label,
                    "discovery: found"
                );
                return Some(current);
            }
            if !closed.insert(current.id) {
                continue;
            }

            let response = match shared
                .send_call(
                    current.slot,
                    current.link_id,
                    &current.route_label,
                    PROC_DISCOVERY_CONNECTION,
                    Value::Null,
                    true,
                )
                .await
            {
                Ok(Some(response)) => response,
                Ok(None) => {
                    tracing::debug!(peer = %current.id, "discovery: no answer, skipping");
                    continue;
                }
                Err(e) => {
                    tracing::debug!(peer = %current.id, "discovery: call failed: {e}");
                    continue;
                }
            };
            let entries: Vec<ConnectionEntry> = match serde_json::from_value(response) {
                Ok(entries) => entries,
                Err(e) => {
                    tracing::debug!(peer = %current.id, "discovery: malformed answer: {e}");
                    continue;
                }
            };

            for entry in entries {
                let (Some(id), Some(rtt)) = (entry.id, entry.rtt) else {
                    continue;
                };
                if closed.contains(&id) {
                    continue;
                }
                let route_label = current.route_label.join(&entry.route_label);
                if route_label.len() > max_label {
                    continue;
                }
                open.push(Route {
                    id,
                    rtt: current.rtt.saturating_add(rtt),
                    slot: current.slot,
                    link_id: current.link_id,
                    route_label,
                });
            }
            open.sort_by_key(|route| route.rtt);
        }

        tracing::debug!(peer = %target, "discovery: no path");
        None
    }
}
