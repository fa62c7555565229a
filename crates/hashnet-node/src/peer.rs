//! Peer engine -- slot table, frame routing, RPC, RTT probing.
//!
//! Every inbound frame is routed on its leading label field:
//!   - nonzero: forward to that slot, appending the incoming slot (bit
//!     reversed) to the label tail so the destination can answer.
//!   - zero: deliver here. A frame naming a pending call token completes
//!     that call; anything else runs the procedure pipeline and, when the
//!     frame carries a callback, replies over the reversed label.
//!
//! Each link gets a reader task; frames on one link are routed and
//! forwarded in arrival order. Procedure pipelines run in their own tasks
//! so a slow handler never stalls routing, which means replies to frames
//! from one link may go out in any order. Callers match replies by token.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use bytes::Bytes;
use futures::FutureExt;
use serde_json::{json, Value};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use hashnet_protocol::{
    Envelope, Frame, PeerId, PingResponse, ProtocolError, RouteLabel, WireLabel,
    PROC_DISCOVERY_CONNECTION, PROC_DISCOVERY_PROCEDURE, PROC_PING,
};

use crate::config::PeerConfig;
use crate::connection::{ConnectionInfo, ConnectionTable, Slot};
use crate::hook::{self, Hook, HookTable, HOOK_ADD_CONNECTION};
use crate::procedure::{run_pipeline, Handler, HandlerError, ProcedureTable};
use crate::token::{next_local_id, random_token};
use crate::transport::{Link, TransportEvent};
use crate::{AdmissionError, PeerError};

/// Observer event capacity; slow subscribers lag rather than block the peer.
const EVENT_CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PeerEvent {
    /// Probe timer fired.
    Tick,
    ConnectionAdded { slot: Slot, id: Option<PeerId> },
    ConnectionClosed { slot: Slot },
    Shutdown,
}

/// An RPC request for `Peer::call_procedure`.
#[derive(Debug, Clone)]
pub struct Call {
    /// Target peer. `None` (or our own id) runs the procedure locally.
    pub peer_id: Option<PeerId>,
    pub procedure: String,
    pub data: Value,
    pub get_response: bool,
}

impl Call {
    pub fn new(procedure: impl Into<String>) -> Self {
        Self {
            peer_id: None,
            procedure: procedure.into(),
            data: Value::Null,
            get_response: true,
        }
    }

    pub fn to(mut self, peer_id: PeerId) -> Self {
        self.peer_id = Some(peer_id);
        self
    }

    pub fn with_data(mut self, data: Value) -> Self {
        self.data = data;
        self
    }

    /// Fire and forget: resolve as soon as the frame is sent.
    pub fn no_response(mut self) -> Self {
        self.get_response = false;
        self
    }
}

/// Handle to a running peer. Clones share the same peer.
#[derive(Clone)]
pub struct Peer {
    pub(crate) shared: Arc<Shared>,
}

pub(crate) struct Shared {
    pub(crate) id: PeerId,
    pub(crate) config: PeerConfig,
    pub(crate) field_bits: usize,
    started: Instant,
    pub(crate) connections: RwLock<ConnectionTable>,
    procedures: RwLock<ProcedureTable>,
    hooks: RwLock<HookTable>,
    pending: Mutex<HashMap<String, oneshot::Sender<Value>>>,
    events: broadcast::Sender<PeerEvent>,
    running: AtomicBool,
    cancel: CancellationToken,
}

impl Peer {
    /// Build a peer and start its probe timer. Must be called inside a
    /// tokio runtime.
    pub fn new(config: PeerConfig) -> Result<Self, PeerError> {
        config.validate()?;
        let id = config.identity()?;
        let field_bits = config.route_label_bits();
        let max_connections = config.max_connections;
        let interval = config.interval();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let cancel = CancellationToken::new();

        let shared = Arc::new_cyclic(|weak: &Weak<Shared>| {
            let mut procedures = ProcedureTable::default();
            register_builtins(&mut procedures, id, weak.clone());
            Shared {
                id,
                config,
                field_bits,
                started: Instant::now(),
                connections: RwLock::new(ConnectionTable::new(max_connections)),
                procedures: RwLock::new(procedures),
                hooks: RwLock::new(HookTable::default()),
                pending: Mutex::new(HashMap::new()),
                events,
                running: AtomicBool::new(true),
                cancel: cancel.clone(),
            }
        });

        tokio::spawn(probe_loop(Arc::downgrade(&shared), interval, cancel));
        tracing::info!(peer = %id, field_bits, max_connections, "peer: started");
        Ok(Self { shared })
    }

    pub fn id(&self) -> PeerId {
        self.shared.id
    }

    pub fn config(&self) -> &PeerConfig {
        &self.shared.config
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PeerEvent> {
        self.shared.events.subscribe()
    }

    // ========================================================================
    // Connections
    // ========================================================================

    /// Admit a link into the lowest free slot. The link first passes through
    /// the `add-connection` hooks; on rejection it is handed back undestroyed.
    pub async fn add_connection(
        &self,
        link: Link,
        known_id: Option<PeerId>,
    ) -> Result<Slot, AdmissionError> {
        let shared = &self.shared;
        if !self.is_running() {
            return Err(AdmissionError::Shutdown(link));
        }

        let hooks = shared.hooks.read().await.add_connection_hooks();
        let admitted = AssertUnwindSafe(hook::run(Some(hooks.as_slice()), link))
            .catch_unwind()
            .await;
        let Ok(Link { transport, events }) = admitted else {
            tracing::warn!(hook = HOOK_ADD_CONNECTION, "hook: filter panicked, link dropped");
            return Err(AdmissionError::HookFailed);
        };
        let link_id = next_local_id();

        let slot = {
            let mut connections = shared.connections.write().await;
            // Checked under the table lock so shutdown cannot miss this link.
            if shared.cancel.is_cancelled() {
                return Err(AdmissionError::Shutdown(Link::new(transport, events)));
            }
            match connections.insert(transport.clone(), known_id, link_id) {
                Some(slot) => slot,
                None => {
                    tracing::debug!(
                        max = connections.capacity(),
                        "peer: connection rejected, table full"
                    );
                    return Err(AdmissionError::Full {
                        max: connections.capacity(),
                        link: Link::new(transport, events),
                    });
                }
            }
        };

        tokio::spawn(read_loop(
            Arc::downgrade(shared),
            slot,
            link_id,
            events,
            shared.cancel.clone(),
        ));
        tracing::info!(slot, known_id = ?known_id, "peer: connection added");
        let _ = shared.events.send(PeerEvent::ConnectionAdded { slot, id: known_id });
        Ok(slot)
    }

    /// Drop the link in `slot`. The slot is free once this returns.
    pub async fn disconnect(&self, slot: Slot) -> bool {
        let link_id = match self.shared.connections.read().await.get(slot) {
            Some(conn) => conn.link_id,
            None => return false,
        };
        self.shared.close_connection(slot, link_id).await
    }

    pub async fn connection(&self, slot: Slot) -> Option<ConnectionInfo> {
        self.shared.connections.read().await.get(slot).map(|c| c.info())
    }

    /// Snapshot of every live connection in slot order.
    pub async fn connections(&self) -> Vec<ConnectionInfo> {
        self.shared.connections.read().await.iter().map(|c| c.info()).collect()
    }

    // ========================================================================
    // Procedures
    // ========================================================================

    pub async fn add_procedure(&self, name: &str, handler: Handler) {
        self.shared.procedures.write().await.add(name, handler);
    }

    pub async fn remove_procedure(&self, name: &str, handler: &Handler) -> bool {
        self.shared.procedures.write().await.remove(name, handler)
    }

    pub async fn procedure_names(&self) -> Vec<String> {
        self.shared.procedures.read().await.names()
    }

    /// Run a procedure here or on a remote peer.
    ///
    /// Remote calls first search for a route; an unreachable peer is the
    /// only error. A call that times out resolves to `Ok(None)`, as does any
    /// call made with `get_response` unset.
    pub async fn call_procedure(&self, call: Call) -> Result<Option<Value>, PeerError> {
        let shared = &self.shared;
        if !self.is_running() {
            return Err(PeerError::Shutdown);
        }

        let target = match call.peer_id {
            Some(target) if target != shared.id => target,
            _ => {
                let result = shared.run_procedure(call.procedure, call.data).await;
                return Ok(Some(result));
            }
        };

        let Some(route) = self.find_peer(&target).await else {
            return Err(PeerError::NoPath(target));
        };
        tracing::debug!(
            peer = %target,
            rtt = route.rtt,
            route = %route.route_label,
            procedure = %call.procedure,
            "rpc: calling"
        );
        shared
            .send_call(
                route.slot,
                route.link_id,
                &route.route_label,
                &call.procedure,
                call.data,
                call.get_response,
            )
            .await
    }

    // ========================================================================
    // Hooks
    // ========================================================================

    pub async fn add_connection_hook(&self, hook: Hook<Link>) {
        self.shared.hooks.write().await.add_connection_hook(hook);
    }

    pub async fn remove_connection_hook(&self, hook: &Hook<Link>) -> bool {
        self.shared.hooks.write().await.remove_connection_hook(hook)
    }

    pub async fn add_hook(&self, name: &str, hook: Hook<Value>) {
        self.shared.hooks.write().await.add(name, hook);
    }

    pub async fn remove_hook(&self, name: &str, hook: &Hook<Value>) -> bool {
        self.shared.hooks.write().await.remove(name, hook)
    }

    /// Thread `value` through the hooks registered under `name`. A panicking
    /// hook yields `null`.
    pub async fn run_hook(&self, name: &str, value: Value) -> Value {
        let pipeline = self.shared.hooks.read().await.named(name);
        match AssertUnwindSafe(hook::run(pipeline.as_deref(), value))
            .catch_unwind()
            .await
        {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(hook = name, "hook: filter panicked");
                Value::Null
            }
        }
    }

    // ========================================================================
    // Shutdown
    // ========================================================================

    /// Stop probing and destroy every link. Calls still waiting resolve to
    /// `None`. Only the first call has any effect.
    pub async fn shutdown(&self) {
        let shared = &self.shared;
        if !shared.running.swap(false, Ordering::SeqCst) {
            return;
        }
        shared.cancel.cancel();

        let drained = shared.connections.write().await.drain();
        for conn in &drained {
            conn.transport.destroy();
        }
        shared.pending.lock().await.clear();

        tracing::info!(peer = %shared.id, closed = drained.len(), "peer: shut down");
        let _ = shared.events.send(PeerEvent::Shutdown);
    }
}

impl Shared {
    fn now_ms(&self) -> u64 {
        self.started.elapsed().as_millis() as u64
    }

    /// Run the local pipeline for `name`, isolating handler panics.
    pub(crate) async fn run_procedure(&self, name: String, data: Value) -> Value {
        let pipeline = self.procedures.read().await.pipeline(&name);
        match AssertUnwindSafe(run_pipeline(name.clone(), pipeline, data))
            .catch_unwind()
            .await
        {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(procedure = %name, "procedure: handler panicked");
                Value::Null
            }
        }
    }

    /// Send `procedure(data)` along `route` over the link in `slot`.
    /// `Ok(None)` when no response is wanted or none arrived in time.
    pub(crate) async fn send_call(
        &self,
        slot: Slot,
        link_id: u64,
        route: &RouteLabel,
        procedure: &str,
        data: Value,
        want_response: bool,
    ) -> Result<Option<Value>, PeerError> {
        if self.cancel.is_cancelled() {
            return Err(PeerError::Shutdown);
        }
        let label = route.to_wire(self.config.route_label_size, self.field_bits)?;

        let waiting = if want_response {
            let token = random_token();
            let (tx, rx) = oneshot::channel();
            self.pending.lock().await.insert(token.clone(), tx);
            Some((token, rx))
        } else {
            None
        };

        let callback = waiting.as_ref().map(|(token, _)| token.clone());
        let envelope = Envelope::call(procedure, data, callback);
        if let Err(e) = self.send_envelope(slot, link_id, &label, &envelope).await {
            if let Some((token, _)) = &waiting {
                self.pending.lock().await.remove(token);
            }
            return Err(e);
        }

        let Some((token, mut rx)) = waiting else {
            return Ok(None);
        };
        match tokio::time::timeout(self.config.timeout(), &mut rx).await {
            Ok(Ok(value)) => Ok(Some(value)),
            // Resolver dropped: the peer shut down.
            Ok(Err(_)) => Ok(None),
            Err(_) => {
                // Whoever removes the token owns the outcome. If a response
                // got there first, its value is already in the channel.
                if self.pending.lock().await.remove(&token).is_some() {
                    tracing::debug!(slot, procedure, "rpc: timed out");
                    return Ok(None);
                }
                Ok(rx.try_recv().ok())
            }
        }
    }

    async fn send_envelope(
        &self,
        slot: Slot,
        link_id: u64,
        label: &WireLabel,
        envelope: &Envelope,
    ) -> Result<(), PeerError> {
        let payload = envelope.to_bytes().map_err(ProtocolError::from)?;
        let frame = Frame::new(label.to_bytes(), payload).encode()?;
        match self.connections.read().await.get_link(slot, link_id) {
            Some(conn) => conn.transport.send(frame),
            None => tracing::debug!(slot, "rpc: link gone, frame dropped"),
        }
        Ok(())
    }

    // ========================================================================
    // Inbound
    // ========================================================================

    async fn handle_frame(self: &Arc<Self>, slot: Slot, link_id: u64, bytes: Bytes) {
        let frame = match Frame::decode(bytes, self.config.route_label_size) {
            Ok(frame) => frame,
            Err(e) => {
                tracing::debug!(slot, "peer: dropping frame: {e}");
                return;
            }
        };

        let mut label = WireLabel::from_bytes(&frame.label, self.field_bits);
        let next_hop = label.next_hop();
        if next_hop != 0 {
            self.forward(slot, next_hop as Slot, label, &frame).await;
            return;
        }
        label.restore_local();

        // Extensions are reserved; the payload is read regardless.
        let envelope = match Envelope::from_slice(&frame.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::debug!(slot, "peer: dropping undecodable payload: {e}");
                return;
            }
        };

        let resolver = self.pending.lock().await.remove(&envelope.procedure);
        if let Some(resolver) = resolver {
            let _ = resolver.send(envelope.data_or_null());
            return;
        }

        let shared = self.clone();
        tokio::spawn(async move { shared.execute(slot, link_id, label, envelope).await });
    }

    async fn forward(&self, incoming: Slot, next_hop: Slot, mut label: WireLabel, frame: &Frame) {
        label.push_return_hop(incoming as u64);
        let relabelled = match frame.relabel(label.to_bytes()).encode() {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::debug!(incoming, next_hop, "peer: cannot re-encode frame: {e}");
                return;
            }
        };
        match self.connections.read().await.get(next_hop) {
            Some(conn) => {
                tracing::trace!(incoming, next_hop, "peer: forwarding");
                conn.transport.send(relabelled);
            }
            None => tracing::debug!(incoming, next_hop, "peer: no link at next hop, frame dropped"),
        }
    }

    async fn execute(&self, slot: Slot, link_id: u64, mut label: WireLabel, envelope: Envelope) {
        let Envelope {
            procedure,
            data,
            callback,
        } = envelope;
        let result = self.run_procedure(procedure, data.unwrap_or(Value::Null)).await;

        let Some(callback) = callback else {
            return;
        };
        label.reverse();
        let reply = Envelope::call(callback, result, None);
        if let Err(e) = self.send_envelope(slot, link_id, &label, &reply).await {
            tracing::debug!(slot, "rpc: reply failed: {e}");
        }
    }

    async fn close_connection(&self, slot: Slot, link_id: u64) -> bool {
        let Some(conn) = self.connections.write().await.remove(slot, link_id) else {
            return false;
        };
        conn.transport.destroy();
        tracing::info!(slot, peer = ?conn.id, "peer: connection closed");
        let _ = self.events.send(PeerEvent::ConnectionClosed { slot });
        true
    }

    /// Ping every live connection in slot order, one at a time.
    async fn probe_connections(&self) {
        let targets: Vec<(Slot, u64)> = self
            .connections
            .read()
            .await
            .iter()
            .map(|c| (c.slot, c.link_id))
            .collect();

        for (slot, link_id) in targets {
            let sent_at = self.now_ms();
            let response = match self
                .send_call(slot, link_id, &RouteLabel::empty(), PROC_PING, json!(sent_at), true)
                .await
            {
                Ok(Some(response)) => response,
                Ok(None) => {
                    tracing::debug!(slot, "probe: no response");
                    continue;
                }
                Err(PeerError::Shutdown) => return,
                Err(e) => {
                    tracing::debug!(slot, "probe: failed: {e}");
                    continue;
                }
            };

            let pong: PingResponse = match serde_json::from_value(response) {
                Ok(pong) => pong,
                Err(e) => {
                    tracing::debug!(slot, "probe: malformed response: {e}");
                    continue;
                }
            };
            let rtt = self.now_ms().saturating_sub(pong.timestamp);
            if self
                .connections
                .write()
                .await
                .record_probe(slot, link_id, pong.id, rtt)
            {
                tracing::trace!(slot, peer = %pong.id, rtt, "probe: updated");
            }
        }
    }
}

fn register_builtins(procedures: &mut ProcedureTable, id: PeerId, shared: Weak<Shared>) {
    procedures.add(
        PROC_PING,
        Handler::sync(move |data, _| Ok(json!({ "timestamp": data, "id": id }))),
    );

    let weak = shared.clone();
    procedures.add(
        PROC_DISCOVERY_CONNECTION,
        Handler::new(move |_, _| {
            let weak = weak.clone();
            async move {
                let Some(shared) = weak.upgrade() else {
                    return Ok(Value::Null);
                };
                let entries = shared.connections.read().await.entries(shared.field_bits);
                serde_json::to_value(entries).map_err(HandlerError::from)
            }
        }),
    );

    procedures.add(
        PROC_DISCOVERY_PROCEDURE,
        Handler::new(move |_, _| {
            let weak = shared.clone();
            async move {
                let Some(shared) = weak.upgrade() else {
                    return Ok(Value::Null);
                };
                let names = shared.procedures.read().await.names();
                Ok::<_, HandlerError>(json!(names))
            }
        }),
    );
}

async fn probe_loop(shared: Weak<Shared>, interval: Duration, cancel: CancellationToken) {
    let mut ticker = tokio::time::interval_at(Instant::now() + interval, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }
        let Some(shared) = shared.upgrade() else {
            break;
        };
        let _ = shared.events.send(PeerEvent::Tick);
        // A slow neighbour may hold up this round but never the next tick.
        tokio::spawn(async move { shared.probe_connections().await });
    }
}

async fn read_loop(
    shared: Weak<Shared>,
    slot: Slot,
    link_id: u64,
    mut events: mpsc::UnboundedReceiver<TransportEvent>,
    cancel: CancellationToken,
) {
    loop {
        let event = tokio::select! {
            _ = cancel.cancelled() => break,
            event = events.recv() => event,
        };
        match event {
            Some(TransportEvent::Data(bytes)) => {
                let Some(shared) = shared.upgrade() else {
                    break;
                };
                shared.handle_frame(slot, link_id, bytes).await;
            }
            Some(TransportEvent::Closed) | None => break,
        }
    }
    if let Some(shared) = shared.upgrade() {
        shared.close_connection(slot, link_id).await;
    }
}
