//! Transport contract and the length-delimited stream adapter.
//!
//! A transport moves whole frames between two directly linked peers. The
//! peer only needs `send`, `destroy`, and an event stream of received
//! frames ending in `Closed`. `StreamTransport` provides that over any
//! `AsyncRead + AsyncWrite` (TCP socket, in-memory duplex).

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::codec::{FramedRead, FramedWrite, LengthDelimitedCodec};
use tokio_util::sync::CancellationToken;

/// In-memory pipe buffer per direction.
const DUPLEX_BUFFER: usize = 64 * 1024;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Data(Bytes),
    /// Link lost or destroyed. Always the last event.
    Closed,
}

pub trait Transport: Send + Sync + 'static {
    /// Queue one frame. Frames sent after close are dropped.
    fn send(&self, frame: Bytes);
    /// Sever the link. Both ends observe `Closed`.
    fn destroy(&self);
}

/// A transport and its inbound event stream.
pub struct Link {
    pub transport: Arc<dyn Transport>,
    pub events: mpsc::UnboundedReceiver<TransportEvent>,
}

impl Link {
    pub fn new(
        transport: Arc<dyn Transport>,
        events: mpsc::UnboundedReceiver<TransportEvent>,
    ) -> Self {
        Self { transport, events }
    }

    pub fn destroy(&self) {
        self.transport.destroy();
    }
}

impl fmt::Debug for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Link").finish_non_exhaustive()
    }
}

pub struct StreamTransport {
    outbound: mpsc::UnboundedSender<(Instant, Bytes)>,
    delay: Duration,
    cancel: CancellationToken,
}

impl StreamTransport {
    /// Drive `io` with length-delimited frames. Every outbound frame is
    /// held for `delay` before it is written.
    pub fn spawn<S>(io: S, delay: Duration) -> Link
    where
        S: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(io);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();

        tokio::spawn(write_loop(writer, outbound_rx, cancel.clone()));
        tokio::spawn(read_loop(reader, events_tx, cancel.clone()));

        let transport = Arc::new(Self {
            outbound: outbound_tx,
            delay,
            cancel,
        });
        Link::new(transport, events_rx)
    }
}

impl Transport for StreamTransport {
    fn send(&self, frame: Bytes) {
        if self.cancel.is_cancelled() {
            return;
        }
        let deliver_at = Instant::now() + self.delay;
        if self.outbound.send((deliver_at, frame)).is_err() {
            tracing::trace!("transport: send after close");
        }
    }

    fn destroy(&self) {
        self.cancel.cancel();
    }
}

/// Two linked in-memory transports. `a_delay` applies to frames sent by
/// the first link, `b_delay` to frames sent by the second.
pub fn memory_pair(a_delay: Duration, b_delay: Duration) -> (Link, Link) {
    let (a, b) = tokio::io::duplex(DUPLEX_BUFFER);
    (
        StreamTransport::spawn(a, a_delay),
        StreamTransport::spawn(b, b_delay),
    )
}

async fn write_loop<W>(
    writer: W,
    mut outbound: mpsc::UnboundedReceiver<(Instant, Bytes)>,
    cancel: CancellationToken,
) where
    W: AsyncWrite + Send + Unpin,
{
    let mut sink = FramedWrite::new(writer, LengthDelimitedCodec::new());
    loop {
        let (deliver_at, frame) = tokio::select! {
            _ = cancel.cancelled() => break,
            next = outbound.recv() => match next {
                Some(item) => item,
                None => break,
            },
        };
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep_until(deliver_at) => {}
        }
        if let Err(e) = sink.send(frame).await {
            tracing::debug!("transport: write failed: {e}");
            break;
        }
    }
    // Shutting down the write half is what the remote reader sees as EOF.
    if let Err(e) = SinkExt::<Bytes>::close(&mut sink).await {
        tracing::trace!("transport: close failed: {e}");
    }
    cancel.cancel();
}

async fn read_loop<R>(
    reader: R,
    events: mpsc::UnboundedSender<TransportEvent>,
    cancel: CancellationToken,
) where
    R: AsyncRead + Send + Unpin,
{
    let mut frames = FramedRead::new(reader, LengthDelimitedCodec::new());
    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            next = frames.next() => match next {
                Some(Ok(frame)) => {
                    if events.send(TransportEvent::Data(frame.freeze())).is_err() {
                        break;
                    }
                }
                Some(Err(e)) => {
                    tracing::debug!("transport: read failed: {e}");
                    break;
                }
                None => break,
            },
        }
    }
    cancel.cancel();
    let _ = events.send(TransportEvent::Closed);
}
