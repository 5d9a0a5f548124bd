//! The uniform connection handle produced by every adapter.
//!
//! Adapters bridge their protocol onto a pair of queues: an outbound
//! frame queue the session writes to, and an inbound event queue the
//! session consumes. The session never touches adapter internals.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, oneshot};

use crate::core::TransportError;
use crate::core::constants::{EVENT_QUEUE_DEPTH, OUTBOUND_QUEUE_DEPTH};
use crate::negotiate::TransportKind;
use crate::protocol::ChannelFrame;

/// Something that happened on an established connection.
#[derive(Debug)]
pub enum LinkEvent {
    /// A frame arrived.
    Frame(ChannelFrame),
    /// The connection dropped. Terminal for this link.
    Closed {
        /// Human-readable cause, for logging only.
        reason: String,
    },
}

/// Cumulative byte counters for one connection.
///
/// Written only by the owning adapter's I/O tasks.
#[derive(Debug, Default)]
pub struct LinkCounters {
    bytes_sent: AtomicU64,
    bytes_received: AtomicU64,
}

impl LinkCounters {
    /// Add to the sent total.
    pub fn record_sent(&self, bytes: u64) {
        self.bytes_sent.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Add to the received total.
    pub fn record_received(&self, bytes: u64) {
        self.bytes_received.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Total bytes sent on this connection.
    pub fn bytes_sent(&self) -> u64 {
        self.bytes_sent.load(Ordering::Relaxed)
    }

    /// Total bytes received on this connection.
    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }
}

/// An established connection, exclusively owned by its session.
///
/// Dropping the link signals the adapter's I/O tasks to shut down, so a
/// torn-down session cannot leave stale handlers behind.
#[derive(Debug)]
pub struct TransportLink {
    kind: TransportKind,
    outbound: mpsc::Sender<ChannelFrame>,
    events: mpsc::Receiver<LinkEvent>,
    counters: Arc<LinkCounters>,
    shutdown: Option<oneshot::Sender<()>>,
}

/// The adapter-side ends of a link's queues.
#[derive(Debug)]
pub struct LinkBackend {
    /// Frames the session wants sent.
    pub outbound: mpsc::Receiver<ChannelFrame>,
    /// Where decoded inbound frames and the close notice go.
    pub events: mpsc::Sender<LinkEvent>,
    /// Byte counters to update from the I/O tasks.
    pub counters: Arc<LinkCounters>,
    /// Fires when the link is dropped or closed.
    pub shutdown: oneshot::Receiver<()>,
}

impl TransportLink {
    /// Create a connected link/backend pair for a transport kind.
    pub fn pair(kind: TransportKind) -> (Self, LinkBackend) {
        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        let (event_tx, event_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let counters = Arc::new(LinkCounters::default());

        let link = Self {
            kind,
            outbound: outbound_tx,
            events: event_rx,
            counters: counters.clone(),
            shutdown: Some(shutdown_tx),
        };
        let backend = LinkBackend {
            outbound: outbound_rx,
            events: event_tx,
            counters,
            shutdown: shutdown_rx,
        };
        (link, backend)
    }

    /// Which transport carries this link.
    pub fn kind(&self) -> TransportKind {
        self.kind
    }

    /// Queue a frame for sending.
    pub async fn send(&self, frame: ChannelFrame) -> Result<(), TransportError> {
        self.outbound
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Wait for the next inbound event. `None` means the adapter's tasks
    /// are gone and no further events will arrive.
    pub async fn next_event(&mut self) -> Option<LinkEvent> {
        self.events.recv().await
    }

    /// Shared byte counters for this connection.
    pub fn counters(&self) -> Arc<LinkCounters> {
        self.counters.clone()
    }

    /// Signal the adapter tasks to shut down.
    pub fn close(&mut self) {
        if let Some(tx) = self.shutdown.take() {
            let _ = tx.send(());
        }
    }
}

impl Drop for TransportLink {
    fn drop(&mut self) {
        self.close();
    }
}
