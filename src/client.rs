use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tracing::{trace, warn};

use crate::connection::{Connection, ConnectionId, Delivery};
use crate::envelope::Envelope;
use crate::events::{Event, EventKind, Handler, Handlers};

/// Server side of an accepted browser socket.
///
/// The connection is transport-agnostic: whoever accepted the socket feeds
/// inbound text frames to [`receive_text`](Self::receive_text), forwards the
/// frames from the paired receiver to the socket, and calls
/// [`close`](Self::close) when the socket goes away.
///
/// Local clients are not reconnected, so there is no outbound queue: an
/// envelope emitted after close is dropped.
pub struct ClientConnection {
    id: ConnectionId,
    label: String,
    handlers: Handlers,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    closed: AtomicBool,
}

impl ClientConnection {
    /// Create an open connection and the stream of frames to write to the
    /// socket.
    pub fn new(label: impl Into<String>) -> (Arc<Self>, mpsc::UnboundedReceiver<String>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let connection = Arc::new(Self {
            id: ConnectionId::next(),
            label: label.into(),
            handlers: Handlers::new(),
            outbound: Mutex::new(Some(tx)),
            closed: AtomicBool::new(false),
        });
        (connection, rx)
    }

    /// Decode one inbound frame and hand it to the message handlers.
    ///
    /// Undecodable frames are logged and discarded; the connection stays up.
    pub fn receive_text(&self, text: &str) {
        trace!(connection = self.label.as_str(), frame = text, "received envelope");
        match Envelope::decode(text) {
            Ok(envelope) => self.handlers.dispatch(&Event::Message(envelope)),
            Err(e) => warn!(connection = self.label.as_str(), error = %e, "discarding malformed envelope"),
        }
    }

    /// Mark the connection closed and fire the close handlers once.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        self.outbound
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        self.handlers.dispatch(&Event::Close);
    }

    /// Whether [`close`](Self::close) has been called.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Connection for ClientConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn emit(&self, envelope: Envelope) -> Delivery {
        let frame = match envelope.encode() {
            Ok(frame) => frame,
            Err(e) => {
                warn!(connection = self.label.as_str(), error = %e, "dropping unencodable envelope");
                return Delivery::Dropped;
            }
        };

        let outbound = self.outbound.lock().unwrap_or_else(PoisonError::into_inner);
        match outbound.as_ref().map(|tx| tx.send(frame)) {
            Some(Ok(())) => Delivery::Sent,
            _ => Delivery::Dropped,
        }
    }

    fn on(&self, kind: EventKind, handler: Handler) {
        self.handlers.push(kind, handler);
    }
}
