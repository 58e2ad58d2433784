//! In-process connections and transports.
//!
//! Nothing here touches the network. Ideal for testing and prototyping.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use futures::channel::mpsc as frames;
use futures::future::{self, BoxFuture};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::channel::{ChannelError, Connector, Link};
use crate::connection::{Connection, ConnectionId, Delivery};
use crate::envelope::{Envelope, FormState, STATE};
use crate::events::{Event, EventKind, Handler, Handlers};

/// A connection that records everything emitted to it.
///
/// Starts open. Tests drive inbound traffic with [`MemoryConnection::receive`]
/// and lifecycle with [`MemoryConnection::close`].
///
/// # Example
///
/// ```
/// use formsync::memory::MemoryConnection;
/// use formsync::{Connection, Envelope, FormState};
///
/// let conn = MemoryConnection::new("c1");
/// conn.emit(Envelope::state(&FormState::new("f", 3, 1)).unwrap());
///
/// assert_eq!(conn.states(), vec![FormState::new("f", 3, 1)]);
/// ```
pub struct MemoryConnection {
    id: ConnectionId,
    label: String,
    open: AtomicBool,
    sent: Mutex<Vec<Envelope>>,
    handlers: Handlers,
}

impl MemoryConnection {
    /// Create an open connection.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            id: ConnectionId::next(),
            label: label.into(),
            open: AtomicBool::new(true),
            sent: Mutex::new(Vec::new()),
            handlers: Handlers::new(),
        }
    }

    /// Every envelope emitted while open, oldest first.
    pub fn sent(&self) -> Vec<Envelope> {
        self.sent.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Remove and return the recorded envelopes.
    pub fn take_sent(&self) -> Vec<Envelope> {
        std::mem::take(&mut *self.sent.lock().unwrap_or_else(PoisonError::into_inner))
    }

    /// Payloads of the recorded `"state"` envelopes.
    pub fn states(&self) -> Vec<FormState> {
        self.sent()
            .iter()
            .filter(|env| env.kind == STATE)
            .filter_map(|env| env.payload().ok())
            .collect()
    }

    /// Deliver an inbound envelope to the message handlers.
    pub fn receive(&self, envelope: Envelope) {
        self.handlers.dispatch(&Event::Message(envelope));
    }

    /// Fire the open handlers.
    pub fn open(&self) {
        self.open.store(true, Ordering::SeqCst);
        self.handlers.dispatch(&Event::Open);
    }

    /// Mark closed and fire the close handlers. Later emits are dropped.
    pub fn close(&self) {
        self.open.store(false, Ordering::SeqCst);
        self.handlers.dispatch(&Event::Close);
    }
}

impl Connection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn emit(&self, envelope: Envelope) -> Delivery {
        if !self.open.load(Ordering::SeqCst) {
            return Delivery::Dropped;
        }
        self.sent
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(envelope);
        Delivery::Sent
    }

    fn on(&self, kind: EventKind, handler: Handler) {
        self.handlers.push(kind, handler);
    }
}

/// A [`Connector`] whose links terminate in [`MemoryPeer`]s handed out by a
/// [`MemoryListener`].
#[derive(Clone)]
pub struct MemoryConnector {
    label: String,
    accepted: mpsc::UnboundedSender<MemoryPeer>,
    refusing: Arc<AtomicBool>,
}

impl MemoryConnector {
    /// Create a connector and the listener that receives its links.
    pub fn new() -> (Self, MemoryListener) {
        Self::with_label("memory")
    }

    /// Like [`MemoryConnector::new`], with a custom channel label.
    pub fn with_label(label: impl Into<String>) -> (Self, MemoryListener) {
        let (accepted, incoming) = mpsc::unbounded_channel();
        let connector = Self {
            label: label.into(),
            accepted,
            refusing: Arc::new(AtomicBool::new(false)),
        };
        (connector, MemoryListener { incoming })
    }

    /// While set, every connection attempt fails. Shared by all clones.
    pub fn set_refusing(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }
}

impl Connector for MemoryConnector {
    fn describe(&self) -> String {
        self.label.clone()
    }

    fn connect(&self) -> BoxFuture<'static, Result<Link, ChannelError>> {
        if self.refusing.load(Ordering::SeqCst) {
            return Box::pin(future::ready(Err(ChannelError::Connect(
                "connection refused".into(),
            ))));
        }

        let (to_peer, from_channel) = frames::unbounded();
        let (to_channel, from_peer) = frames::unbounded();
        let peer = MemoryPeer {
            inbound: from_channel,
            outbound: to_channel,
        };

        if self.accepted.send(peer).is_err() {
            return Box::pin(future::ready(Err(ChannelError::Connect(
                "listener dropped".into(),
            ))));
        }

        let link = Link {
            sink: Box::pin(to_peer.sink_map_err(|e| ChannelError::Transport(Box::new(e)))),
            stream: from_peer.map(Ok).boxed(),
        };
        Box::pin(future::ready(Ok(link)))
    }
}

/// Accepting side of a [`MemoryConnector`].
pub struct MemoryListener {
    incoming: mpsc::UnboundedReceiver<MemoryPeer>,
}

impl MemoryListener {
    /// Wait for the next link. Returns `None` once every connector is gone.
    pub async fn accept(&mut self) -> Option<MemoryPeer> {
        self.incoming.recv().await
    }
}

/// Remote end of one in-memory link. Dropping it closes the link.
pub struct MemoryPeer {
    inbound: frames::UnboundedReceiver<String>,
    outbound: frames::UnboundedSender<String>,
}

impl MemoryPeer {
    /// Next raw frame sent by the channel.
    pub async fn recv(&mut self) -> Option<String> {
        self.inbound.next().await
    }

    /// Next frame sent by the channel, decoded.
    pub async fn recv_envelope(&mut self) -> Option<Envelope> {
        let text = self.recv().await?;
        Envelope::decode(&text).ok()
    }

    /// Send a raw frame to the channel. Returns `false` if the link is gone.
    pub fn send_text(&self, text: &str) -> bool {
        self.outbound.unbounded_send(text.to_string()).is_ok()
    }

    /// Send an envelope to the channel.
    pub fn send_envelope(&self, envelope: &Envelope) -> bool {
        match envelope.encode() {
            Ok(text) => self.send_text(&text),
            Err(_) => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::handler;

    #[test]
    fn closed_connection_drops_emits() {
        let conn = MemoryConnection::new("c");
        conn.close();
        let env = Envelope::state(&FormState::new("f", 1, 1)).unwrap();
        assert_eq!(conn.emit(env), Delivery::Dropped);
        assert!(conn.sent().is_empty());
    }

    #[test]
    fn take_sent_drains() {
        let conn = MemoryConnection::new("c");
        conn.emit(Envelope::state(&FormState::new("f", 1, 1)).unwrap());
        assert_eq!(conn.take_sent().len(), 1);
        assert!(conn.sent().is_empty());
    }

    #[test]
    fn on_named_rejects_unknown_kinds() {
        let conn = MemoryConnection::new("c");
        assert!(conn.on_named("message", handler(|_| {})).is_ok());
        assert!(conn.on_named("request", handler(|_| {})).is_err());
    }

    #[tokio::test]
    async fn refusing_connector_fails() {
        let (connector, _listener) = MemoryConnector::new();
        connector.set_refusing(true);
        assert!(matches!(
            connector.connect().await,
            Err(ChannelError::Connect(_))
        ));
    }
}
