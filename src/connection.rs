use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use crate::envelope::Envelope;
use crate::events::{EventKind, EventKindError, Handler};

/// Process-unique identity of a connection.
///
/// Registry membership and fanout exclusion compare connections by id, never
/// by address or label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Allocate a fresh id.
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }

    /// Raw numeric value.
    pub fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// What happened to an emitted envelope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to an open link.
    Sent,
    /// Held until the link opens.
    Queued,
    /// Discarded because the link is not open.
    Dropped,
}

/// A bidirectional envelope endpoint.
///
/// Local browser clients and replica peers both implement this trait; the
/// store and fanout only ever see `dyn Connection`, so a replica is just
/// another connection to them.
///
/// `emit` never blocks: it either hands the envelope to the link, queues it,
/// or drops it, and reports which.
pub trait Connection: Send + Sync {
    /// Identity used for membership and exclusion.
    fn id(&self) -> ConnectionId;

    /// Human-readable label for logs.
    fn label(&self) -> &str;

    /// Send an envelope with the connection's default durability.
    fn emit(&self, envelope: Envelope) -> Delivery;

    /// Bind a handler to an event kind.
    fn on(&self, kind: EventKind, handler: Handler);

    /// Bind a handler to an event kind given by name.
    ///
    /// Unknown names are a setup error and are rejected before anything is
    /// registered.
    fn on_named(&self, kind: &str, handler: Handler) -> Result<(), EventKindError> {
        self.on(kind.parse()?, handler);
        Ok(())
    }
}

/// Shared handle to any connection.
pub type ConnectionRef = Arc<dyn Connection>;

impl fmt::Debug for dyn Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id())
            .field("label", &self.label())
            .finish()
    }
}
