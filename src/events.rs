//! Connection lifecycle events and ordered handler lists.
//!
//! Every connection keeps one observer list per [`EventKind`]. Handlers run
//! in registration order, and any number of handlers may be bound to the
//! same kind.

use std::fmt;
use std::str::FromStr;
use std::sync::{Arc, PoisonError, RwLock};

use crate::envelope::Envelope;

/// Kinds of events a connection reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// The underlying link became usable.
    Open,
    /// The underlying link went away.
    Close,
    /// An envelope arrived.
    Message,
}

impl EventKind {
    /// All kinds, in slot order.
    pub const ALL: [EventKind; 3] = [EventKind::Open, EventKind::Close, EventKind::Message];

    /// Wire/config name of this kind.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Close => "close",
            Self::Message => "message",
        }
    }

    fn slot(self) -> usize {
        match self {
            Self::Open => 0,
            Self::Close => 1,
            Self::Message => 2,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Registration was attempted for an event kind that does not exist.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown event type: {0}")]
pub struct EventKindError(pub String);

impl FromStr for EventKind {
    type Err = EventKindError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "close" => Ok(Self::Close),
            "message" => Ok(Self::Message),
            other => Err(EventKindError(other.to_string())),
        }
    }
}

/// An event delivered to handlers.
#[derive(Debug, Clone, PartialEq)]
pub enum Event {
    /// See [`EventKind::Open`].
    Open,
    /// See [`EventKind::Close`].
    Close,
    /// See [`EventKind::Message`].
    Message(Envelope),
}

impl Event {
    /// The kind of this event.
    pub fn kind(&self) -> EventKind {
        match self {
            Self::Open => EventKind::Open,
            Self::Close => EventKind::Close,
            Self::Message(_) => EventKind::Message,
        }
    }
}

/// A registered event callback.
pub type Handler = Arc<dyn Fn(&Event) + Send + Sync>;

/// Wrap a closure as a [`Handler`].
pub fn handler<F>(f: F) -> Handler
where
    F: Fn(&Event) + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Ordered observer lists, one per [`EventKind`].
#[derive(Default)]
pub struct Handlers {
    slots: RwLock<[Vec<Handler>; 3]>,
}

impl Handlers {
    /// Create empty handler lists.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a handler to the list for `kind`.
    pub fn push(&self, kind: EventKind, handler: Handler) {
        let mut slots = self.slots.write().unwrap_or_else(PoisonError::into_inner);
        slots[kind.slot()].push(handler);
    }

    /// Number of handlers bound to `kind`.
    pub fn len(&self, kind: EventKind) -> usize {
        let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
        slots[kind.slot()].len()
    }

    /// Invoke every handler for the event's kind, in registration order.
    ///
    /// The list is snapshotted first, so handlers may register further
    /// handlers without deadlocking. Those take effect on the next event.
    pub fn dispatch(&self, event: &Event) {
        let snapshot = {
            let slots = self.slots.read().unwrap_or_else(PoisonError::into_inner);
            slots[event.kind().slot()].clone()
        };
        for handler in snapshot {
            handler(event);
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for kind in EventKind::ALL {
            map.entry(&kind.as_str(), &self.len(kind));
        }
        map.finish()
    }
}
