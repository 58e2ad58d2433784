//! # formsync
//!
//! Real-time replication of boolean-input forms across browser clients and
//! cooperating backend nodes.
//!
//! Every form is a bitmask plus a logical timestamp chosen by the client that
//! last changed it. Each node holds an authoritative copy of every form and
//! merges incoming updates last-writer-wins; the incumbent keeps ties. After
//! each merge the node tells exactly the connections that need to know:
//! the sender when it lost, everyone else when it won.
//!
//! Replica peers are not special. A peer is reached through a [`Channel`],
//! and a `Channel` is just another [`Connection`], so the
//! [`FormStateStore`] treats it exactly like a browser socket.
//!
//! ## Quick Start
//!
//! ```
//! use std::sync::Arc;
//! use formsync::prelude::*;
//! use formsync::memory::MemoryConnection;
//!
//! let registry = Arc::new(ConnectionRegistry::new());
//! let store = Arc::new(FormStateStore::new(Arc::clone(&registry)));
//!
//! let alice = Arc::new(MemoryConnection::new("alice"));
//! let bob = Arc::new(MemoryConnection::new("bob"));
//! attach_client(&(alice.clone() as ConnectionRef), &store);
//! attach_client(&(bob.clone() as ConnectionRef), &store);
//!
//! alice.receive(Envelope::state(&FormState::new("poll", 0b01, 1)).unwrap());
//! bob.receive(Envelope::state(&FormState::new("poll", 0b00, 0)).unwrap());
//! bob.receive(Envelope::state(&FormState::new("poll", 0b11, 2)).unwrap());
//!
//! assert_eq!(store.get("poll").unwrap().state, 0b11);
//! // Bob was corrected once, Alice heard about Bob's newer write.
//! assert_eq!(bob.states(), vec![FormState::new("poll", 0b01, 1)]);
//! assert_eq!(alice.states(), vec![FormState::new("poll", 0b11, 2)]);
//! ```
//!
//! ## Components
//!
//! - [`Channel`] - reconnecting outbound transport with an outbound queue
//! - [`ClientConnection`] - server side of an accepted browser socket
//! - [`ConnectionRegistry`] - form → attached clients, plus replica peers
//! - [`FormStateStore`] - last-writer-wins merge with targeted fanout
//! - [`ReplicationManager`] - peer channels and full-state bootstrap

#![warn(missing_docs)]

pub mod channel;
mod client;
pub mod config;
mod connection;
mod envelope;
pub mod events;
mod fanout;
pub mod memory;
pub mod prelude;
pub mod protocol;
mod registry;
pub mod replication;
mod store;

pub use channel::{Channel, ChannelError, ChannelOptions, QueueOrder};
pub use client::ClientConnection;
pub use config::{Config, ConfigError};
pub use connection::{Connection, ConnectionId, ConnectionRef, Delivery};
pub use envelope::{Envelope, EnvelopeError, FormState, STATE, TS};
pub use events::{Event, EventKind, EventKindError, Handler};
pub use fanout::Fanout;
pub use protocol::attach_client;
pub use registry::ConnectionRegistry;
pub use replication::ReplicationManager;
pub use store::{FormStateStore, UpdateOutcome};
