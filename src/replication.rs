//! Outbound replication to a static set of peer nodes.
//!
//! Every configured peer gets one long-lived [`Channel`], registered once as
//! a replica. Whenever that channel opens, the peer is sent every known form
//! state; the peer merges them like any other update, so a node rejoining
//! mid-session converges without special handling. Inbound `"state"` frames
//! from the peer go through [`FormStateStore::update`] exactly as a client's
//! would.

use std::sync::{Arc, Weak};

use tracing::info;

use crate::channel::{Channel, ChannelOptions, Connector, WebSocketConnector};
use crate::config::ReplicationConfig;
use crate::connection::{Connection, ConnectionRef};
use crate::events::{handler, Event, EventKind};
use crate::protocol::state_payload;
use crate::store::FormStateStore;

/// Owns the channels to every replica peer.
pub struct ReplicationManager {
    channels: Vec<Arc<Channel>>,
}

impl ReplicationManager {
    /// Open a WebSocket channel to every peer in `config`.
    ///
    /// Never fails on unreachable peers: their channels keep retrying in the
    /// background. Must be called within a Tokio runtime.
    pub fn start(store: &Arc<FormStateStore>, config: &ReplicationConfig) -> Self {
        let connectors = config
            .peers
            .iter()
            .map(|peer| WebSocketConnector::new(peer.host.clone(), peer.port));
        Self::start_with(store, connectors, config.channel_options())
    }

    /// Like [`start`](Self::start), over arbitrary connectors.
    pub fn start_with<C, I>(store: &Arc<FormStateStore>, connectors: I, options: ChannelOptions) -> Self
    where
        C: Connector,
        I: IntoIterator<Item = C>,
    {
        let channels: Vec<_> = connectors
            .into_iter()
            .map(|connector| {
                let channel = Channel::new(connector, options.clone());
                bind_replica(store, &(Arc::clone(&channel) as ConnectionRef));
                channel.start();
                channel
            })
            .collect();

        info!(peers = channels.len(), "replication manager started");
        Self { channels }
    }

    /// Channels to every configured peer, in configuration order.
    pub fn channels(&self) -> &[Arc<Channel>] {
        &self.channels
    }

    /// Stop every channel's supervisor.
    pub fn shutdown(&self) {
        for channel in &self.channels {
            channel.shutdown();
        }
    }
}

/// Register `connection` as a replica of `store` and bind its handlers.
///
/// Every open bootstraps the peer, every close forgets the corrections it
/// was sent, and inbound `"state"` frames are merged.
pub fn bind_replica(store: &Arc<FormStateStore>, connection: &ConnectionRef) {
    store.registry().add_replica(Arc::clone(connection));

    let weak_conn = Arc::downgrade(connection);
    let weak_store = Arc::downgrade(store);
    connection.on(
        EventKind::Open,
        handler(move |_| {
            if let (Some(connection), Some(store)) = (weak_conn.upgrade(), weak_store.upgrade()) {
                bootstrap(&store, &connection);
            }
        }),
    );

    let id = connection.id();
    let weak_store = Arc::downgrade(store);
    connection.on(
        EventKind::Close,
        handler(move |_| {
            if let Some(store) = weak_store.upgrade() {
                store.forget(id);
            }
        }),
    );

    let weak_conn: Weak<dyn Connection> = Arc::downgrade(connection);
    let weak_store = Arc::downgrade(store);
    connection.on(
        EventKind::Message,
        handler(move |event| {
            let Event::Message(envelope) = event else { return };
            let (Some(connection), Some(store)) = (weak_conn.upgrade(), weak_store.upgrade())
            else {
                return;
            };
            if let Some(state) = state_payload(connection.as_ref(), envelope) {
                store.update(state, &connection);
            }
        }),
    );
}

/// Send every known form state to `connection`, whatever its timestamp.
pub fn bootstrap(store: &FormStateStore, connection: &ConnectionRef) -> usize {
    let states = store.all();
    let sent: usize = states
        .iter()
        .map(|state| store.fanout().emit_to(connection, state))
        .sum();
    info!(connection = connection.label(), forms = sent, "bootstrapped replica");
    sent
}
