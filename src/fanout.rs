use std::sync::Arc;

use tracing::{debug, warn};

use crate::connection::{ConnectionId, ConnectionRef};
use crate::envelope::{Envelope, FormState};
use crate::registry::ConnectionRegistry;

/// Computes who needs to hear about a form state and sends it to them.
///
/// Targets are resolved against the registry at send time. Every send is
/// fire-and-forget, so one slow connection never holds up the others.
#[derive(Clone)]
pub struct Fanout {
    registry: Arc<ConnectionRegistry>,
}

impl Fanout {
    /// Create a fanout over `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self { registry }
    }

    /// The registry targets are resolved against.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Send `state` to a single connection.
    pub fn emit_to(&self, connection: &ConnectionRef, state: &FormState) -> usize {
        match Envelope::state(state) {
            Ok(envelope) => {
                send(connection, envelope, state);
                1
            }
            Err(e) => {
                warn!(form = state.form.as_str(), error = %e, "failed to encode state");
                0
            }
        }
    }

    /// Send `state` to every client attached to its form and to every
    /// replica, except `origin`.
    pub fn emit_to_all_except(&self, origin: ConnectionId, state: &FormState) -> usize {
        let targets = self
            .registry
            .clients_for(&state.form)
            .into_iter()
            .chain(self.registry.all_replicas())
            .filter(|c| c.id() != origin);
        broadcast(targets, state)
    }

    /// Send `state` to every replica.
    pub fn emit_to_replicas(&self, state: &FormState) -> usize {
        broadcast(self.registry.all_replicas(), state)
    }
}

fn broadcast(targets: impl IntoIterator<Item = ConnectionRef>, state: &FormState) -> usize {
    let envelope = match Envelope::state(state) {
        Ok(envelope) => envelope,
        Err(e) => {
            warn!(form = state.form.as_str(), error = %e, "failed to encode state");
            return 0;
        }
    };

    let mut count = 0;
    for connection in targets {
        send(&connection, envelope.clone(), state);
        count += 1;
    }
    count
}

fn send(connection: &ConnectionRef, envelope: Envelope, state: &FormState) {
    let delivery = connection.emit(envelope);
    debug!(
        connection = connection.label(),
        form = state.form.as_str(),
        state = state.state,
        ?delivery,
        "sent state update"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::Connection;
    use crate::memory::MemoryConnection;

    fn conn(label: &str) -> Arc<MemoryConnection> {
        Arc::new(MemoryConnection::new(label))
    }

    #[test]
    fn all_except_skips_origin_and_other_forms() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = Fanout::new(Arc::clone(&registry));

        let origin = conn("origin");
        let sibling = conn("sibling");
        let elsewhere = conn("elsewhere");
        let replica = conn("replica");

        registry.upsert_client("f", &(origin.clone() as ConnectionRef));
        registry.upsert_client("f", &(sibling.clone() as ConnectionRef));
        registry.upsert_client("g", &(elsewhere.clone() as ConnectionRef));
        registry.add_replica(replica.clone());

        let state = FormState::new("f", 2, 5);
        assert_eq!(fanout.emit_to_all_except(origin.id(), &state), 2);

        assert!(origin.sent().is_empty());
        assert!(elsewhere.sent().is_empty());
        assert_eq!(sibling.states(), vec![state.clone()]);
        assert_eq!(replica.states(), vec![state]);
    }

    #[test]
    fn replica_origin_is_excluded_too() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = Fanout::new(Arc::clone(&registry));
        let a = conn("a");
        let b = conn("b");
        registry.add_replica(a.clone());
        registry.add_replica(b.clone());

        fanout.emit_to_all_except(a.id(), &FormState::new("f", 1, 1));

        assert!(a.sent().is_empty());
        assert_eq!(b.sent().len(), 1);
    }

    #[test]
    fn replicas_only_ignores_clients() {
        let registry = Arc::new(ConnectionRegistry::new());
        let fanout = Fanout::new(Arc::clone(&registry));
        let client = conn("client");
        let replica = conn("replica");
        registry.upsert_client("f", &(client.clone() as ConnectionRef));
        registry.add_replica(replica.clone());

        assert_eq!(fanout.emit_to_replicas(&FormState::new("f", 1, 1)), 1);
        assert!(client.sent().is_empty());
        assert_eq!(replica.sent().len(), 1);
    }
}
