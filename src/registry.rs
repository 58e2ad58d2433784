use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use tracing::{debug, trace};

use crate::connection::{ConnectionId, ConnectionRef};

/// Tracks which local clients are attached to which form, and the set of
/// replica peers.
///
/// The registry records membership only. It never opens or closes the
/// connections it holds.
#[derive(Default)]
pub struct ConnectionRegistry {
    clients: RwLock<HashMap<String, Vec<ConnectionRef>>>,
    replicas: RwLock<Vec<ConnectionRef>>,
}

impl ConnectionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `connection` to `form`. Returns `false` if it was already
    /// attached.
    pub fn upsert_client(&self, form: &str, connection: &ConnectionRef) -> bool {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        let attached = clients.entry(form.to_string()).or_default();

        if attached.iter().any(|c| c.id() == connection.id()) {
            trace!(connection = connection.label(), form, "already attached");
            return false;
        }

        attached.push(ConnectionRef::clone(connection));
        trace!(connection = connection.label(), form, "attached to form");
        true
    }

    /// Detach a connection from every form. Returns the number of forms it
    /// was removed from.
    pub fn detach_client(&self, id: ConnectionId) -> usize {
        let mut clients = self.clients.write().unwrap_or_else(PoisonError::into_inner);
        let mut removed = 0;

        for (form, attached) in clients.iter_mut() {
            if let Some(idx) = attached.iter().position(|c| c.id() == id) {
                let connection = attached.remove(idx);
                debug!(connection = connection.label(), form = form.as_str(), "removed from form");
                removed += 1;
            }
        }
        clients.retain(|_, attached| !attached.is_empty());
        removed
    }

    /// Snapshot of the clients attached to `form`, possibly empty.
    pub fn clients_for(&self, form: &str) -> Vec<ConnectionRef> {
        let clients = self.clients.read().unwrap_or_else(PoisonError::into_inner);
        clients.get(form).cloned().unwrap_or_default()
    }

    /// Register a replica connection.
    ///
    /// Registering the same connection twice keeps a single entry, so a
    /// peer whose channel reconnects is never counted twice.
    pub fn add_replica(&self, connection: ConnectionRef) {
        let mut replicas = self.replicas.write().unwrap_or_else(PoisonError::into_inner);
        if let Some(slot) = replicas.iter_mut().find(|c| c.id() == connection.id()) {
            *slot = connection;
            return;
        }
        debug!(connection = connection.label(), "registered replica");
        replicas.push(connection);
    }

    /// Snapshot of every registered replica.
    pub fn all_replicas(&self) -> Vec<ConnectionRef> {
        self.replicas
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Number of forms with at least one attached client.
    pub fn form_count(&self) -> usize {
        self.clients
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}
