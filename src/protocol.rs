//! Wiring between connections and the store.
//!
//! Clients and replicas speak the same vocabulary. The only difference is
//! that a client is attached to the form it reports on, so later updates to
//! that form reach it, and is detached from everything when it closes.

use std::sync::{Arc, Weak};

use tracing::warn;

use crate::connection::{Connection, ConnectionRef};
use crate::envelope::{Envelope, FormState, STATE};
use crate::events::{handler, Event, EventKind};
use crate::store::FormStateStore;

/// Parse a `"state"` envelope, logging and discarding malformed payloads.
///
/// Returns `None` for other envelope types.
pub fn state_payload(connection: &dyn Connection, envelope: &Envelope) -> Option<FormState> {
    if envelope.kind != STATE {
        return None;
    }
    match envelope.payload::<FormState>() {
        Ok(state) => Some(state),
        Err(e) => {
            warn!(connection = connection.label(), error = %e, "discarding malformed state");
            None
        }
    }
}

/// Bind the client-side state protocol to a freshly accepted connection.
///
/// - `"state"`: attach the connection to the form, then merge.
/// - close: detach the connection from every form and forget the
///   corrections it was sent.
pub fn attach_client(connection: &ConnectionRef, store: &Arc<FormStateStore>) {
    let weak_conn = Arc::downgrade(connection);
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
                store.registry().upsert_client(&state.form, &connection);
                store.update(state, &connection);
            }
        }),
    );

    let id = connection.id();
    let weak_store: Weak<FormStateStore> = Arc::downgrade(store);
    connection.on(
        EventKind::Close,
        handler(move |_| {
            if let Some(store) = weak_store.upgrade() {
                store.registry().detach_client(id);
                store.forget(id);
            }
        }),
    );
}
