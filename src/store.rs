use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};

use tracing::debug;

use crate::connection::{ConnectionId, ConnectionRef};
use crate::envelope::FormState;
use crate::fanout::Fanout;
use crate::registry::ConnectionRegistry;

/// Result of feeding one inbound state into the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    /// First state ever seen for the form. Forwarded to replicas only.
    Created,
    /// Newer than the stored state. Forwarded to everyone but the origin.
    Applied,
    /// Not newer. The origin was sent the stored state back.
    Rejected,
    /// Identical to the stored state. Nothing was sent; the origin already
    /// holds the true state.
    Duplicate,
    /// Not newer, and the origin repeated a state it was already corrected
    /// for. The stored state has not changed since, so nothing was sent.
    Repeated,
}

/// Authoritative per-form state with last-writer-wins merging.
///
/// Each form behaves like a last-writer-wins register keyed by the
/// client-chosen `ts`, with one difference from the textbook register: a tie
/// is not newer, so the incumbent value survives and the sender is told the
/// real state.
///
/// An exact copy of the stored state is not answered at all. Replicas feed
/// each other's broadcasts back (bootstrap after a reconnect, or two peers
/// listing each other), and answering a copy with the same copy would bounce
/// it between them indefinitely.
///
/// This departs from the plain last-writer-wins correction rule, which answers
/// every non-newer update with the stored state, identical or not. The store
/// departs from it once more: an origin that repeats a losing state it was
/// already corrected for is not corrected again while the stored state is
/// unchanged. Two peers holding different states at the same `ts` would
/// otherwise trade corrections forever. The memory of sent corrections is
/// dropped with [`forget`](Self::forget) when a connection closes.
///
/// | stored   | inbound                         | result                 | sent to                                 |
/// |----------|---------------------------------|------------------------|-----------------------------------------|
/// | none     | any                             | store inbound          | all replicas                            |
/// | `(s, T)` | `(s, T)`                        | unchanged              | nobody                                  |
/// | `ts = T` | `ts <= T`                       | unchanged              | origin only                             |
/// | `ts = T` | repeat of a corrected `ts <= T` | unchanged              | nobody                                  |
/// | `ts = T` | `ts > T`                        | replace state and `ts` | clients of the form + replicas − origin |
///
/// [`update`](Self::update) runs the read-compare-write-fanout sequence
/// under one lock, so concurrent updates to the same form cannot both win.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use formsync::memory::MemoryConnection;
/// use formsync::{ConnectionRef, ConnectionRegistry, FormState, FormStateStore};
///
/// let store = FormStateStore::new(Arc::new(ConnectionRegistry::new()));
/// let c1: ConnectionRef = Arc::new(MemoryConnection::new("c1"));
/// let c2 = Arc::new(MemoryConnection::new("c2"));
///
/// store.update(FormState::new("f", 1, 1), &c1);
/// store.update(FormState::new("f", 0, 1), &(c2.clone() as ConnectionRef));
///
/// // Tie: incumbent wins and c2 is corrected.
/// assert_eq!(store.get("f"), Some(FormState::new("f", 1, 1)));
/// assert_eq!(c2.states(), vec![FormState::new("f", 1, 1)]);
/// ```
pub struct FormStateStore {
    inner: Mutex<Inner>,
    fanout: Fanout,
}

/// A correction already sent: the losing state the origin reported and the
/// stored state it was answered with.
struct Correction {
    losing: FormState,
    sent: FormState,
}

#[derive(Default)]
struct Inner {
    forms: HashMap<String, FormState>,
    corrections: HashMap<(ConnectionId, String), Correction>,
}

impl FormStateStore {
    /// Create an empty store broadcasting through `registry`.
    pub fn new(registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
            fanout: Fanout::new(registry),
        }
    }

    /// The registry updates are broadcast through.
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        self.fanout.registry()
    }

    /// The fanout updates are sent through.
    pub fn fanout(&self) -> &Fanout {
        &self.fanout
    }

    /// Current state of `form`, if any update has been seen for it.
    pub fn get(&self, form: &str) -> Option<FormState> {
        self.lock().forms.get(form).cloned()
    }

    /// Every known form state, in no particular order.
    pub fn all(&self) -> Vec<FormState> {
        self.lock().forms.values().cloned().collect()
    }

    /// Number of known forms.
    pub fn len(&self) -> usize {
        self.lock().forms.len()
    }

    /// Whether no form has been seen yet.
    pub fn is_empty(&self) -> bool {
        self.lock().forms.is_empty()
    }

    /// Merge an inbound state from `origin` and notify whoever needs it.
    pub fn update(&self, inbound: FormState, origin: &ConnectionRef) -> UpdateOutcome {
        let mut guard = self.lock();
        let Inner { forms, corrections } = &mut *guard;

        let Some(current) = forms.get_mut(&inbound.form) else {
            // Only the sender knows this form yet, so only replicas need it.
            self.fanout.emit_to_replicas(&inbound);
            debug!(
                connection = origin.label(),
                form = inbound.form.as_str(),
                state = inbound.state,
                ts = inbound.ts,
                "added new form"
            );
            forms.insert(inbound.form.clone(), inbound);
            return UpdateOutcome::Created;
        };

        if inbound == *current {
            debug!(
                connection = origin.label(),
                form = inbound.form.as_str(),
                ts = inbound.ts,
                "ignoring duplicate update"
            );
            return UpdateOutcome::Duplicate;
        }

        if !inbound.supersedes(current) {
            let key = (origin.id(), inbound.form.clone());
            if let Some(previous) = corrections.get(&key) {
                if previous.losing == inbound && previous.sent == *current {
                    debug!(
                        connection = origin.label(),
                        form = inbound.form.as_str(),
                        ts = inbound.ts,
                        "origin already corrected"
                    );
                    return UpdateOutcome::Repeated;
                }
            }

            self.fanout.emit_to(origin, current);
            debug!(
                connection = origin.label(),
                form = inbound.form.as_str(),
                state = inbound.state,
                ts = inbound.ts,
                stored_ts = current.ts,
                "ignoring stale update"
            );
            corrections.insert(
                key,
                Correction {
                    losing: inbound,
                    sent: current.clone(),
                },
            );
            return UpdateOutcome::Rejected;
        }

        current.state = inbound.state;
        current.ts = inbound.ts;
        self.fanout.emit_to_all_except(origin.id(), current);
        debug!(
            connection = origin.label(),
            form = current.form.as_str(),
            state = current.state,
            ts = current.ts,
            "updated form"
        );
        UpdateOutcome::Applied
    }

    /// Drop what was remembered about corrections sent to `id`.
    ///
    /// Called when a connection closes, so a peer that comes back is
    /// corrected afresh.
    pub fn forget(&self, id: ConnectionId) {
        self.lock().corrections.retain(|(owner, _), _| *owner != id);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
