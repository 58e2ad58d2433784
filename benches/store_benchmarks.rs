use std::sync::Arc;

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use formsync::prelude::*;
use formsync::{ConnectionId, Delivery, EventKind, Handler};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Accepts and discards everything, so iterations don't accumulate frames.
struct Sink {
    id: ConnectionId,
    label: String,
}

impl Sink {
    fn new(label: String) -> ConnectionRef {
        Arc::new(Self {
            id: ConnectionId::next(),
            label,
        })
    }
}

impl Connection for Sink {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    fn emit(&self, envelope: Envelope) -> Delivery {
        black_box(envelope);
        Delivery::Sent
    }

    fn on(&self, _kind: EventKind, _handler: Handler) {}
}

fn node(clients: usize, replicas: usize) -> (Arc<FormStateStore>, Vec<ConnectionRef>) {
    let registry = Arc::new(ConnectionRegistry::new());
    let store = Arc::new(FormStateStore::new(Arc::clone(&registry)));
    let clients: Vec<ConnectionRef> = (0..clients)
        .map(|i| Sink::new(format!("client-{i}")))
        .collect();
    for client in &clients {
        registry.upsert_client("form", client);
    }
    for i in 0..replicas {
        registry.add_replica(Sink::new(format!("replica-{i}")));
    }
    (store, clients)
}

fn bench_create(c: &mut Criterion) {
    c.bench_function("FormStateStore::update create x1000", |b| {
        b.iter(|| {
            let (store, clients) = node(1, 2);
            for i in 0..1000 {
                store.update(FormState::new(format!("form-{i}"), i, 1), &clients[0]);
            }
            black_box(store.len())
        })
    });
}

fn bench_monotonic_updates(c: &mut Criterion) {
    let (store, clients) = node(10, 3);

    let mut ts = 0;
    c.bench_function("FormStateStore::update applied, 10 clients + 3 replicas", |b| {
        b.iter(|| {
            ts += 1;
            black_box(store.update(FormState::new("form", ts, ts), &clients[0]))
        })
    });
}

fn bench_random_updates(c: &mut Criterion) {
    let (store, clients) = node(100, 3);
    let mut rng = StdRng::seed_from_u64(7);

    c.bench_function("FormStateStore::update random ts, 100 clients", |b| {
        b.iter(|| {
            let origin = &clients[rng.gen_range(0..clients.len())];
            let state = FormState::new("form", rng.gen(), rng.gen_range(0..1_000_000));
            black_box(store.update(state, origin))
        })
    });
}

fn bench_bootstrap(c: &mut Criterion) {
    let (store, clients) = node(1, 0);
    for i in 0..1000 {
        store.update(FormState::new(format!("form-{i}"), i, i), &clients[0]);
    }

    c.bench_function("bootstrap 1000 forms", |b| {
        b.iter(|| {
            let peer = Sink::new("peer".to_string());
            black_box(formsync::replication::bootstrap(&store, &peer))
        })
    });
}

criterion_group!(
    benches,
    bench_create,
    bench_monotonic_updates,
    bench_random_updates,
    bench_bootstrap,
);
criterion_main!(benches);
