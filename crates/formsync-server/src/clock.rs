//! Server half of the client clock-drift probe.
//!
//! A client sends `{"type":"ts","message":{"id":"…"}}` and gets back the same
//! id together with the node's wall clock in epoch milliseconds.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use formsync::events::handler;
use formsync::{Connection, ConnectionRef, Delivery, Envelope, Event, EventKind, TS};
use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

#[derive(Debug, Deserialize)]
struct TsRequest {
    id: String,
}

#[derive(Debug, Serialize)]
struct TsReply {
    id: String,
    ts: u64,
}

/// Answer every `"ts"` envelope arriving on `connection`.
pub fn attach(connection: &ConnectionRef) {
    let weak = Arc::downgrade(connection);
    connection.on(
        EventKind::Message,
        handler(move |event| {
            let Event::Message(envelope) = event else {
                return;
            };
            if envelope.kind != TS {
                return;
            }
            if let Some(connection) = weak.upgrade() {
                respond(connection.as_ref(), envelope, now_millis());
            }
        }),
    );
}

/// Reply to one request with timestamp `ts`.
pub fn respond(connection: &dyn Connection, request: &Envelope, ts: u64) -> Delivery {
    let request: TsRequest = match request.payload() {
        Ok(request) => request,
        Err(e) => {
            warn!(connection = connection.label(), error = %e, "discarding clock request");
            return Delivery::Dropped;
        }
    };

    let reply = TsReply { id: request.id, ts };
    match Envelope::new(TS, &reply) {
        Ok(envelope) => {
            trace!(connection = connection.label(), id = reply.id.as_str(), "answered clock request");
            connection.emit(envelope)
        }
        Err(e) => {
            warn!(connection = connection.label(), error = %e, "failed to encode clock reply");
            Delivery::Dropped
        }
    }
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use formsync::memory::MemoryConnection;
    use formsync::FormState;

    fn ts_request(id: &str) -> Envelope {
        Envelope::decode(&format!(r#"{{"type":"ts","message":{{"id":"{id}"}}}}"#)).unwrap()
    }

    #[test]
    fn echoes_id_with_given_time() {
        let conn = MemoryConnection::new("c");
        assert_eq!(respond(&conn, &ts_request("a1"), 42), Delivery::Sent);

        let sent = conn.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].kind, "ts");
        assert_eq!(sent[0].message["id"], "a1");
        assert_eq!(sent[0].message["ts"], 42);
    }

    #[test]
    fn malformed_request_is_dropped() {
        let conn = MemoryConnection::new("c");
        let bad = Envelope::decode(r#"{"type":"ts","message":{"nope":1}}"#).unwrap();

        assert_eq!(respond(&conn, &bad, 1), Delivery::Dropped);
        assert!(conn.sent().is_empty());
    }

    #[test]
    fn attached_handler_answers_only_ts() {
        let conn = Arc::new(MemoryConnection::new("c"));
        attach(&(conn.clone() as ConnectionRef));

        conn.receive(Envelope::state(&FormState::new("f", 1, 1)).unwrap());
        assert!(conn.sent().is_empty());

        conn.receive(ts_request("x"));
        let sent = conn.take_sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].message["id"], "x");
        assert!(sent[0].message["ts"].as_u64().unwrap() > 0);
    }
}
