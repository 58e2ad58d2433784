use std::net::SocketAddr;
use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::Response;
use formsync::channel::SUBPROTOCOL;
use formsync::{attach_client, ClientConnection, Connection, ConnectionRef};
use futures::{SinkExt, StreamExt};
use tracing::{debug, info};

use crate::{clock, AppState};

/// `GET /socket`: accept a browser client or a peer node.
///
/// Peers dial in exactly like browsers; to this node they are clients.
pub async fn upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(state): State<Arc<AppState>>,
) -> Response {
    ws.protocols([SUBPROTOCOL])
        .on_upgrade(move |socket| serve_socket(socket, addr, state))
}

async fn serve_socket(socket: WebSocket, addr: SocketAddr, state: Arc<AppState>) {
    let (client, mut outbound) = ClientConnection::new(addr.to_string());
    let connection: ConnectionRef = client.clone();
    attach_client(&connection, &state.store);
    clock::attach(&connection);
    info!(connection = client.label(), id = %client.id(), "client connected");

    let (mut sink, mut stream) = socket.split();

    let writer = tokio::spawn(async move {
        while let Some(frame) = outbound.recv().await {
            if sink.send(Message::Text(frame)).await.is_err() {
                break;
            }
        }
    });

    while let Some(frame) = stream.next().await {
        match frame {
            Ok(Message::Text(text)) => client.receive_text(&text),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                debug!(connection = client.label(), error = %e, "socket error");
                break;
            }
        }
    }

    client.close();
    writer.abort();
    info!(connection = client.label(), id = %client.id(), "client disconnected");
}
