//! Outbound, self-healing envelope transport.
//!
//! A [`Channel`] owns one logical link to a remote endpoint. A supervisor
//! task connects, pumps frames in both directions until the link drops,
//! waits a fixed interval and connects again, forever. Handlers bound with
//! [`Connection::on`] survive every reconnect.
//!
//! Sends never wait on the network:
//!
//! - durable sends go straight to the open link, or into the outbound queue
//!   while the link is down; the queue is flushed when the link opens again.
//! - transient sends go to the open link or are dropped.
//!
//! Delivery is at-most-once. Frames handed to a link that dies before
//! writing them are lost.

use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures::future::{self, BoxFuture};
use futures::stream::BoxStream;
use futures::{Sink, SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_tungstenite::tungstenite;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::SEC_WEBSOCKET_PROTOCOL;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tracing::{debug, info, trace, warn};

use crate::connection::{Connection, ConnectionId, Delivery};
use crate::envelope::Envelope;
use crate::events::{Event, EventKind, Handler, Handlers};

/// WebSocket path served by every node.
pub const SOCKET_PATH: &str = "/socket";

/// WebSocket subprotocol spoken by every node.
pub const SUBPROTOCOL: &str = "endpoint";

/// Boxed error from an underlying transport.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Error produced by a channel's transport.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The remote address could not be turned into a request.
    #[error("invalid address {url}: {source}")]
    Address {
        /// Offending URL.
        url: String,
        /// Underlying error.
        #[source]
        source: tungstenite::Error,
    },
    /// Establishing the link failed.
    #[error("connect failed: {0}")]
    Connect(#[source] BoxError),
    /// An open link failed while reading or writing.
    #[error("link failed: {0}")]
    Transport(#[source] BoxError),
}

/// Outgoing half of a link: accepts text frames.
pub type FrameSink = Pin<Box<dyn Sink<String, Error = ChannelError> + Send>>;

/// Incoming half of a link: yields text frames until the link closes.
pub type FrameStream = BoxStream<'static, Result<String, ChannelError>>;

/// An established, message-oriented link.
pub struct Link {
    /// Outgoing frames.
    pub sink: FrameSink,
    /// Incoming frames.
    pub stream: FrameStream,
}

/// Something that can establish links to one fixed remote endpoint.
pub trait Connector: Send + Sync + 'static {
    /// Label of the remote endpoint, used for logs and as the channel label.
    fn describe(&self) -> String;

    /// Attempt to open a new link.
    fn connect(&self) -> BoxFuture<'static, Result<Link, ChannelError>>;
}

/// Connects to a peer node's WebSocket endpoint.
#[derive(Debug, Clone)]
pub struct WebSocketConnector {
    host: String,
    port: u16,
}

impl WebSocketConnector {
    /// Target `ws://{host}:{port}/socket`.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Full URL of the remote endpoint.
    pub fn url(&self) -> String {
        format!("ws://{}:{}{}", self.host, self.port, SOCKET_PATH)
    }
}

impl Connector for WebSocketConnector {
    fn describe(&self) -> String {
        format!("backend,{}:{}", self.host, self.port)
    }

    fn connect(&self) -> BoxFuture<'static, Result<Link, ChannelError>> {
        let url = self.url();
        Box::pin(async move {
            let mut request = url
                .as_str()
                .into_client_request()
                .map_err(|source| ChannelError::Address {
                    url: url.clone(),
                    source,
                })?;
            request
                .headers_mut()
                .insert(SEC_WEBSOCKET_PROTOCOL, HeaderValue::from_static(SUBPROTOCOL));

            let (socket, _response) = tokio_tungstenite::connect_async(request)
                .await
                .map_err(|e| ChannelError::Connect(Box::new(e)))?;
            let (sink, stream) = socket.split();

            let sink = sink
                .with(|text: String| {
                    future::ready(Ok::<_, tungstenite::Error>(tungstenite::Message::Text(text)))
                })
                .sink_map_err(|e| ChannelError::Transport(Box::new(e)));
            let stream = stream.filter_map(|frame| {
                future::ready(match frame {
                    Ok(tungstenite::Message::Text(text)) => Some(Ok(text)),
                    Ok(_) => None,
                    Err(e) => Some(Err(ChannelError::Transport(Box::new(e)))),
                })
            });

            Ok(Link {
                sink: Box::pin(sink),
                stream: stream.boxed(),
            })
        })
    }
}

/// Order in which envelopes queued while disconnected are flushed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueueOrder {
    /// Oldest first: a burst is replayed in the order it was emitted.
    #[default]
    Fifo,
    /// Newest first.
    Lifo,
}

/// Tunables for a [`Channel`].
#[derive(Debug, Clone)]
pub struct ChannelOptions {
    /// Pause between a link closing (or failing to open) and the next
    /// connection attempt. Fixed; it never grows.
    pub reconnect_interval: Duration,
    /// Flush order of the outbound queue.
    pub queue_order: QueueOrder,
}

impl Default for ChannelOptions {
    fn default() -> Self {
        Self {
            reconnect_interval: Duration::from_millis(1000),
            queue_order: QueueOrder::Fifo,
        }
    }
}

#[derive(Default)]
struct Outbound {
    link: Option<mpsc::UnboundedSender<String>>,
    queue: VecDeque<String>,
}

struct Shared {
    id: ConnectionId,
    label: String,
    options: ChannelOptions,
    handlers: Handlers,
    outbound: Mutex<Outbound>,
}

impl Shared {
    fn outbound(&self) -> std::sync::MutexGuard<'_, Outbound> {
        self.outbound.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn send_frame(&self, frame: String, durable: bool) -> Delivery {
        let mut out = self.outbound();
        let mut frame = frame;

        if let Some(link) = out.link.take() {
            match link.send(frame) {
                Ok(()) => {
                    out.link = Some(link);
                    return Delivery::Sent;
                }
                // The pump already exited; treat the link as closed.
                Err(mpsc::error::SendError(returned)) => frame = returned,
            }
        }

        if durable {
            out.queue.push_back(frame);
            Delivery::Queued
        } else {
            Delivery::Dropped
        }
    }

    /// Install a fresh link and flush the queue into it.
    fn attach(&self, link: mpsc::UnboundedSender<String>) {
        let mut out = self.outbound();
        let flushed = out.queue.len();

        loop {
            let next = match self.options.queue_order {
                QueueOrder::Fifo => out.queue.pop_front(),
                QueueOrder::Lifo => out.queue.pop_back(),
            };
            let Some(frame) = next else { break };
            if link.send(frame).is_err() {
                break;
            }
        }
        out.link = Some(link);

        if flushed > 0 {
            debug!(channel = self.label.as_str(), flushed, "flushed outbound queue");
        }
    }

    fn detach(&self) {
        self.outbound().link = None;
    }

    fn receive(&self, text: &str) {
        trace!(channel = self.label.as_str(), frame = text, "received envelope");
        match Envelope::decode(text) {
            Ok(envelope) => self.handlers.dispatch(&Event::Message(envelope)),
            Err(e) => warn!(channel = self.label.as_str(), error = %e, "discarding malformed envelope"),
        }
    }
}

/// A reconnecting connection to a remote endpoint.
///
/// Create with [`Channel::new`], bind handlers, then [`Channel::start`] the
/// supervisor. Dropping the channel stops it.
///
/// ```no_run
/// use formsync::channel::{Channel, ChannelOptions};
/// use formsync::{Connection, Envelope, FormState};
///
/// # async fn demo() {
/// let channel = Channel::connect("10.0.0.2", 8080, ChannelOptions::default());
/// // Queued until the link is up.
/// channel.emit(Envelope::state(&FormState::new("f", 1, 1)).unwrap());
/// # }
/// ```
pub struct Channel {
    shared: Arc<Shared>,
    connector: Arc<dyn Connector>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Channel {
    /// Create a channel without connecting.
    pub fn new(connector: impl Connector, options: ChannelOptions) -> Arc<Self> {
        let label = connector.describe();
        Arc::new(Self {
            shared: Arc::new(Shared {
                id: ConnectionId::next(),
                label,
                options,
                handlers: Handlers::new(),
                outbound: Mutex::new(Outbound::default()),
            }),
            connector: Arc::new(connector),
            task: Mutex::new(None),
        })
    }

    /// Create a WebSocket channel to `host:port` and start it immediately.
    ///
    /// Must be called within a Tokio runtime.
    pub fn connect(host: impl Into<String>, port: u16, options: ChannelOptions) -> Arc<Self> {
        let channel = Self::new(WebSocketConnector::new(host, port), options);
        channel.start();
        channel
    }

    /// Spawn the supervisor task. Calling this more than once has no effect.
    ///
    /// Must be called within a Tokio runtime.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.is_none() {
            *task = Some(tokio::spawn(supervise(
                Arc::clone(&self.shared),
                Arc::clone(&self.connector),
            )));
        }
    }

    /// Stop the supervisor. The current link, if any, is dropped.
    pub fn shutdown(&self) {
        if let Some(task) = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
        self.shared.detach();
    }

    /// Send an envelope. Durable envelopes are queued while the link is down;
    /// transient ones are dropped.
    pub fn emit_with(&self, envelope: Envelope, durable: bool) -> Delivery {
        match envelope.encode() {
            Ok(frame) => self.shared.send_frame(frame, durable),
            Err(e) => {
                warn!(channel = self.shared.label.as_str(), error = %e, "dropping unencodable envelope");
                Delivery::Dropped
            }
        }
    }

    /// Whether a link is currently installed.
    pub fn is_open(&self) -> bool {
        self.shared.outbound().link.is_some()
    }

    /// Number of envelopes waiting for the link to open.
    pub fn queued(&self) -> usize {
        self.shared.outbound().queue.len()
    }
}

impl Connection for Channel {
    fn id(&self) -> ConnectionId {
        self.shared.id
    }

    fn label(&self) -> &str {
        &self.shared.label
    }

    fn emit(&self, envelope: Envelope) -> Delivery {
        self.emit_with(envelope, true)
    }

    fn on(&self, kind: EventKind, handler: Handler) {
        self.shared.handlers.push(kind, handler);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        if let Some(task) = self
            .task
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
        {
            task.abort();
        }
    }
}

async fn supervise(shared: Arc<Shared>, connector: Arc<dyn Connector>) {
    loop {
        info!(channel = shared.label.as_str(), "connecting");
        match connector.connect().await {
            Ok(link) => run_link(&shared, link).await,
            Err(e) => warn!(channel = shared.label.as_str(), error = %e, "connection attempt failed"),
        }
        tokio::time::sleep(shared.options.reconnect_interval).await;
    }
}

async fn run_link(shared: &Shared, link: Link) {
    let Link {
        mut sink,
        mut stream,
    } = link;
    let (tx, mut rx) = mpsc::unbounded_channel();

    shared.attach(tx);
    info!(channel = shared.label.as_str(), "connected");
    shared.handlers.dispatch(&Event::Open);

    loop {
        tokio::select! {
            Some(frame) = rx.recv() => {
                if let Err(e) = sink.send(frame).await {
                    warn!(channel = shared.label.as_str(), error = %e, "send failed");
                    break;
                }
            }
            inbound = stream.next() => match inbound {
                Some(Ok(text)) => shared.receive(&text),
                Some(Err(e)) => {
                    warn!(channel = shared.label.as_str(), error = %e, "receive failed");
                    break;
                }
                None => break,
            },
        }
    }

    shared.detach();
    info!(channel = shared.label.as_str(), "closed");
    shared.handlers.dispatch(&Event::Close);
}
