//! Connection lifecycle: the node roster, the channel-backed transport,
//! and the per-socket reader/writer tasks.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use metrics::counter;
use stathub_core::{Node, NodeSequence, PendingRequests, Transport};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dispatch;
use crate::handlers::HandlerRegistry;

/// Live connections, keyed by node sequence index.
///
/// Owns the sequence counter that brands each accepted connection, so
/// indices stay unique for the life of the process.
pub struct Nodes {
    entries: DashMap<u64, Arc<Node>>,
    sequence: NodeSequence,
}

impl Nodes {
    /// Empty roster.
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            sequence: NodeSequence::new(),
        }
    }

    /// Sequence counter for constructing node identities.
    pub fn sequence(&self) -> &NodeSequence {
        &self.sequence
    }

    /// Track a node.
    pub fn register(&self, node: Arc<Node>) {
        let _ = self.entries.insert(node.index(), node);
    }

    /// Stop tracking a node.
    pub fn unregister(&self, index: u64) {
        let _ = self.entries.remove(&index);
    }

    /// Node by sequence index.
    pub fn get(&self, index: u64) -> Option<Arc<Node>> {
        self.entries.get(&index).map(|entry| Arc::clone(&entry))
    }

    /// Number of live connections.
    pub fn count(&self) -> usize {
        self.entries.len()
    }
}

impl Default for Nodes {
    fn default() -> Self {
        Self::new()
    }
}

/// Channel-backed write half handed to a node.
///
/// Writes queue up for the connection's writer task. A full queue drops
/// the frame and reports the refusal; a slow peer must not block protocol
/// code.
pub struct WsTransport {
    tx: mpsc::Sender<String>,
    peer: SocketAddr,
}

impl WsTransport {
    /// Transport writing into `tx` for the connection from `peer`.
    pub fn new(tx: mpsc::Sender<String>, peer: SocketAddr) -> Self {
        Self { tx, peer }
    }
}

impl Transport for WsTransport {
    fn send(&self, frame: String) -> bool {
        match self.tx.try_send(frame) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                counter!("stathub_frames_dropped_total").increment(1);
                warn!(peer = %self.peer, "send queue full, dropping frame");
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Drive one accepted WebSocket until the peer goes away.
///
/// The socket splits into a writer task draining the node's send queue,
/// interleaved with heartbeat pings, and a reader loop feeding the
/// dispatcher. The heartbeat owns the node's liveness flag: each interval
/// clears it and pings; a Pong restores it; a node that stayed cleared for
/// a whole interval is disconnected. On teardown the node is marked dead
/// and dropped from the roster.
pub async fn handle_socket(
    socket: WebSocket,
    peer: SocketAddr,
    nodes: Arc<Nodes>,
    pending: Arc<PendingRequests>,
    handlers: Arc<HandlerRegistry>,
    max_send_queue: usize,
    heartbeat: Duration,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (tx, mut rx) = mpsc::channel::<String>(max_send_queue);

    let node = Arc::new(Node::new(
        Box::new(WsTransport::new(tx, peer)),
        peer,
        nodes.sequence(),
        Arc::clone(&pending),
    ));
    nodes.register(Arc::clone(&node));
    counter!("stathub_connections_total").increment(1);
    info!(node = %node, "node connected");

    let writer_node = Arc::clone(&node);
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(heartbeat);
        loop {
            tokio::select! {
                queued = rx.recv() => match queued {
                    Some(text) => {
                        if ws_tx.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if !writer_node.is_alive() {
                        debug!(node = %writer_node, "missed heartbeat, closing");
                        break;
                    }
                    writer_node.set_alive(false);
                    if ws_tx.send(Message::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = ws_tx.send(Message::Close(None)).await;
    });

    while let Some(message) = ws_rx.next().await {
        match message {
            Ok(Message::Text(text)) => {
                dispatch::dispatch_text(&node, &pending, &handlers, text.as_str());
            }
            Ok(Message::Pong(_)) => node.set_alive(true),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(err) => {
                debug!(node = %node, %err, "socket error");
                break;
            }
        }
    }

    node.set_alive(false);
    nodes.unregister(node.index());
    writer.abort();
    info!(node = %node, "node disconnected");
}
