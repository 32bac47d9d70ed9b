//! Per-connection node identity and the outbound send path.

use std::fmt;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use parking_lot::RwLock;
use serde_json::Value;
use tracing::Level;
use uuid::Uuid;

use crate::frame::Frame;
use crate::identity::{Account, Scope};
use crate::pending::PendingRequests;

/// Display name a node carries until it introduces itself.
pub const DEFAULT_DISPLAY_NAME: &str = "unknown";

/// Write half of a node link.
///
/// `send` hands one serialized frame to the connection and reports whether
/// it was accepted for writing; a closed or saturated connection refuses.
/// Anything past acceptance (actual delivery, closure) is the connection
/// layer's concern, not the protocol's.
pub trait Transport: Send + Sync {
    /// Queue one serialized frame for writing.
    fn send(&self, frame: String) -> bool;
}

/// Monotonic source of node sequence indices.
///
/// Owned by whatever accepts connections. Every node constructed against
/// the same sequence gets a distinct index, strictly increasing in
/// construction order and never reused.
#[derive(Debug, Default)]
pub struct NodeSequence(AtomicU64);

impl NodeSequence {
    /// Sequence whose first index is 1.
    pub fn new() -> Self {
        Self(AtomicU64::new(0))
    }

    /// Allocate the next index.
    pub fn next_index(&self) -> u64 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// One peer connection: its identity, authorization state, and send path.
///
/// The node owns its write half of the link. Identity fields mutate from
/// exactly one place each: liveness from the connection lifecycle, account
/// and scopes from authentication, the display name from the peer's own
/// introduction.
pub struct Node {
    index: u64,
    peer_addr: SocketAddr,
    alive: AtomicBool,
    display_name: RwLock<String>,
    account: RwLock<Option<Account>>,
    scopes: RwLock<Vec<Scope>>,
    transport: Box<dyn Transport>,
    pending: Arc<PendingRequests>,
}

impl Node {
    /// Wrap an accepted connection.
    ///
    /// Takes the next index from `sequence` and starts alive,
    /// unauthenticated, with the [`DEFAULT_DISPLAY_NAME`] label.
    pub fn new(
        transport: Box<dyn Transport>,
        peer_addr: SocketAddr,
        sequence: &NodeSequence,
        pending: Arc<PendingRequests>,
    ) -> Self {
        Self {
            index: sequence.next_index(),
            peer_addr,
            alive: AtomicBool::new(true),
            display_name: RwLock::new(DEFAULT_DISPLAY_NAME.to_owned()),
            account: RwLock::new(None),
            scopes: RwLock::new(Vec::new()),
            transport,
            pending,
        }
    }

    /// Sequence index assigned at construction.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Network address of the peer.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer_addr
    }

    /// Whether the connection lifecycle still considers this link live.
    pub fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    /// Flip the liveness flag. Called by connection lifecycle code, never
    /// by protocol code.
    pub fn set_alive(&self, alive: bool) {
        self.alive.store(alive, Ordering::SeqCst);
    }

    /// Current display name.
    pub fn display_name(&self) -> String {
        self.display_name.read().clone()
    }

    /// Replace the display name.
    pub fn set_display_name(&self, name: impl Into<String>) {
        *self.display_name.write() = name.into();
    }

    /// Account attached by authentication, if any.
    pub fn account(&self) -> Option<Account> {
        self.account.read().clone()
    }

    /// Attach the authenticated account.
    pub fn set_account(&self, account: Account) {
        *self.account.write() = Some(account);
    }

    /// Scopes currently held.
    pub fn scopes(&self) -> Vec<Scope> {
        self.scopes.read().clone()
    }

    /// Replace the scope collection.
    pub fn set_scopes(&self, scopes: Vec<Scope>) {
        *self.scopes.write() = scopes;
    }

    /// First scope whose id matches, or `None` when the node does not
    /// hold it. Linear scan; collections stay small.
    pub fn lookup_scope(&self, scope_id: &str) -> Option<Scope> {
        self.scopes
            .read()
            .iter()
            .find(|scope| scope.id == scope_id)
            .cloned()
    }

    /// Diagnostic label: sequence index, account id (peer address until
    /// authenticated), and the trimmed display name.
    pub fn describe(&self) -> String {
        let owner = self
            .account
            .read()
            .as_ref()
            .map_or_else(|| self.peer_addr.to_string(), |account| account.id.clone());
        format!(
            "node-{}/{}/{}",
            self.index,
            owner,
            self.display_name.read().trim()
        )
    }

    /// Emit `describe() + " > " + message` at `level`.
    pub fn log(&self, level: Level, message: &str) {
        let line = format!("{} > {}", self.describe(), message);
        match level {
            Level::ERROR => tracing::error!("{line}"),
            Level::WARN => tracing::warn!("{line}"),
            Level::INFO => tracing::info!("{line}"),
            Level::DEBUG => tracing::debug!("{line}"),
            Level::TRACE => tracing::trace!("{line}"),
        }
    }

    /// Write one frame to the link. True if the transport accepted it.
    pub fn send_frame(&self, frame: &Frame) -> bool {
        match serde_json::to_string(frame) {
            Ok(text) => self.transport.send(text),
            Err(err) => {
                tracing::warn!(node = %self, %err, "failed to serialize frame");
                false
            }
        }
    }

    /// Fire-and-forget frame; no reply is expected and none is awaited.
    pub fn send_notification(&self, kind: impl Into<String>, data: Value) {
        let frame = Frame::notification(kind, data);
        let _ = self.send_frame(&frame);
    }

    /// Send a request and wait for its reply.
    ///
    /// The waiter is registered before the frame is written, so even a
    /// transport that loops replies back synchronously cannot race it.
    /// Resolves exactly once: with the matching reply frame, or with the
    /// synthetic timeout error once the registry's deadline passes. A
    /// refused write is not an error here; the deadline settles it.
    pub async fn send_request(&self, kind: impl Into<String>, data: Value) -> Frame {
        let uuid = Uuid::new_v4().to_string();
        let frame = Frame {
            kind: kind.into(),
            data,
            uuid: Some(uuid.clone()),
        };

        let rx = self.pending.register(uuid);
        if !self.send_frame(&frame) {
            self.log(
                Level::WARN,
                &format!("request frame '{}' was not accepted for writing", frame.kind),
            );
        }

        rx.await.unwrap_or_else(|_| Frame::timeout_error())
    }
}

impl fmt::Display for Node {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.describe())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use serde_json::json;
    use std::time::Duration;

    /// Transport that records every frame it accepts.
    struct CaptureTransport {
        frames: Arc<Mutex<Vec<String>>>,
    }

    impl CaptureTransport {
        fn new() -> (Self, Arc<Mutex<Vec<String>>>) {
            let frames = Arc::new(Mutex::new(Vec::new()));
            (
                Self {
                    frames: Arc::clone(&frames),
                },
                frames,
            )
        }
    }

    impl Transport for CaptureTransport {
        fn send(&self, frame: String) -> bool {
            self.frames.lock().push(frame);
            true
        }
    }

    /// Transport that refuses every write.
    struct DeadTransport;

    impl Transport for DeadTransport {
        fn send(&self, _frame: String) -> bool {
            false
        }
    }

    /// Transport that answers every request with a pong before `send`
    /// even returns, exercising the registration-before-write guarantee.
    struct LoopbackTransport {
        pending: Arc<PendingRequests>,
    }

    impl Transport for LoopbackTransport {
        fn send(&self, frame: String) -> bool {
            let request: Frame = serde_json::from_str(&frame).unwrap();
            let reply = Frame {
                kind: "pong".into(),
                data: json!({"ok": true}),
                uuid: request.uuid,
            };
            let _ = self.pending.deliver(reply);
            true
        }
    }

    fn peer() -> SocketAddr {
        "127.0.0.1:25565".parse().unwrap()
    }

    fn pending(ms: u64) -> Arc<PendingRequests> {
        Arc::new(PendingRequests::new(Duration::from_millis(ms)))
    }

    fn capture_node(
        sequence: &NodeSequence,
        registry: Arc<PendingRequests>,
    ) -> (Node, Arc<Mutex<Vec<String>>>) {
        let (transport, frames) = CaptureTransport::new();
        let node = Node::new(Box::new(transport), peer(), sequence, registry);
        (node, frames)
    }

    #[test]
    fn new_node_starts_alive_and_unauthenticated() {
        let sequence = NodeSequence::new();
        let (node, _) = capture_node(&sequence, pending(5_000));

        assert_eq!(node.index(), 1);
        assert!(node.is_alive());
        assert_eq!(node.display_name(), DEFAULT_DISPLAY_NAME);
        assert_eq!(node.account(), None);
        assert_eq!(node.peer_addr(), peer());
        assert!(node.scopes().is_empty());
    }

    #[test]
    fn sequence_indices_are_distinct_and_increasing() {
        let sequence = Arc::new(NodeSequence::new());

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let sequence = Arc::clone(&sequence);
                std::thread::spawn(move || {
                    (0..100).map(|_| sequence.next_index()).collect::<Vec<_>>()
                })
            })
            .collect();

        let mut all: Vec<u64> = handles
            .into_iter()
            .flat_map(|handle| handle.join().unwrap())
            .collect();
        all.sort_unstable();
        all.dedup();
        assert_eq!(all.len(), 800);
        assert_eq!(*all.first().unwrap(), 1);
        assert_eq!(*all.last().unwrap(), 800);
    }

    #[test]
    fn indices_increase_per_construction() {
        let sequence = NodeSequence::new();
        let registry = pending(5_000);
        let (first, _) = capture_node(&sequence, Arc::clone(&registry));
        let (second, _) = capture_node(&sequence, registry);

        assert_eq!(first.index(), 1);
        assert_eq!(second.index(), 2);
    }

    #[test]
    fn describe_uses_peer_address_until_authenticated() {
        let sequence = NodeSequence::new();
        let (node, _) = capture_node(&sequence, pending(5_000));

        assert_eq!(node.describe(), "node-1/127.0.0.1:25565/unknown");
    }

    #[test]
    fn describe_prefers_account_id_and_trims_the_name() {
        let sequence = NodeSequence::new();
        let (node, _) = capture_node(&sequence, pending(5_000));

        node.set_account(Account::new("acc-42"));
        node.set_display_name("  lobby-1  ");

        assert_eq!(node.describe(), "node-1/acc-42/lobby-1");
        assert_eq!(node.to_string(), node.describe());
    }

    #[test]
    fn liveness_flag_toggles() {
        let sequence = NodeSequence::new();
        let (node, _) = capture_node(&sequence, pending(5_000));

        node.set_alive(false);
        assert!(!node.is_alive());
        node.set_alive(true);
        assert!(node.is_alive());
    }

    #[test]
    fn lookup_scope_finds_first_match() {
        let sequence = NodeSequence::new();
        let (node, _) = capture_node(&sequence, pending(5_000));

        node.set_scopes(vec![
            Scope::new("player:read"),
            Scope::new("player:write"),
            Scope::new("leaderboard"),
        ]);

        assert_eq!(
            node.lookup_scope("player:write"),
            Some(Scope::new("player:write"))
        );
        assert_eq!(node.lookup_scope("admin"), None);
    }

    #[test]
    fn lookup_scope_on_empty_collection_misses() {
        let sequence = NodeSequence::new();
        let (node, _) = capture_node(&sequence, pending(5_000));

        assert_eq!(node.lookup_scope("anything"), None);
    }

    #[test]
    fn notification_writes_one_frame_without_uuid() {
        let sequence = NodeSequence::new();
        let (node, frames) = capture_node(&sequence, pending(5_000));

        node.send_notification("update", json!({"wins": 2}));

        let frames = frames.lock();
        assert_eq!(frames.len(), 1);
        let value: serde_json::Value = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(value["type"], "update");
        assert_eq!(value["data"]["wins"], 2);
        assert!(!value.as_object().unwrap().contains_key("uuid"));
    }

    #[tokio::test(start_paused = true)]
    async fn request_writes_correlated_frame_and_times_out_unanswered() {
        let sequence = NodeSequence::new();
        let registry = pending(50);
        let (node, frames) = capture_node(&sequence, Arc::clone(&registry));

        let resolved = node.send_request("ping", json!({})).await;

        assert_eq!(resolved, Frame::timeout_error());
        assert_eq!(registry.in_flight(), 0);

        let frames = frames.lock();
        assert_eq!(frames.len(), 1);
        let written: Frame = serde_json::from_str(&frames[0]).unwrap();
        assert_eq!(written.kind, "ping");
        assert!(written.uuid.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn synchronous_loopback_reply_resolves_the_request() {
        let sequence = NodeSequence::new();
        let registry = pending(5_000);
        let node = Node::new(
            Box::new(LoopbackTransport {
                pending: Arc::clone(&registry),
            }),
            peer(),
            &sequence,
            Arc::clone(&registry),
        );

        let resolved = node.send_request("ping", json!({})).await;

        assert_eq!(resolved.kind, "pong");
        assert_eq!(resolved.data, json!({"ok": true}));
        assert!(resolved.uuid.is_some());
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn refused_write_still_resolves_by_timeout() {
        let sequence = NodeSequence::new();
        let registry = pending(50);
        let node = Node::new(
            Box::new(DeadTransport),
            peer(),
            &sequence,
            Arc::clone(&registry),
        );

        let resolved = node.send_request("ping", json!({})).await;

        assert_eq!(resolved, Frame::timeout_error());
        assert_eq!(registry.in_flight(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_requests_on_one_node_resolve_independently() {
        let sequence = NodeSequence::new();
        let registry = pending(5_000);
        let (node, frames) = capture_node(&sequence, Arc::clone(&registry));
        let node = Arc::new(node);

        let first = tokio::spawn({
            let node = Arc::clone(&node);
            async move { node.send_request("ping", json!({"n": 1})).await }
        });
        let second = tokio::spawn({
            let node = Arc::clone(&node);
            async move { node.send_request("ping", json!({"n": 2})).await }
        });

        // Wait until both request frames have been written.
        while frames.lock().len() < 2 {
            tokio::task::yield_now().await;
        }
        assert_eq!(registry.in_flight(), 2);

        // Answer them out of order.
        let written: Vec<Frame> = frames
            .lock()
            .iter()
            .map(|text| serde_json::from_str(text).unwrap())
            .collect();
        for request in written.iter().rev() {
            let n = request.data["n"].clone();
            let delivered = registry.deliver(Frame {
                kind: "pong".into(),
                data: json!({"n": n}),
                uuid: request.uuid.clone(),
            });
            assert!(delivered.is_ok());
        }

        let first = first.await.unwrap();
        let second = second.await.unwrap();
        assert_eq!(first.data["n"], json!(1));
        assert_eq!(second.data["n"], json!(2));
        assert_eq!(registry.in_flight(), 0);
    }
}
