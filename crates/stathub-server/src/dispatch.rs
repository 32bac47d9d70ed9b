//! Inbound frame routing.

use std::sync::Arc;
use std::time::Duration;

use metrics::counter;
use stathub_core::{ErrorLevel, Frame, Node, PendingRequests};
use tracing::{debug, warn};

use crate::handlers::{FrameHandler, HandlerRegistry};

/// Upper bound on a single handler's execution.
const HANDLER_TIMEOUT: Duration = Duration::from_secs(30);

/// Route one inbound text message from `node`.
///
/// Frames carrying a correlation id are offered to the pending-request
/// registry first; a delivered frame is consumed there, synchronously with
/// arrival. Undelivered frames fall through to the handler registered for
/// their kind (the peer issues its own requests over the same link), and
/// handler work runs on a detached task so a handler awaiting the peer can
/// never stall this read path.
///
/// An unknown kind is dropped: silently when the frame carried a
/// correlation id (indistinguishable from a reply outliving its waiter),
/// with a debug line otherwise.
pub fn dispatch_text(
    node: &Arc<Node>,
    pending: &PendingRequests,
    handlers: &Arc<HandlerRegistry>,
    text: &str,
) {
    let frame: Frame = match serde_json::from_str(text) {
        Ok(frame) => frame,
        Err(err) => {
            counter!("stathub_frames_rejected_total").increment(1);
            warn!(node = %node, %err, "dropping unparseable frame");
            return;
        }
    };
    counter!("stathub_frames_received_total", "kind" => frame.kind.clone()).increment(1);

    let frame = match pending.deliver(frame) {
        Ok(()) => return,
        Err(frame) => frame,
    };

    let Some(handler) = handlers.get(&frame.kind) else {
        if frame.uuid.is_none() {
            debug!(node = %node, kind = frame.kind, "no handler for frame");
        }
        return;
    };

    let node = Arc::clone(node);
    let _ = tokio::spawn(async move {
        run_handler(&node, handler.as_ref(), frame).await;
    });
}

/// Run one handler and write its outcome back to the peer.
pub(crate) async fn run_handler(node: &Arc<Node>, handler: &dyn FrameHandler, frame: Frame) {
    let uuid = frame.uuid.clone();
    let kind = frame.kind.clone();

    let outcome = tokio::time::timeout(HANDLER_TIMEOUT, handler.handle(node, frame)).await;
    let mut reply = match outcome {
        Ok(Ok(None)) => return,
        Ok(Ok(Some(reply))) => reply,
        Ok(Err(err)) => {
            counter!("stathub_handler_errors_total", "kind" => kind.clone()).increment(1);
            Frame::error(err.level(), err.to_string())
        }
        Err(_elapsed) => {
            counter!("stathub_handler_errors_total", "kind" => kind.clone()).increment(1);
            warn!(node = %node, kind, "handler timed out");
            Frame::error(ErrorLevel::Severe, format!("handler for '{kind}' timed out"))
        }
    };

    reply.uuid = uuid;
    let _ = node.send_frame(&reply);
}
