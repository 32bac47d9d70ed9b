//! Inbound frame handlers.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use stathub_core::{ErrorLevel, Frame, Node};
use thiserror::Error;
use tracing::Level;

use crate::auth::IdentityProvider;

/// Failure produced by a frame handler.
///
/// Reported to the peer as an error frame carrying the request's
/// correlation id; never tears down the link.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Payload missing a field or carrying the wrong shape.
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
    /// Authentication was rejected.
    #[error("authentication failed: {0}")]
    AuthRejected(String),
}

impl HandlerError {
    /// Severity reported on the wire for this failure.
    pub fn level(&self) -> ErrorLevel {
        match self {
            Self::InvalidPayload(_) => ErrorLevel::Warning,
            Self::AuthRejected(_) => ErrorLevel::Severe,
        }
    }
}

/// Handles one frame kind.
#[async_trait]
pub trait FrameHandler: Send + Sync {
    /// Process `frame` from `node`.
    ///
    /// An `Ok(Some(frame))` is written back to the peer, stamped with the
    /// inbound frame's correlation id if it carried one. `Ok(None)` sends
    /// nothing.
    async fn handle(&self, node: &Arc<Node>, frame: Frame) -> Result<Option<Frame>, HandlerError>;
}

/// Registry mapping frame kinds to their handlers.
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn FrameHandler>>,
}

impl HandlerRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registry with the built-in protocol handlers installed.
    pub fn with_builtins(provider: Arc<dyn IdentityProvider>) -> Self {
        let mut registry = Self::new();
        registry.register("ping", PingHandler);
        registry.register("auth", AuthHandler { provider });
        registry
    }

    /// Register `handler` for `kind`, replacing any previous one.
    pub fn register(&mut self, kind: &str, handler: impl FrameHandler + 'static) {
        let _ = self.handlers.insert(kind.to_owned(), Arc::new(handler));
    }

    /// Handler for `kind`, if one is registered.
    pub fn get(&self, kind: &str) -> Option<Arc<dyn FrameHandler>> {
        self.handlers.get(kind).cloned()
    }

    /// Registered kinds, sorted.
    pub fn kinds(&self) -> Vec<String> {
        let mut kinds: Vec<String> = self.handlers.keys().cloned().collect();
        kinds.sort();
        kinds
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Liveness probe: echoes the payload back as a `pong`.
pub struct PingHandler;

#[async_trait]
impl FrameHandler for PingHandler {
    async fn handle(
        &self,
        _node: &Arc<Node>,
        frame: Frame,
    ) -> Result<Option<Frame>, HandlerError> {
        Ok(Some(Frame::notification("pong", frame.data)))
    }
}

/// Attaches account and scopes to a node from a presented token.
pub struct AuthHandler {
    /// Token resolver.
    pub provider: Arc<dyn IdentityProvider>,
}

#[async_trait]
impl FrameHandler for AuthHandler {
    async fn handle(
        &self,
        node: &Arc<Node>,
        frame: Frame,
    ) -> Result<Option<Frame>, HandlerError> {
        let token = require_str(&frame.data, "token")?;
        let Some(grant) = self.provider.authenticate(token).await else {
            node.log(Level::WARN, "authentication rejected");
            return Err(HandlerError::AuthRejected("unknown token".into()));
        };

        node.set_account(grant.account.clone());
        node.set_scopes(grant.scopes.clone());
        if let Some(name) = optional_str(&frame.data, "name") {
            node.set_display_name(name);
        }
        node.log(Level::INFO, "authenticated");

        let scope_ids: Vec<&str> = grant.scopes.iter().map(|scope| scope.id.as_str()).collect();
        Ok(Some(Frame::notification(
            "auth-ok",
            json!({ "account": grant.account.id, "scopes": scope_ids }),
        )))
    }
}

fn require_str<'a>(data: &'a Value, field: &str) -> Result<&'a str, HandlerError> {
    data.get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| HandlerError::InvalidPayload(format!("missing string field '{field}'")))
}

fn optional_str<'a>(data: &'a Value, field: &str) -> Option<&'a str> {
    data.get(field).and_then(Value::as_str)
}
