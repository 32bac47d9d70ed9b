//! WebSocket serving surface for stathub node links.
//!
//! Accepts node connections over a WebSocket upgrade, runs one writer and
//! one reader task per link, authenticates peers, and routes every inbound
//! frame: replies are offered to the pending-request registry first,
//! everything else goes to the handler registered for its kind. A small
//! HTTP health endpoint rides on the same listener.

pub mod auth;
pub mod connection;
pub mod dispatch;
pub mod handlers;
pub mod server;

pub use auth::{Grant, IdentityProvider, StaticIdentityProvider};
pub use connection::{Nodes, WsTransport};
pub use handlers::{AuthHandler, FrameHandler, HandlerError, HandlerRegistry, PingHandler};
pub use server::{AppState, ServerConfig, ServerHandle, start, start_with_handlers};
