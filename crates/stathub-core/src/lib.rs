//! Core protocol layer for stathub node links.
//!
//! A node holds one persistent, full-duplex connection to the hub and
//! multiplexes many concurrent logical requests over it. This crate owns
//! everything with temporal behavior on that link: the frame envelope, the
//! pending-request registry that correlates inbound replies back to their
//! callers, the per-request deadline that bounds every wait, and the
//! per-connection identity state requests are issued against.
//!
//! The serving surface (socket acceptance, frame routing, authentication)
//! lives in `stathub-server`; this crate only sees a [`Transport`] to write
//! to and a registry to resolve through.

pub mod frame;
pub mod identity;
pub mod node;
pub mod pending;
pub mod settings;

pub use frame::{ErrorLevel, Frame};
pub use identity::{Account, Scope};
pub use node::{Node, NodeSequence, Transport};
pub use pending::PendingRequests;
pub use settings::Settings;
