//! # plaza-server
//!
//! A real-time chat relay. Clients connect over WebSocket, claim a unique
//! display name, and exchange public (broadcast) and private (one-to-one)
//! messages. The relay keeps the authoritative list of who is online and
//! pushes presence updates whenever it changes.
//!
//! The crate is split along the relay's seams:
//! - [`registry`]: connection ↔ user bijection with name uniqueness
//! - [`router`]: resolves senders/recipients and builds deliveries
//! - [`lifecycle`]: per-connection state machine, join/leave side effects
//! - [`reconciler`]: periodic eviction of entries whose socket is gone
//! - [`transport`]: the send/liveness seam, plus the in-process table
//!   the WebSocket layer writes through
//! - [`protocol`]: JSON frames exchanged with clients
//! - [`server`] / [`web`]: process wiring and the axum HTTP surface

pub mod clock;
pub mod config;
pub mod error;
pub mod lifecycle;
pub mod protocol;
pub mod reconciler;
pub mod registry;
pub mod router;
pub mod server;
pub mod transport;
pub mod web;
