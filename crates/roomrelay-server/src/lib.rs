//! # roomrelay-server
//!
//! In-memory chat relay: clients join a room by code over a WebSocket and
//! every chat frame is fanned out to the room's members.
//!
//! - [`registry`]: room code → members, connection → display name
//! - [`websocket`]: per-connection outbound queue and protocol state machine
//! - [`protocol`]: JSON frames exchanged with clients
//! - [`server`]: Axum router (WebSocket endpoint, static pages, health, metrics)
//! - Graceful shutdown via `CancellationToken`

#![deny(unsafe_code)]

pub mod errors;
pub mod health;
pub mod metrics;
pub mod protocol;
pub mod registry;
pub mod server;
pub mod shutdown;
pub mod types;
pub mod websocket;

pub use errors::ServerError;
pub use registry::{LeaveOutcome, RoomRegistry};
pub use server::RelayServer;
pub use types::{ConnectionId, DisplayName, RoomCode};
