//! WebSocket connection state and the per-connection chat session.

pub mod connection;
pub mod session;

pub use connection::ClientConnection;
pub use session::{ChatSession, CloseReason};
