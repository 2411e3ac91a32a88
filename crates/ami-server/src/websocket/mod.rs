//! WebSocket event stream.

pub mod connection;
pub mod session;
