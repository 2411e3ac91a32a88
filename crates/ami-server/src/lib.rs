//! # ami-server
//!
//! HTTP + WebSocket façade over the AMI client.
//!
//! - [`Bridge`](bridge::Bridge): connect, originate and query operations
//! - [`BridgeServer`](server::BridgeServer): Axum router, CORS, `/ws` event
//!   stream, `/health` and `/metrics`
//! - [`ReconnectSupervisor`](reconnect::ReconnectSupervisor): restores the
//!   AMI login after unexpected drops

#![deny(unsafe_code)]

pub mod bridge;
pub mod config;
pub mod error;
pub mod health;
pub mod metrics;
pub mod reconnect;
pub mod routes;
pub mod server;
pub mod shutdown;
pub mod websocket;

pub use bridge::{Bridge, BridgeStatus, OriginateOptions, PjsipEndpoint};
pub use config::ServerConfig;
pub use error::BridgeError;
pub use reconnect::{ReconnectPolicy, ReconnectSupervisor};
pub use server::BridgeServer;
pub use shutdown::ShutdownCoordinator;
