//! # ami-client
//!
//! Asterisk Manager Interface client.
//!
//! One [`AmiClient`] per process owns at most one live connection. A
//! connection task holds the socket, correlates responses to pending
//! actions by `ActionID`, expires actions that go unanswered, and fans
//! unsolicited events out to every registered [`EventSink`].

#![deny(unsafe_code)]

pub mod config;
pub mod connection;
mod correlator;
pub mod error;
pub mod fanout;
pub mod listing;
#[cfg(feature = "test-util")]
#[doc(hidden)]
#[allow(missing_docs, clippy::missing_panics_doc)]
pub mod test_helpers;

pub use config::{AmiConfig, ConnectionState};
pub use connection::AmiClient;
pub use error::{AmiError, Result};
pub use fanout::{Delivery, EventFanOut, EventSink, SubscriberId};
pub use listing::ListSpec;
