//! # ami-proto
//!
//! Wire-level building blocks for the Asterisk Manager Interface.
//!
//! - [`Message`]: ordered `Key: Value` fields with a derived [`MessageKind`]
//! - [`AmiCodec`]: `tokio_util` codec framing blocks on `\r\n\r\n`
//! - [`Framer`]: buffer-and-feed wrapper around the codec for callers that
//!   receive bytes without a `FramedRead`
//! - [`Action`]: builder for outbound actions (`Login`, `Originate`, ...)

#![deny(unsafe_code)]

pub mod action;
pub mod codec;
pub mod message;

pub use action::{Action, Originate};
pub use codec::{AmiCodec, CodecError, Framer, DEFAULT_MAX_FRAME_LEN};
pub use message::{Message, MessageKind};
