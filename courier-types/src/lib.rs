//! # courier-types
//!
//! Wire format types for the Courier message relay protocol.
//!
//! This crate provides the foundational types used across the Courier crates:
//! - [`UserId`], [`MessageId`] - Identity and message id types
//! - [`Frame`] - Protocol frames (Identify, Send, NewMessage, etc.)
//! - [`RelayedMessage`] - A message as seen on the wire
//! - [`WireError`] - Error types

#![warn(missing_docs)]
#![warn(clippy::all)]

mod error;
mod frames;
mod ids;

pub use error::WireError;
pub use frames::{
    Bye, ErrorCode, ErrorReply, Frame, Identify, IdentifyAck, NewMessage, NewMessages,
    RelayedMessage, Send, SendAck, PROTOCOL_VERSION,
};
pub use ids::{MessageId, UserId};
