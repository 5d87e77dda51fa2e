//! # courier-relay
//!
//! Presence-aware message relay server for Courier.
//!
//! This crate implements a relay server that:
//! - Accepts iroh QUIC connections from clients
//! - Binds a stable identity to each connection on identify
//! - Stores opaque message payloads and delivers them live when the
//!   recipient is connected, or queues them until it identifies
//! - Never interprets payloads (the relay is a "dumb pipe")
//!
//! ## Architecture
//!
//! ```text
//! Client A ──┐                    ┌── Client B
//!            │    iroh QUIC       │
//!            ├───────────────────►│
//!            │                    │
//!        ┌───┴────────────────────┴───┐
//!        │       courier-relay        │
//!        │  ┌──────────┐ ┌─────────┐  │
//!        │  │ presence │ │  store  │  │
//!        │  └──────────┘ └─────────┘  │
//!        └────────────────────────────┘
//! ```
//!
//! ## Protocol
//!
//! The relay uses ALPN `/courier/1` and handles these frames:
//! - IDENTIFY → IDENTIFY_ACK (bind presence, flush pending)
//! - SEND → SEND_ACK (store, then attempt live delivery)
//! - NEW_MESSAGE / NEW_MESSAGES (server → client deliveries)
//! - BYE (graceful disconnect)

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod account;
pub mod config;
pub mod error;
pub mod http;
pub mod limits;
pub mod presence;
pub mod protocol;
pub mod server;
pub mod session;
pub mod storage;
