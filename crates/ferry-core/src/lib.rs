//! # ferry core
//!
//! Relay engine for the ferry real-time file relay.
//!
//! This crate provides:
//! - Presence registry of connected identities
//! - Chunked upload session state machine
//! - Relay engine routing deliveries to everyone or to a single recipient
//! - Wire event definitions shared by the gateway and clients
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     Connection Gateway                       │
//! │    (accepts connections, ordered per-connection delivery)    │
//! ├──────────────────────────────────────────────────────────────┤
//! │                        Relay Engine                          │
//! │      (routing: broadcast vs. direct, outbound events)        │
//! ├──────────────────────────────┬───────────────────────────────┤
//! │           Registry           │      Transfer Sessions        │
//! │   (who is connected, where)  │  (chunked writes per upload)  │
//! └──────────────────────────────┴───────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod engine;
pub mod error;
pub mod events;
pub mod registry;
pub mod transfer;
pub mod types;

pub use engine::{Delivery, Outbound, RelayConfig, RelayEngine};
pub use error::{RelayError, Result};
pub use events::{ClientEvent, ServerEvent};
pub use registry::Registry;
pub use transfer::{TransferSession, TransferState};
pub use types::{ConnectedUser, ConnectionId, DeliveryRecord, TransferId, UserId};

/// Chunk size clients are expected to use (64 KiB)
pub const DEFAULT_CHUNK_SIZE: usize = 64 * 1024;
