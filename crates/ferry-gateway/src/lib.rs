//! WebSocket gateway for the ferry relay.
//!
//! Bridges network connections to [`ferry_core::RelayEngine`]:
//!
//! - [`Gateway`] accepts WebSocket connections and feeds their events into the
//!   engine in arrival order per connection, and serves completed uploads
//!   over HTTP under the store's public prefix
//! - [`Hub`] is the engine's [`ferry_core::Outbound`] sink, a queue per open
//!   connection
//! - [`RelayClient`] speaks the same protocol from the client side
//!
//! # Example
//!
//! ```no_run
//! use ferry_core::RelayConfig;
//! use ferry_files::UploadStore;
//! use ferry_gateway::Gateway;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = UploadStore::open("uploads", "/uploads").await?;
//! let gateway = Gateway::bind("127.0.0.1:5000".parse()?, store, RelayConfig::default()).await?;
//! gateway.run_until(async {
//!     let _ = tokio::signal::ctrl_c().await;
//! }).await?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod client;
pub mod error;
pub mod hub;
pub mod server;

pub use client::RelayClient;
pub use error::{GatewayError, Result};
pub use hub::Hub;
pub use server::{Gateway, GatewayConfig, GatewayEngine};
