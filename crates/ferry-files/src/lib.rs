//! # ferry files
//!
//! Upload storage for the ferry relay.
//!
//! This crate provides:
//! - Deterministic destination layout (`{transfer_id}-{file_name}` under one directory)
//! - Public download path derivation
//! - Sequential append-only writers for chunked uploads

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod error;
pub mod store;
pub mod writer;

pub use error::{Result, StoreError};
pub use store::UploadStore;
pub use writer::UploadWriter;

/// Default public prefix under which stored uploads are served
pub const DEFAULT_PUBLIC_PREFIX: &str = "/uploads";

/// Default upload directory, relative to the working directory
pub const DEFAULT_UPLOAD_DIR: &str = "uploads";
