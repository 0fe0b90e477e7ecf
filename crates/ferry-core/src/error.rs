//! Error types for the relay engine.

use crate::transfer::TransferState;
use crate::types::{TransferId, UserId};
use ferry_files::StoreError;
use thiserror::Error;

/// Relay engine errors
///
/// Every variant is reported to the originating connection only, as an
/// `upload-error` event; none of them affect other connections.
#[derive(Debug, Error)]
pub enum RelayError {
    /// A session with this transfer id is already in progress
    #[error("transfer {0} is already in progress")]
    DuplicateTransfer(TransferId),

    /// Another active session is already writing the same destination file
    #[error("transfer {transfer_id} would overwrite active transfer {holder}")]
    DestinationInUse {
        /// Rejected transfer id
        transfer_id: TransferId,
        /// Transfer that holds the destination
        holder: TransferId,
    },

    /// No active session matches the transfer id
    #[error("unknown transfer {0}")]
    UnknownTransfer(TransferId),

    /// Creating or appending to the destination file failed
    #[error("storage write failed: {0}")]
    StorageWrite(#[from] StoreError),

    /// Private send whose recipient is not connected
    #[error("recipient {0} is not connected")]
    RecipientUnavailable(UserId),

    /// Private send without a recipient id
    #[error("private transfer {0} has no recipient")]
    MissingRecipient(TransferId),

    /// Operation not valid in the session's current state
    #[error("transfer {transfer_id} is {state:?}, cannot {operation}")]
    InvalidState {
        /// Transfer id
        transfer_id: TransferId,
        /// State the session was in
        state: TransferState,
        /// Attempted operation
        operation: &'static str,
    },
}

impl RelayError {
    /// Returns true if the error was caused by the filesystem rather than the client
    #[must_use]
    pub fn is_storage(&self) -> bool {
        matches!(self, RelayError::StorageWrite(_))
    }
}

/// Result alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;
