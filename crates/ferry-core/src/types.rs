//! Identities and delivery metadata shared across the relay.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Stable user identifier, established by the identity service
pub type UserId = String;

/// Caller-supplied transfer identifier, unique per active transfer
pub type TransferId = String;

/// Opaque per-connection handle assigned by the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ConnectionId(u64);

impl ConnectionId {
    /// Wrap a raw connection number
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw connection number
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn#{}", self.0)
    }
}

/// A connected, identified client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectedUser {
    /// Stable user id
    pub user_id: UserId,
    /// Connection the user is currently reachable on
    pub connection_id: ConnectionId,
    /// Display name
    #[serde(rename = "username")]
    pub display_name: String,
}

/// Metadata describing a completed transfer
///
/// Produced once per completed transfer and emitted to one or all
/// connections; never stored.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeliveryRecord {
    /// Transfer id
    #[serde(rename = "fileId")]
    pub transfer_id: TransferId,
    /// Original file name
    pub file_name: String,
    /// Public path the stored file is reachable under
    #[serde(rename = "downloadUrl")]
    pub download_path: String,
    /// Sender user id
    pub sender_id: UserId,
    /// Sender display name
    pub sender_name: String,
    /// Completion time, on the wire as RFC 3339 with milliseconds
    #[serde(serialize_with = "serialize_millis")]
    pub timestamp: DateTime<Utc>,
    /// Whether the transfer was addressed to a single recipient
    pub is_private: bool,
    /// Recipient display name, only on sender-side confirmations
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_name: Option<String>,
}

impl DeliveryRecord {
    /// Sender-side confirmation carrying the recipient's display name
    #[must_use]
    pub fn with_recipient(mut self, recipient_name: impl Into<String>) -> Self {
        self.recipient_name = Some(recipient_name.into());
        self
    }
}

fn serialize_millis<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}
