//! Wire events exchanged over a connection.
//!
//! Every event is a JSON object of the form `{"event": "<name>", "data": {...}}`
//! with camelCase payload fields. Chunk payloads travel as standard base64.
//!
//! ```text
//! Client                              Relay
//!   |-- join ------------------------->|  --> online-users (all)
//!   |-- upload-start ----------------->|
//!   |<--------------------- upload-ack-|
//!   |-- upload-chunk ----------------->|
//!   |-- ...                            |
//!   |-- upload-end ------------------->|  --> file-shared (all, or recipient)
//!   |<---------------------- file-sent-|      (private sends only)
//! ```

use crate::types::{ConnectedUser, DeliveryRecord, TransferId, UserId};
use serde::{Deserialize, Serialize};

/// Events sent by clients
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Identify this connection
    Join(JoinRequest),
    /// Open a transfer session
    UploadStart(UploadStart),
    /// Append bytes to an open session
    UploadChunk(UploadChunk),
    /// Complete a session and route its delivery record
    UploadEnd(UploadEnd),
}

impl ClientEvent {
    /// Decode from a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a well-formed client event.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Encode as a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Wire name of the event
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ClientEvent::Join(_) => "join",
            ClientEvent::UploadStart(_) => "upload-start",
            ClientEvent::UploadChunk(_) => "upload-chunk",
            ClientEvent::UploadEnd(_) => "upload-end",
        }
    }
}

/// `join` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JoinRequest {
    /// Stable user id
    pub user_id: UserId,
    /// Display name
    pub username: String,
}

/// `upload-start` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadStart {
    /// File name as chosen by the sender
    pub file_name: String,
    /// Announced size in bytes (informational)
    #[serde(default)]
    pub size: u64,
    /// Transfer id
    pub file_id: TransferId,
}

/// `upload-chunk` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadChunk {
    /// Transfer id
    pub file_id: TransferId,
    /// File name (informational)
    #[serde(default)]
    pub file_name: String,
    /// Raw chunk bytes
    #[serde(with = "base64_bytes")]
    pub chunk: Vec<u8>,
    /// Sender-side offset of this chunk; not used for seeking
    #[serde(default)]
    pub offset: u64,
}

/// `upload-end` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadEnd {
    /// Transfer id
    pub file_id: TransferId,
    /// File name (informational; the session's name is authoritative)
    #[serde(default)]
    pub file_name: String,
    /// Route to a single recipient instead of everyone
    #[serde(default)]
    pub is_private: bool,
    /// Recipient user id for private sends
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub recipient_id: Option<UserId>,
    /// Sender user id
    pub sender_id: UserId,
    /// Sender display name
    pub sender_name: String,
}

/// Events sent by the relay
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "kebab-case")]
pub enum ServerEvent {
    /// Session opened, chunks may follow
    UploadAck(UploadAck),
    /// A transfer operation failed for this connection
    UploadError(UploadFailure),
    /// A file is available to this connection
    FileShared(DeliveryRecord),
    /// Sender-side confirmation of a private send
    FileSent(DeliveryRecord),
    /// Current presence list, in join order
    OnlineUsers(Vec<ConnectedUser>),
}

impl ServerEvent {
    /// Decode from a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns an error if the text is not a well-formed server event.
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Encode as a JSON text frame
    ///
    /// # Errors
    ///
    /// Returns an error if serialization fails.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Wire name of the event
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::UploadAck(_) => "upload-ack",
            ServerEvent::UploadError(_) => "upload-error",
            ServerEvent::FileShared(_) => "file-shared",
            ServerEvent::FileSent(_) => "file-sent",
            ServerEvent::OnlineUsers(_) => "online-users",
        }
    }

    /// `upload-ack` for a freshly opened session
    #[must_use]
    pub fn ready(file_id: impl Into<TransferId>) -> Self {
        ServerEvent::UploadAck(UploadAck {
            file_id: file_id.into(),
            status: AckStatus::Ready,
        })
    }

    /// `upload-error` for a transfer
    #[must_use]
    pub fn failure(file_id: impl Into<TransferId>, message: impl Into<String>) -> Self {
        ServerEvent::UploadError(UploadFailure {
            file_id: file_id.into(),
            message: message.into(),
        })
    }
}

/// `upload-ack` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadAck {
    /// Transfer id
    pub file_id: TransferId,
    /// Session status
    pub status: AckStatus,
}

/// Acknowledged session status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AckStatus {
    /// Destination created, ready for chunks
    Ready,
}

/// `upload-error` payload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadFailure {
    /// Transfer id
    pub file_id: TransferId,
    /// Human-readable reason
    pub message: String,
}

mod base64_bytes {
    use base64::Engine;
    use base64::engine::general_purpose::STANDARD;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
