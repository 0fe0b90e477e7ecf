//! WebSocket client for the relay.

use crate::error::{GatewayError, Result};
use ferry_core::events::{JoinRequest, UploadChunk, UploadEnd, UploadStart};
use ferry_core::{ClientEvent, DEFAULT_CHUNK_SIZE, DeliveryRecord, ServerEvent, TransferId, UserId};
use futures_util::{SinkExt, StreamExt};
use std::collections::VecDeque;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Identity announced with `join`
#[derive(Debug, Clone)]
struct Identity {
    user_id: UserId,
    username: String,
}

/// Relay client
///
/// Events that arrive while the client waits for a specific reply are kept
/// and handed out by [`RelayClient::next_event`] in arrival order.
pub struct RelayClient {
    socket: Socket,
    backlog: VecDeque<ServerEvent>,
    identity: Option<Identity>,
    chunk_size: usize,
    reply_timeout: Duration,
}

impl RelayClient {
    /// Connect to a relay at `url` (for example `ws://127.0.0.1:5000`)
    ///
    /// # Errors
    ///
    /// Returns error if the connection or WebSocket handshake fails.
    pub async fn connect(url: &str) -> Result<Self> {
        let (socket, _) = connect_async(url).await?;
        tracing::debug!("Connected to relay at {}", url);

        Ok(Self {
            socket,
            backlog: VecDeque::new(),
            identity: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            reply_timeout: Duration::from_secs(10),
        })
    }

    /// Use `chunk_size` bytes per `upload-chunk`
    #[must_use]
    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    /// How long to wait for acknowledgements and confirmations
    #[must_use]
    pub fn with_reply_timeout(mut self, timeout: Duration) -> Self {
        self.reply_timeout = timeout;
        self
    }

    /// Announce this connection's identity
    ///
    /// # Errors
    ///
    /// Returns error if the event cannot be sent.
    pub async fn join(&mut self, user_id: impl Into<UserId>, username: impl Into<String>) -> Result<()> {
        let identity = Identity {
            user_id: user_id.into(),
            username: username.into(),
        };
        self.send(&ClientEvent::Join(JoinRequest {
            user_id: identity.user_id.clone(),
            username: identity.username.clone(),
        }))
        .await?;
        self.identity = Some(identity);
        Ok(())
    }

    /// Send a raw client event
    ///
    /// # Errors
    ///
    /// Returns error if encoding or sending fails.
    pub async fn send(&mut self, event: &ClientEvent) -> Result<()> {
        self.socket.send(Message::Text(event.to_json()?)).await?;
        Ok(())
    }

    /// Next event from the relay
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Closed`] once the relay closes the connection.
    pub async fn next_event(&mut self) -> Result<ServerEvent> {
        if let Some(event) = self.backlog.pop_front() {
            return Ok(event);
        }
        self.read_event().await
    }

    /// Wait for the first event matching `predicate`, keeping the others
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::Timeout`] if nothing matches within the reply
    /// timeout, or [`GatewayError::Closed`] if the connection ends.
    pub async fn wait_for<F>(&mut self, what: &'static str, mut predicate: F) -> Result<ServerEvent>
    where
        F: FnMut(&ServerEvent) -> bool,
    {
        if let Some(index) = self.backlog.iter().position(&mut predicate) {
            if let Some(event) = self.backlog.remove(index) {
                return Ok(event);
            }
        }

        let deadline = time::Instant::now() + self.reply_timeout;
        loop {
            let event = time::timeout_at(deadline, self.read_event())
                .await
                .map_err(|_| GatewayError::Timeout(what))??;
            if predicate(&event) {
                return Ok(event);
            }
            self.backlog.push_back(event);
        }
    }

    /// Upload the file at `path` and wait for the relay's confirmation
    ///
    /// Broadcast sends complete when the relay echoes `file-shared` back to
    /// this connection; private sends complete on `file-sent`. The file is
    /// split into chunks of the configured size and each chunk reported to
    /// `on_progress` as the running byte count.
    ///
    /// # Errors
    ///
    /// Returns [`GatewayError::NotJoined`] before [`RelayClient::join`],
    /// [`GatewayError::Rejected`] if the relay answers with `upload-error`,
    /// or an I/O, socket or timeout error.
    pub async fn send_file<F>(
        &mut self,
        path: &Path,
        transfer_id: impl Into<TransferId>,
        recipient: Option<&str>,
        mut on_progress: F,
    ) -> Result<DeliveryRecord>
    where
        F: FnMut(u64),
    {
        let identity = self.identity.clone().ok_or(GatewayError::NotJoined)?;
        let transfer_id = transfer_id.into();
        let file_name = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| transfer_id.clone());

        let mut file = tokio::fs::File::open(path).await?;
        let size = file.metadata().await?.len();

        self.send(&ClientEvent::UploadStart(UploadStart {
            file_name: file_name.clone(),
            size,
            file_id: transfer_id.clone(),
        }))
        .await?;

        match self
            .wait_for("upload-ack", |event| is_reply(event, &transfer_id, false))
            .await?
        {
            ServerEvent::UploadAck(_) => {}
            other => return Err(rejection(other, &transfer_id)),
        }

        let mut buf = vec![0u8; self.chunk_size];
        let mut offset = 0u64;
        loop {
            let n = read_chunk(&mut file, &mut buf).await?;
            if n == 0 {
                break;
            }
            self.send(&ClientEvent::UploadChunk(UploadChunk {
                file_id: transfer_id.clone(),
                file_name: file_name.clone(),
                chunk: buf[..n].to_vec(),
                offset,
            }))
            .await?;
            offset += n as u64;
            on_progress(offset);
        }

        self.send(&ClientEvent::UploadEnd(UploadEnd {
            file_id: transfer_id.clone(),
            file_name,
            is_private: recipient.is_some(),
            recipient_id: recipient.map(str::to_string),
            sender_id: identity.user_id,
            sender_name: identity.username,
        }))
        .await?;

        let private = recipient.is_some();
        match self
            .wait_for("delivery confirmation", |event| is_reply(event, &transfer_id, private))
            .await?
        {
            ServerEvent::FileShared(record) | ServerEvent::FileSent(record) => Ok(record),
            other => Err(rejection(other, &transfer_id)),
        }
    }

    /// Close the connection
    ///
    /// # Errors
    ///
    /// Returns error if the close handshake fails.
    pub async fn close(mut self) -> Result<()> {
        self.socket.close(None).await?;
        Ok(())
    }

    async fn read_event(&mut self) -> Result<ServerEvent> {
        while let Some(frame) = self.socket.next().await {
            match frame? {
                Message::Text(text) => return Ok(ServerEvent::from_json(&text)?),
                Message::Close(_) => break,
                _ => {}
            }
        }
        Err(GatewayError::Closed)
    }
}

/// Fill `buf` from `file`, short only at end of file
async fn read_chunk(file: &mut tokio::fs::File, buf: &mut [u8]) -> std::io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        let n = file.read(&mut buf[filled..]).await?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    Ok(filled)
}

/// Whether `event` answers the transfer `transfer_id`
///
/// Before upload-end the reply is the ack; afterwards it is the sender's own
/// `file-shared` copy (broadcast) or `file-sent` (private). Errors always count.
fn is_reply(event: &ServerEvent, transfer_id: &str, private: bool) -> bool {
    match event {
        ServerEvent::UploadAck(ack) => ack.file_id == transfer_id,
        ServerEvent::UploadError(failure) => failure.file_id == transfer_id,
        ServerEvent::FileShared(record) => !private && record.transfer_id == transfer_id,
        ServerEvent::FileSent(record) => private && record.transfer_id == transfer_id,
        ServerEvent::OnlineUsers(_) => false,
    }
}

fn rejection(event: ServerEvent, transfer_id: &str) -> GatewayError {
    let message = match event {
        ServerEvent::UploadError(failure) => failure.message,
        other => format!("unexpected {}", other.name()),
    };
    GatewayError::Rejected {
        file_id: transfer_id.to_string(),
        message,
    }
}
