//! Relay engine: routing of inbound events onto the registry and transfer sessions.
//!
//! The engine is the only place routing decisions are made. It owns the
//! presence [`Registry`] and the map of active [`TransferSession`]s, and talks
//! back to clients exclusively through an [`Outbound`] implementation
//! provided by the connection gateway.
//!
//! # Concurrency
//!
//! One gateway task per connection calls into the engine concurrently.
//! - The registry sits behind a single `RwLock`; presence broadcasts are
//!   emitted while the write lock is held so they are observed in order.
//! - Each session sits behind its own `Mutex`, so appends for one transfer
//!   never interleave while different transfers proceed in parallel.
//! - Every active session holds a claim on its destination file; a second
//!   session mapping to the same file is refused instead of truncating it.
//! - Byte order within a transfer relies on the gateway delivering a
//!   connection's events sequentially.

use crate::error::{RelayError, Result};
use crate::events::{ClientEvent, ServerEvent, UploadChunk, UploadEnd, UploadStart};
use crate::registry::Registry;
use crate::transfer::TransferSession;
use crate::types::{ConnectedUser, ConnectionId, DeliveryRecord, TransferId};
use chrono::{SubsecRound, Utc};
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ferry_files::UploadStore;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;

/// Outbound event primitives provided by the connection gateway
///
/// Both calls are fire-and-forget: they queue the event for delivery and
/// return immediately. Emitting to a connection that is gone is a no-op.
pub trait Outbound: Send + Sync {
    /// Queue an event for a single connection
    fn emit_to(&self, connection: ConnectionId, event: ServerEvent);

    /// Queue an event for every open connection
    fn emit_to_all(&self, event: ServerEvent);
}

impl<T: Outbound + ?Sized> Outbound for Arc<T> {
    fn emit_to(&self, connection: ConnectionId, event: ServerEvent) {
        (**self).emit_to(connection, event);
    }

    fn emit_to_all(&self, event: ServerEvent) {
        (**self).emit_to_all(event);
    }
}

/// Relay engine configuration
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Sessions idle for this long are discarded; `None` disables expiry
    pub idle_timeout: Option<Duration>,
    /// How often the sweeper looks for idle sessions
    pub sweep_interval: Duration,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(300)),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

/// How a completed transfer was delivered
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delivery {
    /// `file-shared` went to every connection, the sender included
    Broadcast(DeliveryRecord),
    /// `file-shared` went to the recipient, `file-sent` back to the sender
    Direct {
        /// Record delivered to the recipient
        record: DeliveryRecord,
        /// Recipient at the time of delivery
        recipient: ConnectedUser,
    },
}

/// An active session plus the connection that opened it
#[derive(Debug)]
struct ActiveTransfer {
    transfer_id: TransferId,
    owner: ConnectionId,
    destination: PathBuf,
    session: Mutex<TransferSession>,
}

/// Relay engine
pub struct RelayEngine<O> {
    registry: RwLock<Registry>,
    transfers: DashMap<TransferId, Arc<ActiveTransfer>>,
    destinations: DashMap<PathBuf, Arc<ActiveTransfer>>,
    store: UploadStore,
    outbound: O,
    config: RelayConfig,
}

impl<O: Outbound> RelayEngine<O> {
    /// Create an engine writing uploads into `store` and emitting through `outbound`
    pub fn new(store: UploadStore, outbound: O, config: RelayConfig) -> Self {
        Self {
            registry: RwLock::new(Registry::new()),
            transfers: DashMap::new(),
            destinations: DashMap::new(),
            store,
            outbound,
            config,
        }
    }

    /// Dispatch one inbound event from `connection`
    ///
    /// Failures are logged and reported to `connection` as `upload-error`;
    /// they never propagate to other connections.
    pub async fn handle(&self, connection: ConnectionId, event: ClientEvent) {
        match event {
            ClientEvent::Join(request) => {
                self.join(connection, request.user_id, request.username)
                    .await;
            }
            ClientEvent::UploadStart(start) => {
                let file_id = start.file_id.clone();
                if let Err(e) = self.start_upload(connection, start).await {
                    self.report(connection, &file_id, &e);
                }
            }
            ClientEvent::UploadChunk(chunk) => {
                let file_id = chunk.file_id.clone();
                if let Err(e) = self.append_chunk(chunk).await {
                    self.report(connection, &file_id, &e);
                }
            }
            ClientEvent::UploadEnd(end) => {
                let file_id = end.file_id.clone();
                if let Err(e) = self.finish_upload(connection, end).await {
                    self.report(connection, &file_id, &e);
                }
            }
        }
    }

    /// Register a user on `connection` and broadcast the presence list
    pub async fn join(
        &self,
        connection: ConnectionId,
        user_id: String,
        username: String,
    ) -> Vec<ConnectedUser> {
        let mut registry = self.registry.write().await;
        tracing::info!("User registered: {} ({}) on {}", username, user_id, connection);

        let users = registry.join(user_id, connection, username);
        self.outbound
            .emit_to_all(ServerEvent::OnlineUsers(users.clone()));
        users
    }

    /// Handle a closed connection
    ///
    /// Removes its presence entry (a no-op for connections that never
    /// joined), broadcasts the updated list and abandons any sessions the
    /// connection still had open.
    pub async fn disconnect(&self, connection: ConnectionId) -> Vec<ConnectedUser> {
        let users = {
            let mut registry = self.registry.write().await;
            let users = registry.leave(connection);
            self.outbound
                .emit_to_all(ServerEvent::OnlineUsers(users.clone()));
            users
        };
        tracing::info!("Connection closed: {}", connection);

        let orphaned: Vec<_> = self
            .transfers
            .iter()
            .filter(|entry| entry.value().owner == connection)
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (transfer_id, active) in orphaned {
            if self.detach(&transfer_id, &active) {
                tracing::info!(
                    "Abandoning transfer {} after {} disconnected",
                    transfer_id,
                    connection
                );
                let mut session = active.session.lock().await;
                if let Err(e) = session.abandon().await {
                    tracing::warn!("Failed to discard transfer {}: {}", transfer_id, e);
                }
                self.release(&active);
            }
        }

        users
    }

    /// Open a transfer session and acknowledge it to the initiator only
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::DuplicateTransfer`] if the transfer id is
    /// already active, [`RelayError::DestinationInUse`] if another active
    /// transfer writes to the same file, or [`RelayError::StorageWrite`] if
    /// the destination cannot be created.
    pub async fn start_upload(&self, connection: ConnectionId, start: UploadStart) -> Result<()> {
        let session =
            TransferSession::new(&self.store, start.file_id.clone(), start.file_name, start.size)?;
        let active = Arc::new(ActiveTransfer {
            transfer_id: start.file_id.clone(),
            owner: connection,
            destination: session.destination().to_path_buf(),
            session: Mutex::new(session),
        });

        // Hold the session lock across registration so no chunk can reach
        // the session before its destination exists.
        let mut session = active.session.lock().await;
        match self.transfers.entry(start.file_id.clone()) {
            Entry::Occupied(_) => {
                return Err(RelayError::DuplicateTransfer(start.file_id));
            }
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&active));
            }
        }

        // `{id}-{name}` is not unique across ids, e.g. "a" + "b-c.txt" and "a-b" + "c.txt"
        let holder = match self.destinations.entry(active.destination.clone()) {
            Entry::Occupied(held) => Some(held.get().transfer_id.clone()),
            Entry::Vacant(slot) => {
                slot.insert(Arc::clone(&active));
                None
            }
        };
        if let Some(holder) = holder {
            self.detach(&start.file_id, &active);
            return Err(RelayError::DestinationInUse {
                transfer_id: start.file_id,
                holder,
            });
        }

        if let Err(e) = session.open().await {
            self.detach(&start.file_id, &active);
            self.release(&active);
            return Err(e);
        }

        tracing::info!(
            "Transfer {} started by {}: {} ({} bytes announced)",
            start.file_id,
            connection,
            session.file_name(),
            session.expected_size()
        );
        self.outbound
            .emit_to(connection, ServerEvent::ready(start.file_id));
        Ok(())
    }

    /// Append a chunk to an active session
    ///
    /// No acknowledgement is emitted on success. A storage failure abandons
    /// the session and removes its partial file.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownTransfer`] if no session matches, or
    /// [`RelayError::StorageWrite`] if the append fails.
    pub async fn append_chunk(&self, chunk: UploadChunk) -> Result<u64> {
        let active = self
            .lookup(&chunk.file_id)
            .ok_or_else(|| RelayError::UnknownTransfer(chunk.file_id.clone()))?;

        let mut session = active.session.lock().await;
        match session.append_chunk(&chunk.chunk, chunk.offset).await {
            Ok(total) => {
                tracing::debug!(
                    "Transfer {}: +{} bytes ({} total)",
                    chunk.file_id,
                    chunk.chunk.len(),
                    total
                );
                Ok(total)
            }
            Err(e) if e.is_storage() => {
                self.detach(&chunk.file_id, &active);
                if let Err(discard) = session.abandon().await {
                    tracing::warn!(
                        "Failed to discard transfer {}: {}",
                        chunk.file_id,
                        discard
                    );
                }
                self.release(&active);
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Complete a session and route its delivery record
    ///
    /// The session is discarded whatever the routing outcome. Broadcast
    /// sends reach every connection, the sender included. Private sends
    /// reach the recipient as `file-shared` and the sender as `file-sent`;
    /// when the recipient is not connected no record is delivered at all.
    ///
    /// # Errors
    ///
    /// Returns [`RelayError::UnknownTransfer`] if no session matches,
    /// [`RelayError::StorageWrite`] if closing the file fails,
    /// [`RelayError::MissingRecipient`] for a private send without recipient,
    /// or [`RelayError::RecipientUnavailable`] if the recipient is offline.
    pub async fn finish_upload(&self, connection: ConnectionId, end: UploadEnd) -> Result<Delivery> {
        let (transfer_id, active) = self
            .transfers
            .remove(&end.file_id)
            .ok_or_else(|| RelayError::UnknownTransfer(end.file_id.clone()))?;

        let record = {
            let mut session = active.session.lock().await;
            let completed = session.complete().await;
            self.release(&active);
            let size = completed?;
            tracing::info!(
                "Transfer {} completed: {} bytes in {:?}",
                transfer_id,
                size,
                session.elapsed()
            );

            if size != session.expected_size() {
                tracing::warn!(
                    "Transfer {} completed with {} bytes, {} announced",
                    transfer_id,
                    size,
                    session.expected_size()
                );
            }

            DeliveryRecord {
                transfer_id: transfer_id.clone(),
                file_name: session.file_name().to_string(),
                download_path: session.download_path().to_string(),
                sender_id: end.sender_id,
                sender_name: end.sender_name,
                timestamp: Utc::now().trunc_subsecs(3),
                is_private: end.is_private,
                recipient_name: None,
            }
        };

        if !end.is_private {
            tracing::info!("Transfer {} shared with everyone", transfer_id);
            self.outbound
                .emit_to_all(ServerEvent::FileShared(record.clone()));
            return Ok(Delivery::Broadcast(record));
        }

        let recipient_id = end
            .recipient_id
            .filter(|id| !id.is_empty())
            .ok_or_else(|| RelayError::MissingRecipient(transfer_id.clone()))?;

        let recipient = self.registry.read().await.find(&recipient_id).cloned();
        let Some(recipient) = recipient else {
            tracing::warn!(
                "Transfer {} dropped: recipient {} is not connected",
                transfer_id,
                recipient_id
            );
            return Err(RelayError::RecipientUnavailable(recipient_id));
        };

        tracing::info!(
            "Transfer {} delivered privately to {} ({})",
            transfer_id,
            recipient.display_name,
            recipient.connection_id
        );
        self.outbound.emit_to(
            recipient.connection_id,
            ServerEvent::FileShared(record.clone()),
        );
        self.outbound.emit_to(
            connection,
            ServerEvent::FileSent(record.clone().with_recipient(recipient.display_name.clone())),
        );

        Ok(Delivery::Direct { record, recipient })
    }

    /// Discard sessions idle for longer than the configured timeout
    ///
    /// Each expired session has its partial file removed and its initiator
    /// notified with `upload-error`. Returns the number of sessions expired.
    pub async fn sweep_idle(&self) -> usize {
        let Some(timeout) = self.config.idle_timeout else {
            return 0;
        };

        let candidates: Vec<_> = self
            .transfers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        let mut expired = 0;
        for (transfer_id, active) in candidates {
            let mut session = active.session.lock().await;
            if !session.is_idle(timeout) || !self.detach(&transfer_id, &active) {
                continue;
            }

            tracing::warn!(
                "Transfer {} expired after {:?} idle ({} bytes written, {:.0}% of announced)",
                transfer_id,
                timeout,
                session.bytes_written(),
                session.progress() * 100.0
            );
            if let Err(e) = session.abandon().await {
                tracing::warn!("Failed to discard transfer {}: {}", transfer_id, e);
            }
            self.release(&active);
            self.outbound.emit_to(
                active.owner,
                ServerEvent::failure(transfer_id, "transfer expired"),
            );
            expired += 1;
        }

        expired
    }

    /// Flush and close every open session
    ///
    /// Files keep whatever was written; no delivery records are emitted.
    pub async fn shutdown(&self) {
        let remaining: Vec<_> = self
            .transfers
            .iter()
            .map(|entry| (entry.key().clone(), Arc::clone(entry.value())))
            .collect();

        for (transfer_id, active) in remaining {
            if !self.detach(&transfer_id, &active) {
                continue;
            }
            let mut session = active.session.lock().await;
            match session.complete().await {
                Ok(size) => tracing::info!(
                    "Closed unfinished transfer {} at shutdown ({} bytes)",
                    transfer_id,
                    size
                ),
                Err(e) => tracing::warn!("Failed to close transfer {}: {}", transfer_id, e),
            }
            self.release(&active);
        }
    }

    /// Snapshot of connected users in join order
    pub async fn online_users(&self) -> Vec<ConnectedUser> {
        self.registry.read().await.users().to_vec()
    }

    /// Number of sessions currently open
    #[must_use]
    pub fn active_transfers(&self) -> usize {
        self.transfers.len()
    }

    /// Upload store backing this engine
    #[must_use]
    pub fn store(&self) -> &UploadStore {
        &self.store
    }

    /// Whether an active transfer is still writing `path`
    #[must_use]
    pub fn is_receiving(&self, path: &Path) -> bool {
        self.destinations.contains_key(path)
    }

    fn lookup(&self, transfer_id: &str) -> Option<Arc<ActiveTransfer>> {
        self.transfers
            .get(transfer_id)
            .map(|entry| Arc::clone(entry.value()))
    }

    /// Remove `transfer_id` only if it still maps to `active`
    ///
    /// The destination stays claimed until `release`, so a
    /// new session cannot recreate the file while it is being discarded.
    fn detach(&self, transfer_id: &str, active: &Arc<ActiveTransfer>) -> bool {
        self.transfers
            .remove_if(transfer_id, |_, current| Arc::ptr_eq(current, active))
            .is_some()
    }

    fn release(&self, active: &Arc<ActiveTransfer>) {
        self.destinations
            .remove_if(&active.destination, |_, holder| Arc::ptr_eq(holder, active));
    }

    fn report(&self, connection: ConnectionId, file_id: &str, error: &RelayError) {
        tracing::warn!("Transfer {} failed for {}: {}", file_id, connection, error);
        self.outbound
            .emit_to(connection, ServerEvent::failure(file_id, error.to_string()));
    }
}

impl<O: Outbound + 'static> RelayEngine<O> {
    /// Spawn the idle-session sweeper
    ///
    /// Returns `None` when expiry is disabled.
    pub fn spawn_sweeper(self: &Arc<Self>) -> Option<JoinHandle<()>> {
        self.config.idle_timeout?;

        let engine = Arc::clone(self);
        // tokio intervals reject a zero period
        let interval = self.config.sweep_interval.max(Duration::from_millis(1));

        Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let expired = engine.sweep_idle().await;
                if expired > 0 {
                    tracing::info!("Sweeper expired {} idle transfers", expired);
                }
            }
        }))
    }
}
