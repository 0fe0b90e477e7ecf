//! Presence registry of connected identities.

use crate::types::{ConnectedUser, ConnectionId};

/// Table of currently connected users, in join order
///
/// Holds at most one entry per user id: a new join for the same user evicts
/// the previous entry. Pure state; synchronization is the owner's concern.
#[derive(Debug, Default, Clone)]
pub struct Registry {
    users: Vec<ConnectedUser>,
}

impl Registry {
    /// Create an empty registry
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `user_id` on `connection_id`, replacing any earlier entry
    /// for the same user, and return the updated list
    pub fn join(
        &mut self,
        user_id: impl Into<String>,
        connection_id: ConnectionId,
        display_name: impl Into<String>,
    ) -> Vec<ConnectedUser> {
        let user_id = user_id.into();
        self.users.retain(|user| user.user_id != user_id);
        self.users.push(ConnectedUser {
            user_id,
            connection_id,
            display_name: display_name.into(),
        });
        self.users.clone()
    }

    /// Drop every entry bound to `connection_id` and return the updated list
    ///
    /// Connections that never joined are a no-op.
    pub fn leave(&mut self, connection_id: ConnectionId) -> Vec<ConnectedUser> {
        self.users.retain(|user| user.connection_id != connection_id);
        self.users.clone()
    }

    /// Look up a connected user
    #[must_use]
    pub fn find(&self, user_id: &str) -> Option<&ConnectedUser> {
        self.users.iter().find(|user| user.user_id == user_id)
    }

    /// Connected users in join order
    #[must_use]
    pub fn users(&self) -> &[ConnectedUser] {
        &self.users
    }

    /// Number of connected users
    #[must_use]
    pub fn len(&self) -> usize {
        self.users.len()
    }

    /// Whether nobody is connected
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}
