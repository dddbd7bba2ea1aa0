//! Connection registry: identity → live connection, plus presence metadata.
//!
//! Invariant: at most one live connection handle per identity. A newer
//! registration always wins; the registry is the sole source of truth for
//! "is this identity reachable right now".
//!
//! Disconnect is O(1) via a reverse index (connection id → identity). The
//! reverse index only ever points at the identity's *current* connection, so
//! the close of a superseded socket can never evict its replacement.

use crate::events::{PresenceStatus, Role, ServerEvent};

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::mpsc;
use tracing::warn;
use uuid::Uuid;

/// Unique identifier for one live connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for ConnectionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to one live connection's outbound event channel.
///
/// Delivery never blocks: a full or closed channel drops the event with a
/// warning so one slow client cannot stall the gateway.
#[derive(Debug, Clone)]
pub struct ConnectionHandle {
    id: ConnectionId,
    sender: mpsc::Sender<ServerEvent>,
}

impl ConnectionHandle {
    #[must_use]
    pub fn new(sender: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            id: ConnectionId::new(),
            sender,
        }
    }

    /// Get the connection ID.
    #[must_use]
    pub fn id(&self) -> ConnectionId {
        self.id
    }

    /// Deliver an event to the connection. Returns false if it was dropped.
    pub fn deliver(&self, event: ServerEvent) -> bool {
        match self.sender.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                warn!(
                    target: "relay.registry.connections",
                    connection_id = %self.id,
                    event = ?std::mem::discriminant(&event),
                    "Outbound channel full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        }
    }
}

/// Registry entry for one identity's live connection.
#[derive(Debug)]
pub struct ConnectionEntry {
    pub identity: String,
    pub role: Role,
    pub status: PresenceStatus,
    pub custom_status_text: Option<String>,
    pub last_active_at: DateTime<Utc>,
    handle: ConnectionHandle,
}

impl ConnectionEntry {
    /// The live connection handle for this identity.
    #[must_use]
    pub fn handle(&self) -> &ConnectionHandle {
        &self.handle
    }
}

/// Identity → connection registry with O(1) reverse lookup.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    entries: HashMap<String, ConnectionEntry>,
    by_connection: HashMap<ConnectionId, String>,
}

impl ConnectionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Idempotent upsert: binds `identity` to `handle`, overwriting any prior
    /// handle for that identity (stale reconnects). Returns the replaced
    /// handle, if any.
    pub fn register(
        &mut self,
        identity: &str,
        handle: ConnectionHandle,
        role: Role,
    ) -> Option<ConnectionHandle> {
        self.by_connection.insert(handle.id(), identity.to_string());

        let replaced = self.entries.insert(
            identity.to_string(),
            ConnectionEntry {
                identity: identity.to_string(),
                role,
                status: PresenceStatus::Active,
                custom_status_text: None,
                last_active_at: Utc::now(),
                handle,
            },
        );

        replaced.map(|old| {
            // The superseded socket no longer resolves to this identity.
            self.by_connection.remove(&old.handle.id());
            old.handle
        })
    }

    /// Resolve where to deliver a message for `identity`.
    ///
    /// `None` is not an error: callers treat it as "target unreachable" and
    /// notify the requester explicitly.
    #[must_use]
    pub fn lookup(&self, identity: &str) -> Option<&ConnectionHandle> {
        self.entries.get(identity).map(|e| &e.handle)
    }

    /// Full entry for `identity`, if connected.
    #[must_use]
    pub fn entry(&self, identity: &str) -> Option<&ConnectionEntry> {
        self.entries.get(identity)
    }

    /// Reverse lookup: which identity owns this connection?
    #[must_use]
    pub fn identity_for(&self, connection_id: ConnectionId) -> Option<&str> {
        self.by_connection.get(&connection_id).map(String::as_str)
    }

    /// Update presence metadata. Returns false if `identity` is not connected.
    pub fn set_status(
        &mut self,
        identity: &str,
        status: PresenceStatus,
        custom_text: Option<String>,
    ) -> bool {
        match self.entries.get_mut(identity) {
            Some(entry) => {
                entry.status = status;
                entry.custom_status_text = custom_text;
                entry.last_active_at = Utc::now();
                true
            }
            None => false,
        }
    }

    /// Refresh `last_active_at` for `identity`.
    pub fn touch(&mut self, identity: &str) {
        if let Some(entry) = self.entries.get_mut(identity) {
            entry.last_active_at = Utc::now();
        }
    }

    /// Remove the entry owning `connection_id` (called on disconnect).
    ///
    /// Returns `None` when the connection was already superseded by a newer
    /// registration; in that case the identity stays reachable.
    pub fn unregister(&mut self, connection_id: ConnectionId) -> Option<ConnectionEntry> {
        let identity = self.by_connection.remove(&connection_id)?;
        self.entries.remove(&identity)
    }

    /// Iterate all live connection handles (presence broadcast fan-out).
    pub fn handles(&self) -> impl Iterator<Item = &ConnectionHandle> {
        self.entries.values().map(|e| &e.handle)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
