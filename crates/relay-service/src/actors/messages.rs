//! Message types for the gateway mailbox.
//!
//! All communication with the gateway actor is strongly-typed message passing
//! via `tokio::sync::mpsc`; request-reply uses `tokio::sync::oneshot`.

use crate::events::{ClientEvent, PresenceStatus, Role};
use crate::registry::{ConnectionHandle, ConnectionId};

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::oneshot;

/// Messages sent to the `GatewayActor`.
#[derive(Debug)]
pub enum GatewayMessage {
    /// An inbound event from a connection. `register` events bind the
    /// connection handle; everything else resolves the sender by it.
    Inbound {
        conn: ConnectionHandle,
        event: ClientEvent,
    },

    /// A connection's transport closed; run the full disconnect handler.
    ConnectionClosed { connection_id: ConnectionId },

    /// Read-only presence query for CRUD collaborators.
    QueryPresence {
        identity: String,
        respond_to: oneshot::Sender<Option<PresenceSnapshot>>,
    },

    /// Current gateway counters (health/metrics).
    GetStats {
        respond_to: oneshot::Sender<GatewayStats>,
    },
}

/// Snapshot of one identity's presence.
#[derive(Debug, Clone, Serialize)]
pub struct PresenceSnapshot {
    pub identity: String,
    pub role: Role,
    pub status: PresenceStatus,
    pub custom_text: Option<String>,
    pub last_active_at: DateTime<Utc>,
}

/// Point-in-time gateway counters.
#[derive(Debug, Clone, Copy, Serialize)]
pub struct GatewayStats {
    /// Live registered connections.
    pub connections: usize,
    /// Helpers currently available for matchmaking.
    pub helpers_available: usize,
    /// Seekers in the waiting queue.
    pub waiting: usize,
    /// Live signaling rooms.
    pub rooms: usize,
    /// In-flight invite requests.
    pub invites: usize,
}
