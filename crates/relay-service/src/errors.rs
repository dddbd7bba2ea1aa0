//! Relay error types.
//!
//! Error types map to event `error` codes for client responses. Internal
//! details are logged server-side but not exposed to clients, and error text
//! never carries identities or room ids.

use thiserror::Error;

/// Relay error type.
///
/// Maps to outbound `error` codes:
/// - `Malformed`: `BAD_REQUEST` (1)
/// - `NotRegistered`: `UNAUTHORIZED` (2)
/// - `TargetUnreachable`, `RoomNotFound`, `InviteNotFound`: `NOT_FOUND` (4)
/// - `StaleTransition`, `Conflict`: `CONFLICT` (5)
/// - `Internal`: `INTERNAL_ERROR` (6)
/// - `QueueFull`, `Draining`: `CAPACITY_EXCEEDED` (7)
#[derive(Debug, Error)]
pub enum RelayError {
    /// Inbound payload failed boundary validation.
    #[error("Malformed event: {0}")]
    Malformed(String),

    /// Event arrived on a connection that never registered an identity.
    #[error("Connection not registered")]
    NotRegistered,

    /// Target identity has no live connection.
    #[error("Target unreachable")]
    TargetUnreachable,

    /// Room not found in the room registry.
    #[error("Room not found")]
    RoomNotFound,

    /// Invite request id unknown (never created or already resolved).
    #[error("Invite not found")]
    InviteNotFound,

    /// Stale or duplicate state transition (e.g. double-accept of an invite).
    #[error("Stale transition: {0}")]
    StaleTransition(String),

    /// Conflicting state (e.g. already waiting).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Waiting queue is at capacity.
    #[error("Waiting queue full")]
    QueueFull,

    /// Relay is shutting down.
    #[error("Relay is draining")]
    Draining,

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RelayError {
    /// Returns the outbound `error` code value for this error.
    #[must_use]
    pub fn error_code(&self) -> i32 {
        match self {
            RelayError::Malformed(_) => 1,
            RelayError::NotRegistered => 2,
            RelayError::TargetUnreachable
            | RelayError::RoomNotFound
            | RelayError::InviteNotFound => 4,
            RelayError::StaleTransition(_) | RelayError::Conflict(_) => 5,
            RelayError::Internal(_) => 6,
            RelayError::QueueFull | RelayError::Draining => 7,
        }
    }

    /// Returns a client-safe error message (no internal details).
    #[must_use]
    pub fn client_message(&self) -> String {
        match self {
            RelayError::Malformed(_) => "Malformed event payload".to_string(),
            RelayError::NotRegistered => "Register an identity first".to_string(),
            RelayError::TargetUnreachable => "Target is not reachable".to_string(),
            RelayError::RoomNotFound => "Room not found".to_string(),
            RelayError::InviteNotFound => "Invite not found".to_string(),
            RelayError::StaleTransition(_) => "Request is stale or duplicated".to_string(),
            RelayError::Conflict(msg) => msg.clone(),
            RelayError::QueueFull => "No volunteers available right now".to_string(),
            RelayError::Draining => "Server is shutting down, please reconnect".to_string(),
            RelayError::Internal(_) => "An internal error occurred".to_string(),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code_mapping() {
        assert_eq!(RelayError::Malformed("bad json".to_string()).error_code(), 1);
        assert_eq!(RelayError::NotRegistered.error_code(), 2);
        assert_eq!(RelayError::TargetUnreachable.error_code(), 4);
        assert_eq!(RelayError::RoomNotFound.error_code(), 4);
        assert_eq!(RelayError::InviteNotFound.error_code(), 4);
        assert_eq!(
            RelayError::StaleTransition("double accept".to_string()).error_code(),
            5
        );
        assert_eq!(
            RelayError::Conflict("already waiting".to_string()).error_code(),
            5
        );
        assert_eq!(RelayError::Internal("channel closed".to_string()).error_code(), 6);
        assert_eq!(RelayError::QueueFull.error_code(), 7);
        assert_eq!(RelayError::Draining.error_code(), 7);
    }

    #[test]
    fn test_client_messages_hide_internal_details() {
        let err = RelayError::Internal("mpsc send to 10.0.0.3 failed".to_string());
        assert!(!err.client_message().contains("10.0.0.3"));
        assert_eq!(err.client_message(), "An internal error occurred");

        let err = RelayError::StaleTransition("invite 123 already accepted".to_string());
        assert!(!err.client_message().contains("123"));
    }

    #[test]
    fn test_display_formatting() {
        assert_eq!(
            format!("{}", RelayError::Malformed("missing field".to_string())),
            "Malformed event: missing field"
        );
        assert_eq!(format!("{}", RelayError::TargetUnreachable), "Target unreachable");
    }
}
