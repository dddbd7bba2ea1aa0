//! Event vocabulary for the relay core.
//!
//! Inbound and outbound events are internally-tagged enums, one variant per
//! operation. Deserialization at the boundary is the validation step: a
//! payload that does not parse into a [`ClientEvent`] never reaches registry
//! logic.
//!
//! The vocabulary is transport-agnostic; the WebSocket bridge in [`crate::ws`]
//! is just one carrier for it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Role of a registered identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    /// Requests support via anonymous matchmaking.
    Seeker,
    /// Can be matched to provide support ("volunteer" in user-facing text).
    Helper,
    /// Neither side of matchmaking; presence and calls only.
    PlainUser,
}

/// Presence status of an identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceStatus {
    Active,
    Away,
    Dnd,
    Offline,
    /// Free-form status; the text travels separately.
    Custom,
}

/// Kind of helper invite.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InviteKind {
    Chat,
    Call,
}

/// Display metadata a seeker attaches to a support request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeekerMeta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    /// What the seeker wants to talk about, if they said.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub topic: Option<String>,
}

/// Helper metadata delivered to a matched seeker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelperMeta {
    pub identity: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
    #[serde(default)]
    pub skills: Vec<String>,
}

/// Inbound events from a connected client or collaborator.
///
/// The sender's identity is resolved from its registered connection; only
/// `register` carries the identity explicitly.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Bind this connection to an identity. Idempotent upsert: a newer
    /// registration for the same identity always wins.
    Register { identity: String, role: Role },

    /// Update presence status.
    SetStatus {
        status: PresenceStatus,
        #[serde(default)]
        custom_text: Option<String>,
    },

    /// Helper flips its own availability. `available: true` is the
    /// queue-drain trigger.
    SetAvailability {
        available: bool,
        #[serde(default)]
        skills: Vec<String>,
    },

    /// Anonymous matchmaking request.
    RequestSupport {
        #[serde(default)]
        meta: SeekerMeta,
    },

    /// Leave the waiting queue. No-op if not waiting.
    CancelWait,

    /// Invite a specific named helper.
    InviteHelper { helper: String, kind: InviteKind },

    /// Helper's decision on a pending invite.
    RespondToInvite { request_id: Uuid, accept: bool },

    /// Direct call to a known identity, without matchmaking.
    CallUser {
        to: String,
        #[serde(default)]
        room_id: Option<String>,
    },

    /// Join a signaling room, creating it if absent.
    JoinRoom { room_id: String },

    /// WebRTC offer, relayed verbatim to the other room members.
    Offer {
        room_id: String,
        payload: serde_json::Value,
    },

    /// WebRTC answer, relayed verbatim to the other room members.
    Answer {
        room_id: String,
        payload: serde_json::Value,
    },

    /// ICE candidate, relayed verbatim to the other room members.
    IceCandidate {
        room_id: String,
        payload: serde_json::Value,
    },

    /// End the call: notify all members, then destroy the room.
    EndCall { room_id: String },
}

/// Outbound events delivered to connections.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    PresenceChanged {
        identity: String,
        status: PresenceStatus,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        custom_text: Option<String>,
    },

    /// Queued; a helper will be assigned when one frees up.
    Searching,

    /// The waiting queue is full; the request was rejected.
    NoHelperAvailable,

    /// Delivered to the seeker when matchmaking pairs it with a helper.
    Matched { room_id: String, helper: HelperMeta },

    /// Delivered to the helper side of a new session.
    SessionStarted {
        room_id: String,
        seeker: String,
        #[serde(default)]
        meta: SeekerMeta,
    },

    /// Delivered to the invited helper.
    InviteIncoming {
        request_id: Uuid,
        from: String,
        kind: InviteKind,
    },

    InviteForwarded { request_id: Uuid },

    InviteFailed { request_id: Uuid, reason: String },

    /// Delivered to both sides once the helper accepts.
    InviteAccepted { request_id: Uuid, room_id: String },

    InviteDeclined { request_id: Uuid },

    IncomingCall { from: String, room_id: String },

    CallFailed { reason: String },

    CallEnded { room_id: String },

    /// A room peer's connection dropped; the room may still be alive.
    PeerDisconnected { room_id: String, identity: String },

    OfferReceived {
        room_id: String,
        payload: serde_json::Value,
    },

    AnswerReceived {
        room_id: String,
        payload: serde_json::Value,
    },

    IceCandidateReceived {
        room_id: String,
        payload: serde_json::Value,
    },

    /// Typed failure scoped to the offending connection.
    Error { code: i32, message: String },
}

/// Session lifecycle notice for the external persistence collaborator.
///
/// The relay emits these on a side channel and never blocks on their
/// consumption; durable storage is not this core's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SessionNotice {
    Started {
        room_id: String,
        seeker: String,
        helper: String,
        started_at: DateTime<Utc>,
    },
    Ended {
        room_id: String,
        ended_at: DateTime<Utc>,
    },
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[test]
    fn test_client_event_register_roundtrip() {
        let json = r#"{"type":"register","identity":"user-1","role":"helper"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::Register {
                identity: "user-1".to_string(),
                role: Role::Helper,
            }
        );
    }

    #[test]
    fn test_client_event_optional_fields_default() {
        let json = r#"{"type":"request_support"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::RequestSupport {
                meta: SeekerMeta::default(),
            }
        );

        let json = r#"{"type":"set_status","status":"away"}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        assert_eq!(
            event,
            ClientEvent::SetStatus {
                status: PresenceStatus::Away,
                custom_text: None,
            }
        );
    }

    #[test]
    fn test_client_event_rejects_unknown_type() {
        let json = r#"{"type":"drop_tables"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_client_event_rejects_missing_required_field() {
        // invite_helper without a target helper is malformed
        let json = r#"{"type":"invite_helper","kind":"chat"}"#;
        assert!(serde_json::from_str::<ClientEvent>(json).is_err());
    }

    #[test]
    fn test_signaling_payload_is_opaque() {
        let json = r#"{"type":"offer","room_id":"r1","payload":{"sdp":"v=0...","nested":{"a":1}}}"#;
        let event: ClientEvent = serde_json::from_str(json).unwrap();
        match event {
            ClientEvent::Offer { room_id, payload } => {
                assert_eq!(room_id, "r1");
                assert_eq!(payload["sdp"], "v=0...");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_server_event_serializes_tagged() {
        let event = ServerEvent::Matched {
            room_id: "room-1".to_string(),
            helper: HelperMeta {
                identity: "h1".to_string(),
                display_name: Some("Sam".to_string()),
                skills: vec!["listening".to_string()],
            },
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "matched");
        assert_eq!(json["helper"]["identity"], "h1");
    }

    #[test]
    fn test_presence_changed_omits_empty_custom_text() {
        let event = ServerEvent::PresenceChanged {
            identity: "u1".to_string(),
            status: PresenceStatus::Active,
            custom_text: None,
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(!json.contains("custom_text"));
    }

    #[test]
    fn test_session_notice_roundtrip() {
        let notice = SessionNotice::Ended {
            room_id: "r9".to_string(),
            ended_at: Utc::now(),
        };
        let json = serde_json::to_string(&notice).unwrap();
        let back: SessionNotice = serde_json::from_str(&json).unwrap();
        assert_eq!(notice, back);
    }
}
