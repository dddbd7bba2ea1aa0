//! Invitation state machine for the "request a specific named helper" path.
//!
//! Per request: `pending` → `forwarded` (helper reachable, message delivered)
//! or `failed` (helper unreachable) → on the helper's decision, `accepted` or
//! `declined`. Exactly one of forwarded/failed is produced synchronously with
//! the invite, and a request resolves at most once: terminal requests leave
//! the table, so a duplicate response finds nothing and is rejected as stale.

use crate::errors::RelayError;
use crate::events::InviteKind;

use std::collections::HashMap;
use tokio::time::Instant;
use uuid::Uuid;

/// Invite request state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InviteState {
    /// Created; delivery to the helper not yet attempted.
    Pending,
    /// Delivered to the helper; awaiting a decision.
    Forwarded,
}

/// One in-flight invite request.
#[derive(Debug, Clone)]
pub struct InviteRequest {
    pub request_id: Uuid,
    pub from: String,
    pub to_helper: String,
    pub kind: InviteKind,
    pub state: InviteState,
    forwarded_at: Option<Instant>,
}

/// Table of in-flight invite requests.
#[derive(Debug, Default)]
pub struct InviteTable {
    invites: HashMap<Uuid, InviteRequest>,
}

impl InviteTable {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a pending invite and return its id.
    pub fn create(&mut self, from: &str, to_helper: &str, kind: InviteKind) -> Uuid {
        let request_id = Uuid::new_v4();
        self.invites.insert(
            request_id,
            InviteRequest {
                request_id,
                from: from.to_string(),
                to_helper: to_helper.to_string(),
                kind,
                state: InviteState::Pending,
                forwarded_at: None,
            },
        );
        request_id
    }

    /// Mark a pending invite as delivered to the helper.
    pub fn mark_forwarded(&mut self, request_id: Uuid) -> bool {
        match self.invites.get_mut(&request_id) {
            Some(invite) if invite.state == InviteState::Pending => {
                invite.state = InviteState::Forwarded;
                invite.forwarded_at = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Remove an invite that failed delivery (helper unreachable).
    pub fn fail(&mut self, request_id: Uuid) -> Option<InviteRequest> {
        self.invites.remove(&request_id)
    }

    /// Resolve a forwarded invite with the helper's decision, removing it.
    ///
    /// Errors with [`RelayError::InviteNotFound`] when the id is unknown or
    /// already resolved, and with [`RelayError::StaleTransition`] when
    /// `responder` is not the invited helper or the invite was never
    /// forwarded — the caller logs and ignores, never corrupting registry
    /// state.
    pub fn resolve(&mut self, request_id: Uuid, responder: &str) -> Result<InviteRequest, RelayError> {
        match self.invites.get(&request_id) {
            None => Err(RelayError::InviteNotFound),
            Some(invite) if invite.to_helper != responder => Err(RelayError::StaleTransition(
                "response from a non-invited identity".to_string(),
            )),
            Some(invite) if invite.state != InviteState::Forwarded => {
                Err(RelayError::StaleTransition(
                    "invite was never forwarded".to_string(),
                ))
            }
            Some(_) => Ok(self
                .invites
                .remove(&request_id)
                .ok_or_else(|| RelayError::Internal("invite vanished mid-resolve".to_string()))?),
        }
    }

    /// Remove and return every invite addressed to `helper` (its disconnect
    /// fails them; the stale ids cannot be resurrected on reconnect).
    pub fn fail_for_helper(&mut self, helper: &str) -> Vec<InviteRequest> {
        let ids: Vec<Uuid> = self
            .invites
            .values()
            .filter(|i| i.to_helper == helper)
            .map(|i| i.request_id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.invites.remove(&id))
            .collect()
    }

    /// Remove and return every invite sent by `requester` (disconnect path).
    pub fn fail_for_requester(&mut self, requester: &str) -> Vec<InviteRequest> {
        let ids: Vec<Uuid> = self
            .invites
            .values()
            .filter(|i| i.from == requester)
            .map(|i| i.request_id)
            .collect();
        ids.into_iter()
            .filter_map(|id| self.invites.remove(&id))
            .collect()
    }

    /// Invites stuck in `forwarded` longer than `ttl` (expiry sweep).
    #[must_use]
    pub fn expired_forwarded(&self, ttl: std::time::Duration) -> Vec<Uuid> {
        let now = Instant::now();
        self.invites
            .values()
            .filter(|i| {
                i.state == InviteState::Forwarded
                    && i.forwarded_at
                        .is_some_and(|at| now.duration_since(at) >= ttl)
            })
            .map(|i| i.request_id)
            .collect()
    }

    #[must_use]
    pub fn get(&self, request_id: Uuid) -> Option<&InviteRequest> {
        self.invites.get(&request_id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.invites.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.invites.is_empty()
    }
}
