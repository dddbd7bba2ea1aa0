//! Room registry: signaling scope membership and call state.
//!
//! A room is the relay scope for one call or chat session. Membership is
//! mutated only through registry operations, and a room whose last member
//! leaves is removed immediately; zero-member rooms never linger.
//!
//! Room state machine: `ringing` (offered, no answer yet) → `active`
//! (answered) → removed on end-call or last leave. The registry exposes
//! ringing deadlines so the gateway sweep can expire calls nobody answers.

use std::collections::{HashMap, HashSet};
use tokio::time::Instant;

/// Call state of a room.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RoomState {
    /// One side has offered; no answer yet.
    Ringing,
    /// Answer received; call in progress.
    Active,
}

/// One signaling room.
#[derive(Debug)]
pub struct Room {
    pub room_id: String,
    pub state: RoomState,
    pub created_at: Instant,
    members: HashSet<String>,
}

impl Room {
    /// Members other than `identity` (relay fan-out targets).
    #[must_use]
    pub fn members_except(&self, identity: &str) -> Vec<String> {
        self.members
            .iter()
            .filter(|m| m.as_str() != identity)
            .cloned()
            .collect()
    }

    #[must_use]
    pub fn members(&self) -> Vec<String> {
        self.members.iter().cloned().collect()
    }

    #[must_use]
    pub fn contains(&self, identity: &str) -> bool {
        self.members.contains(identity)
    }

    #[must_use]
    pub fn member_count(&self) -> usize {
        self.members.len()
    }
}

/// Outcome of removing an identity from one room during disconnect cleanup.
#[derive(Debug)]
pub struct RoomDeparture {
    pub room_id: String,
    /// Call state the room was in when the member left.
    pub state: RoomState,
    /// Members left behind, to be notified exactly once.
    pub remaining: Vec<String>,
    /// True if the departure emptied the room and it was deleted.
    pub room_deleted: bool,
}

/// Registry of rooms with an identity → rooms index for disconnect cleanup.
#[derive(Debug, Default)]
pub struct RoomRegistry {
    rooms: HashMap<String, Room>,
    rooms_by_identity: HashMap<String, HashSet<String>>,
}

impl RoomRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a room in the given state. Returns false if the id is taken.
    pub fn create(&mut self, room_id: &str, state: RoomState) -> bool {
        if self.rooms.contains_key(room_id) {
            return false;
        }
        self.rooms.insert(
            room_id.to_string(),
            Room {
                room_id: room_id.to_string(),
                state,
                created_at: Instant::now(),
                members: HashSet::new(),
            },
        );
        true
    }

    /// Add `identity` to `room_id`, creating the room (ringing) if absent.
    /// Returns true when the room was created by this call.
    pub fn join(&mut self, room_id: &str, identity: &str) -> bool {
        let created = if self.rooms.contains_key(room_id) {
            false
        } else {
            self.create(room_id, RoomState::Ringing)
        };
        if let Some(room) = self.rooms.get_mut(room_id) {
            room.members.insert(identity.to_string());
        }
        self.rooms_by_identity
            .entry(identity.to_string())
            .or_default()
            .insert(room_id.to_string());
        created
    }

    #[must_use]
    pub fn get(&self, room_id: &str) -> Option<&Room> {
        self.rooms.get(room_id)
    }

    /// Move a room to a new call state. Returns false if the room is gone.
    pub fn set_state(&mut self, room_id: &str, state: RoomState) -> bool {
        match self.rooms.get_mut(room_id) {
            Some(room) => {
                room.state = state;
                true
            }
            None => false,
        }
    }

    /// Remove a room entirely, releasing its id for reuse.
    pub fn remove(&mut self, room_id: &str) -> Option<Room> {
        let room = self.rooms.remove(room_id)?;
        for member in &room.members {
            if let Some(set) = self.rooms_by_identity.get_mut(member) {
                set.remove(room_id);
                if set.is_empty() {
                    self.rooms_by_identity.remove(member);
                }
            }
        }
        Some(room)
    }

    /// Remove `identity` from every room it is in (disconnect handler).
    ///
    /// Each affected room appears exactly once in the result; rooms emptied
    /// by the departure are deleted immediately.
    pub fn remove_identity(&mut self, identity: &str) -> Vec<RoomDeparture> {
        let Some(room_ids) = self.rooms_by_identity.remove(identity) else {
            return Vec::new();
        };

        let mut departures = Vec::with_capacity(room_ids.len());
        for room_id in room_ids {
            let Some(room) = self.rooms.get_mut(&room_id) else {
                continue;
            };
            room.members.remove(identity);
            let state = room.state;
            let remaining = room.members();
            let room_deleted = remaining.is_empty();
            if room_deleted {
                self.rooms.remove(&room_id);
            }
            departures.push(RoomDeparture {
                room_id,
                state,
                remaining,
                room_deleted,
            });
        }
        departures
    }

    /// Room ids stuck in `ringing` longer than `ttl` (expiry sweep).
    #[must_use]
    pub fn ringing_expired(&self, ttl: std::time::Duration) -> Vec<String> {
        let now = Instant::now();
        self.rooms
            .values()
            .filter(|r| r.state == RoomState::Ringing && now.duration_since(r.created_at) >= ttl)
            .map(|r| r.room_id.clone())
            .collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_join_creates_room_if_absent() {
        let mut registry = RoomRegistry::new();
        registry.join("r1", "alice");

        let room = registry.get("r1").unwrap();
        assert_eq!(room.state, RoomState::Ringing);
        assert!(room.contains("alice"));
        assert_eq!(room.member_count(), 1);
    }

    #[test]
    fn test_create_rejects_duplicate_id() {
        let mut registry = RoomRegistry::new();
        assert!(registry.create("r1", RoomState::Active));
        assert!(!registry.create("r1", RoomState::Ringing));
    }

    #[test]
    fn test_members_except_excludes_sender() {
        let mut registry = RoomRegistry::new();
        registry.join("r1", "alice");
        registry.join("r1", "bob");
        registry.join("r1", "carol");

        let mut others = registry.get("r1").unwrap().members_except("alice");
        others.sort();
        assert_eq!(others, vec!["bob".to_string(), "carol".to_string()]);
    }

    #[test]
    fn test_remove_releases_id_for_reuse() {
        let mut registry = RoomRegistry::new();
        registry.join("r1", "alice");
        let removed = registry.remove("r1").unwrap();
        assert!(removed.contains("alice"));

        assert!(registry.get("r1").is_none());
        assert!(registry.create("r1", RoomState::Active));
        // Index cleaned: alice's disconnect later finds nothing
        assert!(registry.remove_identity("alice").is_empty());
    }

    #[test]
    fn test_remove_identity_deletes_emptied_rooms() {
        let mut registry = RoomRegistry::new();
        registry.join("r1", "alice");
        registry.join("r1", "bob");
        registry.join("r2", "alice");

        let mut departures = registry.remove_identity("alice");
        departures.sort_by(|a, b| a.room_id.cmp(&b.room_id));

        assert_eq!(departures.len(), 2);
        let d1 = departures.first().unwrap();
        assert_eq!(d1.room_id, "r1");
        assert!(!d1.room_deleted);
        assert_eq!(d1.remaining, vec!["bob".to_string()]);

        let d2 = departures.get(1).unwrap();
        assert_eq!(d2.room_id, "r2");
        assert!(d2.room_deleted);
        assert!(d2.remaining.is_empty());

        // Zero-member room is gone, partially-occupied one is not
        assert!(registry.get("r2").is_none());
        assert!(registry.get("r1").is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ringing_expired_respects_state_and_age() {
        let mut registry = RoomRegistry::new();
        registry.join("ringing-old", "alice");
        registry.create("active-old", RoomState::Active);

        tokio::time::advance(Duration::from_secs(50)).await;
        registry.join("ringing-new", "bob");

        let expired = registry.ringing_expired(Duration::from_secs(45));
        assert_eq!(expired, vec!["ringing-old".to_string()]);
    }
}
