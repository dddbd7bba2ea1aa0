//! In-memory registries owned by the gateway actor.
//!
//! All three registries are plain synchronous structures. They are never
//! shared: the gateway actor owns them exclusively, so every
//! read-decide-write sequence is serialized by construction.
//!
//! # Modules
//!
//! - [`connections`] - identity ↔ live connection mapping with presence metadata
//! - [`helpers`] - helper availability records and selection order
//! - [`rooms`] - signaling room membership and call state

pub mod connections;
pub mod helpers;
pub mod rooms;

pub use connections::{ConnectionEntry, ConnectionHandle, ConnectionId, ConnectionRegistry};
pub use helpers::{Availability, HelperRecord, HelperRegistry};
pub use rooms::{Room, RoomDeparture, RoomRegistry, RoomState};
