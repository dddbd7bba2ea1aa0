//! Relay Service Library
//!
//! This library provides the core functionality for the Lifeline relay - a
//! stateful WebSocket signaling server responsible for:
//!
//! - Real-time presence tracking for registered identities
//! - Anonymous FIFO matchmaking between seekers and available helpers
//! - Targeted invites to named helpers with at-most-once resolution
//! - WebRTC call signaling relay (offer/answer/ICE fan-out within rooms)
//! - Session lifecycle notices for external persistence
//!
//! # Architecture
//!
//! A single `GatewayActor` per relay instance owns all mutable state:
//!
//! ```text
//! GatewayActor (singleton per relay instance)
//! ├── ConnectionRegistry (identity -> live socket handle)
//! ├── HelperRegistry (availability pool, registration order)
//! ├── Matchmaker (FIFO waiting queue)
//! ├── RoomRegistry (signaling rooms)
//! └── InviteTable (in-flight targeted invites)
//! ```
//!
//! # Key Design Decisions
//!
//! - **Single owner**: all read-decide-write sequences run inside the
//!   gateway's message loop, so no two requests can interleave
//! - **Newest registration wins**: re-registering an identity supersedes the
//!   old socket without disturbing the new one
//! - **Non-blocking delivery**: slow consumers drop events, never stall the
//!   relay
//! - **No payload inspection**: WebRTC offers, answers, and candidates are
//!   relayed verbatim
//!
//! # Modules
//!
//! - [`actors`] - Gateway actor, mailbox messages, metrics
//! - [`config`] - Service configuration from environment
//! - [`errors`] - Error types with client-safe codes
//! - [`events`] - Wire-level event vocabulary
//! - [`invites`] - Targeted invite state machine
//! - [`matchmaking`] - FIFO waiting queue
//! - [`observability`] - Health endpoints
//! - [`registry`] - Connection, helper, and room registries
//! - [`ws`] - WebSocket transport

pub mod actors;
pub mod config;
pub mod errors;
pub mod events;
pub mod invites;
pub mod matchmaking;
pub mod observability;
pub mod registry;
pub mod ws;
