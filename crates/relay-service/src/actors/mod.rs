//! Actor model for the relay core.
//!
//! A single `GatewayActor` owns all mutable relay state:
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
//! - **Single owner**: every read-decide-write runs inside the gateway's
//!   message loop, so matchmaking claims and invite resolution cannot
//!   interleave and need no locks
//! - **Non-blocking delivery**: outbound events use `try_send`; a slow
//!   socket drops events rather than stalling the loop
//! - **CancellationToken propagation**: socket tasks run on child tokens of
//!   the gateway's root token for graceful shutdown
//! - **Mailbox monitoring**: depth thresholds with metrics
//!
//! # Modules
//!
//! - [`gateway`] - `GatewayActor` and its handle
//! - [`messages`] - Message types for the gateway mailbox
//! - [`metrics`] - Mailbox monitoring and relay metrics

pub mod gateway;
pub mod messages;
pub mod metrics;

// Re-export primary types
pub use gateway::{GatewayActor, GatewayConfig, GatewayHandle};
pub use messages::{GatewayMessage, GatewayStats, PresenceSnapshot};
pub use metrics::{MailboxMonitor, RelayMetrics};
