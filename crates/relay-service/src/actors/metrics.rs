//! Gateway metrics and mailbox monitoring.
//!
//! In-process counters are plain atomics shared between the actor and the
//! health surface. The periodic sweep also publishes the headline numbers as
//! Prometheus gauges (`relay_` prefix) via the `metrics` facade.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use super::messages::GatewayStats;

/// Mailbox depth above which the gateway logs elevated pressure.
pub const MAILBOX_NORMAL: usize = 200;

/// Mailbox depth above which the gateway logs critical pressure.
pub const MAILBOX_WARNING: usize = 1000;

/// Mailbox depth monitor for the gateway actor.
#[derive(Debug)]
pub struct MailboxMonitor {
    actor_id: String,
    depth: AtomicUsize,
    peak_depth: AtomicUsize,
    messages_processed: AtomicU64,
}

impl MailboxMonitor {
    #[must_use]
    pub fn new(actor_id: impl Into<String>) -> Self {
        Self {
            actor_id: actor_id.into(),
            depth: AtomicUsize::new(0),
            peak_depth: AtomicUsize::new(0),
            messages_processed: AtomicU64::new(0),
        }
    }

    /// Record a message being added to the mailbox.
    pub fn record_enqueue(&self) {
        let new_depth = self.depth.fetch_add(1, Ordering::Relaxed) + 1;

        let mut current_peak = self.peak_depth.load(Ordering::Relaxed);
        while new_depth > current_peak {
            match self.peak_depth.compare_exchange_weak(
                current_peak,
                new_depth,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => break,
                Err(actual) => current_peak = actual,
            }
        }

        if new_depth > MAILBOX_WARNING {
            warn!(
                target: "relay.gateway.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                threshold = MAILBOX_WARNING,
                "Mailbox depth critical"
            );
        } else if new_depth == MAILBOX_NORMAL + 1 {
            // Log once when crossing the elevated threshold
            debug!(
                target: "relay.gateway.mailbox",
                actor_id = %self.actor_id,
                depth = new_depth,
                "Mailbox depth elevated"
            );
        }
    }

    /// Record a message being removed from the mailbox (processed).
    pub fn record_dequeue(&self) {
        self.depth.fetch_sub(1, Ordering::Relaxed);
        self.messages_processed.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn current_depth(&self) -> usize {
        self.depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn peak_depth(&self) -> usize {
        self.peak_depth.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn messages_processed(&self) -> u64 {
        self.messages_processed.load(Ordering::Relaxed)
    }
}

/// Aggregated relay counters, shared with the health surface.
#[derive(Debug, Default)]
pub struct RelayMetrics {
    /// Live registered connections.
    pub active_connections: AtomicUsize,
    /// Live signaling rooms.
    pub active_rooms: AtomicUsize,
    /// Sessions established (matchmaking + invite paths).
    pub sessions_started: AtomicU64,
    /// Outbound events dropped on full client channels.
    pub events_dropped: AtomicU64,
}

impl RelayMetrics {
    /// Create a new shared metrics instance.
    #[must_use]
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn connection_registered(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_removed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn room_created(&self) {
        self.active_rooms.fetch_add(1, Ordering::Relaxed);
    }

    pub fn room_removed(&self) {
        self.active_rooms.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn session_started(&self) {
        self.sessions_started.fetch_add(1, Ordering::Relaxed);
    }

    pub fn event_dropped(&self) {
        self.events_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn connection_count(&self) -> usize {
        self.active_connections.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn room_count(&self) -> usize {
        self.active_rooms.load(Ordering::Relaxed)
    }

    /// Publish headline gauges to the installed metrics recorder.
    #[allow(clippy::cast_precision_loss)]
    pub fn publish(&self, stats: &GatewayStats) {
        metrics::gauge!("relay_connections").set(stats.connections as f64);
        metrics::gauge!("relay_rooms").set(stats.rooms as f64);
        metrics::gauge!("relay_waiting_seekers").set(stats.waiting as f64);
        metrics::gauge!("relay_helpers_available").set(stats.helpers_available as f64);
        metrics::gauge!("relay_invites_inflight").set(stats.invites as f64);
    }
}
