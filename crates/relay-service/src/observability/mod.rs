//! Observability for the relay service.
//!
//! Health endpoints live here; counter and gauge structs live next to the
//! gateway in [`crate::actors::metrics`]. The `/metrics` endpoint is served
//! separately by `metrics-exporter-prometheus`.
//!
//! Metric labels are bounded: every relay metric is label-free, so there is
//! no cardinality risk from identities or room ids.

pub mod health;

pub use health::{health_router, HealthState};
