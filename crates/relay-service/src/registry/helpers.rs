//! Helper registry: availability records and selection order.
//!
//! Records are created on helper registration and never deleted, only marked
//! offline. Selection policy: the first `available` record in registration
//! order. That order is a stable, documented policy, not a fairness contract
//! across helpers.

use crate::events::HelperMeta;

use chrono::{DateTime, Utc};
use std::collections::HashMap;

/// Helper availability.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Availability {
    Available,
    /// In a session; not matchable.
    Busy,
    Offline,
}

/// One helper's record.
#[derive(Debug, Clone)]
pub struct HelperRecord {
    pub identity: String,
    pub availability: Availability,
    pub skills: Vec<String>,
    pub display_name: Option<String>,
    pub registered_at: DateTime<Utc>,
}

impl HelperRecord {
    fn to_meta(&self) -> HelperMeta {
        HelperMeta {
            identity: self.identity.clone(),
            display_name: self.display_name.clone(),
            skills: self.skills.clone(),
        }
    }
}

/// Registry of helper records, preserving registration order.
#[derive(Debug, Default)]
pub struct HelperRegistry {
    records: HashMap<String, HelperRecord>,
    /// Registration order for the selection scan.
    order: Vec<String>,
}

impl HelperRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create or refresh a record and mark it available.
    ///
    /// An existing record keeps its registration-order slot. Empty `skills`
    /// leaves a prior skill set untouched.
    pub fn upsert_available(
        &mut self,
        identity: &str,
        skills: Vec<String>,
        display_name: Option<String>,
    ) {
        match self.records.get_mut(identity) {
            Some(record) => {
                record.availability = Availability::Available;
                if !skills.is_empty() {
                    record.skills = skills;
                }
                if display_name.is_some() {
                    record.display_name = display_name;
                }
            }
            None => {
                self.order.push(identity.to_string());
                self.records.insert(
                    identity.to_string(),
                    HelperRecord {
                        identity: identity.to_string(),
                        availability: Availability::Available,
                        skills,
                        display_name,
                        registered_at: Utc::now(),
                    },
                );
            }
        }
    }

    /// Claim the first available helper in registration order, flipping it to
    /// busy in the same step. The caller holds `&mut self`, so the
    /// find-and-flip is one atomic operation: no two seekers can claim the
    /// same helper.
    pub fn claim_available(&mut self) -> Option<HelperMeta> {
        let identity = self.order.iter().find(|id| {
            self.records
                .get(id.as_str())
                .is_some_and(|r| r.availability == Availability::Available)
        })?;
        let record = self.records.get_mut(identity.as_str())?;
        record.availability = Availability::Busy;
        Some(record.to_meta())
    }

    /// Claim a specific helper if (and only if) it is currently available.
    pub fn claim_specific(&mut self, identity: &str) -> Option<HelperMeta> {
        let record = self.records.get_mut(identity)?;
        if record.availability != Availability::Available {
            return None;
        }
        record.availability = Availability::Busy;
        Some(record.to_meta())
    }

    /// Release a busy helper back to the available pool.
    ///
    /// No-op for offline helpers: one that dropped mid-session must
    /// explicitly re-register before it can be matched again.
    pub fn release(&mut self, identity: &str) -> bool {
        match self.records.get_mut(identity) {
            Some(record) if record.availability == Availability::Busy => {
                record.availability = Availability::Available;
                true
            }
            _ => false,
        }
    }

    /// Mark a helper offline (disconnect or explicit unavailability).
    pub fn mark_offline(&mut self, identity: &str) {
        if let Some(record) = self.records.get_mut(identity) {
            record.availability = Availability::Offline;
        }
    }

    #[must_use]
    pub fn get(&self, identity: &str) -> Option<&HelperRecord> {
        self.records.get(identity)
    }

    /// Number of currently available helpers.
    #[must_use]
    pub fn available_count(&self) -> usize {
        self.records
            .values()
            .filter(|r| r.availability == Availability::Available)
            .count()
    }
}
