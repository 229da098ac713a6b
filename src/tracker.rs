//! Consecutive-failure bookkeeping and alert debouncing.
//!
//! Every `(environment, key)` pair has its own counter, where the key is a
//! service name or one of the environment-wide [`FailureClass`] tags. A
//! healthy observation resets the counter to zero; an unhealthy one bumps it.
//! Outside full-state mode a pair is reported exactly once per outage, on the
//! poll where its counter first exceeds the environment's tolerance.
//!
//! Entries are created on first observation and never evicted, so a service
//! that disappears from a heartbeat keeps its last count until restart.

use std::collections::HashMap;
use tracing::{debug, info, warn};

use crate::types::{FailureClass, Health, TrackedKey};

/// What the poll should do with one observation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Inclusion {
    /// Report it. `alert` is true when the tolerance was just crossed.
    Include { count: u32, alert: bool },
    Skip { count: u32 },
}

impl Inclusion {
    pub fn is_included(&self) -> bool {
        matches!(self, Inclusion::Include { .. })
    }

    pub fn is_alert(&self) -> bool {
        matches!(self, Inclusion::Include { alert: true, .. })
    }

    pub fn count(&self) -> u32 {
        match self {
            Inclusion::Include { count, .. } | Inclusion::Skip { count } => *count,
        }
    }
}

#[derive(Debug, Default)]
pub struct FailureTracker {
    counts: HashMap<(String, TrackedKey), u32>,
}

impl FailureTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records one observation of `service` in `environment`.
    pub fn update(
        &mut self,
        environment: &str,
        service: &str,
        health: Health,
        tolerance: u32,
        full_state: bool,
    ) -> Inclusion {
        self.record(environment, TrackedKey::service(service), health, tolerance, full_state)
    }

    /// Records a login or heartbeat outcome for the whole environment.
    pub fn update_class(
        &mut self,
        environment: &str,
        class: FailureClass,
        health: Health,
        tolerance: u32,
        full_state: bool,
    ) -> Inclusion {
        self.record(environment, TrackedKey::Class(class), health, tolerance, full_state)
    }

    fn record(
        &mut self,
        environment: &str,
        key: TrackedKey,
        health: Health,
        tolerance: u32,
        full_state: bool,
    ) -> Inclusion {
        let count = self
            .counts
            .entry((environment.to_string(), key.clone()))
            .or_insert(0);

        match health {
            Health::Healthy => {
                if *count > 0 {
                    info!(environment, key = %key, failures = *count, "recovered");
                }
                *count = 0;
                if full_state {
                    Inclusion::Include { count: 0, alert: false }
                } else {
                    Inclusion::Skip { count: 0 }
                }
            }
            Health::Unhealthy => {
                *count = count.saturating_add(1);
                let crossed = *count == tolerance.saturating_add(1);
                if crossed {
                    warn!(environment, key = %key, failures = *count, tolerance, "tolerance exceeded");
                } else {
                    debug!(environment, key = %key, failures = *count, tolerance, "still failing");
                }
                if crossed || full_state {
                    Inclusion::Include { count: *count, alert: crossed }
                } else {
                    Inclusion::Skip { count: *count }
                }
            }
        }
    }

    pub fn count(&self, environment: &str, service: &str) -> u32 {
        self.lookup(environment, TrackedKey::service(service))
    }

    pub fn class_count(&self, environment: &str, class: FailureClass) -> u32 {
        self.lookup(environment, TrackedKey::Class(class))
    }

    fn lookup(&self, environment: &str, key: TrackedKey) -> u32 {
        self.counts
            .get(&(environment.to_string(), key))
            .copied()
            .unwrap_or(0)
    }

    /// Number of tracked pairs, including ones no longer observed.
    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }
}
