//! Duplicate suppression and the periodic full-state trigger.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::debug;

use crate::types::{FailureClass, Health, TrackedKey};

/// Everything observed in one cycle, compared without regard to order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateSignature {
    entries: HashMap<(String, TrackedKey), Health>,
}

impl StateSignature {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record(&mut self, environment: &str, service: &str, health: Health) {
        self.entries
            .insert((environment.to_string(), TrackedKey::service(service)), health);
    }

    /// An environment that could not be checked enters under its failure class.
    pub fn record_class(&mut self, environment: &str, class: FailureClass) {
        self.entries
            .insert((environment.to_string(), TrackedKey::Class(class)), Health::Unhealthy);
    }

    pub fn get(&self, environment: &str, service: &str) -> Option<Health> {
        self.entries
            .get(&(environment.to_string(), TrackedKey::service(service)))
            .copied()
    }

    pub fn get_class(&self, environment: &str, class: FailureClass) -> Option<Health> {
        self.entries
            .get(&(environment.to_string(), TrackedKey::Class(class)))
            .copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Holds the signature of the last payload that was actually delivered.
#[derive(Debug, Default)]
pub struct DiffGate {
    last_dispatched: Option<StateSignature>,
}

impl DiffGate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn should_dispatch(&self, candidate: &StateSignature, full_state: bool) -> bool {
        if full_state {
            return true;
        }
        let changed = self.last_dispatched.as_ref() != Some(candidate);
        if !changed {
            debug!(entries = candidate.len(), "state unchanged since last dispatch");
        }
        changed
    }

    /// Replaces the stored snapshot wholesale.
    pub fn record_dispatch(&mut self, signature: StateSignature) {
        self.last_dispatched = Some(signature);
    }

    pub fn last_dispatched(&self) -> Option<&StateSignature> {
        self.last_dispatched.as_ref()
    }
}

/// Process-wide "report everything" switch, set by a timer and cleared by the
/// cycle that observed it.
#[derive(Debug, Clone, Default)]
pub struct FullStateFlag(Arc<AtomicBool>);

impl FullStateFlag {
    pub fn new(initial: bool) -> Self {
        Self(Arc::new(AtomicBool::new(initial)))
    }

    pub fn trigger(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn observe(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    pub fn consume(&self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
