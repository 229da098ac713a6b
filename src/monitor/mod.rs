use tracing::{debug, error, info, warn};

use crate::client::EnvironmentApi;
use crate::gate::{DiffGate, FullStateFlag, StateSignature};
use crate::health::classify;
use crate::normalize::flatten_with_skip;
use crate::slack::{build_slack_payload, failure_chunk, service_chunk, EnvironmentChunks, Notifier};
use crate::tracker::FailureTracker;
use crate::types::{Environment, FailureClass, Health};

/// What happened to the composed report at the end of a cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchOutcome {
    #[default]
    NothingToSend,
    /// Only undelivered chunks were left and the state is back to what was
    /// last delivered, so they were dropped.
    Suppressed,
    Sent,
    /// Delivery failed; the chunks are kept and retried while the state still
    /// differs from the last delivered report.
    Failed,
}

/// Summary of one poll cycle, mostly for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleOutcome {
    pub full_state: bool,
    pub environments_polled: usize,
    pub environments_unreachable: usize,
    pub services_checked: usize,
    pub chunks: usize,
    pub alerts: usize,
    /// Chunks carried over from an earlier failed dispatch.
    pub redelivered: usize,
    pub dispatch: DispatchOutcome,
}

/// Per-environment result of a poll.
struct EnvironmentPoll {
    chunks: EnvironmentChunks,
    services: usize,
    alerts: usize,
    unreachable: bool,
}

/// Owns all cross-cycle state: failure counters, the last dispatched
/// signature, chunks whose delivery failed and a handle on the full-state flag.
pub struct Monitor {
    environments: Vec<Environment>,
    tracker: FailureTracker,
    gate: DiffGate,
    full_state: FullStateFlag,
    pending: Vec<EnvironmentChunks>,
}

impl Monitor {
    pub fn new(environments: Vec<Environment>, full_state: FullStateFlag) -> Self {
        Self {
            environments,
            tracker: FailureTracker::new(),
            gate: DiffGate::new(),
            full_state,
            pending: Vec::new(),
        }
    }

    pub fn environments(&self) -> &[Environment] {
        &self.environments
    }

    pub fn tracker(&self) -> &FailureTracker {
        &self.tracker
    }

    pub fn gate(&self) -> &DiffGate {
        &self.gate
    }

    /// Chunks from a failed dispatch still waiting for delivery.
    pub fn pending(&self) -> &[EnvironmentChunks] {
        &self.pending
    }

    /// Polls every environment once and dispatches the resulting report if
    /// it carries new information. Never fails: problems in one environment
    /// or in delivery are logged and folded into the outcome.
    pub async fn run_cycle<A, N>(&mut self, api: &A, notifier: &N) -> CycleOutcome
    where
        A: EnvironmentApi,
        N: Notifier,
    {
        let full_state = self.full_state.observe();
        let mut outcome = CycleOutcome {
            full_state,
            ..Default::default()
        };
        let mut signature = StateSignature::new();
        let mut sections = Vec::with_capacity(self.environments.len());

        for env in &self.environments {
            let poll = poll_environment(&mut self.tracker, &mut signature, api, env, full_state).await;
            outcome.environments_polled += 1;
            outcome.environments_unreachable += usize::from(poll.unreachable);
            outcome.services_checked += poll.services;
            outcome.chunks += poll.chunks.chunks.len();
            outcome.alerts += poll.alerts;
            sections.push(poll.chunks);
        }

        let pending = std::mem::take(&mut self.pending);
        outcome.redelivered = merge_pending(&mut sections, pending);

        outcome.dispatch = match build_slack_payload(&sections, full_state) {
            None => DispatchOutcome::NothingToSend,
            Some(payload) => {
                // Threshold crossings are new events and always go out.
                if outcome.alerts > 0 || self.gate.should_dispatch(&signature, full_state) {
                    match notifier.send(&payload).await {
                        Ok(()) => {
                            self.gate.record_dispatch(signature);
                            DispatchOutcome::Sent
                        }
                        Err(e) => {
                            error!(error = %e, "failed to dispatch heartbeat report");
                            self.pending = sections.into_iter().filter(|s| !s.is_empty()).collect();
                            DispatchOutcome::Failed
                        }
                    }
                } else {
                    debug!(dropped = outcome.redelivered, "state matches last delivered report");
                    DispatchOutcome::Suppressed
                }
            }
        };

        if full_state {
            self.full_state.consume();
        }

        info!(
            full_state,
            environments = outcome.environments_polled,
            unreachable = outcome.environments_unreachable,
            services = outcome.services_checked,
            chunks = outcome.chunks,
            alerts = outcome.alerts,
            redelivered = outcome.redelivered,
            dispatch = ?outcome.dispatch,
            "poll cycle finished"
        );
        outcome
    }
}

async fn poll_environment<A: EnvironmentApi>(
    tracker: &mut FailureTracker,
    signature: &mut StateSignature,
    api: &A,
    env: &Environment,
    full_state: bool,
) -> EnvironmentPoll {
    let tolerance = env.tolerance();
    let mut poll = EnvironmentPoll {
        chunks: EnvironmentChunks::new(env.id.clone()),
        services: 0,
        alerts: 0,
        unreachable: false,
    };

    let token = match api.login(env).await {
        Ok(token) => {
            // Successes only reset the counter; a reachable environment is
            // reported through its services, even in full-state mode.
            tracker.update_class(&env.id, FailureClass::LoginError, Health::Healthy, tolerance, full_state);
            token
        }
        Err(err) => {
            warn!(environment = %env.id, error = %err, "login failed");
            record_unreachable(tracker, signature, &mut poll, env, FailureClass::LoginError, &err.message, err.status, full_state);
            return poll;
        }
    };

    let tree = match api.fetch_heartbeat(env, &token).await {
        Ok(tree) => {
            // Same as login: no chunk for a successful fetch.
            tracker.update_class(&env.id, FailureClass::HeartbeatError, Health::Healthy, tolerance, full_state);
            tree
        }
        Err(err) => {
            warn!(environment = %env.id, error = %err, "heartbeat fetch failed");
            record_unreachable(tracker, signature, &mut poll, env, FailureClass::HeartbeatError, &err.message, err.status, full_state);
            return poll;
        }
    };

    let services = flatten_with_skip(&tree, &env.skip);
    debug!(environment = %env.id, services = services.len(), "heartbeat received");
    for (name, leaf) in services.iter() {
        let health = classify(leaf);
        signature.record(&env.id, name, health);
        let decision = tracker.update(&env.id, name, health, tolerance, full_state);
        if decision.is_included() {
            poll.chunks.push(service_chunk(name, leaf, health));
        }
        poll.alerts += usize::from(decision.is_alert());
    }
    poll.services = services.len();
    poll
}

#[allow(clippy::too_many_arguments)]
fn record_unreachable(
    tracker: &mut FailureTracker,
    signature: &mut StateSignature,
    poll: &mut EnvironmentPoll,
    env: &Environment,
    class: FailureClass,
    message: &str,
    status: Option<u16>,
    full_state: bool,
) {
    poll.unreachable = true;
    signature.record_class(&env.id, class);
    let decision = tracker.update_class(&env.id, class, Health::Unhealthy, env.tolerance(), full_state);
    if decision.is_included() {
        poll.chunks.push(failure_chunk(class, decision.count(), message, status));
    }
    poll.alerts += usize::from(decision.is_alert());
}

/// Puts undelivered chunks ahead of this cycle's chunks for the same
/// environment. Returns how many were carried over.
fn merge_pending(sections: &mut Vec<EnvironmentChunks>, pending: Vec<EnvironmentChunks>) -> usize {
    let mut carried = 0;
    for old in pending {
        carried += old.chunks.len();
        match sections.iter_mut().find(|s| s.environment == old.environment) {
            Some(section) => {
                let mut chunks = old.chunks;
                chunks.retain(|c| !section.chunks.contains(c));
                chunks.append(&mut section.chunks);
                section.chunks = chunks;
            }
            None => sections.push(old),
        }
    }
    carried
}
