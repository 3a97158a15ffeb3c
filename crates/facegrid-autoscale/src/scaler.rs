//! Autoscaler: backlog-driven instance scaling with a scale-down grace
//! period.
//!
//! [`Autoscaler::evaluate`] is the pure decision step; [`Autoscaler::tick`]
//! gathers its inputs from the queue and fleet and applies the decision.

use std::sync::Arc;
use std::time::Duration;

use facegrid_backend::{FleetController, QueueService};
use facegrid_core::{FacegridConfig, InstanceDescriptor, InstanceId, InstanceState};
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// A scaling decision for one tick.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScaleDecision {
    /// Start these stopped instances.
    ScaleUp(Vec<InstanceId>),
    /// Stop these active instances.
    ScaleDown(Vec<InstanceId>),
    /// Over capacity, but the grace period has not elapsed yet.
    Cooldown,
    /// No change needed (or nothing available to start).
    NoChange,
}

/// Inputs that stay fixed for the autoscaler's lifetime.
#[derive(Debug, Clone)]
pub struct AutoscalerSettings {
    pub request_queue: String,
    pub worker_prefix: String,
    pub max_instances: u32,
    pub grace_period: Duration,
}

impl AutoscalerSettings {
    pub fn from_config(config: &FacegridConfig) -> Self {
        Self {
            request_queue: config.queues.request.clone(),
            worker_prefix: config.autoscaler.worker_prefix.clone(),
            max_instances: config.autoscaler.max_instances,
            grace_period: config.autoscaler.grace_period,
        }
    }
}

/// Sizes the worker fleet against request-queue backlog.
pub struct Autoscaler {
    queue: Arc<dyn QueueService>,
    fleet: Arc<dyn FleetController>,
    settings: AutoscalerSettings,
    /// Set when the fleet first exceeded its target; cleared once the
    /// fleet is at or under target again.
    over_capacity_since: Option<Instant>,
}

impl Autoscaler {
    /// Create a new autoscaler.
    pub fn new(
        queue: Arc<dyn QueueService>,
        fleet: Arc<dyn FleetController>,
        settings: AutoscalerSettings,
    ) -> Self {
        Self {
            queue,
            fleet,
            settings,
            over_capacity_since: None,
        }
    }

    /// When the current over-capacity stretch began, if one is running.
    pub fn over_capacity_since(&self) -> Option<Instant> {
        self.over_capacity_since
    }

    /// Number of instances the fleet should have active for `backlog`.
    pub fn target(&self, backlog: usize) -> usize {
        backlog.min(self.settings.max_instances as usize)
    }

    /// Decide what to do for a backlog and fleet snapshot observed at `now`.
    pub fn evaluate(
        &mut self,
        backlog: usize,
        fleet: &[InstanceDescriptor],
        now: Instant,
    ) -> ScaleDecision {
        let active: Vec<&InstanceDescriptor> = fleet.iter().filter(|i| i.state.is_active()).collect();
        let stopped = fleet.iter().filter(|i| i.state == InstanceState::Stopped);
        let target = self.target(backlog);

        if active.len() < target {
            self.over_capacity_since = None;
            let ids: Vec<InstanceId> = stopped
                .take(target - active.len())
                .map(|i| i.id.clone())
                .collect();
            if ids.is_empty() {
                debug!(desired = target, active = active.len(), "under target, no stopped instances left");
                return ScaleDecision::NoChange;
            }
            debug!(backlog, desired = target, from = active.len(), starting = ids.len(), "scaling up");
            return ScaleDecision::ScaleUp(ids);
        }

        if active.len() > target {
            let Some(since) = self.over_capacity_since else {
                self.over_capacity_since = Some(now);
                debug!(backlog, desired = target, active = active.len(), "over capacity, grace period started");
                return ScaleDecision::Cooldown;
            };
            if now.duration_since(since) < self.settings.grace_period {
                return ScaleDecision::Cooldown;
            }
            let ids: Vec<InstanceId> = active[target..].iter().map(|i| i.id.clone()).collect();
            debug!(backlog, desired = target, from = active.len(), stopping = ids.len(), "scaling down");
            return ScaleDecision::ScaleDown(ids);
        }

        self.over_capacity_since = None;
        ScaleDecision::NoChange
    }

    /// Observe the queue and fleet, decide, and apply the decision.
    ///
    /// A failed backlog read counts as an empty queue. Start/stop failures
    /// are logged; the next tick re-evaluates from a fresh snapshot.
    pub async fn tick(&mut self) -> anyhow::Result<ScaleDecision> {
        let backlog = match self
            .queue
            .approximate_count(&self.settings.request_queue)
            .await
        {
            Ok(count) => count,
            Err(e) => {
                warn!(queue = %self.settings.request_queue, error = %e, "failed to read backlog");
                0
            }
        };

        let snapshot = self
            .fleet
            .list_instances(&self.settings.worker_prefix)
            .await?;
        let decision = self.evaluate(backlog, &snapshot, Instant::now());

        match &decision {
            ScaleDecision::ScaleUp(ids) => {
                if let Err(e) = self.fleet.start(ids).await {
                    warn!(instances = ?ids, error = %e, "failed to start instances");
                }
            }
            ScaleDecision::ScaleDown(ids) => {
                if let Err(e) = self.fleet.stop(ids).await {
                    warn!(instances = ?ids, error = %e, "failed to stop instances");
                }
            }
            ScaleDecision::Cooldown | ScaleDecision::NoChange => {}
        }

        Ok(decision)
    }

    /// Run the autoscaler loop.
    pub async fn run(
        &mut self,
        interval: Duration,
        mut shutdown: tokio::sync::watch::Receiver<bool>,
    ) {
        info!(
            interval_ms = interval.as_millis() as u64,
            max_instances = self.settings.max_instances,
            grace_period_ms = self.settings.grace_period.as_millis() as u64,
            "autoscaler started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.tick().await {
                        tracing::error!(error = %e, "autoscaler evaluation failed");
                    }
                }
                _ = shutdown.changed() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }
}
