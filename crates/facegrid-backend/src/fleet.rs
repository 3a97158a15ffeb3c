//! Fleet controller seam and the bookkeeping-only `MemoryFleet`.
//!
//! Worker-role instances are found by a name prefix. Starting a stopped
//! instance moves it to `Pending`; the provider later reports it as
//! `Running`. Stopping moves any instance straight to `Stopped`.

use std::sync::atomic::{AtomicBool, Ordering};

use facegrid_core::{InstanceDescriptor, InstanceId, InstanceState};
use tokio::sync::RwLock;
use tracing::debug;

use crate::BackendFuture;
use crate::error::{BackendError, BackendResult};

/// Start/stop primitives over a set of compute instances.
pub trait FleetController: Send + Sync {
    /// Snapshot of every instance whose name starts with `prefix`, in a
    /// stable order.
    fn list_instances<'a>(&'a self, prefix: &'a str) -> BackendFuture<'a, Vec<InstanceDescriptor>>;

    /// Start the given instances.
    fn start<'a>(&'a self, ids: &'a [InstanceId]) -> BackendFuture<'a, ()>;

    /// Stop the given instances.
    fn stop<'a>(&'a self, ids: &'a [InstanceId]) -> BackendFuture<'a, ()>;
}

/// In-process fleet that only tracks instance states.
pub struct MemoryFleet {
    instances: RwLock<Vec<InstanceDescriptor>>,
    available: AtomicBool,
}

impl MemoryFleet {
    /// A fleet of `size` stopped instances named `{prefix}{n}`, n from 1.
    pub fn new(prefix: &str, size: u32) -> Self {
        let instances = (1..=size)
            .map(|n| InstanceDescriptor::new(format!("{prefix}{n}"), InstanceState::Stopped))
            .collect();
        Self::from_instances(instances)
    }

    pub fn from_instances(instances: Vec<InstanceDescriptor>) -> Self {
        Self {
            instances: RwLock::new(instances),
            available: AtomicBool::new(true),
        }
    }

    /// Simulate an outage: while unavailable every operation fails.
    pub fn set_available(&self, available: bool) {
        self.available.store(available, Ordering::Relaxed);
    }

    /// Promote every pending instance to running, as the provider would
    /// once boot completes. Returns how many were promoted.
    pub async fn settle(&self) -> usize {
        let mut instances = self.instances.write().await;
        let mut promoted = 0;
        for inst in instances.iter_mut() {
            if inst.state == InstanceState::Pending {
                inst.state = InstanceState::Running;
                promoted += 1;
            }
        }
        promoted
    }

    /// Current state of one instance.
    pub async fn state_of(&self, id: &str) -> Option<InstanceState> {
        let instances = self.instances.read().await;
        instances.iter().find(|i| i.id == id).map(|i| i.state)
    }

    /// Number of pending or running instances.
    pub async fn active_count(&self) -> usize {
        let instances = self.instances.read().await;
        instances.iter().filter(|i| i.state.is_active()).count()
    }

    fn check_available(&self) -> BackendResult<()> {
        if self.available.load(Ordering::Relaxed) {
            Ok(())
        } else {
            Err(BackendError::Unavailable("fleet controller".to_string()))
        }
    }

    async fn transition(&self, ids: &[InstanceId], to: InstanceState) -> BackendResult<()> {
        self.check_available()?;
        let mut instances = self.instances.write().await;
        // Validate the whole batch before touching any instance.
        if let Some(missing) = ids.iter().find(|id| !instances.iter().any(|i| &i.id == *id)) {
            return Err(BackendError::InstanceNotFound(missing.clone()));
        }
        for inst in instances.iter_mut().filter(|i| ids.contains(&i.id)) {
            let next = match (inst.state, to) {
                // Starting an already active instance is a no-op.
                (InstanceState::Pending | InstanceState::Running, InstanceState::Pending) => inst.state,
                (_, next) => next,
            };
            debug!(instance = %inst.id, from = %inst.state, to = %next, "instance transition");
            inst.state = next;
        }
        Ok(())
    }
}

impl FleetController for MemoryFleet {
    fn list_instances<'a>(&'a self, prefix: &'a str) -> BackendFuture<'a, Vec<InstanceDescriptor>> {
        Box::pin(async move {
            self.check_available()?;
            let instances = self.instances.read().await;
            Ok(instances
                .iter()
                .filter(|i| i.id.starts_with(prefix))
                .cloned()
                .collect())
        })
    }

    fn start<'a>(&'a self, ids: &'a [InstanceId]) -> BackendFuture<'a, ()> {
        Box::pin(self.transition(ids, InstanceState::Pending))
    }

    fn stop<'a>(&'a self, ids: &'a [InstanceId]) -> BackendFuture<'a, ()> {
        Box::pin(self.transition(ids, InstanceState::Stopped))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn new_fleet_is_all_stopped() {
        let fleet = MemoryFleet::new("app-tier-instance-", 3);
        let snapshot = fleet.list_instances("app-tier-instance-").await.unwrap();
        assert_eq!(snapshot.len(), 3);
        assert!(snapshot.iter().all(|i| i.state == InstanceState::Stopped));
        assert_eq!(snapshot[0].id, "app-tier-instance-1");
    }

    #[tokio::test]
    async fn prefix_filters_other_roles() {
        let fleet = MemoryFleet::from_instances(vec![
            InstanceDescriptor::new("app-tier-instance-1", InstanceState::Stopped),
            InstanceDescriptor::new("web-tier", InstanceState::Running),
        ]);
        let snapshot = fleet.list_instances("app-tier-instance-").await.unwrap();
        assert_eq!(snapshot.len(), 1);
    }

    #[tokio::test]
    async fn start_goes_pending_then_settles_running() {
        let fleet = MemoryFleet::new("w-", 2);
        fleet.start(&["w-1".to_string()]).await.unwrap();
        assert_eq!(fleet.state_of("w-1").await, Some(InstanceState::Pending));
        assert_eq!(fleet.settle().await, 1);
        assert_eq!(fleet.state_of("w-1").await, Some(InstanceState::Running));

        // Starting a running instance leaves it running.
        fleet.start(&["w-1".to_string()]).await.unwrap();
        assert_eq!(fleet.state_of("w-1").await, Some(InstanceState::Running));

        fleet.stop(&["w-1".to_string()]).await.unwrap();
        assert_eq!(fleet.state_of("w-1").await, Some(InstanceState::Stopped));
    }

    #[tokio::test]
    async fn unknown_instance_rejects_whole_batch() {
        let fleet = MemoryFleet::new("w-", 1);
        let err = fleet
            .start(&["w-1".to_string(), "w-9".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::InstanceNotFound(id) if id == "w-9"));
        assert_eq!(fleet.state_of("w-1").await, Some(InstanceState::Stopped));
    }
}
