//! LocalFleet: a fleet controller whose instances are in-process workers.
//!
//! Starting an instance spawns a [`Worker`] loop on the tokio runtime;
//! stopping it signals the loop to exit after its current job. In-process
//! instances boot immediately, so a started instance reports `Running`
//! straight away and never lingers in `Pending`.

use std::sync::Arc;

use facegrid_backend::{BackendError, BackendFuture, BackendResult, FleetController};
use facegrid_core::{InstanceDescriptor, InstanceId, InstanceState};
use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::worker::Worker;

/// Builds the worker for a given instance id.
pub type WorkerFactory = Arc<dyn Fn(&str) -> Worker + Send + Sync>;

struct RunningWorker {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

struct Slot {
    id: InstanceId,
    state: InstanceState,
    worker: Option<RunningWorker>,
}

/// In-process worker fleet.
pub struct LocalFleet {
    slots: Mutex<Vec<Slot>>,
    /// Stopped workers still finishing their current job.
    draining: Mutex<Vec<JoinHandle<()>>>,
    factory: WorkerFactory,
}

impl LocalFleet {
    /// A fleet of `size` stopped instances named `{prefix}{n}`, n from 1.
    pub fn new(prefix: &str, size: u32, factory: WorkerFactory) -> Self {
        let slots = (1..=size)
            .map(|n| Slot {
                id: format!("{prefix}{n}"),
                state: InstanceState::Stopped,
                worker: None,
            })
            .collect();
        Self {
            slots: Mutex::new(slots),
            draining: Mutex::new(Vec::new()),
            factory,
        }
    }

    /// Number of instances with a live worker loop.
    pub async fn running_count(&self) -> usize {
        let mut slots = self.slots.lock().await;
        reap(&mut slots);
        slots.iter().filter(|s| s.state.is_active()).count()
    }

    /// Stop every worker and wait for all of them to exit.
    pub async fn shutdown(&self) {
        let mut handles = Vec::new();
        {
            let mut slots = self.slots.lock().await;
            for slot in slots.iter_mut() {
                if let Some(worker) = slot.worker.take() {
                    let _ = worker.shutdown.send(true);
                    handles.push(worker.handle);
                }
                slot.state = InstanceState::Stopped;
            }
        }
        handles.append(&mut *self.draining.lock().await);
        let count = handles.len();
        for handle in handles {
            let _ = handle.await;
        }
        info!(workers = count, "local fleet shut down");
    }
}

/// Mark instances whose loop has exited on its own as stopped.
fn reap(slots: &mut [Slot]) {
    for slot in slots.iter_mut() {
        if slot.worker.as_ref().is_some_and(|w| w.handle.is_finished()) {
            slot.worker = None;
            slot.state = InstanceState::Stopped;
            debug!(instance = %slot.id, "worker exited");
        }
    }
}

fn check_ids(slots: &[Slot], ids: &[InstanceId]) -> BackendResult<()> {
    match ids.iter().find(|id| !slots.iter().any(|s| &s.id == *id)) {
        Some(missing) => Err(BackendError::InstanceNotFound(missing.clone())),
        None => Ok(()),
    }
}

impl FleetController for LocalFleet {
    fn list_instances<'a>(&'a self, prefix: &'a str) -> BackendFuture<'a, Vec<InstanceDescriptor>> {
        Box::pin(async move {
            let mut slots = self.slots.lock().await;
            reap(&mut slots);
            Ok(slots
                .iter()
                .filter(|s| s.id.starts_with(prefix))
                .map(|s| InstanceDescriptor::new(s.id.clone(), s.state))
                .collect())
        })
    }

    fn start<'a>(&'a self, ids: &'a [InstanceId]) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut slots = self.slots.lock().await;
            reap(&mut slots);
            check_ids(&slots, ids)?;
            for slot in slots.iter_mut().filter(|s| ids.contains(&s.id)) {
                if slot.state.is_active() {
                    continue;
                }
                let worker = (self.factory)(&slot.id);
                let (shutdown, rx) = watch::channel(false);
                let handle = tokio::spawn(async move { worker.run(rx).await });
                slot.worker = Some(RunningWorker { handle, shutdown });
                slot.state = InstanceState::Running;
                info!(instance = %slot.id, "worker instance started");
            }
            Ok(())
        })
    }

    fn stop<'a>(&'a self, ids: &'a [InstanceId]) -> BackendFuture<'a, ()> {
        Box::pin(async move {
            let mut slots = self.slots.lock().await;
            check_ids(&slots, ids)?;
            let mut draining = self.draining.lock().await;
            draining.retain(|h| !h.is_finished());
            for slot in slots.iter_mut().filter(|s| ids.contains(&s.id)) {
                if let Some(worker) = slot.worker.take() {
                    let _ = worker.shutdown.send(true);
                    draining.push(worker.handle);
                    info!(instance = %slot.id, "worker instance stopping");
                }
                slot.state = InstanceState::Stopped;
            }
            Ok(())
        })
    }
}
