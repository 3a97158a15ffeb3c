//! Standalone mode: every facegrid role in one process.
//!
//! The daemon:
//! 1. Opens the object store (redb file, or memory when no path is set)
//! 2. Creates the request, response and dead-letter queues in memory
//! 3. Provisions a local fleet of stopped worker instances
//! 4. Runs the correlator, result sweeper and autoscaler in the background
//! 5. Serves the gateway over HTTP until the shutdown signal

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use facegrid_autoscale::{Autoscaler, AutoscalerSettings};
use facegrid_backend::{MemoryObjectStore, MemoryQueue, ObjectStore, RedbObjectStore};
use facegrid_core::FacegridConfig;
use facegrid_gateway::{Correlator, CorrelatorSettings, Gateway, GatewaySettings};
use facegrid_worker::{Classifier, LocalFleet, Worker, WorkerFactory, WorkerSettings};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::info;

/// The assembled single-process deployment.
pub struct Standalone {
    pub config: FacegridConfig,
    pub queue: Arc<MemoryQueue>,
    pub store: Arc<dyn ObjectStore>,
    pub fleet: Arc<LocalFleet>,
    pub gateway: Arc<Gateway>,
}

impl Standalone {
    /// Wire up backends, fleet and gateway. Nothing runs until
    /// [`Standalone::spawn_background`] or [`Standalone::serve`].
    pub fn new(config: FacegridConfig, classifier: Arc<dyn Classifier>) -> anyhow::Result<Self> {
        // ── Queues ─────────────────────────────────────────────────
        let mut queue_names = vec![config.queues.request.as_str(), config.queues.response.as_str()];
        if let Some(dlq) = &config.queues.dead_letter {
            queue_names.push(dlq.as_str());
        }
        let queue = Arc::new(
            MemoryQueue::new(&queue_names).with_visibility_timeout(config.queues.visibility_timeout),
        );

        // ── Object store ───────────────────────────────────────────
        let buckets = [
            config.storage.input_bucket.as_str(),
            config.storage.output_bucket.as_str(),
        ];
        let store: Arc<dyn ObjectStore> = match &config.storage.path {
            Some(path) => {
                if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
                    std::fs::create_dir_all(parent)
                        .with_context(|| format!("create {}", parent.display()))?;
                }
                let store = RedbObjectStore::open(path, &buckets)
                    .with_context(|| format!("open object store {}", path.display()))?;
                info!(path = ?path, "object store opened");
                Arc::new(store)
            }
            None => {
                info!("object store in memory");
                Arc::new(MemoryObjectStore::new(&buckets))
            }
        };

        // ── Worker fleet ───────────────────────────────────────────
        let worker_settings = WorkerSettings::from_config(&config);
        let factory: WorkerFactory = {
            let queue = queue.clone();
            let store = store.clone();
            Arc::new(move |id: &str| {
                Worker::new(
                    id,
                    queue.clone(),
                    store.clone(),
                    classifier.clone(),
                    worker_settings.clone(),
                )
            })
        };
        let fleet = Arc::new(LocalFleet::new(
            &config.autoscaler.worker_prefix,
            config.autoscaler.fleet_size,
            factory,
        ));
        info!(size = config.autoscaler.fleet_size, "worker fleet provisioned");

        // ── Gateway ────────────────────────────────────────────────
        let gateway = Arc::new(Gateway::new(
            queue.clone(),
            store.clone(),
            GatewaySettings::from_config(&config),
        ));

        Ok(Self {
            config,
            queue,
            store,
            fleet,
            gateway,
        })
    }

    pub fn router(&self) -> axum::Router {
        facegrid_gateway::build_router(self.gateway.clone())
    }

    /// Start the correlator, result sweeper and autoscaler loops.
    pub fn spawn_background(&self, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let correlator = Correlator::new(
            self.queue.clone(),
            self.gateway.pending().clone(),
            CorrelatorSettings::from_config(&self.config),
        );
        let correlator_shutdown = shutdown.clone();
        let correlator_handle = tokio::spawn(async move {
            correlator.run(correlator_shutdown).await;
        });

        let pending = self.gateway.pending().clone();
        let ttl = self.config.gateway.result_ttl;
        let sweep_interval = self.config.gateway.sweep_interval;
        let sweeper_shutdown = shutdown.clone();
        let sweeper_handle = tokio::spawn(async move {
            pending.run_sweeper(ttl, sweep_interval, sweeper_shutdown).await;
        });

        let mut autoscaler = Autoscaler::new(
            self.queue.clone(),
            self.fleet.clone(),
            AutoscalerSettings::from_config(&self.config),
        );
        let tick = self.config.autoscaler.tick_interval;
        let autoscale_handle = tokio::spawn(async move {
            autoscaler.run(tick, shutdown).await;
        });

        vec![correlator_handle, sweeper_handle, autoscale_handle]
    }

    /// Serve the gateway on `listener` until `signal` resolves.
    ///
    /// In-flight requests are drained first; the correlator, autoscaler and
    /// workers keep running until the last one is answered. Only then are
    /// the background loops stopped and the worker fleet drained.
    pub async fn serve<F>(self, listener: TcpListener, signal: F) -> anyhow::Result<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = self.spawn_background(shutdown_rx);

        let addr = listener.local_addr()?;
        info!(%addr, "gateway listening");

        let served = axum::serve(listener, self.router())
            .with_graceful_shutdown(async move {
                signal.await;
                info!("shutdown signal received, draining requests");
            })
            .await;

        let _ = shutdown_tx.send(true);
        for handle in handles {
            let _ = handle.await;
        }
        self.fleet.shutdown().await;
        served?;

        info!("facegrid daemon stopped");
        Ok(())
    }
}
