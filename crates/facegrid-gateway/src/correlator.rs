//! Correlator: drains the response queue into [`PendingResults`].

use std::sync::Arc;
use std::time::Duration;

use facegrid_backend::{BackendResult, QueueService};
use facegrid_core::{FacegridConfig, ResultMessage};
use tracing::{debug, info, warn};

use crate::pending::PendingResults;

#[derive(Debug, Clone)]
pub struct CorrelatorSettings {
    pub response_queue: String,
    /// Messages fetched per receive.
    pub batch: usize,
    pub receive_wait: Duration,
    /// Pause after a failed receive.
    pub error_backoff: Duration,
}

impl CorrelatorSettings {
    pub fn from_config(config: &FacegridConfig) -> Self {
        Self {
            response_queue: config.queues.response.clone(),
            batch: config.queues.correlator_batch,
            receive_wait: config.queues.receive_wait,
            error_backoff: config.worker.error_backoff,
        }
    }
}

pub struct Correlator {
    queue: Arc<dyn QueueService>,
    pending: Arc<PendingResults>,
    settings: CorrelatorSettings,
}

impl Correlator {
    pub fn new(
        queue: Arc<dyn QueueService>,
        pending: Arc<PendingResults>,
        settings: CorrelatorSettings,
    ) -> Self {
        Self {
            queue,
            pending,
            settings,
        }
    }

    /// Receive one batch and record every well-formed result.
    ///
    /// Every received message is deleted, malformed ones included. Returns
    /// the number of results recorded.
    pub async fn poll_once(&self) -> BackendResult<usize> {
        let queue = &self.settings.response_queue;
        let batch = self
            .queue
            .receive(queue, self.settings.batch, self.settings.receive_wait)
            .await?;

        let mut recorded = 0;
        for msg in batch {
            match ResultMessage::parse(&msg.body) {
                Ok(result) => {
                    debug!(correlation_id = %result.correlation_id, "result received");
                    self.pending.insert(result.correlation_id, result.outcome).await;
                    recorded += 1;
                }
                Err(e) => warn!(queue = %queue, error = %e, "dropping malformed result"),
            }
            if let Err(e) = self.queue.delete(queue, &msg.receipt).await {
                warn!(queue = %queue, error = %e, "failed to delete result message");
            }
        }
        Ok(recorded)
    }

    /// Run until shutdown.
    pub async fn run(&self, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(queue = %self.settings.response_queue, "correlator started");
        loop {
            tokio::select! {
                res = self.poll_once() => {
                    if let Err(e) = res {
                        warn!(queue = %self.settings.response_queue, error = %e, "result receive failed");
                        tokio::select! {
                            _ = tokio::time::sleep(self.settings.error_backoff) => {}
                            _ = shutdown.changed() => break,
                        }
                    }
                }
                _ = shutdown.changed() => {
                    info!("correlator shutting down");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use facegrid_backend::MemoryQueue;
    use facegrid_core::JobOutcome;

    fn correlator(queue: Arc<MemoryQueue>) -> (Correlator, Arc<PendingResults>) {
        let pending = Arc::new(PendingResults::new());
        let settings = CorrelatorSettings {
            response_queue: "resp".to_string(),
            batch: 10,
            receive_wait: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
        };
        (Correlator::new(queue, pending.clone(), settings), pending)
    }

    #[tokio::test(start_paused = true)]
    async fn records_results_and_deletes_everything() {
        let queue = Arc::new(MemoryQueue::new(&["resp"]));
        let (correlator, pending) = correlator(queue.clone());

        queue.send("resp", "alice:Alice").await.unwrap();
        queue.send("resp", "no separator here").await.unwrap();
        queue.send("resp", "bob:!error").await.unwrap();
        queue.send("resp", "carol:label:with:colons").await.unwrap();

        assert_eq!(correlator.poll_once().await.unwrap(), 3);
        assert_eq!(pending.take("alice").await, Some(JobOutcome::Label("Alice".to_string())));
        assert_eq!(pending.take("bob").await, Some(JobOutcome::Failed));
        assert_eq!(
            pending.take("carol").await,
            Some(JobOutcome::Label("label:with:colons".to_string()))
        );

        // The malformed message was deleted too.
        assert!(queue.bodies("resp").await.unwrap().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn batches_are_bounded() {
        let queue = Arc::new(MemoryQueue::new(&["resp"]));
        let (correlator, pending) = correlator(queue.clone());
        for n in 0..15 {
            queue.send("resp", &format!("id{n}:L")).await.unwrap();
        }
        assert_eq!(correlator.poll_once().await.unwrap(), 10);
        assert_eq!(pending.len().await, 10);
        assert_eq!(correlator.poll_once().await.unwrap(), 5);
    }

    #[tokio::test(start_paused = true)]
    async fn run_feeds_waiters_until_shutdown() {
        let queue = Arc::new(MemoryQueue::new(&["resp"]));
        let (correlator, pending) = correlator(queue.clone());
        let (tx, rx) = tokio::sync::watch::channel(false);
        let task = tokio::spawn(async move { correlator.run(rx).await });

        queue.send("resp", "dave:Dave").await.unwrap();
        let got = pending
            .wait_for("dave", Duration::from_secs(10), Duration::from_millis(500))
            .await;
        assert_eq!(got, Some(JobOutcome::Label("Dave".to_string())));

        tx.send(true).unwrap();
        task.await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn outage_does_not_stop_the_loop() {
        let queue = Arc::new(MemoryQueue::new(&["resp"]));
        let (correlator, pending) = correlator(queue.clone());
        queue.set_available(false);
        let (tx, rx) = tokio::sync::watch::channel(false);
        let task = tokio::spawn(async move { correlator.run(rx).await });

        tokio::time::sleep(Duration::from_secs(3)).await;
        queue.set_available(true);
        queue.send("resp", "erin:Erin").await.unwrap();
        let got = pending
            .wait_for("erin", Duration::from_secs(10), Duration::from_millis(500))
            .await;
        assert!(got.is_some());

        tx.send(true).unwrap();
        task.await.unwrap();
    }
}
