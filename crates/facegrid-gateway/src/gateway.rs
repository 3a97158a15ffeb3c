//! Gateway: turns one upload into a queued job and waits for its result.

use std::sync::Arc;
use std::time::Duration;

use facegrid_backend::{ObjectStore, QueueService};
use facegrid_core::{FacegridConfig, Job, JobOutcome, ResultMessage};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::pending::PendingResults;

#[derive(Debug, Clone)]
pub struct GatewaySettings {
    pub request_queue: String,
    pub dead_letter_queue: Option<String>,
    pub input_bucket: String,
    pub poll_interval: Duration,
    pub result_timeout: Duration,
}

impl GatewaySettings {
    pub fn from_config(config: &FacegridConfig) -> Self {
        Self {
            request_queue: config.queues.request.clone(),
            dead_letter_queue: config.queues.dead_letter.clone(),
            input_bucket: config.storage.input_bucket.clone(),
            poll_interval: config.gateway.poll_interval,
            result_timeout: config.gateway.result_timeout,
        }
    }
}

/// Synchronous front over the asynchronous request/response queues.
pub struct Gateway {
    queue: Arc<dyn QueueService>,
    store: Arc<dyn ObjectStore>,
    pending: Arc<PendingResults>,
    settings: GatewaySettings,
}

impl Gateway {
    pub fn new(
        queue: Arc<dyn QueueService>,
        store: Arc<dyn ObjectStore>,
        settings: GatewaySettings,
    ) -> Self {
        Self {
            queue,
            store,
            pending: Arc::new(PendingResults::new()),
            settings,
        }
    }

    /// The results map this gateway waits on. The correlator fills it.
    pub fn pending(&self) -> &Arc<PendingResults> {
        &self.pending
    }

    pub fn settings(&self) -> &GatewaySettings {
        &self.settings
    }

    /// Jobs parked on the dead-letter queue, or `None` when no dead-letter
    /// queue is configured or it cannot be read.
    pub async fn dead_letter_count(&self) -> Option<usize> {
        let dlq = self.settings.dead_letter_queue.as_deref()?;
        self.queue
            .approximate_count(dlq)
            .await
            .inspect_err(|e| warn!(dead_letter_queue = %dlq, error = %e, "failed to count dead letters"))
            .ok()
    }

    /// Store the input, enqueue its job, and wait for the matching result.
    ///
    /// Surrounding whitespace is stripped from `input_name` before it becomes
    /// the object key, so the stored key and the queued job body agree.
    /// Two in-flight requests with the same input name share a correlation
    /// id; whichever waiter checks first gets the result.
    pub async fn handle(&self, input_name: &str, input: Vec<u8>) -> GatewayResult<ResultMessage> {
        let input_name = input_name.trim();
        if input_name.is_empty() {
            return Err(GatewayError::InvalidRequest("empty input name".to_string()));
        }
        if input.is_empty() {
            return Err(GatewayError::InvalidRequest(format!("{input_name} is empty")));
        }

        let job = Job::for_input(input_name);
        let size = input.len();

        self.store
            .put(&self.settings.input_bucket, &job.input_key, input)
            .await
            .inspect_err(|e| warn!(correlation_id = %job.correlation_id, error = %e, "failed to store input"))?;
        self.queue
            .send(&self.settings.request_queue, &job.to_body())
            .await
            .inspect_err(|e| warn!(correlation_id = %job.correlation_id, error = %e, "failed to enqueue job"))?;
        debug!(correlation_id = %job.correlation_id, bytes = size, "job submitted");

        let outcome = self
            .pending
            .wait_for(
                &job.correlation_id,
                self.settings.result_timeout,
                self.settings.poll_interval,
            )
            .await
            .ok_or_else(|| GatewayError::Timeout {
                correlation_id: job.correlation_id.clone(),
                waited: self.settings.result_timeout,
            })?;

        match outcome {
            JobOutcome::Failed => Err(GatewayError::ClassificationFailed(job.correlation_id)),
            outcome => {
                info!(correlation_id = %job.correlation_id, label = outcome.as_wire(), "request answered");
                Ok(ResultMessage::new(job.correlation_id, outcome))
            }
        }
    }
}
