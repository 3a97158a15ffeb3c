//! Worker: the request-queue consume/process/acknowledge loop.
//!
//! Each iteration receives one job, fetches its input, classifies it, and
//! then runs three best-effort stages: write the output object, send the
//! response message, acknowledge the request message. A failing stage is
//! logged and recorded in the [`JobReport`] but never retried and never
//! stops the later stages; redelivery by the queue is the only retry path.
//! Every effect is an overwrite keyed by correlation id, so processing the
//! same job twice leaves the same output and response content.

use std::sync::Arc;
use std::time::Duration;

use facegrid_backend::{BackendError, ObjectStore, QueueService, ReceivedMessage};
use facegrid_core::{FacegridConfig, Job, JobOutcome, ResultMessage};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::classifier::Classifier;

/// Queue names, buckets, and pacing for a worker.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub request_queue: String,
    pub response_queue: String,
    pub dead_letter_queue: Option<String>,
    pub input_bucket: String,
    pub output_bucket: String,
    pub receive_wait: Duration,
    pub idle_pause: Duration,
    pub error_backoff: Duration,
    /// Deliveries allowed before dead-lettering; 0 disables the policy.
    pub max_receive_count: u32,
}

impl WorkerSettings {
    pub fn from_config(config: &FacegridConfig) -> Self {
        Self {
            request_queue: config.queues.request.clone(),
            response_queue: config.queues.response.clone(),
            dead_letter_queue: config.queues.dead_letter.clone(),
            input_bucket: config.storage.input_bucket.clone(),
            output_bucket: config.storage.output_bucket.clone(),
            receive_wait: config.queues.receive_wait,
            idle_pause: config.worker.idle_pause,
            error_backoff: config.worker.error_backoff,
            max_receive_count: config.worker.max_receive_count,
        }
    }
}

/// Best-effort stage of the per-job pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    WriteOutput,
    SendResponse,
    Acknowledge,
    DeadLetter,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Stage::WriteOutput => "write_output",
            Stage::SendResponse => "send_response",
            Stage::Acknowledge => "acknowledge",
            Stage::DeadLetter => "dead_letter",
        };
        f.write_str(s)
    }
}

/// A best-effort stage that failed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StageFailure {
    pub stage: Stage,
    pub error: String,
}

/// How a received job ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobDisposition {
    /// A result was produced (possibly the error marker).
    Completed(JobOutcome),
    /// Input could not be fetched (or the body was blank); dropped.
    Unprocessable,
    /// Receive budget exhausted; forwarded to the dead-letter queue.
    DeadLettered,
    /// Dead-lettering failed; left on the queue for redelivery.
    Deferred,
}

/// Outcome of one job, including any best-effort failures.
///
/// Callers are free to ignore it; every failure is already logged.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    pub correlation_id: String,
    pub disposition: JobDisposition,
    pub failures: Vec<StageFailure>,
}

impl JobReport {
    fn new(correlation_id: &str, disposition: JobDisposition) -> Self {
        Self {
            correlation_id: correlation_id.to_string(),
            disposition,
            failures: Vec::new(),
        }
    }

    fn record(&mut self, stage: Stage, error: &BackendError) {
        warn!(
            correlation_id = %self.correlation_id,
            %stage,
            error = %error,
            "best-effort stage failed"
        );
        self.failures.push(StageFailure {
            stage,
            error: error.to_string(),
        });
    }
}

/// A single consumer of the request queue.
pub struct Worker {
    id: String,
    queue: Arc<dyn QueueService>,
    store: Arc<dyn ObjectStore>,
    classifier: Arc<dyn Classifier>,
    settings: WorkerSettings,
}

impl Worker {
    pub fn new(
        id: impl Into<String>,
        queue: Arc<dyn QueueService>,
        store: Arc<dyn ObjectStore>,
        classifier: Arc<dyn Classifier>,
        settings: WorkerSettings,
    ) -> Self {
        Self {
            id: id.into(),
            queue,
            store,
            classifier,
            settings,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Receive at most one job and process it.
    ///
    /// Returns `Ok(None)` when the receive wait elapsed with nothing to do.
    pub async fn poll_once(&self) -> Result<Option<JobReport>, BackendError> {
        let mut messages = self
            .queue
            .receive(&self.settings.request_queue, 1, self.settings.receive_wait)
            .await?;
        match messages.pop() {
            Some(message) => Ok(Some(self.process(message).await)),
            None => Ok(None),
        }
    }

    /// Run the full pipeline for one received message.
    pub async fn process(&self, message: ReceivedMessage) -> JobReport {
        let Some(job) = Job::from_body(&message.body) else {
            warn!(worker = %self.id, "blank request body, dropping");
            let mut report = JobReport::new("", JobDisposition::Unprocessable);
            self.acknowledge(&message, &mut report).await;
            return report;
        };

        if let Some(report) = self.dead_letter_if_exhausted(&job, &message).await {
            return report;
        }

        debug!(worker = %self.id, correlation_id = %job.correlation_id, "processing job");
        let input = match self
            .store
            .get(&self.settings.input_bucket, &job.input_key)
            .await
        {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    worker = %self.id,
                    correlation_id = %job.correlation_id,
                    input_key = %job.input_key,
                    error = %e,
                    "input fetch failed, dropping job"
                );
                let mut report = JobReport::new(&job.correlation_id, JobDisposition::Unprocessable);
                self.acknowledge(&message, &mut report).await;
                return report;
            }
        };

        let outcome = self.classify(&job, input).await;
        let mut report =
            JobReport::new(&job.correlation_id, JobDisposition::Completed(outcome.clone()));

        if let Err(e) = self
            .store
            .put(
                &self.settings.output_bucket,
                &job.correlation_id,
                outcome.as_wire().as_bytes().to_vec(),
            )
            .await
        {
            report.record(Stage::WriteOutput, &e);
        }

        let response = ResultMessage::new(job.correlation_id.as_str(), outcome).to_body();
        if let Err(e) = self
            .queue
            .send(&self.settings.response_queue, &response)
            .await
        {
            report.record(Stage::SendResponse, &e);
        }

        self.acknowledge(&message, &mut report).await;
        report
    }

    async fn classify(&self, job: &Job, input: Vec<u8>) -> JobOutcome {
        let classifier = Arc::clone(&self.classifier);
        let result = tokio::task::spawn_blocking(move || classifier.classify(&input)).await;
        match result {
            Ok(Ok(classification)) => {
                info!(
                    worker = %self.id,
                    correlation_id = %job.correlation_id,
                    label = %classification.label,
                    distance = classification.distance,
                    "input classified"
                );
                JobOutcome::Label(classification.label)
            }
            Ok(Err(e)) => {
                warn!(
                    worker = %self.id,
                    correlation_id = %job.correlation_id,
                    error = %e,
                    "classification failed"
                );
                JobOutcome::Failed
            }
            Err(e) => {
                warn!(
                    worker = %self.id,
                    correlation_id = %job.correlation_id,
                    error = %e,
                    "classification task panicked"
                );
                JobOutcome::Failed
            }
        }
    }

    async fn dead_letter_if_exhausted(
        &self,
        job: &Job,
        message: &ReceivedMessage,
    ) -> Option<JobReport> {
        let max = self.settings.max_receive_count;
        let dlq = self.settings.dead_letter_queue.as_deref()?;
        if max == 0 || message.receive_count <= max {
            return None;
        }

        warn!(
            worker = %self.id,
            correlation_id = %job.correlation_id,
            receive_count = message.receive_count,
            max_receive_count = max,
            dead_letter_queue = %dlq,
            "receive budget exhausted, dead-lettering job"
        );
        match self.queue.send(dlq, &message.body).await {
            Ok(()) => {
                let mut report = JobReport::new(&job.correlation_id, JobDisposition::DeadLettered);
                self.acknowledge(message, &mut report).await;
                Some(report)
            }
            Err(e) => {
                let mut report = JobReport::new(&job.correlation_id, JobDisposition::Deferred);
                report.record(Stage::DeadLetter, &e);
                Some(report)
            }
        }
    }

    async fn acknowledge(&self, message: &ReceivedMessage, report: &mut JobReport) {
        match self
            .queue
            .delete(&self.settings.request_queue, &message.receipt)
            .await
        {
            Ok(()) => debug!(correlation_id = %report.correlation_id, "request acknowledged"),
            Err(e) => report.record(Stage::Acknowledge, &e),
        }
    }

    /// Consume jobs until `shutdown` flips to true.
    ///
    /// A job that is already being processed is finished before the loop
    /// exits.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(worker = %self.id, queue = %self.settings.request_queue, "worker started");

        while !*shutdown.borrow() {
            let received = tokio::select! {
                _ = shutdown.changed() => break,
                received = self.queue.receive(
                    &self.settings.request_queue,
                    1,
                    self.settings.receive_wait,
                ) => received,
            };

            let pause = match received {
                Ok(messages) if messages.is_empty() => self.settings.idle_pause,
                Ok(messages) => {
                    for message in messages {
                        self.process(message).await;
                    }
                    continue;
                }
                Err(e) => {
                    warn!(worker = %self.id, error = %e, "request queue receive failed");
                    self.settings.error_backoff
                }
            };

            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
        }

        info!(worker = %self.id, "worker stopped");
    }
}
