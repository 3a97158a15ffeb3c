//! facegrid-worker: the compute side of facegrid.
//!
//! A [`Worker`] pulls jobs from the request queue, fetches the input from
//! the object store, classifies it, and publishes the label to the output
//! bucket and the response queue before acknowledging the job.
//!
//! [`LocalFleet`] wraps worker loops as fleet instances so the autoscaler
//! can start and stop them in a single process.

pub mod classifier;
pub mod fleet;
pub mod worker;

pub use classifier::{
    Classification, Classifier, ClassifyError, Embedder, EmbeddingClassifier, HistogramEmbedder,
    Reference, ReferenceSet,
};
pub use fleet::{LocalFleet, WorkerFactory};
pub use worker::{JobDisposition, JobReport, Stage, StageFailure, Worker, WorkerSettings};
