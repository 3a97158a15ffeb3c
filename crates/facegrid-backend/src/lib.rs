//! facegrid-backend: the external collaborators behind trait seams.
//!
//! The gateway, worker, and autoscaler never talk to a concrete queue,
//! blob store, or instance provider. They hold `Arc<dyn QueueService>`,
//! `Arc<dyn ObjectStore>` and `Arc<dyn FleetController>` and are handed
//! implementations at startup.
//!
//! # Implementations
//!
//! | Trait | Implementation | Notes |
//! |---|---|---|
//! | [`QueueService`] | [`MemoryQueue`] | visibility timeout, receive counts, blocking receive |
//! | [`ObjectStore`] | [`MemoryObjectStore`] | ephemeral |
//! | [`ObjectStore`] | [`RedbObjectStore`] | durable, backed by redb |
//! | [`FleetController`] | [`MemoryFleet`] | start/stop bookkeeping only |
//!
//! All traits return boxed futures so they stay object-safe.

pub mod error;
pub mod fleet;
pub mod queue;
pub mod store;
pub mod tables;

use std::future::Future;
use std::pin::Pin;

pub use error::{BackendError, BackendResult};
pub use fleet::{FleetController, MemoryFleet};
pub use queue::{MemoryQueue, QueueService, ReceivedMessage};
pub use store::{MemoryObjectStore, ObjectStore, RedbObjectStore};

/// Boxed future returned by every collaborator operation.
pub type BackendFuture<'a, T> = Pin<Box<dyn Future<Output = BackendResult<T>> + Send + 'a>>;
