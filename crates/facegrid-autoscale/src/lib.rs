//! facegrid-autoscale: backlog-driven worker fleet sizing.
//!
//! Every tick reads the request-queue backlog and a fleet snapshot, then
//! starts or stops worker instances so that the active count tracks the
//! backlog, capped at `max_instances`.
//!
//! # Scaling Algorithm
//!
//! ```text
//! active = running + pending
//! target = min(backlog, max_instances)
//!
//! if active < target:
//!     start (target - active) stopped instances
//!     over_capacity_since = none
//!
//! if active > target:
//!     if over_capacity_since is none:
//!         over_capacity_since = now          // wait one grace period
//!     elif now - over_capacity_since >= grace_period:
//!         stop active[target..]              // timer stays armed
//!
//! if active == target:
//!     over_capacity_since = none
//! ```
//!
//! The grace period keeps a backlog that hovers around a threshold from
//! starting and stopping instances on every tick.

pub mod scaler;

pub use scaler::{Autoscaler, AutoscalerSettings, ScaleDecision};
