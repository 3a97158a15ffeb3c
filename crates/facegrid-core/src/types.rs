//! Domain types shared by the gateway, worker, and autoscaler.
//!
//! Queue bodies are plain text: a request body is the object-store key of
//! the input, a response body is `"<correlation_id>:<label>"`.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::CodecError;

/// Object-store key of an uploaded input (the original filename).
pub type InputKey = String;

/// Identifier matching a result back to its waiting request.
pub type CorrelationId = String;

/// Identifier of a compute instance in the worker fleet.
pub type InstanceId = String;

/// Reserved label carried on the response queue when classification failed.
pub const ERROR_MARKER: &str = "!error";

/// Derive the correlation id for an input key by stripping its final
/// extension.
///
/// Only the last path segment is considered, and leading dots do not start
/// an extension: `alice.jpg` → `alice`, `a.b.png` → `a.b`, `.hidden` →
/// `.hidden`, `dir.v2/raw` → `dir.v2/raw`.
pub fn correlation_id(input_key: &str) -> &str {
    let base_start = input_key.rfind('/').map_or(0, |i| i + 1);
    let base = &input_key[base_start..];
    let leading_dots = base.len() - base.trim_start_matches('.').len();
    match base[leading_dots..].rfind('.') {
        Some(dot) => &input_key[..base_start + leading_dots + dot],
        None => input_key,
    }
}

// ── Jobs ───────────────────────────────────────────────────────────

/// One unit of work handed from the gateway to a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub correlation_id: CorrelationId,
    pub input_key: InputKey,
}

impl Job {
    /// Build a job for an input stored under `input_key`.
    pub fn for_input(input_key: &str) -> Self {
        Self {
            correlation_id: correlation_id(input_key).to_string(),
            input_key: input_key.to_string(),
        }
    }

    /// Decode a request-queue body. Surrounding whitespace is ignored.
    ///
    /// Returns `None` for a blank body.
    pub fn from_body(body: &str) -> Option<Self> {
        let key = body.trim();
        if key.is_empty() {
            return None;
        }
        Some(Self::for_input(key))
    }

    /// Encode as a request-queue body.
    pub fn to_body(&self) -> String {
        self.input_key.clone()
    }
}

// ── Results ────────────────────────────────────────────────────────

/// What a worker concluded about a job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum JobOutcome {
    /// The nearest reference label.
    Label(String),
    /// Classification failed; carried as [`ERROR_MARKER`] on the wire.
    Failed,
}

impl JobOutcome {
    fn from_wire(label: &str) -> Self {
        if label == ERROR_MARKER {
            JobOutcome::Failed
        } else {
            JobOutcome::Label(label.to_string())
        }
    }

    /// Text written to the output object and the response body.
    pub fn as_wire(&self) -> &str {
        match self {
            JobOutcome::Label(label) => label,
            JobOutcome::Failed => ERROR_MARKER,
        }
    }
}

/// A correlated result as carried on the response queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultMessage {
    pub correlation_id: CorrelationId,
    pub outcome: JobOutcome,
}

impl ResultMessage {
    pub fn new(correlation_id: impl Into<String>, outcome: JobOutcome) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome,
        }
    }

    /// Decode `"<correlation_id>:<label>"`, splitting on the first colon.
    pub fn parse(body: &str) -> Result<Self, CodecError> {
        let (id, label) = body
            .split_once(':')
            .ok_or_else(|| CodecError::MissingSeparator(body.to_string()))?;
        if id.is_empty() {
            return Err(CodecError::EmptyCorrelationId(body.to_string()));
        }
        Ok(Self::new(id, JobOutcome::from_wire(label)))
    }

    /// Encode as a response-queue body.
    pub fn to_body(&self) -> String {
        self.to_string()
    }
}

impl fmt::Display for ResultMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.correlation_id, self.outcome.as_wire())
    }
}

// ── Fleet ──────────────────────────────────────────────────────────

/// Lifecycle state of a fleet instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Stopped,
    Pending,
    Running,
}

impl InstanceState {
    /// Pending and running instances both count toward capacity.
    pub fn is_active(self) -> bool {
        matches!(self, InstanceState::Pending | InstanceState::Running)
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            InstanceState::Stopped => "stopped",
            InstanceState::Pending => "pending",
            InstanceState::Running => "running",
        };
        f.write_str(s)
    }
}

/// One instance in a fleet snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstanceDescriptor {
    pub id: InstanceId,
    pub state: InstanceState,
}

impl InstanceDescriptor {
    pub fn new(id: impl Into<String>, state: InstanceState) -> Self {
        Self {
            id: id.into(),
            state,
        }
    }
}
