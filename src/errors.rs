//! Error taxonomy for the collection engine.
//!
//! Errors are layered by blast radius:
//!
//! - [`ConfigError`]: the run never starts
//! - [`PrepareError`]: a unit never runs
//! - [`UnitError`]: a unit fails, the run continues
//! - [`HashIoError`]: one artifact fails, its unit may still complete
//! - [`EngineFault`]: an engine invariant broke, the whole run is aborted

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Why a unit ended in the `failed` state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Cancelled,
    ToolMissing,
    PermissionDenied,
    IoFailure,
    TimedOut,
    Unknown,
}

impl FailureKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Cancelled => "cancelled",
            Self::ToolMissing => "tool_missing",
            Self::PermissionDenied => "permission_denied",
            Self::IoFailure => "io_failure",
            Self::TimedOut => "timed_out",
            Self::Unknown => "unknown",
        }
    }

    /// Map an I/O error onto the closest failure kind.
    ///
    /// A missing path is an I/O failure here; `ToolMissing` is reserved for
    /// program resolution.
    pub fn from_io(err: &std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::PermissionDenied => Self::PermissionDenied,
            std::io::ErrorKind::TimedOut => Self::TimedOut,
            _ => Self::IoFailure,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected run configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("no collection units selected")]
    EmptySelection,

    #[error("unknown collection unit: {0}")]
    UnknownUnit(String),

    #[error("collection unit selected more than once: {0}")]
    DuplicateUnit(String),

    #[error("no hash algorithms configured")]
    NoHashAlgorithms,

    #[error("output directory {path} is not writable: {source}")]
    NotWritable {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("output directory {0} already holds an audit log from another run")]
    OutputInUse(PathBuf),

    #[error("failed to open audit log: {0}")]
    Audit(#[from] AuditError),
}

/// A unit's preconditions are not met; `run` is never called.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {reason}")]
pub struct PrepareError {
    pub kind: FailureKind,
    pub reason: String,
}

impl PrepareError {
    pub fn new(kind: FailureKind, reason: impl Into<String>) -> Self {
        Self { kind, reason: reason.into() }
    }

    pub fn permission_denied(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::PermissionDenied, reason)
    }

    pub fn tool_missing(reason: impl Into<String>) -> Self {
        Self::new(FailureKind::ToolMissing, reason)
    }
}

/// A unit's collection failed. Contained at the unit boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{kind}: {detail}")]
pub struct UnitError {
    pub kind: FailureKind,
    pub detail: String,
}

impl UnitError {
    pub fn new(kind: FailureKind, detail: impl Into<String>) -> Self {
        Self { kind, detail: detail.into() }
    }

    pub fn cancelled() -> Self {
        Self::new(FailureKind::Cancelled, "cancellation requested")
    }

    pub fn io(detail: impl Into<String>) -> Self {
        Self::new(FailureKind::IoFailure, detail)
    }

    pub fn from_io(context: &str, err: &std::io::Error) -> Self {
        Self::new(FailureKind::from_io(err), format!("{}: {}", context, err))
    }
}

impl From<PrepareError> for UnitError {
    fn from(err: PrepareError) -> Self {
        Self { kind: err.kind, detail: err.reason }
    }
}

/// Reading an artifact failed partway through hashing.
#[derive(Error, Debug)]
#[error("failed to hash {path}: {source}")]
pub struct HashIoError {
    pub path: PathBuf,
    #[source]
    pub source: std::io::Error,
}

/// Audit log persistence failure.
#[derive(Error, Debug)]
pub enum AuditError {
    #[error("audit log I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("audit event serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("audit log lock poisoned")]
    Poisoned,
}

/// Internal invariant violation. Aborts the run.
#[derive(Error, Debug)]
pub enum EngineFault {
    #[error("audit log append failed: {0}")]
    Audit(#[from] AuditError),

    #[error("run state lock poisoned")]
    Poisoned,

    #[error("unit {0} did not reach a terminal state")]
    NonTerminalUnit(String),

    #[error("failed to persist run output: {0}")]
    Persist(String),

    #[error("scheduler failure: {0}")]
    Scheduler(String),
}
