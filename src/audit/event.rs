use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::utils::hash::DigestSet;

/// Kind of lifecycle transition an audit event records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum AuditEventKind {
    RunStarted,
    UnitStarted,
    ArtifactDiscovered,
    ArtifactVerified,
    ArtifactFailed,
    UnitCompleted,
    UnitFailed,
    CancelRequested,
    EngineFault,
    RunCompleted,
}

impl AuditEventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::RunStarted => "run-started",
            Self::UnitStarted => "unit-started",
            Self::ArtifactDiscovered => "artifact-discovered",
            Self::ArtifactVerified => "artifact-verified",
            Self::ArtifactFailed => "artifact-failed",
            Self::UnitCompleted => "unit-completed",
            Self::UnitFailed => "unit-failed",
            Self::CancelRequested => "cancel-requested",
            Self::EngineFault => "engine-fault",
            Self::RunCompleted => "run-completed",
        }
    }
}

impl fmt::Display for AuditEventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable, chained chain-of-custody record.
///
/// `entry_hash` is the SHA-256 of the canonical JSON of every other field,
/// and `prev_hash` is the `entry_hash` of the preceding event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEvent {
    pub sequence: u64,
    pub timestamp: DateTime<Utc>,
    pub unit_id: Option<String>,
    pub kind: AuditEventKind,
    pub artifact: Option<String>,
    pub detail: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub digests: Option<DigestSet>,
    pub prev_hash: String,
    pub entry_hash: String,
}

#[derive(Serialize)]
struct ChainPayload<'a> {
    sequence: u64,
    timestamp: &'a DateTime<Utc>,
    unit_id: &'a Option<String>,
    kind: AuditEventKind,
    artifact: &'a Option<String>,
    detail: &'a str,
    digests: &'a Option<DigestSet>,
    prev_hash: &'a str,
}

impl AuditEvent {
    /// Recompute the hash this event should carry
    pub fn compute_hash(&self) -> Result<String, serde_json::Error> {
        let payload = ChainPayload {
            sequence: self.sequence,
            timestamp: &self.timestamp,
            unit_id: &self.unit_id,
            kind: self.kind,
            artifact: &self.artifact,
            detail: &self.detail,
            digests: &self.digests,
            prev_hash: &self.prev_hash,
        };
        let bytes = serde_json::to_vec(&payload)?;
        Ok(hex::encode(Sha256::digest(&bytes)))
    }
}

/// An event as submitted by the engine, before sequencing and chaining
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub unit_id: Option<String>,
    pub kind: AuditEventKind,
    pub artifact: Option<String>,
    pub detail: String,
    pub digests: Option<DigestSet>,
}

impl NewAuditEvent {
    /// Run-level event with no owning unit
    pub fn run(kind: AuditEventKind, detail: impl Into<String>) -> Self {
        Self {
            unit_id: None,
            kind,
            artifact: None,
            detail: detail.into(),
            digests: None,
        }
    }

    pub fn unit(kind: AuditEventKind, unit_id: &str, detail: impl Into<String>) -> Self {
        Self {
            unit_id: Some(unit_id.to_string()),
            ..Self::run(kind, detail)
        }
    }

    pub fn with_artifact(mut self, artifact_id: &str) -> Self {
        self.artifact = Some(artifact_id.to_string());
        self
    }

    pub fn with_digests(mut self, digests: DigestSet) -> Self {
        self.digests = Some(digests);
        self
    }
}
