use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::FailureKind;
use crate::utils::hash::DigestSet;

/// Scheduling class a unit declares for itself.
///
/// Exclusive classes never run alongside another exclusive unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ResourceClass {
    ExclusiveDiskIo,
    ExclusiveMemory,
    Network,
    Lightweight,
}

impl ResourceClass {
    pub fn is_exclusive(self) -> bool {
        matches!(self, Self::ExclusiveDiskIo | Self::ExclusiveMemory)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::ExclusiveDiskIo => "exclusive-disk-io",
            Self::ExclusiveMemory => "exclusive-memory",
            Self::Network => "network",
            Self::Lightweight => "lightweight",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('_', "-").as_str() {
            "exclusive-disk-io" => Ok(Self::ExclusiveDiskIo),
            "exclusive-memory" => Ok(Self::ExclusiveMemory),
            "network" => Ok(Self::Network),
            "lightweight" => Ok(Self::Lightweight),
            other => Err(format!("unknown resource class: {}", other)),
        }
    }
}

/// Lifecycle of one unit within a run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Pending,
    Preparing,
    Running,
    Completed,
    Failed,
}

impl UnitState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// Terminal failure detail recorded for a unit or artifact
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnitFailure {
    pub kind: FailureKind,
    pub reason: String,
}

/// Integrity state of a produced artifact.
///
/// `Verified` is reachable only after every configured digest has been
/// computed over the artifact's final bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VerificationState {
    Pending,
    Hashing,
    Verified,
    Failed,
}

impl VerificationState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Verified | Self::Failed)
    }
}

/// One evidence file produced by a unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub id: String,
    pub unit_id: String,
    pub name: String,
    pub path: PathBuf,
    pub size: u64,
    pub digests: DigestSet,
    pub collected_at: DateTime<Utc>,
    pub state: VerificationState,
    pub failure: Option<String>,
}

/// What a unit reports about itself when `run` succeeds
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UnitSummary {
    pub message: Option<String>,
    pub items_examined: u64,
}

/// Engine-side record of one selected unit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRecord {
    pub unit_id: String,
    pub display_name: String,
    pub version: String,
    pub resource_class: ResourceClass,
    pub state: UnitState,
    pub failure: Option<UnitFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub summary: Option<UnitSummary>,
}

impl UnitRecord {
    pub fn pending(unit_id: &str, display_name: &str, version: &str, resource_class: ResourceClass) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            display_name: display_name.to_string(),
            version: version.to_string(),
            resource_class,
            state: UnitState::Pending,
            failure: None,
            started_at: None,
            ended_at: None,
            summary: None,
        }
    }
}

/// Live progress of one unit, consumed by a UI and safe to ignore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEvent {
    pub unit_id: String,
    pub percent: u8,
    pub message: String,
}

/// Overall run lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Configured,
    Running,
    Completed,
    PartiallyFailed,
    Aborted,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configured => "configured",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::PartiallyFailed => "partially_failed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Case details that attribute a run to an examiner and an investigation
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaseInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub examiner: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evidence_number: Option<String>,
    /// Where the evidence was acquired
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

impl CaseInfo {
    /// Fill a missing examiner with the account running the collector
    pub fn with_default_examiner(mut self) -> Self {
        if self.examiner.as_deref().map_or(true, |e| e.trim().is_empty()) {
            self.examiner = current_user();
        }
        self
    }
}

impl fmt::Display for CaseInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let fields = [
            ("case", &self.case_number),
            ("evidence", &self.evidence_number),
            ("examiner", &self.examiner),
            ("location", &self.location),
        ];
        let parts: Vec<String> = fields
            .iter()
            .filter_map(|(label, value)| value.as_ref().map(|v| format!("{} {}", label, v)))
            .collect();

        if parts.is_empty() {
            f.write_str("no case details")
        } else {
            f.write_str(&parts.join(", "))
        }
    }
}

fn current_user() -> Option<String> {
    ["USER", "USERNAME", "LOGNAME"]
        .iter()
        .filter_map(|key| std::env::var(key).ok())
        .map(|value| value.trim().to_string())
        .find(|value| !value.is_empty())
}
