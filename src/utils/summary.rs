//! Run manifest: the machine-readable record of what a run produced.
//!
//! The manifest is built purely from the final run snapshot, so identical
//! inputs always give byte-identical JSON.

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::audit::AuditEvent;
use crate::constants::{AUDIT_GENESIS_HASH, MANIFEST_FILE_NAME, MANIFEST_SCHEMA_VERSION};
use crate::models::{
    Artifact, CaseInfo, ResourceClass, RunState, UnitFailure, UnitRecord, UnitState, VerificationState,
};
use crate::utils::hash::{DigestSet, HashAlgorithm};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunManifest {
    pub schema_version: u32,
    pub run_id: Uuid,
    pub hostname: String,
    pub collector_version: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunState,
    #[serde(default)]
    pub case: CaseInfo,
    pub hash_algorithms: Vec<HashAlgorithm>,
    pub units: Vec<UnitOutcome>,
    pub audit_log: AuditLogReference,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnitOutcome {
    pub unit_id: String,
    pub display_name: String,
    pub version: String,
    pub resource_class: ResourceClass,
    pub state: UnitState,
    pub failure: Option<UnitFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub message: Option<String>,
    pub artifacts: Vec<ArtifactSummary>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactSummary {
    pub id: String,
    pub name: String,
    /// Path relative to the run directory, `/`-separated
    pub path: String,
    pub size: u64,
    pub collected_at: DateTime<Utc>,
    pub state: VerificationState,
    pub digests: DigestSet,
    pub failure: Option<String>,
}

/// Pointer from the manifest to the audit log it summarizes
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditLogReference {
    pub file_name: String,
    pub event_count: u64,
    /// `entry_hash` of the last event; anchors the whole chain
    pub head_hash: String,
}

/// Everything the manifest is derived from
pub struct ManifestInput<'a> {
    pub run_id: Uuid,
    pub hostname: &'a str,
    pub collector_version: &'a str,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub status: RunState,
    pub case: &'a CaseInfo,
    pub hash_algorithms: &'a [HashAlgorithm],
    pub output_dir: &'a Path,
    /// Units in selection order
    pub units: &'a [UnitRecord],
    /// Artifacts in discovery order
    pub artifacts: &'a [Artifact],
    pub audit_events: &'a [AuditEvent],
    pub audit_file_name: &'a str,
}

/// Per-state tallies used for the end-of-run summary
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SummaryCounts {
    pub units_total: usize,
    pub units_completed: usize,
    pub units_failed: usize,
    pub artifacts_verified: usize,
    pub artifacts_failed: usize,
    pub bytes_verified: u64,
}

/// Store paths relative to the run directory with forward slashes
fn relative_path(root: &Path, path: &Path) -> String {
    let relative = path.strip_prefix(root).unwrap_or(path);
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// Build the manifest from a final run snapshot.
///
/// Only artifacts that reached `verified` or `failed` are listed.
pub fn build_manifest(input: ManifestInput<'_>) -> RunManifest {
    let units = input
        .units
        .iter()
        .map(|unit| UnitOutcome {
            unit_id: unit.unit_id.clone(),
            display_name: unit.display_name.clone(),
            version: unit.version.clone(),
            resource_class: unit.resource_class,
            state: unit.state,
            failure: unit.failure.clone(),
            started_at: unit.started_at,
            ended_at: unit.ended_at,
            message: unit.summary.as_ref().and_then(|s| s.message.clone()),
            artifacts: input
                .artifacts
                .iter()
                .filter(|a| a.unit_id == unit.unit_id && a.state.is_terminal())
                .map(|a| ArtifactSummary {
                    id: a.id.clone(),
                    name: a.name.clone(),
                    path: relative_path(input.output_dir, &a.path),
                    size: a.size,
                    collected_at: a.collected_at,
                    state: a.state,
                    digests: a.digests.clone(),
                    failure: a.failure.clone(),
                })
                .collect(),
        })
        .collect();

    let mut hash_algorithms = input.hash_algorithms.to_vec();
    hash_algorithms.sort();
    hash_algorithms.dedup();

    RunManifest {
        schema_version: MANIFEST_SCHEMA_VERSION,
        run_id: input.run_id,
        hostname: input.hostname.to_string(),
        collector_version: input.collector_version.to_string(),
        started_at: input.started_at,
        ended_at: input.ended_at,
        status: input.status,
        case: input.case.clone(),
        hash_algorithms,
        units,
        audit_log: AuditLogReference {
            file_name: input.audit_file_name.to_string(),
            event_count: input.audit_events.len() as u64,
            head_hash: input
                .audit_events
                .last()
                .map(|e| e.entry_hash.clone())
                .unwrap_or_else(|| AUDIT_GENESIS_HASH.to_string()),
        },
    }
}

pub fn manifest_to_json(manifest: &RunManifest) -> Result<String> {
    serde_json::to_string_pretty(manifest).context("Failed to serialize manifest")
}

/// Write `manifest.json` into `dir` and sync it to disk
pub fn write_manifest(dir: &Path, manifest: &RunManifest) -> Result<PathBuf> {
    let path = dir.join(MANIFEST_FILE_NAME);
    let json = manifest_to_json(manifest)?;

    let mut file = fs::File::create(&path)
        .context(format!("Failed to create manifest: {}", path.display()))?;
    file.write_all(json.as_bytes())
        .context(format!("Failed to write manifest: {}", path.display()))?;
    file.sync_all()
        .context(format!("Failed to sync manifest: {}", path.display()))?;

    info!("Manifest written to {}", path.display());
    Ok(path)
}

pub fn read_manifest(path: &Path) -> Result<RunManifest> {
    let content = fs::read_to_string(path)
        .context(format!("Failed to read manifest: {}", path.display()))?;
    serde_json::from_str(&content).context(format!("Failed to parse manifest: {}", path.display()))
}

pub fn summary_counts(manifest: &RunManifest) -> SummaryCounts {
    let mut counts = SummaryCounts {
        units_total: manifest.units.len(),
        ..SummaryCounts::default()
    };

    for unit in &manifest.units {
        match unit.state {
            UnitState::Completed => counts.units_completed += 1,
            UnitState::Failed => counts.units_failed += 1,
            _ => {}
        }
        for artifact in &unit.artifacts {
            match artifact.state {
                VerificationState::Verified => {
                    counts.artifacts_verified += 1;
                    counts.bytes_verified += artifact.size;
                }
                VerificationState::Failed => counts.artifacts_failed += 1,
                _ => {}
            }
        }
    }
    counts
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventKind, AuditLog, NewAuditEvent};
    use crate::errors::FailureKind;
    use tempfile::TempDir;

    fn record(id: &str, class: ResourceClass, state: UnitState) -> UnitRecord {
        let mut unit = UnitRecord::pending(id, id, "1.0", class);
        unit.state = state;
        if state == UnitState::Failed {
            unit.failure = Some(UnitFailure {
                kind: FailureKind::ToolMissing,
                reason: "imager not found".to_string(),
            });
        }
        unit
    }

    fn artifact(id: &str, unit_id: &str, path: &str, state: VerificationState) -> Artifact {
        let mut digests = DigestSet::new();
        if state == VerificationState::Verified {
            digests.insert(HashAlgorithm::Sha256, "ab".repeat(32));
        }
        Artifact {
            id: id.to_string(),
            unit_id: unit_id.to_string(),
            name: id.to_string(),
            path: PathBuf::from("/cases/run").join(path),
            size: 10,
            digests,
            collected_at: DateTime::parse_from_rfc3339("2024-01-15T14:30:52Z").unwrap().with_timezone(&Utc),
            state,
            failure: None,
        }
    }

    fn events() -> Vec<AuditEvent> {
        let log = AuditLog::in_memory();
        log.append(NewAuditEvent::run(AuditEventKind::RunStarted, "start")).unwrap();
        log.append(NewAuditEvent::run(AuditEventKind::RunCompleted, "done")).unwrap();
        log.snapshot().unwrap()
    }

    fn build(units: &[UnitRecord], artifacts: &[Artifact], events: &[AuditEvent]) -> RunManifest {
        let ts = DateTime::parse_from_rfc3339("2024-01-15T14:30:00Z").unwrap().with_timezone(&Utc);
        build_manifest(ManifestInput {
            run_id: Uuid::nil(),
            hostname: "workstation-01",
            collector_version: "0.1.0",
            started_at: ts,
            ended_at: ts,
            status: RunState::PartiallyFailed,
            case: &CaseInfo::default(),
            hash_algorithms: &[HashAlgorithm::Sha256, HashAlgorithm::Md5, HashAlgorithm::Sha256],
            output_dir: Path::new("/cases/run"),
            units,
            artifacts,
            audit_events: events,
            audit_file_name: "audit_log.jsonl",
        })
    }

    #[test]
    fn test_manifest_keeps_selection_and_discovery_order() {
        let units = vec![
            record("network", ResourceClass::Network, UnitState::Completed),
            record("live_system", ResourceClass::Lightweight, UnitState::Completed),
        ];
        let artifacts = vec![
            artifact("live-2", "live_system", "live_system/b.json", VerificationState::Verified),
            artifact("net-1", "network", "network/if.json", VerificationState::Verified),
            artifact("live-1", "live_system", "live_system/a.json", VerificationState::Verified),
        ];
        let events = events();

        let manifest = build(&units, &artifacts, &events);
        assert_eq!(manifest.units[0].unit_id, "network");
        assert_eq!(manifest.units[1].unit_id, "live_system");

        let live: Vec<&str> = manifest.units[1].artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(live, vec!["live-2", "live-1"]);
        assert_eq!(manifest.units[1].artifacts[0].path, "live_system/b.json");
        assert_eq!(manifest.hash_algorithms, vec![HashAlgorithm::Md5, HashAlgorithm::Sha256]);
    }

    #[test]
    fn test_manifest_omits_non_terminal_artifacts() {
        let units = vec![record("disk", ResourceClass::ExclusiveDiskIo, UnitState::Failed)];
        let artifacts = vec![
            artifact("a", "disk", "disk/a.bin", VerificationState::Verified),
            artifact("b", "disk", "disk/b.bin", VerificationState::Hashing),
            artifact("c", "disk", "disk/c.bin", VerificationState::Failed),
        ];
        let events = events();

        let manifest = build(&units, &artifacts, &events);
        let ids: Vec<&str> = manifest.units[0].artifacts.iter().map(|a| a.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "c"]);
        assert_eq!(manifest.units[0].failure.as_ref().unwrap().kind, FailureKind::ToolMissing);
    }

    #[test]
    fn test_audit_reference_points_at_head() {
        let events = events();
        let manifest = build(&[], &[], &events);
        assert_eq!(manifest.audit_log.event_count, 2);
        assert_eq!(manifest.audit_log.head_hash, events[1].entry_hash);

        let empty = build(&[], &[], &[]);
        assert_eq!(empty.audit_log.head_hash, AUDIT_GENESIS_HASH);
    }

    #[test]
    fn test_manifest_is_deterministic() {
        let units = vec![record("network", ResourceClass::Network, UnitState::Completed)];
        let artifacts = vec![artifact("n", "network", "network/if.json", VerificationState::Verified)];
        let events = events();

        let first = manifest_to_json(&build(&units, &artifacts, &events)).unwrap();
        let second = manifest_to_json(&build(&units, &artifacts, &events)).unwrap();
        assert_eq!(first, second);
        assert!(first.contains("\"status\": \"partially_failed\""));
        assert!(first.contains("\"schema_version\": 1"));
    }

    #[test]
    fn test_write_and_read_manifest() {
        let temp_dir = TempDir::new().unwrap();
        let events = events();
        let manifest = build(&[], &[], &events);

        let path = write_manifest(temp_dir.path(), &manifest).unwrap();
        assert_eq!(path.file_name().unwrap(), MANIFEST_FILE_NAME);
        assert_eq!(read_manifest(&path).unwrap(), manifest);
    }

    #[test]
    fn test_manifest_without_case_block_still_reads() {
        let events = events();
        let manifest = build(&[], &[], &events);
        let mut json: serde_json::Value = serde_json::from_str(&manifest_to_json(&manifest).unwrap()).unwrap();
        assert_eq!(json["case"], serde_json::json!({}));

        json.as_object_mut().unwrap().remove("case");
        let back: RunManifest = serde_json::from_value(json).unwrap();
        assert_eq!(back.case, CaseInfo::default());
    }

    #[test]
    fn test_summary_counts() {
        let units = vec![
            record("network", ResourceClass::Network, UnitState::Completed),
            record("disk", ResourceClass::ExclusiveDiskIo, UnitState::Failed),
        ];
        let artifacts = vec![
            artifact("n1", "network", "network/a", VerificationState::Verified),
            artifact("n2", "network", "network/b", VerificationState::Failed),
            artifact("d1", "disk", "disk/a", VerificationState::Verified),
        ];
        let events = events();

        let counts = summary_counts(&build(&units, &artifacts, &events));
        assert_eq!(counts.units_total, 2);
        assert_eq!(counts.units_completed, 1);
        assert_eq!(counts.units_failed, 1);
        assert_eq!(counts.artifacts_verified, 2);
        assert_eq!(counts.artifacts_failed, 1);
        assert_eq!(counts.bytes_verified, 20);
    }
}
