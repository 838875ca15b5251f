//! End-to-end runs through configure, start and finalize.

mod common;

use std::collections::HashMap;

use tempfile::TempDir;

use common::{engine_with, file_content, run_config, Behavior, Script};
use evidence_collector::audit::{read_log, verify_chain, AuditEvent, AuditEventKind};
use evidence_collector::errors::{ConfigError, FailureKind};
use evidence_collector::models::{CaseInfo, ResourceClass, RunState, UnitState, VerificationState};
use evidence_collector::utils::hash::{digest_reader, HashAlgorithm};
use evidence_collector::utils::summary::read_manifest;

fn files(count: usize, delay_ms: u64) -> Behavior {
    Behavior::Files { count, delay_ms }
}

fn events_of<'a>(events: &'a [AuditEvent], unit_id: &str) -> Vec<&'a AuditEvent> {
    events
        .iter()
        .filter(|e| e.unit_id.as_deref() == Some(unit_id))
        .collect()
}

/// Sequence numbers of a unit's first and last audit events
fn span(events: &[AuditEvent], unit_id: &str) -> (u64, u64) {
    let own = events_of(events, unit_id);
    let first = own.first().map(|e| e.sequence).unwrap_or_default();
    let last = own.last().map(|e| e.sequence).unwrap_or_default();
    (first, last)
}

#[tokio::test]
async fn test_every_artifact_verified_with_all_digests() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[
            Script::new("host_info", ResourceClass::Lightweight, files(3, 0)),
            Script::new("sockets", ResourceClass::Network, files(2, 0)),
        ],
        true,
    );

    let run = engine
        .configure(run_config(temp.path(), &["host_info", "sockets"]))
        .unwrap();
    let outcome = run.start().finalize().await.unwrap();

    assert_eq!(outcome.status, RunState::Completed);
    assert!(outcome.manifest_path.exists());
    assert_eq!(
        outcome.manifest.hash_algorithms,
        vec![HashAlgorithm::Md5, HashAlgorithm::Sha256]
    );

    let mut total = 0;
    for unit in &outcome.manifest.units {
        assert_eq!(unit.state, UnitState::Completed);
        assert!(unit.failure.is_none());
        for (index, artifact) in unit.artifacts.iter().enumerate() {
            total += 1;
            assert_eq!(artifact.state, VerificationState::Verified);
            assert_eq!(artifact.id, format!("{}-{:04}", unit.unit_id, index + 1));

            let bytes = file_content(&unit.unit_id, index);
            assert_eq!(artifact.size, bytes.len() as u64);
            let expected = digest_reader(&bytes[..], &outcome.manifest.hash_algorithms, 4096).unwrap();
            assert_eq!(artifact.digests, expected);
        }
    }
    assert_eq!(total, 5);

    let events = read_log(&outcome.audit_log_path).unwrap();
    verify_chain(&events).unwrap();
    assert_eq!(events.first().unwrap().kind, AuditEventKind::RunStarted);
    assert_eq!(events.last().unwrap().kind, AuditEventKind::RunCompleted);
    assert_eq!(outcome.manifest.audit_log.event_count, events.len() as u64);
    assert_eq!(outcome.manifest.audit_log.head_hash, events.last().unwrap().entry_hash);

    let reread = read_manifest(&outcome.manifest_path).unwrap();
    assert_eq!(reread.run_id, outcome.manifest.run_id);
    assert_eq!(reread.units.len(), 2);
}

#[tokio::test]
async fn test_artifacts_settle_before_their_unit_completes() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[
            Script::new("alpha", ResourceClass::Lightweight, files(4, 5)),
            Script::new("beta", ResourceClass::Lightweight, files(4, 5)),
        ],
        true,
    );

    let outcome = engine
        .configure(run_config(temp.path(), &["alpha", "beta"]))
        .unwrap()
        .start()
        .finalize()
        .await
        .unwrap();
    let events = read_log(&outcome.audit_log_path).unwrap();

    for unit_id in ["alpha", "beta"] {
        let own = events_of(&events, unit_id);
        assert_eq!(own.first().unwrap().kind, AuditEventKind::UnitStarted);
        assert_eq!(own.last().unwrap().kind, AuditEventKind::UnitCompleted);

        let completed_at = own.last().unwrap().sequence;
        let verified: Vec<_> = own
            .iter()
            .filter(|e| e.kind == AuditEventKind::ArtifactVerified)
            .collect();
        assert_eq!(verified.len(), 4);
        assert!(verified.iter().all(|e| e.sequence < completed_at));
        assert!(verified.iter().all(|e| e.digests.is_some()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_exclusive_units_never_overlap() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[
            Script::new("disk_image", ResourceClass::ExclusiveDiskIo, files(3, 30)),
            Script::new("memory_dump", ResourceClass::ExclusiveMemory, files(3, 30)),
            Script::new("sockets", ResourceClass::Network, files(3, 30)),
        ],
        true,
    );

    let outcome = engine
        .configure(run_config(temp.path(), &["disk_image", "memory_dump", "sockets"]))
        .unwrap()
        .start()
        .finalize()
        .await
        .unwrap();
    assert_eq!(outcome.status, RunState::Completed);

    let events = read_log(&outcome.audit_log_path).unwrap();
    let (disk_start, disk_end) = span(&events, "disk_image");
    let (memory_start, memory_end) = span(&events, "memory_dump");
    assert!(disk_end < memory_start, "exclusive units overlapped");
    assert!(disk_start < disk_end && memory_start < memory_end);

    let disk = &outcome.manifest.units[0];
    let memory = &outcome.manifest.units[1];
    assert!(disk.ended_at.unwrap() <= memory.started_at.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_audit_sequence_is_gapless_under_concurrency() {
    let temp = TempDir::new().unwrap();
    let scripts: Vec<Script> = ["u1", "u2", "u3", "u4", "u5", "u6"]
        .into_iter()
        .map(|id| Script::new(id, ResourceClass::Lightweight, files(10, 1)))
        .collect();
    let (engine, _) = engine_with(&scripts, true);

    let mut config = run_config(temp.path(), &["u1", "u2", "u3", "u4", "u5", "u6"]);
    config.max_concurrency = Some(6);
    config.hash_algorithms = HashAlgorithm::ALL.to_vec();
    let outcome = engine.configure(config).unwrap().start().finalize().await.unwrap();

    let events = read_log(&outcome.audit_log_path).unwrap();
    verify_chain(&events).unwrap();
    for (index, event) in events.iter().enumerate() {
        assert_eq!(event.sequence, index as u64 + 1);
    }
    // run-started, run-completed, then per unit: started, completed, and
    // discovered plus verified for each of its ten files
    assert_eq!(events.len(), 2 + 6 * (2 + 20));
}

#[tokio::test]
async fn test_privileged_unit_denied_without_elevation() {
    let temp = TempDir::new().unwrap();
    let (engine, counters) = engine_with(
        &[
            Script::new("raw_disk", ResourceClass::ExclusiveDiskIo, files(1, 0)).privileged(),
            Script::new("host_info", ResourceClass::Lightweight, files(1, 0)),
        ],
        false,
    );

    let outcome = engine
        .configure(run_config(temp.path(), &["raw_disk", "host_info"]))
        .unwrap()
        .start()
        .finalize()
        .await
        .unwrap();

    assert_eq!(outcome.status, RunState::PartiallyFailed);
    let raw_disk = &outcome.manifest.units[0];
    assert_eq!(raw_disk.state, UnitState::Failed);
    assert_eq!(raw_disk.failure.as_ref().unwrap().kind, FailureKind::PermissionDenied);
    assert!(raw_disk.artifacts.is_empty());
    assert_eq!(counters["raw_disk"].prepared(), 0);
    assert_eq!(counters["raw_disk"].ran(), 0);

    let events = read_log(&outcome.audit_log_path).unwrap();
    let kinds: Vec<_> = events_of(&events, "raw_disk").iter().map(|e| e.kind).collect();
    assert_eq!(kinds, vec![AuditEventKind::UnitStarted, AuditEventKind::UnitFailed]);

    assert_eq!(outcome.manifest.units[1].state, UnitState::Completed);
}

#[tokio::test]
async fn test_prepare_failure_skips_run() {
    let temp = TempDir::new().unwrap();
    let (engine, counters) = engine_with(
        &[Script::new(
            "imager",
            ResourceClass::ExclusiveDiskIo,
            Behavior::PrepareFails(FailureKind::ToolMissing),
        )],
        true,
    );

    let outcome = engine
        .configure(run_config(temp.path(), &["imager"]))
        .unwrap()
        .start()
        .finalize()
        .await
        .unwrap();

    let imager = &outcome.manifest.units[0];
    assert_eq!(imager.state, UnitState::Failed);
    let failure = imager.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::ToolMissing);
    assert!(failure.reason.contains("scripted precondition failure"));
    assert_eq!(counters["imager"].prepared(), 1);
    assert_eq!(counters["imager"].ran(), 0);
    assert_eq!(outcome.status, RunState::PartiallyFailed);
}

#[tokio::test]
async fn test_panicking_unit_is_contained() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[
            Script::new("fragile", ResourceClass::Lightweight, Behavior::Panics),
            Script::new("sturdy", ResourceClass::Lightweight, files(2, 0)),
        ],
        true,
    );

    let outcome = engine
        .configure(run_config(temp.path(), &["fragile", "sturdy"]))
        .unwrap()
        .start()
        .finalize()
        .await
        .unwrap();

    let fragile = &outcome.manifest.units[0];
    assert_eq!(fragile.state, UnitState::Failed);
    let failure = fragile.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::Unknown);
    assert!(failure.reason.contains("scripted unit exploded"));

    let sturdy = &outcome.manifest.units[1];
    assert_eq!(sturdy.state, UnitState::Completed);
    assert_eq!(sturdy.artifacts.len(), 2);
    assert_eq!(outcome.status, RunState::PartiallyFailed);
}

// Single-threaded runtime: the hashing worker cannot observe the second
// file before the unit deletes it.
#[tokio::test(flavor = "current_thread")]
async fn test_unreadable_artifact_fails_alone() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[Script::new("flaky", ResourceClass::Lightweight, Behavior::VanishingFile)],
        true,
    );

    let outcome = engine
        .configure(run_config(temp.path(), &["flaky"]))
        .unwrap()
        .start()
        .finalize()
        .await
        .unwrap();

    assert_eq!(outcome.status, RunState::Completed);
    let flaky = &outcome.manifest.units[0];
    assert_eq!(flaky.state, UnitState::Completed);

    let states: HashMap<&str, VerificationState> = flaky
        .artifacts
        .iter()
        .map(|a| (a.name.as_str(), a.state))
        .collect();
    assert_eq!(states["keep"], VerificationState::Verified);
    assert_eq!(states["gone"], VerificationState::Failed);

    let gone = flaky.artifacts.iter().find(|a| a.name == "gone").unwrap();
    assert!(gone.failure.is_some());
    assert!(gone.digests.is_empty());

    let events = read_log(&outcome.audit_log_path).unwrap();
    assert!(events.iter().any(|e| e.kind == AuditEventKind::ArtifactFailed));
}

#[test]
fn test_configure_rejects_bad_requests() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[Script::new("host_info", ResourceClass::Lightweight, files(1, 0))],
        true,
    );

    let empty = engine.configure(run_config(temp.path(), &[]));
    assert!(matches!(empty, Err(ConfigError::EmptySelection)));

    let unknown = engine.configure(run_config(temp.path(), &["host_info", "teleport"]));
    assert!(matches!(unknown, Err(ConfigError::UnknownUnit(id)) if id == "teleport"));

    let duplicate = engine.configure(run_config(temp.path(), &["host_info", "host_info"]));
    assert!(matches!(duplicate, Err(ConfigError::DuplicateUnit(id)) if id == "host_info"));

    let mut no_hashes = run_config(temp.path(), &["host_info"]);
    no_hashes.hash_algorithms.clear();
    assert!(matches!(engine.configure(no_hashes), Err(ConfigError::NoHashAlgorithms)));

    // None of the rejections above touched the directory
    assert!(std::fs::read_dir(temp.path()).unwrap().next().is_none());
}

#[test]
fn test_output_directory_claimed_by_one_run() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[Script::new("host_info", ResourceClass::Lightweight, files(1, 0))],
        true,
    );

    let first = engine.configure(run_config(temp.path(), &["host_info"])).unwrap();
    assert_eq!(first.state(), RunState::Configured);

    let events = read_log(&first.output_dir().join("audit_log.jsonl")).unwrap();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].kind, AuditEventKind::RunStarted);
    assert!(events[0].detail.contains(&first.run_id().to_string()));

    let second = engine.configure(run_config(temp.path(), &["host_info"]));
    assert!(matches!(second, Err(ConfigError::OutputInUse(_))));
}

#[tokio::test]
async fn test_progress_feed_closes_after_run() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[Script::new("host_info", ResourceClass::Lightweight, files(4, 0))],
        true,
    );

    let mut handle = engine
        .configure(run_config(temp.path(), &["host_info"]))
        .unwrap()
        .start();
    assert_eq!(handle.state(), RunState::Running);

    let mut progress = handle.progress().unwrap();
    assert!(handle.progress().is_none());

    let outcome = handle.finalize().await.unwrap();
    assert_eq!(outcome.status, RunState::Completed);

    let mut percents = Vec::new();
    while let Some(event) = progress.recv().await {
        assert_eq!(event.unit_id, "host_info");
        percents.push(event.percent);
    }
    assert_eq!(percents, vec![25, 50, 75, 100]);
}

#[tokio::test]
async fn test_wait_resolves_when_every_unit_ends() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[
            Script::new("host_info", ResourceClass::Lightweight, files(2, 20)),
            Script::new("disk_image", ResourceClass::ExclusiveDiskIo, files(1, 50)),
        ],
        true,
    );

    let mut handle = engine
        .configure(run_config(temp.path(), &["host_info", "disk_image"]))
        .unwrap()
        .start();

    handle.wait().await;
    assert!(handle
        .unit_states()
        .iter()
        .all(|(_, state)| *state == UnitState::Completed));
    // Already closed; returns straight away
    handle.wait().await;

    let outcome = handle.finalize().await.unwrap();
    assert_eq!(outcome.status, RunState::Completed);
}

#[tokio::test]
async fn test_case_details_attributed_in_log_and_manifest() {
    let temp = TempDir::new().unwrap();
    let (engine, _) = engine_with(
        &[Script::new("host_info", ResourceClass::Lightweight, files(1, 0))],
        true,
    );

    let mut config = run_config(temp.path(), &["host_info"]);
    config.case = CaseInfo {
        case_number: Some("2024-117".to_string()),
        examiner: Some("J. Doe".to_string()),
        evidence_number: Some("E-0042".to_string()),
        ..CaseInfo::default()
    };
    let outcome = engine.configure(config).unwrap().start().finalize().await.unwrap();

    assert_eq!(outcome.manifest.case.case_number.as_deref(), Some("2024-117"));
    assert_eq!(outcome.manifest.case.examiner.as_deref(), Some("J. Doe"));
    let reread = read_manifest(&outcome.manifest_path).unwrap();
    assert_eq!(reread.case, outcome.manifest.case);

    let events = read_log(&outcome.audit_log_path).unwrap();
    assert_eq!(events[0].kind, AuditEventKind::RunStarted);
    assert!(events[0].detail.contains("case 2024-117, evidence E-0042, examiner J. Doe"));
}
