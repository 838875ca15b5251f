//! Offline verification of a finished run directory.
//!
//! Re-reads the manifest and the audit log, checks the hash chain and its
//! anchor in the manifest, then re-hashes every verified artifact against
//! the digests carried by its `artifact-verified` event. The manifest's own
//! digests are only trusted as far as they agree with the chain.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use log::{info, warn};
use uuid::Uuid;

use crate::audit::{read_log, verify_chain, AuditEventKind};
use crate::constants::MANIFEST_FILE_NAME;
use crate::models::VerificationState;
use crate::utils::hash::{digest_file, DigestSet, HashAlgorithm};
use crate::utils::summary::read_manifest;

/// One artifact whose bytes or recorded digests do not hold up
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactMismatch {
    pub artifact_id: String,
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct VerificationReport {
    pub run_id: Uuid,
    /// `None` when the audit chain is intact
    pub chain_error: Option<String>,
    pub head_hash_matches: bool,
    pub event_count_matches: bool,
    pub artifacts_checked: usize,
    pub mismatches: Vec<ArtifactMismatch>,
}

impl VerificationReport {
    pub fn is_clean(&self) -> bool {
        self.chain_error.is_none()
            && self.head_hash_matches
            && self.event_count_matches
            && self.mismatches.is_empty()
    }
}

pub fn verify_run(dir: &Path) -> Result<VerificationReport> {
    let manifest = read_manifest(&dir.join(MANIFEST_FILE_NAME))?;
    let events = read_log(&dir.join(&manifest.audit_log.file_name))
        .context("Failed to load audit log for verification")?;

    let chain_error = verify_chain(&events).err().map(|e| e.to_string());
    let head_hash_matches = events
        .last()
        .map(|e| e.entry_hash == manifest.audit_log.head_hash)
        .unwrap_or(false);
    let event_count_matches = events.len() as u64 == manifest.audit_log.event_count;

    // The digests the audit chain vouches for, by artifact id
    let chained: HashMap<&str, &DigestSet> = events
        .iter()
        .filter(|e| e.kind == AuditEventKind::ArtifactVerified)
        .filter_map(|e| Some((e.artifact.as_deref()?, e.digests.as_ref()?)))
        .collect();

    let mut artifacts_checked = 0;
    let mut mismatches = Vec::new();
    let mut listed = HashSet::new();

    for artifact in manifest.units.iter().flat_map(|u| u.artifacts.iter()) {
        listed.insert(artifact.id.as_str());
        let path = dir.join(&artifact.path);
        let mismatch = |reason: String| ArtifactMismatch {
            artifact_id: artifact.id.clone(),
            path: path.clone(),
            reason,
        };

        let recorded = chained.get(artifact.id.as_str()).copied();
        if artifact.state != VerificationState::Verified {
            if recorded.is_some() {
                mismatches.push(mismatch(format!(
                    "audit log records it verified but the manifest says {:?}",
                    artifact.state
                )));
            }
            continue;
        }
        artifacts_checked += 1;

        let expected = match recorded {
            Some(digests) => digests,
            None => {
                mismatches.push(mismatch("no artifact-verified event in the audit log".to_string()));
                continue;
            }
        };
        if *expected != artifact.digests {
            mismatches.push(mismatch("manifest digests differ from the audit log".to_string()));
        }
        for algorithm in &manifest.hash_algorithms {
            if !expected.contains_key(algorithm) {
                mismatches.push(mismatch(format!("no {} digest recorded", algorithm)));
            }
        }
        if expected.is_empty() {
            continue;
        }

        let algorithms: Vec<HashAlgorithm> = expected.keys().copied().collect();
        match digest_file(&path, &algorithms) {
            Ok(actual) => {
                for (algorithm, digest) in expected {
                    let matches = actual
                        .get(algorithm)
                        .map(|found| found.eq_ignore_ascii_case(digest))
                        .unwrap_or(false);
                    if !matches {
                        mismatches.push(mismatch(format!("{} digest differs", algorithm)));
                    }
                }
            }
            Err(e) => mismatches.push(mismatch(e.to_string())),
        }
    }

    for id in chained.keys().filter(|id| !listed.contains(**id)) {
        mismatches.push(ArtifactMismatch {
            artifact_id: id.to_string(),
            path: dir.to_path_buf(),
            reason: "verified in the audit log but missing from the manifest".to_string(),
        });
    }

    let report = VerificationReport {
        run_id: manifest.run_id,
        chain_error,
        head_hash_matches,
        event_count_matches,
        artifacts_checked,
        mismatches,
    };

    if report.is_clean() {
        info!(
            "Run {} verified: audit chain intact, {} artifact(s) match",
            report.run_id, report.artifacts_checked
        );
    } else {
        warn!(
            "Run {} failed verification: chain {:?}, head match {}, count match {}, {} mismatch(es)",
            report.run_id,
            report.chain_error,
            report.head_hash_matches,
            report.event_count_matches,
            report.mismatches.len()
        );
    }
    Ok(report)
}
