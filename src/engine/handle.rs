use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use tokio::sync::mpsc::{Receiver, UnboundedReceiver};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::audit::{AuditEventKind, NewAuditEvent};
use crate::constants::AUDIT_LOG_FILE_NAME;
use crate::engine::ledger::RunLedger;
use crate::errors::EngineFault;
use crate::models::{CaseInfo, ProgressEvent, RunState, UnitRecord, UnitState, VerificationState};
use crate::utils::hash::HashAlgorithm;
use crate::utils::summary::{build_manifest, write_manifest, ManifestInput, RunManifest};

/// Run facts fixed at configure time
#[derive(Debug, Clone)]
pub(crate) struct RunMeta {
    pub(crate) run_id: Uuid,
    pub(crate) hostname: String,
    pub(crate) started_at: DateTime<Utc>,
    pub(crate) output_dir: PathBuf,
    pub(crate) hash_algorithms: Vec<HashAlgorithm>,
    pub(crate) cancel_timeout: Duration,
    pub(crate) case: CaseInfo,
}

/// Result of a finalized run
#[derive(Debug, Clone)]
pub struct RunOutcome {
    pub status: RunState,
    pub manifest: RunManifest,
    pub manifest_path: PathBuf,
    pub audit_log_path: PathBuf,
    pub output_dir: PathBuf,
}

/// Control surface of a running collection
pub struct RunHandle {
    pub(crate) ledger: Arc<RunLedger>,
    pub(crate) tasks: Vec<JoinHandle<()>>,
    /// Closes once every unit task has dropped its run context
    pub(crate) done: Receiver<()>,
    pub(crate) progress: Option<UnboundedReceiver<ProgressEvent>>,
    pub(crate) meta: RunMeta,
}

/// Final status from the terminal unit states
pub(crate) fn decide_status(units: &[UnitRecord], cancel_requested: bool) -> RunState {
    let completed = units.iter().filter(|u| u.state == UnitState::Completed).count();
    if completed == units.len() {
        RunState::Completed
    } else if cancel_requested && completed == 0 {
        RunState::Aborted
    } else {
        RunState::PartiallyFailed
    }
}

impl RunHandle {
    pub fn run_id(&self) -> Uuid {
        self.meta.run_id
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.meta.output_dir
    }

    /// `Running` until the handle is finalized
    pub fn state(&self) -> RunState {
        RunState::Running
    }

    /// Take the progress feed. Only the first call returns it; the feed
    /// closes once every unit task has ended.
    pub fn progress(&mut self) -> Option<UnboundedReceiver<ProgressEvent>> {
        self.progress.take()
    }

    /// Current per-unit states in selection order
    pub fn unit_states(&self) -> Vec<(String, UnitState)> {
        self.ledger
            .snapshot()
            .map(|(units, _)| units.into_iter().map(|u| (u.unit_id, u.state)).collect())
            .unwrap_or_default()
    }

    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(|t| t.is_finished())
    }

    /// Resolve once every unit task has ended. Safe to use in `select!`
    /// and to call again after it returned.
    pub async fn wait(&mut self) {
        while self.done.recv().await.is_some() {}
    }

    /// Request cooperative cancellation. Units that have not started yet
    /// end as cancelled without being prepared.
    pub fn cancel(&self) {
        if let Err(fault) = self.ledger.request_cancel() {
            self.ledger.record_fault(fault);
        }
    }

    /// Cancel, then wait up to the configured timeout for units to stop.
    ///
    /// The deadline runs on its own thread, so a unit that blocks a runtime
    /// worker cannot stretch it. Units still in flight afterwards are marked
    /// timed out and their tasks abandoned; their ids are returned.
    pub async fn cancel_and_wait(&mut self) -> Vec<String> {
        self.cancel();

        let timeout = self.meta.cancel_timeout;
        let started = Instant::now();
        let stopped = tokio::select! {
            _ = self.wait() => true,
            _ = wall_clock_deadline(timeout) => false,
        };
        if stopped {
            return Vec::new();
        }

        let timed_out = match self.ledger.expire_in_flight(started.elapsed()) {
            Ok(timed_out) => timed_out,
            Err(fault) => {
                self.ledger.record_fault(fault);
                Vec::new()
            }
        };
        warn!(
            "{} unit(s) did not stop within {:?}, abandoning them",
            timed_out.len(),
            timeout
        );

        // Dropping an aborted handle detaches the task; it is torn down at
        // its next yield point.
        for task in self.tasks.drain(..) {
            task.abort();
        }
        timed_out
    }

    /// Wait for every unit, then seal the run and persist its manifest.
    ///
    /// `run-completed` is appended before the manifest is built, so the
    /// manifest's head hash anchors the complete audit log.
    pub async fn finalize(mut self) -> Result<RunOutcome, EngineFault> {
        for task in self.tasks.drain(..) {
            if let Err(e) = task.await {
                error!("Unit task ended abnormally: {}", e);
            }
        }

        if let Some(fault) = self.ledger.take_fault() {
            return Err(fault);
        }

        match self.close_out() {
            Ok(outcome) => Ok(outcome),
            Err(fault) => {
                self.ledger.note_fault(&fault);
                Err(fault)
            }
        }
    }

    fn close_out(&self) -> Result<RunOutcome, EngineFault> {
        self.ledger.seal()?;
        let (units, artifacts) = self.ledger.snapshot()?;

        if let Some(unit) = units.iter().find(|u| !u.state.is_terminal()) {
            return Err(EngineFault::NonTerminalUnit(unit.unit_id.clone()));
        }

        let status = decide_status(&units, self.ledger.cancel_requested());
        let completed = units.iter().filter(|u| u.state == UnitState::Completed).count();
        let verified = artifacts
            .iter()
            .filter(|a| a.state == VerificationState::Verified)
            .count();
        self.ledger.audit().append(NewAuditEvent::run(
            AuditEventKind::RunCompleted,
            format!(
                "status {}: {}/{} unit(s) completed, {}/{} artifact(s) verified",
                status,
                completed,
                units.len(),
                verified,
                artifacts.len()
            ),
        ))?;

        let events = self.ledger.audit().snapshot()?;
        let ended_at = events.last().map(|e| e.timestamp).unwrap_or_else(Utc::now);
        let manifest = build_manifest(ManifestInput {
            run_id: self.meta.run_id,
            hostname: &self.meta.hostname,
            collector_version: env!("CARGO_PKG_VERSION"),
            started_at: self.meta.started_at,
            ended_at,
            status,
            case: &self.meta.case,
            hash_algorithms: &self.meta.hash_algorithms,
            output_dir: &self.meta.output_dir,
            units: &units,
            artifacts: &artifacts,
            audit_events: &events,
            audit_file_name: AUDIT_LOG_FILE_NAME,
        });

        let manifest_path = write_manifest(&self.meta.output_dir, &manifest)
            .map_err(|e| EngineFault::Persist(format!("{:#}", e)))?;

        info!(
            "Run {} finished: {} ({}/{} units completed)",
            self.meta.run_id,
            status,
            completed,
            units.len()
        );

        Ok(RunOutcome {
            status,
            manifest,
            manifest_path,
            audit_log_path: self.meta.output_dir.join(AUDIT_LOG_FILE_NAME),
            output_dir: self.meta.output_dir.clone(),
        })
    }
}

/// Resolve after `timeout` of wall-clock time, measured off the runtime
async fn wall_clock_deadline(timeout: Duration) {
    let (tx, rx) = oneshot::channel();
    let spawned = std::thread::Builder::new()
        .name("cancel-deadline".to_string())
        .spawn(move || {
            std::thread::sleep(timeout);
            let _ = tx.send(());
        });

    match spawned {
        Ok(_) => {
            let _ = rx.await;
        }
        Err(e) => {
            warn!("Could not start deadline thread ({}), using the runtime timer", e);
            tokio::time::sleep(timeout).await;
        }
    }
}
