//! Shared run state.
//!
//! Every state transition and its audit event happen under the same lock,
//! so the audit log order always matches the order transitions took effect.
//! That includes the append's fsync; see `append_event`.

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};
use tokio::runtime::{Handle, RuntimeFlavor};
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::audit::{AuditEventKind, AuditLog, NewAuditEvent};
use crate::collectors::unit::ArtifactHandler;
use crate::errors::{AuditError, EngineFault, FailureKind, UnitError};
use crate::models::{
    Artifact, UnitFailure, UnitRecord, UnitState, UnitSummary, VerificationState,
};
use crate::utils::hash::DigestSet;

struct LedgerInner {
    units: Vec<UnitRecord>,
    artifacts: Vec<Artifact>,
    sealed: bool,
}

impl LedgerInner {
    fn unit_mut(&mut self, unit_id: &str) -> Result<&mut UnitRecord, EngineFault> {
        self.units
            .iter_mut()
            .find(|u| u.unit_id == unit_id)
            .ok_or_else(|| EngineFault::Scheduler(format!("unit {} is not part of this run", unit_id)))
    }

    fn artifact_mut(&mut self, artifact_id: &str) -> Result<&mut Artifact, EngineFault> {
        self.artifacts
            .iter_mut()
            .find(|a| a.id == artifact_id)
            .ok_or_else(|| EngineFault::Scheduler(format!("unknown artifact {}", artifact_id)))
    }
}

/// Append to the audit log from engine code.
///
/// Appends fsync under the caller's state lock. On a multi-thread runtime
/// the worker hands its other tasks off first via `block_in_place`; anywhere
/// else the append simply runs inline.
fn append_event(audit: &AuditLog, event: NewAuditEvent) -> Result<u64, AuditError> {
    match Handle::try_current() {
        Ok(handle) if handle.runtime_flavor() == RuntimeFlavor::MultiThread => {
            tokio::task::block_in_place(|| audit.append(event))
        }
        _ => audit.append(event),
    }
}

pub(crate) struct RunLedger {
    audit: Arc<AuditLog>,
    inner: Mutex<LedgerInner>,
    fault: Mutex<Option<EngineFault>>,
    cancel: CancellationToken,
    cancel_requested: AtomicBool,
}

impl RunLedger {
    pub(crate) fn new(audit: Arc<AuditLog>, units: Vec<UnitRecord>) -> Self {
        Self {
            audit,
            inner: Mutex::new(LedgerInner {
                units,
                artifacts: Vec::new(),
                sealed: false,
            }),
            fault: Mutex::new(None),
            cancel: CancellationToken::new(),
            cancel_requested: AtomicBool::new(false),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, LedgerInner>, EngineFault> {
        self.inner.lock().map_err(|_| EngineFault::Poisoned)
    }

    pub(crate) fn audit(&self) -> &AuditLog {
        &self.audit
    }

    pub(crate) fn child_token(&self) -> CancellationToken {
        self.cancel.child_token()
    }

    pub(crate) fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    pub(crate) async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    pub(crate) fn cancel_requested(&self) -> bool {
        self.cancel_requested.load(Ordering::SeqCst)
    }

    /// Record a cancellation request once and fire the run token.
    ///
    /// The flag flips under the state lock, so a unit either completed
    /// before the request or is recorded as cancelled.
    pub(crate) fn request_cancel(&self) -> Result<(), EngineFault> {
        let _inner = self.lock()?;
        if self.cancel_requested.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        info!("Cancellation requested");
        append_event(
            &self.audit,
            NewAuditEvent::run(AuditEventKind::CancelRequested, "operator requested cancellation"),
        )?;
        self.cancel.cancel();
        Ok(())
    }

    /// Keep the first fault, stop every unit and try to log it.
    pub(crate) fn record_fault(&self, fault: EngineFault) {
        error!("Engine fault, aborting run: {}", fault);
        self.cancel.cancel();
        self.note_fault(&fault);

        if let Ok(mut slot) = self.fault.lock() {
            if slot.is_none() {
                *slot = Some(fault);
            }
        }
    }

    /// Best-effort `engine-fault` audit event
    pub(crate) fn note_fault(&self, fault: &EngineFault) {
        let event = NewAuditEvent::run(AuditEventKind::EngineFault, fault.to_string());
        if let Err(e) = append_event(&self.audit, event) {
            error!("Could not record engine fault in audit log: {}", e);
        }
    }

    pub(crate) fn take_fault(&self) -> Option<EngineFault> {
        match self.fault.lock() {
            Ok(mut slot) => slot.take(),
            Err(_) => Some(EngineFault::Poisoned),
        }
    }

    pub(crate) fn unit_started(&self, unit_id: &str) -> Result<(), EngineFault> {
        let mut inner = self.lock()?;
        let unit = inner.unit_mut(unit_id)?;
        unit.state = UnitState::Preparing;
        unit.started_at = Some(Utc::now());
        let detail = format!(
            "{} v{} ({})",
            unit.display_name, unit.version, unit.resource_class
        );
        append_event(
            &self.audit,
            NewAuditEvent::unit(AuditEventKind::UnitStarted, unit_id, detail),
        )?;
        info!("[{}] started", unit_id);
        Ok(())
    }

    pub(crate) fn unit_running(&self, unit_id: &str) -> Result<(), EngineFault> {
        let mut inner = self.lock()?;
        inner.unit_mut(unit_id)?.state = UnitState::Running;
        debug!("[{}] running", unit_id);
        Ok(())
    }

    /// Move a unit to `completed`, unless cancellation was requested first.
    /// A unit that returns after the request is recorded as cancelled; its
    /// artifacts keep their own verification results.
    pub(crate) fn unit_completed(&self, unit_id: &str, summary: UnitSummary) -> Result<(), EngineFault> {
        let mut inner = self.lock()?;
        if self.cancel_requested() {
            return self.fail_locked(
                &mut inner,
                unit_id,
                FailureKind::Cancelled,
                "cancellation requested before the unit finished".to_string(),
            );
        }

        let artifact_count = inner.artifacts.iter().filter(|a| a.unit_id == unit_id).count();
        let unit = inner.unit_mut(unit_id)?;
        if unit.state.is_terminal() {
            return Ok(());
        }

        unit.state = UnitState::Completed;
        unit.ended_at = Some(Utc::now());
        let detail = format!(
            "{} ({} artifact(s))",
            summary.message.as_deref().unwrap_or("completed"),
            artifact_count
        );
        unit.summary = Some(summary);
        append_event(
            &self.audit,
            NewAuditEvent::unit(AuditEventKind::UnitCompleted, unit_id, detail),
        )?;
        info!("[{}] completed with {} artifact(s)", unit_id, artifact_count);
        Ok(())
    }

    /// Move a unit to `failed`. A unit that is already terminal is left alone.
    pub(crate) fn unit_failed(
        &self,
        unit_id: &str,
        kind: FailureKind,
        reason: impl Into<String>,
    ) -> Result<(), EngineFault> {
        let mut inner = self.lock()?;
        self.fail_locked(&mut inner, unit_id, kind, reason.into())
    }

    fn fail_locked(
        &self,
        inner: &mut LedgerInner,
        unit_id: &str,
        kind: FailureKind,
        reason: String,
    ) -> Result<(), EngineFault> {
        let unit = inner.unit_mut(unit_id)?;
        if unit.state.is_terminal() {
            return Ok(());
        }

        unit.state = UnitState::Failed;
        unit.ended_at = Some(Utc::now());
        unit.failure = Some(UnitFailure { kind, reason: reason.clone() });
        append_event(
            &self.audit,
            NewAuditEvent::unit(AuditEventKind::UnitFailed, unit_id, format!("{}: {}", kind, reason)),
        )?;
        warn!("[{}] failed ({}): {}", unit_id, kind, reason);
        Ok(())
    }

    /// Register a finished artifact as `pending` and return its id
    pub(crate) fn artifact_discovered(
        &self,
        unit_id: &str,
        name: &str,
        path: &Path,
        size: u64,
    ) -> Result<String, EngineFault> {
        let mut inner = self.lock()?;
        if inner.sealed {
            return Err(EngineFault::Scheduler(format!(
                "artifact {} submitted after the run was finalized",
                name
            )));
        }

        let ordinal = inner.artifacts.iter().filter(|a| a.unit_id == unit_id).count() + 1;
        let id = format!("{}-{:04}", unit_id, ordinal);
        inner.artifacts.push(Artifact {
            id: id.clone(),
            unit_id: unit_id.to_string(),
            name: name.to_string(),
            path: path.to_path_buf(),
            size,
            digests: DigestSet::new(),
            collected_at: Utc::now(),
            state: VerificationState::Pending,
            failure: None,
        });
        let event = NewAuditEvent::unit(
            AuditEventKind::ArtifactDiscovered,
            unit_id,
            format!("{}: {} ({} bytes)", name, path.display(), size),
        )
        .with_artifact(&id);
        append_event(&self.audit, event)?;
        Ok(id)
    }

    /// Move an artifact to `hashing`. `None` once the run is sealed.
    pub(crate) fn artifact_hashing(&self, artifact_id: &str) -> Result<Option<PathBuf>, EngineFault> {
        let mut inner = self.lock()?;
        if inner.sealed {
            return Ok(None);
        }
        let artifact = inner.artifact_mut(artifact_id)?;
        artifact.state = VerificationState::Hashing;
        Ok(Some(artifact.path.clone()))
    }

    pub(crate) fn artifact_verified(&self, artifact_id: &str, digests: DigestSet) -> Result<(), EngineFault> {
        let mut inner = self.lock()?;
        if inner.sealed {
            return Ok(());
        }
        let artifact = inner.artifact_mut(artifact_id)?;
        artifact.state = VerificationState::Verified;
        artifact.digests = digests.clone();
        let event = NewAuditEvent::unit(
            AuditEventKind::ArtifactVerified,
            &artifact.unit_id,
            format!("{} verified", artifact.name),
        )
        .with_artifact(artifact_id)
        .with_digests(digests);
        append_event(&self.audit, event)?;
        Ok(())
    }

    pub(crate) fn artifact_failed(&self, artifact_id: &str, reason: impl Into<String>) -> Result<(), EngineFault> {
        let mut inner = self.lock()?;
        if inner.sealed {
            return Ok(());
        }
        Self::fail_artifact(&self.audit, &mut inner, artifact_id, reason.into())
    }

    fn fail_artifact(
        audit: &AuditLog,
        inner: &mut LedgerInner,
        artifact_id: &str,
        reason: String,
    ) -> Result<(), EngineFault> {
        let artifact = inner.artifact_mut(artifact_id)?;
        artifact.state = VerificationState::Failed;
        artifact.failure = Some(reason.clone());
        warn!("[{}] artifact {} failed: {}", artifact.unit_id, artifact.name, reason);
        let event = NewAuditEvent::unit(AuditEventKind::ArtifactFailed, &artifact.unit_id, reason)
            .with_artifact(artifact_id);
        append_event(audit, event)?;
        Ok(())
    }

    /// Fail every artifact that never finished hashing and refuse further
    /// artifact updates.
    pub(crate) fn seal(&self) -> Result<(), EngineFault> {
        let mut inner = self.lock()?;
        let leftovers: Vec<String> = inner
            .artifacts
            .iter()
            .filter(|a| !a.state.is_terminal())
            .map(|a| a.id.clone())
            .collect();
        for id in leftovers {
            Self::fail_artifact(
                &self.audit,
                &mut inner,
                &id,
                "hashing did not complete before the run ended".to_string(),
            )?;
        }
        inner.sealed = true;
        Ok(())
    }

    /// After a cancel wait expired: units that never started become
    /// `cancelled`, units still in flight become `timed_out`.
    pub(crate) fn expire_in_flight(&self, waited: Duration) -> Result<Vec<String>, EngineFault> {
        let pending: Vec<(String, UnitState)> = self
            .lock()?
            .units
            .iter()
            .filter(|u| !u.state.is_terminal())
            .map(|u| (u.unit_id.clone(), u.state))
            .collect();

        let mut timed_out = Vec::new();
        for (unit_id, state) in pending {
            if state == UnitState::Pending {
                self.unit_failed(&unit_id, FailureKind::Cancelled, "run cancelled before the unit started")?;
            } else {
                self.unit_failed(
                    &unit_id,
                    FailureKind::TimedOut,
                    format!("did not stop within {:?} of cancellation", waited),
                )?;
                timed_out.push(unit_id);
            }
        }
        Ok(timed_out)
    }

    pub(crate) fn snapshot(&self) -> Result<(Vec<UnitRecord>, Vec<Artifact>), EngineFault> {
        let inner = self.lock()?;
        Ok((inner.units.clone(), inner.artifacts.clone()))
    }
}

/// Engine side of a unit's `ArtifactSink`.
///
/// Closing the handler drops the hashing queue sender, which lets the unit's
/// hashing worker drain and exit even if the unit kept a sink clone around.
pub(crate) struct UnitArtifactHandler {
    ledger: Arc<RunLedger>,
    queue: Mutex<Option<UnboundedSender<String>>>,
}

impl UnitArtifactHandler {
    pub(crate) fn new(ledger: Arc<RunLedger>, queue: UnboundedSender<String>) -> Self {
        Self {
            ledger,
            queue: Mutex::new(Some(queue)),
        }
    }

    pub(crate) fn close(&self) {
        if let Ok(mut queue) = self.queue.lock() {
            queue.take();
        }
    }
}

impl ArtifactHandler for UnitArtifactHandler {
    fn accept(&self, unit_id: &str, name: &str, path: &Path, size: u64) -> Result<String, UnitError> {
        let queue = self
            .queue
            .lock()
            .map_err(|_| UnitError::new(FailureKind::Unknown, "artifact queue lock poisoned"))?;
        let tx = queue
            .as_ref()
            .ok_or_else(|| UnitError::new(FailureKind::Unknown, "artifact submitted after the unit returned"))?;

        let id = match self.ledger.artifact_discovered(unit_id, name, path, size) {
            Ok(id) => id,
            Err(fault) => {
                let detail = format!("engine fault: {}", fault);
                self.ledger.record_fault(fault);
                return Err(UnitError::new(FailureKind::Unknown, detail));
            }
        };

        // A closed worker leaves the artifact pending; finalize fails it.
        if tx.send(id.clone()).is_err() {
            warn!("[{}] hashing worker is gone, {} will not be hashed", unit_id, id);
        }
        Ok(id)
    }
}
