//! Unit supervision.
//!
//! Exclusive units share one serial lane in selection order. Every other
//! unit gets its own task. All of them take a semaphore permit for their
//! prepare, run and hash span, which caps total concurrency.

use std::any::Any;
use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::FutureExt;
use log::{debug, info};
use tokio::sync::mpsc::{Sender, UnboundedSender};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::collectors::unit::{ArtifactSink, CollectionUnit, PrepareContext, ProgressSink, UnitContext};
use crate::engine::hashing::{hash_worker, AbortOnDrop};
use crate::engine::ledger::{RunLedger, UnitArtifactHandler};
use crate::errors::{EngineFault, FailureKind, UnitError};
use crate::models::ProgressEvent;
use crate::privileges::{get_elevation_instructions, PrivilegeProbe};
use crate::utils::hash::HashAlgorithm;

/// One selected unit ready to be scheduled
pub(crate) struct UnitJob {
    pub(crate) id: String,
    pub(crate) unit: Arc<dyn CollectionUnit>,
    pub(crate) options: HashMap<String, String>,
}

/// What every unit task needs from the run
#[derive(Clone)]
pub(crate) struct RunContext {
    pub(crate) ledger: Arc<RunLedger>,
    pub(crate) semaphore: Arc<Semaphore>,
    pub(crate) privileges: Arc<dyn PrivilegeProbe>,
    pub(crate) output_dir: PathBuf,
    pub(crate) algorithms: Arc<[HashAlgorithm]>,
    pub(crate) progress: UnboundedSender<ProgressEvent>,
}

/// Spawn the exclusive lane and one task per shared unit.
///
/// Every task holds a clone of `done` until it ends, so the receiving side
/// closes once the last unit task is gone.
pub(crate) fn spawn_units(ctx: RunContext, jobs: Vec<UnitJob>, done: Sender<()>) -> Vec<JoinHandle<()>> {
    let (exclusive, shared): (Vec<UnitJob>, Vec<UnitJob>) = jobs
        .into_iter()
        .partition(|job| job.unit.resource_class().is_exclusive());

    let mut tasks = Vec::with_capacity(shared.len() + 1);

    if !exclusive.is_empty() {
        let lane_ctx = ctx.clone();
        let lane_done = done.clone();
        debug!("Exclusive lane: {} unit(s)", exclusive.len());
        tasks.push(tokio::spawn(async move {
            let _done = lane_done;
            for job in exclusive {
                run_unit(lane_ctx.clone(), job).await;
            }
        }));
    }

    for job in shared {
        let ctx = ctx.clone();
        let done = done.clone();
        tasks.push(tokio::spawn(async move {
            let _done = done;
            run_unit(ctx, job).await
        }));
    }

    tasks
}

/// Supervise one unit; engine faults abort the whole run
pub(crate) async fn run_unit(ctx: RunContext, job: UnitJob) {
    let ledger = Arc::clone(&ctx.ledger);
    if let Err(fault) = drive_unit(ctx, job).await {
        ledger.record_fault(fault);
    }
}

const NOT_STARTED: &str = "run cancelled before the unit started";

async fn drive_unit(ctx: RunContext, job: UnitJob) -> Result<(), EngineFault> {
    let UnitJob { id, unit, options } = job;
    let ledger = &ctx.ledger;

    if ledger.is_cancelled() {
        return ledger.unit_failed(&id, FailureKind::Cancelled, NOT_STARTED);
    }

    let _permit = tokio::select! {
        biased;
        _ = ledger.cancelled() => {
            return ledger.unit_failed(&id, FailureKind::Cancelled, NOT_STARTED);
        }
        permit = Arc::clone(&ctx.semaphore).acquire_owned() => {
            permit.map_err(|e| EngineFault::Scheduler(e.to_string()))?
        }
    };

    if ledger.is_cancelled() {
        return ledger.unit_failed(&id, FailureKind::Cancelled, NOT_STARTED);
    }

    ledger.unit_started(&id)?;

    if unit.requires_privilege() && !ctx.privileges.is_elevated() {
        return ledger.unit_failed(
            &id,
            FailureKind::PermissionDenied,
            format!("requires elevated privileges. {}", get_elevation_instructions()),
        );
    }

    let unit_dir = ctx.output_dir.join(&id);
    if let Err(e) = tokio::fs::create_dir_all(&unit_dir).await {
        let err = UnitError::from_io("failed to create unit output directory", &e);
        return ledger.unit_failed(&id, err.kind, err.detail);
    }

    let prepare_ctx = PrepareContext {
        unit_id: id.clone(),
        output_dir: unit_dir.clone(),
        options: options.clone(),
        privileges: Arc::clone(&ctx.privileges),
    };
    match AssertUnwindSafe(unit.prepare(&prepare_ctx)).catch_unwind().await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return ledger.unit_failed(&id, e.kind, e.reason),
        Err(panic) => {
            return ledger.unit_failed(
                &id,
                FailureKind::Unknown,
                format!("prepare panicked: {}", panic_message(panic.as_ref())),
            );
        }
    }

    if ledger.is_cancelled() {
        return ledger.unit_failed(&id, FailureKind::Cancelled, "run cancelled before collection began");
    }

    ledger.unit_running(&id)?;

    let (queue_tx, queue_rx) = tokio::sync::mpsc::unbounded_channel();
    let mut worker = AbortOnDrop::new(tokio::spawn(hash_worker(
        Arc::clone(ledger),
        queue_rx,
        Arc::clone(&ctx.algorithms),
    )));
    let handler = Arc::new(UnitArtifactHandler::new(Arc::clone(ledger), queue_tx));

    let unit_ctx = UnitContext {
        unit_id: id.clone(),
        output_dir: unit_dir.clone(),
        options,
        progress: ProgressSink::new(&id, ctx.progress.clone()),
        artifacts: ArtifactSink::new(&id, &unit_dir, handler.clone()),
        cancel: ledger.child_token(),
    };

    let outcome = AssertUnwindSafe(unit.run(unit_ctx)).catch_unwind().await;

    // No more submissions; let the worker finish what was queued
    handler.close();
    worker.join().await;

    match outcome {
        Ok(Ok(summary)) => ledger.unit_completed(&id, summary),
        Ok(Err(e)) => ledger.unit_failed(&id, e.kind, e.detail),
        Err(panic) => {
            let message = panic_message(panic.as_ref());
            info!("[{}] panicked: {}", id, message);
            ledger.unit_failed(&id, FailureKind::Unknown, format!("unit panicked: {}", message))
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
