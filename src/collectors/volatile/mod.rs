//! Live host state snapshots
//!
//! Helpers shared by the built-in live units to capture:
//! - System information
//! - Running processes
//! - Network interfaces
//! - Memory usage
//! - Disk information
//!
//! The data is read through the sysinfo crate and stored in JSON format.

mod collector;
pub mod models;

use std::path::Path;

use anyhow::Result;
use log::info;

pub use collector::{save_to_json, HostSnapshotter};

use crate::collectors::unit::UnitContext;
use crate::errors::{FailureKind, UnitError};
use crate::models::UnitSummary;

/// One JSON snapshot a live unit can produce
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnapshotKind {
    SystemInfo,
    Processes,
    NetworkInterfaces,
    Memory,
    Disks,
}

impl SnapshotKind {
    pub fn file_name(self) -> &'static str {
        match self {
            Self::SystemInfo => "system-info.json",
            Self::Processes => "processes.json",
            Self::NetworkInterfaces => "network-interfaces.json",
            Self::Memory => "memory.json",
            Self::Disks => "disks.json",
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SystemInfo => "system information",
            Self::Processes => "process list",
            Self::NetworkInterfaces => "network interfaces",
            Self::Memory => "memory usage",
            Self::Disks => "disk volumes",
        }
    }
}

/// Capture one snapshot into `path`
pub fn capture(snapshotter: &mut HostSnapshotter, kind: SnapshotKind, path: &Path) -> Result<()> {
    match kind {
        SnapshotKind::SystemInfo => save_to_json(&snapshotter.system_info(), path),
        SnapshotKind::Processes => save_to_json(&snapshotter.processes(), path),
        SnapshotKind::NetworkInterfaces => save_to_json(&snapshotter.network_interfaces(), path),
        SnapshotKind::Memory => save_to_json(&snapshotter.memory(), path),
        SnapshotKind::Disks => save_to_json(&snapshotter.disks(), path),
    }
}

/// Capture each snapshot in order, submitting every file once written.
///
/// Cancellation is checked between snapshots; a snapshot already being
/// written is finished and submitted, later ones are never started.
pub async fn run_snapshot_steps(
    ctx: &UnitContext,
    kinds: &[SnapshotKind],
) -> Result<UnitSummary, UnitError> {
    ctx.check_cancelled()?;
    ctx.progress.report(0, "Reading host state");

    let mut snapshotter = tokio::task::spawn_blocking(HostSnapshotter::new)
        .await
        .map_err(|e| UnitError::new(FailureKind::Unknown, e.to_string()))?;

    for (index, kind) in kinds.iter().copied().enumerate() {
        ctx.check_cancelled()?;

        let path = ctx.output_dir.join(kind.file_name());
        let target = path.clone();
        let (returned, result) = tokio::task::spawn_blocking(move || {
            let result = capture(&mut snapshotter, kind, &target);
            (snapshotter, result)
        })
        .await
        .map_err(|e| UnitError::new(FailureKind::Unknown, e.to_string()))?;
        snapshotter = returned;

        result.map_err(|e| UnitError::io(format!("failed to capture {}: {:#}", kind.label(), e)))?;
        ctx.artifacts.submit(kind.label(), &path)?;

        let percent = ((index + 1) * 100 / kinds.len().max(1)) as u8;
        ctx.progress.report(percent, format!("Captured {}", kind.label()));
    }

    info!("[{}] captured {} snapshot(s)", ctx.unit_id, kinds.len());
    Ok(UnitSummary {
        message: Some(format!("{} snapshot(s) captured", kinds.len())),
        items_examined: kinds.len() as u64,
    })
}
