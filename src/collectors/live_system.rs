//! Live system state unit.
//!
//! Captures host identity, running processes, memory usage and mounted
//! volumes as JSON. Reading this state does not contend for disk or memory
//! bandwidth in any meaningful way, so the unit is `lightweight`.

use async_trait::async_trait;

use crate::collectors::unit::{CollectionUnit, PrepareContext, UnitContext};
use crate::collectors::volatile::{run_snapshot_steps, SnapshotKind};
use crate::errors::{FailureKind, PrepareError, UnitError};
use crate::models::{ResourceClass, UnitSummary};

pub const LIVE_SYSTEM_UNIT_ID: &str = "live_system";

const STEPS: [SnapshotKind; 4] = [
    SnapshotKind::SystemInfo,
    SnapshotKind::Processes,
    SnapshotKind::Memory,
    SnapshotKind::Disks,
];

#[derive(Debug, Default)]
pub struct LiveSystemUnit;

impl LiveSystemUnit {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CollectionUnit for LiveSystemUnit {
    fn id(&self) -> &str {
        LIVE_SYSTEM_UNIT_ID
    }

    fn display_name(&self) -> &str {
        "Live System State"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Lightweight
    }

    async fn prepare(&self, ctx: &PrepareContext) -> Result<(), PrepareError> {
        if !ctx.output_dir.is_dir() {
            return Err(PrepareError::new(
                FailureKind::IoFailure,
                format!("output directory {} does not exist", ctx.output_dir.display()),
            ));
        }
        Ok(())
    }

    async fn run(&self, ctx: UnitContext) -> Result<UnitSummary, UnitError> {
        run_snapshot_steps(&ctx, &STEPS).await
    }
}
