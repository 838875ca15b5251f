//! Network state unit.
//!
//! Captures interface traffic counters as JSON.

use async_trait::async_trait;

use crate::collectors::unit::{CollectionUnit, PrepareContext, UnitContext};
use crate::collectors::volatile::{run_snapshot_steps, SnapshotKind};
use crate::errors::{FailureKind, PrepareError, UnitError};
use crate::models::{ResourceClass, UnitSummary};

pub const NETWORK_UNIT_ID: &str = "network";

#[derive(Debug, Default)]
pub struct NetworkUnit;

impl NetworkUnit {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CollectionUnit for NetworkUnit {
    fn id(&self) -> &str {
        NETWORK_UNIT_ID
    }

    fn display_name(&self) -> &str {
        "Network State"
    }

    fn resource_class(&self) -> ResourceClass {
        ResourceClass::Network
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
        run_snapshot_steps(&ctx, &[SnapshotKind::NetworkInterfaces]).await
    }
}
