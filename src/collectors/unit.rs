use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use log::debug;
use tokio::sync::mpsc::UnboundedSender;
use tokio_util::sync::CancellationToken;

use crate::errors::{PrepareError, UnitError};
use crate::models::{ProgressEvent, ResourceClass, UnitSummary};
use crate::privileges::PrivilegeProbe;

/// Capability contract every evidence-category collector implements.
///
/// A unit writes only inside its own output directory and hands each
/// artifact to the [`ArtifactSink`] once its final bytes are on disk.
#[async_trait]
pub trait CollectionUnit: Send + Sync {
    fn id(&self) -> &str;

    fn display_name(&self) -> &str;

    fn version(&self) -> &str {
        "1.0"
    }

    fn resource_class(&self) -> ResourceClass;

    fn requires_privilege(&self) -> bool {
        false
    }

    /// Validate preconditions without starting collection
    async fn prepare(&self, ctx: &PrepareContext) -> Result<(), PrepareError>;

    /// Collect. Must return `UnitError { kind: Cancelled }` promptly once
    /// `ctx.cancel` fires, and must not submit artifacts it never finished.
    async fn run(&self, ctx: UnitContext) -> Result<UnitSummary, UnitError>;
}

/// Inputs available to `prepare`
pub struct PrepareContext {
    pub unit_id: String,
    pub output_dir: PathBuf,
    pub options: HashMap<String, String>,
    pub privileges: Arc<dyn PrivilegeProbe>,
}

/// Inputs available to `run`
pub struct UnitContext {
    pub unit_id: String,
    pub output_dir: PathBuf,
    pub options: HashMap<String, String>,
    pub progress: ProgressSink,
    pub artifacts: ArtifactSink,
    pub cancel: CancellationToken,
}

impl UnitContext {
    /// Shorthand for units that poll between steps
    pub fn check_cancelled(&self) -> Result<(), UnitError> {
        if self.cancel.is_cancelled() {
            Err(UnitError::cancelled())
        } else {
            Ok(())
        }
    }
}

/// Per-unit progress reporter feeding the run's ordered progress channel.
///
/// Percentages are clamped to 0..=100 and never move backwards.
#[derive(Clone)]
pub struct ProgressSink {
    unit_id: String,
    last: Arc<AtomicU8>,
    tx: UnboundedSender<ProgressEvent>,
}

impl ProgressSink {
    pub fn new(unit_id: &str, tx: UnboundedSender<ProgressEvent>) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            last: Arc::new(AtomicU8::new(0)),
            tx,
        }
    }

    pub fn report(&self, percent: u8, message: impl Into<String>) {
        let percent = percent.min(100);
        let previous = self.last.fetch_max(percent, Ordering::SeqCst);
        let event = ProgressEvent {
            unit_id: self.unit_id.clone(),
            percent: previous.max(percent),
            message: message.into(),
        };
        // Nobody listening is fine
        let _ = self.tx.send(event);
    }

    pub fn current(&self) -> u8 {
        self.last.load(Ordering::SeqCst)
    }
}

/// Engine-side receiver of validated artifacts
pub trait ArtifactHandler: Send + Sync {
    /// Record discovery and queue for hashing. Returns the artifact id.
    fn accept(&self, unit_id: &str, name: &str, path: &Path, size: u64) -> Result<String, UnitError>;
}

/// Where a unit delivers each finished artifact
#[derive(Clone)]
pub struct ArtifactSink {
    unit_id: String,
    root: PathBuf,
    handler: Arc<dyn ArtifactHandler>,
}

impl ArtifactSink {
    pub fn new(unit_id: &str, root: &Path, handler: Arc<dyn ArtifactHandler>) -> Self {
        Self {
            unit_id: unit_id.to_string(),
            root: root.to_path_buf(),
            handler,
        }
    }

    /// Submit a file the unit has finished writing.
    ///
    /// Relative paths are resolved against the unit's output directory.
    /// The file must exist and lie inside that directory.
    pub fn submit(&self, name: &str, path: impl AsRef<Path>) -> Result<String, UnitError> {
        let path = path.as_ref();
        let path = if path.is_relative() {
            self.root.join(path)
        } else {
            path.to_path_buf()
        };

        let canonical = path
            .canonicalize()
            .map_err(|e| UnitError::io(format!("artifact {} unavailable: {}", path.display(), e)))?;
        let root = self
            .root
            .canonicalize()
            .map_err(|e| UnitError::io(format!("unit output directory unavailable: {}", e)))?;

        if !canonical.starts_with(&root) {
            return Err(UnitError::io(format!(
                "artifact {} is outside the unit output directory {}",
                canonical.display(),
                root.display()
            )));
        }

        let metadata = std::fs::metadata(&canonical)
            .map_err(|e| UnitError::io(format!("failed to stat artifact: {}", e)))?;
        if !metadata.is_file() {
            return Err(UnitError::io(format!("artifact {} is not a regular file", canonical.display())));
        }

        debug!("[{}] artifact ready: {} ({} bytes)", self.unit_id, name, metadata.len());
        self.handler.accept(&self.unit_id, name, &canonical, metadata.len())
    }
}
