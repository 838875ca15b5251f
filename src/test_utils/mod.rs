//! Test utilities for evidence-collector
//!
//! Common helpers for unit tests: temp files and a harness that gives a
//! collection unit a real `UnitContext` without running the engine.

#![cfg(test)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use anyhow::Result;
use tempfile::{NamedTempFile, TempDir};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio_util::sync::CancellationToken;

use crate::collectors::unit::{ArtifactHandler, ArtifactSink, ProgressSink, UnitContext};
use crate::errors::UnitError;
use crate::models::ProgressEvent;

/// Creates a temporary directory that is automatically cleaned up
pub fn create_temp_dir() -> Result<TempDir> {
    Ok(TempDir::new()?)
}

/// Creates a temporary file with the given content
pub fn create_temp_file(content: &[u8]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    use std::io::Write;
    file.write_all(content)?;
    file.flush()?;
    Ok(file)
}

/// Accepts every artifact and remembers it
#[derive(Default)]
pub struct RecordingHandler {
    pub accepted: Mutex<Vec<(String, PathBuf, u64)>>,
}

impl ArtifactHandler for RecordingHandler {
    fn accept(&self, _unit_id: &str, name: &str, path: &Path, size: u64) -> Result<String, UnitError> {
        let mut accepted = self.accepted.lock().unwrap();
        accepted.push((name.to_string(), path.to_path_buf(), size));
        Ok(format!("artifact-{}", accepted.len()))
    }
}

/// A unit output directory plus the sinks a unit expects
pub struct TestUnitHarness {
    unit_id: String,
    dir: TempDir,
    handler: Arc<RecordingHandler>,
    progress_tx: UnboundedSender<ProgressEvent>,
    progress_rx: Mutex<UnboundedReceiver<ProgressEvent>>,
}

impl TestUnitHarness {
    pub fn new(unit_id: &str) -> Self {
        let (progress_tx, progress_rx) = mpsc::unbounded_channel();
        Self {
            unit_id: unit_id.to_string(),
            dir: create_temp_dir().unwrap(),
            handler: Arc::new(RecordingHandler::default()),
            progress_tx,
            progress_rx: Mutex::new(progress_rx),
        }
    }

    pub fn dir(&self) -> &Path {
        self.dir.path()
    }

    /// Fresh context with its own cancellation token
    pub fn context(&self) -> UnitContext {
        UnitContext {
            unit_id: self.unit_id.clone(),
            output_dir: self.dir.path().to_path_buf(),
            options: HashMap::new(),
            progress: ProgressSink::new(&self.unit_id, self.progress_tx.clone()),
            artifacts: ArtifactSink::new(&self.unit_id, self.dir.path(), self.handler.clone()),
            cancel: CancellationToken::new(),
        }
    }

    pub fn accepted_names(&self) -> Vec<String> {
        self.handler
            .accepted
            .lock()
            .unwrap()
            .iter()
            .map(|(name, _, _)| name.clone())
            .collect()
    }

    /// Progress percentages reported so far
    pub fn progress_percents(&self) -> Vec<u8> {
        let mut rx = self.progress_rx.lock().unwrap();
        std::iter::from_fn(|| rx.try_recv().ok()).map(|e| e.percent).collect()
    }
}
