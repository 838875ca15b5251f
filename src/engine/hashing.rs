use std::sync::Arc;

use log::{debug, warn};
use tokio::sync::mpsc::UnboundedReceiver;
use tokio::task::JoinHandle;

use crate::engine::ledger::RunLedger;
use crate::utils::hash::{digest_file, HashAlgorithm};

/// Hash one unit's artifacts in the order they were discovered.
///
/// Exits once the unit's artifact queue is closed and drained. Hashing
/// failures fail the artifact only.
pub(crate) async fn hash_worker(
    ledger: Arc<RunLedger>,
    mut queue: UnboundedReceiver<String>,
    algorithms: Arc<[HashAlgorithm]>,
) {
    while let Some(artifact_id) = queue.recv().await {
        let path = match ledger.artifact_hashing(&artifact_id) {
            Ok(Some(path)) => path,
            Ok(None) => continue,
            Err(fault) => {
                ledger.record_fault(fault);
                return;
            }
        };

        debug!("Hashing {} ({})", artifact_id, path.display());
        let algs = Arc::clone(&algorithms);
        let digested = tokio::task::spawn_blocking(move || digest_file(&path, &algs)).await;

        let recorded = match digested {
            Ok(Ok(digests)) => ledger.artifact_verified(&artifact_id, digests),
            Ok(Err(e)) => {
                warn!("Hashing {} failed: {}", artifact_id, e);
                ledger.artifact_failed(&artifact_id, e.to_string())
            }
            Err(e) => ledger.artifact_failed(&artifact_id, format!("hashing task failed: {}", e)),
        };

        if let Err(fault) = recorded {
            ledger.record_fault(fault);
            return;
        }
    }
}

/// Task handle that aborts its task when dropped.
///
/// Ties a hashing worker's lifetime to the unit task that owns it.
pub(crate) struct AbortOnDrop(Option<JoinHandle<()>>);

impl AbortOnDrop {
    pub(crate) fn new(handle: JoinHandle<()>) -> Self {
        Self(Some(handle))
    }

    /// Wait for the task to finish on its own
    pub(crate) async fn join(&mut self) {
        if let Some(handle) = self.0.as_mut() {
            let _ = handle.await;
        }
        self.0 = None;
    }
}

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        if let Some(handle) = self.0.take() {
            handle.abort();
        }
    }
}
