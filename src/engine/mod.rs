//! Orchestration engine.
//!
//! Turns a selection of collection units into a supervised run:
//!
//! 1. [`Engine::configure`] validates the selection and the destination,
//!    opens the run's audit log and records `run-started`.
//! 2. [`ConfiguredRun::start`] schedules every unit under the resource
//!    rules and returns a [`RunHandle`].
//! 3. [`RunHandle::finalize`] waits for every unit, records `run-completed`
//!    and writes the manifest.
//!
//! ## Usage Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use evidence_collector::collectors::UnitRegistry;
//! use evidence_collector::config::RunConfig;
//! use evidence_collector::engine::Engine;
//! use evidence_collector::privileges::SystemPrivileges;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let engine = Engine::new(UnitRegistry::with_builtin_units(&[]), Arc::new(SystemPrivileges));
//! let run = engine.configure(RunConfig::new("/cases/001/run", &["live_system", "network"]))?;
//! let outcome = run.start().finalize().await?;
//! println!("{}: {}", outcome.status, outcome.manifest_path.display());
//! # Ok(())
//! # }
//! ```

mod handle;
mod hashing;
mod ledger;
mod scheduler;

use std::collections::HashSet;
use std::fs;
use std::sync::Arc;

use chrono::Utc;
use log::{debug, info};
use uuid::Uuid;

use crate::audit::{AuditEventKind, AuditLog, NewAuditEvent};
use crate::collectors::UnitRegistry;
use crate::config::RunConfig;
use crate::constants::{AUDIT_LOG_FILE_NAME, WRITE_PROBE_FILE_NAME};
use crate::errors::ConfigError;
use crate::models::{RunState, UnitRecord};
use crate::privileges::PrivilegeProbe;

use handle::RunMeta;
use ledger::RunLedger;
use scheduler::{spawn_units, RunContext, UnitJob};

pub use handle::{RunHandle, RunOutcome};

/// Entry point for collection runs
pub struct Engine {
    registry: UnitRegistry,
    privileges: Arc<dyn PrivilegeProbe>,
}

impl Engine {
    pub fn new(registry: UnitRegistry, privileges: Arc<dyn PrivilegeProbe>) -> Self {
        Self { registry, privileges }
    }

    pub fn registry(&self) -> &UnitRegistry {
        &self.registry
    }

    /// Validate a run request and claim its output directory.
    ///
    /// Nothing is collected yet, but on success the audit log exists and
    /// holds `run-started`.
    pub fn configure(&self, config: RunConfig) -> Result<ConfiguredRun, ConfigError> {
        if config.units.is_empty() {
            return Err(ConfigError::EmptySelection);
        }
        let mut seen = HashSet::new();
        for id in &config.units {
            if !seen.insert(id.as_str()) {
                return Err(ConfigError::DuplicateUnit(id.clone()));
            }
            if !self.registry.contains(id) {
                return Err(ConfigError::UnknownUnit(id.clone()));
            }
        }

        let mut hash_algorithms = config.hash_algorithms.clone();
        hash_algorithms.sort();
        hash_algorithms.dedup();
        if hash_algorithms.is_empty() {
            return Err(ConfigError::NoHashAlgorithms);
        }

        let not_writable = |source: std::io::Error| ConfigError::NotWritable {
            path: config.output_dir.clone(),
            source,
        };
        fs::create_dir_all(&config.output_dir).map_err(not_writable)?;
        if config.output_dir.join(AUDIT_LOG_FILE_NAME).exists() {
            return Err(ConfigError::OutputInUse(config.output_dir.clone()));
        }
        let probe = config.output_dir.join(WRITE_PROBE_FILE_NAME);
        fs::write(&probe, b"probe").map_err(not_writable)?;
        fs::remove_file(&probe).map_err(not_writable)?;
        let output_dir = config.output_dir.canonicalize().map_err(not_writable)?;

        let mut jobs = Vec::with_capacity(config.units.len());
        let mut records = Vec::with_capacity(config.units.len());
        for id in &config.units {
            let unit = self
                .registry
                .instantiate(id)
                .ok_or_else(|| ConfigError::UnknownUnit(id.clone()))?;
            records.push(UnitRecord::pending(id, unit.display_name(), unit.version(), unit.resource_class()));
            jobs.push(UnitJob {
                id: id.clone(),
                unit,
                options: config.options_for(id),
            });
        }

        let audit = Arc::new(AuditLog::create(&output_dir.join(AUDIT_LOG_FILE_NAME))?);
        let run_id = Uuid::new_v4();
        let hostname = hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string());
        let concurrency = config.effective_concurrency();
        let case = config.case.clone().with_default_examiner();

        let algorithms = hash_algorithms
            .iter()
            .map(|a| a.as_str())
            .collect::<Vec<_>>()
            .join(", ");
        audit.append(NewAuditEvent::run(
            AuditEventKind::RunStarted,
            format!(
                "run {} on {} by collector {} ({}): units [{}], hashes [{}], concurrency {}",
                run_id,
                hostname,
                env!("CARGO_PKG_VERSION"),
                case,
                config.units.join(", "),
                algorithms,
                concurrency
            ),
        ))?;
        info!("Configured run {} into {}", run_id, output_dir.display());

        let started_at = audit
            .snapshot()?
            .first()
            .map(|e| e.timestamp)
            .unwrap_or_else(Utc::now);

        Ok(ConfiguredRun {
            ledger: Arc::new(RunLedger::new(audit, records)),
            jobs,
            privileges: Arc::clone(&self.privileges),
            concurrency,
            meta: RunMeta {
                run_id,
                hostname,
                started_at,
                output_dir,
                hash_algorithms,
                cancel_timeout: config.cancel_timeout,
                case,
            },
        })
    }
}

/// A validated run that has not started collecting
pub struct ConfiguredRun {
    ledger: Arc<RunLedger>,
    jobs: Vec<UnitJob>,
    privileges: Arc<dyn PrivilegeProbe>,
    concurrency: usize,
    meta: RunMeta,
}

impl ConfiguredRun {
    pub fn run_id(&self) -> Uuid {
        self.meta.run_id
    }

    pub fn state(&self) -> RunState {
        RunState::Configured
    }

    pub fn output_dir(&self) -> &std::path::Path {
        &self.meta.output_dir
    }

    /// Begin collection. Must be called from within a tokio runtime.
    pub fn start(self) -> RunHandle {
        let (progress_tx, progress_rx) = tokio::sync::mpsc::unbounded_channel();
        let (done_tx, done_rx) = tokio::sync::mpsc::channel(1);
        debug!(
            "Starting run {} with {} unit(s), concurrency {}",
            self.meta.run_id,
            self.jobs.len(),
            self.concurrency
        );

        let ctx = RunContext {
            ledger: Arc::clone(&self.ledger),
            semaphore: Arc::new(tokio::sync::Semaphore::new(self.concurrency)),
            privileges: self.privileges,
            output_dir: self.meta.output_dir.clone(),
            algorithms: Arc::from(self.meta.hash_algorithms.clone()),
            progress: progress_tx,
        };
        let tasks = spawn_units(ctx, self.jobs, done_tx);

        RunHandle {
            ledger: self.ledger,
            tasks,
            done: done_rx,
            progress: Some(progress_rx),
            meta: self.meta,
        }
    }
}
