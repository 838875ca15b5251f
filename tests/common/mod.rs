//! Scripted collection units and helpers shared by the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use evidence_collector::collectors::{CollectionUnit, PrepareContext, UnitContext, UnitRegistry};
use evidence_collector::config::RunConfig;
use evidence_collector::engine::{Engine, RunHandle};
use evidence_collector::errors::{FailureKind, PrepareError, UnitError};
use evidence_collector::models::{ResourceClass, UnitState, UnitSummary};
use evidence_collector::privileges::StaticPrivileges;
use evidence_collector::utils::hash::HashAlgorithm;

#[derive(Clone, Copy, Debug)]
pub enum Behavior {
    /// Write and submit `count` files, sleeping `delay_ms` before each
    Files { count: usize, delay_ms: u64 },
    PrepareFails(FailureKind),
    Panics,
    /// Block until cancelled, then report it
    WaitForCancel,
    /// Sleep for a minute regardless of cancellation
    IgnoreCancel,
    /// Wait for cancellation, then write one file and report success anyway
    FinishAfterCancel,
    /// Block the worker thread for `secs` without yielding
    BlockThread { secs: u64 },
    /// Submit two files and delete the second before it can be hashed
    VanishingFile,
}

#[derive(Clone, Debug)]
pub struct Script {
    pub id: &'static str,
    pub class: ResourceClass,
    pub requires_privilege: bool,
    pub behavior: Behavior,
}

impl Script {
    pub fn new(id: &'static str, class: ResourceClass, behavior: Behavior) -> Self {
        Self {
            id,
            class,
            requires_privilege: false,
            behavior,
        }
    }

    pub fn privileged(mut self) -> Self {
        self.requires_privilege = true;
        self
    }
}

#[derive(Default, Debug)]
pub struct Counters {
    pub prepared: AtomicUsize,
    pub ran: AtomicUsize,
}

impl Counters {
    pub fn prepared(&self) -> usize {
        self.prepared.load(Ordering::SeqCst)
    }

    pub fn ran(&self) -> usize {
        self.ran.load(Ordering::SeqCst)
    }
}

pub struct ScriptedUnit {
    script: Script,
    counters: Arc<Counters>,
}

pub fn file_content(unit_id: &str, index: usize) -> Vec<u8> {
    format!("{} evidence item {}\n", unit_id, index).repeat(64).into_bytes()
}

fn write(path: &Path, content: &[u8]) -> Result<(), UnitError> {
    std::fs::write(path, content).map_err(|e| UnitError::from_io("failed to write evidence", &e))
}

#[async_trait]
impl CollectionUnit for ScriptedUnit {
    fn id(&self) -> &str {
        self.script.id
    }

    fn display_name(&self) -> &str {
        self.script.id
    }

    fn resource_class(&self) -> ResourceClass {
        self.script.class
    }

    fn requires_privilege(&self) -> bool {
        self.script.requires_privilege
    }

    async fn prepare(&self, _ctx: &PrepareContext) -> Result<(), PrepareError> {
        self.counters.prepared.fetch_add(1, Ordering::SeqCst);
        match self.script.behavior {
            Behavior::PrepareFails(kind) => Err(PrepareError::new(kind, "scripted precondition failure")),
            _ => Ok(()),
        }
    }

    async fn run(&self, ctx: UnitContext) -> Result<UnitSummary, UnitError> {
        self.counters.ran.fetch_add(1, Ordering::SeqCst);
        match self.script.behavior {
            Behavior::Files { count, delay_ms } => {
                for i in 0..count {
                    if delay_ms > 0 {
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                    }
                    ctx.check_cancelled()?;
                    let name = format!("item-{}.bin", i);
                    write(&ctx.output_dir.join(&name), &file_content(self.script.id, i))?;
                    ctx.artifacts.submit(&name, &name)?;
                    ctx.progress.report(((i + 1) * 100 / count) as u8, name);
                }
                Ok(UnitSummary {
                    message: Some(format!("{} file(s) written", count)),
                    items_examined: count as u64,
                })
            }
            Behavior::PrepareFails(_) => Ok(UnitSummary::default()),
            Behavior::Panics => panic!("scripted unit exploded"),
            Behavior::WaitForCancel => {
                ctx.cancel.cancelled().await;
                Err(UnitError::cancelled())
            }
            Behavior::IgnoreCancel => {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(UnitSummary::default())
            }
            Behavior::FinishAfterCancel => {
                ctx.cancel.cancelled().await;
                tokio::time::sleep(Duration::from_millis(100)).await;
                write(&ctx.output_dir.join("late.bin"), &file_content(self.script.id, 0))?;
                ctx.artifacts.submit("late", "late.bin")?;
                Ok(UnitSummary {
                    message: Some("finished after cancellation".to_string()),
                    items_examined: 1,
                })
            }
            Behavior::BlockThread { secs } => {
                std::thread::sleep(Duration::from_secs(secs));
                Ok(UnitSummary::default())
            }
            Behavior::VanishingFile => {
                write(&ctx.output_dir.join("keep.bin"), b"kept")?;
                write(&ctx.output_dir.join("gone.bin"), b"gone")?;
                ctx.artifacts.submit("keep", "keep.bin")?;
                ctx.artifacts.submit("gone", "gone.bin")?;
                std::fs::remove_file(ctx.output_dir.join("gone.bin"))
                    .map_err(|e| UnitError::from_io("failed to remove", &e))?;
                Ok(UnitSummary::default())
            }
        }
    }
}

/// Engine over the scripted units, plus each unit's call counters
pub fn engine_with(scripts: &[Script], elevated: bool) -> (Engine, HashMap<&'static str, Arc<Counters>>) {
    let mut registry = UnitRegistry::new();
    let mut counters = HashMap::new();

    for script in scripts {
        let shared = Arc::new(Counters::default());
        counters.insert(script.id, Arc::clone(&shared));

        let script = script.clone();
        registry.register(script.id, move || {
            Arc::new(ScriptedUnit {
                script: script.clone(),
                counters: Arc::clone(&shared),
            })
        });
    }

    (Engine::new(registry, Arc::new(StaticPrivileges(elevated))), counters)
}

pub fn run_config(dir: &Path, units: &[&str]) -> RunConfig {
    let mut config = RunConfig::new(dir, units);
    config.hash_algorithms = vec![HashAlgorithm::Md5, HashAlgorithm::Sha256];
    config.max_concurrency = Some(4);
    config
}

/// Poll until `unit_id` reaches `state`
pub async fn wait_for_state(handle: &RunHandle, unit_id: &str, state: UnitState) {
    for _ in 0..1000 {
        if handle
            .unit_states()
            .iter()
            .any(|(id, current)| id == unit_id && *current == state)
        {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("unit {} never reached {:?}", unit_id, state);
}
