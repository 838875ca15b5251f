//! External tool unit.
//!
//! Wraps a bundled third-party acquisition binary (memory imager, disk
//! imager, hive exporter, ...) behind the unit contract. The engine sees
//! only the declared resource class, progress milestones and the output
//! files the tool is expected to leave in the unit directory.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncReadExt;
use tokio::process::Command;

use crate::collectors::unit::{CollectionUnit, PrepareContext, UnitContext};
use crate::constants::DEFAULT_TOOL_TIMEOUT_SECS;
use crate::errors::{FailureKind, PrepareError, UnitError};
use crate::models::{ResourceClass, UnitSummary};

/// Placeholder in tool arguments replaced by the unit output directory
pub const OUTPUT_DIR_PLACEHOLDER: &str = "{output_dir}";

/// File capturing the tool's standard output
pub const TOOL_STDOUT_FILE: &str = "tool-stdout.log";

/// Maximum stderr bytes carried into a failure reason
const STDERR_TAIL_BYTES: usize = 2048;

/// Configuration-defined external tool invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub id: String,
    pub display_name: String,
    pub program: String,
    #[serde(default)]
    pub args: Vec<String>,
    pub resource_class: ResourceClass,
    #[serde(default)]
    pub requires_privilege: bool,
    /// Files, relative to the unit directory, the tool must produce
    #[serde(default)]
    pub outputs: Vec<String>,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

pub struct ToolUnit {
    definition: ToolDefinition,
}

impl ToolUnit {
    pub fn new(definition: ToolDefinition) -> Self {
        Self { definition }
    }

    fn timeout(&self) -> Duration {
        Duration::from_secs(self.definition.timeout_secs.unwrap_or(DEFAULT_TOOL_TIMEOUT_SECS))
    }

    fn expand_args(&self, output_dir: &Path) -> Vec<String> {
        let dir = output_dir.to_string_lossy();
        self.definition
            .args
            .iter()
            .map(|arg| arg.replace(OUTPUT_DIR_PLACEHOLDER, &dir))
            .collect()
    }
}

/// Locate a program either by explicit path or through `PATH`
pub fn resolve_program(program: &str) -> Option<PathBuf> {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 || candidate.is_absolute() {
        return candidate.is_file().then(|| candidate.to_path_buf());
    }

    let path_var = std::env::var_os("PATH")?;
    std::env::split_paths(&path_var).find_map(|dir| {
        let direct = dir.join(program);
        if direct.is_file() {
            return Some(direct);
        }
        if cfg!(windows) {
            let exe = dir.join(format!("{}.exe", program));
            if exe.is_file() {
                return Some(exe);
            }
        }
        None
    })
}

fn stderr_tail(stderr: &[u8]) -> String {
    let start = stderr.len().saturating_sub(STDERR_TAIL_BYTES);
    String::from_utf8_lossy(&stderr[start..]).trim().to_string()
}

#[async_trait]
impl CollectionUnit for ToolUnit {
    fn id(&self) -> &str {
        &self.definition.id
    }

    fn display_name(&self) -> &str {
        &self.definition.display_name
    }

    fn resource_class(&self) -> ResourceClass {
        self.definition.resource_class
    }

    fn requires_privilege(&self) -> bool {
        self.definition.requires_privilege
    }

    async fn prepare(&self, ctx: &PrepareContext) -> Result<(), PrepareError> {
        if resolve_program(&self.definition.program).is_none() {
            return Err(PrepareError::tool_missing(format!(
                "{} not found",
                self.definition.program
            )));
        }
        if !ctx.output_dir.is_dir() {
            return Err(PrepareError::new(
                FailureKind::IoFailure,
                format!("output directory {} does not exist", ctx.output_dir.display()),
            ));
        }
        Ok(())
    }

    async fn run(&self, ctx: UnitContext) -> Result<UnitSummary, UnitError> {
        ctx.check_cancelled()?;

        let program = resolve_program(&self.definition.program).ok_or_else(|| {
            UnitError::new(FailureKind::ToolMissing, format!("{} not found", self.definition.program))
        })?;
        let stdout_path = ctx.output_dir.join(TOOL_STDOUT_FILE);
        let stdout_file = std::fs::File::create(&stdout_path)
            .map_err(|e| UnitError::from_io("failed to create tool output log", &e))?;

        let args = self.expand_args(&ctx.output_dir);
        debug!("[{}] launching {} {:?}", ctx.unit_id, program.display(), args);

        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(&ctx.output_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::from(stdout_file))
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                let context = format!("failed to launch {}", program.display());
                match e.kind() {
                    std::io::ErrorKind::NotFound => {
                        UnitError::new(FailureKind::ToolMissing, format!("{}: {}", context, e))
                    }
                    _ => UnitError::from_io(&context, &e),
                }
            })?;

        ctx.progress.report(10, format!("{} started", self.definition.display_name));

        let mut stderr = child.stderr.take();
        let stderr_reader = tokio::spawn(async move {
            let mut buffer = Vec::new();
            if let Some(stderr) = stderr.as_mut() {
                let _ = stderr.read_to_end(&mut buffer).await;
            }
            buffer
        });

        let status = tokio::select! {
            status = child.wait() => {
                status.map_err(|e| UnitError::from_io("failed to wait for tool", &e))?
            }
            _ = ctx.cancel.cancelled() => {
                warn!("[{}] cancellation requested, terminating {}", ctx.unit_id, program.display());
                let _ = child.kill().await;
                return Err(UnitError::cancelled());
            }
            _ = tokio::time::sleep(self.timeout()) => {
                warn!("[{}] {} exceeded {:?}, terminating", ctx.unit_id, program.display(), self.timeout());
                let _ = child.kill().await;
                return Err(UnitError::new(
                    FailureKind::TimedOut,
                    format!("{} did not finish within {:?}", self.definition.program, self.timeout()),
                ));
            }
        };

        let stderr = stderr_reader.await.unwrap_or_default();
        if !status.success() {
            let code = status
                .code()
                .map(|c| c.to_string())
                .unwrap_or_else(|| "signal".to_string());
            return Err(UnitError::new(
                FailureKind::Unknown,
                format!("{} exited with {}: {}", self.definition.program, code, stderr_tail(&stderr)),
            ));
        }

        ctx.progress.report(90, format!("{} finished", self.definition.display_name));

        for output in &self.definition.outputs {
            let path = ctx.output_dir.join(output);
            if !path.is_file() {
                return Err(UnitError::io(format!(
                    "{} did not produce expected output {}",
                    self.definition.program, output
                )));
            }
            ctx.artifacts.submit(output, &path)?;
        }
        ctx.artifacts.submit("tool standard output", &stdout_path)?;

        ctx.progress.report(100, "Outputs handed off for hashing");
        info!(
            "[{}] {} completed with {} declared output(s)",
            ctx.unit_id,
            self.definition.program,
            self.definition.outputs.len()
        );

        Ok(UnitSummary {
            message: Some(format!("{} exited successfully", self.definition.program)),
            items_examined: self.definition.outputs.len() as u64,
        })
    }
}
