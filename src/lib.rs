//! # evidence-collector
//!
//! Live response evidence collection engine with a tamper-evident audit
//! trail.
//!
//! ## Overview
//!
//! A run executes a selection of collection units (live system state,
//! network state, external imaging tools) under resource-aware scheduling.
//! Every produced file is hashed with the configured algorithms and every
//! lifecycle transition is appended to a hash-chained, durably written audit
//! log. A run ends with a JSON manifest whose head hash anchors that log.
//!
//! ## Features
//!
//! - **Resource-aware scheduling**: exclusive disk and memory units never overlap
//! - **Streaming multi-digest hashing**: MD5, SHA-1 and SHA-256 in one pass
//! - **Hash-chained audit log**: JSON Lines, synced before each append returns
//! - **Cooperative cancellation**: bounded wait, stragglers marked timed out
//! - **Offline verification**: re-check a run directory after the fact
//! - **Evidence packaging**: ZIP the run directory with its archive hash logged
//!
//! ## Usage
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
//! let mut handle = engine
//!     .configure(RunConfig::new("/cases/001/run", &["live_system", "network"]))?
//!     .start();
//!
//! if let Some(mut progress) = handle.progress() {
//!     tokio::spawn(async move {
//!         while let Some(event) = progress.recv().await {
//!             println!("{} {}%", event.unit_id, event.percent);
//!         }
//!     });
//! }
//!
//! let outcome = handle.finalize().await?;
//! println!("Run finished: {}", outcome.status);
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`cli`]: Command-line interface definitions and argument parsing
//! - [`models`]: Core data models and structures
//! - [`collectors`]: Collection unit contract, registry and built-in units
//! - [`engine`]: Run configuration, scheduling, cancellation and finalization
//! - [`audit`]: Hash-chained audit log
//! - [`config`]: YAML configuration and run settings
//! - [`utils`]: Hashing, manifest and packaging
//! - [`verify`]: Offline verification of finished runs
//! - [`privileges`]: Platform-specific privilege detection
//! - [`errors`]: Error taxonomy
//! - [`constants`]: Application-wide constants
//!
//! ## Safety
//!
//! `unsafe` is limited to the privilege probes, which call
//! `geteuid` on Unix and `IsUserAnAdmin` on Windows.

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Core data models and structures used throughout the application
pub mod models;

/// Collection unit contract, registry and built-in units
pub mod collectors;

/// Orchestration engine
pub mod engine;

/// Hash-chained audit log
pub mod audit;

/// Hashing, manifest and packaging utilities
pub mod utils;

/// Configuration management
pub mod config;

/// Platform-specific privilege detection
pub mod privileges;

/// Error taxonomy
pub mod errors;

/// Offline verification of finished runs
pub mod verify;

/// Application constants and configuration values
pub mod constants;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
