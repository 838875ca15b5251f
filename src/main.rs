use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{error, info, warn, LevelFilter};
use simplelog::{ColorChoice, CombinedLogger, Config, TermLogger, TerminalMode, WriteLogger};

use evidence_collector::cli::{Args, Commands};
use evidence_collector::collectors::UnitRegistry;
use evidence_collector::config::{load_or_default, CollectionConfig};
use evidence_collector::constants::DIAGNOSTIC_LOG_FILE_NAME;
use evidence_collector::engine::{Engine, RunHandle};
use evidence_collector::models::RunState;
use evidence_collector::privileges::{self, SystemPrivileges};
use evidence_collector::utils::compress::package_run_directory;
use evidence_collector::utils::summary::summary_counts;
use evidence_collector::verify::verify_run;

fn main() -> Result<()> {
    let args = Args::parse();

    if let Some(cmd) = &args.command {
        initialize_logging(args.verbose, None)?;
        return handle_subcommand(cmd);
    }

    let config = load_and_merge_config(&args)?;
    let registry = UnitRegistry::with_builtin_units(&config.tools);

    if args.list_units {
        initialize_logging(args.verbose, None)?;
        return list_units(&registry);
    }

    let run_dir = setup_run_directory(&config)?;
    initialize_logging(args.verbose, Some(&run_dir))?;
    info!("Starting evidence collection into {}", run_dir.display());

    check_privileges(&args)?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to create Tokio runtime")?;
    let status = runtime.block_on(run_collection(registry, &config, &run_dir))?;

    if config.package_evidence {
        match package_run_directory(&run_dir) {
            Ok(package) => info!("Evidence package: {} (SHA-256 {})", package.path.display(), package.sha256),
            Err(e) => warn!("Failed to package evidence: {:#}", e),
        }
    }

    match status {
        RunState::Completed => {
            info!("Collection completed successfully");
            Ok(())
        }
        other => Err(anyhow!("Collection finished with status {}", other)),
    }
}

/// Console logging always; the diagnostic file once the run directory exists
fn initialize_logging(verbose: bool, run_dir: Option<&Path>) -> Result<()> {
    let term_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    let mut loggers: Vec<Box<dyn simplelog::SharedLogger>> = vec![TermLogger::new(
        term_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )];

    if let Some(dir) = run_dir {
        let path = dir.join(DIAGNOSTIC_LOG_FILE_NAME);
        let file = fs::File::create(&path)
            .context(format!("Failed to create diagnostic log {}", path.display()))?;
        loggers.push(WriteLogger::new(LevelFilter::Debug, Config::default(), file));
    }

    CombinedLogger::init(loggers).context("Failed to initialize logger")?;
    Ok(())
}

fn handle_subcommand(cmd: &Commands) -> Result<()> {
    match cmd {
        Commands::InitConfig { path } => {
            info!("Creating default configuration file at {}", path.display());
            CollectionConfig::create_default_config_file(path)?;
            info!("Configuration created successfully");
            Ok(())
        }
        Commands::Verify { path } => {
            let report = verify_run(path)?;
            for mismatch in &report.mismatches {
                warn!("{} ({}): {}", mismatch.artifact_id, mismatch.path.display(), mismatch.reason);
            }
            if report.is_clean() {
                info!("Verification passed for run {}", report.run_id);
                Ok(())
            } else {
                Err(anyhow!("Verification failed for run {}", report.run_id))
            }
        }
    }
}

/// Load the config file and apply command-line overrides
fn load_and_merge_config(args: &Args) -> Result<CollectionConfig> {
    let mut config = load_or_default(args.config.as_deref())?;

    if let Some(output) = &args.output {
        config.output_directory = output.clone();
    }
    if let Some(units) = &args.units {
        config.units = units.clone();
    }
    if let Some(algorithms) = &args.hash_algorithms {
        config.hash_algorithms = algorithms.clone();
    }
    if args.max_concurrency.is_some() {
        config.max_concurrency = args.max_concurrency;
    }
    if let Some(timeout) = args.cancel_timeout {
        config.cancel_timeout_secs = timeout;
    }
    if args.package {
        config.package_evidence = true;
    }
    if args.case_number.is_some() || args.examiner.is_some() || args.evidence_number.is_some() {
        let case = config.case.get_or_insert_with(Default::default);
        if let Some(number) = &args.case_number {
            case.case_number = Some(number.clone());
        }
        if let Some(examiner) = &args.examiner {
            case.examiner = Some(examiner.clone());
        }
        if let Some(number) = &args.evidence_number {
            case.evidence_number = Some(number.clone());
        }
    }
    Ok(config)
}

fn list_units(registry: &UnitRegistry) -> Result<()> {
    for id in registry.ids() {
        if let Some(unit) = registry.instantiate(&id) {
            let privilege = if unit.requires_privilege() { ", requires elevation" } else { "" };
            println!("{:<16} {} ({}{})", id, unit.display_name(), unit.resource_class(), privilege);
        }
    }
    Ok(())
}

fn check_privileges(args: &Args) -> Result<()> {
    if !privileges::is_elevated() {
        warn!("Running without elevated privileges - units that need them will fail");

        if !args.force {
            return Err(anyhow!(
                "Elevated privileges required. {} or use --force to continue anyway",
                privileges::get_elevation_instructions()
            ));
        }
    }
    Ok(())
}

/// Each run gets `<output>/<hostname>-<timestamp>`
fn setup_run_directory(config: &CollectionConfig) -> Result<PathBuf> {
    let hostname = hostname::get()
        .map_err(|e| anyhow!("Failed to get hostname: {}", e))?
        .to_string_lossy()
        .to_string();
    let timestamp = chrono::Utc::now().format("%Y%m%d-%H%M%S").to_string();

    let run_dir = config.output_directory.join(format!("{}-{}", hostname, timestamp));
    fs::create_dir_all(&run_dir).context("Failed to create output directory")?;
    Ok(run_dir)
}

async fn run_collection(registry: UnitRegistry, config: &CollectionConfig, run_dir: &Path) -> Result<RunState> {
    let engine = Engine::new(registry, Arc::new(SystemPrivileges));
    let run = engine
        .configure(config.to_run_config(run_dir))
        .context("Invalid collection request")?;
    info!("Run {} configured", run.run_id());

    let mut handle = run.start();
    let progress = spawn_progress_logger(&mut handle);

    let interrupted = tokio::select! {
        _ = handle.wait() => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    let mut abandoned = false;
    if interrupted {
        warn!("Interrupt received, cancelling collection");
        let timed_out = handle.cancel_and_wait().await;
        if !timed_out.is_empty() {
            warn!("Units abandoned after cancel timeout: {}", timed_out.join(", "));
            abandoned = true;
        }
    }

    let outcome = handle.finalize().await.context("Collection aborted by engine fault")?;
    if let Some(progress) = progress {
        // Abandoned units may still hold the progress feed open
        if abandoned {
            progress.abort();
        } else {
            let _ = progress.await;
        }
    }

    let counts = summary_counts(&outcome.manifest);
    info!(
        "Units: {} total, {} completed, {} failed",
        counts.units_total, counts.units_completed, counts.units_failed
    );
    info!(
        "Artifacts: {} verified ({} bytes), {} failed",
        counts.artifacts_verified, counts.bytes_verified, counts.artifacts_failed
    );
    for unit in outcome.manifest.units.iter().filter(|u| u.failure.is_some()) {
        if let Some(failure) = &unit.failure {
            error!("{} failed ({}): {}", unit.unit_id, failure.kind, failure.reason);
        }
    }
    info!("Manifest: {}", outcome.manifest_path.display());
    info!("Audit log: {}", outcome.audit_log_path.display());

    Ok(outcome.status)
}

fn spawn_progress_logger(handle: &mut RunHandle) -> Option<tokio::task::JoinHandle<()>> {
    let mut rx = handle.progress()?;
    Some(tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            info!("[{}] {:>3}% {}", event.unit_id, event.percent, event.message);
        }
    }))
}

