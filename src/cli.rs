use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::utils::hash::HashAlgorithm;

/// Command-line arguments for the evidence collector.
///
/// Flags override the values loaded from the configuration file.
#[derive(Parser, Debug)]
#[clap(name = "evidence-collector", about = "Live response evidence collector with hash-chained audit log")]
pub struct Args {
    /// Path to configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Parent output directory (a per-run folder is created inside it)
    #[clap(short, long)]
    pub output: Option<PathBuf>,

    /// Units to run, comma-separated, in scheduling order
    #[clap(short = 'u', long, value_delimiter = ',')]
    pub units: Option<Vec<String>>,

    /// Hash algorithms, comma-separated (md5, sha1, sha256)
    #[clap(long = "hash", value_delimiter = ',')]
    pub hash_algorithms: Option<Vec<HashAlgorithm>>,

    /// Maximum number of units running at once
    #[clap(long)]
    pub max_concurrency: Option<usize>,

    /// Seconds to wait for units after a cancellation request
    #[clap(long)]
    pub cancel_timeout: Option<u64>,

    /// Case number recorded with the run
    #[clap(long)]
    pub case_number: Option<String>,

    /// Examiner name (defaults to the current user)
    #[clap(long)]
    pub examiner: Option<String>,

    /// Evidence item number recorded with the run
    #[clap(long)]
    pub evidence_number: Option<String>,

    /// Zip the run directory when collection finishes
    #[clap(long)]
    pub package: bool,

    /// List the available collection units and exit
    #[clap(long)]
    pub list_units: bool,

    /// Continue even without elevated privileges
    #[clap(long)]
    pub force: bool,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,

    /// Subcommands
    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a default configuration file
    InitConfig {
        /// Path to save the configuration file
        #[clap(default_value = "collector_config.yaml")]
        path: PathBuf,
    },

    /// Check a finished run directory against its manifest and audit log
    Verify {
        /// Run directory containing manifest.json
        path: PathBuf,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_collection_flags() {
        let args = Args::try_parse_from([
            "evidence-collector",
            "--output",
            "/cases/001",
            "--units",
            "memory,network",
            "--hash",
            "md5,sha256",
            "--max-concurrency",
            "2",
            "--package",
            "--case-number",
            "2024-117",
            "--examiner",
            "J. Doe",
        ])
        .unwrap();

        assert_eq!(args.output, Some(PathBuf::from("/cases/001")));
        assert_eq!(args.units, Some(vec!["memory".to_string(), "network".to_string()]));
        assert_eq!(args.hash_algorithms, Some(vec![HashAlgorithm::Md5, HashAlgorithm::Sha256]));
        assert_eq!(args.max_concurrency, Some(2));
        assert!(args.package);
        assert_eq!(args.case_number.as_deref(), Some("2024-117"));
        assert_eq!(args.examiner.as_deref(), Some("J. Doe"));
        assert!(args.evidence_number.is_none());
        assert!(args.command.is_none());
    }

    #[test]
    fn test_parse_rejects_unknown_hash() {
        assert!(Args::try_parse_from(["evidence-collector", "--hash", "crc32"]).is_err());
    }

    #[test]
    fn test_parse_subcommands() {
        let args = Args::try_parse_from(["evidence-collector", "verify", "/cases/001/run"]).unwrap();
        assert!(matches!(args.command, Some(Commands::Verify { ref path }) if path == &PathBuf::from("/cases/001/run")));

        let args = Args::try_parse_from(["evidence-collector", "init-config"]).unwrap();
        assert!(matches!(
            args.command,
            Some(Commands::InitConfig { ref path }) if path == &PathBuf::from("collector_config.yaml")
        ));
    }
}
