use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::constants::{DEFAULT_CANCEL_TIMEOUT_SECS, MAX_DEFAULT_CONCURRENCY};
use crate::models::CaseInfo;
use crate::utils::hash::HashAlgorithm;

/// Settings for a single collection run, as handed to the engine
#[derive(Debug, Clone)]
pub struct RunConfig {
    /// Directory this run owns exclusively
    pub output_dir: PathBuf,
    /// Unit ids in scheduling order
    pub units: Vec<String>,
    pub hash_algorithms: Vec<HashAlgorithm>,
    pub max_concurrency: Option<usize>,
    pub cancel_timeout: Duration,
    pub unit_options: HashMap<String, HashMap<String, String>>,
    /// Recorded with the run; an unset examiner becomes the current user
    pub case: CaseInfo,
}

impl RunConfig {
    pub fn new(output_dir: impl Into<PathBuf>, units: &[&str]) -> Self {
        Self {
            output_dir: output_dir.into(),
            units: units.iter().map(|u| u.to_string()).collect(),
            hash_algorithms: vec![HashAlgorithm::Md5, HashAlgorithm::Sha256],
            max_concurrency: None,
            cancel_timeout: Duration::from_secs(DEFAULT_CANCEL_TIMEOUT_SECS),
            unit_options: HashMap::new(),
            case: CaseInfo::default(),
        }
    }

    /// Concurrency limit actually applied: the configured value, or the
    /// CPU count capped at `MAX_DEFAULT_CONCURRENCY`. Never below one.
    pub fn effective_concurrency(&self) -> usize {
        self.max_concurrency
            .unwrap_or_else(|| num_cpus::get().min(MAX_DEFAULT_CONCURRENCY))
            .max(1)
    }

    pub fn options_for(&self, unit_id: &str) -> HashMap<String, String> {
        self.unit_options.get(unit_id).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_effective_concurrency() {
        let mut config = RunConfig::new("/tmp/run", &["network"]);
        let default = config.effective_concurrency();
        assert!(default >= 1 && default <= MAX_DEFAULT_CONCURRENCY);

        config.max_concurrency = Some(0);
        assert_eq!(config.effective_concurrency(), 1);

        config.max_concurrency = Some(16);
        assert_eq!(config.effective_concurrency(), 16);
    }

    #[test]
    fn test_options_for_unknown_unit_is_empty() {
        let mut config = RunConfig::new("/tmp/run", &["network"]);
        config
            .unit_options
            .entry("network".to_string())
            .or_default()
            .insert("interface".to_string(), "eth0".to_string());

        assert_eq!(config.options_for("network").get("interface").map(String::as_str), Some("eth0"));
        assert!(config.options_for("live_system").is_empty());
    }
}
