use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::collectors::live_system::LIVE_SYSTEM_UNIT_ID;
use crate::collectors::network::NETWORK_UNIT_ID;
use crate::collectors::tool::ToolDefinition;
use crate::config::run_config::RunConfig;
use crate::constants::DEFAULT_CANCEL_TIMEOUT_SECS;
use crate::models::CaseInfo;
use crate::utils::hash::HashAlgorithm;

fn default_cancel_timeout() -> u64 {
    DEFAULT_CANCEL_TIMEOUT_SECS
}

fn default_hash_algorithms() -> Vec<HashAlgorithm> {
    vec![HashAlgorithm::Md5, HashAlgorithm::Sha256]
}

/// Operator-facing collection settings as stored in YAML
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct CollectionConfig {
    pub version: String,
    pub description: String,
    /// Parent directory under which each run gets its own folder
    pub output_directory: PathBuf,
    #[serde(default = "default_hash_algorithms")]
    pub hash_algorithms: Vec<HashAlgorithm>,
    /// Selected unit ids, in scheduling order
    pub units: Vec<String>,
    #[serde(default)]
    pub max_concurrency: Option<usize>,
    #[serde(default = "default_cancel_timeout")]
    pub cancel_timeout_secs: u64,
    #[serde(default)]
    pub package_evidence: bool,
    #[serde(default)]
    pub unit_options: HashMap<String, HashMap<String, String>>,
    #[serde(default)]
    pub tools: Vec<ToolDefinition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub case: Option<CaseInfo>,
}

impl Default for CollectionConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            description: "Live response collection".to_string(),
            output_directory: PathBuf::from("evidence"),
            hash_algorithms: default_hash_algorithms(),
            units: vec![LIVE_SYSTEM_UNIT_ID.to_string(), NETWORK_UNIT_ID.to_string()],
            max_concurrency: None,
            cancel_timeout_secs: DEFAULT_CANCEL_TIMEOUT_SECS,
            package_evidence: false,
            unit_options: HashMap::new(),
            tools: Vec::new(),
            case: None,
        }
    }
}

impl CollectionConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let config: CollectionConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
        config.check_tools()?;

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .context(format!("Failed to create directory: {}", parent.display()))?;
        }
        fs::write(path, yaml).context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Create a default configuration YAML file
    pub fn create_default_config_file(path: &Path) -> Result<()> {
        Self::default().save_to_yaml_file(path)
    }

    fn check_tools(&self) -> Result<()> {
        for (index, tool) in self.tools.iter().enumerate() {
            if tool.id.trim().is_empty() {
                bail!("tool #{} has an empty id", index + 1);
            }
            if tool.id == LIVE_SYSTEM_UNIT_ID || tool.id == NETWORK_UNIT_ID {
                bail!("tool id {} collides with a built-in unit", tool.id);
            }
            if self.tools[..index].iter().any(|other| other.id == tool.id) {
                bail!("tool id {} is defined more than once", tool.id);
            }
        }
        Ok(())
    }

    /// Engine-facing settings for one run writing into `run_dir`
    pub fn to_run_config(&self, run_dir: &Path) -> RunConfig {
        RunConfig {
            output_dir: run_dir.to_path_buf(),
            units: self.units.clone(),
            hash_algorithms: self.hash_algorithms.clone(),
            max_concurrency: self.max_concurrency,
            cancel_timeout: Duration::from_secs(self.cancel_timeout_secs),
            unit_options: self.unit_options.clone(),
            case: self.case.clone().unwrap_or_default(),
        }
    }
}

/// Load the configuration at `config_path`, or fall back to the built-in
/// defaults when no path is given or the file does not exist.
pub fn load_or_default(config_path: Option<&Path>) -> Result<CollectionConfig> {
    match config_path {
        Some(path) if path.exists() => CollectionConfig::from_yaml_file(path),
        Some(path) => {
            info!("Config file {} not found, using defaults", path.display());
            Ok(CollectionConfig::default())
        }
        None => {
            info!("No config path provided, using default configuration");
            Ok(CollectionConfig::default())
        }
    }
}
