use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Configuration file structure for the collector.
///
/// Loaded from the path given on the command line, or from the first
/// `jenkins-metrics.*` file found in the current directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct Config {
    /// Jenkins server settings
    #[serde(default)]
    pub jenkins: JenkinsConfig,

    /// Collection loop settings and the job list
    #[serde(default)]
    pub collector: CollectorConfig,

    /// Document store settings
    #[serde(default)]
    pub storage: StorageConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct JenkinsConfig {
    /// Jenkins base URL, including any path prefix
    #[serde(default = "default_jenkins_base_url")]
    pub base_url: String,

    /// Skip TLS certificate verification
    #[serde(default)]
    pub accept_invalid_certs: bool,

    /// Per-request timeout
    #[serde(default = "default_request_timeout_seconds")]
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct CollectorConfig {
    /// Seconds between collection runs
    #[serde(default = "default_interval_seconds")]
    pub interval_seconds: u64,

    /// Number of recent builds per job to fetch (one more is attempted)
    #[serde(default = "default_max_last_builds")]
    pub max_last_builds: usize,

    /// Build detail fetches launched before waiting for the batch
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Jenkins job names to collect, in order
    #[serde(default)]
    pub jobs: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct StorageConfig {
    /// Database directory; `COLLECTOR_DB_DIR` takes precedence
    pub db_dir: Option<PathBuf>,
}

impl Default for JenkinsConfig {
    fn default() -> Self {
        Self {
            base_url: default_jenkins_base_url(),
            accept_invalid_certs: false,
            request_timeout_seconds: default_request_timeout_seconds(),
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_interval_seconds(),
            max_last_builds: default_max_last_builds(),
            max_workers: default_max_workers(),
            jobs: Vec::new(),
        }
    }
}

fn default_jenkins_base_url() -> String {
    "https://ci.openshift.redhat.com/jenkins".to_string()
}

fn default_request_timeout_seconds() -> u64 {
    20
}

fn default_interval_seconds() -> u64 {
    30
}

fn default_max_last_builds() -> usize {
    5
}

fn default_max_workers() -> usize {
    5
}

impl JenkinsConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }
}

impl CollectorConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_seconds)
    }
}

impl Config {
    /// Load configuration from a file.
    ///
    /// Searches for configuration files in this order:
    /// 1. Specified path
    /// 2. ./jenkins-metrics.toml
    /// 3. ./jenkins-metrics.json
    /// 4. ./jenkins-metrics.yaml
    /// 5. ./jenkins-metrics.yml
    ///
    /// Returns default configuration if no file is found.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => Self::load_from_path(path)?,
            None => {
                let candidates = [
                    "jenkins-metrics.toml",
                    "jenkins-metrics.json",
                    "jenkins-metrics.yaml",
                    "jenkins-metrics.yml",
                ];

                match candidates.iter().map(Path::new).find(|p| p.exists()) {
                    Some(path) => Self::load_from_path(path)?,
                    None => Self::default(),
                }
            }
        };

        config.validate()?;
        Ok(config)
    }

    /// Load configuration from a specific file path.
    fn load_from_path(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let extension = path.extension().and_then(|ext| ext.to_str()).unwrap_or("");

        match extension {
            "toml" => toml::from_str(&contents)
                .with_context(|| format!("Failed to parse TOML config: {}", path.display())),
            "json" => serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display())),
            "yaml" | "yml" => serde_yaml::from_str(&contents)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display())),
            _ => {
                // Try TOML first, then JSON, then YAML
                toml::from_str(&contents)
                    .or_else(|_| serde_json::from_str(&contents))
                    .or_else(|_| serde_yaml::from_str(&contents))
                    .with_context(|| format!("Failed to parse config file: {}", path.display()))
            }
        }
    }

    fn validate(&self) -> Result<()> {
        if self.collector.interval_seconds < 2 {
            anyhow::bail!("collector.interval-seconds must be at least 2");
        }
        if self.collector.max_workers == 0 {
            anyhow::bail!("collector.max-workers must be at least 1");
        }
        if self.collector.jobs.iter().any(|job| job.trim().is_empty()) {
            anyhow::bail!("collector.jobs must not contain empty job names");
        }
        Ok(())
    }
}
