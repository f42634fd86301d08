//! CLI configuration management.

use serde::{Deserialize, Serialize};
use stagehand_runner::RunnerConfig;
use std::path::PathBuf;
use std::time::Duration;

pub const ENV_IMAGE: &str = "STAGEHAND_IMAGE";
pub const ENV_PARALLEL: &str = "STAGEHAND_PARALLEL";

/// CLI configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CliConfig {
    /// Image for jobs that name none, before the built-in default.
    pub default_image: Option<String>,
    pub readiness_timeout_secs: u64,
    pub operation_timeout_secs: u64,
    pub pull_timeout_secs: u64,
    /// No limit when unset.
    pub job_timeout_secs: Option<u64>,
    pub max_parallel_jobs: usize,
    /// Colour stderr lines.
    pub color: bool,
}

impl Default for CliConfig {
    fn default() -> Self {
        let runner = RunnerConfig::default();
        Self {
            default_image: None,
            readiness_timeout_secs: runner.readiness_timeout.as_secs(),
            operation_timeout_secs: runner.operation_timeout.as_secs(),
            pull_timeout_secs: runner.pull_timeout.as_secs(),
            job_timeout_secs: None,
            max_parallel_jobs: runner.max_parallel_jobs,
            color: true,
        }
    }
}

impl CliConfig {
    /// Load configuration from file, then apply environment overrides.
    pub fn load() -> Result<Self, Box<dyn std::error::Error>> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Get the configuration file path.
    pub fn config_path() -> Result<PathBuf, Box<dyn std::error::Error>> {
        let dirs = directories::ProjectDirs::from("dev", "stagehand", "stagehand")
            .ok_or("Could not determine config directory")?;
        Ok(dirs.config_dir().join("config.yaml"))
    }

    fn apply_env(&mut self, var: impl Fn(&str) -> Option<String>) -> Result<(), String> {
        if let Some(image) = var(ENV_IMAGE).filter(|v| !v.trim().is_empty()) {
            self.default_image = Some(image);
        }
        if let Some(parallel) = var(ENV_PARALLEL) {
            self.max_parallel_jobs = parse_parallel(&parallel)
                .map_err(|e| format!("Invalid {}: {}", ENV_PARALLEL, e))?;
        }
        Ok(())
    }

    /// Engine configuration for this CLI configuration.
    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            readiness_timeout: Duration::from_secs(self.readiness_timeout_secs),
            operation_timeout: Duration::from_secs(self.operation_timeout_secs),
            pull_timeout: Duration::from_secs(self.pull_timeout_secs),
            job_timeout: self.job_timeout_secs.map(Duration::from_secs),
            max_parallel_jobs: self.max_parallel_jobs.max(1),
            color: self.color,
            ..Default::default()
        }
    }
}

/// Parse a parallelism value: a positive integer.
pub fn parse_parallel(value: &str) -> Result<usize, String> {
    match value.trim().parse::<usize>() {
        Ok(0) => Err("must be at least 1".to_string()),
        Ok(n) => Ok(n),
        Err(_) => Err(format!("{:?} is not a number", value)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::HashMap;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config: CliConfig = serde_yaml::from_str("max_parallel_jobs: 3\ncolor: false\n").unwrap();

        assert_eq!(config.max_parallel_jobs, 3);
        assert!(!config.color);
        assert_eq!(config.readiness_timeout_secs, 30);
        assert_eq!(config.pull_timeout_secs, 600);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = CliConfig::default();
        config
            .apply_env(env(&[(ENV_IMAGE, "alpine:3.20"), (ENV_PARALLEL, "4")]))
            .unwrap();

        assert_eq!(config.default_image.as_deref(), Some("alpine:3.20"));
        assert_eq!(config.max_parallel_jobs, 4);
    }

    #[test]
    fn test_invalid_parallel_env() {
        let mut config = CliConfig::default();
        let err = config.apply_env(env(&[(ENV_PARALLEL, "0")])).unwrap_err();
        assert!(err.contains(ENV_PARALLEL));
    }

    #[test]
    fn test_runner_config_conversion() {
        let config = CliConfig {
            job_timeout_secs: Some(90),
            max_parallel_jobs: 0,
            ..Default::default()
        };
        let runner = config.runner_config();

        assert_eq!(runner.job_timeout, Some(Duration::from_secs(90)));
        assert_eq!(runner.max_parallel_jobs, 1);
        assert!(runner.color);
    }
}
