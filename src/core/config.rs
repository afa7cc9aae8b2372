use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use super::errors::{HostwalkError, Result};

/// Engine configuration with all tuning parameters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineConfig {
    // Worker pool configuration
    /// Maximum number of walk steps executing at once
    pub worker_threads: usize,

    // Stage supervision
    /// Interval of the dispatcher nanny, `None` disables it
    pub nanny_interval: Option<Duration>,
    /// A node running longer than this is reported by the nanny
    pub idle_warning: Duration,

    // Logging
    /// Level for `init_tracing` (trace, debug, info, warn, error)
    pub log_level: String,
    /// Log every node as it starts
    pub log_nodes: bool,

    // Shell behaviour
    /// Abort when a `sh` node exits non-zero, unless the node overrides it
    pub check_exit_code: bool,

    // Run output
    /// Directory receiving `run.json`
    pub output_dir: Option<PathBuf>,
    /// Write the run summary when the run finishes
    pub write_summary: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        let cpu_count = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);

        Self {
            // Worker pool - one step per core
            worker_threads: cpu_count,

            // Stage supervision
            nanny_interval: Some(Duration::from_secs(30)),
            idle_warning: Duration::from_secs(600),

            // Logging
            log_level: "info".to_string(),
            log_nodes: true,

            // Shell behaviour
            check_exit_code: false,

            // Run output
            output_dir: None,
            write_summary: true,
        }
    }
}

impl EngineConfig {
    /// Create a new builder for EngineConfig
    pub fn builder() -> EngineConfigBuilder {
        EngineConfigBuilder::new()
    }

    /// Parse a YAML document; missing fields take their defaults
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: EngineConfig = serde_yaml::from_str(yaml)?;
        config
            .validate()
            .map_err(|message| HostwalkError::configuration(message))?;
        Ok(config)
    }

    /// Load and validate a YAML configuration file
    pub fn from_yaml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .map_err(|e| HostwalkError::io(format!("read {}", path.display()), e))?;
        Self::from_yaml_str(&text)
    }

    /// Validate the configuration
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.worker_threads == 0 {
            return Err("worker_threads must be greater than 0".to_string());
        }
        if let Some(interval) = self.nanny_interval {
            if interval.is_zero() {
                return Err("nanny_interval must be greater than 0".to_string());
            }
        }
        match self.log_level.to_ascii_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => return Err(format!("unknown log_level {}", other)),
        }
        if self.write_summary && self.output_dir.as_ref().is_some_and(|d| d.as_os_str().is_empty()) {
            return Err("output_dir cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Builder for EngineConfig
pub struct EngineConfigBuilder {
    config: EngineConfig,
}

impl EngineConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
        }
    }

    pub fn worker_threads(mut self, workers: usize) -> Self {
        self.config.worker_threads = workers;
        self
    }

    pub fn nanny_interval(mut self, interval: Option<Duration>) -> Self {
        self.config.nanny_interval = interval;
        self
    }

    pub fn idle_warning(mut self, idle: Duration) -> Self {
        self.config.idle_warning = idle;
        self
    }

    pub fn log_level(mut self, level: impl Into<String>) -> Self {
        self.config.log_level = level.into();
        self
    }

    pub fn log_nodes(mut self, enabled: bool) -> Self {
        self.config.log_nodes = enabled;
        self
    }

    pub fn check_exit_code(mut self, enabled: bool) -> Self {
        self.config.check_exit_code = enabled;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = Some(dir.into());
        self
    }

    pub fn write_summary(mut self, enabled: bool) -> Self {
        self.config.write_summary = enabled;
        self
    }

    pub fn build(self) -> std::result::Result<EngineConfig, String> {
        self.config.validate()?;
        Ok(self.config)
    }
}

impl Default for EngineConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = EngineConfig::default();
        assert!(config.validate().is_ok());
        assert!(config.worker_threads > 0);
    }

    #[test]
    fn test_builder_rejects_zero_workers() {
        let result = EngineConfig::builder().worker_threads(0).build();
        assert_eq!(result.unwrap_err(), "worker_threads must be greater than 0");
    }

    #[test]
    fn test_yaml_partial_document() {
        let config = EngineConfig::from_yaml_str("worker_threads: 3\nlog_level: debug\n").unwrap();
        assert_eq!(config.worker_threads, 3);
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.nanny_interval, Some(Duration::from_secs(30)));
    }

    #[test]
    fn test_yaml_bad_level() {
        let err = EngineConfig::from_yaml_str("log_level: loud\n").unwrap_err();
        assert!(err.to_string().contains("unknown log_level loud"));
    }
}
