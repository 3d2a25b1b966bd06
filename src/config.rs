//! Configuration types.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::ConfigError;

/// Node configuration.
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Node name for identification in logs and reports.
    pub name: String,
    /// Maximum number of concurrently live jobs.
    pub max_jobs: usize,
    /// How often the dispatch loop reaps completed jobs.
    pub reap_interval: Duration,
    /// Upper bound on a single exec job's child process.
    pub exec_timeout: Duration,
    /// Directory for the rolling log file. Stderr only when unset.
    pub log_dir: Option<PathBuf>,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            name: "jobhost".to_string(),
            max_jobs: 64,
            reap_interval: Duration::from_millis(500),
            exec_timeout: Duration::from_secs(120),
            log_dir: None,
        }
    }
}

impl NodeConfig {
    /// Build configuration from `JOBHOST_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup. Unset keys keep
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();

        if let Some(name) = lookup("JOBHOST_NAME") {
            let name = name.trim();
            if name.is_empty() {
                return Err(ConfigError::InvalidValue {
                    key: "JOBHOST_NAME".to_string(),
                    message: "must not be empty".to_string(),
                });
            }
            config.name = name.to_string();
        }

        if let Some(raw) = lookup("JOBHOST_MAX_JOBS") {
            let max_jobs = parse_number("JOBHOST_MAX_JOBS", &raw)?;
            if max_jobs == 0 {
                return Err(ConfigError::InvalidValue {
                    key: "JOBHOST_MAX_JOBS".to_string(),
                    message: "must be at least 1".to_string(),
                });
            }
            config.max_jobs = max_jobs as usize;
        }

        if let Some(raw) = lookup("JOBHOST_REAP_INTERVAL_MS") {
            let ms = parse_number("JOBHOST_REAP_INTERVAL_MS", &raw)?;
            config.reap_interval = Duration::from_millis(ms.max(1));
        }

        if let Some(raw) = lookup("JOBHOST_EXEC_TIMEOUT_SECS") {
            config.exec_timeout =
                Duration::from_secs(parse_number("JOBHOST_EXEC_TIMEOUT_SECS", &raw)?);
        }

        config.log_dir = lookup("JOBHOST_LOG_DIR")
            .filter(|dir| !dir.trim().is_empty())
            .map(PathBuf::from);

        Ok(config)
    }
}

fn parse_number(key: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim()
        .parse::<u64>()
        .map_err(|e| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        })
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_when_unset() {
        let config = NodeConfig::from_lookup(|_| None).unwrap();
        assert_eq!(config.name, "jobhost");
        assert_eq!(config.max_jobs, 64);
        assert_eq!(config.reap_interval, Duration::from_millis(500));
        assert!(config.log_dir.is_none());
    }

    #[test]
    fn overrides_apply() {
        let config = NodeConfig::from_lookup(lookup_from(&[
            ("JOBHOST_NAME", "edge-7"),
            ("JOBHOST_MAX_JOBS", "3"),
            ("JOBHOST_REAP_INTERVAL_MS", "25"),
            ("JOBHOST_EXEC_TIMEOUT_SECS", "5"),
            ("JOBHOST_LOG_DIR", "/var/log/jobhost"),
        ]))
        .unwrap();

        assert_eq!(config.name, "edge-7");
        assert_eq!(config.max_jobs, 3);
        assert_eq!(config.reap_interval, Duration::from_millis(25));
        assert_eq!(config.exec_timeout, Duration::from_secs(5));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/jobhost")));
    }

    #[test]
    fn rejects_bad_numbers() {
        let result = NodeConfig::from_lookup(lookup_from(&[("JOBHOST_MAX_JOBS", "lots")]));
        assert!(matches!(
            result,
            Err(ConfigError::InvalidValue { key, .. }) if key == "JOBHOST_MAX_JOBS"
        ));
    }

    #[test]
    fn rejects_zero_max_jobs() {
        let result = NodeConfig::from_lookup(lookup_from(&[("JOBHOST_MAX_JOBS", "0")]));
        assert!(result.is_err());
    }
}
