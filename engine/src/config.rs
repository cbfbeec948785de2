//! Account and default settings.
//!
//! Settings come from a TOML file and can be overridden by `GRIDSYNC_*`
//! environment variables. The file is looked up in this order:
//! - the explicit path given on the command line
//! - `$GRIDSYNC_CONFIG`
//! - `$HOME/.config/gridsync/config.toml`
//!
//! A missing default file is not an error (defaults apply); a missing explicit
//! file is.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::checksums::ChecksumAlgorithm;
use crate::error::EngineError;
use crate::retry::{RetryPolicy, DEFAULT_RETRY_INTERVAL};
use crate::scheduler::{FailurePolicy, SchedulerConfig, DEFAULT_METADATA_SLOTS, DEFAULT_THREADS};

pub const CONFIG_ENV: &str = "GRIDSYNC_CONFIG";
const ENV_PREFIX: &str = "GRIDSYNC_";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub user: String,
    pub zone: String,
    /// Defaults to `/<zone>/home/<user>`
    pub home: Option<String>,
    /// Local directory serving the remote namespace
    pub remote_root: Option<PathBuf>,
    /// Algorithm the remote catalog reports checksums in
    pub checksum_algorithm: Option<ChecksumAlgorithm>,
    pub thread_num: usize,
    pub metadata_slots: usize,
    /// Total attempts per invocation
    pub retry: u32,
    pub retry_interval: u64,
    /// Where `cd` persists the working collection
    pub session_file: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            user: String::new(),
            zone: String::new(),
            home: None,
            remote_root: None,
            checksum_algorithm: None,
            thread_num: DEFAULT_THREADS,
            metadata_slots: DEFAULT_METADATA_SLOTS,
            retry: 1,
            retry_interval: DEFAULT_RETRY_INTERVAL.as_secs(),
            session_file: None,
        }
    }
}

/// Per-user configuration directory.
pub fn config_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".config").join("gridsync"),
        None => PathBuf::from(".gridsync"),
    }
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.toml")
}

impl Config {
    /// Load from the first configured location, then apply environment
    /// overrides and validate.
    pub fn load(explicit: Option<&Path>) -> Result<Self, EngineError> {
        let from_env = std::env::var_os(CONFIG_ENV).map(PathBuf::from);
        let mut config = match explicit.map(Path::to_path_buf).or(from_env) {
            Some(path) => Self::from_file(&path)?,
            None => {
                let path = default_config_path();
                if path.is_file() {
                    Self::from_file(&path)?
                } else {
                    debug!("no config file at {}, using defaults", path.display());
                    Config::default()
                }
            }
        };
        config.apply_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, EngineError> {
        let data = fs::read_to_string(path)
            .map_err(|e| EngineError::Config(format!("cannot read {}: {}", path.display(), e)))?;
        debug!("loaded config from {}", path.display());
        Self::from_toml_str(&data)
    }

    pub fn from_toml_str(data: &str) -> Result<Self, EngineError> {
        toml::from_str(data).map_err(|e| EngineError::Config(e.to_string()))
    }

    /// Apply `GRIDSYNC_<FIELD>` overrides from `lookup`.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), EngineError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name)).filter(|v| !v.is_empty());

        if let Some(v) = get("USER") {
            self.user = v;
        }
        if let Some(v) = get("ZONE") {
            self.zone = v;
        }
        if let Some(v) = get("HOME") {
            self.home = Some(v);
        }
        if let Some(v) = get("REMOTE_ROOT") {
            self.remote_root = Some(PathBuf::from(v));
        }
        if let Some(v) = get("CHECKSUM_ALGORITHM") {
            self.checksum_algorithm =
                Some(ChecksumAlgorithm::from_str(&v).map_err(|e| EngineError::Config(e.to_string()))?);
        }
        if let Some(v) = get("THREAD_NUM") {
            self.thread_num = parse_number("THREAD_NUM", &v)?;
        }
        if let Some(v) = get("RETRY") {
            self.retry = parse_number("RETRY", &v)?;
        }
        if let Some(v) = get("RETRY_INTERVAL") {
            self.retry_interval = parse_number("RETRY_INTERVAL", &v)?;
        }
        if let Some(v) = get("SESSION_FILE") {
            self.session_file = Some(PathBuf::from(v));
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        if self.user.is_empty() {
            return Err(EngineError::Config("user is not set".into()));
        }
        if self.zone.is_empty() {
            return Err(EngineError::Config("zone is not set".into()));
        }
        if self.thread_num == 0 {
            return Err(EngineError::Config("thread_num must be at least 1".into()));
        }
        Ok(())
    }

    pub fn home(&self) -> String {
        self.home
            .clone()
            .unwrap_or_else(|| format!("/{}/home/{}", self.zone, self.user))
    }

    pub fn session_path(&self) -> PathBuf {
        self.session_file
            .clone()
            .unwrap_or_else(|| config_dir().join("session.json"))
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry,
            interval: Duration::from_secs(self.retry_interval),
        }
    }

    pub fn scheduler_config(&self, failure_policy: FailurePolicy) -> SchedulerConfig {
        SchedulerConfig {
            threads: self.thread_num,
            metadata_slots: self.metadata_slots,
            failure_policy,
        }
    }
}

fn parse_number<T: FromStr>(name: &str, value: &str) -> Result<T, EngineError> {
    value
        .trim()
        .parse()
        .map_err(|_| EngineError::Config(format!("{}{} is not a number: {}", ENV_PREFIX, name, value)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_fill_missing_fields() {
        let config = Config::from_toml_str("user = \"bob\"\nzone = \"zoneA\"\n").expect("parse");
        assert_eq!(config.thread_num, 5);
        assert_eq!(config.metadata_slots, 2);
        assert_eq!(config.home(), "/zoneA/home/bob");
        assert_eq!(config.retry_policy().max_attempts, 1);
        assert_eq!(config.scheduler_config(FailurePolicy::BestEffort).capacity(), 7);
        config.validate().expect("valid");
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = Config::from_toml_str(
            "user = \"bob\"\nzone = \"zoneA\"\nthread_num = 3\nchecksum_algorithm = \"md5\"\n",
        )
        .expect("parse");
        let env: HashMap<&str, &str> = [
            ("GRIDSYNC_THREAD_NUM", "8"),
            ("GRIDSYNC_HOME", "/zoneA/home/shared"),
            ("GRIDSYNC_CHECKSUM_ALGORITHM", "sha256"),
            ("GRIDSYNC_ZONE", ""),
        ]
        .into_iter()
        .collect();

        config
            .apply_overrides(|key| env.get(key).map(|v| v.to_string()))
            .expect("overrides");

        assert_eq!(config.thread_num, 8);
        assert_eq!(config.home(), "/zoneA/home/shared");
        assert_eq!(config.checksum_algorithm, Some(ChecksumAlgorithm::Sha256));
        // empty values are ignored
        assert_eq!(config.zone, "zoneA");
    }

    #[test]
    fn test_bad_override_is_config_error() {
        let mut config = Config::default();
        let err = config
            .apply_overrides(|key| (key == "GRIDSYNC_RETRY").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_missing_account_is_rejected() {
        assert!(Config::default().validate().is_err());
        let err = Config::from_toml_str("thread_num = \"lots\"").unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }

    #[test]
    fn test_from_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("config.toml");
        fs::write(&path, "user = \"u\"\nzone = \"z\"\nremote_root = \"/srv/grid\"\n").expect("write");

        let config = Config::from_file(&path).expect("load");
        assert_eq!(config.remote_root, Some(PathBuf::from("/srv/grid")));
        assert!(Config::from_file(&temp_dir.path().join("missing.toml")).is_err());
    }
}
