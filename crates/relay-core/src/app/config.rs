//! OrchestratorConfig - 実行時設定
//!
//! Loaded from a JSON file; the four core knobs can be overridden with
//! `RELAY_CONCURRENCY`, `RELAY_TASK_TIMEOUT_SECS`, `RELAY_MAX_ITEMS` and
//! `RELAY_LEASE_TTL_SECS`. `validate()` runs before a Scheduler is built.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("environment variable {key}={value:?} is not a valid number")]
    InvalidEnv { key: &'static str, value: String },

    #[error("{0}")]
    Invalid(String),
}

/// Where work items come from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StoreConfig {
    /// Process-local store, filled from the items file.
    Memory,
    /// Shared SQLite database (several orchestrators may point at one file).
    Sqlite { path: PathBuf },
}

/// How side effects are confirmed after each run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum VerifierConfig {
    Accept,
    FileExists {
        /// Path template, e.g. `out/{id}.json`.
        path: String,
        #[serde(default)]
        non_empty: bool,
    },
    Command {
        /// argv template; exit code 0 means verified.
        argv: Vec<String>,
        #[serde(default = "default_verify_timeout_secs")]
        timeout_secs: u64,
    },
}

fn default_verify_timeout_secs() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OrchestratorConfig {
    /// Number of worker loops, and size of the run semaphore.
    pub concurrency: usize,

    /// Wall-clock budget of one worker process.
    pub task_timeout_secs: u64,

    /// Stop leasing after this many items (None = until the store is empty).
    pub max_items: Option<usize>,

    /// Lease lifetime. Must outlive a full TaskRun including termination.
    pub lease_ttl_secs: u64,

    /// SIGTERM → SIGKILL grace period.
    pub grace_period_secs: u64,

    /// Bound on the final read after a kill.
    pub drain_timeout_secs: u64,

    /// Log "still running" this often while a process runs.
    pub heartbeat_interval_secs: Option<u64>,

    /// Worker argv. `{prompt}` is replaced by the prompt (or appended if absent).
    pub command: Vec<String>,

    pub prompt_template: String,

    pub log_path: PathBuf,

    pub transcripts_dir: PathBuf,

    pub store: StoreConfig,

    /// Park an item after this many failed attempts (None = never park).
    pub max_attempts: Option<u32>,

    pub verifier: VerifierConfig,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            task_timeout_secs: 600,
            max_items: None,
            lease_ttl_secs: 900,
            grace_period_secs: 2,
            drain_timeout_secs: 5,
            heartbeat_interval_secs: None,
            command: Vec::new(),
            prompt_template: "{name}".to_string(),
            log_path: PathBuf::from("outcomes.jsonl"),
            transcripts_dir: PathBuf::from("transcripts"),
            store: StoreConfig::Memory,
            max_attempts: Some(1),
            verifier: VerifierConfig::Accept,
        }
    }
}

impl OrchestratorConfig {
    /// Read a JSON config file, apply `RELAY_*` overrides and validate.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_file(path)?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(raw)?)
    }

    /// `lookup` is `std::env::var` in production; tests pass a map.
    pub fn apply_env_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = env_number(&lookup, "RELAY_CONCURRENCY")? {
            self.concurrency = v as usize;
        }
        if let Some(v) = env_number(&lookup, "RELAY_TASK_TIMEOUT_SECS")? {
            self.task_timeout_secs = v;
        }
        if let Some(v) = env_number(&lookup, "RELAY_MAX_ITEMS")? {
            self.max_items = Some(v as usize);
        }
        if let Some(v) = env_number(&lookup, "RELAY_LEASE_TTL_SECS")? {
            self.lease_ttl_secs = v;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.concurrency == 0 {
            return Err(ConfigError::Invalid("concurrency must be at least 1".into()));
        }
        if self.task_timeout_secs == 0 {
            return Err(ConfigError::Invalid("task_timeout_secs must be positive".into()));
        }
        if self.command.is_empty() || self.command[0].is_empty() {
            return Err(ConfigError::Invalid("command must name a program".into()));
        }
        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid("max_attempts must be at least 1".into()));
        }
        if self.heartbeat_interval_secs == Some(0) {
            return Err(ConfigError::Invalid("heartbeat_interval_secs must be positive".into()));
        }
        // 実行中にリースが切れると別ループが同じ item を取ってしまう
        let worst_case = self.task_timeout_secs + self.grace_period_secs + self.drain_timeout_secs;
        if self.lease_ttl_secs <= worst_case {
            return Err(ConfigError::Invalid(format!(
                "lease_ttl_secs ({}) must exceed task timeout + grace + drain ({worst_case})",
                self.lease_ttl_secs
            )));
        }
        if let VerifierConfig::Command { argv, .. } = &self.verifier
            && argv.is_empty()
        {
            return Err(ConfigError::Invalid("verifier command is empty".into()));
        }
        Ok(())
    }

    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_secs(self.drain_timeout_secs)
    }

    pub fn heartbeat_interval(&self) -> Option<Duration> {
        self.heartbeat_interval_secs.map(Duration::from_secs)
    }
}

fn env_number(lookup: &impl Fn(&str) -> Option<String>, key: &'static str) -> Result<Option<u64>, ConfigError> {
    match lookup(key) {
        None => Ok(None),
        Some(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| ConfigError::InvalidEnv { key, value }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use std::collections::HashMap;

    fn valid() -> OrchestratorConfig {
        OrchestratorConfig {
            command: vec!["agent".into(), "-p".into(), "{prompt}".into()],
            ..Default::default()
        }
    }

    #[test]
    fn defaults_fill_missing_fields() {
        let config = OrchestratorConfig::from_json(r#"{"command":["agent"],"concurrency":8}"#).unwrap();

        assert_eq!(config.concurrency, 8);
        assert_eq!(config.grace_period_secs, 2);
        assert_eq!(config.drain_timeout_secs, 5);
        assert_eq!(config.store, StoreConfig::Memory);
        assert_eq!(config.verifier, VerifierConfig::Accept);
        config.validate().unwrap();
    }

    #[test]
    fn tagged_store_and_verifier_parse() {
        let config = OrchestratorConfig::from_json(
            r#"{
                "command": ["agent"],
                "store": {"kind": "sqlite", "path": "items.db"},
                "verifier": {"kind": "command", "argv": ["test", "-s", "out/{id}.json"]}
            }"#,
        )
        .unwrap();

        assert_eq!(config.store, StoreConfig::Sqlite { path: "items.db".into() });
        assert_eq!(
            config.verifier,
            VerifierConfig::Command {
                argv: vec!["test".into(), "-s".into(), "out/{id}.json".into()],
                timeout_secs: 60,
            }
        );
    }

    #[test]
    fn env_overrides_core_knobs() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("RELAY_CONCURRENCY", "16"),
            ("RELAY_TASK_TIMEOUT_SECS", "30"),
            ("RELAY_MAX_ITEMS", "100"),
            ("RELAY_LEASE_TTL_SECS", "120"),
        ]);
        let mut config = valid();
        config
            .apply_env_overrides(|k| env.get(k).map(|v| v.to_string()))
            .unwrap();

        assert_eq!(config.concurrency, 16);
        assert_eq!(config.task_timeout(), Duration::from_secs(30));
        assert_eq!(config.max_items, Some(100));
        assert_eq!(config.lease_ttl(), Duration::from_secs(120));
    }

    #[test]
    fn malformed_env_value_is_rejected() {
        let mut config = valid();
        let err = config
            .apply_env_overrides(|k| (k == "RELAY_CONCURRENCY").then(|| "many".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidEnv { key: "RELAY_CONCURRENCY", .. }));
    }

    #[rstest]
    #[case::zero_concurrency(OrchestratorConfig { concurrency: 0, ..valid() })]
    #[case::zero_timeout(OrchestratorConfig { task_timeout_secs: 0, ..valid() })]
    #[case::no_command(OrchestratorConfig { command: vec![], ..valid() })]
    #[case::zero_attempts(OrchestratorConfig { max_attempts: Some(0), ..valid() })]
    #[case::lease_too_short(OrchestratorConfig { task_timeout_secs: 100, lease_ttl_secs: 100, ..valid() })]
    #[case::empty_verifier(OrchestratorConfig {
        verifier: VerifierConfig::Command { argv: vec![], timeout_secs: 1 },
        ..valid()
    })]
    fn invalid_configs_are_rejected(#[case] config: OrchestratorConfig) {
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let err = OrchestratorConfig::from_file("/no/such/relay.json").unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
