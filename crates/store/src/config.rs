//! Store configuration with precedence: defaults < config file < environment
//! < command line

use crate::errors::{RecoveryHint, Result, SerializationOp, StoreError};
use quotevault_core::{
    QUOTEVAULT_DATA_DIR_VAR, QUOTEVAULT_FALLBACK_ONLY_VAR, QUOTEVAULT_MAX_BACKUPS_VAR,
    QUOTEVAULT_MAX_CONCURRENT_VAR, QUOTEVAULT_QUOTA_BYTES_VAR,
};
use quotevault_utils::XdgPaths;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Keep-counts used by the quota cascade and default cleanup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionLimits {
    pub history: usize,
    pub quotes: usize,
    pub components: usize,
}

impl Default for RetentionLimits {
    fn default() -> Self {
        Self {
            history: 50,
            quotes: 20,
            components: 100,
        }
    }
}

/// Source of configuration for debugging and precedence tracking
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSource {
    Default,
    ConfigFile(PathBuf),
    EnvironmentVariable(String),
    CommandLine,
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Root for the primary backend, fallback file and backup journal
    pub data_dir: PathBuf,
    pub max_concurrent_operations: usize,
    /// `None` admits without limit
    pub max_queue_depth: Option<usize>,
    pub max_reconnect_attempts: u32,
    /// Reconnect attempt `n` waits `n * reconnect_backoff_base`
    pub reconnect_backoff_base: Duration,
    pub close_timeout: Duration,
    pub max_backups: usize,
    pub max_local_fallback_entries: usize,
    pub max_fallback_record_bytes: usize,
    pub fallback_capacity_bytes: u64,
    /// Byte budget of the primary backend
    pub quota_bytes: u64,
    pub retention: RetentionLimits,
    pub journal_compact_threshold: u64,
    /// Skip the transactional backend entirely
    pub fallback_only: bool,
    pub source: ConfigSource,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: XdgPaths::data_dir(),
            max_concurrent_operations: 3,
            max_queue_depth: None,
            max_reconnect_attempts: 3,
            reconnect_backoff_base: Duration::from_millis(100),
            close_timeout: Duration::from_secs(5),
            max_backups: 10,
            max_local_fallback_entries: 50,
            max_fallback_record_bytes: 256 * 1024,
            fallback_capacity_bytes: 5 * 1024 * 1024,
            quota_bytes: 50 * 1024 * 1024,
            retention: RetentionLimits::default(),
            journal_compact_threshold: 1024 * 1024,
            fallback_only: false,
            source: ConfigSource::Default,
        }
    }
}

impl StoreConfig {
    pub fn builder() -> StoreConfigBuilder {
        StoreConfigBuilder::new()
    }

    /// Reject values the manager cannot run with
    pub fn validate(&self) -> Result<()> {
        if self.max_concurrent_operations == 0 {
            return Err(StoreError::configuration(
                "max_concurrent_operations must be at least 1",
            ));
        }
        if self.max_backups == 0 {
            return Err(StoreError::configuration("max_backups must be at least 1"));
        }
        if self.max_local_fallback_entries == 0 {
            return Err(StoreError::configuration(
                "max_local_fallback_entries must be at least 1",
            ));
        }
        if self.max_queue_depth == Some(0) {
            return Err(StoreError::configuration("max_queue_depth must be at least 1"));
        }
        Ok(())
    }
}

/// Builder for [`StoreConfig`]
pub struct StoreConfigBuilder {
    config: StoreConfig,
}

impl StoreConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: StoreConfig::default(),
        }
    }

    pub fn from_config(config: StoreConfig) -> Self {
        Self { config }
    }

    pub fn with_data_dir(mut self, data_dir: impl Into<PathBuf>) -> Self {
        self.config.data_dir = data_dir.into();
        self
    }

    pub fn with_max_concurrent_operations(mut self, max: usize) -> Self {
        self.config.max_concurrent_operations = max;
        self
    }

    pub fn with_max_queue_depth(mut self, depth: Option<usize>) -> Self {
        self.config.max_queue_depth = depth;
        self
    }

    pub fn with_max_reconnect_attempts(mut self, attempts: u32) -> Self {
        self.config.max_reconnect_attempts = attempts;
        self
    }

    pub fn with_reconnect_backoff_base(mut self, base: Duration) -> Self {
        self.config.reconnect_backoff_base = base;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.config.close_timeout = timeout;
        self
    }

    pub fn with_max_backups(mut self, max: usize) -> Self {
        self.config.max_backups = max;
        self
    }

    pub fn with_max_local_fallback_entries(mut self, max: usize) -> Self {
        self.config.max_local_fallback_entries = max;
        self
    }

    pub fn with_max_fallback_record_bytes(mut self, max: usize) -> Self {
        self.config.max_fallback_record_bytes = max;
        self
    }

    pub fn with_fallback_capacity_bytes(mut self, bytes: u64) -> Self {
        self.config.fallback_capacity_bytes = bytes;
        self
    }

    pub fn with_quota_bytes(mut self, bytes: u64) -> Self {
        self.config.quota_bytes = bytes;
        self
    }

    pub fn with_retention(mut self, retention: RetentionLimits) -> Self {
        self.config.retention = retention;
        self
    }

    pub fn with_journal_compact_threshold(mut self, bytes: u64) -> Self {
        self.config.journal_compact_threshold = bytes;
        self
    }

    pub fn with_fallback_only(mut self, fallback_only: bool) -> Self {
        self.config.fallback_only = fallback_only;
        self
    }

    pub fn with_source(mut self, source: ConfigSource) -> Self {
        self.config.source = source;
        self
    }

    pub fn build(self) -> StoreConfig {
        self.config
    }
}

impl Default for StoreConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// The `"store"` object of the config file; every field optional
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct StoreConfigFile {
    data_dir: Option<PathBuf>,
    max_concurrent_operations: Option<usize>,
    max_queue_depth: Option<usize>,
    max_reconnect_attempts: Option<u32>,
    reconnect_backoff_ms: Option<u64>,
    close_timeout_ms: Option<u64>,
    max_backups: Option<usize>,
    max_local_fallback_entries: Option<usize>,
    max_fallback_record_bytes: Option<usize>,
    fallback_capacity_bytes: Option<u64>,
    quota_bytes: Option<u64>,
    retention: Option<RetentionLimits>,
    journal_compact_threshold: Option<u64>,
    fallback_only: Option<bool>,
}

/// Configuration loader that handles precedence
pub struct StoreConfigLoader;

impl StoreConfigLoader {
    /// Load configuration from the XDG config file and the environment
    pub fn load() -> Result<StoreConfig> {
        Self::load_from(&XdgPaths::config_file())
    }

    /// Load configuration using `config_path` as the config file
    pub fn load_from(config_path: &Path) -> Result<StoreConfig> {
        let mut config = StoreConfig::default();

        if let Some(file) = Self::read_config_file(config_path)? {
            Self::apply_file(&mut config, file);
            config.source = ConfigSource::ConfigFile(config_path.to_path_buf());
        }

        if let Some(var) = Self::apply_env(&mut config)? {
            config.source = ConfigSource::EnvironmentVariable(var);
        }

        config.validate()?;
        Ok(config)
    }

    fn read_config_file(path: &Path) -> Result<Option<StoreConfigFile>> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(StoreError::Io {
                    path: path.to_path_buf(),
                    operation: "read config file",
                    source: e,
                    recovery_hint: RecoveryHint::CheckPermissions {
                        path: path.to_path_buf(),
                    },
                })
            }
        };

        let parse_error = |e: serde_json::Error| StoreError::Serialization {
            context: path.display().to_string(),
            operation: SerializationOp::Decode,
            source: Box::new(e),
            recovery_hint: RecoveryHint::Manual {
                instructions: "Check config file syntax".to_string(),
            },
        };

        let document: serde_json::Value = serde_json::from_str(&content).map_err(parse_error)?;
        match document.get("store") {
            Some(store) => serde_json::from_value(store.clone())
                .map(Some)
                .map_err(parse_error),
            None => Ok(None),
        }
    }

    fn apply_file(config: &mut StoreConfig, file: StoreConfigFile) {
        if let Some(v) = file.data_dir {
            config.data_dir = v;
        }
        if let Some(v) = file.max_concurrent_operations {
            config.max_concurrent_operations = v;
        }
        if file.max_queue_depth.is_some() {
            config.max_queue_depth = file.max_queue_depth;
        }
        if let Some(v) = file.max_reconnect_attempts {
            config.max_reconnect_attempts = v;
        }
        if let Some(v) = file.reconnect_backoff_ms {
            config.reconnect_backoff_base = Duration::from_millis(v);
        }
        if let Some(v) = file.close_timeout_ms {
            config.close_timeout = Duration::from_millis(v);
        }
        if let Some(v) = file.max_backups {
            config.max_backups = v;
        }
        if let Some(v) = file.max_local_fallback_entries {
            config.max_local_fallback_entries = v;
        }
        if let Some(v) = file.max_fallback_record_bytes {
            config.max_fallback_record_bytes = v;
        }
        if let Some(v) = file.fallback_capacity_bytes {
            config.fallback_capacity_bytes = v;
        }
        if let Some(v) = file.quota_bytes {
            config.quota_bytes = v;
        }
        if let Some(v) = file.retention {
            config.retention = v;
        }
        if let Some(v) = file.journal_compact_threshold {
            config.journal_compact_threshold = v;
        }
        if let Some(v) = file.fallback_only {
            config.fallback_only = v;
        }
    }

    /// Returns the last variable applied, if any
    fn apply_env(config: &mut StoreConfig) -> Result<Option<String>> {
        let mut applied = None;

        if let Ok(dir) = std::env::var(QUOTEVAULT_DATA_DIR_VAR) {
            config.data_dir = PathBuf::from(dir);
            applied = Some(QUOTEVAULT_DATA_DIR_VAR.to_string());
        }
        if let Some(v) = Self::parse_env::<usize>(QUOTEVAULT_MAX_CONCURRENT_VAR)? {
            config.max_concurrent_operations = v;
            applied = Some(QUOTEVAULT_MAX_CONCURRENT_VAR.to_string());
        }
        if let Some(v) = Self::parse_env::<usize>(QUOTEVAULT_MAX_BACKUPS_VAR)? {
            config.max_backups = v;
            applied = Some(QUOTEVAULT_MAX_BACKUPS_VAR.to_string());
        }
        if let Some(v) = Self::parse_env::<u64>(QUOTEVAULT_QUOTA_BYTES_VAR)? {
            config.quota_bytes = v;
            applied = Some(QUOTEVAULT_QUOTA_BYTES_VAR.to_string());
        }
        if let Ok(v) = std::env::var(QUOTEVAULT_FALLBACK_ONLY_VAR) {
            config.fallback_only = matches!(v.to_lowercase().as_str(), "1" | "true" | "yes");
            applied = Some(QUOTEVAULT_FALLBACK_ONLY_VAR.to_string());
        }

        Ok(applied)
    }

    fn parse_env<T: std::str::FromStr>(var: &str) -> Result<Option<T>> {
        match std::env::var(var) {
            Ok(raw) => raw.trim().parse().map(Some).map_err(|_| {
                StoreError::configuration(format!("{var} must be a non-negative integer, got '{raw}'"))
            }),
            Err(_) => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use tempfile::TempDir;

    fn clear_env() {
        for var in [
            QUOTEVAULT_DATA_DIR_VAR,
            QUOTEVAULT_MAX_CONCURRENT_VAR,
            QUOTEVAULT_MAX_BACKUPS_VAR,
            QUOTEVAULT_QUOTA_BYTES_VAR,
            QUOTEVAULT_FALLBACK_ONLY_VAR,
        ] {
            std::env::remove_var(var);
        }
    }

    #[test]
    fn defaults_match_documented_values() {
        let config = StoreConfig::default();
        assert_eq!(config.max_concurrent_operations, 3);
        assert_eq!(config.max_reconnect_attempts, 3);
        assert_eq!(config.max_backups, 10);
        assert_eq!(config.close_timeout, Duration::from_secs(5));
        assert_eq!(config.retention, RetentionLimits::default());
        assert!(config.max_queue_depth.is_none());
    }

    #[test]
    #[serial]
    fn file_then_env_precedence() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(
            &path,
            r#"{"store": {"max_backups": 4, "max_concurrent_operations": 2}}"#,
        )
        .unwrap();

        let config = StoreConfigLoader::load_from(&path).unwrap();
        assert_eq!(config.max_backups, 4);
        assert_eq!(config.max_concurrent_operations, 2);
        assert_eq!(config.source, ConfigSource::ConfigFile(path.clone()));

        std::env::set_var(QUOTEVAULT_MAX_BACKUPS_VAR, "7");
        let config = StoreConfigLoader::load_from(&path).unwrap();
        assert_eq!(config.max_backups, 7);
        assert_eq!(config.max_concurrent_operations, 2);
        assert_eq!(
            config.source,
            ConfigSource::EnvironmentVariable(QUOTEVAULT_MAX_BACKUPS_VAR.to_string())
        );
        clear_env();
    }

    #[test]
    #[serial]
    fn malformed_env_is_a_configuration_error() {
        clear_env();
        std::env::set_var(QUOTEVAULT_MAX_CONCURRENT_VAR, "lots");
        let temp_dir = TempDir::new().unwrap();

        let err = StoreConfigLoader::load_from(&temp_dir.path().join("none.json")).unwrap_err();
        assert!(matches!(err, StoreError::Configuration { .. }));
        clear_env();
    }

    #[test]
    #[serial]
    fn unknown_keys_are_rejected() {
        clear_env();
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("config.json");
        std::fs::write(&path, r#"{"store": {"max_bakcups": 4}}"#).unwrap();

        let err = StoreConfigLoader::load_from(&path).unwrap_err();
        assert!(matches!(err, StoreError::Serialization { .. }));
    }

    #[test]
    fn zero_concurrency_is_invalid() {
        let config = StoreConfig::builder().with_max_concurrent_operations(0).build();
        assert!(config.validate().is_err());
    }
}
