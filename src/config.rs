use crate::constants;
use crate::error::{Result, SyncError};
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    pub upstream: UpstreamConfig,
    pub sync: ReconcileConfig,
    pub storage: StorageConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UpstreamConfig {
    pub archive_url: String,
    pub language: String,
    pub user_agent: String,
    pub probe_timeout_secs: u64,
    pub download_timeout_secs: u64,
    pub retry_delays_secs: Vec<u64>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    pub batch_size: usize,
    pub batch_delay_ms: u64,
    pub max_errors: usize,
    pub marker_key: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub database_path: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub log_dir: PathBuf,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub pushgateway_url: Option<String>,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            archive_url: constants::DEFAULT_ARCHIVE_URL.to_string(),
            language: constants::DEFAULT_LANGUAGE.to_string(),
            user_agent: constants::DEFAULT_USER_AGENT.to_string(),
            probe_timeout_secs: constants::DEFAULT_PROBE_TIMEOUT_SECS,
            download_timeout_secs: constants::DEFAULT_DOWNLOAD_TIMEOUT_SECS,
            retry_delays_secs: constants::DEFAULT_RETRY_DELAYS_SECS.to_vec(),
        }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            batch_size: constants::DEFAULT_BATCH_SIZE,
            batch_delay_ms: constants::DEFAULT_BATCH_DELAY_MS,
            max_errors: constants::DEFAULT_MAX_ERRORS,
            marker_key: constants::DEFAULT_MARKER_KEY.to_string(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { database_path: PathBuf::from(constants::DEFAULT_DATABASE_PATH) }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { log_dir: PathBuf::from(constants::DEFAULT_LOG_DIR) }
    }
}

impl UpstreamConfig {
    pub fn probe_timeout(&self) -> Duration {
        Duration::from_secs(self.probe_timeout_secs)
    }

    pub fn download_timeout(&self) -> Duration {
        Duration::from_secs(self.download_timeout_secs)
    }

    pub fn retry_delays(&self) -> Vec<Duration> {
        self.retry_delays_secs.iter().copied().map(Duration::from_secs).collect()
    }
}

impl ReconcileConfig {
    pub fn batch_delay(&self) -> Duration {
        Duration::from_millis(self.batch_delay_ms)
    }
}

impl SyncConfig {
    /// Load configuration from an explicit path, or from `card_sync.toml` when it exists,
    /// then apply environment overrides. Missing default file means built-in defaults.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(p) => Self::from_file(p)?,
            None => {
                let default_path = Path::new(constants::DEFAULT_CONFIG_FILE);
                if default_path.exists() {
                    Self::from_file(default_path)?
                } else {
                    Self::default()
                }
            }
        };
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            SyncError::Config(format!("Failed to read config file '{}': {}", path.display(), e))
        })?;
        let config: SyncConfig = toml::from_str(&content)?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) -> Result<()> {
        self.apply_overrides(|name| std::env::var(name).ok())
    }

    /// Apply `CARD_SYNC_*` overrides read through `lookup`. Blank values are ignored.
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        if let Some(url) = get("CARD_SYNC_ARCHIVE_URL") {
            self.upstream.archive_url = url;
        }
        if let Some(path) = get("CARD_SYNC_DATABASE_PATH") {
            self.storage.database_path = PathBuf::from(path);
        }
        if let Some(max) = get("CARD_SYNC_MAX_ERRORS") {
            self.sync.max_errors = max.trim().parse().map_err(|_| {
                SyncError::Config(format!("CARD_SYNC_MAX_ERRORS is not a number: {max}"))
            })?;
        }
        if let Some(url) = get("CARD_SYNC_PUSHGATEWAY_URL") {
            self.metrics.pushgateway_url = Some(url);
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.upstream.archive_url.trim().is_empty() {
            return Err(SyncError::Config("upstream.archive_url must not be empty".to_string()));
        }
        if self.upstream.probe_timeout_secs == 0 || self.upstream.download_timeout_secs == 0 {
            return Err(SyncError::Config("upstream timeouts must be greater than zero".to_string()));
        }
        if self.sync.batch_size == 0 {
            return Err(SyncError::Config("sync.batch_size must be greater than zero".to_string()));
        }
        if self.sync.marker_key.trim().is_empty() {
            return Err(SyncError::Config("sync.marker_key must not be empty".to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.batch_size, 50);
        assert_eq!(config.sync.max_errors, 10);
        assert_eq!(config.upstream.retry_delays(), vec![
            Duration::from_secs(5),
            Duration::from_secs(10),
            Duration::from_secs(15),
        ]);
    }

    #[test]
    fn test_partial_file_keeps_defaults() -> anyhow::Result<()> {
        let mut file = tempfile::NamedTempFile::new()?;
        writeln!(file, "[sync]\nbatch_size = 25\n\n[storage]\ndatabase_path = \"/tmp/cards.db\"")?;

        let config = SyncConfig::from_file(file.path())?;
        assert_eq!(config.sync.batch_size, 25);
        assert_eq!(config.sync.max_errors, constants::DEFAULT_MAX_ERRORS);
        assert_eq!(config.storage.database_path, PathBuf::from("/tmp/cards.db"));
        assert_eq!(config.upstream.archive_url, constants::DEFAULT_ARCHIVE_URL);
        Ok(())
    }

    #[test]
    fn test_example_config_parses() {
        let config: SyncConfig = toml::from_str(include_str!("../card_sync.example.toml")).unwrap();
        assert!(config.validate().is_ok());
        assert_eq!(config.sync.marker_key, constants::DEFAULT_MARKER_KEY);
        assert!(config.metrics.pushgateway_url.is_none());
    }

    #[test]
    fn test_overrides_replace_file_values() {
        let env: HashMap<&str, &str> = [
            ("CARD_SYNC_ARCHIVE_URL", "https://mirror.example/cards.zip"),
            ("CARD_SYNC_DATABASE_PATH", "/var/lib/card_sync/catalog.db"),
            ("CARD_SYNC_MAX_ERRORS", "3"),
            ("CARD_SYNC_PUSHGATEWAY_URL", "http://localhost:9091"),
        ]
        .into_iter()
        .collect();

        let mut config = SyncConfig::default();
        config.apply_overrides(|name| env.get(name).map(|v| v.to_string())).unwrap();

        assert_eq!(config.upstream.archive_url, "https://mirror.example/cards.zip");
        assert_eq!(config.storage.database_path, PathBuf::from("/var/lib/card_sync/catalog.db"));
        assert_eq!(config.sync.max_errors, 3);
        assert_eq!(config.metrics.pushgateway_url.as_deref(), Some("http://localhost:9091"));
    }

    #[test]
    fn test_blank_overrides_are_ignored() {
        let mut config = SyncConfig::default();
        config.apply_overrides(|_| Some("  ".to_string())).unwrap();
        assert_eq!(config.upstream.archive_url, constants::DEFAULT_ARCHIVE_URL);
        assert_eq!(config.sync.max_errors, constants::DEFAULT_MAX_ERRORS);
        assert!(config.metrics.pushgateway_url.is_none());
    }

    #[test]
    fn test_non_numeric_max_errors_is_rejected() {
        let mut config = SyncConfig::default();
        let result = config.apply_overrides(|name| (name == "CARD_SYNC_MAX_ERRORS").then(|| "ten".to_string()));
        assert!(matches!(result, Err(SyncError::Config(msg)) if msg.contains("CARD_SYNC_MAX_ERRORS")));
        assert_eq!(config.sync.max_errors, constants::DEFAULT_MAX_ERRORS);
    }

    #[test]
    fn test_zero_batch_size_is_rejected() {
        let mut config = SyncConfig::default();
        config.sync.batch_size = 0;
        assert!(matches!(config.validate(), Err(SyncError::Config(_))));
    }

    #[test]
    fn test_missing_file_is_a_config_error() {
        let result = SyncConfig::from_file(Path::new("/definitely/not/here.toml"));
        assert!(matches!(result, Err(SyncError::Config(_))));
    }
}
