use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use driftsync_core::connectivity::{
    BackoffPolicy, MonitorConfig, DEFAULT_BACKOFF_CAP, DEFAULT_CHECK_INTERVAL,
    DEFAULT_INITIAL_RETRY_DELAY, DEFAULT_LATENCY_WINDOW, DEFAULT_MAX_RETRY_DELAY,
    DEFAULT_OFFLINE_CHECK_INTERVAL, DEFAULT_PROBE_TIMEOUT,
};
use driftsync_core::executor::{
    ExecutorConfig, DEFAULT_BATCH_DELAY, DEFAULT_CONCURRENCY, DEFAULT_REQUEST_TIMEOUT,
};
use driftsync_core::queue::{QueueConfig, DEFAULT_MAX_QUEUE_SIZE, DEFAULT_MAX_RETRIES};

/// Source of a configuration value
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigSource {
    Default,
    File,
    Environment,
}

impl std::fmt::Display for ConfigSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigSource::Default => write!(f, "default"),
            ConfigSource::File => write!(f, "file"),
            ConfigSource::Environment => write!(f, "environment"),
        }
    }
}

/// A configuration value with its source
#[derive(Debug, Clone, Serialize)]
pub struct ConfigValue<T> {
    pub value: T,
    pub source: ConfigSource,
}

impl<T> ConfigValue<T> {
    pub fn new(value: T, source: ConfigSource) -> Self {
        Self { value, source }
    }
}

/// Sync server and queue settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Server base URL (e.g., "http://localhost:8080")
    pub server_url: Option<String>,
    /// Bearer token sent with every sync request
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    pub health_path: String,
    pub concurrency: usize,
    pub request_timeout_ms: u64,
    pub batch_delay_ms: u64,
    pub max_retries: u32,
    pub max_queue_size: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            server_url: None,
            api_key: None,
            health_path: "/health".to_string(),
            concurrency: DEFAULT_CONCURRENCY,
            request_timeout_ms: DEFAULT_REQUEST_TIMEOUT.as_millis() as u64,
            batch_delay_ms: DEFAULT_BATCH_DELAY.as_millis() as u64,
            max_retries: DEFAULT_MAX_RETRIES,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }
}

impl SyncConfig {
    /// Returns true if a server URL is set
    pub fn is_configured(&self) -> bool {
        self.server_url.is_some()
    }

    pub fn health_url(&self) -> Option<String> {
        self.server_url.as_ref().map(|url| {
            format!(
                "{}/{}",
                url.trim_end_matches('/'),
                self.health_path.trim_start_matches('/')
            )
        })
    }

    pub fn executor_config(&self) -> ExecutorConfig {
        ExecutorConfig {
            concurrency: self.concurrency.max(1),
            request_timeout: Duration::from_millis(self.request_timeout_ms),
            batch_delay: Duration::from_millis(self.batch_delay_ms),
        }
    }

    pub fn queue_config(&self) -> QueueConfig {
        QueueConfig {
            max_retries: self.max_retries,
            max_queue_size: self.max_queue_size.max(1),
        }
    }
}

/// Health probing and reconnection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectivityConfig {
    pub probe_timeout_ms: u64,
    pub check_interval_ms: u64,
    pub offline_check_interval_ms: u64,
    pub initial_retry_delay_ms: u64,
    pub max_retry_delay_ms: u64,
    pub backoff_cap: u32,
    pub latency_window: usize,
}

impl Default for ConnectivityConfig {
    fn default() -> Self {
        Self {
            probe_timeout_ms: DEFAULT_PROBE_TIMEOUT.as_millis() as u64,
            check_interval_ms: DEFAULT_CHECK_INTERVAL.as_millis() as u64,
            offline_check_interval_ms: DEFAULT_OFFLINE_CHECK_INTERVAL.as_millis() as u64,
            initial_retry_delay_ms: DEFAULT_INITIAL_RETRY_DELAY.as_millis() as u64,
            max_retry_delay_ms: DEFAULT_MAX_RETRY_DELAY.as_millis() as u64,
            backoff_cap: DEFAULT_BACKOFF_CAP,
            latency_window: DEFAULT_LATENCY_WINDOW,
        }
    }
}

impl ConnectivityConfig {
    pub fn monitor_config(&self) -> MonitorConfig {
        MonitorConfig {
            probe_timeout: Duration::from_millis(self.probe_timeout_ms),
            check_interval: Duration::from_millis(self.check_interval_ms),
            offline_check_interval: Duration::from_millis(self.offline_check_interval_ms),
            backoff: BackoffPolicy {
                initial_delay: Duration::from_millis(self.initial_retry_delay_ms),
                max_delay: Duration::from_millis(self.max_retry_delay_ms),
                cap: self.backoff_cap,
            },
            latency_window: self.latency_window.max(1),
        }
    }
}

/// Application configuration with source tracking
#[derive(Debug, Clone, Serialize)]
pub struct Config {
    /// Path to the SQLite database holding the offline queue
    pub database_path: ConfigValue<PathBuf>,
    /// Directory for local state such as the node ID file
    pub data_dir: ConfigValue<PathBuf>,
    /// Fixed HLC node ID; derived and persisted when unset
    pub node_id: ConfigValue<Option<String>>,
    /// Config file path used (if any)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_file: Option<PathBuf>,
    pub sync: SyncConfig,
    pub connectivity: ConnectivityConfig,
}

/// Internal struct for deserializing config file
#[derive(Debug, Deserialize, Default)]
#[serde(default)]
struct ConfigFile {
    database_path: Option<PathBuf>,
    data_dir: Option<PathBuf>,
    node_id: Option<String>,
    sync: Option<SyncConfig>,
    connectivity: Option<ConnectivityConfig>,
}

impl Config {
    /// Load configuration with priority: env vars > config file > defaults
    pub fn load(config_path: Option<PathBuf>) -> Result<Self, ConfigError> {
        Self::load_with_env(config_path, |key| std::env::var(key).ok())
    }

    /// Like [`Config::load`], reading overrides through `env`.
    pub fn load_with_env<F>(config_path: Option<PathBuf>, env: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut data_dir = ConfigValue::new(Self::default_data_dir(), ConfigSource::Default);
        let mut database_path: Option<ConfigValue<PathBuf>> = None;
        let mut node_id = ConfigValue::new(None, ConfigSource::Default);
        let mut config_file = None;
        let mut sync = SyncConfig::default();
        let mut connectivity = ConnectivityConfig::default();

        // Try to load from config file
        let path = config_path.unwrap_or_else(Self::default_config_path);
        if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .map_err(|e| ConfigError::ReadError(path.clone(), e))?;
            let file_config: ConfigFile = serde_yaml::from_str(&contents)
                .map_err(|e| ConfigError::ParseError(path.clone(), e))?;

            config_file = Some(path.clone());

            // Resolve relative paths against config file's directory
            let resolve = |p: PathBuf| {
                if p.is_relative() {
                    path.parent().map(|dir| dir.join(&p)).unwrap_or(p)
                } else {
                    p
                }
            };

            if let Some(dir) = file_config.data_dir {
                data_dir = ConfigValue::new(resolve(dir), ConfigSource::File);
            }
            if let Some(db_path) = file_config.database_path {
                database_path = Some(ConfigValue::new(resolve(db_path), ConfigSource::File));
            }
            if let Some(id) = file_config.node_id {
                node_id = ConfigValue::new(Some(id), ConfigSource::File);
            }
            if let Some(sync_config) = file_config.sync {
                sync = sync_config;
            }
            if let Some(connectivity_config) = file_config.connectivity {
                connectivity = connectivity_config;
            }
        }

        // Apply environment variable overrides
        if let Some(dir) = env("DRIFTSYNC_DATA_DIR") {
            data_dir = ConfigValue::new(PathBuf::from(dir), ConfigSource::Environment);
        }
        if let Some(db_path) = env("DRIFTSYNC_DATABASE_PATH") {
            database_path = Some(ConfigValue::new(
                PathBuf::from(db_path),
                ConfigSource::Environment,
            ));
        }
        if let Some(id) = env("DRIFTSYNC_NODE_ID") {
            node_id = ConfigValue::new(Some(id), ConfigSource::Environment);
        }
        if let Some(url) = env("DRIFTSYNC_SERVER_URL") {
            sync.server_url = Some(url);
        }
        if let Some(key) = env("DRIFTSYNC_API_KEY") {
            sync.api_key = Some(key);
        }

        // The database lives in the data directory unless placed explicitly
        let database_path = database_path.unwrap_or_else(|| {
            ConfigValue::new(
                data_dir.value.join("driftsync.db"),
                data_dir.source.clone(),
            )
        });

        Ok(Self {
            database_path,
            data_dir,
            node_id,
            config_file,
            sync,
            connectivity,
        })
    }

    /// Default config directory (platform-specific):
    /// - Linux: ~/.config/driftsync/
    /// - macOS: ~/Library/Application Support/driftsync/
    /// - Windows: %APPDATA%/driftsync/
    pub fn default_config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("driftsync")
    }

    /// Default data directory (platform-specific):
    /// - Linux: ~/.local/share/driftsync/
    /// - macOS: ~/Library/Application Support/driftsync/
    /// - Windows: %APPDATA%/driftsync/
    pub fn default_data_dir() -> PathBuf {
        dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("driftsync")
    }

    /// Default config file path (platform-specific config dir + config.yaml)
    pub fn default_config_path() -> PathBuf {
        Self::default_config_dir().join("config.yaml")
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut config = self.clone();
        if let Some(key) = config.sync.api_key.as_mut() {
            let prefix: String = key.chars().take(4).collect();
            *key = format!("{}...", prefix);
        }
        config
    }

    /// Default settings rendered as a config file.
    pub fn template() -> Result<String, serde_yaml::Error> {
        #[derive(Serialize)]
        struct Template {
            sync: SyncConfig,
            connectivity: ConnectivityConfig,
        }

        let body = serde_yaml::to_string(&Template {
            sync: SyncConfig::default(),
            connectivity: ConnectivityConfig::default(),
        })?;
        Ok(format!(
            "# driftsync configuration\n\
             #\n\
             # data_dir: ~/.local/share/driftsync\n\
             # database_path: driftsync.db\n\
             # node_id: a1b2c3d4\n\
             {}",
            body
        ))
    }
}

#[derive(Debug)]
pub enum ConfigError {
    ReadError(PathBuf, std::io::Error),
    ParseError(PathBuf, serde_yaml::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::ReadError(path, e) => {
                write!(f, "Failed to read config file '{}': {}", path.display(), e)
            }
            ConfigError::ParseError(path, e) => {
                write!(f, "Failed to parse config file '{}': {}", path.display(), e)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::tempdir;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    fn write_config(dir: &std::path::Path, lines: &[&str]) -> PathBuf {
        let config_path = dir.join("config.yaml");
        let mut file = std::fs::File::create(&config_path).unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        config_path
    }

    #[test]
    fn test_default_config() {
        let temp_dir = tempdir().unwrap();
        let config_path = temp_dir.path().join("nonexistent.yaml");

        let config = Config::load_with_env(Some(config_path), no_env).unwrap();
        assert!(config
            .database_path
            .value
            .to_string_lossy()
            .contains("driftsync.db"));
        assert_eq!(config.database_path.source, ConfigSource::Default);
        assert_eq!(config.node_id.value, None);
        assert!(config.config_file.is_none());
        assert!(!config.sync.is_configured());
        assert_eq!(config.sync.concurrency, 3);
        assert_eq!(config.sync.request_timeout_ms, 30_000);
        assert_eq!(config.connectivity.probe_timeout_ms, 10_000);
        assert_eq!(config.connectivity.latency_window, 10);
    }

    #[test]
    fn test_load_from_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = write_config(
            temp_dir.path(),
            &[
                "database_path: /custom/path/queue.db",
                "node_id: abc12345",
                "sync:",
                "  server_url: http://localhost:8080",
                "  api_key: secret",
                "  concurrency: 5",
                "connectivity:",
                "  check_interval_ms: 1000",
            ],
        );

        let config = Config::load_with_env(Some(config_path.clone()), no_env).unwrap();
        assert_eq!(
            config.database_path.value,
            PathBuf::from("/custom/path/queue.db")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
        assert_eq!(config.node_id.value.as_deref(), Some("abc12345"));
        assert_eq!(config.node_id.source, ConfigSource::File);
        assert_eq!(config.config_file, Some(config_path));
        assert_eq!(config.sync.concurrency, 5);
        // Unset fields in a present section keep their defaults
        assert_eq!(config.sync.max_retries, DEFAULT_MAX_RETRIES);
        assert_eq!(config.connectivity.check_interval_ms, 1000);
        assert_eq!(config.connectivity.probe_timeout_ms, 10_000);
        assert_eq!(
            config.sync.health_url().as_deref(),
            Some("http://localhost:8080/health")
        );
    }

    #[test]
    fn test_relative_paths_resolve_against_config_dir() {
        let temp_dir = tempdir().unwrap();
        let config_path = write_config(temp_dir.path(), &["data_dir: state"]);

        let config = Config::load_with_env(Some(config_path), no_env).unwrap();
        assert_eq!(config.data_dir.value, temp_dir.path().join("state"));
        assert_eq!(
            config.database_path.value,
            temp_dir.path().join("state").join("driftsync.db")
        );
        assert_eq!(config.database_path.source, ConfigSource::File);
    }

    #[test]
    fn test_env_var_overrides_file() {
        let temp_dir = tempdir().unwrap();
        let config_path = write_config(
            temp_dir.path(),
            &[
                "node_id: fromfile",
                "sync:",
                "  server_url: http://file:8080",
            ],
        );
        let env: HashMap<&str, &str> = [
            ("DRIFTSYNC_NODE_ID", "fromenv1"),
            ("DRIFTSYNC_SERVER_URL", "http://env:9090"),
            ("DRIFTSYNC_DATABASE_PATH", "/env/queue.db"),
        ]
        .into_iter()
        .collect();

        let config =
            Config::load_with_env(Some(config_path), |k| env.get(k).map(|v| v.to_string()))
                .unwrap();
        assert_eq!(config.node_id.value.as_deref(), Some("fromenv1"));
        assert_eq!(config.node_id.source, ConfigSource::Environment);
        assert_eq!(config.sync.server_url.as_deref(), Some("http://env:9090"));
        assert_eq!(config.database_path.value, PathBuf::from("/env/queue.db"));
        assert_eq!(config.database_path.source, ConfigSource::Environment);
    }

    #[test]
    fn test_invalid_yaml_error() {
        let temp_dir = tempdir().unwrap();
        let config_path = write_config(temp_dir.path(), &["invalid: yaml: content: ["]);

        let result = Config::load_with_env(Some(config_path), no_env);
        assert!(result.is_err());
        let err = result.unwrap_err();
        assert!(err.to_string().contains("Failed to parse config file"));
    }

    #[test]
    fn test_redacted_masks_api_key() {
        let temp_dir = tempdir().unwrap();
        let config_path = write_config(
            temp_dir.path(),
            &["sync:", "  api_key: sk-live-123456"],
        );

        let config = Config::load_with_env(Some(config_path), no_env).unwrap();
        assert_eq!(config.redacted().sync.api_key.as_deref(), Some("sk-l..."));
        assert_eq!(config.sync.api_key.as_deref(), Some("sk-live-123456"));
    }

    #[test]
    fn test_monitor_config_conversion() {
        let connectivity = ConnectivityConfig {
            probe_timeout_ms: 2000,
            initial_retry_delay_ms: 500,
            max_retry_delay_ms: 8000,
            backoff_cap: 3,
            ..ConnectivityConfig::default()
        };
        let monitor = connectivity.monitor_config();
        assert_eq!(monitor.probe_timeout, Duration::from_millis(2000));
        assert_eq!(monitor.backoff.initial_delay, Duration::from_millis(500));
        assert_eq!(monitor.backoff.max_delay, Duration::from_millis(8000));
        assert_eq!(monitor.backoff.cap, 3);
    }
}
