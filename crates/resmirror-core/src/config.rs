//! Application configuration
//!
//! Configuration is loaded from:
//! 1. Default values
//! 2. Config file (~/.config/resmirror/config.toml)
//! 3. Environment variables (RESMIRROR_* prefix)
//!
//! Environment variables take precedence over config file values.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::{SyncError, SyncResult};
use crate::snapshot::RetryConfig;
use crate::transport::TransportConfig;

/// Environment variable prefix
const ENV_PREFIX: &str = "RESMIRROR";

/// Path the realtime endpoint is mounted on when not configured
const DEFAULT_REALTIME_PATH: &str = "realtime";

/// Application configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    /// Base URL of the resource REST API
    #[serde(default = "default_server_url")]
    pub server_url: String,

    /// WebSocket endpoint (derived from server_url if unset)
    #[serde(default)]
    pub realtime_url: Option<String>,

    /// Resource types mirrored by `watch` when none are given
    #[serde(default)]
    pub collections: Vec<String>,

    /// Reconnect backoff for the realtime connection
    #[serde(default)]
    pub reconnect: ReconnectSettings,

    /// Retry policy for snapshot fetches
    #[serde(default)]
    pub snapshot: SnapshotSettings,
}

/// Reconnect backoff, in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconnectSettings {
    #[serde(default = "default_reconnect_initial_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_reconnect_max_ms")]
    pub max_delay_ms: u64,
}

impl Default for ReconnectSettings {
    fn default() -> Self {
        Self {
            initial_delay_ms: default_reconnect_initial_ms(),
            max_delay_ms: default_reconnect_max_ms(),
        }
    }
}

/// Snapshot retry policy, delays in milliseconds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotSettings {
    #[serde(default = "default_snapshot_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_snapshot_initial_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_snapshot_max_ms")]
    pub max_delay_ms: u64,
}

impl Default for SnapshotSettings {
    fn default() -> Self {
        Self {
            max_attempts: default_snapshot_attempts(),
            initial_delay_ms: default_snapshot_initial_ms(),
            max_delay_ms: default_snapshot_max_ms(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: default_server_url(),
            realtime_url: None,
            collections: Vec::new(),
            reconnect: ReconnectSettings::default(),
            snapshot: SnapshotSettings::default(),
        }
    }
}

impl Config {
    /// Load configuration from default location and environment
    ///
    /// Order of precedence (highest to lowest):
    /// 1. Environment variables (RESMIRROR_SERVER_URL, RESMIRROR_REALTIME_URL,
    ///    RESMIRROR_COLLECTIONS)
    /// 2. Config file (~/.config/resmirror/config.toml or RESMIRROR_CONFIG)
    /// 3. Default values
    pub fn load() -> Result<Self> {
        Self::load_from_path(&Self::config_file_path())
    }

    /// Load configuration, using a CLI-provided path if given
    pub fn load_with_cli_override(path: Option<&PathBuf>) -> Result<Self> {
        match path {
            Some(path) => Self::load_from_path(path),
            None => Self::load(),
        }
    }

    /// Load configuration from a specific path
    ///
    /// Environment variables are still applied as overrides.
    /// If the file doesn't exist, defaults are used.
    pub fn load_from_path(path: &Path) -> Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file: {:?}", path))?;
            toml::from_str(&content)
                .with_context(|| format!("Failed to parse config file: {:?}", path))?
        } else {
            Self::default()
        };

        config.apply_env_overrides();
        Ok(config)
    }

    /// Load configuration from a TOML string (useful for testing)
    pub fn load_from_str(toml_content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(toml_content).context("Failed to parse config TOML")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Apply environment variable overrides
    fn apply_env_overrides(&mut self) {
        // RESMIRROR_SERVER_URL
        if let Ok(val) = std::env::var(format!("{}_SERVER_URL", ENV_PREFIX)) {
            if !val.is_empty() {
                self.server_url = val;
            }
        }

        // RESMIRROR_REALTIME_URL
        if let Ok(val) = std::env::var(format!("{}_REALTIME_URL", ENV_PREFIX)) {
            self.realtime_url = if val.is_empty() { None } else { Some(val) };
        }

        // RESMIRROR_COLLECTIONS
        if let Ok(val) = std::env::var(format!("{}_COLLECTIONS", ENV_PREFIX)) {
            self.collections = parse_collections(&val);
        }
    }

    /// Save configuration to the default file
    pub fn save(&self) -> Result<()> {
        self.save_to_path(&Self::config_file_path())
    }

    /// Save configuration to a specific file
    pub fn save_to_path(&self, config_path: &Path) -> Result<()> {
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let content = toml::to_string_pretty(self).context("Failed to serialize config")?;
        std::fs::write(config_path, content)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;
        Ok(())
    }

    /// Get the config file path
    ///
    /// Can be overridden with RESMIRROR_CONFIG environment variable
    pub fn config_file_path() -> PathBuf {
        if let Ok(path) = std::env::var(format!("{}_CONFIG", ENV_PREFIX)) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("resmirror")
            .join("config.toml")
    }

    /// The WebSocket endpoint, derived from `server_url` when not set
    ///
    /// `http` maps to `ws` and `https` to `wss`, with `realtime` appended.
    pub fn effective_realtime_url(&self) -> SyncResult<String> {
        if let Some(ref url) = self.realtime_url {
            return Ok(url.clone());
        }

        let base = reqwest::Url::parse(&self.server_url).map_err(|e| SyncError::InvalidUrl {
            url: self.server_url.clone(),
            reason: e.to_string(),
        })?;
        let scheme = match base.scheme() {
            "http" => "ws",
            "https" => "wss",
            other => {
                return Err(SyncError::InvalidUrl {
                    url: self.server_url.clone(),
                    reason: format!("cannot derive a realtime URL from scheme '{}'", other),
                })
            }
        };

        let mut url = base;
        if url.set_scheme(scheme).is_err() {
            return Err(SyncError::InvalidUrl {
                url: self.server_url.clone(),
                reason: "scheme change rejected".to_string(),
            });
        }
        let path = format!("{}/{}", url.path().trim_end_matches('/'), DEFAULT_REALTIME_PATH);
        url.set_path(&path);
        Ok(url.to_string())
    }

    /// Transport settings for the realtime connection
    pub fn transport_config(&self) -> SyncResult<TransportConfig> {
        Ok(TransportConfig {
            url: self.effective_realtime_url()?,
            initial_reconnect_delay: Duration::from_millis(self.reconnect.initial_delay_ms),
            max_reconnect_delay: Duration::from_millis(self.reconnect.max_delay_ms),
            ..TransportConfig::default()
        })
    }

    /// Retry policy for snapshot fetches
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.snapshot.max_attempts,
            initial_delay: Duration::from_millis(self.snapshot.initial_delay_ms),
            max_delay: Duration::from_millis(self.snapshot.max_delay_ms),
            ..RetryConfig::default()
        }
    }
}

/// Split a comma-separated collection list, dropping blanks
pub fn parse_collections(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn default_server_url() -> String {
    "http://localhost:5001".to_string()
}

fn default_reconnect_initial_ms() -> u64 {
    1_000
}

fn default_reconnect_max_ms() -> u64 {
    30_000
}

fn default_snapshot_attempts() -> u32 {
    5
}

fn default_snapshot_initial_ms() -> u64 {
    500
}

fn default_snapshot_max_ms() -> u64 {
    10_000
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::Mutex;
    use tempfile::TempDir;

    // Mutex to serialize tests that touch environment variables
    static ENV_MUTEX: Mutex<()> = Mutex::new(());

    /// Guard that locks env access and saves/restores env vars
    struct EnvGuard<'a> {
        _lock: std::sync::MutexGuard<'a, ()>,
        saved: Vec<(String, Option<String>)>,
    }

    impl<'a> EnvGuard<'a> {
        fn new(vars: &[&str]) -> Self {
            let lock = ENV_MUTEX.lock().unwrap_or_else(|e| e.into_inner());
            let saved = vars
                .iter()
                .map(|&name| (name.to_string(), env::var(name).ok()))
                .collect();
            for name in vars {
                env::remove_var(name);
            }
            Self { _lock: lock, saved }
        }
    }

    impl Drop for EnvGuard<'_> {
        fn drop(&mut self) {
            for (name, value) in &self.saved {
                match value {
                    Some(v) => env::set_var(name, v),
                    None => env::remove_var(name),
                }
            }
        }
    }

    const ENV_VARS: &[&str] = &[
        "RESMIRROR_SERVER_URL",
        "RESMIRROR_REALTIME_URL",
        "RESMIRROR_COLLECTIONS",
    ];

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.server_url, "http://localhost:5001");
        assert!(config.realtime_url.is_none());
        assert!(config.collections.is_empty());
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 30_000);
    }

    #[test]
    fn test_derived_realtime_url() {
        let config = Config::default();
        assert_eq!(
            config.effective_realtime_url().unwrap(),
            "ws://localhost:5001/realtime"
        );

        let config = Config {
            server_url: "https://example.com/api/".to_string(),
            ..Config::default()
        };
        assert_eq!(
            config.effective_realtime_url().unwrap(),
            "wss://example.com/api/realtime"
        );
    }

    #[test]
    fn test_explicit_realtime_url() {
        let config = Config {
            realtime_url: Some("ws://push.example.com/socket".to_string()),
            ..Config::default()
        };
        assert_eq!(
            config.effective_realtime_url().unwrap(),
            "ws://push.example.com/socket"
        );
    }

    #[test]
    fn test_realtime_url_bad_scheme() {
        let config = Config {
            server_url: "ftp://example.com".to_string(),
            ..Config::default()
        };
        assert!(matches!(
            config.effective_realtime_url(),
            Err(SyncError::InvalidUrl { .. })
        ));
    }

    #[test]
    fn test_env_override_collections() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();
        env::set_var("RESMIRROR_COLLECTIONS", "todo_list, power,,");
        config.apply_env_overrides();

        assert_eq!(config.collections, vec!["todo_list", "power"]);
    }

    #[test]
    fn test_env_override_realtime_url() {
        let _guard = EnvGuard::new(ENV_VARS);

        let mut config = Config::default();

        env::set_var("RESMIRROR_REALTIME_URL", "ws://localhost:9000/rt");
        config.apply_env_overrides();
        assert_eq!(config.realtime_url, Some("ws://localhost:9000/rt".to_string()));

        // Empty string clears it
        env::set_var("RESMIRROR_REALTIME_URL", "");
        config.apply_env_overrides();
        assert!(config.realtime_url.is_none());
    }

    #[test]
    fn test_load_from_str() {
        let _guard = EnvGuard::new(ENV_VARS);

        let toml = r#"
            server_url = "http://api.local:8080"
            collections = ["todo_list"]

            [reconnect]
            max_delay_ms = 5000

            [snapshot]
            max_attempts = 2
        "#;

        let config = Config::load_from_str(toml).unwrap();
        assert_eq!(config.server_url, "http://api.local:8080");
        assert_eq!(config.collections, vec!["todo_list"]);
        assert_eq!(config.reconnect.initial_delay_ms, 1_000);
        assert_eq!(config.reconnect.max_delay_ms, 5_000);

        let retry = config.retry_config();
        assert_eq!(retry.max_attempts, 2);
        assert_eq!(retry.initial_delay, Duration::from_millis(500));

        let transport = config.transport_config().unwrap();
        assert_eq!(transport.url, "ws://api.local:8080/realtime");
        assert_eq!(transport.max_reconnect_delay, Duration::from_secs(5));
    }

    #[test]
    fn test_save_and_reload() {
        let _guard = EnvGuard::new(ENV_VARS);
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("nested").join("config.toml");

        let config = Config {
            collections: vec!["power".to_string()],
            realtime_url: Some("ws://localhost:5001/realtime".to_string()),
            ..Config::default()
        };
        config.save_to_path(&path).unwrap();

        let loaded = Config::load_from_path(&path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_from_path_missing_file() {
        let _guard = EnvGuard::new(ENV_VARS);

        let path = PathBuf::from("/nonexistent/config.toml");
        let config = Config::load_from_path(&path).unwrap();
        assert_eq!(config, Config::default());
    }
}
