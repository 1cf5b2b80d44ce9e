//! Configuration structures for the sdd engine.
//!
//! - [`WatchConfig`] - Watcher pool settings (debouncing, recursion, polling)
//! - [`ProjectConfig`] - Project root and liveness checking
//! - [`CacheConfig`] - Reactive cache settings
//! - [`Config`] - Root configuration combining all settings
//!
//! Every section is `#[serde(default)]`, so a configuration file only needs
//! to name the values it overrides.

use std::time::Duration;

use camino::{Utf8Path, Utf8PathBuf};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Configuration for the watcher pool.
///
/// # Examples
///
/// ```
/// use sdd_core::WatchConfig;
///
/// let config = WatchConfig::default();
/// assert_eq!(config.debounce_ms, 100);
/// assert!(!config.recursive);
/// assert_eq!(config.poll_interval_ms, 250);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchConfig {
    /// Debounce window in milliseconds.
    ///
    /// Raw events for one subscription within this window collapse into a
    /// single callback invocation.
    pub debounce_ms: u64,

    /// Whether subscriptions watch subdirectories recursively by default.
    pub recursive: bool,

    /// Interval at which a not-yet-existing path is polled for, in milliseconds.
    pub poll_interval_ms: u64,
}

impl WatchConfig {
    /// Returns the debounce window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }

    /// Returns the polling interval as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }
}

impl Default for WatchConfig {
    fn default() -> Self {
        Self {
            debounce_ms: 100,
            recursive: false,
            poll_interval_ms: 250,
        }
    }
}

/// Configuration for a watched project root.
///
/// # Examples
///
/// ```
/// use sdd_core::ProjectConfig;
///
/// let config = ProjectConfig::default();
/// assert!(config.enabled);
/// assert_eq!(config.liveness_interval_ms, 2000);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    /// Root directory of the project.
    pub root: Utf8PathBuf,

    /// Whether the project watcher is enabled at all.
    pub enabled: bool,

    /// Interval between liveness checks of the root, in milliseconds.
    pub liveness_interval_ms: u64,

    /// Debounce window for the recursive root watch, in milliseconds.
    pub debounce_ms: u64,
}

impl ProjectConfig {
    /// Returns the liveness interval as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn liveness_interval(&self) -> Duration {
        Duration::from_millis(self.liveness_interval_ms)
    }

    /// Returns the root watch debounce window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            root: Utf8PathBuf::from("."),
            enabled: true,
            liveness_interval_ms: 2000,
            debounce_ms: 100,
        }
    }
}

/// Configuration for the reactive cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Debounce window used for every watch the cache acquires, in milliseconds.
    pub debounce_ms: u64,
}

impl CacheConfig {
    /// Returns the debounce window as a [`Duration`].
    #[inline]
    #[must_use]
    pub const fn debounce(&self) -> Duration {
        Duration::from_millis(self.debounce_ms)
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self { debounce_ms: 50 }
    }
}

/// Root configuration for the sdd engine.
///
/// # Examples
///
/// ```
/// use sdd_core::Config;
///
/// let config = Config::default();
/// assert!(config.validate().is_ok());
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Watcher pool configuration.
    pub watch: WatchConfig,

    /// Project root configuration.
    pub project: ProjectConfig,

    /// Reactive cache configuration.
    pub cache: CacheConfig,
}

impl Config {
    /// Parses a configuration from a JSON string and validates it.
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Reads, parses and validates a JSON configuration file.
    pub fn from_json_file(path: &Utf8Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Self::from_json_str(&raw)
    }

    /// Checks option values that serde cannot reject on its own.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.watch.poll_interval_ms == 0 {
            return Err(ConfigError::invalid_option(
                "watch.poll_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.project.liveness_interval_ms == 0 {
            return Err(ConfigError::invalid_option(
                "project.liveness_interval_ms",
                "must be greater than zero",
            ));
        }
        if self.project.root.as_str().is_empty() {
            return Err(ConfigError::InvalidPath {
                path: self.project.root.clone(),
                reason: "project root must not be empty".to_owned(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_watch_config_defaults() {
        let config = WatchConfig::default();
        assert_eq!(config.debounce(), Duration::from_millis(100));
        assert_eq!(config.poll_interval(), Duration::from_millis(250));
        assert!(!config.recursive);
    }

    #[test]
    fn test_project_config_defaults() {
        let config = ProjectConfig::default();
        assert_eq!(config.root, Utf8PathBuf::from("."));
        assert!(config.enabled);
        assert_eq!(config.liveness_interval(), Duration::from_secs(2));
    }

    #[test]
    fn test_config_serialization_roundtrip() {
        let config = Config::default();
        let json = serde_json::to_string(&config).unwrap();
        let parsed: Config = serde_json::from_str(&json).unwrap();
        assert_eq!(config, parsed);
    }

    #[test]
    fn test_config_deserialize_with_missing_fields() {
        let config = Config::from_json_str(r#"{"project": {"root": "/srv/specs"}}"#).unwrap();
        assert_eq!(config.project.root, Utf8PathBuf::from("/srv/specs"));
        assert!(config.project.enabled);
        assert_eq!(config.watch.debounce_ms, 100);
        assert_eq!(config.cache.debounce_ms, 50);
    }

    #[test]
    fn test_config_rejects_zero_poll_interval() {
        let err = Config::from_json_str(r#"{"watch": {"poll_interval_ms": 0}}"#).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidOption { ref option, .. } if option == "watch.poll_interval_ms"));
    }

    #[test]
    fn test_config_rejects_malformed_json() {
        let err = Config::from_json_str("{ not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_config_from_json_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = Utf8PathBuf::from_path_buf(dir.path().join("sdd.json")).unwrap();
        std::fs::write(&path, r#"{"cache": {"debounce_ms": 10}}"#).unwrap();

        let config = Config::from_json_file(&path).unwrap();
        assert_eq!(config.cache.debounce(), Duration::from_millis(10));
    }

    #[test]
    fn test_cache_config_snapshot() {
        insta::assert_snapshot!(
            serde_json::to_string(&CacheConfig::default()).unwrap(),
            @r#"{"debounce_ms":50}"#
        );
    }
}
