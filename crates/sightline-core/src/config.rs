//! Application configuration management.
//!
//! Handles loading, saving, and validating sightline configuration including:
//! - Duty-cycle timings for foreground and background operation
//! - Exit detection timeouts and sighting filters
//! - Resolver retry policy and layout refresh interval
//! - History upload interval
//! - Backend endpoint, credential and settings refresh interval
//! - Log level, production mode and log directory of the agent
//!
//! Loading is layered: built-in defaults, then an optional TOML file, then
//! environment variables of the form `SIGHTLINE__SECTION__KEY`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;

/// Errors raised while loading, saving or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No configuration location could be determined.
    #[error("Configuration not found at {}", .0.display())]
    NotFound(PathBuf),

    /// The configuration file could not be read.
    #[error("Failed to read {}: {source}", path.display())]
    ReadError {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration file could not be written.
    #[error("Failed to write {}: {source}", path.display())]
    WriteError {
        /// Path that failed.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// The layered sources could not be merged or deserialized.
    #[error("Failed to load configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field failed validation.
    #[error("{field}: {message}")]
    ValidationError {
        /// Dotted field path, e.g. `scanner.exit_timeout_ms`.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields failed validation.
    #[error("{} validation errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result alias for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Main application configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SightlineConfig {
    /// Duty cycle and presence detection.
    pub scanner: ScannerConfig,
    /// Event resolution.
    pub resolver: ResolverConfig,
    /// History buffering and upload.
    pub history: HistoryConfig,
    /// Backend endpoint.
    pub backend: BackendConfig,
    /// Local durable storage.
    pub storage: StorageConfig,
    /// Log output.
    pub logging: LoggingConfig,
}

/// Duty cycle and presence detection settings. All durations are milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Radio-on window while the host application is in the foreground.
    pub foreground_scan_ms: u64,
    /// Radio-off window while the host application is in the foreground.
    pub foreground_wait_ms: u64,
    /// Radio-on window while the host application is in the background.
    pub background_scan_ms: u64,
    /// Radio-off window while the host application is in the background.
    pub background_wait_ms: u64,
    /// Delay after un-pausing before exit checks resume (foreground).
    pub foreground_exit_grace_ms: u64,
    /// Delay after un-pausing before exit checks resume (background).
    pub background_exit_grace_ms: u64,
    /// Radio-on absence after which a present beacon is considered gone.
    pub exit_timeout_ms: u64,
    /// If the scanner was stopped for longer than this, presence is cleared on start.
    pub restart_timeout_ms: u64,
    /// Period of the exit check tick.
    pub exit_check_interval_ms: u64,
    /// Sightings weaker than this are ignored. `None` disables the filter.
    pub min_rssi: Option<i16>,
    /// Sightings estimated farther than this many metres are ignored. `None` disables the filter.
    pub max_distance_m: Option<f64>,
    /// Reload presence state from the durable store at startup.
    pub restore_presence: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            foreground_scan_ms: 10_000,
            foreground_wait_ms: 10_000,
            background_scan_ms: 20_000,
            background_wait_ms: 120_000,
            foreground_exit_grace_ms: 2_000,
            background_exit_grace_ms: 3_000,
            exit_timeout_ms: 9_000,
            restart_timeout_ms: 60_000,
            exit_check_interval_ms: 1_000,
            min_rssi: None,
            max_distance_m: None,
            restore_presence: true,
        }
    }
}

impl ScannerConfig {
    /// Returns `(scan, wait, exit_grace)` for the given lifecycle mode.
    ///
    /// The exit grace is clamped to half the scan window when it would otherwise
    /// swallow the whole window.
    #[must_use]
    pub const fn timings(&self, foreground: bool) -> (u64, u64, u64) {
        let (scan, wait, grace) = if foreground {
            (
                self.foreground_scan_ms,
                self.foreground_wait_ms,
                self.foreground_exit_grace_ms,
            )
        } else {
            (
                self.background_scan_ms,
                self.background_wait_ms,
                self.background_exit_grace_ms,
            )
        };
        let grace = if grace >= scan { scan / 2 } else { grace };
        (scan, wait, grace)
    }
}

/// Event resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResolverConfig {
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// Fixed delay between attempts.
    pub retry_delay_ms: u64,
    /// How often the proximity-UUID layout is refreshed.
    pub layout_refresh_interval_ms: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 5_000,
            layout_refresh_interval_ms: 24 * 60 * 60 * 1_000,
        }
    }
}

/// History buffering settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoryConfig {
    /// How often buffered history is uploaded.
    pub upload_interval_ms: u64,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            upload_interval_ms: 30 * 60 * 1_000,
        }
    }
}

/// Backend endpoint settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Base URL of the resolution backend.
    pub base_url: String,
    /// API key sent with every request.
    pub api_key: Option<String>,
    /// Per-request timeout.
    pub request_timeout_ms: u64,
    /// How often backend-managed settings are fetched.
    pub settings_refresh_interval_ms: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/".to_string(),
            api_key: None,
            request_timeout_ms: 15_000,
            settings_refresh_interval_ms: 6 * 60 * 60 * 1_000,
        }
    }
}

impl BackendConfig {
    /// Request timeout as a [`Duration`].
    #[must_use]
    pub const fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

/// Local storage settings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for durable state. Defaults to the platform data directory.
    pub data_dir: Option<PathBuf>,
}

/// Log output settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Base level (`info`, `debug`, ...) or a full filter directive string.
    /// `RUST_LOG` takes precedence when set.
    pub level: String,
    /// JSON rolling files plus compact stdout, with sighting-level targets capped.
    pub production: bool,
    /// Directory of the rolling log files. Defaults to the platform log directory.
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            production: false,
            directory: None,
        }
    }
}

impl SightlineConfig {
    /// Load configuration from the default location, falling back to defaults.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file exists but cannot be parsed or is invalid.
    pub fn load() -> ConfigResult<Self> {
        Self::load_from(&default_config_path()?)
    }

    /// Load configuration from `path` (if it exists), then apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if the sources cannot be merged or the result is invalid.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let settings = config::Config::builder()
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix("SIGHTLINE")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;
        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to `path` as pretty TOML.
    ///
    /// # Errors
    ///
    /// Returns an error if the config file cannot be written.
    pub fn save_to(&self, path: &Path) -> ConfigResult<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Validate all sections, collecting every problem.
    ///
    /// # Errors
    ///
    /// Returns a single [`ConfigError::ValidationError`] or
    /// [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let mut check = |ok: bool, field: &str, message: &str| {
            if !ok {
                errors.push(ConfigError::ValidationError {
                    field: field.to_string(),
                    message: message.to_string(),
                });
            }
        };

        let s = &self.scanner;
        check(s.foreground_scan_ms > 0, "scanner.foreground_scan_ms", "must be positive");
        check(s.background_scan_ms > 0, "scanner.background_scan_ms", "must be positive");
        check(s.exit_timeout_ms > 0, "scanner.exit_timeout_ms", "must be positive");
        check(
            s.exit_check_interval_ms > 0,
            "scanner.exit_check_interval_ms",
            "must be positive",
        );
        if let Some(max) = s.max_distance_m {
            check(max > 0.0, "scanner.max_distance_m", "must be positive");
        }
        check(
            self.resolver.layout_refresh_interval_ms > 0,
            "resolver.layout_refresh_interval_ms",
            "must be positive",
        );
        check(
            self.history.upload_interval_ms > 0,
            "history.upload_interval_ms",
            "must be positive",
        );
        check(
            self.backend.settings_refresh_interval_ms > 0,
            "backend.settings_refresh_interval_ms",
            "must be positive",
        );
        check(
            Url::parse(&self.backend.base_url).is_ok(),
            "backend.base_url",
            "must be an absolute URL",
        );
        if let Some(key) = &self.backend.api_key {
            check(!key.trim().is_empty(), "backend.api_key", "must not be blank");
        }
        check(!self.logging.level.trim().is_empty(), "logging.level", "must not be blank");

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }

    /// Directory for durable state, resolving the platform default when unset.
    ///
    /// # Errors
    ///
    /// Returns an error if no platform data directory can be determined.
    pub fn data_dir(&self) -> ConfigResult<PathBuf> {
        match &self.storage.data_dir {
            Some(dir) => Ok(dir.clone()),
            None => crate::storage::default_data_dir(),
        }
    }
}

/// Get the default configuration file path.
///
/// On Linux: `/etc/sightline/config.toml`
/// Elsewhere: the platform config directory, e.g. `~/Library/Application Support/sightline/`.
///
/// # Errors
///
/// Returns an error if no platform config directory can be determined.
pub fn default_config_path() -> ConfigResult<PathBuf> {
    #[cfg(target_os = "linux")]
    {
        Ok(PathBuf::from("/etc/sightline/config.toml"))
    }
    #[cfg(not(target_os = "linux"))]
    {
        let dirs = directories::ProjectDirs::from("", "", "sightline")
            .ok_or_else(|| ConfigError::NotFound(PathBuf::from("config.toml")))?;
        Ok(dirs.config_dir().join("config.toml"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_defaults_are_valid() {
        assert!(SightlineConfig::default().validate().is_ok());
    }

    #[test]
    fn test_exit_grace_clamped_to_half_scan() {
        let scanner = ScannerConfig {
            foreground_scan_ms: 4_000,
            foreground_exit_grace_ms: 5_000,
            ..ScannerConfig::default()
        };
        assert_eq!(scanner.timings(true), (4_000, 10_000, 2_000));

        let (_, _, grace) = scanner.timings(false);
        assert_eq!(grace, 3_000);
    }

    #[test]
    fn test_validation_collects_all_errors() {
        let mut config = SightlineConfig::default();
        config.scanner.exit_timeout_ms = 0;
        config.backend.base_url = "not a url".to_string();

        match config.validate() {
            Err(ConfigError::MultipleValidationErrors(errors)) => assert_eq!(errors.len(), 2),
            other => panic!("expected multiple errors, got {other:?}"),
        }
    }

    #[test]
    fn test_single_validation_error() {
        let mut config = SightlineConfig::default();
        config.backend.api_key = Some("   ".to_string());

        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("backend.api_key"));
    }

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempdir().unwrap();
        let config = SightlineConfig::load_from(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config.scanner, ScannerConfig::default());
    }

    #[test]
    fn test_save_then_load_partial_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");

        let mut config = SightlineConfig::default();
        config.scanner.min_rssi = Some(-80);
        config.resolver.max_retries = 5;
        config.save_to(&path).unwrap();

        let loaded = SightlineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scanner.min_rssi, Some(-80));
        assert_eq!(loaded.resolver.max_retries, 5);
    }

    #[test]
    fn test_partial_toml_keeps_other_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scanner]\nexit_timeout_ms = 15000\n").unwrap();

        let loaded = SightlineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.scanner.exit_timeout_ms, 15_000);
        assert_eq!(loaded.scanner.foreground_scan_ms, 10_000);
        assert_eq!(loaded.history, HistoryConfig::default());
    }

    #[test]
    fn test_logging_section_from_toml() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "[logging]\nlevel = \"debug\"\nproduction = true\ndirectory = \"/tmp/sightline-logs\"\n",
        )
        .unwrap();

        let loaded = SightlineConfig::load_from(&path).unwrap();
        assert_eq!(loaded.logging.level, "debug");
        assert!(loaded.logging.production);
        assert_eq!(loaded.logging.directory, Some(PathBuf::from("/tmp/sightline-logs")));
    }

    #[test]
    fn test_invalid_file_is_rejected() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scanner]\nexit_timeout_ms = 0\n").unwrap();

        assert!(matches!(
            SightlineConfig::load_from(&path),
            Err(ConfigError::ValidationError { .. })
        ));
    }
}
