//! Configuration system using TOML files.
//!
//! Config is stored in the OS-standard config directory:
//! - Windows: %APPDATA%\portfolio-enricher\config.toml
//! - macOS: ~/Library/Application Support/portfolio-enricher/config.toml
//! - Linux: ~/.config/portfolio-enricher/config.toml
//!
//! The config file is human-readable and editable. Every section is optional;
//! missing values fall back to defaults. The API key can also be supplied
//! through `FINNHUB_API_KEY` or `--api-key`, which take precedence.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::enrichment::finnhub;
use crate::enrichment::{DEFAULT_TTL, EngineSettings, GateLimits, MemoryCache, RetryPolicy};

/// Application configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// API credentials (keep separate for potential future encryption)
    pub credentials: Credentials,

    /// Provider endpoint settings
    pub provider: ProviderConfig,

    /// Throughput limits and retries
    pub lookup: LookupConfig,

    /// Lookup cache settings
    pub cache: CacheConfig,
}

/// API credentials
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Credentials {
    /// Finnhub API key (get one at https://finnhub.io/register)
    pub finnhub_api_key: Option<String>,
}

/// Provider endpoint settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    /// API root, without trailing slash
    pub base_url: String,

    /// Per-request timeout in seconds
    pub request_timeout_secs: u64,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: finnhub::DEFAULT_BASE_URL.to_string(),
            request_timeout_secs: finnhub::DEFAULT_TIMEOUT.as_secs(),
        }
    }
}

impl ProviderConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }
}

/// Throughput limits and retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LookupConfig {
    /// Provider calls allowed in flight at once
    pub max_concurrent: usize,

    /// Provider calls allowed to start per window
    pub calls_per_window: usize,

    /// Rolling window length in seconds
    pub window_secs: u64,

    /// Longest a row waits for admission before failing as rate limited
    pub admission_timeout_secs: u64,

    /// Attempts per call for transient failures, including the first
    pub retry_attempts: u32,

    /// Backoff before the first retry; doubles after each attempt
    pub retry_base_delay_ms: u64,
}

impl Default for LookupConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 5,
            calls_per_window: 30,
            window_secs: 60,
            admission_timeout_secs: 30,
            retry_attempts: 3,
            retry_base_delay_ms: 500,
        }
    }
}

impl LookupConfig {
    pub fn gate_limits(&self) -> GateLimits {
        GateLimits {
            max_concurrent: self.max_concurrent,
            calls_per_window: self.calls_per_window,
            window: Duration::from_secs(self.window_secs),
        }
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
            ..Default::default()
        }
    }
}

/// Lookup cache settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Entry lifetime in seconds
    pub ttl_secs: u64,

    /// Keep resolutions between runs
    pub persist: bool,

    /// Snapshot file (defaults to the user cache directory)
    pub snapshot_path: Option<PathBuf>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: DEFAULT_TTL.as_secs(),
            persist: true,
            snapshot_path: None,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn snapshot_path(&self) -> PathBuf {
        self.snapshot_path
            .clone()
            .unwrap_or_else(MemoryCache::default_snapshot_path)
    }
}

impl Config {
    /// The configured API key, if non-blank.
    pub fn api_key(&self) -> Option<String> {
        self.credentials
            .finnhub_api_key
            .as_deref()
            .map(str::trim)
            .filter(|key| !key.is_empty())
            .map(str::to_string)
    }

    /// Engine tuning derived from the `[lookup]` and `[cache]` sections.
    pub fn engine_settings(&self) -> EngineSettings {
        EngineSettings {
            limits: self.lookup.gate_limits(),
            admission_timeout: Duration::from_secs(self.lookup.admission_timeout_secs),
            cache_ttl: self.cache.ttl(),
        }
    }
}

// ============================================================================
// Config File Operations
// ============================================================================

/// Get the config directory path
pub fn config_dir() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("portfolio-enricher"))
}

/// Get the full path to the config file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|d| d.join("config.toml"))
}

/// Load configuration from disk
///
/// Returns default config if file doesn't exist or can't be parsed.
/// Logs warnings but doesn't fail - we always return a usable config.
pub fn load() -> Config {
    let Some(path) = config_path() else {
        tracing::warn!("Could not determine config directory, using defaults");
        return Config::default();
    };
    load_from(&path)
}

/// Load configuration from a specific file, with the same fallbacks as [`load`].
pub fn load_from(path: &Path) -> Config {
    if !path.exists() {
        tracing::info!("No config file found at {:?}, using defaults", path);
        return Config::default();
    }

    match std::fs::read_to_string(path) {
        Ok(contents) => match toml::from_str(&contents) {
            Ok(config) => {
                tracing::info!("Loaded config from {:?}", path);
                config
            }
            Err(e) => {
                tracing::error!("Failed to parse config file {:?}: {}", path, e);
                tracing::warn!("Using default configuration");
                Config::default()
            }
        },
        Err(e) => {
            tracing::error!("Failed to read config file {:?}: {}", path, e);
            Config::default()
        }
    }
}

/// Save configuration to disk
///
/// Creates the config directory if it doesn't exist.
pub fn save_to(config: &Config, path: &Path) -> Result<(), ConfigError> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir).map_err(|e| ConfigError::CreateDir(dir.to_path_buf(), e))?;
    }

    // Serialize to pretty TOML
    let contents = toml::to_string_pretty(config).map_err(ConfigError::Serialize)?;

    // Write atomically (write to temp, then rename)
    let temp_path = path.with_extension("toml.tmp");
    std::fs::write(&temp_path, &contents).map_err(|e| ConfigError::Write(temp_path.clone(), e))?;
    std::fs::rename(&temp_path, path)
        .map_err(|e| ConfigError::Rename(temp_path, path.to_path_buf(), e))?;

    tracing::info!("Saved config to {:?}", path);
    Ok(())
}

// ============================================================================
// Error Types
// ============================================================================

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to create config directory {0}: {1}")]
    CreateDir(PathBuf, std::io::Error),

    #[error("Failed to serialize config: {0}")]
    Serialize(toml::ser::Error),

    #[error("Failed to write config to {0}: {1}")]
    Write(PathBuf, std::io::Error),

    #[error("Failed to rename temp file {0} to {1}: {2}")]
    Rename(PathBuf, PathBuf, std::io::Error),
}

// ============================================================================
// Tests
// ============================================================================
