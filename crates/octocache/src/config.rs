use std::path::{Path, PathBuf};
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::options::{EntryOptions, Priority};

/// Default configuration file looked up when no path is given.
pub const DEFAULT_CONFIG_FILE: &str = "octocache.toml";

/// Environment variable prefix, e.g. `OCTOCACHE__ENTRY__DURATION_SECS=60`.
pub const ENV_PREFIX: &str = "OCTOCACHE";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct OctocacheConfig {
    /// Namespace prepended to every key (keeps applications sharing one Redis
    /// apart)
    #[serde(default)]
    pub key_prefix: Option<String>,
    /// Default entry options
    #[serde(default)]
    pub entry: EntryConfig,
    /// Local (L1) tier
    #[serde(default)]
    pub local: LocalCacheConfig,
    /// Redis distributed tier and backplane
    #[serde(default)]
    pub redis: RedisConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl OctocacheConfig {
    pub fn validate(&self) -> Result<(), String> {
        if self.entry.duration_secs == 0 {
            return Err("entry.duration_secs must be > 0".into());
        }
        if self.entry.fail_safe_throttle_secs == 0 {
            return Err("entry.fail_safe_throttle_secs must be > 0".into());
        }
        if let Some(threshold) = self.entry.eager_refresh_threshold {
            if !(threshold > 0.0 && threshold < 1.0) {
                return Err(
                    "entry.eager_refresh_threshold must be between 0 and 1 (exclusive)".into(),
                );
            }
        }
        if self.local.max_capacity == 0 {
            return Err("local.max_capacity must be > 0".into());
        }
        if self.redis.enabled {
            if self.redis.url.trim().is_empty() {
                return Err("redis.enabled=true requires redis.url".into());
            }
            if self.redis.channel.trim().is_empty() {
                return Err("redis.channel must not be empty".into());
            }
            if self.redis.pool_size == 0 {
                return Err("redis.pool_size must be > 0".into());
            }
        }
        let lvl = self.logging.level.to_ascii_lowercase();
        let valid_levels = ["trace", "debug", "info", "warn", "error", "off"];
        if !valid_levels.contains(&lvl.as_str()) {
            return Err(format!("logging.level must be one of {valid_levels:?}"));
        }
        Ok(())
    }

    /// Default entry options derived from the `entry` section.
    pub fn entry_options(&self) -> EntryOptions {
        EntryOptions::default()
            .with_duration(Duration::from_secs(self.entry.duration_secs))
            .with_priority(self.entry.priority)
            .with_fail_safe(self.entry.fail_safe)
            .with_eager_refresh_threshold(self.entry.eager_refresh_threshold)
            .with_fail_safe_max_duration(Duration::from_secs(
                self.entry.fail_safe_max_duration_secs,
            ))
            .with_fail_safe_throttle_duration(Duration::from_secs(
                self.entry.fail_safe_throttle_secs,
            ))
    }

    /// Parse a TOML document (no environment overrides).
    pub fn from_toml_str(toml: &str) -> Result<Self, CacheError> {
        let cfg = Config::builder()
            .add_source(File::from_str(toml, FileFormat::Toml))
            .build()
            .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
        let parsed: OctocacheConfig = cfg
            .try_deserialize()
            .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
        parsed.validate().map_err(CacheError::configuration)?;
        Ok(parsed)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryConfig {
    /// Logical lifetime of entries in seconds
    #[serde(default = "default_duration_secs")]
    pub duration_secs: u64,

    #[serde(default)]
    pub priority: Priority,

    /// Serve stale values when population fails
    #[serde(default = "default_fail_safe")]
    pub fail_safe: bool,

    /// Fraction of the duration after which hits refresh in the background
    #[serde(default = "default_eager_refresh_threshold")]
    pub eager_refresh_threshold: Option<f32>,

    /// How long expired entries are kept around for fail-safe
    #[serde(default = "default_fail_safe_max_duration_secs")]
    pub fail_safe_max_duration_secs: u64,

    /// Lifetime of a stale value re-served after a failed population
    #[serde(default = "default_fail_safe_throttle_secs")]
    pub fail_safe_throttle_secs: u64,
}

fn default_duration_secs() -> u64 {
    300 // 5 minutes
}

fn default_fail_safe() -> bool {
    true
}

fn default_eager_refresh_threshold() -> Option<f32> {
    Some(0.5)
}

fn default_fail_safe_max_duration_secs() -> u64 {
    86_400 // 1 day
}

fn default_fail_safe_throttle_secs() -> u64 {
    30
}

impl Default for EntryConfig {
    fn default() -> Self {
        Self {
            duration_secs: default_duration_secs(),
            priority: Priority::default(),
            fail_safe: default_fail_safe(),
            eager_refresh_threshold: default_eager_refresh_threshold(),
            fail_safe_max_duration_secs: default_fail_safe_max_duration_secs(),
            fail_safe_throttle_secs: default_fail_safe_throttle_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LocalCacheConfig {
    /// Local (L1) cache capacity, in normal-priority entries
    #[serde(default = "default_local_max_capacity")]
    pub max_capacity: u64,
}

fn default_local_max_capacity() -> u64 {
    10_000
}

impl Default for LocalCacheConfig {
    fn default() -> Self {
        Self {
            max_capacity: default_local_max_capacity(),
        }
    }
}

/// Redis configuration for the distributed tier
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedisConfig {
    /// Enable Redis (gracefully degrades without it)
    /// Default: false (local-only)
    #[serde(default = "default_redis_enabled")]
    pub enabled: bool,

    /// Redis connection URL (e.g., "redis://localhost:6379")
    #[serde(default = "default_redis_url")]
    pub url: String,

    /// Connection pool size
    #[serde(default = "default_redis_pool_size")]
    pub pool_size: usize,

    /// Connection timeout in milliseconds
    #[serde(default = "default_redis_timeout_ms")]
    pub timeout_ms: u64,

    /// Pub/sub channel used by the backplane
    #[serde(default = "default_redis_channel")]
    pub channel: String,
}

fn default_redis_enabled() -> bool {
    false
}

fn default_redis_url() -> String {
    "redis://localhost:6379".to_string()
}

fn default_redis_pool_size() -> usize {
    10
}

fn default_redis_timeout_ms() -> u64 {
    5000
}

fn default_redis_channel() -> String {
    "octocache:invalidate".to_string()
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: default_redis_enabled(),
            url: default_redis_url(),
            pool_size: default_redis_pool_size(),
            timeout_ms: default_redis_timeout_ms(),
            channel: default_redis_channel(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Load configuration from `path` (or `octocache.toml` if present) with
/// environment overrides, then validate it.
pub fn load_config(path: Option<&Path>) -> Result<OctocacheConfig, CacheError> {
    let mut builder = Config::builder();
    match path {
        Some(p) => {
            if p.exists() {
                builder = builder.add_source(File::from(p.to_path_buf()));
            } else {
                tracing::warn!(path = %p.display(), "config file not found, using defaults");
            }
        }
        None => {
            let default_path = PathBuf::from(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                builder = builder.add_source(File::from(default_path));
            }
        }
    }
    // Environment variable overrides, e.g., OCTOCACHE__REDIS__ENABLED=true
    builder = builder.add_source(
        Environment::with_prefix(ENV_PREFIX)
            .try_parsing(true)
            .separator("__"),
    );
    let cfg = builder
        .build()
        .map_err(|e| CacheError::configuration(format!("config build error: {e}")))?;
    let merged: OctocacheConfig = cfg
        .try_deserialize()
        .map_err(|e| CacheError::configuration(format!("config deserialize error: {e}")))?;
    merged.validate().map_err(CacheError::configuration)?;
    Ok(merged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = OctocacheConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.entry_options(), EntryOptions::default());
        assert!(!config.redis.enabled);
        assert_eq!(config.redis.channel, "octocache:invalidate");
    }

    #[test]
    fn test_from_toml() {
        let config = OctocacheConfig::from_toml_str(
            r#"
            key_prefix = "billing:"

            [entry]
            duration_secs = 60
            priority = "high"
            eager_refresh_threshold = 0.8

            [redis]
            enabled = true
            url = "redis://cache:6379"
            "#,
        )
        .unwrap();

        assert_eq!(config.key_prefix.as_deref(), Some("billing:"));
        let options = config.entry_options();
        assert_eq!(options.duration, Duration::from_secs(60));
        assert_eq!(options.priority, Priority::High);
        assert_eq!(options.eager_refresh_threshold, Some(0.8));
        assert!(options.fail_safe);
        assert!(config.redis.enabled);
        assert_eq!(config.redis.pool_size, 10);
    }

    #[test]
    fn test_validation_rejects_bad_threshold() {
        let err = OctocacheConfig::from_toml_str("[entry]\neager_refresh_threshold = 1.5\n")
            .unwrap_err();
        assert!(err.to_string().contains("eager_refresh_threshold"));
    }

    #[test]
    fn test_validation_rejects_bad_level() {
        let mut config = OctocacheConfig::default();
        config.logging.level = "loud".into();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_config_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[local]\nmax_capacity = 42\n[logging]\nlevel = \"debug\"").unwrap();

        let config = load_config(Some(file.path())).unwrap();
        assert_eq!(config.local.max_capacity, 42);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_load_config_missing_file_uses_defaults() {
        let config = load_config(Some(Path::new("/definitely/not/here.toml"))).unwrap();
        assert_eq!(config.entry.duration_secs, 300);
    }
}
