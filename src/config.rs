//! Cache configuration: defaults, JSON file, validation.
//!
//! Static for the lifetime of a cache instance. Missing JSON keys fall back
//! to the defaults, so a config file only needs the values it changes:
//!
//! ```json
//! { "duration_soft_limit_ms": 3000, "enforce_size_limit": false }
//! ```

use anyhow::{Context, Result, ensure};
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::core::clock::ClockTime;

/// Default cache duration soft limit (5 s)
pub const DEFAULT_DURATION_SOFT_LIMIT_MS: u64 = 5_000;
/// Default cache byte soft limit (1 GiB)
pub const DEFAULT_SIZE_SOFT_LIMIT: u64 = 1024 * 1024 * 1024;
/// Default read-ahead per range request (2 s)
pub const DEFAULT_LOOKAHEAD_MS: u64 = 2_000;
/// Default consumer wait timeout
pub const DEFAULT_WAIT_TIMEOUT_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Time span kept behind the newest entry once playback catches up
    pub duration_soft_limit_ms: u64,
    /// Byte budget for cached payloads
    pub size_soft_limit: u64,
    /// Evict by size as well as by duration
    pub enforce_size_limit: bool,
    /// Clamp `size_soft_limit` to the memory available at construction
    pub clamp_to_available_memory: bool,
    /// Span requested from upstream per refill
    pub lookahead_ms: u64,
    /// Max consumer sleep between refill decisions
    pub wait_timeout_ms: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            duration_soft_limit_ms: DEFAULT_DURATION_SOFT_LIMIT_MS,
            size_soft_limit: DEFAULT_SIZE_SOFT_LIMIT,
            enforce_size_limit: true,
            clamp_to_available_memory: true,
            lookahead_ms: DEFAULT_LOOKAHEAD_MS,
            wait_timeout_ms: DEFAULT_WAIT_TIMEOUT_MS,
        }
    }
}

impl CacheConfig {
    pub fn duration_soft_limit(&self) -> ClockTime {
        ClockTime::from_mseconds(self.duration_soft_limit_ms)
    }

    pub fn lookahead(&self) -> ClockTime {
        ClockTime::from_mseconds(self.lookahead_ms)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms.max(1))
    }

    /// Reject values the cache cannot work with.
    pub fn validate(&self) -> Result<()> {
        ensure!(self.lookahead_ms > 0, "lookahead_ms must be greater than zero");
        ensure!(self.wait_timeout_ms > 0, "wait_timeout_ms must be greater than zero");
        ensure!(
            self.duration_soft_limit_ms > 0,
            "duration_soft_limit_ms must be greater than zero"
        );
        Ok(())
    }

    /// Parse and validate a JSON config string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: CacheConfig = serde_json::from_str(json).context("Invalid cache config JSON")?;
        config.validate()?;
        Ok(config)
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!("No config at {}, using defaults", path.display());
            return Ok(Self::default());
        }
        let json = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_json(&json)
            .with_context(|| format!("Failed to load config file: {}", path.display()))?;
        info!("Loaded cache config from {}", path.display());
        Ok(config)
    }

    /// Write as pretty JSON, creating parent directories.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {}", parent.display()))?;
        }
        let json = serde_json::to_string_pretty(self).context("Failed to serialize cache config")?;
        std::fs::write(path, json).with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.duration_soft_limit(), ClockTime::from_seconds(5));
        assert_eq!(config.lookahead(), ClockTime::from_seconds(2));
        assert_eq!(config.size_soft_limit, 1 << 30);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = CacheConfig::from_json(r#"{ "duration_soft_limit_ms": 3000, "enforce_size_limit": false }"#)
            .unwrap();
        assert_eq!(config.duration_soft_limit(), ClockTime::from_seconds(3));
        assert!(!config.enforce_size_limit);
        assert_eq!(config.lookahead_ms, DEFAULT_LOOKAHEAD_MS);
    }

    #[test]
    fn test_invalid_json_rejected() {
        assert!(CacheConfig::from_json(r#"{ "lookahead_ms": 0 }"#).is_err());
        assert!(CacheConfig::from_json("not json").is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = std::env::temp_dir().join(format!("framecache-config-{}", uuid::Uuid::new_v4()));
        let path = dir.join("framecache.json");

        assert_eq!(CacheConfig::load(&path).unwrap(), CacheConfig::default());

        let config = CacheConfig {
            lookahead_ms: 750,
            ..Default::default()
        };
        config.save(&path).unwrap();
        assert_eq!(CacheConfig::load(&path).unwrap(), config);

        let _ = std::fs::remove_dir_all(&dir);
    }
}
