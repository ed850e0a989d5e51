// IPFS Kit Core - Configuration
// Copyright 2026 Joseph Stone - All Rights Reserved
//
// Loads endpoint, pool, WAL and sketch settings from config.json under the
// kit home. Missing file means defaults. IPFS_API_URL overrides the endpoint.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Master configuration loaded from <kit home>/config.json
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KitConfig {
    pub version: String,
    #[serde(default)]
    pub ipfs: EndpointConfig,
    #[serde(default)]
    pub pool: PoolSettings,
    #[serde(default)]
    pub wal: WalSettings,
    #[serde(default)]
    pub sketches: SketchSettings,
}

/// How to reach the IPFS daemon's HTTP RPC API
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EndpointConfig {
    /// Base URL, e.g. http://127.0.0.1:5001
    pub api_url: String,
    pub timeout_secs: u64,
    pub user_agent: String,
}

/// What the pool does when a client cannot be initialized
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum InitFailurePolicy {
    /// Return an error to the caller
    #[default]
    Fail,
    /// Hand out a degraded handle with no client; callers must check it
    Degrade,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PoolSettings {
    pub max_connections: usize,
    /// Idle entries older than this are evicted
    pub ttl_secs: u64,
    pub health_check_interval_secs: u64,
    /// Entry is dropped once its error count reaches this
    pub max_errors: u32,
    #[serde(default)]
    pub on_init_failure: InitFailurePolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WalSettings {
    /// Execute queued operations immediately when added through the MCP tools
    pub execute_on_add: bool,
    /// Replay pending operations when the server starts
    pub replay_on_start: bool,
    /// Terminal records older than this are removed by wal-prune
    pub retention_days: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SketchSettings {
    pub bloom_capacity: usize,
    pub bloom_error_rate: f64,
    pub hll_precision: u8,
    pub cms_width: usize,
    pub cms_depth: usize,
    pub cms_seed: u64,
}

impl Default for EndpointConfig {
    fn default() -> Self {
        Self {
            api_url: "http://127.0.0.1:5001".to_string(),
            timeout_secs: 30,
            user_agent: format!("ipfs-kit/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl EndpointConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            max_connections: 5,
            ttl_secs: 300,
            health_check_interval_secs: 60,
            max_errors: 3,
            on_init_failure: InitFailurePolicy::Fail,
        }
    }
}

impl PoolSettings {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_secs)
    }
}

impl Default for WalSettings {
    fn default() -> Self {
        Self {
            execute_on_add: true,
            replay_on_start: true,
            retention_days: 30,
        }
    }
}

impl Default for SketchSettings {
    fn default() -> Self {
        Self {
            bloom_capacity: 100_000,
            bloom_error_rate: 0.01,
            hll_precision: 14,
            cms_width: 2048,
            cms_depth: 5,
            cms_seed: 0,
        }
    }
}

impl Default for KitConfig {
    fn default() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            ipfs: EndpointConfig::default(),
            pool: PoolSettings::default(),
            wal: WalSettings::default(),
            sketches: SketchSettings::default(),
        }
    }
}

impl KitConfig {
    /// Load config from JSON file, falling back to defaults
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            serde_json::from_str(&content)?
        } else {
            log::warn!("Config not found at {:?}, using defaults", path);
            Self::default()
        };
        config.apply_env();
        config.validate()?;
        Ok(config)
    }

    /// Save config to JSON file
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = serde_json::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("IPFS_API_URL") {
            if !url.is_empty() {
                log::info!("IPFS_API_URL override: {}", url);
                self.ipfs.api_url = url;
            }
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.pool.max_connections == 0 {
            anyhow::bail!("pool.max_connections must be > 0");
        }
        if !self.ipfs.api_url.starts_with("http://") && !self.ipfs.api_url.starts_with("https://") {
            anyhow::bail!("ipfs.api_url must be an http(s) URL: {}", self.ipfs.api_url);
        }
        if self.wal.retention_days < 0 {
            anyhow::bail!("wal.retention_days must be >= 0");
        }
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn defaults_are_valid() {
        let config = KitConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.pool.on_init_failure, InitFailurePolicy::Fail);
        assert_eq!(config.ipfs.api_url, "http://127.0.0.1:5001");
        assert_eq!(config.pool.ttl(), Duration::from_secs(300));
    }

    #[test]
    fn save_then_load() -> anyhow::Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join("nested/config.json");

        let mut config = KitConfig::default();
        config.pool.max_connections = 9;
        config.pool.on_init_failure = InitFailurePolicy::Degrade;
        config.save(&path)?;

        let loaded: KitConfig = serde_json::from_str(&std::fs::read_to_string(&path)?)?;
        assert_eq!(loaded.pool.max_connections, 9);
        assert_eq!(loaded.pool.on_init_failure, InitFailurePolicy::Degrade);
        Ok(())
    }

    #[test]
    fn missing_sections_use_defaults() {
        let config: KitConfig = serde_json::from_str(r#"{"version": "0.1.0"}"#).unwrap();
        assert_eq!(config.sketches, SketchSettings::default());
        assert_eq!(config.wal, WalSettings::default());
    }

    #[test]
    fn rejects_zero_pool() {
        let mut config = KitConfig::default();
        config.pool.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn rejects_non_http_endpoint() {
        let mut config = KitConfig::default();
        config.ipfs.api_url = "/ip4/127.0.0.1/tcp/5001".to_string();
        assert!(config.validate().is_err());
    }
}
