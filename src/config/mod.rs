use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::store::DynamicPrefixSpec;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default)]
    pub requeue: RequeueConfig,
    #[serde(default)]
    pub seed_prefixes: Vec<SeedPrefix>,
}

/// One entry of `seedPrefixes`: an initial `DynamicPrefix` the controller
/// loads into the store at startup, since there is no external API server
/// in this crate's scope to source resources from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeedPrefix {
    pub name: String,
    #[serde(default)]
    pub spec: DynamicPrefixSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RequeueConfig {
    #[serde(default = "default_waiting_for_prefix_secs")]
    pub waiting_for_prefix_secs: u64,
    #[serde(default = "default_receiver_failure_secs")]
    pub receiver_failure_secs: u64,
    #[serde(default = "default_min_requeue_secs")]
    pub min_requeue_secs: u64,
    #[serde(default = "default_max_requeue_secs")]
    pub max_requeue_secs: u64,
    #[serde(default = "default_pool_sync_failure_secs")]
    pub pool_sync_failure_secs: u64,
    #[serde(default = "default_ha_sync_failure_secs")]
    pub ha_sync_failure_secs: u64,
}

fn default_log_level() -> String {
    "info".to_string()
}
fn default_waiting_for_prefix_secs() -> u64 {
    10
}
fn default_receiver_failure_secs() -> u64 {
    30
}
fn default_min_requeue_secs() -> u64 {
    60
}
fn default_max_requeue_secs() -> u64 {
    300
}
fn default_pool_sync_failure_secs() -> u64 {
    30
}
fn default_ha_sync_failure_secs() -> u64 {
    5
}

impl Default for RequeueConfig {
    fn default() -> Self {
        Self {
            waiting_for_prefix_secs: default_waiting_for_prefix_secs(),
            receiver_failure_secs: default_receiver_failure_secs(),
            min_requeue_secs: default_min_requeue_secs(),
            max_requeue_secs: default_max_requeue_secs(),
            pool_sync_failure_secs: default_pool_sync_failure_secs(),
            ha_sync_failure_secs: default_ha_sync_failure_secs(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            requeue: RequeueConfig::default(),
            seed_prefixes: Vec::new(),
        }
    }
}

impl Config {
    pub fn load_from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config from {}", path.display()))?;
        let config: Config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config from {}", path.display()))?;
        Ok(config)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<()> {
        let content = serde_json::to_string_pretty(self).context("Failed to serialize config")?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("Failed to write config to {}", tmp_path.display()))?;
        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("Failed to rename config to {}", path.display()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log_level, "info");
        assert_eq!(config.requeue.waiting_for_prefix_secs, 10);
        assert_eq!(config.requeue.receiver_failure_secs, 30);
        assert_eq!(config.requeue.min_requeue_secs, 60);
        assert_eq!(config.requeue.max_requeue_secs, 300);
        assert_eq!(config.requeue.pool_sync_failure_secs, 30);
        assert_eq!(config.requeue.ha_sync_failure_secs, 5);
        assert!(config.seed_prefixes.is_empty());
    }

    #[test]
    fn test_roundtrip() {
        let json = r#"{
            "logLevel": "debug",
            "requeue": { "minRequeueSecs": 90 },
            "seedPrefixes": [{ "name": "home", "spec": {} }]
        }"#;
        let config: Config = serde_json::from_str(json).unwrap();
        assert_eq!(config.log_level, "debug");
        assert_eq!(config.requeue.min_requeue_secs, 90);
        assert_eq!(config.requeue.max_requeue_secs, 300);
        assert_eq!(config.seed_prefixes.len(), 1);
        assert_eq!(config.seed_prefixes[0].name, "home");

        let serialized = serde_json::to_string(&config).unwrap();
        let config2: Config = serde_json::from_str(&serialized).unwrap();
        assert_eq!(config2.log_level, "debug");
    }
}
