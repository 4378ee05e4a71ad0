//! Configuration types shared across crates.

use figment::Figment;
use figment::providers::{Env, Format, Serialized, Toml};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable prefix for configuration overrides.
pub const ENV_PREFIX: &str = "FILECACHE_";

/// Top-level configuration for the file cache lookup layer.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Shard layout and routing.
    #[serde(default)]
    pub sharding: ShardingConfig,
    /// Node-local file id to storage id cache.
    #[serde(default)]
    pub location_cache: LocationCacheConfig,
}

impl AppConfig {
    /// Load configuration from an optional TOML file, then apply
    /// `FILECACHE_` environment overrides (`__` separates nested keys).
    pub fn load(path: Option<&Path>) -> crate::Result<Self> {
        let mut figment = Figment::from(Serialized::defaults(AppConfig::default()));
        if let Some(path) = path {
            figment = figment.merge(Toml::file(path));
        }

        let config: AppConfig = figment
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
            .extract()
            .map_err(Box::new)?;
        config.validate()?;
        Ok(config)
    }

    /// Create a test configuration over the given SQLite shard files.
    ///
    /// **For testing only.** One shard uses the single-shard strategy,
    /// more than one uses modulo routing.
    pub fn for_testing(shard_paths: &[PathBuf]) -> Self {
        let strategy = if shard_paths.len() > 1 {
            ShardStrategy::Modulo
        } else {
            ShardStrategy::Single
        };
        Self {
            sharding: ShardingConfig {
                strategy,
                shards: shard_paths
                    .iter()
                    .map(|path| ShardConnectionConfig::Sqlite {
                        path: path.clone(),
                        query_timeout_secs: None,
                    })
                    .collect(),
            },
            location_cache: LocationCacheConfig::default(),
        }
    }

    /// Validate configuration invariants.
    pub fn validate(&self) -> crate::Result<()> {
        self.sharding.validate().map_err(crate::Error::Config)?;
        self.location_cache
            .validate()
            .map_err(crate::Error::Config)?;
        Ok(())
    }
}

/// How storage ids are mapped onto shards.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ShardStrategy {
    /// Every storage id lives on shard 0.
    #[default]
    Single,
    /// Storage id modulo the number of configured shards.
    Modulo,
}

/// Shard layout configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ShardingConfig {
    /// Routing strategy.
    #[serde(default)]
    pub strategy: ShardStrategy,
    /// One connection per shard, in shard id order.
    #[serde(default = "default_shards")]
    pub shards: Vec<ShardConnectionConfig>,
}

impl Default for ShardingConfig {
    fn default() -> Self {
        Self {
            strategy: ShardStrategy::default(),
            shards: default_shards(),
        }
    }
}

impl ShardingConfig {
    /// Validate sharding configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.shards.is_empty() {
            return Err("sharding config requires at least one shard".to_string());
        }
        if self.shards.len() > u32::MAX as usize {
            return Err(format!("too many shards configured: {}", self.shards.len()));
        }
        if self.strategy == ShardStrategy::Single && self.shards.len() > 1 {
            return Err(format!(
                "'single' shard strategy cannot route to {} shards; use 'modulo'",
                self.shards.len()
            ));
        }
        Ok(())
    }
}

fn default_shards() -> Vec<ShardConnectionConfig> {
    vec![ShardConnectionConfig::Sqlite {
        path: PathBuf::from("./data/filecache.db"),
        query_timeout_secs: default_query_timeout_secs(),
    }]
}

/// Connection settings for a single shard.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ShardConnectionConfig {
    /// SQLite database file.
    Sqlite {
        /// Database file path.
        path: PathBuf,
        /// Seconds to wait for the shard connection before giving up.
        #[serde(default = "default_query_timeout_secs")]
        query_timeout_secs: Option<u64>,
    },
}

fn default_query_timeout_secs() -> Option<u64> {
    Some(30)
}

/// Node-local location cache configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocationCacheConfig {
    /// Disable to always scan shards.
    #[serde(default = "default_cache_enabled")]
    pub enabled: bool,
    /// Cache namespace.
    #[serde(default = "default_cache_name")]
    pub name: String,
    /// Maximum number of entries kept.
    #[serde(default = "default_cache_capacity")]
    pub capacity: usize,
    /// Entry lifetime in seconds (`None` keeps entries until evicted).
    #[serde(default = "default_cache_ttl_secs")]
    pub ttl_secs: Option<u64>,
}

impl Default for LocationCacheConfig {
    fn default() -> Self {
        Self {
            enabled: default_cache_enabled(),
            name: default_cache_name(),
            capacity: default_cache_capacity(),
            ttl_secs: default_cache_ttl_secs(),
        }
    }
}

impl LocationCacheConfig {
    /// Validate location cache configuration invariants.
    pub fn validate(&self) -> Result<(), String> {
        if self.enabled && self.capacity == 0 {
            return Err("location_cache.capacity must be greater than 0".to_string());
        }
        if self.ttl_secs == Some(0) {
            return Err("location_cache.ttl_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn default_cache_enabled() -> bool {
    true
}

fn default_cache_name() -> String {
    crate::LOCATION_CACHE_NAME.to_string()
}

fn default_cache_capacity() -> usize {
    10_000
}

fn default_cache_ttl_secs() -> Option<u64> {
    Some(3600)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_single_shard() {
        let config = AppConfig::default();
        assert_eq!(config.sharding.strategy, ShardStrategy::Single);
        assert_eq!(config.sharding.shards.len(), 1);
        assert_eq!(config.location_cache.name, "storage_by_fileid");
        config.validate().unwrap();
    }

    #[test]
    fn test_single_strategy_rejects_multiple_shards() {
        let mut config = AppConfig::for_testing(&[PathBuf::from("a.db"), PathBuf::from("b.db")]);
        assert_eq!(config.sharding.strategy, ShardStrategy::Modulo);
        config.validate().unwrap();

        config.sharding.strategy = ShardStrategy::Single;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("use 'modulo'"));
    }

    #[test]
    fn test_empty_shard_list_is_invalid() {
        let config = AppConfig::for_testing(&[]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = AppConfig::default();
        config.location_cache.capacity = 0;
        assert!(config.validate().is_err());

        config.location_cache.enabled = false;
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("filecache.toml");
        std::fs::write(
            &path,
            r#"
            [sharding]
            strategy = "modulo"

            [[sharding.shards]]
            type = "sqlite"
            path = "/var/lib/filecache/shard0.db"

            [[sharding.shards]]
            type = "sqlite"
            path = "/var/lib/filecache/shard1.db"
            query_timeout_secs = 5

            [location_cache]
            capacity = 64
            ttl_secs = 120
            "#,
        )
        .unwrap();

        let config = AppConfig::load(Some(path.as_path())).unwrap();
        assert_eq!(config.sharding.strategy, ShardStrategy::Modulo);
        assert_eq!(config.sharding.shards.len(), 2);
        let ShardConnectionConfig::Sqlite {
            query_timeout_secs, ..
        } = &config.sharding.shards[1];
        assert_eq!(*query_timeout_secs, Some(5));
        assert_eq!(config.location_cache.capacity, 64);
        assert_eq!(config.location_cache.ttl_secs, Some(120));
        assert!(config.location_cache.enabled);
    }
}
