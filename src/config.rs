//! Engine configuration, with defaults and environment-variable loading.

use crate::distance::DistanceMetric;
use crate::hnsw::HnswParams;
use crate::index::IndexKind;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Configuration error type
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse environment variable '{key}': {details}")]
    ParseError { key: String, details: String },

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}

/// How the index manager absorbs ingestion deltas between rebuilds.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildPolicy {
    /// Deltas become visible only when a fresh snapshot is rebuilt from a
    /// full store scan.
    FullRebuild,
    /// Deltas are served from an in-memory overlay merged into every query,
    /// and folded into a full rebuild once the overlay grows past the
    /// rebuild threshold.
    IncrementalOverlay,
}

impl FromStr for RebuildPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "full" | "full_rebuild" => Ok(RebuildPolicy::FullRebuild),
            "overlay" | "incremental" | "incremental_overlay" => {
                Ok(RebuildPolicy::IncrementalOverlay)
            }
            other => Err(format!("unknown rebuild policy '{}'", other)),
        }
    }
}

/// Configuration for a [`VectorEngine`](crate::engine::VectorEngine).
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Data directory for persistence; `None` keeps everything in memory.
    pub data_dir: Option<PathBuf>,
    /// Fixed dimensionality. When unset, the first successful put fixes it.
    pub dimension: Option<usize>,
    /// Distance metric for the store and every index built over it.
    pub metric: DistanceMetric,
    /// Index strategy used for each snapshot build.
    pub index: IndexKind,
    /// Delta absorption policy.
    pub policy: RebuildPolicy,
    /// Pending deltas (full rebuild) or overlay entries (incremental) that
    /// trigger a rebuild.
    pub rebuild_threshold: usize,
    /// Rebuild at least this often while deltas are pending.
    pub rebuild_interval: Duration,
    /// Checkpoint the store after this many WAL entries.
    pub checkpoint_interval: usize,
    /// How long a query waits for the very first snapshot while it is being built.
    pub initial_build_wait: Duration,
    /// Refuse to build snapshots larger than this many records.
    pub max_index_records: Option<usize>,
    /// L2-normalize vectors on ingest.
    pub normalize_vectors: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: None,
            dimension: None,
            metric: DistanceMetric::Euclidean,
            index: IndexKind::Exact,
            policy: RebuildPolicy::FullRebuild,
            rebuild_threshold: 1000,
            rebuild_interval: Duration::from_secs(30),
            checkpoint_interval: 1000,
            initial_build_wait: Duration::from_secs(2),
            max_index_records: None,
            normalize_vectors: false,
        }
    }
}

impl EngineConfig {
    /// In-memory configuration for the given metric.
    pub fn in_memory(metric: DistanceMetric) -> Self {
        Self {
            metric,
            ..Default::default()
        }
    }

    /// Persistent configuration rooted at `data_dir`.
    pub fn persistent(data_dir: impl Into<PathBuf>, metric: DistanceMetric) -> Self {
        Self {
            data_dir: Some(data_dir.into()),
            metric,
            ..Default::default()
        }
    }

    /// Load configuration from `VECTORDB_*` environment variables, falling
    /// back to defaults for anything unset.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let data_dir = env::var("VECTORDB_DATA_DIR").ok().map(PathBuf::from);
        let dimension = env_parse_opt::<usize>("VECTORDB_DIMENSION")?;
        let metric = env_parse_or("VECTORDB_METRIC", defaults.metric)?;
        let policy = env_parse_or("VECTORDB_POLICY", defaults.policy)?;
        let index = match env::var("VECTORDB_INDEX").ok().as_deref() {
            None => defaults.index,
            Some(raw) => match raw.trim().to_ascii_lowercase().as_str() {
                "exact" | "flat" => IndexKind::Exact,
                "hnsw" => IndexKind::Hnsw(HnswParams {
                    ef_search: env_parse_or("VECTORDB_HNSW_EF_SEARCH", HnswParams::default().ef_search)?,
                    ..HnswParams::default()
                }),
                other => {
                    return Err(ConfigError::ParseError {
                        key: "VECTORDB_INDEX".to_string(),
                        details: format!("unknown index kind '{}'", other),
                    })
                }
            },
        };
        let rebuild_threshold =
            env_parse_or("VECTORDB_REBUILD_THRESHOLD", defaults.rebuild_threshold)?;
        let rebuild_interval = env_parse_opt::<u64>("VECTORDB_REBUILD_INTERVAL_MS")?
            .map(Duration::from_millis)
            .unwrap_or(defaults.rebuild_interval);
        let checkpoint_interval =
            env_parse_or("VECTORDB_CHECKPOINT_INTERVAL", defaults.checkpoint_interval)?;

        let config = Self {
            data_dir,
            dimension,
            metric,
            index,
            policy,
            rebuild_threshold,
            rebuild_interval,
            checkpoint_interval,
            ..defaults
        };
        config.validate()?;
        Ok(config)
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.dimension == Some(0) {
            return Err(ConfigError::Invalid("dimension must be positive".to_string()));
        }
        if self.rebuild_threshold == 0 {
            return Err(ConfigError::Invalid(
                "rebuild_threshold must be positive".to_string(),
            ));
        }
        if self.rebuild_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "rebuild_interval must be non-zero".to_string(),
            ));
        }
        if self.checkpoint_interval == 0 {
            return Err(ConfigError::Invalid(
                "checkpoint_interval must be positive".to_string(),
            ));
        }
        if let IndexKind::Hnsw(params) = &self.index {
            params.validate().map_err(ConfigError::Invalid)?;
        }
        Ok(())
    }
}

/// Helper to load an environment variable with a default value
pub fn env_or_default(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_parse_opt<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::ParseError {
                key: key.to_string(),
                details: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}

fn env_parse_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    Ok(env_parse_opt(key)?.unwrap_or(default))
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 9] = [
        "VECTORDB_DATA_DIR",
        "VECTORDB_DIMENSION",
        "VECTORDB_METRIC",
        "VECTORDB_INDEX",
        "VECTORDB_POLICY",
        "VECTORDB_REBUILD_THRESHOLD",
        "VECTORDB_REBUILD_INTERVAL_MS",
        "VECTORDB_CHECKPOINT_INTERVAL",
        "VECTORDB_HNSW_EF_SEARCH",
    ];

    fn unset_all() -> Vec<(&'static str, Option<&'static str>)> {
        VARS.iter().map(|k| (*k, None)).collect()
    }

    #[test]
    fn test_from_env_defaults() {
        temp_env::with_vars(unset_all(), || {
            let config = EngineConfig::from_env().unwrap();
            assert!(config.data_dir.is_none());
            assert_eq!(config.metric, DistanceMetric::Euclidean);
            assert_eq!(config.index, IndexKind::Exact);
            assert_eq!(config.policy, RebuildPolicy::FullRebuild);
            assert_eq!(config.rebuild_threshold, 1000);
        });
    }

    #[test]
    fn test_from_env_custom_values() {
        let mut vars = unset_all();
        vars.extend([
            ("VECTORDB_DATA_DIR", Some("/tmp/vectors")),
            ("VECTORDB_DIMENSION", Some("768")),
            ("VECTORDB_METRIC", Some("cosine")),
            ("VECTORDB_INDEX", Some("hnsw")),
            ("VECTORDB_HNSW_EF_SEARCH", Some("128")),
            ("VECTORDB_POLICY", Some("overlay")),
            ("VECTORDB_REBUILD_INTERVAL_MS", Some("250")),
        ]);
        temp_env::with_vars(vars, || {
            let config = EngineConfig::from_env().unwrap();
            assert_eq!(config.data_dir, Some(PathBuf::from("/tmp/vectors")));
            assert_eq!(config.dimension, Some(768));
            assert_eq!(config.metric, DistanceMetric::Cosine);
            assert!(matches!(config.index, IndexKind::Hnsw(p) if p.ef_search == 128));
            assert_eq!(config.policy, RebuildPolicy::IncrementalOverlay);
            assert_eq!(config.rebuild_interval, Duration::from_millis(250));
        });
    }

    #[test]
    fn test_from_env_invalid_value_names_key() {
        let mut vars = unset_all();
        vars.push(("VECTORDB_REBUILD_THRESHOLD", Some("lots")));
        temp_env::with_vars(vars, || {
            let err = EngineConfig::from_env().unwrap_err();
            assert!(err.to_string().contains("VECTORDB_REBUILD_THRESHOLD"));
        });
    }

    #[test]
    fn test_from_env_zero_dimension_rejected() {
        let mut vars = unset_all();
        vars.push(("VECTORDB_DIMENSION", Some("0")));
        temp_env::with_vars(vars, || {
            assert!(matches!(
                EngineConfig::from_env(),
                Err(ConfigError::Invalid(_))
            ));
        });
    }

    #[test]
    fn test_env_or_default() {
        temp_env::with_var("VECTORDB_TEST_HELPER", Some("x"), || {
            assert_eq!(env_or_default("VECTORDB_TEST_HELPER", "y"), "x");
        });
        temp_env::with_var_unset("VECTORDB_TEST_HELPER", || {
            assert_eq!(env_or_default("VECTORDB_TEST_HELPER", "y"), "y");
        });
    }
}
