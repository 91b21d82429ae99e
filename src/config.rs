//! Engine configuration (§6 "Configuration options"): a JSON-loadable, layered `Option<...>`
//! structure with `RULE_ENGINE_*` environment overrides, following the teacher's
//! `src/config.rs::load_from_file` / `apply_env_overrides` convention.

use std::env;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::cache::CacheBackend;
use crate::parser::Dialect;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path:?}: {source}")]
    Read { path: String, source: std::io::Error },
    #[error("failed to parse config file {path:?}: {source}")]
    Parse { path: String, source: serde_json::Error },
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Root configuration, every field optional so a partial file or a fully env-driven setup both
/// merge cleanly onto defaults (§6 "Ambient additions").
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EngineConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dsn: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_migrate: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dialect: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parallel_execution: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sync_interval_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheConfig>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct CacheConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ttl_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_size: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_addr: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_secret: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote_namespace: Option<String>,
}

/// Fully-resolved configuration after defaulting, merging, and validation: what the rest of the
/// crate actually consumes.
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    pub dsn: String,
    pub auto_migrate: bool,
    pub dialect: Dialect,
    pub parallel_execution: bool,
    pub sync_interval: Duration,
    pub cache_backend: CacheBackend,
    pub cache_ttl: Duration,
    pub max_cache_size: usize,
    pub remote_addr: Option<String>,
    pub remote_secret: Option<String>,
    pub remote_namespace: Option<String>,
}

impl EngineConfig {
    /// Loads a single JSON config file, tolerating a leading UTF-8 BOM.
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        let content = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(&bytes);
        serde_json::from_slice(content).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Applies `RULE_ENGINE_*` environment overrides in place, mirroring the teacher's
    /// `apply_env_overrides`: each variable, if set and parseable, replaces the corresponding
    /// field regardless of whether a file already populated it.
    pub fn apply_env_overrides(&mut self) {
        if let Ok(val) = env::var("RULE_ENGINE_DSN") {
            self.dsn = Some(val);
        }
        if let Ok(val) = env::var("RULE_ENGINE_AUTO_MIGRATE") {
            self.auto_migrate = Some(is_truthy(&val));
        }
        if let Ok(val) = env::var("RULE_ENGINE_DIALECT") {
            self.dialect = Some(val);
        }
        if let Ok(val) = env::var("RULE_ENGINE_PARALLEL_EXECUTION") {
            self.parallel_execution = Some(is_truthy(&val));
        }
        if let Ok(val) = env::var("RULE_ENGINE_SYNC_INTERVAL_SECS") {
            if let Ok(secs) = val.parse() {
                self.sync_interval_secs = Some(secs);
            }
        }

        let cache = self.cache.get_or_insert_with(CacheConfig::default);
        if let Ok(val) = env::var("RULE_ENGINE_CACHE_BACKEND") {
            cache.backend = Some(val);
        }
        if let Ok(val) = env::var("RULE_ENGINE_CACHE_TTL_SECS") {
            if let Ok(secs) = val.parse() {
                cache.ttl_secs = Some(secs);
            }
        }
        if let Ok(val) = env::var("RULE_ENGINE_CACHE_MAX_SIZE") {
            if let Ok(n) = val.parse() {
                cache.max_size = Some(n);
            }
        }
        if let Ok(val) = env::var("RULE_ENGINE_REMOTE_ADDR") {
            cache.remote_addr = Some(val);
        }
        if let Ok(val) = env::var("RULE_ENGINE_REMOTE_SECRET") {
            cache.remote_secret = Some(val);
        }
        if let Ok(val) = env::var("RULE_ENGINE_REMOTE_NAMESPACE") {
            cache.remote_namespace = Some(val);
        }
    }

    /// Defaults every unset field and validates the result, raising `config-invalid` per §7.
    pub fn resolve(self) -> Result<ResolvedConfig, ConfigError> {
        let dsn = self.dsn.unwrap_or_default();
        if dsn.trim().is_empty() {
            return Err(ConfigError::Invalid("dsn must not be empty".to_string()));
        }

        let dialect = self
            .dialect
            .as_deref()
            .unwrap_or("sql")
            .parse::<Dialect>()
            .map_err(|e| ConfigError::Invalid(e.to_string()))?;

        let cache = self.cache.unwrap_or_default();
        let cache_backend = cache
            .backend
            .as_deref()
            .unwrap_or("in-process")
            .parse::<CacheBackend>()
            .map_err(ConfigError::Invalid)?;

        let max_cache_size = cache.max_size.unwrap_or(10_000);
        if cache_backend == CacheBackend::InProcess && max_cache_size < 1 {
            return Err(ConfigError::Invalid(
                "maxCacheSize must be >= 1 when cacheBackend is in-process".to_string(),
            ));
        }

        if cache_backend == CacheBackend::Remote
            && (cache.remote_addr.is_none() || cache.remote_secret.is_none() || cache.remote_namespace.is_none())
        {
            return Err(ConfigError::Invalid(
                "remoteAddr, remoteSecret and remoteNamespace are required when cacheBackend is remote"
                    .to_string(),
            ));
        }

        Ok(ResolvedConfig {
            dsn,
            auto_migrate: self.auto_migrate.unwrap_or(false),
            dialect,
            parallel_execution: self.parallel_execution.unwrap_or(false),
            sync_interval: Duration::from_secs(self.sync_interval_secs.unwrap_or(0)),
            cache_backend,
            cache_ttl: Duration::from_secs(cache.ttl_secs.unwrap_or(60)),
            max_cache_size,
            remote_addr: cache.remote_addr,
            remote_secret: cache.remote_secret,
            remote_namespace: cache.remote_namespace,
        })
    }
}

fn is_truthy(val: &str) -> bool {
    val == "1" || val.eq_ignore_ascii_case("true")
}
