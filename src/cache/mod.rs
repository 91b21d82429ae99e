//! Cache abstraction (§4.1): a byte-keyed value store with TTL and bounded capacity, with
//! in-process and remote backends.

mod in_process;
mod remote;

pub use in_process::InProcessCache;
pub use remote::RemoteCache;

use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Error kinds for the cache contract (§4.1 "Error kinds").
#[derive(Debug, Error, Clone)]
pub enum CacheError {
    #[error("key not found or expired")]
    NotFound,
    #[error("cache operation failed: {0}")]
    Operational(String),
}

/// A byte-keyed value store with TTL, shared by the in-process and remote variants.
///
/// `close()` is idempotent and must never panic, even on a cache that is already closed or
/// that has an in-flight background sweeper (§4.1, §5 "Shutdown semantics").
#[async_trait]
pub trait Cache: Send + Sync {
    async fn get(&self, key: &str, ctx: CancellationToken) -> Result<Vec<u8>, CacheError>;
    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        ctx: CancellationToken,
    ) -> Result<(), CacheError>;
    async fn delete(&self, key: &str, ctx: CancellationToken) -> Result<(), CacheError>;
    async fn close(&self);
}

/// Configured cache backend selection (§6 "cacheBackend").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheBackend {
    InProcess,
    Remote,
    None,
}

impl std::str::FromStr for CacheBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "in-process" => Ok(CacheBackend::InProcess),
            "remote" => Ok(CacheBackend::Remote),
            "none" => Ok(CacheBackend::None),
            other => Err(format!("unknown cache backend: {other}")),
        }
    }
}

/// A cache that never stores anything; used when `cacheBackend = none`.
pub struct NullCache;

#[async_trait]
impl Cache for NullCache {
    async fn get(&self, _key: &str, _ctx: CancellationToken) -> Result<Vec<u8>, CacheError> {
        Err(CacheError::NotFound)
    }

    async fn put(
        &self,
        _key: &str,
        _value: Vec<u8>,
        _ttl: Duration,
        _ctx: CancellationToken,
    ) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str, _ctx: CancellationToken) -> Result<(), CacheError> {
        Ok(())
    }

    async fn close(&self) {}
}
