//! In-process cache variant: bounded, TTL-expiring, backed by a `DashMap` with a background
//! sweeper task, in the spirit of the teacher's `DashMap`-keyed registries
//! (`lsp-daemon/src/pool.rs::LspServerPool`, `lsp-daemon/src/call_graph_cache.rs`).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use dashmap::DashMap;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use super::{Cache, CacheError};

struct Entry {
    value: Vec<u8>,
    deadline: Instant,
}

impl Entry {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

/// Bounded, TTL-expiring in-process cache (§4.1 "In-process variant").
///
/// `max_entries <= 0` is accepted and treated as effectively unbounded: the bound check never
/// triggers eviction, matching the spec's "operator choice" clause without ever panicking.
pub struct InProcessCache {
    entries: DashMap<String, Entry>,
    max_entries: i64,
    closed: Arc<AtomicBool>,
    sweeper: std::sync::Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl InProcessCache {
    pub fn new(max_entries: i64, sweep_interval: Duration) -> Arc<Self> {
        let cache = Arc::new(InProcessCache {
            entries: DashMap::new(),
            max_entries,
            closed: Arc::new(AtomicBool::new(false)),
            sweeper: std::sync::Mutex::new(None),
        });

        let weak = Arc::downgrade(&cache);
        let closed = cache.closed.clone();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(sweep_interval);
            loop {
                interval.tick().await;
                if closed.load(Ordering::Acquire) {
                    break;
                }
                let Some(cache) = weak.upgrade() else {
                    break;
                };
                cache.sweep_expired();
            }
        });
        *cache.sweeper.lock().unwrap() = Some(handle);
        cache
    }

    fn sweep_expired(&self) {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired());
        let removed = before - self.entries.len();
        if removed > 0 {
            trace!(removed, "swept expired in-process cache entries");
        }
    }

    /// Evict entries to make room for one more, per §4.1's eviction policy and §8's "eviction
    /// preserves long TTLs" property: expired entries are removed first; only if that is not
    /// enough do we fall back to removing an arbitrary (here: first-seen) live entry.
    fn make_room(&self) {
        if self.max_entries <= 0 {
            return;
        }
        let bound = self.max_entries as usize;
        if self.entries.len() < bound {
            return;
        }

        self.sweep_expired();

        while self.entries.len() >= bound {
            let victim = self.entries.iter().next().map(|e| e.key().clone());
            match victim {
                Some(key) => {
                    self.entries.remove(&key);
                }
                None => break,
            }
        }
    }
}

#[async_trait]
impl Cache for InProcessCache {
    async fn get(&self, key: &str, _ctx: CancellationToken) -> Result<Vec<u8>, CacheError> {
        match self.entries.get(key) {
            Some(entry) if !entry.is_expired() => {
                trace!(key, "in-process cache hit");
                Ok(entry.value.clone())
            }
            Some(_) => {
                drop(self.entries.remove(key));
                trace!(key, "in-process cache expired");
                Err(CacheError::NotFound)
            }
            None => {
                trace!(key, "in-process cache miss");
                Err(CacheError::NotFound)
            }
        }
    }

    async fn put(
        &self,
        key: &str,
        value: Vec<u8>,
        ttl: Duration,
        _ctx: CancellationToken,
    ) -> Result<(), CacheError> {
        if ttl.is_zero() {
            self.entries.remove(key);
            return Ok(());
        }
        self.make_room();
        self.entries.insert(
            key.to_string(),
            Entry {
                value,
                deadline: Instant::now() + ttl,
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str, _ctx: CancellationToken) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }

    async fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            debug!("in-process cache already closed");
            return;
        }
        let handle = self.sweeper.lock().unwrap().take();
        if let Some(handle) = handle {
            handle.abort();
        }
    }
}
