//! Single-flight compiled-artifact cache (§4.5), modelled on the teacher's
//! `SingleflightGroup` (`lsp-daemon/src/universal_cache/layer.rs`): a map from key to a
//! shared `OnceCell`, stripped of its debug `eprintln!` instrumentation and ported to
//! structured `tracing` events.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::OnceCell;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use crate::evaluator::{Evaluator, EvaluatorError};

struct Entry<A> {
    artifact: Arc<A>,
    deadline: Instant,
}

impl<A> Entry<A> {
    fn is_expired(&self) -> bool {
        Instant::now() >= self.deadline
    }
}

type InflightCell<A> = Arc<OnceCell<Result<Arc<A>, EvaluatorError>>>;

/// Memoises `Evaluator::compile` per fingerprint, guaranteeing exactly one compilation in
/// flight at a time even under concurrent callers (§8 "Single-flight").
pub struct ArtifactCache<E: Evaluator> {
    evaluator: Arc<E>,
    ttl: Duration,
    entries: DashMap<String, Entry<E::Artifact>>,
    inflight: DashMap<String, InflightCell<E::Artifact>>,
}

impl<E: Evaluator> ArtifactCache<E> {
    pub fn new(evaluator: Arc<E>, ttl: Duration) -> Self {
        ArtifactCache { evaluator, ttl, entries: DashMap::new(), inflight: DashMap::new() }
    }

    /// Returns the compiled artifact for `fingerprint`, compiling `source` at most once even
    /// under concurrent demand. Compilation failures are never cached.
    pub async fn get_or_compile(
        &self,
        fingerprint: &str,
        source: &str,
        ctx: CancellationToken,
    ) -> Result<Arc<E::Artifact>, EvaluatorError> {
        if let Some(entry) = self.entries.get(fingerprint) {
            if !entry.is_expired() {
                trace!(fingerprint, "artifact cache hit");
                return Ok(entry.artifact.clone());
            }
        }

        let cell = self
            .inflight
            .entry(fingerprint.to_string())
            .or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();

        let source = source.to_string();
        let evaluator = self.evaluator.clone();
        let compile_ctx = ctx.clone();
        let result = cell
            .get_or_init(|| async move {
                trace!(fingerprint = %fingerprint, "compiling rule set");
                evaluator.compile(&source, compile_ctx).await.map(Arc::new)
            })
            .await
            .clone();

        // Best-effort cleanup: only the caller that inserted this cell removes it, and only the
        // in-flight record, never a newer one that may have replaced it.
        let still_current = self.inflight.get(fingerprint).map(|v| Arc::ptr_eq(&*v, &cell)).unwrap_or(false);
        if still_current {
            self.inflight.remove(fingerprint);
        }

        match &result {
            Ok(artifact) => {
                self.entries.insert(
                    fingerprint.to_string(),
                    Entry { artifact: artifact.clone(), deadline: Instant::now() + self.ttl },
                );
                debug!(fingerprint, "artifact compiled and cached");
            }
            Err(e) => {
                debug!(fingerprint, error = %e, "compilation failed, not caching");
            }
        }

        result
    }

    /// Evicts a cached artifact outright, e.g. when a business code's rule set fingerprint
    /// changes and the rule-store synchroniser wants the stale artifact gone immediately rather
    /// than waiting out its TTL.
    pub fn invalidate(&self, fingerprint: &str) {
        self.entries.remove(fingerprint);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::model::{ParamView, ResultMap};

    struct CountingEvaluator {
        compiles: AtomicUsize,
    }

    #[async_trait]
    impl Evaluator for CountingEvaluator {
        type Artifact = String;

        async fn compile(&self, source: &str, _ctx: CancellationToken) -> Result<String, EvaluatorError> {
            self.compiles.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok(source.to_string())
        }

        async fn execute(
            &self,
            _artifact: &String,
            _view: &ParamView,
            _result: &mut ResultMap,
            _ctx: CancellationToken,
        ) -> Result<(), EvaluatorError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn concurrent_misses_compile_exactly_once() {
        let evaluator = Arc::new(CountingEvaluator { compiles: AtomicUsize::new(0) });
        let cache = Arc::new(ArtifactCache::new(evaluator.clone(), Duration::from_secs(60)));

        let mut handles = Vec::new();
        for _ in 0..8 {
            let cache = cache.clone();
            handles.push(tokio::spawn(async move {
                cache.get_or_compile("fp1", "source", CancellationToken::new()).await.unwrap()
            }));
        }
        for h in handles {
            assert_eq!(*h.await.unwrap(), "source");
        }
        assert_eq!(evaluator.compiles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn hit_after_compile_does_not_recompile() {
        let evaluator = Arc::new(CountingEvaluator { compiles: AtomicUsize::new(0) });
        let cache = ArtifactCache::new(evaluator.clone(), Duration::from_secs(60));
        cache.get_or_compile("fp", "s", CancellationToken::new()).await.unwrap();
        cache.get_or_compile("fp", "s", CancellationToken::new()).await.unwrap();
        assert_eq!(evaluator.compiles.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn invalidate_forces_recompile() {
        let evaluator = Arc::new(CountingEvaluator { compiles: AtomicUsize::new(0) });
        let cache = ArtifactCache::new(evaluator.clone(), Duration::from_secs(60));
        cache.get_or_compile("fp", "s", CancellationToken::new()).await.unwrap();
        cache.invalidate("fp");
        cache.get_or_compile("fp", "s", CancellationToken::new()).await.unwrap();
        assert_eq!(evaluator.compiles.load(Ordering::SeqCst), 2);
    }
}
