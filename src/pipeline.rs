//! Generic execution pipeline (§4.6): fetch → compile → cache → execute → project.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{error, trace, warn};

use crate::artifact_cache::ArtifactCache;
use crate::cache::Cache;
use crate::error::{EngineError, EngineResult};
use crate::evaluator::Evaluator;
use crate::model::{fingerprint, ParamView, ResultMap, Rule, RuleSet};
use crate::projector;
use crate::store::RuleStore;

/// Owns the shared collaborators (§5 "Shared resources") and orchestrates a single call end to
/// end. Generic over the three injected contracts so callers can swap in their own store, cache,
/// or evaluator implementation at construction (§9 "Dynamic dispatch over caches/stores/evaluators").
pub struct Engine<S: RuleStore, C: Cache, E: Evaluator> {
    store: Arc<S>,
    rule_cache: Arc<C>,
    rule_cache_ttl: Duration,
    evaluator: Arc<E>,
    artifact_cache: ArtifactCache<E>,
    artifact_ttl: Duration,
    closed: Arc<AtomicBool>,
}

impl<S: RuleStore, C: Cache, E: Evaluator> Engine<S, C, E> {
    pub fn new(
        store: Arc<S>,
        rule_cache: Arc<C>,
        rule_cache_ttl: Duration,
        evaluator: Arc<E>,
        artifact_ttl: Duration,
    ) -> Self {
        Engine {
            store,
            rule_cache,
            rule_cache_ttl,
            artifact_cache: ArtifactCache::new(evaluator.clone(), artifact_ttl),
            evaluator,
            artifact_ttl,
            closed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// `exec<T>(ctx, businessCode, input) -> T | error` (§4.6).
    pub async fn exec<In, T>(&self, ctx: CancellationToken, business_code: &str, input: &In) -> EngineResult<T>
    where
        In: Serialize,
        T: Default + Serialize + DeserializeOwned,
    {
        if self.closed.load(Ordering::SeqCst) {
            return Err(EngineError::EngineClosed);
        }
        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }
        if business_code.trim().is_empty() {
            return Err(EngineError::InputInvalid("business code must not be empty".to_string()));
        }

        let rules = self.fetch_rules(business_code, &ctx).await?;
        if rules.is_empty() {
            warn!(business_code, "no enabled rules for business code");
            return Err(EngineError::RuleNotFound(business_code.to_string()));
        }

        let rule_set = RuleSet::from_enabled(rules);
        let fp = fingerprint(&rule_set.rules);
        trace!(business_code, fingerprint = %fp, "resolved rule set fingerprint");

        let artifact = self
            .artifact_cache
            .get_or_compile(&fp, &rule_set.canonical_source(), ctx.clone())
            .await
            .map_err(|e| EngineError::Compile(e.to_string()))?;

        let view = ParamView::from_input(input);
        let mut container = ResultMap::new();

        if ctx.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        self.evaluator
            .execute(&artifact, &view, &mut container, ctx)
            .await
            .map_err(|e| {
                error!(business_code, error = %e, "evaluate failed");
                EngineError::Evaluate(e.to_string())
            })?;

        projector::try_project(&container).map_err(EngineError::Projection)
    }

    async fn fetch_rules(&self, business_code: &str, ctx: &CancellationToken) -> EngineResult<Vec<Rule>> {
        let cache_key = format!("rules:{business_code}");
        if let Ok(bytes) = self.rule_cache.get(&cache_key, ctx.clone()).await {
            if let Ok(rules) = serde_json::from_slice::<Vec<Rule>>(&bytes) {
                trace!(business_code, "rule cache hit");
                return Ok(rules);
            }
        }

        let rules = self.store.find_by_business_code(business_code, ctx.clone()).await?;

        if let Ok(bytes) = serde_json::to_vec(&rules) {
            let _ = self.rule_cache.put(&cache_key, bytes, self.rule_cache_ttl, ctx.clone()).await;
        }
        Ok(rules)
    }

    /// Evicts the cached rule set for `business_code`, forcing the next `exec` to re-fetch from
    /// the store. The artifact cache is left untouched: it is keyed by fingerprint, not business
    /// code, so a changed rule set simply misses it under its new fingerprint on the next call.
    /// Idempotent.
    pub async fn invalidate(&self, business_code: &str) {
        let cache_key = format!("rules:{business_code}");
        let _ = self.rule_cache.delete(&cache_key, CancellationToken::new()).await;
    }

    /// Idempotent shutdown (§5 "Shutdown semantics"): subsequent `exec` calls fail fast with
    /// `engine-closed` without contacting the store or the evaluator.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            trace!("close() called on an already-closed engine");
            return;
        }
        self.rule_cache.close().await;
    }

    pub fn artifact_ttl(&self) -> Duration {
        self.artifact_ttl
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;
    use serde_json::json;

    use super::*;
    use crate::cache::{CacheError, NullCache};
    use crate::evaluator::GrlEvaluator;
    use crate::lowering::{lower_all, CondensedRule, RuleDefinition};
    use crate::parser::{Dialect, ExpressionParser};
    use crate::store::InMemoryRuleStore;

    #[derive(Debug, Default, Serialize, Deserialize, PartialEq)]
    struct Output {
        #[serde(default)]
        discount: f64,
        #[serde(default)]
        eligible: bool,
    }

    fn vip_rule_source() -> String {
        let parser = ExpressionParser::new(Dialect::Script);
        let def = RuleDefinition::Condensed(CondensedRule {
            id: "vip".to_string(),
            name: "VIP discount".to_string(),
            when: "Age >= 18 && VipLevel >= 2 && Amount > 100".to_string(),
            then: vec![
                ("Result.discount".to_string(), "0.15".to_string()),
                ("Result.eligible".to_string(), "true".to_string()),
            ],
            priority: 0,
            enabled: true,
        });
        lower_all(&[def], &parser).unwrap()
    }

    fn build_engine() -> Engine<InMemoryRuleStore, NullCache, GrlEvaluator> {
        let store = Arc::new(InMemoryRuleStore::new());
        store.put_rules(
            "USER_DISCOUNT",
            vec![Rule {
                id: "vip".to_string(),
                business_code: "USER_DISCOUNT".to_string(),
                name: "VIP discount".to_string(),
                source: vip_rule_source(),
                version: 1,
                enabled: true,
                created_at: 0,
                updated_at: 0,
                description: None,
                author: None,
            }],
        );
        Engine::new(
            store,
            Arc::new(NullCache),
            Duration::from_secs(60),
            Arc::new(GrlEvaluator),
            Duration::from_secs(60),
        )
    }

    #[tokio::test]
    async fn vip_discount_matches() {
        let engine = build_engine();
        let out: Output = engine
            .exec(CancellationToken::new(), "USER_DISCOUNT", &json!({"Age": 25, "VipLevel": 3, "Amount": 500}))
            .await
            .unwrap();
        assert_eq!(out, Output { discount: 0.15, eligible: true });
    }

    #[tokio::test]
    async fn non_matching_input_yields_empty_result() {
        let engine = build_engine();
        let out: Output = engine
            .exec(CancellationToken::new(), "USER_DISCOUNT", &json!({"Age": 16, "VipLevel": 3, "Amount": 500}))
            .await
            .unwrap();
        assert_eq!(out, Output::default());
    }

    #[tokio::test]
    async fn unknown_business_code_is_rule_not_found() {
        let engine = build_engine();
        let err = engine
            .exec::<_, Output>(CancellationToken::new(), "UNKNOWN", &json!({}))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::RuleNotFound(_)));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits_before_store_call() {
        let engine = build_engine();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = engine.exec::<_, Output>(ctx, "USER_DISCOUNT", &json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::Cancelled));
    }

    #[tokio::test]
    async fn close_is_idempotent_and_rejects_further_exec() {
        let engine = build_engine();
        engine.close().await;
        engine.close().await;
        let err = engine.exec::<_, Output>(CancellationToken::new(), "USER_DISCOUNT", &json!({})).await.unwrap_err();
        assert!(matches!(err, EngineError::EngineClosed));
    }

    #[allow(dead_code)]
    fn assert_cache_error_is_send(_: CacheError) {}
}
