//! Rule store contract (§4.4) and a reference in-process implementation.

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::model::Rule;

#[derive(Debug, Error, Clone)]
pub enum StoreError {
    #[error("store transport error: {0}")]
    Transport(String),
    #[error("operation cancelled")]
    Cancelled,
}

/// `findByBusinessCode` (§4.4): returns only enabled rules, sorted by version descending. An
/// empty list with no error is a valid response meaning "no applicable rules"; the pipeline,
/// not the store, is responsible for turning that into `rule-not-found`.
#[async_trait]
pub trait RuleStore: Send + Sync {
    async fn find_by_business_code(
        &self,
        business_code: &str,
        ctx: CancellationToken,
    ) -> Result<Vec<Rule>, StoreError>;
}

/// Reference `RuleStore` backed by an in-memory `DashMap`, grounded in the teacher's
/// `DashMap<Uuid, PooledServer>`-style registries (`lsp-daemon/src/pool.rs`). Not a database;
/// production deployments supply their own `RuleStore` against a real backing store.
#[derive(Default)]
pub struct InMemoryRuleStore {
    rules: DashMap<String, Vec<Rule>>,
}

impl InMemoryRuleStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the full rule list for a business code. Intended for tests, examples, and the
    /// CLI harness to seed rules; a real store would instead reflect whatever a caller
    /// persisted via its own write path.
    pub fn put_rules(&self, business_code: &str, rules: Vec<Rule>) {
        self.rules.insert(business_code.to_string(), rules);
    }
}

#[async_trait]
impl RuleStore for InMemoryRuleStore {
    async fn find_by_business_code(
        &self,
        business_code: &str,
        ctx: CancellationToken,
    ) -> Result<Vec<Rule>, StoreError> {
        if ctx.is_cancelled() {
            return Err(StoreError::Cancelled);
        }
        let mut rules: Vec<Rule> = self
            .rules
            .get(business_code)
            .map(|entry| entry.value().iter().filter(|r| r.enabled).cloned().collect())
            .unwrap_or_default();
        rules.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.id.cmp(&b.id)));
        Ok(rules)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Rule;

    fn rule(id: &str, version: i64, enabled: bool) -> Rule {
        Rule {
            id: id.to_string(),
            business_code: "BIZ".to_string(),
            name: "n".to_string(),
            source: "S".to_string(),
            version,
            enabled,
            created_at: 0,
            updated_at: 0,
            description: None,
            author: None,
        }
    }

    #[tokio::test]
    async fn unknown_business_code_returns_empty() {
        let store = InMemoryRuleStore::new();
        let rules = store
            .find_by_business_code("UNKNOWN", CancellationToken::new())
            .await
            .unwrap();
        assert!(rules.is_empty());
    }

    #[tokio::test]
    async fn disabled_rules_are_filtered_out() {
        let store = InMemoryRuleStore::new();
        store.put_rules("BIZ", vec![rule("a", 1, true), rule("b", 1, false)]);
        let rules = store
            .find_by_business_code("BIZ", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].id, "a");
    }

    #[tokio::test]
    async fn results_are_sorted_by_version_descending() {
        let store = InMemoryRuleStore::new();
        store.put_rules("BIZ", vec![rule("a", 1, true), rule("b", 3, true), rule("c", 2, true)]);
        let rules = store
            .find_by_business_code("BIZ", CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(rules.iter().map(|r| r.id.as_str()).collect::<Vec<_>>(), vec!["b", "c", "a"]);
    }

    #[tokio::test]
    async fn cancelled_context_is_honoured() {
        let store = InMemoryRuleStore::new();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = store.find_by_business_code("BIZ", ctx).await.unwrap_err();
        assert!(matches!(err, StoreError::Cancelled));
    }
}
