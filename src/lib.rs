//! A business-rule execution engine: dynamic rule definitions lowered into a canonical internal
//! expression language, compiled and cached per rule-set fingerprint, and run through a
//! pluggable evaluator against caller-supplied input.

pub mod artifact_cache;
pub mod cache;
pub mod config;
pub mod dynamic;
pub mod error;
pub mod evaluator;
pub mod exprlang;
pub mod lowering;
pub mod model;
pub mod parser;
pub mod pipeline;
pub mod projector;
pub mod store;

pub use config::{ConfigError, EngineConfig, ResolvedConfig};
pub use dynamic::DynamicEngine;
pub use error::{EngineError, EngineResult};
pub use evaluator::{Evaluator, EvaluatorError, GrlEvaluator};
pub use lowering::{CondensedRule, LoweringError, MetricRule, RuleDefinition, StructuredRule};
pub use model::{fingerprint, fingerprint_source, ParamView, ResultMap, Rule, RuleSet, Value};
pub use parser::{Dialect, DialectError, ExpressionParser};
pub use pipeline::Engine;
pub use store::{InMemoryRuleStore, RuleStore, StoreError};
