//! Rule-definition lowering (§4.3): converts the three surface rule forms into canonical rule
//! source text: a sequence of GRL-style rule blocks the evaluator compiles directly.

mod condensed;
mod metric;
mod structured;

pub use condensed::CondensedRule;
pub use metric::MetricRule;
pub use structured::{Action, CompositeOp, Condition, ConditionOperator, StructuredRule};

use serde::{Deserialize, Serialize};

use crate::parser::{DialectError, ExpressionParser};

/// A surface rule description in one of the three alternative shapes (§3 "Surface rule forms").
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "form", rename_all = "lowercase")]
pub enum RuleDefinition {
    Condensed(CondensedRule),
    Metric(MetricRule),
    Structured(StructuredRule),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum LoweringError {
    #[error("rule {id:?}: {message}")]
    Field { id: String, message: String },
    #[error("expression error: {0}")]
    Expression(#[from] DialectError),
}

impl RuleDefinition {
    fn id(&self) -> &str {
        match self {
            RuleDefinition::Condensed(r) => &r.id,
            RuleDefinition::Metric(r) => &r.id,
            RuleDefinition::Structured(r) => &r.id,
        }
    }

    fn enabled(&self) -> bool {
        match self {
            RuleDefinition::Condensed(r) => r.enabled,
            RuleDefinition::Metric(r) => r.enabled,
            RuleDefinition::Structured(r) => r.enabled,
        }
    }

    fn lower(&self, parser: &ExpressionParser) -> Result<String, Vec<LoweringError>> {
        match self {
            RuleDefinition::Condensed(r) => condensed::lower(r, parser).map_err(|e| vec![e]),
            RuleDefinition::Metric(r) => metric::lower(r, parser).map_err(|e| vec![e]),
            RuleDefinition::Structured(r) => structured::lower(r, parser),
        }
    }
}

/// Renders a GRL-style rule block: `rule <id> "<name>" salience <priority> { when ... then ...; }`.
fn render_block(id: &str, name: &str, priority: i64, guard: &str, actions: &[String]) -> String {
    let body = actions
        .iter()
        .map(|a| format!("        {a};"))
        .collect::<Vec<_>>()
        .join("\n");
    format!(
        "rule {id} \"{name}\" salience {priority} {{\n    when\n        {guard}\n    then\n{body}\n}}",
        id = id,
        name = name.replace('"', "\\\""),
        priority = priority,
        guard = guard,
        body = body,
    )
}

/// Lowers a full set of rule definitions into the canonical source consumed by
/// `Evaluator::compile`, in the order given. Disabled rules are dropped. Every error encountered
/// across every rule is collected and returned together rather than short-circuiting on first
/// failure, mirroring the structured-form validation requirement for the whole batch.
pub fn lower_all(defs: &[RuleDefinition], parser: &ExpressionParser) -> Result<String, Vec<LoweringError>> {
    let mut blocks = Vec::new();
    let mut errors = Vec::new();

    for def in defs {
        if !def.enabled() {
            continue;
        }
        match def.lower(parser) {
            Ok(block) => blocks.push(block),
            Err(mut errs) => errors.append(&mut errs),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }
    Ok(blocks.join("\n\n"))
}
