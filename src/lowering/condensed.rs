//! Condensed (when/then) surface form (§3, §4.3).

use serde::{Deserialize, Serialize};

use super::{render_block, LoweringError};
use crate::parser::ExpressionParser;

/// A single condition expression plus a target → value-expression mapping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CondensedRule {
    pub id: String,
    pub name: String,
    pub when: String,
    /// `(target, value expression)` pairs in insertion order.
    pub then: Vec<(String, String)>,
    pub priority: i64,
    pub enabled: bool,
}

/// Emits a single rule whose guard is `parseCondition(when)` and whose body assigns every
/// `(target, valueExpr)` pair, followed by a self-retraction marker so the rule fires at most
/// once per activation, the same `Retract(ruleName)` idiom a Grule-style engine uses.
pub fn lower(rule: &CondensedRule, parser: &ExpressionParser) -> Result<String, LoweringError> {
    let guard = parser.parse_condition(&rule.when)?;

    let mut actions = Vec::with_capacity(rule.then.len() + 1);
    for (target, value_expr) in &rule.then {
        actions.push(parser.parse_action(target, value_expr)?);
    }
    actions.push(format!("Retract(\"{}\")", rule.id.replace('"', "\\\"")));

    Ok(render_block(&rule.id, &rule.name, rule.priority, &guard, &actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Dialect;

    #[test]
    fn lowers_guard_and_actions_with_retract_marker() {
        let parser = ExpressionParser::new(Dialect::Script);
        let rule = CondensedRule {
            id: "vip".to_string(),
            name: "VIP discount".to_string(),
            when: "Age >= 18 && VipLevel >= 2 && Amount > 100".to_string(),
            then: vec![
                ("Result.Discount".to_string(), "0.15".to_string()),
                ("Result.Eligible".to_string(), "true".to_string()),
            ],
            priority: 10,
            enabled: true,
        };
        let block = lower(&rule, &parser).unwrap();
        assert!(block.contains("rule vip \"VIP discount\" salience 10"));
        assert!(block.contains("Age >= 18 && VipLevel >= 2 && Amount > 100"));
        assert!(block.contains("Result[\"Discount\"] = 0.15;"));
        assert!(block.contains("Result[\"Eligible\"] = true;"));
        assert!(block.contains("Retract(\"vip\");"));
    }
}
