//! Metric (formula) surface form (§3, §4.3).

use serde::{Deserialize, Serialize};

use super::{render_block, LoweringError};
use crate::parser::ExpressionParser;

/// A named formula over intermediate variables, guarded by a conjunction of preconditions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricRule {
    pub id: String,
    pub name: String,
    pub result_name: String,
    pub formula: String,
    /// `(variable name, expression)` pairs in insertion order.
    pub variables: Vec<(String, String)>,
    pub preconditions: Vec<String>,
    pub priority: i64,
    pub enabled: bool,
}

/// Emits a single rule. The guard is the conjunction of all preconditions (`true` if none); the
/// body assigns each intermediate variable as a local binding, then assigns
/// `Result.<Name> = formula`. Values in this engine are always `f64`, so integer-looking inputs
/// are promoted to floating point automatically: there is no separate integer representation to
/// widen from.
pub fn lower(rule: &MetricRule, parser: &ExpressionParser) -> Result<String, LoweringError> {
    let guard = if rule.preconditions.is_empty() {
        "true".to_string()
    } else {
        let mut parts = Vec::with_capacity(rule.preconditions.len());
        for pre in &rule.preconditions {
            parts.push(parser.parse_condition(pre)?);
        }
        parts.join(" && ")
    };

    let mut actions = Vec::with_capacity(rule.variables.len() + 1);
    for (var, expr) in &rule.variables {
        if var.trim().is_empty() {
            return Err(LoweringError::Field {
                id: rule.id.clone(),
                message: "intermediate variable name must not be empty".to_string(),
            });
        }
        let value = parser.parse_expression(expr)?;
        actions.push(format!("{var} = {value}"));
    }

    let formula = parser.parse_expression(&rule.formula)?;
    actions.push(format!("Result[\"{}\"] = {formula}", rule.result_name));

    Ok(render_block(&rule.id, &rule.name, rule.priority, &guard, &actions))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Dialect;

    #[test]
    fn lowers_variables_and_formula_with_implicit_true_guard() {
        let parser = ExpressionParser::new(Dialect::Script);
        let rule = MetricRule {
            id: "score".to_string(),
            name: "Customer score".to_string(),
            result_name: "CustomerScore".to_string(),
            formula: "age_score + income_score + vip_score".to_string(),
            variables: vec![
                ("age_score".to_string(), "Age * 0.1".to_string()),
                ("income_score".to_string(), "Income * 0.0001".to_string()),
                ("vip_score".to_string(), "VipLevel * 10".to_string()),
            ],
            preconditions: vec![],
            priority: 0,
            enabled: true,
        };
        let block = lower(&rule, &parser).unwrap();
        assert!(block.contains("when\n        true"));
        assert!(block.contains("age_score = Age * 0.1;"));
        assert!(block.contains("Result[\"CustomerScore\"] = age_score + income_score + vip_score;"));
    }

    #[test]
    fn conjuncts_preconditions() {
        let parser = ExpressionParser::new(Dialect::Script);
        let rule = MetricRule {
            id: "r".to_string(),
            name: "n".to_string(),
            result_name: "X".to_string(),
            formula: "1".to_string(),
            variables: vec![],
            preconditions: vec!["Age >= 18".to_string(), "Active".to_string()],
            priority: 0,
            enabled: true,
        };
        let block = lower(&rule, &parser).unwrap();
        assert!(block.contains("Age >= 18 && Active"));
    }
}
