//! Structured (standard) surface form (§3, §4.3): a recursively-serialised condition tree plus
//! an ordered action list.

use serde::{Deserialize, Serialize};

use super::{render_block, LoweringError};
use crate::model::Value;
use crate::parser::ExpressionParser;

/// The closed set of condition operators from §3. The structured form's "function variant" folds
/// into `In`/`NotIn`/`Contains`/`Matches`/`Between` here rather than getting a distinct AST node:
/// §4.3's serialisation rules only ever describe simple/composite/expression handling, so a
/// function-shaped condition is just a simple condition whose operator happens to compile to a
/// builtin call instead of an infix token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOperator {
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    In,
    NotIn,
    Contains,
    Matches,
    Between,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CompositeOp {
    And,
    Or,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Condition {
    Simple {
        left: String,
        operator: ConditionOperator,
        right: String,
    },
    Composite {
        operator: CompositeOp,
        children: Vec<Condition>,
    },
    Not(Box<Condition>),
    /// A raw expression in the rule's configured dialect, emitted verbatim after parsing.
    Expression(String),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Action {
    Assign { target: String, value: Value },
    Calculate { target: String, expression: String },
    Invoke { target: String, parameters: Vec<String> },
    Alert { parameters: Vec<String> },
    Log { parameters: Vec<String> },
    Stop,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StructuredRule {
    pub id: String,
    pub name: String,
    pub condition: Condition,
    pub actions: Vec<Action>,
    pub priority: i64,
    pub enabled: bool,
}

fn field(id: &str, message: impl Into<String>) -> LoweringError {
    LoweringError::Field { id: id.to_string(), message: message.into() }
}

pub fn lower(rule: &StructuredRule, parser: &ExpressionParser) -> Result<String, Vec<LoweringError>> {
    let mut errors = Vec::new();
    validate(rule, &mut errors);
    if !errors.is_empty() {
        return Err(errors);
    }

    let guard = match serialize_condition(&rule.condition, parser) {
        Ok(g) => g,
        Err(e) => return Err(vec![e]),
    };

    let mut actions = Vec::with_capacity(rule.actions.len());
    for action in &rule.actions {
        match serialize_action(action, parser) {
            Ok(a) => actions.push(a),
            Err(e) => errors.push(e),
        }
    }
    if !errors.is_empty() {
        return Err(errors);
    }

    Ok(render_block(&rule.id, &rule.name, rule.priority, &guard, &actions))
}

fn validate(rule: &StructuredRule, errors: &mut Vec<LoweringError>) {
    if rule.id.trim().is_empty() {
        errors.push(field(&rule.id, "rule id must not be empty"));
    }
    if rule.name.trim().is_empty() {
        errors.push(field(&rule.id, "rule name must not be empty"));
    }
    if rule.actions.is_empty() {
        errors.push(field(&rule.id, "rule must have at least one action"));
    }
    validate_condition(&rule.id, &rule.condition, errors);
    for action in &rule.actions {
        validate_action(&rule.id, action, errors);
    }
}

fn validate_condition(id: &str, condition: &Condition, errors: &mut Vec<LoweringError>) {
    match condition {
        Condition::Composite { children, .. } => {
            if children.is_empty() {
                errors.push(field(id, "composite condition must have at least one child"));
            }
            for child in children {
                validate_condition(id, child, errors);
            }
        }
        Condition::Not(child) => validate_condition(id, child, errors),
        Condition::Expression(expr) => {
            if expr.trim().is_empty() {
                errors.push(field(id, "expression condition must have a non-empty expression"));
            }
        }
        Condition::Simple { .. } => {}
    }
}

fn validate_action(id: &str, action: &Action, errors: &mut Vec<LoweringError>) {
    match action {
        Action::Assign { target, .. } if target.trim().is_empty() => {
            errors.push(field(id, "assign action must have a non-empty target"))
        }
        Action::Calculate { target, .. } if target.trim().is_empty() => {
            errors.push(field(id, "calculate action must have a non-empty target"))
        }
        Action::Invoke { target, .. } if target.trim().is_empty() => {
            errors.push(field(id, "invoke action must have a non-empty target"))
        }
        _ => {}
    }
}

fn serialize_condition(condition: &Condition, parser: &ExpressionParser) -> Result<String, LoweringError> {
    Ok(match condition {
        Condition::Simple { left, operator, right } => serialize_simple(left, operator, right),
        Condition::Composite { operator, children } => {
            let joiner = match operator {
                CompositeOp::And => " && ",
                CompositeOp::Or => " || ",
            };
            let parts = children
                .iter()
                .map(|c| serialize_condition(c, parser))
                .collect::<Result<Vec<_>, _>>()?;
            format!("({})", parts.join(joiner))
        }
        Condition::Not(child) => format!("!({})", serialize_condition(child, parser)?),
        Condition::Expression(expr) => parser.parse_condition(expr)?,
    })
}

fn serialize_simple(left: &str, operator: &ConditionOperator, right: &str) -> String {
    match operator {
        ConditionOperator::Eq => format!("{left} == {}", quote_operand(right)),
        ConditionOperator::Ne => format!("{left} != {}", quote_operand(right)),
        ConditionOperator::Gt => format!("{left} > {}", quote_operand(right)),
        ConditionOperator::Lt => format!("{left} < {}", quote_operand(right)),
        ConditionOperator::Ge => format!("{left} >= {}", quote_operand(right)),
        ConditionOperator::Le => format!("{left} <= {}", quote_operand(right)),
        ConditionOperator::In => format!("Contains([{}], {left})", quote_list(right)),
        ConditionOperator::NotIn => format!("!Contains([{}], {left})", quote_list(right)),
        ConditionOperator::Contains => format!("Contains({left}, {})", quote_operand(right)),
        ConditionOperator::Matches => format!("Matches({left}, {})", quote_operand(right)),
        ConditionOperator::Between => {
            let (lo, hi) = split_between(right);
            format!("{left} >= {lo} && {left} <= {hi}")
        }
    }
}

fn serialize_action(action: &Action, parser: &ExpressionParser) -> Result<String, LoweringError> {
    Ok(match action {
        Action::Assign { target, value } => format!("{} = {}", resolve_target(target), literal(value)),
        Action::Calculate { target, expression } => {
            format!("{} = {}", resolve_target(target), parser.parse_expression(expression)?)
        }
        Action::Invoke { target, parameters } => format!("{target}({})", quote_params(parameters)),
        Action::Alert { parameters } => format!("Alert({})", quote_params(parameters)),
        Action::Log { parameters } => format!("Log({})", quote_params(parameters)),
        Action::Stop => "RetractAll()".to_string(),
    })
}

fn resolve_target(target: &str) -> String {
    for prefix in ["Result.", "result."] {
        if let Some(f) = target.strip_prefix(prefix) {
            return format!("Result[\"{f}\"]");
        }
    }
    target.to_string()
}

fn literal(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => format!("\"{}\"", s.replace('"', "\\\"")),
        other => format!("\"{}\"", other.to_string().replace('"', "\\\"")),
    }
}

fn quote_params(params: &[String]) -> String {
    params.iter().map(|p| quote_operand(p)).collect::<Vec<_>>().join(", ")
}

fn quote_list(right: &str) -> String {
    right.split(',').map(|v| quote_operand(v.trim())).collect::<Vec<_>>().join(", ")
}

fn split_between(right: &str) -> (String, String) {
    let mut parts = right.splitn(2, ',');
    let lo = parts.next().unwrap_or("0").trim().to_string();
    let hi = parts.next().unwrap_or("0").trim().to_string();
    (lo, hi)
}

/// Quotes an operand as a string literal unless it already looks like a number, boolean, null,
/// an already-quoted literal, or a field reference (`Age`, `Result["Vip"]`).
fn quote_operand(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return "\"\"".to_string();
    }
    if trimmed.parse::<f64>().is_ok() {
        return trimmed.to_string();
    }
    if matches!(trimmed, "true" | "false" | "null") {
        return trimmed.to_string();
    }
    if trimmed.starts_with('"') && trimmed.ends_with('"') && trimmed.len() >= 2 {
        return trimmed.to_string();
    }
    if is_field_reference(trimmed) {
        return trimmed.to_string();
    }
    format!("\"{}\"", trimmed.replace('"', "\\\""))
}

fn is_field_reference(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_alphabetic() || c == '_' => {}
        _ => return false,
    }
    s.chars().all(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '[' | ']' | '"'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::Dialect;

    fn parser() -> ExpressionParser {
        ExpressionParser::new(Dialect::Script)
    }

    #[test]
    fn serializes_composite_and_simple_conditions() {
        let condition = Condition::Composite {
            operator: CompositeOp::And,
            children: vec![
                Condition::Simple { left: "Age".to_string(), operator: ConditionOperator::Ge, right: "18".to_string() },
                Condition::Not(Box::new(Condition::Simple {
                    left: "Banned".to_string(),
                    operator: ConditionOperator::Eq,
                    right: "true".to_string(),
                })),
            ],
        };
        let out = serialize_condition(&condition, &parser()).unwrap();
        assert_eq!(out, "(Age >= 18 && !(Banned == true))");
    }

    #[test]
    fn serializes_in_and_between() {
        let in_cond = Condition::Simple {
            left: "Region".to_string(),
            operator: ConditionOperator::In,
            right: "US,CA".to_string(),
        };
        assert_eq!(serialize_condition(&in_cond, &parser()).unwrap(), "Contains([\"US\", \"CA\"], Region)");

        let between = Condition::Simple {
            left: "Age".to_string(),
            operator: ConditionOperator::Between,
            right: "18,65".to_string(),
        };
        assert_eq!(serialize_condition(&between, &parser()).unwrap(), "Age >= 18 && Age <= 65");
    }

    #[test]
    fn validation_collects_all_errors_without_short_circuiting() {
        let rule = StructuredRule {
            id: "".to_string(),
            name: "".to_string(),
            condition: Condition::Composite { operator: CompositeOp::And, children: vec![] },
            actions: vec![],
            priority: 0,
            enabled: true,
        };
        let errors = match lower(&rule, &parser()) {
            Err(errs) => errs,
            Ok(_) => panic!("expected validation errors"),
        };
        assert!(errors.len() >= 4);
    }

    #[test]
    fn serializes_actions() {
        let p = parser();
        assert_eq!(
            serialize_action(&Action::Assign { target: "Result.X".to_string(), value: Value::Number(1.0) }, &p).unwrap(),
            "Result[\"X\"] = 1"
        );
        assert_eq!(
            serialize_action(&Action::Calculate { target: "Result.Y".to_string(), expression: "1 + 2".to_string() }, &p)
                .unwrap(),
            "Result[\"Y\"] = 1 + 2"
        );
        assert_eq!(serialize_action(&Action::Stop, &p).unwrap(), "RetractAll()");
    }
}
