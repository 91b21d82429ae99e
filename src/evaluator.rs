//! The evaluator contract (§6) and a reference implementation that interprets the canonical
//! GRL-style rule source lowering produces (§4.3).
//!
//! Canonical rule source shape, one block per rule, blocks concatenated with blank lines:
//! ```text
//! rule <id> "<name>" salience <priority> {
//!     when
//!         <guard expression>
//!     then
//!         <statement>;
//!         <statement>;
//! }
//! ```
//! Statements are either assignments (`<target> = <expr>`, target a bare identifier for a local
//! binding or `Result["field"]`) or bare calls (`Retract("id")`, `RetractAll()`, `Alert(...)`,
//! `Log(...)`, or an arbitrary `invoke` target), all written in the internal expression language
//! from `crate::exprlang`; the evaluator never re-implements expression syntax of its own.

use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::exprlang::{self, EvalContext, Expr};
use crate::model::{ParamView, ResultMap, Value};

#[derive(Debug, Clone, thiserror::Error)]
pub enum EvaluatorError {
    #[error("cancelled")]
    Cancelled,
    #[error("compile error: {0}")]
    Compile(String),
    #[error("evaluation error: {0}")]
    Evaluate(String),
    #[error("evaluator panicked: {0}")]
    Panic(String),
}

/// External evaluator contract (§6). The pipeline is generic over this trait so a caller may
/// plug in any rule-execution VM; `GrlEvaluator` below is the reference implementation the rest
/// of this crate exercises.
#[async_trait]
pub trait Evaluator: Send + Sync {
    type Artifact: Send + Sync;

    async fn compile(&self, source: &str, ctx: CancellationToken) -> Result<Self::Artifact, EvaluatorError>;

    async fn execute(
        &self,
        artifact: &Self::Artifact,
        view: &ParamView,
        result: &mut ResultMap,
        ctx: CancellationToken,
    ) -> Result<(), EvaluatorError>;
}

enum Target {
    Result(Expr),
    Local(String),
}

enum Statement {
    Assign { target: Target, value: Expr },
    Call { name: String, args: Vec<Expr> },
}

struct CompiledRule {
    id: String,
    #[allow(dead_code)]
    name: String,
    priority: i64,
    guard: Expr,
    actions: Vec<Statement>,
}

/// Compiled artifact produced by [`GrlEvaluator::compile`]: an ordered, priority-sorted list of
/// rules. Immutable after construction, so concurrent `execute` calls over the same artifact
/// never race.
pub struct CompiledRules {
    rules: Vec<CompiledRule>,
}

/// Reference evaluator: a small Grule-like interpreter over the internal expression language.
#[derive(Debug, Default, Clone, Copy)]
pub struct GrlEvaluator;

#[async_trait]
impl Evaluator for GrlEvaluator {
    type Artifact = CompiledRules;

    async fn compile(&self, source: &str, ctx: CancellationToken) -> Result<CompiledRules, EvaluatorError> {
        if ctx.is_cancelled() {
            return Err(EvaluatorError::Cancelled);
        }
        let mut rules = Vec::new();
        for block in split_blocks(source) {
            if block.trim().is_empty() {
                continue;
            }
            rules.push(parse_block(block).map_err(EvaluatorError::Compile)?);
        }
        rules.sort_by(|a, b| b.priority.cmp(&a.priority));
        debug!(rule_count = rules.len(), "compiled rule set");
        Ok(CompiledRules { rules })
    }

    async fn execute(
        &self,
        artifact: &CompiledRules,
        view: &ParamView,
        result: &mut ResultMap,
        ctx: CancellationToken,
    ) -> Result<(), EvaluatorError> {
        if ctx.is_cancelled() {
            return Err(EvaluatorError::Cancelled);
        }
        let rules = &artifact.rules;
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| run(rules, view, result, &ctx)));
        match outcome {
            Ok(inner) => inner,
            Err(payload) => Err(EvaluatorError::Panic(panic_message(payload))),
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

fn run(
    rules: &[CompiledRule],
    view: &ParamView,
    result: &mut ResultMap,
    ctx: &CancellationToken,
) -> Result<(), EvaluatorError> {
    let mut locals: HashMap<String, Value> = HashMap::new();

    for rule in rules {
        if ctx.is_cancelled() {
            return Err(EvaluatorError::Cancelled);
        }

        let guard_ctx = EvalContext { params: view, result: &*result, locals: locals.clone() };
        let matched = exprlang::eval(&rule.guard, &guard_ctx)
            .map_err(|e| EvaluatorError::Evaluate(format!("rule {}: {e}", rule.id)))?
            .is_truthy();
        if !matched {
            continue;
        }

        let mut halt = false;
        for action in &rule.actions {
            match action {
                Statement::Assign { target, value } => {
                    let eval_ctx = EvalContext { params: view, result: &*result, locals: locals.clone() };
                    let resolved =
                        exprlang::eval(value, &eval_ctx).map_err(|e| EvaluatorError::Evaluate(e.to_string()))?;
                    match target {
                        Target::Result(field_expr) => {
                            let key_ctx = EvalContext { params: view, result: &*result, locals: locals.clone() };
                            let key = exprlang::eval(field_expr, &key_ctx)
                                .map_err(|e| EvaluatorError::Evaluate(e.to_string()))?;
                            result.set(&key.to_string(), resolved);
                        }
                        Target::Local(name) => {
                            locals.insert(name.clone(), resolved);
                        }
                    }
                }
                Statement::Call { name, args } => {
                    let eval_ctx = EvalContext { params: view, result: &*result, locals: locals.clone() };
                    let values = args
                        .iter()
                        .map(|a| exprlang::eval(a, &eval_ctx))
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|e| EvaluatorError::Evaluate(e.to_string()))?;
                    match name.as_str() {
                        "Retract" => {}
                        "RetractAll" => halt = true,
                        "Alert" => warn!(rule = %rule.id, args = ?values, "rule alert"),
                        "Log" => info!(rule = %rule.id, args = ?values, "rule log"),
                        other => debug!(rule = %rule.id, target = other, args = ?values, "rule invoke (no-op in reference evaluator)"),
                    }
                }
            }
        }

        if halt {
            break;
        }
    }

    Ok(())
}

fn split_blocks(source: &str) -> Vec<&str> {
    let mut starts = Vec::new();
    let mut pos = 0usize;
    for line in source.split_inclusive('\n') {
        if line.trim_start().starts_with("rule ") {
            starts.push(pos);
        }
        pos += line.len();
    }
    if starts.is_empty() {
        return if source.trim().is_empty() { Vec::new() } else { vec![source.trim()] };
    }
    starts
        .iter()
        .enumerate()
        .map(|(i, &start)| {
            let end = starts.get(i + 1).copied().unwrap_or(source.len());
            source[start..end].trim()
        })
        .collect()
}

fn parse_block(block: &str) -> Result<CompiledRule, String> {
    let rest = block.strip_prefix("rule ").ok_or("expected block to start with \"rule\"")?;
    let rest = rest.trim_start();

    let id_end = rest.find(char::is_whitespace).ok_or("missing rule id")?;
    let id = rest[..id_end].to_string();
    let rest = rest[id_end..].trim_start();

    let rest = rest.strip_prefix('"').ok_or("expected quoted rule name")?;
    let (name, rest) = read_quoted(rest)?;
    let rest = rest.trim_start();

    let rest = rest.strip_prefix("salience").ok_or("expected \"salience\"")?.trim_start();
    let digits_end = rest
        .char_indices()
        .find(|(_, c)| !(c.is_ascii_digit() || *c == '-'))
        .map(|(i, _)| i)
        .unwrap_or(rest.len());
    let priority: i64 = rest[..digits_end].parse().map_err(|_| "invalid salience".to_string())?;

    let when_idx = block.find("when").ok_or("missing when section")?;
    let then_idx = block[when_idx..].find("then").ok_or("missing then section")?.checked_add(when_idx).unwrap();
    let guard_text = block[when_idx + "when".len()..then_idx].trim();
    let mut body_text = block[then_idx + "then".len()..].trim();
    body_text = body_text.strip_suffix('}').unwrap_or(body_text).trim_end();

    let guard = exprlang::parse(guard_text).map_err(|e| format!("rule {id}: guard: {e}"))?;

    let mut actions = Vec::new();
    for stmt in split_statements(body_text) {
        if stmt.trim().is_empty() {
            continue;
        }
        actions.push(parse_statement(stmt.trim()).map_err(|e| format!("rule {id}: {e}"))?);
    }

    Ok(CompiledRule { id, name, priority, guard, actions })
}

fn read_quoted(s: &str) -> Result<(String, &str), String> {
    let mut out = String::new();
    let mut chars = s.char_indices();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok((out, &s[i + 1..])),
            '\\' => {
                if let Some((_, next)) = chars.next() {
                    out.push(next);
                } else {
                    return Err("unterminated rule name".to_string());
                }
            }
            other => out.push(other),
        }
    }
    Err("unterminated rule name".to_string())
}

fn split_statements(body: &str) -> Vec<&str> {
    let mut out = Vec::new();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut start = 0usize;
    for (i, c) in body.char_indices() {
        match c {
            '"' => in_string = !in_string,
            '(' | '[' if !in_string => depth += 1,
            ')' | ']' if !in_string => depth -= 1,
            ';' if depth == 0 && !in_string => {
                out.push(&body[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if start < body.len() {
        out.push(&body[start..]);
    }
    out
}

fn parse_statement(stmt: &str) -> Result<Statement, String> {
    if let Some(split) = find_assignment(stmt) {
        let (target_text, value_text) = (stmt[..split.0].trim(), stmt[split.1..].trim());
        let target_expr = exprlang::parse(target_text).map_err(|e| format!("assignment target: {e}"))?;
        let value_expr = exprlang::parse(value_text).map_err(|e| format!("assignment value: {e}"))?;
        let target = match target_expr {
            Expr::Ident(name) => Target::Local(name),
            index @ Expr::Index(..) => Target::Result(index),
            other => return Err(format!("invalid assignment target: {other:?}")),
        };
        return Ok(Statement::Assign { target, value: value_expr });
    }

    match exprlang::parse(stmt).map_err(|e| e.to_string())? {
        Expr::Call(name, args) => Ok(Statement::Call { name, args }),
        other => Err(format!("expected a call statement, got {other:?}")),
    }
}

/// Finds the byte range of a top-level `=` assignment operator, distinguishing it from
/// `==`, `!=`, `>=`, `<=` and from `=` nested inside brackets/parens/strings.
fn find_assignment(stmt: &str) -> Option<(usize, usize)> {
    let bytes = stmt.as_bytes();
    let mut depth = 0i32;
    let mut in_string = false;
    let mut i = 0usize;
    while i < bytes.len() {
        match bytes[i] {
            b'"' => in_string = !in_string,
            b'(' | b'[' if !in_string => depth += 1,
            b')' | b']' if !in_string => depth -= 1,
            b'=' if depth == 0 && !in_string => {
                let prev = if i == 0 { None } else { Some(bytes[i - 1]) };
                let next = bytes.get(i + 1).copied();
                if !matches!(prev, Some(b'=') | Some(b'!') | Some(b'<') | Some(b'>')) && next != Some(b'=') {
                    return Some((i, i + 1));
                }
            }
            _ => {}
        }
        i += 1;
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lowering::{CondensedRule, RuleDefinition};
    use crate::parser::{Dialect, ExpressionParser};

    async fn compiled(source: &str) -> CompiledRules {
        GrlEvaluator.compile(source, CancellationToken::new()).await.unwrap()
    }

    #[tokio::test]
    async fn vip_discount_end_to_end() {
        let parser = ExpressionParser::new(Dialect::Script);
        let rule = RuleDefinition::Condensed(CondensedRule {
            id: "vip".to_string(),
            name: "VIP discount".to_string(),
            when: "Age >= 18 && VipLevel >= 2 && Amount > 100".to_string(),
            then: vec![
                ("Result.Discount".to_string(), "0.15".to_string()),
                ("Result.Eligible".to_string(), "true".to_string()),
            ],
            priority: 10,
            enabled: true,
        });
        let source = crate::lowering::lower_all(&[rule], &parser).unwrap();
        let artifact = compiled(&source).await;

        let mut view = ParamView::default();
        view.0.insert("Age".to_string(), Value::Number(25.0));
        view.0.insert("VipLevel".to_string(), Value::Number(3.0));
        view.0.insert("Amount".to_string(), Value::Number(500.0));
        let mut result = ResultMap::new();
        GrlEvaluator.execute(&artifact, &view, &mut result, CancellationToken::new()).await.unwrap();

        assert_eq!(result.get("Discount"), Some(&Value::Number(0.15)));
        assert_eq!(result.get("Eligible"), Some(&Value::Bool(true)));
    }

    #[tokio::test]
    async fn guard_false_yields_empty_result() {
        let parser = ExpressionParser::new(Dialect::Script);
        let rule = RuleDefinition::Condensed(CondensedRule {
            id: "vip".to_string(),
            name: "VIP discount".to_string(),
            when: "Age >= 18 && VipLevel >= 2 && Amount > 100".to_string(),
            then: vec![("Result.Discount".to_string(), "0.15".to_string())],
            priority: 10,
            enabled: true,
        });
        let source = crate::lowering::lower_all(&[rule], &parser).unwrap();
        let artifact = compiled(&source).await;

        let mut view = ParamView::default();
        view.0.insert("Age".to_string(), Value::Number(16.0));
        view.0.insert("VipLevel".to_string(), Value::Number(3.0));
        view.0.insert("Amount".to_string(), Value::Number(500.0));
        let mut result = ResultMap::new();
        GrlEvaluator.execute(&artifact, &view, &mut result, CancellationToken::new()).await.unwrap();

        assert!(result.is_empty());
    }

    #[tokio::test]
    async fn metric_formula_is_evaluated() {
        use crate::lowering::MetricRule;
        let parser = ExpressionParser::new(Dialect::Script);
        let rule = RuleDefinition::Metric(MetricRule {
            id: "score".to_string(),
            name: "score".to_string(),
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
        });
        let source = crate::lowering::lower_all(&[rule], &parser).unwrap();
        let artifact = compiled(&source).await;

        let mut view = ParamView::default();
        view.0.insert("Age".to_string(), Value::Number(30.0));
        view.0.insert("Income".to_string(), Value::Number(80000.0));
        view.0.insert("VipLevel".to_string(), Value::Number(3.0));
        let mut result = ResultMap::new();
        GrlEvaluator.execute(&artifact, &view, &mut result, CancellationToken::new()).await.unwrap();

        assert_eq!(result.get("CustomerScore"), Some(&Value::Number(41.0)));
    }

    #[tokio::test]
    async fn cancelled_context_short_circuits_execute() {
        let artifact = compiled("").await;
        let view = ParamView::default();
        let mut result = ResultMap::new();
        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = GrlEvaluator.execute(&artifact, &view, &mut result, ctx).await.unwrap_err();
        assert!(matches!(err, EvaluatorError::Cancelled));
    }
}
