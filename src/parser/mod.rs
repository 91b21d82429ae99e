//! Dialect-normalising expression parser (§4.2). Turns a SQL- or script-flavoured expression
//! string into the engine's internal expression text, validating it along the way by handing the
//! normalised form to [`crate::exprlang::parse`].

pub mod script;
pub mod sql;

use std::str::FromStr;

use crate::exprlang;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dialect {
    Sql,
    Script,
}

impl FromStr for Dialect {
    type Err = DialectError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "sql" => Ok(Dialect::Sql),
            "script" => Ok(Dialect::Script),
            other => Err(DialectError::UnknownDialect(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum DialectError {
    #[error("empty expression")]
    Empty,
    #[error("unknown dialect: {0}")]
    UnknownDialect(String),
    #[error("expression starts with a binary operator")]
    LeadingOperator,
    #[error("expression ends with a binary operator")]
    TrailingOperator,
    #[error("empty target in action")]
    EmptyTarget,
    #[error("syntax error: {0}")]
    Syntax(#[from] exprlang::ParseError),
}

const LEADING_BINARY_OPS: &[&str] = &["&&", "||", "==", "!=", ">=", "<=", ">", "<", "+", "*", "/", "%"];
const TRAILING_BINARY_OPS: &[&str] = &["&&", "||", "==", "!=", ">=", "<=", ">", "<", "+", "-", "*", "/", "%"];

/// Normalises dialect-flavoured expression text into the internal expression language and
/// validates the surrounding well-formedness rules shared by both dialects.
pub struct ExpressionParser {
    dialect: Dialect,
}

impl ExpressionParser {
    pub fn new(dialect: Dialect) -> Self {
        ExpressionParser { dialect }
    }

    pub fn set_dialect(&mut self, dialect: Dialect) {
        self.dialect = dialect;
    }

    /// `parseCondition(expr)`: parses a boolean expression, syntax-checking the normalised form.
    pub fn parse_condition(&self, expr: &str) -> Result<String, DialectError> {
        self.parse_expression(expr)
    }

    /// `parseExpression(expr)`: parses any value-producing expression. Ternary forms are kept
    /// literal with the condition parenthesised.
    pub fn parse_expression(&self, expr: &str) -> Result<String, DialectError> {
        validate_bounds(expr)?;
        let normalised = match self.dialect {
            Dialect::Sql => sql::normalise(expr),
            Dialect::Script => script::normalise(expr),
        };
        let normalised = parenthesise_ternary_condition(&normalised);
        exprlang::parse(&normalised)?;
        Ok(normalised)
    }

    /// `parseAction(target, expr)`: produces `<resolved(target)> = <parseExpression(expr)>`.
    /// `Result.<field>` / `result.<field>` targets are rewritten to `Result["<field>"]`.
    pub fn parse_action(&self, target: &str, expr: &str) -> Result<String, DialectError> {
        let target = target.trim();
        if target.is_empty() {
            return Err(DialectError::EmptyTarget);
        }
        let resolved = resolve_target(target);
        let value = self.parse_expression(expr)?;
        Ok(format!("{resolved} = {value}"))
    }
}

fn validate_bounds(expr: &str) -> Result<(), DialectError> {
    let trimmed = expr.trim();
    if trimmed.is_empty() {
        return Err(DialectError::Empty);
    }
    for op in LEADING_BINARY_OPS {
        if trimmed.starts_with(op) {
            return Err(DialectError::LeadingOperator);
        }
    }
    for op in TRAILING_BINARY_OPS {
        if trimmed.ends_with(op) {
            return Err(DialectError::TrailingOperator);
        }
    }
    Ok(())
}

fn resolve_target(target: &str) -> String {
    for prefix in ["Result.", "result."] {
        if let Some(field) = target.strip_prefix(prefix) {
            return format!("Result[\"{field}\"]");
        }
    }
    target.to_string()
}

/// If the whole expression is a top-level ternary `cond ? a : b`, parenthesise `cond`. This is
/// purely textual; nested ternaries inside `a`/`b` are left for the recursive structure to
/// pick up when they themselves pass through this function.
fn parenthesise_ternary_condition(expr: &str) -> String {
    let trimmed = expr.trim();
    if let Some((cond, rest)) = split_top_level(trimmed, '?') {
        if split_top_level(&rest, ':').is_some() && !cond.trim().starts_with('(') {
            return format!("({}){}", cond.trim(), rest);
        }
    }
    trimmed.to_string()
}

/// Splits on the first occurrence of `sep` that sits outside of any bracket/paren/string nesting.
fn split_top_level(s: &str, sep: char) -> Option<(String, String)> {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut chars = s.char_indices().peekable();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => in_string = !in_string,
            '(' | '[' if !in_string => depth += 1,
            ')' | ']' if !in_string => depth -= 1,
            c if c == sep && depth == 0 && !in_string => {
                return Some((s[..i].to_string(), s[i..].to_string()));
            }
            _ => {}
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_and_dangling_operators() {
        let p = ExpressionParser::new(Dialect::Script);
        assert!(matches!(p.parse_expression("").unwrap_err(), DialectError::Empty));
        assert!(matches!(p.parse_expression("&& 1").unwrap_err(), DialectError::LeadingOperator));
        assert!(matches!(p.parse_expression("1 +").unwrap_err(), DialectError::TrailingOperator));
    }

    #[test]
    fn rewrites_result_target() {
        let p = ExpressionParser::new(Dialect::Script);
        let out = p.parse_action("Result.Discount", "10").unwrap();
        assert_eq!(out, "Result[\"Discount\"] = 10");
    }

    #[test]
    fn rejects_empty_target() {
        let p = ExpressionParser::new(Dialect::Script);
        assert!(matches!(p.parse_action("  ", "10").unwrap_err(), DialectError::EmptyTarget));
    }

    #[test]
    fn ternary_condition_is_parenthesised() {
        let p = ExpressionParser::new(Dialect::Script);
        let out = p.parse_expression("Age >= 18 ? \"adult\" : \"minor\"").unwrap();
        assert_eq!(out, "(Age >= 18) ? \"adult\" : \"minor\"");
    }

    #[test]
    fn unknown_dialect_is_rejected() {
        assert!(matches!(Dialect::from_str("xml"), Err(DialectError::UnknownDialect(_))));
    }
}
