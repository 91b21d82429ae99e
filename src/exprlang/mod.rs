//! The engine's internal expression language: the common target both expression-dialect
//! rewrites (§4.2) and rule lowering (§4.3) normalise to, and the language the reference
//! evaluator (`crate::evaluator`) interprets directly.
//!
//! Grammar (informal): `||` binds loosest, then `&&`, then `!`/comparisons, then `+ -`, then
//! `* / %`, then unary `-`, then postfix indexing/call, with `?:` wrapping the whole expression.
//! Literals are numbers, double-quoted strings, `true`/`false`, `null`, and `[a, b, c]` arrays.

mod lexer;
mod parser;

pub use lexer::{LexError, Token};
pub use parser::{parse, ParseError};

use std::collections::HashMap;

use crate::model::{ParamView, ResultMap, Value};

#[derive(Debug, Clone, PartialEq)]
pub enum BinOp {
    And,
    Or,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    Add,
    Sub,
    Mul,
    Div,
    Mod,
}

#[derive(Debug, Clone, PartialEq)]
pub enum UnOp {
    Not,
    Neg,
}

/// Parsed form of the internal expression language.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Null,
    Bool(bool),
    Number(f64),
    Str(String),
    Ident(String),
    /// `base[field]`, e.g. `Result["Discount"]`.
    Index(Box<Expr>, Box<Expr>),
    Array(Vec<Expr>),
    Unary(UnOp, Box<Expr>),
    Binary(BinOp, Box<Expr>, Box<Expr>),
    Ternary(Box<Expr>, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

#[derive(Debug, Clone, thiserror::Error)]
pub enum EvalError {
    #[error("unknown function {0:?}")]
    UnknownFunction(String),
    #[error("wrong number of arguments to {0:?}")]
    Arity(String),
    #[error("type error: {0}")]
    Type(String),
}

/// Read-only evaluation context: caller parameters, the result container built up so far, and
/// a small scope of lambda-bound locals (used by `Filter`/`Map`'s single bound variable).
pub struct EvalContext<'a> {
    pub params: &'a ParamView,
    pub result: &'a ResultMap,
    pub locals: HashMap<String, Value>,
}

impl<'a> EvalContext<'a> {
    pub fn new(params: &'a ParamView, result: &'a ResultMap) -> Self {
        EvalContext {
            params,
            result,
            locals: HashMap::new(),
        }
    }

    fn resolve(&self, name: &str) -> Value {
        if let Some(v) = self.locals.get(name) {
            return v.clone();
        }
        if name == "Result" {
            return Value::Object(self.result.0.clone());
        }
        self.params.get(name).cloned().unwrap_or(Value::Null)
    }
}

pub fn eval(expr: &Expr, ctx: &EvalContext) -> Result<Value, EvalError> {
    match expr {
        Expr::Null => Ok(Value::Null),
        Expr::Bool(b) => Ok(Value::Bool(*b)),
        Expr::Number(n) => Ok(Value::Number(*n)),
        Expr::Str(s) => Ok(Value::String(s.clone())),
        Expr::Ident(name) => Ok(ctx.resolve(name)),
        Expr::Array(items) => {
            let values = items.iter().map(|e| eval(e, ctx)).collect::<Result<Vec<_>, _>>()?;
            Ok(Value::Array(values))
        }
        Expr::Index(base, field) => {
            let field = eval(field, ctx)?;
            let field_name = value_as_key(&field);
            if let Expr::Ident(name) = base.as_ref() {
                if name == "Result" {
                    return Ok(ctx.result.get(&field_name).cloned().unwrap_or(Value::Null));
                }
            }
            let base_val = eval(base, ctx)?;
            match base_val {
                Value::Object(map) => Ok(map.get(&field_name).cloned().unwrap_or(Value::Null)),
                Value::Array(items) => {
                    let idx: usize = field_name.parse().unwrap_or(usize::MAX);
                    Ok(items.get(idx).cloned().unwrap_or(Value::Null))
                }
                _ => Ok(Value::Null),
            }
        }
        Expr::Unary(UnOp::Not, inner) => Ok(Value::Bool(!eval(inner, ctx)?.is_truthy())),
        Expr::Unary(UnOp::Neg, inner) => {
            let n = eval(inner, ctx)?.as_f64().ok_or_else(|| EvalError::Type("expected number".into()))?;
            Ok(Value::Number(-n))
        }
        Expr::Binary(op, left, right) => eval_binary(op, left, right, ctx),
        Expr::Ternary(cond, a, b) => {
            if eval(cond, ctx)?.is_truthy() {
                eval(a, ctx)
            } else {
                eval(b, ctx)
            }
        }
        Expr::Call(name, args) => eval_call(name, args, ctx),
    }
}

fn value_as_key(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn eval_binary(op: &BinOp, left: &Expr, right: &Expr, ctx: &EvalContext) -> Result<Value, EvalError> {
    if matches!(op, BinOp::And) {
        let l = eval(left, ctx)?;
        if !l.is_truthy() {
            return Ok(Value::Bool(false));
        }
        return Ok(Value::Bool(eval(right, ctx)?.is_truthy()));
    }
    if matches!(op, BinOp::Or) {
        let l = eval(left, ctx)?;
        if l.is_truthy() {
            return Ok(Value::Bool(true));
        }
        return Ok(Value::Bool(eval(right, ctx)?.is_truthy()));
    }

    let l = eval(left, ctx)?;
    let r = eval(right, ctx)?;

    match op {
        BinOp::Eq => Ok(Value::Bool(values_equal(&l, &r))),
        BinOp::Ne => Ok(Value::Bool(!values_equal(&l, &r))),
        BinOp::Gt | BinOp::Lt | BinOp::Ge | BinOp::Le => {
            let (lf, rf) = (
                l.as_f64().ok_or_else(|| EvalError::Type("expected number".into()))?,
                r.as_f64().ok_or_else(|| EvalError::Type("expected number".into()))?,
            );
            Ok(Value::Bool(match op {
                BinOp::Gt => lf > rf,
                BinOp::Lt => lf < rf,
                BinOp::Ge => lf >= rf,
                BinOp::Le => lf <= rf,
                _ => unreachable!(),
            }))
        }
        BinOp::Add | BinOp::Sub | BinOp::Mul | BinOp::Div | BinOp::Mod => {
            let (lf, rf) = (
                l.as_f64().ok_or_else(|| EvalError::Type("expected number".into()))?,
                r.as_f64().ok_or_else(|| EvalError::Type("expected number".into()))?,
            );
            Ok(Value::Number(match op {
                BinOp::Add => lf + rf,
                BinOp::Sub => lf - rf,
                BinOp::Mul => lf * rf,
                BinOp::Div => lf / rf,
                BinOp::Mod => lf % rf,
                _ => unreachable!(),
            }))
        }
        BinOp::And | BinOp::Or => unreachable!("handled above"),
    }
}

fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => x == y,
        (Value::String(x), Value::String(y)) => x == y,
        (Value::Bool(x), Value::Bool(y)) => x == y,
        (Value::Null, Value::Null) => true,
        _ => a.as_f64().zip(b.as_f64()).map(|(x, y)| x == y).unwrap_or(false),
    }
}

fn eval_call(name: &str, args: &[Expr], ctx: &EvalContext) -> Result<Value, EvalError> {
    match name {
        "Contains" => {
            if args.len() != 2 {
                return Err(EvalError::Arity("Contains".into()));
            }
            let haystack = eval(&args[0], ctx)?;
            let needle = eval(&args[1], ctx)?;
            let found = match haystack {
                Value::Array(items) => items.iter().any(|v| values_equal(v, &needle)),
                Value::String(s) => needle.as_str().map(|n| s.contains(n)).unwrap_or(false),
                _ => false,
            };
            Ok(Value::Bool(found))
        }
        "Matches" => {
            if args.len() != 2 {
                return Err(EvalError::Arity("Matches".into()));
            }
            let value = eval(&args[0], ctx)?;
            let pattern = eval(&args[1], ctx)?;
            let (Some(value), Some(pattern)) = (value.as_str(), pattern.as_str()) else {
                return Ok(Value::Bool(false));
            };
            Ok(Value::Bool(sql_like_match(value, pattern)))
        }
        "Count" => {
            if args.len() != 1 {
                return Err(EvalError::Arity("Count".into()));
            }
            match eval(&args[0], ctx)? {
                Value::Array(items) => Ok(Value::Number(items.len() as f64)),
                _ => Ok(Value::Number(0.0)),
            }
        }
        "Filter" => {
            if args.len() != 2 {
                return Err(EvalError::Arity("Filter".into()));
            }
            let items = match eval(&args[0], ctx)? {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let predicate_src = eval(&args[1], ctx)?;
            let predicate_src = predicate_src.as_str().ok_or_else(|| EvalError::Type("predicate must be a string".into()))?;
            let predicate = parse(predicate_src).map_err(|e| EvalError::Type(e.to_string()))?;
            let mut out = Vec::new();
            for item in items {
                let mut locals = ctx.locals.clone();
                locals.insert("x".to_string(), item.clone());
                let sub_ctx = EvalContext {
                    params: ctx.params,
                    result: ctx.result,
                    locals,
                };
                if eval(&predicate, &sub_ctx)?.is_truthy() {
                    out.push(item);
                }
            }
            Ok(Value::Array(out))
        }
        "Map" => {
            if args.len() != 2 {
                return Err(EvalError::Arity("Map".into()));
            }
            let items = match eval(&args[0], ctx)? {
                Value::Array(items) => items,
                _ => Vec::new(),
            };
            let mapper_src = eval(&args[1], ctx)?;
            let mapper_src = mapper_src.as_str().ok_or_else(|| EvalError::Type("mapper must be a string".into()))?;
            let mapper = parse(mapper_src).map_err(|e| EvalError::Type(e.to_string()))?;
            let mut out = Vec::new();
            for item in items {
                let mut locals = ctx.locals.clone();
                locals.insert("x".to_string(), item);
                let sub_ctx = EvalContext {
                    params: ctx.params,
                    result: ctx.result,
                    locals,
                };
                out.push(eval(&mapper, &sub_ctx)?);
            }
            Ok(Value::Array(out))
        }
        other => Err(EvalError::UnknownFunction(other.to_string())),
    }
}

/// SQL `LIKE` semantics: `%` matches any run of characters, `_` matches exactly one.
fn sql_like_match(value: &str, pattern: &str) -> bool {
    fn helper(v: &[char], p: &[char]) -> bool {
        match p.first() {
            None => v.is_empty(),
            Some('%') => helper(v, &p[1..]) || (!v.is_empty() && helper(&v[1..], p)),
            Some('_') => !v.is_empty() && helper(&v[1..], &p[1..]),
            Some(c) => v.first() == Some(c) && helper(&v[1..], &p[1..]),
        }
    }
    let v: Vec<char> = value.chars().collect();
    let p: Vec<char> = pattern.chars().collect();
    helper(&v, &p)
}
