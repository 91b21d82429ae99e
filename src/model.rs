//! Rule records, rule sets, fingerprinting, and the string-keyed value used throughout the
//! engine for both parameter views and result containers.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A value that can flow in or out of the evaluator: a parameter in the view passed to
/// `execute`, or a value written into the result container by a rule action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    Null,
    Bool(bool),
    Number(f64),
    String(String),
    Array(Vec<Value>),
    Object(HashMap<String, Value>),
}

impl Value {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Number(n) => Some(*n),
            Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            Value::Number(n) => Some(*n != 0.0),
            _ => None,
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Bool(b) => *b,
            Value::Number(n) => *n != 0.0,
            Value::String(s) => !s.is_empty(),
            Value::Array(a) => !a.is_empty(),
            Value::Object(o) => !o.is_empty(),
        }
    }

    pub fn from_json(v: serde_json::Value) -> Self {
        match v {
            serde_json::Value::Null => Value::Null,
            serde_json::Value::Bool(b) => Value::Bool(b),
            serde_json::Value::Number(n) => Value::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Value::String(s),
            serde_json::Value::Array(a) => Value::Array(a.into_iter().map(Value::from_json).collect()),
            serde_json::Value::Object(o) => {
                Value::Object(o.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Value::Null => serde_json::Value::Null,
            Value::Bool(b) => serde_json::Value::Bool(*b),
            Value::Number(n) => serde_json::Number::from_f64(*n)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            Value::String(s) => serde_json::Value::String(s.clone()),
            Value::Array(a) => serde_json::Value::Array(a.iter().map(Value::to_json).collect()),
            Value::Object(o) => {
                serde_json::Value::Object(o.iter().map(|(k, v)| (k.clone(), v.to_json())).collect())
            }
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Number(n) => write!(f, "{n}"),
            Value::String(s) => write!(f, "{s}"),
            Value::Array(_) | Value::Object(_) => write!(f, "{}", self.to_json()),
        }
    }
}

/// The generic parameter view the pipeline serialises a caller's input into before invoking
/// the evaluator (§4.6 step 4).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParamView(pub HashMap<String, Value>);

impl ParamView {
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    /// Build a view from an arbitrary serialisable input. Structured (object) values map
    /// field-for-field; anything else is wrapped as `{"Params": <value>}`. Values that cannot
    /// be represented in JSON at all yield an empty view rather than panicking.
    pub fn from_input<T: Serialize>(input: &T) -> Self {
        match serde_json::to_value(input) {
            Ok(serde_json::Value::Object(map)) => {
                ParamView(map.into_iter().map(|(k, v)| (k, Value::from_json(v))).collect())
            }
            Ok(other) => {
                let mut map = HashMap::new();
                map.insert("Params".to_string(), Value::from_json(other));
                ParamView(map)
            }
            Err(_) => ParamView::default(),
        }
    }
}

/// The string-keyed mapping populated by rule actions during evaluation (§3 "Result container").
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ResultMap(pub HashMap<String, Value>);

impl ResultMap {
    pub fn new() -> Self {
        ResultMap(HashMap::new())
    }

    pub fn set(&mut self, field: &str, value: Value) {
        self.0.insert(field.to_string(), value);
    }

    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// A persistent rule record owned by the store (§3 "Rule record").
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Rule {
    pub id: String,
    pub business_code: String,
    pub name: String,
    /// Rule source text in the canonical internal DSL.
    pub source: String,
    pub version: i64,
    pub enabled: bool,
    pub created_at: i64,
    pub updated_at: i64,
    pub description: Option<String>,
    pub author: Option<String>,
}

/// The ordered sequence of enabled rules for a business code, sorted by version descending
/// (§3 "Rule set").
#[derive(Debug, Clone, Default)]
pub struct RuleSet {
    pub rules: Vec<Rule>,
}

impl RuleSet {
    pub fn from_enabled(mut rules: Vec<Rule>) -> Self {
        rules.retain(|r| r.enabled);
        rules.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.id.cmp(&b.id)));
        RuleSet { rules }
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Concatenated canonical source of every rule in the set, in fingerprint order, joined
    /// with blank lines. This is what gets handed to `Evaluator::compile`.
    pub fn canonical_source(&self) -> String {
        self.rules
            .iter()
            .map(|r| r.source.as_str())
            .collect::<Vec<_>>()
            .join("\n\n")
    }
}

/// A deterministic digest over `(id, version, source)` tuples in canonical order (§3, §4.4,
/// §6 "Fingerprint canonicalisation").
///
/// Two rule sets with byte-identical canonicalised tuples always produce the same fingerprint,
/// across processes and across runs. The hash has no dependence on memory addresses, hashmap
/// iteration order, or process-local state: `blake3` is a pure function of its input bytes.
pub fn fingerprint(rules: &[Rule]) -> String {
    let mut ordered: Vec<&Rule> = rules.iter().collect();
    ordered.sort_by(|a, b| b.version.cmp(&a.version).then_with(|| a.id.cmp(&b.id)));

    let mut hasher = blake3::Hasher::new();
    for rule in ordered {
        hasher.update(rule.id.as_bytes());
        hasher.update(b"\x1f");
        hasher.update(&rule.version.to_be_bytes());
        hasher.update(b"\x1f");
        hasher.update(rule.source.as_bytes());
        hasher.update(b"\x1e");
    }
    hasher.finalize().to_hex().to_string()
}

/// Fingerprint over a single already-lowered source string, used by the dynamic engine
/// (§4.7 "Caching") where there is no backing rule record at all.
pub fn fingerprint_source(source: &str) -> String {
    blake3::hash(source.as_bytes()).to_hex().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rule(id: &str, version: i64, source: &str) -> Rule {
        Rule {
            id: id.to_string(),
            business_code: "BIZ".to_string(),
            name: "n".to_string(),
            source: source.to_string(),
            version,
            enabled: true,
            created_at: 0,
            updated_at: 0,
            description: None,
            author: None,
        }
    }

    #[test]
    fn fingerprint_is_deterministic_and_order_independent() {
        let a = vec![rule("r1", 1, "S1"), rule("r2", 2, "S2")];
        let mut b = a.clone();
        b.reverse();
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn fingerprint_changes_with_content() {
        let a = vec![rule("r1", 1, "S1")];
        let b = vec![rule("r1", 1, "S1-changed")];
        assert_ne!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn rule_set_sorts_by_version_descending_and_drops_disabled() {
        let mut r2 = rule("a", 2, "S2");
        let mut r1 = rule("a", 1, "S1");
        r1.enabled = false;
        let r3 = rule("b", 2, "S3");
        r2.enabled = true;
        let set = RuleSet::from_enabled(vec![r1, r2.clone(), r3.clone()]);
        assert_eq!(set.rules.len(), 2);
        assert_eq!(set.rules[0].version, 2);
    }
}
