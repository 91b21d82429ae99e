//! SQL-flavoured rewrites (§4.2): keyword substitution, `BETWEEN`, and `Contains` restructuring.

use once_cell::sync::Lazy;
use regex::Regex;

static IS_NOT_NULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bIS\s+NOT\s+NULL\b").unwrap());
static IS_NULL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bIS\s+NULL\b").unwrap());
static AND_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bAND\b").unwrap());
static OR_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bOR\b").unwrap());
static NOT_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bNOT\b").unwrap());
static IN_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bIN\b").unwrap());
static LIKE_KW: Lazy<Regex> = Lazy::new(|| Regex::new(r"(?i)\bLIKE\b").unwrap());

static BETWEEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(\S+)\s+BETWEEN\s+(-?\d+(?:\.\d+)?)\s+&&\s+(-?\d+(?:\.\d+)?)").unwrap()
});
static CONTAINS_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\S+)\s+Contains\s+(\([^)]*\))").unwrap());
static MATCHES_CALL: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\S+)\s+Matches\s+(\S+)").unwrap());

/// Applies the ordered SQL-dialect rewrites from §4.2 and returns the internal expression text.
pub fn normalise(expr: &str) -> String {
    let mut s = expr.to_string();

    // 1. Keyword substitutions (IS NOT NULL before IS NULL so the longer form matches first).
    s = IS_NOT_NULL.replace_all(&s, "!= null").into_owned();
    s = IS_NULL.replace_all(&s, "== null").into_owned();
    s = AND_KW.replace_all(&s, "&&").into_owned();
    s = OR_KW.replace_all(&s, "||").into_owned();
    s = NOT_KW.replace_all(&s, "!").into_owned();
    s = IN_KW.replace_all(&s, "Contains").into_owned();
    s = LIKE_KW.replace_all(&s, "Matches").into_owned();

    // 2. `field BETWEEN a && b` (AND already rewritten to && above) -> `field >= a && field <= b`.
    s = BETWEEN
        .replace_all(&s, |caps: &regex::Captures| {
            format!("{0} >= {1} && {0} <= {2}", &caps[1], &caps[2], &caps[3])
        })
        .into_owned();

    // 3. `field Contains (v1, v2, ...)` -> `Contains([v1, v2, ...], field)`.
    s = CONTAINS_CALL
        .replace_all(&s, |caps: &regex::Captures| {
            let field = &caps[1];
            let list = caps[2].trim_start_matches('(').trim_end_matches(')');
            format!("Contains([{list}], {field})")
        })
        .into_owned();

    // `field Matches pattern` -> `Matches(field, pattern)`.
    s = MATCHES_CALL
        .replace_all(&s, |caps: &regex::Captures| format!("Matches({}, {})", &caps[1], &caps[2]))
        .into_owned();

    s.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rewrites_and_or_not() {
        assert_eq!(normalise("Age > 18 AND Active"), "Age > 18 && Active");
        assert_eq!(normalise("a OR NOT b"), "a || !b");
    }

    #[test]
    fn rewrites_between() {
        assert_eq!(normalise("Age BETWEEN 18 AND 65"), "Age >= 18 && Age <= 65");
    }

    #[test]
    fn rewrites_in_to_contains_call() {
        assert_eq!(normalise("Region IN (\"US\", \"CA\")"), "Contains([\"US\", \"CA\"], Region)");
    }

    #[test]
    fn rewrites_like_to_matches_call() {
        assert_eq!(normalise("Name LIKE \"A%\""), "Matches(Name, \"A%\")");
    }

    #[test]
    fn rewrites_is_null() {
        assert_eq!(normalise("Email IS NULL"), "Email == null");
        assert_eq!(normalise("Email IS NOT NULL"), "Email != null");
    }
}
