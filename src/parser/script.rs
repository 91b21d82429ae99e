//! Script-flavoured rewrites (§4.2): strict-equality collapsing and array higher-order forms.

/// Applies the ordered script-dialect rewrites and returns the internal expression text.
pub fn normalise(expr: &str) -> String {
    let collapsed = expr.replace("===", "==").replace("!==", "!=");
    rewrite_higher_order(&collapsed).trim().to_string()
}

/// Rewrites `xs.filter(x => pred).length` to `Count(Filter(xs, "pred"))` and
/// `xs.map(x => expr)` to `Map(xs, "expr")`. Hand-rolled rather than regex-based because the
/// predicate/mapper body may itself contain parentheses that a regex cannot balance.
fn rewrite_higher_order(input: &str) -> String {
    let chars: Vec<char> = input.chars().collect();
    let mut out = String::new();
    let mut cursor = 0usize;

    loop {
        let remaining = &chars[cursor..];
        let filter_at = find_literal(remaining, ".filter(");
        let map_at = find_literal(remaining, ".map(");
        let (rel_dot, keyword_len, is_filter) = match (filter_at, map_at) {
            (Some(f), Some(m)) if f <= m => (f, ".filter(".len(), true),
            (Some(f), None) => (f, ".filter(".len(), true),
            (_, Some(m)) => (m, ".map(".len(), false),
            (None, None) => {
                out.extend(remaining.iter());
                break;
            }
        };

        let dot_idx = cursor + rel_dot;
        let open_paren = dot_idx + keyword_len - 1;
        let Some(close_paren) = find_matching_paren(&chars, open_paren) else {
            out.extend(chars[cursor..].iter());
            break;
        };

        let receiver_start = scan_receiver_start(&chars, dot_idx);
        let receiver: String = chars[receiver_start..dot_idx].iter().collect();
        let body: String = chars[open_paren + 1..close_paren].iter().collect();
        let Some(arrow) = body.find("=>") else {
            // Not an arrow-function argument; leave the call untouched.
            out.extend(chars[cursor..=close_paren].iter());
            cursor = close_paren + 1;
            continue;
        };
        let lambda_body = body[arrow + 2..].trim();
        let escaped = lambda_body.replace('"', "\\\"");

        let mut after = close_paren + 1;
        let replacement = if is_filter {
            if matches_literal_at(&chars, after, ".length") {
                after += ".length".len();
                format!("Count(Filter({receiver}, \"{escaped}\"))")
            } else {
                format!("Filter({receiver}, \"{escaped}\")")
            }
        } else {
            format!("Map({receiver}, \"{escaped}\")")
        };

        out.extend(chars[cursor..receiver_start].iter());
        out.push_str(&replacement);
        cursor = after;
    }

    out
}

fn find_literal(chars: &[char], needle: &str) -> Option<usize> {
    let needle: Vec<char> = needle.chars().collect();
    if needle.is_empty() || chars.len() < needle.len() {
        return None;
    }
    for start in 0..=(chars.len() - needle.len()) {
        if chars[start..start + needle.len()] == needle[..] {
            return Some(start);
        }
    }
    None
}

fn matches_literal_at(chars: &[char], at: usize, literal: &str) -> bool {
    let literal: Vec<char> = literal.chars().collect();
    if at + literal.len() > chars.len() {
        return false;
    }
    chars[at..at + literal.len()] == literal[..]
}

fn scan_receiver_start(chars: &[char], dot_idx: usize) -> usize {
    let mut i = dot_idx;
    let mut depth = 0i32;
    while i > 0 {
        let c = chars[i - 1];
        match c {
            ']' => {
                depth += 1;
                i -= 1;
            }
            '[' => {
                if depth == 0 {
                    break;
                }
                depth -= 1;
                i -= 1;
            }
            c if c.is_alphanumeric() || c == '_' || c == '"' || depth > 0 => {
                i -= 1;
            }
            _ => break,
        }
    }
    i
}

fn find_matching_paren(chars: &[char], open_idx: usize) -> Option<usize> {
    let mut depth = 1;
    let mut i = open_idx + 1;
    while i < chars.len() {
        match chars[i] {
            '(' => depth += 1,
            ')' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
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

    #[test]
    fn collapses_strict_equality() {
        assert_eq!(normalise("a === b && c !== d"), "a == b && c != d");
    }

    #[test]
    fn rewrites_filter_length_to_count() {
        assert_eq!(normalise("Items.filter(x => x.Price > 10).length"), "Count(Filter(Items, \"x.Price > 10\"))");
    }

    #[test]
    fn rewrites_map() {
        assert_eq!(normalise("Items.map(x => x.Price)"), "Map(Items, \"x.Price\")");
    }

    #[test]
    fn rewrites_indexed_receiver() {
        assert_eq!(
            normalise("Result[\"Xs\"].filter(x => x > 1).length"),
            "Count(Filter(Result[\"Xs\"], \"x > 1\"))"
        );
    }
}
