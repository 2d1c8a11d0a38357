//! Patterns that prove an expression can never return anything.

use promlint_promql::{BinaryExpr, Expr, MatchOp, VectorSelector, format_number, METRIC_NAME};

/// Reason a selector can never match, if two of its matchers contradict
/// each other.
pub(crate) fn conflicting_matchers(vs: &VectorSelector) -> Option<String> {
    let mut pinned: Vec<(&str, &str)> = Vec::new();
    if let Some(name) = &vs.name {
        pinned.push((METRIC_NAME, name));
    }
    pinned.extend(
        vs.matchers
            .iter()
            .filter(|m| m.op == MatchOp::Equal)
            .map(|m| (m.name.as_str(), m.value.as_str())),
    );

    for (i, &(name, value)) in pinned.iter().enumerate() {
        if let Some(&(_, other)) = pinned[i + 1..]
            .iter()
            .find(|&&(n, v)| n == name && v != value)
        {
            return Some(format!(
                "This selector requires `{name}` to be both `{value}` and `{other}`, so it can never match anything."
            ));
        }
        if let Some(matcher) = vs
            .matchers
            .iter()
            .find(|m| m.name == name && m.op != MatchOp::Equal && !m.matches(value))
        {
            return Some(format!(
                "This selector requires `{name}` to be `{value}` but also uses `{matcher}` which rejects that value, so it can never match anything."
            ));
        }
    }
    None
}

/// Returns true when every series `rhs` can return is also returned by
/// `lhs`, which makes `lhs unless rhs` empty.
pub(crate) fn unless_covers(lhs: &Expr, rhs: &Expr) -> bool {
    match (lhs.unwrap_parens(), rhs.unwrap_parens()) {
        (Expr::VectorSelector(l), Expr::VectorSelector(r)) => {
            l.name == r.name
                && l.offset == r.offset
                && l.at == r.at
                && r.matchers.iter().all(|m| l.matchers.contains(m))
        }
        (l, r) => l.to_string() == r.to_string(),
    }
}

/// Reason a comparison between two known constants never holds.
pub(crate) fn impossible_comparison(bin: &BinaryExpr, lhs: f64, rhs: f64) -> String {
    let op = if bin.return_bool {
        format!("{} bool", bin.op.symbol())
    } else {
        bin.op.symbol().to_owned()
    };
    format!(
        "`{} {op} {}` always evaluates to `{} {op} {}` which is not possible, so it will never return anything.",
        bin.lhs,
        bin.rhs,
        format_number(lhs),
        format_number(rhs),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use promlint_promql::parse;

    fn selector(query: &str) -> VectorSelector {
        match parse(query).unwrap() {
            Expr::VectorSelector(vs) => vs,
            other => panic!("expected selector, got {other:?}"),
        }
    }

    #[test]
    fn two_values_for_one_label() {
        let reason = conflicting_matchers(&selector(r#"foo{job="a", job="b"}"#)).unwrap();
        assert!(reason.contains("`job` to be both `a` and `b`"), "{reason}");
    }

    #[test]
    fn equal_and_not_equal_same_value() {
        let reason = conflicting_matchers(&selector(r#"foo{job="a", job!="a"}"#)).unwrap();
        assert!(reason.contains(r#"job!="a""#), "{reason}");
    }

    #[test]
    fn equal_and_rejecting_regex() {
        assert!(conflicting_matchers(&selector(r#"foo{job="a", job=~"b.*"}"#)).is_some());
        assert!(conflicting_matchers(&selector(r#"foo{job="a", job=~"a|b"}"#)).is_none());
    }

    #[test]
    fn compatible_matchers() {
        assert!(conflicting_matchers(&selector(r#"foo{job="a", job="a"}"#)).is_none());
        assert!(conflicting_matchers(&selector(r#"foo{job="a", instance="b"}"#)).is_none());
        assert!(conflicting_matchers(&selector(r#"{__name__="foo", job!="b"}"#)).is_none());
    }

    #[test]
    fn unless_with_narrower_left_side() {
        let lhs = parse(r#"foo{job="a"}"#).unwrap();
        assert!(unless_covers(&lhs, &parse("foo").unwrap()));
        assert!(unless_covers(&lhs, &parse(r#"(foo{job="a"})"#).unwrap()));
        assert!(!unless_covers(&lhs, &parse(r#"foo{job="b"}"#).unwrap()));
        assert!(!unless_covers(&lhs, &parse("bar").unwrap()));
        assert!(!unless_covers(&parse("foo").unwrap(), &lhs));
    }

    #[test]
    fn unless_with_identical_expressions() {
        let lhs = parse("rate(foo[5m])").unwrap();
        assert!(unless_covers(&lhs, &parse("rate(foo[5m])").unwrap()));
        assert!(!unless_covers(&lhs, &parse("rate(foo[10m])").unwrap()));
    }
}
