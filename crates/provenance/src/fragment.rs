//! Mapping spans back to query text.

use promlint_promql::PosRange;
use regex::Regex;

use crate::node::ProvenanceNode;

/// Text covered by `position`, or an empty string when the span does not
/// fit `source`.
pub fn fragment_at(source: &str, position: PosRange) -> &str {
    source.get(position.start..position.end).unwrap_or_default()
}

/// Span of the keyword of a `keyword(` clause inside `within`, matched
/// case-insensitively and allowing whitespace before the parenthesis.
/// Falls back to `within` when the keyword is not found.
pub fn find_clause(source: &str, within: PosRange, keyword: &str) -> PosRange {
    let Ok(re) = Regex::new(&format!(r"(?i)\b({})\s*\(", regex::escape(keyword))) else {
        return within;
    };
    match re.captures(fragment_at(source, within)).and_then(|c| c.get(1)) {
        Some(found) => PosRange::new(within.start + found.start(), within.start + found.end()),
        None => within,
    }
}

impl ProvenanceNode {
    /// Query text this node was built from.
    pub fn fragment<'s>(&self, source: &'s str) -> &'s str {
        fragment_at(source, self.position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fragment_out_of_range_is_empty() {
        assert_eq!(fragment_at("foo", PosRange::new(0, 3)), "foo");
        assert_eq!(fragment_at("foo", PosRange::new(2, 10)), "");
    }

    #[test]
    fn finds_keyword_with_whitespace() {
        let source = "sum(foo) WITHOUT (job)";
        let found = find_clause(source, PosRange::new(0, source.len()), "without");
        assert_eq!(fragment_at(source, found), "WITHOUT");

        let source = "sum(foo) by\n  (job)";
        let found = find_clause(source, PosRange::new(0, source.len()), "by");
        assert_eq!(fragment_at(source, found), "by");
    }

    #[test]
    fn keyword_must_start_a_word() {
        let source = "absent(foo_absent(bar))";
        let found = find_clause(source, PosRange::new(0, source.len()), "absent");
        assert_eq!(found, PosRange::new(0, 6));

        let source = "foo_absent(bar)";
        let within = PosRange::new(0, source.len());
        assert_eq!(find_clause(source, within, "absent"), within);
    }
}
