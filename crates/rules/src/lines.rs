//! Source line tracking for rule files.
//!
//! The YAML deserializer does not report positions, so rule items are
//! located by scanning the raw text for `rules:` blocks and their list
//! items. Items are returned in document order, the same order in which
//! the deserializer yields rules.

use std::sync::LazyLock;

use regex::Regex;

use crate::model::LineRange;

static RULES_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*(?:-\s+)?rules\s*:\s*(?:#.*)?$").expect("rules key regex is valid")
});

static EXPR_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\s*(?:-\s+)?)expr\s*:(.*)$").expect("expr key regex is valid")
});

/// Lines occupied by one rule item.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RuleSpan {
    pub lines: LineRange,
    pub expr: Option<ExprSpan>,
}

/// Lines occupied by the `expr` key and its value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ExprSpan {
    pub lines: LineRange,
    /// First line holding query text.
    pub query_line: usize,
}

/// Locate every rule item in `content`. With `bare_list` the document is
/// treated as a top-level list of rules instead of a `groups:` mapping.
pub(crate) fn rule_spans(content: &str, bare_list: bool) -> Vec<RuleSpan> {
    let lines: Vec<&str> = content.lines().collect();
    let mut spans = Vec::new();
    if bare_list {
        collect_items(&lines, 0, &mut spans);
    } else {
        for (i, line) in lines.iter().enumerate() {
            if RULES_KEY.is_match(line) {
                collect_items(&lines, i + 1, &mut spans);
            }
        }
    }
    spans
}

// ---------------------------------------------------------------------------
// List items
// ---------------------------------------------------------------------------

fn collect_items(lines: &[&str], from: usize, spans: &mut Vec<RuleSpan>) {
    let Some(first) = (from..lines.len()).find(|&i| !is_filler(lines[i])) else {
        return;
    };
    let Some((dash, _)) = list_item(lines[first]) else {
        return;
    };

    let mut starts = Vec::new();
    let mut end = lines.len();
    for (i, line) in lines.iter().enumerate().skip(first) {
        if is_filler(line) {
            continue;
        }
        let depth = indent(line);
        if depth < dash || (depth == dash && list_item(line).is_none()) {
            end = i;
            break;
        }
        if depth == dash {
            starts.push(i);
        }
    }

    for (n, &start) in starts.iter().enumerate() {
        let stop = starts.get(n + 1).copied().unwrap_or(end);
        let last = (start..stop)
            .rev()
            .find(|&i| !is_filler(lines[i]))
            .unwrap_or(start);
        let column = list_item(lines[start]).map_or(dash + 2, |(_, content)| content);
        spans.push(RuleSpan {
            lines: LineRange::new(start + 1, last + 1),
            expr: expr_span(lines, start, last, column),
        });
    }
}

/// Column of the dash and of the item content, if `line` starts a list
/// item.
fn list_item(line: &str) -> Option<(usize, usize)> {
    let dash = indent(line);
    let rest = line[dash..].strip_prefix('-')?;
    if !rest.is_empty() && !rest.starts_with(' ') {
        return None;
    }
    let spaces = rest.len() - rest.trim_start_matches(' ').len();
    Some((dash, dash + 1 + spaces))
}

// ---------------------------------------------------------------------------
// Expression value
// ---------------------------------------------------------------------------

fn expr_span(lines: &[&str], start: usize, last: usize, column: usize) -> Option<ExprSpan> {
    for (i, line) in lines.iter().enumerate().take(last + 1).skip(start) {
        let Some(caps) = EXPR_KEY.captures(line) else {
            continue;
        };
        if caps[1].len() != column {
            continue;
        }
        let value = caps[2].trim();

        let mut end = i;
        for (j, line) in lines.iter().enumerate().take(last + 1).skip(i + 1) {
            if line.trim().is_empty() {
                continue;
            }
            if indent(line) <= column {
                break;
            }
            end = j;
        }

        let on_next_lines = value.is_empty()
            || value.starts_with('|')
            || value.starts_with('>')
            || value.starts_with('#');
        let query_line = if on_next_lines {
            (i + 1..=end)
                .find(|&j| !lines[j].trim().is_empty())
                .unwrap_or(i)
        } else {
            i
        };
        return Some(ExprSpan {
            lines: LineRange::new(i + 1, end + 1),
            query_line: query_line + 1,
        });
    }
    None
}

fn indent(line: &str) -> usize {
    line.len() - line.trim_start_matches(' ').len()
}

fn is_filler(line: &str) -> bool {
    let trimmed = line.trim();
    trimmed.is_empty() || trimmed.starts_with('#')
}

#[cfg(test)]
mod tests {
    use super::*;

    const GROUPS: &str = "\
groups:
- name: first
  rules:
  - alert: Down
    expr: up == 0
    for: 5m

  # comment between rules
  - record: job:up:sum
    expr: |
      sum by (job) (
        up
      )
- name: second
  interval: 1m
  rules:
    - alert: Other
      labels:
        severity: page
      expr:
        foo > 1
";

    #[test]
    fn finds_rules_in_groups() {
        let spans = rule_spans(GROUPS, false);
        assert_eq!(spans.len(), 3);
        assert_eq!(spans[0].lines, LineRange::new(4, 6));
        assert_eq!(spans[1].lines, LineRange::new(9, 13));
        assert_eq!(spans[2].lines, LineRange::new(17, 21));
    }

    #[test]
    fn expression_lines() {
        let spans = rule_spans(GROUPS, false);
        let expr = spans[0].expr.unwrap();
        assert_eq!(expr.lines, LineRange::single(5));
        assert_eq!(expr.query_line, 5);

        let expr = spans[1].expr.unwrap();
        assert_eq!(expr.lines, LineRange::new(10, 13));
        assert_eq!(expr.query_line, 11);

        let expr = spans[2].expr.unwrap();
        assert_eq!(expr.lines, LineRange::new(20, 21));
        assert_eq!(expr.query_line, 21);
    }

    #[test]
    fn bare_list_of_rules() {
        let content = "- alert: A\n  expr: up == 0\n- record: b\n  expr: sum(up)\n";
        let spans = rule_spans(content, true);
        assert_eq!(spans.len(), 2);
        assert_eq!(spans[0].lines, LineRange::new(1, 2));
        assert_eq!(spans[1].lines, LineRange::new(3, 4));
        assert_eq!(spans[1].expr.unwrap().query_line, 4);
    }

    #[test]
    fn rule_without_expr() {
        let content = "groups:\n- name: g\n  rules:\n  - alert: A\n    for: 1m\n";
        let spans = rule_spans(content, false);
        assert_eq!(spans.len(), 1);
        assert!(spans[0].expr.is_none());
    }

    #[test]
    fn nested_expr_keys_are_ignored() {
        let content = "\
groups:
- name: g
  rules:
  - alert: A
    annotations:
      expr: not the query
    expr: up
";
        let spans = rule_spans(content, false);
        assert_eq!(spans[0].expr.unwrap().lines, LineRange::single(7));
    }

    #[test]
    fn list_item_columns() {
        assert_eq!(list_item("  - alert: x"), Some((2, 4)));
        assert_eq!(list_item("-   alert: x"), Some((0, 4)));
        assert_eq!(list_item("  -foo"), None);
        assert_eq!(list_item("  foo: -1"), None);
    }
}
