//! Helpers for check tests.

use std::sync::Arc;

use promlint_rules::parse_rules;

use crate::checker::RuleChecker;
use crate::entry::ParsedRule;
use crate::problem::Problem;

/// Parse a rule file and prepare every rule in it.
pub(crate) fn entries(yaml: &str) -> Vec<Arc<ParsedRule>> {
    let file = parse_rules("rules.yml", yaml).unwrap();
    file.groups
        .iter()
        .flat_map(|group| {
            group
                .rules
                .iter()
                .map(|rule| Arc::new(ParsedRule::new("rules.yml", group, rule.clone())))
        })
        .collect()
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

fn mapping(key: &str, items: &[(&str, &str)]) -> String {
    if items.is_empty() {
        return String::new();
    }
    let mut out = format!("    {key}:\n");
    for (k, v) in items {
        out.push_str(&format!("      {k}: {}\n", quoted(v)));
    }
    out
}

/// An alerting rule named `Test` with the given labels and annotations.
pub(crate) fn alert_with(
    expr: &str,
    labels: &[(&str, &str)],
    annotations: &[(&str, &str)],
) -> Arc<ParsedRule> {
    let yaml = format!(
        "groups:\n- name: test\n  rules:\n  - alert: Test\n    expr: {}\n{}{}",
        quoted(expr),
        mapping("labels", labels),
        mapping("annotations", annotations),
    );
    entries(&yaml).remove(0)
}

pub(crate) fn alert(expr: &str) -> Arc<ParsedRule> {
    alert_with(expr, &[], &[])
}

pub(crate) fn record(name: &str, expr: &str) -> Arc<ParsedRule> {
    let yaml = format!(
        "groups:\n- name: test\n  rules:\n  - record: {name}\n    expr: {}\n",
        quoted(expr)
    );
    entries(&yaml).remove(0)
}

pub(crate) async fn run(check: &dyn RuleChecker, entry: &Arc<ParsedRule>) -> Vec<Problem> {
    check.check(entry, std::slice::from_ref(entry)).await
}

pub(crate) async fn run_with(
    check: &dyn RuleChecker,
    entry: &Arc<ParsedRule>,
    siblings: &[Arc<ParsedRule>],
) -> Vec<Problem> {
    check.check(entry, siblings).await
}
