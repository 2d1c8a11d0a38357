//! Raw YAML layout of Prometheus rule files and its conversion into the
//! rule model.

use std::collections::BTreeMap;
use std::path::Path;

use chrono::Utc;
use serde::Deserialize;
use serde_yaml_ng::Value;
use tracing::debug;

use crate::comments::{Comment, Directive, InvalidComment, Snooze, read_content};
use crate::error::RulesError;
use crate::lines::{RuleSpan, rule_spans};
use crate::model::{LineRange, Rule, RuleFile, RuleGroup, RuleKind};

#[derive(Debug, Deserialize)]
struct RawFile {
    #[serde(default)]
    groups: Vec<RawGroup>,
}

#[derive(Debug, Deserialize)]
struct RawGroup {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    interval: Option<Value>,
    #[serde(default)]
    labels: BTreeMap<String, Value>,
    #[serde(default)]
    rules: Vec<RawRule>,
}

#[derive(Debug, Deserialize)]
struct RawRule {
    #[serde(default)]
    alert: Option<String>,
    #[serde(default)]
    record: Option<String>,
    #[serde(default)]
    expr: Option<Value>,
    #[serde(default, rename = "for")]
    for_duration: Option<Value>,
    #[serde(default)]
    keep_firing_for: Option<Value>,
    #[serde(default)]
    labels: BTreeMap<String, Value>,
    #[serde(default)]
    annotations: BTreeMap<String, Value>,
}

/// Parse the contents of a rule file.
///
/// Accepts either the standard `groups:` layout or a bare list of rules,
/// which is read as a single unnamed group. An empty document yields a
/// file without groups. Comment directives are applied first, see
/// [`crate::comments`].
pub fn parse_rules(path: impl AsRef<Path>, text: &str) -> Result<RuleFile, RulesError> {
    let path = path.as_ref();
    let shown = path.display().to_string();

    let content = read_content(text);
    if let Some(line) = content.ignored_at {
        debug!(path = %shown, line, "file excluded by ignore/file comment");
    }
    let file_disabled = file_disabled(&content.comments);
    let invalid_comments: Vec<InvalidComment> = content
        .comments
        .iter()
        .filter_map(|c| match &c.directive {
            Directive::Invalid(message) => Some(InvalidComment {
                line: c.line,
                message: message.clone(),
            }),
            _ => None,
        })
        .collect();
    let body = content.body.as_str();

    let document: Value = serde_yaml_ng::from_str(body).map_err(|e| RulesError::Yaml {
        path: shown.clone(),
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    })?;

    let (raw_groups, bare_list) = match document {
        Value::Null => (Vec::new(), false),
        Value::Sequence(_) => {
            let rules: Vec<RawRule> = from_value(&shown, document)?;
            let group = RawGroup {
                name: None,
                interval: None,
                labels: BTreeMap::new(),
                rules,
            };
            (vec![group], true)
        }
        Value::Mapping(_) => {
            let file: RawFile = from_value(&shown, document)?;
            (file.groups, false)
        }
        _ => {
            return Err(RulesError::Yaml {
                path: shown,
                line: Some(1),
                message: "expected a mapping with `groups` or a list of rules".into(),
            });
        }
    };

    let spans = rule_spans(body, bare_list);
    let body_lines: Vec<&str> = body.lines().collect();
    let rule_count: usize = raw_groups.iter().map(|g| g.rules.len()).sum();
    if spans.len() != rule_count {
        debug!(
            path = %shown,
            rules = rule_count,
            located = spans.len(),
            "could not locate every rule in the source text"
        );
    }

    let mut spans = spans.into_iter();
    let mut groups = Vec::with_capacity(raw_groups.len());
    for raw in raw_groups {
        let name = raw.name.unwrap_or_default();
        let mut rules = Vec::with_capacity(raw.rules.len());
        for rule in raw.rules {
            let span = spans.next();
            let mut rule = compile_rule(&shown, &name, rule, span)?;
            let (disabled, snoozed) = rule_directives(&content.comments, &body_lines, rule.lines);
            rule.disabled = file_disabled.iter().cloned().chain(disabled).collect();
            rule.snoozed = snoozed;
            rules.push(rule);
        }
        groups.push(RuleGroup {
            name,
            interval: raw.interval.as_ref().map(scalar_string),
            labels: string_map(raw.labels),
            rules,
        });
    }

    debug!(
        path = %shown,
        groups = groups.len(),
        rules = rule_count,
        "parsed rule file"
    );

    Ok(RuleFile {
        path: path.to_path_buf(),
        groups,
        ignored: content.ignored_at.is_some(),
        invalid_comments,
    })
}

/// Checks switched off for the whole file. Snoozes that already expired
/// are dropped.
fn file_disabled(comments: &[Comment]) -> Vec<String> {
    let now = Utc::now();
    let mut disabled: Vec<String> = Vec::new();
    for comment in comments {
        let name = match &comment.directive {
            Directive::FileDisable(name) => name,
            Directive::FileSnooze(snooze) if snooze.is_active(now) => &snooze.matcher,
            _ => continue,
        };
        if !disabled.contains(name) {
            disabled.push(name.clone());
        }
    }
    disabled
}

/// `disable` and `snooze` directives of the rule on `lines`: those inside
/// the rule and those in the block of comment lines directly above it.
fn rule_directives(
    comments: &[Comment],
    body_lines: &[&str],
    lines: LineRange,
) -> (Vec<String>, Vec<Snooze>) {
    let mut first = lines.first;
    while first > 1
        && body_lines
            .get(first - 2)
            .is_some_and(|line| line.trim_start().starts_with('#'))
    {
        first -= 1;
    }
    let mut disabled = Vec::new();
    let mut snoozed = Vec::new();
    for comment in comments
        .iter()
        .filter(|c| c.line >= first && c.line <= lines.last && c.directive.is_rule_directive())
    {
        match &comment.directive {
            Directive::Disable(name) => disabled.push(name.clone()),
            Directive::Snooze(snooze) => snoozed.push(snooze.clone()),
            _ => {}
        }
    }
    (disabled, snoozed)
}

fn from_value<T: serde::de::DeserializeOwned>(path: &str, value: Value) -> Result<T, RulesError> {
    serde_yaml_ng::from_value(value).map_err(|e| RulesError::Yaml {
        path: path.to_owned(),
        line: e.location().map(|l| l.line()),
        message: e.to_string(),
    })
}

/// Validate a raw rule and attach its source lines.
fn compile_rule(
    path: &str,
    group: &str,
    raw: RawRule,
    span: Option<RuleSpan>,
) -> Result<Rule, RulesError> {
    let lines = span.map_or(LineRange::single(1), |s| s.lines);
    let invalid = |message: &str| RulesError::InvalidRule {
        path: path.to_owned(),
        line: lines.first,
        message: message.to_owned(),
    };

    let (kind, name) = match (raw.alert, raw.record) {
        (Some(alert), None) => (RuleKind::Alerting, alert),
        (None, Some(record)) => (RuleKind::Recording, record),
        (Some(_), Some(_)) => {
            return Err(invalid("rule cannot have both `alert` and `record` keys"));
        }
        (None, None) => {
            return Err(invalid("rule must have either `alert` or `record` key"));
        }
    };

    let expr = match raw.expr.as_ref().map(scalar_string) {
        Some(expr) if !expr.trim().is_empty() => expr,
        _ => return Err(invalid("rule is missing the `expr` key")),
    };

    let (expr_lines, query_line) = span
        .and_then(|s| s.expr)
        .map_or((lines, lines.first), |e| (e.lines, e.query_line));

    Ok(Rule {
        kind,
        name,
        expr,
        for_duration: raw.for_duration.as_ref().map(scalar_string),
        keep_firing_for: raw.keep_firing_for.as_ref().map(scalar_string),
        labels: string_map(raw.labels),
        annotations: string_map(raw.annotations),
        lines,
        expr_lines,
        query_line,
        group: group.to_owned(),
        disabled: Vec::new(),
        snoozed: Vec::new(),
    })
}

/// Render a YAML scalar the way it reads in the file.
fn scalar_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        other => serde_yaml_ng::to_string(other)
            .map(|s| s.trim_end().to_owned())
            .unwrap_or_default(),
    }
}

fn string_map(raw: BTreeMap<String, Value>) -> BTreeMap<String, String> {
    raw.into_iter()
        .map(|(k, v)| (k, scalar_string(&v)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES: &str = r#"
groups:
  - name: example
    interval: 30s
    labels:
      team: infra
    rules:
      - alert: HighErrorRate
        expr: |
          sum by (job) (rate(errors_total[5m]))
            /
          sum by (job) (rate(requests_total[5m])) > 0.05
        for: 10m
        keep_firing_for: 5m
        labels:
          severity: page
          priority: 1
        annotations:
          summary: "{{ $labels.job }} is failing"

      - record: job:requests:rate5m
        expr: sum by (job) (rate(requests_total[5m]))
"#;

    #[test]
    fn parse_groups_layout() {
        let file = parse_rules("rules.yml", RULES).unwrap();
        assert_eq!(file.groups.len(), 1);
        let group = &file.groups[0];
        assert_eq!(group.name, "example");
        assert_eq!(group.interval.as_deref(), Some("30s"));
        assert_eq!(group.labels["team"], "infra");
        assert_eq!(group.rules.len(), 2);

        let alert = &group.rules[0];
        assert!(alert.is_alerting());
        assert_eq!(alert.name, "HighErrorRate");
        assert_eq!(alert.for_duration.as_deref(), Some("10m"));
        assert_eq!(alert.keep_firing_for.as_deref(), Some("5m"));
        assert_eq!(alert.labels["priority"], "1");
        assert_eq!(alert.annotations["summary"], "{{ $labels.job }} is failing");
        assert!(alert.expr.starts_with("sum by (job)"));
        assert_eq!(alert.group, "example");
        assert_eq!(alert.lines, LineRange::new(8, 19));
        assert_eq!(alert.expr_lines, LineRange::new(9, 12));

        let record = &group.rules[1];
        assert!(record.is_recording());
        assert_eq!(record.lines, LineRange::new(21, 22));
        assert_eq!(record.expr_lines, LineRange::single(22));
    }

    #[test]
    fn query_positions_map_to_file_lines() {
        let file = parse_rules("rules.yml", RULES).unwrap();
        let alert = &file.groups[0].rules[0];
        let rhs = alert.expr.find("sum by (job) (rate(requests").unwrap();
        assert_eq!(alert.query_lines(rhs, rhs + 5), LineRange::single(12));
        assert_eq!(alert.query_lines(0, 3), LineRange::single(10));
    }

    #[test]
    fn parse_bare_list() {
        let content = "- alert: A\n  expr: up == 0\n- record: b\n  expr: sum(up)\n";
        let file = parse_rules("list.yml", content).unwrap();
        assert_eq!(file.groups.len(), 1);
        assert_eq!(file.groups[0].name, "");
        let names: Vec<&str> = file.rules().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "b"]);
        assert_eq!(file.groups[0].rules[1].lines, LineRange::new(3, 4));
    }

    #[test]
    fn parse_empty_document() {
        let file = parse_rules("empty.yml", "").unwrap();
        assert!(file.groups.is_empty());
        let file = parse_rules("empty.yml", "# nothing here\n").unwrap();
        assert!(file.groups.is_empty());
    }

    #[test]
    fn invalid_yaml_reports_line() {
        let err = parse_rules("bad.yml", "groups:\n  - name: x\n   rules: [\n").unwrap_err();
        match err {
            RulesError::Yaml { line, .. } => assert!(line.is_some()),
            other => panic!("expected Yaml error, got {other:?}"),
        }
    }

    #[test]
    fn scalar_document_is_rejected() {
        let err = parse_rules("bad.yml", "just a string").unwrap_err();
        assert!(matches!(err, RulesError::Yaml { .. }), "{err}");
    }

    #[test]
    fn rule_with_both_names() {
        let content = "groups:\n- name: g\n  rules:\n  - alert: A\n    record: b\n    expr: up\n";
        let err = parse_rules("r.yml", content).unwrap_err();
        match err {
            RulesError::InvalidRule { line, message, .. } => {
                assert_eq!(line, 4);
                assert!(message.contains("both"), "{message}");
            }
            other => panic!("expected InvalidRule, got {other:?}"),
        }
    }

    #[test]
    fn rule_without_name() {
        let content = "groups:\n- name: g\n  rules:\n  - expr: up\n";
        let err = parse_rules("r.yml", content).unwrap_err();
        assert!(err.to_string().contains("either `alert` or `record`"), "{err}");
    }

    #[test]
    fn rule_without_expr() {
        let content = "groups:\n- name: g\n  rules:\n  - alert: A\n  - alert: B\n    for: 1m\n";
        let err = parse_rules("r.yml", content).unwrap_err();
        match err {
            RulesError::InvalidRule { line, message, .. } => {
                assert_eq!(line, 4);
                assert!(message.contains("`expr`"), "{message}");
            }
            other => panic!("expected InvalidRule, got {other:?}"),
        }
    }

    #[test]
    fn disable_comments_attach_to_their_rule() {
        let content = "\
# promlint file/disable promql/fragile
groups:
- name: g
  rules:
  # promlint disable promql/counter
  # promlint snooze 2099-01-01 rule/reuse
  - alert: A
    expr: up == 0
  - record: b # promlint disable promql/aggregate(job:true)
    expr: sum(up)
  # promlint file/snooze 2000-01-01 alerts/template
  - alert: C
    expr: up
";
        let file = parse_rules("r.yml", content).unwrap();
        assert!(file.invalid_comments.is_empty());
        let rules: Vec<&Rule> = file.rules().collect();
        assert_eq!(rules[0].disabled, vec!["promql/fragile", "promql/counter"]);
        assert_eq!(rules[0].snoozed.len(), 1);
        assert_eq!(rules[0].snoozed[0].matcher, "rule/reuse");
        assert!(rules[0].is_check_disabled(&["rule/reuse"], Utc::now()));
        assert_eq!(rules[1].disabled, vec!["promql/fragile", "promql/aggregate(job:true)"]);
        assert_eq!(rules[2].disabled, vec!["promql/fragile"]);
        assert!(rules[2].snoozed.is_empty());
    }

    #[test]
    fn ignored_lines_are_not_parsed() {
        let content = "\
groups:
- name: g
  rules:
  - alert: A
    expr: up == 0
  # promlint ignore/begin
  - alert: Broken
    expr: sum(
    bad: [
  # promlint ignore/end
  - alert: B
    expr: up == 1 # promlint ignore/line
    for: 5m
";
        let err = parse_rules("r.yml", content).unwrap_err();
        assert!(err.to_string().contains("`expr`"), "{err}");

        let content = content.replace(" # promlint ignore/line", "");
        let file = parse_rules("r.yml", &content).unwrap();
        let names: Vec<&str> = file.rules().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["A", "B"]);
        assert_eq!(file.groups[0].rules[1].lines, LineRange::new(11, 13));
    }

    #[test]
    fn ignored_file_has_no_rules() {
        let content = "# promlint ignore/file\ngroups:\n- name: g\n  rules: [\n";
        let file = parse_rules("r.yml", content).unwrap();
        assert!(file.ignored);
        assert!(file.groups.is_empty());
    }

    #[test]
    fn invalid_comments_are_collected() {
        let content = "- alert: A # promlint disable\n  expr: up\n";
        let file = parse_rules("r.yml", content).unwrap();
        assert_eq!(
            file.invalid_comments,
            vec![InvalidComment {
                line: 1,
                message: "missing disable value".into()
            }]
        );
        assert!(file.groups[0].rules[0].disabled.is_empty());
    }

    #[test]
    fn numeric_expr_is_kept_as_text() {
        let content = "groups:\n- name: g\n  rules:\n  - record: one\n    expr: 1\n";
        let file = parse_rules("r.yml", content).unwrap();
        assert_eq!(file.groups[0].rules[0].expr, "1");
    }
}
