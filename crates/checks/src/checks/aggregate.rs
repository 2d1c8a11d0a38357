use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use promlint_promql::{GroupingMode, PosRange};
use promlint_provenance::{OperationDetail, ProvenanceNode, find_clause};
use regex::Regex;

use crate::checker::RuleChecker;
use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, DiagnosticTarget, Problem, Severity};

pub const AGGREGATE_CHECK_NAME: &str = "promql/aggregate";

/// Makes sure aggregations keep, or strip, a given label.
#[derive(Debug, Clone)]
pub struct AggregateCheck {
    name: Option<Regex>,
    label: String,
    keep: bool,
    severity: Severity,
}

impl AggregateCheck {
    /// `name` limits the check to rules whose name matches.
    pub fn new(name: Option<Regex>, label: impl Into<String>, keep: bool, severity: Severity) -> Self {
        Self {
            name,
            label: label.into(),
            keep,
            severity,
        }
    }

    fn target(&self) -> String {
        self.name
            .as_ref()
            .map_or_else(|| "all".to_owned(), |re| format!("`{}`", re.as_str()))
    }

    fn must_keep(&self, entry: &ParsedRule, branch: &ProvenanceNode) -> Option<Problem> {
        let why = branch.exclude_reason(&self.label)?;
        Some(
            Problem::new(
                AGGREGATE_CHECK_NAME,
                "required label is being removed via aggregation",
                self.severity,
                entry.query_lines(why.fragment),
            )
            .with_diagnostic(Diagnostic::context(
                DiagnosticTarget::Query,
                why.fragment,
                why.reason.clone(),
            ))
            .with_diagnostic(Diagnostic::issue(
                DiagnosticTarget::Query,
                why.fragment,
                format!(
                    "`{}` label is required and should be preserved when aggregating {} rules.",
                    self.label,
                    self.target()
                ),
            )),
        )
    }

    fn must_strip(&self, entry: &ParsedRule, branch: &ProvenanceNode) -> Option<Problem> {
        if !branch.can_have_label(&self.label) {
            return None;
        }
        let (position, grouping) = outermost_grouping(branch)?;
        let (fragment, hint) = match grouping {
            Some(GroupingMode::By) => (
                find_clause(entry.source(), position, "by"),
                "remove it from `by()`".to_owned(),
            ),
            Some(GroupingMode::Without) => (
                find_clause(entry.source(), position, "without"),
                format!("use `without({}, ...)`", self.label),
            ),
            None => (position, format!("use `without({}, ...)`", self.label)),
        };
        Some(
            Problem::new(
                AGGREGATE_CHECK_NAME,
                "label must be removed in aggregations",
                self.severity,
                entry.query_lines(fragment),
            )
            .with_diagnostic(Diagnostic::issue(
                DiagnosticTarget::Query,
                fragment,
                format!(
                    "`{}` label should be removed when aggregating {} rules, {hint}.",
                    self.label,
                    self.target()
                ),
            )),
        )
    }
}

/// Span and grouping of the last aggregation applied to `branch` that
/// rewrites labels.
fn outermost_grouping(branch: &ProvenanceNode) -> Option<(PosRange, Option<GroupingMode>)> {
    branch.operations().iter().rev().find_map(|op| match &op.detail {
        OperationDetail::Aggregation { op: agg, grouping, .. } if !agg.preserves_labels() => {
            Some((op.position, *grouping))
        }
        _ => None,
    })
}

#[async_trait]
impl RuleChecker for AggregateCheck {
    fn name(&self) -> &'static str {
        AGGREGATE_CHECK_NAME
    }

    fn describe(&self) -> String {
        format!("{AGGREGATE_CHECK_NAME}({}:{})", self.label, self.keep)
    }

    async fn check(&self, entry: &ParsedRule, _siblings: &[Arc<ParsedRule>]) -> Vec<Problem> {
        let Some(root) = entry.provenance() else {
            return Vec::new();
        };
        if self.name.as_ref().is_some_and(|re| !re.is_match(&entry.rule.name)) {
            return Vec::new();
        }
        if entry.rule.labels.contains_key(&self.label) {
            return Vec::new();
        }

        let mut seen = HashSet::new();
        let mut problems = Vec::new();
        for branch in root.branches().filter(|b| b.branch_dead().is_none()) {
            if outermost_grouping(branch).is_none() {
                continue;
            }
            let problem = if self.keep {
                self.must_keep(entry, branch)
            } else {
                self.must_strip(entry, branch)
            };
            if let Some(problem) = problem
                && seen.insert(problem.diagnostics.clone())
            {
                problems.push(problem);
            }
        }
        problems
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alert, entries, run};

    fn keep(label: &str) -> AggregateCheck {
        AggregateCheck::new(None, label, true, Severity::Warning)
    }

    fn strip(label: &str) -> AggregateCheck {
        AggregateCheck::new(None, label, false, Severity::Warning)
    }

    #[tokio::test]
    async fn label_kept_by_grouping() {
        let entry = alert("sum(foo) by(job) > 0");
        assert!(run(&keep("job"), &entry).await.is_empty());
        let entry = alert("sum(foo) without(instance) > 0");
        assert!(run(&keep("job"), &entry).await.is_empty());
    }

    #[tokio::test]
    async fn required_label_removed() {
        let entry = alert("sum(foo) by(instance) > 0");
        let problems = run(&keep("job"), &entry).await;
        assert_eq!(problems.len(), 1);
        let issue = &problems[0].diagnostics[1];
        assert_eq!(&entry.source()[issue.span.start..issue.span.end], "by(instance)");
        assert!(issue.message.contains("`job` label is required"), "{}", issue.message);
        assert!(problems[0].diagnostics[0].message.contains("`by(instance)`"));
    }

    #[tokio::test]
    async fn removal_is_anchored_at_inner_aggregation() {
        let source = "sum(sum(foo) by(instance)) by(job)";
        let entry = alert(source);
        let problems = run(&keep("job"), &entry).await;
        assert_eq!(problems.len(), 1);
        let span = problems[0].diagnostics[0].span;
        assert_eq!(&entry.source()[span.start..span.end], "by(instance)");
    }

    #[tokio::test]
    async fn without_removes_required_label() {
        let entry = alert("sum without(job) (foo)");
        let problems = run(&keep("job"), &entry).await;
        assert_eq!(problems.len(), 1);
        assert!(problems[0].diagnostics[0].message.contains("without(job)"));
    }

    #[tokio::test]
    async fn every_alternative_is_checked() {
        let entry = alert("sum(foo) by(job) or sum(bar) by(instance)");
        let problems = run(&keep("job"), &entry).await;
        assert_eq!(problems.len(), 1);
        let span = problems[0].diagnostics[0].span;
        assert_eq!(&entry.source()[span.start..span.end], "by(instance)");
    }

    #[tokio::test]
    async fn no_aggregation_is_ignored() {
        let entry = alert(r#"foo{job=""}"#);
        assert!(run(&keep("job"), &entry).await.is_empty());
    }

    #[tokio::test]
    async fn static_label_satisfies_requirement() {
        let entry = crate::testing::alert_with("sum(foo) > 0", &[("job", "static")], &[]);
        assert!(run(&keep("job"), &entry).await.is_empty());
    }

    #[tokio::test]
    async fn name_filter() {
        let check = AggregateCheck::new(
            Some(promlint_promql::anchored_regex("job:.*").unwrap()),
            "job",
            true,
            Severity::Bug,
        );
        let rules = entries(
            "groups:\n- name: g\n  rules:\n  - record: job:foo:sum\n    expr: sum(foo)\n  - record: instance:foo:sum\n    expr: sum(foo)\n",
        );
        let problems = run(&check, &rules[0]).await;
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].severity, Severity::Bug);
        assert!(problems[0].diagnostics[1].message.contains("job:.*"));
        assert!(run(&check, &rules[1]).await.is_empty());
    }

    #[tokio::test]
    async fn label_must_be_stripped() {
        let entry = alert("sum(foo) by(job, instance)");
        let problems = run(&strip("instance"), &entry).await;
        assert_eq!(problems.len(), 1);
        let issue = &problems[0].diagnostics[0];
        assert_eq!(&entry.source()[issue.span.start..issue.span.end], "by");
        assert!(issue.message.contains("remove it from `by()`"));

        let entry = alert("sum(foo) without (job)");
        let problems = run(&strip("instance"), &entry).await;
        assert_eq!(problems.len(), 1);
        let issue = &problems[0].diagnostics[0];
        assert_eq!(&entry.source()[issue.span.start..issue.span.end], "without");
        assert!(issue.message.contains("use `without(instance, ...)`"));
    }

    #[tokio::test]
    async fn stripped_label_is_fine() {
        assert!(run(&strip("instance"), &alert("sum(foo) by(job)")).await.is_empty());
        assert!(run(&strip("instance"), &alert("sum(foo) without(instance)")).await.is_empty());
        assert!(run(&strip("instance"), &alert("foo")).await.is_empty());
    }

    #[test]
    fn describe_includes_settings() {
        assert_eq!(keep("job").describe(), "promql/aggregate(job:true)");
    }
}
