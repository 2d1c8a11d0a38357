use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use promlint_promql::{AggregateOp, PosRange};
use promlint_provenance::{OperationDetail, ProvenanceNode};

use crate::checker::RuleChecker;
use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, DiagnosticTarget, Problem, Severity};
use crate::template::{LABELS, Template, VALUE};

pub const TEMPLATE_CHECK_NAME: &str = "alerts/template";

const SYNTAX_DETAILS: &str = "Supported template syntax is documented [here](https://prometheus.io/docs/prometheus/latest/configuration/alerting_rules/#templating).";
const REFERENCE_DETAILS: &str = "[Click here](https://prometheus.io/docs/prometheus/latest/configuration/template_reference/) for a full list of all available template functions.";

const HUMANIZE_FUNCTIONS: &[&str] = &[
    "humanize",
    "humanize1024",
    "humanizePercentage",
    "humanizeDuration",
    "printf",
];

/// Validates label and annotation templates of alerting rules against the
/// labels the query can return.
#[derive(Debug, Clone, Copy, Default)]
pub struct TemplateCheck;

impl TemplateCheck {
    pub fn new() -> Self {
        Self
    }

    fn check_template(
        entry: &ParsedRule,
        root: &ProvenanceNode,
        target: &DiagnosticTarget,
        text: &str,
    ) -> Vec<Problem> {
        let lines = entry.rule.lines;
        let template = match Template::parse(text) {
            Ok(template) => template,
            Err(err) => {
                let span = PosRange::new(err.offset().min(text.len()), text.len());
                return vec![
                    Problem::new(TEMPLATE_CHECK_NAME, "template syntax error", Severity::Fatal, lines)
                        .with_details(SYNTAX_DETAILS)
                        .with_diagnostic(Diagnostic::issue(
                            target.clone(),
                            span,
                            format!("Template failed to parse with this error: `{err}`."),
                        )),
                ];
            }
        };

        let mut problems = Vec::new();
        if matches!(target, DiagnosticTarget::Label(_))
            && let Some(reference) = template.references_to(VALUE).into_iter().next()
        {
            problems.push(
                Problem::new(TEMPLATE_CHECK_NAME, "value used in labels", Severity::Bug, lines)
                    .with_diagnostic(Diagnostic::issue(
                        target.clone(),
                        reference.span,
                        format!(
                            "Using `{}` in labels will generate a new alert on every value change, move it to annotations.",
                            reference.path[0]
                        ),
                    )),
            );
        }

        let mut done = HashSet::new();
        for (name, span) in template.fields_of(LABELS) {
            if !done.insert(name) || entry.group_labels.contains_key(name) {
                continue;
            }
            let Some((_, why)) = root.branch_without_label(name) else {
                continue;
            };
            problems.push(
                Problem::new(
                    TEMPLATE_CHECK_NAME,
                    "template uses non-existent label",
                    Severity::Bug,
                    lines,
                )
                .with_diagnostic(Diagnostic::issue(
                    target.clone(),
                    span,
                    format!("Template is using `{name}` label but the query results won't have this label."),
                ))
                .with_diagnostic(Diagnostic::context(
                    DiagnosticTarget::Query,
                    why.fragment,
                    why.reason.clone(),
                )),
            );
        }

        if matches!(target, DiagnosticTarget::Annotation(_)) {
            problems.extend(Self::check_humanize(entry, root, target, &template));
        }
        problems
    }

    fn check_humanize(
        entry: &ParsedRule,
        root: &ProvenanceNode,
        target: &DiagnosticTarget,
        template: &Template,
    ) -> Option<Problem> {
        let values = template.references_to(VALUE);
        if values.is_empty() || template.calls_with(VALUE, HUMANIZE_FUNCTIONS) {
            return None;
        }
        let (name, position) = root
            .branches()
            .filter(|b| b.branch_dead().is_none())
            .find_map(rate_result)?;

        let mut problem = Problem::new(
            TEMPLATE_CHECK_NAME,
            "use humanize filters for the results",
            Severity::Information,
            entry.rule.lines,
        )
        .with_details(REFERENCE_DETAILS)
        .with_diagnostic(Diagnostic::context(
            DiagnosticTarget::Query,
            position,
            format!("`{name}()` will produce results that are hard to read for humans."),
        ));
        for value in values {
            problem = problem.with_diagnostic(Diagnostic::issue(
                target.clone(),
                value.span,
                "Use one of humanize template functions to make the result more readable.",
            ));
        }
        Some(problem)
    }
}

/// The `rate()` style call producing the values of `branch`, unless an
/// outer counting aggregation replaces them.
fn rate_result(branch: &ProvenanceNode) -> Option<(&str, PosRange)> {
    let ops = branch.operations();
    if let Some(OperationDetail::Aggregation {
        op: AggregateOp::Count | AggregateOp::CountValues | AggregateOp::Group,
        ..
    }) = ops.last().map(|op| &op.detail)
    {
        return None;
    }
    let call = ops.iter().rev().find(|op| matches!(op.detail, OperationDetail::Call { .. }))?;
    let name = call.function_name()?;
    matches!(name, "rate" | "irate" | "deriv").then_some((name, call.position))
}

#[async_trait]
impl RuleChecker for TemplateCheck {
    fn name(&self) -> &'static str {
        TEMPLATE_CHECK_NAME
    }

    async fn check(&self, entry: &ParsedRule, _siblings: &[Arc<ParsedRule>]) -> Vec<Problem> {
        if !entry.rule.is_alerting() {
            return Vec::new();
        }
        let Some(root) = entry.provenance() else {
            return Vec::new();
        };
        entry
            .templates()
            .flat_map(|(target, text)| Self::check_template(entry, root, &target, text))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alert_with, entries, record, run};

    async fn annotation(expr: &str, text: &str) -> Vec<Problem> {
        run(&TemplateCheck::new(), &alert_with(expr, &[], &[("summary", text)])).await
    }

    #[tokio::test]
    async fn label_present() {
        assert!(annotation("up == 0", "{{ $labels.job }} is down").await.is_empty());
        assert!(annotation("sum(up) by(job) == 0", "{{ $labels.job }}").await.is_empty());
    }

    #[tokio::test]
    async fn label_removed_by_aggregation() {
        let entry = alert_with("sum(up) by(instance) == 0", &[], &[("summary", "{{ $labels.job }} is down")]);
        let problems = run(&TemplateCheck::new(), &entry).await;
        assert_eq!(problems.len(), 1);
        let problem = &problems[0];
        assert_eq!(problem.severity, Severity::Bug);
        assert_eq!(problem.summary, "template uses non-existent label");
        assert_eq!(problem.diagnostics[0].target, DiagnosticTarget::Annotation("summary".into()));
        assert_eq!(problem.diagnostics[0].span, PosRange::new(3, 14));
        let context = &problem.diagnostics[1];
        assert_eq!(&entry.source()[context.span.start..context.span.end], "by(instance)");
    }

    #[tokio::test]
    async fn every_alternative_must_have_label() {
        let problems = annotation("(up or vector(0)) == 0", "{{ $labels.job }}").await;
        assert_eq!(problems.len(), 1);
        assert!(problems[0].diagnostics[0].message.contains("`job`"));
    }

    #[tokio::test]
    async fn dead_alternative_is_skipped() {
        let problems = annotation(r#"sum(up) by(job) or sum(up{job="a", job="b"})"#, "{{ $labels.job }}").await;
        assert!(problems.is_empty(), "{problems:?}");
    }

    #[tokio::test]
    async fn absent_fallback_keeps_equality_labels() {
        let expr = r#"up{job="api"} == 0 or absent(up{job="api"})"#;
        assert!(annotation(expr, "{{ $labels.job }} is down").await.is_empty());
        let problems = annotation(expr, "{{ $labels.instance }} is down").await;
        assert_eq!(problems.len(), 1, "{problems:?}");
    }

    #[tokio::test]
    async fn group_labels_are_allowed() {
        let rules = entries(
            "groups:\n- name: g\n  labels:\n    team: infra\n  rules:\n  - alert: A\n    expr: sum(up) == 0\n    annotations:\n      summary: \"{{ $labels.team }}\"\n",
        );
        assert!(run(&TemplateCheck::new(), &rules[0]).await.is_empty());
    }

    #[tokio::test]
    async fn aliased_labels() {
        let problems = annotation("count(up) > 0", "{{ $l := $labels }}{{ $l.instance }}").await;
        assert_eq!(problems.len(), 1);
    }

    #[tokio::test]
    async fn value_in_labels() {
        let entry = alert_with("up == 0", &[("value", "{{ $value }}")], &[]);
        let problems = run(&TemplateCheck::new(), &entry).await;
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].summary, "value used in labels");
        assert!(problems[0].diagnostics[0].message.contains("`$value`"));
    }

    #[tokio::test]
    async fn syntax_error() {
        let problems = annotation("up == 0", "{{ $labels.job").await;
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].severity, Severity::Fatal);
        assert!(problems[0].diagnostics[0].message.contains("unclosed action"));
    }

    #[tokio::test]
    async fn humanize_suggested_for_rates() {
        let problems = annotation("rate(errors_total[5m]) > 1", "rate is {{ $value }}").await;
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].severity, Severity::Information);
        assert!(problems[0].diagnostics[0].message.contains("`rate()`"));

        assert!(annotation("rate(errors_total[5m]) > 1", "{{ $value | humanize }}").await.is_empty());
        assert!(annotation("count(rate(errors_total[5m]) > 1) > 0", "{{ $value }}").await.is_empty());
    }

    #[tokio::test]
    async fn recording_rules_are_skipped() {
        let entry = record("job:up:sum", "sum(up) by(job)");
        assert!(run(&TemplateCheck::new(), &entry).await.is_empty());
    }
}
