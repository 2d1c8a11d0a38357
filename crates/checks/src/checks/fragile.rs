use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use promlint_promql::{AggregateOp, Cardinality, Expr, GroupingMode, ValueType};
use promlint_provenance::OperationDetail;

use crate::checker::RuleChecker;
use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, DiagnosticTarget, Problem, Severity};

pub const FRAGILE_CHECK_NAME: &str = "promql/fragile";

const SAMPLING_DETAILS: &str = "Alerts are identified by labels, two alerts with identical sets of labels are identical.
If two alerts have the same name but the rest of labels isn't 100% identical then they are two different alerts.
If the same alert query returns results that over time have different labels on them then previous alert instances will resolve and new alerts will be fired.
This can happen when using one of the aggregation operation like topk or bottomk as they can return a different time series each time they are evaluated.";

const WITHOUT_DETAILS: &str = "Both sides of a one-to-one binary operation must have identical sets of labels to produce any results. Adding or removing labels to metrics used here can easily break the query, consider aggregating using `by(...)` to ensure consistent labels.";

/// Reports queries whose results can change shape for reasons unrelated
/// to the data being alerted on.
#[derive(Debug, Clone, Copy, Default)]
pub struct FragileCheck;

impl FragileCheck {
    pub fn new() -> Self {
        Self
    }

    fn sampling(entry: &ParsedRule, problems: &mut Vec<Problem>) {
        let Some(root) = entry.provenance() else {
            return;
        };
        let mut seen = HashSet::new();
        for branch in root.branches().filter(|b| b.branch_dead().is_none()) {
            if branch.possible_labels().is_some_and(|labels| labels.is_empty()) {
                continue;
            }
            let Some(op) = branch.operations().iter().find(|op| {
                matches!(
                    op.detail,
                    OperationDetail::Aggregation {
                        op: AggregateOp::Topk
                            | AggregateOp::Bottomk
                            | AggregateOp::Limitk
                            | AggregateOp::LimitRatio,
                        ..
                    }
                )
            }) else {
                continue;
            };
            if !seen.insert(op.position) {
                continue;
            }
            problems.push(
                Problem::new(
                    FRAGILE_CHECK_NAME,
                    "fragile query",
                    Severity::Warning,
                    entry.query_lines(op.position),
                )
                .with_details(SAMPLING_DETAILS)
                .with_diagnostic(Diagnostic::issue(
                    DiagnosticTarget::Query,
                    op.position,
                    format!(
                        "Using `{}` to select time series might return different set of time series on every query, which would cause flapping alerts.",
                        op.label
                    ),
                )),
            );
        }
    }

    fn without_in_join(entry: &ParsedRule, expr: &Expr, problems: &mut Vec<Problem>) {
        if let Expr::Binary(bin) = expr
            && !bin.op.is_set()
            && bin.cardinality() == Cardinality::OneToOne
            && bin.lhs.value_type() == ValueType::Vector
            && bin.rhs.value_type() == ValueType::Vector
        {
            for side in [&bin.lhs, &bin.rhs] {
                if let Expr::Aggregate(agg) = side.unwrap_parens()
                    && let Some(grouping) = &agg.grouping
                    && grouping.mode == GroupingMode::Without
                {
                    problems.push(
                        Problem::new(
                            FRAGILE_CHECK_NAME,
                            "fragile query",
                            Severity::Warning,
                            entry.query_lines(agg.pos),
                        )
                        .with_details(WITHOUT_DETAILS)
                        .with_diagnostic(Diagnostic::issue(
                            DiagnosticTarget::Query,
                            grouping.pos,
                            "Aggregation using `without()` can be fragile when used inside binary expression.",
                        )),
                    );
                }
            }
        }
        for child in expr.children() {
            Self::without_in_join(entry, child, problems);
        }
    }
}

#[async_trait]
impl RuleChecker for FragileCheck {
    fn name(&self) -> &'static str {
        FRAGILE_CHECK_NAME
    }

    async fn check(&self, entry: &ParsedRule, _siblings: &[Arc<ParsedRule>]) -> Vec<Problem> {
        let Some(expr) = entry.expr() else {
            return Vec::new();
        };
        let mut problems = Vec::new();
        if entry.rule.is_alerting() {
            Self::sampling(entry, &mut problems);
        }
        Self::without_in_join(entry, expr, &mut problems);
        problems
    }
}
