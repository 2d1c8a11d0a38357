use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use promlint_backend::{MetricType, MetricsBackend};
use promlint_promql::{AggregateOp, PosRange};
use promlint_provenance::{Combinator, NodeKind, ProvenanceNode};
use tracing::debug;

use crate::checker::RuleChecker;
use crate::checks::backend_problem;
use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, DiagnosticTarget, Problem, Severity};

pub const COUNTER_CHECK_NAME: &str = "promql/counter";

const COUNTER_DETAILS: &str = "Counters track the number of events over time and so the value of a counter can only grow and never decrease.
This means that the absolute value of a counter doesn't matter, it will be a random number that depends on the number of events that happened since your application was started.
To use the value of a counter in PromQL you most likely want to calculate the rate of events using the `rate()` function, or any other function that is safe to use with counters.
Once you calculate the rate you can use that result in other functions or aggregations that are not counter safe, like `sum()`.";

/// Functions whose result does not depend on the absolute value of a
/// counter.
const COUNTER_SAFE_FUNCTIONS: &[&str] = &[
    "absent",
    "absent_over_time",
    "present_over_time",
    "changes",
    "resets",
    "count_over_time",
    "increase",
    "irate",
    "rate",
    "timestamp",
];

/// Reports counters whose raw value is used by a query.
pub struct CounterCheck {
    backend: Arc<dyn MetricsBackend>,
}

impl CounterCheck {
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self { backend }
    }
}

fn makes_safe(node: &ProvenanceNode) -> bool {
    match node.kind() {
        NodeKind::Function { name } => COUNTER_SAFE_FUNCTIONS.contains(&name.as_str()),
        NodeKind::Aggregation { op } => matches!(op, AggregateOp::Count | AggregateOp::Group),
        _ => false,
    }
}

/// Selectors read without any counter-safe wrapper, in query order.
fn unsafe_selectors<'a>(node: &'a ProvenanceNode, out: &mut Vec<(&'a str, PosRange)>) {
    if makes_safe(node) {
        return;
    }
    if let NodeKind::Selector { metric: Some(metric) } = node.kind() {
        out.push((metric.as_str(), node.position()));
    }
    for (child, role) in node.children_with_roles() {
        if role != Combinator::Unless {
            unsafe_selectors(child, out);
        }
    }
}

#[async_trait]
impl RuleChecker for CounterCheck {
    fn name(&self) -> &'static str {
        COUNTER_CHECK_NAME
    }

    fn describe(&self) -> String {
        format!("{COUNTER_CHECK_NAME}({})", self.backend.name())
    }

    fn is_online(&self) -> bool {
        true
    }

    async fn check(&self, entry: &ParsedRule, _siblings: &[Arc<ParsedRule>]) -> Vec<Problem> {
        let Some(root) = entry.provenance() else {
            return Vec::new();
        };
        if matches!(root.kind(), NodeKind::Selector { .. }) {
            return Vec::new();
        }

        let mut selectors = Vec::new();
        unsafe_selectors(root, &mut selectors);

        let mut done = HashSet::new();
        let mut problems = Vec::new();
        for (metric, position) in selectors {
            if !done.insert(metric) {
                continue;
            }
            let types = match self.backend.metric_types(metric).await {
                Ok(types) => types,
                Err(err) if err.is_unsupported() => {
                    debug!(backend = self.backend.name(), "metric metadata is not supported");
                    return problems;
                }
                Err(err) => {
                    problems.push(backend_problem(
                        COUNTER_CHECK_NAME,
                        self.backend.name(),
                        &err,
                        entry.rule.lines,
                    ));
                    continue;
                }
            };
            if types.is_empty() || types.iter().any(|t| *t != MetricType::Counter) {
                continue;
            }
            problems.push(
                Problem::new(
                    COUNTER_CHECK_NAME,
                    "direct counter read",
                    Severity::Warning,
                    entry.query_lines(position),
                )
                .with_details(COUNTER_DETAILS)
                .with_diagnostic(Diagnostic::issue(
                    DiagnosticTarget::Query,
                    position,
                    format!(
                        "`{metric}` is a counter according to metrics metadata from `{}`, it can be dangerous to use its value directly.",
                        self.backend.name()
                    ),
                )),
            );
        }
        problems
    }
}
