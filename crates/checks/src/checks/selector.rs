use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use promlint_promql::{METRIC_NAME, PosRange};
use promlint_provenance::{Operation, OperationDetail};
use regex::Regex;

use crate::checker::RuleChecker;
use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, DiagnosticTarget, Problem, Severity};

pub const SELECTOR_CHECK_NAME: &str = "promql/selector";

/// Requires selectors for some metrics to always filter on a label.
#[derive(Debug, Clone)]
pub struct SelectorCheck {
    key: Regex,
    call: Option<Regex>,
    label: String,
    comment: Option<String>,
    severity: Severity,
}

impl SelectorCheck {
    /// `key` selects metrics by name. With `call`, only selectors passed
    /// to a matching function are checked.
    pub fn new(
        key: Regex,
        call: Option<Regex>,
        label: impl Into<String>,
        comment: Option<String>,
        severity: Severity,
    ) -> Self {
        Self {
            key,
            call,
            label: label.into(),
            comment,
            severity,
        }
    }

    /// The selector step of `operations`, and the matching call when a
    /// call filter is set.
    fn find_selector<'a>(&self, operations: &'a [Operation]) -> Option<(&'a Operation, Option<&'a str>)> {
        let mut call = None;
        for op in operations.iter().rev() {
            if let Some(re) = &self.call
                && call.is_none()
                && let OperationDetail::Call { name, .. } = &op.detail
                && re.is_match(name)
            {
                call = Some(name.as_str());
                continue;
            }
            if matches!(op.detail, OperationDetail::Selector { .. })
                && (self.call.is_none() || call.is_some())
            {
                return Some((op, call));
            }
        }
        None
    }

    fn selects_metric(&self, op: &Operation) -> bool {
        let OperationDetail::Selector { metric, matchers, .. } = &op.detail else {
            return false;
        };
        if metric.as_ref().is_some_and(|name| !self.key.is_match(name)) {
            return false;
        }
        !matchers
            .iter()
            .any(|m| m.name == METRIC_NAME && !self.key.is_match(&m.value))
    }

    fn has_matcher(&self, op: &Operation) -> bool {
        match &op.detail {
            OperationDetail::Selector { matchers, .. } => {
                matchers.iter().any(|m| m.name == self.label)
            }
            _ => false,
        }
    }
}

#[async_trait]
impl RuleChecker for SelectorCheck {
    fn name(&self) -> &'static str {
        SELECTOR_CHECK_NAME
    }

    fn describe(&self) -> String {
        match &self.call {
            Some(call) => format!(
                "{SELECTOR_CHECK_NAME}({}:{}:{})",
                call.as_str(),
                self.key.as_str(),
                self.label
            ),
            None => format!("{SELECTOR_CHECK_NAME}({}:{})", self.key.as_str(), self.label),
        }
    }

    async fn check(&self, entry: &ParsedRule, _siblings: &[Arc<ParsedRule>]) -> Vec<Problem> {
        let Some(root) = entry.provenance() else {
            return Vec::new();
        };

        let mut seen: HashSet<PosRange> = HashSet::new();
        let mut problems = Vec::new();
        root.walk_alternatives(|node, _| {
            let Some((selector, call)) = self.find_selector(node.operations()) else {
                return;
            };
            if !self.selects_metric(selector) || self.has_matcher(selector) {
                return;
            }
            if !seen.insert(selector.position) {
                return;
            }
            let prefix = match call {
                Some(name) => format!("Vector selectors inside the `{name}()` function"),
                None => "This vector selector".to_owned(),
            };
            let mut problem = Problem::new(
                SELECTOR_CHECK_NAME,
                "required matcher missing",
                self.severity,
                entry.query_lines(selector.position),
            )
            .with_diagnostic(Diagnostic::issue(
                DiagnosticTarget::Query,
                selector.position,
                format!(
                    "{prefix} must specify `{label}` label. Please add a `{{{label}=\"...\"}}` matcher.",
                    label = self.label
                ),
            ));
            if let Some(comment) = &self.comment {
                problem = problem.with_details(format!("Rule comment: {comment}"));
            }
            problems.push(problem);
        });
        problems
    }
}
