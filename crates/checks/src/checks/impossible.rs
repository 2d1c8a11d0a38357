use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use promlint_provenance::{JoinSide, NodeKind};

use crate::checker::RuleChecker;
use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, DiagnosticTarget, Problem, Severity};

pub const IMPOSSIBLE_CHECK_NAME: &str = "promql/impossible";

/// Reports parts of a query that can never return anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct ImpossibleCheck;

impl ImpossibleCheck {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RuleChecker for ImpossibleCheck {
    fn name(&self) -> &'static str {
        IMPOSSIBLE_CHECK_NAME
    }

    async fn check(&self, entry: &ParsedRule, _siblings: &[Arc<ParsedRule>]) -> Vec<Problem> {
        let Some(root) = entry.provenance() else {
            return Vec::new();
        };

        let mut seen = HashSet::new();
        let mut problems = Vec::new();
        root.walk_tree(|node| {
            for dead in node.branches().filter_map(|b| b.branch_dead()) {
                if !seen.insert((dead.fragment, dead.reason.clone())) {
                    continue;
                }
                problems.push(
                    Problem::new(
                        IMPOSSIBLE_CHECK_NAME,
                        "dead code in query",
                        Severity::Warning,
                        entry.query_lines(dead.fragment),
                    )
                    .with_diagnostic(Diagnostic::issue(
                        DiagnosticTarget::Query,
                        dead.fragment,
                        dead.reason.clone(),
                    )),
                );
            }

            let NodeKind::BinaryJoin { mismatches, .. } = node.kind() else {
                return;
            };
            for mismatch in mismatches {
                let side = match mismatch.missing_on {
                    JoinSide::Left => "left",
                    JoinSide::Right => "right",
                };
                problems.push(
                    Problem::new(
                        IMPOSSIBLE_CHECK_NAME,
                        "impossible binary operation",
                        Severity::Bug,
                        entry.query_lines(node.position()),
                    )
                    .with_diagnostic(Diagnostic::issue(
                        DiagnosticTarget::Query,
                        node.position(),
                        format!(
                            "This binary operation will never return anything because the {side} hand side never has the `{}` label that both sides must match on.",
                            mismatch.label
                        ),
                    ))
                    .with_diagnostic(Diagnostic::context(
                        DiagnosticTarget::Query,
                        mismatch.reason.fragment,
                        mismatch.reason.reason.clone(),
                    )),
                );
            }
        });
        problems
    }
}
