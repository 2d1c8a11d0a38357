use std::sync::Arc;

use async_trait::async_trait;

use crate::checker::RuleChecker;
use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, DiagnosticTarget, Problem, Severity};

pub const SYNTAX_CHECK_NAME: &str = "promql/syntax";

/// Reports queries that do not parse.
#[derive(Debug, Clone, Copy, Default)]
pub struct SyntaxCheck;

impl SyntaxCheck {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl RuleChecker for SyntaxCheck {
    fn name(&self) -> &'static str {
        SYNTAX_CHECK_NAME
    }

    async fn check(&self, entry: &ParsedRule, _siblings: &[Arc<ParsedRule>]) -> Vec<Problem> {
        let Some(err) = entry.syntax_error() else {
            return Vec::new();
        };
        vec![
            Problem::new(
                SYNTAX_CHECK_NAME,
                "PromQL syntax error",
                Severity::Fatal,
                entry.query_lines(err.position),
            )
            .with_details("[Click here](https://prometheus.io/docs/prometheus/latest/querying/basics/) for PromQL documentation.")
            .with_diagnostic(Diagnostic::issue(
                DiagnosticTarget::Query,
                err.position,
                err.message.clone(),
            )),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{alert, run};

    #[tokio::test]
    async fn valid_query() {
        let entry = alert("up == 0");
        assert!(run(&SyntaxCheck::new(), &entry).await.is_empty());
    }

    #[tokio::test]
    async fn invalid_query() {
        let entry = alert("sum(rate(foo[5m])");
        let problems = run(&SyntaxCheck::new(), &entry).await;
        assert_eq!(problems.len(), 1);
        assert_eq!(problems[0].severity, Severity::Fatal);
        assert_eq!(problems[0].reporter, SYNTAX_CHECK_NAME);
        assert!(!problems[0].diagnostics[0].message.is_empty());
    }
}
