use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use promlint_backend::MetricsBackend;
use tracing::debug;

use crate::checker::RuleChecker;
use crate::checks::backend_problem;
use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, Problem, Severity};
use crate::template::{EXTERNAL_LABELS, Template};

pub const EXTERNAL_LABELS_CHECK_NAME: &str = "alerts/external_labels";

/// Reports templates that read external labels the backend does not set.
pub struct ExternalLabelsCheck {
    backend: Arc<dyn MetricsBackend>,
}

impl ExternalLabelsCheck {
    pub fn new(backend: Arc<dyn MetricsBackend>) -> Self {
        Self { backend }
    }
}

#[async_trait]
impl RuleChecker for ExternalLabelsCheck {
    fn name(&self) -> &'static str {
        EXTERNAL_LABELS_CHECK_NAME
    }

    fn describe(&self) -> String {
        format!("{EXTERNAL_LABELS_CHECK_NAME}({})", self.backend.name())
    }

    fn is_online(&self) -> bool {
        true
    }

    async fn check(&self, entry: &ParsedRule, _siblings: &[Arc<ParsedRule>]) -> Vec<Problem> {
        if !entry.rule.is_alerting() || entry.provenance().is_none() {
            return Vec::new();
        }

        let external = match self.backend.external_labels().await {
            Ok(labels) => labels,
            Err(err) if err.is_unsupported() => {
                debug!(backend = self.backend.name(), "external labels are not supported");
                return Vec::new();
            }
            Err(err) => {
                return vec![backend_problem(
                    EXTERNAL_LABELS_CHECK_NAME,
                    self.backend.name(),
                    &err,
                    entry.rule.lines,
                )];
            }
        };

        let mut problems = Vec::new();
        for (target, text) in entry.templates() {
            let Ok(template) = Template::parse(text) else {
                continue;
            };
            let mut done = HashSet::new();
            for (name, span) in template.fields_of(EXTERNAL_LABELS) {
                if !done.insert(name) || external.contains_key(name) {
                    continue;
                }
                problems.push(
                    Problem::new(
                        EXTERNAL_LABELS_CHECK_NAME,
                        "invalid label",
                        Severity::Bug,
                        entry.rule.lines,
                    )
                    .with_diagnostic(Diagnostic::issue(
                        target.clone(),
                        span,
                        format!(
                            "Template is using `{name}` external label but `{}` doesn't have this label configured in global:external_labels.",
                            self.backend.name()
                        ),
                    )),
                );
            }
        }
        problems
    }
}
