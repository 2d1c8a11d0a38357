//! The individual rule checks.

mod aggregate;
mod counter;
mod external_labels;
mod fragile;
mod impossible;
mod reuse;
mod selector;
mod syntax;
mod template;

pub use aggregate::{AGGREGATE_CHECK_NAME, AggregateCheck};
pub use counter::{COUNTER_CHECK_NAME, CounterCheck};
pub use external_labels::{EXTERNAL_LABELS_CHECK_NAME, ExternalLabelsCheck};
pub use fragile::{FRAGILE_CHECK_NAME, FragileCheck};
pub use impossible::{IMPOSSIBLE_CHECK_NAME, ImpossibleCheck};
pub use reuse::{REUSE_CHECK_NAME, ReuseCheck};
pub use selector::{SELECTOR_CHECK_NAME, SelectorCheck};
pub use syntax::{SYNTAX_CHECK_NAME, SyntaxCheck};
pub use template::{TEMPLATE_CHECK_NAME, TemplateCheck};

use promlint_backend::BackendError;
use promlint_rules::LineRange;

use crate::problem::{Problem, Severity};

/// Names of every check, in the order they run.
pub const CHECK_NAMES: [&str; 9] = [
    SYNTAX_CHECK_NAME,
    AGGREGATE_CHECK_NAME,
    TEMPLATE_CHECK_NAME,
    EXTERNAL_LABELS_CHECK_NAME,
    SELECTOR_CHECK_NAME,
    IMPOSSIBLE_CHECK_NAME,
    FRAGILE_CHECK_NAME,
    REUSE_CHECK_NAME,
    COUNTER_CHECK_NAME,
];

/// Problem reported when an online check cannot ask its backend.
pub(crate) fn backend_problem(
    reporter: &str,
    backend: &str,
    err: &BackendError,
    lines: LineRange,
) -> Problem {
    Problem::new(reporter, "unable to run checks", Severity::Warning, lines).with_details(format!(
        "Couldn't run `{reporter}` checks due to `{backend}` backend error: {err}"
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_problem_details() {
        let err = BackendError::Unavailable {
            backend: "prom".into(),
            message: "timeout".into(),
        };
        let problem = backend_problem(COUNTER_CHECK_NAME, "prom", &err, LineRange::new(3, 4));
        assert_eq!(problem.severity, Severity::Warning);
        assert_eq!(problem.summary, "unable to run checks");
        assert_eq!(
            problem.details.as_deref(),
            Some("Couldn't run `promql/counter` checks due to `prom` backend error: prom is unavailable: timeout")
        );
        assert!(problem.diagnostics.is_empty());
    }

    #[test]
    fn check_names_are_unique() {
        let mut names = CHECK_NAMES.to_vec();
        names.sort_unstable();
        names.dedup();
        assert_eq!(names.len(), CHECK_NAMES.len());
    }
}
