//! Plain text rendering of problems.

use std::fmt::Write;

use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, DiagnosticKind, DiagnosticTarget, Problem};

/// Text a diagnostic target refers to, if the rule has it.
fn target_text<'a>(entry: &'a ParsedRule, target: &DiagnosticTarget) -> Option<&'a str> {
    match target {
        DiagnosticTarget::Query => Some(entry.source()),
        DiagnosticTarget::Label(name) => entry.rule.labels.get(name).map(String::as_str),
        DiagnosticTarget::Annotation(name) => {
            entry.rule.annotations.get(name).map(String::as_str)
        }
    }
}

fn target_title(target: &DiagnosticTarget) -> String {
    match target {
        DiagnosticTarget::Query => "expr".to_owned(),
        DiagnosticTarget::Label(name) => format!("labels.{name}"),
        DiagnosticTarget::Annotation(name) => format!("annotations.{name}"),
    }
}

/// Write the line of `text` holding the start of `diag` followed by an
/// underline of the span and the message.
fn render_diagnostic(out: &mut String, text: &str, diag: &Diagnostic) {
    let start = diag.span.start.min(text.len());
    let line_start = text[..start].rfind('\n').map_or(0, |i| i + 1);
    let line_end = text[start..].find('\n').map_or(text.len(), |i| start + i);
    let line = &text[line_start..line_end];
    let end = diag.span.end.clamp(start, line_end);

    let column = text[line_start..start].chars().count();
    let width = text[start..end].chars().count().max(1);
    let marker = match diag.kind {
        DiagnosticKind::Issue => '^',
        DiagnosticKind::Context => '-',
    };
    let title = target_title(&diag.target);
    let indent = " ".repeat(title.len() + 2);

    let _ = writeln!(out, "  {title}: {line}");
    let _ = writeln!(
        out,
        "  {indent}{}{} {}",
        " ".repeat(column),
        marker.to_string().repeat(width),
        diag.message
    );
}

/// Render `problem` reported for `entry` as a human readable block.
pub fn render_problem(entry: &ParsedRule, problem: &Problem) -> String {
    let mut out = String::new();
    let _ = writeln!(
        out,
        "{}:{} {}: {} ({})",
        entry.path.display(),
        problem.lines,
        problem.severity,
        problem.summary,
        problem.reporter,
    );
    for diag in &problem.diagnostics {
        match target_text(entry, &diag.target) {
            Some(text) => render_diagnostic(&mut out, text, diag),
            None => {
                let _ = writeln!(out, "  {}", diag.message);
            }
        }
    }
    if let Some(details) = &problem.details {
        for line in details.lines() {
            let _ = writeln!(out, "  {line}");
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use promlint_promql::PosRange;
    use promlint_rules::LineRange;

    use super::*;
    use crate::problem::Severity;
    use crate::testing::{alert, entries};

    #[test]
    fn query_underline() {
        let entry = alert("sum(foo) by(job) > 0");
        let problem = Problem::new("promql/aggregate", "label must be kept", Severity::Bug, LineRange::single(5))
            .with_diagnostic(Diagnostic::issue(DiagnosticTarget::Query, PosRange::new(9, 16), "here"));
        let text = render_problem(&entry, &problem);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "rules.yml:5 Bug: label must be kept (promql/aggregate)");
        assert_eq!(lines[1], "  expr: sum(foo) by(job) > 0");
        assert_eq!(lines[2], "                 ^^^^^^^ here");
    }

    #[test]
    fn annotation_context_and_details() {
        let entry = entries(
            "- alert: Down\n  expr: up == 0\n  annotations:\n    summary: |\n      {{ $labels.job }}\n      is down\n",
        )
        .remove(0);
        let problem = Problem::new("alerts/template", "bad", Severity::Warning, LineRange::new(3, 8))
            .with_details("first\nsecond")
            .with_diagnostic(Diagnostic::context(
                DiagnosticTarget::Annotation("summary".into()),
                PosRange::new(18, 20),
                "why",
            ));
        let text = render_problem(&entry, &problem);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "rules.yml:3-8 Warning: bad (alerts/template)");
        assert_eq!(lines[1], "  annotations.summary: is down");
        assert_eq!(lines[2], "                       -- why");
        assert_eq!(&lines[3..], ["  first", "  second"]);
    }

    #[test]
    fn missing_target() {
        let entry = alert("up == 0");
        let problem = Problem::new("alerts/template", "bad", Severity::Bug, LineRange::single(1))
            .with_diagnostic(Diagnostic::issue(
                DiagnosticTarget::Label("severity".into()),
                PosRange::new(0, 1),
                "gone",
            ));
        assert!(render_problem(&entry, &problem).ends_with("\n  gone\n"));
    }
}
