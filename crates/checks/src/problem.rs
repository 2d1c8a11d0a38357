use std::fmt;
use std::str::FromStr;

use promlint_promql::PosRange;
use promlint_rules::LineRange;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// How serious a problem is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// A comment, not a problem.
    #[serde(alias = "info")]
    Information,
    Warning,
    /// An error that should be corrected.
    Bug,
    /// The rule could not be linted at all.
    Fatal,
}

impl Severity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Information => "information",
            Self::Warning => "warning",
            Self::Bug => "bug",
            Self::Fatal => "fatal",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Information => "Information",
            Self::Warning => "Warning",
            Self::Bug => "Bug",
            Self::Fatal => "Fatal",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unknown severity: {0}")]
pub struct UnknownSeverity(pub String);

impl FromStr for Severity {
    type Err = UnknownSeverity;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "information" | "info" => Ok(Self::Information),
            "warning" => Ok(Self::Warning),
            "bug" => Ok(Self::Bug),
            "fatal" => Ok(Self::Fatal),
            _ => Err(UnknownSeverity(s.to_owned())),
        }
    }
}

/// Text a diagnostic points into.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(tag = "type", content = "name", rename_all = "snake_case")]
pub enum DiagnosticTarget {
    /// The rule's query.
    Query,
    /// Value of the rule label with this name.
    Label(String),
    /// Value of the annotation with this name.
    Annotation(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum DiagnosticKind {
    /// Marks the text that needs fixing.
    Issue,
    /// Explains why, pointing at related text.
    Context,
}

/// A message attached to a span of the rule text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub target: DiagnosticTarget,
    /// Byte span inside the target text.
    pub span: PosRange,
    pub kind: DiagnosticKind,
}

impl Diagnostic {
    pub fn issue(target: DiagnosticTarget, span: PosRange, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            target,
            span,
            kind: DiagnosticKind::Issue,
        }
    }

    pub fn context(target: DiagnosticTarget, span: PosRange, message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            target,
            span,
            kind: DiagnosticKind::Context,
        }
    }
}

/// A problem found by a check.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Problem {
    /// Name of the check that reported it.
    pub reporter: String,
    pub summary: String,
    pub details: Option<String>,
    pub severity: Severity,
    pub lines: LineRange,
    pub diagnostics: Vec<Diagnostic>,
}

impl Problem {
    pub fn new(
        reporter: impl Into<String>,
        summary: impl Into<String>,
        severity: Severity,
        lines: LineRange,
    ) -> Self {
        Self {
            reporter: reporter.into(),
            summary: summary.into(),
            details: None,
            severity,
            lines,
            diagnostics: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    #[must_use]
    pub fn with_diagnostic(mut self, diagnostic: Diagnostic) -> Self {
        self.diagnostics.push(diagnostic);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_order() {
        assert!(Severity::Information < Severity::Warning);
        assert!(Severity::Warning < Severity::Bug);
        assert!(Severity::Bug < Severity::Fatal);
    }

    #[test]
    fn severity_from_str() {
        assert_eq!("bug".parse::<Severity>().unwrap(), Severity::Bug);
        assert_eq!("Warning".parse::<Severity>().unwrap(), Severity::Warning);
        assert_eq!("info".parse::<Severity>().unwrap(), Severity::Information);
        assert!("critical".parse::<Severity>().is_err());
    }

    #[test]
    fn error_display_messages() {
        assert_eq!(
            UnknownSeverity("critical".into()).to_string(),
            "unknown severity: critical"
        );
    }

    #[test]
    fn problem_serializes_to_json() {
        let problem = Problem::new("promql/impossible", "dead code in query", Severity::Warning, LineRange::single(4))
            .with_diagnostic(Diagnostic::issue(
                DiagnosticTarget::Label("summary".into()),
                PosRange::new(0, 3),
                "bad",
            ));
        let json = serde_json::to_value(&problem).unwrap();
        assert_eq!(json["severity"], "warning");
        assert_eq!(json["diagnostics"][0]["target"]["type"], "label");
        assert_eq!(json["diagnostics"][0]["target"]["name"], "summary");
        assert_eq!(json["diagnostics"][0]["kind"], "issue");
    }
}
