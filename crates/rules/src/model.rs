use std::collections::BTreeMap;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::comments::{InvalidComment, Snooze};

/// Inclusive range of 1-based line numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct LineRange {
    pub first: usize,
    pub last: usize,
}

impl LineRange {
    pub fn new(first: usize, last: usize) -> Self {
        Self {
            first,
            last: last.max(first),
        }
    }

    pub fn single(line: usize) -> Self {
        Self::new(line, line)
    }

    pub fn contains(&self, line: usize) -> bool {
        self.first <= line && line <= self.last
    }
}

impl std::fmt::Display for LineRange {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.first == self.last {
            write!(f, "{}", self.first)
        } else {
            write!(f, "{}-{}", self.first, self.last)
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleKind {
    Alerting,
    Recording,
}

/// A single alerting or recording rule.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Rule {
    pub kind: RuleKind,
    /// Alert name or recorded metric name.
    pub name: String,
    pub expr: String,
    pub for_duration: Option<String>,
    pub keep_firing_for: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub annotations: BTreeMap<String, String>,
    /// Lines of the whole rule in its file.
    pub lines: LineRange,
    /// Lines of the `expr` value.
    pub expr_lines: LineRange,
    /// Line holding the first character of the query.
    pub(crate) query_line: usize,
    /// Name of the group the rule belongs to.
    pub group: String,
    /// Checks switched off by `disable` comments on the rule or
    /// `file/disable` comments in its file.
    pub disabled: Vec<String>,
    /// Checks switched off for a while by `snooze` comments.
    pub snoozed: Vec<Snooze>,
}

impl Rule {
    pub fn is_alerting(&self) -> bool {
        self.kind == RuleKind::Alerting
    }

    pub fn is_recording(&self) -> bool {
        self.kind == RuleKind::Recording
    }

    /// Returns true when a comment switches off the check known by any
    /// of `names` at time `now`.
    pub fn is_check_disabled(&self, names: &[&str], now: DateTime<Utc>) -> bool {
        self.disabled.iter().any(|d| names.contains(&d.as_str()))
            || self
                .snoozed
                .iter()
                .any(|s| s.is_active(now) && names.contains(&s.matcher.as_str()))
    }

    /// File lines covered by the byte range `start..end` of the query.
    pub fn query_lines(&self, start: usize, end: usize) -> LineRange {
        let line_at = |offset: usize| {
            let offset = offset.min(self.expr.len());
            self.query_line
                + self
                    .expr
                    .get(..offset)
                    .map_or(0, |before| before.matches('\n').count())
        };
        let last = if end > start { line_at(end - 1) } else { line_at(start) };
        LineRange::new(line_at(start), last.min(self.expr_lines.last))
    }
}

/// A named group of rules.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleGroup {
    pub name: String,
    pub interval: Option<String>,
    pub labels: BTreeMap<String, String>,
    pub rules: Vec<Rule>,
}

/// Every rule group read from one file.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleFile {
    pub path: PathBuf,
    pub groups: Vec<RuleGroup>,
    /// Set when an `ignore/file` comment excludes the whole file.
    pub ignored: bool,
    /// Directive comments that could not be understood.
    pub invalid_comments: Vec<InvalidComment>,
}

impl RuleFile {
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.groups.iter().flat_map(|g| g.rules.iter())
    }
}
