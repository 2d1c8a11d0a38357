use std::collections::BTreeMap;
use std::path::PathBuf;

use promlint_promql::{Expr, ParseError, PosRange, parse};
use promlint_provenance::{ProvenanceNode, build};
use promlint_rules::{LineRange, Rule, RuleGroup};
use tracing::{debug, instrument};

use crate::problem::DiagnosticTarget;

/// A rule prepared for checking.
///
/// The query is parsed and its provenance tree built once, then shared by
/// every check that runs against the rule.
#[derive(Debug, Clone)]
pub struct ParsedRule {
    pub path: PathBuf,
    pub rule: Rule,
    /// Labels set on the rule's group, added to every result.
    pub group_labels: BTreeMap<String, String>,
    query: Result<Expr, ParseError>,
    provenance: Option<ProvenanceNode>,
}

impl ParsedRule {
    #[instrument(skip_all, fields(rule = %rule.name))]
    pub fn new(path: impl Into<PathBuf>, group: &RuleGroup, rule: Rule) -> Self {
        let query = parse(&rule.expr);
        let provenance = query.as_ref().ok().map(build);
        if let Err(err) = &query {
            debug!(error = %err, "query does not parse");
        }
        Self {
            path: path.into(),
            rule,
            group_labels: group.labels.clone(),
            query,
            provenance,
        }
    }

    /// Query text, which all query spans refer to.
    pub fn source(&self) -> &str {
        &self.rule.expr
    }

    pub fn expr(&self) -> Option<&Expr> {
        self.query.as_ref().ok()
    }

    pub fn syntax_error(&self) -> Option<&ParseError> {
        self.query.as_ref().err()
    }

    /// Provenance of the whole query, when it parses.
    pub fn provenance(&self) -> Option<&ProvenanceNode> {
        self.provenance.as_ref()
    }

    /// File lines covered by `span` of the query.
    pub fn query_lines(&self, span: PosRange) -> LineRange {
        self.rule.query_lines(span.start, span.end)
    }

    /// Returns true when `other` is the same rule of the same file.
    pub fn is_same_rule(&self, other: &ParsedRule) -> bool {
        self.path == other.path && self.rule.lines == other.rule.lines
    }

    /// Label or annotation values of the rule, labels first.
    pub fn templates(&self) -> impl Iterator<Item = (DiagnosticTarget, &str)> {
        let labels = self
            .rule
            .labels
            .iter()
            .map(|(k, v)| (DiagnosticTarget::Label(k.clone()), v.as_str()));
        let annotations = self
            .rule
            .annotations
            .iter()
            .map(|(k, v)| (DiagnosticTarget::Annotation(k.clone()), v.as_str()));
        labels.chain(annotations)
    }
}
