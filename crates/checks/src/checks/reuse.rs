use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use promlint_promql::{AggregateOp, GroupingMode, LabelMatcher, PosRange, ValueType};
use promlint_provenance::{NodeKind, Operation, OperationDetail, ProvenanceNode};
use tracing::debug;

use crate::checker::RuleChecker;
use crate::entry::ParsedRule;
use crate::problem::{Diagnostic, DiagnosticTarget, Problem, Severity};

pub const REUSE_CHECK_NAME: &str = "rule/reuse";

/// Suggests recording rules that already compute part of a query.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReuseCheck;

impl ReuseCheck {
    pub fn new() -> Self {
        Self
    }
}

/// Returns true when no join or set operation appears in `node`'s subtree.
/// Operations of such a node describe the whole sub-expression.
fn is_linear(node: &ProvenanceNode) -> bool {
    let mut linear = true;
    node.walk_tree(|n| {
        if matches!(n.kind(), NodeKind::BinaryJoin { .. } | NodeKind::SetOp { .. }) {
            linear = false;
        }
    });
    linear
}

fn is_candidate(node: &ProvenanceNode) -> bool {
    !matches!(node.kind(), NodeKind::Selector { .. } | NodeKind::Literal)
        && node.value_type() == ValueType::Vector
        && node.alternatives().is_empty()
        && node.branch_dead().is_none()
        && node
            .operations()
            .iter()
            .any(|op| matches!(op.detail, OperationDetail::Selector { .. }))
        && is_linear(node)
}

/// Returns true when filtering on `label` before `later` selects the same
/// series as filtering after them.
fn filter_commutes(label: &str, later: &[Operation]) -> bool {
    later.iter().all(|op| match &op.detail {
        OperationDetail::Aggregation {
            op: AggregateOp::Topk | AggregateOp::Bottomk | AggregateOp::Limitk | AggregateOp::LimitRatio,
            grouping,
            labels,
            ..
        } => match grouping {
            Some(GroupingMode::By) => labels.iter().any(|l| l == label),
            Some(GroupingMode::Without) => !labels.iter().any(|l| l == label),
            None => false,
        },
        OperationDetail::Call { name, args } if name == "label_replace" || name == "label_join" => args
            .first()
            .is_none_or(|dst| dst.trim_matches(|c| c == '"' || c == '\'') != label),
        _ => true,
    })
}

/// Compare the steps of a query with the steps of a recording rule.
///
/// Steps must be identical, except that a query selector may carry
/// matchers the rule's selector does not have, as long as no later step
/// picks series across that label. Those extra matchers are returned so
/// they can be applied to the recorded series instead.
fn compare(query: &[Operation], recorded: &[Operation]) -> Option<Vec<LabelMatcher>> {
    if query.len() != recorded.len() {
        return None;
    }
    let mut extra = Vec::new();
    for (index, (q, r)) in query.iter().zip(recorded).enumerate() {
        match (&q.detail, &r.detail) {
            (
                OperationDetail::Selector {
                    metric: qm,
                    matchers: qs,
                    range: qr,
                    offset: qo,
                },
                OperationDetail::Selector {
                    metric: rm,
                    matchers: rs,
                    range: rr,
                    offset: ro,
                },
            ) => {
                if qm != rm || qr != rr || qo != ro || !rs.iter().all(|m| qs.contains(m)) {
                    return None;
                }
                for m in qs.iter().filter(|m| !rs.contains(m)) {
                    if !filter_commutes(&m.name, &query[index + 1..]) {
                        return None;
                    }
                    extra.push(m.clone());
                }
            }
            _ if q == r => {}
            _ => return None,
        }
    }
    Some(extra)
}

/// Selector for the series recorded by `rule`, narrowed by `extra`.
fn suggestion(rule: &ParsedRule, extra: &[LabelMatcher]) -> String {
    let mut labels: BTreeMap<&str, &str> = rule
        .group_labels
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .collect();
    labels.extend(rule.rule.labels.iter().map(|(k, v)| (k.as_str(), v.as_str())));
    let matchers: Vec<String> = labels
        .into_iter()
        .map(|(k, v)| format!("{k}=\"{v}\""))
        .chain(extra.iter().map(ToString::to_string))
        .collect();
    if matchers.is_empty() {
        rule.rule.name.clone()
    } else {
        format!("{}{{{}}}", rule.rule.name, matchers.join(", "))
    }
}

#[async_trait]
impl RuleChecker for ReuseCheck {
    fn name(&self) -> &'static str {
        REUSE_CHECK_NAME
    }

    async fn check(&self, entry: &ParsedRule, siblings: &[Arc<ParsedRule>]) -> Vec<Problem> {
        let Some(root) = entry.provenance() else {
            return Vec::new();
        };
        let recorded: Vec<(&ParsedRule, &ProvenanceNode)> = siblings
            .iter()
            .filter(|other| other.rule.is_recording() && !entry.is_same_rule(other))
            .filter_map(|other| other.provenance().map(|tree| (other.as_ref(), tree)))
            .filter(|(_, tree)| is_candidate(tree))
            .collect();
        if recorded.is_empty() {
            return Vec::new();
        }

        let mut candidates = Vec::new();
        root.walk_tree(|node| {
            if is_candidate(node) {
                candidates.push(node);
            }
        });

        let mut covered: Vec<PosRange> = Vec::new();
        let mut seen = HashSet::new();
        let mut problems = Vec::new();
        for node in candidates {
            let position = node.position();
            if covered.iter().any(|outer| outer.contains(position)) {
                continue;
            }
            for (rule, tree) in &recorded {
                let Some(extra) = compare(node.operations(), tree.operations()) else {
                    continue;
                };
                if extra.iter().any(|m| !tree.can_have_label(&m.name)) {
                    continue;
                }
                let replacement = suggestion(rule, &extra);
                if !seen.insert((position, replacement.clone())) {
                    continue;
                }
                debug!(rule = %rule.rule.name, query = %node.fragment(entry.source()), "query can reuse recording rule");
                covered.push(position);
                problems.push(
                    Problem::new(
                        REUSE_CHECK_NAME,
                        "query can use recording rule",
                        Severity::Information,
                        entry.query_lines(position),
                    )
                    .with_details(format!(
                        "`{}` is defined in {} on lines {}.",
                        rule.rule.name,
                        rule.path.display(),
                        rule.rule.lines
                    ))
                    .with_diagnostic(Diagnostic::issue(
                        DiagnosticTarget::Query,
                        position,
                        format!(
                            "This query can be replaced with `{replacement}`, the `{}` recording rule already calculates it.",
                            rule.rule.name
                        ),
                    )),
                );
            }
        }
        problems
    }
}
