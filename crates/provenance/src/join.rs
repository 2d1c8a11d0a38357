//! Binary expressions: set operators, arithmetic and comparisons.

use std::collections::{BTreeMap, BTreeSet};

use promlint_promql::{BinaryExpr, BinaryOp, Cardinality, MatchingMode, ValueType, METRIC_NAME};

use crate::build::build;
use crate::dead::{impossible_comparison, unless_covers};
use crate::labels::ExcludedLabel;
use crate::node::{Combinator, DeadInfo, JoinMismatch, JoinSide, NodeKind, ProvenanceNode};

pub(crate) fn binary(bin: &BinaryExpr) -> ProvenanceNode {
    let lhs = build(&bin.lhs);
    let rhs = build(&bin.rhs);
    match bin.op {
        BinaryOp::And => and(bin, lhs, rhs),
        BinaryOp::Unless => unless(bin, lhs, rhs),
        BinaryOp::Or => or(bin, lhs, rhs),
        _ => match (
            lhs.value_type == ValueType::Scalar,
            rhs.value_type == ValueType::Scalar,
        ) {
            (true, true) => scalars(bin, lhs, rhs),
            (false, true) => with_scalar(bin, lhs, rhs, JoinSide::Left),
            (true, false) => with_scalar(bin, lhs, rhs, JoinSide::Right),
            (false, false) => vectors(bin, lhs, rhs),
        },
    }
}

/// Every branch returns something whatever the data.
fn unconditional(node: &ProvenanceNode) -> bool {
    node.branches()
        .all(|b| b.always_returns && !b.conditional && b.dead.is_none())
}

fn on_nothing(bin: &BinaryExpr) -> bool {
    matches!(&bin.matching, Some(m) if m.mode == MatchingMode::On && m.labels.is_empty())
}

/// Why no live branch of `node` can ever have `label`.
fn never_has<'a>(node: &'a ProvenanceNode, label: &str) -> Option<&'a ExcludedLabel> {
    let mut found = None;
    for branch in node.branches().filter(|b| b.dead.is_none()) {
        let why = branch.exclude_reason(label)?;
        found.get_or_insert(why);
    }
    found
}

/// What every live branch of the non-result side of a join says about a
/// label.
#[derive(Debug, Clone)]
enum SideLabel {
    Always,
    Never(ExcludedLabel),
    Maybe,
}

fn side_label(node: &ProvenanceNode, label: &str) -> SideLabel {
    let live = node.branches().any(|b| b.dead.is_none());
    if live && node.always_has_label(label) {
        SideLabel::Always
    } else if let Some(why) = never_has(node, label) {
        SideLabel::Never(why.clone())
    } else {
        SideLabel::Maybe
    }
}

// ---------------------------------------------------------------------------
// Set operators
// ---------------------------------------------------------------------------

fn and(bin: &BinaryExpr, lhs: ProvenanceNode, rhs: ProvenanceNode) -> ProvenanceNode {
    let rhs_dead = rhs.dead().cloned();
    let rhs_always = on_nothing(bin) && unconditional(&rhs);
    let missing = bin
        .matching
        .as_ref()
        .filter(|m| m.mode == MatchingMode::On)
        .and_then(|m| {
            m.labels.iter().find_map(|label| {
                if !lhs.always_has_label(label) {
                    return None;
                }
                let why = never_has(&rhs, label)?;
                Some(DeadInfo::new(
                    format!(
                        "The right hand side of `and` never has the `{label}` label used in `on({})`, so this query will never return anything. {}",
                        m.labels.join(", "),
                        why.reason
                    ),
                    m.pos,
                ))
            })
        });

    ProvenanceNode::lift(
        NodeKind::SetOp { op: bin.op },
        bin.pos,
        vec![(lhs, Combinator::Direct), (rhs, Combinator::And)],
        0,
        |node| {
            node.conditional = node.conditional || !rhs_always;
            node.always_returns = node.always_returns && rhs_always;
            if node.dead.is_none() {
                node.dead = rhs_dead.clone().or_else(|| missing.clone());
            }
        },
    )
}

fn unless(bin: &BinaryExpr, lhs: ProvenanceNode, rhs: ProvenanceNode) -> ProvenanceNode {
    let covered = bin.matching.is_none() && unless_covers(&bin.lhs, &bin.rhs);
    let rhs_always = on_nothing(bin) && unconditional(&rhs);

    ProvenanceNode::lift(
        NodeKind::SetOp { op: bin.op },
        bin.pos,
        vec![(lhs, Combinator::Direct), (rhs, Combinator::Unless)],
        0,
        |node| {
            node.conditional = true;
            node.always_returns = false;
            if node.dead.is_some() {
                return;
            }
            if covered {
                node.dead = Some(DeadInfo::new(
                    "The right hand side of `unless` returns every series the left hand side can return, so this query will never return anything.",
                    bin.pos,
                ));
            } else if rhs_always {
                node.dead = Some(DeadInfo::new(
                    "The right hand side of `unless on()` always returns something, so this query will never return anything.",
                    bin.rhs.pos(),
                ));
            }
        },
    )
}

fn or(bin: &BinaryExpr, lhs: ProvenanceNode, rhs: ProvenanceNode) -> ProvenanceNode {
    let shadowed = lhs
        .branches()
        .all(|b| b.always_returns && !b.conditional && b.dead.is_none() && b.guaranteed.is_label_less())
        && (on_nothing(bin) || rhs.branches().all(|b| b.guaranteed.is_label_less()));

    let mut node = ProvenanceNode::derive(NodeKind::SetOp { op: bin.op }, bin.pos, &lhs);
    node.alternatives = lhs.alternatives.clone();
    for branch in rhs.branches() {
        let mut alt = branch.summary();
        if shadowed && alt.dead.is_none() {
            alt.dead = Some(DeadInfo::new(
                "The left hand side of `or` always returns something, so the right hand side will never be used.",
                bin.rhs.pos(),
            ));
        }
        node.alternatives.push(alt);
    }
    node.attach(vec![(lhs, Combinator::Direct), (rhs, Combinator::Direct)]);
    node
}

// ---------------------------------------------------------------------------
// Arithmetic and comparisons
// ---------------------------------------------------------------------------

fn join_kind(bin: &BinaryExpr, cardinality: Option<Cardinality>, mismatches: Vec<JoinMismatch>) -> NodeKind {
    NodeKind::BinaryJoin {
        op: bin.op,
        cardinality,
        mismatches,
    }
}

fn drops_metric_name(bin: &BinaryExpr) -> Option<ExcludedLabel> {
    if bin.op.is_comparison() && !bin.return_bool {
        return None;
    }
    let op = if bin.return_bool {
        format!("{} bool", bin.op.symbol())
    } else {
        bin.op.symbol().to_owned()
    };
    Some(ExcludedLabel::new(
        format!("Query is using `{op}` operator which removes the metric name."),
        bin.pos,
    ))
}

/// Fold constants through the operator, marking comparisons that can
/// never hold as dead and filters that cannot be decided as conditional.
fn fold(bin: &BinaryExpr, node: &mut ProvenanceNode, lhs: Option<f64>, rhs: Option<f64>) {
    let comparison = bin.op.is_comparison();
    let decided = match (lhs, rhs) {
        (Some(l), Some(r)) => bin.op.apply(l, r).map(|value| (l, r, value)),
        _ => None,
    };
    match decided {
        Some((l, r, value)) if comparison => {
            if value <= 0.0 && node.dead.is_none() {
                node.dead = Some(DeadInfo::new(impossible_comparison(bin, l, r), bin.pos));
            }
            if bin.return_bool {
                node.constant = Some(value);
            }
        }
        Some((_, _, value)) => node.constant = Some(value),
        None if comparison && !bin.return_bool => {
            node.conditional = true;
            node.always_returns = false;
        }
        None => node.constant = None,
    }
}

fn scalars(bin: &BinaryExpr, lhs: ProvenanceNode, rhs: ProvenanceNode) -> ProvenanceNode {
    let rhs_value = rhs.constant;
    let rhs_always = rhs.always_returns;
    ProvenanceNode::lift(
        join_kind(bin, None, Vec::new()),
        bin.pos,
        vec![(lhs, Combinator::Direct), (rhs, Combinator::Operand)],
        0,
        |node| {
            node.value_type = ValueType::Scalar;
            node.always_returns = node.always_returns && rhs_always;
            let lhs_value = node.constant;
            fold(bin, node, lhs_value, rhs_value);
        },
    )
}

fn with_scalar(
    bin: &BinaryExpr,
    lhs: ProvenanceNode,
    rhs: ProvenanceNode,
    vector_side: JoinSide,
) -> ProvenanceNode {
    let (lhs_value, rhs_value) = (lhs.constant, rhs.constant);
    let (children, primary) = match vector_side {
        JoinSide::Left => (
            vec![(lhs, Combinator::Direct), (rhs, Combinator::Operand)],
            0,
        ),
        JoinSide::Right => (
            vec![(lhs, Combinator::Operand), (rhs, Combinator::Direct)],
            1,
        ),
    };
    let name_reason = drops_metric_name(bin);
    ProvenanceNode::lift(
        join_kind(bin, None, Vec::new()),
        bin.pos,
        children,
        primary,
        |node| {
            node.value_type = ValueType::Vector;
            if let Some(why) = &name_reason {
                node.drop_metric_name(why);
            }
            let (l, r) = match vector_side {
                JoinSide::Left => (node.constant, rhs_value),
                JoinSide::Right => (lhs_value, node.constant),
            };
            fold(bin, node, l, r);
        },
    )
}

fn vectors(bin: &BinaryExpr, lhs: ProvenanceNode, rhs: ProvenanceNode) -> ProvenanceNode {
    let cardinality = bin.cardinality();
    let mismatches = join_mismatches(bin, &lhs, &rhs, cardinality);
    let (lhs_value, rhs_value) = (lhs.constant, rhs.constant);
    let result_side = if cardinality == Cardinality::OneToMany {
        JoinSide::Right
    } else {
        JoinSide::Left
    };
    let other = match result_side {
        JoinSide::Left => &rhs,
        JoinSide::Right => &lhs,
    };
    let other_dead = other.dead().cloned();
    let other_always = other.always_returns;
    let other_labels: BTreeMap<String, SideLabel> = bin
        .matching
        .iter()
        .flat_map(|m| m.labels.iter().chain(&m.include))
        .map(|label| (label.clone(), side_label(other, label)))
        .collect();
    let other_label = |label: &str| other_labels.get(label).cloned().unwrap_or(SideLabel::Maybe);
    let (children, primary) = match result_side {
        JoinSide::Left => (
            vec![(lhs, Combinator::Direct), (rhs, Combinator::Operand)],
            0,
        ),
        JoinSide::Right => (
            vec![(lhs, Combinator::Operand), (rhs, Combinator::Direct)],
            1,
        ),
    };
    let name_reason = drops_metric_name(bin);

    ProvenanceNode::lift(
        join_kind(bin, Some(cardinality), mismatches),
        bin.pos,
        children,
        primary,
        |node| {
            node.value_type = ValueType::Vector;
            if let Some(why) = &name_reason {
                node.drop_metric_name(why);
            }
            match (&bin.matching, cardinality) {
                (Some(m), Cardinality::OneToOne) if m.mode == MatchingMode::On => {
                    let keep: BTreeSet<String> = m.labels.iter().cloned().collect();
                    node.restrict_to(
                        &keep,
                        &ExcludedLabel::new(
                            format!(
                                "Query is using one-to-one vector matching with `on({})`, only labels included inside `on(...)` will be present on the results.",
                                m.labels.join(", ")
                            ),
                            m.pos,
                        ),
                    );
                    for label in &m.labels {
                        if matches!(other_label(label), SideLabel::Always)
                            && node.can_have_label(label)
                        {
                            node.guarantee(label);
                        }
                    }
                }
                (Some(m), Cardinality::OneToOne) => {
                    let why = ExcludedLabel::new(
                        format!(
                            "Query is using one-to-one vector matching with `ignoring({})`, all labels included inside `ignoring(...)` will be removed on the results.",
                            m.labels.join(", ")
                        ),
                        m.pos,
                    );
                    for label in &m.labels {
                        node.exclude(label, &why);
                    }
                }
                (Some(m), Cardinality::ManyToOne | Cardinality::OneToMany) => {
                    for label in &m.include {
                        match other_label(label) {
                            SideLabel::Always => node.guarantee(label),
                            SideLabel::Never(why) => node.exclude_overriding(label, &why),
                            SideLabel::Maybe => node.include_overriding(label),
                        }
                    }
                }
                _ => {}
            }
            node.always_returns = node.always_returns && other_always;
            let (l, r) = match result_side {
                JoinSide::Left => (node.constant, rhs_value),
                JoinSide::Right => (lhs_value, node.constant),
            };
            fold(bin, node, l, r);
            if node.dead.is_none() {
                node.dead = other_dead.clone();
            }
        },
    )
}

/// Join keys that one side always has and the other side never has.
fn join_mismatches(
    bin: &BinaryExpr,
    lhs: &ProvenanceNode,
    rhs: &ProvenanceNode,
    cardinality: Cardinality,
) -> Vec<JoinMismatch> {
    let candidates: BTreeSet<String> = match &bin.matching {
        Some(m) if m.mode == MatchingMode::On => m.labels.iter().cloned().collect(),
        _ if cardinality != Cardinality::OneToOne => return Vec::new(),
        matching => {
            let ignored: &[String] = matching.as_ref().map_or(&[][..], |m| m.labels.as_slice());
            lhs.guaranteed
                .names()
                .chain(rhs.guaranteed.names())
                .filter(|name| *name != METRIC_NAME && !ignored.iter().any(|i| i == name))
                .map(str::to_owned)
                .collect()
        }
    };

    let mut mismatches = Vec::new();
    for label in &candidates {
        for (has, lacks, missing_on) in [(lhs, rhs, JoinSide::Right), (rhs, lhs, JoinSide::Left)] {
            if !has.always_has_label(label) {
                continue;
            }
            if let Some(why) = never_has(lacks, label) {
                mismatches.push(JoinMismatch {
                    label: label.clone(),
                    missing_on,
                    reason: why.clone(),
                });
            }
        }
    }
    mismatches
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::labels::LabelSet;
    use promlint_promql::parse;

    fn tree(query: &str) -> ProvenanceNode {
        build(&parse(query).unwrap_or_else(|err| panic!("{query}: {err}")))
    }

    fn names(labels: &[&str]) -> LabelSet {
        LabelSet::from_names(labels.iter().copied())
    }

    fn mismatches(node: &ProvenanceNode) -> &[JoinMismatch] {
        match node.kind() {
            NodeKind::BinaryJoin { mismatches, .. } => mismatches,
            other => panic!("expected binary join, got {other:?}"),
        }
    }

    #[test]
    fn and_keeps_left_hand_side() {
        let node = tree(r#"foo{job="a"} and on(instance) bar{env="b"}"#);
        assert_eq!(node.guaranteed_labels(), &names(&["__name__", "job"]));
        assert!(node.is_conditional());
        assert!(!node.is_dead());
    }

    #[test]
    fn and_with_dead_side_is_dead() {
        assert!(tree(r#"foo and bar{job="a", job="b"}"#).is_dead());
        assert!(tree(r#"foo{job="a", job="b"} and bar"#).is_dead());
    }

    #[test]
    fn and_on_label_the_right_side_lacks() {
        let source = r#"foo{job="a"} and on(job) sum(bar) by(instance)"#;
        let node = tree(source);
        let dead = node.dead().unwrap();
        assert_eq!(&source[dead.fragment.start..dead.fragment.end], "on(job)");
        assert!(dead.reason.contains("`job`"), "{}", dead.reason);
    }

    #[test]
    fn unless_is_dead_only_through_left_side() {
        assert!(!tree(r#"foo unless bar{job="a", job="b"}"#).is_dead());
        assert!(tree(r#"foo{job="a", job="b"} unless bar"#).is_dead());
    }

    #[test]
    fn unless_same_selector() {
        assert!(tree("foo unless foo").is_dead());
        assert!(tree(r#"foo{job="a"} unless foo"#).is_dead());
        assert!(!tree(r#"foo unless foo{job="a"}"#).is_dead());
        assert!(!tree("foo unless on(job) foo").is_dead());
    }

    #[test]
    fn unless_on_nothing_with_fallback() {
        assert!(tree("foo unless on() vector(1)").is_dead());
        assert!(!tree("foo unless on() bar").is_dead());
    }

    #[test]
    fn or_adds_alternatives() {
        let node = tree(r#"foo{job="a"} or bar or baz"#);
        assert_eq!(node.alternatives().len(), 2);
        assert_eq!(node.guaranteed_labels(), &names(&["__name__", "job"]));
        assert!(!node.always_has_label("job"));
        assert!(node.always_has_label("__name__"));
    }

    #[test]
    fn or_is_dead_only_when_every_branch_is() {
        let node = tree(r#"foo{job="a", job="b"} or bar"#);
        assert!(!node.is_dead());
        assert!(node.branch_dead().is_some());
        let node = tree(r#"foo{job="a", job="b"} or bar{env="a", env="b"}"#);
        assert!(node.is_dead());
    }

    #[test]
    fn or_after_fallback_is_never_used() {
        let node = tree("vector(1) or vector(0)");
        assert!(!node.is_dead());
        assert!(node.alternatives()[0].branch_dead().is_some());
        let node = tree("vector(1) or foo");
        assert!(node.alternatives()[0].branch_dead().is_none());
        let node = tree("vector(1) or on() foo");
        assert!(node.alternatives()[0].branch_dead().is_some());
    }

    #[test]
    fn scalar_comparison_folds() {
        let node = tree("0 > bool 0");
        assert!(node.is_dead());
        assert_eq!(
            node.dead().map(|d| d.reason.as_str()),
            Some("`0 > bool 0` always evaluates to `0 > bool 0` which is not possible, so it will never return anything.")
        );
        assert!(!tree("1 > bool 0").is_dead());
        assert_eq!(tree("1 + 2 * 3").constant(), Some(7.0));
    }

    #[test]
    fn vector_constant_comparison() {
        let node = tree("vector(1) > 5");
        assert!(node.is_dead());
        let node = tree("sum(vector(1)) < 5");
        assert!(!node.is_dead());
        assert_eq!(node.constant(), Some(1.0));
        assert!(tree("count(vector(1)) > 1").is_dead());
    }

    #[test]
    fn comparison_filter_keeps_metric_name() {
        let node = tree(r#"foo{job="a"} > 5"#);
        assert!(node.guaranteed_labels().contains("__name__"));
        assert!(node.is_conditional());
        assert!(!node.always_returns());

        let node = tree(r#"foo{job="a"} > bool 5"#);
        assert!(!node.can_have_label("__name__"));
        assert!(!node.is_conditional());

        let node = tree(r#"foo{job="a"} * 5"#);
        assert_eq!(node.guaranteed_labels(), &names(&["job"]));
    }

    #[test]
    fn scalar_on_left_keeps_vector_labels() {
        let node = tree(r#"5 < foo{job="a"}"#);
        assert_eq!(node.guaranteed_labels(), &names(&["__name__", "job"]));
        assert_eq!(node.children_with_roles().nth(1).map(|(_, role)| role), Some(Combinator::Direct));
    }

    #[test]
    fn one_to_one_on_closes_surface() {
        let source = r#"foo{job="a", instance="b"} / on(instance, env) bar{env="c"}"#;
        let node = tree(source);
        assert_eq!(node.guaranteed_labels(), &names(&["env", "instance"]));
        let why = node.exclude_reason("job").unwrap();
        assert_eq!(&source[why.fragment.start..why.fragment.end], "on(instance, env)");
    }

    #[test]
    fn one_to_one_ignoring_removes_labels() {
        let node = tree(r#"foo{job="a", instance="b"} / ignoring(instance) bar"#);
        assert_eq!(node.guaranteed_labels(), &names(&["job"]));
        assert!(!node.can_have_label("instance"));
        assert!(node.can_have_label("env"));
    }

    #[test]
    fn group_left_takes_extra_labels_from_one_side() {
        let node = tree(
            r#"foo{job="a"} * on(instance) group_left(version, env) max(build_info{version="1"}) by(instance, version)"#,
        );
        assert!(node.guaranteed_labels().contains("version"));
        assert!(node.guaranteed_labels().contains("job"));
        assert!(!node.can_have_label("env"));
        match node.kind() {
            NodeKind::BinaryJoin { cardinality, .. } => {
                assert_eq!(*cardinality, Some(Cardinality::ManyToOne));
            }
            other => panic!("expected binary join, got {other:?}"),
        }
    }

    #[test]
    fn group_left_extra_label_the_one_side_may_have() {
        let node = tree(r#"foo * on(instance) group_left(version) build_info"#);
        assert!(node.can_have_label("version"));
        assert!(!node.guaranteed_labels().contains("version"));
    }

    #[test]
    fn group_left_extra_label_from_every_one_side_branch() {
        let node = tree(
            r#"foo * on(instance) group_left(version) (build_info{version="1"} or other_info)"#,
        );
        assert!(!node.always_has_label("version"));
        assert!(node.can_have_label("version"));

        let node = tree(
            r#"foo * on(instance) group_left(version) (build_info{version="1"} or other_info{version="2"})"#,
        );
        assert!(node.always_has_label("version"));

        let node = tree(
            "foo * on(instance) group_left(version) (max(a) by(instance) or max(b) by(instance))",
        );
        assert!(!node.can_have_label("version"));
    }

    #[test]
    fn on_label_guaranteed_only_by_every_other_branch() {
        let node = tree(r#"foo / on(job) (bar{job="a"} or vector(1))"#);
        assert!(!node.guaranteed_labels().contains("job"));
        assert!(node.can_have_label("job"));

        let node = tree(r#"foo / on(job) (bar{job="a"} or baz{job="b"})"#);
        assert!(node.guaranteed_labels().contains("job"));
    }

    #[test]
    fn group_right_uses_right_hand_side() {
        let node = tree(r#"sum(foo) by(instance) * on(instance) group_right() bar{job="a"}"#);
        assert!(node.guaranteed_labels().contains("job"));
        assert_eq!(node.children_with_roles().next().map(|(_, role)| role), Some(Combinator::Operand));
    }

    #[test]
    fn join_records_mismatched_keys() {
        let node = tree(r#"foo{job="a"} / sum(bar)"#);
        let found = mismatches(&node);
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].label, "job");
        assert_eq!(found[0].missing_on, JoinSide::Right);
        assert!(!node.is_dead());

        let node = tree(r#"foo{job="a"} / ignoring(job) sum(bar)"#);
        assert!(mismatches(&node).is_empty());

        let node = tree(r#"sum(foo) / on(job) bar{job="a"}"#);
        assert_eq!(mismatches(&node)[0].missing_on, JoinSide::Left);
    }

    #[test]
    fn join_with_dead_side_is_dead() {
        assert!(tree(r#"foo / bar{job="a", job="b"}"#).is_dead());
        assert!(tree(r#"foo{job="a", job="b"} + 1"#).is_dead());
    }

    #[test]
    fn and_right_side_exclusions_do_not_leak() {
        let node = tree("foo AND on(instance) max(bar) without(job)");
        assert!(node.can_have_label("job"));
        assert_eq!(node.guaranteed_labels(), &names(&["__name__"]));
    }
}
