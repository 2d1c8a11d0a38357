//! Quantified properties of aggregation provenance.

use std::collections::BTreeSet;

use proptest::prelude::*;

use promlint_promql::parse;
use promlint_provenance::{ProvenanceNode, build};

const LABELS: &[&str] = &["job", "instance", "env", "region"];

fn tree(query: &str) -> ProvenanceNode {
    build(&parse(query).unwrap_or_else(|err| panic!("{query}: {err}")))
}

/// Excluded label names with their reasons, without the query fragments.
fn reasons(node: &ProvenanceNode) -> Vec<(String, String)> {
    node.excluded_labels()
        .iter()
        .map(|(name, why)| (name.clone(), why.reason.clone()))
        .collect()
}

fn matcher() -> impl Strategy<Value = String> {
    (
        prop::sample::select(LABELS),
        prop_oneof![Just("="), Just("!="), Just("=~")],
        "[a-c]{0,2}",
    )
        .prop_map(|(label, op, value)| format!("{label}{op}\"{value}\""))
}

/// Queries with a mix of guaranteed, possible and excluded labels.
fn child_query() -> impl Strategy<Value = String> {
    let selector = prop::collection::vec(matcher(), 0..4)
        .prop_map(|matchers| {
            if matchers.is_empty() {
                "foo".to_owned()
            } else {
                format!("foo{{{}}}", matchers.join(", "))
            }
        });
    (selector, 0..4u8).prop_map(|(selector, wrapper)| match wrapper {
        0 => selector,
        1 => format!("rate({selector}[5m])"),
        2 => format!("sum by (job, instance, env) ({selector})"),
        _ => format!("{selector} * 2"),
    })
}

fn label_list() -> impl Strategy<Value = Vec<&'static str>> {
    prop::sample::subsequence(LABELS, 0..=LABELS.len())
}

fn without_name(labels: BTreeSet<String>) -> BTreeSet<String> {
    labels.into_iter().filter(|l| l != "__name__").collect()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(256))]

    /// `by(L)` keeps exactly the guaranteed labels listed in `L`.
    #[test]
    fn by_intersects_guaranteed_labels(child in child_query(), labels in label_list()) {
        let inner = tree(&child);
        let outer = tree(&format!("sum by ({}) ({child})", labels.join(", ")));
        let keep: BTreeSet<String> = labels.iter().map(|l| (*l).to_owned()).collect();

        let expected: BTreeSet<String> =
            inner.guaranteed_labels().to_set().intersection(&keep).cloned().collect();
        prop_assert_eq!(outer.guaranteed_labels().to_set(), expected);
        for label in inner.guaranteed_labels().names().filter(|l| !keep.contains(*l)) {
            prop_assert!(outer.excluded_labels().contains_key(label), "{} not excluded", label);
        }
    }

    /// `without(L)` removes the labels listed in `L`.
    #[test]
    fn without_subtracts_guaranteed_labels(child in child_query(), labels in label_list()) {
        let inner = tree(&child);
        let outer = tree(&format!("sum without ({}) ({child})", labels.join(", ")));
        let drop: BTreeSet<String> = labels.iter().map(|l| (*l).to_owned()).collect();

        let expected: BTreeSet<String> =
            inner.guaranteed_labels().to_set().difference(&drop).cloned().collect();
        prop_assert_eq!(
            without_name(outer.guaranteed_labels().to_set()),
            without_name(expected)
        );
        for label in inner.guaranteed_labels().names().filter(|l| drop.contains(*l)) {
            prop_assert!(outer.excluded_labels().contains_key(label), "{} not excluded", label);
            prop_assert!(!outer.can_have_label(label));
        }
    }

    /// `topk` and `bottomk` select series without relabelling them.
    #[test]
    fn topk_and_bottomk_pass_labels_through(
        child in child_query(),
        labels in label_list(),
        k in 1..10u32,
        bottom in any::<bool>(),
        mode in prop_oneof![Just("by"), Just("without")],
    ) {
        let inner = tree(&child);
        let op = if bottom { "bottomk" } else { "topk" };
        let outer = tree(&format!("{op} {mode} ({}) ({k}, {child})", labels.join(", ")));

        prop_assert_eq!(outer.guaranteed_labels(), inner.guaranteed_labels());
        prop_assert_eq!(reasons(&outer), reasons(&inner));
        prop_assert_eq!(
            outer.closed_by().map(|why| &why.reason),
            inner.closed_by().map(|why| &why.reason)
        );
    }

    /// Building the same query twice gives the same tree.
    #[test]
    fn build_is_idempotent(child in child_query(), labels in label_list()) {
        let query = format!("sum by ({}) ({child}) or {child}", labels.join(", "));
        let expr = parse(&query).unwrap();
        prop_assert_eq!(build(&expr), build(&expr));
    }

    /// Guaranteed and excluded labels never overlap.
    #[test]
    fn guaranteed_and_excluded_are_disjoint(child in child_query(), labels in label_list()) {
        for query in [
            format!("sum by ({}) ({child})", labels.join(", ")),
            format!("sum without ({}) ({child})", labels.join(", ")),
            format!("{child} / on ({}) {child}", labels.join(", ")),
        ] {
            let node = tree(&query);
            node.walk_tree(|n| {
                for label in n.guaranteed_labels().names() {
                    assert!(!n.excluded_labels().contains_key(label), "{query}: {label}");
                }
            });
        }
    }
}
