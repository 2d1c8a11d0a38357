//! Traversals over provenance trees.

use crate::node::{Combinator, ProvenanceNode};

impl ProvenanceNode {
    /// Visit every branch that can contribute series to this node, together
    /// with the context it is reached under.
    ///
    /// The node's own branches are visited first. Then the walk descends
    /// into children: result-providing children are only searched for
    /// nested filters and operands, while the right hand side of `and` and
    /// `unless` and the non-result side of joins are visited as branches of
    /// their own.
    pub fn walk_alternatives<F>(&self, mut visit: F)
    where
        F: FnMut(&ProvenanceNode, Combinator),
    {
        self.walk_with(Combinator::Direct, &mut visit);
    }

    fn walk_with(&self, context: Combinator, visit: &mut dyn FnMut(&ProvenanceNode, Combinator)) {
        for branch in self.branches() {
            visit(branch, context);
        }
        self.walk_nested(context, visit);
    }

    fn walk_nested(&self, context: Combinator, visit: &mut dyn FnMut(&ProvenanceNode, Combinator)) {
        for (child, role) in self.children_with_roles() {
            match role {
                Combinator::Direct => child.walk_nested(context, visit),
                role => child.walk_with(context.max(role), visit),
            }
        }
    }

    /// Visit this node and every descendant, parents before children.
    pub fn walk_tree<'a, F>(&'a self, mut visit: F)
    where
        F: FnMut(&'a ProvenanceNode),
    {
        self.walk_tree_inner(&mut visit);
    }

    fn walk_tree_inner<'a>(&'a self, visit: &mut dyn FnMut(&'a ProvenanceNode)) {
        visit(self);
        for child in &self.children {
            child.walk_tree_inner(visit);
        }
    }
}

#[cfg(test)]
mod tests {
    use crate::build::build;
    use crate::node::{Combinator, NodeKind, ProvenanceNode};
    use promlint_promql::parse;

    fn tree(query: &str) -> ProvenanceNode {
        build(&parse(query).unwrap())
    }

    fn visited(query: &str) -> Vec<(String, Combinator)> {
        let source = query;
        let mut out = Vec::new();
        tree(query).walk_alternatives(|node, combinator| {
            out.push((node.fragment(source).to_owned(), combinator));
        });
        out
    }

    #[test]
    fn single_selector() {
        assert_eq!(visited("foo"), vec![("foo".to_owned(), Combinator::Direct)]);
    }

    #[test]
    fn or_visits_every_branch() {
        let seen = visited("foo or bar or baz");
        let combinators: Vec<Combinator> = seen.iter().map(|(_, c)| *c).collect();
        assert_eq!(combinators, vec![Combinator::Direct; 3]);
        assert_eq!(seen[1].0, "bar");
        assert_eq!(seen[2].0, "baz");
    }

    #[test]
    fn unless_and_and_contexts() {
        let seen = visited("sum(foo unless bar) and baz");
        assert!(seen.contains(&("bar".to_owned(), Combinator::Unless)));
        assert!(seen.contains(&("baz".to_owned(), Combinator::And)));
        assert_eq!(seen[0].1, Combinator::Direct);
    }

    #[test]
    fn strongest_context_wins() {
        let seen = visited("foo unless (bar and baz)");
        assert!(seen.contains(&("baz".to_owned(), Combinator::Unless)));
        let seen = visited("foo * (bar unless baz)");
        assert!(seen.contains(&("bar unless baz".to_owned(), Combinator::Operand)));
        assert!(seen.contains(&("baz".to_owned(), Combinator::Unless)));
    }

    #[test]
    fn join_operand_is_visited() {
        let seen = visited("rate(foo[5m]) / rate(bar[5m])");
        assert_eq!(seen[0], ("rate(foo[5m]) / rate(bar[5m])".to_owned(), Combinator::Direct));
        assert!(seen.contains(&("rate(bar[5m])".to_owned(), Combinator::Operand)));
    }

    #[test]
    fn walk_tree_nodes_outlive_the_walk() {
        let node = tree("sum(foo) by(job) / sum(bar) by(job)");
        let mut aggregations: Vec<&ProvenanceNode> = Vec::new();
        node.walk_tree(|n| {
            if matches!(n.kind(), NodeKind::Aggregation { .. }) {
                aggregations.push(n);
            }
        });
        assert_eq!(aggregations.len(), 2);
        assert!(aggregations.iter().all(|n| n.guaranteed_labels().contains("job")));
    }

    #[test]
    fn walk_tree_visits_all_nodes() {
        let mut kinds = Vec::new();
        tree("sum(rate(foo[5m])) > 5").walk_tree(|node| kinds.push(node.kind().name()));
        assert_eq!(
            kinds,
            vec!["binary join", "aggregation", "function", "selector", "literal"]
        );
    }
}
