use std::fmt::Write;

use anyhow::Context;
use clap::Args;
use promlint_promql::parse;
use promlint_provenance::{Combinator, LabelSet, ProvenanceNode, build, fragment_at};

use crate::OutputFormat;

#[derive(Args, Debug)]
pub struct ExplainArgs {
    /// PromQL query to explain.
    pub query: String,
}

pub fn run(args: &ExplainArgs, format: &OutputFormat) -> anyhow::Result<()> {
    let expr = parse(&args.query).with_context(|| format!("cannot parse `{}`", args.query))?;
    let tree = build(&expr);
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&tree)?),
        OutputFormat::Text => print!("{}", explain(&tree, &args.query)),
    }
    Ok(())
}

/// Describe `tree`, built from `source`, one node per block.
pub fn explain(tree: &ProvenanceNode, source: &str) -> String {
    let mut out = String::new();
    write_node(&mut out, tree, source, 0, None);
    out
}

fn label_list<'a>(names: impl Iterator<Item = &'a str>) -> String {
    let names: Vec<&str> = names.collect();
    if names.is_empty() {
        "-".to_owned()
    } else {
        names.join(", ")
    }
}

fn write_node(
    out: &mut String,
    node: &ProvenanceNode,
    source: &str,
    depth: usize,
    role: Option<Combinator>,
) {
    let pad = "  ".repeat(depth);
    let role = match role {
        Some(Combinator::Direct) | None => String::new(),
        Some(Combinator::Operand) => " [operand]".to_owned(),
        Some(Combinator::And) => " [and]".to_owned(),
        Some(Combinator::Unless) => " [unless]".to_owned(),
    };
    let _ = writeln!(out, "{pad}{}{role}: {}", node.kind().name(), node.fragment(source));
    write_branch(out, node, source, &pad);
    for (i, alt) in node.alternatives().iter().enumerate() {
        let _ = writeln!(out, "{pad}  alternative {}: {}", i + 1, alt.fragment(source));
        write_branch(out, alt, source, &format!("{pad}  "));
    }
    for (child, role) in node.children_with_roles() {
        write_node(out, child, source, depth + 1, Some(role));
    }
}

fn write_branch(out: &mut String, node: &ProvenanceNode, source: &str, pad: &str) {
    let guaranteed = match node.guaranteed_labels() {
        LabelSet::Unknown => "unknown".to_owned(),
        LabelSet::Empty => "none".to_owned(),
        set @ LabelSet::Set(_) => label_list(set.names()),
    };
    let _ = writeln!(out, "{pad}  guaranteed: {guaranteed}");
    if let Some(possible) = node.possible_labels() {
        let _ = writeln!(out, "{pad}  possible: {}", label_list(possible.iter().map(String::as_str)));
    } else if !node.included_labels().is_empty() {
        let _ = writeln!(
            out,
            "{pad}  included: {}",
            label_list(node.included_labels().iter().map(String::as_str))
        );
    }
    for (name, why) in node.excluded_labels() {
        let _ = writeln!(
            out,
            "{pad}  excluded {name} by `{}`: {}",
            fragment_at(source, why.fragment),
            why.reason
        );
    }
    if let Some(constant) = node.constant() {
        let _ = writeln!(out, "{pad}  constant: {constant}");
    }
    if let Some(dead) = node.branch_dead() {
        let _ = writeln!(
            out,
            "{pad}  dead at `{}`: {}",
            fragment_at(source, dead.fragment),
            dead.reason
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn explained(query: &str) -> String {
        explain(&build(&parse(query).unwrap()), query)
    }

    #[test]
    fn aggregation_with_by() {
        let text = explained("sum(foo) by(job)");
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "aggregation: sum(foo) by(job)");
        assert_eq!(lines[1], "  guaranteed: unknown");
        assert_eq!(lines[2], "  possible: job");
        assert!(lines.contains(&"  selector: foo"), "{text}");
    }

    #[test]
    fn alternatives_and_roles() {
        let text = explained("foo unless bar or vector(0)");
        assert!(text.contains("alternative 1: vector(0)"), "{text}");
        assert!(text.contains("selector [unless]: bar"), "{text}");
        assert!(text.contains("guaranteed: none"), "{text}");
    }

    #[test]
    fn dead_branch() {
        let text = explained("0 > bool 0");
        assert!(text.contains("dead at `"), "{text}");
        assert!(text.contains("which is not possible"), "{text}");
    }
}
