//! Construction of provenance trees from query expressions.

use std::collections::BTreeSet;

use promlint_promql::{
    AggregateExpr, AggregateOp, Call, Expr, Grouping, GroupingMode, MatchOp, PosRange,
    SubqueryExpr, UnaryOp, ValueType, VectorSelector, functions, METRIC_NAME,
};

use crate::dead::conflicting_matchers;
use crate::join;
use crate::labels::ExcludedLabel;
use crate::node::{Combinator, DeadInfo, NodeKind, Operation, ProvenanceNode};

/// Functions that return their input series with the metric name intact.
const KEEPS_METRIC_NAME: &[&str] = &[
    "label_join",
    "label_replace",
    "last_over_time",
    "sort",
    "sort_by_label",
    "sort_by_label_desc",
    "sort_desc",
];

/// Functions that compute new values for each input series.
const COMPUTES_VALUES: &[&str] = &[
    "abs",
    "acos",
    "acosh",
    "asin",
    "asinh",
    "atan",
    "atanh",
    "avg_over_time",
    "ceil",
    "changes",
    "clamp",
    "clamp_max",
    "clamp_min",
    "cos",
    "cosh",
    "count_over_time",
    "day_of_month",
    "day_of_week",
    "day_of_year",
    "days_in_month",
    "deg",
    "delta",
    "deriv",
    "double_exponential_smoothing",
    "exp",
    "floor",
    "histogram_avg",
    "histogram_count",
    "histogram_fraction",
    "histogram_stddev",
    "histogram_stdvar",
    "histogram_sum",
    "holt_winters",
    "hour",
    "idelta",
    "increase",
    "irate",
    "ln",
    "log10",
    "log2",
    "mad_over_time",
    "max_over_time",
    "min_over_time",
    "minute",
    "month",
    "predict_linear",
    "present_over_time",
    "quantile_over_time",
    "rad",
    "rate",
    "resets",
    "round",
    "sgn",
    "sin",
    "sinh",
    "sqrt",
    "stddev_over_time",
    "stdvar_over_time",
    "sum_over_time",
    "tan",
    "tanh",
    "timestamp",
    "year",
];

/// Build the provenance tree of a parsed query.
pub fn build(expr: &Expr) -> ProvenanceNode {
    match expr {
        Expr::Paren { expr, .. } => build(expr),
        Expr::Unary { op, expr, pos } => unary(*op, expr, *pos),
        Expr::NumberLiteral { value, pos } => {
            let mut node = literal(*pos, ValueType::Scalar, "number");
            node.constant = Some(*value);
            node
        }
        Expr::StringLiteral { pos, .. } => literal(*pos, ValueType::String, "string"),
        Expr::VectorSelector(vs) => selector(vs, vs.pos, ValueType::Vector, None),
        Expr::MatrixSelector(ms) => {
            selector(&ms.selector, ms.pos, ValueType::Matrix, Some(&ms.range))
        }
        Expr::Subquery(sq) => subquery(sq),
        Expr::Call(call) => function(call),
        Expr::Aggregate(agg) => aggregation(agg),
        Expr::Binary(bin) => join::binary(bin),
    }
}

fn literal(pos: PosRange, value_type: ValueType, what: &str) -> ProvenanceNode {
    let mut node = ProvenanceNode::new(NodeKind::Literal, pos, value_type);
    node.always_returns = true;
    node.close(&ExcludedLabel::new(
        format!("This query returns a {what} value with no labels."),
        pos,
    ));
    node
}

fn unary(op: UnaryOp, expr: &Expr, pos: PosRange) -> ProvenanceNode {
    let mut node = build(expr);
    node.position = pos;
    if op == UnaryOp::Neg {
        let why = ExcludedLabel::new("Unary negation removes the metric name.", pos);
        node.for_each_branch_mut(|branch| {
            branch.constant = branch.constant.map(|value| -value);
            branch.drop_metric_name(&why);
        });
    }
    node
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

fn selector(
    vs: &VectorSelector,
    pos: PosRange,
    value_type: ValueType,
    range: Option<&str>,
) -> ProvenanceNode {
    let kind = NodeKind::Selector {
        metric: vs.metric_name().map(str::to_owned),
    };
    let mut node = ProvenanceNode::new(kind, pos, value_type);
    if vs.name.is_some() {
        node.guarantee(METRIC_NAME);
    }
    for m in &vs.matchers {
        match m.op {
            MatchOp::Equal if m.value.is_empty() => {}
            MatchOp::Equal => node.guarantee(&m.name),
            MatchOp::NotEqual | MatchOp::Regex | MatchOp::NotRegex => node.include(&m.name),
        }
    }
    for m in vs
        .matchers
        .iter()
        .filter(|m| m.op == MatchOp::Equal && m.value.is_empty())
    {
        let why = ExcludedLabel::new(
            format!(
                "Query uses `{{{}=\"\"}}` selector which will filter out any time series with the `{}` label set.",
                m.name, m.name
            ),
            pos,
        );
        node.exclude_overriding(&m.name, &why);
    }
    node.dead = conflicting_matchers(vs).map(|reason| DeadInfo::new(reason, pos));
    node.operations.push(Operation::selector(vs, range, pos));
    node.settle();
    node
}

fn subquery(sq: &SubqueryExpr) -> ProvenanceNode {
    ProvenanceNode::lift(
        NodeKind::Subquery,
        sq.pos,
        vec![(build(&sq.expr), Combinator::Direct)],
        0,
        |node| node.value_type = ValueType::Matrix,
    )
}

// ---------------------------------------------------------------------------
// Functions
// ---------------------------------------------------------------------------

fn function(call: &Call) -> ProvenanceNode {
    let vector_arg = functions::lookup(&call.func)
        .and_then(functions::Function::vector_arg)
        .filter(|&i| i < call.args.len());
    let children: Vec<(ProvenanceNode, Combinator)> = call
        .args
        .iter()
        .enumerate()
        .map(|(i, arg)| {
            let role = if Some(i) == vector_arg {
                Combinator::Direct
            } else {
                Combinator::Operand
            };
            (build(arg), role)
        })
        .collect();
    let operation = Operation::call(call, vector_arg);
    let name = call.func.as_str();

    match (name, vector_arg) {
        ("absent" | "absent_over_time", Some(arg)) => absent(call, children, arg, operation),
        ("vector", _) => labelless(
            call,
            children,
            operation,
            ValueType::Vector,
            "Calling `vector()` will return a vector value with no labels.",
        ),
        ("scalar", _) => labelless(
            call,
            children,
            operation,
            ValueType::Scalar,
            "Calling `scalar()` will return a scalar value with no labels.",
        ),
        ("time" | "pi", _) => labelless(
            call,
            children,
            operation,
            ValueType::Scalar,
            &format!("Calling `{name}()` will return a scalar value with no labels."),
        ),
        (_, None) if COMPUTES_VALUES.contains(&name) => labelless(
            call,
            children,
            operation,
            ValueType::Vector,
            &format!("Calling `{name}()` with no arguments will return a vector value with no labels."),
        ),
        ("label_replace" | "label_join", Some(arg)) => {
            let destination = match call.args.get(1) {
                Some(Expr::StringLiteral { value, .. }) => Some(value.clone()),
                _ => None,
            };
            passthrough(call, children, arg, operation, move |node| {
                if let Some(label) = destination.as_deref().filter(|l| !l.is_empty()) {
                    node.guarantee(label);
                }
            })
        }
        ("histogram_quantile", Some(arg)) => {
            let why = ExcludedLabel::new(
                "Calling `histogram_quantile()` removes the `le` label.",
                call.pos,
            );
            passthrough(call, children, arg, operation, move |node| {
                node.exclude("le", &why);
            })
        }
        (_, Some(arg)) if KEEPS_METRIC_NAME.contains(&name) || COMPUTES_VALUES.contains(&name) => {
            passthrough(call, children, arg, operation, |_| {})
        }
        _ => unknown_function(call, children, vector_arg, operation),
    }
}

/// A function that returns one series per input series.
fn passthrough<F>(
    call: &Call,
    children: Vec<(ProvenanceNode, Combinator)>,
    arg: usize,
    operation: Operation,
    mut extra: F,
) -> ProvenanceNode
where
    F: FnMut(&mut ProvenanceNode),
{
    let keeps_name = KEEPS_METRIC_NAME.contains(&call.func.as_str());
    let why = ExcludedLabel::new(
        format!("Calling `{}()` removes the metric name.", call.func),
        call.pos,
    );
    let kind = NodeKind::Function {
        name: call.func.clone(),
    };
    ProvenanceNode::lift(kind, call.pos, children, arg, |node| {
        node.value_type = ValueType::Vector;
        if !keeps_name {
            node.drop_metric_name(&why);
            node.constant = None;
        }
        extra(node);
        node.operations.push(operation.clone());
    })
}

/// `absent()` and `absent_over_time()` return a single series built from
/// the equality matchers of their selector, and only when it matches
/// nothing.
fn absent(
    call: &Call,
    children: Vec<(ProvenanceNode, Combinator)>,
    arg: usize,
    operation: Operation,
) -> ProvenanceNode {
    let kind = NodeKind::Function {
        name: call.func.clone(),
    };
    let mut node = ProvenanceNode::new(kind, call.pos, ValueType::Vector);
    node.absent = true;
    node.constant = Some(1.0);

    let argument = call.args.get(arg).map(Expr::unwrap_parens);
    let selector = match argument {
        Some(Expr::VectorSelector(vs)) => Some(vs),
        Some(Expr::MatrixSelector(ms)) => Some(&ms.selector),
        _ => None,
    };
    let fragment = PosRange::new(call.pos.start, call.pos.start + call.func.len());
    node.close(&ExcludedLabel::new(
        format!(
            "The `{}()` function is used here and it will only return labels from equality matchers of its argument selector.",
            call.func
        ),
        fragment,
    ));
    if let Some(vs) = selector {
        for m in &vs.matchers {
            if m.op == MatchOp::Equal && !m.value.is_empty() && m.name != METRIC_NAME {
                node.guarantee(&m.name);
            }
        }
    }

    if let Some((child, _)) = children.get(arg) {
        node.always_returns = child.is_dead();
        node.operations = child.operations.clone();
    }
    node.operations.push(operation);
    node.attach(children);
    node
}

/// A function whose result carries no labels at all.
fn labelless(
    call: &Call,
    children: Vec<(ProvenanceNode, Combinator)>,
    operation: Operation,
    value_type: ValueType,
    reason: &str,
) -> ProvenanceNode {
    let kind = NodeKind::Function {
        name: call.func.clone(),
    };
    let mut node = ProvenanceNode::new(kind, call.pos, value_type);
    node.close(&ExcludedLabel::new(reason, call.pos));
    node.always_returns = true;
    match call.func.as_str() {
        "vector" | "scalar" => {
            if let Some((child, _)) = children.first() {
                node.constant = child.constant;
                node.operations = child.operations.clone();
            }
        }
        "pi" => node.constant = Some(std::f64::consts::PI),
        _ => {}
    }
    node.operations.push(operation);
    node.attach(children);
    node
}

/// Functions without a dedicated rule keep the labels of their vector
/// argument and never claim to be dead.
fn unknown_function(
    call: &Call,
    mut children: Vec<(ProvenanceNode, Combinator)>,
    vector_arg: Option<usize>,
    operation: Operation,
) -> ProvenanceNode {
    let kind = NodeKind::Function {
        name: call.func.clone(),
    };
    let vector_args: Vec<usize> = children
        .iter()
        .enumerate()
        .filter(|(_, (child, _))| matches!(child.value_type, ValueType::Vector | ValueType::Matrix))
        .map(|(i, _)| i)
        .collect();
    let primary = vector_arg.or(match vector_args.as_slice() {
        [only] => Some(*only),
        _ => None,
    });
    let Some(arg) = primary else {
        let mut node = ProvenanceNode::new(kind, call.pos, ValueType::Vector);
        node.operations.push(operation);
        node.attach(children);
        return node;
    };
    children[arg].1 = Combinator::Direct;
    ProvenanceNode::lift(kind, call.pos, children, arg, |node| {
        node.value_type = ValueType::Vector;
        node.dead = None;
        node.constant = None;
        node.always_returns = false;
        node.operations.push(operation.clone());
    })
}

// ---------------------------------------------------------------------------
// Aggregations
// ---------------------------------------------------------------------------

fn aggregation(agg: &AggregateExpr) -> ProvenanceNode {
    let mut children = Vec::with_capacity(2);
    if let Some(param) = &agg.param {
        children.push((build(param), Combinator::Operand));
    }
    children.push((build(&agg.expr), Combinator::Direct));
    let primary = children.len() - 1;

    let count_label = match agg.param.as_deref().map(Expr::unwrap_parens) {
        Some(Expr::StringLiteral { value, .. }) if agg.op == AggregateOp::CountValues => {
            Some(value.clone())
        }
        _ => None,
    };
    let operation = Operation::aggregation(agg);
    let grouping = grouping_exclusion(agg);
    let name_reason = ExcludedLabel::new("Aggregation removes metric name.", agg.pos);

    ProvenanceNode::lift(
        NodeKind::Aggregation { op: agg.op },
        agg.pos,
        children,
        primary,
        |node| {
            node.value_type = ValueType::Vector;
            if !agg.op.preserves_labels() {
                match &grouping {
                    Grouped::Without(labels, why) => {
                        for label in labels {
                            node.exclude(label, why);
                        }
                    }
                    Grouped::By(labels, why) => node.restrict_to(labels, why),
                    Grouped::Nothing(why) => node.close(why),
                }
                node.drop_metric_name(&name_reason);
                if let Some(label) = &count_label {
                    node.guarantee(label);
                }
                node.constant = match agg.op {
                    AggregateOp::Count | AggregateOp::Group | AggregateOp::CountValues => {
                        node.constant.map(|_| 1.0)
                    }
                    AggregateOp::Stddev | AggregateOp::Stdvar => node.constant.map(|_| 0.0),
                    _ => node.constant,
                };
            }
            node.operations.push(operation.clone());
        },
    )
}

enum Grouped {
    By(BTreeSet<String>, ExcludedLabel),
    Without(Vec<String>, ExcludedLabel),
    Nothing(ExcludedLabel),
}

fn grouping_exclusion(agg: &AggregateExpr) -> Grouped {
    match &agg.grouping {
        Some(Grouping {
            mode: GroupingMode::Without,
            labels,
            pos,
        }) => Grouped::Without(
            labels.clone(),
            ExcludedLabel::new(
                format!(
                    "Query is using aggregation with `without({})`, all labels included inside `without(...)` will be removed from the results.",
                    labels.join(", ")
                ),
                *pos,
            ),
        ),
        Some(Grouping {
            mode: GroupingMode::By,
            labels,
            pos,
        }) if !labels.is_empty() => Grouped::By(
            labels.iter().cloned().collect(),
            ExcludedLabel::new(
                format!(
                    "Query is using aggregation with `by({})`, only labels included inside `by(...)` will be present on the results.",
                    labels.join(", ")
                ),
                *pos,
            ),
        ),
        Some(Grouping { pos, .. }) => Grouped::Nothing(ExcludedLabel::new(
            "Query is using aggregation that removes all labels.",
            *pos,
        )),
        None => Grouped::Nothing(ExcludedLabel::new(
            "Query is using aggregation that removes all labels.",
            agg.pos,
        )),
    }
}
