use std::collections::{BTreeMap, BTreeSet};

use promlint_promql::{
    AggregateExpr, AggregateOp, BinaryOp, Call, Cardinality, GroupingMode, LabelMatcher, MatchOp,
    PosRange, VectorSelector, ValueType, METRIC_NAME,
};
use serde::Serialize;

use crate::labels::{ExcludedLabel, LabelSet};

/// What kind of query expression a node was built from.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeKind {
    Selector {
        metric: Option<String>,
    },
    Function {
        name: String,
    },
    Aggregation {
        op: AggregateOp,
    },
    BinaryJoin {
        op: BinaryOp,
        cardinality: Option<Cardinality>,
        mismatches: Vec<JoinMismatch>,
    },
    SetOp {
        op: BinaryOp,
    },
    Literal,
    Subquery,
}

impl NodeKind {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Selector { .. } => "selector",
            Self::Function { .. } => "function",
            Self::Aggregation { .. } => "aggregation",
            Self::BinaryJoin { .. } => "binary join",
            Self::SetOp { .. } => "set operation",
            Self::Literal => "literal",
            Self::Subquery => "subquery",
        }
    }
}

/// Which operand of a binary join a [`JoinMismatch`] refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JoinSide {
    Left,
    Right,
}

/// A join key that one side always has and the other side never has.
///
/// Such a join can never match. It is recorded on the join node instead of
/// making it dead, because checks report it with their own wording.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JoinMismatch {
    pub label: String,
    /// The side that can never have `label`.
    pub missing_on: JoinSide,
    pub reason: ExcludedLabel,
}

/// Proof that a node never returns anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeadInfo {
    pub reason: String,
    pub fragment: PosRange,
}

impl DeadInfo {
    pub fn new(reason: impl Into<String>, fragment: PosRange) -> Self {
        Self {
            reason: reason.into(),
            fragment,
        }
    }
}

/// One textual step between the nearest leaf and a node.
///
/// Operations compare equal when their label and detail match; positions
/// only say where each step appears in its own query.
#[derive(Debug, Clone, Serialize)]
pub struct Operation {
    pub label: String,
    pub position: PosRange,
    pub detail: OperationDetail,
}

impl PartialEq for Operation {
    fn eq(&self, other: &Self) -> bool {
        self.label == other.label && self.detail == other.detail
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum OperationDetail {
    Selector {
        metric: Option<String>,
        /// Sorted, without the metric name matcher.
        matchers: Vec<LabelMatcher>,
        range: Option<String>,
        offset: Option<String>,
    },
    Call {
        name: String,
        /// Canonical text of every argument except the vector one.
        args: Vec<String>,
    },
    Aggregation {
        op: AggregateOp,
        grouping: Option<GroupingMode>,
        /// Sorted.
        labels: Vec<String>,
        param: Option<String>,
    },
}

impl Operation {
    pub(crate) fn selector(vs: &VectorSelector, range: Option<&str>, position: PosRange) -> Self {
        let metric = vs.metric_name().map(str::to_owned);
        let mut matchers: Vec<LabelMatcher> = vs
            .matchers
            .iter()
            .filter(|m| !(m.name == METRIC_NAME && m.op == MatchOp::Equal))
            .cloned()
            .collect();
        matchers.sort_by(|a, b| {
            (&a.name, a.op.as_str(), &a.value).cmp(&(&b.name, b.op.as_str(), &b.value))
        });
        Self {
            label: metric.clone().unwrap_or_else(|| vs.to_string()),
            position,
            detail: OperationDetail::Selector {
                metric,
                matchers,
                range: range.map(str::to_owned),
                offset: vs.offset.clone(),
            },
        }
    }

    pub(crate) fn call(call: &Call, vector_arg: Option<usize>) -> Self {
        let args = call
            .args
            .iter()
            .enumerate()
            .filter(|(i, _)| Some(*i) != vector_arg)
            .map(|(_, arg)| arg.to_string())
            .collect();
        Self {
            label: call.func.clone(),
            position: call.pos,
            detail: OperationDetail::Call {
                name: call.func.clone(),
                args,
            },
        }
    }

    pub(crate) fn aggregation(agg: &AggregateExpr) -> Self {
        let mut labels = agg
            .grouping
            .as_ref()
            .map(|g| g.labels.clone())
            .unwrap_or_default();
        labels.sort();
        labels.dedup();
        Self {
            label: agg.op.name().to_owned(),
            position: agg.pos,
            detail: OperationDetail::Aggregation {
                op: agg.op,
                grouping: agg.grouping.as_ref().map(|g| g.mode),
                labels,
                param: agg.param.as_ref().map(ToString::to_string),
            },
        }
    }

    /// Name of the function or aggregation, `None` for selectors.
    pub fn function_name(&self) -> Option<&str> {
        match &self.detail {
            OperationDetail::Selector { .. } => None,
            OperationDetail::Call { name, .. } => Some(name),
            OperationDetail::Aggregation { op, .. } => Some(op.name()),
        }
    }

    /// Metric name of a selector step.
    pub fn metric(&self) -> Option<&str> {
        match &self.detail {
            OperationDetail::Selector { metric, .. } => metric.as_deref(),
            _ => None,
        }
    }
}

/// Context under which [`ProvenanceNode::walk_alternatives`] reaches a branch.
///
/// Contexts nest: the strongest one on the path wins, in the order
/// `Direct < Operand < And < Unless`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Combinator {
    /// Reached without passing through any combinator.
    Direct,
    /// Reached through the side of a join that does not provide result
    /// labels, or through a scalar argument.
    Operand,
    /// Reached through the right hand side of `and`.
    And,
    /// Reached through the right hand side of `unless`.
    Unless,
}

/// Label provenance of one query expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProvenanceNode {
    pub(crate) kind: NodeKind,
    pub(crate) position: PosRange,
    pub(crate) value_type: ValueType,
    pub(crate) guaranteed: LabelSet,
    pub(crate) included: BTreeSet<String>,
    pub(crate) excluded: BTreeMap<String, ExcludedLabel>,
    pub(crate) excluded_rest: Option<ExcludedLabel>,
    pub(crate) dead: Option<DeadInfo>,
    pub(crate) operations: Vec<Operation>,
    pub(crate) constant: Option<f64>,
    pub(crate) always_returns: bool,
    pub(crate) conditional: bool,
    pub(crate) absent: bool,
    pub(crate) alternatives: Vec<ProvenanceNode>,
    pub(crate) children: Vec<ProvenanceNode>,
    #[serde(skip)]
    pub(crate) roles: Vec<Combinator>,
}

impl ProvenanceNode {
    pub(crate) fn new(kind: NodeKind, position: PosRange, value_type: ValueType) -> Self {
        Self {
            kind,
            position,
            value_type,
            guaranteed: LabelSet::Unknown,
            included: BTreeSet::new(),
            excluded: BTreeMap::new(),
            excluded_rest: None,
            dead: None,
            operations: Vec::new(),
            constant: None,
            always_returns: false,
            conditional: false,
            absent: false,
            alternatives: Vec::new(),
            children: Vec::new(),
            roles: Vec::new(),
        }
    }

    /// A node of `kind` carrying the facts of `from`, without its
    /// alternatives or children.
    pub(crate) fn derive(kind: NodeKind, position: PosRange, from: &ProvenanceNode) -> Self {
        Self {
            kind,
            position,
            value_type: from.value_type,
            guaranteed: from.guaranteed.clone(),
            included: from.included.clone(),
            excluded: from.excluded.clone(),
            excluded_rest: from.excluded_rest.clone(),
            dead: from.dead.clone(),
            operations: from.operations.clone(),
            constant: from.constant,
            always_returns: from.always_returns,
            conditional: from.conditional,
            absent: from.absent,
            alternatives: Vec::new(),
            children: Vec::new(),
            roles: Vec::new(),
        }
    }

    pub(crate) fn summary(&self) -> Self {
        Self::derive(self.kind.clone(), self.position, self)
    }

    /// Derive a node from `children[primary]`, applying `apply` to its
    /// primary branch and to each of its alternatives.
    pub(crate) fn lift<F>(
        kind: NodeKind,
        position: PosRange,
        children: Vec<(ProvenanceNode, Combinator)>,
        primary: usize,
        mut apply: F,
    ) -> Self
    where
        F: FnMut(&mut ProvenanceNode),
    {
        let source = &children[primary].0;
        let mut node = Self::derive(kind.clone(), position, source);
        apply(&mut node);
        node.settle();
        node.alternatives = source
            .alternatives
            .iter()
            .map(|alt| {
                let mut branch = Self::derive(kind.clone(), position, alt);
                apply(&mut branch);
                branch.settle();
                branch
            })
            .collect();
        node.attach(children);
        node
    }

    pub(crate) fn attach(&mut self, children: Vec<(ProvenanceNode, Combinator)>) {
        (self.children, self.roles) = children.into_iter().unzip();
    }

    /// Apply `apply` to the primary branch and every alternative in place.
    pub(crate) fn for_each_branch_mut<F>(&mut self, mut apply: F)
    where
        F: FnMut(&mut ProvenanceNode),
    {
        for alt in &mut self.alternatives {
            apply(alt);
            alt.settle();
        }
        apply(self);
        self.settle();
    }

    // -----------------------------------------------------------------------
    // Label surface edits
    // -----------------------------------------------------------------------

    /// Mark `name` as present on every series, lifting any exclusion.
    pub(crate) fn guarantee(&mut self, name: &str) {
        self.excluded.remove(name);
        self.included.remove(name);
        self.guaranteed.insert(name);
    }

    /// Mark `name` as possibly present, unless it is already known either way.
    pub(crate) fn include(&mut self, name: &str) {
        if self.guaranteed.contains(name) || self.exclude_reason(name).is_some() {
            return;
        }
        self.included.insert(name.to_owned());
    }

    /// Mark `name` as possibly present, lifting any exclusion.
    pub(crate) fn include_overriding(&mut self, name: &str) {
        self.excluded.remove(name);
        self.guaranteed.remove(name);
        self.included.insert(name.to_owned());
    }

    /// Mark `name` as absent. A label that is already absent keeps the
    /// reason recorded closest to the leaves.
    pub(crate) fn exclude(&mut self, name: &str, why: &ExcludedLabel) {
        if self.exclude_reason(name).is_some() {
            return;
        }
        self.guaranteed.remove(name);
        self.included.remove(name);
        self.excluded.insert(name.to_owned(), why.clone());
    }

    /// Mark `name` as absent, replacing any earlier reason.
    pub(crate) fn exclude_overriding(&mut self, name: &str, why: &ExcludedLabel) {
        self.guaranteed.remove(name);
        self.included.remove(name);
        self.excluded.insert(name.to_owned(), why.clone());
    }

    /// Close the label surface to `keep`: labels outside of it become
    /// absent, labels inside it stay as they were or become possible.
    pub(crate) fn restrict_to(&mut self, keep: &BTreeSet<String>, why: &ExcludedLabel) {
        for name in keep {
            self.include(name);
        }
        let dropped: Vec<String> = self
            .guaranteed
            .names()
            .map(str::to_owned)
            .chain(self.included.iter().cloned())
            .filter(|name| !keep.contains(name))
            .collect();
        for name in &dropped {
            self.exclude(name, why);
        }
        if self.excluded_rest.is_none() {
            self.excluded_rest = Some(why.clone());
        }
        self.settle();
    }

    /// Close the label surface entirely.
    pub(crate) fn close(&mut self, why: &ExcludedLabel) {
        self.restrict_to(&BTreeSet::new(), why);
    }

    pub(crate) fn drop_metric_name(&mut self, why: &ExcludedLabel) {
        self.exclude(METRIC_NAME, why);
    }

    pub(crate) fn settle(&mut self) {
        if self.excluded_rest.is_some()
            && self.guaranteed.names().next().is_none()
            && self.included.is_empty()
        {
            self.guaranteed = LabelSet::Empty;
        }
    }

    // -----------------------------------------------------------------------
    // Queries
    // -----------------------------------------------------------------------

    pub fn kind(&self) -> &NodeKind {
        &self.kind
    }

    /// Span of the expression this node was built from.
    pub fn position(&self) -> PosRange {
        self.position
    }

    pub fn value_type(&self) -> ValueType {
        self.value_type
    }

    pub fn guaranteed_labels(&self) -> &LabelSet {
        &self.guaranteed
    }

    /// Labels that may be present without being guaranteed.
    pub fn included_labels(&self) -> &BTreeSet<String> {
        &self.included
    }

    /// Labels that are provably absent, by name.
    pub fn excluded_labels(&self) -> &BTreeMap<String, ExcludedLabel> {
        &self.excluded
    }

    /// Set when every label outside of the guaranteed and included ones is
    /// provably absent.
    pub fn closed_by(&self) -> Option<&ExcludedLabel> {
        self.excluded_rest.as_ref()
    }

    /// The complete set of labels this branch can return, when known.
    pub fn possible_labels(&self) -> Option<BTreeSet<String>> {
        self.excluded_rest.as_ref()?;
        Some(
            self.guaranteed
                .names()
                .map(str::to_owned)
                .chain(self.included.iter().cloned())
                .collect(),
        )
    }

    /// Returns false only when this branch provably never has `name`.
    pub fn can_have_label(&self, name: &str) -> bool {
        self.exclude_reason(name).is_none()
    }

    /// Why this branch never has `name`.
    pub fn exclude_reason(&self, name: &str) -> Option<&ExcludedLabel> {
        if self.guaranteed.contains(name) {
            return None;
        }
        if let Some(why) = self.excluded.get(name) {
            return Some(why);
        }
        if self.included.contains(name) {
            return None;
        }
        self.excluded_rest.as_ref()
    }

    /// Returns true when every live branch guarantees `name`.
    pub fn always_has_label(&self, name: &str) -> bool {
        self.branches()
            .filter(|branch| branch.dead.is_none())
            .all(|branch| branch.guaranteed.contains(name))
    }

    /// First live branch that provably never has `name`.
    pub fn branch_without_label(&self, name: &str) -> Option<(&ProvenanceNode, &ExcludedLabel)> {
        self.branches()
            .filter(|branch| branch.dead.is_none())
            .find_map(|branch| branch.exclude_reason(name).map(|why| (branch, why)))
    }

    /// Returns true when neither this branch nor any alternative can ever
    /// return anything.
    pub fn is_dead(&self) -> bool {
        self.dead.is_some() && self.alternatives.iter().all(|alt| alt.dead.is_some())
    }

    /// Why the whole node is dead.
    pub fn dead(&self) -> Option<&DeadInfo> {
        if self.is_dead() {
            self.dead.as_ref()
        } else {
            None
        }
    }

    /// Why this branch alone is dead, ignoring alternatives.
    pub fn branch_dead(&self) -> Option<&DeadInfo> {
        self.dead.as_ref()
    }

    pub fn alternatives(&self) -> &[ProvenanceNode] {
        &self.alternatives
    }

    /// This node followed by its alternatives.
    pub fn branches(&self) -> impl Iterator<Item = &ProvenanceNode> {
        std::iter::once(self).chain(self.alternatives.iter())
    }

    pub fn operations(&self) -> &[Operation] {
        &self.operations
    }

    pub fn children(&self) -> &[ProvenanceNode] {
        &self.children
    }

    /// Children together with the context each one is reached under.
    pub fn children_with_roles(&self) -> impl Iterator<Item = (&ProvenanceNode, Combinator)> {
        self.children.iter().zip(self.roles.iter().copied())
    }

    /// Value of every returned sample, when it is a known constant.
    pub fn constant(&self) -> Option<f64> {
        self.constant
    }

    /// Returns true when this branch returns something whatever the data.
    pub fn always_returns(&self) -> bool {
        self.always_returns
    }

    /// Returns true when a comparison or `and`/`unless` filters this branch.
    pub fn is_conditional(&self) -> bool {
        self.conditional
    }

    /// Returns true for `absent()` style results that exist only when the
    /// argument matches nothing.
    pub fn is_absent(&self) -> bool {
        self.absent
    }
}
