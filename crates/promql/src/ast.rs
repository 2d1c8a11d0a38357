use std::fmt;

use regex::Regex;
use serde::Serialize;

/// The pseudo-label holding the metric name of a series.
pub const METRIC_NAME: &str = "__name__";

/// A byte range inside the query text, `start` inclusive, `end` exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize)]
pub struct PosRange {
    pub start: usize,
    pub end: usize,
}

impl PosRange {
    pub fn new(start: usize, end: usize) -> Self {
        Self { start, end }
    }

    pub fn len(&self) -> usize {
        self.end.saturating_sub(self.start)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns true if `other` lies entirely within this range.
    pub fn contains(&self, other: PosRange) -> bool {
        self.start <= other.start && other.end <= self.end
    }

    /// Smallest range covering both ranges.
    #[must_use]
    pub fn cover(&self, other: PosRange) -> PosRange {
        PosRange::new(self.start.min(other.start), self.end.max(other.end))
    }
}

/// The type of value an expression evaluates to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Scalar,
    String,
    Vector,
    Matrix,
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Scalar => "scalar",
            Self::String => "string",
            Self::Vector => "instant vector",
            Self::Matrix => "range vector",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Selectors
// ---------------------------------------------------------------------------

/// Label matching operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum MatchOp {
    Equal,
    NotEqual,
    Regex,
    NotRegex,
}

impl MatchOp {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Equal => "=",
            Self::NotEqual => "!=",
            Self::Regex => "=~",
            Self::NotRegex => "!~",
        }
    }
}

/// A single `name op "value"` matcher inside a selector.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct LabelMatcher {
    pub name: String,
    pub op: MatchOp,
    pub value: String,
}

impl LabelMatcher {
    pub fn new(name: impl Into<String>, op: MatchOp, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            op,
            value: value.into(),
        }
    }

    /// Returns true if this matcher accepts `value`. Invalid regular
    /// expressions accept nothing.
    pub fn matches(&self, value: &str) -> bool {
        match self.op {
            MatchOp::Equal => self.value == value,
            MatchOp::NotEqual => self.value != value,
            MatchOp::Regex => anchored_regex(&self.value).is_ok_and(|re| re.is_match(value)),
            MatchOp::NotRegex => anchored_regex(&self.value).is_ok_and(|re| !re.is_match(value)),
        }
    }
}

/// Compile `pattern` the way selectors apply it, anchored at both ends.
pub fn anchored_regex(pattern: &str) -> Result<Regex, regex::Error> {
    Regex::new(&format!("^(?s:{pattern})$"))
}

impl fmt::Display for LabelMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}{}", self.name, self.op.as_str(), quote(&self.value))
    }
}

/// An instant vector selector such as `foo{job="bar"} offset 5m`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VectorSelector {
    pub name: Option<String>,
    pub matchers: Vec<LabelMatcher>,
    pub offset: Option<String>,
    pub at: Option<String>,
    pub pos: PosRange,
}

impl VectorSelector {
    /// Metric name from either the literal name or an `__name__="..."` matcher.
    pub fn metric_name(&self) -> Option<&str> {
        self.name.as_deref().or_else(|| {
            self.matchers
                .iter()
                .find(|m| m.name == METRIC_NAME && m.op == MatchOp::Equal)
                .map(|m| m.value.as_str())
        })
    }
}

/// A range vector selector such as `foo[5m]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MatrixSelector {
    pub selector: VectorSelector,
    pub range: String,
    pub pos: PosRange,
}

/// A subquery such as `rate(foo[5m])[1h:1m]`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SubqueryExpr {
    pub expr: Box<Expr>,
    pub range: String,
    pub step: Option<String>,
    pub offset: Option<String>,
    pub at: Option<String>,
    pub pos: PosRange,
}

// ---------------------------------------------------------------------------
// Calls and aggregations
// ---------------------------------------------------------------------------

/// A function call such as `rate(foo[5m])`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Call {
    pub func: String,
    pub args: Vec<Expr>,
    pub pos: PosRange,
}

/// Aggregation operators.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AggregateOp {
    Sum,
    Min,
    Max,
    Avg,
    Group,
    Stddev,
    Stdvar,
    Count,
    CountValues,
    Bottomk,
    Topk,
    Quantile,
    Limitk,
    LimitRatio,
}

impl AggregateOp {
    pub const ALL: [AggregateOp; 14] = [
        Self::Sum,
        Self::Min,
        Self::Max,
        Self::Avg,
        Self::Group,
        Self::Stddev,
        Self::Stdvar,
        Self::Count,
        Self::CountValues,
        Self::Bottomk,
        Self::Topk,
        Self::Quantile,
        Self::Limitk,
        Self::LimitRatio,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Self::Sum => "sum",
            Self::Min => "min",
            Self::Max => "max",
            Self::Avg => "avg",
            Self::Group => "group",
            Self::Stddev => "stddev",
            Self::Stdvar => "stdvar",
            Self::Count => "count",
            Self::CountValues => "count_values",
            Self::Bottomk => "bottomk",
            Self::Topk => "topk",
            Self::Quantile => "quantile",
            Self::Limitk => "limitk",
            Self::LimitRatio => "limit_ratio",
        }
    }

    /// Case-insensitive lookup by keyword.
    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|op| op.name().eq_ignore_ascii_case(name))
    }

    /// Type of the leading parameter, if the operator takes one.
    pub fn param_type(self) -> Option<ValueType> {
        match self {
            Self::CountValues => Some(ValueType::String),
            Self::Bottomk | Self::Topk | Self::Quantile | Self::Limitk | Self::LimitRatio => {
                Some(ValueType::Scalar)
            }
            _ => None,
        }
    }

    /// Operators that select a subset of input series and keep their labels.
    pub fn preserves_labels(self) -> bool {
        matches!(
            self,
            Self::Topk | Self::Bottomk | Self::Limitk | Self::LimitRatio
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GroupingMode {
    By,
    Without,
}

impl GroupingMode {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::By => "by",
            Self::Without => "without",
        }
    }
}

/// A `by(...)` or `without(...)` clause, with the span of the clause itself.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct Grouping {
    pub mode: GroupingMode,
    pub labels: Vec<String>,
    pub pos: PosRange,
}

impl fmt::Display for Grouping {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}({})", self.mode.keyword(), self.labels.join(", "))
    }
}

/// An aggregation such as `sum by (job) (foo)`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AggregateExpr {
    pub op: AggregateOp,
    pub expr: Box<Expr>,
    pub param: Option<Box<Expr>>,
    pub grouping: Option<Grouping>,
    pub pos: PosRange,
}

// ---------------------------------------------------------------------------
// Binary expressions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    Mod,
    Pow,
    Atan2,
    Eql,
    Neq,
    Gtr,
    Lss,
    Gte,
    Lte,
    And,
    Or,
    Unless,
}

impl BinaryOp {
    pub fn symbol(self) -> &'static str {
        match self {
            Self::Add => "+",
            Self::Sub => "-",
            Self::Mul => "*",
            Self::Div => "/",
            Self::Mod => "%",
            Self::Pow => "^",
            Self::Atan2 => "atan2",
            Self::Eql => "==",
            Self::Neq => "!=",
            Self::Gtr => ">",
            Self::Lss => "<",
            Self::Gte => ">=",
            Self::Lte => "<=",
            Self::And => "and",
            Self::Or => "or",
            Self::Unless => "unless",
        }
    }

    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Eql | Self::Neq | Self::Gtr | Self::Lss | Self::Gte | Self::Lte
        )
    }

    pub fn is_set(self) -> bool {
        matches!(self, Self::And | Self::Or | Self::Unless)
    }

    /// Evaluate this operator on two numbers.
    ///
    /// Comparisons return `1` or `0`; set operators return `None`.
    pub fn apply(self, lhs: f64, rhs: f64) -> Option<f64> {
        let truth = |b: bool| if b { 1.0 } else { 0.0 };
        #[allow(clippy::float_cmp)]
        let value = match self {
            Self::Add => lhs + rhs,
            Self::Sub => lhs - rhs,
            Self::Mul => lhs * rhs,
            Self::Div => lhs / rhs,
            Self::Mod => lhs % rhs,
            Self::Pow => lhs.powf(rhs),
            Self::Atan2 => lhs.atan2(rhs),
            Self::Eql => truth(lhs == rhs),
            Self::Neq => truth(lhs != rhs),
            Self::Gtr => truth(lhs > rhs),
            Self::Lss => truth(lhs < rhs),
            Self::Gte => truth(lhs >= rhs),
            Self::Lte => truth(lhs <= rhs),
            Self::And | Self::Or | Self::Unless => return None,
        };
        Some(value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchingMode {
    On,
    Ignoring,
}

impl MatchingMode {
    pub fn keyword(self) -> &'static str {
        match self {
            Self::On => "on",
            Self::Ignoring => "ignoring",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// The `on(...)`/`ignoring(...)` clause of a binary expression together
/// with an optional `group_left(...)`/`group_right(...)` modifier.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct VectorMatching {
    pub mode: MatchingMode,
    pub labels: Vec<String>,
    pub card: Cardinality,
    pub include: Vec<String>,
    /// Span of the `on(...)` or `ignoring(...)` clause.
    pub pos: PosRange,
    /// Span of the `group_left(...)` or `group_right(...)` clause.
    pub group_pos: Option<PosRange>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BinaryExpr {
    pub op: BinaryOp,
    pub lhs: Box<Expr>,
    pub rhs: Box<Expr>,
    pub return_bool: bool,
    pub matching: Option<VectorMatching>,
    pub pos: PosRange,
}

impl BinaryExpr {
    /// Effective matching cardinality between two vector operands.
    pub fn cardinality(&self) -> Cardinality {
        if self.op.is_set() {
            return Cardinality::ManyToMany;
        }
        self.matching
            .as_ref()
            .map_or(Cardinality::OneToOne, |m| m.card)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum UnaryOp {
    Neg,
    Pos,
}

// ---------------------------------------------------------------------------
// Expressions
// ---------------------------------------------------------------------------

/// A parsed PromQL expression.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub enum Expr {
    NumberLiteral { value: f64, pos: PosRange },
    StringLiteral { value: String, pos: PosRange },
    VectorSelector(VectorSelector),
    MatrixSelector(MatrixSelector),
    Subquery(SubqueryExpr),
    Call(Call),
    Aggregate(AggregateExpr),
    Binary(BinaryExpr),
    Unary {
        op: UnaryOp,
        expr: Box<Expr>,
        pos: PosRange,
    },
    Paren { expr: Box<Expr>, pos: PosRange },
}

impl Expr {
    /// Span of this expression in the query text.
    pub fn pos(&self) -> PosRange {
        match self {
            Self::NumberLiteral { pos, .. }
            | Self::StringLiteral { pos, .. }
            | Self::Unary { pos, .. }
            | Self::Paren { pos, .. } => *pos,
            Self::VectorSelector(vs) => vs.pos,
            Self::MatrixSelector(ms) => ms.pos,
            Self::Subquery(sq) => sq.pos,
            Self::Call(call) => call.pos,
            Self::Aggregate(agg) => agg.pos,
            Self::Binary(bin) => bin.pos,
        }
    }

    /// The type of value this expression evaluates to.
    pub fn value_type(&self) -> ValueType {
        match self {
            Self::NumberLiteral { .. } => ValueType::Scalar,
            Self::StringLiteral { .. } => ValueType::String,
            Self::VectorSelector(_) | Self::Aggregate(_) => ValueType::Vector,
            Self::MatrixSelector(_) | Self::Subquery(_) => ValueType::Matrix,
            Self::Call(call) => crate::functions::lookup(&call.func)
                .map_or(ValueType::Vector, |f| f.return_type),
            Self::Binary(bin) => {
                if bin.lhs.value_type() == ValueType::Scalar
                    && bin.rhs.value_type() == ValueType::Scalar
                {
                    ValueType::Scalar
                } else {
                    ValueType::Vector
                }
            }
            Self::Unary { expr, .. } | Self::Paren { expr, .. } => expr.value_type(),
        }
    }

    /// Strip any number of wrapping parentheses.
    pub fn unwrap_parens(&self) -> &Expr {
        match self {
            Self::Paren { expr, .. } => expr.unwrap_parens(),
            other => other,
        }
    }

    /// Direct sub-expressions in source order.
    pub fn children(&self) -> Vec<&Expr> {
        match self {
            Self::NumberLiteral { .. }
            | Self::StringLiteral { .. }
            | Self::VectorSelector(_)
            | Self::MatrixSelector(_) => Vec::new(),
            Self::Subquery(sq) => vec![sq.expr.as_ref()],
            Self::Call(call) => call.args.iter().collect(),
            Self::Aggregate(agg) => agg
                .param
                .iter()
                .map(AsRef::as_ref)
                .chain(std::iter::once(agg.expr.as_ref()))
                .collect(),
            Self::Binary(bin) => vec![bin.lhs.as_ref(), bin.rhs.as_ref()],
            Self::Unary { expr, .. } | Self::Paren { expr, .. } => vec![expr.as_ref()],
        }
    }
}

// ---------------------------------------------------------------------------
// Canonical rendering
// ---------------------------------------------------------------------------

fn quote(value: &str) -> String {
    let mut out = String::with_capacity(value.len() + 2);
    out.push('"');
    for c in value.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            other => out.push(other),
        }
    }
    out.push('"');
    out
}

/// Format a number the way PromQL prints literals.
pub fn format_number(value: f64) -> String {
    if value.is_nan() {
        "NaN".to_owned()
    } else if value.is_infinite() {
        if value > 0.0 { "+Inf" } else { "-Inf" }.to_owned()
    } else {
        value.to_string()
    }
}

impl fmt::Display for VectorSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if let Some(name) = &self.name {
            f.write_str(name)?;
        }
        if !self.matchers.is_empty() || self.name.is_none() {
            let inner = self
                .matchers
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ");
            write!(f, "{{{inner}}}")?;
        }
        write_modifiers(f, self.offset.as_deref(), self.at.as_deref())
    }
}

fn write_modifiers(f: &mut fmt::Formatter<'_>, offset: Option<&str>, at: Option<&str>) -> fmt::Result {
    if let Some(at) = at {
        write!(f, " @ {at}")?;
    }
    if let Some(offset) = offset {
        write!(f, " offset {offset}")?;
    }
    Ok(())
}

fn join_exprs(exprs: &[&Expr]) -> String {
    exprs
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NumberLiteral { value, .. } => f.write_str(&format_number(*value)),
            Self::StringLiteral { value, .. } => f.write_str(&quote(value)),
            Self::VectorSelector(vs) => write!(f, "{vs}"),
            Self::MatrixSelector(ms) => {
                let vs = &ms.selector;
                if let Some(name) = &vs.name {
                    f.write_str(name)?;
                }
                if !vs.matchers.is_empty() || vs.name.is_none() {
                    let inner = vs
                        .matchers
                        .iter()
                        .map(ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ");
                    write!(f, "{{{inner}}}")?;
                }
                write!(f, "[{}]", ms.range)?;
                write_modifiers(f, vs.offset.as_deref(), vs.at.as_deref())
            }
            Self::Subquery(sq) => {
                write!(
                    f,
                    "{}[{}:{}]",
                    sq.expr,
                    sq.range,
                    sq.step.as_deref().unwrap_or("")
                )?;
                write_modifiers(f, sq.offset.as_deref(), sq.at.as_deref())
            }
            Self::Call(call) => {
                let args: Vec<&Expr> = call.args.iter().collect();
                write!(f, "{}({})", call.func, join_exprs(&args))
            }
            Self::Aggregate(agg) => {
                f.write_str(agg.op.name())?;
                if let Some(grouping) = &agg.grouping {
                    write!(f, " {grouping} ")?;
                }
                let mut args: Vec<&Expr> = Vec::with_capacity(2);
                if let Some(param) = &agg.param {
                    args.push(param);
                }
                args.push(&agg.expr);
                write!(f, "({})", join_exprs(&args))
            }
            Self::Binary(bin) => {
                write!(f, "{} {}", bin.lhs, bin.op.symbol())?;
                if bin.return_bool {
                    f.write_str(" bool")?;
                }
                if let Some(m) = &bin.matching {
                    write!(f, " {}({})", m.mode.keyword(), m.labels.join(", "))?;
                    match m.card {
                        Cardinality::ManyToOne => {
                            write!(f, " group_left({})", m.include.join(", "))?;
                        }
                        Cardinality::OneToMany => {
                            write!(f, " group_right({})", m.include.join(", "))?;
                        }
                        Cardinality::OneToOne | Cardinality::ManyToMany => {}
                    }
                }
                write!(f, " {}", bin.rhs)
            }
            Self::Unary { op, expr, .. } => {
                let symbol = match op {
                    UnaryOp::Neg => "-",
                    UnaryOp::Pos => "+",
                };
                write!(f, "{symbol}{expr}")
            }
            Self::Paren { expr, .. } => write!(f, "({expr})"),
        }
    }
}
