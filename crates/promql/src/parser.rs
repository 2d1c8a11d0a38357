//! Hand-written recursive descent parser for PromQL.
//!
//! The parser uses `nom` for low-level token recognition (identifiers,
//! numbers, durations, whitespace and comments) and implements precedence
//! climbing manually. Every node records its byte span in the query so that
//! later stages can point at the exact text they are talking about.

use std::cell::Cell;

use nom::{
    IResult,
    branch::alt,
    bytes::complete::{tag, tag_no_case, take_while, take_while1},
    character::complete::{char, digit0, digit1, hex_digit1, multispace1, not_line_ending, one_of},
    combinator::{opt, recognize},
    multi::{many0, many1},
    sequence::{pair, preceded, tuple},
};

use crate::ast::{
    AggregateExpr, AggregateOp, BinaryExpr, BinaryOp, Call, Cardinality, Expr, Grouping,
    GroupingMode, LabelMatcher, METRIC_NAME, MatchOp, MatchingMode, MatrixSelector, PosRange,
    SubqueryExpr, UnaryOp, ValueType, VectorMatching, VectorSelector, anchored_regex,
};
use crate::error::ParseError;
use crate::functions;

/// Parse a complete PromQL query.
///
/// Returns a [`ParseError`] pointing at the offending input if the query is
/// malformed, fails type checking, or has trailing tokens.
pub fn parse(query: &str) -> Result<Expr, ParseError> {
    if skip_ws(query).is_empty() {
        return Err(ParseError::new(
            "no expression found in input",
            PosRange::new(0, query.len()),
        ));
    }
    let parser = Parser {
        src: query,
        depth: Cell::new(0),
    };
    let (rest, expr) = parser.expr(query)?;
    let rest = skip_ws(rest);
    if !rest.is_empty() {
        return Err(parser.unexpected(rest));
    }
    Ok(expr)
}

type PResult<'a, T> = Result<(&'a str, T), ParseError>;

const POW_PRECEDENCE: u8 = 6;

/// Deepest nesting of sub-expressions a query may have.
const MAX_DEPTH: usize = 128;

const KEYWORDS: [&str; 12] = [
    "and",
    "or",
    "unless",
    "atan2",
    "bool",
    "on",
    "ignoring",
    "group_left",
    "group_right",
    "by",
    "without",
    "offset",
];

// ---------------------------------------------------------------------------
// Tokens
// ---------------------------------------------------------------------------

fn comment(input: &str) -> IResult<&str, &str> {
    recognize(preceded(char('#'), not_line_ending))(input)
}

/// Skip whitespace and `#` comments.
fn skip_ws(input: &str) -> &str {
    match many0(alt((multispace1, comment)))(input) {
        Ok((rest, _)) => rest,
        Err(_) => input,
    }
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

fn identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_'),
        take_while(is_ident_char),
    ))(input)
}

fn metric_identifier(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        take_while1(|c: char| c.is_ascii_alphabetic() || c == '_' || c == ':'),
        take_while(|c: char| is_ident_char(c) || c == ':'),
    ))(input)
}

/// Match a case-insensitive keyword that is not a prefix of a longer word.
fn keyword<'a>(input: &'a str, word: &str) -> Option<&'a str> {
    let res: IResult<&str, &str> = tag_no_case(word)(input);
    let (rest, _) = res.ok()?;
    if rest
        .chars()
        .next()
        .is_some_and(|c| is_ident_char(c) || c == ':')
    {
        return None;
    }
    Some(rest)
}

fn decimal(input: &str) -> IResult<&str, &str> {
    recognize(pair(
        alt((
            recognize(pair(digit1, opt(pair(char('.'), digit0)))),
            recognize(pair(char('.'), digit1)),
        )),
        opt(tuple((one_of("eE"), opt(one_of("+-")), digit1))),
    ))(input)
}

fn hex_number(input: &str) -> IResult<&str, &str> {
    recognize(pair(alt((tag("0x"), tag("0X"))), hex_digit1))(input)
}

fn duration(input: &str) -> IResult<&str, &str> {
    recognize(many1(pair(
        digit1,
        alt((
            tag("ms"),
            tag("s"),
            tag("m"),
            tag("h"),
            tag("d"),
            tag("w"),
            tag("y"),
        )),
    )))(input)
}

#[allow(clippy::cast_precision_loss)]
fn number_value(text: &str) -> Option<f64> {
    match text.strip_prefix("0x").or_else(|| text.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok().map(|v| v as f64),
        None => text.parse().ok(),
    }
}

fn binary_operator(input: &str) -> Option<(&str, BinaryOp)> {
    const SYMBOLS: [(&str, BinaryOp); 12] = [
        ("==", BinaryOp::Eql),
        ("!=", BinaryOp::Neq),
        (">=", BinaryOp::Gte),
        ("<=", BinaryOp::Lte),
        (">", BinaryOp::Gtr),
        ("<", BinaryOp::Lss),
        ("+", BinaryOp::Add),
        ("-", BinaryOp::Sub),
        ("*", BinaryOp::Mul),
        ("/", BinaryOp::Div),
        ("%", BinaryOp::Mod),
        ("^", BinaryOp::Pow),
    ];
    for (symbol, op) in SYMBOLS {
        if let Some(rest) = input.strip_prefix(symbol) {
            return Some((rest, op));
        }
    }
    [BinaryOp::And, BinaryOp::Or, BinaryOp::Unless, BinaryOp::Atan2]
        .into_iter()
        .find_map(|op| keyword(input, op.symbol()).map(|rest| (rest, op)))
}

fn precedence(op: BinaryOp) -> u8 {
    match op {
        BinaryOp::Or => 1,
        BinaryOp::And | BinaryOp::Unless => 2,
        BinaryOp::Eql
        | BinaryOp::Neq
        | BinaryOp::Gtr
        | BinaryOp::Lss
        | BinaryOp::Gte
        | BinaryOp::Lte => 3,
        BinaryOp::Add | BinaryOp::Sub => 4,
        BinaryOp::Mul | BinaryOp::Div | BinaryOp::Mod | BinaryOp::Atan2 => 5,
        BinaryOp::Pow => POW_PRECEDENCE,
    }
}

fn match_op(input: &str) -> Option<(&str, MatchOp)> {
    [
        ("=~", MatchOp::Regex),
        ("!~", MatchOp::NotRegex),
        ("!=", MatchOp::NotEqual),
        ("=", MatchOp::Equal),
    ]
    .into_iter()
    .find_map(|(symbol, op)| input.strip_prefix(symbol).map(|rest| (rest, op)))
}

fn grouping_keyword(input: &str) -> Option<(&str, GroupingMode)> {
    keyword(input, "by")
        .map(|rest| (rest, GroupingMode::By))
        .or_else(|| keyword(input, "without").map(|rest| (rest, GroupingMode::Without)))
}

// ---------------------------------------------------------------------------
// Grammar
// ---------------------------------------------------------------------------

struct Parser<'a> {
    src: &'a str,
    /// Sub-expressions currently being parsed.
    depth: Cell<usize>,
}

impl<'a> Parser<'a> {
    fn offset(&self, rest: &str) -> usize {
        self.src.len() - rest.len()
    }

    fn error(&self, rest: &str, message: impl Into<String>) -> ParseError {
        let start = self.offset(rest);
        let end = start + rest.chars().next().map_or(0, char::len_utf8);
        ParseError::new(message, PosRange::new(start, end))
    }

    fn unexpected(&self, rest: &str) -> ParseError {
        match rest.chars().next() {
            Some(c) => self.error(rest, format!("unexpected character: {c:?}")),
            None => self.error(rest, "unexpected end of input"),
        }
    }

    fn expect(&self, input: &'a str, expected: char) -> Result<&'a str, ParseError> {
        let input = skip_ws(input);
        input
            .strip_prefix(expected)
            .ok_or_else(|| match input.chars().next() {
                Some(found) => self.error(input, format!("expected {expected:?}, found {found:?}")),
                None => self.error(input, format!("expected {expected:?}, found end of input")),
            })
    }

    fn expr(&self, input: &'a str) -> PResult<'a, Expr> {
        self.binary(input, 0)
    }

    /// Precedence climbing over binary operators.
    fn binary(&self, input: &'a str, min_prec: u8) -> PResult<'a, Expr> {
        let (mut rest, mut lhs) = self.unary(input)?;
        loop {
            let op_at = skip_ws(rest);
            let Some((after_op, op)) = binary_operator(op_at) else {
                break;
            };
            let prec = precedence(op);
            if prec < min_prec {
                break;
            }
            let (after_mods, (return_bool, matching)) = self.modifiers(after_op, op)?;
            // `^` is right-associative.
            let next_min = if op == BinaryOp::Pow { prec } else { prec + 1 };
            let (r, rhs) = self.binary(after_mods, next_min)?;
            lhs = self.make_binary(op_at, op, lhs, rhs, return_bool, matching)?;
            rest = r;
        }
        Ok((rest, lhs))
    }

    fn modifiers(
        &self,
        input: &'a str,
        op: BinaryOp,
    ) -> PResult<'a, (bool, Option<VectorMatching>)> {
        let mut rest = skip_ws(input);
        let mut return_bool = false;
        if let Some(r) = keyword(rest, "bool") {
            if !op.is_comparison() {
                return Err(self.error(
                    rest,
                    "bool modifier can only be used on comparison operators",
                ));
            }
            return_bool = true;
            rest = skip_ws(r);
        }

        let mode = keyword(rest, "on")
            .map(|r| (r, MatchingMode::On))
            .or_else(|| keyword(rest, "ignoring").map(|r| (r, MatchingMode::Ignoring)));
        let Some((after_kw, mode)) = mode else {
            return Ok((rest, (return_bool, None)));
        };
        let start = self.offset(rest);
        let (after_labels, labels) = self.label_list(after_kw)?;
        let mut matching = VectorMatching {
            mode,
            labels,
            card: if op.is_set() {
                Cardinality::ManyToMany
            } else {
                Cardinality::OneToOne
            },
            include: Vec::new(),
            pos: PosRange::new(start, self.offset(after_labels)),
            group_pos: None,
        };
        rest = after_labels;

        let group_at = skip_ws(rest);
        let group = keyword(group_at, "group_left")
            .map(|r| (r, Cardinality::ManyToOne))
            .or_else(|| keyword(group_at, "group_right").map(|r| (r, Cardinality::OneToMany)));
        if let Some((after_kw, card)) = group {
            if op.is_set() {
                return Err(self.error(
                    group_at,
                    format!("no grouping allowed for {:?} operation", op.symbol()),
                ));
            }
            let (r, include) = if skip_ws(after_kw).starts_with('(') {
                self.label_list(after_kw)?
            } else {
                (after_kw, Vec::new())
            };
            if mode == MatchingMode::On {
                if let Some(dup) = include.iter().find(|l| matching.labels.contains(l)) {
                    return Err(self.error(
                        group_at,
                        format!("label {dup:?} must not occur in ON and GROUP clause at once"),
                    ));
                }
            }
            matching.card = card;
            matching.include = include;
            matching.group_pos = Some(PosRange::new(self.offset(group_at), self.offset(r)));
            rest = r;
        }
        Ok((rest, (return_bool, Some(matching))))
    }

    fn make_binary(
        &self,
        op_at: &str,
        op: BinaryOp,
        lhs: Expr,
        rhs: Expr,
        return_bool: bool,
        matching: Option<VectorMatching>,
    ) -> Result<Expr, ParseError> {
        let lt = lhs.value_type();
        let rt = rhs.value_type();
        for side in [&lhs, &rhs] {
            if !matches!(side.value_type(), ValueType::Scalar | ValueType::Vector) {
                return Err(ParseError::new(
                    "binary expression must contain only scalar and instant vector types",
                    side.pos(),
                ));
            }
        }
        let has_scalar = lt == ValueType::Scalar || rt == ValueType::Scalar;
        if op.is_set() && has_scalar {
            return Err(self.error(
                op_at,
                format!(
                    "set operator {:?} not allowed in binary scalar expression",
                    op.symbol()
                ),
            ));
        }
        if op.is_comparison() && !return_bool && lt == ValueType::Scalar && rt == ValueType::Scalar
        {
            return Err(self.error(op_at, "comparisons between scalars must use BOOL modifier"));
        }
        if matching.is_some() && has_scalar {
            return Err(self.error(
                op_at,
                "vector matching only allowed between instant vectors",
            ));
        }
        let pos = PosRange::new(lhs.pos().start, rhs.pos().end);
        Ok(Expr::Binary(BinaryExpr {
            op,
            lhs: Box::new(lhs),
            rhs: Box::new(rhs),
            return_bool,
            matching,
            pos,
        }))
    }

    /// Every nested sub-expression passes through here, so this is where
    /// the nesting depth is bounded.
    fn unary(&self, input: &'a str) -> PResult<'a, Expr> {
        let depth = self.depth.get() + 1;
        if depth > MAX_DEPTH {
            return Err(self.error(skip_ws(input), "query is nested too deeply"));
        }
        self.depth.set(depth);
        let result = self.signed(input);
        self.depth.set(depth - 1);
        result
    }

    fn signed(&self, input: &'a str) -> PResult<'a, Expr> {
        let input = skip_ws(input);
        let op = match input.chars().next() {
            Some('-') => UnaryOp::Neg,
            Some('+') => UnaryOp::Pos,
            _ => return self.postfix(input),
        };
        let start = self.offset(input);
        let (rest, expr) = self.binary(&input[1..], POW_PRECEDENCE)?;
        if !matches!(expr.value_type(), ValueType::Scalar | ValueType::Vector) {
            return Err(ParseError::new(
                "unary expression only allowed on expressions of type scalar or instant vector",
                expr.pos(),
            ));
        }
        let pos = PosRange::new(start, expr.pos().end);
        let expr = match (op, expr) {
            (UnaryOp::Neg, Expr::NumberLiteral { value, .. }) => Expr::NumberLiteral {
                value: -value,
                pos,
            },
            (UnaryOp::Pos, Expr::NumberLiteral { value, .. }) => {
                Expr::NumberLiteral { value, pos }
            }
            (op, expr) => Expr::Unary {
                op,
                expr: Box::new(expr),
                pos,
            },
        };
        Ok((rest, expr))
    }

    /// An atom followed by any number of `[range]`, `[range:step]`,
    /// `offset` and `@` suffixes.
    fn postfix(&self, input: &'a str) -> PResult<'a, Expr> {
        let (mut rest, mut expr) = self.atom(input)?;
        loop {
            let after = skip_ws(rest);
            let (r, e) = if after.starts_with('[') {
                self.range_suffix(after, expr)?
            } else if let Some(r) = keyword(after, "offset") {
                self.offset_suffix(after, r, expr)?
            } else if after.starts_with('@') {
                self.at_suffix(after, expr)?
            } else {
                break;
            };
            rest = r;
            expr = e;
        }
        Ok((rest, expr))
    }

    fn duration(&self, input: &'a str) -> PResult<'a, String> {
        duration(input)
            .map(|(rest, d)| (rest, d.to_owned()))
            .map_err(|_| self.error(input, "expected duration"))
    }

    fn range_suffix(&self, input: &'a str, expr: Expr) -> PResult<'a, Expr> {
        let (rest, range) = self.duration(skip_ws(&input[1..]))?;
        let rest = skip_ws(rest);
        if let Some(after_colon) = rest.strip_prefix(':') {
            let after_colon = skip_ws(after_colon);
            let (rest, step) = match duration(after_colon) {
                Ok((r, step)) => (r, Some(step.to_owned())),
                Err(_) => (after_colon, None),
            };
            let rest = self.expect(rest, ']')?;
            let got = expr.value_type();
            if got != ValueType::Vector {
                return Err(ParseError::new(
                    format!("subquery is only allowed on instant vector, got {got}"),
                    expr.pos(),
                ));
            }
            let pos = PosRange::new(expr.pos().start, self.offset(rest));
            return Ok((
                rest,
                Expr::Subquery(SubqueryExpr {
                    expr: Box::new(expr),
                    range,
                    step,
                    offset: None,
                    at: None,
                    pos,
                }),
            ));
        }
        let rest = self.expect(rest, ']')?;
        match expr {
            Expr::VectorSelector(selector) if selector.offset.is_none() && selector.at.is_none() => {
                let pos = PosRange::new(selector.pos.start, self.offset(rest));
                Ok((
                    rest,
                    Expr::MatrixSelector(MatrixSelector {
                        selector,
                        range,
                        pos,
                    }),
                ))
            }
            other => Err(ParseError::new(
                "ranges only allowed for vector selectors",
                other.pos(),
            )),
        }
    }

    fn offset_suffix(&self, kw_at: &'a str, after_kw: &'a str, mut expr: Expr) -> PResult<'a, Expr> {
        let rest = skip_ws(after_kw);
        let (rest, negative) = match rest.strip_prefix('-') {
            Some(r) => (skip_ws(r), true),
            None => (rest, false),
        };
        let (rest, dur) = self.duration(rest)?;
        let value = if negative { format!("-{dur}") } else { dur };
        let end = self.offset(rest);
        let (slot, pos) = match &mut expr {
            Expr::VectorSelector(vs) => (&mut vs.offset, &mut vs.pos),
            Expr::MatrixSelector(ms) => (&mut ms.selector.offset, &mut ms.pos),
            Expr::Subquery(sq) => (&mut sq.offset, &mut sq.pos),
            _ => {
                return Err(self.error(
                    kw_at,
                    "offset modifier must be preceded by an instant vector selector or range vector selector or a subquery",
                ));
            }
        };
        if slot.is_some() {
            return Err(self.error(kw_at, "offset may not be set multiple times"));
        }
        *slot = Some(value);
        pos.end = end;
        Ok((rest, expr))
    }

    fn at_suffix(&self, at: &'a str, mut expr: Expr) -> PResult<'a, Expr> {
        let rest = skip_ws(&at[1..]);
        let word = ["start", "end"]
            .into_iter()
            .find_map(|w| keyword(rest, w).map(|r| (w, r)));
        let (rest, value) = match word {
            Some((w, r)) => {
                let r = self.expect(r, '(')?;
                let r = self.expect(r, ')')?;
                (r, format!("{w}()"))
            }
            None => {
                let (r, text) = alt((hex_number, decimal))(rest)
                    .map_err(|_: nom::Err<nom::error::Error<&str>>| {
                        self.error(rest, "expected timestamp after @")
                    })?;
                (r, text.to_owned())
            }
        };
        let end = self.offset(rest);
        let (slot, pos) = match &mut expr {
            Expr::VectorSelector(vs) => (&mut vs.at, &mut vs.pos),
            Expr::MatrixSelector(ms) => (&mut ms.selector.at, &mut ms.pos),
            Expr::Subquery(sq) => (&mut sq.at, &mut sq.pos),
            _ => {
                return Err(self.error(
                    at,
                    "@ modifier must be preceded by an instant vector selector or range vector selector or a subquery",
                ));
            }
        };
        if slot.is_some() {
            return Err(self.error(at, "@ <timestamp> may not be set multiple times"));
        }
        *slot = Some(value);
        pos.end = end;
        Ok((rest, expr))
    }

    // -----------------------------------------------------------------------
    // Atoms
    // -----------------------------------------------------------------------

    fn atom(&self, input: &'a str) -> PResult<'a, Expr> {
        let input = skip_ws(input);
        let start = self.offset(input);
        match input.chars().next() {
            None => Err(self.error(input, "unexpected end of input")),
            Some('(') => {
                let (rest, inner) = self.expr(&input[1..])?;
                let rest = self.expect(rest, ')')?;
                Ok((
                    rest,
                    Expr::Paren {
                        expr: Box::new(inner),
                        pos: PosRange::new(start, self.offset(rest)),
                    },
                ))
            }
            Some('"' | '\'' | '`') => {
                let (rest, value) = self.string(input)?;
                Ok((
                    rest,
                    Expr::StringLiteral {
                        value,
                        pos: PosRange::new(start, self.offset(rest)),
                    },
                ))
            }
            Some('{') => self.selector(input, None, start),
            Some(c) if c.is_ascii_digit() || c == '.' => self.number(input),
            Some(_) => self.identifier_atom(input),
        }
    }

    fn number(&self, input: &'a str) -> PResult<'a, Expr> {
        let start = self.offset(input);
        let (rest, text) = alt((hex_number, decimal))(input)
            .map_err(|_: nom::Err<nom::error::Error<&str>>| self.error(input, "invalid number"))?;
        if rest.chars().next().is_some_and(is_ident_char) {
            return Err(self.error(input, "bad number or duration syntax"));
        }
        let value = number_value(text).ok_or_else(|| self.error(input, "invalid number"))?;
        Ok((
            rest,
            Expr::NumberLiteral {
                value,
                pos: PosRange::new(start, self.offset(rest)),
            },
        ))
    }

    fn identifier_atom(&self, input: &'a str) -> PResult<'a, Expr> {
        let start = self.offset(input);
        let Ok((rest, name)) = metric_identifier(input) else {
            return Err(self.unexpected(input));
        };
        let pos = PosRange::new(start, self.offset(rest));
        if name.eq_ignore_ascii_case("inf") || name.eq_ignore_ascii_case("nan") {
            let value = if name.eq_ignore_ascii_case("inf") {
                f64::INFINITY
            } else {
                f64::NAN
            };
            return Ok((rest, Expr::NumberLiteral { value, pos }));
        }

        let next = skip_ws(rest);
        if let Some(op) = AggregateOp::from_name(name) {
            if next.starts_with('(') || grouping_keyword(next).is_some() {
                return self.aggregate(next, op, start);
            }
        }
        if next.starts_with('(') {
            return self.call(name, next, start);
        }
        if KEYWORDS.iter().any(|kw| name.eq_ignore_ascii_case(kw)) {
            return Err(ParseError::new(format!("unexpected keyword {name:?}"), pos));
        }
        self.selector(rest, Some(name.to_owned()), start)
    }

    fn string(&self, input: &'a str) -> PResult<'a, String> {
        let mut chars = input.char_indices();
        let quote = match chars.next() {
            Some((_, c @ ('"' | '\'' | '`'))) => c,
            _ => return Err(self.error(input, "expected string")),
        };
        let mut value = String::new();
        while let Some((i, c)) = chars.next() {
            if c == quote {
                return Ok((&input[i + c.len_utf8()..], value));
            }
            if quote != '`' {
                if c == '\n' {
                    break;
                }
                if c == '\\' {
                    let Some((_, escaped)) = chars.next() else {
                        break;
                    };
                    match escaped {
                        'n' => value.push('\n'),
                        't' => value.push('\t'),
                        'r' => value.push('\r'),
                        'a' => value.push('\x07'),
                        'b' => value.push('\x08'),
                        'f' => value.push('\x0c'),
                        'v' => value.push('\x0b'),
                        '\\' | '"' | '\'' => value.push(escaped),
                        other => {
                            value.push('\\');
                            value.push(other);
                        }
                    }
                    continue;
                }
            }
            value.push(c);
        }
        Err(self.error(input, "unterminated quoted string"))
    }

    fn label_name(&self, input: &'a str) -> PResult<'a, String> {
        if input.starts_with('"') || input.starts_with('\'') {
            return self.string(input);
        }
        identifier(input)
            .map(|(rest, name)| (rest, name.to_owned()))
            .map_err(|_| self.error(input, "expected label name"))
    }

    /// Parse `( label, ... )`.
    fn label_list(&self, input: &'a str) -> PResult<'a, Vec<String>> {
        let mut rest = self.expect(input, '(')?;
        let mut labels = Vec::new();
        loop {
            rest = skip_ws(rest);
            if let Some(r) = rest.strip_prefix(')') {
                return Ok((r, labels));
            }
            let (r, name) = self.label_name(rest)?;
            labels.push(name);
            rest = skip_ws(r);
            if let Some(r) = rest.strip_prefix(',') {
                rest = r;
                continue;
            }
            if let Some(r) = rest.strip_prefix(')') {
                return Ok((r, labels));
            }
            return Err(self.unexpected(rest));
        }
    }

    // -----------------------------------------------------------------------
    // Selectors
    // -----------------------------------------------------------------------

    fn selector(&self, input: &'a str, name: Option<String>, start: usize) -> PResult<'a, Expr> {
        let mut rest = input;
        let mut matchers = Vec::new();
        let brace = skip_ws(input);
        if brace.starts_with('{') {
            let (r, m) = self.matchers(brace)?;
            rest = r;
            matchers = m;
        }
        let pos = PosRange::new(start, self.offset(rest));
        validate_selector(name.as_deref(), &matchers, pos)?;
        Ok((
            rest,
            Expr::VectorSelector(VectorSelector {
                name,
                matchers,
                offset: None,
                at: None,
                pos,
            }),
        ))
    }

    fn matchers(&self, input: &'a str) -> PResult<'a, Vec<LabelMatcher>> {
        let mut rest = &input[1..];
        let mut matchers = Vec::new();
        loop {
            rest = skip_ws(rest);
            if let Some(r) = rest.strip_prefix('}') {
                return Ok((r, matchers));
            }
            let (r, name) = self.label_name(rest)?;
            let r = skip_ws(r);
            let (r, op) =
                match_op(r).ok_or_else(|| self.error(r, "expected label matching operator"))?;
            let (r, value) = self.string(skip_ws(r))?;
            matchers.push(LabelMatcher { name, op, value });
            rest = skip_ws(r);
            if let Some(r) = rest.strip_prefix(',') {
                rest = r;
                continue;
            }
            if let Some(r) = rest.strip_prefix('}') {
                return Ok((r, matchers));
            }
            return Err(self.unexpected(rest));
        }
    }

    // -----------------------------------------------------------------------
    // Calls and aggregations
    // -----------------------------------------------------------------------

    fn call_args(&self, input: &'a str) -> PResult<'a, Vec<Expr>> {
        let mut rest = self.expect(input, '(')?;
        let mut args = Vec::new();
        if let Some(r) = skip_ws(rest).strip_prefix(')') {
            return Ok((r, args));
        }
        loop {
            let (r, arg) = self.expr(rest)?;
            args.push(arg);
            let r = skip_ws(r);
            if let Some(r) = r.strip_prefix(',') {
                rest = r;
                continue;
            }
            let r = self.expect(r, ')')?;
            return Ok((r, args));
        }
    }

    fn call(&self, name: &str, open: &'a str, start: usize) -> PResult<'a, Expr> {
        let Some(func) = functions::lookup(name) else {
            return Err(ParseError::new(
                format!("unknown function with name {name:?}"),
                PosRange::new(start, start + name.len()),
            ));
        };
        let (rest, args) = self.call_args(open)?;
        let pos = PosRange::new(start, self.offset(rest));

        let (min, max) = func.arity();
        if args.len() < min || max.is_some_and(|max| args.len() > max) {
            let expected = match max {
                Some(max) if max == min => min.to_string(),
                Some(max) => format!("between {min} and {max}"),
                None => format!("at least {min}"),
            };
            return Err(ParseError::new(
                format!(
                    "expected {expected} argument(s) in call to {name:?}, got {}",
                    args.len()
                ),
                pos,
            ));
        }
        for (i, arg) in args.iter().enumerate() {
            let Some(want) = func.arg_type(i) else {
                continue;
            };
            let got = arg.value_type();
            if got != want {
                return Err(ParseError::new(
                    format!("expected type {want} in call to function {name:?}, got {got}"),
                    arg.pos(),
                ));
            }
        }
        Ok((
            rest,
            Expr::Call(Call {
                func: func.name.to_owned(),
                args,
                pos,
            }),
        ))
    }

    fn grouping(&self, input: &'a str) -> PResult<'a, Grouping> {
        let start = self.offset(input);
        let Some((after_kw, mode)) = grouping_keyword(input) else {
            return Err(self.error(input, "expected \"by\" or \"without\""));
        };
        let (rest, labels) = self.label_list(after_kw)?;
        Ok((
            rest,
            Grouping {
                mode,
                labels,
                pos: PosRange::new(start, self.offset(rest)),
            },
        ))
    }

    fn aggregate(&self, input: &'a str, op: AggregateOp, start: usize) -> PResult<'a, Expr> {
        let mut rest = input;
        let mut grouping = None;
        if grouping_keyword(rest).is_some() {
            let (r, g) = self.grouping(rest)?;
            grouping = Some(g);
            rest = skip_ws(r);
        }
        let (mut rest, args) = self.call_args(rest)?;
        let after = skip_ws(rest);
        if grouping_keyword(after).is_some() {
            if grouping.is_some() {
                return Err(self.error(
                    after,
                    "aggregation must only contain one grouping clause",
                ));
            }
            let (r, g) = self.grouping(after)?;
            grouping = Some(g);
            rest = r;
        }
        let pos = PosRange::new(start, self.offset(rest));

        let expected = if op.param_type().is_some() { 2 } else { 1 };
        if args.len() != expected {
            return Err(ParseError::new(
                format!(
                    "wrong number of arguments for aggregate expression provided, expected {expected}, got {}",
                    args.len()
                ),
                pos,
            ));
        }
        let mut args = args.into_iter();
        let param = if expected == 2 { args.next() } else { None };
        let Some(expr) = args.next() else {
            return Err(ParseError::new("missing aggregation argument", pos));
        };
        if let (Some(param), Some(want)) = (&param, op.param_type()) {
            let got = param.value_type();
            if got != want {
                return Err(ParseError::new(
                    format!("expected type {want} in aggregation parameter, got {got}"),
                    param.pos(),
                ));
            }
        }
        let got = expr.value_type();
        if got != ValueType::Vector {
            return Err(ParseError::new(
                format!("expected type instant vector in aggregation expression, got {got}"),
                expr.pos(),
            ));
        }
        Ok((
            rest,
            Expr::Aggregate(AggregateExpr {
                op,
                expr: Box::new(expr),
                param: param.map(Box::new),
                grouping,
                pos,
            }),
        ))
    }
}

fn validate_selector(
    name: Option<&str>,
    matchers: &[LabelMatcher],
    pos: PosRange,
) -> Result<(), ParseError> {
    for m in matchers {
        if matches!(m.op, MatchOp::Regex | MatchOp::NotRegex) {
            anchored_regex(&m.value).map_err(|e| {
                ParseError::new(
                    format!("invalid regular expression in label matcher {m}: {e}"),
                    pos,
                )
            })?;
        }
    }
    if let Some(name) = name {
        if matchers.iter().any(|m| m.name == METRIC_NAME) {
            return Err(ParseError::new(
                format!("metric name must not be set twice: {name:?}"),
                pos,
            ));
        }
    } else if matchers.iter().all(|m| m.matches("")) {
        return Err(ParseError::new(
            "vector selector must contain at least one non-empty matcher",
            pos,
        ));
    }
    Ok(())
}
