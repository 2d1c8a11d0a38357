//! PromQL syntax for promlint.
//!
//! This crate provides the query AST (every node carries its byte span in
//! the original query text), a table of known functions, and a
//! hand-written parser built on `nom`.

pub mod ast;
pub mod error;
pub mod functions;
pub mod parser;

pub use ast::{
    AggregateExpr, AggregateOp, BinaryExpr, BinaryOp, Call, Cardinality, Expr, Grouping,
    GroupingMode, LabelMatcher, MatchOp, MatchingMode, MatrixSelector, PosRange, SubqueryExpr,
    UnaryOp, ValueType, VectorMatching, VectorSelector, METRIC_NAME, anchored_regex, format_number,
};
pub use error::ParseError;
pub use parser::parse;
