//! Label provenance and dead-code analysis for PromQL queries.
//!
//! [`build`] turns a parsed query into a tree of [`ProvenanceNode`]s that
//! mirrors the expression. Every node records which labels its results are
//! guaranteed to carry, which labels are provably absent (and which part of
//! the query removes them), whether the node can ever return anything, and
//! the `or` alternatives that may produce its results instead.
//!
//! Trees are immutable once built and hold no references into the query,
//! so they can be shared freely between checks and threads.

mod build;
mod dead;
pub mod fragment;
mod join;
mod labels;
mod node;
mod walk;

pub use build::build;
pub use fragment::{find_clause, fragment_at};
pub use labels::{ExcludedLabel, LabelSet};
pub use node::{
    Combinator, DeadInfo, JoinMismatch, JoinSide, NodeKind, Operation, OperationDetail,
    ProvenanceNode,
};
