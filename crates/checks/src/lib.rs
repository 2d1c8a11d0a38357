//! Rule checks for promlint.
//!
//! Each check implements [`RuleChecker`] and inspects one [`ParsedRule`]
//! at a time. Rules are parsed and their label provenance is computed once
//! when a [`ParsedRule`] is created, so checks only read shared data.
//! Checks report [`Problem`]s, which [`render_problem`] turns into text.

mod checker;
pub mod checks;
mod entry;
mod problem;
mod render;
pub mod template;

#[cfg(test)]
mod testing;

pub use checker::RuleChecker;
pub use checks::CHECK_NAMES;
pub use entry::ParsedRule;
pub use problem::{
    Diagnostic, DiagnosticKind, DiagnosticTarget, Problem, Severity, UnknownSeverity,
};
pub use render::render_problem;
