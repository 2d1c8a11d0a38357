//! Prometheus rule file reader.
//!
//! Parses alerting and recording rules from YAML and records where each
//! rule and its query live in the file, so problems found in a query can
//! be reported against file lines.

pub mod comments;
pub mod error;
mod lines;
pub mod model;
mod parser;
mod reader;

pub use comments::{InvalidComment, Snooze};
pub use error::RulesError;
pub use model::{LineRange, Rule, RuleFile, RuleGroup, RuleKind};
pub use parser::parse_rules;
pub use reader::{find_rule_files, read_file};
