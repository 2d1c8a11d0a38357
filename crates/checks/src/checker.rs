use std::sync::Arc;

use async_trait::async_trait;

use crate::entry::ParsedRule;
use crate::problem::Problem;

/// A single check run against every rule.
#[async_trait]
pub trait RuleChecker: Send + Sync {
    /// Name reported on problems, such as `promql/aggregate`.
    fn name(&self) -> &'static str;

    /// Name together with the check's settings, for logs and listings.
    fn describe(&self) -> String {
        self.name().to_owned()
    }

    /// Returns true when the check talks to a live backend.
    fn is_online(&self) -> bool {
        false
    }

    /// Check one rule. `siblings` holds every rule being linted, `entry`
    /// included.
    async fn check(&self, entry: &ParsedRule, siblings: &[Arc<ParsedRule>]) -> Vec<Problem>;
}
