use std::path::PathBuf;

use anyhow::Context;
use clap::Args;
use promlint_checks::Severity;
use tracing::info;

use crate::OutputFormat;
use crate::config::Config;
use crate::runner::{self, Report};

#[derive(Args, Debug)]
pub struct LintArgs {
    /// Rule files or directories to lint.
    #[arg(required = true)]
    pub paths: Vec<PathBuf>,

    /// Only report problems at or above this severity.
    #[arg(long)]
    pub min_severity: Option<Severity>,
}

/// Lint the given paths and print the report. Returns true when a
/// problem reached the configured failure threshold.
pub async fn run(config: &Config, args: &LintArgs, format: &OutputFormat) -> anyhow::Result<bool> {
    let checks = config.checks().context("cannot set up checks")?;
    let reports = runner::lint(&args.paths, checks, config.lint.workers)
        .await
        .context("cannot read rule files")?;

    let min_severity = args.min_severity.unwrap_or(config.lint.min_severity);
    let shown: Vec<&Report> = reports
        .iter()
        .filter(|r| r.problem.severity >= min_severity)
        .collect();
    let failed = reports
        .iter()
        .any(|r| r.problem.severity >= config.lint.fail_on);

    match format {
        OutputFormat::Json => {
            println!("{}", serde_json::to_string_pretty(&shown)?);
        }
        OutputFormat::Text => {
            for report in &shown {
                print!("{}", report.rendered);
            }
            println!("{}", summary(&shown));
        }
    }
    info!(problems = reports.len(), shown = shown.len(), failed, "lint finished");
    Ok(failed)
}

fn summary(reports: &[&Report]) -> String {
    if reports.is_empty() {
        return "No problems found.".to_owned();
    }
    let counts: Vec<String> = [
        Severity::Fatal,
        Severity::Bug,
        Severity::Warning,
        Severity::Information,
    ]
    .into_iter()
    .filter_map(|severity| {
        let count = reports
            .iter()
            .filter(|r| r.problem.severity == severity)
            .count();
        (count > 0).then(|| format!("{count} {}", severity.as_str()))
    })
    .collect();
    format!("Found {} problem(s): {}.", reports.len(), counts.join(", "))
}

#[cfg(test)]
mod tests {
    use promlint_checks::Problem;
    use promlint_rules::LineRange;

    use super::*;

    fn report(severity: Severity) -> Report {
        Report {
            path: PathBuf::from("rules.yml"),
            rule: None,
            problem: Problem::new("promql/impossible", "x", severity, LineRange::single(1)),
            rendered: String::new(),
        }
    }

    #[test]
    fn summary_counts() {
        assert_eq!(summary(&[]), "No problems found.");
        let reports = [
            report(Severity::Warning),
            report(Severity::Bug),
            report(Severity::Warning),
        ];
        let refs: Vec<&Report> = reports.iter().collect();
        assert_eq!(summary(&refs), "Found 3 problem(s): 1 bug, 2 warning.");
    }
}
