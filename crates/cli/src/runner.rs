use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::Utc;
use promlint_checks::{ParsedRule, Problem, RuleChecker, Severity, render_problem};
use promlint_rules::{InvalidComment, LineRange, RulesError, find_rule_files, read_file};
use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Reporter name for files that cannot be read or parsed.
pub const FILE_REPORTER: &str = "yaml/parse";

/// Reporter name for malformed directive comments.
pub const COMMENTS_REPORTER: &str = "promlint/comments";

/// A problem together with where it was found.
#[derive(Debug, Serialize)]
pub struct Report {
    pub path: PathBuf,
    /// Name of the rule, absent for problems with the whole file.
    pub rule: Option<String>,
    #[serde(flatten)]
    pub problem: Problem,
    #[serde(skip)]
    pub rendered: String,
}

impl Report {
    fn for_rule(entry: &ParsedRule, problem: Problem) -> Self {
        Self {
            path: entry.path.clone(),
            rule: Some(entry.rule.name.clone()),
            rendered: render_problem(entry, &problem),
            problem,
        }
    }

    fn for_file(path: &Path, err: &RulesError) -> Self {
        let problem = Problem::new(
            FILE_REPORTER,
            "unable to parse rule file",
            Severity::Fatal,
            LineRange::single(err.line().unwrap_or(1)),
        )
        .with_details(err.to_string());
        Self::without_rule(path, problem)
    }

    fn for_comment(path: &Path, comment: &InvalidComment) -> Self {
        let problem = Problem::new(
            COMMENTS_REPORTER,
            "invalid comment",
            Severity::Warning,
            LineRange::single(comment.line),
        )
        .with_details(format!(
            "This comment is not a valid promlint directive: {}.",
            comment.message
        ));
        Self::without_rule(path, problem)
    }

    fn without_rule(path: &Path, problem: Problem) -> Self {
        let rendered = format!(
            "{}:{} {}: {} ({})\n  {}\n",
            path.display(),
            problem.lines,
            problem.severity,
            problem.summary,
            problem.reporter,
            problem.details.as_deref().unwrap_or_default(),
        );
        Self {
            path: path.to_path_buf(),
            rule: None,
            problem,
            rendered,
        }
    }
}

/// Read every rule file under `paths`, run `checks` against each rule
/// with at most `workers` rules in flight, and return the reports sorted
/// by file and line.
pub async fn lint(
    paths: &[PathBuf],
    checks: Vec<Arc<dyn RuleChecker>>,
    workers: usize,
) -> Result<Vec<Report>, RulesError> {
    let files = find_rule_files(paths)?;
    info!(files = files.len(), checks = checks.len(), "linting rule files");

    let mut reports = Vec::new();
    let mut entries = Vec::new();
    for path in &files {
        match read_file(path) {
            Ok(file) => {
                if file.ignored {
                    info!(path = %path.display(), "rule file excluded by comment");
                }
                reports.extend(
                    file.invalid_comments
                        .iter()
                        .map(|comment| Report::for_comment(path, comment)),
                );
                for group in &file.groups {
                    for rule in &group.rules {
                        entries.push(Arc::new(ParsedRule::new(path, group, rule.clone())));
                    }
                }
            }
            Err(err) => {
                warn!(path = %path.display(), error = %err, "cannot parse rule file");
                reports.push(Report::for_file(path, &err));
            }
        }
    }
    debug!(rules = entries.len(), "rules parsed");

    let entries: Arc<[Arc<ParsedRule>]> = entries.into();
    let checks: Arc<[Arc<dyn RuleChecker>]> = checks.into();
    let now = Utc::now();
    let semaphore = Arc::new(Semaphore::new(workers.max(1)));
    let mut tasks = JoinSet::new();
    for index in 0..entries.len() {
        let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
            break;
        };
        let entries = Arc::clone(&entries);
        let checks = Arc::clone(&checks);
        tasks.spawn(async move {
            let _permit = permit;
            let entry = &entries[index];
            let mut reports = Vec::new();
            for check in checks.iter() {
                let described = check.describe();
                if entry
                    .rule
                    .is_check_disabled(&[check.name(), described.as_str()], now)
                {
                    debug!(rule = %entry.rule.name, check = %described, "check disabled by comment");
                    continue;
                }
                let problems = check.check(entry, &entries).await;
                debug!(
                    rule = %entry.rule.name,
                    check = %check.describe(),
                    problems = problems.len(),
                    "check done"
                );
                reports.extend(problems.into_iter().map(|p| Report::for_rule(entry, p)));
            }
            reports
        });
    }
    while let Some(result) = tasks.join_next().await {
        match result {
            Ok(found) => reports.extend(found),
            Err(err) => warn!(error = %err, "check task failed"),
        }
    }

    reports.sort_by(|a, b| {
        (&a.path, a.problem.lines.first, &a.problem.reporter, &a.problem.summary).cmp(&(
            &b.path,
            b.problem.lines.first,
            &b.problem.reporter,
            &b.problem.summary,
        ))
    });
    Ok(reports)
}
