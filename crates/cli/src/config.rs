use std::collections::BTreeMap;
use std::num::NonZeroUsize;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use promlint_backend::{CachedBackend, MetricType, MetricsBackend, StaticBackend};
use promlint_checks::checks::{
    AggregateCheck, CounterCheck, ExternalLabelsCheck, FragileCheck, ImpossibleCheck, ReuseCheck,
    SelectorCheck, SyntaxCheck, TemplateCheck,
};
use promlint_checks::{CHECK_NAMES, RuleChecker, Severity};
use promlint_promql::anchored_regex;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// Configuration file used when `--config` is not given.
pub const DEFAULT_CONFIG_PATH: &str = ".promlint.toml";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid regex `{pattern}` in {section}: {source}")]
    Regex {
        section: String,
        pattern: String,
        #[source]
        source: regex::Error,
    },

    #[error("unknown check `{0}` in lint.disabled")]
    UnknownCheck(String),

    #[error("lint.workers must be at least 1")]
    NoWorkers,
}

/// Top-level configuration, loaded from a TOML file.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub lint: LintConfig,
    /// Enables the checks that need a metrics backend.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,
    /// Labels that aggregations must keep or strip.
    #[serde(default)]
    pub aggregate: Vec<AggregateConfig>,
    /// Label matchers that selectors must use.
    #[serde(default)]
    pub selector: Vec<SelectorConfig>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct LintConfig {
    /// Problems below this severity are not reported.
    #[serde(default = "default_min_severity")]
    pub min_severity: Severity,
    /// Problems at or above this severity make the run fail.
    #[serde(default = "default_fail_on")]
    pub fail_on: Severity,
    /// Number of rules checked at the same time.
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Names of checks that never run.
    #[serde(default)]
    pub disabled: Vec<String>,
}

impl Default for LintConfig {
    fn default() -> Self {
        Self {
            min_severity: default_min_severity(),
            fail_on: default_fail_on(),
            workers: default_workers(),
            disabled: Vec::new(),
        }
    }
}

fn default_min_severity() -> Severity {
    Severity::Information
}

fn default_fail_on() -> Severity {
    Severity::Bug
}

fn default_workers() -> usize {
    std::thread::available_parallelism().map_or(1, NonZeroUsize::get)
}

/// A backend described directly in the configuration file.
///
/// ```toml
/// [backend]
/// name = "prom"
///
/// [backend.external_labels]
/// cluster = "eu-1"
///
/// [backend.metadata]
/// http_requests_total = "counter"
/// ```
#[derive(Debug, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(default = "default_backend_name")]
    pub name: String,
    /// Unset means the backend cannot report external labels.
    #[serde(default)]
    pub external_labels: Option<BTreeMap<String, String>>,
    /// Metric name to metric type.
    #[serde(default)]
    pub metadata: BTreeMap<String, MetricType>,
}

fn default_backend_name() -> String {
    "prometheus".to_owned()
}

#[derive(Debug, Serialize, Deserialize)]
pub struct AggregateConfig {
    /// Only rules with a matching name are checked.
    #[serde(default)]
    pub name: Option<String>,
    pub label: String,
    /// Keep the label when true, strip it when false.
    #[serde(default = "default_keep")]
    pub keep: bool,
    #[serde(default = "default_aggregate_severity")]
    pub severity: Severity,
}

fn default_keep() -> bool {
    true
}

fn default_aggregate_severity() -> Severity {
    Severity::Warning
}

#[derive(Debug, Serialize, Deserialize)]
pub struct SelectorConfig {
    /// Metric names this requirement applies to.
    pub key: String,
    pub label: String,
    /// Only selectors passed to a matching function are checked.
    #[serde(default)]
    pub call: Option<String>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default = "default_selector_severity")]
    pub severity: Severity,
}

fn default_selector_severity() -> Severity {
    Severity::Bug
}

fn compile(section: &str, pattern: &str) -> Result<Regex, ConfigError> {
    anchored_regex(pattern).map_err(|source| ConfigError::Regex {
        section: section.to_owned(),
        pattern: pattern.to_owned(),
        source,
    })
}

impl Config {
    /// Load the configuration from `path`, or from
    /// [`DEFAULT_CONFIG_PATH`] when no path is given. A missing default
    /// file yields the default configuration.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let (path, explicit) = match path {
            Some(path) => (path.to_path_buf(), true),
            None => (PathBuf::from(DEFAULT_CONFIG_PATH), false),
        };
        if !explicit && !path.exists() {
            debug!(path = %path.display(), "config file not found, using defaults");
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        let config = Self::parse(&contents).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        config.validate()?;
        debug!(path = %path.display(), "config loaded");
        Ok(config)
    }

    pub fn parse(contents: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(contents)
    }

    /// Reject settings that would only fail once linting starts.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lint.workers == 0 {
            return Err(ConfigError::NoWorkers);
        }
        if let Some(name) = self
            .lint
            .disabled
            .iter()
            .find(|name| !CHECK_NAMES.contains(&name.as_str()))
        {
            return Err(ConfigError::UnknownCheck(name.clone()));
        }
        self.checks().map(|_| ())
    }

    fn backend(&self) -> Option<Arc<dyn MetricsBackend>> {
        let config = self.backend.as_ref()?;
        let mut backend = StaticBackend::new(&config.name);
        if let Some(labels) = &config.external_labels {
            backend = backend.with_external_labels(labels.clone());
        }
        for (metric, metric_type) in &config.metadata {
            backend = backend.with_metric_type(metric, *metric_type);
        }
        Some(Arc::new(CachedBackend::new(backend)))
    }

    fn is_enabled(&self, name: &str) -> bool {
        !self.lint.disabled.iter().any(|disabled| disabled == name)
    }

    /// Every enabled check, in the order they run.
    pub fn checks(&self) -> Result<Vec<Arc<dyn RuleChecker>>, ConfigError> {
        let mut checks: Vec<Arc<dyn RuleChecker>> = vec![Arc::new(SyntaxCheck::new())];
        for aggregate in &self.aggregate {
            let name = aggregate
                .name
                .as_deref()
                .map(|pattern| compile("aggregate.name", pattern))
                .transpose()?;
            checks.push(Arc::new(AggregateCheck::new(
                name,
                &aggregate.label,
                aggregate.keep,
                aggregate.severity,
            )));
        }
        checks.push(Arc::new(TemplateCheck::new()));
        for selector in &self.selector {
            let call = selector
                .call
                .as_deref()
                .map(|pattern| compile("selector.call", pattern))
                .transpose()?;
            checks.push(Arc::new(SelectorCheck::new(
                compile("selector.key", &selector.key)?,
                call,
                &selector.label,
                selector.comment.clone(),
                selector.severity,
            )));
        }
        checks.push(Arc::new(ImpossibleCheck::new()));
        checks.push(Arc::new(FragileCheck::new()));
        checks.push(Arc::new(ReuseCheck::new()));
        if let Some(backend) = self.backend() {
            checks.push(Arc::new(ExternalLabelsCheck::new(Arc::clone(&backend))));
            checks.push(Arc::new(CounterCheck::new(backend)));
        }
        checks.retain(|check| self.is_enabled(check.name()));
        Ok(checks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(config: &Config) -> Vec<&'static str> {
        config.checks().unwrap().iter().map(|c| c.name()).collect()
    }

    #[test]
    fn defaults() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.lint.min_severity, Severity::Information);
        assert_eq!(config.lint.fail_on, Severity::Bug);
        assert!(config.lint.workers >= 1);
        assert!(config.backend.is_none());
        assert_eq!(
            names(&config),
            vec![
                "promql/syntax",
                "alerts/template",
                "promql/impossible",
                "promql/fragile",
                "rule/reuse"
            ]
        );
    }

    #[test]
    fn full_config() {
        let config = Config::parse(
            r#"
            [lint]
            min_severity = "warning"
            fail_on = "fatal"
            workers = 2
            disabled = ["rule/reuse"]

            [backend]
            name = "prom"
            external_labels = { cluster = "eu-1" }
            metadata = { http_requests_total = "counter" }

            [[aggregate]]
            name = "job:.+"
            label = "job"
            severity = "bug"

            [[aggregate]]
            label = "instance"
            keep = false

            [[selector]]
            key = "http_.*"
            label = "job"
            comment = "every service sets job"
            "#,
        )
        .unwrap();
        config.validate().unwrap();
        assert_eq!(config.lint.min_severity, Severity::Warning);
        assert_eq!(config.lint.workers, 2);
        assert_eq!(config.aggregate.len(), 2);
        assert!(config.aggregate[0].keep);
        assert!(!config.aggregate[1].keep);
        assert_eq!(config.selector[0].severity, Severity::Bug);
        let backend = config.backend.as_ref().unwrap();
        assert_eq!(backend.metadata["http_requests_total"], MetricType::Counter);
        assert_eq!(
            names(&config),
            vec![
                "promql/syntax",
                "promql/aggregate",
                "promql/aggregate",
                "alerts/template",
                "promql/selector",
                "promql/impossible",
                "promql/fragile",
                "alerts/external_labels",
                "promql/counter"
            ]
        );
    }

    #[test]
    fn invalid_settings() {
        let config = Config::parse("[[selector]]\nkey = \"(\"\nlabel = \"job\"\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::Regex { .. })));

        let config = Config::parse("[lint]\ndisabled = [\"promql/nope\"]\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::UnknownCheck(name)) if name == "promql/nope"));

        let config = Config::parse("[lint]\nworkers = 0\n").unwrap();
        assert!(matches!(config.validate(), Err(ConfigError::NoWorkers)));

        assert!(Config::parse("[lint]\nfail_on = \"critical\"\n").is_err());
    }

    #[test]
    fn missing_files() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("promlint.toml");
        assert!(matches!(
            Config::load(Some(&missing)),
            Err(ConfigError::Read { .. })
        ));

        std::fs::write(&missing, "[lint]\nworkers = \"many\"\n").unwrap();
        let err = Config::load(Some(&missing)).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("invalid config file"));
    }

    #[test]
    fn error_display_messages() {
        assert_eq!(
            ConfigError::UnknownCheck("x".into()).to_string(),
            "unknown check `x` in lint.disabled"
        );
        assert_eq!(
            ConfigError::NoWorkers.to_string(),
            "lint.workers must be at least 1"
        );
    }
}
