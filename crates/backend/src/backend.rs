use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::BackendError;

/// Metric type as reported by metric metadata.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetricType {
    Counter,
    Gauge,
    Histogram,
    #[serde(rename = "gaugehistogram")]
    GaugeHistogram,
    Summary,
    Info,
    #[serde(rename = "stateset")]
    StateSet,
    Unknown,
}

impl fmt::Display for MetricType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Counter => "counter",
            Self::Gauge => "gauge",
            Self::Histogram => "histogram",
            Self::GaugeHistogram => "gaugehistogram",
            Self::Summary => "summary",
            Self::Info => "info",
            Self::StateSet => "stateset",
            Self::Unknown => "unknown",
        };
        f.write_str(s)
    }
}

/// A live source of facts about the monitored metrics.
///
/// Online checks ask the backend questions that the rule text alone cannot
/// answer. Implementations must be safe to call from many tasks at once.
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Name used in reports.
    fn name(&self) -> &str;

    /// Labels the backend attaches to every series it sends out.
    async fn external_labels(&self) -> Result<BTreeMap<String, String>, BackendError>;

    /// Types recorded in metadata for `metric`. Empty when the metric has
    /// no metadata.
    async fn metric_types(&self, metric: &str) -> Result<Vec<MetricType>, BackendError>;
}
