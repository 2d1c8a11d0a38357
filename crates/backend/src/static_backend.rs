use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;

use crate::backend::{MetricType, MetricsBackend};
use crate::error::BackendError;

/// A backend that answers from fixed data, usually taken from the
/// configuration file.
#[derive(Debug, Clone, Default)]
pub struct StaticBackend {
    name: String,
    external_labels: Option<BTreeMap<String, String>>,
    metric_types: HashMap<String, Vec<MetricType>>,
}

impl StaticBackend {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_external_labels(mut self, labels: BTreeMap<String, String>) -> Self {
        self.external_labels = Some(labels);
        self
    }

    #[must_use]
    pub fn with_metric_type(mut self, metric: impl Into<String>, metric_type: MetricType) -> Self {
        self.metric_types
            .entry(metric.into())
            .or_default()
            .push(metric_type);
        self
    }
}

#[async_trait]
impl MetricsBackend for StaticBackend {
    fn name(&self) -> &str {
        &self.name
    }

    async fn external_labels(&self) -> Result<BTreeMap<String, String>, BackendError> {
        self.external_labels
            .clone()
            .ok_or_else(|| BackendError::Unsupported {
                backend: self.name.clone(),
                what: "external labels".into(),
            })
    }

    async fn metric_types(&self, metric: &str) -> Result<Vec<MetricType>, BackendError> {
        Ok(self.metric_types.get(metric).cloned().unwrap_or_default())
    }
}
