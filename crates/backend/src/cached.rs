use std::collections::BTreeMap;

use async_trait::async_trait;
use dashmap::DashMap;
use tracing::debug;

use crate::backend::{MetricType, MetricsBackend};
use crate::error::BackendError;
use crate::lock::KeyLock;

const EXTERNAL_LABELS_KEY: &str = "external_labels";

/// Memoising wrapper around another backend.
///
/// Every answer, including errors, is kept for the lifetime of the
/// wrapper. Concurrent lookups for the same key are serialised with a
/// [`KeyLock`], so the inner backend sees each question at most once.
#[derive(Debug)]
pub struct CachedBackend<B> {
    inner: B,
    lock: KeyLock,
    external_labels: DashMap<(), Result<BTreeMap<String, String>, BackendError>>,
    metric_types: DashMap<String, Result<Vec<MetricType>, BackendError>>,
}

impl<B: MetricsBackend> CachedBackend<B> {
    pub fn new(inner: B) -> Self {
        Self {
            inner,
            lock: KeyLock::new(),
            external_labels: DashMap::new(),
            metric_types: DashMap::new(),
        }
    }

    pub fn inner(&self) -> &B {
        &self.inner
    }
}

#[async_trait]
impl<B: MetricsBackend> MetricsBackend for CachedBackend<B> {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn external_labels(&self) -> Result<BTreeMap<String, String>, BackendError> {
        if let Some(cached) = self.external_labels.get(&()) {
            return cached.clone();
        }
        let _guard = self.lock.lock(EXTERNAL_LABELS_KEY).await;
        if let Some(cached) = self.external_labels.get(&()) {
            return cached.clone();
        }
        debug!(backend = self.inner.name(), "querying external labels");
        let answer = self.inner.external_labels().await;
        self.external_labels.insert((), answer.clone());
        answer
    }

    async fn metric_types(&self, metric: &str) -> Result<Vec<MetricType>, BackendError> {
        if let Some(cached) = self.metric_types.get(metric) {
            return cached.clone();
        }
        let _guard = self.lock.lock(&format!("metadata/{metric}")).await;
        if let Some(cached) = self.metric_types.get(metric) {
            return cached.clone();
        }
        debug!(backend = self.inner.name(), metric, "querying metric metadata");
        let answer = self.inner.metric_types(metric).await;
        self.metric_types.insert(metric.to_owned(), answer.clone());
        answer
    }
}
