//! Run counters pushed to a Prometheus Pushgateway.
//!
//! Counters are cumulative for the life of the process; every flush replaces
//! the worker's group on the gateway with the full current set.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use dispatch::{JobMetric, MetricsError, MetricsSink, TaskName};
use tracing::debug;

/// Pushgateway job label the counters are grouped under.
pub const PUSHGATEWAY_JOB: &str = "steward-worker";

pub struct PushgatewayMetrics {
    client: reqwest::Client,
    url: Option<String>,
    counters: Mutex<BTreeMap<(TaskName, JobMetric), u64>>,
}

impl PushgatewayMetrics {
    /// Pushes to `url`, or only counts when `url` is `None`.
    pub fn new(url: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
            counters: Mutex::new(BTreeMap::new()),
        }
    }

    /// Current value of one counter.
    pub fn count(&self, task_name: &TaskName, metric: JobMetric) -> u64 {
        self.counters
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&(task_name.clone(), metric))
            .copied()
            .unwrap_or(0)
    }

    /// Renders every counter in the Prometheus text exposition format.
    pub fn render(&self) -> String {
        let counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        let mut body = String::new();
        for metric in JobMetric::ALL {
            let mut samples = counters
                .iter()
                .filter(|((_, m), _)| *m == metric)
                .peekable();
            if samples.peek().is_none() {
                continue;
            }
            let _ = writeln!(body, "# TYPE {} counter", metric.name());
            for ((task_name, _), value) in samples {
                let _ = writeln!(
                    body,
                    "{}{{task_name=\"{}\"}} {}",
                    metric.name(),
                    task_name,
                    value
                );
            }
        }
        body
    }
}

#[async_trait]
impl MetricsSink for PushgatewayMetrics {
    fn record(&self, task_name: &TaskName, metric: JobMetric) {
        let mut counters = self.counters.lock().unwrap_or_else(PoisonError::into_inner);
        *counters.entry((task_name.clone(), metric)).or_insert(0) += 1;
    }

    async fn flush(&self) -> Result<(), MetricsError> {
        let Some(url) = &self.url else {
            debug!("No Pushgateway configured, skipping metrics push");
            return Ok(());
        };

        let endpoint = format!("{url}/metrics/job/{PUSHGATEWAY_JOB}");
        let body = self.render();
        self.client
            .put(&endpoint)
            .header("Content-Type", "text/plain; version=0.0.4")
            .body(body)
            .send()
            .await
            .and_then(|response| response.error_for_status())
            .map_err(|e| MetricsError {
                reason: format!("push to {endpoint} failed: {e}"),
            })?;
        debug!(%endpoint, "Metrics pushed");
        Ok(())
    }
}
