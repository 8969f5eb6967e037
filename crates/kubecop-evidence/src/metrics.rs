//! Prometheus range queries
//!
//! Only the first series of a result is ever used: every query here groups
//! by a single dimension and the target is expected to come first.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Deserialize;
use tracing::debug;

use kubecop_common::config::normalize_base_url;
use kubecop_common::Error;

/// Upper bound on points per window when the step is derived
const TARGET_POINTS: u32 = 250;

/// Step for a `[start, end]` window: window / 250, at least one second
pub fn default_step(start: DateTime<Utc>, end: DateTime<Utc>) -> Duration {
    let window = (end - start).to_std().unwrap_or_default();
    (window / TARGET_POINTS).max(Duration::from_secs(1))
}

/// CPU cores used by each pod of a workload (daemonset) in a namespace
pub fn workload_cpu_query(namespace: &str, workload: &str) -> String {
    format!(
        r#"sum(
    node_namespace_pod_container:container_cpu_usage_seconds_total:sum_irate{{cluster="", namespace="{namespace}"}}
  * on(namespace,pod)
    group_left(workload, workload_type) namespace_workload_pod:kube_pod_owner:relabel{{cluster="", namespace="{namespace}", workload="{workload}", workload_type=~"daemonset"}}
) by (pod)"#
    )
}

/// Working-set bytes of each pod of a workload (daemonset) in a namespace
pub fn workload_memory_query(namespace: &str, workload: &str) -> String {
    format!(
        r#"sum(
    container_memory_working_set_bytes{{job="kubelet", metrics_path="/metrics/cadvisor", cluster="", namespace="{namespace}", container!="", image!=""}}
  * on(namespace,pod)
    group_left(workload, workload_type) namespace_workload_pod:kube_pod_owner:relabel{{cluster="", namespace="{namespace}", workload="{workload}", workload_type=~"daemonset"}}
) by (pod)"#
    )
}

/// Working-set bytes of a single pod, per container
pub fn pod_memory_query(pod: &str) -> String {
    format!(r#"sum(container_memory_working_set_bytes{{pod="{pod}"}}) by (container)"#)
}

/// One row of a matrix result
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct RangeRow {
    /// Series labels
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    /// `[unix_seconds, "value"]` samples
    #[serde(default)]
    pub values: Vec<(f64, String)>,
}

#[derive(Debug, Deserialize)]
struct RangeResponse {
    status: String,
    #[serde(default)]
    data: Option<RangeData>,
    #[serde(default, rename = "errorType")]
    error_type: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RangeData {
    #[serde(default)]
    result: Vec<RangeRow>,
}

/// Ordered (unix seconds, value) samples
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricSeries {
    /// Samples in timestamp order
    pub points: Vec<(f64, f64)>,
}

impl MetricSeries {
    /// Build a series from already-ordered points
    pub fn new(points: Vec<(f64, f64)>) -> Self {
        Self { points }
    }

    /// Sample timestamps
    pub fn timestamps(&self) -> Vec<f64> {
        self.points.iter().map(|(t, _)| *t).collect()
    }

    /// Sample values
    pub fn values(&self) -> Vec<f64> {
        self.points.iter().map(|(_, v)| *v).collect()
    }

    /// Number of samples
    pub fn len(&self) -> usize {
        self.points.len()
    }

    /// No samples
    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Arithmetic mean of the values
    pub fn mean(&self) -> Option<f64> {
        if self.points.is_empty() {
            return None;
        }
        Some(self.points.iter().map(|(_, v)| v).sum::<f64>() / self.points.len() as f64)
    }
}

/// Client for Prometheus' HTTP API
#[derive(Debug, Clone)]
pub struct MetricsQueryClient {
    client: reqwest::Client,
    base_url: String,
}

impl MetricsQueryClient {
    /// Create a client with its own HTTP client
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, Error> {
        Ok(Self::with_client(crate::http_client(timeout)?, base_url))
    }

    /// Create a client sharing an existing HTTP client
    pub fn with_client(client: reqwest::Client, base_url: &str) -> Self {
        Self {
            client,
            base_url: normalize_base_url(base_url),
        }
    }

    /// Run a range query and return its rows.
    ///
    /// A non-success status is [`Error::Query`]; an empty result is [`Error::NoData`].
    pub async fn query_range(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
        step: Duration,
    ) -> Result<Vec<RangeRow>, Error> {
        let url = format!("{}/api/v1/query_range", self.base_url);
        let params = [
            ("query", query.to_string()),
            ("start", unix_seconds(start).to_string()),
            ("end", unix_seconds(end).to_string()),
            ("step", step.as_secs_f64().to_string()),
        ];
        debug!(%start, %end, ?step, "Running range query");

        let response = self
            .client
            .get(&url)
            .query(&params)
            .send()
            .await
            .map_err(|e| Error::query(format!("request to {url} failed: {e}")))?;

        // Prometheus reports query errors with a 4xx/5xx status and a JSON body
        let http_status = response.status();
        let body: RangeResponse = response
            .json()
            .await
            .map_err(|e| Error::query(format!("undecodable response ({http_status}): {e}")))?;

        if body.status != "success" {
            return Err(Error::query(format!(
                "status {}: {} {}",
                body.status,
                body.error_type.unwrap_or_default(),
                body.error.unwrap_or_default()
            )));
        }

        let rows = body.data.map(|d| d.result).unwrap_or_default();
        if rows.is_empty() {
            return Err(Error::no_data(query));
        }
        Ok(rows)
    }

    /// Series of the first row
    pub fn series_for(rows: &[RangeRow]) -> Result<MetricSeries, Error> {
        let row = rows.first().ok_or_else(|| Error::no_data("<empty result>"))?;
        let points = row
            .values
            .iter()
            .map(|(ts, raw)| {
                raw.parse::<f64>()
                    .map(|v| (*ts, v))
                    .map_err(|e| Error::query(format!("bad sample value {raw:?}: {e}")))
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(MetricSeries::new(points))
    }

    /// First series of `query` over the window, with the derived step
    pub async fn series(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<MetricSeries, Error> {
        let rows = self
            .query_range(query, start, end, default_step(start, end))
            .await?;
        Self::series_for(&rows)
    }

    /// Mean of the first series of `query` over the window
    pub async fn average(
        &self,
        query: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<f64, Error> {
        self.series(query, start, end)
            .await?
            .mean()
            .ok_or_else(|| Error::no_data(query))
    }
}

fn unix_seconds(t: DateTime<Utc>) -> f64 {
    t.timestamp_millis() as f64 / 1000.0
}
