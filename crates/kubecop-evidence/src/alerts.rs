//! Alertmanager active-alert queries
//!
//! A failed fetch is logged with a category and reported as `None`, so
//! callers can tell "could not fetch" apart from "no alerts".

use std::collections::BTreeMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, error};

use kubecop_common::config::normalize_base_url;
use kubecop_common::Error;

/// One currently firing alert
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AlertRecord {
    /// Alert labels; `alertname` names the alert
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    /// Alert annotations
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
    /// Alertmanager fingerprint
    #[serde(default)]
    pub fingerprint: Option<String>,
}

impl AlertRecord {
    /// Value of the `alertname` label
    pub fn name(&self) -> Option<&str> {
        self.label("alertname")
    }

    /// Value of a label
    pub fn label(&self, key: &str) -> Option<&str> {
        self.labels.get(key).map(String::as_str)
    }
}

/// Keep alerts whose `label` equals `value` exactly; alerts without the label are dropped
pub fn filter(alerts: &[AlertRecord], label: &str, value: &str) -> Vec<AlertRecord> {
    alerts
        .iter()
        .filter(|a| a.label(label) == Some(value))
        .cloned()
        .collect()
}

/// Client for Alertmanager's v2 API
#[derive(Debug, Clone)]
pub struct AlertQueryClient {
    client: reqwest::Client,
    base_url: String,
}

impl AlertQueryClient {
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

    /// Currently active alerts, or `None` when the aggregator could not be queried
    pub async fn list_active(&self) -> Option<Vec<AlertRecord>> {
        match self.fetch_active().await {
            Ok(alerts) => {
                debug!(count = alerts.len(), "Fetched active alerts");
                Some(alerts)
            }
            Err(e) => {
                error!(error = %e, "Could not fetch active alerts");
                None
            }
        }
    }

    async fn fetch_active(&self) -> Result<Vec<AlertRecord>, Error> {
        let url = format!("{}/api/v2/alerts", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[("active", "true")])
            .send()
            .await
            .map_err(categorize)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::alert_fetch("http", format!("{url} returned {status}")));
        }

        response.json().await.map_err(categorize)
    }
}

fn categorize(e: reqwest::Error) -> Error {
    let category = if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connect"
    } else if e.is_decode() {
        "decode"
    } else if e.is_status() {
        "http"
    } else {
        "other"
    };
    Error::alert_fetch(category, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_server::serve;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;

    fn alert(labels: &[(&str, &str)]) -> AlertRecord {
        AlertRecord {
            labels: labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn filter_matches_exact_label_value() {
        let alerts = vec![
            alert(&[("namespace", "ns1"), ("rule_name", "a")]),
            alert(&[("namespace", "ns10")]),
            alert(&[("rule_name", "no-namespace")]),
            alert(&[("namespace", "ns1"), ("rule_name", "b")]),
        ];
        let matched = filter(&alerts, "namespace", "ns1");
        assert_eq!(matched.len(), 2);
        assert!(matched.iter().all(|a| a.label("namespace") == Some("ns1")));
    }

    #[test]
    fn filter_empty_input_is_empty() {
        assert!(filter(&[], "namespace", "ns1").is_empty());
    }

    #[tokio::test]
    async fn list_active_parses_alerts() {
        let router = Router::new().route(
            "/api/v2/alerts",
            get(|| async {
                axum::Json(serde_json::json!([
                    {
                        "labels": {
                            "alertname": "KubeCopRuleViolated",
                            "namespace": "kubecop-test-abcd",
                            "rule_name": "Unexpected process launched"
                        },
                        "annotations": { "summary": "touch" },
                        "fingerprint": "5b3c",
                        "status": { "state": "active" }
                    }
                ]))
            }),
        );
        let base = serve(router).await;

        let client = AlertQueryClient::new(&format!("{base}/"), Duration::from_secs(5)).unwrap();
        let alerts = client.list_active().await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].name(), Some("KubeCopRuleViolated"));
        assert_eq!(alerts[0].fingerprint.as_deref(), Some("5b3c"));
    }

    #[tokio::test]
    async fn empty_array_is_some_empty() {
        let router = Router::new().route(
            "/api/v2/alerts",
            get(|| async { axum::Json(serde_json::json!([])) }),
        );
        let base = serve(router).await;

        let client = AlertQueryClient::new(&base, Duration::from_secs(5)).unwrap();
        assert_eq!(client.list_active().await, Some(vec![]));
    }

    #[tokio::test]
    async fn server_error_is_none() {
        let router = Router::new().route(
            "/api/v2/alerts",
            get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "down") }),
        );
        let base = serve(router).await;

        let client = AlertQueryClient::new(&base, Duration::from_secs(5)).unwrap();
        assert_eq!(client.list_active().await, None);
    }

    #[tokio::test]
    async fn unreachable_aggregator_is_none() {
        // bind then drop to get a port nothing listens on
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client =
            AlertQueryClient::new(&format!("http://{addr}"), Duration::from_secs(2)).unwrap();
        assert_eq!(client.list_active().await, None);
    }
}
