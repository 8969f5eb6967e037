//! Externally observed evidence for the KubeCop system tests
//!
//! Scenarios pass or fail on what the agent's surroundings report: active
//! alerts in Alertmanager, resource series in Prometheus. This crate wraps
//! both backends, the bounded-growth leak check, the PNG plot sink and the
//! pprof recorder.

#![deny(missing_docs)]

pub mod alerts;
pub mod leak;
pub mod metrics;
pub mod plot;
pub mod pprof;

use std::time::Duration;

use kubecop_common::Error;

pub use alerts::{AlertQueryClient, AlertRecord};
pub use leak::check_bounded_growth;
pub use metrics::{MetricSeries, MetricsQueryClient, RangeRow};
pub use plot::PlotSink;
pub use pprof::{ProfileKind, ProfileRecorder};

/// Build the HTTP client shared by the backend clients
pub fn http_client(timeout: Duration) -> Result<reqwest::Client, Error> {
    reqwest::Client::builder()
        .timeout(timeout)
        .build()
        .map_err(|e| Error::configuration(format!("failed to build HTTP client: {e}")))
}

#[cfg(test)]
pub(crate) mod test_server {
    /// Serve `router` on an ephemeral local port, returning its base URL
    pub async fn serve(router: axum::Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}")
    }
}
