//! KubeCop system tests
//!
//! Runs the scenario catalogue against a live cluster with the agent
//! installed, checking alerts in Alertmanager and resource usage in
//! Prometheus.

pub mod context;
pub mod runner;
pub mod scenarios;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::info;

use kubecop_cluster::KubeClusterOps;
use kubecop_common::config::{
    resolve_root_directory, DEFAULT_ALERTMANAGER_URL, DEFAULT_PROMETHEUS_URL,
};
use kubecop_common::{Result, SystestConfig};

pub use context::ScenarioContext;
pub use runner::{
    MetricsWindowReporter, RunState, RunSummary, ScenarioConfig, ScenarioOutcome, ScenarioRunner,
    WindowReporter,
};

/// KubeCop system-test runner
#[derive(Parser, Debug)]
#[command(name = "kubecop-systest")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Alertmanager base URL
    #[arg(env = "ALERTMANAGER_URL", default_value = DEFAULT_ALERTMANAGER_URL)]
    pub alertmanager_url: String,

    /// Prometheus base URL
    #[arg(env = "PROMETHEUS_URL", default_value = DEFAULT_PROMETHEUS_URL)]
    pub prometheus_url: String,

    /// Path to kubeconfig file (default: in-cluster or ~/.kube/config)
    #[arg(long, env = "KUBECONFIG")]
    pub kubeconfig: Option<PathBuf>,

    /// Directory holding the scenario manifests (default: <git toplevel>/system-tests)
    #[arg(long)]
    pub root_dir: Option<PathBuf>,

    /// Directory plots and profiles are written to
    #[arg(long, default_value = ".")]
    pub output_dir: PathBuf,

    /// Seconds to wait after each scenario for Prometheus to scrape
    #[arg(long, default_value_t = 60)]
    pub scrape_grace_secs: u64,

    /// Per-request timeout for Alertmanager, Prometheus and pprof calls
    #[arg(long, default_value_t = 30)]
    pub http_timeout_secs: u64,

    /// Agent pprof port; enables agent profiling during load scenarios
    #[arg(long)]
    pub pprof_port: Option<u16>,

    /// Also run scenarios that kill processes inside workloads
    #[arg(long)]
    pub include_disruptive: bool,

    /// Namespace holding application profiles when the agent uses an external store
    #[arg(long, env = "STORE_NAMESPACE")]
    pub store_namespace: Option<String>,
}

impl Cli {
    /// Resolve the run configuration
    pub fn config(&self) -> SystestConfig {
        SystestConfig {
            alertmanager_url: self.alertmanager_url.clone(),
            prometheus_url: self.prometheus_url.clone(),
            store_namespace: self.store_namespace.clone().filter(|s| !s.is_empty()),
            root_directory: resolve_root_directory(self.root_dir.as_deref()),
            kubeconfig: self.kubeconfig.clone(),
            output_dir: self.output_dir.clone(),
            scrape_grace: Duration::from_secs(self.scrape_grace_secs),
            http_timeout: Duration::from_secs(self.http_timeout_secs),
            pprof_port: self.pprof_port,
            include_disruptive: self.include_disruptive,
            ..SystestConfig::default()
        }
    }

    /// Run the catalogue; returns the process exit code
    pub async fn run(self) -> Result<i32> {
        let config = self.config();
        info!(
            root = %config.root_directory.display(),
            alertmanager = %config.alertmanager_url,
            prometheus = %config.prometheus_url,
            "Running tests"
        );

        let cluster = KubeClusterOps::connect(config.kubeconfig.as_deref()).await?;

        let mut runner = ScenarioRunner::new(Arc::new(MetricsWindowReporter), config.scrape_grace);
        scenarios::register_all(&mut runner, &config);

        let ctx = ScenarioContext::new(config, Arc::new(cluster))?;
        let summary = runner.run_all(&ctx).await;

        println!("{}", summary.render_table());
        Ok(summary.exit_code())
    }
}
