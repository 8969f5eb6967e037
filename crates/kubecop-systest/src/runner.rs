//! Sequential scenario runner
//!
//! Scenarios run one at a time in registration order. A scenario's returned
//! error or panic becomes a `Failed` result. After every scenario the runner
//! waits for the metrics backend to scrape the window and hands the window to
//! a [`WindowReporter`]. A failed scenario marked `stop_on_failure` aborts the
//! rest of the run.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{error, info, warn};

use kubecop_common::Result;
use kubecop_evidence::metrics::{workload_cpu_query, workload_memory_query};

use crate::context::ScenarioContext;

/// Per-scenario run options
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScenarioConfig {
    /// Abort the remaining scenarios if this one fails
    pub stop_on_failure: bool,
}

impl ScenarioConfig {
    /// A scenario whose failure aborts the run
    pub fn critical() -> Self {
        Self {
            stop_on_failure: true,
        }
    }
}

type ScenarioFn = Box<dyn for<'a> Fn(&'a ScenarioContext) -> BoxFuture<'a, Result<()>> + Send + Sync>;

struct Scenario {
    name: String,
    config: ScenarioConfig,
    run: ScenarioFn,
}

/// Terminal state of one scenario
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScenarioOutcome {
    /// The body returned `Ok`
    Passed,
    /// The body returned an error or panicked
    Failed(String),
}

impl ScenarioOutcome {
    /// Whether the scenario passed
    pub fn passed(&self) -> bool {
        matches!(self, ScenarioOutcome::Passed)
    }
}

impl std::fmt::Display for ScenarioOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScenarioOutcome::Passed => write!(f, "Passed"),
            ScenarioOutcome::Failed(reason) => write!(f, "Failed ({reason})"),
        }
    }
}

/// Result of one executed scenario
#[derive(Debug, Clone)]
pub struct ScenarioResult {
    /// Scenario name
    pub name: String,
    /// Pass or fail with reason
    pub outcome: ScenarioOutcome,
    /// When the body started
    pub start: DateTime<Utc>,
    /// When the body returned
    pub end: DateTime<Utc>,
}

/// How the run as a whole ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunState {
    /// Every registered scenario was attempted
    Completed,
    /// A critical scenario failed and the rest were skipped
    Aborted {
        /// Name of the scenario that stopped the run
        by: String,
    },
}

/// Results of a run, in execution order
#[derive(Debug, Clone)]
pub struct RunSummary {
    results: Vec<ScenarioResult>,
    state: RunState,
}

impl RunSummary {
    /// Result of a scenario, `None` if it never ran
    pub fn get(&self, name: &str) -> Option<&ScenarioResult> {
        self.results.iter().find(|r| r.name == name)
    }

    /// Every executed scenario
    pub fn results(&self) -> &[ScenarioResult] {
        &self.results
    }

    /// Completed or aborted
    pub fn state(&self) -> &RunState {
        &self.state
    }

    /// 0 iff every executed scenario passed and the run was not aborted
    pub fn exit_code(&self) -> i32 {
        let all_passed = self.results.iter().all(|r| r.outcome.passed());
        if all_passed && self.state == RunState::Completed {
            0
        } else {
            1
        }
    }

    /// Plain-text summary, one line per executed scenario
    pub fn render_table(&self) -> String {
        let width = self
            .results
            .iter()
            .map(|r| r.name.len())
            .max()
            .unwrap_or(0);

        let mut out = String::from("Test summary:\n");
        for r in &self.results {
            let secs = (r.end - r.start).num_milliseconds() as f64 / 1000.0;
            out.push_str(&format!(
                "  {:width$}  {:>8.1}s  {}\n",
                r.name, secs, r.outcome
            ));
        }
        if let RunState::Aborted { by } = &self.state {
            out.push_str(&format!("  run aborted after critical failure in {by}\n"));
        }
        out
    }
}

/// Receives each scenario's time window once it has been scraped
#[async_trait]
pub trait WindowReporter: Send + Sync {
    /// Produce artifacts for `[start, end]`; failures are the reporter's to log
    async fn report(
        &self,
        ctx: &ScenarioContext,
        scenario: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    );
}

/// Plots agent CPU and memory for each scenario window
#[derive(Debug, Default, Clone, Copy)]
pub struct MetricsWindowReporter;

impl MetricsWindowReporter {
    async fn plot(
        &self,
        ctx: &ScenarioContext,
        name: &str,
        query: &str,
        label: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) {
        match ctx.metrics().series(query, start, end).await {
            Ok(series) => {
                if ctx.plots().render_series(name, &series, label) {
                    info!(plot = %name, "Plotting succeeded");
                } else {
                    warn!(plot = %name, "Plotting failed");
                }
            }
            Err(e) => warn!(plot = %name, error = %e, "Plotting failed"),
        }
    }
}

#[async_trait]
impl WindowReporter for MetricsWindowReporter {
    async fn report(
        &self,
        ctx: &ScenarioContext,
        scenario: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) {
        let config = ctx.config();
        let cpu = workload_cpu_query(&config.agent_namespace, &config.agent_workload);
        let mem = workload_memory_query(&config.agent_namespace, &config.agent_workload);

        self.plot(ctx, &format!("{scenario}_cpu"), &cpu, "CPU Usage (cores)", start, end)
            .await;
        self.plot(ctx, &format!("{scenario}_mem"), &mem, "Memory Usage (bytes)", start, end)
            .await;
    }
}

/// Runs registered scenarios against one [`ScenarioContext`]
pub struct ScenarioRunner {
    scenarios: Vec<Scenario>,
    reporter: Arc<dyn WindowReporter>,
    scrape_grace: Duration,
}

impl ScenarioRunner {
    /// Runner that waits `scrape_grace` before reporting each window
    pub fn new(reporter: Arc<dyn WindowReporter>, scrape_grace: Duration) -> Self {
        Self {
            scenarios: Vec::new(),
            reporter,
            scrape_grace,
        }
    }

    /// Append a scenario; scenarios run in registration order
    pub fn register<F>(&mut self, name: impl Into<String>, config: ScenarioConfig, run: F)
    where
        F: for<'a> Fn(&'a ScenarioContext) -> BoxFuture<'a, Result<()>> + Send + Sync + 'static,
    {
        self.scenarios.push(Scenario {
            name: name.into(),
            config,
            run: Box::new(run),
        });
    }

    /// Names of the registered scenarios, in order
    pub fn scenario_names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name.as_str()).collect()
    }

    /// Run every scenario until done or a critical failure
    pub async fn run_all(&self, ctx: &ScenarioContext) -> RunSummary {
        let mut results = Vec::with_capacity(self.scenarios.len());
        let mut state = RunState::Completed;

        for scenario in &self.scenarios {
            info!(scenario = %scenario.name, "Running test");
            let start = Utc::now();
            let outcome = match AssertUnwindSafe((scenario.run)(ctx)).catch_unwind().await {
                Ok(Ok(())) => ScenarioOutcome::Passed,
                Ok(Err(e)) => ScenarioOutcome::Failed(e.to_string()),
                Err(panic) => ScenarioOutcome::Failed(format!("PANIC: {}", panic_message(&*panic))),
            };
            let end = Utc::now();

            match &outcome {
                ScenarioOutcome::Passed => info!(scenario = %scenario.name, "Test passed"),
                ScenarioOutcome::Failed(reason) => {
                    error!(scenario = %scenario.name, reason = %reason, "Test failed")
                }
            }

            if !self.scrape_grace.is_zero() {
                info!(grace = ?self.scrape_grace, "Waiting for metrics to be scraped");
                tokio::time::sleep(self.scrape_grace).await;
            }
            self.reporter.report(ctx, &scenario.name, start, end).await;

            let abort = !outcome.passed() && scenario.config.stop_on_failure;
            results.push(ScenarioResult {
                name: scenario.name.clone(),
                outcome,
                start,
                end,
            });

            if abort {
                error!(scenario = %scenario.name, "Stopping tests due to failure in a required test");
                state = RunState::Aborted {
                    by: scenario.name.clone(),
                };
                break;
            }
        }

        RunSummary { results, state }
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
