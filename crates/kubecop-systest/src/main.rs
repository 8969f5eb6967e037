//! KubeCop system-test runner

use clap::Parser;
use tracing::error;

use kubecop_common::telemetry::{init_telemetry, TelemetryConfig};
use kubecop_systest::Cli;

#[tokio::main]
async fn main() {
    if let Err(e) = init_telemetry(TelemetryConfig::default()) {
        eprintln!("{e}");
    }

    let cli = Cli::parse();
    let code = match cli.run().await {
        Ok(code) => code,
        Err(e) => {
            error!(error = %e, "System tests could not run");
            1
        }
    };
    std::process::exit(code);
}
