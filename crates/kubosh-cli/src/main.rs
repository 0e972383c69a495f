//! kubosh CLI
//!
//! Compiles BOSH instance groups into Kubernetes manifests.

use clap::Parser;

use kubosh_cli::Cli;
use kubosh_common::telemetry::{init_telemetry, TelemetryConfig};

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    init_telemetry(TelemetryConfig {
        json: cli.log_json,
        ..Default::default()
    })?;

    cli.run()?;
    Ok(())
}
