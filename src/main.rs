use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

use cluster_bootstrap::domain::remote::attacher::AwsCliAttacher;
use cluster_bootstrap::domain::remote::executor::SshExecutor;
use cluster_bootstrap::{BootstrapOrchestrator, load_bootstrap_request, logger};

/// Bootstraps an HA k3s cluster on already-provisioned nodes.
#[derive(Debug, Parser)]
#[command(name = "cluster-bootstrap", version)]
struct Cli {
    /// Infrastructure description (nodes, database, load balancers, secrets).
    #[arg(short, long)]
    infra: String,

    /// Print the task graph and exit without touching any node.
    #[arg(long)]
    plan: bool,

    /// Write the exports as JSON to this file instead of stdout.
    #[arg(long)]
    exports_out: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    logger::init();

    let (request, config) =
        load_bootstrap_request(&cli.infra).with_context(|| format!("Loading infrastructure from '{}'", cli.infra))?;

    let executor = Arc::new(SshExecutor::new(config.connect_timeout()));
    let attacher = Arc::new(AwsCliAttacher::new(request.region.clone()));
    let orchestrator = BootstrapOrchestrator::new(config, executor, attacher);

    if cli.plan {
        let plan = orchestrator.plan(&request)?;
        print!("{}", plan.describe());
        return Ok(());
    }

    let result = orchestrator.setup(&request).await.context("Cluster bootstrap failed")?;
    log::info!("{} tasks completed, {} joined tokens.", result.report.completed_count(), result.joined.len());

    let exports = result.exports.to_json_pretty()?;
    match cli.exports_out {
        Some(path) => {
            std::fs::write(&path, exports).with_context(|| format!("Writing exports to '{}'", path.display()))?;
            log::info!("Exports written to '{}'.", path.display());
        }
        None => println!("{}", exports),
    }

    Ok(())
}
