use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::Context;

use node_updater::config::{Timeouts, UpdatePlan};
use node_updater::process::SystemProcessRunner;
use node_updater::provider::StaticNodeProvider;
use node_updater::{NodeProvider, NodeUpdater, UpdateExit, update_nodes};

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging with file output.
    let log_dir = node_updater::config::paths::ensure_log_dir().ok();
    let _guard = node_updater::logging::init_logging(log_dir);

    match run().await {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            tracing::error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

/// Update every node in the plan; `Ok(false)` when any node failed.
async fn run() -> anyhow::Result<bool> {
    let plan_path = std::env::args_os()
        .nth(1)
        .map(PathBuf::from)
        .context("usage: node-updater <plan.toml>")?;
    let plan = UpdatePlan::load(&plan_path)
        .with_context(|| format!("loading {}", plan_path.display()))?;

    tracing::info!(
        "Updating {} node(s) of cluster {} to {}",
        plan.nodes.len(),
        plan.cluster_name,
        plan.runtime_hash
    );

    let provider: Arc<dyn NodeProvider> = Arc::new(StaticNodeProvider::new(
        plan.nodes.clone(),
        plan.transport.clone(),
    ));
    let timeouts = Timeouts::from(&plan.settings);
    let process_runner = Arc::new(SystemProcessRunner);
    let request = plan.update_request();

    let updaters = plan
        .nodes
        .iter()
        .map(|node| {
            NodeUpdater::new(
                node.id.clone(),
                provider.clone(),
                request.clone(),
                timeouts,
                process_runner.clone(),
            )
        })
        .collect();

    let mut all_ok = true;
    for (node_id, result) in update_nodes(updaters).await {
        match result {
            Ok(UpdateExit::Succeeded) => println!("{}: up-to-date", node_id),
            Ok(UpdateExit::Failed) => {
                all_ok = false;
                println!("{}: update-failed", node_id);
            }
            Err(e) => {
                all_ok = false;
                println!("{}: update-failed ({})", node_id, e);
            }
        }
    }
    Ok(all_ok)
}
