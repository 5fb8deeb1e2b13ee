//! AdPilot — autonomous ad-campaign optimization daemon.
//!
//! Main entry point: loads configuration, wires the controller to its
//! collaborators, and runs optimization cycles until shutdown.

mod backends;

use adpilot_core::config::AppConfig;
use adpilot_orchestrator::{spawn_controller, ControllerDeps, OptimizationController};
use backends::{DryRunPlatform, JsonShopStore, LogNotifier};
use clap::Parser;
use std::sync::Arc;
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "adpilot")]
#[command(about = "Autonomous ad-campaign optimization engine")]
#[command(version)]
struct Cli {
    /// Node identifier (overrides config)
    #[arg(long, env = "ADPILOT__NODE_ID")]
    node_id: Option<String>,

    /// Directory holding one JSON file per shop
    #[arg(long, env = "ADPILOT__DATA_DIR", default_value = "data")]
    data_dir: String,

    /// Cycle cadence in hours (overrides config)
    #[arg(long, env = "ADPILOT__DEFAULTS__CYCLE_HOURS")]
    cycle_hours: Option<u64>,

    /// Run a single optimization cycle, print the report, and exit
    #[arg(long, default_value_t = false)]
    once: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "adpilot=info".into()),
        )
        .json()
        .init();

    let cli = Cli::parse();

    info!("AdPilot starting up");

    // Load configuration
    let mut config = AppConfig::load().unwrap_or_else(|e| {
        tracing::warn!(error = %e, "Failed to load config, using defaults");
        AppConfig::default()
    });

    // Apply CLI overrides
    if let Some(node_id) = cli.node_id {
        config.node_id = node_id;
    }
    if let Some(hours) = cli.cycle_hours {
        config.defaults.cycle_hours = hours;
    }

    info!(
        node_id = %config.node_id,
        data_dir = %cli.data_dir,
        cycle_hours = config.defaults.cycle_hours,
        shop_concurrency = config.optimizer.shop_concurrency,
        "Configuration loaded"
    );

    let store = Arc::new(JsonShopStore::new(&cli.data_dir));
    let controller = OptimizationController::new(
        config,
        ControllerDeps {
            config_store: store.clone(),
            campaign_store: store,
            platform: Arc::new(DryRunPlatform),
            predictive: None,
            notifier: Arc::new(LogNotifier),
        },
    );

    if cli.once {
        let report = controller.run_cycle().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let (stop_tx, handle) = spawn_controller(controller);
    info!("AdPilot is running; Ctrl-C to stop");

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested; letting the in-flight cycle finish");
    let _ = stop_tx.send(true);
    handle.await?;

    Ok(())
}
