//! Gridbroker agent - main entry point
//!
//! Wires the agreement governance worker to its collaborators: the
//! persistent store, the exchange registry client, and the Ethereum chain
//! adapter. Peer subsystems (runtime, fetcher, API) attach to the worker's
//! event surfaces.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing::{debug, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use gridbroker_chain::EthereumAdapter;
use gridbroker_config::{validate_config, AgentConfig};
use gridbroker_governance::GovernanceWorker;
use gridbroker_persistence::InMemoryStore;
use gridbroker_registry::ExchangeRegistry;
use gridbroker_types::{OutboundEvent, PolicyManager};

/// Gridbroker producer agent CLI
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the agent config file (TOML, YAML, or JSON); environment
    /// variables with the GRIDBROKER prefix override file values
    #[arg(long)]
    config: Option<PathBuf>,

    /// Blockchain account this producer signs from
    #[arg(long, default_value = "0x0")]
    account: String,

    /// Address of the on-chain contract directory
    #[arg(long, default_value = "0x0")]
    directory: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => gridbroker_config::load(path)?,
        None => gridbroker_config::load_env()?,
    };
    validate_config(&config)?;

    init_tracing(&config);

    info!("Starting gridbroker agent");
    info!("  Exchange: {}", config.edge.exchange_url);
    info!("  Chain:    {}", config.edge.geth_url);

    let registry_retry = Duration::from_millis(config.governance.registry_retry_delay_ms);
    let config = Arc::new(config);

    // The store trait hides the backend; the agent currently runs on the
    // in-memory implementation.
    let store = Arc::new(InMemoryStore::new());
    let registry = Arc::new(
        ExchangeRegistry::new(config.edge.exchange_url.clone()).with_retry_delay(registry_retry),
    );
    let chain = Arc::new(EthereumAdapter::new(
        config.edge.geth_url.clone(),
        args.account,
        args.directory,
    ));
    let policy_manager = Arc::new(PolicyManager::new());

    let (worker, mut outbound) = GovernanceWorker::spawn(
        config,
        store,
        registry,
        chain,
        policy_manager,
    )
    .await?;

    info!("  Device:   {}", worker.device_id());

    // Surface governance decisions until peer subsystems are attached.
    tokio::spawn(async move {
        while let Some(event) = outbound.recv().await {
            match event {
                OutboundEvent::Cancellation {
                    ref agreement_id, ..
                } => {
                    info!(agreement_id = %agreement_id, "workload teardown requested");
                }
                OutboundEvent::Maintenance {
                    ref agreement_id, ..
                } => {
                    debug!(agreement_id = %agreement_id, "container maintenance requested");
                }
            }
        }
    });

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");
    Ok(())
}

fn init_tracing(config: &AgentConfig) {
    let default_filter = config.log_level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_filter)),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}
