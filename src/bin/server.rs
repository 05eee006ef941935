//! # tenant-gate HTTP server
//!
//! Serves the billing gate API over an in-memory document store. With
//! `--sandbox-provider` a simulated payment integration answers checkout
//! intents, which is enough to drive the pricing page end to end locally.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::signal;
use tracing::{info, warn};

use tenant_gate::billing::{
    create_billing_router, spawn_sandbox_provider, BillingAppState, InMemoryDocumentStore, SandboxBehavior,
    SystemClock,
};
use tenant_gate::config::{init_tracing, read_config, resolve_config_path};

/// tenant-gate billing API server
#[derive(Parser, Debug)]
#[command(name = "tenant-gate-server")]
#[command(version)]
#[command(about = "Subscription gating and checkout API")]
struct Args {
    /// Configuration file (defaults to $TENANT_GATE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Bind address (overrides [server].bind)
    #[arg(short, long)]
    bind: Option<String>,

    /// Answer checkout intents with sandbox redirect URLs
    #[arg(long)]
    sandbox_provider: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let (config, origin) = read_config(&resolve_config_path(args.config)).context("Failed to load configuration")?;
    init_tracing(&config.logging.filter);

    info!("🌟 tenant-gate v{}", tenant_gate::VERSION);
    origin.log(&config);
    info!(
        plans = config.plans.plans().len(),
        operators = config.access.operators.len(),
        checkout_timeout_secs = config.checkout.timeout_secs,
        "Billing gate configured"
    );
    for plan in config.plans.plans() {
        if config.checkout.is_placeholder_price(&plan.price_id) {
            warn!(plan = %plan.id, price_id = %plan.price_id, "Plan has a placeholder price id; its checkouts will fail");
        }
    }

    let store = InMemoryDocumentStore::new();
    let provider = args
        .sandbox_provider
        .then(|| spawn_sandbox_provider(store.clone(), SandboxBehavior::Fulfil));

    let state = Arc::new(BillingAppState::new(&config, Arc::new(store), Arc::new(SystemClock)));
    let app = create_billing_router(state);

    let bind = args.bind.unwrap_or_else(|| config.server.bind.clone());
    let addr: SocketAddr = bind.parse().with_context(|| format!("Invalid bind address '{}'", bind))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!("🌐 Billing API listening on http://{}", addr);
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = signal::ctrl_c().await;
            info!("Received Ctrl+C, shutting down...");
        })
        .await
        .context("Server error")?;

    if let Some(provider) = provider {
        provider.abort();
    }
    info!("✅ tenant-gate shutdown complete");
    Ok(())
}
