//! # tenant-gate CLI
//!
//! Command-line tools for inspecting tenant entitlement and exercising the
//! checkout negotiation against an in-memory sandbox store.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use serde::Serialize;

use tenant_gate::billing::{
    spawn_sandbox_provider, CheckoutSessionCoordinator, EntitlementDecision, InMemoryDocumentStore,
    Plan, RawTimestamp, SandboxBehavior, SystemClock, TenantSnapshot,
};
use tenant_gate::config::{init_tracing, load_config, resolve_config_path, GateConfig};

#[derive(Parser)]
#[command(name = "tenant-gate")]
#[command(about = "Tenant subscription gating and checkout tools")]
#[command(version = tenant_gate::VERSION)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Configuration file (defaults to $TENANT_GATE_CONFIG)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output format (json, table, yaml)
    #[arg(short, long, default_value = "table")]
    format: String,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a tenant document's entitlement
    Access {
        /// Tenant document (JSON)
        #[arg(long)]
        tenant: PathBuf,

        /// Acting user identity (email)
        #[arg(long)]
        user: Option<String>,

        /// Evaluate at this instant instead of now (RFC 3339)
        #[arg(long)]
        now: Option<String>,
    },

    /// List configured plans
    Plans,

    /// Run a checkout against the in-memory sandbox store
    Checkout {
        /// Authenticated user id
        #[arg(long)]
        user: String,

        /// Plan id from the catalog
        #[arg(long, conflicts_with = "price")]
        plan: Option<String>,

        /// Raw provider price id
        #[arg(long)]
        price: Option<String>,

        /// How the sandbox provider answers
        #[arg(long, value_enum, default_value = "url")]
        simulate: Simulation,

        /// Override the configured checkout timeout (seconds)
        #[arg(long)]
        timeout_secs: Option<u64>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum Simulation {
    /// Provider writes a redirect URL
    Url,
    /// Provider writes a generic error
    Error,
    /// Provider reports the price does not exist
    NoSuchPrice,
    /// Provider never answers
    Silent,
}

impl Simulation {
    fn behavior(self, price_id: &str) -> SandboxBehavior {
        match self {
            Self::Url => SandboxBehavior::Fulfil,
            Self::Error => SandboxBehavior::Reject("Your account cannot currently make live charges.".to_string()),
            Self::NoSuchPrice => SandboxBehavior::Reject(format!("No such price: '{}'", price_id)),
            Self::Silent => SandboxBehavior::Silent,
        }
    }
}

#[derive(Serialize)]
struct AccessReport<'a> {
    tenant_id: &'a str,
    status: String,
    evaluated_at: String,
    #[serde(flatten)]
    decision: EntitlementDecision,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_filter = if cli.verbose { "tenant_gate=debug" } else { "tenant_gate=warn" };
    init_tracing(default_filter);

    let config = load_config(&resolve_config_path(cli.config.clone())).context("Failed to load configuration")?;

    match cli.command {
        Commands::Access { ref tenant, ref user, ref now } => {
            handle_access(&config, &cli.format, tenant, user.as_deref(), now.as_deref())
        }
        Commands::Plans => {
            print_output(&cli.format, &config.plans.plans().to_vec(), |plans| print_plans_table(plans))
        }
        Commands::Checkout { ref user, ref plan, ref price, simulate, timeout_secs } => {
            handle_checkout(config, user, plan.as_deref(), price.as_deref(), simulate, timeout_secs).await
        }
    }
}

fn handle_access(
    config: &GateConfig,
    format: &str,
    tenant_path: &Path,
    user: Option<&str>,
    now: Option<&str>,
) -> Result<()> {
    let content = std::fs::read_to_string(tenant_path)
        .with_context(|| format!("Failed to read tenant document {}", tenant_path.display()))?;
    let document: serde_json::Value = serde_json::from_str(&content).context("Tenant document is not valid JSON")?;
    let snapshot = TenantSnapshot::from_document(&document).context("Tenant document has an unexpected shape")?;

    let now: DateTime<Utc> = match now {
        Some(raw) => match RawTimestamp::Iso(raw.to_string()).normalize().instant() {
            Some(at) => at,
            None => bail!("--now '{}' is not a valid date/time", raw),
        },
        None => Utc::now(),
    };

    let decision = config.access_evaluator().evaluate(&snapshot, user, now);
    let report = AccessReport {
        tenant_id: &snapshot.tenant_id,
        status: snapshot.subscription_status.to_string(),
        evaluated_at: now.to_rfc3339(),
        decision,
    };

    print_output(format, &report, |report| {
        println!("Tenant:          {}", report.tenant_id);
        println!("Status:          {}", report.status);
        println!("Evaluated at:    {}", report.evaluated_at);
        println!("Access:          {}", if report.decision.has_access { "granted" } else { "denied" });
        println!("Trial:           {}", report.decision.is_trial);
        println!("Days remaining:  {}", report.decision.days_remaining);
        println!("Reason:          {:?}", report.decision.reason);
    })
}

async fn handle_checkout(
    mut config: GateConfig,
    user: &str,
    plan: Option<&str>,
    price: Option<&str>,
    simulate: Simulation,
    timeout_secs: Option<u64>,
) -> Result<()> {
    let price_id = match (plan, price) {
        (Some(plan_id), _) => match config.plans.find(plan_id) {
            Some(plan) => plan.price_id.clone(),
            None => bail!("Unknown plan '{}'", plan_id),
        },
        (None, Some(price_id)) => price_id.to_string(),
        (None, None) => bail!("Either --plan or --price is required"),
    };
    if let Some(secs) = timeout_secs {
        config.checkout.timeout_secs = secs;
    }

    let store = InMemoryDocumentStore::new();
    let provider = spawn_sandbox_provider(store.clone(), simulate.behavior(&price_id));
    let coordinator = CheckoutSessionCoordinator::new(Arc::new(store), Arc::new(SystemClock), config.checkout.clone());

    println!("Starting checkout for user {} (price {})...", user, price_id);
    let result = coordinator.start(user, &price_id).await;
    provider.abort();

    match result {
        Ok(url) => {
            println!("✅ Redirect to: {}", url);
            Ok(())
        }
        Err(err) => {
            println!("❌ {} ({})", err.message, err.kind.code());
            println!("   {}", err.kind.user_message());
            bail!("Checkout failed: {}", err.kind.code())
        }
    }
}

fn print_output<T: Serialize>(format: &str, value: &T, table: impl FnOnce(&T)) -> Result<()> {
    match format {
        "json" => println!("{}", serde_json::to_string_pretty(value)?),
        "yaml" => println!("{}", serde_yaml::to_string(value)?),
        _ => table(value),
    }
    Ok(())
}

fn print_plans_table(plans: &[Plan]) {
    println!("{:<12} {:<12} {:>8}  {}", "PLAN", "NAME", "EUR/MO", "PRICE ID");
    for plan in plans {
        println!("{:<12} {:<12} {:>8}  {}", plan.id, plan.name, plan.monthly_price_eur, plan.price_id);
    }
}
