// ============================================================================
// passgate - CLI for the wallet-gated access core
// ============================================================================
// Usage:
//   passgate validate [--json]                  Run the startup go/no-go checks
//   passgate tiers                              Show the access tier catalog
//   passgate prices                             Show operation credit costs
//   passgate packages                           Show credit packages
//   passgate message --owner ADDR --service S   Print the vault signing message
//   passgate stats                              Show database statistics
//   passgate list-secrets [--owner ADDR]        List stored secrets (no plaintext)
//   passgate balance --wallet ADDR              Show a wallet's credit balance
//   passgate history --wallet ADDR              Show a wallet's usage history
//   passgate prune --older-than 90              Prune old usage history
// ============================================================================

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use passgate_core::access::{default_catalog, format_wei, tier_name, RpcChainClient};
use passgate_core::access::PassApiClient;
use passgate_core::config::DEFAULT_LLM_BASE_URL;
use passgate_core::identity::PrivyClient;
use passgate_core::ledger::{credit_packages, OperationPriceTable, OperationType};
use passgate_core::startup::{HttpLlmGateway, PassVerifier, StartupDeps, StoredAgentDirectory};
use passgate_core::vault::authorization_message;
use passgate_core::{Address, GateConfig, GateDb, StartupGate};

/// Wallet-gated access control tool
#[derive(Parser)]
#[command(name = "passgate", version, about = "Inspect and validate the passgate access core")]
struct Cli {
    /// Path to the database file (default: ~/.passgate/passgate.redb)
    #[arg(long, global = true)]
    db_path: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the startup checklist against the configured services
    Validate {
        /// Print the report as JSON instead of the checklist
        #[arg(long)]
        json: bool,
    },

    /// Show the access tier catalog
    Tiers,

    /// Show the credit cost and minimum tier of each operation
    Prices,

    /// Show purchasable credit packages
    Packages,

    /// Print the message a wallet signs to authorize vault access
    Message {
        #[arg(long)]
        owner: String,
        /// Secret service type, e.g. "whatsapp"
        #[arg(long)]
        service: String,
    },

    /// Show database statistics (secrets, balances, usage, agents)
    Stats,

    /// List stored secrets without decrypting them
    ListSecrets {
        /// Only secrets owned by this wallet
        #[arg(long)]
        owner: Option<String>,
    },

    /// Show a wallet's credit balance
    Balance {
        #[arg(long)]
        wallet: String,
    },

    /// Show a wallet's credit and debit history
    History {
        #[arg(long)]
        wallet: String,
    },

    /// Prune usage history older than N days
    Prune {
        #[arg(long, default_value = "90")]
        older_than: i64,

        /// Show what would be pruned without actually deleting
        #[arg(long)]
        dry_run: bool,
    },
}

fn format_timestamp(ts: i64) -> String {
    Utc.timestamp_opt(ts, 0)
        .single()
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| format!("(invalid: {})", ts))
}

fn parse_wallet(raw: &str) -> Result<Address> {
    Address::parse(raw).with_context(|| format!("'{}' is not a wallet address", raw))
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("passgate_core=info,passgate=info")),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { json } => cmd_validate(cli.db_path.as_deref(), json).await,
        Commands::Tiers => cmd_tiers(),
        Commands::Prices => cmd_prices(),
        Commands::Packages => cmd_packages(),
        Commands::Message { owner, service } => cmd_message(&owner, &service),
        Commands::Stats => cmd_stats(&open_db(cli.db_path.as_deref())?),
        Commands::ListSecrets { owner } => {
            cmd_list_secrets(&open_db(cli.db_path.as_deref())?, owner.as_deref())
        }
        Commands::Balance { wallet } => cmd_balance(&open_db(cli.db_path.as_deref())?, &wallet),
        Commands::History { wallet } => cmd_history(&open_db(cli.db_path.as_deref())?, &wallet),
        Commands::Prune {
            older_than,
            dry_run,
        } => cmd_prune(&open_db(cli.db_path.as_deref())?, older_than, dry_run),
    }
}

fn open_db(path: Option<&str>) -> Result<GateDb> {
    GateDb::open(path).context("Failed to open passgate database")
}

async fn cmd_validate(db_path: Option<&str>, json: bool) -> Result<()> {
    let config = GateConfig::from_env().context("Invalid configuration")?;
    let call_timeout = config.timeouts.healthcheck();

    let db = Arc::new(GateDb::open(db_path.or(config.db_path.as_deref()))?);
    info!(
        "Validating startup for chain {} via {}",
        config.chain.expected_chain_id, config.chain.rpc_url
    );

    let identity = Arc::new(PrivyClient::new(
        &config.identity.base_url,
        config.identity.app_id.as_deref().unwrap_or_default(),
        call_timeout,
    ));
    let llm = Arc::new(HttpLlmGateway::new(
        config.llm.base_url.as_deref().unwrap_or(DEFAULT_LLM_BASE_URL),
        config.llm.api_key.as_deref().unwrap_or_default(),
        call_timeout,
    ));
    let chain = Arc::new(RpcChainClient::new(&config.chain.rpc_url, call_timeout));
    let pass: Arc<dyn PassVerifier> = Arc::new(PassApiClient::new(
        &config.access.pass_api_url,
        config.access.wallet_token.clone(),
        call_timeout,
    ));

    let gate = StartupGate::standard(
        &config,
        StartupDeps {
            identity,
            llm,
            chain,
            pass: Some(pass),
            knowledge: None,
            agents: Arc::new(StoredAgentDirectory::new(db)),
        },
    );

    if json {
        let report = gate.validate().await;
        println!("{}", serde_json::to_string_pretty(&report)?);
        if !report.success {
            error!("Startup validation failed with {} error(s)", report.errors.len());
            std::process::exit(1);
        }
    } else {
        gate.must_validate().await;
    }
    Ok(())
}

fn cmd_tiers() -> Result<()> {
    println!(
        "{:<4}  {:<18}  {:>10}  {:>9}  {:>10}",
        "ID", "NAME", "PRICE ETH", "USD", "MAX SUPPLY"
    );
    println!("{}", "-".repeat(60));

    for tier in default_catalog() {
        println!(
            "{:<4}  {:<18}  {:>10}  {:>9}  {:>10}",
            tier.id,
            tier.name,
            tier.price_eth(),
            tier.price_usd,
            tier.max_supply
        );
        for benefit in &tier.benefits {
            println!("        - {}", benefit);
        }
    }
    Ok(())
}

fn cmd_prices() -> Result<()> {
    let prices = OperationPriceTable::default();

    println!("{:<20}  {:>7}  {}", "OPERATION", "CREDITS", "MIN TIER");
    println!("{}", "-".repeat(48));
    for op in OperationType::ALL {
        println!(
            "{:<20}  {:>7}  {}",
            op.as_str(),
            prices.price_of(op.as_str())?,
            tier_name(op.required_tier())
        );
    }
    Ok(())
}

fn cmd_packages() -> Result<()> {
    println!("{:<4}  {:<12}  {:>8}  {:>10}  {}", "ID", "NAME", "CREDITS", "PRICE ETH", "DISCOUNT");
    println!("{}", "-".repeat(52));
    for package in credit_packages() {
        println!(
            "{:<4}  {:<12}  {:>8}  {:>10}  {}%",
            package.id,
            package.name,
            package.credits,
            format_wei(package.price_wei),
            package.discount_percent
        );
    }
    Ok(())
}

fn cmd_message(owner: &str, service: &str) -> Result<()> {
    let owner = parse_wallet(owner)?;
    println!("{}", authorization_message(&owner, service));
    Ok(())
}

fn cmd_stats(db: &GateDb) -> Result<()> {
    let stats = db.stats()?;

    println!("=== Passgate Database Stats ===");
    println!("Database: {}", db.path().display());
    println!();
    println!(
        "Secrets:  {} total ({} deleted)",
        stats.total_secrets, stats.tombstoned_secrets
    );
    println!(
        "Balances: {} wallets, {} credits outstanding",
        stats.wallets_with_balance, stats.total_credits
    );
    println!("Usage:    {} events", stats.usage_events);
    println!("Agents:   {}", stats.agents);

    Ok(())
}

fn cmd_list_secrets(db: &GateDb, owner: Option<&str>) -> Result<()> {
    let owner = owner.map(parse_wallet).transpose()?;
    let secrets = db.list_secrets(owner.as_ref())?;

    if secrets.is_empty() {
        println!("No secrets found.");
        return Ok(());
    }

    println!(
        "{:<36}  {:<12}  {:<13}  {:<22}  {}",
        "SECRET ID", "SERVICE", "OWNER", "LAST ACCESSED", "STATE"
    );
    println!("{}", "-".repeat(100));

    let now = Utc::now().timestamp();
    for secret in &secrets {
        let state = if secret.is_deleted() {
            "deleted".to_string()
        } else if secret.is_expired(now) {
            "expired".to_string()
        } else {
            format!("v{}", secret.version)
        };
        println!(
            "{:<36}  {:<12}  {:<13}  {:<22}  {}",
            secret.id,
            secret.service_type,
            secret.owner.short(),
            format_timestamp(secret.last_accessed_at),
            state
        );
    }

    println!("\nTotal: {} secrets", secrets.len());
    Ok(())
}

fn cmd_balance(db: &GateDb, wallet: &str) -> Result<()> {
    let wallet = parse_wallet(wallet)?;
    let balance = db.get_balance(&wallet)?.unwrap_or(0);
    println!("{}: {} credits", wallet.to_checksum(), balance);
    Ok(())
}

fn cmd_history(db: &GateDb, wallet: &str) -> Result<()> {
    let wallet = parse_wallet(wallet)?;
    let events = db.usage_history(&wallet)?;

    if events.is_empty() {
        println!("No usage recorded for {}.", wallet.to_checksum());
        return Ok(());
    }

    println!(
        "{:<22}  {:<7}  {:>7}  {:>8}  {:<20}  {}",
        "AT", "KIND", "AMOUNT", "BALANCE", "OPERATION", "REASON"
    );
    println!("{}", "-".repeat(90));
    for event in &events {
        println!(
            "{:<22}  {:<7}  {:>7}  {:>8}  {:<20}  {}",
            format_timestamp(event.at_ms / 1000),
            format!("{:?}", event.kind),
            event.amount,
            event.balance_after,
            event.operation.as_deref().unwrap_or("-"),
            event.reason
        );
    }

    println!("\nTotal: {} events", events.len());
    Ok(())
}

fn cmd_prune(db: &GateDb, older_than: i64, dry_run: bool) -> Result<()> {
    if older_than <= 0 {
        warn!("--older-than {} selects every usage event", older_than);
    }
    let count = db.prune_usage(older_than, dry_run)?;
    if dry_run {
        println!("=== DRY RUN - no data will be deleted ===\n");
        println!("Would prune {} usage events older than {} days", count, older_than);
    } else {
        info!("Pruned {} usage events from {}", count, db.path().display());
        println!("Pruned {} usage events (older than {} days)", count, older_than);
    }
    Ok(())
}
