//! Ferry - cross-chain bridge transfer indexer.
//!
//! # Usage
//!
//! ```bash
//! # Index every domain that has an RPC endpoint
//! SHARED_CONFIG_PATH=./shared-config.json \
//! RPC_URL_CONFIG='[{"id":1,"endpoint":"https://rpc.example"}]' \
//! DATABASE_URL=postgres://localhost/ferry ferry
//!
//! # Wipe indexed transfers and checkpoints
//! ferry --purge -y
//! ```

mod pricing;

use std::io::{self, Write};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use metrics_exporter_prometheus::PrometheusBuilder;
use tokio::signal;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{Instrument, debug, error, info, info_span, warn};
use tracing_subscriber::{EnvFilter, fmt};

use ferry_core::error::{IndexerError, IndexerResult};
use ferry_core::metrics::init_metrics;
use ferry_core::models::{ChainKind, Domain};
use ferry_core::ports::{BlockMode, PriceOracle, Repositories};
use ferry_core::registry::DomainRegistry;
use ferry_core::services::{
    ChainIndexer, CorrelationEngine, CorrelationPolicy, SchedulerConfig, StridePolicy,
    SubstrateIndexer, backoff,
};
use ferry_evm::{EvmClient, EvmIndexer};
use ferry_storage::{Database, DatabaseConfig, PgRepositories};
use ferry_substrate::{SubstrateClient, SubstrateClientConfig};

use crate::pricing::{CoinMarketCapOracle, DEFAULT_API_URL, DisabledOracle};

/// Ferry CLI - bridge transfer indexer.
#[derive(Parser, Debug)]
#[command(name = "ferry")]
#[command(about = "Ferry - cross-chain bridge transfer indexer")]
#[command(version)]
struct Cli {
    /// PostgreSQL database URL.
    #[arg(long, env = "DATABASE_URL", default_value = "postgres://localhost/ferry")]
    database_url: String,

    /// Shared bridge configuration: a file path or an http(s) URL.
    #[arg(long, env = "SHARED_CONFIG_PATH", default_value = "shared-config.json")]
    shared_config: String,

    /// RPC endpoints as JSON: `[{"id": 1, "endpoint": "https://..."}]`.
    #[arg(long, env = "RPC_URL_CONFIG", default_value = "[]")]
    rpc_url_config: String,

    /// Comma separated destination domain ids to ignore.
    #[arg(long, env = "BLACKLISTED_DOMAINS", default_value = "")]
    blacklisted_domains: String,

    /// CoinMarketCap API key. Without it every USD value is recorded as 0.
    #[arg(long, env = "COINMARKETCAP_API_KEY")]
    coinmarketcap_api_key: Option<String>,

    /// CoinMarketCap API base URL.
    #[arg(long, env = "COINMARKETCAP_API_URL", default_value = DEFAULT_API_URL)]
    coinmarketcap_api_url: String,

    /// Blocks per catch-up window.
    #[arg(long, env = "PAST_EVENTS_WINDOW", default_value = "2000")]
    past_events_window: u64,

    /// Minimum head advance before a live range is processed.
    #[arg(long, env = "LIVE_EVENTS_STEP", default_value = "10")]
    live_events_step: u64,

    /// Live range trigger: at-least (head >= last + step) or exact (head == last + step).
    #[arg(long, env = "STRIDE_POLICY", default_value = "at-least")]
    stride_policy: StridePolicy,

    /// Timeout of a single RPC call, in seconds.
    #[arg(long, env = "RPC_TIMEOUT_SECS", default_value = "30")]
    rpc_timeout_secs: u64,

    /// EVM head polling interval, in seconds.
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "12")]
    poll_interval_secs: u64,

    /// Prometheus metrics port.
    #[arg(long, env = "METRICS_PORT", default_value = "9090")]
    metrics_port: u16,

    /// Enable JSON log output.
    #[arg(long, env = "JSON_LOGS")]
    json_logs: bool,

    /// Run database migrations and exit.
    #[arg(long)]
    migrate_only: bool,

    /// Purge all indexed data from the database and exit.
    ///
    /// This will delete all transfers, deposits, executions, fees and
    /// accounts, and reset every domain checkpoint. Schema/migrations are
    /// preserved.
    #[arg(long)]
    purge: bool,

    /// Skip confirmation prompt for destructive operations (like --purge).
    #[arg(long, short = 'y')]
    yes: bool,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, env = "LOG_LEVEL", default_value = "info")]
    log_level: String,

    /// Substrate head subscription: finalized (safe) or best (fast but may reorg).
    #[arg(long, env = "BLOCK_MODE", default_value = "finalized")]
    block_mode: BlockMode,
}

impl Cli {
    fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            past_events_window: self.past_events_window,
            live_events_step: self.live_events_step,
            stride_policy: self.stride_policy,
            rpc_timeout: Duration::from_secs(self.rpc_timeout_secs),
            poll_interval: Duration::from_secs(self.poll_interval_secs),
            ..Default::default()
        }
    }
}

/// What every domain task shares.
#[derive(Clone)]
struct Shared {
    scheduler: SchedulerConfig,
    block_mode: BlockMode,
    repositories: Arc<dyn Repositories>,
    engine: Arc<CorrelationEngine>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    // Prometheus metrics exporter (optional - failures don't crash the app)
    let metrics_enabled = match format!("0.0.0.0:{}", cli.metrics_port).parse::<std::net::SocketAddr>() {
        Ok(metrics_addr) => {
            match PrometheusBuilder::new()
                .with_http_listener(metrics_addr)
                .install()
            {
                Ok(()) => {
                    init_metrics();
                    true
                }
                Err(e) => {
                    warn!("⚠️  Failed to start metrics exporter: {}. Continuing without metrics.", e);
                    false
                }
            }
        }
        Err(e) => {
            warn!("⚠️  Invalid metrics address: {}. Continuing without metrics.", e);
            false
        }
    };

    // ─────────────────────────────────────────────────────────────────────────
    // 🚀 STARTUP
    // ─────────────────────────────────────────────────────────────────────────
    info!("🚀 Starting Ferry Indexer");
    debug!(database_url = %mask_password(&cli.database_url), "Database endpoint");

    // ─────────────────────────────────────────────────────────────────────────
    // 🗄️ DATABASE
    // ─────────────────────────────────────────────────────────────────────────
    info!("🗄️  Connecting to database...");
    let db = Database::connect(&DatabaseConfig::for_indexer(&cli.database_url))
        .await
        .context("Failed to connect to database")?;

    db.migrate().await.context("Failed to run migrations")?;
    info!("🗄️  Database ready (migrations applied)");

    if cli.migrate_only {
        info!("🛑 --migrate-only flag set, exiting");
        return Ok(());
    }

    if cli.purge {
        return handle_purge(&db, cli.yes).await;
    }

    let db = Arc::new(db);
    let repositories: Arc<dyn Repositories> = Arc::new(PgRepositories::new(db.clone()));

    // ─────────────────────────────────────────────────────────────────────────
    // 🧭 REGISTRY
    // ─────────────────────────────────────────────────────────────────────────
    let shared_config = load_shared_config(&cli.shared_config)
        .await
        .context("Failed to load shared bridge configuration")?;
    let registry = DomainRegistry::from_json(&shared_config, &cli.rpc_url_config)
        .context("Invalid bridge configuration")?;
    info!(
        domains = registry.len(),
        indexable = registry.indexable().count(),
        "🧭 Registry loaded"
    );

    let blacklist = CorrelationPolicy::parse_blacklist(&cli.blacklisted_domains)
        .context("Invalid BLACKLISTED_DOMAINS")?;
    if !blacklist.is_empty() {
        info!(domains = ?blacklist, "🚫 Blacklisted destination domains");
    }

    let prices: Arc<dyn PriceOracle> = match cli.coinmarketcap_api_key.as_deref() {
        Some(key) if !key.is_empty() => {
            Arc::new(CoinMarketCapOracle::new(&cli.coinmarketcap_api_url, key))
        }
        _ => {
            warn!("⚠️  No CoinMarketCap API key, USD values will be recorded as 0");
            Arc::new(DisabledOracle)
        }
    };

    let engine = Arc::new(CorrelationEngine::new(
        repositories.clone(),
        prices,
        CorrelationPolicy::default().with_blacklist(blacklist),
    ));
    let shared = Shared {
        scheduler: cli.scheduler_config(),
        block_mode: cli.block_mode,
        repositories,
        engine,
    };

    // ─────────────────────────────────────────────────────────────────────────
    // ⚡ DOMAIN INDEXERS
    // ─────────────────────────────────────────────────────────────────────────
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let handles: Vec<JoinHandle<()>> = registry
        .indexable()
        .cloned()
        .map(|domain| {
            let span = info_span!("indexer", domain = %domain.name);
            let shared = shared.clone();
            let shutdown_rx = shutdown_rx.clone();
            tokio::spawn(
                async move {
                    match run_domain(domain, shared, shutdown_rx).await {
                        Ok(()) | Err(IndexerError::ShutdownRequested) => {}
                        Err(e) => error!(error = ?e, "❌ Indexer error"),
                    }
                }
                .instrument(span),
            )
        })
        .collect();

    if handles.is_empty() {
        warn!("⚠️  No domain has an RPC endpoint, nothing to index");
    }

    // ─────────────────────────────────────────────────────────────────────────
    // ✅ READY
    // ─────────────────────────────────────────────────────────────────────────
    info!("✅ Ferry ready");
    info!("   ⛓️  Domains:  {}", handles.len());
    if metrics_enabled {
        info!(
            "   📊 Metrics:  http://localhost:{}/metrics",
            cli.metrics_port
        );
    } else {
        info!("   📊 Metrics:  disabled");
    }
    info!("   Press Ctrl+C to stop");

    shutdown_signal().await;

    // ─────────────────────────────────────────────────────────────────────────
    // 🛑 SHUTDOWN
    // ─────────────────────────────────────────────────────────────────────────
    info!("🛑 Shutting down...");
    let _ = shutdown_tx.send(true);

    let all_stopped = wait_all(handles);
    match tokio::time::timeout(Duration::from_secs(30), all_stopped).await {
        Ok(()) => debug!("Indexers stopped"),
        Err(_) => warn!("⚠️  Indexer shutdown timed out"),
    }

    db.close().await;

    info!("🛑 Shutdown complete");
    Ok(())
}

/// Connect to the domain's node and run its indexer until shutdown.
///
/// Connection failures are retried with backoff so one unreachable node
/// never stops the other domains.
async fn run_domain(
    domain: Domain,
    shared: Shared,
    mut shutdown_rx: watch::Receiver<bool>,
) -> IndexerResult<()> {
    let Some(url) = domain.rpc_url.clone() else {
        return Ok(());
    };
    let mut retry_delay = shared.scheduler.retry_delay;

    match domain.kind {
        ChainKind::Substrate => {
            let client = loop {
                let config = SubstrateClientConfig {
                    ws_url: url.clone(),
                    domain: domain.name.clone(),
                    block_mode: shared.block_mode,
                };
                match SubstrateClient::connect(config).await {
                    Ok(client) => break client,
                    Err(e) => {
                        warn!(error = %e, "⚠️  Failed to connect to Substrate node, retrying...");
                        backoff(&mut retry_delay, shared.scheduler.max_retry_delay, &mut shutdown_rx)
                            .await?;
                    }
                }
            };
            info!(url = %url, "🔗 Substrate node connected");

            SubstrateIndexer::new(
                domain,
                shared.scheduler,
                Arc::new(client),
                shared.repositories,
                shared.engine,
            )
            .run(shutdown_rx)
            .await
        }
        ChainKind::Evm => {
            let client = EvmClient::new(&url)?;
            EvmIndexer::new(
                domain,
                shared.scheduler,
                Arc::new(client),
                shared.repositories,
                shared.engine,
            )?
            .run(shutdown_rx)
            .await
        }
    }
}

async fn wait_all(handles: Vec<JoinHandle<()>>) {
    for handle in handles {
        if let Err(e) = handle.await {
            error!(error = %e, "❌ Indexer task panicked");
        }
    }
}

/// Read the shared configuration from a file or an http(s) URL.
async fn load_shared_config(location: &str) -> Result<String> {
    if location.starts_with("http://") || location.starts_with("https://") {
        let body = reqwest::get(location)
            .await
            .with_context(|| format!("Failed to fetch {location}"))?
            .error_for_status()?
            .text()
            .await?;
        Ok(body)
    } else {
        tokio::fs::read_to_string(location)
            .await
            .with_context(|| format!("Failed to read {location}"))
    }
}

/// Initialize tracing subscriber.
fn init_tracing(level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    if json {
        fmt().with_env_filter(filter).json().init();
    } else {
        fmt()
            .with_env_filter(filter)
            .with_target(false)
            .with_thread_ids(false)
            .with_file(false)
            .with_line_number(false)
            .init();
    }
}

/// Mask password in database URL for logging.
fn mask_password(url_str: &str) -> String {
    match url::Url::parse(url_str) {
        Ok(mut url) => {
            if url.password().is_some() {
                let _ = url.set_password(Some("****"));
            }
            url.to_string()
        }
        Err(_) => url_str.to_string(),
    }
}

/// Wait for shutdown signal (Ctrl+C or SIGTERM).
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// Handle the --purge command.
async fn handle_purge(db: &Database, skip_confirmation: bool) -> Result<()> {
    warn!("⚠️  PURGE MODE: This will delete ALL indexed data!");
    warn!("   - All transfers, deposits, executions, fees and accounts");
    warn!("   - Every domain checkpoint will be reset");
    warn!("   - Schema and migrations will be preserved");

    if !skip_confirmation {
        print!("\n🔴 Are you sure you want to purge all data? [y/N] ");
        io::stdout().flush()?;

        let mut input = String::new();
        io::stdin().read_line(&mut input)?;

        if !input.trim().eq_ignore_ascii_case("y") {
            info!("❌ Purge cancelled");
            return Ok(());
        }
    }

    info!("🗑️  Purging database...");
    let stats = db.purge().await.context("Failed to purge database")?;

    info!("✅ Database purged successfully");
    info!("   🔁 Transfers removed: {}", stats.transfers_removed);
    info!("   📥 Deposits removed: {}", stats.deposits_removed);
    info!("   📤 Executions removed: {}", stats.executions_removed);
    info!("   💰 Fees removed: {}", stats.fees_removed);
    info!("   Every domain will restart from its start block on next run");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mask_password() {
        assert_eq!(
            mask_password("postgres://ferry:secret@db:5432/ferry"),
            "postgres://ferry:****@db:5432/ferry"
        );
        assert_eq!(
            mask_password("postgres://localhost/ferry"),
            "postgres://localhost/ferry"
        );
    }

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["ferry"]).unwrap();
        let config = cli.scheduler_config();
        assert_eq!(config.past_events_window, 2000);
        assert_eq!(config.live_events_step, 10);
        assert_eq!(config.stride_policy, StridePolicy::AtLeast);
        assert_eq!(config.poll_interval, Duration::from_secs(12));
        assert_eq!(cli.block_mode, BlockMode::Finalized);
    }

    #[test]
    fn test_cli_overrides() {
        let cli = Cli::try_parse_from([
            "ferry",
            "--past-events-window",
            "500",
            "--stride-policy",
            "exact",
            "--block-mode",
            "best",
            "--rpc-timeout-secs",
            "5",
        ])
        .unwrap();
        let config = cli.scheduler_config();
        assert_eq!(config.past_events_window, 500);
        assert_eq!(config.stride_policy, StridePolicy::Exact);
        assert_eq!(config.rpc_timeout, Duration::from_secs(5));
        assert_eq!(cli.block_mode, BlockMode::Best);
    }

    #[tokio::test]
    async fn test_load_shared_config_missing_file() {
        let result = load_shared_config("/nonexistent/shared-config.json").await;
        assert!(result.is_err());
    }
}
