//! Perp Grid Bot - Entry Point
//!
//! Initializes configuration, logging, the venue adapter and the
//! strategy controller. Runs until SIGINT/SIGTERM, the stop price, or a
//! fatal venue error.
//!
//! Wiring sequence:
//! 1. Load config (path from argv[1], `PERP_BOT_CONFIG`, or `config.toml`)
//! 2. Init tracing (JSON structured logging)
//! 3. Spawn health (/live, /ready) and Prometheus (/metrics) servers
//! 4. Open the JSONL transaction log
//! 5. Build the venue adapter (paper or Aster; Aster credentials from env)
//! 6. Run the strategy controller until it returns
//! 7. Broadcast shutdown to background tasks and exit
//!
//! Exit codes: 0 after a shutdown signal, 2 when the stop price is
//! reached, 1 on any fatal error.

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

use perp_grid_bot::adapters::aster::{
    AsterAuth, AsterClient, AsterClientConfig, AsterExchange, ContractSpec,
};
use perp_grid_bot::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use perp_grid_bot::adapters::paper::PaperExchange;
use perp_grid_bot::adapters::persistence::TransactionLogger;
use perp_grid_bot::config::{self, AppConfig, VenueKind};
use perp_grid_bot::ports::audit::TransactionLog;
use perp_grid_bot::ports::exchange::ExchangeAdapter;
use perp_grid_bot::ports::telemetry::CycleObserver;
use perp_grid_bot::usecases::{RunOutcome, StrategyController};

const CONFIG_ENV: &str = "PERP_BOT_CONFIG";
const DEFAULT_CONFIG: &str = "config.toml";

fn main() -> ExitCode {
    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            eprintln!("failed to start tokio runtime: {e}");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(run()) {
        Ok(outcome) => {
            info!(outcome = ?outcome, "Bot exited");
            ExitCode::from(u8::try_from(outcome.exit_code()).unwrap_or(1))
        }
        Err(e) => {
            error!(error = %format!("{e:#}"), "Bot halted");
            eprintln!("fatal: {e:#}");
            ExitCode::from(1)
        }
    }
}

fn config_path() -> String {
    std::env::args()
        .nth(1)
        .or_else(|| std::env::var(CONFIG_ENV).ok())
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string())
}

async fn run() -> Result<RunOutcome> {
    // ── 1. Load configuration ───────────────────────────────
    let path = config_path();
    let config = config::loader::load_config(&path).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.bot.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.bot.name,
        version = env!("CARGO_PKG_VERSION"),
        config = %path,
        venue = ?config.venue.exchange,
        contract = %config.strategy.contract_id,
        "Starting perp grid bot"
    );

    // ── 3. Shutdown channel + signal listener ───────────────
    let (shutdown_tx, _) = broadcast::channel::<()>(4);
    let signal_tx = shutdown_tx.clone();
    tokio::spawn(async move {
        wait_for_signal().await;
        info!("Shutdown signal received");
        let _ = signal_tx.send(());
    });

    // ── 4. Health + metrics servers ─────────────────────────
    let health = Arc::new(HealthState::new());
    let metrics = Arc::new(
        MetricsRegistry::new(Arc::clone(&health)).context("Failed to register metrics")?,
    );
    if config.metrics.enabled {
        let server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
        let rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = server.run(rx).await {
                error!(error = %e, "Health server failed");
            }
        });

        let registry = Arc::clone(&metrics);
        let bind = config.metrics.bind_address.clone();
        let rx = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = registry.serve(bind, rx).await {
                error!(error = %e, "Metrics server failed");
            }
        });
    }

    // ── 5. Transaction log ──────────────────────────────────
    let audit: Arc<dyn TransactionLog> = Arc::new(
        TransactionLogger::new(&config.persistence.data_dir)
            .await
            .context("Failed to open transaction log")?,
    );

    // ── 6. Venue adapter + controller ───────────────────────
    let observer: Arc<dyn CycleObserver> = metrics;
    let outcome = match config.venue.exchange {
        VenueKind::Paper => {
            let paper = Arc::new(PaperExchange::new(
                config.venue.paper.best_bid,
                config.venue.paper.best_ask,
                config.strategy.tick_size,
            ));
            if config.venue.paper.follow_live_quotes {
                spawn_quote_follower(&config, Arc::clone(&paper), shutdown_tx.subscribe())?;
            }
            drive(paper, &config, audit, observer, &shutdown_tx).await
        }
        VenueKind::Aster => {
            let auth = AsterAuth::from_env(config.venue.account.as_deref())?;
            let client = Arc::new(AsterClient::new(
                Some(auth),
                AsterClientConfig::from_venue(&config.venue),
            )?);
            let contract = ContractSpec {
                ticker: config.strategy.ticker.clone(),
                contract_id: config.strategy.contract_id.clone(),
                tick_size: config.strategy.tick_size,
                quantity: config.strategy.quantity,
            };
            let aster = Arc::new(AsterExchange::new(client, contract, config.venue.ws_url.clone()));
            drive(aster, &config, audit, observer, &shutdown_tx).await
        }
    };

    // ── 7. Stop background tasks ────────────────────────────
    let _ = shutdown_tx.send(());
    tokio::time::sleep(Duration::from_millis(100)).await;

    outcome
}

/// Build and run the controller against one adapter.
async fn drive<E: ExchangeAdapter>(
    exchange: Arc<E>,
    config: &AppConfig,
    audit: Arc<dyn TransactionLog>,
    observer: Arc<dyn CycleObserver>,
    shutdown_tx: &broadcast::Sender<()>,
) -> Result<RunOutcome> {
    let mut controller =
        StrategyController::new(exchange, config.strategy.clone(), audit, shutdown_tx.subscribe())
            .with_observer(observer);

    let outcome = controller.run().await?;
    Ok(outcome)
}

/// Drive the paper book from the live venue's public book ticker.
fn spawn_quote_follower(
    config: &AppConfig,
    paper: Arc<PaperExchange>,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<()> {
    let client = AsterClient::new(None, AsterClientConfig::from_venue(&config.venue))?;
    let contract = config.strategy.contract_id.clone();
    let every = Duration::from_millis(config.venue.paper.quote_poll_ms.max(100));

    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => break,
                _ = ticker.tick() => {
                    match client.book_ticker(&contract).await {
                        Ok(t) if t.bid_price > rust_decimal::Decimal::ZERO && t.bid_price < t.ask_price => {
                            paper.set_bbo(t.bid_price, t.ask_price);
                        }
                        Ok(t) => warn!(bid = %t.bid_price, ask = %t.ask_price, "Ignoring invalid live quote"),
                        Err(e) => warn!(error = %e, "Live quote fetch failed"),
                    }
                }
            }
        }
        info!("Quote follower stopped");
    });

    Ok(())
}

#[cfg(unix)]
async fn wait_for_signal() {
    use tokio::signal::unix::{signal, SignalKind};

    match signal(SignalKind::terminate()) {
        Ok(mut term) => {
            tokio::select! {
                _ = tokio::signal::ctrl_c() => {}
                _ = term.recv() => {}
            }
        }
        Err(e) => {
            warn!(error = %e, "SIGTERM handler unavailable, listening for SIGINT only");
            let _ = tokio::signal::ctrl_c().await;
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_signal() {
    let _ = tokio::signal::ctrl_c().await;
}
