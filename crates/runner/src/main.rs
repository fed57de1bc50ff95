use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use clap::{Parser, ValueEnum};
use common::TradingMode;
use connector_core::{create_broker_channel, create_market_channel, MarketEventSender};
use metrics::{create_metrics, EventSink};
use model::{MarketEvent, Tick};
use rust_decimal::Decimal;
use strategy_core::BoxedStrategy;
use strategy_runner::examples::{
    RsiThresholdConfig, RsiThresholdStrategy, SessionBreakoutConfig, SessionBreakoutStrategy,
};
use strategy_runner::{
    CoordinatorConfig, EngineConfig, EngineServices, ExecutionCoordinator, PaperBroker, RunnerSettings,
};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::watch;
use tracing::{error, info, warn};

/// Interval for periodic health status logging.
const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(60);

const CHANNEL_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum StrategyKind {
    /// RSI oversold/overbought mean reversion
    Rsi,
    /// London open range breakout
    London,
}

/// Run one strategy against a tick stream.
#[derive(Debug, Parser)]
#[command(name = "runner", version)]
struct Cli {
    strategy: StrategyKind,

    #[arg(long, default_value = "EURUSD")]
    symbol: String,

    /// Per-trade risk in percent of equity.
    #[arg(long)]
    risk_percent: Option<Decimal>,

    /// Engine configuration file (TOML).
    #[arg(long, env = "ENGINE_CONFIG")]
    config: Option<PathBuf>,

    /// Newline-delimited JSON ticks. Reads stdin when omitted.
    #[arg(long)]
    ticks: Option<PathBuf>,

    #[arg(long, env = "TRADING_MODE", default_value_t = TradingMode::Paper)]
    mode: TradingMode,

    /// Emit logs as JSON lines.
    #[arg(long)]
    json: bool,
}

impl Cli {
    fn strategy(&self) -> BoxedStrategy {
        match self.strategy {
            StrategyKind::Rsi => {
                let mut config = RsiThresholdConfig::new(&self.symbol);
                if let Some(percent) = self.risk_percent {
                    config = config.with_risk_percent(percent);
                }
                Box::new(RsiThresholdStrategy::new("rsi", config))
            }
            StrategyKind::London => {
                let mut config = SessionBreakoutConfig::london(&self.symbol);
                if let Some(percent) = self.risk_percent {
                    config = config.with_risk_percent(percent);
                }
                Box::new(SessionBreakoutStrategy::new("london", config))
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    common::init_logging_with(cli.json);

    if cli.mode.is_live() {
        bail!("live mode needs a broker adapter and none is bundled; use --mode paper");
    }

    let config = EngineConfig::load(cli.config.as_deref()).context("loading engine configuration")?;
    let metrics = create_metrics();

    let (broker_tx, broker_rx) = create_broker_channel(CHANNEL_CAPACITY);
    let (market_tx, market_rx) = create_market_channel(CHANNEL_CAPACITY);
    let broker = Arc::new(PaperBroker::new(broker_tx));

    let services = EngineServices::from_config(&config, broker, EventSink::log_only(), metrics.clone())?;
    let ledger = services.ledger.clone();
    let mut coordinator = ExecutionCoordinator::new(services, CoordinatorConfig::from(&config));

    let strategy = cli.strategy();
    let mut settings = RunnerSettings::from(&config.strategy_settings(strategy.id()));
    if let Some(percent) = cli.risk_percent {
        settings = settings.with_risk_percent(percent);
    }
    let strategy_id = strategy.id().to_string();
    coordinator.add_strategy(strategy, settings)?;

    info!(
        strategy = %strategy_id,
        symbol = %cli.symbol,
        mode = %cli.mode,
        account = %config.account.id,
        equity = %config.account.starting_equity,
        "starting engine"
    );

    // Create shutdown signal channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Spawn ctrl_c handler
    let shutdown_tx_clone = shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("received ctrl+c, initiating shutdown");
            let _ = shutdown_tx_clone.send(true);
        }
    });

    // Spawn periodic health reporter
    let health_metrics = metrics.clone();
    let mut health_shutdown_rx = shutdown_tx.subscribe();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(HEALTH_LOG_INTERVAL);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let snapshot = health_metrics.snapshot();
                    let status = snapshot.health_status();
                    info!(
                        status = %status,
                        ticks = snapshot.ticks_received,
                        ticks_per_sec = format!("{:.1}", snapshot.ticks_per_second),
                        approved = snapshot.orders_approved,
                        rejected = snapshot.orders_rejected,
                        broker_errors = snapshot.broker_errors,
                        "health check"
                    );
                }
                changed = health_shutdown_rx.changed() => {
                    if changed.is_err() || *health_shutdown_rx.borrow() {
                        break;
                    }
                }
            }
        }
    });

    let source: Box<dyn AsyncRead + Unpin + Send> = match &cli.ticks {
        Some(path) => Box::new(
            tokio::fs::File::open(path)
                .await
                .with_context(|| format!("opening tick file {}", path.display()))?,
        ),
        None => Box::new(tokio::io::stdin()),
    };
    let feed = tokio::spawn(feed_ticks(source, market_tx));

    coordinator.run(market_rx, broker_rx, shutdown_rx).await?;
    let _ = shutdown_tx.send(true);

    // Stdin may still be open after a ctrl+c
    if !feed.is_finished() {
        feed.abort();
    }
    match feed.await {
        Ok(Ok(lines)) => info!(lines, "tick feed finished"),
        Err(e) if e.is_cancelled() => info!("tick feed stopped"),
        Ok(Err(e)) => error!(error = %e, "tick feed failed"),
        Err(e) => error!(error = %e, "tick feed task panicked"),
    }

    // Print final metrics
    let snapshot = metrics.snapshot();
    println!("\n{}", snapshot);

    let account = ledger.snapshot();
    println!(
        "equity: {} | realized today: {} | open positions: {}",
        account.equity,
        account.realized_today,
        account.positions.len()
    );

    info!("shutdown complete");
    Ok(())
}

/// Forward JSON-lines market events until the input ends.
///
/// Each line is either a tagged `MarketEvent` or a bare tick. Malformed
/// lines are skipped.
async fn feed_ticks(
    source: Box<dyn AsyncRead + Unpin + Send>,
    market_tx: MarketEventSender,
) -> anyhow::Result<u64> {
    let mut lines = BufReader::new(source).lines();
    let mut count = 0u64;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        count += 1;

        let event = match serde_json::from_str::<MarketEvent>(line) {
            Ok(event) => event,
            Err(_) => match serde_json::from_str::<Tick>(line) {
                Ok(tick) => MarketEvent::Tick(tick),
                Err(e) => {
                    warn!(line = count, error = %e, "skipping malformed market event");
                    continue;
                }
            },
        };

        if market_tx.send(event).await.is_err() {
            // Coordinator stopped
            break;
        }
    }
    Ok(count)
}
