use std::sync::Arc;
use std::time::Duration;

use alpaca_broker::AlpacaClient;
use anyhow::Result;
use chrono::Utc;
use execution_core::{reconcile_stuck_buy_phases, EventBus, InMemoryTradeQueue, SingleTradeWorker, TradeQueue, WorkerConfig as CoreWorkerConfig};
use execution_strategies::time_aware::{TimeAwareConfig, TimeAwareExecutor};
use portfolio_validator::PortfolioValidator;
use quote_pipeline::{QuotePipeline, QuotePipelineConfig, StreamingQuoteCache};
use run_store::{PendingExecutionStore, RunStore, SqliteRunStore};
use tokio::signal::unix::SignalKind;
use tokio::time;
use uuid::Uuid;

mod config;

use config::WorkerConfig;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let json_logging = std::env::var("RUST_LOG_FORMAT").map(|v| v.eq_ignore_ascii_case("json")).unwrap_or(false);
    if json_logging {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")))
            .init();
    }

    std::panic::set_hook(Box::new(|info| {
        eprintln!("PANIC: {info}");
        tracing::error!("PANIC: {info}");
    }));

    tracing::info!("Starting execution worker");

    let config = WorkerConfig::from_env()?;
    tracing::info!(
        equity_deployment_pct = %config.equity_deployment_pct,
        sell_failure_threshold_usd = %config.sell_failure_threshold_usd,
        poll_interval_seconds = config.poll_interval_seconds,
        "configuration loaded"
    );

    let alpaca = Arc::new(AlpacaClient::new(config.alpaca_api_key.clone(), config.alpaca_secret_key.clone(), config.alpaca_base_url.clone())?);

    if !alpaca.is_paper() {
        let approved = std::env::var("LIVE_TRADING_APPROVED").map(|v| v.eq_ignore_ascii_case("yes")).unwrap_or(false);
        if !approved {
            tracing::error!(
                "ALPACA_BASE_URL points to live trading. Set LIVE_TRADING_APPROVED=yes to enable, \
                 or point ALPACA_BASE_URL at a paper endpoint."
            );
            std::process::exit(1);
        }
        tracing::warn!("LIVE TRADING MODE -- real money at risk");
    } else {
        tracing::info!("Paper trading mode");
    }

    let run_store = Arc::new(SqliteRunStore::connect(&config.database_url).await?);
    let run_store_dyn: Arc<dyn RunStore> = run_store.clone();
    let pending_store_dyn: Arc<dyn PendingExecutionStore> = run_store.clone();
    tracing::info!("run store connected ({})", config.database_url);

    let quote_cache = Arc::new(StreamingQuoteCache::new());
    let quote_pipeline = Arc::new(QuotePipeline::new(
        alpaca.clone(),
        quote_cache,
        QuotePipelineConfig {
            streaming_timeout_ms: config.streaming_timeout_ms,
            streaming_poll_interval_ms: 100,
            quote_freshness_seconds: config.quote_freshness_seconds,
        },
    ));

    let validator = Arc::new(PortfolioValidator::new(alpaca.clone()));
    let event_bus = Arc::new(EventBus::default());
    let queue: Arc<dyn TradeQueue> = Arc::new(InMemoryTradeQueue::new());

    let worker = Arc::new(SingleTradeWorker::new(
        alpaca.clone(),
        run_store_dyn.clone(),
        pending_store_dyn.clone(),
        queue.clone(),
        quote_pipeline.clone(),
        validator,
        event_bus,
        CoreWorkerConfig { sell_failure_threshold_usd: config.sell_failure_threshold_usd },
    ));

    let tick_executor = Arc::new(TimeAwareExecutor::new(alpaca.clone(), pending_store_dyn.clone(), TimeAwareConfig::default()));

    tracing::info!("Worker is running. Press Ctrl+C to stop.");

    let mut poll_interval = time::interval(Duration::from_secs(config.poll_interval_seconds));
    let mut reconcile_interval = time::interval(Duration::from_secs(config.reconcile_interval_seconds));
    let mut tick_interval = time::interval(Duration::from_secs(config.tick_interval_minutes * 60));
    let mut sigterm = tokio::signal::unix::signal(SignalKind::terminate())?;

    let shutdown = async {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => { tracing::info!("received SIGINT"); }
            _ = sigterm.recv() => { tracing::info!("received SIGTERM"); }
        }
    };
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = poll_interval.tick() => {
                match queue.receive_batch(config.poll_batch_size).await {
                    Ok(batch) if !batch.is_empty() => {
                        tracing::debug!(count = batch.len(), "dispatching trade messages");
                        for queued in batch {
                            let worker = worker.clone();
                            tokio::spawn(async move {
                                if let Err(err) = worker.handle(queued).await {
                                    tracing::error!(error = %err, "trade handling failed");
                                }
                            });
                        }
                    }
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "failed to poll trade queue"),
                }
            }
            _ = reconcile_interval.tick() => {
                match reconcile_stuck_buy_phases(&run_store_dyn, &queue).await {
                    Ok(resweept) if resweept > 0 => tracing::info!(resweept, "reconciliation sweep re-enqueued stuck buy phases"),
                    Ok(_) => {}
                    Err(err) => tracing::warn!(error = %err, "reconciliation sweep failed"),
                }
            }
            _ = tick_interval.tick() => {
                match pending_store_dyn.list_active_pending_executions().await {
                    Ok(executions) => {
                        for execution in executions {
                            let symbol = execution.symbol.clone();
                            let quote = match quote_pipeline.get_best_quote(&symbol, Uuid::new_v4()).await {
                                Ok(quote) => quote,
                                Err(err) => {
                                    tracing::warn!(error = %err, symbol, "no usable quote for pending execution tick, skipping");
                                    continue;
                                }
                            };
                            if let Err(err) = tick_executor.tick(execution, Utc::now(), &quote).await {
                                tracing::warn!(error = %err, symbol, "pending execution tick failed");
                            }
                        }
                    }
                    Err(err) => tracing::warn!(error = %err, "failed to list active pending executions"),
                }
            }
            _ = &mut shutdown => {
                tracing::info!("shutdown signal received, exiting gracefully...");
                break;
            }
        }
    }

    tracing::info!("execution worker shut down.");
    Ok(())
}
