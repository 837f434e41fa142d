// =============================================================================
// kawase-engine — Main Entry Point
// =============================================================================
//
// FX market-data gateway and signal engine for GMO Coin. The default build
// is read-only: quotes and signals flow, order endpoints stay unreachable
// until trading is explicitly enabled AND credentials are configured.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use kawase_engine::app_state::AppState;
use kawase_engine::config::{Credentials, RuntimeConfig};
use kawase_engine::error::GatewayError;
use kawase_engine::execution::ExecutionEngine;
use kawase_engine::gmo::bus::MarketBus;
use kawase_engine::gmo::client::GmoClient;
use kawase_engine::gmo::rate_limit::RateLimiter;
use kawase_engine::gmo::ws_private::PrivateWsClient;
use kawase_engine::gmo::ws_public::PublicWsClient;
use kawase_engine::publisher::{
    IntervalTicker, M15AlignedTicker, SignalPublisher, ANALYSIS_INTERVAL,
};
use kawase_engine::store::{CandleRepository, NullRepository};
use kawase_engine::strategy::{Strategy, TfqeStrategy};
use kawase_engine::types::Timeframe;
use kawase_engine::api;

const CONFIG_PATH: &str = "runtime_config.json";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // ── 1. Environment & config ──────────────────────────────────────────
    let _ = dotenv::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("kawase-engine starting up");

    let mut config = RuntimeConfig::load(CONFIG_PATH).unwrap_or_else(|e| {
        warn!(error = %e, "failed to load config, using defaults");
        RuntimeConfig::default()
    });
    config.apply_env_overrides();
    config
        .validate()
        .map_err(|e| GatewayError::Config(e.to_string()))?;

    let credentials = Credentials::from_env();
    if credentials.is_none() {
        info!("no API credentials in environment — running public-only");
        if config.trading_enabled {
            warn!("trading_enabled without credentials — forcing read-only");
            config.trading_enabled = false;
        }
    }
    info!(
        symbols = ?config.symbols,
        trading_enabled = config.trading_enabled,
        "configured"
    );

    // ── 2. Gateway & shared state ────────────────────────────────────────
    let limiter = Arc::new(RateLimiter::new(&config.limits));
    let client = Arc::new(GmoClient::new(
        limiter.clone(),
        credentials.clone(),
        config.clock_skew_max_ms,
    ));
    let state = Arc::new(AppState::new(config));
    let repository = Arc::new(NullRepository);

    // ── 3. Initial market status ─────────────────────────────────────────
    match client.get_status().await {
        Ok(status) => {
            *state.market_status.write() = status.status;
            info!(status = %status.status, "broker status");
        }
        Err(e) => warn!(error = %e, "initial status fetch failed"),
    }

    // ── 4. Publisher (also used for warm-up backfill) ────────────────────
    let strategies: Vec<Arc<dyn Strategy>> = vec![Arc::new(TfqeStrategy::new(
        state.config.read().tfqe.clone(),
    ))];
    let execution = Some(Arc::new(ExecutionEngine::new(
        client.clone(),
        state.clone(),
    )));
    let signal_publisher = Arc::new(SignalPublisher::new(
        state.clone(),
        client.clone(),
        repository.clone(),
        strategies,
        execution,
    ));

    let warmup_symbols = state.config.read().symbols.clone();
    for symbol in &warmup_symbols {
        signal_publisher
            .ensure_fresh(*symbol, &Timeframe::ALL)
            .await;
    }
    info!(count = warmup_symbols.len(), "candle rings warmed up");

    // ── 5. Shutdown channels ─────────────────────────────────────────────
    // Jobs stop first, streams drain second; the ordering is enforced at
    // the bottom of main.
    let (jobs_shutdown_tx, jobs_shutdown_rx) = watch::channel(false);
    let (ws_shutdown_tx, ws_shutdown_rx) = watch::channel(false);

    // ── 6. Market data streams ───────────────────────────────────────────
    let (bus, mut receivers) = MarketBus::new();

    let public_ws = PublicWsClient::new(
        warmup_symbols.clone(),
        bus.clone(),
        limiter.clone(),
        ws_shutdown_rx.clone(),
    );
    let public_ws_handle = tokio::spawn(public_ws.run());

    let private_ws_handle = if client.has_credentials() {
        let private_ws =
            PrivateWsClient::new(client.clone(), bus.clone(), ws_shutdown_rx.clone());
        Some(tokio::spawn(private_ws.run()))
    } else {
        None
    };

    // ── 7. Quote consumer: board + candle aggregation + persistence ──────
    {
        let state = state.clone();
        let repository = repository.clone();
        let mut quotes = bus.subscribe_quotes();
        let mut shutdown = jobs_shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    received = quotes.recv() => match received {
                        Ok(quote) => {
                            let closed = state.candle_store.apply_quote(&quote);
                            state.record_quote(quote);
                            for (key, candle) in closed {
                                if let Err(e) = repository
                                    .append(key.symbol, key.timeframe, &candle)
                                    .await
                                {
                                    warn!(%key, error = %e, "candle persistence failed");
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                            // Stale quotes have no value; skip ahead.
                            warn!(dropped = n, "quote consumer lagged");
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        });
    }

    // ── 8. Private event consumers ───────────────────────────────────────
    {
        let state = state.clone();
        let mut shutdown = jobs_shutdown_rx.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    event = receivers.executions.recv() => match event {
                        Some(fill) => {
                            info!(
                                symbol = %fill.symbol,
                                side = %fill.side,
                                price = %fill.execution_price,
                                size = %fill.execution_size,
                                "execution event"
                            );
                            state.increment_version();
                        }
                        None => return,
                    },
                    event = receivers.orders.recv() => match event {
                        Some(order) => {
                            info!(
                                symbol = %order.symbol,
                                order_id = order.order_id,
                                status = %order.order_status,
                                "order event"
                            );
                            state.increment_version();
                        }
                        None => return,
                    },
                    event = receivers.positions.recv() => match event {
                        Some(position) => {
                            info!(
                                symbol = %position.symbol,
                                position_id = position.position_id,
                                size = %position.size,
                                "position event"
                            );
                            state.increment_version();
                        }
                        None => return,
                    },
                    event = receivers.position_summaries.recv() => match event {
                        Some(summary) => {
                            tracing::debug!(
                                symbol = %summary.symbol,
                                loss_gain = %summary.position_loss_gain,
                                "position summary"
                            );
                        }
                        None => return,
                    },
                }
            }
        });
    }

    // ── 9. Status poll & account reconcile loops ─────────────────────────
    {
        let state = state.clone();
        let client = client.clone();
        let mut shutdown = jobs_shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = interval.tick() => {}
                }
                match client.get_status().await {
                    Ok(status) => {
                        let mut current = state.market_status.write();
                        if *current != status.status {
                            info!(from = %*current, to = %status.status, "market status changed");
                            *current = status.status;
                            drop(current);
                            state.increment_version();
                        }
                    }
                    Err(e) => warn!(error = %e, "status poll failed"),
                }
            }
        });
    }

    if client.has_credentials() {
        let state = state.clone();
        let client = client.clone();
        let mut shutdown = jobs_shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(60));
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = interval.tick() => {}
                }
                match client.get_assets().await {
                    Ok(assets) => {
                        *state.assets.write() = Some(assets);
                        state.increment_version();
                    }
                    Err(e) => {
                        warn!(error = %e, "account reconcile failed");
                        state.push_error(
                            format!("reconcile: {e}"),
                            e.broker_code().map(String::from),
                        );
                    }
                }
            }
        });
    }

    // ── 10. Consumer-stall watchdog ──────────────────────────────────────
    {
        let state = state.clone();
        let bus = bus.clone();
        let mut shutdown = jobs_shutdown_rx.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(Duration::from_secs(5));
            let mut alerted = false;
            loop {
                tokio::select! {
                    _ = shutdown.changed() => return,
                    _ = interval.tick() => {}
                }
                let stalled = bus.any_stalled();
                if stalled && !alerted {
                    let err = GatewayError::ConsumerStall {
                        channel: "private-events".into(),
                    };
                    error!(error = %err, "event consumer is not draining");
                    state.push_error(err.to_string(), None);
                }
                alerted = stalled;
            }
        });
    }

    // ── 11. Publisher loops ──────────────────────────────────────────────
    let tfqe_handle = tokio::spawn(signal_publisher.clone().run_tfqe_loop(
        Box::new(M15AlignedTicker),
        jobs_shutdown_rx.clone(),
    ));
    let analysis_handle = tokio::spawn(signal_publisher.clone().run_analysis_loop(
        Box::new(IntervalTicker::new(ANALYSIS_INTERVAL)),
        jobs_shutdown_rx.clone(),
    ));

    // ── 12. Snapshot API ─────────────────────────────────────────────────
    let bind_addr = state.config.read().bind_addr.clone();
    let app = api::rest::router(state.clone());
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!(addr = %bind_addr, "snapshot API listening");
    let mut api_shutdown = jobs_shutdown_rx.clone();
    let api_handle = tokio::spawn(async move {
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = api_shutdown.changed().await;
            })
            .await;
        if let Err(e) = result {
            error!(error = %e, "snapshot API failed");
        }
    });

    info!("all subsystems running — Ctrl+C to stop");

    // ── 13. Graceful shutdown: publisher first, then streams ─────────────
    tokio::signal::ctrl_c().await?;
    warn!("shutdown signal received");

    let _ = jobs_shutdown_tx.send(true);
    for (name, handle) in [
        ("tfqe publisher", tfqe_handle),
        ("analysis publisher", analysis_handle),
        ("api", api_handle),
    ] {
        if tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .is_err()
        {
            warn!(task = name, "did not stop within 5s");
        }
    }

    // Streams drain second: unsubscribe frames go out and the private
    // token is deleted before the process exits.
    let _ = ws_shutdown_tx.send(true);
    if tokio::time::timeout(Duration::from_secs(10), public_ws_handle)
        .await
        .is_err()
    {
        warn!("public stream did not drain within 10s");
    }
    if let Some(handle) = private_ws_handle {
        if tokio::time::timeout(Duration::from_secs(10), handle)
            .await
            .is_err()
        {
            warn!("private stream did not drain within 10s");
        }
    }

    if let Err(e) = state.config.read().save(CONFIG_PATH) {
        error!(error = %e, "failed to save config on shutdown");
    }

    info!("kawase-engine shut down complete");
    Ok(())
}
