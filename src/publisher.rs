// =============================================================================
// Signal publisher — periodic snapshot production
// =============================================================================
//
// Two cadences drive the engine: the strategy loop fires on every M15
// boundary plus a two-second grace (so the just-closed bar is in the store),
// and the multi-timeframe loop fires every minute. Each tick re-checks ring
// freshness (backfilling over REST where a ring has fallen behind), runs the
// strategies and the analyzer against a single read of the store, and swaps
// in new immutable snapshots.
//
// Broker hiccups never reach the snapshot consumers: a failed backfill
// leaves the old data in place, and staleness is expressed through the
// `data_freshness` field with confidence capped low.
//
// Timers come through the `Ticker` trait so tests can drive the loops with
// a virtual clock.
// =============================================================================

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Datelike, Utc};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::analysis::frame::{analyze_timeframe, AnalysisFrame};
use crate::analysis::integrated::integrate;
use crate::analysis::session::market_session;
use crate::app_state::{AnalysisSnapshot, AppState, DataFreshness, TfqeSnapshot};
use crate::execution::ExecutionEngine;
use crate::gmo::client::GmoClient;
use crate::gmo::wire::KlineEntry;
use crate::market_data::SeriesKey;
use crate::store::CandleRepository;
use crate::strategy::Strategy;
use crate::types::{Candle, Symbol, Timeframe};

/// Grace after the M15 boundary before the strategy tick fires.
pub const TFQE_GRACE: Duration = Duration::from_secs(2);
/// Cadence of the multi-timeframe view.
pub const ANALYSIS_INTERVAL: Duration = Duration::from_secs(60);
/// Snapshot confidence ceiling while any required ring is stale.
pub const STALE_CONFIDENCE_CAP: u32 = 30;

/// Candles handed to the analyzer per timeframe.
const ANALYSIS_LOOKBACK: usize = 200;

// ---------------------------------------------------------------------------
// Tickers
// ---------------------------------------------------------------------------

/// A source of wake-ups. Production uses the wall clock; tests drive the
/// loops directly.
#[async_trait]
pub trait Ticker: Send {
    async fn tick(&mut self);
}

/// Fixed-interval ticker.
pub struct IntervalTicker {
    interval: tokio::time::Interval,
}

impl IntervalTicker {
    pub fn new(period: Duration) -> Self {
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        Self { interval }
    }
}

#[async_trait]
impl Ticker for IntervalTicker {
    async fn tick(&mut self) {
        self.interval.tick().await;
    }
}

/// Fires just after every M15 grid boundary.
pub struct M15AlignedTicker;

/// Milliseconds until the next M15 boundary plus grace, from `now_ms`.
pub fn ms_until_next_m15_fire(now_ms: i64) -> i64 {
    let period = Timeframe::M15.duration_ms();
    let grace = TFQE_GRACE.as_millis() as i64;
    let this_fire = Timeframe::M15.align_ms(now_ms) + grace;
    if now_ms < this_fire {
        this_fire - now_ms
    } else {
        this_fire + period - now_ms
    }
}

#[async_trait]
impl Ticker for M15AlignedTicker {
    async fn tick(&mut self) {
        let wait = ms_until_next_m15_fire(Utc::now().timestamp_millis());
        tokio::time::sleep(Duration::from_millis(wait.max(0) as u64)).await;
    }
}

// ---------------------------------------------------------------------------
// Publisher
// ---------------------------------------------------------------------------

pub struct SignalPublisher {
    state: Arc<AppState>,
    client: Arc<GmoClient>,
    repository: Arc<dyn CandleRepository>,
    strategies: Vec<Arc<dyn Strategy>>,
    execution: Option<Arc<ExecutionEngine>>,
}

impl SignalPublisher {
    pub fn new(
        state: Arc<AppState>,
        client: Arc<GmoClient>,
        repository: Arc<dyn CandleRepository>,
        strategies: Vec<Arc<dyn Strategy>>,
        execution: Option<Arc<ExecutionEngine>>,
    ) -> Self {
        Self {
            state,
            client,
            repository,
            strategies,
            execution,
        }
    }

    // ── Loops ───────────────────────────────────────────────────────────

    /// Strategy cadence: every M15 boundary + grace.
    pub async fn run_tfqe_loop(
        self: Arc<Self>,
        mut ticker: Box<dyn Ticker>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("strategy publisher running");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("strategy publisher stopped");
                    return;
                }
            }

            let symbols = self.state.config.read().symbols.clone();
            for symbol in symbols {
                self.ensure_fresh(symbol, &[Timeframe::H1, Timeframe::M15])
                    .await;
                self.publish_tfqe_for(symbol, Utc::now());

                // Actionable signals flow to the execution layer, which
                // simulates unless trading is explicitly enabled.
                if let Some(execution) = &self.execution {
                    if let Some(snapshot) = self.state.tfqe_snapshot(symbol) {
                        if matches!(
                            snapshot.signal.signal,
                            crate::strategy::TfqeTag::Buy | crate::strategy::TfqeTag::Sell
                        ) {
                            let outcome = execution.execute_signal(&snapshot.signal).await;
                            info!(%symbol, outcome = ?outcome, "signal handed to execution");
                        }
                    }
                }
            }
        }
    }

    /// Multi-timeframe cadence: every minute.
    pub async fn run_analysis_loop(
        self: Arc<Self>,
        mut ticker: Box<dyn Ticker>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("analysis publisher running");
        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => {
                    info!("analysis publisher stopped");
                    return;
                }
            }

            let symbols = self.state.config.read().symbols.clone();
            for symbol in symbols {
                self.ensure_fresh(symbol, &Timeframe::ALL).await;
                self.publish_analysis_for(symbol, Utc::now());
            }
        }
    }

    // ── Freshness & backfill ────────────────────────────────────────────

    /// Backfill any listed ring whose newest bar is older than 1.5 of its
    /// durations. Failures are logged and recorded; stale data stays in
    /// place and the snapshot degrades instead.
    pub async fn ensure_fresh(&self, symbol: Symbol, timeframes: &[Timeframe]) {
        let now_ms = Utc::now().timestamp_millis();
        for &timeframe in timeframes {
            let key = SeriesKey { symbol, timeframe };
            if !self.state.candle_store.is_stale(&key, now_ms) {
                continue;
            }

            // Replay the attached repository first; REST tops up the rest.
            let capacity = self.state.config.read().candle_capacity;
            match self.repository.load(symbol, timeframe, capacity).await {
                Ok(stored) if !stored.is_empty() => {
                    self.state.candle_store.backfill(key, stored);
                }
                Ok(_) => {}
                Err(e) => warn!(%key, error = %e, "repository load failed"),
            }

            for date in kline_dates(timeframe, Utc::now()) {
                match self.client.get_klines(symbol, timeframe, &date).await {
                    Ok(klines) => {
                        let candles: Vec<Candle> =
                            klines.into_iter().map(kline_to_candle).collect();
                        debug!(%key, date, bars = candles.len(), "backfilled from REST");
                        self.state.candle_store.backfill(key, candles);
                    }
                    Err(e) => {
                        warn!(%key, date, error = %e, "kline backfill failed");
                        self.state
                            .push_error(format!("kline backfill {key}: {e}"), e.broker_code().map(String::from));
                    }
                }
            }
        }
    }

    // ── Snapshot production ─────────────────────────────────────────────

    /// Evaluate every strategy for one symbol against a single store read
    /// and publish the result.
    pub fn publish_tfqe_for(&self, symbol: Symbol, now: DateTime<Utc>) {
        let freshness = self.freshness(symbol, &[Timeframe::H1, Timeframe::M15], now);

        for strategy in &self.strategies {
            let mut signal = strategy.tick(&self.state.candle_store, symbol, now);

            if freshness.stale {
                if let Some(c) = signal.confidence {
                    signal.confidence = Some(c.min(STALE_CONFIDENCE_CAP));
                }
            }

            debug!(%symbol, strategy = strategy.name(), signal = ?signal.signal, "strategy evaluated");
            self.state.publish_tfqe(
                symbol,
                TfqeSnapshot {
                    timestamp: now,
                    signal,
                    data_freshness: freshness.clone(),
                },
            );
        }
    }

    /// Analyse all six timeframes for one symbol and publish the verdict.
    pub fn publish_analysis_for(&self, symbol: Symbol, now: DateTime<Utc>) {
        let freshness = self.freshness(symbol, &Timeframe::ALL, now);
        let store = &self.state.candle_store;

        let daily = store.slice(
            &SeriesKey {
                symbol,
                timeframe: Timeframe::D1,
            },
            2,
        );
        // The newest daily bar may still be forming server-side; the one
        // before it is the completed bar the pivots want.
        let prev_daily = if daily.len() >= 2 {
            daily.get(daily.len() - 2)
        } else {
            daily.last()
        };

        let mut frames: BTreeMap<Timeframe, AnalysisFrame> = BTreeMap::new();
        for timeframe in Timeframe::ALL {
            let candles = store.slice(&SeriesKey { symbol, timeframe }, ANALYSIS_LOOKBACK);
            frames.insert(
                timeframe,
                analyze_timeframe(timeframe, &candles, prev_daily),
            );
        }

        let mut integrated = integrate(&frames, now);
        if freshness.stale {
            integrated.confidence = integrated.confidence.min(STALE_CONFIDENCE_CAP as f64);
        }

        let snapshot = AnalysisSnapshot {
            timestamp: now,
            symbol,
            timeframes: frames,
            integrated_strategy: integrated,
            market_session: market_session(now),
            data_freshness: freshness,
        };
        self.state.publish_analysis(symbol, snapshot);
    }

    fn freshness(&self, symbol: Symbol, timeframes: &[Timeframe], now: DateTime<Utc>) -> DataFreshness {
        let now_ms = now.timestamp_millis();
        let mut age_ms = BTreeMap::new();
        let mut stale = false;

        for &timeframe in timeframes {
            let key = SeriesKey { symbol, timeframe };
            // An empty ring reports no age at all; it is still stale.
            if let Some(age) = self.state.candle_store.staleness_ms(&key, now_ms) {
                age_ms.insert(timeframe, age);
            }
            stale |= self.state.candle_store.is_stale(&key, now_ms);
        }

        DataFreshness { stale, age_ms }
    }
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn kline_to_candle(k: KlineEntry) -> Candle {
    Candle::new(k.open_time, k.open, k.high, k.low, k.close)
}

/// The `date` query values needed to cover a ring's lookback: the current
/// and previous day for intraday bars, the current and previous year for
/// daily bars. Older dates come first so newer data wins any overlap.
fn kline_dates(timeframe: Timeframe, now: DateTime<Utc>) -> Vec<String> {
    match timeframe {
        Timeframe::D1 => {
            let year = now.year();
            vec![(year - 1).to_string(), year.to_string()]
        }
        _ => {
            let today = now.date_naive();
            let yesterday = today.pred_opt().unwrap_or(today);
            vec![
                yesterday.format("%Y%m%d").to_string(),
                today.format("%Y%m%d").to_string(),
            ]
        }
    }
}
