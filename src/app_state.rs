// =============================================================================
// Central application state
// =============================================================================
//
// The single value tying the subsystems together: configuration, the candle
// store, the latest-wins quote board, and the published signal snapshots.
//
// Snapshot discipline: the publisher builds a complete snapshot off to the
// side, wraps it in an Arc, and swaps the pointer under a short write lock.
// Readers clone the Arc under the read lock, so every reader observes either
// the whole previous snapshot or the whole next one — never a blend.
// =============================================================================

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::analysis::frame::AnalysisFrame;
use crate::analysis::integrated::IntegratedVerdict;
use crate::analysis::session::MarketSession;
use crate::config::RuntimeConfig;
use crate::market_data::CandleStore;
use crate::strategy::TfqeSignal;
use crate::types::{MarketStatus, Quote, Symbol, Timeframe};

/// Maximum number of recent errors retained for the health payload.
const MAX_RECENT_ERRORS: usize = 50;

// =============================================================================
// Published snapshot shapes (consumed verbatim by the UI)
// =============================================================================

/// Per-timeframe last-bar age, surfaced with every snapshot so consumers can
/// see degradation instead of silently stale numbers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DataFreshness {
    /// True when any required timeframe has fallen behind.
    pub stale: bool,
    /// Milliseconds since each timeframe's newest bar should have closed.
    /// Negative values mean the bar is still inside its window.
    pub age_ms: BTreeMap<Timeframe, i64>,
}

impl DataFreshness {
    pub fn fresh() -> Self {
        Self {
            stale: false,
            age_ms: BTreeMap::new(),
        }
    }
}

/// The strategy snapshot served at `GET /signals/tfqe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfqeSnapshot {
    pub timestamp: DateTime<Utc>,
    #[serde(flatten)]
    pub signal: TfqeSignal,
    pub data_freshness: DataFreshness,
}

/// The multi-timeframe snapshot served at `POST /analysis/multi-timeframe`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisSnapshot {
    pub timestamp: DateTime<Utc>,
    pub symbol: Symbol,
    pub timeframes: BTreeMap<Timeframe, AnalysisFrame>,
    pub integrated_strategy: IntegratedVerdict,
    pub market_session: MarketSession,
    pub data_freshness: DataFreshness,
}

/// A recorded error event, preserving the broker's own code for audit.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    pub message: String,
    pub code: Option<String>,
    pub at: String,
}

// =============================================================================
// AppState
// =============================================================================

pub struct AppState {
    /// Bumped on every published mutation; consumers poll it for change.
    pub state_version: AtomicU64,

    pub config: RwLock<RuntimeConfig>,

    pub candle_store: Arc<CandleStore>,

    /// Latest quote per symbol; older quotes are simply overwritten.
    pub quotes: RwLock<BTreeMap<Symbol, Quote>>,

    /// Broker-reported market status from the public status endpoint.
    pub market_status: RwLock<MarketStatus>,

    /// Published strategy snapshots, swapped whole.
    tfqe_snapshots: RwLock<HashMap<Symbol, Arc<TfqeSnapshot>>>,

    /// Published multi-timeframe snapshots, swapped whole.
    analysis_snapshots: RwLock<HashMap<Symbol, Arc<AnalysisSnapshot>>>,

    /// Latest account assets from the reconcile loop (credentials only).
    pub assets: RwLock<Option<crate::gmo::wire::AccountAssets>>,

    pub recent_errors: RwLock<Vec<ErrorRecord>>,

    pub start_time: std::time::Instant,
}

impl AppState {
    pub fn new(config: RuntimeConfig) -> Self {
        let capacity = config.candle_capacity;
        Self {
            state_version: AtomicU64::new(1),
            config: RwLock::new(config),
            candle_store: Arc::new(CandleStore::new(capacity)),
            quotes: RwLock::new(BTreeMap::new()),
            market_status: RwLock::new(MarketStatus::Close),
            tfqe_snapshots: RwLock::new(HashMap::new()),
            analysis_snapshots: RwLock::new(HashMap::new()),
            assets: RwLock::new(None),
            recent_errors: RwLock::new(Vec::new()),
            start_time: std::time::Instant::now(),
        }
    }

    // ── Version management ──────────────────────────────────────────────

    pub fn increment_version(&self) -> u64 {
        self.state_version.fetch_add(1, Ordering::SeqCst)
    }

    pub fn current_state_version(&self) -> u64 {
        self.state_version.load(Ordering::SeqCst)
    }

    // ── Quote board ─────────────────────────────────────────────────────

    pub fn record_quote(&self, quote: Quote) {
        self.quotes.write().insert(quote.symbol, quote);
    }

    pub fn latest_quotes(&self) -> Vec<Quote> {
        self.quotes.read().values().cloned().collect()
    }

    // ── Snapshot publication ────────────────────────────────────────────

    /// Swap in a freshly built strategy snapshot. The snapshot itself is
    /// immutable from here on.
    pub fn publish_tfqe(&self, symbol: Symbol, snapshot: TfqeSnapshot) {
        self.tfqe_snapshots
            .write()
            .insert(symbol, Arc::new(snapshot));
        self.increment_version();
    }

    pub fn tfqe_snapshot(&self, symbol: Symbol) -> Option<Arc<TfqeSnapshot>> {
        self.tfqe_snapshots.read().get(&symbol).cloned()
    }

    pub fn publish_analysis(&self, symbol: Symbol, snapshot: AnalysisSnapshot) {
        self.analysis_snapshots
            .write()
            .insert(symbol, Arc::new(snapshot));
        self.increment_version();
    }

    pub fn analysis_snapshot(&self, symbol: Symbol) -> Option<Arc<AnalysisSnapshot>> {
        self.analysis_snapshots.read().get(&symbol).cloned()
    }

    // ── Error log ───────────────────────────────────────────────────────

    pub fn push_error(&self, message: String, code: Option<String>) {
        let record = ErrorRecord {
            message,
            code,
            at: Utc::now().to_rfc3339(),
        };

        let mut errors = self.recent_errors.write();
        errors.push(record);
        while errors.len() > MAX_RECENT_ERRORS {
            errors.remove(0);
        }
        drop(errors);

        self.increment_version();
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::strategy::{TfqeSignal, TfqeTag};
    use rust_decimal_macros::dec;

    fn state() -> AppState {
        AppState::new(RuntimeConfig::default())
    }

    fn snapshot(tag: TfqeTag) -> TfqeSnapshot {
        TfqeSnapshot {
            timestamp: Utc::now(),
            signal: sample_signal(tag),
            data_freshness: DataFreshness::fresh(),
        }
    }

    fn sample_signal(tag: TfqeTag) -> TfqeSignal {
        // Round-trip through JSON to build the signal without reaching into
        // strategy internals.
        let value = serde_json::json!({
            "signal": match tag {
                TfqeTag::Buy => "BUY",
                TfqeTag::NoTrend => "NO_TREND",
                _ => "OUT_OF_SESSION",
            },
            "symbol": "USD_JPY",
            "management": {
                "tp1_action": "close half the position, move the stop to break-even",
                "runner_exit": "hold remainder until an M15 close below the EMA20"
            }
        });
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn snapshot_swap_is_all_or_nothing() {
        let state = state();
        assert!(state.tfqe_snapshot(Symbol::USD_JPY).is_none());

        state.publish_tfqe(Symbol::USD_JPY, snapshot(TfqeTag::NoTrend));
        let before = state.tfqe_snapshot(Symbol::USD_JPY).unwrap();

        state.publish_tfqe(Symbol::USD_JPY, snapshot(TfqeTag::Buy));
        let after = state.tfqe_snapshot(Symbol::USD_JPY).unwrap();

        // The old Arc still holds the complete previous snapshot; the new
        // read observes the complete next one.
        assert_eq!(before.signal.signal, TfqeTag::NoTrend);
        assert_eq!(after.signal.signal, TfqeTag::Buy);
    }

    #[test]
    fn version_bumps_on_publication() {
        let state = state();
        let v0 = state.current_state_version();
        state.publish_tfqe(Symbol::EUR_JPY, snapshot(TfqeTag::NoTrend));
        assert!(state.current_state_version() > v0);
    }

    #[test]
    fn quote_board_is_latest_wins() {
        let state = state();
        let mut quote = Quote {
            symbol: Symbol::USD_JPY,
            bid: dec!(150.100),
            ask: dec!(150.104),
            timestamp: Utc::now(),
            status: MarketStatus::Open,
        };
        state.record_quote(quote.clone());

        quote.bid = dec!(150.200);
        quote.ask = dec!(150.204);
        state.record_quote(quote);

        let quotes = state.latest_quotes();
        assert_eq!(quotes.len(), 1);
        assert_eq!(quotes[0].bid, dec!(150.200));
    }

    #[test]
    fn error_ring_is_bounded() {
        let state = state();
        for i in 0..80 {
            state.push_error(format!("error {i}"), Some("ERR-5003".into()));
        }
        let errors = state.recent_errors.read();
        assert_eq!(errors.len(), 50);
        assert_eq!(errors[0].message, "error 30");
        assert_eq!(errors[0].code.as_deref(), Some("ERR-5003"));
    }

    #[test]
    fn tfqe_snapshot_serialises_flat() {
        let snap = snapshot(TfqeTag::Buy);
        let v = serde_json::to_value(&snap).unwrap();
        // The signal fields sit at the top level beside the freshness data.
        assert_eq!(v["signal"], "BUY");
        assert_eq!(v["symbol"], "USD_JPY");
        assert!(v["data_freshness"]["stale"].is_boolean());
    }
}
