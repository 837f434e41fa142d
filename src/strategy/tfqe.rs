// =============================================================================
// TFQE — trend-following pullback strategy (H1 context, M15 trigger)
// =============================================================================
//
// Gates run in order; the first failure short-circuits:
//
//   1. Session  — the JST wall clock must sit inside the configured window
//                 (default 16:00-24:00, London open through the NY
//                 afternoon).
//   2. Trend    — H1 EMA20 above EMA50 with ADX14 >= 20 declares an
//                 uptrend; mirrored for a downtrend; anything else is
//                 NO_TREND.
//   3. Proximity — distance = (price - M15 EMA20) / M15 ATR14 must land in
//                 [-0.5, +0.2] for longs: still above a failing trend,
//                 close enough to the mean to be a pullback. Too far above
//                 is WAITING_PULLBACK, too far below kills the trend call.
//   4. Trigger  — the last completed M15 bar must close in the trend
//                 direction and on the trend side of the EMA.
//
// On BUY (SELL mirrored):
//   entry = M15 close          stop  = entry - 1.5 * ATR
//   tp1   = entry + 1.0 * ATR  tp2   = entry + 2.0 * ATR
//
// The post-entry contract is published with every signal: TP1 closes half
// and moves the stop to break-even; the remainder rides until an M15 close
// across the EMA20.
// =============================================================================

use chrono::{DateTime, FixedOffset, Timelike, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::frame::Trend;
use crate::config::TfqeParams;
use crate::indicators::{adx, atr, last_value, ma};
use crate::market_data::{CandleStore, SeriesKey};
use crate::strategy::Strategy;
use crate::types::{Candle, Symbol, Timeframe};

/// Minimum H1 ADX for a tradable trend.
pub const ADX_TREND_MIN: f64 = 20.0;
/// Longs: distance must not exceed this (price stretched, wait for the dip).
pub const DISTANCE_STRETCHED: f64 = 0.2;
/// Longs: distance below this negates the trend call.
pub const DISTANCE_BROKEN: f64 = -0.5;
/// Confidence never exceeds this.
pub const CONFIDENCE_CEILING: u32 = 95;

/// H1 candles consulted per evaluation; enough for EMA50 plus slack.
const H1_LOOKBACK: usize = 120;
/// M15 candles consulted; enough for EMA20/ATR14 plus slack.
const M15_LOOKBACK: usize = 80;

// ---------------------------------------------------------------------------
// Signal shape
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TfqeTag {
    Buy,
    Sell,
    WaitingPullback,
    WaitingRally,
    NoTrend,
    OutOfSession,
}

/// The published post-entry management contract. The gateway executes it
/// only when trading is enabled; the UI displays it either way.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManagementContract {
    pub tp1_action: String,
    pub runner_exit: String,
}

impl ManagementContract {
    fn for_tag(tag: TfqeTag) -> Self {
        let runner_exit = match tag {
            TfqeTag::Sell => "hold remainder until an M15 close above the EMA20",
            _ => "hold remainder until an M15 close below the EMA20",
        };
        Self {
            tp1_action: "close half the position, move the stop to break-even".into(),
            runner_exit: runner_exit.into(),
        }
    }
}

/// One strategy evaluation. Order fields are present only on BUY / SELL;
/// diagnostic context is carried whenever it was computed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfqeSignal {
    pub signal: TfqeTag,
    pub symbol: Symbol,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub entry: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_loss: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp1: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tp2: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub risk_pips: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reward_pips: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub confidence: Option<u32>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub h1_trend: Option<Trend>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h1_adx: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m15_price: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m15_ema20: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub m15_atr: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub distance: Option<f64>,

    pub management: ManagementContract,
}

impl TfqeSignal {
    fn bare(symbol: Symbol, tag: TfqeTag) -> Self {
        Self {
            signal: tag,
            symbol,
            entry: None,
            stop_loss: None,
            tp1: None,
            tp2: None,
            risk_pips: None,
            reward_pips: None,
            confidence: None,
            h1_trend: None,
            h1_adx: None,
            m15_price: None,
            m15_ema20: None,
            m15_atr: None,
            distance: None,
            management: ManagementContract::for_tag(tag),
        }
    }
}

// ---------------------------------------------------------------------------
// Indicator context
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct H1Context {
    ema20: f64,
    ema50: f64,
    adx: f64,
}

#[derive(Debug, Clone)]
struct M15Context {
    ema20: f64,
    atr: f64,
    last: Candle,
}

// ---------------------------------------------------------------------------
// Strategy
// ---------------------------------------------------------------------------

pub struct TfqeStrategy {
    params: TfqeParams,
}

impl TfqeStrategy {
    pub fn new(params: TfqeParams) -> Self {
        Self { params }
    }

    /// Whether the JST wall clock sits inside the trading window.
    fn in_session(&self, now: DateTime<Utc>) -> bool {
        let jst = now.with_timezone(&FixedOffset::east_opt(9 * 3600).expect("fixed offset"));
        let minute_of_day = jst.hour() * 60 + jst.minute();
        match self.params.session_window() {
            Ok((start, end)) => minute_of_day >= start && minute_of_day < end,
            Err(_) => false,
        }
    }

    /// Evaluate from raw candle history.
    pub fn evaluate(
        &self,
        symbol: Symbol,
        h1: &[Candle],
        m15: &[Candle],
        now: DateTime<Utc>,
    ) -> TfqeSignal {
        if !self.in_session(now) {
            return TfqeSignal::bare(symbol, TfqeTag::OutOfSession);
        }

        let h1_closes: Vec<f64> = h1.iter().map(|c| c.close).collect();
        let h1_context = match (
            last_value(&ma::ema(&h1_closes, 20)),
            last_value(&ma::ema(&h1_closes, 50)),
            last_value(&adx::adx(h1, 14)),
        ) {
            (Some(ema20), Some(ema50), Some(adx)) => H1Context { ema20, ema50, adx },
            _ => return TfqeSignal::bare(symbol, TfqeTag::NoTrend),
        };

        let m15_closes: Vec<f64> = m15.iter().map(|c| c.close).collect();
        let m15_context = match (
            last_value(&ma::ema(&m15_closes, 20)),
            last_value(&atr::atr(m15, 14)),
            m15.last(),
        ) {
            (Some(ema20), Some(atr), Some(last)) if atr > 0.0 => M15Context {
                ema20,
                atr,
                last: last.clone(),
            },
            _ => return TfqeSignal::bare(symbol, TfqeTag::NoTrend),
        };

        self.decide(symbol, h1_context, m15_context)
    }

    /// Gates 2-4 plus the order arithmetic, on precomputed indicator values.
    fn decide(&self, symbol: Symbol, h1: H1Context, m15: M15Context) -> TfqeSignal {
        // --- Gate 2: H1 trend ------------------------------------------
        let trend = if h1.ema20 > h1.ema50 && h1.adx >= ADX_TREND_MIN {
            Trend::Up
        } else if h1.ema20 < h1.ema50 && h1.adx >= ADX_TREND_MIN {
            Trend::Down
        } else {
            let mut signal = TfqeSignal::bare(symbol, TfqeTag::NoTrend);
            signal.h1_adx = Some(h1.adx);
            return signal;
        };

        let price = m15.last.close;
        let distance = (price - m15.ema20) / m15.atr;

        let mut context = TfqeSignal::bare(symbol, TfqeTag::NoTrend);
        context.h1_trend = Some(trend);
        context.h1_adx = Some(h1.adx);
        context.m15_price = Some(price);
        context.m15_ema20 = Some(m15.ema20);
        context.m15_atr = Some(m15.atr);
        context.distance = Some(distance);

        // --- Gate 3: proximity to the M15 mean -------------------------
        let waiting_tag = match trend {
            Trend::Up => TfqeTag::WaitingPullback,
            _ => TfqeTag::WaitingRally,
        };
        match trend {
            Trend::Up => {
                if distance > DISTANCE_STRETCHED {
                    context.signal = waiting_tag;
                    context.management = ManagementContract::for_tag(waiting_tag);
                    return context;
                }
                if distance < DISTANCE_BROKEN {
                    return context; // NO_TREND: price has fallen out of the trend
                }
            }
            _ => {
                if distance < -DISTANCE_STRETCHED {
                    context.signal = waiting_tag;
                    context.management = ManagementContract::for_tag(waiting_tag);
                    return context;
                }
                if distance > -DISTANCE_BROKEN {
                    return context;
                }
            }
        }

        // --- Gate 4: trigger bar ---------------------------------------
        let triggered = match trend {
            Trend::Up => m15.last.is_bullish() && price > m15.ema20,
            _ => m15.last.is_bearish() && price < m15.ema20,
        };
        if !triggered {
            context.signal = waiting_tag;
            context.management = ManagementContract::for_tag(waiting_tag);
            return context;
        }

        // --- Order arithmetic ------------------------------------------
        let pip = symbol.pip_size_f64();
        let direction = if trend == Trend::Up { 1.0 } else { -1.0 };

        let entry = price;
        let stop_loss = entry - direction * self.params.atr_stop_mult * m15.atr;
        let tp1 = entry + direction * self.params.tp1_mult * m15.atr;
        let tp2 = entry + direction * self.params.tp2_mult * m15.atr;

        let risk_pips = (entry - stop_loss).abs() / pip;
        let reward_pips = (tp1 - entry).abs() / pip;

        let adx_term = (h1.adx - 20.0).clamp(0.0, 30.0);
        let proximity_term = (20.0 * (1.0 - distance.abs() / 0.5)).clamp(0.0, 20.0);
        let confidence =
            ((50.0 + adx_term + proximity_term).round() as u32).min(CONFIDENCE_CEILING);

        let tag = if trend == Trend::Up {
            TfqeTag::Buy
        } else {
            TfqeTag::Sell
        };
        context.signal = tag;
        context.management = ManagementContract::for_tag(tag);
        context.entry = Some(entry);
        context.stop_loss = Some(stop_loss);
        context.tp1 = Some(tp1);
        context.tp2 = Some(tp2);
        context.risk_pips = Some(risk_pips);
        context.reward_pips = Some(reward_pips);
        context.confidence = Some(confidence);
        context
    }
}

impl Strategy for TfqeStrategy {
    fn name(&self) -> &'static str {
        "tfqe"
    }

    fn tick(&self, store: &CandleStore, symbol: Symbol, now: DateTime<Utc>) -> TfqeSignal {
        let h1 = store.slice(
            &SeriesKey {
                symbol,
                timeframe: Timeframe::H1,
            },
            H1_LOOKBACK,
        );
        let m15 = store.slice(
            &SeriesKey {
                symbol,
                timeframe: Timeframe::M15,
            },
            M15_LOOKBACK,
        );
        self.evaluate(symbol, &h1, &m15, now)
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn strategy() -> TfqeStrategy {
        TfqeStrategy::new(TfqeParams::default())
    }

    fn h1(ema20: f64, ema50: f64, adx: f64) -> H1Context {
        H1Context { ema20, ema50, adx }
    }

    fn m15_bullish(ema20: f64, atr: f64, close: f64) -> M15Context {
        M15Context {
            ema20,
            atr,
            last: Candle::new(0, close - 0.03, close + 0.01, close - 0.04, close),
        }
    }

    fn m15_bearish(ema20: f64, atr: f64, close: f64) -> M15Context {
        M15Context {
            ema20,
            atr,
            last: Candle::new(0, close + 0.03, close + 0.04, close - 0.01, close),
        }
    }

    /// 14:00 UTC == 23:00 JST, inside the default window.
    fn in_session_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 3, 14, 0, 0).unwrap()
    }

    // ---- Session gate ----------------------------------------------------

    #[test]
    fn out_of_session_short_circuits_everything() {
        // 03:00 JST == 18:00 UTC the previous day.
        let now = Utc.with_ymd_and_hms(2024, 1, 2, 18, 0, 0).unwrap();
        let s = strategy().evaluate(Symbol::AUD_JPY, &[], &[], now);
        assert_eq!(s.signal, TfqeTag::OutOfSession);
        assert!(s.entry.is_none());
        assert!(s.h1_adx.is_none());
    }

    #[test]
    fn session_boundary_one_second_before_is_closed() {
        // 15:59:59 JST == 06:59:59 UTC.
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 6, 59, 59).unwrap();
        let s = strategy().evaluate(Symbol::USD_JPY, &[], &[], now);
        assert_eq!(s.signal, TfqeTag::OutOfSession);
    }

    #[test]
    fn session_boundary_at_open_is_live() {
        // 16:00:00 JST == 07:00:00 UTC. Empty buffers: the session gate
        // passes and the data gate answers instead.
        let now = Utc.with_ymd_and_hms(2024, 1, 3, 7, 0, 0).unwrap();
        let s = strategy().evaluate(Symbol::USD_JPY, &[], &[], now);
        assert_eq!(s.signal, TfqeTag::NoTrend);
    }

    // ---- Trend gate ------------------------------------------------------

    #[test]
    fn weak_adx_is_no_trend() {
        // EMAs aligned upward but ADX 15: no tradable trend.
        let s = strategy().decide(
            Symbol::EUR_USD,
            h1(1.0880, 1.0860, 15.0),
            m15_bullish(1.0875, 0.0008, 1.0878),
        );
        assert_eq!(s.signal, TfqeTag::NoTrend);
        assert!(s.entry.is_none());
        assert_eq!(s.h1_adx, Some(15.0));
    }

    #[test]
    fn flat_emas_are_no_trend_even_with_high_adx() {
        let s = strategy().decide(
            Symbol::USD_JPY,
            h1(150.00, 150.00, 40.0),
            m15_bullish(150.00, 0.05, 150.02),
        );
        assert_eq!(s.signal, TfqeTag::NoTrend);
    }

    // ---- Proximity gate --------------------------------------------------

    #[test]
    fn stretched_price_waits_for_pullback() {
        // distance = (150.12 - 150.10) / 0.05 = 0.4 > 0.2.
        let s = strategy().decide(
            Symbol::USD_JPY,
            h1(150.00, 149.20, 25.0),
            m15_bullish(150.10, 0.05, 150.12),
        );
        assert_eq!(s.signal, TfqeTag::WaitingPullback);
        assert!(s.entry.is_none());
        assert!((s.distance.unwrap() - 0.4).abs() < 1e-9);
        assert_eq!(s.h1_trend, Some(Trend::Up));
    }

    #[test]
    fn deep_break_below_mean_negates_trend() {
        // distance = (150.06 - 150.10) / 0.05 = -0.8 < -0.5.
        let s = strategy().decide(
            Symbol::USD_JPY,
            h1(150.00, 149.20, 25.0),
            m15_bullish(150.10, 0.05, 150.06),
        );
        assert_eq!(s.signal, TfqeTag::NoTrend);
        assert!((s.distance.unwrap() + 0.8).abs() < 1e-9);
    }

    #[test]
    fn downtrend_waits_for_rally_when_stretched_low() {
        // distance = (150.08 - 150.10) / 0.05 = -0.4 < -0.2.
        let s = strategy().decide(
            Symbol::USD_JPY,
            h1(149.20, 150.00, 25.0),
            m15_bearish(150.10, 0.05, 150.08),
        );
        assert_eq!(s.signal, TfqeTag::WaitingRally);
    }

    // ---- Trigger gate ----------------------------------------------------

    #[test]
    fn bearish_bar_in_uptrend_keeps_waiting() {
        // distance in range, but the trigger bar closed down.
        let s = strategy().decide(
            Symbol::USD_JPY,
            h1(150.00, 149.20, 25.0),
            m15_bearish(150.11, 0.05, 150.12),
        );
        assert_eq!(s.signal, TfqeTag::WaitingPullback);
    }

    // ---- Order arithmetic ------------------------------------------------

    #[test]
    fn buy_with_exact_levels_and_pips() {
        // distance = (150.12 - 150.11) / 0.05 = 0.2, inclusive edge of the
        // pullback band; bullish trigger above the EMA.
        let s = strategy().decide(
            Symbol::USD_JPY,
            h1(150.00, 149.20, 25.0),
            m15_bullish(150.11, 0.05, 150.12),
        );
        assert_eq!(s.signal, TfqeTag::Buy);
        assert!((s.entry.unwrap() - 150.120).abs() < 1e-9);
        assert!((s.stop_loss.unwrap() - 150.045).abs() < 1e-9);
        assert!((s.tp1.unwrap() - 150.170).abs() < 1e-9);
        assert!((s.tp2.unwrap() - 150.220).abs() < 1e-9);
        assert!((s.risk_pips.unwrap() - 7.5).abs() < 1e-9);
        assert!((s.reward_pips.unwrap() - 5.0).abs() < 1e-9);
        // 50 + clip(25-20) + 20*(1 - 0.2/0.5) = 50 + 5 + 12.
        assert_eq!(s.confidence, Some(67));
        assert!(s.management.runner_exit.contains("below"));
    }

    #[test]
    fn sell_is_symmetric() {
        // Downtrend, price rallied to just under the mean, bearish trigger.
        // distance = (150.10 - 150.11) / 0.05 = -0.2.
        let s = strategy().decide(
            Symbol::USD_JPY,
            h1(149.20, 150.00, 25.0),
            m15_bearish(150.11, 0.05, 150.10),
        );
        assert_eq!(s.signal, TfqeTag::Sell);
        assert!((s.entry.unwrap() - 150.100).abs() < 1e-9);
        assert!((s.stop_loss.unwrap() - 150.175).abs() < 1e-9);
        assert!((s.tp1.unwrap() - 150.050).abs() < 1e-9);
        assert!((s.tp2.unwrap() - 150.000).abs() < 1e-9);
        assert!((s.risk_pips.unwrap() - 7.5).abs() < 1e-9);
        assert!((s.reward_pips.unwrap() - 5.0).abs() < 1e-9);
        assert!(s.management.runner_exit.contains("above"));
    }

    #[test]
    fn usd_quoted_pip_size_changes_pip_counts() {
        // EUR_USD: pip 0.0001. ATR 0.0008 => risk 12 pips, reward 8 pips.
        let s = strategy().decide(
            Symbol::EUR_USD,
            h1(1.0880, 1.0850, 25.0),
            m15_bullish(1.08760, 0.0008, 1.08770),
        );
        assert_eq!(s.signal, TfqeTag::Buy);
        assert!((s.risk_pips.unwrap() - 12.0).abs() < 1e-6);
        assert!((s.reward_pips.unwrap() - 8.0).abs() < 1e-6);
    }

    #[test]
    fn reward_arithmetic_invariant() {
        // For any BUY: reward_pips == (tp1 - entry) / pip and
        // risk_pips == (entry - stop) / pip, exactly.
        let s = strategy().decide(
            Symbol::GBP_JPY,
            h1(188.00, 187.00, 32.0),
            m15_bullish(188.245, 0.12, 188.250),
        );
        assert_eq!(s.signal, TfqeTag::Buy);
        let pip = Symbol::GBP_JPY.pip_size_f64();
        let entry = s.entry.unwrap();
        assert!(
            ((s.tp1.unwrap() - entry) / pip - s.reward_pips.unwrap()).abs() < 1e-9
        );
        assert!(
            ((entry - s.stop_loss.unwrap()) / pip - s.risk_pips.unwrap()).abs() < 1e-9
        );
    }

    #[test]
    fn confidence_is_capped_at_95() {
        // ADX 60 (+30) and distance 0 (+20) would give 100.
        let s = strategy().decide(
            Symbol::USD_JPY,
            h1(150.00, 149.20, 60.0),
            m15_bullish(150.12, 0.05, 150.12),
        );
        // distance 0.0: bullish close exactly at the EMA fails the
        // close-above-EMA trigger, so nudge one tick above.
        assert_eq!(s.signal, TfqeTag::WaitingPullback);

        let s = strategy().decide(
            Symbol::USD_JPY,
            h1(150.00, 149.20, 60.0),
            m15_bullish(150.119, 0.05, 150.12),
        );
        assert_eq!(s.signal, TfqeTag::Buy);
        assert_eq!(s.confidence, Some(95));
    }

    // ---- evaluate() on raw candles ---------------------------------------

    fn trending_h1(n: usize) -> Vec<Candle> {
        (0..n)
            .map(|i| {
                let base = 148.0 + i as f64 * 0.05;
                Candle::new(i as i64 * 3_600_000, base, base + 0.08, base - 0.04, base + 0.05)
            })
            .collect()
    }

    #[test]
    fn evaluate_with_insufficient_history_is_no_trend() {
        let s = strategy().evaluate(
            Symbol::USD_JPY,
            &trending_h1(20),
            &trending_h1(10),
            in_session_now(),
        );
        assert_eq!(s.signal, TfqeTag::NoTrend);
    }

    #[test]
    fn evaluate_with_full_history_reaches_the_later_gates() {
        let m15: Vec<Candle> = (0..80)
            .map(|i| {
                let base = 150.0 + i as f64 * 0.01;
                Candle::new(i as i64 * 900_000, base, base + 0.03, base - 0.02, base + 0.012)
            })
            .collect();
        let s = strategy().evaluate(
            Symbol::USD_JPY,
            &trending_h1(120),
            &m15,
            in_session_now(),
        );
        // A steady uptrend with data: the session and data gates pass, so
        // the outcome is one of the trend-aware states with context.
        assert_ne!(s.signal, TfqeTag::OutOfSession);
        assert!(s.h1_adx.is_some());
        if s.signal == TfqeTag::Buy {
            assert!(s.entry.is_some());
            assert!(s.confidence.unwrap() <= 95);
        }
    }
}
