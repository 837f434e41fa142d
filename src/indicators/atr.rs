// =============================================================================
// Average True Range (ATR) — Wilder's Smoothing Method
// =============================================================================
//
// True Range per bar:
//   TR = max(H - L, |H - prevClose|, |L - prevClose|)
//
// ATR_seed = SMA of the first `period` TR values
// ATR_t    = (ATR_{t-1} * (period - 1) + TR_t) / period
//
// TR exists from index 1, so the ATR's first defined value sits at index
// `period`.
// =============================================================================

use super::{undefined, Series};
use crate::types::Candle;

/// Wilder ATR. `None` before index `period`.
pub fn atr(candles: &[Candle], period: usize) -> Series {
    let len = candles.len();
    if period == 0 || len < period + 1 {
        return undefined(len);
    }

    // TR for candle i lives at tr[i - 1].
    let mut tr = Vec::with_capacity(len - 1);
    for i in 1..len {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_close = candles[i - 1].close;

        let range = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());
        tr.push(range);
    }

    let period_f = period as f64;
    let mut result = undefined(len);

    let seed: f64 = tr[..period].iter().sum::<f64>() / period_f;
    if !seed.is_finite() {
        return result;
    }
    result[period] = Some(seed);

    let mut prev = seed;
    for (i, &range) in tr.iter().enumerate().skip(period) {
        let value = (prev * (period_f - 1.0) + range) / period_f;
        if !value.is_finite() {
            break;
        }
        result[i + 1] = Some(value);
        prev = value;
    }

    result
}
