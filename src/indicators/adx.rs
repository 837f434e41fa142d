// =============================================================================
// Average Directional Index (ADX)
// =============================================================================
//
// Quantifies trend strength regardless of direction.
//
//   1. +DM / -DM and True Range per bar-to-bar transition.
//   2. Wilder's smoothing (period) of +DM, -DM, TR.
//   3. +DI = smoothed(+DM) / smoothed(TR) * 100, -DI likewise.
//   4. DX  = |+DI - -DI| / (+DI + -DI) * 100.
//   5. ADX = Wilder-smoothed average of DX, seeded with the SMA of the
//      first `period` DX values.
//
// DX becomes available at index `period`; the ADX therefore has its first
// defined value at index `2 * period - 1` (two warm-up rounds).
//
// Interpretation: ADX >= 25 trending, ADX < 20 ranging.
// =============================================================================

use super::{undefined, Series};
use crate::types::Candle;

/// Wilder ADX. `None` before index `2 * period - 1`.
pub fn adx(candles: &[Candle], period: usize) -> Series {
    let len = candles.len();
    if period == 0 || len < 2 * period + 1 {
        return undefined(len);
    }

    // ------------------------------------------------------------------
    // Step 1: raw +DM, -DM, TR per transition (index i-1 for candle i)
    // ------------------------------------------------------------------
    let transitions = len - 1;
    let mut plus_dm = Vec::with_capacity(transitions);
    let mut minus_dm = Vec::with_capacity(transitions);
    let mut tr = Vec::with_capacity(transitions);

    for i in 1..len {
        let high = candles[i].high;
        let low = candles[i].low;
        let prev_high = candles[i - 1].high;
        let prev_low = candles[i - 1].low;
        let prev_close = candles[i - 1].close;

        let range = (high - low)
            .max((high - prev_close).abs())
            .max((low - prev_close).abs());

        let up_move = high - prev_high;
        let down_move = prev_low - low;

        plus_dm.push(if up_move > down_move && up_move > 0.0 {
            up_move
        } else {
            0.0
        });
        minus_dm.push(if down_move > up_move && down_move > 0.0 {
            down_move
        } else {
            0.0
        });
        tr.push(range);
    }

    // ------------------------------------------------------------------
    // Steps 2-4: smoothed DMs/TR and the DX sequence
    // ------------------------------------------------------------------
    let period_f = period as f64;
    let mut smooth_plus: f64 = plus_dm[..period].iter().sum();
    let mut smooth_minus: f64 = minus_dm[..period].iter().sum();
    let mut smooth_tr: f64 = tr[..period].iter().sum();

    // dx[k] corresponds to candle index `period + k`.
    let mut dx = Vec::with_capacity(transitions - period + 1);
    match compute_dx(smooth_plus, smooth_minus, smooth_tr) {
        Some(v) => dx.push(v),
        None => return undefined(len),
    }

    for i in period..transitions {
        smooth_plus = smooth_plus - smooth_plus / period_f + plus_dm[i];
        smooth_minus = smooth_minus - smooth_minus / period_f + minus_dm[i];
        smooth_tr = smooth_tr - smooth_tr / period_f + tr[i];

        match compute_dx(smooth_plus, smooth_minus, smooth_tr) {
            Some(v) => dx.push(v),
            None => return undefined(len),
        }
    }

    // ------------------------------------------------------------------
    // Step 5: ADX series
    // ------------------------------------------------------------------
    let mut result = undefined(len);

    let seed: f64 = dx[..period].iter().sum::<f64>() / period_f;
    if !seed.is_finite() {
        return result;
    }
    let seed_index = 2 * period - 1;
    result[seed_index] = Some(seed);

    let mut prev = seed;
    for (k, &value) in dx.iter().enumerate().skip(period) {
        let smoothed = (prev * (period_f - 1.0) + value) / period_f;
        if !smoothed.is_finite() {
            break;
        }
        result[period + k] = Some(smoothed);
        prev = smoothed;
    }

    result
}

/// DX from smoothed +DM, -DM, TR. `None` on a zero TR or non-finite result;
/// zero directional movement yields 0.0.
fn compute_dx(smooth_plus: f64, smooth_minus: f64, smooth_tr: f64) -> Option<f64> {
    if smooth_tr == 0.0 {
        return None;
    }

    let plus_di = (smooth_plus / smooth_tr) * 100.0;
    let minus_di = (smooth_minus / smooth_tr) * 100.0;

    let di_sum = plus_di + minus_di;
    if di_sum == 0.0 {
        return Some(0.0);
    }

    let value = ((plus_di - minus_di).abs() / di_sum) * 100.0;
    value.is_finite().then_some(value)
}
