// =============================================================================
// Classic daily pivot levels
// =============================================================================
//
// Computed from the previous completed daily bar:
//   P  = (H + L + C) / 3
//   R1 = 2P - L
//   S1 = 2P - H
// =============================================================================

use crate::types::Candle;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PivotLevels {
    pub pivot: f64,
    pub resistance: f64,
    pub support: f64,
}

/// Pivot levels from the previous completed daily bar. `None` for a
/// malformed bar or non-finite result.
pub fn pivot_levels(prev_daily: &Candle) -> Option<PivotLevels> {
    if !prev_daily.is_well_formed() {
        return None;
    }

    let pivot = (prev_daily.high + prev_daily.low + prev_daily.close) / 3.0;
    let resistance = 2.0 * pivot - prev_daily.low;
    let support = 2.0 * pivot - prev_daily.high;

    if !(pivot.is_finite() && resistance.is_finite() && support.is_finite()) {
        return None;
    }

    Some(PivotLevels {
        pivot,
        resistance,
        support,
    })
}
