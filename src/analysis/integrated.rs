// =============================================================================
// Integrated verdict — weighted aggregation of the six timeframe frames
// =============================================================================
//
// Fixed weights: D1 / H4 / H1 / M15 carry 0.20 each, M5 / M1 carry 0.10.
// The verdict side is the heavier of the BUY and SELL weight sums;
// alignment is that side's share of all non-neutral weight. Confidence is
// the weight-averaged confidence of the frames voting for the winning side.
//
//   alignment < 0.50  => HIGH risk
//   alignment < 0.75  => MED risk
//   otherwise         => LOW risk
// =============================================================================

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::analysis::frame::{AnalysisFrame, SignalBias, Trend};
use crate::analysis::session::{market_session, MarketSession};
use crate::types::Timeframe;

/// Aggregation weight per timeframe.
pub fn timeframe_weight(tf: Timeframe) -> f64 {
    match tf {
        Timeframe::D1 | Timeframe::H4 | Timeframe::H1 | Timeframe::M15 => 0.20,
        Timeframe::M5 | Timeframe::M1 => 0.10,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Med,
    High,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntegratedVerdict {
    pub signal: SignalBias,
    pub confidence: f64,
    pub alignment_score: f64,
    pub risk_level: RiskLevel,
    pub market_timing: MarketSession,
    pub recommended_strategies: Vec<String>,
}

/// Fold the per-timeframe frames into one verdict.
pub fn integrate(frames: &BTreeMap<Timeframe, AnalysisFrame>, now: DateTime<Utc>) -> IntegratedVerdict {
    let mut buy_weight = 0.0;
    let mut sell_weight = 0.0;

    for (tf, frame) in frames {
        let w = timeframe_weight(*tf);
        match frame.signal {
            SignalBias::Buy => buy_weight += w,
            SignalBias::Sell => sell_weight += w,
            SignalBias::Neutral => {}
        }
    }

    let voting_weight = buy_weight + sell_weight;
    let (signal, winning_weight) = if voting_weight == 0.0 || buy_weight == sell_weight {
        (SignalBias::Neutral, 0.0)
    } else if buy_weight > sell_weight {
        (SignalBias::Buy, buy_weight)
    } else {
        (SignalBias::Sell, sell_weight)
    };

    let alignment_score = if voting_weight > 0.0 {
        winning_weight / voting_weight
    } else {
        0.0
    };

    // Weighted mean over the frames that voted for the winning side.
    let confidence = if signal == SignalBias::Neutral {
        0.0
    } else {
        let mut weighted = 0.0;
        let mut weight = 0.0;
        for (tf, frame) in frames {
            if frame.signal == signal {
                let w = timeframe_weight(*tf);
                weighted += frame.confidence * w;
                weight += w;
            }
        }
        if weight > 0.0 {
            weighted / weight
        } else {
            0.0
        }
    };

    let risk_level = if alignment_score < 0.50 {
        RiskLevel::High
    } else if alignment_score < 0.75 {
        RiskLevel::Med
    } else {
        RiskLevel::Low
    };

    let market_timing = market_session(now);
    let recommended_strategies = recommend(frames, signal, alignment_score);

    IntegratedVerdict {
        signal,
        confidence,
        alignment_score,
        risk_level,
        market_timing,
        recommended_strategies,
    }
}

/// Strategy menu appropriate to the current structure.
fn recommend(
    frames: &BTreeMap<Timeframe, AnalysisFrame>,
    signal: SignalBias,
    alignment: f64,
) -> Vec<String> {
    let mut out = Vec::new();

    let h1_trending = frames
        .get(&Timeframe::H1)
        .map(|f| f.trend != Trend::Range)
        .unwrap_or(false);
    let m15_trending = frames
        .get(&Timeframe::M15)
        .map(|f| f.trend != Trend::Range)
        .unwrap_or(false);

    if h1_trending && signal != SignalBias::Neutral && alignment >= 0.5 {
        out.push("trend-following pullback (H1 context, M15 trigger)".to_string());
    }
    if h1_trending && m15_trending && alignment >= 0.75 {
        out.push("momentum continuation".to_string());
    }
    if !h1_trending {
        out.push("range fade at the daily pivot levels".to_string());
    }
    if out.is_empty() {
        out.push("stand aside until timeframes align".to_string());
    }
    out
}
