// =============================================================================
// Shared domain types for the kawase trading engine
// =============================================================================
//
// Prices that travel through the order path are `rust_decimal::Decimal` so
// that signing and order payloads are exact. The indicator kernel works on
// `f64` series extracted from candles.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

// =============================================================================
// Symbol
// =============================================================================

/// The FX pairs quoted by the broker. The set is fixed; anything else on the
/// wire is a validation error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[allow(non_camel_case_types)]
pub enum Symbol {
    USD_JPY,
    EUR_JPY,
    GBP_JPY,
    AUD_JPY,
    NZD_JPY,
    CAD_JPY,
    CHF_JPY,
    TRY_JPY,
    ZAR_JPY,
    MXN_JPY,
    EUR_USD,
    GBP_USD,
    AUD_USD,
    NZD_USD,
}

/// Whether a pair is quoted in yen or in dollars. Drives pip size and the
/// number of digits shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum QuoteKind {
    JpyQuoted,
    UsdQuoted,
}

impl Symbol {
    /// Every tradable pair, in the broker's listing order.
    pub const ALL: [Symbol; 14] = [
        Symbol::USD_JPY,
        Symbol::EUR_JPY,
        Symbol::GBP_JPY,
        Symbol::AUD_JPY,
        Symbol::NZD_JPY,
        Symbol::CAD_JPY,
        Symbol::CHF_JPY,
        Symbol::TRY_JPY,
        Symbol::ZAR_JPY,
        Symbol::MXN_JPY,
        Symbol::EUR_USD,
        Symbol::GBP_USD,
        Symbol::AUD_USD,
        Symbol::NZD_USD,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Symbol::USD_JPY => "USD_JPY",
            Symbol::EUR_JPY => "EUR_JPY",
            Symbol::GBP_JPY => "GBP_JPY",
            Symbol::AUD_JPY => "AUD_JPY",
            Symbol::NZD_JPY => "NZD_JPY",
            Symbol::CAD_JPY => "CAD_JPY",
            Symbol::CHF_JPY => "CHF_JPY",
            Symbol::TRY_JPY => "TRY_JPY",
            Symbol::ZAR_JPY => "ZAR_JPY",
            Symbol::MXN_JPY => "MXN_JPY",
            Symbol::EUR_USD => "EUR_USD",
            Symbol::GBP_USD => "GBP_USD",
            Symbol::AUD_USD => "AUD_USD",
            Symbol::NZD_USD => "NZD_USD",
        }
    }

    pub fn quote_kind(&self) -> QuoteKind {
        match self {
            Symbol::EUR_USD | Symbol::GBP_USD | Symbol::AUD_USD | Symbol::NZD_USD => {
                QuoteKind::UsdQuoted
            }
            _ => QuoteKind::JpyQuoted,
        }
    }

    /// Smallest price move the broker quotes in: 0.01 for yen pairs, 0.0001
    /// otherwise.
    pub fn pip_size(&self) -> Decimal {
        match self.quote_kind() {
            QuoteKind::JpyQuoted => Decimal::new(1, 2),
            QuoteKind::UsdQuoted => Decimal::new(1, 4),
        }
    }

    /// Pip size as `f64` for the strategy arithmetic.
    pub fn pip_size_f64(&self) -> f64 {
        match self.quote_kind() {
            QuoteKind::JpyQuoted => 0.01,
            QuoteKind::UsdQuoted => 0.0001,
        }
    }

    /// Decimal digits shown when a price of this pair is displayed.
    pub fn display_precision(&self) -> u32 {
        match self.quote_kind() {
            QuoteKind::JpyQuoted => 3,
            QuoteKind::UsdQuoted => 5,
        }
    }
}

impl std::str::FromStr for Symbol {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Symbol::ALL
            .iter()
            .find(|sym| sym.as_str() == s)
            .copied()
            .ok_or_else(|| format!("unknown symbol: {s}"))
    }
}

impl std::fmt::Display for Symbol {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Timeframe
// =============================================================================

/// Candle intervals the engine aggregates and analyses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Timeframe {
    M1,
    M5,
    M15,
    H1,
    H4,
    D1,
}

impl Timeframe {
    pub const ALL: [Timeframe; 6] = [
        Timeframe::M1,
        Timeframe::M5,
        Timeframe::M15,
        Timeframe::H1,
        Timeframe::H4,
        Timeframe::D1,
    ];

    pub fn duration_secs(&self) -> i64 {
        match self {
            Timeframe::M1 => 60,
            Timeframe::M5 => 300,
            Timeframe::M15 => 900,
            Timeframe::H1 => 3_600,
            Timeframe::H4 => 14_400,
            Timeframe::D1 => 86_400,
        }
    }

    pub fn duration_ms(&self) -> i64 {
        self.duration_secs() * 1_000
    }

    pub fn label(&self) -> &'static str {
        match self {
            Timeframe::M1 => "1min",
            Timeframe::M5 => "5min",
            Timeframe::M15 => "15min",
            Timeframe::H1 => "1hour",
            Timeframe::H4 => "4hour",
            Timeframe::D1 => "1day",
        }
    }

    /// Floor an epoch-millisecond timestamp onto this timeframe's grid.
    pub fn align_ms(&self, ts_ms: i64) -> i64 {
        let d = self.duration_ms();
        ts_ms.div_euclid(d) * d
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

// =============================================================================
// Quotes
// =============================================================================

/// Whether the market is currently accepting orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MarketStatus {
    Open,
    Close,
    Maintenance,
}

impl std::fmt::Display for MarketStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Open => write!(f, "OPEN"),
            Self::Close => write!(f, "CLOSE"),
            Self::Maintenance => write!(f, "MAINTENANCE"),
        }
    }
}

/// A best bid/ask pair for one symbol. Ephemeral: the latest quote wins.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Quote {
    pub symbol: Symbol,
    pub bid: Decimal,
    pub ask: Decimal,
    pub timestamp: DateTime<Utc>,
    pub status: MarketStatus,
}

impl Quote {
    pub fn mid(&self) -> Decimal {
        (self.bid + self.ask) / Decimal::TWO
    }

    pub fn spread(&self) -> Decimal {
        self.ask - self.bid
    }

    /// Mid price as `f64` for candle aggregation and indicator input.
    pub fn mid_f64(&self) -> f64 {
        use rust_decimal::prelude::ToPrimitive;
        self.mid().to_f64().unwrap_or(0.0)
    }
}

// =============================================================================
// Candles
// =============================================================================

/// One OHLC bar. `open_time` is epoch milliseconds aligned to the timeframe
/// grid. `synthetic` marks a flat bar inserted to bridge a market-closed gap;
/// downstream consumers may elect to skip those.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candle {
    pub open_time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: Option<f64>,
    #[serde(default)]
    pub synthetic: bool,
}

impl Candle {
    pub fn new(open_time: i64, open: f64, high: f64, low: f64, close: f64) -> Self {
        Self {
            open_time,
            open,
            high,
            low,
            close,
            volume: None,
            synthetic: false,
        }
    }

    /// A flat bar whose OHLC all equal `price` — used to bridge grid gaps.
    pub fn flat(open_time: i64, price: f64) -> Self {
        Self {
            open_time,
            open: price,
            high: price,
            low: price,
            close: price,
            volume: None,
            synthetic: true,
        }
    }

    /// `low <= open, close <= high` must hold for every bar.
    pub fn is_well_formed(&self) -> bool {
        self.low <= self.open
            && self.low <= self.close
            && self.open <= self.high
            && self.close <= self.high
    }

    pub fn is_bullish(&self) -> bool {
        self.close > self.open
    }

    pub fn is_bearish(&self) -> bool {
        self.close < self.open
    }
}

// =============================================================================
// Order side
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Buy => Side::Sell,
            Side::Sell => Side::Buy,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Side::Buy => "BUY",
            Side::Sell => "SELL",
        }
    }
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn symbol_roundtrip() {
        for sym in Symbol::ALL {
            let parsed: Symbol = sym.as_str().parse().unwrap();
            assert_eq!(parsed, sym);
        }
    }

    #[test]
    fn symbol_unknown_rejected() {
        assert!("BTC_JPY".parse::<Symbol>().is_err());
        assert!("usd_jpy".parse::<Symbol>().is_err());
    }

    #[test]
    fn pip_sizes() {
        assert_eq!(Symbol::USD_JPY.pip_size(), dec!(0.01));
        assert_eq!(Symbol::EUR_USD.pip_size(), dec!(0.0001));
        assert_eq!(Symbol::ZAR_JPY.display_precision(), 3);
        assert_eq!(Symbol::GBP_USD.display_precision(), 5);
    }

    #[test]
    fn timeframe_grid_alignment() {
        // 2024-01-02 03:17:45 UTC in ms.
        let ts = 1_704_165_465_000_i64;
        assert_eq!(Timeframe::M1.align_ms(ts) % 60_000, 0);
        assert_eq!(Timeframe::M15.align_ms(ts) % 900_000, 0);
        assert!(Timeframe::M15.align_ms(ts) <= ts);
        assert!(ts - Timeframe::M15.align_ms(ts) < 900_000);
    }

    #[test]
    fn timeframe_boundary_is_identity() {
        let boundary = 1_704_165_300_000_i64; // multiple of 900 000
        assert_eq!(Timeframe::M15.align_ms(boundary), boundary);
    }

    #[test]
    fn quote_mid_and_spread() {
        let q = Quote {
            symbol: Symbol::USD_JPY,
            bid: dec!(150.100),
            ask: dec!(150.104),
            timestamp: Utc::now(),
            status: MarketStatus::Open,
        };
        assert_eq!(q.mid(), dec!(150.102));
        assert_eq!(q.spread(), dec!(0.004));
    }

    #[test]
    fn candle_well_formed() {
        let good = Candle::new(0, 100.0, 101.0, 99.0, 100.5);
        assert!(good.is_well_formed());
        let bad = Candle::new(0, 100.0, 99.5, 99.0, 100.5); // open above high
        assert!(!bad.is_well_formed());
    }

    #[test]
    fn flat_candle_is_synthetic() {
        let c = Candle::flat(0, 150.0);
        assert!(c.synthetic);
        assert!(c.is_well_formed());
        assert!(!c.is_bullish());
        assert!(!c.is_bearish());
    }

    #[test]
    fn market_status_wire_format() {
        let s: MarketStatus = serde_json::from_str("\"OPEN\"").unwrap();
        assert_eq!(s, MarketStatus::Open);
        assert_eq!(
            serde_json::to_string(&MarketStatus::Maintenance).unwrap(),
            "\"MAINTENANCE\""
        );
    }
}
