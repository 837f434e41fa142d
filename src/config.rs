// =============================================================================
// Runtime Configuration — engine settings with atomic save
// =============================================================================
//
// Every tunable parameter lives here. Persistence uses an atomic tmp + rename
// pattern to prevent corruption on crash, and all fields carry serde defaults
// so adding new fields never breaks loading an older config file.
//
// API credentials are deliberately NOT part of this file: they are read from
// the environment (GMO_API_KEY / GMO_API_SECRET) so they never land on disk
// or in a snapshot payload.
// =============================================================================

use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::types::Symbol;

// =============================================================================
// Default-value helpers (required by serde `default = "..."` attribute)
// =============================================================================

fn default_symbols() -> Vec<Symbol> {
    vec![
        Symbol::USD_JPY,
        Symbol::EUR_JPY,
        Symbol::GBP_JPY,
        Symbol::EUR_USD,
        Symbol::GBP_USD,
    ]
}

fn default_session_start() -> String {
    "16:00".to_string()
}

fn default_session_end() -> String {
    "24:00".to_string()
}

fn default_atr_stop_mult() -> f64 {
    1.5
}

fn default_tp1_mult() -> f64 {
    1.0
}

fn default_tp2_mult() -> f64 {
    2.0
}

fn default_get_per_sec() -> f64 {
    6.0
}

fn default_post_per_sec() -> f64 {
    1.0
}

fn default_ws_sub_per_sec() -> f64 {
    1.0
}

fn default_clock_skew_max_ms() -> i64 {
    5_000
}

fn default_candle_capacity() -> usize {
    500
}

fn default_bind_addr() -> String {
    "0.0.0.0:3001".to_string()
}

// =============================================================================
// Credentials
// =============================================================================

/// API key material, read from the environment. Absence is not an error: the
/// gateway runs public-only without it.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    /// Read `GMO_API_KEY` / `GMO_API_SECRET`. Returns `None` unless both are
    /// present and non-empty.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var("GMO_API_KEY").ok()?;
        let api_secret = std::env::var("GMO_API_SECRET").ok()?;
        if api_key.is_empty() || api_secret.is_empty() {
            return None;
        }
        Some(Self {
            api_key,
            api_secret,
        })
    }
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &"<redacted>")
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

// =============================================================================
// Strategy parameters
// =============================================================================

/// Tunable parameters for the pullback strategy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TfqeParams {
    /// Session window start, JST wall clock ("HH:MM").
    #[serde(default = "default_session_start")]
    pub session_start: String,

    /// Session window end, JST wall clock ("HH:MM"; "24:00" means midnight).
    #[serde(default = "default_session_end")]
    pub session_end: String,

    /// ATR multiplier for stop-loss distance.
    #[serde(default = "default_atr_stop_mult")]
    pub atr_stop_mult: f64,

    /// ATR multiplier for the first take-profit.
    #[serde(default = "default_tp1_mult")]
    pub tp1_mult: f64,

    /// ATR multiplier for the second take-profit.
    #[serde(default = "default_tp2_mult")]
    pub tp2_mult: f64,
}

impl Default for TfqeParams {
    fn default() -> Self {
        Self {
            session_start: default_session_start(),
            session_end: default_session_end(),
            atr_stop_mult: default_atr_stop_mult(),
            tp1_mult: default_tp1_mult(),
            tp2_mult: default_tp2_mult(),
        }
    }
}

impl TfqeParams {
    /// Parse "HH:MM" into minutes since midnight. "24:00" is accepted for the
    /// window end.
    pub fn parse_clock(s: &str) -> Result<u32> {
        let (h, m) = s
            .split_once(':')
            .with_context(|| format!("bad clock time {s:?}, expected HH:MM"))?;
        let h: u32 = h.parse().with_context(|| format!("bad hour in {s:?}"))?;
        let m: u32 = m.parse().with_context(|| format!("bad minute in {s:?}"))?;
        anyhow::ensure!(h <= 24 && m < 60 && (h < 24 || m == 0), "clock time {s:?} out of range");
        Ok(h * 60 + m)
    }

    /// The trading window as (start, end) minutes since JST midnight.
    pub fn session_window(&self) -> Result<(u32, u32)> {
        let start = Self::parse_clock(&self.session_start)?;
        let end = Self::parse_clock(&self.session_end)?;
        anyhow::ensure!(start < end, "session start must precede end");
        Ok((start, end))
    }
}

// =============================================================================
// Rate limits
// =============================================================================

/// Broker-documented ceilings. Tokens per second for each verb class.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateLimits {
    #[serde(default = "default_get_per_sec")]
    pub get_per_sec: f64,

    #[serde(default = "default_post_per_sec")]
    pub post_per_sec: f64,

    #[serde(default = "default_ws_sub_per_sec")]
    pub ws_sub_per_sec: f64,
}

impl Default for RateLimits {
    fn default() -> Self {
        Self {
            get_per_sec: default_get_per_sec(),
            post_per_sec: default_post_per_sec(),
            ws_sub_per_sec: default_ws_sub_per_sec(),
        }
    }
}

// =============================================================================
// RuntimeConfig
// =============================================================================

/// Top-level runtime configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Live order submission. Off by default; the build is read-only market
    /// data + signals unless this is explicitly enabled AND credentials are
    /// configured.
    #[serde(default)]
    pub trading_enabled: bool,

    /// Pairs the engine watches and analyses.
    #[serde(default = "default_symbols")]
    pub symbols: Vec<Symbol>,

    /// Pullback strategy tuning.
    #[serde(default)]
    pub tfqe: TfqeParams,

    /// Outgoing request ceilings.
    #[serde(default)]
    pub limits: RateLimits,

    /// Maximum tolerated local-vs-server clock difference before the signer
    /// refuses to sign.
    #[serde(default = "default_clock_skew_max_ms")]
    pub clock_skew_max_ms: i64,

    /// Closed candles retained per (symbol, timeframe) ring.
    #[serde(default = "default_candle_capacity")]
    pub candle_capacity: usize,

    /// Address the snapshot API listens on.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            trading_enabled: false,
            symbols: default_symbols(),
            tfqe: TfqeParams::default(),
            limits: RateLimits::default(),
            clock_skew_max_ms: default_clock_skew_max_ms(),
            candle_capacity: default_candle_capacity(),
            bind_addr: default_bind_addr(),
        }
    }
}

impl RuntimeConfig {
    /// Load configuration from a JSON file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config from {}", path.display()))?;

        let config: Self = serde_json::from_str(&content)
            .with_context(|| format!("failed to parse config from {}", path.display()))?;

        config.validate()?;

        info!(
            path = %path.display(),
            symbols = ?config.symbols,
            trading_enabled = config.trading_enabled,
            "runtime config loaded"
        );

        Ok(config)
    }

    /// Persist the current configuration using an atomic write (write to
    /// `.tmp`, then rename).
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();

        let content =
            serde_json::to_string_pretty(self).context("failed to serialise config to JSON")?;

        let tmp_path = path.with_extension("json.tmp");

        std::fs::write(&tmp_path, &content)
            .with_context(|| format!("failed to write tmp config to {}", tmp_path.display()))?;

        std::fs::rename(&tmp_path, path)
            .with_context(|| format!("failed to rename tmp config to {}", path.display()))?;

        info!(path = %path.display(), "runtime config saved (atomic)");
        Ok(())
    }

    /// Startup sanity checks. A bad config is fatal before any connection is
    /// opened.
    pub fn validate(&self) -> Result<()> {
        anyhow::ensure!(!self.symbols.is_empty(), "at least one symbol is required");
        anyhow::ensure!(self.limits.get_per_sec > 0.0, "limits.get_per_sec must be positive");
        anyhow::ensure!(self.limits.post_per_sec > 0.0, "limits.post_per_sec must be positive");
        anyhow::ensure!(
            self.limits.ws_sub_per_sec > 0.0,
            "limits.ws_sub_per_sec must be positive"
        );
        anyhow::ensure!(self.clock_skew_max_ms > 0, "clock_skew_max_ms must be positive");
        anyhow::ensure!(self.candle_capacity >= 500, "candle_capacity must be at least 500");
        self.tfqe.session_window()?;
        Ok(())
    }

    /// Apply environment overrides (`KAWASE_SYMBOLS` as a comma list).
    pub fn apply_env_overrides(&mut self) {
        if let Ok(raw) = std::env::var("KAWASE_SYMBOLS") {
            let parsed: Vec<Symbol> = raw
                .split(',')
                .filter_map(|s| s.trim().parse().ok())
                .collect();
            if !parsed.is_empty() {
                self.symbols = parsed;
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_has_expected_values() {
        let cfg = RuntimeConfig::default();
        assert!(!cfg.trading_enabled);
        assert_eq!(cfg.symbols.len(), 5);
        assert_eq!(cfg.symbols[0], Symbol::USD_JPY);
        assert!((cfg.limits.get_per_sec - 6.0).abs() < f64::EPSILON);
        assert!((cfg.limits.post_per_sec - 1.0).abs() < f64::EPSILON);
        assert!((cfg.limits.ws_sub_per_sec - 1.0).abs() < f64::EPSILON);
        assert_eq!(cfg.clock_skew_max_ms, 5_000);
        assert_eq!(cfg.candle_capacity, 500);
        assert!((cfg.tfqe.atr_stop_mult - 1.5).abs() < f64::EPSILON);
        assert!((cfg.tfqe.tp1_mult - 1.0).abs() < f64::EPSILON);
        assert!((cfg.tfqe.tp2_mult - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn deserialise_empty_json_uses_defaults() {
        let cfg: RuntimeConfig = serde_json::from_str("{}").unwrap();
        assert!(!cfg.trading_enabled);
        assert_eq!(cfg.tfqe.session_start, "16:00");
        assert_eq!(cfg.tfqe.session_end, "24:00");
    }

    #[test]
    fn deserialise_partial_json_fills_defaults() {
        let json = r#"{ "trading_enabled": true, "symbols": ["AUD_JPY"] }"#;
        let cfg: RuntimeConfig = serde_json::from_str(json).unwrap();
        assert!(cfg.trading_enabled);
        assert_eq!(cfg.symbols, vec![Symbol::AUD_JPY]);
        assert_eq!(cfg.candle_capacity, 500);
    }

    #[test]
    fn roundtrip_serialisation() {
        let cfg = RuntimeConfig::default();
        let json = serde_json::to_string(&cfg).unwrap();
        let cfg2: RuntimeConfig = serde_json::from_str(&json).unwrap();
        assert_eq!(cfg.symbols, cfg2.symbols);
        assert_eq!(cfg.trading_enabled, cfg2.trading_enabled);
        assert_eq!(cfg.bind_addr, cfg2.bind_addr);
    }

    #[test]
    fn clock_parsing() {
        assert_eq!(TfqeParams::parse_clock("16:00").unwrap(), 960);
        assert_eq!(TfqeParams::parse_clock("24:00").unwrap(), 1440);
        assert_eq!(TfqeParams::parse_clock("09:30").unwrap(), 570);
        assert!(TfqeParams::parse_clock("25:00").is_err());
        assert!(TfqeParams::parse_clock("24:30").is_err());
        assert!(TfqeParams::parse_clock("sixteen").is_err());
    }

    #[test]
    fn session_window_defaults() {
        let params = TfqeParams::default();
        assert_eq!(params.session_window().unwrap(), (960, 1440));
    }

    #[test]
    fn validation_rejects_inverted_session() {
        let mut cfg = RuntimeConfig::default();
        cfg.tfqe.session_start = "22:00".into();
        cfg.tfqe.session_end = "16:00".into();
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validation_rejects_small_ring() {
        let mut cfg = RuntimeConfig::default();
        cfg.candle_capacity = 100;
        assert!(cfg.validate().is_err());
    }
}
