pub mod frame;
pub mod integrated;
pub mod session;

pub use frame::{analyze_timeframe, AnalysisFrame, SignalBias, Strength, Trend};
pub use integrated::{integrate, IntegratedVerdict, RiskLevel};
pub use session::{market_session, ActivityLevel, MarketSession};
