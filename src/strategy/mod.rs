// =============================================================================
// Strategies
// =============================================================================
//
// A strategy is data plus one behaviour: look at the candle store and emit a
// signal. Instances compose into a list; there is no inheritance anywhere.

pub mod tfqe;

use chrono::{DateTime, Utc};

use crate::market_data::CandleStore;
use crate::types::Symbol;

pub use tfqe::{TfqeSignal, TfqeStrategy, TfqeTag};

pub trait Strategy: Send + Sync {
    fn name(&self) -> &'static str;

    /// Evaluate one symbol against the current store contents.
    fn tick(&self, store: &CandleStore, symbol: Symbol, now: DateTime<Utc>) -> TfqeSignal;
}
