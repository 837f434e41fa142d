// =============================================================================
// Candle persistence seam
// =============================================================================
//
// The engine itself needs no durable state. When a repository is attached,
// the candle rings are replayed from it on warm-up and every newly closed
// bar is appended through it. The default implementation does nothing.
// =============================================================================

use async_trait::async_trait;

use crate::types::{Candle, Symbol, Timeframe};

#[async_trait]
pub trait CandleRepository: Send + Sync {
    /// The most recent `count` bars for one series, oldest first.
    async fn load(
        &self,
        symbol: Symbol,
        timeframe: Timeframe,
        count: usize,
    ) -> anyhow::Result<Vec<Candle>>;

    /// Persist one closed bar.
    async fn append(
        &self,
        symbol: Symbol,
        timeframe: Timeframe,
        candle: &Candle,
    ) -> anyhow::Result<()>;
}

/// Repository that stores nothing. Used when no store is attached.
pub struct NullRepository;

#[async_trait]
impl CandleRepository for NullRepository {
    async fn load(
        &self,
        _symbol: Symbol,
        _timeframe: Timeframe,
        _count: usize,
    ) -> anyhow::Result<Vec<Candle>> {
        Ok(Vec::new())
    }

    async fn append(
        &self,
        _symbol: Symbol,
        _timeframe: Timeframe,
        _candle: &Candle,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}
