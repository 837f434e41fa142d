// =============================================================================
// Candle store — per (symbol, timeframe) ring buffers with tick aggregation
// =============================================================================
//
// Two writers feed each ring: the REST backfiller seeds history on warm-up,
// and the quote aggregator folds live ticks into the current open bar,
// rotating it on the timeframe boundary. A quote stamped at or past the
// boundary first closes the previous bar, then opens the next.
//
// Gap rule: when the next quote lands more than one bar past the open bar's
// close, the skipped grid slots are bridged with flat bars at the prior
// close, flagged `synthetic` so indicator consumers can elect to skip them.
// Within one ring, consecutive aggregated bars therefore differ by exactly
// one duration.
//
// Readers take point-in-time slices: a clone taken under the read lock, so a
// concurrent append is either fully visible or not at all.
// =============================================================================

use std::collections::{HashMap, VecDeque};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::types::{Candle, Quote, Symbol, Timeframe};

/// Composite key identifying one candle series.
#[derive(Debug, Clone, Copy, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct SeriesKey {
    pub symbol: Symbol,
    pub timeframe: Timeframe,
}

impl std::fmt::Display for SeriesKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.symbol, self.timeframe)
    }
}

struct SeriesBuffer {
    closed: VecDeque<Candle>,
    open: Option<Candle>,
}

impl SeriesBuffer {
    fn new(capacity: usize) -> Self {
        Self {
            closed: VecDeque::with_capacity(capacity + 1),
            open: None,
        }
    }
}

/// Thread-safe store of every candle ring.
pub struct CandleStore {
    buffers: RwLock<HashMap<SeriesKey, SeriesBuffer>>,
    capacity: usize,
}

impl CandleStore {
    /// `capacity` closed candles are retained per ring, plus one open bar.
    pub fn new(capacity: usize) -> Self {
        Self {
            buffers: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    // -------------------------------------------------------------------------
    // Backfill writer
    // -------------------------------------------------------------------------

    /// Merge history fetched over REST into the ring. Bars are deduplicated
    /// by open time (fetched data wins), kept sorted, and trimmed from the
    /// front to capacity. Malformed bars are dropped with a warning.
    pub fn backfill(&self, key: SeriesKey, mut candles: Vec<Candle>) {
        candles.retain(|c| {
            let ok = c.is_well_formed();
            if !ok {
                warn!(%key, open_time = c.open_time, "dropping malformed backfill bar");
            }
            ok
        });
        if candles.is_empty() {
            return;
        }

        let mut map = self.buffers.write();
        let buffer = map
            .entry(key)
            .or_insert_with(|| SeriesBuffer::new(self.capacity));

        let mut merged: HashMap<i64, Candle> = buffer
            .closed
            .drain(..)
            .map(|c| (c.open_time, c))
            .collect();
        for c in candles {
            merged.insert(c.open_time, c);
        }

        let mut sorted: Vec<Candle> = merged.into_values().collect();
        sorted.sort_by_key(|c| c.open_time);
        while sorted.len() > self.capacity {
            sorted.remove(0);
        }

        // A freshly backfilled bar at or past the open bar's slot supersedes
        // the partial aggregate.
        if let (Some(open), Some(last)) = (&buffer.open, sorted.last()) {
            if last.open_time >= open.open_time {
                buffer.open = None;
            }
        }

        debug!(%key, bars = sorted.len(), "ring backfilled");
        buffer.closed = sorted.into();
    }

    // -------------------------------------------------------------------------
    // Tick aggregation writer
    // -------------------------------------------------------------------------

    /// Fold one quote into every timeframe ring of its symbol. Returns the
    /// bars that closed as a result, for persistence.
    pub fn apply_quote(&self, quote: &Quote) -> Vec<(SeriesKey, Candle)> {
        let price = quote.mid_f64();
        if price <= 0.0 {
            return Vec::new();
        }
        let ts_ms = quote.timestamp.timestamp_millis();

        let mut newly_closed = Vec::new();
        let mut map = self.buffers.write();

        for timeframe in Timeframe::ALL {
            let key = SeriesKey {
                symbol: quote.symbol,
                timeframe,
            };
            let buffer = map
                .entry(key)
                .or_insert_with(|| SeriesBuffer::new(self.capacity));

            let slot = timeframe.align_ms(ts_ms);

            match &mut buffer.open {
                None => {
                    buffer.open = Some(Candle::new(slot, price, price, price, price));
                }
                Some(open) if slot == open.open_time => {
                    open.high = open.high.max(price);
                    open.low = open.low.min(price);
                    open.close = price;
                }
                Some(open) if slot < open.open_time => {
                    // Out-of-order tick from before the current bar; ignore.
                    debug!(%key, ts_ms, "stale tick ignored");
                }
                Some(_) => {
                    // Boundary crossed: close the bar, bridge any skipped
                    // slots with flat bars, then open the new one.
                    let open = buffer.open.take().expect("checked above");
                    let prior_close = open.close;
                    let mut next_slot = open.open_time + timeframe.duration_ms();

                    Self::push_closed(buffer, self.capacity, open.clone());
                    newly_closed.push((key, open));

                    while next_slot < slot {
                        let gap_bar = Candle::flat(next_slot, prior_close);
                        Self::push_closed(buffer, self.capacity, gap_bar.clone());
                        newly_closed.push((key, gap_bar));
                        next_slot += timeframe.duration_ms();
                    }

                    buffer.open = Some(Candle::new(slot, price, price, price, price));
                }
            }
        }

        newly_closed
    }

    fn push_closed(buffer: &mut SeriesBuffer, capacity: usize, candle: Candle) {
        buffer.closed.push_back(candle);
        while buffer.closed.len() > capacity {
            buffer.closed.pop_front();
        }
    }

    // -------------------------------------------------------------------------
    // Readers
    // -------------------------------------------------------------------------

    /// The most recent `count` closed bars, oldest first. Point-in-time: the
    /// result never reflects a half-applied append.
    pub fn slice(&self, key: &SeriesKey, count: usize) -> Vec<Candle> {
        let map = self.buffers.read();
        match map.get(key) {
            Some(buffer) => {
                let start = buffer.closed.len().saturating_sub(count);
                buffer.closed.iter().skip(start).cloned().collect()
            }
            None => Vec::new(),
        }
    }

    /// Close prices of the most recent `count` closed bars, oldest first.
    pub fn closes(&self, key: &SeriesKey, count: usize) -> Vec<f64> {
        self.slice(key, count).iter().map(|c| c.close).collect()
    }

    /// Open time of the newest closed bar, if any.
    pub fn last_open_time(&self, key: &SeriesKey) -> Option<i64> {
        let map = self.buffers.read();
        map.get(key).and_then(|b| b.closed.back().map(|c| c.open_time))
    }

    /// Number of closed bars currently held.
    pub fn len(&self, key: &SeriesKey) -> usize {
        let map = self.buffers.read();
        map.get(key).map_or(0, |b| b.closed.len())
    }

    pub fn is_empty(&self, key: &SeriesKey) -> bool {
        self.len(key) == 0
    }

    /// Age of the newest closed bar relative to `now_ms`, measured from the
    /// moment that bar closed. `None` when the ring is empty.
    pub fn staleness_ms(&self, key: &SeriesKey, now_ms: i64) -> Option<i64> {
        self.last_open_time(key)
            .map(|t| now_ms - (t + key.timeframe.duration_ms()))
    }

    /// A ring is fresh when its newest bar closed less than half a duration
    /// late. The publisher backfills anything staler than 1.5 durations
    /// measured from the bar's open.
    pub fn is_stale(&self, key: &SeriesKey, now_ms: i64) -> bool {
        match self.last_open_time(key) {
            Some(t) => now_ms - t > key.timeframe.duration_ms() * 3 / 2,
            None => true,
        }
    }
}
