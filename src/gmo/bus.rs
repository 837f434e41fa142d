// =============================================================================
// Market bus — typed channels between the WebSocket clients and consumers
// =============================================================================
//
// The stream tasks hold only send handles; consumers hold receive ends. This
// keeps the dependency arrow one-way (no back-references from the socket to
// its consumers).
//
// Backpressure policy differs by payload value:
//   - Quotes: bounded ring of 1024, newest kept, oldest dropped. A stale
//     quote has no value, so a lagging consumer skips ahead.
//   - Execution / order / position events: lossless. The producer blocks
//     until the consumer drains; a watchdog raises a consumer-stall alert
//     after 5 s, but the event is still delivered in order, never dropped.
// =============================================================================

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{broadcast, mpsc};
use tracing::{error, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::gmo::wire::{
    WsExecutionEvent, WsOrderEvent, WsPositionEvent, WsPositionSummaryEvent,
};
use crate::types::Quote;

/// Quote ring size. Overflow drops the oldest entries for lagging readers.
const QUOTE_RING: usize = 1024;
/// Lossless channel depth before the producer starts blocking.
const EVENT_DEPTH: usize = 256;
/// How long a producer blocks before the stall alert fires.
const STALL_ALERT_AFTER: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// Lossless channel
// ---------------------------------------------------------------------------

/// Send half of a channel that must never drop a message. Blocks the caller
/// when full; raises the stall flag (and keeps waiting) if the consumer does
/// not drain within the alert window.
pub struct LosslessSender<T> {
    tx: mpsc::Sender<T>,
    channel: &'static str,
    stalled: Arc<AtomicBool>,
}

impl<T> Clone for LosslessSender<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            channel: self.channel,
            stalled: self.stalled.clone(),
        }
    }
}

impl<T: Send> LosslessSender<T> {
    /// Deliver in order, waiting as long as it takes. The stall alert is an
    /// operator signal, not permission to drop the message.
    pub async fn send(&self, item: T) -> GatewayResult<()> {
        let send_fut = self.tx.send(item);
        tokio::pin!(send_fut);
        let alert = tokio::time::sleep(STALL_ALERT_AFTER);
        tokio::pin!(alert);

        let mut alerted = false;
        loop {
            tokio::select! {
                result = &mut send_fut => {
                    return match result {
                        Ok(()) => {
                            if alerted {
                                warn!(channel = self.channel, "stalled consumer drained, producer resumed");
                            }
                            self.stalled.store(false, Ordering::Relaxed);
                            Ok(())
                        }
                        Err(_) => Err(GatewayError::Internal(format!(
                            "receiver for channel {} dropped",
                            self.channel
                        ))),
                    };
                }
                _ = &mut alert, if !alerted => {
                    alerted = true;
                    self.stalled.store(true, Ordering::Relaxed);
                    error!(
                        channel = self.channel,
                        waited_s = STALL_ALERT_AFTER.as_secs(),
                        "consumer stall — producer blocked, holding message"
                    );
                }
            }
        }
    }

    /// Whether this channel has an outstanding stall alert.
    pub fn is_stalled(&self) -> bool {
        self.stalled.load(Ordering::Relaxed)
    }
}

fn lossless<T>(channel: &'static str) -> (LosslessSender<T>, mpsc::Receiver<T>) {
    let (tx, rx) = mpsc::channel(EVENT_DEPTH);
    (
        LosslessSender {
            tx,
            channel,
            stalled: Arc::new(AtomicBool::new(false)),
        },
        rx,
    )
}

// ---------------------------------------------------------------------------
// Bus
// ---------------------------------------------------------------------------

/// Send handles, held by the WebSocket clients.
#[derive(Clone)]
pub struct MarketBus {
    quote_tx: broadcast::Sender<Quote>,
    pub executions: LosslessSender<WsExecutionEvent>,
    pub orders: LosslessSender<WsOrderEvent>,
    pub positions: LosslessSender<WsPositionEvent>,
    pub position_summaries: LosslessSender<WsPositionSummaryEvent>,
}

/// Receive ends, handed to consumers exactly once at startup.
pub struct BusReceivers {
    pub executions: mpsc::Receiver<WsExecutionEvent>,
    pub orders: mpsc::Receiver<WsOrderEvent>,
    pub positions: mpsc::Receiver<WsPositionEvent>,
    pub position_summaries: mpsc::Receiver<WsPositionSummaryEvent>,
}

impl MarketBus {
    pub fn new() -> (Self, BusReceivers) {
        let (quote_tx, _) = broadcast::channel(QUOTE_RING);
        let (executions, executions_rx) = lossless("executionEvents");
        let (orders, orders_rx) = lossless("orderEvents");
        let (positions, positions_rx) = lossless("positionEvents");
        let (position_summaries, position_summaries_rx) = lossless("positionSummaryEvents");

        (
            Self {
                quote_tx,
                executions,
                orders,
                positions,
                position_summaries,
            },
            BusReceivers {
                executions: executions_rx,
                orders: orders_rx,
                positions: positions_rx,
                position_summaries: position_summaries_rx,
            },
        )
    }

    /// Publish a quote. Nobody listening is fine; a lagging listener loses
    /// the oldest entries, never the newest.
    pub fn publish_quote(&self, quote: Quote) {
        // No receivers during startup is expected.
        let _ = self.quote_tx.send(quote);
    }

    /// A new quote subscription. Lag handling is the subscriber's duty: on
    /// `RecvError::Lagged` it should simply continue reading.
    pub fn subscribe_quotes(&self) -> broadcast::Receiver<Quote> {
        self.quote_tx.subscribe()
    }

    /// True if any lossless channel currently has a blocked producer.
    pub fn any_stalled(&self) -> bool {
        self.executions.is_stalled()
            || self.orders.is_stalled()
            || self.positions.is_stalled()
            || self.position_summaries.is_stalled()
    }
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{MarketStatus, Symbol};
    use chrono::Utc;
    use rust_decimal_macros::dec;

    fn quote(bid: rust_decimal::Decimal) -> Quote {
        Quote {
            symbol: Symbol::USD_JPY,
            bid,
            ask: bid + dec!(0.004),
            timestamp: Utc::now(),
            status: MarketStatus::Open,
        }
    }

    #[tokio::test]
    async fn quotes_drop_oldest_for_lagging_reader() {
        let (bus, _rx) = MarketBus::new();
        let mut sub = bus.subscribe_quotes();

        // Overfill the ring by a wide margin.
        for i in 0..(QUOTE_RING + 100) {
            bus.publish_quote(quote(rust_decimal::Decimal::from(i as i64)));
        }

        // The first read reports the lag, after which the newest survive.
        match sub.recv().await {
            Err(broadcast::error::RecvError::Lagged(n)) => {
                assert!(n >= 100, "expected at least 100 dropped, got {n}");
            }
            other => panic!("expected lag, got {other:?}"),
        }
        let newest_visible = sub.recv().await.unwrap();
        assert!(newest_visible.bid >= rust_decimal::Decimal::from(100));
    }

    #[tokio::test]
    async fn lossless_channel_preserves_order() {
        let (bus, mut rx) = MarketBus::new();

        for i in 0..10 {
            let ev = sample_execution(i);
            bus.executions.send(ev).await.unwrap();
        }

        for i in 0..10 {
            let ev = rx.executions.recv().await.unwrap();
            assert_eq!(ev.execution_id, i);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn stall_is_surfaced_and_message_still_delivered() {
        let (bus, mut rx) = MarketBus::new();

        // Fill the channel to capacity with no consumer.
        for i in 0..EVENT_DEPTH as i64 {
            bus.executions.send(sample_execution(i)).await.unwrap();
        }
        assert!(!bus.executions.is_stalled());

        // The next send blocks; the alert fires at the 5 s mark but the
        // message is held, not dropped.
        let sender = bus.executions.clone();
        let blocked = tokio::spawn(async move { sender.send(sample_execution(999)).await });

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(bus.executions.is_stalled());
        assert!(bus.any_stalled());

        // Drain one slot — the blocked send completes and every message,
        // including the held one, arrives in order.
        let first = rx.executions.recv().await.unwrap();
        assert_eq!(first.execution_id, 0);
        blocked.await.unwrap().unwrap();
        assert!(!bus.executions.is_stalled());

        let mut last = first.execution_id;
        while let Ok(ev) = rx.executions.try_recv() {
            assert!(ev.execution_id > last);
            last = ev.execution_id;
        }
        assert_eq!(last, 999);
    }

    fn sample_execution(id: i64) -> WsExecutionEvent {
        serde_json::from_value(serde_json::json!({
            "executionId": id,
            "orderId": 1,
            "symbol": "USD_JPY",
            "side": "BUY",
            "settleType": "OPEN",
            "executionPrice": "150.000",
            "executionSize": "10000",
            "lossGain": "0",
            "executionTimestamp": "2024-01-02T03:04:05.006Z"
        }))
        .unwrap()
    }
}
