// =============================================================================
// Public WebSocket stream — quotes for every configured pair
// =============================================================================
//
// Connects to the public endpoint, issues one subscribe frame per symbol
// (each gated by the subscribe limiter: one per second per IP), and publishes
// parsed quotes onto the market bus.
//
// Heartbeat: the server pings once a minute. If three consecutive minutes
// pass without any inbound bytes the connection is declared dead and torn
// down. Reconnects back off exponentially from 1 s to 60 s, and every new
// connection re-subscribes from scratch.
// =============================================================================

use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::GatewayResult;
use crate::gmo::bus::MarketBus;
use crate::gmo::rate_limit::{LimitClass, RateLimiter};
use crate::gmo::wire::{WsCommand, WsTicker};
use crate::types::{Quote, Symbol};

const PUBLIC_WS_URL: &str = "wss://forex-api.coin.z.com/ws/public";

/// The server pings once per minute; three silent intervals mean the
/// connection is dead.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const MAX_SILENT_INTERVALS: u32 = 3;

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

pub struct PublicWsClient {
    url: String,
    symbols: Vec<Symbol>,
    bus: MarketBus,
    limiter: std::sync::Arc<RateLimiter>,
    shutdown: watch::Receiver<bool>,
}

impl PublicWsClient {
    pub fn new(
        symbols: Vec<Symbol>,
        bus: MarketBus,
        limiter: std::sync::Arc<RateLimiter>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Self {
            url: PUBLIC_WS_URL.to_string(),
            symbols,
            bus,
            limiter,
            shutdown,
        }
    }

    /// Run until shutdown. Each connection failure backs off exponentially;
    /// a connection that actually delivered data resets the backoff.
    pub async fn run(mut self) {
        let mut backoff = RECONNECT_MIN;

        loop {
            if *self.shutdown.borrow() {
                return;
            }

            match self.run_connection().await {
                Ok(received_any) => {
                    if *self.shutdown.borrow() {
                        info!("public stream closed for shutdown");
                        return;
                    }
                    if received_any {
                        backoff = RECONNECT_MIN;
                    }
                    warn!("public stream ended — reconnecting");
                }
                Err(e) => {
                    warn!(error = %e, "public stream error — reconnecting");
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.changed() => return,
            }
            backoff = (backoff * 2).min(RECONNECT_MAX);
        }
    }

    /// One connection lifetime: subscribe everything, then pump frames until
    /// the socket dies, the heartbeat lapses, or shutdown arrives.
    async fn run_connection(&mut self) -> GatewayResult<bool> {
        info!(url = %self.url, symbols = self.symbols.len(), "connecting public stream");
        let (ws, _response) = connect_async(&self.url)
            .await
            .map_err(|e| crate::error::GatewayError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        // Full (re-)subscription, one limiter token per frame.
        for &symbol in &self.symbols {
            self.limiter.acquire(LimitClass::WsSubscribe).await;
            let frame = WsCommand::subscribe("ticker", Some(symbol));
            let text = serde_json::to_string(&frame)
                .map_err(|e| crate::error::GatewayError::Internal(e.to_string()))?;
            write
                .send(Message::Text(text))
                .await
                .map_err(|e| crate::error::GatewayError::Transport(e.to_string()))?;
            debug!(%symbol, "subscribed ticker");
        }
        info!("public stream subscribed");

        let mut received_any = false;
        let mut last_rx = Instant::now();
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await; // consume the immediate first tick

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    // Graceful teardown: unsubscribe (limiter-gated) before
                    // closing so the server forgets this client.
                    for &symbol in &self.symbols {
                        self.limiter.acquire(LimitClass::WsSubscribe).await;
                        let frame = WsCommand::unsubscribe("ticker", Some(symbol));
                        if let Ok(text) = serde_json::to_string(&frame) {
                            let _ = write.send(Message::Text(text)).await;
                        }
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(received_any);
                }

                _ = heartbeat.tick() => {
                    let silent = Instant::now().duration_since(last_rx);
                    if silent >= HEARTBEAT_INTERVAL * MAX_SILENT_INTERVALS {
                        warn!(silent_s = silent.as_secs(), "heartbeat lapsed — declaring public stream dead");
                        return Ok(received_any);
                    }
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            last_rx = Instant::now();
                            received_any = true;
                            match parse_ticker_frame(&text) {
                                Some(quote) => self.bus.publish_quote(quote),
                                None => debug!(raw = %text, "non-ticker frame ignored"),
                            }
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            last_rx = Instant::now();
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_))) | Some(Ok(Message::Frame(_))) => {
                            last_rx = Instant::now();
                        }
                        Some(Ok(Message::Binary(_))) => {
                            last_rx = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("public stream closed by server");
                            return Ok(received_any);
                        }
                        Some(Err(e)) => {
                            return Err(crate::error::GatewayError::Transport(e.to_string()));
                        }
                        None => {
                            warn!("public stream ended");
                            return Ok(received_any);
                        }
                    }
                }
            }
        }
    }
}

/// Parse a data frame into a quote. Subscription acks and error frames do
/// not match the ticker shape and yield `None`.
fn parse_ticker_frame(text: &str) -> Option<Quote> {
    let ticker: WsTicker = serde_json::from_str(text).ok()?;
    Some(Quote {
        symbol: ticker.symbol,
        bid: ticker.bid,
        ask: ticker.ask,
        timestamp: ticker.timestamp,
        status: ticker.status,
    })
}

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::MarketStatus;
    use rust_decimal_macros::dec;

    #[test]
    fn ticker_frame_becomes_quote() {
        let text = r#"{
            "symbol": "GBP_JPY",
            "ask": "188.255",
            "bid": "188.245",
            "timestamp": "2024-01-02T03:04:05.006Z",
            "status": "OPEN"
        }"#;
        let quote = parse_ticker_frame(text).unwrap();
        assert_eq!(quote.symbol, Symbol::GBP_JPY);
        assert_eq!(quote.bid, dec!(188.245));
        assert_eq!(quote.ask, dec!(188.255));
        assert_eq!(quote.status, MarketStatus::Open);
    }

    #[test]
    fn subscription_ack_is_ignored() {
        assert!(parse_ticker_frame(r#"{"error": "..."}"#).is_none());
        assert!(parse_ticker_frame("not json").is_none());
    }

    #[test]
    fn reconnect_backoff_doubles_to_cap() {
        let mut backoff = RECONNECT_MIN;
        let mut seen = Vec::new();
        for _ in 0..8 {
            seen.push(backoff);
            backoff = (backoff * 2).min(RECONNECT_MAX);
        }
        assert_eq!(seen[0], Duration::from_secs(1));
        assert_eq!(seen[1], Duration::from_secs(2));
        assert_eq!(seen[5], Duration::from_secs(32));
        assert_eq!(seen[6], Duration::from_secs(60));
        assert_eq!(seen[7], Duration::from_secs(60));
    }
}
