// =============================================================================
// Private WebSocket stream — executions, orders, positions
// =============================================================================
//
// Access requires a token minted via `POST /private/v1/ws-auth`. Tokens live
// for 60 minutes; a renewal timer extends ours at the 50-minute mark. When a
// connection or renewal fails the token is assumed expired: it is released
// (best effort), a fresh one is minted, and the stream reconnects. The
// broker allows at most five live tokens per account, so the client always
// deletes its own token on graceful shutdown.
//
// Inbound frames are dispatched by channel name onto the lossless bus
// channels — a dropped fill would corrupt accounting downstream.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::watch;
use tokio::time::Instant;
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, info, warn};

use crate::error::{GatewayError, GatewayResult};
use crate::gmo::bus::MarketBus;
use crate::gmo::client::GmoClient;
use crate::gmo::rate_limit::LimitClass;
use crate::gmo::wire::{
    WsCommand, WsExecutionEvent, WsOrderEvent, WsPositionEvent, WsPositionSummaryEvent,
};

const PRIVATE_WS_BASE: &str = "wss://forex-api.coin.z.com/ws/private";

/// Channels this client subscribes to on every connection.
const CHANNELS: [&str; 4] = [
    "executionEvents",
    "orderEvents",
    "positionEvents",
    "positionSummaryEvents",
];

/// Tokens live 60 minutes; renew with room to spare.
const TOKEN_RENEW_AFTER: Duration = Duration::from_secs(50 * 60);

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(60);
const MAX_SILENT_INTERVALS: u32 = 3;

const RECONNECT_MIN: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(60);

pub struct PrivateWsClient {
    client: Arc<GmoClient>,
    bus: MarketBus,
    shutdown: watch::Receiver<bool>,
    ws_base: String,
    token: Option<String>,
}

impl PrivateWsClient {
    pub fn new(client: Arc<GmoClient>, bus: MarketBus, shutdown: watch::Receiver<bool>) -> Self {
        Self {
            client,
            bus,
            shutdown,
            ws_base: PRIVATE_WS_BASE.to_string(),
            token: None,
        }
    }

    /// Run until shutdown, reconnecting with exponential backoff. The token
    /// is deleted on the way out so it does not count against the account's
    /// five-token ceiling.
    pub async fn run(mut self) {
        let mut backoff = RECONNECT_MIN;

        loop {
            if *self.shutdown.borrow() {
                break;
            }

            match self.run_connection().await {
                Ok(()) => {
                    if *self.shutdown.borrow() {
                        break;
                    }
                    backoff = RECONNECT_MIN;
                    warn!("private stream ended — reconnecting");
                }
                Err(e) => {
                    warn!(error = %e, "private stream error — reconnecting with fresh token");
                    self.discard_token().await;
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = self.shutdown.changed() => break,
            }
            backoff = (backoff * 2).min(RECONNECT_MAX);
        }

        self.discard_token().await;
        info!("private stream closed for shutdown");
    }

    /// Mint a token if we do not hold a live one.
    async fn ensure_token(&mut self) -> GatewayResult<String> {
        if let Some(token) = &self.token {
            return Ok(token.clone());
        }
        let token = self.client.create_ws_token().await?;
        info!("private stream token minted");
        self.token = Some(token.clone());
        Ok(token)
    }

    /// Release the held token, tolerating failure: an expired token cannot
    /// be deleted and that is fine.
    async fn discard_token(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(e) = self.client.delete_ws_token(&token).await {
                debug!(error = %e, "ws token delete failed (already expired?)");
            }
        }
    }

    async fn run_connection(&mut self) -> GatewayResult<()> {
        let token = self.ensure_token().await?;
        let url = format!("{}/{}", self.ws_base, token);
        info!("connecting private stream");

        let (ws, _response) = connect_async(&url)
            .await
            .map_err(|e| GatewayError::Transport(e.to_string()))?;
        let (mut write, mut read) = ws.split();

        // Subscribe all four channels; position summaries also in periodic
        // mode so a frame arrives every five seconds.
        for channel in CHANNELS {
            self.client
                .limiter()
                .acquire(LimitClass::WsSubscribe)
                .await;
            let mut frame = WsCommand::subscribe(channel, None);
            if channel == "positionSummaryEvents" {
                frame.option = Some("PERIODIC".into());
            }
            let text = serde_json::to_string(&frame)
                .map_err(|e| GatewayError::Internal(e.to_string()))?;
            write
                .send(Message::Text(text))
                .await
                .map_err(|e| GatewayError::Transport(e.to_string()))?;
            debug!(channel, "subscribed");
        }
        info!("private stream subscribed");

        let mut last_rx = Instant::now();
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let renew_at = tokio::time::sleep(TOKEN_RENEW_AFTER);
        tokio::pin!(renew_at);

        loop {
            tokio::select! {
                _ = self.shutdown.changed() => {
                    for channel in CHANNELS {
                        self.client.limiter().acquire(LimitClass::WsSubscribe).await;
                        let frame = WsCommand::unsubscribe(channel, None);
                        if let Ok(text) = serde_json::to_string(&frame) {
                            let _ = write.send(Message::Text(text)).await;
                        }
                    }
                    let _ = write.send(Message::Close(None)).await;
                    return Ok(());
                }

                _ = &mut renew_at => {
                    match self.client.extend_ws_token(&token).await {
                        Ok(()) => {
                            info!("private stream token extended");
                            renew_at.as_mut().reset(Instant::now() + TOKEN_RENEW_AFTER);
                        }
                        Err(e) => {
                            // A token the broker refuses to extend will die
                            // in ten minutes; reconnect with a fresh one now.
                            return Err(e);
                        }
                    }
                }

                _ = heartbeat.tick() => {
                    let silent = Instant::now().duration_since(last_rx);
                    if silent >= HEARTBEAT_INTERVAL * MAX_SILENT_INTERVALS {
                        warn!(silent_s = silent.as_secs(), "heartbeat lapsed — declaring private stream dead");
                        return Ok(());
                    }
                }

                frame = read.next() => {
                    match frame {
                        Some(Ok(Message::Text(text))) => {
                            last_rx = Instant::now();
                            self.dispatch(&text).await;
                        }
                        Some(Ok(Message::Ping(payload))) => {
                            last_rx = Instant::now();
                            let _ = write.send(Message::Pong(payload)).await;
                        }
                        Some(Ok(Message::Pong(_)))
                        | Some(Ok(Message::Frame(_)))
                        | Some(Ok(Message::Binary(_))) => {
                            last_rx = Instant::now();
                        }
                        Some(Ok(Message::Close(_))) => {
                            warn!("private stream closed by server");
                            return Ok(());
                        }
                        Some(Err(e)) => {
                            return Err(GatewayError::Transport(e.to_string()));
                        }
                        None => {
                            warn!("private stream ended");
                            return Ok(());
                        }
                    }
                }
            }
        }
    }

    /// Route one data frame to its typed channel. Ordering within a channel
    /// follows broker emission order because each frame is awaited in turn.
    async fn dispatch(&self, text: &str) {
        let value: serde_json::Value = match serde_json::from_str(text) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "unparseable private frame");
                return;
            }
        };

        let channel = value.get("channel").and_then(|c| c.as_str()).unwrap_or("");
        let result = match channel {
            "executionEvents" => serde_json::from_value::<WsExecutionEvent>(value.clone())
                .map_err(|e| e.to_string())
                .map(DispatchTarget::Execution),
            "orderEvents" => serde_json::from_value::<WsOrderEvent>(value.clone())
                .map_err(|e| e.to_string())
                .map(DispatchTarget::Order),
            "positionEvents" => serde_json::from_value::<WsPositionEvent>(value.clone())
                .map_err(|e| e.to_string())
                .map(DispatchTarget::Position),
            "positionSummaryEvents" => {
                serde_json::from_value::<WsPositionSummaryEvent>(value.clone())
                    .map_err(|e| e.to_string())
                    .map(DispatchTarget::PositionSummary)
            }
            _ => {
                debug!(raw = %text, "non-channel private frame ignored");
                return;
            }
        };

        match result {
            Ok(DispatchTarget::Execution(ev)) => {
                if let Err(e) = self.bus.executions.send(ev).await {
                    warn!(error = %e, "execution event delivery failed");
                }
            }
            Ok(DispatchTarget::Order(ev)) => {
                if let Err(e) = self.bus.orders.send(ev).await {
                    warn!(error = %e, "order event delivery failed");
                }
            }
            Ok(DispatchTarget::Position(ev)) => {
                if let Err(e) = self.bus.positions.send(ev).await {
                    warn!(error = %e, "position event delivery failed");
                }
            }
            Ok(DispatchTarget::PositionSummary(ev)) => {
                if let Err(e) = self.bus.position_summaries.send(ev).await {
                    warn!(error = %e, "position summary delivery failed");
                }
            }
            Err(e) => {
                warn!(channel, error = %e, "private frame failed to decode");
            }
        }
    }
}

enum DispatchTarget {
    Execution(WsExecutionEvent),
    Order(WsOrderEvent),
    Position(WsPositionEvent),
    PositionSummary(WsPositionSummaryEvent),
}
