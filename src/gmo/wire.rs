// =============================================================================
// Broker wire types — envelope, REST payloads, WebSocket frames
// =============================================================================
//
// Everything the broker sends or receives is decoded exactly once, here, into
// typed values. The envelope is a tagged sum: `status == 0` carries `data`,
// anything else carries `messages` with broker error codes. The rest of the
// engine never touches raw JSON.
//
// The broker transmits numbers as JSON strings ("149.523"); price fields are
// bridged to `Decimal` (order path) or `f64` (candle path) by the serde
// helpers at the bottom.
// =============================================================================

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::error::{GatewayError, GatewayResult};
use crate::types::{MarketStatus, Side, Symbol};

// =============================================================================
// Response envelope
// =============================================================================

/// One broker diagnostic message on a non-zero status.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrokerMessage {
    pub message_code: String,
    pub message_string: String,
}

/// The uniform REST response wrapper.
#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub status: i64,
    #[serde(default = "Option::default")]
    pub data: Option<T>,
    #[serde(default)]
    pub messages: Option<Vec<BrokerMessage>>,
    #[serde(default)]
    pub responsetime: Option<DateTime<Utc>>,
}

impl<T> Envelope<T> {
    /// Collapse the envelope into the error taxonomy. A zero status without
    /// data is a broker contract violation and therefore `Internal`.
    pub fn into_result(self) -> GatewayResult<T> {
        if self.status == 0 {
            return self
                .data
                .ok_or_else(|| GatewayError::Internal("envelope status 0 without data".into()));
        }
        Err(self.into_error())
    }

    /// For endpoints whose success response carries no payload (ws-auth
    /// extend/delete): only the status matters.
    pub fn into_ack(self) -> GatewayResult<()> {
        if self.status == 0 {
            return Ok(());
        }
        Err(self.into_error())
    }

    fn into_error(self) -> GatewayError {
        match self.messages.as_deref().and_then(|m| m.first()) {
            Some(msg) => GatewayError::from_broker_code(&msg.message_code, &msg.message_string),
            None => GatewayError::Internal(format!(
                "envelope status {} without messages",
                self.status
            )),
        }
    }
}

/// Several list endpoints wrap their payload in `{"list": [...]}`.
#[derive(Debug, Clone, Deserialize)]
pub struct ListData<T> {
    #[serde(default = "Vec::new")]
    pub list: Vec<T>,
}

// =============================================================================
// Public REST payloads
// =============================================================================

/// `GET /public/v1/status`
#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: MarketStatus,
}

/// One entry of `GET /public/v1/ticker`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TickerEntry {
    pub symbol: Symbol,
    #[serde(with = "rust_decimal::serde::str")]
    pub ask: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub bid: Decimal,
    pub timestamp: DateTime<Utc>,
    pub status: MarketStatus,
}

/// One entry of `GET /public/v1/klines`. OHLC goes straight to `f64`
/// because its only consumer is the indicator kernel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KlineEntry {
    #[serde(rename = "openTime", with = "string_i64")]
    pub open_time: i64,
    #[serde(with = "string_f64")]
    pub open: f64,
    #[serde(with = "string_f64")]
    pub high: f64,
    #[serde(with = "string_f64")]
    pub low: f64,
    #[serde(with = "string_f64")]
    pub close: f64,
}

/// One entry of `GET /public/v1/symbols`.
#[derive(Debug, Clone, Deserialize)]
pub struct SymbolRule {
    pub symbol: Symbol,
    #[serde(rename = "minOpenOrderSize", with = "rust_decimal::serde::str")]
    pub min_open_order_size: Decimal,
    #[serde(rename = "maxOrderSize", with = "rust_decimal::serde::str")]
    pub max_order_size: Decimal,
    #[serde(rename = "sizeStep", with = "rust_decimal::serde::str")]
    pub size_step: Decimal,
    #[serde(rename = "tickSize", with = "rust_decimal::serde::str")]
    pub tick_size: Decimal,
}

// =============================================================================
// Private REST payloads — reads
// =============================================================================

/// `GET /private/v1/account/assets`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountAssets {
    #[serde(with = "rust_decimal::serde::str")]
    pub equity: Decimal,
    #[serde(rename = "availableAmount", with = "rust_decimal::serde::str")]
    pub available_amount: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub balance: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub margin: Decimal,
    #[serde(rename = "marginRatio", with = "rust_decimal::serde::str")]
    pub margin_ratio: Decimal,
    #[serde(rename = "positionLossGain", with = "rust_decimal::serde::str")]
    pub position_loss_gain: Decimal,
    #[serde(rename = "totalSwap", with = "rust_decimal::serde::str")]
    pub total_swap: Decimal,
    #[serde(rename = "transferableAmount", with = "rust_decimal::serde::str")]
    pub transferable_amount: Decimal,
}

/// One open position from `GET /private/v1/openPositions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpenPosition {
    #[serde(rename = "positionId")]
    pub position_id: i64,
    pub symbol: Symbol,
    pub side: Side,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(rename = "orderedSize", with = "rust_decimal::serde::str")]
    pub ordered_size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "lossGain", with = "rust_decimal::serde::str")]
    pub loss_gain: Decimal,
    #[serde(rename = "totalSwap", with = "rust_decimal::serde::str")]
    pub total_swap: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// One row of `GET /private/v1/positionSummary`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionSummary {
    pub symbol: Symbol,
    pub side: Side,
    #[serde(rename = "averagePositionRate", with = "rust_decimal::serde::str")]
    pub average_position_rate: Decimal,
    #[serde(rename = "positionLossGain", with = "rust_decimal::serde::str")]
    pub position_loss_gain: Decimal,
    #[serde(rename = "sumOrderedSize", with = "rust_decimal::serde::str")]
    pub sum_ordered_size: Decimal,
    #[serde(rename = "sumPositionSize", with = "rust_decimal::serde::str")]
    pub sum_position_size: Decimal,
    #[serde(rename = "sumTotalSwap", with = "rust_decimal::serde::str")]
    pub sum_total_swap: Decimal,
}

/// One order from `GET /private/v1/activeOrders` (and order-change acks).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderInfo {
    #[serde(rename = "rootOrderId")]
    pub root_order_id: i64,
    #[serde(rename = "orderId")]
    pub order_id: i64,
    #[serde(rename = "clientOrderId", default)]
    pub client_order_id: Option<String>,
    pub symbol: Symbol,
    pub side: Side,
    #[serde(rename = "orderType")]
    pub order_type: String,
    #[serde(rename = "executionType")]
    pub execution_type: String,
    #[serde(rename = "settleType")]
    pub settle_type: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(default, with = "rust_decimal::serde::str_option")]
    pub price: Option<Decimal>,
    pub status: String,
    pub timestamp: DateTime<Utc>,
}

/// One fill from `GET /private/v1/executions` / `latestExecutions`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionInfo {
    #[serde(rename = "executionId")]
    pub execution_id: i64,
    #[serde(rename = "orderId")]
    pub order_id: i64,
    #[serde(rename = "clientOrderId", default)]
    pub client_order_id: Option<String>,
    #[serde(rename = "positionId")]
    pub position_id: i64,
    pub symbol: Symbol,
    pub side: Side,
    #[serde(rename = "settleType")]
    pub settle_type: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    #[serde(rename = "lossGain", with = "rust_decimal::serde::str")]
    pub loss_gain: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub fee: Decimal,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// Private REST payloads — writes
// =============================================================================

/// `POST /private/v1/speedOrder` — market order at the current rate.
#[derive(Debug, Clone, Serialize)]
pub struct SpeedOrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
    #[serde(rename = "upperBound", skip_serializing_if = "Option::is_none")]
    pub upper_bound: Option<Decimal>,
    #[serde(rename = "lowerBound", skip_serializing_if = "Option::is_none")]
    pub lower_bound: Option<Decimal>,
}

/// `POST /private/v1/order` — plain limit/stop order.
#[derive(Debug, Clone, Serialize)]
pub struct OrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(rename = "executionType")]
    pub execution_type: String,
    #[serde(rename = "limitPrice", skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(rename = "stopPrice", skip_serializing_if = "Option::is_none")]
    pub stop_price: Option<Decimal>,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
}

/// `POST /private/v1/ifdOrder` — entry plus one settlement leg.
#[derive(Debug, Clone, Serialize)]
pub struct IfdOrderRequest {
    pub symbol: Symbol,
    #[serde(rename = "firstSide")]
    pub first_side: Side,
    #[serde(rename = "firstExecutionType")]
    pub first_execution_type: String,
    #[serde(rename = "firstSize", with = "rust_decimal::serde::str")]
    pub first_size: Decimal,
    #[serde(rename = "firstPrice", with = "rust_decimal::serde::str")]
    pub first_price: Decimal,
    #[serde(rename = "secondExecutionType")]
    pub second_execution_type: String,
    #[serde(rename = "secondSize", with = "rust_decimal::serde::str")]
    pub second_size: Decimal,
    #[serde(rename = "secondPrice", with = "rust_decimal::serde::str")]
    pub second_price: Decimal,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
}

/// `POST /private/v1/ifoOrder` — entry plus an OCO settlement pair
/// (limit take-profit against stop loss-cut).
#[derive(Debug, Clone, Serialize)]
pub struct IfoOrderRequest {
    pub symbol: Symbol,
    #[serde(rename = "firstSide")]
    pub first_side: Side,
    #[serde(rename = "firstExecutionType")]
    pub first_execution_type: String,
    #[serde(rename = "firstSize", with = "rust_decimal::serde::str")]
    pub first_size: Decimal,
    #[serde(rename = "firstPrice", with = "rust_decimal::serde::str")]
    pub first_price: Decimal,
    #[serde(rename = "secondSize", with = "rust_decimal::serde::str")]
    pub second_size: Decimal,
    #[serde(rename = "secondLimitPrice", with = "rust_decimal::serde::str")]
    pub second_limit_price: Decimal,
    #[serde(rename = "secondStopPrice", with = "rust_decimal::serde::str")]
    pub second_stop_price: Decimal,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
}

/// `POST /private/v1/changeOrder`
#[derive(Debug, Clone, Serialize)]
pub struct ChangeOrderRequest {
    #[serde(rename = "orderId")]
    pub order_id: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
}

/// `POST /private/v1/cancelOrders`
#[derive(Debug, Clone, Serialize)]
pub struct CancelOrdersRequest {
    #[serde(rename = "rootOrderIds")]
    pub root_order_ids: Vec<i64>,
}

/// `POST /private/v1/cancelBulkOrder`
#[derive(Debug, Clone, Serialize)]
pub struct CancelBulkOrderRequest {
    pub symbols: Vec<Symbol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub side: Option<Side>,
    #[serde(rename = "settleType", skip_serializing_if = "Option::is_none")]
    pub settle_type: Option<String>,
}

/// One position reference inside a close order.
#[derive(Debug, Clone, Serialize)]
pub struct SettlePosition {
    #[serde(rename = "positionId")]
    pub position_id: i64,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
}

/// `POST /private/v1/closeOrder`
#[derive(Debug, Clone, Serialize)]
pub struct CloseOrderRequest {
    pub symbol: Symbol,
    pub side: Side,
    #[serde(rename = "executionType")]
    pub execution_type: String,
    #[serde(rename = "limitPrice", skip_serializing_if = "Option::is_none")]
    pub limit_price: Option<Decimal>,
    #[serde(rename = "settlePosition", skip_serializing_if = "Option::is_none")]
    pub settle_position: Option<Vec<SettlePosition>>,
    #[serde(skip_serializing_if = "Option::is_none", with = "rust_decimal::serde::str_option", default)]
    pub size: Option<Decimal>,
    #[serde(rename = "clientOrderId")]
    pub client_order_id: String,
}

/// One order the bulk-cancel call could not touch.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelFailed {
    #[serde(rename = "rootOrderId")]
    pub root_order_id: i64,
    pub message_code: String,
    pub message_string: String,
}

/// Response payload of `POST /private/v1/cancelOrders`.
#[derive(Debug, Clone, Deserialize)]
pub struct CancelOrdersResult {
    #[serde(default)]
    pub success: Vec<i64>,
    #[serde(default)]
    pub failed: Vec<CancelFailed>,
}

// =============================================================================
// WebSocket frames
// =============================================================================

/// Outbound control frame for both streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WsCommand {
    pub command: String,
    pub channel: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub symbol: Option<Symbol>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub option: Option<String>,
}

impl WsCommand {
    pub fn subscribe(channel: &str, symbol: Option<Symbol>) -> Self {
        Self {
            command: "subscribe".into(),
            channel: channel.into(),
            symbol,
            option: None,
        }
    }

    pub fn unsubscribe(channel: &str, symbol: Option<Symbol>) -> Self {
        Self {
            command: "unsubscribe".into(),
            channel: channel.into(),
            symbol,
            option: None,
        }
    }
}

/// Inbound ticker frame on the public stream. Same shape as the REST ticker.
pub type WsTicker = TickerEntry;

/// Inbound fill event on the private stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsExecutionEvent {
    #[serde(rename = "executionId")]
    pub execution_id: i64,
    #[serde(rename = "orderId")]
    pub order_id: i64,
    pub symbol: Symbol,
    pub side: Side,
    #[serde(rename = "settleType")]
    pub settle_type: String,
    #[serde(rename = "executionPrice", with = "rust_decimal::serde::str")]
    pub execution_price: Decimal,
    #[serde(rename = "executionSize", with = "rust_decimal::serde::str")]
    pub execution_size: Decimal,
    #[serde(rename = "lossGain", with = "rust_decimal::serde::str")]
    pub loss_gain: Decimal,
    #[serde(rename = "executionTimestamp")]
    pub execution_timestamp: DateTime<Utc>,
}

/// Inbound order lifecycle event on the private stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsOrderEvent {
    #[serde(rename = "orderId")]
    pub order_id: i64,
    #[serde(rename = "rootOrderId")]
    pub root_order_id: i64,
    pub symbol: Symbol,
    pub side: Side,
    #[serde(rename = "executionType")]
    pub execution_type: String,
    #[serde(rename = "orderStatus")]
    pub order_status: String,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(rename = "orderTimestamp")]
    pub order_timestamp: DateTime<Utc>,
}

/// Inbound position open/update/close event on the private stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsPositionEvent {
    #[serde(rename = "positionId")]
    pub position_id: i64,
    pub symbol: Symbol,
    pub side: Side,
    #[serde(with = "rust_decimal::serde::str")]
    pub size: Decimal,
    #[serde(with = "rust_decimal::serde::str")]
    pub price: Decimal,
    pub timestamp: DateTime<Utc>,
}

/// Inbound aggregated position frame (also produced every 5 s with the
/// PERIODIC option).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsPositionSummaryEvent {
    pub symbol: Symbol,
    pub side: Side,
    #[serde(rename = "averagePositionRate", with = "rust_decimal::serde::str")]
    pub average_position_rate: Decimal,
    #[serde(rename = "positionLossGain", with = "rust_decimal::serde::str")]
    pub position_loss_gain: Decimal,
    #[serde(rename = "sumPositionSize", with = "rust_decimal::serde::str")]
    pub sum_position_size: Decimal,
    pub timestamp: DateTime<Utc>,
}

// =============================================================================
// serde helpers — broker numerics arrive as strings
// =============================================================================

pub(crate) mod string_f64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<f64, D::Error> {
        let s = String::deserialize(d)?;
        s.parse::<f64>().map_err(serde::de::Error::custom)
    }

    pub fn serialize<S: Serializer>(v: &f64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
    }
}

pub(crate) mod string_i64 {
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<i64, D::Error> {
        let s = String::deserialize(d)?;
        s.parse::<i64>().map_err(serde::de::Error::custom)
    }

    pub fn serialize<S: Serializer>(v: &i64, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&v.to_string())
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
    fn success_envelope_yields_data() {
        let json = r#"{
            "status": 0,
            "data": { "status": "OPEN" },
            "responsetime": "2024-01-02T03:04:05.006Z"
        }"#;
        let env: Envelope<StatusData> = serde_json::from_str(json).unwrap();
        assert!(env.responsetime.is_some());
        let data = env.into_result().unwrap();
        assert_eq!(data.status, MarketStatus::Open);
    }

    #[test]
    fn error_envelope_maps_broker_code() {
        let json = r#"{
            "status": 1,
            "messages": [
                { "message_code": "ERR-5003", "message_string": "Requests are too many." }
            ],
            "responsetime": "2024-01-02T03:04:05.006Z"
        }"#;
        let env: Envelope<StatusData> = serde_json::from_str(json).unwrap();
        let err = env.into_result().unwrap_err();
        assert!(matches!(err, GatewayError::RateLimited { .. }));
    }

    #[test]
    fn ticker_roundtrip_is_identity() {
        let json = r#"{
            "symbol": "USD_JPY",
            "ask": "150.105",
            "bid": "150.101",
            "timestamp": "2024-01-02T03:04:05.100Z",
            "status": "OPEN"
        }"#;
        let entry: TickerEntry = serde_json::from_str(json).unwrap();
        assert_eq!(entry.symbol, Symbol::USD_JPY);
        assert_eq!(entry.ask, dec!(150.105));

        let back = serde_json::to_string(&entry).unwrap();
        let again: TickerEntry = serde_json::from_str(&back).unwrap();
        assert_eq!(again.ask, entry.ask);
        assert_eq!(again.bid, entry.bid);
        assert_eq!(again.timestamp, entry.timestamp);
    }

    #[test]
    fn kline_parses_string_numerics() {
        let json = r#"{
            "openTime": "1704166200000",
            "open": "150.100",
            "high": "150.250",
            "low": "150.050",
            "close": "150.200"
        }"#;
        let k: KlineEntry = serde_json::from_str(json).unwrap();
        assert_eq!(k.open_time, 1_704_166_200_000);
        assert!((k.high - 150.25).abs() < 1e-12);
    }

    #[test]
    fn open_positions_list_payload() {
        let json = r#"{
            "status": 0,
            "data": {
                "list": [{
                    "positionId": 123456,
                    "symbol": "EUR_JPY",
                    "side": "BUY",
                    "size": "10000",
                    "orderedSize": "0",
                    "price": "161.225",
                    "lossGain": "320",
                    "totalSwap": "5",
                    "timestamp": "2024-01-02T03:04:05.006Z"
                }]
            },
            "responsetime": "2024-01-02T03:04:06.006Z"
        }"#;
        let env: Envelope<ListData<OpenPosition>> = serde_json::from_str(json).unwrap();
        let positions = env.into_result().unwrap().list;
        assert_eq!(positions.len(), 1);
        assert_eq!(positions[0].side, Side::Buy);
        assert_eq!(positions[0].price, dec!(161.225));
    }

    #[test]
    fn empty_list_payload_defaults() {
        let json = r#"{ "status": 0, "data": {}, "responsetime": "2024-01-02T03:04:06.006Z" }"#;
        let env: Envelope<ListData<OpenPosition>> = serde_json::from_str(json).unwrap();
        assert!(env.into_result().unwrap().list.is_empty());
    }

    #[test]
    fn ifo_order_serialises_exact_field_names() {
        let req = IfoOrderRequest {
            symbol: Symbol::USD_JPY,
            first_side: Side::Buy,
            first_execution_type: "LIMIT".into(),
            first_size: dec!(10000),
            first_price: dec!(150.120),
            second_size: dec!(10000),
            second_limit_price: dec!(150.170),
            second_stop_price: dec!(150.045),
            client_order_id: "abc-123".into(),
        };
        let v: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert_eq!(v["symbol"], "USD_JPY");
        assert_eq!(v["firstSide"], "BUY");
        assert_eq!(v["firstPrice"], "150.120");
        assert_eq!(v["secondLimitPrice"], "150.170");
        assert_eq!(v["secondStopPrice"], "150.045");
        assert_eq!(v["clientOrderId"], "abc-123");
    }

    #[test]
    fn order_request_omits_absent_prices() {
        let req = OrderRequest {
            symbol: Symbol::GBP_USD,
            side: Side::Sell,
            size: dec!(5000),
            execution_type: "MARKET".into(),
            limit_price: None,
            stop_price: None,
            client_order_id: "xyz".into(),
        };
        let v: serde_json::Value = serde_json::to_value(&req).unwrap();
        assert!(v.get("limitPrice").is_none());
        assert!(v.get("stopPrice").is_none());
    }

    #[test]
    fn subscribe_command_wire_shape() {
        let cmd = WsCommand::subscribe("ticker", Some(Symbol::AUD_JPY));
        let v: serde_json::Value = serde_json::to_value(&cmd).unwrap();
        assert_eq!(v["command"], "subscribe");
        assert_eq!(v["channel"], "ticker");
        assert_eq!(v["symbol"], "AUD_JPY");
        assert!(v.get("option").is_none());
    }

    #[test]
    fn unsubscribe_mirrors_subscribe() {
        let sub = WsCommand::subscribe("ticker", Some(Symbol::AUD_JPY));
        let unsub = WsCommand::unsubscribe("ticker", Some(Symbol::AUD_JPY));
        assert_eq!(unsub.channel, sub.channel);
        assert_eq!(unsub.symbol, sub.symbol);
        assert_eq!(unsub.command, "unsubscribe");
        let v: serde_json::Value = serde_json::to_value(&unsub).unwrap();
        assert_eq!(v["command"], "unsubscribe");
    }

    #[test]
    fn kline_reserialises_as_strings() {
        let k = KlineEntry {
            open_time: 1_704_166_200_000,
            open: 150.1,
            high: 150.25,
            low: 150.05,
            close: 150.2,
        };
        let v: serde_json::Value = serde_json::to_value(&k).unwrap();
        assert_eq!(v["openTime"], "1704166200000");
        assert_eq!(v["high"], "150.25");
    }

    #[test]
    fn ws_ticker_parses() {
        let json = r#"{
            "symbol": "EUR_USD",
            "ask": "1.08755",
            "bid": "1.08751",
            "timestamp": "2024-01-02T03:04:05.321Z",
            "status": "OPEN"
        }"#;
        let t: WsTicker = serde_json::from_str(json).unwrap();
        assert_eq!(t.symbol, Symbol::EUR_USD);
        assert_eq!(t.bid, dec!(1.08751));
    }

    #[test]
    fn ws_execution_event_roundtrip() {
        let json = r#"{
            "executionId": 92123,
            "orderId": 123456789,
            "symbol": "USD_JPY",
            "side": "BUY",
            "settleType": "OPEN",
            "executionPrice": "150.120",
            "executionSize": "10000",
            "lossGain": "0",
            "executionTimestamp": "2024-01-02T03:04:05.006Z"
        }"#;
        let ev: WsExecutionEvent = serde_json::from_str(json).unwrap();
        let back = serde_json::to_string(&ev).unwrap();
        let again: WsExecutionEvent = serde_json::from_str(&back).unwrap();
        assert_eq!(again.execution_id, ev.execution_id);
        assert_eq!(again.execution_price, ev.execution_price);
    }
}
