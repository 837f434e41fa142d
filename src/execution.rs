// =============================================================================
// Execution — turns strategy signals into broker composite orders
// =============================================================================
//
// A BUY/SELL signal maps onto one IFD-OCO order: a limit entry at the signal
// price whose fill arms an OCO pair of take-profit (limit) and stop-loss
// (stop). That composite is the executable form of the published management
// contract.
//
// Order submission is reachable ONLY when trading is enabled in the config
// AND credentials exist. Every other build simulates: the order payload is
// logged and recorded, nothing reaches the wire. Prices are converted to
// exact decimals before they touch the request.
// =============================================================================

use std::sync::Arc;

use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_state::AppState;
use crate::error::GatewayError;
use crate::gmo::client::GmoClient;
use crate::gmo::wire::IfoOrderRequest;
use crate::strategy::{TfqeSignal, TfqeTag};
use crate::types::{MarketStatus, Side, Symbol};

/// Units per order. FX margin accounts at this broker trade in lots of
/// 10 000 currency units.
pub const ORDER_SIZE_UNITS: i64 = 10_000;

/// Outcome of handing one signal to the execution layer.
#[derive(Debug, Clone)]
pub enum ExecutionOutcome {
    /// Submitted to the broker; carries the accepted root order ids.
    Submitted(Vec<i64>),
    /// Trading disabled: the composite was built and logged only.
    Simulated(String),
    /// Signal carried no actionable side, or the market refused writes.
    Skipped(String),
    /// Broker rejected the order; the original code is preserved.
    Failed(String),
}

pub struct ExecutionEngine {
    client: Arc<GmoClient>,
    state: Arc<AppState>,
}

impl ExecutionEngine {
    pub fn new(client: Arc<GmoClient>, state: Arc<AppState>) -> Self {
        Self { client, state }
    }

    /// Convert one signal into an IFD-OCO submission (or a simulation).
    pub async fn execute_signal(&self, signal: &TfqeSignal) -> ExecutionOutcome {
        let side = match signal.signal {
            TfqeTag::Buy => Side::Buy,
            TfqeTag::Sell => Side::Sell,
            _ => {
                return ExecutionOutcome::Skipped(format!(
                    "signal {:?} is not actionable",
                    signal.signal
                ))
            }
        };

        let request = match build_ifo_request(signal, side) {
            Some(req) => req,
            None => {
                return ExecutionOutcome::Skipped(
                    "signal missing order levels".to_string(),
                )
            }
        };

        let market_status = *self.state.market_status.read();
        if market_status != MarketStatus::Open {
            return ExecutionOutcome::Skipped(format!(
                "market is {market_status}; write refused"
            ));
        }

        let trading_enabled =
            self.state.config.read().trading_enabled && self.client.has_credentials();
        if !trading_enabled {
            info!(
                symbol = %request.symbol,
                side = %request.first_side,
                entry = %request.first_price,
                stop = %request.second_stop_price,
                target = %request.second_limit_price,
                client_order_id = %request.client_order_id,
                "trading disabled — composite order simulated"
            );
            return ExecutionOutcome::Simulated(request.client_order_id.clone());
        }

        match self.client.ifo_order(&request).await {
            Ok(orders) => {
                let ids: Vec<i64> = orders.iter().map(|o| o.root_order_id).collect();
                info!(
                    symbol = %request.symbol,
                    side = %request.first_side,
                    root_order_ids = ?ids,
                    "composite order accepted"
                );
                ExecutionOutcome::Submitted(ids)
            }
            Err(e) => {
                warn!(symbol = %request.symbol, error = %e, "composite order rejected");
                self.state
                    .push_error(format!("order rejected: {e}"), broker_code(&e));
                ExecutionOutcome::Failed(e.to_string())
            }
        }
    }
}

fn broker_code(e: &GatewayError) -> Option<String> {
    e.broker_code().map(String::from)
}

/// Build the composite request from a signal's published levels. Prices are
/// quantised to the pair's display precision before entering the payload.
fn build_ifo_request(signal: &TfqeSignal, side: Side) -> Option<IfoOrderRequest> {
    let entry = quantise(signal.symbol, signal.entry?)?;
    let stop = quantise(signal.symbol, signal.stop_loss?)?;
    let target = quantise(signal.symbol, signal.tp1?)?;
    let size = Decimal::from(ORDER_SIZE_UNITS);

    Some(IfoOrderRequest {
        symbol: signal.symbol,
        first_side: side,
        first_execution_type: "LIMIT".into(),
        first_size: size,
        first_price: entry,
        second_size: size,
        second_limit_price: target,
        second_stop_price: stop,
        client_order_id: Uuid::new_v4().to_string(),
    })
}

fn quantise(symbol: Symbol, price: f64) -> Option<Decimal> {
    let d = Decimal::from_f64(price)?;
    Some(d.round_dp(symbol.display_precision()))
}
