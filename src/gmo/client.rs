// =============================================================================
// Broker REST client — typed endpoint wrappers with HMAC signing and retry
// =============================================================================
//
// Operations group into public reads, private reads, and private writes.
// Every call:
//   1. takes a limiter token for its verb class (the only path to the wire),
//   2. signs if private (refused on clock skew),
//   3. sends with a 10 s deadline,
//   4. decodes the envelope and maps broker codes onto the error taxonomy,
//   5. retries transient failures with decorrelated jitter, capped at
//      3 attempts and 5 s of added delay.
//
// Writes are retried only when the payload carries a client order id the
// broker can deduplicate on. Order-mutation calls without one (changeOrder,
// cancels) are sent exactly once.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, instrument, warn};

use crate::config::Credentials;
use crate::error::{GatewayError, GatewayResult};
use crate::gmo::rate_limit::{LimitClass, RateLimiter};
use crate::gmo::signer::Signer;
use crate::gmo::wire::*;
use crate::types::{Symbol, Timeframe};

const PUBLIC_BASE: &str = "https://forex-api.coin.z.com/public";
const PRIVATE_BASE: &str = "https://forex-api.coin.z.com/private";

/// Per-call deadline, covering limiter wait + transmission.
const CALL_DEADLINE: Duration = Duration::from_secs(10);
/// Retry policy: at most this many attempts in total.
const MAX_ATTEMPTS: u32 = 3;
/// First retry sleeps at least this long.
const BACKOFF_BASE: Duration = Duration::from_millis(100);
/// Added retry delay never exceeds this in total.
const BACKOFF_TOTAL_CAP: Duration = Duration::from_secs(5);

/// Compute the next decorrelated-jitter delay from the previous one.
fn backoff_delay(prev: Duration) -> Duration {
    let upper = (prev.as_millis() as u64).saturating_mul(3).max(BACKOFF_BASE.as_millis() as u64);
    let ms = rand::thread_rng().gen_range(BACKOFF_BASE.as_millis() as u64..=upper);
    Duration::from_millis(ms)
}

/// The broker gateway value. Owns its transport, limiter, and signer; it is
/// passed to whoever needs broker access rather than living in module state.
#[derive(Clone)]
pub struct GmoClient {
    http: reqwest::Client,
    limiter: Arc<RateLimiter>,
    signer: Option<Arc<Signer>>,
    public_base: String,
    private_base: String,
}

impl GmoClient {
    /// Build a gateway. Without credentials only the public endpoints work.
    pub fn new(limiter: Arc<RateLimiter>, credentials: Option<Credentials>, max_skew_ms: i64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(CALL_DEADLINE)
            .build()
            .expect("failed to build reqwest client");

        Self {
            http,
            limiter,
            signer: credentials.map(|c| Arc::new(Signer::new(c, max_skew_ms))),
            public_base: PUBLIC_BASE.to_string(),
            private_base: PRIVATE_BASE.to_string(),
        }
    }

    pub fn has_credentials(&self) -> bool {
        self.signer.is_some()
    }

    pub fn limiter(&self) -> &Arc<RateLimiter> {
        &self.limiter
    }

    fn require_signer(&self) -> GatewayResult<&Arc<Signer>> {
        self.signer.as_ref().ok_or_else(|| GatewayError::Auth {
            code: None,
            message: "API credentials not configured; private endpoints unavailable".into(),
        })
    }

    // -------------------------------------------------------------------------
    // Transport core
    // -------------------------------------------------------------------------

    /// One attempt: limiter token, optional signature, send, decode envelope.
    async fn attempt<T: DeserializeOwned>(
        &self,
        class: LimitClass,
        method: Method,
        url: &str,
        sign_path: Option<&str>,
        body_json: Option<&str>,
    ) -> GatewayResult<Envelope<T>> {
        self.limiter.acquire_within(class, CALL_DEADLINE).await?;

        let mut req = self.http.request(method.clone(), url);

        if let Some(path) = sign_path {
            let signer = self.require_signer()?;
            let headers = signer.headers(method.as_str(), path, body_json.unwrap_or(""))?;
            req = req
                .header("API-KEY", headers.api_key)
                .header("API-TIMESTAMP", headers.timestamp)
                .header("API-SIGN", headers.signature);
        }

        if let Some(body) = body_json {
            req = req
                .header(reqwest::header::CONTENT_TYPE, "application/json")
                .body(body.to_string());
        }

        let resp = req.send().await.map_err(|e| {
            if e.is_timeout() {
                GatewayError::Cancelled
            } else {
                GatewayError::Transport(e.to_string())
            }
        })?;

        let http_status = resp.status();
        if http_status.as_u16() == 429 {
            return Err(GatewayError::RateLimited {
                message: "HTTP 429".into(),
            });
        }
        if http_status.is_server_error() {
            return Err(GatewayError::Transport(format!("HTTP {http_status}")));
        }

        let envelope: Envelope<T> = resp.json().await.map_err(|e| {
            GatewayError::Transport(format!("envelope decode failed: {e}"))
        })?;

        // Every envelope carries the broker's clock; feed it to the skew guard.
        if let (Some(signer), Some(ts)) = (self.signer.as_ref(), envelope.responsetime) {
            signer.observe_server_time(ts.timestamp_millis());
        }

        Ok(envelope)
    }

    /// Run attempts under the retry policy. `idempotent` callers may be
    /// retried on transient failures; everything else gets a single shot.
    async fn request<T: DeserializeOwned>(
        &self,
        class: LimitClass,
        method: Method,
        url: String,
        sign_path: Option<String>,
        body_json: Option<String>,
        idempotent: bool,
    ) -> GatewayResult<Envelope<T>> {
        let mut attempt_no = 1;
        let mut delay = BACKOFF_BASE;
        let mut total_delay = Duration::ZERO;

        loop {
            let result = self
                .attempt(
                    class,
                    method.clone(),
                    &url,
                    sign_path.as_deref(),
                    body_json.as_deref(),
                )
                .await;

            match result {
                Ok(env) => return Ok(env),
                Err(e) => {
                    let retryable = idempotent
                        && e.is_transient()
                        && attempt_no < MAX_ATTEMPTS
                        && total_delay < BACKOFF_TOTAL_CAP;
                    if !retryable {
                        return Err(e);
                    }

                    delay = backoff_delay(delay).min(BACKOFF_TOTAL_CAP - total_delay);
                    total_delay += delay;
                    warn!(
                        url = %url,
                        attempt = attempt_no,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "transient broker error, backing off"
                    );
                    tokio::time::sleep(delay).await;
                    attempt_no += 1;
                }
            }
        }
    }

    async fn public_get<T: DeserializeOwned>(&self, path_and_query: &str) -> GatewayResult<T> {
        let url = format!("{}{}", self.public_base, path_and_query);
        self.request::<T>(LimitClass::PublicGet, Method::GET, url, None, None, true)
            .await?
            .into_result()
    }

    async fn private_get<T: DeserializeOwned>(
        &self,
        path: &str,
        query: Option<String>,
    ) -> GatewayResult<T> {
        let url = match &query {
            Some(q) => format!("{}{}?{}", self.private_base, path, q),
            None => format!("{}{}", self.private_base, path),
        };
        self.request::<T>(
            LimitClass::PrivateGet,
            Method::GET,
            url,
            Some(path.to_string()),
            None,
            true,
        )
        .await?
        .into_result()
    }

    async fn private_write<T: DeserializeOwned>(
        &self,
        method: Method,
        path: &str,
        body: &impl Serialize,
        idempotent: bool,
    ) -> GatewayResult<Envelope<T>> {
        let body_json = serde_json::to_string(body)
            .map_err(|e| GatewayError::Internal(format!("request serialisation: {e}")))?;
        let url = format!("{}{}", self.private_base, path);
        self.request::<T>(
            LimitClass::PrivatePost,
            method,
            url,
            Some(path.to_string()),
            Some(body_json),
            idempotent,
        )
        .await
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /public/v1/status
    #[instrument(skip(self), name = "gmo::get_status")]
    pub async fn get_status(&self) -> GatewayResult<StatusData> {
        self.public_get("/v1/status").await
    }

    /// GET /public/v1/ticker — latest quote for every listed pair.
    #[instrument(skip(self), name = "gmo::get_ticker")]
    pub async fn get_ticker(&self) -> GatewayResult<Vec<TickerEntry>> {
        self.public_get("/v1/ticker").await
    }

    /// GET /public/v1/klines — OHLC history for one (symbol, interval, date).
    ///
    /// `date` is `YYYYMMDD` for intraday intervals and `YYYY` for daily bars,
    /// per the broker's contract.
    #[instrument(skip(self), name = "gmo::get_klines")]
    pub async fn get_klines(
        &self,
        symbol: Symbol,
        timeframe: Timeframe,
        date: &str,
    ) -> GatewayResult<Vec<KlineEntry>> {
        let path = format!(
            "/v1/klines?symbol={}&priceType=BID&interval={}&date={}",
            symbol,
            timeframe.label(),
            date
        );
        let klines: Vec<KlineEntry> = self.public_get(&path).await?;
        debug!(%symbol, %timeframe, count = klines.len(), "klines fetched");
        Ok(klines)
    }

    /// GET /public/v1/symbols — trading rules per pair.
    #[instrument(skip(self), name = "gmo::get_symbols")]
    pub async fn get_symbols(&self) -> GatewayResult<Vec<SymbolRule>> {
        self.public_get("/v1/symbols").await
    }

    // -------------------------------------------------------------------------
    // Private reads
    // -------------------------------------------------------------------------

    /// GET /private/v1/account/assets
    #[instrument(skip(self), name = "gmo::get_assets")]
    pub async fn get_assets(&self) -> GatewayResult<AccountAssets> {
        self.private_get("/v1/account/assets", None).await
    }

    /// GET /private/v1/openPositions
    #[instrument(skip(self), name = "gmo::get_open_positions")]
    pub async fn get_open_positions(
        &self,
        symbol: Option<Symbol>,
    ) -> GatewayResult<Vec<OpenPosition>> {
        let query = symbol.map(|s| format!("symbol={s}"));
        let data: ListData<OpenPosition> = self.private_get("/v1/openPositions", query).await?;
        Ok(data.list)
    }

    /// GET /private/v1/positionSummary
    #[instrument(skip(self), name = "gmo::get_position_summary")]
    pub async fn get_position_summary(
        &self,
        symbol: Option<Symbol>,
    ) -> GatewayResult<Vec<PositionSummary>> {
        let query = symbol.map(|s| format!("symbol={s}"));
        let data: ListData<PositionSummary> =
            self.private_get("/v1/positionSummary", query).await?;
        Ok(data.list)
    }

    /// GET /private/v1/activeOrders
    #[instrument(skip(self), name = "gmo::get_active_orders")]
    pub async fn get_active_orders(&self, symbol: Symbol) -> GatewayResult<Vec<OrderInfo>> {
        let data: ListData<OrderInfo> = self
            .private_get("/v1/activeOrders", Some(format!("symbol={symbol}")))
            .await?;
        Ok(data.list)
    }

    /// GET /private/v1/executions — fills for one order.
    #[instrument(skip(self), name = "gmo::get_executions")]
    pub async fn get_executions(&self, order_id: i64) -> GatewayResult<Vec<ExecutionInfo>> {
        let data: ListData<ExecutionInfo> = self
            .private_get("/v1/executions", Some(format!("orderId={order_id}")))
            .await?;
        Ok(data.list)
    }

    /// GET /private/v1/latestExecutions — most recent fills for a symbol.
    #[instrument(skip(self), name = "gmo::get_latest_executions")]
    pub async fn get_latest_executions(
        &self,
        symbol: Symbol,
        count: u32,
    ) -> GatewayResult<Vec<ExecutionInfo>> {
        let data: ListData<ExecutionInfo> = self
            .private_get(
                "/v1/latestExecutions",
                Some(format!("symbol={symbol}&count={count}")),
            )
            .await?;
        Ok(data.list)
    }

    // -------------------------------------------------------------------------
    // Private writes — orders
    // -------------------------------------------------------------------------

    /// POST /private/v1/speedOrder — carries a client order id, safe to retry.
    #[instrument(skip(self, req), name = "gmo::speed_order")]
    pub async fn speed_order(&self, req: &SpeedOrderRequest) -> GatewayResult<Vec<OrderInfo>> {
        self.private_write(Method::POST, "/v1/speedOrder", req, true)
            .await?
            .into_result()
    }

    /// POST /private/v1/order
    #[instrument(skip(self, req), name = "gmo::order")]
    pub async fn order(&self, req: &OrderRequest) -> GatewayResult<Vec<OrderInfo>> {
        self.private_write(Method::POST, "/v1/order", req, true)
            .await?
            .into_result()
    }

    /// POST /private/v1/ifdOrder
    #[instrument(skip(self, req), name = "gmo::ifd_order")]
    pub async fn ifd_order(&self, req: &IfdOrderRequest) -> GatewayResult<Vec<OrderInfo>> {
        self.private_write(Method::POST, "/v1/ifdOrder", req, true)
            .await?
            .into_result()
    }

    /// POST /private/v1/ifoOrder
    #[instrument(skip(self, req), name = "gmo::ifo_order")]
    pub async fn ifo_order(&self, req: &IfoOrderRequest) -> GatewayResult<Vec<OrderInfo>> {
        self.private_write(Method::POST, "/v1/ifoOrder", req, true)
            .await?
            .into_result()
    }

    /// POST /private/v1/changeOrder — no client order id, sent exactly once.
    #[instrument(skip(self, req), name = "gmo::change_order")]
    pub async fn change_order(&self, req: &ChangeOrderRequest) -> GatewayResult<()> {
        self.private_write::<serde_json::Value>(Method::POST, "/v1/changeOrder", req, false)
            .await?
            .into_ack()
    }

    /// POST /private/v1/cancelOrders — sent exactly once.
    #[instrument(skip(self, req), name = "gmo::cancel_orders")]
    pub async fn cancel_orders(
        &self,
        req: &CancelOrdersRequest,
    ) -> GatewayResult<CancelOrdersResult> {
        self.private_write(Method::POST, "/v1/cancelOrders", req, false)
            .await?
            .into_result()
    }

    /// POST /private/v1/cancelBulkOrder — sent exactly once.
    #[instrument(skip(self, req), name = "gmo::cancel_bulk_order")]
    pub async fn cancel_bulk_order(
        &self,
        req: &CancelBulkOrderRequest,
    ) -> GatewayResult<Vec<i64>> {
        self.private_write(Method::POST, "/v1/cancelBulkOrder", req, false)
            .await?
            .into_result()
    }

    /// POST /private/v1/closeOrder — carries a client order id, safe to retry.
    #[instrument(skip(self, req), name = "gmo::close_order")]
    pub async fn close_order(&self, req: &CloseOrderRequest) -> GatewayResult<Vec<OrderInfo>> {
        self.private_write(Method::POST, "/v1/closeOrder", req, true)
            .await?
            .into_result()
    }

    // -------------------------------------------------------------------------
    // Private writes — WebSocket token lifecycle
    // -------------------------------------------------------------------------

    /// POST /private/v1/ws-auth — mint a private-stream access token.
    #[instrument(skip(self), name = "gmo::create_ws_token")]
    pub async fn create_ws_token(&self) -> GatewayResult<String> {
        self.private_write(Method::POST, "/v1/ws-auth", &serde_json::json!({}), true)
            .await?
            .into_result()
    }

    /// PUT /private/v1/ws-auth — extend the token for another hour.
    #[instrument(skip(self, token), name = "gmo::extend_ws_token")]
    pub async fn extend_ws_token(&self, token: &str) -> GatewayResult<()> {
        self.private_write::<serde_json::Value>(
            Method::PUT,
            "/v1/ws-auth",
            &serde_json::json!({ "token": token }),
            true,
        )
        .await?
        .into_ack()
    }

    /// DELETE /private/v1/ws-auth — release the token on shutdown.
    #[instrument(skip(self, token), name = "gmo::delete_ws_token")]
    pub async fn delete_ws_token(&self, token: &str) -> GatewayResult<()> {
        self.private_write::<serde_json::Value>(
            Method::DELETE,
            "/v1/ws-auth",
            &serde_json::json!({ "token": token }),
            true,
        )
        .await?
        .into_ack()
    }
}

impl std::fmt::Debug for GmoClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GmoClient")
            .field("public_base", &self.public_base)
            .field("private_base", &self.private_base)
            .field("authenticated", &self.signer.is_some())
            .finish()
    }
}
