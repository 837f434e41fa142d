// =============================================================================
// Request signer — HMAC-SHA256 over timestamp || method || path || body
// =============================================================================
//
// Produces the API-KEY / API-TIMESTAMP / API-SIGN header triple for private
// requests. The signed path always starts with `/v1/...`; a `/private` prefix
// is stripped before signing. The body string is the literal JSON that will
// be transmitted for writes, or the empty string for reads.
//
// The signer also guards against clock drift: it tracks the offset between
// the local clock and the broker's `responsetime`, and refuses to sign when
// the drift exceeds the configured window. A request signed with a skewed
// timestamp would be rejected broker-side anyway; refusing locally surfaces
// the real cause to the operator.
// =============================================================================

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::config::Credentials;
use crate::error::{GatewayError, GatewayResult};

type HmacSha256 = Hmac<Sha256>;

/// Sentinel for "no server time observed yet".
const OFFSET_UNKNOWN: i64 = i64::MIN;

pub struct Signer {
    credentials: Credentials,
    max_skew_ms: i64,
    /// Last observed (server − local) difference in milliseconds.
    server_offset_ms: AtomicI64,
}

/// The three headers attached to every private request.
#[derive(Debug, Clone)]
pub struct SignedHeaders {
    pub api_key: String,
    pub timestamp: String,
    pub signature: String,
}

impl Signer {
    pub fn new(credentials: Credentials, max_skew_ms: i64) -> Self {
        Self {
            credentials,
            max_skew_ms,
            server_offset_ms: AtomicI64::new(OFFSET_UNKNOWN),
        }
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> i64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as i64
    }

    /// Record a server timestamp (epoch ms) taken from a response envelope.
    pub fn observe_server_time(&self, server_ms: i64) {
        let offset = server_ms - Self::timestamp_ms();
        self.server_offset_ms.store(offset, Ordering::Relaxed);
    }

    /// Check the local clock against the last observed server time. Until a
    /// server time has been seen there is nothing to compare against.
    pub fn check_skew(&self) -> GatewayResult<()> {
        let offset = self.server_offset_ms.load(Ordering::Relaxed);
        if offset == OFFSET_UNKNOWN {
            return Ok(());
        }
        if offset.abs() > self.max_skew_ms {
            return Err(GatewayError::ClockSkew {
                skew_ms: offset,
                max_ms: self.max_skew_ms,
            });
        }
        Ok(())
    }

    /// Strip a `/private` prefix so the signed path starts at `/v1/...`.
    fn signing_path(path: &str) -> &str {
        path.strip_prefix("/private").unwrap_or(path)
    }

    /// Hex-encoded HMAC-SHA256 of `ts || method || path || body`.
    fn sign(&self, timestamp_ms: i64, method: &str, path: &str, body: &str) -> String {
        let message = format!("{timestamp_ms}{method}{}{body}", Self::signing_path(path));
        let mut mac = HmacSha256::new_from_slice(self.credentials.api_secret.as_bytes())
            .expect("HMAC accepts any key size");
        mac.update(message.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Produce headers for one request, refusing if the clock has drifted.
    pub fn headers(&self, method: &str, path: &str, body: &str) -> GatewayResult<SignedHeaders> {
        self.check_skew()?;
        let ts = Self::timestamp_ms();
        Ok(SignedHeaders {
            api_key: self.credentials.api_key.clone(),
            timestamp: ts.to_string(),
            signature: self.sign(ts, method, path, body),
        })
    }
}

impl std::fmt::Debug for Signer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Signer")
            .field("credentials", &"<redacted>")
            .field("max_skew_ms", &self.max_skew_ms)
            .finish()
    }
}
