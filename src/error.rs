// =============================================================================
// Gateway error taxonomy
// =============================================================================
//
// Every failure that can leave the gateway layer is one of these variants.
// Broker message codes are mapped here, once, at the edge; the rest of the
// engine never inspects raw codes. Transient variants are retried by the
// REST client, everything else propagates.
// =============================================================================

use thiserror::Error;

#[derive(Debug, Error)]
pub enum GatewayError {
    /// Missing or invalid configuration. Fatal at startup.
    #[error("configuration error: {0}")]
    Config(String),

    /// Rejected credentials, expired WS token, or a refused signature.
    #[error("authentication failed ({code:?}): {message}")]
    Auth {
        code: Option<String>,
        message: String,
    },

    /// Local clock drifted too far from the broker's. The request was never
    /// signed.
    #[error("clock skew {skew_ms} ms exceeds allowed {max_ms} ms")]
    ClockSkew { skew_ms: i64, max_ms: i64 },

    /// Broker-side throttle (ERR-5003 or HTTP 429).
    #[error("rate limited by broker: {message}")]
    RateLimited { message: String },

    /// Broker is in its maintenance window (ERR-5201/5202).
    #[error("broker maintenance: {message}")]
    Maintenance { message: String },

    /// Market is closed. Not an error for reads; a legitimate refusal for
    /// writes.
    #[error("market closed: {message}")]
    MarketClosed { message: String },

    /// Broker rejected the request parameters. Never retried.
    #[error("validation rejected ({code:?}): {message}")]
    Validation {
        code: Option<String>,
        message: String,
    },

    /// Network, TLS, or deserialisation failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// An internal consumer stopped draining its channel.
    #[error("consumer stalled on channel {channel}")]
    ConsumerStall { channel: String },

    /// The caller's deadline elapsed while waiting (limiter or I/O).
    #[error("operation cancelled before completion")]
    Cancelled,

    /// Bug class. Surfaced and logged, never swallowed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl GatewayError {
    /// Map a broker `message_code` (e.g. "ERR-5003") + text onto the taxonomy.
    pub fn from_broker_code(code: &str, message: &str) -> Self {
        match code {
            "ERR-5003" => GatewayError::RateLimited {
                message: message.to_string(),
            },
            "ERR-5010" | "ERR-5011" | "ERR-5012" | "ERR-5014" => GatewayError::Auth {
                code: Some(code.to_string()),
                message: message.to_string(),
            },
            "ERR-5201" | "ERR-5202" => GatewayError::Maintenance {
                message: message.to_string(),
            },
            "ERR-5218" => GatewayError::MarketClosed {
                message: message.to_string(),
            },
            _ => GatewayError::Validation {
                code: Some(code.to_string()),
                message: message.to_string(),
            },
        }
    }

    /// Whether the retry loop may attempt this request again.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            GatewayError::RateLimited { .. }
                | GatewayError::Maintenance { .. }
                | GatewayError::Transport(_)
        )
    }

    /// The broker's original code, when one was attached. Kept for audit.
    pub fn broker_code(&self) -> Option<&str> {
        match self {
            GatewayError::Auth { code, .. } | GatewayError::Validation { code, .. } => {
                code.as_deref()
            }
            _ => None,
        }
    }
}

impl From<reqwest::Error> for GatewayError {
    fn from(e: reqwest::Error) -> Self {
        GatewayError::Transport(e.to_string())
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(e: serde_json::Error) -> Self {
        GatewayError::Transport(format!("deserialisation: {e}"))
    }
}

pub type GatewayResult<T> = Result<T, GatewayError>;

// =============================================================================
// Tests
// =============================================================================
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn broker_code_mapping() {
        assert!(matches!(
            GatewayError::from_broker_code("ERR-5003", "too many requests"),
            GatewayError::RateLimited { .. }
        ));
        assert!(matches!(
            GatewayError::from_broker_code("ERR-5012", "token expired"),
            GatewayError::Auth { .. }
        ));
        assert!(matches!(
            GatewayError::from_broker_code("ERR-5201", "maintenance"),
            GatewayError::Maintenance { .. }
        ));
        assert!(matches!(
            GatewayError::from_broker_code("ERR-5218", "market closed"),
            GatewayError::MarketClosed { .. }
        ));
        assert!(matches!(
            GatewayError::from_broker_code("ERR-5126", "invalid size"),
            GatewayError::Validation { .. }
        ));
    }

    #[test]
    fn transient_classification() {
        assert!(GatewayError::RateLimited {
            message: "x".into()
        }
        .is_transient());
        assert!(GatewayError::Transport("reset".into()).is_transient());
        assert!(!GatewayError::Validation {
            code: None,
            message: "bad size".into()
        }
        .is_transient());
        assert!(!GatewayError::Cancelled.is_transient());
        assert!(!GatewayError::ClockSkew {
            skew_ms: 9000,
            max_ms: 5000
        }
        .is_transient());
    }

    #[test]
    fn audit_code_preserved() {
        let e = GatewayError::from_broker_code("ERR-5126", "size below minimum");
        assert_eq!(e.broker_code(), Some("ERR-5126"));
    }
}
