pub mod bus;
pub mod client;
pub mod rate_limit;
pub mod signer;
pub mod wire;
pub mod ws_private;
pub mod ws_public;

pub use client::GmoClient;
pub use rate_limit::{LimitClass, RateLimiter};
pub use signer::Signer;
