#![cfg_attr(doc, doc = include_str!("../README.md"))]

pub mod auth;
pub mod client;
pub mod error;
pub(crate) mod serde_helpers;
pub mod ws;

pub use client::Client;

use crate::error::Error;

pub type Result<T> = std::result::Result<T, Error>;

/// Environment variable conventionally holding the API key used for `session.logon`.
pub const API_KEY_VAR: &str = "BINANCE_API_KEY";

/// Environment variable conventionally holding the API secret used for `session.logon`.
pub const API_SECRET_VAR: &str = "BINANCE_API_SECRET";

/// Timestamp in milliseconds since [`std::time::UNIX_EPOCH`], as the exchange expects it.
pub(crate) type Timestamp = i64;

pub(crate) fn now_millis() -> Timestamp {
    chrono::Utc::now().timestamp_millis()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn now_millis_is_after_2020() {
        // 2020-01-01T00:00:00Z
        assert!(now_millis() > 1_577_836_800_000);
    }
}
