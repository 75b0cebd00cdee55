//! Typed parameters for the general, session and account operations.
//!
//! Every other operation is sent through [`crate::Client::request`] with opaque JSON
//! parameters; these structs only cover calls the engine itself relies on or that are
//! common enough to deserve a builder.

#![allow(
    clippy::module_name_repetitions,
    reason = "Request suffix is intentional for clarity"
)]

use bon::Builder;
use serde::Serialize;
use serde_json::{Map, Value};
use serde_with::skip_serializing_none;

use crate::Timestamp;
use crate::ws::correlator::RequestId;
use crate::ws::operation::{Operation, WsApiRequest};
use crate::ws::types::response::{OrderBook, RateLimit, ServerTime, SessionStatus};

/// The outbound frame: `{"id": ..., "method": ..., "params"?: ...}`.
#[skip_serializing_none]
#[derive(Debug, Serialize)]
pub(crate) struct RequestFrame<'frame> {
    pub id: &'frame RequestId,
    pub method: &'static str,
    pub params: Option<&'frame Value>,
}

/// Drops empty parameters and stamps authenticated operations with the current time when the
/// caller did not supply a `timestamp`.
pub(crate) fn normalize_params(
    operation: Operation,
    params: Option<Value>,
    now: Timestamp,
) -> Option<Value> {
    let params = match params {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(other) => Some(other),
    };

    if !operation.requires_auth() {
        return params;
    }

    match params {
        None => {
            let mut map = Map::new();
            map.insert("timestamp".to_owned(), Value::from(now));
            Some(Value::Object(map))
        }
        Some(Value::Object(mut map)) => {
            map.entry("timestamp").or_insert_with(|| Value::from(now));
            Some(Value::Object(map))
        }
        other => other,
    }
}

/// `ping`: tests connectivity.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[non_exhaustive]
pub struct PingRequest;

impl WsApiRequest for PingRequest {
    const OPERATION: Operation = Operation::Ping;
    type Response = Value;
}

/// `time`: current server time.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[non_exhaustive]
pub struct TimeRequest;

impl WsApiRequest for TimeRequest {
    const OPERATION: Operation = Operation::Time;
    type Response = ServerTime;
}

/// `exchangeInfo`: trading rules and symbol information.
///
/// # Example
///
/// ```
/// use binance_ws_api::ws::types::request::ExchangeInfoRequest;
///
/// let request = ExchangeInfoRequest::builder()
///     .symbols(vec!["BTCUSDT".to_owned(), "BNBBTC".to_owned()])
///     .build();
/// ```
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Builder, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct ExchangeInfoRequest {
    #[builder(into)]
    pub symbol: Option<String>,
    pub symbols: Option<Vec<String>>,
    pub permissions: Option<Vec<String>>,
    pub show_permission_sets: Option<bool>,
}

impl WsApiRequest for ExchangeInfoRequest {
    const OPERATION: Operation = Operation::ExchangeInfo;
    type Response = Value;
}

/// `depth`: order book snapshot.
#[skip_serializing_none]
#[derive(Debug, Clone, Builder, Serialize)]
#[non_exhaustive]
pub struct DepthRequest {
    #[builder(into)]
    pub symbol: String,
    pub limit: Option<u32>,
}

impl WsApiRequest for DepthRequest {
    const OPERATION: Operation = Operation::Depth;
    type Response = OrderBook;
}

/// `session.status`: state of the current session.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[non_exhaustive]
pub struct SessionStatusRequest;

impl WsApiRequest for SessionStatusRequest {
    const OPERATION: Operation = Operation::SessionStatus;
    type Response = SessionStatus;
}

/// `session.logout`: forgets the API key registered for the session.
#[derive(Debug, Clone, Copy, Default, Serialize)]
#[non_exhaustive]
pub struct SessionLogoutRequest;

impl WsApiRequest for SessionLogoutRequest {
    const OPERATION: Operation = Operation::SessionLogout;
    type Response = SessionStatus;
}

/// `account.status`: balances and permissions. Requires an authenticated session.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Builder, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AccountStatusRequest {
    pub omit_zero_balances: Option<bool>,
    pub recv_window: Option<u64>,
    /// Filled with the current time when unset.
    pub timestamp: Option<Timestamp>,
}

impl WsApiRequest for AccountStatusRequest {
    const OPERATION: Operation = Operation::AccountStatus;
    type Response = Value;
}

/// `account.rateLimits.orders`: unfilled order counts against each order limit.
#[skip_serializing_none]
#[derive(Debug, Clone, Default, Builder, Serialize)]
#[serde(rename_all = "camelCase")]
#[non_exhaustive]
pub struct AccountRateLimitsRequest {
    pub recv_window: Option<u64>,
    pub timestamp: Option<Timestamp>,
}

impl WsApiRequest for AccountRateLimitsRequest {
    const OPERATION: Operation = Operation::AccountRateLimitsOrders;
    type Response = Vec<RateLimit>;
}

/// `order.place`. Order parameters differ per market and are passed through unmodified.
///
/// # Example
///
/// ```
/// use binance_ws_api::ws::types::request::OrderPlaceRequest;
/// use serde_json::json;
///
/// let request = OrderPlaceRequest::builder()
///     .params(
///         json!({ "symbol": "BTCUSDT", "side": "BUY", "type": "MARKET", "quantity": "0.001" })
///             .as_object()
///             .cloned()
///             .unwrap_or_default(),
///     )
///     .build();
/// ```
#[skip_serializing_none]
#[derive(Debug, Clone, Builder, Serialize)]
#[non_exhaustive]
pub struct OrderPlaceRequest {
    #[serde(flatten)]
    pub params: Map<String, Value>,
    pub timestamp: Option<Timestamp>,
}

impl WsApiRequest for OrderPlaceRequest {
    const OPERATION: Operation = Operation::OrderPlace;
    type Response = Value;
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn frame_omits_missing_params() -> anyhow::Result<()> {
        let id = RequestId::from("1");
        let frame = RequestFrame {
            id: &id,
            method: Operation::Time.method(),
            params: None,
        };

        assert_eq!(serde_json::to_string(&frame)?, r#"{"id":"1","method":"time"}"#);
        Ok(())
    }

    #[test]
    fn frame_carries_array_params() -> anyhow::Result<()> {
        let id = RequestId::from("2");
        let params = json!(["btcusdt@aggTrade"]);
        let frame = RequestFrame {
            id: &id,
            method: Operation::Subscribe.method(),
            params: Some(&params),
        };

        assert_eq!(
            serde_json::to_value(&frame)?,
            json!({ "id": "2", "method": "SUBSCRIBE", "params": ["btcusdt@aggTrade"] })
        );
        Ok(())
    }

    #[test]
    fn empty_params_are_dropped() {
        assert_eq!(normalize_params(Operation::Time, Some(json!({})), 1), None);
        assert_eq!(normalize_params(Operation::Ping, Some(Value::Null), 1), None);
        assert_eq!(
            normalize_params(Operation::Depth, Some(json!({ "symbol": "BNBBTC" })), 1),
            Some(json!({ "symbol": "BNBBTC" }))
        );
    }

    #[test]
    fn authenticated_operations_get_a_timestamp() {
        assert_eq!(
            normalize_params(Operation::AccountStatus, None, 42),
            Some(json!({ "timestamp": 42 }))
        );
        assert_eq!(
            normalize_params(Operation::MyTrades, Some(json!({ "symbol": "BTCUSDT" })), 42),
            Some(json!({ "symbol": "BTCUSDT", "timestamp": 42 }))
        );
    }

    #[test]
    fn caller_timestamp_is_kept() {
        assert_eq!(
            normalize_params(Operation::AccountStatus, Some(json!({ "timestamp": 7 })), 42),
            Some(json!({ "timestamp": 7 }))
        );
    }

    #[test]
    fn typed_requests_serialize_camel_case() -> anyhow::Result<()> {
        let request = AccountStatusRequest::builder()
            .omit_zero_balances(true)
            .build();

        assert_eq!(
            serde_json::to_value(&request)?,
            json!({ "omitZeroBalances": true })
        );
        assert_eq!(serde_json::to_value(TimeRequest)?, Value::Null);
        Ok(())
    }

    #[test]
    fn order_params_are_flattened() -> anyhow::Result<()> {
        let mut params = Map::new();
        params.insert("symbol".to_owned(), json!("BTCUSDT"));
        params.insert("side".to_owned(), json!("SELL"));
        let request = OrderPlaceRequest::builder()
            .params(params)
            .timestamp(1_660_801_715_431)
            .build();

        assert_eq!(
            serde_json::to_value(&request)?,
            json!({ "symbol": "BTCUSDT", "side": "SELL", "timestamp": 1_660_801_715_431_i64 })
        );
        Ok(())
    }
}
