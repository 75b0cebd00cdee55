//! Inbound frames and the typed results built on them.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use strum_macros::Display;

use crate::Timestamp;
use crate::serde_helpers::deserialize_with_warnings;
use crate::ws::correlator::RequestId;
use crate::ws::error::{OperationError, WsError};
use crate::ws::key::WsKey;

#[non_exhaustive]
#[derive(Clone, Copy, Debug, Display, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
pub enum RateLimitType {
    RequestWeight,
    Orders,
    RawRequests,
    /// Limit types introduced after this crate was released
    #[serde(other)]
    Unknown,
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, Display, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "UPPERCASE")]
#[strum(serialize_all = "UPPERCASE")]
pub enum RateLimitInterval {
    Second,
    Minute,
    Hour,
    Day,
    #[serde(other)]
    Unknown,
}

/// One exchange-reported limit and the current consumption against it.
///
/// ```json
/// {"rateLimitType":"REQUEST_WEIGHT","interval":"MINUTE","intervalNum":1,"limit":6000,"count":2}
/// ```
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct RateLimit {
    pub rate_limit_type: RateLimitType,
    pub interval: RateLimitInterval,
    pub interval_num: u32,
    pub limit: u64,
    /// Absent from `exchangeInfo` limit definitions
    #[serde(default)]
    pub count: u64,
}

impl RateLimit {
    #[must_use]
    pub fn remaining(&self) -> u64 {
        self.limit.saturating_sub(self.count)
    }
}

#[non_exhaustive]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
pub struct ErrorPayload {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub msg: String,
}

/// A frame carrying a correlation id.
#[non_exhaustive]
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResponseFrame {
    pub id: RequestId,
    #[serde(default)]
    pub status: Option<u16>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<ErrorPayload>,
    #[serde(default)]
    pub rate_limits: Option<Vec<RateLimit>>,
}

impl ResponseFrame {
    /// Splits a response into the caller's result or the exchange's error.
    ///
    /// Stream-endpoint acknowledgements carry no status; they are successful unless an `error`
    /// object is present.
    pub fn into_response(self, key: WsKey) -> Result<WsApiResponse, WsError> {
        let failed_status = self.status.filter(|status| !(200..300).contains(status));

        if self.error.is_some() || failed_status.is_some() {
            let (code, message) = match self.error {
                Some(payload) => (payload.code, payload.msg),
                None => (None, "request rejected".to_owned()),
            };
            return Err(WsError::Operation(OperationError {
                key,
                id: self.id,
                status: self.status,
                code,
                message,
            }));
        }

        Ok(WsApiResponse {
            key,
            id: self.id,
            status: self.status,
            result: self.result.unwrap_or(Value::Null),
            rate_limits: self.rate_limits,
        })
    }
}

/// A successful response, correlated to the request that produced it.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub struct WsApiResponse<T = Value> {
    pub key: WsKey,
    pub id: RequestId,
    pub status: Option<u16>,
    pub result: T,
    /// Limits reported with this response, if the connection returns them
    pub rate_limits: Option<Vec<RateLimit>>,
}

impl WsApiResponse<Value> {
    /// Decodes the opaque result into `T`.
    pub fn decode<T: DeserializeOwned>(self) -> crate::Result<WsApiResponse<T>> {
        let result = deserialize_with_warnings(self.result)?;

        Ok(WsApiResponse {
            key: self.key,
            id: self.id,
            status: self.status,
            result,
            rate_limits: self.rate_limits,
        })
    }
}

/// An unsolicited frame: market data, user data or any other payload without an id.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq)]
pub struct StreamMessage {
    pub key: WsKey,
    /// Stream name for combined-stream frames (`{"stream": ..., "data": ...}`)
    pub topic: Option<String>,
    pub data: Value,
}

impl StreamMessage {
    pub(crate) fn from_value(key: WsKey, value: Value) -> Self {
        let Value::Object(mut map) = value else {
            return Self {
                key,
                topic: None,
                data: value,
            };
        };

        let combined =
            matches!(map.get("stream"), Some(Value::String(_))) && map.contains_key("data");
        if combined
            && let (Some(Value::String(topic)), Some(data)) = (map.remove("stream"), map.remove("data"))
        {
            return Self {
                key,
                topic: Some(topic),
                data,
            };
        }

        Self {
            key,
            topic: None,
            data: Value::Object(map),
        }
    }
}

#[non_exhaustive]
#[derive(Debug)]
pub enum InboundFrame {
    Response(ResponseFrame),
    Stream(StreamMessage),
}

/// Classifies a text frame. Anything with a string or numeric `id` is a response; the rest,
/// including `"id": null`, is a stream message.
pub fn parse_frame(key: WsKey, text: &str) -> Result<InboundFrame, WsError> {
    let value: Value = serde_json::from_str(text)?;

    match value.get("id") {
        Some(Value::String(_) | Value::Number(_)) => {
            Ok(InboundFrame::Response(serde_json::from_value(value)?))
        }
        _ => Ok(InboundFrame::Stream(StreamMessage::from_value(key, value))),
    }
}

#[non_exhaustive]
#[derive(Clone, Copy, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ServerTime {
    pub server_time: Timestamp,
}

/// Result of `session.logon`, `session.status` and `session.logout`.
#[non_exhaustive]
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// API key the session is logged in with, `None` when logged out
    #[serde(default)]
    pub api_key: Option<String>,
    #[serde(default)]
    pub authorized_since: Option<Timestamp>,
    #[serde(default)]
    pub connected_since: Option<Timestamp>,
    #[serde(default)]
    pub return_rate_limits: Option<bool>,
    #[serde(default)]
    pub server_time: Option<Timestamp>,
    #[serde(default)]
    pub user_data_stream: Option<bool>,
}

/// Order book snapshot returned by `depth`; each level is `[price, quantity]`.
#[non_exhaustive]
#[derive(Clone, Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct OrderBook {
    pub last_update_id: u64,
    pub bids: Vec<(String, String)>,
    pub asks: Vec<(String, String)>,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    const ACCOUNT_STATUS: &str = r#"{
        "id": "1",
        "status": 200,
        "result": { "makerCommission": 15, "canTrade": true, "balances": [] },
        "rateLimits": [
            { "rateLimitType": "REQUEST_WEIGHT", "interval": "MINUTE", "intervalNum": 1, "limit": 1200, "count": 5 }
        ]
    }"#;

    fn response(key: WsKey, text: &str) -> ResponseFrame {
        match parse_frame(key, text).expect("valid frame") {
            InboundFrame::Response(frame) => frame,
            InboundFrame::Stream(message) => panic!("expected a response, got {message:?}"),
        }
    }

    fn stream(key: WsKey, text: &str) -> StreamMessage {
        match parse_frame(key, text).expect("valid frame") {
            InboundFrame::Stream(message) => message,
            InboundFrame::Response(frame) => panic!("expected a stream message, got {frame:?}"),
        }
    }

    #[test]
    fn parses_account_status_response() -> anyhow::Result<()> {
        let frame = response(WsKey::MainWsApi, ACCOUNT_STATUS);
        let response = frame.into_response(WsKey::MainWsApi)?;

        assert_eq!(response.id, RequestId::from("1"));
        assert_eq!(response.status, Some(200));
        assert_eq!(response.result["makerCommission"], 15);

        let limits = response.rate_limits.expect("rate limits");
        assert_eq!(limits.len(), 1);
        assert_eq!(limits[0].rate_limit_type, RateLimitType::RequestWeight);
        assert_eq!(limits[0].interval, RateLimitInterval::Minute);
        assert_eq!(limits[0].count, 5);
        assert_eq!(limits[0].remaining(), 1195);
        Ok(())
    }

    #[test]
    fn error_response_maps_to_operation_error() {
        let frame = response(
            WsKey::MainWsApi,
            r#"{"id":"4","status":400,"error":{"code":-1021,"msg":"Timestamp for this request is outside of the recvWindow."}}"#,
        );

        let err = frame.into_response(WsKey::MainWsApi).unwrap_err();
        let WsError::Operation(op) = err else {
            panic!("expected operation error, got {err}");
        };
        assert_eq!(op.status, Some(400));
        assert_eq!(op.code, Some(-1021));
        assert_eq!(op.id, RequestId::from("4"));
    }

    #[test]
    fn failed_status_without_error_body_is_an_error() {
        let frame = response(WsKey::UsdmWsApi, r#"{"id":"5","status":503}"#);

        assert!(
            frame.into_response(WsKey::UsdmWsApi).is_err(),
            "status 503 must not settle as success"
        );
    }

    #[test]
    fn stream_ack_has_no_status() -> anyhow::Result<()> {
        let frame = response(WsKey::Main, r#"{"result":null,"id":1}"#);
        let response = frame.into_response(WsKey::Main)?;

        assert_eq!(response.id, RequestId::from("1"));
        assert_eq!(response.status, None);
        assert_eq!(response.result, Value::Null);
        Ok(())
    }

    #[test]
    fn stream_ack_with_error() {
        let frame = response(
            WsKey::Main,
            r#"{"error":{"code":2,"msg":"Invalid request: unknown variant"},"id":"3"}"#,
        );

        assert!(
            matches!(
                frame.into_response(WsKey::Main),
                Err(WsError::Operation(OperationError { code: Some(2), .. }))
            ),
            "stream errors settle the request"
        );
    }

    #[test]
    fn combined_stream_frame_has_topic() {
        let message = stream(
            WsKey::Main,
            r#"{"stream":"btcusdt@aggTrade","data":{"e":"aggTrade","p":"0.001"}}"#,
        );

        assert_eq!(message.topic.as_deref(), Some("btcusdt@aggTrade"));
        assert_eq!(message.data, json!({ "e": "aggTrade", "p": "0.001" }));
    }

    #[test]
    fn frames_without_id_are_stream_messages() {
        let message = stream(
            WsKey::MainWsApi,
            r#"{"subscriptionId":0,"event":{"e":"outboundAccountPosition"}}"#,
        );
        assert_eq!(message.topic, None);
        assert_eq!(message.data["subscriptionId"], 0);

        let null_id = stream(WsKey::Main, r#"{"id":null,"e":"trade"}"#);
        assert_eq!(null_id.topic, None);
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        assert!(
            matches!(
                parse_frame(WsKey::Main, "{not json"),
                Err(WsError::MessageParse(_))
            ),
            "garbage must not be routed"
        );
    }

    #[test]
    fn decode_typed_result() -> anyhow::Result<()> {
        let frame = response(
            WsKey::MainWsApi,
            r#"{"id":"9","status":200,"result":{"serverTime":1656400526260}}"#,
        );

        let typed = frame.into_response(WsKey::MainWsApi)?.decode::<ServerTime>()?;

        assert_eq!(typed.result.server_time, 1_656_400_526_260);
        Ok(())
    }

    #[test]
    fn session_status_tolerates_logged_out_session() -> anyhow::Result<()> {
        let status: SessionStatus = serde_json::from_value(json!({
            "apiKey": null,
            "authorizedSince": null,
            "connectedSince": 1_649_729_873_021_i64,
            "returnRateLimits": false,
            "serverTime": 1_649_730_611_671_i64
        }))?;

        assert_eq!(status.api_key, None);
        assert_eq!(status.connected_since, Some(1_649_729_873_021));
        Ok(())
    }

    #[test]
    fn unknown_rate_limit_type_is_tolerated() -> anyhow::Result<()> {
        let limit: RateLimit = serde_json::from_value(json!({
            "rateLimitType": "CONNECTIONS",
            "interval": "MINUTE",
            "intervalNum": 5,
            "limit": 300
        }))?;

        assert_eq!(limit.rate_limit_type, RateLimitType::Unknown);
        assert_eq!(limit.count, 0);
        Ok(())
    }
}
