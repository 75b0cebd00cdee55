//! Connection identities.
//!
//! Every socket the engine opens is identified by a [`WsKey`]. A key fixes the endpoint, whether
//! the endpoint speaks the request/response WS-API or the stream-control protocol, and whether
//! a `session.logon` handshake is required before account operations.

use std::str::FromStr;

use strum_macros::{Display, IntoStaticStr};

use crate::error::Error;
use crate::ws::error::WsError;
use crate::ws::operation::{Operation, Scope};

/// Market family served by a connection.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Display, PartialEq, Eq, Hash)]
pub enum Market {
    Spot,
    Margin,
    #[strum(serialize = "USD-M futures")]
    UsdM,
    #[strum(serialize = "COIN-M futures")]
    CoinM,
    Options,
    #[strum(serialize = "portfolio margin")]
    PortfolioMargin,
}

/// Identity of one long-lived connection.
///
/// Keys display as, and parse from, their wire-independent names such as `"mainWSAPI"`.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Display, IntoStaticStr, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum WsKey {
    #[strum(serialize = "main")]
    Main,
    #[strum(serialize = "main2")]
    Main2,
    #[strum(serialize = "main3")]
    Main3,
    #[strum(serialize = "mainTestnetPublic")]
    MainTestnetPublic,
    #[strum(serialize = "mainTestnetUserData")]
    MainTestnetUserData,
    #[strum(serialize = "marginRiskUserData")]
    MarginRiskUserData,
    #[strum(serialize = "usdm")]
    Usdm,
    #[strum(serialize = "usdmTestnet")]
    UsdmTestnet,
    #[strum(serialize = "coinm")]
    Coinm,
    #[strum(serialize = "coinm2")]
    Coinm2,
    #[strum(serialize = "coinmTestnet")]
    CoinmTestnet,
    #[strum(serialize = "eoptions")]
    Eoptions,
    #[strum(serialize = "portfolioMarginUserData")]
    PortfolioMarginUserData,
    #[strum(serialize = "portfolioMarginProUserData")]
    PortfolioMarginProUserData,
    #[strum(serialize = "mainWSAPI")]
    MainWsApi,
    #[strum(serialize = "mainWSAPI2")]
    MainWsApi2,
    #[strum(serialize = "mainWSAPITestnet")]
    MainWsApiTestnet,
    #[strum(serialize = "usdmWSAPI")]
    UsdmWsApi,
    #[strum(serialize = "usdmWSAPITestnet")]
    UsdmWsApiTestnet,
}

impl WsKey {
    pub const ALL: &'static [WsKey] = &[
        WsKey::Main,
        WsKey::Main2,
        WsKey::Main3,
        WsKey::MainTestnetPublic,
        WsKey::MainTestnetUserData,
        WsKey::MarginRiskUserData,
        WsKey::Usdm,
        WsKey::UsdmTestnet,
        WsKey::Coinm,
        WsKey::Coinm2,
        WsKey::CoinmTestnet,
        WsKey::Eoptions,
        WsKey::PortfolioMarginUserData,
        WsKey::PortfolioMarginProUserData,
        WsKey::MainWsApi,
        WsKey::MainWsApi2,
        WsKey::MainWsApiTestnet,
        WsKey::UsdmWsApi,
        WsKey::UsdmWsApiTestnet,
    ];

    #[must_use]
    pub fn as_str(self) -> &'static str {
        self.into()
    }

    /// Default endpoint for this key. Stream keys point at the combined-stream path so that
    /// unsolicited frames arrive wrapped as `{"stream": ..., "data": ...}`.
    #[must_use]
    pub const fn url(self) -> &'static str {
        match self {
            Self::Main => "wss://stream.binance.com:9443/stream",
            Self::Main2 => "wss://stream.binance.com:443/stream",
            Self::Main3 => "wss://data-stream.binance.vision/stream",
            Self::MainTestnetPublic | Self::MainTestnetUserData => {
                "wss://stream.testnet.binance.vision/stream"
            }
            Self::MarginRiskUserData => "wss://margin-stream.binance.com/stream",
            Self::Usdm => "wss://fstream.binance.com/stream",
            Self::UsdmTestnet => "wss://stream.binancefuture.com/stream",
            Self::Coinm => "wss://dstream.binance.com/stream",
            Self::Coinm2 => "wss://dstream-auth.binance.com/stream",
            Self::CoinmTestnet => "wss://dstream.binancefuture.com/stream",
            Self::Eoptions => "wss://nbstream.binance.com/eoptions/stream",
            Self::PortfolioMarginUserData => "wss://fstream.binance.com/pm/stream",
            Self::PortfolioMarginProUserData => "wss://fstream.binance.com/pm-classic/stream",
            Self::MainWsApi => "wss://ws-api.binance.com:443/ws-api/v3",
            Self::MainWsApi2 => "wss://ws-api.binance.com:9443/ws-api/v3",
            Self::MainWsApiTestnet => "wss://ws-api.testnet.binance.vision/ws-api/v3",
            Self::UsdmWsApi => "wss://ws-fapi.binance.com/ws-fapi/v1",
            Self::UsdmWsApiTestnet => "wss://testnet.binancefuture.com/ws-fapi/v1",
        }
    }

    /// Whether this key speaks the request/response WS-API rather than stream control.
    #[must_use]
    pub const fn is_ws_api(self) -> bool {
        matches!(
            self,
            Self::MainWsApi
                | Self::MainWsApi2
                | Self::MainWsApiTestnet
                | Self::UsdmWsApi
                | Self::UsdmWsApiTestnet
        )
    }

    /// Whether account and trading operations on this key need a `session.logon` first.
    ///
    /// Stream endpoints carry user data through listen keys instead, so they never log in.
    #[must_use]
    pub const fn requires_auth(self) -> bool {
        self.is_ws_api()
    }

    #[must_use]
    pub const fn market(self) -> Market {
        match self {
            Self::Main
            | Self::Main2
            | Self::Main3
            | Self::MainTestnetPublic
            | Self::MainTestnetUserData
            | Self::MainWsApi
            | Self::MainWsApi2
            | Self::MainWsApiTestnet => Market::Spot,
            Self::MarginRiskUserData => Market::Margin,
            Self::Usdm | Self::UsdmTestnet | Self::UsdmWsApi | Self::UsdmWsApiTestnet => {
                Market::UsdM
            }
            Self::Coinm | Self::Coinm2 | Self::CoinmTestnet => Market::CoinM,
            Self::Eoptions => Market::Options,
            Self::PortfolioMarginUserData | Self::PortfolioMarginProUserData => {
                Market::PortfolioMargin
            }
        }
    }

    #[must_use]
    pub const fn is_testnet(self) -> bool {
        matches!(
            self,
            Self::MainTestnetPublic
                | Self::MainTestnetUserData
                | Self::UsdmTestnet
                | Self::CoinmTestnet
                | Self::MainWsApiTestnet
                | Self::UsdmWsApiTestnet
        )
    }

    /// Whether `operation` may be sent on this key.
    #[must_use]
    pub fn supports(self, operation: Operation) -> bool {
        match operation.scope() {
            Scope::Stream => !self.is_ws_api(),
            Scope::WsApi => self.is_ws_api(),
            Scope::Spot => self.is_ws_api() && self.market() == Market::Spot,
            Scope::Futures => self.is_ws_api() && self.market() == Market::UsdM,
        }
    }

    /// Like [`WsKey::supports`], but returns the error the engine reports to callers.
    pub fn check(self, operation: Operation) -> Result<(), WsError> {
        if self.supports(operation) {
            Ok(())
        } else {
            Err(WsError::UnsupportedOperationForConnection {
                key: self,
                operation,
            })
        }
    }
}

impl FromStr for WsKey {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|key| key.as_str() == s)
            .ok_or_else(|| Error::validation(format!("unknown connection key: {s}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_through_from_str() {
        for key in WsKey::ALL {
            let parsed: WsKey = key.to_string().parse().expect("known key");
            assert_eq!(parsed, *key, "{key} should parse back to itself");
        }
    }

    #[test]
    fn unknown_name_is_rejected() {
        let err = "mainWsApi".parse::<WsKey>().unwrap_err();

        assert_eq!(err.kind(), crate::error::Kind::Validation);
    }

    #[test]
    fn ws_api_keys_require_auth() {
        let ws_api: Vec<_> = WsKey::ALL.iter().filter(|key| key.is_ws_api()).collect();

        assert_eq!(ws_api.len(), 5);
        assert!(ws_api.iter().all(|key| key.requires_auth()), "all WS-API keys log in");
        assert!(!WsKey::Main.requires_auth(), "public streams never log in");
    }

    #[test]
    fn urls_are_valid() {
        for key in WsKey::ALL {
            let url = url::Url::parse(key.url()).expect("valid url");
            assert_eq!(url.scheme(), "wss", "{key} should use TLS");
        }
    }

    #[test]
    fn stream_commands_only_on_stream_keys() {
        assert!(WsKey::Main.supports(Operation::Subscribe));
        assert!(WsKey::Eoptions.supports(Operation::ListSubscriptions));
        assert!(!WsKey::MainWsApi.supports(Operation::Subscribe));
        assert!(!WsKey::Usdm.supports(Operation::AccountStatus));
    }

    #[test]
    fn market_specific_operations() {
        assert!(WsKey::MainWsApi.supports(Operation::AccountStatus));
        assert!(WsKey::UsdmWsApi.supports(Operation::AccountStatus));
        assert!(WsKey::MainWsApiTestnet.supports(Operation::MyTrades));
        assert!(!WsKey::UsdmWsApi.supports(Operation::MyTrades));
        assert!(WsKey::UsdmWsApi.supports(Operation::AccountBalanceV2));
        assert!(!WsKey::MainWsApi.supports(Operation::AccountBalance));
    }

    #[test]
    fn check_reports_key_and_operation() {
        let err = WsKey::Main.check(Operation::OrderPlace).unwrap_err();

        assert!(
            matches!(
                err,
                WsError::UnsupportedOperationForConnection {
                    key: WsKey::Main,
                    operation: Operation::OrderPlace
                }
            ),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn testnet_and_market_lookup() {
        assert!(WsKey::UsdmWsApiTestnet.is_testnet());
        assert!(!WsKey::UsdmWsApi.is_testnet());
        assert_eq!(WsKey::Coinm2.market(), Market::CoinM);
        assert_eq!(WsKey::PortfolioMarginProUserData.market(), Market::PortfolioMargin);
    }
}
