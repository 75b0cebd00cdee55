//! The closed registry of operations the engine can send.

use phf::phf_map;
use serde::Serialize;
use serde::de::DeserializeOwned;
use strum_macros::{Display, IntoStaticStr};

/// Which connection family accepts an operation.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Scope {
    /// Stream-control commands, accepted by stream endpoints only
    Stream,
    /// Accepted by every WS-API endpoint
    WsApi,
    /// Spot WS-API endpoints only
    Spot,
    /// USD-M futures WS-API endpoints only
    Futures,
}

/// An operation, identified on the wire by its method name.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Display, IntoStaticStr, PartialEq, Eq, Hash)]
pub enum Operation {
    #[strum(serialize = "SUBSCRIBE")]
    Subscribe,
    #[strum(serialize = "UNSUBSCRIBE")]
    Unsubscribe,
    #[strum(serialize = "LIST_SUBSCRIPTIONS")]
    ListSubscriptions,
    #[strum(serialize = "SET_PROPERTY")]
    SetProperty,
    #[strum(serialize = "GET_PROPERTY")]
    GetProperty,

    #[strum(serialize = "session.logon")]
    SessionLogon,
    #[strum(serialize = "session.status")]
    SessionStatus,
    #[strum(serialize = "session.logout")]
    SessionLogout,

    #[strum(serialize = "ping")]
    Ping,
    #[strum(serialize = "time")]
    Time,
    #[strum(serialize = "exchangeInfo")]
    ExchangeInfo,

    #[strum(serialize = "depth")]
    Depth,
    #[strum(serialize = "trades.recent")]
    TradesRecent,
    #[strum(serialize = "trades.historical")]
    TradesHistorical,
    #[strum(serialize = "trades.aggregate")]
    TradesAggregate,
    #[strum(serialize = "klines")]
    Klines,
    #[strum(serialize = "uiKlines")]
    UiKlines,
    #[strum(serialize = "avgPrice")]
    AvgPrice,
    #[strum(serialize = "ticker.24hr")]
    Ticker24hr,
    #[strum(serialize = "ticker.tradingDay")]
    TickerTradingDay,
    #[strum(serialize = "ticker")]
    Ticker,
    #[strum(serialize = "ticker.price")]
    TickerPrice,
    #[strum(serialize = "ticker.book")]
    TickerBook,

    #[strum(serialize = "account.status")]
    AccountStatus,
    #[strum(serialize = "account.commission")]
    AccountCommission,
    #[strum(serialize = "account.rateLimits.orders")]
    AccountRateLimitsOrders,
    #[strum(serialize = "allOrders")]
    AllOrders,
    #[strum(serialize = "allOrderLists")]
    AllOrderLists,
    #[strum(serialize = "myTrades")]
    MyTrades,
    #[strum(serialize = "myPreventedMatches")]
    MyPreventedMatches,
    #[strum(serialize = "myAllocations")]
    MyAllocations,

    #[strum(serialize = "v2/account.balance")]
    AccountBalanceV2,
    #[strum(serialize = "account.balance")]
    AccountBalance,
    #[strum(serialize = "v2/account.status")]
    AccountStatusV2,

    #[strum(serialize = "order.place")]
    OrderPlace,
    #[strum(serialize = "orderList.place")]
    OrderListPlace,
    #[strum(serialize = "sor.order.place")]
    SorOrderPlace,
}

static BY_METHOD: phf::Map<&'static str, Operation> = phf_map! {
    "SUBSCRIBE" => Operation::Subscribe,
    "UNSUBSCRIBE" => Operation::Unsubscribe,
    "LIST_SUBSCRIPTIONS" => Operation::ListSubscriptions,
    "SET_PROPERTY" => Operation::SetProperty,
    "GET_PROPERTY" => Operation::GetProperty,
    "session.logon" => Operation::SessionLogon,
    "session.status" => Operation::SessionStatus,
    "session.logout" => Operation::SessionLogout,
    "ping" => Operation::Ping,
    "time" => Operation::Time,
    "exchangeInfo" => Operation::ExchangeInfo,
    "depth" => Operation::Depth,
    "trades.recent" => Operation::TradesRecent,
    "trades.historical" => Operation::TradesHistorical,
    "trades.aggregate" => Operation::TradesAggregate,
    "klines" => Operation::Klines,
    "uiKlines" => Operation::UiKlines,
    "avgPrice" => Operation::AvgPrice,
    "ticker.24hr" => Operation::Ticker24hr,
    "ticker.tradingDay" => Operation::TickerTradingDay,
    "ticker" => Operation::Ticker,
    "ticker.price" => Operation::TickerPrice,
    "ticker.book" => Operation::TickerBook,
    "account.status" => Operation::AccountStatus,
    "account.commission" => Operation::AccountCommission,
    "account.rateLimits.orders" => Operation::AccountRateLimitsOrders,
    "allOrders" => Operation::AllOrders,
    "allOrderLists" => Operation::AllOrderLists,
    "myTrades" => Operation::MyTrades,
    "myPreventedMatches" => Operation::MyPreventedMatches,
    "myAllocations" => Operation::MyAllocations,
    "v2/account.balance" => Operation::AccountBalanceV2,
    "account.balance" => Operation::AccountBalance,
    "v2/account.status" => Operation::AccountStatusV2,
    "order.place" => Operation::OrderPlace,
    "orderList.place" => Operation::OrderListPlace,
    "sor.order.place" => Operation::SorOrderPlace,
};

impl Operation {
    /// Looks an operation up by its wire method name.
    #[must_use]
    pub fn from_method(method: &str) -> Option<Self> {
        BY_METHOD.get(method).copied()
    }

    /// Wire method name, e.g. `"account.status"`.
    #[must_use]
    pub fn method(self) -> &'static str {
        self.into()
    }

    /// Whether the operation needs an authenticated session.
    #[must_use]
    pub const fn requires_auth(self) -> bool {
        matches!(
            self,
            Self::AccountStatus
                | Self::AccountCommission
                | Self::AccountRateLimitsOrders
                | Self::AllOrders
                | Self::AllOrderLists
                | Self::MyTrades
                | Self::MyPreventedMatches
                | Self::MyAllocations
                | Self::AccountBalanceV2
                | Self::AccountBalance
                | Self::AccountStatusV2
                | Self::OrderPlace
                | Self::OrderListPlace
                | Self::SorOrderPlace
        )
    }

    /// Operations only the engine itself may send.
    ///
    /// Callers log in through [`crate::Client::login`], which signs the payload.
    #[must_use]
    pub const fn is_reserved(self) -> bool {
        matches!(self, Self::SessionLogon)
    }

    #[must_use]
    pub const fn is_stream_control(self) -> bool {
        matches!(self.scope(), Scope::Stream)
    }

    #[must_use]
    pub const fn scope(self) -> Scope {
        match self {
            Self::Subscribe
            | Self::Unsubscribe
            | Self::ListSubscriptions
            | Self::SetProperty
            | Self::GetProperty => Scope::Stream,
            Self::SessionLogon
            | Self::SessionStatus
            | Self::SessionLogout
            | Self::Depth
            | Self::TickerPrice
            | Self::TickerBook
            | Self::AccountStatus
            | Self::OrderPlace => Scope::WsApi,
            Self::AccountBalanceV2 | Self::AccountBalance | Self::AccountStatusV2 => {
                Scope::Futures
            }
            Self::Ping
            | Self::Time
            | Self::ExchangeInfo
            | Self::TradesRecent
            | Self::TradesHistorical
            | Self::TradesAggregate
            | Self::Klines
            | Self::UiKlines
            | Self::AvgPrice
            | Self::Ticker24hr
            | Self::TickerTradingDay
            | Self::Ticker
            | Self::AccountCommission
            | Self::AccountRateLimitsOrders
            | Self::AllOrders
            | Self::AllOrderLists
            | Self::MyTrades
            | Self::MyPreventedMatches
            | Self::MyAllocations
            | Self::OrderListPlace
            | Self::SorOrderPlace => Scope::Spot,
        }
    }

    pub fn all() -> impl Iterator<Item = Operation> {
        BY_METHOD.values().copied()
    }
}

/// A typed parameter struct bound to the operation it is sent as and the result it decodes to.
///
/// ```ignore
/// let time = client.send(WsKey::MainWsApi, &TimeRequest::default()).await?;
/// println!("{}", time.result.server_time);
/// ```
pub trait WsApiRequest: Serialize + Send + Sync {
    const OPERATION: Operation;

    type Response: DeserializeOwned;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_operation_round_trips_through_method() {
        let mut count = 0;
        for operation in Operation::all() {
            count += 1;
            assert_eq!(
                Operation::from_method(operation.method()),
                Some(operation),
                "{operation} should map back to itself"
            );
        }
        assert_eq!(count, 37);
    }

    #[test]
    fn unknown_method_is_none() {
        assert_eq!(Operation::from_method("session.login"), None);
        assert_eq!(Operation::from_method("subscribe"), None);
    }

    #[test]
    fn account_operations_require_auth() {
        assert!(Operation::AccountStatus.requires_auth());
        assert!(Operation::OrderPlace.requires_auth());
        assert!(Operation::AccountBalanceV2.requires_auth());
        assert!(!Operation::Time.requires_auth());
        assert!(!Operation::SessionStatus.requires_auth());
        assert!(!Operation::Subscribe.requires_auth());
    }

    #[test]
    fn only_logon_is_reserved() {
        let reserved: Vec<_> = Operation::all().filter(|op| op.is_reserved()).collect();

        assert_eq!(reserved, vec![Operation::SessionLogon]);
    }

    #[test]
    fn display_is_wire_name() {
        assert_eq!(Operation::Ticker24hr.to_string(), "ticker.24hr");
        assert_eq!(Operation::ListSubscriptions.method(), "LIST_SUBSCRIPTIONS");
    }
}
