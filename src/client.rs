use std::collections::BTreeSet;
use std::sync::Arc;

use dashmap::DashMap;
use futures::Stream;
use serde_json::Value;
use tokio::sync::broadcast;

use crate::Result;
use crate::auth::Credentials;
use crate::error::{Error, Synchronization};
use crate::ws::config::Config;
use crate::ws::connection::{ConnectionManager, ConnectionState, EngineEvent};
use crate::ws::error::WsError;
use crate::ws::key::WsKey;
use crate::ws::operation::{Operation, WsApiRequest};
use crate::ws::rate_limit::RateLimitSnapshot;
use crate::ws::session::SessionState;
use crate::ws::subscription;
use crate::ws::traits::{Connector, TungsteniteConnector};
use crate::ws::types::request::SessionStatusRequest;
use crate::ws::types::response::{SessionStatus, StreamMessage, WsApiResponse};

const EVENTS_CAPACITY: usize = 256;

/// Multi-connection WS-API client.
///
/// Connections are opened lazily, one per [`WsKey`], the first time an operation targets that
/// key. Each connection logs in on its own when credentials are configured and the key
/// requires it, and restores its subscriptions after a reconnect.
///
/// # Examples
///
/// ```rust, no_run
/// use binance_ws_api::Client;
/// use binance_ws_api::auth::Credentials;
/// use binance_ws_api::ws::WsKey;
/// use binance_ws_api::ws::types::request::AccountStatusRequest;
///
/// #[tokio::main]
/// async fn main() -> anyhow::Result<()> {
///     let client = Client::default().authenticate(Credentials::from_env()?)?;
///
///     let account = client
///         .send(WsKey::MainWsApi, &AccountStatusRequest::default())
///         .await?;
///     println!("{:?}", account.result);
///
///     if let Some(limits) = client.rate_limits(WsKey::MainWsApi) {
///         println!("{:?}", limits.limits);
///     }
///
///     Ok(())
/// }
/// ```
#[derive(Clone)]
pub struct Client {
    inner: Arc<ClientInner>,
}

impl Default for Client {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

struct ClientInner {
    config: Config,
    credentials: Option<Credentials>,
    connector: Arc<dyn Connector>,
    /// One connection per key (lazily initialized)
    connections: DashMap<WsKey, ConnectionManager>,
    events_tx: broadcast::Sender<EngineEvent>,
}

impl Drop for ClientInner {
    fn drop(&mut self) {
        for entry in &self.connections {
            entry.value().shutdown();
        }
    }
}

impl Client {
    /// Create a new client without credentials.
    ///
    /// Public market data is available right away; account and trading operations need
    /// [`Client::authenticate`].
    #[must_use]
    pub fn new(config: Config) -> Self {
        let (events_tx, _) = broadcast::channel(EVENTS_CAPACITY);

        Self {
            inner: Arc::new(ClientInner {
                config,
                credentials: None,
                connector: Arc::new(TungsteniteConnector),
                connections: DashMap::new(),
                events_tx,
            }),
        }
    }

    /// Attach credentials used to log in on keys that require a session.
    ///
    /// Returns an error if there are other references to this client (e.g., from clones).
    pub fn authenticate(self, credentials: Credentials) -> Result<Self> {
        self.reconfigure(|inner| inner.credentials = Some(credentials))
    }

    /// Replace the transport used to open sockets.
    ///
    /// Returns an error if there are other references to this client (e.g., from clones).
    pub fn with_connector<C: Connector>(self, connector: C) -> Result<Self> {
        self.reconfigure(|inner| inner.connector = Arc::new(connector))
    }

    fn reconfigure<F>(self, apply: F) -> Result<Self>
    where
        F: FnOnce(&mut ClientInner),
    {
        let mut inner = Arc::into_inner(self.inner).ok_or(Synchronization)?;
        // connections opened so far carry the previous settings
        for entry in &inner.connections {
            entry.value().shutdown();
        }
        inner.connections.clear();
        apply(&mut inner);

        Ok(Self {
            inner: Arc::new(inner),
        })
    }

    #[must_use]
    pub fn config(&self) -> &Config {
        &self.inner.config
    }

    #[must_use]
    pub fn has_credentials(&self) -> bool {
        self.inner.credentials.is_some()
    }

    /// Engine notifications: state changes, logins, reconnects and dropped topics.
    #[must_use]
    pub fn events(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events_tx.subscribe()
    }

    /// Sends `operation` with opaque parameters and returns the opaque result.
    ///
    /// Operations not accepted by `key` and authenticated operations without credentials
    /// fail before any connection is opened.
    pub async fn request(
        &self,
        key: WsKey,
        operation: Operation,
        params: Option<Value>,
    ) -> Result<WsApiResponse> {
        self.preflight(key, operation)?;
        let connection = self.inner.connection(key);

        Ok(connection.request(operation, params).await?)
    }

    /// Sends a typed request and decodes its result.
    pub async fn send<R: WsApiRequest>(
        &self,
        key: WsKey,
        request: &R,
    ) -> Result<WsApiResponse<R::Response>> {
        let params = serde_json::to_value(request)?;

        self.request(key, R::OPERATION, Some(params))
            .await?
            .decode()
    }

    /// Opens the connection for `key` if needed and waits until it is ready.
    pub async fn ensure_connected(&self, key: WsKey) -> Result<()> {
        Ok(self.inner.connection(key).ensure_connected().await?)
    }

    /// Logs in on `key` again, e.g. after [`Client::logout`].
    pub async fn login(&self, key: WsKey) -> Result<()> {
        key.check(Operation::SessionLogon)?;
        if !self.has_credentials() {
            return Err(WsError::NotAuthenticated { key }.into());
        }

        Ok(self.inner.connection(key).login().await?)
    }

    /// Ends the session on `key`. The socket stays open for public operations.
    pub async fn logout(&self, key: WsKey) -> Result<WsApiResponse> {
        key.check(Operation::SessionLogout)?;

        Ok(self.inner.connection(key).logout().await?)
    }

    /// The exchange's view of the session on `key`.
    pub async fn session_status(&self, key: WsKey) -> Result<WsApiResponse<SessionStatus>> {
        self.send(key, &SessionStatusRequest::default()).await
    }

    #[must_use]
    pub fn session_state(&self, key: WsKey) -> SessionState {
        self.inner
            .connections
            .get(&key)
            .map_or(SessionState::Unauthenticated, |connection| {
                connection.session_state()
            })
    }

    /// Subscribes `topics` on a stream key; the topics are restored after reconnects.
    pub async fn subscribe(&self, key: WsKey, topics: Vec<String>) -> Result<()> {
        self.preflight(key, Operation::Subscribe)?;
        subscription::validate(&topics)?;
        self.inner.connection(key).subscribe(topics).await?;

        Ok(())
    }

    pub async fn unsubscribe(&self, key: WsKey, topics: Vec<String>) -> Result<()> {
        self.preflight(key, Operation::Unsubscribe)?;
        subscription::validate(&topics)?;
        self.inner.connection(key).unsubscribe(topics).await?;

        Ok(())
    }

    /// Topics acknowledged on `key`, as tracked locally.
    #[must_use]
    pub fn subscriptions(&self, key: WsKey) -> BTreeSet<String> {
        self.inner
            .connections
            .get(&key)
            .map(|connection| connection.subscriptions())
            .unwrap_or_default()
    }

    /// Topics the exchange reports for `key` (`LIST_SUBSCRIPTIONS`).
    pub async fn list_subscriptions(&self, key: WsKey) -> Result<Vec<String>> {
        let response = self
            .request(key, Operation::ListSubscriptions, None)
            .await?
            .decode::<Vec<String>>()?;

        Ok(response.result)
    }

    /// Every unsolicited message on `key`. Opens the connection if needed.
    pub fn stream(&self, key: WsKey) -> impl Stream<Item = Result<StreamMessage>> + use<> {
        use futures::StreamExt as _;

        self.inner
            .connection(key)
            .stream()
            .map(|message| message.map_err(Error::from))
    }

    /// Unsolicited messages of one topic on `key`. Opens the connection if needed.
    pub fn topic_stream(
        &self,
        key: WsKey,
        topic: String,
    ) -> impl Stream<Item = Result<StreamMessage>> + use<> {
        use futures::StreamExt as _;

        self.inner
            .connection(key)
            .topic_stream(topic)
            .map(|message| message.map_err(Error::from))
    }

    /// Latest rate-limit usage reported on `key`.
    #[must_use]
    pub fn rate_limits(&self, key: WsKey) -> Option<RateLimitSnapshot> {
        self.inner
            .connections
            .get(&key)
            .and_then(|connection| connection.rate_limits())
    }

    #[must_use]
    pub fn connection_state(&self, key: WsKey) -> ConnectionState {
        self.inner
            .connections
            .get(&key)
            .map_or(ConnectionState::Disconnected, |connection| {
                connection.state()
            })
    }

    /// Handle to the connection for `key`, if one has been opened.
    #[must_use]
    pub fn connection_manager(&self, key: WsKey) -> Option<ConnectionManager> {
        self.inner
            .connections
            .get(&key)
            .map(|entry| entry.value().clone())
    }

    /// Requests on `key` still waiting for a response.
    #[must_use]
    pub fn pending_requests(&self, key: WsKey) -> usize {
        self.inner
            .connections
            .get(&key)
            .map_or(0, |connection| connection.pending_requests())
    }

    /// Consecutive failed connection attempts on `key` since it was last ready.
    #[must_use]
    pub fn reconnect_attempts(&self, key: WsKey) -> u32 {
        self.inner
            .connections
            .get(&key)
            .map_or(0, |connection| connection.reconnect_attempts())
    }

    /// Forces a fresh connection on `key`, also clearing an unavailable state.
    pub fn reconnect(&self, key: WsKey) {
        self.inner.connection(key).reconnect();
    }

    /// Closes the connection for `key`. A later operation on `key` opens a new one.
    pub async fn close(&self, key: WsKey) {
        let removed = self.inner.connections.remove(&key);
        if let Some((_, connection)) = removed {
            connection.close().await;
        }
    }

    pub async fn close_all(&self) {
        let keys: Vec<WsKey> = self
            .inner
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect();

        futures::future::join_all(keys.into_iter().map(|key| self.close(key))).await;
    }

    /// Local checks that must pass before a connection is opened.
    fn preflight(&self, key: WsKey, operation: Operation) -> Result<()> {
        key.check(operation)?;

        if operation.is_reserved() {
            return Err(Error::validation(format!(
                "{operation} is sent by the engine; use Client::login"
            )));
        }
        if operation.requires_auth() && !self.has_credentials() {
            return Err(WsError::NotAuthenticated { key }.into());
        }

        Ok(())
    }
}

impl ClientInner {
    /// Returns the connection for `key`, starting it on first use. The returned handle does
    /// not hold the map's lock.
    fn connection(&self, key: WsKey) -> ConnectionManager {
        self.connections
            .entry(key)
            .or_insert_with(|| {
                ConnectionManager::new(
                    key,
                    &self.config,
                    self.credentials.clone(),
                    Arc::clone(&self.connector),
                    self.events_tx.clone(),
                )
            })
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ws_error(error: &Error) -> &WsError {
        error.downcast_ref::<WsError>().expect("websocket error")
    }

    #[tokio::test]
    async fn unsupported_operation_opens_no_connection() {
        let client = Client::default();

        let err = client
            .request(WsKey::Main, Operation::AccountStatus, None)
            .await
            .unwrap_err();

        assert!(
            matches!(
                ws_error(&err),
                WsError::UnsupportedOperationForConnection {
                    key: WsKey::Main,
                    operation: Operation::AccountStatus
                }
            ),
            "unexpected error: {err}"
        );
        assert_eq!(client.connection_state(WsKey::Main), ConnectionState::Disconnected);
        assert!(client.inner.connections.is_empty(), "no connection may be opened");
    }

    #[tokio::test]
    async fn authenticated_operation_without_credentials_opens_no_connection() {
        let client = Client::default();

        let err = client
            .request(WsKey::MainWsApi, Operation::AccountStatus, None)
            .await
            .unwrap_err();

        assert!(
            matches!(ws_error(&err), WsError::NotAuthenticated { key: WsKey::MainWsApi }),
            "unexpected error: {err}"
        );
        assert!(client.inner.connections.is_empty(), "no connection may be opened");
    }

    #[tokio::test]
    async fn logon_is_reserved() {
        let client = Client::default()
            .authenticate(Credentials::new("k".to_owned(), "s".to_owned()))
            .expect("sole owner");

        let err = client
            .request(WsKey::MainWsApi, Operation::SessionLogon, None)
            .await
            .unwrap_err();

        assert_eq!(err.kind(), crate::error::Kind::Validation);
        assert!(client.inner.connections.is_empty(), "no connection may be opened");
    }

    #[tokio::test]
    async fn login_on_stream_key_is_unsupported() {
        let client = Client::default()
            .authenticate(Credentials::new("k".to_owned(), "s".to_owned()))
            .expect("sole owner");

        let err = client.login(WsKey::Usdm).await.unwrap_err();

        assert!(matches!(
            ws_error(&err),
            WsError::UnsupportedOperationForConnection { .. }
        ));
    }

    #[test]
    fn authenticate_fails_while_cloned() {
        let client = Client::default();
        let _clone = client.clone();

        let err = client
            .authenticate(Credentials::new("k".to_owned(), "s".to_owned()))
            .err()
            .expect("shared client cannot be reconfigured");

        assert_eq!(err.kind(), crate::error::Kind::Synchronization);
    }

    #[test]
    fn untouched_keys_report_defaults() {
        let client = Client::default();

        assert_eq!(client.session_state(WsKey::MainWsApi), SessionState::Unauthenticated);
        assert!(client.subscriptions(WsKey::Main).is_empty());
        assert!(client.rate_limits(WsKey::MainWsApi).is_none());
    }
}
