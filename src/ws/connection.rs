#![expect(
    clippy::module_name_repetitions,
    reason = "Connection types expose their domain in the name for clarity"
)]

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use async_stream::try_stream;
use async_trait::async_trait;
use backoff::ExponentialBackoff;
use backoff::backoff::Backoff as _;
use futures::{SinkExt as _, Stream, StreamExt as _};
use serde_json::Value;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc, watch};
use tokio::time::{interval, sleep, timeout};
use tokio_tungstenite::tungstenite::{Bytes, Message};
use tokio_util::sync::CancellationToken;

use super::config::Config;
use super::correlator::{self, Correlator, Origin, RequestId, Routing};
use super::error::WsError;
use super::key::WsKey;
use super::operation::Operation;
use super::rate_limit::{RateLimitSnapshot, RateLimitTracker};
use super::session::{SessionAuthenticator, SessionState};
use super::subscription::{self, SubscriptionLedger};
use super::traits::{BoxedSocket, Connector, Dispatcher};
use super::types::request::{RequestFrame, normalize_params};
use super::types::response::{InboundFrame, StreamMessage, WsApiResponse, parse_frame};
use crate::auth::Credentials;
use crate::now_millis;

/// Broadcast channel capacity for unsolicited messages.
const BROADCAST_CAPACITY: usize = 1024;

/// Connection state tracking.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Not connected
    Disconnected,
    /// Attempting to connect
    Connecting,
    /// Socket open, session not yet established
    Connected {
        /// When the socket was opened
        since: Instant,
    },
    /// Logging in with the configured credentials
    Authenticating,
    /// Accepting requests
    Ready {
        /// When the connection became ready
        since: Instant,
    },
    /// Waiting to retry after a failed or lost connection
    Reconnecting {
        /// Number of the upcoming attempt
        attempt: u32,
    },
    /// Close requested
    Closing,
    /// Closed by the caller; terminal
    Closed,
    /// Reconnection attempts exhausted; terminal until a manual reconnect
    Unavailable {
        /// Consecutive failed attempts
        attempts: u32,
    },
}

impl ConnectionState {
    #[must_use]
    pub const fn is_ready(self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    /// Check if the socket is currently open.
    #[must_use]
    pub const fn is_connected(self) -> bool {
        matches!(
            self,
            Self::Connected { .. } | Self::Authenticating | Self::Ready { .. }
        )
    }

    /// Whether the connection will not become ready without caller intervention.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closing | Self::Closed | Self::Unavailable { .. })
    }
}

/// Non-fatal notifications published by the engine.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    StateChanged { key: WsKey, state: ConnectionState },
    /// A session was established, either on connect or through an explicit login
    Authenticated { key: WsKey },
    /// The connection became ready again after having been lost
    Reconnected { key: WsKey },
    /// A topic could not be restored after a reconnect and was dropped from the ledger
    ResubscriptionFailed {
        key: WsKey,
        topic: String,
        reason: String,
    },
}

/// A serialized request waiting for the writer.
#[derive(Debug)]
struct Outbound {
    /// Physical connection the request was registered against
    epoch: u64,
    id: RequestId,
    text: String,
}

/// How a physical connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Outcome {
    Shutdown,
    Lost,
    Retry,
}

/// The per-key record shared between the connection task and callers.
struct Shared {
    key: WsKey,
    endpoint: String,
    config: Config,
    connector: Arc<dyn Connector>,
    state_tx: watch::Sender<ConnectionState>,
    sender_tx: mpsc::UnboundedSender<Outbound>,
    correlator: Mutex<Correlator>,
    session: SessionAuthenticator,
    rate_limits: RateLimitTracker,
    subscriptions: SubscriptionLedger,
    stream_tx: broadcast::Sender<StreamMessage>,
    events_tx: broadcast::Sender<EngineEvent>,
    /// Incremented for every physical connection
    epoch: AtomicU64,
    /// Last inbound frame of any kind
    last_activity: Mutex<Option<Instant>>,
    reconnect_attempts: AtomicU32,
    /// Bumped by every manual reconnect request
    retry: watch::Sender<u64>,
    shutdown: CancellationToken,
}

impl Shared {
    fn set_state(&self, state: ConnectionState) {
        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, ?state, "connection state changed");

        self.state_tx.send_replace(state);
        _ = self.events_tx.send(EngineEvent::StateChanged {
            key: self.key,
            state,
        });
    }

    fn publish(&self, event: EngineEvent) {
        _ = self.events_tx.send(event);
    }

    /// Registers, enqueues and awaits one request. Does not wait for readiness; callers that
    /// need a ready connection go through [`ConnectionManager::request`].
    async fn send(
        &self,
        origin: Origin,
        operation: Operation,
        params: Option<Value>,
    ) -> Result<WsApiResponse, WsError> {
        let params = normalize_params(operation, params, now_millis());
        let epoch = self.epoch.load(Ordering::SeqCst);
        let (id, rx) = correlator::lock(&self.correlator).register(origin, operation, epoch);

        let frame = RequestFrame {
            id: &id,
            method: operation.method(),
            params: params.as_ref(),
        };
        let text = match serde_json::to_string(&frame) {
            Ok(text) => text,
            Err(e) => {
                correlator::lock(&self.correlator).abandon(&id);
                return Err(WsError::MessageParse(e));
            }
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, id = %id, %operation, "sending request");

        let queued = self.sender_tx.send(Outbound {
            epoch,
            id: id.clone(),
            text,
        });
        if queued.is_err() {
            correlator::lock(&self.correlator)
                .fail(&id, WsError::ConnectionClosed { key: self.key });
        }

        correlator::settle(
            &self.correlator,
            self.key,
            id,
            rx,
            self.config.request_timeout,
        )
        .await
    }

    fn on_text(&self, text: &str) {
        match parse_frame(self.key, text) {
            Ok(InboundFrame::Response(frame)) => {
                if let Some(limits) = &frame.rate_limits {
                    self.rate_limits.record(limits.clone());
                }

                let routing = correlator::lock(&self.correlator).resolve(frame);
                if let Routing::Unmatched(frame) = routing {
                    #[cfg(feature = "tracing")]
                    tracing::debug!(key = %self.key, id = %frame.id, "response for unknown id");
                    #[cfg(not(feature = "tracing"))]
                    let _ = &frame;

                    if let Ok(value) = serde_json::from_str(text) {
                        _ = self.stream_tx.send(StreamMessage::from_value(self.key, value));
                    }
                }
            }
            Ok(InboundFrame::Stream(message)) => {
                _ = self.stream_tx.send(message);
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.key, %text, error = %e, "failed to parse WebSocket message");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
            }
        }
    }

    /// Fails everything tied to the connection that just ended.
    fn discard_connection(
        &self,
        epoch: u64,
        sender_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    ) {
        let mut correlator = correlator::lock(&self.correlator);
        let failed = correlator.fail_epoch(epoch, |key| WsError::ConnectionReset { key });
        while let Ok(outbound) = sender_rx.try_recv() {
            correlator.fail(&outbound.id, WsError::ConnectionReset { key: self.key });
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, failed, "failed requests of the lost connection");
        #[cfg(not(feature = "tracing"))]
        let _ = failed;
    }

    fn fail_everything<F>(&self, sender_rx: &mut mpsc::UnboundedReceiver<Outbound>, error: F)
    where
        F: Fn(WsKey) -> WsError,
    {
        let mut correlator = correlator::lock(&self.correlator);
        correlator.fail_all(&error);
        while let Ok(outbound) = sender_rx.try_recv() {
            correlator.fail(&outbound.id, error(self.key));
        }
    }
}

#[async_trait]
impl Dispatcher for Shared {
    async fn dispatch(
        &self,
        operation: Operation,
        params: Option<Value>,
    ) -> Result<WsApiResponse, WsError> {
        self.send(Origin::Engine, operation, params).await
    }
}

/// Sends on behalf of the caller, drawing from the caller-visible id sequence.
struct CallerDispatcher<'conn>(&'conn Shared);

#[async_trait]
impl Dispatcher for CallerDispatcher<'_> {
    async fn dispatch(
        &self,
        operation: Operation,
        params: Option<Value>,
    ) -> Result<WsApiResponse, WsError> {
        self.0.send(Origin::Caller, operation, params).await
    }
}

/// Owns one logical connection: its socket, session, pending requests, rate limits and
/// subscriptions.
///
/// A background task keeps the socket alive, answers for heartbeats and reconnects with
/// exponential backoff. Every write goes through a single FIFO queue, so requests reach the
/// wire in submission order. Requests in flight when the socket drops fail with
/// [`WsError::ConnectionReset`] and are never replayed.
#[derive(Clone)]
pub struct ConnectionManager {
    shared: Arc<Shared>,
}

impl ConnectionManager {
    /// Create a new connection manager and start the connection loop.
    pub(crate) fn new(
        key: WsKey,
        config: &Config,
        credentials: Option<Credentials>,
        connector: Arc<dyn Connector>,
        events_tx: broadcast::Sender<EngineEvent>,
    ) -> Self {
        let (sender_tx, sender_rx) = mpsc::unbounded_channel();
        let (stream_tx, _) = broadcast::channel(BROADCAST_CAPACITY);
        let (state_tx, _) = watch::channel(ConnectionState::Disconnected);
        let (retry, _) = watch::channel(0_u64);

        let shared = Arc::new(Shared {
            key,
            endpoint: config.endpoint(key),
            config: config.clone(),
            connector,
            state_tx,
            sender_tx,
            correlator: Mutex::new(Correlator::new(key, config.dedup_ttl)),
            session: SessionAuthenticator::new(key, credentials, config.verify_session),
            rate_limits: RateLimitTracker::new(),
            subscriptions: SubscriptionLedger::new(key),
            stream_tx,
            events_tx,
            epoch: AtomicU64::new(0),
            last_activity: Mutex::new(None),
            reconnect_attempts: AtomicU32::new(0),
            retry,
            shutdown: CancellationToken::new(),
        });

        tokio::spawn(connection_loop(Arc::clone(&shared), sender_rx));

        Self { shared }
    }

    #[must_use]
    pub fn key(&self) -> WsKey {
        self.shared.key
    }

    /// Get the current connection state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        *self.shared.state_tx.borrow()
    }

    /// Subscribe to connection state changes.
    #[must_use]
    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    #[must_use]
    pub fn session_state(&self) -> SessionState {
        self.shared.session.state()
    }

    /// Consecutive failed connection attempts since the connection was last ready.
    #[must_use]
    pub fn reconnect_attempts(&self) -> u32 {
        self.shared.reconnect_attempts.load(Ordering::SeqCst)
    }

    /// When the last frame of any kind arrived, `None` before the first one.
    #[must_use]
    pub fn last_activity(&self) -> Option<Instant> {
        *self
            .shared
            .last_activity
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Number of physical connections opened so far.
    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.shared.epoch.load(Ordering::SeqCst)
    }

    /// Requests sent on this connection that are still waiting for a response.
    #[must_use]
    pub fn pending_requests(&self) -> usize {
        correlator::lock(&self.shared.correlator).pending_len()
    }

    #[must_use]
    pub fn rate_limits(&self) -> Option<RateLimitSnapshot> {
        self.shared.rate_limits.snapshot()
    }

    #[must_use]
    pub fn subscriptions(&self) -> BTreeSet<String> {
        self.shared.subscriptions.topics()
    }

    /// Waits until the connection is ready, or fails if it is closed or unavailable.
    pub async fn ensure_connected(&self) -> Result<(), WsError> {
        let key = self.shared.key;
        let mut state_rx = self.shared.state_tx.subscribe();
        let state = *state_rx
            .wait_for(|state| state.is_ready() || state.is_terminal())
            .await
            .map_err(|_e| WsError::ConnectionClosed { key })?;

        match state {
            ConnectionState::Unavailable { attempts } => {
                Err(WsError::ConnectionUnavailable { key, attempts })
            }
            ConnectionState::Ready { .. } => Ok(()),
            _ => Err(WsError::ConnectionClosed { key }),
        }
    }

    /// Sends `operation` once the connection is ready and waits for its response.
    pub async fn request(
        &self,
        operation: Operation,
        params: Option<Value>,
    ) -> Result<WsApiResponse, WsError> {
        self.ensure_connected().await?;
        self.shared.session.require_authenticated(operation)?;

        self.shared.send(Origin::Caller, operation, params).await
    }

    pub async fn subscribe(&self, topics: Vec<String>) -> Result<WsApiResponse, WsError> {
        subscription::validate(&topics)?;
        self.ensure_connected().await?;
        self.shared
            .subscriptions
            .subscribe(&CallerDispatcher(&self.shared), topics)
            .await
    }

    pub async fn unsubscribe(&self, topics: Vec<String>) -> Result<WsApiResponse, WsError> {
        subscription::validate(&topics)?;
        self.ensure_connected().await?;
        self.shared
            .subscriptions
            .unsubscribe(&CallerDispatcher(&self.shared), topics)
            .await
    }

    /// Re-runs the login handshake on the current connection.
    pub async fn login(&self) -> Result<(), WsError> {
        self.ensure_connected().await?;
        self.shared.session.authenticate(self.shared.as_ref()).await?;
        self.shared.publish(EngineEvent::Authenticated {
            key: self.shared.key,
        });
        Ok(())
    }

    /// Sends `session.logout` and forgets the session once it is acknowledged.
    pub async fn logout(&self) -> Result<WsApiResponse, WsError> {
        let response = self.request(Operation::SessionLogout, None).await?;
        self.shared.session.on_logout();
        Ok(response)
    }

    /// Every unsolicited message received on this connection.
    pub fn stream(&self) -> impl Stream<Item = Result<StreamMessage, WsError>> + use<> {
        let mut rx = self.shared.stream_tx.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => yield message,
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!("stream lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Unsolicited messages of one combined-stream topic.
    pub fn topic_stream(
        &self,
        topic: String,
    ) -> impl Stream<Item = Result<StreamMessage, WsError>> + use<> {
        let mut rx = self.shared.stream_tx.subscribe();

        try_stream! {
            loop {
                match rx.recv().await {
                    Ok(message) => {
                        if message.topic.as_deref() == Some(topic.as_str()) {
                            yield message;
                        }
                    }
                    Err(RecvError::Lagged(n)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(%topic, "stream lagged, missed {n} messages");
                        Err(WsError::Lagged { count: n })?;
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    /// Forces a fresh connection. Clears an `Unavailable` state and restarts the attempt count.
    ///
    /// Requests made while a socket is being opened are satisfied by that socket.
    pub fn reconnect(&self) {
        self.shared
            .retry
            .send_modify(|requests| *requests = requests.wrapping_add(1));
    }

    /// Closes the connection, failing outstanding requests with [`WsError::ConnectionClosed`].
    pub async fn close(&self) {
        if !matches!(self.state(), ConnectionState::Closed) {
            self.shared.set_state(ConnectionState::Closing);
        }
        self.shared.shutdown.cancel();

        let mut state_rx = self.shared.state_tx.subscribe();
        _ = state_rx
            .wait_for(|state| matches!(state, ConnectionState::Closed))
            .await;
    }

    /// Stops the background task without waiting for it.
    pub(crate) fn shutdown(&self) {
        self.shared.shutdown.cancel();
    }
}

/// Main connection loop with automatic reconnection.
async fn connection_loop(shared: Arc<Shared>, mut sender_rx: mpsc::UnboundedReceiver<Outbound>) {
    let mut backoff: ExponentialBackoff = shared.config.reconnect.clone().into();
    let mut failures = 0_u32;
    let mut was_ready = false;
    let mut retry_rx = shared.retry.subscribe();

    loop {
        shared.set_state(ConnectionState::Connecting);

        let connected = tokio::select! {
            () = shared.shutdown.cancelled() => break,
            result = shared.connector.connect(&shared.endpoint) => result,
        };

        match connected {
            Ok(socket) => {
                drop(retry_rx.borrow_and_update());
                let epoch = shared.epoch.fetch_add(1, Ordering::SeqCst) + 1;
                shared.set_state(ConnectionState::Connected {
                    since: Instant::now(),
                });

                let (outcome, ready) = handle_connection(
                    &shared,
                    socket,
                    &mut sender_rx,
                    &mut retry_rx,
                    epoch,
                    was_ready,
                )
                .await;
                shared.session.reset();

                if outcome == Outcome::Shutdown {
                    break;
                }
                shared.discard_connection(epoch, &mut sender_rx);

                if ready || outcome == Outcome::Retry {
                    was_ready |= ready;
                    failures = 0;
                    backoff.reset();
                } else {
                    failures = failures.saturating_add(1);
                }
            }
            Err(e) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %shared.key, error = %e, "unable to connect");
                #[cfg(not(feature = "tracing"))]
                let _ = &e;
                failures = failures.saturating_add(1);
            }
        }

        shared.reconnect_attempts.store(failures, Ordering::SeqCst);
        shared.set_state(ConnectionState::Disconnected);

        if let Some(max) = shared.config.reconnect.max_attempts
            && failures >= max
        {
            #[cfg(feature = "tracing")]
            tracing::error!(key = %shared.key, attempts = failures, "connection unavailable");

            drop(retry_rx.borrow_and_update());
            shared.set_state(ConnectionState::Unavailable { attempts: failures });
            shared.fail_everything(&mut sender_rx, |key| WsError::ConnectionUnavailable {
                key,
                attempts: failures,
            });

            tokio::select! {
                () = shared.shutdown.cancelled() => break,
                Ok(()) = retry_rx.changed() => {
                    failures = 0;
                    backoff.reset();
                    continue;
                }
            }
        }

        shared.set_state(ConnectionState::Reconnecting {
            attempt: failures.saturating_add(1),
        });

        if let Some(delay) = backoff.next_backoff() {
            tokio::select! {
                () = shared.shutdown.cancelled() => break,
                Ok(()) = retry_rx.changed() => {}
                () = sleep(delay) => {}
            }
        }
    }

    sender_rx.close();
    shared.fail_everything(&mut sender_rx, |key| WsError::ConnectionClosed { key });
    shared.session.reset();
    shared.set_state(ConnectionState::Closed);
}

/// Handle an active WebSocket connection until it ends. Returns how it ended and whether it
/// ever became ready.
async fn handle_connection(
    shared: &Arc<Shared>,
    socket: BoxedSocket,
    sender_rx: &mut mpsc::UnboundedReceiver<Outbound>,
    retry_rx: &mut watch::Receiver<u64>,
    epoch: u64,
    reconnecting: bool,
) -> (Outcome, bool) {
    let (mut write, mut read) = socket.split();

    // Channel to notify heartbeat loop of inbound traffic
    let (activity_tx, activity_rx) = watch::channel(Instant::now());
    let (ping_tx, mut ping_rx) = mpsc::unbounded_channel();

    let mut heartbeat = tokio::spawn(heartbeat_loop(
        ping_tx,
        activity_rx,
        shared.config.heartbeat_interval,
        shared.config.heartbeat_timeout,
    ));
    let mut bring_up = tokio::spawn(bring_up(Arc::clone(shared), epoch, reconnecting));
    let mut bring_up_done = false;
    let mut ready = false;

    let outcome = loop {
        tokio::select! {
            () = shared.shutdown.cancelled() => {
                _ = write.send(Message::Close(None)).await;
                break Outcome::Shutdown;
            }

            Ok(()) = retry_rx.changed() => {
                _ = write.send(Message::Close(None)).await;
                break Outcome::Retry;
            }

            msg = read.next() => {
                match msg {
                    Some(Ok(message)) => {
                        let now = Instant::now();
                        _ = activity_tx.send(now);
                        *shared
                            .last_activity
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner) = Some(now);
                        match message {
                            Message::Text(text) => {
                                #[cfg(feature = "tracing")]
                                tracing::trace!(key = %shared.key, %text, "Received WebSocket text message");
                                shared.on_text(text.as_str());
                            }
                            Message::Ping(_) => {
                                // the pong reply is queued by tungstenite and written on flush
                                if write.flush().await.is_err() {
                                    break Outcome::Lost;
                                }
                            }
                            Message::Close(_) => break Outcome::Lost,
                            _ => {
                                // Ignore binary frames and pong replies beyond the activity mark.
                            }
                        }
                    }
                    Some(Err(e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(key = %shared.key, error = %e, "WebSocket read failed");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                        break Outcome::Lost;
                    }
                    None => break Outcome::Lost,
                }
            }

            Some(outbound) = sender_rx.recv() => {
                if outbound.epoch != epoch {
                    correlator::lock(&shared.correlator)
                        .fail(&outbound.id, WsError::ConnectionReset { key: shared.key });
                    continue;
                }
                if write.send(Message::Text(outbound.text.into())).await.is_err() {
                    correlator::lock(&shared.correlator)
                        .fail(&outbound.id, WsError::ConnectionReset { key: shared.key });
                    break Outcome::Lost;
                }
            }

            Some(()) = ping_rx.recv() => {
                if write.send(Message::Ping(Bytes::new())).await.is_err() {
                    break Outcome::Lost;
                }
            }

            _ = &mut heartbeat => {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %shared.key, "heartbeat timeout");
                break Outcome::Lost;
            }

            result = &mut bring_up, if !bring_up_done => {
                bring_up_done = true;
                match result {
                    Ok(Ok(())) => ready = true,
                    Ok(Err(e)) => {
                        #[cfg(feature = "tracing")]
                        tracing::warn!(key = %shared.key, error = %e, "connection setup failed");
                        #[cfg(not(feature = "tracing"))]
                        let _ = &e;
                        _ = write.send(Message::Close(None)).await;
                        break Outcome::Lost;
                    }
                    Err(_join) => break Outcome::Lost,
                }
            }
        }
    };

    // Cleanup
    heartbeat.abort();
    bring_up.abort();
    if !bring_up_done {
        // the task may be mid-poll on another worker; it must not outlive this connection
        _ = bring_up.await;
    }

    (outcome, ready)
}

/// Logs in when required, restores subscriptions and marks the connection ready.
async fn bring_up(shared: Arc<Shared>, epoch: u64, reconnecting: bool) -> Result<(), WsError> {
    let key = shared.key;

    if key.requires_auth() && shared.session.has_credentials() {
        shared.set_state(ConnectionState::Authenticating);
        shared.session.authenticate(shared.as_ref()).await?;
        shared.publish(EngineEvent::Authenticated { key });
    }

    for failure in shared.subscriptions.resubscribe_all(shared.as_ref()).await {
        if let WsError::ResubscriptionFailed { key, topic, reason } = failure {
            shared.publish(EngineEvent::ResubscriptionFailed { key, topic, reason });
        }
    }

    if shared.epoch.load(Ordering::SeqCst) != epoch {
        return Err(WsError::ConnectionReset { key });
    }
    shared.set_state(ConnectionState::Ready {
        since: Instant::now(),
    });
    if reconnecting {
        shared.publish(EngineEvent::Reconnected { key });
    }

    Ok(())
}

/// Sends a PING every interval and gives up when nothing arrives within the timeout.
async fn heartbeat_loop(
    ping_tx: mpsc::UnboundedSender<()>,
    mut activity_rx: watch::Receiver<Instant>,
    heartbeat_interval: Duration,
    heartbeat_timeout: Duration,
) {
    let mut ping_interval = interval(heartbeat_interval);
    // first tick completes immediately
    ping_interval.tick().await;

    loop {
        ping_interval.tick().await;

        // Mark current activity as seen before sending PING
        drop(activity_rx.borrow_and_update());

        if ping_tx.send(()).is_err() {
            // Message loop has terminated
            return;
        }

        match timeout(heartbeat_timeout, activity_rx.changed()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => return,
            Err(_) => {
                #[cfg(feature = "tracing")]
                tracing::warn!(
                    "Heartbeat timeout: no frame received within {:?}",
                    heartbeat_timeout
                );
                return;
            }
        }
    }
}
