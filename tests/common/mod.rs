#![allow(
    clippy::unwrap_used,
    clippy::missing_panics_doc,
    reason = "Do not need additional syntax for setting up tests, and https://github.com/rust-lang/rust-clippy/issues/13981"
)]
#![allow(
    unused,
    reason = "Each test binary uses a different subset of the helpers"
)]

use std::collections::HashSet;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use binance_ws_api::Client;
use binance_ws_api::auth::Credentials;
use binance_ws_api::error::Error;
use binance_ws_api::ws::{Config, ConnectionState, EngineEvent, ReconnectConfig, WsError, WsKey};
use futures_util::{SinkExt as _, StreamExt as _};
use serde_json::{Value, json};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::time::timeout;
use tokio_tungstenite::WebSocketStream;
use tokio_tungstenite::tungstenite::Message;

pub const API_KEY: &str = "test-api-key";
pub const API_SECRET: &str = "test-api-secret";

/// Knobs shared by every connection the mock accepts.
#[derive(Default)]
struct Behavior {
    /// Drop incoming sockets before the WebSocket handshake
    refuse: AtomicBool,
    /// Topics whose SUBSCRIBE is answered with an error
    rejected_topics: Mutex<HashSet<String>>,
    /// Completed WebSocket handshakes
    connections: AtomicUsize,
    /// Leave `session.logon` unanswered
    hold_logons: AtomicBool,
}

/// Mock exchange endpoint.
///
/// Session methods and stream commands are answered automatically. Every other request (and
/// every stream command) is forwarded to the test, which answers through [`MockExchange::send`].
pub struct MockExchange {
    addr: SocketAddr,
    request_rx: mpsc::UnboundedReceiver<Value>,
    message_tx: broadcast::Sender<String>,
    drop_tx: broadcast::Sender<()>,
    mute_tx: broadcast::Sender<()>,
    behavior: Arc<Behavior>,
}

impl MockExchange {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (message_tx, _) = broadcast::channel::<String>(100);
        let (drop_tx, _) = broadcast::channel::<()>(4);
        let (mute_tx, _) = broadcast::channel::<()>(4);
        let (request_tx, request_rx) = mpsc::unbounded_channel::<Value>();
        let behavior = Arc::new(Behavior::default());

        let broadcast_tx = message_tx.clone();
        let drop_signal = drop_tx.clone();
        let mute_signal = mute_tx.clone();
        let shared = Arc::clone(&behavior);

        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    break;
                };

                if shared.refuse.load(Ordering::SeqCst) {
                    drop(stream);
                    continue;
                }

                let Ok(ws_stream) = tokio_tungstenite::accept_async(stream).await else {
                    continue;
                };
                shared.connections.fetch_add(1, Ordering::SeqCst);

                tokio::spawn(serve(
                    ws_stream,
                    request_tx.clone(),
                    broadcast_tx.subscribe(),
                    drop_signal.subscribe(),
                    mute_signal.subscribe(),
                    Arc::clone(&shared),
                ));
            }
        });

        Self {
            addr,
            request_rx,
            message_tx,
            drop_tx,
            mute_tx,
            behavior,
        }
    }

    pub fn ws_url(&self) -> String {
        format!("ws://{}", self.addr)
    }

    /// Pushes a raw frame to every open connection.
    pub fn send(&self, message: &Value) {
        drop(self.message_tx.send(message.to_string()));
    }

    /// Answers request `id` with a 200 and `result`.
    pub fn reply(&self, id: &str, result: Value) {
        self.send(&json!({ "id": id, "status": 200, "result": result }));
    }

    /// Closes every open connection without a closing handshake.
    pub fn drop_connections(&self) {
        drop(self.drop_tx.send(()));
    }

    /// Stops reading and writing on every open connection while keeping the sockets open, so
    /// pings go unanswered.
    pub fn mute_connections(&self) {
        drop(self.mute_tx.send(()));
    }

    pub fn hold_logons(&self, hold: bool) {
        self.behavior.hold_logons.store(hold, Ordering::SeqCst);
    }

    pub fn refuse_connections(&self, refuse: bool) {
        self.behavior.refuse.store(refuse, Ordering::SeqCst);
    }

    pub fn reject_topic(&self, topic: &str) {
        self.behavior
            .rejected_topics
            .lock()
            .unwrap()
            .insert(topic.to_owned());
    }

    pub fn connections(&self) -> usize {
        self.behavior.connections.load(Ordering::SeqCst)
    }

    /// Next forwarded request, if one arrives within two seconds.
    pub async fn recv_request(&mut self) -> Option<Value> {
        timeout(Duration::from_secs(2), self.request_rx.recv())
            .await
            .ok()
            .flatten()
    }

    /// Asserts that nothing is forwarded for `wait`.
    pub async fn assert_silent(&mut self, wait: Duration) {
        let next = timeout(wait, self.request_rx.recv()).await;
        assert!(next.is_err(), "unexpected request: {next:?}");
    }
}

async fn serve(
    ws_stream: WebSocketStream<TcpStream>,
    request_tx: mpsc::UnboundedSender<Value>,
    mut message_rx: broadcast::Receiver<String>,
    mut drop_rx: broadcast::Receiver<()>,
    mut mute_rx: broadcast::Receiver<()>,
    behavior: Arc<Behavior>,
) {
    let (mut write, mut read) = ws_stream.split();
    let mut api_key: Option<String> = None;

    loop {
        tokio::select! {
            msg = read.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let Ok(request) = serde_json::from_str::<Value>(text.as_str()) else {
                            continue;
                        };
                        let method = request["method"].as_str().unwrap_or_default().to_owned();
                        if !method.starts_with("session.") {
                            drop(request_tx.send(request.clone()));
                        }
                        if let Some(reply) = auto_reply(&method, &request, &behavior, &mut api_key)
                            && write.send(Message::Text(reply.to_string().into())).await.is_err()
                        {
                            break;
                        }
                    }
                    Some(Ok(_)) => {}
                    _ => break,
                }
            }
            msg = message_rx.recv() => {
                match msg {
                    Ok(text) => {
                        if write.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(_) => break,
                }
            }
            _ = drop_rx.recv() => break,
            _ = mute_rx.recv() => {
                // keep both halves alive but never poll them again
                _ = drop_rx.recv().await;
                break;
            }
        }
    }
}

fn auto_reply(
    method: &str,
    request: &Value,
    behavior: &Behavior,
    api_key: &mut Option<String>,
) -> Option<Value> {
    let id = request["id"].clone();

    match method {
        "session.logon" if behavior.hold_logons.load(Ordering::SeqCst) => None,
        "session.logon" => {
            *api_key = request["params"]["apiKey"].as_str().map(str::to_owned);
            Some(json!({
                "id": id,
                "status": 200,
                "result": session_result(api_key.as_deref()),
            }))
        }
        "session.status" => Some(json!({
            "id": id,
            "status": 200,
            "result": session_result(api_key.as_deref()),
        })),
        "session.logout" => {
            *api_key = None;
            Some(json!({ "id": id, "status": 200, "result": session_result(None) }))
        }
        "SUBSCRIBE" => {
            let rejected = behavior.rejected_topics.lock().unwrap();
            let refused = request["params"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .any(|topic| rejected.contains(topic));

            Some(if refused {
                json!({ "id": id, "error": { "code": 2, "msg": "Invalid request: unknown stream" } })
            } else {
                json!({ "id": id, "result": null })
            })
        }
        "UNSUBSCRIBE" => Some(json!({ "id": id, "result": null })),
        _ => None,
    }
}

fn session_result(api_key: Option<&str>) -> Value {
    json!({
        "apiKey": api_key,
        "authorizedSince": api_key.map(|_| 1_649_729_878_532_i64),
        "connectedSince": 1_649_729_873_021_i64,
        "returnRateLimits": false,
        "serverTime": 1_649_729_878_630_i64,
        "userDataStream": false,
    })
}

/// Config pointing `key` at the mock, with short timeouts and fast reconnects.
pub fn config(server: &MockExchange, key: WsKey) -> Config {
    Config::default()
        .with_endpoint(key, &server.ws_url())
        .unwrap()
        .with_request_timeout(Duration::from_millis(500))
        .with_reconnect(ReconnectConfig::new(
            Some(3),
            Duration::from_millis(20),
            Duration::from_millis(100),
        ))
}

pub fn credentials() -> Credentials {
    Credentials::new(API_KEY.to_owned(), API_SECRET.to_owned())
}

pub fn authenticated_client(server: &MockExchange, key: WsKey) -> Client {
    Client::new(config(server, key))
        .authenticate(credentials())
        .unwrap()
}

pub fn ws_error(error: &Error) -> &WsError {
    error
        .downcast_ref::<WsError>()
        .unwrap_or_else(|| panic!("expected a WebSocket error, got {error}"))
}

/// Waits for the first event matching `predicate`.
pub async fn next_event<F>(events: &mut broadcast::Receiver<EngineEvent>, predicate: F) -> EngineEvent
where
    F: Fn(&EngineEvent) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            match events.recv().await {
                Ok(event) if predicate(&event) => return event,
                Ok(_) | Err(RecvError::Lagged(_)) => {}
                Err(RecvError::Closed) => panic!("event channel closed"),
            }
        }
    })
    .await
    .expect("timed out waiting for event")
}

/// Polls until the connection state of `key` satisfies `predicate`.
pub async fn wait_for_state<F>(client: &Client, key: WsKey, predicate: F) -> ConnectionState
where
    F: Fn(ConnectionState) -> bool,
{
    timeout(Duration::from_secs(5), async {
        loop {
            let state = client.connection_state(key);
            if predicate(state) {
                return state;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("timed out waiting for connection state")
}
