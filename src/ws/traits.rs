//! Seams between the engine and its collaborators.

use async_trait::async_trait;
use futures::{Sink, Stream};
use serde_json::Value;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::{Error as TungsteniteError, Message};

use crate::Result;
use crate::ws::error::WsError;
use crate::ws::operation::Operation;
use crate::ws::types::response::WsApiResponse;

/// A bidirectional WebSocket message channel.
///
/// Implemented for every `tokio_tungstenite` stream, and for any in-memory or proxied transport
/// with the same shape.
pub trait Socket:
    Stream<Item = std::result::Result<Message, TungsteniteError>>
    + Sink<Message, Error = TungsteniteError>
    + Send
    + Unpin
{
}

impl<T> Socket for T where
    T: Stream<Item = std::result::Result<Message, TungsteniteError>>
        + Sink<Message, Error = TungsteniteError>
        + Send
        + Unpin
{
}

pub type BoxedSocket = Box<dyn Socket>;

/// Opens sockets. TLS policy, proxies and certificate pinning belong here.
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    async fn connect(&self, url: &str) -> Result<BoxedSocket>;
}

/// Dials endpoints with [`tokio_tungstenite::connect_async`] using the platform's root
/// certificates.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, Default)]
pub struct TungsteniteConnector;

#[async_trait]
impl Connector for TungsteniteConnector {
    async fn connect(&self, url: &str) -> Result<BoxedSocket> {
        let (stream, _response) = connect_async(url).await?;
        Ok(Box::new(stream))
    }
}

/// Sends one correlated request and waits for its settlement.
///
/// The session authenticator and the subscription ledger are written against this trait so
/// they never depend on the connection that carries their frames.
#[async_trait]
pub(crate) trait Dispatcher: Send + Sync {
    async fn dispatch(
        &self,
        operation: Operation,
        params: Option<Value>,
    ) -> std::result::Result<WsApiResponse, WsError>;
}
