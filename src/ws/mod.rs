//! Core WebSocket infrastructure.
//!
//! One [`ConnectionManager`] exists per [`WsKey`]. It owns the socket and everything tied to
//! it: the [`correlator`] matching responses to requests, the [`session`] state, the
//! [`rate_limit`] snapshot and the [`subscription`] ledger used to restore topics after a
//! reconnect.
//!
//! # Architecture
//!
//! - [`key`]: connection identities and the operations each one accepts
//! - [`operation`]: the closed registry of operations and typed requests
//! - [`ConnectionManager`]: socket lifecycle with heartbeat, reconnection and a single writer
//! - [`Connector`]: the transport seam, [`TungsteniteConnector`] by default

pub mod config;
pub mod connection;
pub mod correlator;
pub mod error;
pub mod key;
pub mod operation;
pub mod rate_limit;
pub mod session;
pub(crate) mod subscription;
pub mod traits;
pub mod types;

pub use config::{Config, ReconnectConfig};
pub use connection::{ConnectionManager, ConnectionState, EngineEvent};
pub use correlator::RequestId;
#[expect(
    clippy::module_name_repetitions,
    reason = "WsError includes module name for clarity when used outside this module"
)]
pub use error::WsError;
pub use key::{Market, WsKey};
pub use operation::{Operation, WsApiRequest};
pub use rate_limit::RateLimitSnapshot;
pub use session::SessionState;
pub use traits::{BoxedSocket, Connector, Socket, TungsteniteConnector};
pub use types::response::{RateLimit, RateLimitType, StreamMessage, WsApiResponse};
