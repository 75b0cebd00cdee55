//! Per-connection login state.
//!
//! A WS-API session is authenticated by sending a signed `session.logon`. The exchange
//! acknowledges it (the session is then *logged on*); when verification is enabled a
//! follow-up `session.status` must report our API key before the session counts as
//! *authenticated*. Any disconnect or `session.logout` reverts to unauthenticated.

use std::time::Instant;

use tokio::sync::watch;

use crate::auth::{Credentials, logon_params};
use crate::now_millis;
use crate::ws::error::{OperationError, WsError};
use crate::ws::key::WsKey;
use crate::ws::operation::Operation;
use crate::ws::traits::Dispatcher;
use crate::ws::types::response::SessionStatus;

#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    Unauthenticated,
    /// `session.logon` sent, not yet acknowledged
    LoggingIn,
    /// `session.logon` acknowledged, `session.status` not yet confirmed
    LoggedOn,
    Authenticated {
        since: Instant,
    },
}

impl SessionState {
    #[must_use]
    pub const fn is_authenticated(self) -> bool {
        matches!(self, Self::Authenticated { .. })
    }
}

#[derive(Debug)]
pub(crate) struct SessionAuthenticator {
    key: WsKey,
    credentials: Option<Credentials>,
    verify: bool,
    state_tx: watch::Sender<SessionState>,
}

impl SessionAuthenticator {
    pub fn new(key: WsKey, credentials: Option<Credentials>, verify: bool) -> Self {
        let (state_tx, _) = watch::channel(SessionState::Unauthenticated);
        Self {
            key,
            credentials,
            verify,
            state_tx,
        }
    }

    pub fn state(&self) -> SessionState {
        *self.state_tx.borrow()
    }

    pub fn has_credentials(&self) -> bool {
        self.credentials.is_some()
    }

    /// Rejects `operation` locally when it needs a session we do not have.
    pub fn require_authenticated(&self, operation: Operation) -> Result<(), WsError> {
        if operation.requires_auth() && !self.state().is_authenticated() {
            return Err(WsError::NotAuthenticated { key: self.key });
        }
        Ok(())
    }

    /// Runs the login handshake over `dispatcher`.
    pub async fn authenticate<D>(&self, dispatcher: &D) -> Result<SessionStatus, WsError>
    where
        D: Dispatcher + ?Sized,
    {
        let Some(credentials) = &self.credentials else {
            return Err(WsError::NotAuthenticated { key: self.key });
        };

        let params = logon_params(credentials, now_millis()).map_err(|e| {
            WsError::AuthenticationFailed {
                key: self.key,
                code: None,
                message: e.to_string(),
            }
        })?;

        self.state_tx.send_replace(SessionState::LoggingIn);
        let logon = match dispatcher
            .dispatch(Operation::SessionLogon, Some(params))
            .await
        {
            Ok(response) => response,
            Err(e) => return Err(self.fail(e)),
        };
        self.state_tx.send_replace(SessionState::LoggedOn);

        let status = if self.verify {
            let response = match dispatcher.dispatch(Operation::SessionStatus, None).await {
                Ok(response) => response,
                Err(e) => return Err(self.fail(e)),
            };
            let status: SessionStatus =
                serde_json::from_value(response.result).map_err(|e| self.fail(e.into()))?;

            if status.api_key.as_deref() != Some(credentials.key()) {
                return Err(self.fail(WsError::AuthenticationFailed {
                    key: self.key,
                    code: None,
                    message: "session.status does not report the configured API key".to_owned(),
                }));
            }
            status
        } else {
            serde_json::from_value(logon.result).unwrap_or_default()
        };

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, api_key = %credentials.key(), "session authenticated");

        self.state_tx.send_replace(SessionState::Authenticated {
            since: Instant::now(),
        });
        Ok(status)
    }

    /// Called once `session.logout` has been acknowledged.
    pub fn on_logout(&self) {
        self.reset();
    }

    /// Forgets the session, e.g. because the socket it belonged to is gone.
    pub fn reset(&self) {
        self.state_tx.send_replace(SessionState::Unauthenticated);
    }

    fn fail(&self, error: WsError) -> WsError {
        self.reset();

        match error {
            WsError::Operation(OperationError { code, message, .. }) => {
                WsError::AuthenticationFailed {
                    key: self.key,
                    code,
                    message,
                }
            }
            other => other,
        }
    }
}
