//! Request/response correlation.
//!
//! Each connection owns one [`Correlator`]. Outbound requests are registered under a fresh
//! [`RequestId`] with a oneshot result slot; inbound frames carrying that id settle the slot.
//! Ids of requests that timed out or were cancelled are kept as markers for `dedup_ttl`, so a
//! late response is discarded instead of being mistaken for unsolicited data.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_with::serde_as;
use tokio::sync::oneshot;

use crate::serde_helpers::StringFromAny;
use crate::ws::error::WsError;
use crate::ws::key::WsKey;
use crate::ws::operation::Operation;
use crate::ws::types::response::{ResponseFrame, WsApiResponse};

/// Correlation id. Always sent as a string; numeric ids echoed back are accepted.
#[serde_as]
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(#[serde_as(as = "StringFromAny")] String);

impl RequestId {
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        Self(id.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// What a request eventually settles with.
pub(crate) type Settlement = Result<WsApiResponse, WsError>;

/// Who issued a request. Engine traffic (login, resubscription) draws from its own id
/// sequence so caller-visible ids stay `"1"`, `"2"`, ...
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Origin {
    Caller,
    Engine,
}

impl Origin {
    const fn prefix(self) -> &'static str {
        match self {
            Self::Caller => "",
            Self::Engine => "sys",
        }
    }
}

#[derive(Debug)]
pub(crate) struct PendingRequest {
    pub id: RequestId,
    pub operation: Operation,
    #[cfg_attr(
        not(feature = "tracing"),
        expect(dead_code, reason = "only read when logging response latency")
    )]
    pub submitted_at: Instant,
    /// Physical connection the request was submitted on
    pub epoch: u64,
    tx: oneshot::Sender<Settlement>,
}

impl PendingRequest {
    fn settle(self, settlement: Settlement) {
        // the receiver may already be gone if the caller's future was dropped mid-settlement
        _ = self.tx.send(settlement);
    }
}

/// Outcome of routing one inbound response.
#[derive(Debug)]
pub(crate) enum Routing {
    /// A pending request was settled
    Settled,
    /// The id belonged to a timed-out or cancelled request
    Discarded,
    /// No request ever used this id; the frame is treated as unsolicited
    Unmatched(ResponseFrame),
}

#[derive(Debug)]
pub(crate) struct Correlator {
    key: WsKey,
    dedup_ttl: Duration,
    caller_seq: u64,
    engine_seq: u64,
    pending: HashMap<RequestId, PendingRequest>,
    markers: HashMap<RequestId, Instant>,
}

impl Correlator {
    pub fn new(key: WsKey, dedup_ttl: Duration) -> Self {
        Self {
            key,
            dedup_ttl,
            caller_seq: 0,
            engine_seq: 0,
            pending: HashMap::new(),
            markers: HashMap::new(),
        }
    }

    fn next_id(&mut self, origin: Origin) -> RequestId {
        loop {
            let seq = match origin {
                Origin::Caller => &mut self.caller_seq,
                Origin::Engine => &mut self.engine_seq,
            };
            *seq += 1;
            let id = RequestId(format!("{}{}", origin.prefix(), seq));

            if !self.pending.contains_key(&id) && !self.markers.contains_key(&id) {
                return id;
            }
        }
    }

    /// Registers a new pending request and returns its id and result slot.
    pub fn register(
        &mut self,
        origin: Origin,
        operation: Operation,
        epoch: u64,
    ) -> (RequestId, oneshot::Receiver<Settlement>) {
        self.prune_markers(Instant::now());

        let id = self.next_id(origin);
        let (tx, rx) = oneshot::channel();
        self.pending.insert(
            id.clone(),
            PendingRequest {
                id: id.clone(),
                operation,
                submitted_at: Instant::now(),
                epoch,
                tx,
            },
        );

        (id, rx)
    }

    /// Settles the request a response belongs to.
    pub fn resolve(&mut self, frame: ResponseFrame) -> Routing {
        if let Some(pending) = self.pending.remove(&frame.id) {
            #[cfg(feature = "tracing")]
            tracing::trace!(
                key = %self.key,
                id = %pending.id,
                operation = %pending.operation,
                elapsed_ms = pending.submitted_at.elapsed().as_millis(),
                "response received"
            );
            pending.settle(frame.into_response(self.key));
            return Routing::Settled;
        }

        if self.markers.contains_key(&frame.id) {
            #[cfg(feature = "tracing")]
            tracing::debug!(key = %self.key, id = %frame.id, "discarding late response");
            return Routing::Discarded;
        }

        Routing::Unmatched(frame)
    }

    /// Removes a timed-out request. Returns it only if it was still pending, which makes the
    /// caller the single party allowed to report the timeout.
    pub fn expire(&mut self, id: &RequestId) -> Option<PendingRequest> {
        let pending = self.pending.remove(id)?;
        self.markers.insert(id.clone(), Instant::now());
        Some(pending)
    }

    /// Forgets a request whose caller stopped waiting.
    pub fn abandon(&mut self, id: &RequestId) {
        if self.pending.remove(id).is_some() {
            self.markers.insert(id.clone(), Instant::now());
        }
    }

    /// Settles a single request with an error.
    pub fn fail(&mut self, id: &RequestId, error: WsError) {
        if let Some(pending) = self.pending.remove(id) {
            pending.settle(Err(error));
        }
    }

    /// Settles every request submitted on connection `epoch` or earlier.
    pub fn fail_epoch<F>(&mut self, epoch: u64, error: F) -> usize
    where
        F: Fn(WsKey) -> WsError,
    {
        let stale: Vec<RequestId> = self
            .pending
            .values()
            .filter(|pending| pending.epoch <= epoch)
            .map(|pending| pending.id.clone())
            .collect();

        for id in &stale {
            self.fail(id, error(self.key));
        }
        stale.len()
    }

    /// Settles every pending request with an error built per waiter.
    pub fn fail_all<F>(&mut self, error: F) -> usize
    where
        F: Fn(WsKey) -> WsError,
    {
        let count = self.pending.len();
        for (_, pending) in self.pending.drain() {
            pending.settle(Err(error(self.key)));
        }
        count
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn prune_markers(&mut self, now: Instant) {
        let ttl = self.dedup_ttl;
        self.markers
            .retain(|_, marked_at| now.saturating_duration_since(*marked_at) < ttl);
    }
}

pub(crate) fn lock(correlator: &Mutex<Correlator>) -> std::sync::MutexGuard<'_, Correlator> {
    correlator.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Abandons the request when the waiting future is dropped before settlement.
struct PendingGuard<'corr> {
    correlator: &'corr Mutex<Correlator>,
    id: Option<RequestId>,
}

impl PendingGuard<'_> {
    fn disarm(&mut self) {
        self.id = None;
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        if let Some(id) = self.id.take() {
            lock(self.correlator).abandon(&id);
        }
    }
}

/// Waits for a registered request to settle, reporting a timeout exactly once.
pub(crate) async fn settle(
    correlator: &Mutex<Correlator>,
    key: WsKey,
    id: RequestId,
    mut rx: oneshot::Receiver<Settlement>,
    timeout: Duration,
) -> Settlement {
    let mut guard = PendingGuard {
        correlator,
        id: Some(id.clone()),
    };

    let outcome = tokio::time::timeout(timeout, &mut rx).await;
    guard.disarm();

    match outcome {
        Ok(Ok(settlement)) => settlement,
        Ok(Err(_closed)) => Err(WsError::ConnectionReset { key }),
        Err(_elapsed) => {
            let expired = lock(correlator).expire(&id);
            if let Some(pending) = expired {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %key, id = %pending.id, operation = %pending.operation, "request timed out");
                return Err(WsError::RequestTimeout {
                    key,
                    id: pending.id,
                    operation: pending.operation,
                });
            }

            // settled between the timer firing and taking the lock
            rx.try_recv()
                .unwrap_or(Err(WsError::ConnectionReset { key }))
        }
    }
}
