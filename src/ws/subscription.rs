#![expect(
    clippy::module_name_repetitions,
    reason = "Subscription types deliberately include the module name for clarity"
)]

use std::collections::BTreeSet;
use std::time::Instant;

use dashmap::DashMap;
use futures::future::join_all;
use serde_json::Value;

use crate::ws::error::WsError;
use crate::ws::key::WsKey;
use crate::ws::operation::Operation;
use crate::ws::traits::Dispatcher;
use crate::ws::types::response::WsApiResponse;

/// Topics acknowledged by the exchange on one connection.
///
/// The ledger only exists to restore subscriptions after a reconnect: topics are recorded when
/// the exchange acknowledges a `SUBSCRIBE` and forgotten when it acknowledges an
/// `UNSUBSCRIBE`, never speculatively.
#[derive(Debug)]
pub(crate) struct SubscriptionLedger {
    key: WsKey,
    /// Topic and when it was acknowledged
    topics: DashMap<String, Instant>,
}

impl SubscriptionLedger {
    pub fn new(key: WsKey) -> Self {
        Self {
            key,
            topics: DashMap::new(),
        }
    }

    pub fn topics(&self) -> BTreeSet<String> {
        self.topics.iter().map(|entry| entry.key().clone()).collect()
    }

    pub async fn subscribe<D>(
        &self,
        dispatcher: &D,
        topics: Vec<String>,
    ) -> Result<WsApiResponse, WsError>
    where
        D: Dispatcher + ?Sized,
    {
        validate(&topics)?;

        let response = dispatcher
            .dispatch(Operation::Subscribe, Some(Value::from(topics.clone())))
            .await?;

        let now = Instant::now();
        for topic in topics {
            self.topics.insert(topic, now);
        }
        Ok(response)
    }

    pub async fn unsubscribe<D>(
        &self,
        dispatcher: &D,
        topics: Vec<String>,
    ) -> Result<WsApiResponse, WsError>
    where
        D: Dispatcher + ?Sized,
    {
        validate(&topics)?;

        let response = dispatcher
            .dispatch(Operation::Unsubscribe, Some(Value::from(topics.clone())))
            .await?;

        for topic in &topics {
            self.topics.remove(topic);
        }
        Ok(response)
    }

    /// Replays every recorded topic, one `SUBSCRIBE` per topic so a rejected topic cannot take
    /// the others down with it. Rejected topics are dropped from the ledger and returned as
    /// [`WsError::ResubscriptionFailed`].
    pub async fn resubscribe_all<D>(&self, dispatcher: &D) -> Vec<WsError>
    where
        D: Dispatcher + ?Sized,
    {
        let topics = self.topics();
        if topics.is_empty() {
            return Vec::new();
        }

        #[cfg(feature = "tracing")]
        tracing::debug!(key = %self.key, count = topics.len(), "re-subscribing topics");

        let attempts = topics.into_iter().map(|topic| async move {
            let result = dispatcher
                .dispatch(Operation::Subscribe, Some(Value::from(vec![topic.clone()])))
                .await;
            (topic, result)
        });

        let mut failures = Vec::new();
        for (topic, result) in join_all(attempts).await {
            if let Err(e) = result {
                #[cfg(feature = "tracing")]
                tracing::warn!(key = %self.key, topic = %topic, error = %e, "failed to restore subscription");

                self.topics.remove(&topic);
                failures.push(WsError::ResubscriptionFailed {
                    key: self.key,
                    topic,
                    reason: e.to_string(),
                });
            }
        }
        failures
    }
}

pub(crate) fn validate(topics: &[String]) -> Result<(), WsError> {
    if topics.is_empty() {
        return Err(WsError::SubscriptionFailed(
            "topics cannot be empty: at least one topic must be provided".to_owned(),
        ));
    }
    if topics.iter().any(String::is_empty) {
        return Err(WsError::SubscriptionFailed(
            "topic names cannot be empty".to_owned(),
        ));
    }
    Ok(())
}
