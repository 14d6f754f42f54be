//! In-memory queue endpoint for testing and development.
//!
//! Emulates the service closely enough to exercise consumers and producers
//! without a network:
//! - Long polling that wakes as soon as a matching message is published
//! - Scheduled delivery through the start-deliver time
//! - Visibility timeouts with redelivery and consumed-time counting
//! - Receipt handles that expire with the visibility timeout
//!
//! Endpoints obtained through [`InMemoryEndpoint::subscribe`] share one topic's
//! storage and compete for its messages, each filtered by its own tag
//! expression.

use crate::config::InMemoryConfig;
use crate::endpoint::{QueueEndpoint, TagFilter, MAX_WAIT_SECONDS};
use crate::error::QueueError;
use crate::message::{
    MessageId, PublishRequest, ReceiptHandle, ReceivedMessage, Timestamp,
};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::str::FromStr;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::{debug, trace};

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// A message waiting for delivery
#[derive(Clone)]
struct StoredMessage {
    message_id: MessageId,
    body: String,
    tag: Option<String>,
    message_key: Option<String>,
    properties: HashMap<String, String>,
    publish_time: Timestamp,
    available_at: Timestamp,
    first_consume_time: Option<Timestamp>,
    consumed_times: u32,
}

impl StoredMessage {
    fn from_request(request: PublishRequest, message_id: MessageId) -> Self {
        let now = Timestamp::now();
        let available_at = request
            .start_deliver_time
            .and_then(Timestamp::from_millis)
            .filter(|at| *at > now)
            .unwrap_or(now);

        Self {
            message_id,
            body: request.body,
            tag: request.tag,
            message_key: request.message_key,
            properties: request.properties,
            publish_time: now,
            available_at,
            first_consume_time: None,
            consumed_times: 0,
        }
    }
}

/// A delivered message waiting for acknowledgment or redelivery
struct InFlightMessage {
    message: StoredMessage,
    visible_at: Timestamp,
}

/// Messages of one topic
struct TopicStorage {
    messages: VecDeque<StoredMessage>,
    in_flight: HashMap<String, InFlightMessage>,
    config: InMemoryConfig,
}

impl TopicStorage {
    fn new(config: InMemoryConfig) -> Self {
        Self {
            messages: VecDeque::new(),
            in_flight: HashMap::new(),
            config,
        }
    }

    /// Return in-flight messages whose visibility timeout has passed
    fn release_expired(&mut self, now: Timestamp) {
        let expired: Vec<String> = self
            .in_flight
            .iter()
            .filter(|(_, entry)| entry.visible_at <= now)
            .map(|(receipt, _)| receipt.clone())
            .collect();

        for receipt in expired {
            if let Some(entry) = self.in_flight.remove(&receipt) {
                trace!(
                    message_id = %entry.message.message_id,
                    "Visibility timeout expired; message available again"
                );
                self.messages.push_back(entry.message);
            }
        }
    }

    /// Deliver up to `max` available messages accepted by `filter`
    fn receive(&mut self, max: usize, filter: &TagFilter, now: Timestamp) -> Vec<ReceivedMessage> {
        self.release_expired(now);

        let visibility = chrono::Duration::from_std(self.config.visibility_timeout)
            .unwrap_or_else(|_| chrono::Duration::seconds(MAX_VISIBILITY_SECONDS));
        let next_consume_time = Timestamp::from_datetime(now.as_datetime() + visibility);

        let mut batch = Vec::new();
        let mut remaining = VecDeque::with_capacity(self.messages.len());

        while let Some(mut stored) = self.messages.pop_front() {
            let deliverable = batch.len() < max
                && stored.available_at <= now
                && filter.matches(stored.tag.as_deref());
            if !deliverable {
                remaining.push_back(stored);
                continue;
            }

            stored.consumed_times += 1;
            let first_consume_time = *stored.first_consume_time.get_or_insert(now);
            let receipt = uuid::Uuid::new_v4().to_string();

            let mut delivered = ReceivedMessage::new(
                stored.message_id.clone(),
                ReceiptHandle::new(receipt.clone()),
                stored.body.clone(),
            );
            delivered.tag = stored.tag.clone();
            delivered.message_key = stored.message_key.clone();
            delivered.properties = stored.properties.clone();
            delivered.publish_time = Some(stored.publish_time);
            delivered.first_consume_time = Some(first_consume_time);
            delivered.next_consume_time = Some(next_consume_time);
            delivered.consumed_times = stored.consumed_times;
            batch.push(delivered);

            self.in_flight.insert(
                receipt,
                InFlightMessage {
                    message: stored,
                    visible_at: next_consume_time,
                },
            );
        }

        self.messages = remaining;
        batch
    }

    /// Earliest moment a message matching `filter` may become deliverable
    fn next_due(&self, filter: &TagFilter) -> Option<Timestamp> {
        let scheduled = self
            .messages
            .iter()
            .filter(|m| filter.matches(m.tag.as_deref()))
            .map(|m| m.available_at);
        let redelivered = self
            .in_flight
            .values()
            .filter(|entry| filter.matches(entry.message.tag.as_deref()))
            .map(|entry| entry.visible_at);

        scheduled.chain(redelivered).min()
    }
}

/// Time left before `due`; zero once it has passed
fn until(due: Timestamp, now: Timestamp) -> Duration {
    (due.as_datetime() - now.as_datetime())
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// Upper bound used when a configured visibility timeout does not fit a
/// calendar duration
const MAX_VISIBILITY_SECONDS: i64 = 12 * 60 * 60;

struct SharedTopic {
    storage: Mutex<TopicStorage>,
    published: Notify,
}

impl SharedTopic {
    fn lock(&self) -> MutexGuard<'_, TopicStorage> {
        match self.storage.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

// ============================================================================
// InMemoryEndpoint
// ============================================================================

/// In-memory endpoint for a single topic
#[derive(Clone)]
pub struct InMemoryEndpoint {
    topic: Arc<SharedTopic>,
    filter: TagFilter,
}

impl InMemoryEndpoint {
    /// Create an endpoint over fresh, empty storage that accepts every tag
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            topic: Arc::new(SharedTopic {
                storage: Mutex::new(TopicStorage::new(config)),
                published: Notify::new(),
            }),
            filter: TagFilter::All,
        }
    }

    /// Another endpoint on the same storage, receiving only tags matched by
    /// `tag_expression` (`""`, `"*"`, `"a"` or `"a||b"`)
    pub fn subscribe(&self, tag_expression: &str) -> Self {
        Self {
            topic: Arc::clone(&self.topic),
            filter: TagFilter::parse(tag_expression),
        }
    }

    /// Tag filter applied to polls through this view
    pub fn filter(&self) -> &TagFilter {
        &self.filter
    }

    /// Messages waiting for delivery, including scheduled ones
    pub fn pending_count(&self) -> usize {
        self.topic.lock().messages.len()
    }

    /// Messages delivered but not yet acknowledged or redelivered
    pub fn in_flight_count(&self) -> usize {
        self.topic.lock().in_flight.len()
    }
}

impl Default for InMemoryEndpoint {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

impl std::fmt::Debug for InMemoryEndpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEndpoint")
            .field("filter", &self.filter)
            .finish()
    }
}

#[async_trait]
impl QueueEndpoint for InMemoryEndpoint {
    async fn poll(
        &self,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let max = max_messages.max(1) as usize;
        let deadline =
            tokio::time::Instant::now() + wait.min(Duration::from_secs(MAX_WAIT_SECONDS));

        loop {
            // Registered before checking storage so a concurrent publish is not missed.
            let published = self.topic.published.notified();

            let next_due = {
                let now = Timestamp::now();
                let mut storage = self.topic.lock();
                let batch = storage.receive(max, &self.filter, now);
                if !batch.is_empty() {
                    debug!(count = batch.len(), "Delivered in-memory messages");
                    return Ok(batch);
                }
                storage.next_due(&self.filter)
            };

            let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
            if remaining.is_zero() {
                return Err(QueueError::NoMessage);
            }

            let until_due = match next_due {
                Some(due) => until(due, Timestamp::now()),
                None => remaining,
            };

            tokio::select! {
                _ = published => {}
                _ = tokio::time::sleep(remaining.min(until_due)) => {}
            }
        }
    }

    async fn acknowledge(&self, receipts: &[ReceiptHandle]) -> Result<(), QueueError> {
        let mut storage = self.topic.lock();
        storage.release_expired(Timestamp::now());

        let mut unknown = Vec::new();
        for receipt in receipts {
            if storage.in_flight.remove(receipt.as_str()).is_none() {
                unknown.push(receipt.as_str().to_string());
            }
        }

        match unknown.into_iter().next() {
            Some(receipt) => Err(QueueError::InvalidReceipt {
                receipt,
                message: "receipt handle is unknown or its visibility timeout expired"
                    .to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn publish(&self, request: PublishRequest) -> Result<MessageId, QueueError> {
        let raw_id = uuid::Uuid::new_v4().simple().to_string().to_uppercase();
        let message_id = MessageId::from_str(&raw_id)?;

        {
            let mut storage = self.topic.lock();
            storage
                .messages
                .push_back(StoredMessage::from_request(request, message_id.clone()));
        }
        self.topic.published.notify_waiters();

        trace!(message_id = %message_id, "Published in-memory message");
        Ok(message_id)
    }
}
