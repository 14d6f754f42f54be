//! The queue endpoint capability consumed by consumers and producers.

use crate::error::QueueError;
use crate::message::{MessageId, PublishRequest, ReceiptHandle, ReceivedMessage};
use async_trait::async_trait;
use std::collections::BTreeSet;
use std::time::Duration;

#[cfg(test)]
#[path = "endpoint_tests.rs"]
mod tests;

/// Largest batch the service hands out per poll.
pub const MAX_BATCH_SIZE: u32 = 16;

/// Longest long-poll wait the service accepts, in seconds.
pub const MAX_WAIT_SECONDS: u64 = 30;

/// Separator between tags in a subscription tag expression.
pub const TAG_SEPARATOR: &str = "||";

/// Interface implemented by queue transports (HTTP, in-memory)
///
/// A consumer-side endpoint is bound to one topic, group and tag expression;
/// a producer-side endpoint only needs the topic.
#[async_trait]
pub trait QueueEndpoint: Send + Sync {
    /// Long-poll for up to `max_messages` messages, waiting at most `wait`
    ///
    /// An empty queue is reported as [`QueueError::NoMessage`].
    async fn poll(
        &self,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError>;

    /// Acknowledge received messages by receipt handle
    async fn acknowledge(&self, receipts: &[ReceiptHandle]) -> Result<(), QueueError>;

    /// Publish a message and return the identifier the service assigned
    async fn publish(&self, request: PublishRequest) -> Result<MessageId, QueueError>;
}

/// Parsed subscription tag expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TagFilter {
    /// Accept every message regardless of tag
    All,
    /// Accept only messages carrying one of these tags
    Tags(BTreeSet<String>),
}

impl TagFilter {
    /// Parse an expression such as `""`, `"*"`, `"a"` or `"a||b"`
    pub fn parse(expression: &str) -> Self {
        let expression = expression.trim();
        if expression.is_empty() || expression == "*" {
            return Self::All;
        }

        let tags: BTreeSet<String> = expression
            .split(TAG_SEPARATOR)
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect();

        if tags.is_empty() {
            Self::All
        } else {
            Self::Tags(tags)
        }
    }

    /// Check whether a message with this tag passes the filter
    pub fn matches(&self, tag: Option<&str>) -> bool {
        match self {
            Self::All => true,
            Self::Tags(tags) => tag.is_some_and(|t| tags.contains(t)),
        }
    }
}
