//! Message handlers and tag-based routing.

use crate::endpoint::TAG_SEPARATOR;
use crate::message::{MessageId, ReceiptHandle, ReceivedMessage};
use async_trait::async_trait;
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[cfg(test)]
#[path = "handler_tests.rs"]
mod tests;

/// A received message handed to a handler
///
/// Carries the consumer's cancellation token so long-running handlers can
/// observe a stop request. The handler is never forcibly terminated.
#[derive(Debug, Clone)]
pub struct Message {
    entry: ReceivedMessage,
    cancellation: CancellationToken,
}

impl Message {
    pub fn new(entry: ReceivedMessage, cancellation: CancellationToken) -> Self {
        Self {
            entry,
            cancellation,
        }
    }

    /// Message body
    pub fn body(&self) -> &str {
        &self.entry.body
    }

    /// Message tag, if any
    pub fn tag(&self) -> Option<&str> {
        self.entry.tag.as_deref()
    }

    /// Service-assigned message id
    pub fn message_id(&self) -> &MessageId {
        &self.entry.message_id
    }

    /// Receipt handle used to acknowledge this delivery
    pub fn receipt_handle(&self) -> &ReceiptHandle {
        &self.entry.receipt_handle
    }

    /// Full delivery record including properties and timing metadata
    pub fn entry(&self) -> &ReceivedMessage {
        &self.entry
    }

    /// Token cancelled when the consumer is stopped
    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the consumer has been stopped
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }
}

/// Processes one message
///
/// Returning an error marks the message as failed. Implemented for any
/// `Fn(Message) -> impl Future<Output = anyhow::Result<()>>`.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: Message) -> anyhow::Result<()>;
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Message) -> Fut + Send + Sync,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    async fn handle(&self, message: Message) -> anyhow::Result<()> {
        (self)(message).await
    }
}

/// Shared handler reference
pub type SharedHandler = Arc<dyn MessageHandler>;

/// Routing table from message tag to handler
///
/// Either a single catch-all handler or a set of per-tag handlers, never both.
#[derive(Clone)]
pub enum HandlerRegistry {
    AllTags(SharedHandler),
    ByTag(HashMap<String, SharedHandler>),
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::ByTag(HashMap::new())
    }
}

impl HandlerRegistry {
    /// Register a handler for one tag; the empty tag registers a catch-all
    ///
    /// Per-tag registrations are ignored once a catch-all is in place.
    pub fn register(&mut self, tag: &str, handler: SharedHandler) {
        if tag.is_empty() {
            self.register_all(handler);
            return;
        }

        match self {
            Self::AllTags(_) => {
                warn!(
                    tag = %tag,
                    "Catch-all handler already registered; ignoring per-tag handler"
                );
            }
            Self::ByTag(handlers) => {
                handlers.insert(tag.to_string(), handler);
            }
        }
    }

    /// Replace every registration with a single catch-all handler
    pub fn register_all(&mut self, handler: SharedHandler) {
        *self = Self::AllTags(handler);
    }

    /// True when no handler is registered
    pub fn is_empty(&self) -> bool {
        match self {
            Self::AllTags(_) => false,
            Self::ByTag(handlers) => handlers.is_empty(),
        }
    }

    /// True when a single handler receives every message
    pub fn is_catch_all(&self) -> bool {
        matches!(self, Self::AllTags(_))
    }

    /// Registered tags in sorted order; empty for a catch-all registry
    pub fn tags(&self) -> Vec<&str> {
        match self {
            Self::AllTags(_) => Vec::new(),
            Self::ByTag(handlers) => {
                let mut tags: Vec<&str> = handlers.keys().map(String::as_str).collect();
                tags.sort_unstable();
                tags
            }
        }
    }

    /// Subscription expression sent to the service
    ///
    /// Empty for a catch-all, otherwise the registered tags joined with `||`.
    pub fn tag_expression(&self) -> String {
        self.tags().join(TAG_SEPARATOR)
    }

    /// Pick the handler for a message tag
    ///
    /// Exact match for per-tag registries; the catch-all accepts anything.
    pub fn resolve(&self, tag: Option<&str>) -> Option<SharedHandler> {
        match self {
            Self::AllTags(handler) => Some(Arc::clone(handler)),
            Self::ByTag(handlers) => tag.and_then(|t| handlers.get(t)).cloned(),
        }
    }
}

impl fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::AllTags(_) => f.write_str("HandlerRegistry::AllTags"),
            Self::ByTag(_) => f
                .debug_tuple("HandlerRegistry::ByTag")
                .field(&self.tags())
                .finish(),
        }
    }
}
