//! Fluent construction of [`QueueConsumer`] instances.

use crate::config::{require, ClientConfig};
use crate::consumer::{AckMode, ConsumerSettings, ErrorCallback, QueueConsumer};
use crate::endpoint::QueueEndpoint;
use crate::error::{ConfigurationError, QueueError};
use crate::handler::{HandlerRegistry, MessageHandler};
use crate::providers::{ConsumerBinding, HttpEndpoint};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

#[cfg(test)]
#[path = "consumer_builder_tests.rs"]
mod tests;

/// Builder for [`QueueConsumer`]
///
/// Defaults to one message per poll and a five second long-poll wait.
///
/// # Examples
///
/// ```no_run
/// use mq_runtime::{Consumer, ConsumerBuilder, Message};
/// use tokio_util::sync::CancellationToken;
///
/// # async fn example() -> Result<(), mq_runtime::QueueError> {
/// let consumer = ConsumerBuilder::new()
///     .with_endpoint("http://1234.mqrest.cn-hangzhou.aliyuncs.com")
///     .with_access_key("access-key")
///     .with_secret_key("secret-key")
///     .with_topic("orders")
///     .with_group_id("GID_orders")
///     .with_batch_size(8)
///     .handle("created", |message: Message| async move {
///         println!("created: {}", message.body());
///         Ok::<(), anyhow::Error>(())
///     })
///     .build()?;
///
/// consumer.start(&CancellationToken::new());
/// # Ok(())
/// # }
/// ```
pub struct ConsumerBuilder {
    client: ClientConfig,
    topic: String,
    group_id: String,
    handlers: HandlerRegistry,
    settings: ConsumerSettings,
    on_error: Option<ErrorCallback>,
}

impl ConsumerBuilder {
    pub fn new() -> Self {
        Self {
            client: ClientConfig::default(),
            topic: String::new(),
            group_id: String::new(),
            handlers: HandlerRegistry::default(),
            settings: ConsumerSettings::default(),
            on_error: None,
        }
    }

    /// Use a complete client configuration, replacing individual client fields
    pub fn with_client_config(mut self, config: ClientConfig) -> Self {
        self.client = config;
        self
    }

    /// Instance namespace; empty means the default instance
    pub fn with_instance_id(mut self, instance_id: impl Into<String>) -> Self {
        let instance_id = instance_id.into();
        self.client.instance_id = (!instance_id.is_empty()).then_some(instance_id);
        self
    }

    /// HTTP endpoint of the instance
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.client.endpoint = endpoint.into();
        self
    }

    /// Access key id used to sign requests
    pub fn with_access_key(mut self, access_key: impl Into<String>) -> Self {
        self.client.access_key = access_key.into();
        self
    }

    /// Access key secret used to sign requests
    pub fn with_secret_key(mut self, secret_key: impl Into<String>) -> Self {
        self.client.secret_key = secret_key.into();
        self
    }

    /// Temporary STS token; empty clears it
    pub fn with_security_token(mut self, token: impl Into<String>) -> Self {
        let token = token.into();
        self.client.security_token = (!token.is_empty()).then_some(token);
        self
    }

    /// Topic to consume from
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Consumer group id
    pub fn with_group_id(mut self, group_id: impl Into<String>) -> Self {
        self.group_id = group_id.into();
        self
    }

    /// Messages requested per poll, clamped to 1-16
    pub fn with_batch_size(mut self, size: u32) -> Self {
        self.settings.batch_size = ConsumerSettings::clamp_batch_size(size);
        self
    }

    /// Long-poll wait in seconds, clamped to 0-30
    pub fn with_wait_seconds(mut self, seconds: u64) -> Self {
        self.settings.wait = Duration::from_secs(ConsumerSettings::clamp_wait_seconds(seconds));
        self
    }

    /// Which handler outcome triggers an acknowledgment
    pub fn with_ack_mode(mut self, mode: AckMode) -> Self {
        self.settings.ack_mode = mode;
        self
    }

    /// Bound the number of handlers running at once
    pub fn with_max_in_flight(mut self, limit: usize) -> Self {
        self.settings.max_in_flight = Some(limit.max(1));
        self
    }

    /// Pause after a failed poll before polling again
    pub fn with_poll_error_backoff(mut self, backoff: Duration) -> Self {
        self.settings.poll_error_backoff = backoff;
        self
    }

    /// Receive every non-benign error the consumer observes
    pub fn on_error<F>(mut self, callback: F) -> Self
    where
        F: Fn(QueueError) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(callback));
        self
    }

    /// Handle messages carrying `tag`; an empty tag handles every message
    pub fn handle<H>(mut self, tag: &str, handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        self.handlers.register(tag, Arc::new(handler));
        self
    }

    /// Handle every message with one handler, replacing per-tag handlers
    pub fn handle_all<H>(mut self, handler: H) -> Self
    where
        H: MessageHandler + 'static,
    {
        self.handlers.register_all(Arc::new(handler));
        self
    }

    /// Settings as configured so far
    pub fn settings(&self) -> &ConsumerSettings {
        &self.settings
    }

    /// Subscription expression the consumer will send
    pub fn tag_expression(&self) -> String {
        self.handlers.tag_expression()
    }

    /// Build a consumer over the HTTP endpoint described by the client fields
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoHandlers`] when no handler was
    /// registered, otherwise a configuration error for missing or invalid
    /// client settings, a request timeout not longer than the wait, or a
    /// missing topic or group.
    pub fn build(self) -> Result<QueueConsumer, QueueError> {
        self.check_handlers()?;
        self.client.validate()?;
        self.check_request_timeout()?;
        require("topic", &self.topic)?;
        require("group_id", &self.group_id)?;

        let binding = ConsumerBinding::new(self.group_id.clone(), self.handlers.tag_expression());
        let endpoint = HttpEndpoint::new(&self.client, self.topic.clone())?.with_consumer(binding);

        self.finish(Arc::new(endpoint))
    }

    /// Build a consumer over an already constructed endpoint
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::NoHandlers`] when no handler was registered.
    pub fn build_with_endpoint(
        self,
        endpoint: Arc<dyn QueueEndpoint>,
    ) -> Result<QueueConsumer, QueueError> {
        self.check_handlers()?;
        self.finish(endpoint)
    }

    /// A long poll only completes when the HTTP request outlives its wait
    fn check_request_timeout(&self) -> Result<(), ConfigurationError> {
        if self.client.request_timeout() <= self.settings.wait {
            return Err(ConfigurationError::Invalid {
                message: format!(
                    "request_timeout_seconds ({}) must exceed the long-poll wait ({}s)",
                    self.client.request_timeout_seconds,
                    self.settings.wait.as_secs()
                ),
            });
        }
        Ok(())
    }

    fn check_handlers(&self) -> Result<(), QueueError> {
        if self.handlers.is_empty() {
            return Err(ConfigurationError::NoHandlers.into());
        }
        Ok(())
    }

    fn finish(self, endpoint: Arc<dyn QueueEndpoint>) -> Result<QueueConsumer, QueueError> {
        info!(
            topic = %self.topic,
            group_id = %self.group_id,
            tags = %self.handlers.tag_expression(),
            batch_size = self.settings.batch_size,
            wait_seconds = self.settings.wait.as_secs(),
            "Built consumer"
        );

        Ok(QueueConsumer::new(
            endpoint,
            self.handlers,
            self.settings,
            self.on_error,
        ))
    }
}

impl Default for ConsumerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ConsumerBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsumerBuilder")
            .field("client", &self.client)
            .field("topic", &self.topic)
            .field("group_id", &self.group_id)
            .field("handlers", &self.handlers)
            .field("settings", &self.settings)
            .field("has_error_callback", &self.on_error.is_some())
            .finish()
    }
}
