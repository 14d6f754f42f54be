//! Publishing messages to a topic.

use crate::config::{require, ClientConfig};
use crate::endpoint::QueueEndpoint;
use crate::error::{QueueError, ValidationError};
use crate::message::{MessageId, Property, PublishRequest};
use crate::providers::HttpEndpoint;
use chrono::{DateTime, Utc};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
#[path = "producer_tests.rs"]
mod tests;

/// Publishes messages through a [`QueueEndpoint`], applying a default tag
///
/// Properties with an empty key are dropped. Every send returns the message
/// id the service assigned.
#[derive(Clone)]
pub struct QueueProducer {
    endpoint: Arc<dyn QueueEndpoint>,
    default_tag: Option<String>,
}

impl QueueProducer {
    /// Create a producer; an empty default tag sends untagged messages
    pub fn new(endpoint: Arc<dyn QueueEndpoint>, default_tag: Option<String>) -> Self {
        Self {
            endpoint,
            default_tag: default_tag.filter(|tag| !tag.is_empty()),
        }
    }

    /// Tag applied by the untagged sends
    pub fn default_tag(&self) -> Option<&str> {
        self.default_tag.as_deref()
    }

    /// Publish a fully prepared request as-is
    pub async fn send(&self, request: PublishRequest) -> Result<MessageId, QueueError> {
        let tag = request.tag.clone();
        let scheduled = request.start_deliver_time;

        let message_id = self.endpoint.publish(request).await?;
        debug!(
            message_id = %message_id,
            tag = ?tag,
            start_deliver_time = ?scheduled,
            "Message sent"
        );
        Ok(message_id)
    }

    /// Publish with the default tag
    pub async fn send_msg(
        &self,
        body: impl Into<String>,
        properties: &[Property],
    ) -> Result<MessageId, QueueError> {
        self.send(self.request(body, properties)).await
    }

    /// Publish with an explicit tag
    pub async fn send_tag_msg(
        &self,
        tag: &str,
        body: impl Into<String>,
        properties: &[Property],
    ) -> Result<MessageId, QueueError> {
        let request = PublishRequest::new(body)
            .with_tag(tag)
            .with_properties(properties);
        self.send(request).await
    }

    /// Publish for delivery after `delay`; a zero delay delivers immediately
    pub async fn send_delay_msg(
        &self,
        body: impl Into<String>,
        delay: Duration,
        properties: &[Property],
    ) -> Result<MessageId, QueueError> {
        let mut request = self.request(body, properties);
        request.start_deliver_time = delayed_deliver_time(Utc::now(), delay)?;
        self.send(request).await
    }

    /// Publish for delivery at `deliver_at`; a time not in the future
    /// delivers immediately
    pub async fn send_deliver_msg(
        &self,
        body: impl Into<String>,
        deliver_at: DateTime<Utc>,
        properties: &[Property],
    ) -> Result<MessageId, QueueError> {
        let mut request = self.request(body, properties);
        request.start_deliver_time = scheduled_deliver_time(Utc::now(), deliver_at);
        self.send(request).await
    }

    fn request(&self, body: impl Into<String>, properties: &[Property]) -> PublishRequest {
        let request = PublishRequest::new(body).with_properties(properties);
        match self.default_tag {
            Some(ref tag) => request.with_tag(tag.as_str()),
            None => request,
        }
    }
}

impl fmt::Debug for QueueProducer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueProducer")
            .field("default_tag", &self.default_tag)
            .finish()
    }
}

/// Delivery time for a relative delay, in epoch milliseconds
fn delayed_deliver_time(
    now: DateTime<Utc>,
    delay: Duration,
) -> Result<Option<i64>, ValidationError> {
    if delay.is_zero() {
        return Ok(None);
    }

    let delay = chrono::Duration::from_std(delay).map_err(|e| ValidationError::InvalidFormat {
        field: "delay".to_string(),
        message: e.to_string(),
    })?;
    let deliver_at = now
        .checked_add_signed(delay)
        .ok_or_else(|| ValidationError::InvalidFormat {
            field: "delay".to_string(),
            message: "delivery time out of range".to_string(),
        })?;

    Ok(Some(deliver_at.timestamp_millis()))
}

/// Delivery time for an absolute instant, only when it lies in the future
fn scheduled_deliver_time(now: DateTime<Utc>, deliver_at: DateTime<Utc>) -> Option<i64> {
    (deliver_at > now).then(|| deliver_at.timestamp_millis())
}

// ============================================================================
// Builder
// ============================================================================

/// Builder for [`QueueProducer`]
#[derive(Debug, Default)]
pub struct ProducerBuilder {
    client: ClientConfig,
    topic: String,
    tag: Option<String>,
}

impl ProducerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace all client fields at once
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

    /// Topic to publish to
    pub fn with_topic(mut self, topic: impl Into<String>) -> Self {
        self.topic = topic.into();
        self
    }

    /// Tag applied by [`QueueProducer::send_msg`] and the scheduled sends
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }

    /// Build a producer over the HTTP endpoint described by the client fields
    ///
    /// # Errors
    ///
    /// Returns a configuration error for missing or invalid client settings
    /// or an empty topic.
    pub fn build(self) -> Result<QueueProducer, QueueError> {
        self.client.validate()?;
        require("topic", &self.topic)?;

        let endpoint = HttpEndpoint::new(&self.client, self.topic.clone())?;
        info!(topic = %self.topic, tag = ?self.tag, "Built producer");
        Ok(QueueProducer::new(Arc::new(endpoint), self.tag))
    }

    /// Build a producer over an already constructed endpoint
    pub fn build_with_endpoint(self, endpoint: Arc<dyn QueueEndpoint>) -> QueueProducer {
        QueueProducer::new(endpoint, self.tag)
    }
}
