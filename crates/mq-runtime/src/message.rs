//! Message types for queue operations including core domain identifiers.

use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

/// Property key the service uses for the scheduled delivery time.
pub const START_DELIVER_TIME_PROPERTY: &str = "__STARTDELIVERTIME";

/// Property key the service uses for the message key.
pub const MESSAGE_KEY_PROPERTY: &str = "KEYS";

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Identifier the service assigns to a published message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageId(String);

impl MessageId {
    /// Get message ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for MessageId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for MessageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "message_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Opaque token used to acknowledge a received message
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ReceiptHandle(String);

impl ReceiptHandle {
    /// Create new receipt handle
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Get handle string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ReceiptHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create timestamp from milliseconds since the Unix epoch
    pub fn from_millis(millis: i64) -> Option<Self> {
        DateTime::from_timestamp_millis(millis).map(Self)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Milliseconds since the Unix epoch, the unit the service uses on the wire
    pub fn as_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

// ============================================================================
// Message Types
// ============================================================================

/// Key/value property attached to a published message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Property {
    pub key: String,
    pub value: String,
}

impl Property {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A message to be published to a topic
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishRequest {
    pub body: String,
    pub tag: Option<String>,
    pub message_key: Option<String>,
    pub properties: HashMap<String, String>,
    /// Scheduled delivery time in milliseconds since the Unix epoch
    pub start_deliver_time: Option<i64>,
}

impl PublishRequest {
    /// Create new request with body
    pub fn new(body: impl Into<String>) -> Self {
        Self {
            body: body.into(),
            ..Self::default()
        }
    }

    /// Set the message tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        self.tag = if tag.is_empty() { None } else { Some(tag) };
        self
    }

    /// Set the message key
    pub fn with_message_key(mut self, key: impl Into<String>) -> Self {
        self.message_key = Some(key.into());
        self
    }

    /// Add properties, skipping entries with an empty key
    pub fn with_properties(mut self, properties: &[Property]) -> Self {
        for property in properties.iter().filter(|p| !p.key.is_empty()) {
            self.properties
                .insert(property.key.clone(), property.value.clone());
        }
        self
    }

    /// Schedule delivery at the given time
    pub fn with_start_deliver_time(mut self, at: Timestamp) -> Self {
        self.start_deliver_time = Some(at.as_millis());
        self
    }
}

/// A message received from the queue with delivery metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    pub message_id: MessageId,
    pub receipt_handle: ReceiptHandle,
    pub body: String,
    pub body_md5: Option<String>,
    pub tag: Option<String>,
    pub message_key: Option<String>,
    pub properties: HashMap<String, String>,
    pub publish_time: Option<Timestamp>,
    pub first_consume_time: Option<Timestamp>,
    pub next_consume_time: Option<Timestamp>,
    pub consumed_times: u32,
}

impl ReceivedMessage {
    /// Create a received message with only the fields every delivery carries
    pub fn new(message_id: MessageId, receipt_handle: ReceiptHandle, body: impl Into<String>) -> Self {
        Self {
            message_id,
            receipt_handle,
            body: body.into(),
            body_md5: None,
            tag: None,
            message_key: None,
            properties: HashMap::new(),
            publish_time: None,
            first_consume_time: None,
            next_consume_time: None,
            consumed_times: 1,
        }
    }

    /// Set the message tag
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tag = Some(tag.into());
        self
    }
}

/// Encode properties in the service's `key:value|` wire format
///
/// Entries are sorted by key so the encoding is stable. The message key and
/// scheduled delivery time travel as reserved properties.
pub fn encode_properties(request: &PublishRequest) -> String {
    let mut entries: Vec<(&str, String)> = request
        .properties
        .iter()
        .map(|(k, v)| (k.as_str(), v.clone()))
        .collect();

    if let Some(ref key) = request.message_key {
        entries.push((MESSAGE_KEY_PROPERTY, key.clone()));
    }
    if let Some(millis) = request.start_deliver_time {
        entries.push((START_DELIVER_TIME_PROPERTY, millis.to_string()));
    }
    entries.sort();

    entries
        .into_iter()
        .map(|(k, v)| format!("{}:{}|", k, v))
        .collect()
}

/// Decoded form of the `Properties` element on a received message
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodedProperties {
    pub message_key: Option<String>,
    pub start_deliver_time: Option<i64>,
    pub user: HashMap<String, String>,
}

/// Decode the `key:value|` wire format, separating reserved properties
pub fn decode_properties(raw: &str) -> DecodedProperties {
    let mut decoded = DecodedProperties::default();

    for entry in raw.split('|').filter(|e| !e.is_empty()) {
        let Some((key, value)) = entry.split_once(':') else {
            continue;
        };
        match key {
            MESSAGE_KEY_PROPERTY => decoded.message_key = Some(value.to_string()),
            START_DELIVER_TIME_PROPERTY => decoded.start_deliver_time = value.parse().ok(),
            _ => {
                decoded.user.insert(key.to_string(), value.to_string());
            }
        }
    }

    decoded
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
