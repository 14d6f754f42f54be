//! RocketMQ HTTP endpoint implementation.
//!
//! Talks to the service's REST interface directly with `reqwest`, signing each
//! request with the `MQ` HMAC-SHA1 scheme. Keeping the transport as plain HTTP
//! calls means unit tests can run against a mocked server.
//!
//! ## Operations
//!
//! - **poll**: `GET /topics/{topic}/messages?consumer=..&numOfMessages=..&waitseconds=..`
//! - **acknowledge**: `DELETE /topics/{topic}/messages?consumer=..` with a
//!   `ReceiptHandles` XML body
//! - **publish**: `POST /topics/{topic}/messages` with a `Message` XML body
//!
//! Instance namespaces travel as the `ns` query parameter and the consumer's
//! tag expression as `tag`.
//!
//! ## Example
//!
//! ```no_run
//! use mq_runtime::providers::{ConsumerBinding, HttpEndpoint};
//! use mq_runtime::ClientConfig;
//!
//! # fn example() -> Result<(), mq_runtime::QueueError> {
//! let config = ClientConfig {
//!     endpoint: "http://1234.mqrest.cn-hangzhou.aliyuncs.com".to_string(),
//!     access_key: "access-key".to_string(),
//!     secret_key: "secret-key".to_string(),
//!     ..Default::default()
//! };
//!
//! let endpoint = HttpEndpoint::new(&config, "orders")?
//!     .with_consumer(ConsumerBinding::new("GID_orders", "created||paid"));
//! # Ok(())
//! # }
//! ```

use crate::config::ClientConfig;
use crate::endpoint::{QueueEndpoint, MAX_BATCH_SIZE, MAX_WAIT_SECONDS};
use crate::error::{ConfigurationError, QueueError, SerializationError, NO_MESSAGE_MARKER};
use crate::message::{
    decode_properties, encode_properties, MessageId, PublishRequest, ReceiptHandle,
    ReceivedMessage, Timestamp,
};
use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::{Client as HttpClient, Method};
use sha1::Sha1;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, trace};

#[cfg(test)]
#[path = "http_tests.rs"]
mod tests;

/// Protocol version sent in the `x-mq-version` header
pub const API_VERSION: &str = "2015-06-06";

const CONTENT_TYPE: &str = "text/xml;charset=utf-8";
const XML_NAMESPACE: &str = "http://mq.aliyuncs.com/doc/v1/";
const MQ_HEADER_PREFIX: &str = "x-mq-";

// ============================================================================
// Request Signing
// ============================================================================

type HmacSha1 = Hmac<Sha1>;

/// Signer for the `MQ` authorization scheme
///
/// The string to sign is
/// `METHOD\nCONTENT-MD5\nCONTENT-TYPE\nDATE\n{x-mq-* headers}{resource}`
/// where every `x-mq-*` header contributes a sorted `key:value\n` line and
/// the resource is the request path plus query string.
#[derive(Clone)]
struct MqSigner {
    access_key: String,
    secret_key: String,
    security_token: Option<String>,
}

impl MqSigner {
    fn new(config: &ClientConfig) -> Self {
        Self {
            access_key: config.access_key.clone(),
            secret_key: config.secret_key.clone(),
            security_token: config
                .security_token
                .clone()
                .filter(|token| !token.is_empty()),
        }
    }

    /// Headers every request carries, including `Authorization`
    fn sign_request(
        &self,
        method: &str,
        resource: &str,
        timestamp: &DateTime<Utc>,
    ) -> Result<Vec<(&'static str, String)>, QueueError> {
        let date = timestamp.format("%a, %d %b %Y %H:%M:%S GMT").to_string();

        let mut mq_headers = BTreeMap::new();
        mq_headers.insert("x-mq-version", API_VERSION.to_string());

        let string_to_sign = Self::string_to_sign(method, "", CONTENT_TYPE, &date, &mq_headers, resource);
        let signature = self.signature(&string_to_sign)?;

        let mut headers = vec![
            ("Date", date),
            ("Content-Type", CONTENT_TYPE.to_string()),
            ("x-mq-version", API_VERSION.to_string()),
            (
                "Authorization",
                format!("MQ {}:{}", self.access_key, signature),
            ),
        ];
        if let Some(ref token) = self.security_token {
            headers.push(("security-token", token.clone()));
        }

        Ok(headers)
    }

    fn string_to_sign(
        method: &str,
        content_md5: &str,
        content_type: &str,
        date: &str,
        mq_headers: &BTreeMap<&str, String>,
        resource: &str,
    ) -> String {
        let canonical_headers: String = mq_headers
            .iter()
            .filter(|(k, _)| k.starts_with(MQ_HEADER_PREFIX))
            .map(|(k, v)| format!("{}:{}\n", k, v))
            .collect();

        format!(
            "{}\n{}\n{}\n{}\n{}{}",
            method, content_md5, content_type, date, canonical_headers, resource
        )
    }

    /// Base64 HMAC-SHA1 of the string to sign
    fn signature(&self, string_to_sign: &str) -> Result<String, QueueError> {
        let mut mac = HmacSha1::new_from_slice(self.secret_key.as_bytes()).map_err(|e| {
            QueueError::Configuration(ConfigurationError::Invalid {
                message: format!("secret key cannot be used for signing: {}", e),
            })
        })?;
        mac.update(string_to_sign.as_bytes());
        Ok(STANDARD.encode(mac.finalize().into_bytes()))
    }
}

// ============================================================================
// HTTP Endpoint
// ============================================================================

/// Consumer side of an endpoint: group and subscription tag expression
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerBinding {
    pub group_id: String,

    /// `tag1||tag2`, or empty to receive every tag
    pub tag_expression: String,
}

impl ConsumerBinding {
    /// Bind a consumer group with the tag expression it subscribes to
    pub fn new(group_id: impl Into<String>, tag_expression: impl Into<String>) -> Self {
        Self {
            group_id: group_id.into(),
            tag_expression: tag_expression.into(),
        }
    }
}

/// Queue endpoint speaking the RocketMQ HTTP protocol for one topic
///
/// Polling and acknowledging require a [`ConsumerBinding`]; publishing only
/// needs the topic. The endpoint is cheap to share behind an `Arc`.
pub struct HttpEndpoint {
    http_client: HttpClient,
    signer: MqSigner,
    base_url: String,
    instance_id: Option<String>,
    topic: String,
    binding: Option<ConsumerBinding>,
    request_timeout: Duration,
}

impl HttpEndpoint {
    /// Create an endpoint for `topic`
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the client settings are incomplete,
    /// the topic is empty, or the HTTP client cannot be built.
    pub fn new(config: &ClientConfig, topic: impl Into<String>) -> Result<Self, QueueError> {
        config.validate()?;

        let topic = topic.into();
        if topic.trim().is_empty() {
            return Err(ConfigurationError::Missing {
                key: "topic".to_string(),
            }
            .into());
        }

        let request_timeout = config.request_timeout();
        let http_client = HttpClient::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("Failed to create HTTP client: {}", e),
            })?;

        Ok(Self {
            http_client,
            signer: MqSigner::new(config),
            base_url: config.endpoint.trim_end_matches('/').to_string(),
            instance_id: config
                .instance_id
                .clone()
                .filter(|id| !id.is_empty()),
            topic,
            binding: None,
            request_timeout,
        })
    }

    /// Bind the endpoint to a consumer group and tag expression
    pub fn with_consumer(mut self, binding: ConsumerBinding) -> Self {
        self.binding = Some(binding);
        self
    }

    /// Topic this endpoint addresses
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Consumer binding, when one was attached
    pub fn binding(&self) -> Option<&ConsumerBinding> {
        self.binding.as_ref()
    }

    fn consumer_binding(&self) -> Result<&ConsumerBinding, QueueError> {
        self.binding.as_ref().ok_or_else(|| {
            QueueError::Configuration(ConfigurationError::Invalid {
                message: format!("endpoint for topic '{}' has no consumer group", self.topic),
            })
        })
    }

    /// Request path plus encoded query string; this is also the signed resource
    fn resource(&self, query: &[(&str, String)]) -> String {
        let path = format!("/topics/{}/messages", urlencoding::encode(&self.topic));
        if query.is_empty() {
            return path;
        }

        let query_string = query
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&");
        format!("{}?{}", path, query_string)
    }

    fn with_namespace(&self, mut query: Vec<(&'static str, String)>) -> Vec<(&'static str, String)> {
        if let Some(ref ns) = self.instance_id {
            query.push(("ns", ns.clone()));
        }
        query
    }

    /// Send a signed request and return the response body
    async fn make_request(
        &self,
        method: Method,
        query: &[(&str, String)],
        body: Option<String>,
    ) -> Result<String, QueueError> {
        let resource = self.resource(query);
        let headers = self
            .signer
            .sign_request(method.as_str(), &resource, &Utc::now())?;

        let url = format!("{}{}", self.base_url, resource);
        trace!(method = %method, url = %url, "Sending request");

        let mut request = self.http_client.request(method, &url);
        for (key, value) in headers {
            request = request.header(key, value);
        }
        if let Some(body) = body {
            request = request.body(body);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                QueueError::Timeout {
                    duration: self.request_timeout,
                }
            } else if e.is_connect() {
                QueueError::ConnectionFailed {
                    message: format!("Connection failed: {}", e),
                }
            } else {
                QueueError::ConnectionFailed {
                    message: format!("HTTP request failed: {}", e),
                }
            }
        })?;

        let status = response.status();
        let response_body = response
            .text()
            .await
            .map_err(|e| QueueError::ConnectionFailed {
                message: format!("Failed to read response body: {}", e),
            })?;

        if !status.is_success() {
            return Err(map_service_error(status.as_u16(), &response_body));
        }

        Ok(response_body)
    }
}

impl fmt::Debug for HttpEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HttpEndpoint")
            .field("base_url", &self.base_url)
            .field("instance_id", &self.instance_id)
            .field("topic", &self.topic)
            .field("binding", &self.binding)
            .finish()
    }
}

#[async_trait]
impl QueueEndpoint for HttpEndpoint {
    async fn poll(
        &self,
        max_messages: u32,
        wait: Duration,
    ) -> Result<Vec<ReceivedMessage>, QueueError> {
        let binding = self.consumer_binding()?;

        let mut query = vec![
            ("consumer", binding.group_id.clone()),
            (
                "numOfMessages",
                max_messages.clamp(1, MAX_BATCH_SIZE).to_string(),
            ),
            (
                "waitseconds",
                wait.as_secs().min(MAX_WAIT_SECONDS).to_string(),
            ),
        ];
        query = self.with_namespace(query);
        if !binding.tag_expression.is_empty() {
            query.push(("tag", binding.tag_expression.clone()));
        }

        let body = self.make_request(Method::GET, &query, None).await?;
        let messages = parse_messages(&body)?;

        debug!(
            topic = %self.topic,
            count = messages.len(),
            "Polled messages"
        );
        Ok(messages)
    }

    async fn acknowledge(&self, receipts: &[ReceiptHandle]) -> Result<(), QueueError> {
        if receipts.is_empty() {
            return Ok(());
        }
        let binding = self.consumer_binding()?;

        let query = self.with_namespace(vec![("consumer", binding.group_id.clone())]);
        self.make_request(Method::DELETE, &query, Some(receipt_handles_xml(receipts)))
            .await?;

        debug!(
            topic = %self.topic,
            count = receipts.len(),
            "Acknowledged messages"
        );
        Ok(())
    }

    async fn publish(&self, request: PublishRequest) -> Result<MessageId, QueueError> {
        let query = self.with_namespace(Vec::new());
        let body = self
            .make_request(Method::POST, &query, Some(publish_xml(&request)))
            .await?;

        let message_id = parse_publish_response(&body)?;
        debug!(
            topic = %self.topic,
            message_id = %message_id,
            tag = ?request.tag,
            "Published message"
        );
        Ok(message_id)
    }
}

// ============================================================================
// XML Encoding
// ============================================================================

fn receipt_handles_xml(receipts: &[ReceiptHandle]) -> String {
    let handles: String = receipts
        .iter()
        .map(|r| {
            format!(
                "<ReceiptHandle>{}</ReceiptHandle>",
                quick_xml::escape::escape(r.as_str())
            )
        })
        .collect();

    format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><ReceiptHandles xmlns="{}">{}</ReceiptHandles>"#,
        XML_NAMESPACE, handles
    )
}

fn publish_xml(request: &PublishRequest) -> String {
    let mut xml = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?><Message xmlns="{}"><MessageBody>{}</MessageBody>"#,
        XML_NAMESPACE,
        quick_xml::escape::escape(request.body.as_str())
    );

    if let Some(ref tag) = request.tag {
        xml.push_str(&format!(
            "<MessageTag>{}</MessageTag>",
            quick_xml::escape::escape(tag.as_str())
        ));
    }

    let properties = encode_properties(request);
    if !properties.is_empty() {
        xml.push_str(&format!(
            "<Properties>{}</Properties>",
            quick_xml::escape::escape(properties.as_str())
        ));
    }

    xml.push_str("</Message>");
    xml
}

// ============================================================================
// XML Decoding
// ============================================================================

/// Collect the text children of every `record` element, keyed by local name
fn collect_records(
    xml: &str,
    record: &[u8],
) -> Result<Vec<HashMap<String, String>>, SerializationError> {
    let mut reader = Reader::from_str(xml);
    reader.trim_text(true);

    let mut records = Vec::new();
    let mut current: Option<HashMap<String, String>> = None;
    let mut field: Option<String> = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => {
                let name = e.local_name();
                if name.as_ref() == record {
                    current = Some(HashMap::new());
                } else if current.is_some() {
                    field = Some(String::from_utf8_lossy(name.as_ref()).into_owned());
                }
            }
            Ok(Event::Text(e)) => {
                if let (Some(fields), Some(name)) = (current.as_mut(), field.as_ref()) {
                    let text = e.unescape().map_err(|e| SerializationError::Xml {
                        message: format!("Failed to unescape text: {}", e),
                    })?;
                    fields.insert(name.clone(), text.into_owned());
                }
            }
            Ok(Event::CData(e)) => {
                if let (Some(fields), Some(name)) = (current.as_mut(), field.as_ref()) {
                    let text = String::from_utf8_lossy(&e.into_inner()).into_owned();
                    fields.insert(name.clone(), text);
                }
            }
            Ok(Event::End(ref e)) => {
                if e.local_name().as_ref() == record {
                    if let Some(fields) = current.take() {
                        records.push(fields);
                    }
                }
                field = None;
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(SerializationError::Xml {
                    message: format!("XML parsing error: {}", e),
                })
            }
            _ => {}
        }
        buf.clear();
    }

    Ok(records)
}

fn required<'a>(
    fields: &'a HashMap<String, String>,
    element: &str,
) -> Result<&'a str, SerializationError> {
    fields
        .get(element)
        .map(String::as_str)
        .ok_or_else(|| SerializationError::MissingElement {
            element: element.to_string(),
        })
}

fn timestamp_field(fields: &HashMap<String, String>, element: &str) -> Option<Timestamp> {
    fields
        .get(element)
        .and_then(|v| v.parse::<i64>().ok())
        .and_then(Timestamp::from_millis)
}

/// Parse a poll response body into received messages
fn parse_messages(xml: &str) -> Result<Vec<ReceivedMessage>, QueueError> {
    let records = collect_records(xml, b"Message")?;

    records
        .iter()
        .map(|fields| parse_message(fields).map_err(QueueError::from))
        .collect()
}

fn parse_message(fields: &HashMap<String, String>) -> Result<ReceivedMessage, SerializationError> {
    let raw_id = required(fields, "MessageId")?;
    let message_id = MessageId::from_str(raw_id).map_err(|_| SerializationError::InvalidValue {
        element: "MessageId".to_string(),
        value: raw_id.to_string(),
    })?;
    let receipt_handle = ReceiptHandle::new(required(fields, "ReceiptHandle")?);
    let body = fields.get("MessageBody").cloned().unwrap_or_default();

    let mut message = ReceivedMessage::new(message_id, receipt_handle, body);
    message.body_md5 = fields.get("MessageBodyMD5").cloned();
    message.tag = fields
        .get("MessageTag")
        .filter(|tag| !tag.is_empty())
        .cloned();
    message.publish_time = timestamp_field(fields, "PublishTime");
    message.first_consume_time = timestamp_field(fields, "FirstConsumeTime");
    message.next_consume_time = timestamp_field(fields, "NextConsumeTime");

    if let Some(raw) = fields.get("ConsumedTimes") {
        message.consumed_times = raw.parse().map_err(|_| SerializationError::InvalidValue {
            element: "ConsumedTimes".to_string(),
            value: raw.clone(),
        })?;
    }

    if let Some(raw) = fields.get("Properties") {
        let decoded = decode_properties(raw);
        message.message_key = decoded.message_key;
        message.properties = decoded.user;
    }

    Ok(message)
}

fn parse_publish_response(xml: &str) -> Result<MessageId, QueueError> {
    let records = collect_records(xml, b"Message")?;
    let fields = records
        .first()
        .ok_or_else(|| SerializationError::MissingElement {
            element: "Message".to_string(),
        })?;

    let raw_id = required(fields, "MessageId")?;
    MessageId::from_str(raw_id).map_err(|_| {
        QueueError::from(SerializationError::InvalidValue {
            element: "MessageId".to_string(),
            value: raw_id.to_string(),
        })
    })
}

/// Map a non-success response to a queue error
///
/// Handles both `<Error><Code>` bodies and the `<Errors><Error><ErrorCode>`
/// form used for batch acknowledgments.
fn map_service_error(status_code: u16, xml: &str) -> QueueError {
    let fields = collect_records(xml, b"Error")
        .ok()
        .and_then(|records| records.into_iter().next())
        .unwrap_or_default();

    let code = fields
        .get("Code")
        .or_else(|| fields.get("ErrorCode"))
        .cloned()
        .unwrap_or_else(|| "Unknown".to_string());
    let message = fields
        .get("Message")
        .or_else(|| fields.get("ErrorMessage"))
        .cloned()
        .unwrap_or_else(|| format!("HTTP status {}", status_code));
    let request_id = fields.get("RequestId").cloned();

    match code.as_str() {
        NO_MESSAGE_MARKER => QueueError::NoMessage,
        "ReceiptHandleError" => QueueError::InvalidReceipt {
            receipt: fields.get("ReceiptHandle").cloned().unwrap_or_default(),
            message,
        },
        "SignatureDoesNotMatch" | "AccessDenied" | "InvalidAccessKeyId"
        | "InvalidAccessKeyId.NotFound" | "InvalidSecurityToken" => {
            QueueError::AuthenticationFailed {
                message: format!("{}: {}", code, message),
            }
        }
        _ if status_code == 401 || status_code == 403 => QueueError::AuthenticationFailed {
            message: format!("{}: {}", code, message),
        },
        _ => QueueError::ProviderError {
            code,
            message,
            request_id,
        },
    }
}
