//! # MQ Runtime
//!
//! Consumer and producer runtime for the RocketMQ HTTP API.
//!
//! This library provides:
//! - A long-polling consumer that dispatches each message to a tag-routed
//!   handler in its own task
//! - Acknowledgment of processed messages by receipt handle
//! - A producer with tagged, delayed and scheduled sends
//! - An HTTP transport speaking the service's signed XML protocol
//! - An in-memory transport for tests and local development
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Message structures, identifiers and property encoding
//! - [`endpoint`] - The transport trait consumers and producers run against
//! - [`handler`] - Message handlers and tag routing
//! - [`consumer`] / [`consumer_builder`] - The poll loop and its construction
//! - [`producer`] - Publishing
//! - [`providers`] - HTTP and in-memory transports
//!
//! ## Example
//!
//! ```no_run
//! use mq_runtime::{Consumer, ConsumerBuilder, Message, ProducerBuilder};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> Result<(), mq_runtime::QueueError> {
//! let producer = ProducerBuilder::new()
//!     .with_endpoint("http://1234.mqrest.cn-hangzhou.aliyuncs.com")
//!     .with_access_key("access-key")
//!     .with_secret_key("secret-key")
//!     .with_topic("orders")
//!     .with_tag("created")
//!     .build()?;
//! producer.send_msg(r#"{"order":42}"#, &[]).await?;
//!
//! let consumer = ConsumerBuilder::new()
//!     .with_endpoint("http://1234.mqrest.cn-hangzhou.aliyuncs.com")
//!     .with_access_key("access-key")
//!     .with_secret_key("secret-key")
//!     .with_topic("orders")
//!     .with_group_id("GID_orders")
//!     .handle_all(|message: Message| async move {
//!         println!("{}", message.body());
//!         Ok::<(), anyhow::Error>(())
//!     })
//!     .build()?;
//!
//! let shutdown = CancellationToken::new();
//! consumer.start(&shutdown);
//! # Ok(())
//! # }
//! ```

// Module declarations
pub mod config;
pub mod consumer;
pub mod consumer_builder;
pub mod endpoint;
pub mod error;
pub mod handler;
pub mod message;
pub mod producer;
pub mod providers;

// Re-export commonly used types at crate root for convenience
pub use config::{ClientConfig, InMemoryConfig};
pub use consumer::{AckMode, Consumer, ConsumerSettings, ErrorCallback, QueueConsumer};
pub use consumer_builder::ConsumerBuilder;
pub use endpoint::{QueueEndpoint, TagFilter, MAX_BATCH_SIZE, MAX_WAIT_SECONDS};
pub use error::{ConfigurationError, QueueError, SerializationError, ValidationError};
pub use handler::{HandlerRegistry, Message, MessageHandler, SharedHandler};
pub use message::{MessageId, Property, PublishRequest, ReceiptHandle, ReceivedMessage, Timestamp};
pub use producer::{ProducerBuilder, QueueProducer};
pub use providers::{ConsumerBinding, HttpEndpoint, InMemoryEndpoint};

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
