//! Queue endpoint implementations.
//!
//! Concrete implementations of the [`QueueEndpoint`](crate::QueueEndpoint)
//! trait: the RocketMQ HTTP transport and an in-memory emulation.

pub mod http;
pub mod memory;

pub use http::{ConsumerBinding, HttpEndpoint};
pub use memory::InMemoryEndpoint;
