//! Common test utilities for mq-runtime integration tests
//!
//! This module provides:
//! - A recording handler capturing every delivered message
//! - An error sink for the consumer's error callback
//! - Polling helpers for asynchronous assertions

use mq_runtime::{Message, QueueError};
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// What a handler saw for one delivery
#[derive(Debug, Clone)]
#[allow(dead_code)]
pub struct Delivery {
    pub body: String,
    pub tag: Option<String>,
    pub consumed_times: u32,
    pub received_at: Instant,
}

/// Handler recording every delivery, succeeding or failing on demand
#[derive(Clone, Default)]
pub struct Recorder {
    deliveries: Arc<Mutex<Vec<Delivery>>>,
}

#[allow(dead_code)]
impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.deliveries.lock().unwrap().clone()
    }

    pub fn bodies(&self) -> Vec<String> {
        self.deliveries().into_iter().map(|d| d.body).collect()
    }

    pub fn count(&self) -> usize {
        self.deliveries.lock().unwrap().len()
    }

    /// Handler that records the message and succeeds
    pub fn succeeding(
        &self,
    ) -> impl Fn(Message) -> std::future::Ready<anyhow::Result<()>> + Send + Sync + 'static {
        let deliveries = Arc::clone(&self.deliveries);
        move |message: Message| {
            record(&deliveries, &message);
            std::future::ready(Ok(()))
        }
    }

    /// Handler that records the message and fails
    pub fn failing(
        &self,
    ) -> impl Fn(Message) -> std::future::Ready<anyhow::Result<()>> + Send + Sync + 'static {
        let deliveries = Arc::clone(&self.deliveries);
        move |message: Message| {
            record(&deliveries, &message);
            std::future::ready(Err(anyhow::anyhow!("handler rejected {}", message.body())))
        }
    }
}

fn record(deliveries: &Mutex<Vec<Delivery>>, message: &Message) {
    deliveries.lock().unwrap().push(Delivery {
        body: message.body().to_string(),
        tag: message.tag().map(str::to_string),
        consumed_times: message.entry().consumed_times,
        received_at: Instant::now(),
    });
}

/// Collects errors passed to the consumer's error callback
#[derive(Clone, Default)]
pub struct ErrorSink {
    errors: Arc<Mutex<Vec<String>>>,
}

#[allow(dead_code)]
impl ErrorSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn callback(&self) -> impl Fn(QueueError) + Send + Sync + 'static {
        let errors = Arc::clone(&self.errors);
        move |error: QueueError| errors.lock().unwrap().push(error.to_string())
    }

    pub fn errors(&self) -> Vec<String> {
        self.errors.lock().unwrap().clone()
    }
}

/// Poll `condition` until it holds or `timeout` elapses
pub async fn wait_until<F>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition()
}

/// Poll an async `condition` until it holds or `timeout` elapses
#[allow(dead_code)]
pub async fn wait_until_async<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    condition().await
}
