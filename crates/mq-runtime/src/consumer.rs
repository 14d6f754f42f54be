//! Long-poll consumer loop with concurrent, tag-routed dispatch.
//!
//! A [`QueueConsumer`] runs one background task that repeatedly long-polls its
//! [`QueueEndpoint`] and hands every received message to the matching handler
//! in a task of its own. Dispatch is fire-and-forget: the next poll starts
//! without waiting for handlers, so slow handlers accumulate unless
//! [`ConsumerSettings::max_in_flight`] is set.
//!
//! Errors never stop the loop. The benign "no message" result of an empty poll
//! is swallowed; everything else goes to the optional error callback.

use crate::endpoint::{QueueEndpoint, MAX_BATCH_SIZE, MAX_WAIT_SECONDS};
use crate::error::QueueError;
use crate::handler::{HandlerRegistry, Message, SharedHandler};
use crate::message::ReceivedMessage;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

#[cfg(test)]
#[path = "consumer_tests.rs"]
mod tests;

/// Callback receiving every non-benign error the consumer observes
pub type ErrorCallback = Arc<dyn Fn(QueueError) + Send + Sync>;

/// When a handled message is acknowledged to the service
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum AckMode {
    /// Acknowledge only messages whose handler failed; successful messages
    /// are left to the service's visibility timeout
    #[default]
    OnFailure,
    /// Acknowledge only messages whose handler succeeded
    OnSuccess,
}

/// Polling and dispatch settings
#[derive(Debug, Clone)]
pub struct ConsumerSettings {
    /// Messages requested per poll, 1-16
    pub batch_size: u32,

    /// Long-poll wait, 0-30 seconds
    pub wait: Duration,

    /// Which handler outcome triggers an acknowledgment
    pub ack_mode: AckMode,

    /// Upper bound on concurrently running handlers; unbounded when `None`
    pub max_in_flight: Option<usize>,

    /// Pause after a non-benign poll error; zero polls again immediately
    pub poll_error_backoff: Duration,
}

impl Default for ConsumerSettings {
    fn default() -> Self {
        Self {
            batch_size: 1,
            wait: Duration::from_secs(5),
            ack_mode: AckMode::OnFailure,
            max_in_flight: None,
            poll_error_backoff: Duration::ZERO,
        }
    }
}

impl ConsumerSettings {
    /// Clamp a requested batch size into the range the service accepts
    pub fn clamp_batch_size(requested: u32) -> u32 {
        requested.clamp(1, MAX_BATCH_SIZE)
    }

    /// Clamp a requested wait into the range the service accepts
    pub fn clamp_wait_seconds(requested: u64) -> u64 {
        requested.min(MAX_WAIT_SECONDS)
    }
}

/// Lifecycle of a message consumer
pub trait Consumer: Send + Sync {
    /// Start polling in the background; a no-op while already running
    fn start(&self, parent: &CancellationToken);

    /// Stop polling; a no-op when not running. Does not wait for handlers.
    fn stop(&self);

    /// Whether a poll loop is currently active
    fn is_running(&self) -> bool;
}

/// State shared between the consumer handle and its background tasks
struct ConsumerShared {
    endpoint: Arc<dyn QueueEndpoint>,
    handlers: HandlerRegistry,
    settings: ConsumerSettings,
    on_error: Option<ErrorCallback>,
    in_flight: Option<Arc<Semaphore>>,
}

/// Consumer driving a [`QueueEndpoint`] with a [`HandlerRegistry`]
pub struct QueueConsumer {
    shared: Arc<ConsumerShared>,
    running: Mutex<Option<CancellationToken>>,
}

impl QueueConsumer {
    /// Create a consumer; prefer [`crate::ConsumerBuilder`], which validates
    /// the registry and clamps the settings
    pub fn new(
        endpoint: Arc<dyn QueueEndpoint>,
        handlers: HandlerRegistry,
        settings: ConsumerSettings,
        on_error: Option<ErrorCallback>,
    ) -> Self {
        let in_flight = settings
            .max_in_flight
            .map(|limit| Arc::new(Semaphore::new(limit.max(1))));

        Self {
            shared: Arc::new(ConsumerShared {
                endpoint,
                handlers,
                settings,
                on_error,
                in_flight,
            }),
            running: Mutex::new(None),
        }
    }

    /// Settings the poll loop runs with
    pub fn settings(&self) -> &ConsumerSettings {
        &self.shared.settings
    }

    /// Handlers messages are routed to
    pub fn handlers(&self) -> &HandlerRegistry {
        &self.shared.handlers
    }

    fn lock_running(&self) -> MutexGuard<'_, Option<CancellationToken>> {
        // The guarded value is a plain Option, so a poisoned lock is still consistent.
        match self.running.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Consumer for QueueConsumer {
    fn start(&self, parent: &CancellationToken) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            error!("Consumer started outside a Tokio runtime; not polling");
            return;
        };

        let mut running = self.lock_running();
        if running.is_some() {
            debug!("Consumer already running; ignoring start");
            return;
        }

        let token = parent.child_token();
        *running = Some(token.clone());

        let shared = Arc::clone(&self.shared);
        runtime.spawn(run_poll_loop(shared, token));
    }

    fn stop(&self) {
        if let Some(token) = self.lock_running().take() {
            info!("Stopping consumer");
            token.cancel();
        }
    }

    fn is_running(&self) -> bool {
        self.lock_running()
            .as_ref()
            .is_some_and(|token| !token.is_cancelled())
    }
}

impl Drop for QueueConsumer {
    fn drop(&mut self) {
        self.stop();
    }
}

impl fmt::Debug for QueueConsumer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueueConsumer")
            .field("handlers", &self.shared.handlers)
            .field("settings", &self.shared.settings)
            .field("has_error_callback", &self.shared.on_error.is_some())
            .field("running", &self.is_running())
            .finish()
    }
}

/// Poll until the token is cancelled
async fn run_poll_loop(shared: Arc<ConsumerShared>, token: CancellationToken) {
    info!(
        batch_size = shared.settings.batch_size,
        wait_seconds = shared.settings.wait.as_secs(),
        tags = %shared.handlers.tag_expression(),
        "Consumer poll loop started"
    );

    while !token.is_cancelled() {
        shared.poll_once(&token).await;
    }

    info!("Consumer poll loop stopped");
}

impl ConsumerShared {
    /// Run one poll cycle, resolved by exactly one of: batch, error, cancellation
    async fn poll_once(self: &Arc<Self>, token: &CancellationToken) {
        let endpoint = Arc::clone(&self.endpoint);
        let batch_size = self.settings.batch_size;
        let wait = self.settings.wait;

        // The remote call runs detached so cancellation can win the race
        // without aborting it; a late result is dropped with the handle.
        let mut poll = tokio::spawn(async move { endpoint.poll(batch_size, wait).await });

        let outcome = tokio::select! {
            biased;
            _ = token.cancelled() => {
                debug!("Consumer cancelled during poll; discarding in-flight result");
                return;
            }
            joined = &mut poll => joined,
        };

        match outcome {
            Ok(Ok(messages)) => self.dispatch_batch(messages, token).await,
            Ok(Err(e)) if e.is_no_message() => {
                trace!("Poll returned no messages");
            }
            Ok(Err(e)) => {
                error!(error = %e, "Poll failed");
                self.report(e);
                self.back_off(token).await;
            }
            Err(join_error) => {
                error!(error = %join_error, "Poll task failed");
                self.report(QueueError::TaskFailed {
                    message: join_error.to_string(),
                });
                self.back_off(token).await;
            }
        }
    }

    async fn dispatch_batch(self: &Arc<Self>, messages: Vec<ReceivedMessage>, token: &CancellationToken) {
        debug!(count = messages.len(), "Received message batch");

        for entry in messages {
            if token.is_cancelled() {
                debug!(
                    message_id = %entry.message_id,
                    "Consumer cancelled; not dispatching remaining messages"
                );
                return;
            }

            let Some(handler) = self.handlers.resolve(entry.tag.as_deref()) else {
                warn!(
                    message_id = %entry.message_id,
                    tag = ?entry.tag,
                    "No handler registered for message tag"
                );
                self.report(QueueError::UnroutableMessage {
                    tag: entry.tag.clone(),
                    message_id: entry.message_id.to_string(),
                });
                continue;
            };

            let permit = match self.in_flight {
                Some(ref semaphore) => match acquire_permit(semaphore, token).await {
                    Some(permit) => Some(permit),
                    None => return,
                },
                None => None,
            };

            let shared = Arc::clone(self);
            let message = Message::new(entry, token.clone());
            tokio::spawn(async move {
                let _permit = permit;
                shared.handle_one(handler, message).await;
            });
        }
    }

    async fn handle_one(&self, handler: SharedHandler, message: Message) {
        let receipt = message.receipt_handle().clone();
        let message_id = message.message_id().clone();

        // Handler panics surface here as a JoinError.
        let result = match tokio::spawn(async move { handler.handle(message).await }).await {
            Ok(result) => result,
            Err(join_error) => {
                error!(message_id = %message_id, error = %join_error, "Handler task failed");
                self.report(QueueError::TaskFailed {
                    message: format!("handler for message {}: {}", message_id, join_error),
                });
                Err(anyhow::anyhow!("handler task failed: {}", join_error))
            }
        };

        let should_ack = match (&result, self.settings.ack_mode) {
            (Err(e), AckMode::OnFailure) => {
                warn!(
                    message_id = %message_id,
                    error = %e,
                    "Handler failed; acknowledging message"
                );
                true
            }
            (Err(e), AckMode::OnSuccess) => {
                warn!(
                    message_id = %message_id,
                    error = %e,
                    "Handler failed; leaving message for redelivery"
                );
                false
            }
            (Ok(()), AckMode::OnSuccess) => true,
            (Ok(()), AckMode::OnFailure) => false,
        };

        if !should_ack {
            trace!(message_id = %message_id, "Message handled");
            return;
        }

        if let Err(e) = self.endpoint.acknowledge(std::slice::from_ref(&receipt)).await {
            error!(
                message_id = %message_id,
                receipt = %receipt,
                error = %e,
                "Failed to acknowledge message"
            );
            self.report(e);
        }
    }

    fn report(&self, error: QueueError) {
        if let Some(ref callback) = self.on_error {
            callback(error);
        }
    }

    async fn back_off(&self, token: &CancellationToken) {
        if self.settings.poll_error_backoff.is_zero() {
            return;
        }

        tokio::select! {
            _ = token.cancelled() => {}
            _ = tokio::time::sleep(self.settings.poll_error_backoff) => {}
        }
    }
}

/// Wait for an in-flight slot; `None` when cancelled while waiting
async fn acquire_permit(
    semaphore: &Arc<Semaphore>,
    token: &CancellationToken,
) -> Option<OwnedSemaphorePermit> {
    tokio::select! {
        biased;
        _ = token.cancelled() => None,
        permit = Arc::clone(semaphore).acquire_owned() => permit.ok(),
    }
}
