//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema-versioned notification envelopes and queue codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::collections::{HashMap, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

/// Opaque token identifying one receipt of a message, used to delete it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AckHandle(String);

impl AckHandle {
    /// Wrap a transport-issued receipt handle.
    pub fn new(handle: impl Into<String>) -> Self {
        Self(handle.into())
    }

    /// Raw handle string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AckHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A message handed out by [`QueueGateway::receive_batch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedMessage {
    /// Raw message body.
    pub body: Bytes,
    /// Handle for deleting or releasing this receipt.
    pub handle: AckHandle,
}

/// Failures reported by a queue gateway.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// The queue identifier is unknown to the transport.
    #[error("queue `{0}` does not exist")]
    QueueNotFound(String),
    /// The handle is unknown, already deleted or superseded by a later receipt.
    #[error("invalid or expired ack handle `{0}`")]
    InvalidHandle(AckHandle),
    /// A long poll ended without messages.
    #[error("receive timed out")]
    Timeout,
    /// Any other backend failure.
    #[error("{backend} transport failure: {message}")]
    Backend {
        /// Transport name.
        backend: &'static str,
        /// Backend supplied detail.
        message: String,
    },
}

/// Queue transport boundary.
///
/// Implementations must be safe for concurrent use.
#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Enqueue an opaque body.
    async fn send(&self, queue: &str, body: Bytes) -> Result<(), TransportError>;

    /// Fetch the next batch of visible messages. An empty batch is not an error.
    async fn receive_batch(&self, queue: &str) -> Result<Vec<ReceivedMessage>, TransportError>;

    /// Permanently remove a received message.
    async fn delete(&self, queue: &str, handle: &AckHandle) -> Result<(), TransportError>;

    /// Make a received but unprocessed message visible again. Transports
    /// without visibility control keep the default no-op.
    async fn release(&self, _queue: &str, _handle: &AckHandle) -> Result<(), TransportError> {
        Ok(())
    }

    /// Human-readable transport name for logging/metrics.
    fn name(&self) -> &'static str;
}

/// Default number of messages returned per receive call.
pub const DEFAULT_MAX_BATCH: usize = 10;
/// Default time a received message stays hidden from other receivers.
pub const DEFAULT_VISIBILITY_TIMEOUT: Duration = Duration::from_secs(30);

/// In-process queue with visibility-timeout semantics.
///
/// Received messages stay hidden until deleted, released or until the
/// visibility timeout lapses, after which they are handed out again under a
/// fresh handle. Clones share the same queues.
#[derive(Clone)]
pub struct InMemoryQueue {
    queues: Arc<Mutex<HashMap<String, QueueState>>>,
    max_batch: usize,
    visibility_timeout: Duration,
}

#[derive(Default)]
struct QueueState {
    messages: VecDeque<StoredMessage>,
    sent: u64,
    deleted: u64,
}

struct StoredMessage {
    body: Bytes,
    receipt: Option<Receipt>,
}

struct Receipt {
    handle: AckHandle,
    hidden_until: Instant,
}

impl StoredMessage {
    fn is_visible(&self, now: Instant) -> bool {
        self.receipt
            .as_ref()
            .map_or(true, |receipt| receipt.hidden_until <= now)
    }

    fn held_by(&self, handle: &AckHandle) -> bool {
        self.receipt
            .as_ref()
            .is_some_and(|receipt| &receipt.handle == handle)
    }
}

impl InMemoryQueue {
    /// Create a transport without any queues.
    pub fn new() -> Self {
        Self {
            queues: Arc::new(Mutex::new(HashMap::new())),
            max_batch: DEFAULT_MAX_BATCH,
            visibility_timeout: DEFAULT_VISIBILITY_TIMEOUT,
        }
    }

    /// Builder variant of [`InMemoryQueue::create_queue`].
    pub fn with_queue(self, name: impl Into<String>) -> Self {
        self.create_queue(name);
        self
    }

    /// Cap the number of messages per receive call (at least one).
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Set how long received messages stay hidden.
    pub fn with_visibility_timeout(mut self, timeout: Duration) -> Self {
        self.visibility_timeout = timeout;
        self
    }

    /// Create `name` if it does not exist yet.
    pub fn create_queue(&self, name: impl Into<String>) {
        self.queues.lock().entry(name.into()).or_default();
    }

    /// Messages currently available to receivers.
    pub fn visible_len(&self, queue: &str) -> usize {
        let now = Instant::now();
        self.inspect(queue, |state| {
            state.messages.iter().filter(|m| m.is_visible(now)).count()
        })
    }

    /// Messages received but neither deleted nor visible again.
    pub fn in_flight_len(&self, queue: &str) -> usize {
        let now = Instant::now();
        self.inspect(queue, |state| {
            state.messages.iter().filter(|m| !m.is_visible(now)).count()
        })
    }

    /// Number of successful deletes.
    pub fn deleted_count(&self, queue: &str) -> u64 {
        self.inspect(queue, |state| state.deleted)
    }

    /// Number of accepted sends.
    pub fn sent_count(&self, queue: &str) -> u64 {
        self.inspect(queue, |state| state.sent)
    }

    fn inspect<R: Default>(&self, queue: &str, f: impl FnOnce(&QueueState) -> R) -> R {
        self.queues.lock().get(queue).map(f).unwrap_or_default()
    }

    fn with_state<R>(
        &self,
        queue: &str,
        f: impl FnOnce(&mut QueueState) -> Result<R, TransportError>,
    ) -> Result<R, TransportError> {
        let mut guard = self.queues.lock();
        let state = guard
            .get_mut(queue)
            .ok_or_else(|| TransportError::QueueNotFound(queue.to_owned()))?;
        f(state)
    }
}

impl Default for InMemoryQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueGateway for InMemoryQueue {
    async fn send(&self, queue: &str, body: Bytes) -> Result<(), TransportError> {
        self.with_state(queue, |state| {
            state.messages.push_back(StoredMessage {
                body,
                receipt: None,
            });
            state.sent += 1;
            Ok(())
        })
    }

    async fn receive_batch(&self, queue: &str) -> Result<Vec<ReceivedMessage>, TransportError> {
        let now = Instant::now();
        let hidden_until = now + self.visibility_timeout;
        let max_batch = self.max_batch;
        self.with_state(queue, |state| {
            let batch = state
                .messages
                .iter_mut()
                .filter(|message| message.is_visible(now))
                .take(max_batch)
                .map(|message| {
                    let handle = AckHandle::new(Uuid::new_v4().to_string());
                    message.receipt = Some(Receipt {
                        handle: handle.clone(),
                        hidden_until,
                    });
                    ReceivedMessage {
                        body: message.body.clone(),
                        handle,
                    }
                })
                .collect();
            Ok(batch)
        })
    }

    async fn delete(&self, queue: &str, handle: &AckHandle) -> Result<(), TransportError> {
        self.with_state(queue, |state| {
            let position = state
                .messages
                .iter()
                .position(|message| message.held_by(handle))
                .ok_or_else(|| TransportError::InvalidHandle(handle.clone()))?;
            state.messages.remove(position);
            state.deleted += 1;
            Ok(())
        })
    }

    async fn release(&self, queue: &str, handle: &AckHandle) -> Result<(), TransportError> {
        self.with_state(queue, |state| {
            let message = state
                .messages
                .iter_mut()
                .find(|message| message.held_by(handle))
                .ok_or_else(|| TransportError::InvalidHandle(handle.clone()))?;
            message.receipt = None;
            Ok(())
        })
    }

    fn name(&self) -> &'static str {
        "in_memory"
    }
}
