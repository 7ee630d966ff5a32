//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema-versioned notification envelopes and queue codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::Mutex as AsyncMutex;

use crate::codec;
use crate::logging::{log_notification, NotificationDirection, NotifyMetrics};
use crate::receiver::ReceiveLoop;
use crate::schema::{Payload, SchemaDescriptor, SchemaRegistry};
use crate::transport::QueueGateway;
use crate::types::Notification;
use crate::{LeftoverPolicy, NotifyConfig, NotifyError, Result};

/// Poll interval used when none is configured.
pub const DEFAULT_RATE: Duration = Duration::from_secs(1);

/// Sends and receives schema-versioned notifications on one queue.
///
/// Schemas must be registered locally by every participant; neither side
/// learns schemas from the other. The registry is lock-protected, so schemas
/// may be added while traffic is flowing.
///
/// At most one receive cycle runs at a time per instance; concurrent
/// [`receive`](Self::receive) calls queue up behind each other instead of
/// racing on the same queue.
pub struct Notifications {
    gateway: Arc<dyn QueueGateway>,
    queue: String,
    rate: RwLock<Duration>,
    leftover: LeftoverPolicy,
    registry: RwLock<SchemaRegistry>,
    metrics: Option<NotifyMetrics>,
    receive_slot: AsyncMutex<()>,
}

impl Notifications {
    /// Create an endpoint for `queue` with an empty registry and the default
    /// poll rate. Performs no I/O.
    pub fn new(gateway: Arc<dyn QueueGateway>, queue: impl Into<String>) -> Self {
        Self {
            gateway,
            queue: queue.into(),
            rate: RwLock::new(DEFAULT_RATE),
            leftover: LeftoverPolicy::default(),
            registry: RwLock::new(SchemaRegistry::new()),
            metrics: None,
            receive_slot: AsyncMutex::new(()),
        }
    }

    /// Create an endpoint from a configuration.
    pub fn from_config(gateway: Arc<dyn QueueGateway>, config: &NotifyConfig) -> Result<Self> {
        Ok(Self::new(gateway, config.queue.clone())
            .with_rate(config.rate)?
            .with_leftover_policy(config.leftover))
    }

    /// Override the poll rate. A zero rate is rejected.
    pub fn with_rate(self, rate: Duration) -> Result<Self> {
        self.set_rate(rate)?;
        Ok(self)
    }

    /// Choose what happens to batch messages after the first.
    pub fn with_leftover_policy(mut self, policy: LeftoverPolicy) -> Self {
        self.leftover = policy;
        self
    }

    /// Record traffic in the given metric handles.
    pub fn with_metrics(mut self, metrics: NotifyMetrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Queue identifier this endpoint is bound to.
    pub fn queue(&self) -> &str {
        &self.queue
    }

    /// Current poll rate.
    pub fn rate(&self) -> Duration {
        *self.rate.read()
    }

    /// Change the poll rate; a receive in progress picks it up on its next
    /// poll. A zero rate is rejected and the current rate kept.
    pub fn set_rate(&self, rate: Duration) -> Result<()> {
        if rate.is_zero() {
            return Err(NotifyError::InvalidRate);
        }
        *self.rate.write() = rate;
        Ok(())
    }

    /// Active leftover policy.
    pub fn leftover_policy(&self) -> LeftoverPolicy {
        self.leftover
    }

    /// Register a schema descriptor.
    pub fn add_schema(&self, descriptor: SchemaDescriptor) -> Result<()> {
        let type_name = descriptor.type_name().to_owned();
        let version = descriptor.version();
        self.registry.write().add_schema(descriptor)?;
        tracing::debug!(queue = %self.queue, %type_name, version, "schema registered");
        Ok(())
    }

    /// Register `T` as the shape of `type_name` at `version`.
    pub fn register<T>(&self, type_name: impl Into<String>, version: u32) -> Result<()>
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        self.add_schema(SchemaDescriptor::new::<T>(type_name, version))
    }

    /// Whether `type_name` at `version` is registered.
    pub fn has_schema(&self, type_name: &str, version: u32) -> bool {
        self.registry.read().contains(type_name, version)
    }

    /// Encode and enqueue a notification, returning the send time stamped
    /// into the envelope.
    ///
    /// Fails with [`NotifyError::SchemaNotFound`] before touching the gateway
    /// when the `(type, version)` pair is not registered.
    pub async fn send<T>(&self, notification: &Notification<T>) -> Result<DateTime<Utc>>
    where
        T: Serialize,
    {
        let sent_at = Utc::now();
        let body = {
            let registry = self.registry.read();
            codec::encode_at(
                &registry,
                &notification.type_name,
                notification.version,
                &notification.data,
                sent_at,
            )?
        };

        if let Err(err) = self.gateway.send(&self.queue, Bytes::from(body)).await {
            tracing::warn!(
                queue = %self.queue,
                transport = self.gateway.name(),
                type_name = %notification.type_name,
                error = %err,
                "notification send failed"
            );
            return Err(NotifyError::Transport(err));
        }

        if let Some(metrics) = &self.metrics {
            metrics.observe_sent();
        }
        log_notification(
            NotificationDirection::Outbound,
            &self.queue,
            &notification.type_name,
            notification.version,
            &sent_at,
        );
        Ok(sent_at)
    }

    /// Run one poll-decode-delete cycle and return its notification.
    ///
    /// Waits at least one poll interval before every poll and keeps polling
    /// while the queue is empty. Use [`receive_until`](Self::receive_until)
    /// or [`receive_timeout`](Self::receive_timeout) to bound the wait.
    pub async fn receive(&self) -> Result<Notification<Payload>> {
        self.receive_until(std::future::pending()).await
    }

    /// Like [`receive`](Self::receive), returning [`NotifyError::Cancelled`]
    /// once `shutdown` resolves. Cancellation is observed only between polls,
    /// never while a message is being decoded or deleted.
    pub async fn receive_until<F>(&self, shutdown: F) -> Result<Notification<Payload>>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let _slot = tokio::select! {
            biased;
            _ = &mut shutdown => return Err(NotifyError::Cancelled),
            slot = self.receive_slot.lock() => slot,
        };

        ReceiveLoop {
            gateway: self.gateway.as_ref(),
            queue: &self.queue,
            registry: &self.registry,
            rate: &self.rate,
            leftover: self.leftover,
            metrics: self.metrics.as_ref(),
        }
        .run(shutdown)
        .await
    }

    /// Like [`receive`](Self::receive), giving up with
    /// [`NotifyError::Cancelled`] after `timeout`.
    pub async fn receive_timeout(&self, timeout: Duration) -> Result<Notification<Payload>> {
        self.receive_until(tokio::time::sleep(timeout)).await
    }
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::transport::InMemoryQueue;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Ping {
        seq: u32,
    }

    fn endpoint() -> (Notifications, Arc<InMemoryQueue>) {
        let transport = Arc::new(InMemoryQueue::new().with_queue("test-queue"));
        (
            Notifications::new(transport.clone(), "test-queue"),
            transport,
        )
    }

    #[test]
    fn new_uses_defaults() {
        let (notifications, _) = endpoint();
        assert_eq!(notifications.queue(), "test-queue");
        assert_eq!(notifications.rate(), DEFAULT_RATE);
        assert_eq!(notifications.leftover_policy(), LeftoverPolicy::LeaveInFlight);
        assert!(!notifications.has_schema("ping", 1));
    }

    #[test]
    fn rate_is_mutable_after_construction() {
        let (notifications, _) = endpoint();
        notifications.set_rate(Duration::from_millis(50)).unwrap();
        assert_eq!(notifications.rate(), Duration::from_millis(50));
    }

    #[test]
    fn zero_rate_is_rejected() {
        let (notifications, _) = endpoint();
        assert!(matches!(
            notifications.set_rate(Duration::ZERO),
            Err(NotifyError::InvalidRate)
        ));
        assert_eq!(notifications.rate(), DEFAULT_RATE);
        assert!(matches!(
            notifications.with_rate(Duration::ZERO),
            Err(NotifyError::InvalidRate)
        ));

        let mut config = NotifyConfig::new("configured");
        config.rate = Duration::ZERO;
        assert!(matches!(
            Notifications::from_config(Arc::new(InMemoryQueue::new()), &config),
            Err(NotifyError::InvalidRate)
        ));
    }

    #[test]
    fn accepts_an_already_erased_gateway() {
        let gateway: Arc<dyn QueueGateway> = Arc::new(InMemoryQueue::new());
        let notifications = Notifications::new(gateway.clone(), "shared");
        assert_eq!(notifications.queue(), "shared");
        assert_eq!(Arc::strong_count(&gateway), 2);
    }

    #[test]
    fn from_config_applies_settings() {
        let transport = Arc::new(InMemoryQueue::new());
        let mut config = NotifyConfig::new("configured");
        config.rate = Duration::from_millis(200);
        config.leftover = LeftoverPolicy::Release;

        let notifications = Notifications::from_config(transport, &config).expect("config");
        assert_eq!(notifications.queue(), "configured");
        assert_eq!(notifications.rate(), Duration::from_millis(200));
        assert_eq!(notifications.leftover_policy(), LeftoverPolicy::Release);
    }

    #[test]
    fn register_rejects_duplicates() {
        let (notifications, _) = endpoint();
        notifications.register::<Ping>("ping", 1).expect("first");
        assert!(notifications.has_schema("ping", 1));
        assert!(matches!(
            notifications.register::<Ping>("ping", 1),
            Err(NotifyError::DuplicateSchema { .. })
        ));
        notifications.register::<Ping>("ping", 2).expect("new version");
    }

    #[tokio::test]
    async fn send_without_schema_never_reaches_gateway() {
        let (notifications, transport) = endpoint();
        let err = notifications
            .send(&Notification::new("ping", 1, Ping { seq: 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::SchemaNotFound { .. }));
        assert_eq!(transport.sent_count("test-queue"), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn send_returns_the_envelope_timestamp() {
        let (notifications, _) = endpoint();
        notifications.register::<Ping>("ping", 1).unwrap();
        let stale = Utc::now() - chrono::Duration::hours(1);
        let mut outbound = Notification::new("ping", 1, Ping { seq: 7 });
        outbound.time = stale;

        let sent_at = notifications.send(&outbound).await.unwrap();
        assert!(sent_at > stale);

        let received = notifications
            .receive_timeout(DEFAULT_RATE * 2)
            .await
            .unwrap();
        assert_eq!(received.time, sent_at);
        assert_eq!(received.data_as::<Ping>(), Some(&Ping { seq: 7 }));
    }

    #[tokio::test]
    async fn send_surfaces_transport_errors() {
        let transport = Arc::new(InMemoryQueue::new());
        let notifications = Notifications::new(transport, "absent");
        notifications.register::<Ping>("ping", 1).unwrap();
        let err = notifications
            .send(&Notification::new("ping", 1, Ping { seq: 1 }))
            .await
            .unwrap_err();
        assert!(matches!(err, NotifyError::Transport(_)));
    }
}
