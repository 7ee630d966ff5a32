//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema-versioned notification envelopes and queue codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Poll-decode-delete cycle behind [`Notifications::receive`].
//!
//! Each cycle waits one poll interval, fetches a batch and consumes only its
//! first message. Messages that fail to decode stay on the queue. Leftover
//! batch messages are handled according to [`LeftoverPolicy`].
//!
//! [`Notifications::receive`]: crate::Notifications::receive
use std::future::Future;
use std::time::Duration;

use parking_lot::RwLock;
use tracing::{debug, trace, warn};

use crate::codec;
use crate::logging::{log_notification, NotificationDirection, NotifyMetrics};
use crate::schema::{Payload, SchemaRegistry};
use crate::transport::{QueueGateway, ReceivedMessage, TransportError};
use crate::types::Notification;
use crate::{LeftoverPolicy, NotifyError, Result};

/// Borrowed view of a facade's state for the duration of one receive.
pub(crate) struct ReceiveLoop<'a> {
    pub(crate) gateway: &'a dyn QueueGateway,
    pub(crate) queue: &'a str,
    pub(crate) registry: &'a RwLock<SchemaRegistry>,
    pub(crate) rate: &'a RwLock<Duration>,
    pub(crate) leftover: LeftoverPolicy,
    pub(crate) metrics: Option<&'a NotifyMetrics>,
}

impl ReceiveLoop<'_> {
    /// Poll until a message is consumed, an error occurs or `shutdown`
    /// resolves. `shutdown` is only observed while waiting between polls.
    pub(crate) async fn run<F>(&self, shutdown: F) -> Result<Notification<Payload>>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        loop {
            let rate = *self.rate.read();
            tokio::select! {
                biased;
                _ = &mut shutdown => {
                    debug!(queue = self.queue, "receive cancelled");
                    return Err(NotifyError::Cancelled);
                }
                _ = tokio::time::sleep(rate) => {}
            }

            let batch = match self.gateway.receive_batch(self.queue).await {
                Ok(batch) => batch,
                Err(TransportError::Timeout) => {
                    trace!(queue = self.queue, "long poll timed out");
                    continue;
                }
                Err(err) => {
                    warn!(
                        queue = self.queue,
                        transport = self.gateway.name(),
                        error = %err,
                        "receive batch failed"
                    );
                    return Err(err.into());
                }
            };

            let mut batch = batch.into_iter();
            let Some(first) = batch.next() else {
                trace!(queue = self.queue, "empty poll");
                if let Some(metrics) = self.metrics {
                    metrics.observe_empty_poll();
                }
                continue;
            };
            self.handle_leftovers(batch).await;
            return self.process(first).await;
        }
    }

    async fn handle_leftovers(&self, leftovers: impl Iterator<Item = ReceivedMessage>) {
        match self.leftover {
            LeftoverPolicy::LeaveInFlight => {
                let skipped = leftovers.count();
                if skipped > 0 {
                    trace!(
                        queue = self.queue,
                        skipped,
                        "leaving unprocessed batch messages in flight"
                    );
                }
            }
            LeftoverPolicy::Release => {
                for message in leftovers {
                    if let Err(err) = self.gateway.release(self.queue, &message.handle).await {
                        warn!(
                            queue = self.queue,
                            handle = %message.handle,
                            error = %err,
                            "failed to release unprocessed message"
                        );
                    }
                }
            }
        }
    }

    async fn process(&self, message: ReceivedMessage) -> Result<Notification<Payload>> {
        let decoded = {
            let registry = self.registry.read();
            codec::decode(&registry, &message.body)
        };
        let notification = match decoded {
            Ok(notification) => notification,
            Err(err) => {
                if let Some(metrics) = self.metrics {
                    metrics.observe_decode_failure();
                }
                warn!(
                    queue = self.queue,
                    handle = %message.handle,
                    error = %err,
                    "leaving undecodable message on the queue"
                );
                return Err(err);
            }
        };

        if let Err(source) = self.gateway.delete(self.queue, &message.handle).await {
            if let Some(metrics) = self.metrics {
                metrics.observe_ack_failure();
            }
            warn!(
                queue = self.queue,
                transport = self.gateway.name(),
                type_name = %notification.type_name,
                version = notification.version,
                error = %source,
                "decoded notification could not be deleted"
            );
            return Err(NotifyError::Acknowledge {
                source,
                notification: Box::new(notification),
            });
        }

        if let Some(metrics) = self.metrics {
            metrics.observe_received();
            metrics.observe_latency(notification.time);
        }
        log_notification(
            NotificationDirection::Inbound,
            self.queue,
            &notification.type_name,
            notification.version,
            &notification.time,
        );
        Ok(notification)
    }
}
