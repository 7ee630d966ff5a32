//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema-versioned notification envelopes and queue codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::time::Duration;

use chrono::{DateTime, Utc};
use prometheus::{Histogram, HistogramOpts, IntCounter, Opts, Registry};
use tracing::debug;

/// Direction of the notification movement, used for consistent logging.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NotificationDirection {
    /// Notification handed to the gateway.
    Outbound,
    /// Notification decoded and acknowledged.
    Inbound,
}

/// Emit a structured log entry for notification activity.
pub fn log_notification(
    direction: NotificationDirection,
    queue: &str,
    type_name: &str,
    version: u32,
    time: &DateTime<Utc>,
) {
    debug!(
        queue,
        type_name,
        version,
        time = %time,
        direction = ?direction,
        "notification activity"
    );
}

/// Prometheus metric handles for notification traffic.
#[derive(Clone)]
pub struct NotifyMetrics {
    sent: IntCounter,
    received: IntCounter,
    decode_failures: IntCounter,
    ack_failures: IntCounter,
    empty_polls: IntCounter,
    latency: Histogram,
}

impl NotifyMetrics {
    /// Register notification metrics with the provided registry.
    pub fn register(registry: &Registry) -> Result<Self, prometheus::Error> {
        let sent = IntCounter::with_opts(Opts::new(
            "notifications_sent_total",
            "Notifications handed to the queue gateway",
        ))?;
        let received = IntCounter::with_opts(Opts::new(
            "notifications_received_total",
            "Notifications decoded and deleted from the queue",
        ))?;
        let decode_failures = IntCounter::with_opts(Opts::new(
            "notifications_decode_failures_total",
            "Inbound messages left on the queue because they failed to decode",
        ))?;
        let ack_failures = IntCounter::with_opts(Opts::new(
            "notifications_ack_failures_total",
            "Decoded notifications whose delete call failed",
        ))?;
        let empty_polls = IntCounter::with_opts(Opts::new(
            "notification_polls_empty_total",
            "Receive polls that returned no messages",
        ))?;
        let latency = Histogram::with_opts(HistogramOpts::new(
            "notification_delivery_latency_seconds",
            "Time between envelope encoding and successful decode",
        ))?;

        registry.register(Box::new(sent.clone()))?;
        registry.register(Box::new(received.clone()))?;
        registry.register(Box::new(decode_failures.clone()))?;
        registry.register(Box::new(ack_failures.clone()))?;
        registry.register(Box::new(empty_polls.clone()))?;
        registry.register(Box::new(latency.clone()))?;

        Ok(Self {
            sent,
            received,
            decode_failures,
            ack_failures,
            empty_polls,
            latency,
        })
    }

    /// Record a sent notification.
    pub fn observe_sent(&self) {
        self.sent.inc();
    }

    /// Record a received notification.
    pub fn observe_received(&self) {
        self.received.inc();
    }

    /// Record a message that failed to decode.
    pub fn observe_decode_failure(&self) {
        self.decode_failures.inc();
    }

    /// Record a failed delete after a successful decode.
    pub fn observe_ack_failure(&self) {
        self.ack_failures.inc();
    }

    /// Record a poll that returned nothing.
    pub fn observe_empty_poll(&self) {
        self.empty_polls.inc();
    }

    /// Record delivery latency for an envelope sent at `sent_at`. Clock skew
    /// that puts `sent_at` in the future is ignored.
    pub fn observe_latency(&self, sent_at: DateTime<Utc>) {
        if let Ok(elapsed) = (Utc::now() - sent_at).to_std() {
            self.observe_duration(elapsed);
        }
    }

    fn observe_duration(&self, duration: Duration) {
        self.latency.observe(duration.as_secs_f64());
    }
}
