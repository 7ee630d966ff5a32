//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema-versioned notification envelopes and queue codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Schema-versioned notifications over untyped message queues.
//!
//! Producers and consumers register the same `(type, version)` schemas
//! locally, then exchange [`Notification`]s through a [`QueueGateway`].
//! Payloads travel base64-encoded inside a JSON [`Envelope`]; a receiver
//! without a matching registration rejects the message instead of guessing
//! its shape.
#![warn(missing_docs)]

pub mod codec;
pub mod logging;
pub mod notifications;
mod receiver;
pub mod schema;
pub mod transport;
pub mod types;

/// Shared result type for notification operations.
pub type Result<T> = std::result::Result<T, NotifyError>;

/// Errors surfaced by the registry, codec and receive loop.
#[derive(Debug, thiserror::Error)]
pub enum NotifyError {
    /// A schema with the same type name and version is already registered.
    #[error("schema already exists: {type_name}:{version}")]
    DuplicateSchema {
        /// Notification type name.
        type_name: String,
        /// Schema version.
        version: u32,
    },
    /// No schema is registered for the type name and version.
    #[error("schema does not exist: {type_name}:{version}")]
    SchemaNotFound {
        /// Notification type name.
        type_name: String,
        /// Schema version.
        version: u32,
    },
    /// The outbound payload could not be shaped or serialized.
    #[error("failed to encode notification: {0}")]
    Encoding(#[source] serde_json::Error),
    /// The inbound message could not be turned into a notification.
    #[error("failed to decode notification: {0}")]
    Decoding(#[from] DecodeError),
    /// The queue gateway reported a failure.
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The notification was decoded but deleting it from the queue failed.
    /// The message may be delivered again.
    #[error("failed to delete processed message: {source}")]
    Acknowledge {
        /// Gateway failure returned by the delete call.
        source: TransportError,
        /// The successfully decoded notification.
        notification: Box<Notification<Payload>>,
    },
    /// A zero poll rate was requested.
    #[error("poll rate must be greater than zero")]
    InvalidRate,
    /// The receive call was cancelled while waiting for the next poll.
    #[error("receive cancelled before a notification arrived")]
    Cancelled,
}

/// Reasons an inbound message body failed to decode.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    /// The body is not a valid envelope.
    #[error("malformed envelope: {0}")]
    Envelope(#[source] serde_json::Error),
    /// The inner payload is not valid base64.
    #[error("invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),
    /// The inner payload does not fit the registered schema.
    #[error("payload does not match schema {schema}: {source}")]
    Shape {
        /// Rust type registered for the schema.
        schema: &'static str,
        /// Deserialization failure.
        source: serde_json::Error,
    },
}

pub use logging::{log_notification, NotificationDirection, NotifyMetrics};
pub use notifications::{Notifications, DEFAULT_RATE};
pub use r_ems_common::config::{LeftoverPolicy, NotifyConfig};
pub use schema::{Payload, SchemaDescriptor, SchemaRegistry};
pub use transport::{AckHandle, InMemoryQueue, QueueGateway, ReceivedMessage, TransportError};
pub use types::{Envelope, Notification};
