//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema-versioned notification envelopes and queue codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
//! Envelope codec.
//!
//! Encoding shapes the payload through its registered schema before it
//! leaves the process, so a payload the sender itself could not decode is
//! never transmitted. Decoding refuses any `(type, version)` the local
//! registry does not know.
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::trace;

use crate::schema::{Payload, SchemaRegistry};
use crate::types::{Envelope, Notification};
use crate::{DecodeError, NotifyError, Result};

/// Encode `payload` as a `type_name`/`version` envelope stamped with the
/// current time.
pub fn encode<T>(
    registry: &SchemaRegistry,
    type_name: &str,
    version: u32,
    payload: &T,
) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    encode_at(registry, type_name, version, payload, Utc::now())
}

/// Encode with an explicit send time.
pub fn encode_at<T>(
    registry: &SchemaRegistry,
    type_name: &str,
    version: u32,
    payload: &T,
    sent_at: DateTime<Utc>,
) -> Result<Vec<u8>>
where
    T: Serialize + ?Sized,
{
    let descriptor = registry.resolve(type_name, version)?;

    let generic = serde_json::to_value(payload).map_err(NotifyError::Encoding)?;
    let shaped = descriptor.coerce(generic).map_err(NotifyError::Encoding)?;
    trace!(
        type_name,
        version,
        schema = descriptor.rust_type(),
        bytes = shaped.len(),
        "payload shaped for schema"
    );

    let envelope = Envelope {
        sent_at,
        type_name: type_name.to_owned(),
        version,
        payload: BASE64.encode(shaped),
    };
    serde_json::to_vec(&envelope).map_err(NotifyError::Encoding)
}

/// Decode a message body into a notification of the registered schema type.
pub fn decode(registry: &SchemaRegistry, body: &[u8]) -> Result<Notification<Payload>> {
    let envelope: Envelope = serde_json::from_slice(body).map_err(DecodeError::Envelope)?;
    let descriptor = registry.resolve(&envelope.type_name, envelope.version)?;

    let inner = BASE64.decode(envelope.payload.as_bytes()).map_err(DecodeError::from)?;
    let data = descriptor
        .decode(&inner)
        .map_err(|source| DecodeError::Shape {
            schema: descriptor.rust_type(),
            source,
        })?;

    Ok(Notification {
        time: envelope.sent_at,
        type_name: envelope.type_name,
        version: envelope.version,
        data,
    })
}
