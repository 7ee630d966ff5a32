//! ---
//! ems_section: "02-messaging-ipc-data-model"
//! ems_subsection: "module"
//! ems_type: "source"
//! ems_scope: "code"
//! ems_description: "Schema-versioned notification envelopes and queue codecs."
//! ems_version: "v0.0.0-prealpha"
//! ems_owner: "tbd"
//! ---
use std::any::Any;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::schema::Payload;

/// Wire record carried as the queue message body.
///
/// `payload` is the base64 (standard alphabet, padded) encoding of the
/// schema-shaped JSON payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Time the envelope was encoded.
    #[serde(rename = "time")]
    pub sent_at: DateTime<Utc>,
    /// Notification type name.
    #[serde(rename = "type")]
    pub type_name: String,
    /// Schema version of the payload.
    ///
    /// Versions are non-negative. A body carrying a negative or
    /// out-of-range version is rejected as a malformed envelope, not as an
    /// unknown schema.
    pub version: u32,
    /// Base64 encoded inner payload.
    #[serde(rename = "notification")]
    pub payload: String,
}

/// Application-facing notification.
///
/// Outbound notifications carry the producer's own value; received ones
/// carry a [`Payload`] of the registered schema type.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification<T> {
    /// Creation time locally, or the envelope's send time once received.
    pub time: DateTime<Utc>,
    /// Notification type name.
    pub type_name: String,
    /// Schema version.
    pub version: u32,
    /// Notification data.
    pub data: T,
}

impl<T> Notification<T> {
    /// Construct a notification stamped with the current time.
    pub fn new(type_name: impl Into<String>, version: u32, data: T) -> Self {
        Self {
            time: Utc::now(),
            type_name: type_name.into(),
            version,
            data,
        }
    }

    /// Replace the data while keeping the metadata.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> Notification<U> {
        Notification {
            time: self.time,
            type_name: self.type_name,
            version: self.version,
            data: f(self.data),
        }
    }
}

impl Notification<Payload> {
    /// Borrow the decoded data as `T`.
    pub fn data_as<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }

    /// Convert into a notification of the concrete schema type, returning
    /// `self` unchanged on type mismatch.
    pub fn into_typed<T: Any>(self) -> std::result::Result<Notification<T>, Self> {
        let Notification {
            time,
            type_name,
            version,
            data,
        } = self;
        match data.downcast::<T>() {
            Ok(data) => Ok(Notification {
                time,
                type_name,
                version,
                data,
            }),
            Err(data) => Err(Notification {
                time,
                type_name,
                version,
                data,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;
    use serde_json::json;

    use super::*;

    #[test]
    fn envelope_uses_wire_field_names() {
        let envelope = Envelope {
            sent_at: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            type_name: "testing".into(),
            version: 3,
            payload: "e30=".into(),
        };
        let value = serde_json::to_value(&envelope).expect("serialize");
        assert_eq!(
            value,
            json!({
                "time": "2024-01-01T00:00:00Z",
                "type": "testing",
                "version": 3,
                "notification": "e30="
            })
        );
        let back: Envelope = serde_json::from_value(value).expect("deserialize");
        assert_eq!(back, envelope);
    }

    #[test]
    fn map_keeps_metadata() {
        let notification = Notification::new("testing", 2, 21_u32);
        let time = notification.time;
        let doubled = notification.map(|n| n * 2);
        assert_eq!(doubled.data, 42);
        assert_eq!(doubled.time, time);
        assert_eq!(doubled.type_name, "testing");
        assert_eq!(doubled.version, 2);
    }
}
