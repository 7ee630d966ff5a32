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
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::{NotifyError, Result};

type CoerceFn = fn(JsonValue) -> serde_json::Result<Vec<u8>>;
type DecodeFn = fn(&[u8]) -> serde_json::Result<Payload>;

/// Decoded notification payload of a registered schema type.
///
/// The concrete type is the one the schema was registered with; recover it
/// with [`Payload::downcast_ref`] or [`Payload::downcast`].
pub struct Payload {
    value: Box<dyn Any + Send + Sync>,
    schema: &'static str,
}

impl Payload {
    fn new<T>(value: T) -> Self
    where
        T: Any + Send + Sync,
    {
        Self {
            value: Box::new(value),
            schema: std::any::type_name::<T>(),
        }
    }

    /// Rust type name of the schema this payload was decoded with.
    pub fn schema_type(&self) -> &'static str {
        self.schema
    }

    /// Whether the payload holds a `T`.
    pub fn is<T: Any>(&self) -> bool {
        self.value.is::<T>()
    }

    /// Borrow the payload as `T`.
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.value.downcast_ref::<T>()
    }

    /// Take ownership of the payload as `T`, handing it back on type mismatch.
    pub fn downcast<T: Any>(self) -> std::result::Result<T, Self> {
        let schema = self.schema;
        match self.value.downcast::<T>() {
            Ok(value) => Ok(*value),
            Err(value) => Err(Self { value, schema }),
        }
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Payload")
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

/// Registered shape of one `(type_name, version)` pair.
///
/// The shape is a concrete Rust type fixed at registration. Outbound values
/// are coerced through it and inbound bytes decoded into it.
#[derive(Clone)]
pub struct SchemaDescriptor {
    type_name: String,
    version: u32,
    rust_type: &'static str,
    coerce: CoerceFn,
    decode: DecodeFn,
}

impl SchemaDescriptor {
    /// Describe `type_name`/`version` as carrying payloads of type `T`.
    ///
    /// Registering `serde_json::Value` accepts any JSON payload unchanged.
    pub fn new<T>(type_name: impl Into<String>, version: u32) -> Self
    where
        T: Serialize + DeserializeOwned + Send + Sync + 'static,
    {
        Self {
            type_name: type_name.into(),
            version,
            rust_type: std::any::type_name::<T>(),
            coerce: coerce_as::<T>,
            decode: decode_as::<T>,
        }
    }

    /// Notification type name.
    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Schema version.
    pub fn version(&self) -> u32 {
        self.version
    }

    /// Rust type backing the schema.
    pub fn rust_type(&self) -> &'static str {
        self.rust_type
    }

    /// Validate a generic value against the schema and return its canonical
    /// JSON bytes. Unknown fields are dropped; mismatched field types fail.
    pub fn coerce(&self, value: JsonValue) -> serde_json::Result<Vec<u8>> {
        (self.coerce)(value)
    }

    /// Deserialize canonical bytes into a fresh payload instance.
    pub fn decode(&self, bytes: &[u8]) -> serde_json::Result<Payload> {
        (self.decode)(bytes)
    }
}

impl fmt::Debug for SchemaDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchemaDescriptor")
            .field("type_name", &self.type_name)
            .field("version", &self.version)
            .field("rust_type", &self.rust_type)
            .finish()
    }
}

fn coerce_as<T>(value: JsonValue) -> serde_json::Result<Vec<u8>>
where
    T: Serialize + DeserializeOwned,
{
    let shaped: T = serde_json::from_value(value)?;
    serde_json::to_vec(&shaped)
}

fn decode_as<T>(bytes: &[u8]) -> serde_json::Result<Payload>
where
    T: DeserializeOwned + Send + Sync + 'static,
{
    let value: T = serde_json::from_slice(bytes)?;
    Ok(Payload::new(value))
}

/// Lookup table of schema descriptors keyed by type name, then version.
///
/// Entries are insert-only.
#[derive(Debug, Default)]
pub struct SchemaRegistry {
    schemas: HashMap<String, BTreeMap<u32, SchemaDescriptor>>,
}

impl SchemaRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a descriptor, rejecting a second registration of the same
    /// `(type_name, version)`.
    pub fn add_schema(&mut self, descriptor: SchemaDescriptor) -> Result<()> {
        let versions = self
            .schemas
            .entry(descriptor.type_name.clone())
            .or_default();
        if versions.contains_key(&descriptor.version) {
            return Err(NotifyError::DuplicateSchema {
                type_name: descriptor.type_name,
                version: descriptor.version,
            });
        }
        versions.insert(descriptor.version, descriptor);
        Ok(())
    }

    /// Look up the descriptor for `type_name` at `version`.
    pub fn resolve(&self, type_name: &str, version: u32) -> Result<&SchemaDescriptor> {
        self.schemas
            .get(type_name)
            .and_then(|versions| versions.get(&version))
            .ok_or_else(|| NotifyError::SchemaNotFound {
                type_name: type_name.to_owned(),
                version,
            })
    }

    /// Whether `type_name` at `version` is registered.
    pub fn contains(&self, type_name: &str, version: u32) -> bool {
        self.resolve(type_name, version).is_ok()
    }

    /// Registered versions of `type_name`, ascending.
    pub fn versions(&self, type_name: &str) -> Vec<u32> {
        self.schemas
            .get(type_name)
            .map(|versions| versions.keys().copied().collect())
            .unwrap_or_default()
    }

    /// Total number of registered descriptors.
    pub fn len(&self) -> usize {
        self.schemas.values().map(BTreeMap::len).sum()
    }

    /// Whether no descriptor has been registered.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
