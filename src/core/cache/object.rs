// src/core/cache/object.rs

use crate::core::GatewireError;
use crate::core::protocol::{WireMessage, tags};
use std::fmt;

/// Identifies a kind of backend-managed object, e.g. `CARD` or `DEVICE`.
/// Case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectType(String);

impl ObjectType {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ObjectType {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

impl fmt::Display for ObjectType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// One deserialized backend object: its type, its id (`OI`) and the rest of
/// its fields as a wire message, so the usual typed accessors apply.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendObject {
    object_type: ObjectType,
    id: String,
    fields: WireMessage,
}

impl BackendObject {
    /// Parses a wire-encoded object of type `object_type`.
    pub fn decode(object_type: &ObjectType, raw: &[u8]) -> Result<Self, GatewireError> {
        let message = WireMessage::parse(raw).map_err(|e| update_error(object_type, e))?;
        Self::from_message(object_type, message)
    }

    /// Builds an object from an already parsed message. The message must carry
    /// a non-empty `OI`, and an `OT` (if present) must name `object_type`.
    pub fn from_message(
        object_type: &ObjectType,
        fields: WireMessage,
    ) -> Result<Self, GatewireError> {
        if let Some(declared) = fields.get(tags::OBJECT_TYPE) {
            if declared != object_type.as_str() {
                return Err(update_error(
                    object_type,
                    format!("object declares type '{declared}'"),
                ));
            }
        }
        let id = match fields.get(tags::OBJECT_ID) {
            Some(id) if !id.is_empty() => id.to_string(),
            _ => return Err(update_error(object_type, "object has no id")),
        };
        Ok(Self {
            object_type: object_type.clone(),
            id,
            fields,
        })
    }

    pub fn object_type(&self) -> &ObjectType {
        &self.object_type
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn fields(&self) -> &WireMessage {
        &self.fields
    }

    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields.get(tag)
    }
}

fn update_error(object_type: &ObjectType, reason: impl ToString) -> GatewireError {
    GatewireError::CacheUpdateError {
        object_type: object_type.to_string(),
        reason: reason.to_string(),
    }
}
