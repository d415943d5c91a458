// src/core/protocol/message.rs

//! The tag-value `WireMessage` and its typed accessors.

use super::codec::{self, ScanOutcome};
use super::tags;
use crate::core::GatewireError;
use bytes::{Bytes, BytesMut};
use indexmap::IndexMap;
use std::fmt;

/// Every tag is exactly this many ASCII characters.
pub const TAG_WIDTH: usize = 2;

/// An ordered mapping from two-character tags to string values.
///
/// Equality compares the tag set and values, not insertion order: two
/// messages built in a different order are equal but may serialize
/// differently.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct WireMessage {
    fields: IndexMap<String, String>,
}

impl WireMessage {
    /// Creates an empty message with no command.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a message whose command tag is set to `command`.
    pub fn with_command(command: impl Into<String>) -> Self {
        let mut msg = Self::new();
        msg.fields.insert(tags::COMMAND.to_string(), command.into());
        msg
    }

    /// Parses exactly one message from `raw`. Surrounding ASCII whitespace is
    /// tolerated; anything else is `MalformedMessage`.
    pub fn parse(raw: &[u8]) -> Result<Self, GatewireError> {
        match codec::scan_frame(raw, codec::MAX_FRAME_SIZE)? {
            ScanOutcome::Incomplete => Err(GatewireError::malformed("truncated message")),
            ScanOutcome::Frame { message, consumed } => {
                if raw[consumed..].iter().all(u8::is_ascii_whitespace) {
                    Ok(message)
                } else {
                    Err(GatewireError::malformed(
                        "trailing bytes after end of message",
                    ))
                }
            }
        }
    }

    /// Serializes the message: command tag first, then the remaining tags in
    /// insertion order.
    pub fn serialize(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len_hint());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    pub(crate) fn encode_into(&self, dst: &mut BytesMut) {
        dst.extend_from_slice(b"[");
        for (tag, value) in self.iter() {
            dst.extend_from_slice(tag.as_bytes());
            for &b in value.as_bytes() {
                if codec::needs_escape(b) {
                    dst.extend_from_slice(b"\\");
                }
                dst.extend_from_slice(&[b]);
            }
            dst.extend_from_slice(b";");
        }
        dst.extend_from_slice(b"]");
    }

    fn encoded_len_hint(&self) -> usize {
        2 + self
            .fields
            .iter()
            .map(|(t, v)| t.len() + v.len() + 1)
            .sum::<usize>()
    }

    /// Returns the command tag's value, if set.
    pub fn command(&self) -> Option<&str> {
        self.get(tags::COMMAND)
    }

    /// Returns the value of `tag`. An absent tag is `None`; a tag present with
    /// an empty value is `Some("")`.
    pub fn get(&self, tag: &str) -> Option<&str> {
        self.fields.get(tag).map(String::as_str)
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.fields.contains_key(tag)
    }

    /// Sets `tag` to `value`. Replacing an existing tag keeps its position.
    pub fn set(
        &mut self,
        tag: &str,
        value: impl Into<String>,
    ) -> Result<&mut Self, GatewireError> {
        validate_tag(tag)?;
        self.fields.insert(tag.to_string(), value.into());
        Ok(self)
    }

    /// Removes `tag`, preserving the order of the remaining tags.
    pub fn remove(&mut self, tag: &str) -> Option<String> {
        self.fields.shift_remove(tag)
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Iterates tags in serialization order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        let command = self
            .fields
            .get_key_value(tags::COMMAND)
            .map(|(t, v)| (t.as_str(), v.as_str()));
        let rest = self
            .fields
            .iter()
            .filter(|(t, _)| t.as_str() != tags::COMMAND)
            .map(|(t, v)| (t.as_str(), v.as_str()));
        command.into_iter().chain(rest)
    }

    /// Reads `tag` as a signed integer.
    pub fn get_int(&self, tag: &str) -> Result<Option<i64>, GatewireError> {
        self.get(tag)
            .map(|v| {
                v.trim()
                    .parse::<i64>()
                    .map_err(|_| field_error(tag, "integer"))
            })
            .transpose()
    }

    /// Reads `tag` as a boolean. Accepts `Y/N`, `1/0`, `T/F` and `TRUE/FALSE`
    /// in any case.
    pub fn get_bool(&self, tag: &str) -> Result<Option<bool>, GatewireError> {
        self.get(tag)
            .map(|v| match v.trim().to_ascii_uppercase().as_str() {
                "Y" | "1" | "T" | "TRUE" => Ok(true),
                "N" | "0" | "F" | "FALSE" => Ok(false),
                _ => Err(field_error(tag, "boolean")),
            })
            .transpose()
    }

    /// Reads `tag` as a comma-separated list. An empty value is an empty list;
    /// an empty element between two commas is rejected.
    pub fn get_list(&self, tag: &str) -> Result<Option<Vec<String>>, GatewireError> {
        let Some(raw) = self.get(tag) else {
            return Ok(None);
        };
        if raw.is_empty() {
            return Ok(Some(Vec::new()));
        }
        raw.split(',')
            .map(|item| {
                let item = item.trim();
                if item.is_empty() {
                    Err(field_error(tag, "comma-separated list"))
                } else {
                    Ok(item.to_string())
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Some)
    }

    /// Inserts a field that has already been validated by the decoder.
    pub(crate) fn insert_parsed(&mut self, tag: String, value: String) -> bool {
        self.fields.insert(tag, value).is_none()
    }
}

impl fmt::Debug for WireMessage {
    /// Auth tokens are redacted so messages can be logged safely.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut map = f.debug_map();
        for (tag, value) in self.iter() {
            if tag == tags::AUTH_TOKEN && value != tags::NEGATIVE_AUTH && !value.is_empty() {
                map.entry(&tag, &"<redacted>");
            } else {
                map.entry(&tag, &value);
            }
        }
        map.finish()
    }
}

/// Checks that `tag` is exactly `TAG_WIDTH` printable ASCII characters and
/// contains none of the framing bytes.
pub fn validate_tag(tag: &str) -> Result<(), GatewireError> {
    if tag.len() == TAG_WIDTH && tag.bytes().all(codec::is_tag_byte) {
        Ok(())
    } else {
        Err(GatewireError::malformed(format!("invalid tag {tag:?}")))
    }
}

fn field_error(tag: &str, expected: &'static str) -> GatewireError {
    GatewireError::FieldTypeError {
        tag: tag.to_string(),
        expected,
    }
}
