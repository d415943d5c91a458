// src/core/protocol/tags.rs

//! The handful of universal tags this layer interprets itself. Every other tag
//! belongs to the backend command vocabulary and passes through untouched.

/// Identifies the operation. Always serialized first.
pub const COMMAND: &str = "AO";
/// The session's auth token, in both directions.
pub const AUTH_TOKEN: &str = "JW";
/// Backend status/result code.
pub const STATUS: &str = "ST";
/// Human-readable error text accompanying a non-OK status.
pub const ERROR: &str = "ER";
/// Correlation id stamped on requests and echoed on replies.
pub const REQUEST_ID: &str = "RI";
/// Set to `Y` on every part of a multi-part reply except the last.
pub const MULTIPART: &str = "MP";
/// Marks a full-object payload and names its object type.
pub const OBJECT_TYPE: &str = "OT";
/// The id of a full-object payload within its type.
pub const OBJECT_ID: &str = "OI";

/// `JW` value meaning the backend rejected the presented token.
pub const NEGATIVE_AUTH: &str = "N";
/// `MP` value meaning more parts follow.
pub const MORE_PARTS: &str = "Y";

pub const STATUS_OK: &str = "OK";
pub const STATUS_DENIED: &str = "DENIED";
pub const STATUS_FAIL: &str = "FAIL";
pub const STATUS_DUPLICATE_LOGIN: &str = "DUPLICATE_LOGIN";

/// Compatibility shim for backends that report a duplicate login only through
/// the `ER` text. Matched case-insensitively.
pub const DUPLICATE_LOGIN_TEXT: &str = "already logged in";
