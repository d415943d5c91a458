// src/core/protocol/mod.rs

pub mod codec;
pub mod message;
pub mod tags;

pub use codec::{MAX_FRAME_SIZE, WireMessageCodec};
pub use message::{TAG_WIDTH, WireMessage, validate_tag};
