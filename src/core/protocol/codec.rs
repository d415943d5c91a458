// src/core/protocol/codec.rs

//! Implements the tag-value frame grammar and the corresponding `Encoder` and
//! `Decoder` for stream transports.
//!
//! ```text
//! message := '[' field* ']'
//! field   := TAG value ';'
//! ```
//!
//! Inside a value, the bytes `\`, `;`, `[` and `]` are escaped with a leading
//! `\`. The closing `]` makes every frame self-delimiting.

use super::message::{TAG_WIDTH, WireMessage};
use crate::core::GatewireError;
use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

const FRAME_START: u8 = b'[';
const FRAME_END: u8 = b']';
const FIELD_END: u8 = b';';
const ESCAPE: u8 = b'\\';

/// Frames larger than this are rejected rather than buffered indefinitely.
pub const MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

pub(crate) fn needs_escape(b: u8) -> bool {
    matches!(b, ESCAPE | FIELD_END | FRAME_START | FRAME_END)
}

pub(crate) fn is_tag_byte(b: u8) -> bool {
    b.is_ascii_graphic() && !needs_escape(b)
}

/// The result of scanning a buffer for one frame.
pub(crate) enum ScanOutcome {
    /// More bytes are needed before a frame can be produced.
    Incomplete,
    /// A complete frame, and how many bytes of the buffer it occupied
    /// (including leading whitespace).
    Frame {
        message: WireMessage,
        consumed: usize,
    },
}

/// Scans `src` for one complete frame without consuming it.
pub(crate) fn scan_frame(src: &[u8], max_frame_size: usize) -> Result<ScanOutcome, GatewireError> {
    let start = src
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(src.len());
    let frame = &src[start..];
    if frame.is_empty() {
        return Ok(ScanOutcome::Incomplete);
    }
    if frame[0] != FRAME_START {
        return Err(GatewireError::malformed(format!(
            "expected '[' at start of message, found byte 0x{:02x}",
            frame[0]
        )));
    }

    let mut message = WireMessage::new();
    let mut pos = 1;
    loop {
        if pos > max_frame_size {
            return Err(GatewireError::malformed(format!(
                "message exceeds {max_frame_size} bytes"
            )));
        }
        let Some(&next) = frame.get(pos) else {
            return Ok(ScanOutcome::Incomplete);
        };
        if next == FRAME_END {
            return Ok(ScanOutcome::Frame {
                message,
                consumed: start + pos + 1,
            });
        }

        if frame.len() < pos + TAG_WIDTH {
            return Ok(ScanOutcome::Incomplete);
        }
        let tag_bytes = &frame[pos..pos + TAG_WIDTH];
        if !tag_bytes.iter().all(|&b| is_tag_byte(b)) {
            return Err(GatewireError::malformed(format!(
                "invalid tag bytes {tag_bytes:?} at offset {pos}"
            )));
        }
        // Tag bytes are ASCII, so this cannot fail.
        let tag = String::from_utf8_lossy(tag_bytes).into_owned();
        pos += TAG_WIDTH;

        let mut value = Vec::new();
        loop {
            let Some(&b) = frame.get(pos) else {
                return Ok(ScanOutcome::Incomplete);
            };
            match b {
                ESCAPE => {
                    let Some(&escaped) = frame.get(pos + 1) else {
                        return Ok(ScanOutcome::Incomplete);
                    };
                    value.push(escaped);
                    pos += 2;
                }
                FIELD_END => {
                    pos += 1;
                    break;
                }
                FRAME_START | FRAME_END => {
                    return Err(GatewireError::malformed(format!(
                        "unterminated value for tag '{tag}'"
                    )));
                }
                _ => {
                    value.push(b);
                    pos += 1;
                }
            }
            if pos > max_frame_size {
                return Err(GatewireError::malformed(format!(
                    "message exceeds {max_frame_size} bytes"
                )));
            }
        }

        let value = String::from_utf8(value)?;
        if !message.insert_parsed(tag.clone(), value) {
            return Err(GatewireError::malformed(format!("duplicate tag '{tag}'")));
        }
    }
}

/// Resumable search for the unescaped `]` that closes the buffered frame.
#[derive(Debug, Clone, Copy, Default)]
struct EndSearch {
    /// Bytes of the buffer already searched.
    offset: usize,
    /// The last searched byte was an escape whose target hasn't arrived.
    escaped: bool,
}

impl EndSearch {
    fn resume(&mut self, src: &[u8]) -> Option<usize> {
        while let Some(&b) = src.get(self.offset) {
            if self.escaped {
                self.escaped = false;
            } else if b == ESCAPE {
                self.escaped = true;
            } else if b == FRAME_END {
                return Some(self.offset);
            }
            self.offset += 1;
        }
        None
    }
}

/// A `tokio_util::codec` implementation for encoding and decoding `WireMessage`s.
///
/// A partial frame is only searched for its closing byte, and each call picks
/// up where the previous one stopped. Fields are parsed once, when the frame
/// is complete.
#[derive(Debug, Clone)]
pub struct WireMessageCodec {
    max_frame_size: usize,
    search: EndSearch,
}

impl WireMessageCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Overrides the frame size limit, mostly useful in tests.
    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        Self {
            max_frame_size,
            search: EndSearch::default(),
        }
    }
}

impl Default for WireMessageCodec {
    fn default() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }
}

impl Encoder<WireMessage> for WireMessageCodec {
    type Error = GatewireError;

    fn encode(&mut self, item: WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        <Self as Encoder<&WireMessage>>::encode(self, &item, dst)
    }
}

impl<'a> Encoder<&'a WireMessage> for WireMessageCodec {
    type Error = GatewireError;

    fn encode(&mut self, item: &'a WireMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        item.encode_into(dst);
        Ok(())
    }
}

impl Decoder for WireMessageCodec {
    type Item = WireMessage;
    type Error = GatewireError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(start) = src.iter().position(|b| !b.is_ascii_whitespace()) else {
            // Drop whitespace-only prefixes so idle keepalive newlines
            // don't accumulate.
            src.clear();
            self.search = EndSearch::default();
            return Ok(None);
        };
        if src[start] != FRAME_START {
            return Err(GatewireError::malformed(format!(
                "expected '[' at start of message, found byte 0x{:02x}",
                src[start]
            )));
        }

        let Some(end) = self.search.resume(&src[..]) else {
            if src.len() - start > self.max_frame_size {
                return Err(GatewireError::malformed(format!(
                    "message exceeds {} bytes",
                    self.max_frame_size
                )));
            }
            return Ok(None);
        };
        match scan_frame(&src[..=end], self.max_frame_size)? {
            ScanOutcome::Frame { message, consumed } => {
                src.advance(consumed);
                self.search = EndSearch::default();
                Ok(Some(message))
            }
            ScanOutcome::Incomplete => {
                self.search.offset = end + 1;
                Ok(None)
            }
        }
    }
}
