//! Envelope wrapping a frame for publication
//!
//! Each frame is published as a flat JSON object:
//! ```text
//! {"device":"<name>","message":"<text>","timestamp":"YYYY-MM-DDTHH:MM:SSZ","sequence":<n>}
//! ```
//!
//! The serialized form is bounded; an oversized document is shortened by
//! truncating the message text, never by cutting the JSON itself.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::format_description::BorrowedFormatItem;
use time::macros::format_description;
use time::{OffsetDateTime, UtcOffset};

use crate::framer::Frame;

const TIMESTAMP_FORMAT: &[BorrowedFormatItem<'static>] =
    format_description!("[year]-[month]-[day]T[hour]:[minute]:[second]Z");

/// Errors that can occur while building or encoding an envelope
#[derive(Error, Debug)]
pub enum EnvelopeError {
    #[error("Timestamp format error: {0}")]
    Timestamp(#[from] time::error::Format),

    #[error("JSON encode error: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Render a wall-clock instant as `YYYY-MM-DDTHH:MM:SSZ`
pub fn format_timestamp(at: OffsetDateTime) -> Result<String, EnvelopeError> {
    Ok(at.to_offset(UtcOffset::UTC).format(TIMESTAMP_FORMAT)?)
}

/// The record published for each frame
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    pub device: String,
    pub message: String,
    pub timestamp: String,
    pub sequence: u32,
}

/// Borrowed wire view, so truncation does not copy the envelope
#[derive(Serialize)]
struct WireEnvelope<'a> {
    device: &'a str,
    message: &'a str,
    timestamp: &'a str,
    sequence: u32,
}

/// A serialized envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Encoded {
    pub payload: String,
    /// The message text was shortened to fit
    pub truncated: bool,
}

impl Envelope {
    /// Build an envelope from raw message bytes
    pub fn build(
        message: &[u8],
        sequence: u32,
        timestamp: OffsetDateTime,
        device_id: &str,
    ) -> Result<Self, EnvelopeError> {
        Ok(Self {
            device: device_id.to_owned(),
            message: String::from_utf8_lossy(message).into_owned(),
            timestamp: format_timestamp(timestamp)?,
            sequence,
        })
    }

    /// Build an envelope for a completed frame
    pub fn from_frame(
        frame: &Frame<'_>,
        timestamp: OffsetDateTime,
        device_id: &str,
    ) -> Result<Self, EnvelopeError> {
        Self::build(frame.as_bytes(), frame.sequence(), timestamp, device_id)
    }

    fn wire(&self, message_len: usize) -> WireEnvelope<'_> {
        WireEnvelope {
            device: &self.device,
            message: &self.message[..message_len],
            timestamp: &self.timestamp,
            sequence: self.sequence,
        }
    }

    /// Serialize to compact JSON of at most `max_len` bytes.
    ///
    /// When the full document is too long the message is cut at a
    /// character boundary until it fits. If the other fields alone exceed
    /// `max_len`, the document with an empty message is returned.
    pub fn encode(&self, max_len: usize) -> Result<Encoded, EnvelopeError> {
        let mut keep = self.message.len();
        let mut payload = serde_json::to_string(&self.wire(keep))?;
        if payload.len() <= max_len {
            return Ok(Encoded {
                payload,
                truncated: false,
            });
        }

        // Every message byte removed shrinks the document by at least one
        // byte, so cutting the excess converges in a few rounds even when
        // escapes inflate the text.
        while payload.len() > max_len && keep > 0 {
            let excess = payload.len() - max_len;
            keep = floor_char_boundary(&self.message, keep.saturating_sub(excess));
            payload = serde_json::to_string(&self.wire(keep))?;
        }

        Ok(Encoded {
            payload,
            truncated: true,
        })
    }
}

fn floor_char_boundary(text: &str, mut index: usize) -> usize {
    while !text.is_char_boundary(index) {
        index -= 1;
    }
    index
}
