//! Terminator-delimited framing for the serial byte stream
//!
//! Messages from the microcontroller arrive as:
//! ```text
//! [ N bytes: message text ][ optional CR/LF noise ][ 1 byte: terminator ]
//! ```
//!
//! The stream gives no guarantee that a terminator ever arrives, so the
//! assembler also completes a frame once its fixed buffer is full.

use std::borrow::Cow;
use thiserror::Error;

/// Smallest usable buffer: one content byte plus the reserved slot
pub const MIN_CAPACITY: usize = 2;

/// Errors that can occur when setting up a frame assembler
#[derive(Error, Debug, PartialEq, Eq)]
pub enum FramerError {
    #[error("Frame capacity too small: {0} bytes (min: {MIN_CAPACITY})")]
    CapacityTooSmall(usize),
}

/// How a frame was completed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameEnd {
    /// The terminator byte arrived
    Terminator,
    /// The buffer filled up before a terminator arrived
    Overflow,
}

/// Count of frames assembled since start, wrapping at `u32::MAX`
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceCounter(u32);

impl SequenceCounter {
    pub fn new() -> Self {
        Self(0)
    }

    /// Advance the counter and return the new value
    pub fn advance(&mut self) -> u32 {
        self.0 = self.0.wrapping_add(1);
        self.0
    }

    /// Last value handed out (0 before the first frame)
    pub fn current(&self) -> u32 {
        self.0
    }
}

/// A completed frame, borrowed from the assembler's buffer.
///
/// Valid until the next byte is fed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    content: &'a [u8],
    sequence: u32,
    end: FrameEnd,
}

impl<'a> Frame<'a> {
    /// Message bytes without terminator and trailing CR/LF
    pub fn as_bytes(&self) -> &'a [u8] {
        self.content
    }

    pub fn sequence(&self) -> u32 {
        self.sequence
    }

    pub fn end(&self) -> FrameEnd {
        self.end
    }

    pub fn is_empty(&self) -> bool {
        self.content.is_empty()
    }

    pub fn len(&self) -> usize {
        self.content.len()
    }

    /// Message text, with invalid UTF-8 replaced
    pub fn to_string_lossy(&self) -> Cow<'a, str> {
        String::from_utf8_lossy(self.content)
    }
}

/// Reassembles frames from the serial stream one byte at a time.
///
/// The buffer is allocated once and reused for every frame.
#[derive(Debug)]
pub struct FrameAssembler {
    buffer: Box<[u8]>,
    cursor: usize,
    terminator: u8,
    sequence: SequenceCounter,
}

impl FrameAssembler {
    /// Create an assembler with a buffer of `capacity` bytes.
    ///
    /// One slot is reserved, so frames hold at most `capacity - 1` bytes.
    pub fn new(capacity: usize, terminator: u8) -> Result<Self, FramerError> {
        if capacity < MIN_CAPACITY {
            return Err(FramerError::CapacityTooSmall(capacity));
        }

        Ok(Self {
            buffer: vec![0u8; capacity].into_boxed_slice(),
            cursor: 0,
            terminator,
            sequence: SequenceCounter::new(),
        })
    }

    /// Feed one byte; returns a frame when this byte completes one.
    ///
    /// A frame completes when the byte is the terminator or when the
    /// buffer has reached `capacity - 1` bytes. Bytes beyond that are
    /// dropped but still checked against the terminator.
    pub fn feed(&mut self, byte: u8) -> Option<Frame<'_>> {
        let limit = self.max_content();

        let stored = self.cursor < limit;
        if stored {
            self.buffer[self.cursor] = byte;
            self.cursor += 1;
        }

        let terminated = byte == self.terminator;
        if !terminated && self.cursor < limit {
            return None;
        }

        let mut len = self.cursor;
        if terminated && stored {
            len -= 1;
        }
        while len > 0 && matches!(self.buffer[len - 1], b'\r' | b'\n') {
            len -= 1;
        }
        // reserved slot
        self.buffer[len] = 0;

        self.cursor = 0;
        let sequence = self.sequence.advance();

        Some(Frame {
            content: &self.buffer[..len],
            sequence,
            end: if terminated {
                FrameEnd::Terminator
            } else {
                FrameEnd::Overflow
            },
        })
    }

    /// Total buffer size including the reserved slot
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }

    /// Largest frame content this assembler can hold
    pub fn max_content(&self) -> usize {
        self.buffer.len() - 1
    }

    /// Bytes accumulated towards the next frame
    pub fn pending(&self) -> usize {
        self.cursor
    }

    pub fn terminator(&self) -> u8 {
        self.terminator
    }

    /// Sequence number of the most recent frame
    pub fn sequence(&self) -> u32 {
        self.sequence.current()
    }
}
