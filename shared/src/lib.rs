//! UART Bridge Shared Types
//!
//! This crate provides the I/O-free core of the serial to MQTT bridge:
//! reconstructing messages from the serial byte stream, wrapping them in
//! the published envelope, and tracking liveness of the network link and
//! the broker session.

pub mod envelope;
pub mod framer;
pub mod state_machine;

pub use envelope::{format_timestamp, Encoded, Envelope, EnvelopeError};
pub use framer::{Frame, FrameAssembler, FrameEnd, FramerError, SequenceCounter};
pub use state_machine::{Layer, LivenessState, LivenessTracker, RetryTimer, Transition};

/// Timing parameters for the bridge
pub mod timing {
    /// Interval between network link checks in milliseconds
    pub const LINK_CHECK_INTERVAL_MS: u64 = 5000;

    /// Poll interval while waiting for the link to attach
    pub const ATTACH_POLL_INTERVAL_MS: u64 = 100;

    /// Default bound on a single attach attempt
    pub const ATTACH_TIMEOUT_MS: u64 = 10000;

    /// Bound on the best-effort clock sync after attaching
    pub const CLOCK_SYNC_TIMEOUT_MS: u64 = 5000;

    /// Minimum delay between two broker session attempts
    pub const SESSION_RECONNECT_DELAY_MS: u64 = 5000;

    /// Interval of the periodic status report
    pub const STATUS_INTERVAL_MS: u64 = 30000;

    /// Wall-clock seconds after which the clock counts as synchronized.
    ///
    /// An unsynchronized clock starts at the epoch, so anything past the
    /// first day is taken as real time.
    pub const PLAUSIBLE_EPOCH_SECS: i64 = 24 * 3600;
}

/// Serial framing defaults
pub mod serial {
    /// Byte that completes a frame
    pub const DEFAULT_TERMINATOR: u8 = b'\n';

    /// Frame buffer size; one slot is reserved, so frames carry at most
    /// `DEFAULT_FRAME_CAPACITY - 1` bytes
    pub const DEFAULT_FRAME_CAPACITY: usize = 256;

    /// Default line speed
    pub const DEFAULT_BAUD_RATE: u32 = 115_200;

    /// Maximum size of a serialized envelope in bytes
    pub const DEFAULT_MAX_PAYLOAD: usize = 256;
}
