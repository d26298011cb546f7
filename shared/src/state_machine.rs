//! Liveness State Machine
//!
//! Tracks the two supervised layers (network link and broker session) and
//! rate-limits reconnect attempts on each of them.

use std::time::{Duration, Instant};

/// The supervised layers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Network attachment
    Transport,
    /// Authenticated publish channel on top of the transport
    Session,
}

impl std::fmt::Display for Layer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Layer::Transport => write!(f, "Network"),
            Layer::Session => write!(f, "Session"),
        }
    }
}

/// Whether a layer is usable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LivenessState {
    #[default]
    Down,
    Up,
}

impl LivenessState {
    pub fn from_up(up: bool) -> Self {
        if up {
            LivenessState::Up
        } else {
            LivenessState::Down
        }
    }

    pub fn is_up(self) -> bool {
        self == LivenessState::Up
    }

    /// Short label for status reports
    pub fn label(self) -> &'static str {
        match self {
            LivenessState::Up => "OK",
            LivenessState::Down => "DOWN",
        }
    }
}

/// An edge between the two liveness states
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    CameUp,
    WentDown,
}

/// Liveness of a single layer, reporting edges as they are observed
#[derive(Debug, Clone)]
pub struct LivenessTracker {
    layer: Layer,
    state: LivenessState,
}

impl LivenessTracker {
    /// Create a tracker in the Down state
    pub fn new(layer: Layer) -> Self {
        Self {
            layer,
            state: LivenessState::Down,
        }
    }

    pub fn layer(&self) -> Layer {
        self.layer
    }

    pub fn state(&self) -> LivenessState {
        self.state
    }

    pub fn is_up(&self) -> bool {
        self.state.is_up()
    }

    /// Record the latest observation and return the edge, if any
    pub fn observe(&mut self, up: bool) -> Option<Transition> {
        let next = LivenessState::from_up(up);
        let transition = match (self.state, next) {
            (LivenessState::Down, LivenessState::Up) => Some(Transition::CameUp),
            (LivenessState::Up, LivenessState::Down) => Some(Transition::WentDown),
            _ => None,
        };
        self.state = next;
        transition
    }
}

/// Minimum spacing between reconnect attempts.
///
/// The attempt time is recorded whatever the outcome, so a failing peer
/// is never retried faster than `interval`.
#[derive(Debug, Clone)]
pub struct RetryTimer {
    interval: Duration,
    last_attempt: Option<Instant>,
}

impl RetryTimer {
    /// Create a timer that is ready immediately
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_attempt: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn last_attempt(&self) -> Option<Instant> {
        self.last_attempt
    }

    /// Check whether an attempt is allowed at `now`
    pub fn ready(&self, now: Instant) -> bool {
        match self.last_attempt {
            None => true,
            Some(last) => now.saturating_duration_since(last) >= self.interval,
        }
    }

    /// Record an attempt made at `now`
    pub fn record(&mut self, now: Instant) {
        self.last_attempt = Some(now);
    }

    /// Record an attempt if one is allowed; returns whether it was
    pub fn try_fire(&mut self, now: Instant) -> bool {
        if self.ready(now) {
            self.record(now);
            true
        } else {
            false
        }
    }
}
