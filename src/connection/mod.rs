//! Connection supervision for the network link and the broker session
//!
//! This module handles:
//! - Passive link monitoring every tick
//! - Bounded attach attempts with best-effort clock sync
//! - Rate-limited broker session reconnects

mod supervisor;
mod wait;

pub use supervisor::{ConnectivitySupervisor, SupervisorConfig};
