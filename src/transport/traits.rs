//! Network link abstraction for pluggable attachment backends

use anyhow::Result;
use async_trait::async_trait;
use std::net::IpAddr;
use time::OffsetDateTime;

/// Credentials for joining a network
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub ssid: String,
    pub password: String,
}

/// The lower layer the broker session rides on.
///
/// Attach and clock sync only start the operation; the supervisor polls
/// `is_up` and `now` with its own bounded waits.
#[async_trait]
pub trait NetworkLink: Send {
    /// Start joining the network
    async fn begin_attach(&mut self, credentials: &Credentials) -> Result<()>;

    /// Current link state, cheap enough to call every tick
    fn is_up(&self) -> bool;

    /// Address assigned on the link, if any
    fn local_address(&self) -> Option<IpAddr>;

    /// Start synchronizing the wall clock against `server`
    async fn begin_clock_sync(&mut self, server: &str) -> Result<()>;

    /// Current wall-clock time as the link sees it
    fn now(&self) -> OffsetDateTime;

    /// Human-readable name for this link
    fn name(&self) -> &str;
}
