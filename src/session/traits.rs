//! Broker session abstraction

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Where and as whom to open the session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionParams {
    pub host: String,
    pub port: u16,
    pub client_id: String,
    pub username: Option<String>,
    pub password: Option<String>,
}

impl SessionParams {
    /// `host:port` for diagnostics
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Errors that can occur on the broker session
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Broker refused connection: {0}")]
    Refused(String),

    #[error("Connection error: {0}")]
    Connection(String),

    #[error("No CONNACK within {0:?}")]
    Timeout(Duration),

    #[error("Disconnected by broker")]
    Closed,

    #[error("TLS setup failed: {0}")]
    Tls(String),
}

/// The authenticated publish channel
#[async_trait]
pub trait SessionClient: Send {
    /// Open a session; one attempt, bounded by the client's own timeout
    async fn connect(&mut self, params: &SessionParams) -> Result<(), SessionError>;

    /// Live session state as the client currently sees it
    fn is_connected(&self) -> bool;

    /// Hand one payload to the session; no retry, no delivery guarantee
    fn publish(&mut self, channel: &str, payload: &[u8], retain: bool) -> bool;

    /// Drive keepalive and inbound protocol traffic without blocking
    async fn service(&mut self);

    /// Most recent failure, if any
    fn last_error(&self) -> Option<&SessionError>;
}
