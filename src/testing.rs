//! In-memory doubles for the link, session and serial seams

use crate::connection::SupervisorConfig;
use crate::serial::ByteSource;
use crate::session::traits::SessionError;
use crate::session::{SessionClient, SessionParams};
use crate::transport::{Credentials, NetworkLink};
use anyhow::{bail, Result};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::VecDeque;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::Mutex;
use std::time::Duration;
use time::OffsetDateTime;
use tokio::time::Instant;

/// 2024-01-01T00:00:00Z
pub const SYNCED_UNIX: i64 = 1_704_067_200;

pub fn test_supervisor_config() -> SupervisorConfig {
    SupervisorConfig {
        credentials: Credentials {
            ssid: "field-net".into(),
            password: "secret".into(),
        },
        session: SessionParams {
            host: "broker.test".into(),
            port: 8883,
            client_id: "uart-bridge-test".into(),
            username: None,
            password: None,
        },
        ntp_server: "pool.ntp.org".into(),
        link_check_interval: Duration::from_secs(5),
        attach_timeout: Duration::from_secs(10),
        attach_poll_interval: Duration::from_millis(100),
        clock_sync_timeout: Duration::from_secs(5),
        session_retry_interval: Duration::from_secs(5),
    }
}

pub struct FakeLink {
    pub up: bool,
    /// Whether an attach brings the link up
    pub attach_ok: bool,
    /// Whether starting an attach fails outright
    pub attach_error: bool,
    /// Whether a clock sync request moves the clock to real time
    pub clock_syncs: bool,
    pub attach_calls: usize,
    pub clock_sync_calls: usize,
    pub clock: OffsetDateTime,
}

impl FakeLink {
    pub fn down() -> Self {
        Self {
            up: false,
            attach_ok: true,
            attach_error: false,
            clock_syncs: true,
            attach_calls: 0,
            clock_sync_calls: 0,
            clock: OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(60),
        }
    }

    /// Already attached with a synchronized clock
    pub fn up() -> Self {
        let mut link = Self::down();
        link.up = true;
        link.set_clock(SYNCED_UNIX);
        link
    }

    pub fn set_clock(&mut self, unix: i64) {
        self.clock = OffsetDateTime::UNIX_EPOCH + time::Duration::seconds(unix);
    }
}

#[async_trait]
impl NetworkLink for FakeLink {
    async fn begin_attach(&mut self, _credentials: &Credentials) -> Result<()> {
        self.attach_calls += 1;
        if self.attach_error {
            bail!("radio unavailable");
        }
        if self.attach_ok {
            self.up = true;
        }
        Ok(())
    }

    fn is_up(&self) -> bool {
        self.up
    }

    fn local_address(&self) -> Option<IpAddr> {
        self.up.then_some(IpAddr::V4(Ipv4Addr::new(192, 168, 4, 20)))
    }

    async fn begin_clock_sync(&mut self, _server: &str) -> Result<()> {
        self.clock_sync_calls += 1;
        if self.clock_syncs {
            self.set_clock(SYNCED_UNIX);
        }
        Ok(())
    }

    fn now(&self) -> OffsetDateTime {
        self.clock
    }

    fn name(&self) -> &str {
        "fake"
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Published {
    pub channel: String,
    pub payload: Vec<u8>,
    pub retain: bool,
}

pub struct FakeSession {
    pub connected: bool,
    pub accept_connect: bool,
    pub connect_attempts: Vec<Instant>,
    pub published: Vec<Published>,
    pub service_calls: usize,
    /// Answers for upcoming `is_connected` calls; `connected` once drained
    pub liveness: Mutex<VecDeque<bool>>,
    last_error: Option<SessionError>,
}

impl FakeSession {
    pub fn accepting() -> Self {
        Self {
            connected: false,
            accept_connect: true,
            connect_attempts: Vec::new(),
            published: Vec::new(),
            service_calls: 0,
            liveness: Mutex::new(VecDeque::new()),
            last_error: None,
        }
    }

    pub fn refusing() -> Self {
        Self {
            accept_connect: false,
            ..Self::accepting()
        }
    }

    pub fn script_liveness(&self, answers: &[bool]) {
        self.liveness
            .lock()
            .unwrap()
            .extend(answers.iter().copied());
    }

    pub fn messages(&self) -> Vec<serde_json::Value> {
        self.published
            .iter()
            .map(|p| serde_json::from_slice(&p.payload).unwrap())
            .collect()
    }
}

#[async_trait]
impl SessionClient for FakeSession {
    async fn connect(&mut self, _params: &SessionParams) -> Result<(), SessionError> {
        self.connect_attempts.push(Instant::now());
        if self.accept_connect {
            self.connected = true;
            self.last_error = None;
            Ok(())
        } else {
            let err = SessionError::Refused("NotAuthorized".into());
            self.last_error = Some(err.clone());
            Err(err)
        }
    }

    fn is_connected(&self) -> bool {
        self.liveness
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(self.connected)
    }

    fn publish(&mut self, channel: &str, payload: &[u8], retain: bool) -> bool {
        self.published.push(Published {
            channel: channel.to_string(),
            payload: payload.to_vec(),
            retain,
        });
        true
    }

    async fn service(&mut self) {
        self.service_calls += 1;
    }

    fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }
}

/// Serial input queued up front
#[derive(Default)]
pub struct VecSource {
    chunks: VecDeque<Bytes>,
}

impl VecSource {
    pub fn push(&mut self, data: &[u8]) {
        self.chunks.push_back(Bytes::copy_from_slice(data));
    }
}

impl ByteSource for VecSource {
    fn try_chunk(&mut self) -> Option<Bytes> {
        self.chunks.pop_front()
    }
}
