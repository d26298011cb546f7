//! MQTT session over rumqttc
//!
//! Each connect builds a fresh client and event loop, so a failed or
//! dropped session never reconnects behind the supervisor's back. Once the
//! broker accepts the session a driver task owns the event loop and polls
//! it until the connection ends; dropping the session aborts the driver.

use crate::session::traits::{SessionClient, SessionError, SessionParams};
use async_trait::async_trait;
use rumqttc::{
    AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, MqttOptions, Packet, QoS,
    Transport,
};
use std::path::Path;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, trace, warn};

struct ActiveSession {
    client: AsyncClient,
    /// Resolves with the reason the connection ended
    driver: JoinHandle<SessionError>,
}

impl Drop for ActiveSession {
    fn drop(&mut self) {
        self.driver.abort();
    }
}

/// Session settings that do not change between attempts
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// CA certificate (PEM); plain TCP when `None`
    pub trust_anchor: Option<Vec<u8>>,
    pub keep_alive: Duration,
    pub connect_timeout: Duration,
    /// Largest packet accepted in either direction
    pub max_packet_size: usize,
    /// Publishes that can be queued ahead of the event loop
    pub request_capacity: usize,
}

/// MQTT broker session
pub struct MqttSession {
    settings: MqttSettings,
    active: Option<ActiveSession>,
    last_error: Option<SessionError>,
}

impl MqttSession {
    pub fn new(settings: MqttSettings) -> Self {
        Self {
            settings,
            active: None,
            last_error: None,
        }
    }

    /// Read the broker's CA certificate from a PEM file
    pub fn load_trust_anchor(path: &Path) -> Result<Vec<u8>, SessionError> {
        std::fs::read(path)
            .map_err(|e| SessionError::Tls(format!("{}: {}", path.display(), e)))
    }

    fn options(&self, params: &SessionParams) -> MqttOptions {
        let mut opts = MqttOptions::new(params.client_id.clone(), params.host.clone(), params.port);
        opts.set_keep_alive(self.settings.keep_alive);
        opts.set_clean_session(true);
        opts.set_max_packet_size(self.settings.max_packet_size, self.settings.max_packet_size);

        if let Some(username) = &params.username {
            opts.set_credentials(
                username.clone(),
                params.password.clone().unwrap_or_default(),
            );
        }

        if let Some(ca) = &self.settings.trust_anchor {
            opts.set_transport(Transport::tls(ca.clone(), None, None));
        }

        opts
    }

    fn fail(&mut self, err: SessionError) {
        self.active = None;
        self.last_error = Some(err);
    }
}

fn connection_error(err: ConnectionError) -> SessionError {
    match err {
        ConnectionError::ConnectionRefused(code) => SessionError::Refused(format!("{:?}", code)),
        ConnectionError::Tls(e) => SessionError::Tls(e.to_string()),
        other => SessionError::Connection(other.to_string()),
    }
}

/// Poll until the broker answers the CONNECT
async fn handshake(eventloop: &mut EventLoop) -> Result<(), SessionError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(SessionError::Refused(format!("{:?}", ack.code)))
                };
            }
            Ok(event) => trace!("Handshake event: {:?}", event),
            Err(e) => return Err(connection_error(e)),
        }
    }
}

/// Flush queued publishes and keepalives until the connection ends
async fn drive(mut eventloop: EventLoop) -> SessionError {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::Disconnect)) => return SessionError::Closed,
            Ok(event) => trace!("Session event: {:?}", event),
            Err(e) => return connection_error(e),
        }
    }
}

#[async_trait]
impl SessionClient for MqttSession {
    async fn connect(&mut self, params: &SessionParams) -> Result<(), SessionError> {
        self.active = None;

        let (client, mut eventloop) =
            AsyncClient::new(self.options(params), self.settings.request_capacity);

        let result = match timeout(self.settings.connect_timeout, handshake(&mut eventloop)).await
        {
            Ok(result) => result,
            Err(_) => Err(SessionError::Timeout(self.settings.connect_timeout)),
        };

        match result {
            Ok(()) => {
                let driver = tokio::spawn(drive(eventloop));
                self.active = Some(ActiveSession { client, driver });
                self.last_error = None;
                Ok(())
            }
            Err(e) => {
                self.fail(e.clone());
                Err(e)
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.active
            .as_ref()
            .is_some_and(|active| !active.driver.is_finished())
    }

    fn publish(&mut self, channel: &str, payload: &[u8], retain: bool) -> bool {
        let Some(active) = self.active.as_ref() else {
            return false;
        };
        match active
            .client
            .try_publish(channel, QoS::AtMostOnce, retain, payload.to_vec())
        {
            Ok(()) => true,
            Err(e) => {
                debug!("Publish rejected: {}", e);
                false
            }
        }
    }

    async fn service(&mut self) {
        // let the driver run on a single-threaded runtime
        tokio::task::yield_now().await;

        let Some(active) = self.active.as_mut() else {
            return;
        };
        if !active.driver.is_finished() {
            return;
        }

        let err = match (&mut active.driver).await {
            Ok(err) => err,
            Err(e) => SessionError::Connection(format!("session driver stopped: {}", e)),
        };
        warn!("Session lost: {}", err);
        self.fail(err);
    }

    fn last_error(&self) -> Option<&SessionError> {
        self.last_error.as_ref()
    }
}
