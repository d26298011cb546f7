//! Connectivity supervisor keeping the network link and broker session alive
//!
//! Both layers are retried forever on the tick schedule: there is no
//! backoff growth, no retry limit and no permanent failure state.

use crate::connection::wait::BoundedWait;
use crate::session::{SessionClient, SessionParams};
use crate::transport::{Credentials, NetworkLink};
use bridge_shared::{timing, Layer, LivenessTracker, RetryTimer, Transition};
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Configuration for the connectivity supervisor
#[derive(Debug, Clone)]
pub struct SupervisorConfig {
    /// Network to join when the link is down
    pub credentials: Credentials,
    /// Broker endpoint and identity
    pub session: SessionParams,
    /// Time server for the post-attach clock sync
    pub ntp_server: String,
    /// Spacing of link checks (and attach attempts)
    pub link_check_interval: Duration,
    /// Bound on one attach attempt
    pub attach_timeout: Duration,
    pub attach_poll_interval: Duration,
    /// Bound on the best-effort clock sync
    pub clock_sync_timeout: Duration,
    /// Minimum spacing of session attempts
    pub session_retry_interval: Duration,
}

/// What the supervisor did during one tick
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SupervisorReport {
    pub attach_attempted: bool,
    pub attached: bool,
    /// Set when an attach succeeded; whether the clock became plausible
    pub clock_synced: Option<bool>,
    pub session_attempted: bool,
    pub session_connected: bool,
}

/// Drives the two liveness state machines once per tick
pub struct ConnectivitySupervisor {
    config: SupervisorConfig,
    transport: LivenessTracker,
    session: LivenessTracker,
    link_timer: RetryTimer,
    session_timer: RetryTimer,
    attach_wait: BoundedWait,
    clock_wait: BoundedWait,
}

impl ConnectivitySupervisor {
    pub fn new(config: SupervisorConfig) -> Self {
        Self {
            transport: LivenessTracker::new(Layer::Transport),
            session: LivenessTracker::new(Layer::Session),
            link_timer: RetryTimer::new(config.link_check_interval),
            session_timer: RetryTimer::new(config.session_retry_interval),
            attach_wait: BoundedWait::new(config.attach_timeout, config.attach_poll_interval),
            clock_wait: BoundedWait::new(config.clock_sync_timeout, config.attach_poll_interval),
            config,
        }
    }

    #[cfg(test)]
    pub fn transport_state(&self) -> bridge_shared::LivenessState {
        self.transport.state()
    }

    /// Session state as of the last tick; publishing uses the live check
    #[cfg(test)]
    pub fn session_state(&self) -> bridge_shared::LivenessState {
        self.session.state()
    }

    /// Run one supervision step.
    ///
    /// The link is observed every tick; an attach is attempted only when a
    /// link check is due and the link is down. The session is evaluated
    /// only while the link is up.
    pub async fn tick<L, S>(&mut self, link: &mut L, session: &mut S) -> SupervisorReport
    where
        L: NetworkLink + ?Sized,
        S: SessionClient + ?Sized,
    {
        let mut report = SupervisorReport::default();

        match self.transport.observe(link.is_up()) {
            Some(Transition::WentDown) => warn!("{} link lost", link.name()),
            Some(Transition::CameUp) => info!("{} link up", link.name()),
            None => {}
        }

        if self.link_timer.try_fire(now()) && !self.transport.is_up() {
            report.attach_attempted = true;
            if let Some(synced) = self.attach(link).await {
                report.attached = true;
                report.clock_synced = Some(synced);
            }
        }

        if !self.transport.is_up() {
            return report;
        }

        let live = session.is_connected();
        match self.session.observe(live) {
            Some(Transition::WentDown) => warn!("Session lost"),
            Some(Transition::CameUp) => info!("Session up"),
            None => {}
        }

        if !live && self.session_timer.try_fire(now()) {
            report.session_attempted = true;
            report.session_connected = self.reconnect_session(session).await;
        }

        report
    }

    /// One bounded attach attempt; on success returns whether the clock synced
    async fn attach<L>(&mut self, link: &mut L) -> Option<bool>
    where
        L: NetworkLink + ?Sized,
    {
        info!("Connecting to network via {}...", link.name());

        if let Err(e) = link.begin_attach(&self.config.credentials).await {
            warn!("Network attach failed: {}", e);
            return None;
        }

        if !self.attach_wait.until(|| link.is_up()).await {
            warn!(
                "Network attach failed: no link after {:?}",
                self.config.attach_timeout
            );
            return None;
        }

        self.transport.observe(true);
        match link.local_address() {
            Some(ip) => info!("Network connected, IP: {}", ip),
            None => info!("Network connected"),
        }

        Some(self.sync_clock(link).await)
    }

    /// Best effort: proceeds with whatever time the link has on timeout
    async fn sync_clock<L>(&self, link: &mut L) -> bool
    where
        L: NetworkLink + ?Sized,
    {
        if let Err(e) = link.begin_clock_sync(&self.config.ntp_server).await {
            warn!("Clock sync request failed: {}", e);
        }

        let synced = self
            .clock_wait
            .until(|| link.now().unix_timestamp() >= timing::PLAUSIBLE_EPOCH_SECS)
            .await;

        if synced {
            debug!("Clock synchronized: {}", link.now());
        } else {
            warn!(
                "Clock sync timed out after {:?}, timestamps may be epoch-relative",
                self.config.clock_sync_timeout
            );
        }
        synced
    }

    async fn reconnect_session<S>(&mut self, session: &mut S) -> bool
    where
        S: SessionClient + ?Sized,
    {
        let endpoint = self.config.session.endpoint();
        debug!("Connecting to broker {}...", endpoint);

        match session.connect(&self.config.session).await {
            Ok(()) => {
                self.session.observe(true);
                info!("Session connected to {}", endpoint);
                true
            }
            Err(e) => {
                self.session.observe(false);
                warn!("Session connect to {} failed: {}", endpoint, e);
                false
            }
        }
    }
}

fn now() -> std::time::Instant {
    Instant::now().into_std()
}
