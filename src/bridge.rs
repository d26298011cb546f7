//! Main loop tying the serial framer to the broker session
//!
//! Every tick drains the serial receive buffer into the framer and
//! publishes each completed frame, then lets the supervisor repair
//! connectivity, services the session and emits the periodic status line.
//! Frames that complete while the session is down are dropped.

use crate::connection::{ConnectivitySupervisor, SupervisorConfig};
use crate::serial::ByteSource;
use crate::session::SessionClient;
use crate::transport::NetworkLink;
use bridge_shared::{Envelope, FrameAssembler, FrameEnd, Layer, LivenessState, RetryTimer};
use std::future::Future;
use std::time::Duration;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Publishing settings for the bridge
#[derive(Debug, Clone)]
pub struct BridgeSettings {
    /// Device name stamped into every envelope
    pub device: String,
    pub topic: String,
    pub retain: bool,
    /// Upper bound on the serialized envelope
    pub max_payload: usize,
    pub status_interval: Duration,
}

/// Running totals since startup
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BridgeStats {
    pub frames: u64,
    pub published: u64,
    /// Frames completed while the session was down
    pub dropped: u64,
    /// Frames the session did not accept, or that failed to encode
    pub failed: u64,
    pub truncated: u64,
}

/// What one tick did with frames
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TickReport {
    pub frames: usize,
    pub published: usize,
    pub dropped: usize,
    pub failed: usize,
}

pub struct Bridge<L, S, R> {
    framer: FrameAssembler,
    supervisor: ConnectivitySupervisor,
    link: L,
    session: S,
    source: R,
    settings: BridgeSettings,
    status_timer: RetryTimer,
    stats: BridgeStats,
}

impl<L, S, R> Bridge<L, S, R>
where
    L: NetworkLink,
    S: SessionClient,
    R: ByteSource,
{
    pub fn new(
        framer: FrameAssembler,
        supervisor: SupervisorConfig,
        link: L,
        session: S,
        source: R,
        settings: BridgeSettings,
    ) -> Self {
        // first report one interval after startup
        let mut status_timer = RetryTimer::new(settings.status_interval);
        status_timer.record(Instant::now().into_std());

        Self {
            framer,
            supervisor: ConnectivitySupervisor::new(supervisor),
            link,
            session,
            source,
            settings,
            status_timer,
            stats: BridgeStats::default(),
        }
    }

    /// One pass of the main loop
    pub async fn tick(&mut self) -> TickReport {
        let mut report = TickReport::default();

        self.drain_serial(&mut report);

        self.supervisor.tick(&mut self.link, &mut self.session).await;

        if self.session.is_connected() {
            self.session.service().await;
        }

        if self.status_timer.try_fire(Instant::now().into_std()) {
            self.log_status();
        }

        report
    }

    /// Run ticks until `shutdown` resolves
    pub async fn run<F>(&mut self, tick_interval: Duration, shutdown: F) -> BridgeStats
    where
        F: Future<Output = ()>,
    {
        let mut ticker = tokio::time::interval(tick_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        tokio::pin!(shutdown);

        info!(
            "[BRIDGE] Running: tick {:?}, topic {}",
            tick_interval, self.settings.topic
        );

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("[BRIDGE] Shutdown requested");
                    break;
                }
                _ = ticker.tick() => {
                    self.tick().await;
                }
            }
        }

        self.log_status();
        let overrun = self.source.overrun_bytes();
        if overrun > 0 {
            warn!("[UART] {} bytes lost to receive buffer overrun", overrun);
        }
        self.stats
    }

    fn drain_serial(&mut self, report: &mut TickReport) {
        while let Some(chunk) = self.source.try_chunk() {
            for &byte in chunk.iter() {
                let Some(frame) = self.framer.feed(byte) else {
                    continue;
                };

                report.frames += 1;
                self.stats.frames += 1;

                if frame.end() == FrameEnd::Overflow {
                    debug!(
                        "[UART] Frame {} hit capacity, {} bytes",
                        frame.sequence(),
                        frame.len()
                    );
                }
                debug!(
                    "[UART] Frame {}: {}",
                    frame.sequence(),
                    frame.to_string_lossy()
                );

                let envelope =
                    Envelope::from_frame(&frame, self.link.now(), &self.settings.device);

                match envelope {
                    Ok(envelope) => self.publish(envelope, report),
                    Err(e) => {
                        error!("[BRIDGE] Failed to build envelope: {}", e);
                        report.failed += 1;
                        self.stats.failed += 1;
                    }
                }
            }
        }
    }

    fn publish(&mut self, envelope: Envelope, report: &mut TickReport) {
        // live check, the cached state may be a tick old
        if !self.session.is_connected() {
            debug!("[BRIDGE] Session down, dropping frame {}", envelope.sequence);
            report.dropped += 1;
            self.stats.dropped += 1;
            return;
        }

        let encoded = match envelope.encode(self.settings.max_payload) {
            Ok(encoded) => encoded,
            Err(e) => {
                error!("[BRIDGE] Failed to encode frame {}: {}", envelope.sequence, e);
                report.failed += 1;
                self.stats.failed += 1;
                return;
            }
        };

        if encoded.truncated {
            warn!(
                "[BRIDGE] Frame {} truncated to {} bytes",
                envelope.sequence, self.settings.max_payload
            );
            self.stats.truncated += 1;
        }

        if self.session.publish(
            &self.settings.topic,
            encoded.payload.as_bytes(),
            self.settings.retain,
        ) {
            debug!("[BRIDGE] Published frame {}", envelope.sequence);
            report.published += 1;
            self.stats.published += 1;
        } else {
            warn!("[BRIDGE] Publish of frame {} failed", envelope.sequence);
            report.failed += 1;
            self.stats.failed += 1;
        }
    }

    fn status_line(&self) -> String {
        format!(
            "Messages: {} | {}: {} | {}: {}",
            self.stats.frames,
            Layer::Transport,
            LivenessState::from_up(self.link.is_up()).label(),
            Layer::Session,
            LivenessState::from_up(self.session.is_connected()).label(),
        )
    }

    fn log_status(&self) {
        info!("{}", self.status_line());
        if !self.session.is_connected() {
            if let Some(err) = self.session.last_error() {
                info!("  Last session error: {}", err);
            }
        }
    }
}

#[cfg(test)]
impl<L, S, R> Bridge<L, S, R>
where
    L: NetworkLink,
    S: SessionClient,
    R: ByteSource,
{
    pub fn stats(&self) -> BridgeStats {
        self.stats
    }

    pub fn transport_state(&self) -> LivenessState {
        self.supervisor.transport_state()
    }

    pub fn session_state(&self) -> LivenessState {
        self.supervisor.session_state()
    }

    pub fn link_mut(&mut self) -> &mut L {
        &mut self.link
    }

    pub fn session(&self) -> &S {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut S {
        &mut self.session
    }

    pub fn source_mut(&mut self) -> &mut R {
        &mut self.source
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{test_supervisor_config, FakeLink, FakeSession, VecSource};
    use tokio::time::advance;

    const TOPIC: &str = "devices/uart-bridge-01/messages";

    fn settings() -> BridgeSettings {
        BridgeSettings {
            device: "uart-bridge-01".into(),
            topic: TOPIC.into(),
            retain: true,
            max_payload: 256,
            status_interval: Duration::from_secs(30),
        }
    }

    fn bridge(link: FakeLink, session: FakeSession) -> Bridge<FakeLink, FakeSession, VecSource> {
        Bridge::new(
            FrameAssembler::new(256, b'\n').unwrap(),
            test_supervisor_config(),
            link,
            session,
            VecSource::default(),
            settings(),
        )
    }

    #[tokio::test(start_paused = true)]
    async fn test_boot_connect_and_publish() {
        let mut bridge = bridge(FakeLink::down(), FakeSession::accepting());

        // first tick brings both layers up
        bridge.tick().await;
        assert_eq!(bridge.transport_state(), LivenessState::Up);
        assert_eq!(bridge.session_state(), LivenessState::Up);

        bridge.source_mut().push(b"temp=21.5\r\n");
        let report = bridge.tick().await;

        assert_eq!(report.frames, 1);
        assert_eq!(report.published, 1);

        let published = &bridge.session().published;
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].channel, TOPIC);
        assert!(published[0].retain);

        let messages = bridge.session().messages();
        assert_eq!(messages[0]["device"], "uart-bridge-01");
        assert_eq!(messages[0]["message"], "temp=21.5");
        assert_eq!(messages[0]["timestamp"], "2024-01-01T00:00:00Z");
        assert_eq!(messages[0]["sequence"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_unsynced_clock_gives_epoch_relative_timestamp() {
        let mut link = FakeLink::down();
        link.clock_syncs = false;
        let mut bridge = bridge(link, FakeSession::accepting());

        let start = Instant::now();
        bridge.tick().await;
        assert!(start.elapsed() >= Duration::from_secs(5));
        assert_eq!(bridge.transport_state(), LivenessState::Up);
        assert_eq!(bridge.session_state(), LivenessState::Up);

        bridge.source_mut().push(b"x\n");
        let report = bridge.tick().await;
        assert_eq!(report.published, 1);

        let messages = bridge.session().messages();
        let timestamp = messages[0]["timestamp"].as_str().unwrap();
        assert!(timestamp.starts_with("1970-01-01T"), "{}", timestamp);
        assert_eq!(messages[0]["message"], "x");
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_counts_frames_not_publishes() {
        let mut link = FakeLink::down();
        link.attach_ok = false;
        let mut bridge = bridge(link, FakeSession::accepting());

        bridge.source_mut().push(b"one\ntwo\n");
        bridge.tick().await;

        assert_eq!(bridge.stats().published, 0);
        assert_eq!(
            bridge.status_line(),
            "Messages: 2 | Network: DOWN | Session: DOWN"
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_frames_dropped_while_offline() {
        let mut link = FakeLink::down();
        link.attach_ok = false;
        let mut bridge = bridge(link, FakeSession::accepting());

        bridge.source_mut().push(b"one\ntwo\n");
        let report = bridge.tick().await;

        assert_eq!(report.frames, 2);
        assert_eq!(report.dropped, 2);
        assert!(bridge.session().published.is_empty());
        assert!(bridge.session().connect_attempts.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequence_counts_dropped_frames() {
        let mut bridge = bridge(FakeLink::up(), FakeSession::accepting());
        bridge.tick().await;

        // down for the first frame only
        bridge.session_mut().script_liveness(&[false]);
        bridge.source_mut().push(b"a\nb\n");
        let report = bridge.tick().await;
        assert_eq!(report.dropped, 1);
        assert_eq!(report.published, 1);

        bridge.source_mut().push(b"c\n");
        bridge.tick().await;

        let sequences: Vec<_> = bridge
            .session()
            .messages()
            .iter()
            .map(|m| m["sequence"].as_u64().unwrap())
            .collect();
        assert_eq!(sequences, vec![2, 3]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_publish_uses_live_session_state() {
        let mut bridge = bridge(FakeLink::up(), FakeSession::accepting());
        bridge.tick().await;
        assert_eq!(bridge.session_state(), LivenessState::Up);

        // session drops between the last tick and the next frame
        bridge.session_mut().script_liveness(&[false]);
        bridge.source_mut().push(b"lost\n");
        let report = bridge.tick().await;

        assert_eq!(report.dropped, 1);
        assert!(bridge.session().published.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_overflow_splits_frames() {
        let mut bridge = Bridge::new(
            FrameAssembler::new(8, b'\n').unwrap(),
            test_supervisor_config(),
            FakeLink::up(),
            FakeSession::accepting(),
            VecSource::default(),
            settings(),
        );
        bridge.tick().await;

        bridge.source_mut().push(b"abcdefghij\n");
        let report = bridge.tick().await;

        assert_eq!(report.frames, 2);
        let messages = bridge.session().messages();
        assert_eq!(messages[0]["message"], "abcdefg");
        assert_eq!(messages[1]["message"], "hij");
    }

    #[tokio::test(start_paused = true)]
    async fn test_oversized_message_truncated() {
        let mut settings = settings();
        settings.max_payload = 120;
        let mut bridge = Bridge::new(
            FrameAssembler::new(256, b'\n').unwrap(),
            test_supervisor_config(),
            FakeLink::up(),
            FakeSession::accepting(),
            VecSource::default(),
            settings,
        );
        bridge.tick().await;

        let mut line = vec![b'x'; 200];
        line.push(b'\n');
        bridge.source_mut().push(&line);
        bridge.tick().await;

        let published = &bridge.session().published;
        assert_eq!(published.len(), 1);
        assert!(published[0].payload.len() <= 120);
        assert_eq!(bridge.stats().truncated, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_service_only_when_connected() {
        let mut link = FakeLink::down();
        link.attach_ok = false;
        let mut bridge = bridge(link, FakeSession::accepting());

        bridge.tick().await;
        assert_eq!(bridge.session().service_calls, 0);

        bridge.link_mut().attach_ok = true;
        advance(Duration::from_secs(5)).await;
        bridge.tick().await;
        assert_eq!(bridge.session().service_calls, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_stops_on_shutdown() {
        let mut bridge = bridge(FakeLink::up(), FakeSession::accepting());
        bridge.source_mut().push(b"hello\n");

        let stats = bridge
            .run(
                Duration::from_millis(10),
                tokio::time::sleep(Duration::from_millis(100)),
            )
            .await;

        assert_eq!(stats.frames, 1);
        assert_eq!(stats.published + stats.dropped, 1);
        assert!(!bridge.session().connect_attempts.is_empty());
    }
}
