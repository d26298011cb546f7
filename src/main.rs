mod bridge;
mod config;
mod connection;
mod logger;
mod serial;
mod session;
mod transport;

#[cfg(test)]
mod testing;

use anyhow::{Context, Result};
use bridge::{Bridge, BridgeSettings};
use bridge_shared::FrameAssembler;
use clap::Parser;
use config::BridgeConfig;
use serial::SerialReader;
use session::{MqttSession, MqttSettings};
use std::path::PathBuf;
use std::time::Duration;
use tracing::{info, warn};
use transport::HostLink;
use validator::Validate;

#[derive(Parser, Debug)]
#[command(name = "uart-mqtt-bridge", version, about = "Serial line to MQTT bridge")]
struct Cli {
    /// Configuration file; built-in defaults when omitted
    #[arg(long, short, value_name = "PATH", env = "BRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Serial port, overriding the configuration
    #[arg(long, value_name = "PORT")]
    serial_port: Option<String>,

    /// Minimum log level, overriding the configuration
    #[arg(long, value_name = "LEVEL")]
    log_level: Option<String>,
}

impl Cli {
    fn load_config(&self) -> Result<BridgeConfig> {
        let mut config = match &self.config {
            Some(path) => BridgeConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => BridgeConfig::default(),
        };

        if let Some(port) = &self.serial_port {
            config.serial.port = port.clone();
        }
        if let Some(level) = &self.log_level {
            config.logger.level = level.clone();
        }

        config.validate().context("invalid configuration")?;
        Ok(config)
    }
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = cli.load_config()?;

    logger::init(&config.logger)?;

    info!(
        "UART bridge {} starting: {}",
        env!("CARGO_PKG_VERSION"),
        config.device.name
    );
    info!("  Serial: {} @ {} baud", config.serial.port, config.serial.baud_rate);
    info!(
        "  Broker: {}:{} topic {}",
        config.mqtt.host, config.mqtt.port, config.mqtt.topic
    );

    let framer = FrameAssembler::new(config.serial.frame_capacity, config.serial.terminator)
        .context("frame buffer")?;

    let trust_anchor = match &config.mqtt.ca_cert {
        Some(path) => Some(MqttSession::load_trust_anchor(path)?),
        None => {
            warn!("No CA certificate configured, broker session is unencrypted");
            None
        }
    };
    let session = MqttSession::new(MqttSettings {
        trust_anchor,
        keep_alive: Duration::from_secs(config.mqtt.keep_alive_secs),
        connect_timeout: Duration::from_millis(config.mqtt.connect_timeout_ms),
        max_packet_size: config.mqtt.max_payload + config.mqtt.topic.len() + 64,
        request_capacity: config.serial.max_buffered_frames(),
    });

    let link = HostLink::new(config.network.interface.clone());
    let source = SerialReader::spawn(config.serial.clone());

    let settings = BridgeSettings {
        device: config.device.name.clone(),
        topic: config.mqtt.topic.clone(),
        retain: config.mqtt.retain,
        max_payload: config.mqtt.max_payload,
        status_interval: config.status_interval(),
    };

    let mut bridge = Bridge::new(framer, config.supervisor(), link, session, source, settings);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!("Failed to listen for shutdown signal: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let stats = bridge.run(config.tick_interval(), shutdown).await;
    info!(
        "Stopped: {} frames, {} published, {} dropped, {} failed",
        stats.frames, stats.published, stats.dropped, stats.failed
    );

    Ok(())
}
