//! Host network link backed by the Linux network stack

use crate::transport::traits::{Credentials, NetworkLink};
use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::fs;
use std::net::{IpAddr, UdpSocket};
use std::path::{Path, PathBuf};
use time::OffsetDateTime;
use tokio::process::Command;
use tracing::{debug, info};

/// Where the kernel exposes interface state
const SYSFS_NET: &str = "/sys/class/net";

/// Routable address used to learn the local source address; nothing is sent
const ROUTE_PROBE: &str = "192.0.2.1:9";

/// Network link for a Linux host.
///
/// Link state comes from sysfs; joining a wireless network is delegated to
/// NetworkManager. The host's own NTP daemon keeps the clock.
pub struct HostLink {
    interface: Option<String>,
    sysfs_root: PathBuf,
    name: String,
}

impl HostLink {
    /// Create a link watching `interface`, or any non-loopback interface
    pub fn new(interface: Option<String>) -> Self {
        let name = match &interface {
            Some(iface) => format!("Host({})", iface),
            None => "Host".to_string(),
        };
        Self {
            interface,
            sysfs_root: PathBuf::from(SYSFS_NET),
            name,
        }
    }

    #[cfg(test)]
    fn with_sysfs_root(interface: Option<String>, root: PathBuf) -> Self {
        let mut link = Self::new(interface);
        link.sysfs_root = root;
        link
    }

    fn interface_up(root: &Path, iface: &str) -> bool {
        fs::read_to_string(root.join(iface).join("operstate"))
            .map(|state| state.trim() == "up")
            .unwrap_or(false)
    }

    fn any_interface_up(root: &Path) -> bool {
        let Ok(entries) = fs::read_dir(root) else {
            return false;
        };
        entries
            .filter_map(|entry| entry.ok())
            .filter(|entry| entry.file_name() != "lo")
            .any(|entry| Self::interface_up(root, &entry.file_name().to_string_lossy()))
    }
}

#[async_trait]
impl NetworkLink for HostLink {
    async fn begin_attach(&mut self, credentials: &Credentials) -> Result<()> {
        if credentials.ssid.is_empty() {
            debug!("No SSID configured, waiting for host link");
            return Ok(());
        }

        let mut cmd = Command::new("nmcli");
        cmd.args(["device", "wifi", "connect", &credentials.ssid]);
        if !credentials.password.is_empty() {
            cmd.args(["password", &credentials.password]);
        }
        if let Some(iface) = &self.interface {
            cmd.args(["ifname", iface]);
        }

        // Completion is observed through is_up
        cmd.spawn()
            .map_err(|e| anyhow!("Failed to start nmcli: {}", e))?;
        info!("Joining network {}", credentials.ssid);
        Ok(())
    }

    fn is_up(&self) -> bool {
        match &self.interface {
            Some(iface) => Self::interface_up(&self.sysfs_root, iface),
            None => Self::any_interface_up(&self.sysfs_root),
        }
    }

    fn local_address(&self) -> Option<IpAddr> {
        let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
        socket.connect(ROUTE_PROBE).ok()?;
        socket.local_addr().ok().map(|addr| addr.ip())
    }

    /// The host's NTP daemon owns the clock; `server` is only reported
    async fn begin_clock_sync(&mut self, server: &str) -> Result<()> {
        debug!("Clock kept by host NTP daemon (configured server: {})", server);
        Ok(())
    }

    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    fn name(&self) -> &str {
        &self.name
    }
}
