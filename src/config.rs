use std::net::Ipv4Addr;
use std::time::Duration;

use anyhow::{Context, Result};
use reqwest::Url;
use serde::Serialize;

use crate::types::OperationKind;

/// Address the firmware gives itself in access-point mode.
pub const DEFAULT_DEVICE_HOST: &str = "192.168.4.1";

/// Station-side mask the firmware assumes when it computes its scan range (/28).
pub const DEFAULT_SUBNET_MASK: Ipv4Addr = Ipv4Addr::new(255, 255, 255, 240);

/// Per-operation request timeouts.
///
/// Scan and device listing tolerate firmware scan latency, status must stay
/// well under the polling cadence, and connect covers association plus DHCP.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Timeouts {
    pub scan: Duration,
    pub connect: Duration,
    pub disconnect: Duration,
    pub status: Duration,
    pub devices: Duration,
}

impl Timeouts {
    pub fn for_kind(&self, kind: OperationKind) -> Duration {
        match kind {
            OperationKind::Scan => self.scan,
            OperationKind::Connect => self.connect,
            OperationKind::Disconnect => self.disconnect,
            OperationKind::Status => self.status,
            OperationKind::Devices => self.devices,
        }
    }
}

impl Default for Timeouts {
    fn default() -> Self {
        Self {
            scan: Duration::from_secs(10),
            connect: Duration::from_secs(30),
            disconnect: Duration::from_secs(10),
            status: Duration::from_secs(5),
            devices: Duration::from_secs(10),
        }
    }
}

/// Where the device lives and how long each call may take.
#[derive(Debug, Clone)]
pub struct DeviceConfig {
    pub base_url: Url,
    pub timeouts: Timeouts,
}

impl DeviceConfig {
    /// Accepts a bare host (`192.168.4.1`), `host:port`, or a full `http(s)://` URL.
    pub fn for_host(host: &str) -> Result<Self> {
        let host = host.trim();
        let raw = if host.starts_with("http://") || host.starts_with("https://") {
            host.to_string()
        } else {
            format!("http://{host}/")
        };
        let base_url =
            Url::parse(&raw).with_context(|| format!("invalid device address: {host}"))?;
        if base_url.host_str().is_none() {
            anyhow::bail!("device address has no host: {host}");
        }
        Ok(Self {
            base_url,
            timeouts: Timeouts::default(),
        })
    }

    pub fn with_timeouts(mut self, timeouts: Timeouts) -> Self {
        self.timeouts = timeouts;
        self
    }
}

/// Background polling cadence. Only explicit user commands change it.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq)]
pub struct RefreshPolicy {
    pub interval_secs: u64,
    pub auto_refresh_enabled: bool,
}

impl RefreshPolicy {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs.max(1))
    }
}

impl Default for RefreshPolicy {
    fn default() -> Self {
        Self {
            interval_secs: 10,
            auto_refresh_enabled: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CoordinatorConfig {
    pub policy: RefreshPolicy,
    /// Used for the range until the device reports its own subnet mask.
    pub default_mask: Ipv4Addr,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            policy: RefreshPolicy::default(),
            default_mask: DEFAULT_SUBNET_MASK,
        }
    }
}
