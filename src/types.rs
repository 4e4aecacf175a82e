use std::fmt;
use std::net::Ipv4Addr;

use serde::{Deserialize, Serialize};

/// Whether a scanned network asks for a passphrase.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
pub enum Security {
    Open,
    Secured,
}

impl Security {
    /// The firmware reports `"Open"` or `"Secured"`; anything that is not open needs a password.
    pub fn from_encryption(raw: &str) -> Self {
        if raw.trim().eq_ignore_ascii_case("open") {
            Security::Open
        } else {
            Security::Secured
        }
    }
}

/// Coarse RSSI bucket shown next to scan results and the live link.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum SignalQuality {
    Weak,
    Fair,
    Good,
    Excellent,
}

impl SignalQuality {
    pub fn from_rssi(rssi: i32) -> Self {
        if rssi > -50 {
            SignalQuality::Excellent
        } else if rssi > -60 {
            SignalQuality::Good
        } else if rssi > -70 {
            SignalQuality::Fair
        } else {
            SignalQuality::Weak
        }
    }
}

impl fmt::Display for SignalQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            SignalQuality::Excellent => "excellent",
            SignalQuality::Good => "good",
            SignalQuality::Fair => "fair",
            SignalQuality::Weak => "weak",
        };
        f.write_str(s)
    }
}

/// One row of a `/scan` answer. SSIDs are not unique; order is the device's.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct NetworkEntry {
    pub ssid: String,
    pub signal_strength: i32,
    pub security: Security,
    pub channel: Option<u32>,
}

impl NetworkEntry {
    pub fn quality(&self) -> SignalQuality {
        SignalQuality::from_rssi(self.signal_strength)
    }
}

/// Successful `/connect` answer.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct ConnectResult {
    pub ssid: String,
    pub ip: Ipv4Addr,
}

/// Link details reported by `/status` while the station is associated.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct LinkStatus {
    pub ssid: String,
    pub ip: Ipv4Addr,
    pub rssi: Option<i32>,
    pub gateway: Option<String>,
    pub dns: Option<String>,
}

impl LinkStatus {
    pub fn new(ssid: impl Into<String>, ip: Ipv4Addr) -> Self {
        Self {
            ssid: ssid.into(),
            ip,
            rssi: None,
            gateway: None,
            dns: None,
        }
    }
}

/// Parsed `/status` answer.
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "connected_state", rename_all = "snake_case")]
pub enum StatusReport {
    Disconnected,
    Connected(LinkStatus),
}

impl StatusReport {
    pub fn is_connected(&self) -> bool {
        matches!(self, StatusReport::Connected(_))
    }
}

/// One host the device sees on its station subnet (the device itself comes first).
#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
pub struct DeviceEntry {
    pub ip: String,
    pub mac: String,
    pub device_type: String,
    pub hostname: Option<String>,
    pub active: bool,
    /// Device uptime millis at the last successful ping.
    pub last_seen_millis: Option<u64>,
}

/// `networkInfo` block of a `/devices` answer. Only `total_devices` is always present.
#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct NetworkInfo {
    pub subnet: Option<String>,
    pub network: Option<String>,
    pub broadcast: Option<String>,
    pub gateway: Option<String>,
    pub dns: Option<String>,
    pub total_devices: u64,
    pub scan_time_millis: Option<u64>,
}

#[derive(Serialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct DevicesReport {
    pub devices: Vec<DeviceEntry>,
    pub network_info: NetworkInfo,
}

impl DevicesReport {
    pub fn active_count(&self) -> usize {
        self.devices.iter().filter(|d| d.active).count()
    }
}

/// The five remote operations; keys in-flight tracking and sequence watermarks.
#[derive(Serialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    Scan,
    Connect,
    Disconnect,
    Status,
    Devices,
}

impl OperationKind {
    pub const ALL: [OperationKind; 5] = [
        OperationKind::Scan,
        OperationKind::Connect,
        OperationKind::Disconnect,
        OperationKind::Status,
        OperationKind::Devices,
    ];

    pub(crate) fn index(self) -> usize {
        self as usize
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            OperationKind::Scan => "scan",
            OperationKind::Connect => "connect",
            OperationKind::Disconnect => "disconnect",
            OperationKind::Status => "status",
            OperationKind::Devices => "devices",
        };
        f.write_str(s)
    }
}
