//! HTTP client for the device's five endpoints.
//!
//! Each call is independent: no caching, no retries, no state kept between
//! calls. Every request carries its own timeout from [`Timeouts`], and every
//! failure is mapped onto [`DeviceError`] so callers never see `reqwest` types.

use std::fmt;
use std::time::Instant;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Method, Url};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::config::{DeviceConfig, Timeouts};
use crate::error::DeviceError;
use crate::subnet::parse_ipv4;
use crate::types::{
    ConnectResult, DeviceEntry, DevicesReport, LinkStatus, NetworkEntry, NetworkInfo,
    OperationKind, Security, StatusReport,
};

/// Wi-Fi passphrase. Never printed, never logged.
#[derive(Clone, PartialEq, Eq, Default)]
pub struct Password(String);

impl Password {
    pub fn new(secret: impl Into<String>) -> Self {
        Self(secret.into())
    }

    pub fn expose(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Debug for Password {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("Password(***)")
    }
}

impl From<&str> for Password {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Password {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// The remote operations the coordinator drives.
#[async_trait]
pub trait DeviceApi: Send + Sync {
    /// Ask the device to scan for nearby networks.
    async fn scan(&self) -> Result<Vec<NetworkEntry>, DeviceError>;

    /// Join `ssid` in station mode; resolves once association and DHCP finish or fail.
    async fn connect(&self, ssid: &str, password: &Password)
        -> Result<ConnectResult, DeviceError>;

    /// Leave the current station network.
    async fn disconnect(&self) -> Result<(), DeviceError>;

    /// Current station link, if any.
    async fn fetch_status(&self) -> Result<StatusReport, DeviceError>;

    /// Hosts the device has seen on its station subnet.
    async fn fetch_devices(&self) -> Result<DevicesReport, DeviceError>;
}

/// `reqwest` implementation of [`DeviceApi`].
#[derive(Clone, Debug)]
pub struct DeviceClient {
    http: Client,
    base_url: Url,
    timeouts: Timeouts,
}

impl DeviceClient {
    pub fn new(config: DeviceConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            // The device sits on a directly attached link; never route through a proxy.
            .no_proxy()
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self {
            http,
            base_url: config.base_url,
            timeouts: config.timeouts,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    async fn call<T: DeserializeOwned>(
        &self,
        kind: OperationKind,
        method: Method,
        path: &str,
        form: Option<&[(&str, &str)]>,
    ) -> Result<T, DeviceError> {
        let url = self
            .base_url
            .join(path)
            .map_err(|e| DeviceError::unreachable(path, e))?;
        let endpoint = url.to_string();
        let timeout = self.timeouts.for_kind(kind);

        let mut req = self.http.request(method, url).timeout(timeout);
        if let Some(form) = form {
            req = req.form(form);
        }

        let start = Instant::now();
        let resp = req.send().await.map_err(|e| {
            tracing::debug!(%endpoint, "{kind} request failed: {e}");
            DeviceError::unreachable(&endpoint, describe(&e, timeout))
        })?;

        let status = resp.status();
        let body = resp
            .bytes()
            .await
            .map_err(|e| DeviceError::unreachable(&endpoint, describe(&e, timeout)))?;
        tracing::debug!(
            %endpoint,
            status = status.as_u16(),
            latency_ms = start.elapsed().as_millis() as u64,
            "{kind} response"
        );

        if !status.is_success() {
            return Err(DeviceError::server(
                &endpoint,
                format!("HTTP {}{}", status.as_u16(), error_detail(&body)),
            ));
        }
        decode(&endpoint, &body)
    }
}

#[async_trait]
impl DeviceApi for DeviceClient {
    async fn scan(&self) -> Result<Vec<NetworkEntry>, DeviceError> {
        let wire: ScanWire = self.call(OperationKind::Scan, Method::GET, "scan", None).await?;
        Ok(wire.into_entries())
    }

    async fn connect(
        &self,
        ssid: &str,
        password: &Password,
    ) -> Result<ConnectResult, DeviceError> {
        let form = [("ssid", ssid), ("password", password.expose())];
        let wire: ConnectWire = self
            .call(OperationKind::Connect, Method::POST, "connect", Some(&form))
            .await?;
        wire.into_result(&self.endpoint_name("connect"), ssid)
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        let wire: AckWire = self
            .call(OperationKind::Disconnect, Method::POST, "disconnect", None)
            .await?;
        if wire.success {
            Ok(())
        } else {
            Err(DeviceError::server(
                &self.endpoint_name("disconnect"),
                "device reported disconnect failure",
            ))
        }
    }

    async fn fetch_status(&self) -> Result<StatusReport, DeviceError> {
        let wire: StatusWire = self
            .call(OperationKind::Status, Method::GET, "status", None)
            .await?;
        wire.into_report(&self.endpoint_name("status"))
    }

    async fn fetch_devices(&self) -> Result<DevicesReport, DeviceError> {
        let wire: DevicesWire = self
            .call(OperationKind::Devices, Method::GET, "devices", None)
            .await?;
        Ok(wire.into_report())
    }
}

impl DeviceClient {
    fn endpoint_name(&self, path: &str) -> String {
        self.base_url
            .join(path)
            .map(|u| u.to_string())
            .unwrap_or_else(|_| path.to_string())
    }
}

fn describe(err: &reqwest::Error, timeout: std::time::Duration) -> String {
    if err.is_timeout() {
        format!("no response within {}ms", timeout.as_millis())
    } else if err.is_connect() {
        format!("connection failed: {err}")
    } else {
        err.to_string()
    }
}

/// The firmware answers errors as `{"error": "..."}`; surface that text when present.
fn error_detail(body: &[u8]) -> String {
    #[derive(Deserialize)]
    struct ErrorBody {
        error: String,
    }
    match serde_json::from_slice::<ErrorBody>(body) {
        Ok(b) => format!(": {}", b.error),
        Err(_) => String::new(),
    }
}

fn decode<T: DeserializeOwned>(endpoint: &str, body: &[u8]) -> Result<T, DeviceError> {
    serde_json::from_slice(body).map_err(|e| DeviceError::malformed(endpoint, e))
}

#[derive(Deserialize)]
struct ScanWire {
    networks: Vec<NetworkWire>,
}

#[derive(Deserialize)]
struct NetworkWire {
    ssid: String,
    rssi: i32,
    encryption: String,
    #[serde(default)]
    channel: Option<u32>,
}

impl ScanWire {
    fn into_entries(self) -> Vec<NetworkEntry> {
        self.networks
            .into_iter()
            .map(|n| NetworkEntry {
                security: Security::from_encryption(&n.encryption),
                ssid: n.ssid,
                signal_strength: n.rssi,
                channel: n.channel,
            })
            .collect()
    }
}

#[derive(Deserialize)]
struct ConnectWire {
    success: bool,
    #[serde(default)]
    ssid: Option<String>,
    #[serde(default)]
    ip: Option<String>,
}

impl ConnectWire {
    fn into_result(self, endpoint: &str, requested: &str) -> Result<ConnectResult, DeviceError> {
        if !self.success {
            return Err(DeviceError::AssociationFailed {
                ssid: requested.to_string(),
            });
        }
        let ip = self
            .ip
            .as_deref()
            .ok_or_else(|| DeviceError::malformed(endpoint, "success without an ip"))
            .and_then(|raw| parse_ipv4(raw).map_err(|e| DeviceError::malformed(endpoint, e)))?;
        Ok(ConnectResult {
            ssid: self.ssid.unwrap_or_else(|| requested.to_string()),
            ip,
        })
    }
}

#[derive(Deserialize)]
struct AckWire {
    success: bool,
}

#[derive(Deserialize)]
struct StatusWire {
    connected: bool,
    #[serde(default)]
    ssid: Option<String>,
    #[serde(default)]
    ip: Option<String>,
    #[serde(default)]
    rssi: Option<i32>,
    #[serde(default)]
    gateway: Option<String>,
    #[serde(default)]
    dns: Option<String>,
}

impl StatusWire {
    fn into_report(self, endpoint: &str) -> Result<StatusReport, DeviceError> {
        if !self.connected {
            return Ok(StatusReport::Disconnected);
        }
        let raw_ip = self
            .ip
            .ok_or_else(|| DeviceError::malformed(endpoint, "connected without an ip"))?;
        let ip = parse_ipv4(&raw_ip).map_err(|e| DeviceError::malformed(endpoint, e))?;
        Ok(StatusReport::Connected(LinkStatus {
            ssid: self.ssid.unwrap_or_default(),
            ip,
            rssi: self.rssi,
            gateway: self.gateway,
            dns: self.dns,
        }))
    }
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DevicesWire {
    #[serde(default)]
    devices: Vec<DeviceWire>,
    #[serde(default)]
    network_info: NetworkInfoWire,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct DeviceWire {
    ip: String,
    #[serde(default)]
    mac: Option<String>,
    #[serde(default, rename = "type")]
    device_type: Option<String>,
    #[serde(default)]
    hostname: Option<String>,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    last_seen: Option<u64>,
}

#[derive(Deserialize, Default)]
#[serde(rename_all = "camelCase")]
struct NetworkInfoWire {
    subnet: Option<String>,
    network: Option<String>,
    broadcast: Option<String>,
    gateway: Option<String>,
    dns: Option<String>,
    total_devices: Option<u64>,
    scan_time: Option<u64>,
}

impl DevicesWire {
    fn into_report(self) -> DevicesReport {
        let devices: Vec<DeviceEntry> = self
            .devices
            .into_iter()
            .map(|d| DeviceEntry {
                ip: d.ip,
                mac: d.mac.unwrap_or_else(|| "Unknown".to_string()),
                device_type: d.device_type.unwrap_or_else(|| "Unknown".to_string()),
                hostname: d.hostname,
                active: d.active,
                last_seen_millis: d.last_seen,
            })
            .collect();
        let info = self.network_info;
        DevicesReport {
            network_info: NetworkInfo {
                subnet: info.subnet,
                network: info.network,
                broadcast: info.broadcast,
                gateway: info.gateway,
                dns: info.dns,
                total_devices: info.total_devices.unwrap_or(devices.len() as u64),
                scan_time_millis: info.scan_time,
            },
            devices,
        }
    }
}
