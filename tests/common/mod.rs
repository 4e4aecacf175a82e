#![allow(dead_code)]

use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use axum::Router;
use tokio::sync::Notify;

use wifi_manager_rs::client::{DeviceApi, Password};
use wifi_manager_rs::error::DeviceError;
use wifi_manager_rs::types::{
    ConnectResult, DeviceEntry, DevicesReport, LinkStatus, NetworkEntry, NetworkInfo, Security,
    StatusReport,
};

/// Scriptable in-memory device. Every call is counted; answers can be swapped
/// between calls and a single call per operation can be held on a gate.
pub struct FakeDevice {
    pub scan_calls: AtomicUsize,
    pub connect_calls: AtomicUsize,
    pub disconnect_calls: AtomicUsize,
    pub status_calls: AtomicUsize,
    pub devices_calls: AtomicUsize,
    scan: Mutex<Result<Vec<NetworkEntry>, DeviceError>>,
    connect: Mutex<Result<ConnectResult, DeviceError>>,
    disconnect: Mutex<Result<(), DeviceError>>,
    status: Mutex<Result<StatusReport, DeviceError>>,
    devices: Mutex<Result<DevicesReport, DeviceError>>,
    connect_gate: Mutex<Option<Arc<Notify>>>,
    status_gate: Mutex<Option<Arc<Notify>>>,
}

impl FakeDevice {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            scan_calls: AtomicUsize::new(0),
            connect_calls: AtomicUsize::new(0),
            disconnect_calls: AtomicUsize::new(0),
            status_calls: AtomicUsize::new(0),
            devices_calls: AtomicUsize::new(0),
            scan: Mutex::new(Ok(vec![network("home", -48), network("cafe", -72)])),
            connect: Mutex::new(Ok(ConnectResult {
                ssid: "home".to_string(),
                ip: Ipv4Addr::new(10, 0, 0, 5),
            })),
            disconnect: Mutex::new(Ok(())),
            status: Mutex::new(Ok(StatusReport::Disconnected)),
            devices: Mutex::new(Ok(devices_report(
                Ipv4Addr::new(10, 0, 0, 5),
                &[Ipv4Addr::new(10, 0, 0, 9)],
                "255.255.255.0",
            ))),
            connect_gate: Mutex::new(None),
            status_gate: Mutex::new(None),
        })
    }

    pub fn set_connect(&self, result: Result<ConnectResult, DeviceError>) {
        *self.connect.lock().unwrap() = result;
    }

    pub fn set_disconnect(&self, result: Result<(), DeviceError>) {
        *self.disconnect.lock().unwrap() = result;
    }

    pub fn set_status(&self, result: Result<StatusReport, DeviceError>) {
        *self.status.lock().unwrap() = result;
    }

    pub fn set_devices(&self, result: Result<DevicesReport, DeviceError>) {
        *self.devices.lock().unwrap() = result;
    }

    /// Hold the next connect call until the returned gate is notified.
    pub fn gate_connect(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.connect_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    /// Hold the next status call until the returned gate is notified.
    pub fn gate_status(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.status_gate.lock().unwrap() = Some(gate.clone());
        gate
    }

    pub fn count(counter: &AtomicUsize) -> usize {
        counter.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DeviceApi for FakeDevice {
    async fn scan(&self) -> Result<Vec<NetworkEntry>, DeviceError> {
        self.scan_calls.fetch_add(1, Ordering::SeqCst);
        self.scan.lock().unwrap().clone()
    }

    async fn connect(&self, _ssid: &str, _password: &Password) -> Result<ConnectResult, DeviceError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.connect_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.connect.lock().unwrap().clone()
    }

    async fn disconnect(&self) -> Result<(), DeviceError> {
        self.disconnect_calls.fetch_add(1, Ordering::SeqCst);
        self.disconnect.lock().unwrap().clone()
    }

    async fn fetch_status(&self) -> Result<StatusReport, DeviceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        let gate = self.status_gate.lock().unwrap().take();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        self.status.lock().unwrap().clone()
    }

    async fn fetch_devices(&self) -> Result<DevicesReport, DeviceError> {
        self.devices_calls.fetch_add(1, Ordering::SeqCst);
        self.devices.lock().unwrap().clone()
    }
}

pub fn network(ssid: &str, rssi: i32) -> NetworkEntry {
    NetworkEntry {
        ssid: ssid.to_string(),
        signal_strength: rssi,
        security: Security::Secured,
        channel: Some(6),
    }
}

pub fn connected(ssid: &str, ip: Ipv4Addr, rssi: i32) -> StatusReport {
    StatusReport::Connected(LinkStatus {
        rssi: Some(rssi),
        gateway: Some("10.0.0.1".to_string()),
        dns: Some("10.0.0.1".to_string()),
        ..LinkStatus::new(ssid, ip)
    })
}

/// The device itself first, then `peers`, all active.
pub fn devices_report(self_ip: Ipv4Addr, peers: &[Ipv4Addr], subnet: &str) -> DevicesReport {
    let mut devices = vec![DeviceEntry {
        ip: self_ip.to_string(),
        mac: "7C:DF:A1:00:00:01".to_string(),
        device_type: "Self (ESP32-S3)".to_string(),
        hostname: Some("esp32s3".to_string()),
        active: true,
        last_seen_millis: None,
    }];
    devices.extend(peers.iter().map(|ip| DeviceEntry {
        ip: ip.to_string(),
        mac: "Unknown".to_string(),
        device_type: "Network Device".to_string(),
        hostname: None,
        active: true,
        last_seen_millis: Some(1_000),
    }));
    DevicesReport {
        network_info: NetworkInfo {
            subnet: Some(subnet.to_string()),
            total_devices: devices.len() as u64,
            ..NetworkInfo::default()
        },
        devices,
    }
}

pub fn unreachable() -> DeviceError {
    DeviceError::Unreachable {
        endpoint: "http://fake/status".to_string(),
        reason: "no response within 5000ms".to_string(),
    }
}

/// Serve an ad-hoc router on an ephemeral port and return its base URL.
pub async fn serve(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}/")
}
