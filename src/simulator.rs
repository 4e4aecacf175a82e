use std::{
    net::{Ipv4Addr, SocketAddr},
    sync::Arc,
    time::{Duration, Instant},
};

use anyhow::{Context, Result};
use axum::{
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

use crate::config::DEFAULT_SUBNET_MASK;
use crate::subnet::NetworkRange;

/// A network the simulated radio can "see". `password: None` means open.
#[derive(Debug, Clone)]
pub struct SimulatedNetwork {
    pub ssid: String,
    pub rssi: i32,
    pub channel: u32,
    pub password: Option<String>,
}

impl SimulatedNetwork {
    pub fn open(ssid: &str, rssi: i32, channel: u32) -> Self {
        Self {
            ssid: ssid.to_string(),
            rssi,
            channel,
            password: None,
        }
    }

    pub fn secured(ssid: &str, rssi: i32, channel: u32, password: &str) -> Self {
        Self {
            password: Some(password.to_string()),
            ..Self::open(ssid, rssi, channel)
        }
    }
}

/// Another host answering pings on the station subnet.
#[derive(Debug, Clone)]
pub struct SimulatedPeer {
    pub ip: Ipv4Addr,
    pub mac: Option<String>,
    pub active: bool,
}

#[derive(Debug, Clone)]
pub struct SimulatorConfig {
    pub networks: Vec<SimulatedNetwork>,
    pub station_ip: Ipv4Addr,
    pub gateway: Ipv4Addr,
    pub dns: Ipv4Addr,
    pub subnet_mask: Ipv4Addr,
    pub hostname: String,
    pub mac: String,
    pub peers: Vec<SimulatedPeer>,
    /// Artificial association + DHCP latency for `/connect`.
    pub connect_delay: Duration,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            networks: vec![
                SimulatedNetwork::secured("HomeNetwork", -48, 6, "password123"),
                SimulatedNetwork::open("CoffeeShop", -67, 1),
                SimulatedNetwork::secured("Neighbor", -82, 11, "not-yours"),
            ],
            station_ip: Ipv4Addr::new(192, 168, 1, 37),
            gateway: Ipv4Addr::new(192, 168, 1, 33),
            dns: Ipv4Addr::new(192, 168, 1, 33),
            subnet_mask: DEFAULT_SUBNET_MASK,
            hostname: "esp32s3-sim".to_string(),
            mac: "7C:DF:A1:00:00:01".to_string(),
            peers: vec![
                SimulatedPeer {
                    ip: Ipv4Addr::new(192, 168, 1, 34),
                    mac: None,
                    active: true,
                },
                SimulatedPeer {
                    ip: Ipv4Addr::new(192, 168, 1, 40),
                    mac: Some("3A:11:9C:42:07:EE".to_string()),
                    active: true,
                },
            ],
            connect_delay: Duration::ZERO,
        }
    }
}

#[derive(Debug)]
struct SimState {
    config: SimulatorConfig,
    link: Option<Link>,
    started: Instant,
}

#[derive(Debug, Clone)]
struct Link {
    ssid: String,
    rssi: i32,
}

type Shared = Arc<RwLock<SimState>>;

/// A running simulator. Dropping the handle leaves the server running; call `shutdown`.
pub struct SimulatorHandle {
    addr: SocketAddr,
    state: Shared,
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

impl SimulatorHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn base_url(&self) -> String {
        format!("http://{}/", self.addr)
    }

    /// Pretend the upstream AP went away.
    pub async fn drop_link(&self) {
        self.state.write().await.link = None;
    }

    pub async fn is_linked(&self) -> bool {
        self.state.read().await.link.is_some()
    }

    pub async fn shutdown(self) {
        self.cancel.cancel();
        if let Err(e) = self.task.await {
            tracing::warn!("simulator task ended abnormally: {e}");
        }
    }
}

/// Bind `bind` and serve the device HTTP contract in a background task.
pub async fn spawn_simulator(bind: &str, config: SimulatorConfig) -> Result<SimulatorHandle> {
    let state: Shared = Arc::new(RwLock::new(SimState {
        config,
        link: None,
        started: Instant::now(),
    }));

    let app = Router::new()
        .route("/scan", get(get_scan))
        .route("/connect", post(post_connect))
        .route("/disconnect", post(post_disconnect))
        .route("/status", get(get_status))
        .route("/devices", get(get_devices))
        .layer(TraceLayer::new_for_http())
        .with_state(state.clone());

    let listener = tokio::net::TcpListener::bind(bind)
        .await
        .with_context(|| format!("failed to bind simulator on {bind}"))?;
    let addr = listener.local_addr()?;
    let cancel = CancellationToken::new();

    let shutdown = cancel.clone();
    let task = tokio::spawn(async move {
        let server = axum::serve(listener, app)
            .with_graceful_shutdown(async move { shutdown.cancelled().await });
        if let Err(e) = server.await {
            tracing::error!("simulator server error: {e}");
        }
    });

    tracing::info!("device simulator listening on http://{addr}");
    Ok(SimulatorHandle {
        addr,
        state,
        cancel,
        task,
    })
}

async fn get_scan(State(sim): State<Shared>) -> impl IntoResponse {
    let s = sim.read().await;
    let networks: Vec<_> = s
        .config
        .networks
        .iter()
        .map(|n| {
            json!({
                "ssid": n.ssid,
                "rssi": n.rssi,
                "encryption": if n.password.is_some() { "Secured" } else { "Open" },
                "channel": n.channel,
            })
        })
        .collect();
    Json(json!({ "networks": networks }))
}

#[derive(Debug, Deserialize)]
struct ConnectForm {
    ssid: Option<String>,
    password: Option<String>,
}

async fn post_connect(State(sim): State<Shared>, Form(form): Form<ConnectForm>) -> Response {
    let Some(ssid) = form.ssid.filter(|s| !s.is_empty()) else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing SSID parameter" })),
        )
            .into_response();
    };

    let delay = sim.read().await.config.connect_delay;
    if !delay.is_zero() {
        tokio::time::sleep(delay).await;
    }

    let mut s = sim.write().await;
    let joined = s
        .config
        .networks
        .iter()
        .find(|n| n.ssid == ssid)
        .filter(|n| match &n.password {
            None => true,
            Some(expected) => form.password.as_deref() == Some(expected.as_str()),
        })
        .map(|n| n.rssi);

    match joined {
        Some(rssi) => {
            tracing::info!("simulator joined {ssid:?}");
            s.link = Some(Link {
                ssid: ssid.clone(),
                rssi,
            });
            Json(json!({
                "success": true,
                "ssid": ssid,
                "ip": s.config.station_ip.to_string(),
            }))
            .into_response()
        }
        None => {
            tracing::info!("simulator failed to join {ssid:?}");
            s.link = None;
            Json(json!({ "success": false })).into_response()
        }
    }
}

async fn post_disconnect(State(sim): State<Shared>) -> impl IntoResponse {
    sim.write().await.link = None;
    Json(json!({ "success": true }))
}

async fn get_status(State(sim): State<Shared>) -> impl IntoResponse {
    let s = sim.read().await;
    match &s.link {
        Some(link) => Json(json!({
            "connected": true,
            "ssid": link.ssid,
            "ip": s.config.station_ip.to_string(),
            "rssi": link.rssi,
            "gateway": s.config.gateway.to_string(),
            "dns": s.config.dns.to_string(),
        })),
        None => Json(json!({ "connected": false })),
    }
}

async fn get_devices(State(sim): State<Shared>) -> impl IntoResponse {
    let s = sim.read().await;
    let cfg = &s.config;
    let linked = s.link.is_some();
    let uptime_ms = s.started.elapsed().as_millis() as u64;
    let self_ip = if linked { cfg.station_ip } else { Ipv4Addr::UNSPECIFIED };

    let mut devices = vec![json!({
        "ip": self_ip.to_string(),
        "type": "Self (ESP32-S3)",
        "active": true,
        "mac": cfg.mac,
        "hostname": cfg.hostname,
    })];
    if linked {
        devices.extend(cfg.peers.iter().filter(|p| p.active).map(|p| {
            json!({
                "ip": p.ip.to_string(),
                "type": "Network Device",
                "active": p.active,
                "mac": p.mac.as_deref().unwrap_or("Unknown"),
                "lastSeen": uptime_ms,
            })
        }));
    }

    let mut info = json!({
        "totalDevices": devices.len(),
        "scanTime": uptime_ms,
    });
    if linked {
        let range = NetworkRange::from_addrs(cfg.station_ip, cfg.subnet_mask);
        info["subnet"] = json!(cfg.subnet_mask.to_string());
        info["network"] = json!(range.network_address.to_string());
        info["broadcast"] = json!(range.broadcast_address.to_string());
        info["gateway"] = json!(cfg.gateway.to_string());
        info["dns"] = json!(cfg.dns.to_string());
    }

    Json(json!({ "devices": devices, "networkInfo": info }))
}
