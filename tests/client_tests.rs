mod common;

use std::net::Ipv4Addr;
use std::time::Duration;

use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;

use wifi_manager_rs::client::{DeviceApi, DeviceClient, Password};
use wifi_manager_rs::config::{DeviceConfig, Timeouts};
use wifi_manager_rs::error::DeviceError;
use wifi_manager_rs::simulator::{spawn_simulator, SimulatorConfig};
use wifi_manager_rs::types::{Security, StatusReport};

fn client_for(base_url: &str) -> DeviceClient {
    DeviceClient::new(DeviceConfig::for_host(base_url).unwrap()).unwrap()
}

#[tokio::test]
async fn scan_lists_simulated_networks_in_order() {
    let sim = spawn_simulator("127.0.0.1:0", SimulatorConfig::default()).await.unwrap();
    let client = client_for(&sim.base_url());

    let networks = client.scan().await.unwrap();
    let ssids: Vec<_> = networks.iter().map(|n| n.ssid.as_str()).collect();
    assert_eq!(ssids, vec!["HomeNetwork", "CoffeeShop", "Neighbor"]);
    assert_eq!(networks[0].security, Security::Secured);
    assert_eq!(networks[1].security, Security::Open);
    assert_eq!(networks[0].channel, Some(6));

    sim.shutdown().await;
}

#[tokio::test]
async fn connect_status_devices_disconnect() {
    let sim = spawn_simulator("127.0.0.1:0", SimulatorConfig::default()).await.unwrap();
    let client = client_for(&sim.base_url());

    let wrong = client
        .connect("HomeNetwork", &Password::from("nope"))
        .await
        .unwrap_err();
    assert_eq!(
        wrong,
        DeviceError::AssociationFailed {
            ssid: "HomeNetwork".into()
        }
    );
    assert_eq!(client.fetch_status().await.unwrap(), StatusReport::Disconnected);

    let joined = client
        .connect("HomeNetwork", &Password::from("password123"))
        .await
        .unwrap();
    assert_eq!(joined.ssid, "HomeNetwork");
    assert_eq!(joined.ip, Ipv4Addr::new(192, 168, 1, 37));

    match client.fetch_status().await.unwrap() {
        StatusReport::Connected(link) => {
            assert_eq!(link.ssid, "HomeNetwork");
            assert_eq!(link.rssi, Some(-48));
            assert_eq!(link.gateway.as_deref(), Some("192.168.1.33"));
        }
        other => panic!("expected connected, got {other:?}"),
    }

    let report = client.fetch_devices().await.unwrap();
    assert_eq!(report.devices.len(), 3);
    assert_eq!(report.devices[0].device_type, "Self (ESP32-S3)");
    assert_eq!(report.devices[0].ip, "192.168.1.37");
    assert_eq!(report.devices[1].mac, "Unknown");
    assert_eq!(report.network_info.total_devices, 3);
    assert_eq!(report.network_info.subnet.as_deref(), Some("255.255.255.240"));
    assert_eq!(report.network_info.network.as_deref(), Some("192.168.1.32"));
    assert_eq!(report.network_info.broadcast.as_deref(), Some("192.168.1.47"));

    client.disconnect().await.unwrap();
    assert_eq!(client.fetch_status().await.unwrap(), StatusReport::Disconnected);

    sim.shutdown().await;
}

#[tokio::test]
async fn open_network_needs_no_password() {
    let sim = spawn_simulator("127.0.0.1:0", SimulatorConfig::default()).await.unwrap();
    let client = client_for(&sim.base_url());

    client.connect("CoffeeShop", &Password::default()).await.unwrap();
    assert!(sim.is_linked().await);

    sim.drop_link().await;
    assert_eq!(client.fetch_status().await.unwrap(), StatusReport::Disconnected);

    sim.shutdown().await;
}

#[tokio::test]
async fn missing_ssid_surfaces_device_error_text() {
    let sim = spawn_simulator("127.0.0.1:0", SimulatorConfig::default()).await.unwrap();
    let client = client_for(&sim.base_url());

    match client.connect("", &Password::default()).await.unwrap_err() {
        DeviceError::ServerError { detail, .. } => {
            assert!(detail.contains("400"), "{detail}");
            assert!(detail.contains("Missing SSID parameter"), "{detail}");
        }
        other => panic!("expected server error, got {other:?}"),
    }

    sim.shutdown().await;
}

#[tokio::test]
async fn closed_port_is_unreachable() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client_for(&addr.to_string());
    let err = client.fetch_status().await.unwrap_err();
    assert!(matches!(err, DeviceError::Unreachable { .. }), "{err:?}");
}

#[tokio::test]
async fn slow_connect_times_out() {
    let sim = spawn_simulator(
        "127.0.0.1:0",
        SimulatorConfig {
            connect_delay: Duration::from_secs(3),
            ..SimulatorConfig::default()
        },
    )
    .await
    .unwrap();
    let config = DeviceConfig::for_host(&sim.base_url())
        .unwrap()
        .with_timeouts(Timeouts {
            connect: Duration::from_millis(200),
            ..Timeouts::default()
        });
    let client = DeviceClient::new(config).unwrap();

    match client.connect("CoffeeShop", &Password::default()).await.unwrap_err() {
        DeviceError::Unreachable { reason, .. } => {
            assert_eq!(reason, "no response within 200ms")
        }
        other => panic!("expected timeout, got {other:?}"),
    }
}

#[tokio::test]
async fn non_json_body_is_malformed() {
    let base = common::serve(Router::new().route("/status", get(|| async { "<html>portal</html>" }))).await;
    let err = client_for(&base).fetch_status().await.unwrap_err();
    assert!(matches!(err, DeviceError::MalformedResponse { .. }), "{err:?}");
}

#[tokio::test]
async fn wrong_shape_is_malformed() {
    let base = common::serve(Router::new().route(
        "/scan",
        get(|| async { axum::Json(serde_json::json!({ "networks": "none" })) }),
    ))
    .await;
    let err = client_for(&base).scan().await.unwrap_err();
    assert!(matches!(err, DeviceError::MalformedResponse { .. }), "{err:?}");
}

#[tokio::test]
async fn http_500_is_server_error() {
    let base = common::serve(Router::new().route(
        "/devices",
        get(|| async { (StatusCode::INTERNAL_SERVER_ERROR, "scan table busy") }),
    ))
    .await;
    match client_for(&base).fetch_devices().await.unwrap_err() {
        DeviceError::ServerError { detail, .. } => assert_eq!(detail, "HTTP 500"),
        other => panic!("expected server error, got {other:?}"),
    }
}

#[tokio::test]
async fn unknown_endpoint_is_server_error() {
    let base = common::serve(Router::new()).await;
    let err = client_for(&base).disconnect().await.unwrap_err();
    assert!(matches!(err, DeviceError::ServerError { .. }), "{err:?}");
}
