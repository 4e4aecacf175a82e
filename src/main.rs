use std::net::Ipv4Addr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::broadcast::error::RecvError;
use tracing_subscriber::EnvFilter;

use wifi_manager_rs::client::{DeviceApi, DeviceClient, Password};
use wifi_manager_rs::config::{
    CoordinatorConfig, DeviceConfig, RefreshPolicy, Timeouts, DEFAULT_DEVICE_HOST,
    DEFAULT_SUBNET_MASK,
};
use wifi_manager_rs::coordinator::RefreshCoordinator;
use wifi_manager_rs::simulator::{spawn_simulator, SimulatorConfig};
use wifi_manager_rs::state::{ConnectionState, Event, Snapshot};
use wifi_manager_rs::subnet::{self, compute_range};
use wifi_manager_rs::types::{DeviceEntry, DevicesReport, NetworkEntry, SignalQuality, StatusReport};

/// wifi-manager-rs: manage an ESP32 AP/STA Wi-Fi bridge from the command line.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "wifi-manager-rs",
    version,
    about = "Manage an ESP32 AP/STA Wi-Fi bridge: scan, join, watch link status and list subnet hosts.",
    long_about = None
)]
struct Cli {
    /// Device address: bare host, host:port, or http:// URL.
    #[arg(long, global = true, default_value = DEFAULT_DEVICE_HOST)]
    device: String,

    /// Print machine-readable JSON instead of tables.
    #[arg(long, global = true, default_value_t = false)]
    json: bool,

    /// Override every per-operation request timeout, in milliseconds.
    #[arg(long = "timeout-ms", global = true)]
    timeout_ms: Option<u64>,

    /// Log level used when RUST_LOG is not set.
    #[arg(long = "log-level", global = true, default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Subcommand)]
enum Command {
    /// List networks the device can see.
    Scan,
    /// Join a network in station mode.
    Connect {
        ssid: String,
        /// Passphrase; omit for open networks.
        #[arg(long, default_value = "")]
        password: String,
    },
    /// Leave the current station network.
    Disconnect,
    /// Show the current station link.
    Status,
    /// List hosts the device sees on its station subnet.
    Devices,
    /// Compute the network/broadcast range for an address and mask (offline).
    Range {
        ip: String,
        #[arg(default_value_t = DEFAULT_SUBNET_MASK.to_string())]
        mask: String,
    },
    /// Poll the device and print every state change. Reads commands from stdin.
    Watch {
        /// Seconds between status polls.
        #[arg(long, default_value_t = 10)]
        interval: u64,
        /// Start with periodic polling switched off.
        #[arg(long = "no-auto-refresh", default_value_t = false)]
        no_auto_refresh: bool,
    },
    /// Serve a fake device on this machine for local testing.
    Simulate {
        #[arg(long, default_value = "127.0.0.1:8080")]
        bind: String,
        /// Artificial delay before /connect answers, in milliseconds.
        #[arg(long = "connect-delay-ms", default_value_t = 0)]
        connect_delay_ms: u64,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match cli.command.clone() {
        Command::Range { ip, mask } => {
            let range = compute_range(&ip, &mask)?;
            if cli.json {
                print_json(&range)?;
            } else {
                println!("range   : {range}");
                println!("hosts   : {}", range.host_count());
                if let Some(prefix) = range.prefix_len() {
                    println!("cidr    : {}/{}", range.network_address, prefix);
                }
            }
            Ok(())
        }
        Command::Simulate {
            bind,
            connect_delay_ms,
        } => {
            let config = SimulatorConfig {
                connect_delay: Duration::from_millis(connect_delay_ms),
                ..SimulatorConfig::default()
            };
            let handle = spawn_simulator(&bind, config).await?;
            println!("Simulated device at {} (Ctrl+C to stop)", handle.base_url());
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::warn!("failed to listen for Ctrl+C: {e}");
            }
            handle.shutdown().await;
            Ok(())
        }
        Command::Watch {
            interval,
            no_auto_refresh,
        } => {
            let client = device_client(&cli)?;
            let policy = RefreshPolicy {
                interval_secs: interval.max(1),
                auto_refresh_enabled: !no_auto_refresh,
            };
            watch(client, policy, cli.json).await
        }
        command => {
            let client = device_client(&cli)?;
            one_shot(&client, command, cli.json).await
        }
    }
}

fn init_tracing(level: &str) {
    // Logs go to stderr so `--json` output on stdout stays parseable.
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            format!("wifi_manager_rs={level},tower_http={level}").into()
        }))
        .with_writer(std::io::stderr)
        .init();
}

fn device_client(cli: &Cli) -> Result<DeviceClient> {
    let mut config = DeviceConfig::for_host(&cli.device)?;
    if let Some(ms) = cli.timeout_ms {
        let t = Duration::from_millis(ms);
        config = config.with_timeouts(Timeouts {
            scan: t,
            connect: t,
            disconnect: t,
            status: t,
            devices: t,
        });
    }
    warn_if_off_network(&config);
    DeviceClient::new(config)
}

/// Hint when no local interface shares a /24 with the device.
fn warn_if_off_network(config: &DeviceConfig) {
    let Some(Ok(ip)) = config.base_url.host_str().map(|h| h.parse::<Ipv4Addr>()) else {
        return;
    };
    if ip.is_loopback() {
        return;
    }
    match subnet::local_networks_containing(ip) {
        Ok(nets) if nets.is_empty() => tracing::warn!(
            "no local interface is on {ip}'s network; is this machine joined to the device's access point?"
        ),
        Ok(nets) => tracing::debug!("device reachable via local networks {nets:?}"),
        Err(e) => tracing::debug!("failed to inspect local interfaces: {e}"),
    }
}

async fn one_shot(client: &DeviceClient, command: Command, json: bool) -> Result<()> {
    match command {
        Command::Scan => {
            let networks = client.scan().await?;
            if json {
                print_json(&networks)?;
            } else {
                print_networks_table(&networks);
            }
        }
        Command::Connect { ssid, password } => {
            let result = client.connect(&ssid, &Password::from(password)).await?;
            if json {
                print_json(&result)?;
            } else {
                println!("Joined {:?} with address {}", result.ssid, result.ip);
            }
        }
        Command::Disconnect => {
            client.disconnect().await?;
            if json {
                print_json(&serde_json::json!({ "success": true }))?;
            } else {
                println!("Disconnected");
            }
        }
        Command::Status => {
            let report = client.fetch_status().await?;
            if json {
                print_json(&report)?;
            } else {
                print_status(&report);
            }
        }
        Command::Devices => {
            let report = client.fetch_devices().await?;
            if json {
                print_json(&report)?;
            } else {
                print_devices_table(&report);
            }
        }
        other => anyhow::bail!("{other:?} is not a single request"),
    }
    Ok(())
}

async fn watch(client: DeviceClient, policy: RefreshPolicy, json: bool) -> Result<()> {
    let coordinator = RefreshCoordinator::start(
        Arc::new(client),
        CoordinatorConfig {
            policy,
            ..CoordinatorConfig::default()
        },
    );
    let mut events = coordinator.events();
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    coordinator.refresh_now();

    if !json {
        println!("Watching (commands: scan, connect <ssid> [password], disconnect, devices, refresh, interval <secs>, auto on|off, show, quit)");
    }

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event, json)?,
                Err(RecvError::Lagged(n)) => tracing::warn!("skipped {n} events"),
                Err(RecvError::Closed) => break,
            },
            line = lines.next_line(), if stdin_open => match line.context("failed to read stdin")? {
                Some(line) => {
                    if !handle_line(&coordinator, line.trim(), json).await? {
                        break;
                    }
                }
                None => stdin_open = false,
            },
        }
    }

    coordinator.shutdown().await;
    Ok(())
}

/// Run one console command. Returns `false` to stop watching.
async fn handle_line(coordinator: &RefreshCoordinator, line: &str, json: bool) -> Result<bool> {
    let mut words = line.split_whitespace();
    let Some(cmd) = words.next() else {
        return Ok(true);
    };
    let outcome = match cmd {
        "quit" | "exit" => return Ok(false),
        "scan" => coordinator.request_scan().await.map(|networks| {
            if !json {
                print_networks_table(&networks);
            }
        }),
        "connect" => {
            let ssid = words.next().unwrap_or_default().to_string();
            let password = Password::from(words.next().unwrap_or_default());
            coordinator.request_connect(&ssid, password).await.map(|_| ())
        }
        "disconnect" => coordinator.request_disconnect().await,
        "devices" => coordinator.request_devices().await.map(|report| {
            if !json {
                print_devices_table(&report);
            }
        }),
        "refresh" => {
            coordinator.refresh_now();
            Ok(())
        }
        "interval" => match words.next().map(str::parse::<u64>) {
            Some(Ok(secs)) => coordinator.set_refresh_interval(secs),
            _ => {
                eprintln!("usage: interval <seconds>");
                Ok(())
            }
        },
        "auto" => match words.next() {
            Some("on") => {
                coordinator.set_auto_refresh(true);
                Ok(())
            }
            Some("off") => {
                coordinator.set_auto_refresh(false);
                Ok(())
            }
            _ => {
                eprintln!("usage: auto on|off");
                Ok(())
            }
        },
        "show" => {
            let snap = coordinator.snapshot();
            if json {
                print_json(&snap)?;
            } else {
                print_snapshot(&snap);
            }
            Ok(())
        }
        other => {
            eprintln!("unknown command: {other}");
            Ok(())
        }
    };
    if let Err(e) = outcome {
        eprintln!("{cmd}: {e}");
    }
    Ok(true)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

fn print_event(event: &Event, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string(event)?);
        return Ok(());
    }
    match event {
        Event::StateChanged { state } => println!("state    : {}", state_line(state)),
        Event::DevicesUpdated { total, active } => {
            println!("devices  : {total} listed, {active} active")
        }
        Event::RangeChanged { range } => println!("range    : {range}"),
        Event::ScanCompleted { networks } => println!("scan     : {networks} networks"),
        Event::OperationFailed {
            kind,
            message,
            background,
            ..
        } => {
            let origin = if *background { "background " } else { "" };
            println!("failure  : {origin}{kind}: {message}");
        }
        Event::DeviceRecovered { after_failures } => {
            println!("device   : reachable again after {after_failures} failures")
        }
        Event::PolicyChanged {
            interval_secs,
            auto_refresh_enabled,
        } => println!(
            "policy   : every {interval_secs}s, auto-refresh {}",
            if *auto_refresh_enabled { "on" } else { "off" }
        ),
    }
    Ok(())
}

fn state_line(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "disconnected".to_string(),
        ConnectionState::Connecting { target_ssid } => format!("connecting to {target_ssid:?}"),
        ConnectionState::Connected {
            ssid,
            local_ip,
            rssi,
            ..
        } => match (rssi, state.signal_quality()) {
            (Some(rssi), Some(q)) => {
                format!("connected to {ssid:?} as {local_ip} ({rssi} dBm, {q})")
            }
            _ => format!("connected to {ssid:?} as {local_ip}"),
        },
        ConnectionState::Error {
            last_error_kind,
            occurred_at,
        } => format!("error: {last_error_kind} at {occurred_at}"),
    }
}

fn print_snapshot(snap: &Snapshot) {
    println!("state    : {}", state_line(&snap.state));
    println!("range    : {}", snap.range);
    if let Some(info) = &snap.network_info {
        println!("gateway  : {}", info.gateway.as_deref().unwrap_or("--"));
        println!("dns      : {}", info.dns.as_deref().unwrap_or("--"));
    }
    print_devices_rows(&snap.devices);
}

fn print_status(report: &StatusReport) {
    match report {
        StatusReport::Disconnected => println!("Not connected"),
        StatusReport::Connected(link) => {
            println!("ssid     : {}", link.ssid);
            println!("ip       : {}", link.ip);
            match link.rssi {
                Some(rssi) => println!(
                    "rssi     : {rssi} dBm ({})",
                    SignalQuality::from_rssi(rssi)
                ),
                None => println!("rssi     : --"),
            }
            println!("gateway  : {}", link.gateway.as_deref().unwrap_or("--"));
            println!("dns      : {}", link.dns.as_deref().unwrap_or("--"));
        }
    }
}

fn print_networks_table(networks: &[NetworkEntry]) {
    let mut ssid_w = "ssid".len();
    for n in networks {
        ssid_w = ssid_w.max(n.ssid.len().min(32));
    }
    let rssi_w = "rssi".len().max(4);
    let qual_w = "excellent".len();
    let sec_w = "security".len();
    let chan_w = "channel".len();

    println!("\nNetworks: {}", networks.len());
    println!(
        "{:<ssid_w$}  {:>rssi_w$}  {:<qual_w$}  {:<sec_w$}  {:>chan_w$}",
        "ssid", "rssi", "quality", "security", "channel"
    );
    println!(
        "{:-<ssid_w$}  {:-<rssi_w$}  {:-<qual_w$}  {:-<sec_w$}  {:-<chan_w$}",
        "", "", "", "", ""
    );
    for n in networks {
        let mut ssid = n.ssid.clone();
        if ssid.len() > 32 {
            ssid.truncate(32);
        }
        let channel = n
            .channel
            .map(|c| c.to_string())
            .unwrap_or_else(|| "--".to_string());
        println!(
            "{:<ssid_w$}  {:>rssi_w$}  {:<qual_w$}  {:<sec_w$}  {:>chan_w$}",
            ssid,
            n.signal_strength,
            n.quality().to_string(),
            format!("{:?}", n.security),
            channel
        );
    }
}

fn print_devices_table(report: &DevicesReport) {
    println!(
        "\nDevices: {} ({} active)",
        report.network_info.total_devices,
        report.active_count()
    );
    if let (Some(network), Some(broadcast)) =
        (&report.network_info.network, &report.network_info.broadcast)
    {
        println!("Range  : {network} - {broadcast}");
    }
    print_devices_rows(&report.devices);
}

fn print_devices_rows(devices: &[DeviceEntry]) {
    let mut ip_w = "ip".len();
    let mut type_w = "type".len();
    let mut host_w = "hostname".len();
    for d in devices {
        ip_w = ip_w.max(d.ip.len());
        type_w = type_w.max(d.device_type.len());
        host_w = host_w.max(d.hostname.as_deref().map_or(2, str::len));
    }
    let mac_w = "AA:BB:CC:DD:EE:FF".len();

    println!(
        "{:<ip_w$}  {:<mac_w$}  {:<type_w$}  {:<host_w$}  active",
        "ip", "mac", "type", "hostname"
    );
    println!(
        "{:-<ip_w$}  {:-<mac_w$}  {:-<type_w$}  {:-<host_w$}  ------",
        "", "", "", ""
    );
    for d in devices {
        println!(
            "{:<ip_w$}  {:<mac_w$}  {:<type_w$}  {:<host_w$}  {}",
            d.ip,
            d.mac,
            d.device_type,
            d.hostname.as_deref().unwrap_or("--"),
            if d.active { "yes" } else { "no" }
        );
    }
}
