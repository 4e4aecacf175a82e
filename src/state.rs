//! Single owner of the connection state.
//!
//! Everything the device tells us ends up here as an [`Input`] tagged with a
//! sequence number from the coordinator: polls carry the number they were
//! issued with, command outcomes one taken when the command completed.
//! [`ConnectionStateMachine::apply`] runs the transition synchronously inside
//! the watch channel's modify hook, so a reader never observes a half-applied
//! update (for example a `Disconnected` state still carrying the previous
//! device list).

use std::net::Ipv4Addr;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::{broadcast, watch};

use crate::error::ErrorKind;
use crate::subnet::RangeView;
use crate::types::{
    ConnectResult, DeviceEntry, DevicesReport, LinkStatus, NetworkInfo, OperationKind,
    SignalQuality, StatusReport,
};

const EVENT_CAPACITY: usize = 64;

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting {
        target_ssid: String,
    },
    Connected {
        ssid: String,
        local_ip: Ipv4Addr,
        gateway: Option<String>,
        dns: Option<String>,
        rssi: Option<i32>,
        #[serde(with = "time::serde::rfc3339")]
        connected_since: OffsetDateTime,
    },
    Error {
        last_error_kind: ErrorKind,
        #[serde(with = "time::serde::rfc3339")]
        occurred_at: OffsetDateTime,
    },
}

impl ConnectionState {
    /// `Error` reads as "we don't know", never as connected.
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected { .. })
    }

    pub fn signal_quality(&self) -> Option<SignalQuality> {
        match self {
            ConnectionState::Connected { rssi: Some(rssi), .. } => {
                Some(SignalQuality::from_rssi(*rssi))
            }
            _ => None,
        }
    }

    fn connected(ssid: String, local_ip: Ipv4Addr) -> Self {
        ConnectionState::Connected {
            ssid,
            local_ip,
            gateway: None,
            dns: None,
            rssi: None,
            connected_since: OffsetDateTime::now_utc(),
        }
    }

    fn error(kind: ErrorKind) -> Self {
        ConnectionState::Error {
            last_error_kind: kind,
            occurred_at: OffsetDateTime::now_utc(),
        }
    }
}

/// Consistent read-only view handed to presentation code.
#[derive(Serialize, Debug, Clone)]
pub struct Snapshot {
    pub state: ConnectionState,
    pub devices: Vec<DeviceEntry>,
    pub network_info: Option<NetworkInfo>,
    pub range: RangeView,
    /// Bumped every time the range is actually recomputed.
    pub range_revision: u64,
    #[serde(skip)]
    range_key: Option<(Ipv4Addr, String)>,
    #[serde(skip)]
    epoch: u64,
    #[serde(skip)]
    watermarks: [u64; 5],
    #[serde(skip)]
    command_floor: u64,
}

impl Snapshot {
    fn new() -> Self {
        Self {
            state: ConnectionState::Disconnected,
            devices: Vec::new(),
            network_info: None,
            range: RangeView::Unknown,
            range_revision: 0,
            range_key: None,
            epoch: 0,
            watermarks: [0; 5],
            command_floor: 0,
        }
    }

    /// Identifies the current connection; devices results carry the epoch they were issued under.
    pub fn epoch(&self) -> u64 {
        self.epoch
    }
}

/// Everything that can move the state machine.
#[derive(Debug, Clone)]
pub enum Input {
    ConnectRequested { ssid: String },
    ConnectSucceeded(ConnectResult),
    ConnectFailed(ErrorKind),
    DisconnectSucceeded,
    Status(StatusReport),
    StatusFailed(ErrorKind),
    Devices { epoch: u64, report: DevicesReport },
}

impl Input {
    pub fn kind(&self) -> OperationKind {
        match self {
            Input::ConnectRequested { .. }
            | Input::ConnectSucceeded(_)
            | Input::ConnectFailed(_) => OperationKind::Connect,
            Input::DisconnectSucceeded => OperationKind::Disconnect,
            Input::Status(_) | Input::StatusFailed(_) => OperationKind::Status,
            Input::Devices { .. } => OperationKind::Devices,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Applied {
    Changed,
    Unchanged,
    /// Older than something already applied, or no longer relevant. Dropped.
    Stale,
}

/// Notifications for the presentation side. Also carries log-worthy failures.
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    StateChanged { state: ConnectionState },
    DevicesUpdated { total: usize, active: usize },
    RangeChanged { range: RangeView },
    ScanCompleted { networks: usize },
    OperationFailed {
        kind: OperationKind,
        error: ErrorKind,
        message: String,
        background: bool,
    },
    DeviceRecovered { after_failures: u32 },
    PolicyChanged { interval_secs: u64, auto_refresh_enabled: bool },
}

pub struct ConnectionStateMachine {
    snapshot: watch::Sender<Snapshot>,
    events: broadcast::Sender<Event>,
    default_mask: Ipv4Addr,
}

impl ConnectionStateMachine {
    pub fn new(default_mask: Ipv4Addr) -> Self {
        let (snapshot, _) = watch::channel(Snapshot::new());
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            snapshot,
            events,
            default_mask,
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.snapshot.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.snapshot.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.events.subscribe()
    }

    /// Publish an event that is not tied to a transition (failures, scan results).
    pub fn notify(&self, event: Event) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Apply one input issued with sequence number `seq`.
    pub fn apply(&self, seq: u64, input: Input) -> Applied {
        let mut outcome = Applied::Unchanged;
        let mut emitted = Vec::new();
        let default_mask = self.default_mask;
        self.snapshot.send_if_modified(|snap| {
            outcome = transition(snap, seq, input, default_mask, &mut emitted);
            outcome == Applied::Changed
        });
        for event in emitted {
            if let Event::StateChanged { state } = &event {
                tracing::info!("connection state -> {}", describe(state));
            }
            self.notify(event);
        }
        outcome
    }
}

fn describe(state: &ConnectionState) -> String {
    match state {
        ConnectionState::Disconnected => "disconnected".to_string(),
        ConnectionState::Connecting { target_ssid } => format!("connecting to {target_ssid:?}"),
        ConnectionState::Connected { ssid, local_ip, .. } => {
            format!("connected to {ssid:?} as {local_ip}")
        }
        ConnectionState::Error { last_error_kind, .. } => format!("error ({last_error_kind})"),
    }
}

/// Pure transition function. Returns whether `snap` changed.
fn transition(
    snap: &mut Snapshot,
    seq: u64,
    input: Input,
    default_mask: Ipv4Addr,
    events: &mut Vec<Event>,
) -> Applied {
    let kind = input.kind();
    let slot = kind.index();
    if seq < snap.watermarks[slot] {
        tracing::debug!("discarding stale {kind} result (seq {seq} < {})", snap.watermarks[slot]);
        return Applied::Stale;
    }
    let gated_by_commands = matches!(
        input,
        Input::Status(_) | Input::StatusFailed(_) | Input::ConnectSucceeded(_) | Input::ConnectFailed(_)
    );
    if gated_by_commands && seq < snap.command_floor {
        tracing::debug!("discarding {kind} result issued before a later user command");
        return Applied::Stale;
    }

    let changed = match input {
        Input::ConnectRequested { ssid } => {
            if matches!(snap.state, ConnectionState::Connecting { .. }) {
                false
            } else {
                snap.command_floor = snap.command_floor.max(seq);
                set_state(snap, ConnectionState::Connecting { target_ssid: ssid }, events);
                clear_link(snap, events);
                true
            }
        }
        Input::ConnectSucceeded(result) => {
            if !matches!(snap.state, ConnectionState::Connecting { .. }) {
                tracing::debug!("connect result arrived outside of Connecting, ignoring");
                snap.watermarks[slot] = seq;
                return Applied::Stale;
            }
            snap.command_floor = snap.command_floor.max(seq);
            enter_connected(snap, ConnectionState::connected(result.ssid, result.ip), events);
            update_range(snap, default_mask, events);
            true
        }
        Input::ConnectFailed(kind) => {
            if !matches!(snap.state, ConnectionState::Connecting { .. }) {
                snap.watermarks[slot] = seq;
                return Applied::Stale;
            }
            snap.command_floor = snap.command_floor.max(seq);
            // Error is reported exactly once, then the machine settles on Disconnected.
            events.push(Event::StateChanged {
                state: ConnectionState::error(kind),
            });
            set_state(snap, ConnectionState::Disconnected, events);
            clear_link(snap, events);
            true
        }
        Input::DisconnectSucceeded => {
            snap.command_floor = snap.command_floor.max(seq);
            let changed = set_state(snap, ConnectionState::Disconnected, events);
            clear_link(snap, events) || changed
        }
        Input::Status(report) => {
            if matches!(snap.state, ConnectionState::Connecting { .. }) {
                // The pending connect call decides.
                false
            } else {
                match report {
                    StatusReport::Connected(link) => apply_link(snap, link, default_mask, events),
                    StatusReport::Disconnected => {
                        let changed = set_state(snap, ConnectionState::Disconnected, events);
                        clear_link(snap, events) || changed
                    }
                }
            }
        }
        Input::StatusFailed(kind) => match &snap.state {
            ConnectionState::Connecting { .. } => false,
            ConnectionState::Error { last_error_kind, .. } if *last_error_kind == kind => false,
            _ => {
                set_state(snap, ConnectionState::error(kind), events);
                clear_link(snap, events);
                true
            }
        },
        Input::Devices { epoch, report } => {
            if !snap.state.is_connected() || epoch != snap.epoch {
                tracing::debug!("discarding devices result for a connection that is gone");
                return Applied::Stale;
            }
            apply_devices(snap, report, default_mask, events)
        }
    };

    snap.watermarks[slot] = seq;
    if changed {
        Applied::Changed
    } else {
        Applied::Unchanged
    }
}

fn set_state(snap: &mut Snapshot, state: ConnectionState, events: &mut Vec<Event>) -> bool {
    if snap.state == state {
        return false;
    }
    snap.state = state.clone();
    events.push(Event::StateChanged { state });
    true
}

/// Drop everything that only makes sense while connected.
fn clear_link(snap: &mut Snapshot, events: &mut Vec<Event>) -> bool {
    let mut changed = false;
    if !snap.devices.is_empty() {
        snap.devices.clear();
        events.push(Event::DevicesUpdated { total: 0, active: 0 });
        changed = true;
    }
    if snap.network_info.take().is_some() {
        changed = true;
    }
    snap.range_key = None;
    if snap.range != RangeView::Unknown {
        snap.range = RangeView::Unknown;
        events.push(Event::RangeChanged {
            range: RangeView::Unknown,
        });
        changed = true;
    }
    changed
}

/// Start a new connection epoch; results issued under the previous one become stale.
fn enter_connected(snap: &mut Snapshot, state: ConnectionState, events: &mut Vec<Event>) {
    snap.epoch += 1;
    if !snap.devices.is_empty() {
        snap.devices.clear();
        events.push(Event::DevicesUpdated { total: 0, active: 0 });
    }
    snap.network_info = None;
    set_state(snap, state, events);
}

fn apply_link(
    snap: &mut Snapshot,
    link: LinkStatus,
    default_mask: Ipv4Addr,
    events: &mut Vec<Event>,
) -> bool {
    if let ConnectionState::Connected {
        ssid,
        local_ip,
        gateway,
        dns,
        rssi,
        ..
    } = &mut snap.state
    {
        if *ssid == link.ssid {
            // Same network: refresh in place, keeping the epoch, devices and connected_since.
            let moved = *local_ip != link.ip;
            let changed =
                moved || *gateway != link.gateway || *dns != link.dns || *rssi != link.rssi;
            if changed {
                *local_ip = link.ip;
                *gateway = link.gateway;
                *dns = link.dns;
                *rssi = link.rssi;
                events.push(Event::StateChanged {
                    state: snap.state.clone(),
                });
            }
            if moved {
                update_range(snap, default_mask, events);
            }
            return changed;
        }
    }

    let state = ConnectionState::Connected {
        ssid: link.ssid,
        local_ip: link.ip,
        gateway: link.gateway,
        dns: link.dns,
        rssi: link.rssi,
        connected_since: OffsetDateTime::now_utc(),
    };
    enter_connected(snap, state, events);
    update_range(snap, default_mask, events);
    true
}

fn apply_devices(
    snap: &mut Snapshot,
    report: DevicesReport,
    default_mask: Ipv4Addr,
    events: &mut Vec<Event>,
) -> bool {
    let mut changed = false;
    if snap.devices != report.devices {
        events.push(Event::DevicesUpdated {
            total: report.devices.len(),
            active: report.active_count(),
        });
        snap.devices = report.devices;
        changed = true;
    }
    if snap.network_info.as_ref() != Some(&report.network_info) {
        snap.network_info = Some(report.network_info);
        changed = true;
    }
    update_range(snap, default_mask, events) || changed
}

/// Recompute the range iff the (ip, mask) pair moved since the last computation.
fn update_range(snap: &mut Snapshot, default_mask: Ipv4Addr, events: &mut Vec<Event>) -> bool {
    let ConnectionState::Connected { local_ip, .. } = &snap.state else {
        return false;
    };
    let mask = snap
        .network_info
        .as_ref()
        .and_then(|info| info.subnet.clone())
        .unwrap_or_else(|| default_mask.to_string());
    let key = (*local_ip, mask);
    if snap.range_key.as_ref() == Some(&key) {
        return false;
    }

    let range = RangeView::resolve(&key.0.to_string(), &key.1);
    snap.range_key = Some(key);
    snap.range_revision += 1;
    if snap.range != range {
        snap.range = range;
        events.push(Event::RangeChanged { range });
    }
    true
}
