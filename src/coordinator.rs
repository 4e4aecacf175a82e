//! Periodic and on-demand refresh driver.
//!
//! - At most one request per [`OperationKind`] is in flight; duplicates are coalesced.
//! - Every issued request gets a sequence number from one monotonic counter; the
//!   state machine uses it to drop out-of-order results.
//! - The ticker reads [`RefreshPolicy`] once per cycle, so a new interval applies
//!   from the next cycle on and a disabled policy parks the loop.
//! - Shutdown cancels a [`CancellationToken`]; calls still in flight are dropped
//!   and their results are never applied.

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::client::{DeviceApi, Password};
use crate::config::{CoordinatorConfig, RefreshPolicy};
use crate::error::{CommandError, DeviceError};
use crate::state::{Applied, ConnectionStateMachine, Event, Input, Snapshot};
use crate::types::{ConnectResult, DevicesReport, NetworkEntry, OperationKind, StatusReport};

pub struct RefreshCoordinator {
    shared: Arc<Shared>,
    ticker: Option<JoinHandle<()>>,
}

struct Shared {
    client: Arc<dyn DeviceApi>,
    machine: ConnectionStateMachine,
    policy: watch::Sender<RefreshPolicy>,
    sequence: AtomicU64,
    in_flight: Arc<[AtomicBool; 5]>,
    background_failures: AtomicU32,
    cancel: CancellationToken,
}

/// Clears the in-flight flag for its kind when dropped.
struct FlightGuard {
    flags: Arc<[AtomicBool; 5]>,
    kind: OperationKind,
}

impl Drop for FlightGuard {
    fn drop(&mut self) {
        self.flags[self.kind.index()].store(false, Ordering::Release);
    }
}

impl RefreshCoordinator {
    /// Spawn the ticker on the current Tokio runtime and return the handle.
    pub fn start(client: Arc<dyn DeviceApi>, config: CoordinatorConfig) -> Self {
        let (policy, policy_rx) = watch::channel(config.policy);
        let shared = Arc::new(Shared {
            client,
            machine: ConnectionStateMachine::new(config.default_mask),
            policy,
            sequence: AtomicU64::new(0),
            in_flight: Arc::new(Default::default()),
            background_failures: AtomicU32::new(0),
            cancel: CancellationToken::new(),
        });

        tracing::info!(
            "refresh coordinator started (interval {}s, auto-refresh {})",
            config.policy.interval_secs,
            config.policy.auto_refresh_enabled
        );
        let ticker = tokio::spawn(run_ticker(shared.clone(), policy_rx));
        Self {
            shared,
            ticker: Some(ticker),
        }
    }

    pub fn snapshot(&self) -> Snapshot {
        self.shared.machine.snapshot()
    }

    pub fn subscribe(&self) -> watch::Receiver<Snapshot> {
        self.shared.machine.subscribe()
    }

    pub fn events(&self) -> broadcast::Receiver<Event> {
        self.shared.machine.events()
    }

    pub fn policy(&self) -> RefreshPolicy {
        *self.shared.policy.borrow()
    }

    /// Scan now. A scan already running makes this return [`CommandError::Busy`].
    pub async fn request_scan(&self) -> Result<Vec<NetworkEntry>, CommandError> {
        let shared = &self.shared;
        let _guard = shared.begin(OperationKind::Scan)?;
        shared.next_seq();
        tracing::info!("scanning for networks");

        match shared.run(shared.client.scan()).await? {
            Ok(networks) => {
                tracing::info!("scan found {} networks", networks.len());
                shared.machine.notify(Event::ScanCompleted {
                    networks: networks.len(),
                });
                Ok(networks)
            }
            Err(e) => Err(shared.command_failed(OperationKind::Scan, e)),
        }
    }

    /// Join `ssid`. The password is handed to the client and dropped with this call.
    pub async fn request_connect(
        &self,
        ssid: &str,
        password: Password,
    ) -> Result<ConnectResult, CommandError> {
        let ssid = ssid.trim();
        if ssid.is_empty() {
            return Err(CommandError::InvalidInput("SSID must not be empty".into()));
        }
        let shared = &self.shared;
        let _guard = shared.begin(OperationKind::Connect)?;
        let seq = shared.next_seq();
        tracing::info!("connecting to {ssid:?}");
        shared.machine.apply(
            seq,
            Input::ConnectRequested {
                ssid: ssid.to_string(),
            },
        );

        let outcome = shared.run(shared.client.connect(ssid, &password)).await?;
        drop(password);
        // Outcomes rank after every poll issued while the command was in flight.
        let done = shared.next_seq();
        match outcome {
            Ok(result) => {
                let applied = shared.machine.apply(done, Input::ConnectSucceeded(result.clone()));
                if applied != Applied::Stale {
                    tracing::info!("joined {:?} with address {}", result.ssid, result.ip);
                    shared.spawn_devices_fetch();
                }
                Ok(result)
            }
            Err(e) => {
                shared.machine.apply(done, Input::ConnectFailed(e.kind()));
                Err(shared.command_failed(OperationKind::Connect, e))
            }
        }
    }

    /// Leave the station network. On failure the state is left as it was.
    pub async fn request_disconnect(&self) -> Result<(), CommandError> {
        let shared = &self.shared;
        let _guard = shared.begin(OperationKind::Disconnect)?;
        tracing::info!("disconnecting");

        match shared.run(shared.client.disconnect()).await? {
            Ok(()) => {
                let done = shared.next_seq();
                shared.machine.apply(done, Input::DisconnectSucceeded);
                Ok(())
            }
            Err(e) => Err(shared.command_failed(OperationKind::Disconnect, e)),
        }
    }

    /// Fetch the device list now. Only meaningful while connected.
    pub async fn request_devices(&self) -> Result<DevicesReport, CommandError> {
        let shared = &self.shared;
        let epoch = {
            let snap = shared.machine.snapshot();
            if !snap.state.is_connected() {
                return Err(CommandError::NotConnected);
            }
            snap.epoch()
        };
        let _guard = shared.begin(OperationKind::Devices)?;
        let seq = shared.next_seq();

        match shared.run(shared.client.fetch_devices()).await? {
            Ok(report) => {
                let applied = shared.machine.apply(
                    seq,
                    Input::Devices {
                        epoch,
                        report: report.clone(),
                    },
                );
                if applied == Applied::Stale {
                    return Err(CommandError::NotConnected);
                }
                Ok(report)
            }
            Err(e) => Err(shared.command_failed(OperationKind::Devices, e)),
        }
    }

    /// Kick a background status poll (and the device fetch that follows a connected answer).
    pub fn refresh_now(&self) {
        self.shared.spawn_status_poll();
    }

    /// Takes effect from the next scheduling cycle.
    pub fn set_refresh_interval(&self, seconds: u64) -> Result<(), CommandError> {
        if seconds == 0 {
            return Err(CommandError::InvalidInterval(seconds));
        }
        self.update_policy(|p| p.interval_secs = seconds);
        tracing::info!("refresh interval set to {seconds}s");
        Ok(())
    }

    pub fn set_auto_refresh(&self, enabled: bool) {
        self.update_policy(|p| p.auto_refresh_enabled = enabled);
        tracing::info!(
            "auto-refresh {}",
            if enabled { "enabled" } else { "disabled" }
        );
    }

    fn update_policy(&self, f: impl FnOnce(&mut RefreshPolicy)) {
        let changed = self.shared.policy.send_if_modified(|policy| {
            let before = *policy;
            f(policy);
            before != *policy
        });
        if changed {
            let p = self.policy();
            self.shared.machine.notify(Event::PolicyChanged {
                interval_secs: p.interval_secs,
                auto_refresh_enabled: p.auto_refresh_enabled,
            });
        }
    }

    /// Stop the ticker and abandon everything still in flight.
    pub async fn shutdown(mut self) {
        self.shared.cancel.cancel();
        if let Some(ticker) = self.ticker.take() {
            if let Err(e) = ticker.await {
                tracing::warn!("refresh ticker ended abnormally: {e}");
            }
        }
        tracing::info!("refresh coordinator stopped");
    }
}

impl Drop for RefreshCoordinator {
    fn drop(&mut self) {
        self.shared.cancel.cancel();
    }
}

impl Shared {
    fn next_seq(&self) -> u64 {
        self.sequence.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn try_begin(&self, kind: OperationKind) -> Option<FlightGuard> {
        self.in_flight[kind.index()]
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| FlightGuard {
                flags: self.in_flight.clone(),
                kind,
            })
    }

    fn begin(&self, kind: OperationKind) -> Result<FlightGuard, CommandError> {
        if self.cancel.is_cancelled() {
            return Err(CommandError::ShutDown);
        }
        self.try_begin(kind).ok_or_else(|| {
            tracing::debug!("{kind} already in flight, coalescing");
            CommandError::Busy(kind)
        })
    }

    /// Race a device call against shutdown.
    async fn run<T>(&self, call: impl Future<Output = T>) -> Result<T, CommandError> {
        tokio::select! {
            _ = self.cancel.cancelled() => Err(CommandError::ShutDown),
            out = call => {
                if self.cancel.is_cancelled() {
                    Err(CommandError::ShutDown)
                } else {
                    Ok(out)
                }
            }
        }
    }

    fn command_failed(&self, kind: OperationKind, err: DeviceError) -> CommandError {
        tracing::warn!("{kind} failed: {err}");
        self.machine.notify(Event::OperationFailed {
            kind,
            error: err.kind(),
            message: err.to_string(),
            background: false,
        });
        CommandError::Device(err)
    }

    fn background_failed(&self, kind: OperationKind, err: &DeviceError) {
        if kind == OperationKind::Status {
            // Only status polls count toward an outage.
            let failures = self.background_failures.fetch_add(1, Ordering::Relaxed) + 1;
            if failures == 1 {
                tracing::warn!("background {kind} failed: {err}");
            } else {
                tracing::debug!("background {kind} failed ({failures} in a row): {err}");
            }
        } else {
            tracing::warn!("background {kind} failed: {err}");
        }
        self.machine.notify(Event::OperationFailed {
            kind,
            error: err.kind(),
            message: err.to_string(),
            background: true,
        });
    }

    fn background_succeeded(&self) {
        let failures = self.background_failures.swap(0, Ordering::Relaxed);
        if failures > 0 {
            tracing::info!("device reachable again after {failures} failed polls");
            self.machine.notify(Event::DeviceRecovered {
                after_failures: failures,
            });
        }
    }

    fn spawn_status_poll(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let Some(guard) = self.try_begin(OperationKind::Status) else {
            tracing::debug!("status poll already in flight, coalescing");
            return;
        };
        let seq = self.next_seq();
        let shared = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            shared.poll_status(seq).await;
        });
    }

    async fn poll_status(self: &Arc<Self>, seq: u64) {
        let Ok(result) = self.run(self.client.fetch_status()).await else {
            return;
        };
        match result {
            Ok(report) => {
                self.background_succeeded();
                let connected = matches!(report, StatusReport::Connected(_));
                let applied = self.machine.apply(seq, Input::Status(report));
                // spawn_devices_fetch re-checks the live state before issuing anything.
                if connected && applied != Applied::Stale {
                    self.spawn_devices_fetch();
                }
            }
            Err(e) => {
                self.background_failed(OperationKind::Status, &e);
                self.machine.apply(seq, Input::StatusFailed(e.kind()));
            }
        }
    }

    fn spawn_devices_fetch(self: &Arc<Self>) {
        if self.cancel.is_cancelled() {
            return;
        }
        let epoch = {
            let snap = self.machine.snapshot();
            if !snap.state.is_connected() {
                return;
            }
            snap.epoch()
        };
        let Some(guard) = self.try_begin(OperationKind::Devices) else {
            tracing::debug!("devices fetch already in flight, coalescing");
            return;
        };
        let seq = self.next_seq();
        let shared = self.clone();
        tokio::spawn(async move {
            let _guard = guard;
            let Ok(result) = shared.run(shared.client.fetch_devices()).await else {
                return;
            };
            match result {
                Ok(report) => {
                    shared.machine.apply(seq, Input::Devices { epoch, report });
                }
                Err(e) => shared.background_failed(OperationKind::Devices, &e),
            }
        });
    }
}

async fn run_ticker(shared: Arc<Shared>, mut policy_rx: watch::Receiver<RefreshPolicy>) {
    loop {
        let policy = *policy_rx.borrow_and_update();
        if !policy.auto_refresh_enabled {
            tokio::select! {
                _ = shared.cancel.cancelled() => break,
                changed = policy_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
            }
        }

        shared.spawn_status_poll();

        tokio::select! {
            _ = shared.cancel.cancelled() => break,
            _ = tokio::time::sleep(policy.interval()) => {}
        }
    }
    tracing::debug!("refresh ticker exiting");
}
