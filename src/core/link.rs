//! Link state machine for the ACM controller
//! Owns the connection status, the peripheral handle and the device state.
//! It performs no I/O: every event yields a list of actions for the driver to run,
//! and the outcome of each action comes back as another event.

use std::fmt;
use std::time::Duration;

use log::{debug, info, warn};
use serde::Serialize;

use crate::core::error::{AdapterState, FrameError};
use crate::core::protocol::{self, Command};
use crate::core::telemetry::{DeviceState, ResyncToken};

/// Opaque identifier of the target peripheral, as assigned by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
pub struct PeripheralHandle(String);

impl PeripheralHandle {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn id(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Connectivity status published to observers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub enum LinkStatus {
    #[default]
    Disconnected,
    Scanning,
    Connecting,
    ServiceDiscovery,
    Ready,
    Reconnecting,
}

impl LinkStatus {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready)
    }
}

impl fmt::Display for LinkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Identifies one scheduled retry so a late timer can be told apart from the current one.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryId(u64);

/// Why a connection probe was requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ProbePurpose {
    /// Adapter came up or a retry fired: connect directly if still connected, else scan
    Reconnect,
    /// App returned to the foreground: re-validate the current session
    Foreground,
}

/// Everything the state machine reacts to.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkEvent {
    AdapterChanged(AdapterState),
    Discovered {
        peripheral: PeripheralHandle,
        name: Option<String>,
    },
    ScanFailed(String),
    Probed {
        peripheral: PeripheralHandle,
        connected: bool,
    },
    Connected(PeripheralHandle),
    ConnectFailed {
        peripheral: PeripheralHandle,
        reason: String,
    },
    CharacteristicResolved(PeripheralHandle),
    NotificationsEnabled(PeripheralHandle),
    DiscoveryFailed {
        peripheral: PeripheralHandle,
        reason: String,
    },
    Disconnected {
        peripheral: PeripheralHandle,
        reason: Option<String>,
    },
    Notification(Vec<u8>),
    /// A command reached the device
    CommandDelivered(Command),
    WriteFailed(String),
    RetryElapsed(RetryId),
    Foreground,
    Background,
}

/// Requests for the driver. Each one is non-blocking; results arrive as events.
#[derive(Debug, Clone, PartialEq)]
pub enum LinkAction {
    StartScan,
    StopScan,
    Probe(PeripheralHandle),
    Connect(PeripheralHandle),
    ResolveCharacteristic(PeripheralHandle),
    EnableNotifications(PeripheralHandle),
    ScheduleRetry { id: RetryId, delay: Duration },
    CancelRetry,
}

pub struct LinkStateMachine {
    target_name: String,
    retry_delay: Duration,
    status: LinkStatus,
    adapter: Option<AdapterState>,
    peripheral: Option<PeripheralHandle>,
    pending_probe: Option<ProbePurpose>,
    retry: Option<RetryId>,
    next_retry: u64,
    resync: Option<ResyncToken>,
    device: DeviceState,
}

impl LinkStateMachine {
    pub fn new(target_name: impl Into<String>, retry_delay: Duration) -> Self {
        Self {
            target_name: target_name.into(),
            retry_delay,
            status: LinkStatus::Disconnected,
            adapter: None,
            peripheral: None,
            pending_probe: None,
            retry: None,
            next_retry: 0,
            resync: None,
            device: DeviceState::default(),
        }
    }

    pub fn status(&self) -> LinkStatus {
        self.status
    }

    pub fn device(&self) -> &DeviceState {
        &self.device
    }

    pub fn peripheral(&self) -> Option<&PeripheralHandle> {
        self.peripheral.as_ref()
    }

    /// Whether the next channel update may overwrite on/off state.
    pub fn resync_pending(&self) -> bool {
        self.resync.is_some()
    }

    fn adapter_ready(&self) -> bool {
        self.adapter == Some(AdapterState::Ready)
    }

    fn is_current(&self, peripheral: &PeripheralHandle) -> bool {
        self.peripheral.as_ref() == Some(peripheral)
    }

    fn set_status(&mut self, status: LinkStatus) {
        if self.status != status {
            info!("Link status: {} -> {}", self.status, status);
            self.status = status;
        }
    }

    /// Feeds one event through the machine.
    pub fn handle(&mut self, event: LinkEvent) -> Vec<LinkAction> {
        let mut actions = Vec::new();

        match event {
            LinkEvent::AdapterChanged(state) => self.on_adapter_changed(state, &mut actions),
            LinkEvent::Discovered { peripheral, name } => {
                self.on_discovered(peripheral, name, &mut actions)
            }
            LinkEvent::ScanFailed(reason) => {
                if self.status == LinkStatus::Scanning {
                    warn!("Scan failed: {}", reason);
                    self.enter_reconnecting(&mut actions);
                }
            }
            LinkEvent::Probed {
                peripheral,
                connected,
            } => self.on_probed(peripheral, connected, &mut actions),
            LinkEvent::Connected(peripheral) => {
                if self.status == LinkStatus::Connecting && self.is_current(&peripheral) {
                    info!("Connected to {}, resolving characteristic", peripheral);
                    self.cancel_retry(&mut actions);
                    self.set_status(LinkStatus::ServiceDiscovery);
                    actions.push(LinkAction::ResolveCharacteristic(peripheral));
                } else {
                    debug!("Ignoring stale connect result for {}", peripheral);
                }
            }
            LinkEvent::ConnectFailed { peripheral, reason } => {
                if self.status == LinkStatus::Connecting && self.is_current(&peripheral) {
                    warn!("Failed to connect to {}: {}", peripheral, reason);
                    self.enter_reconnecting(&mut actions);
                }
            }
            LinkEvent::CharacteristicResolved(peripheral) => {
                if self.status == LinkStatus::ServiceDiscovery && self.is_current(&peripheral) {
                    actions.push(LinkAction::EnableNotifications(peripheral));
                }
            }
            LinkEvent::NotificationsEnabled(peripheral) => {
                if self.status == LinkStatus::ServiceDiscovery && self.is_current(&peripheral) {
                    self.set_status(LinkStatus::Ready);
                    self.resync = Some(ResyncToken::issue());
                }
            }
            LinkEvent::DiscoveryFailed { peripheral, reason } => {
                if self.status == LinkStatus::ServiceDiscovery && self.is_current(&peripheral) {
                    warn!("Service discovery on {} failed: {}", peripheral, reason);
                    self.enter_reconnecting(&mut actions);
                }
            }
            LinkEvent::Disconnected { peripheral, reason } => {
                let active = matches!(
                    self.status,
                    LinkStatus::Connecting | LinkStatus::ServiceDiscovery | LinkStatus::Ready
                );
                if active && self.is_current(&peripheral) {
                    match reason {
                        Some(reason) => warn!("Disconnected from {}: {}", peripheral, reason),
                        None => warn!("Disconnected from {}", peripheral),
                    }
                    self.enter_reconnecting(&mut actions);
                }
            }
            LinkEvent::Notification(data) => self.on_notification(&data),
            LinkEvent::CommandDelivered(command) => self.on_command_delivered(command),
            LinkEvent::WriteFailed(reason) => {
                if self.status == LinkStatus::Ready {
                    warn!("Write failed: {}", reason);
                    self.enter_reconnecting(&mut actions);
                }
            }
            LinkEvent::RetryElapsed(id) => self.on_retry_elapsed(id, &mut actions),
            LinkEvent::Foreground => self.on_foreground(&mut actions),
            LinkEvent::Background => {
                debug!("App moved to background, link left as {}", self.status);
            }
        }

        actions
    }

    fn on_adapter_changed(&mut self, state: AdapterState, actions: &mut Vec<LinkAction>) {
        self.adapter = Some(state);

        if state != AdapterState::Ready {
            warn!("Bluetooth adapter is {}, link suspended", state);
            if self.status == LinkStatus::Scanning {
                actions.push(LinkAction::StopScan);
            }
            self.cancel_retry(actions);
            self.pending_probe = None;
            self.resync = None;
            self.set_status(LinkStatus::Disconnected);
            return;
        }

        if !matches!(self.status, LinkStatus::Disconnected | LinkStatus::Reconnecting) {
            return;
        }
        info!("Bluetooth adapter is ready");
        self.cancel_retry(actions);
        self.reconnect_or_scan(ProbePurpose::Reconnect, actions);
    }

    fn on_discovered(
        &mut self,
        peripheral: PeripheralHandle,
        name: Option<String>,
        actions: &mut Vec<LinkAction>,
    ) {
        if self.status != LinkStatus::Scanning {
            return;
        }
        if name.as_deref() != Some(self.target_name.as_str()) {
            debug!("Skipping {} ({:?})", peripheral, name);
            return;
        }

        info!("Found {} as {}, connecting", self.target_name, peripheral);
        self.peripheral = Some(peripheral.clone());
        actions.push(LinkAction::StopScan);
        self.set_status(LinkStatus::Connecting);
        actions.push(LinkAction::Connect(peripheral));
    }

    fn on_probed(
        &mut self,
        peripheral: PeripheralHandle,
        connected: bool,
        actions: &mut Vec<LinkAction>,
    ) {
        if !self.is_current(&peripheral) || !self.adapter_ready() {
            return;
        }
        let Some(purpose) = self.pending_probe.take() else {
            return;
        };
        if !matches!(
            self.status,
            LinkStatus::Disconnected | LinkStatus::Reconnecting | LinkStatus::Ready
        ) {
            return;
        }

        match (purpose, connected) {
            (ProbePurpose::Reconnect, true) => {
                info!("{} is still connected, reconnecting directly", peripheral);
                self.cancel_retry(actions);
                self.set_status(LinkStatus::Connecting);
                actions.push(LinkAction::Connect(peripheral));
            }
            (ProbePurpose::Foreground, true) => {
                if self.status != LinkStatus::Ready {
                    info!("{} is still connected, re-resolving characteristic", peripheral);
                    self.cancel_retry(actions);
                    self.set_status(LinkStatus::ServiceDiscovery);
                    actions.push(LinkAction::ResolveCharacteristic(peripheral));
                }
            }
            (_, false) => {
                info!("{} is not connected, scanning", peripheral);
                self.start_scan(actions);
            }
        }
    }

    fn on_notification(&mut self, data: &[u8]) {
        if self.status != LinkStatus::Ready {
            debug!("Dropping notification received while {}", self.status);
            return;
        }

        let frame = protocol::decode_bytes(data);
        for err in &frame.errors {
            match err {
                FrameError::UnknownSection(_) => debug!("Skipped telemetry section: {}", err),
                _ => warn!("Discarded telemetry: {}", err),
            }
        }

        let resync = self.resync.take();
        let had_token = resync.is_some();
        self.resync = self.device.apply(&frame, resync);
        if had_token && self.resync.is_none() {
            info!("Switch states resynchronised from device");
        }
    }

    fn on_command_delivered(&mut self, command: Command) {
        // Wire channels are 1-based.
        let index = |channel: u8| usize::from(channel).checked_sub(1);

        match command {
            Command::SetLowCurrent { channel, on } => {
                if let Some(i) = index(channel) {
                    self.device.set_low_current_enabled(i, on);
                }
            }
            Command::SetMediumCurrent { channel, on } => {
                if let Some(i) = index(channel) {
                    self.device.set_medium_current_enabled(i, on);
                }
            }
            Command::SetBrightness { channel, level } => {
                if let Some(i) = index(channel) {
                    self.device.set_brightness(i, level);
                }
            }
            Command::Configure(_) => {}
        }
    }

    fn on_retry_elapsed(&mut self, id: RetryId, actions: &mut Vec<LinkAction>) {
        if self.retry != Some(id) {
            debug!("Ignoring cancelled retry {:?}", id);
            return;
        }
        self.retry = None;
        if self.status != LinkStatus::Reconnecting {
            return;
        }
        info!("Retrying link");
        self.reconnect_or_scan(ProbePurpose::Reconnect, actions);
    }

    fn on_foreground(&mut self, actions: &mut Vec<LinkAction>) {
        if !self.adapter_ready() || self.pending_probe.is_some() {
            return;
        }
        match self.status {
            LinkStatus::Scanning | LinkStatus::Connecting | LinkStatus::ServiceDiscovery => {
                debug!("App in foreground while {}, nothing to re-validate", self.status);
            }
            LinkStatus::Ready | LinkStatus::Reconnecting | LinkStatus::Disconnected => {
                info!("App in foreground, re-validating link");
                self.reconnect_or_scan(ProbePurpose::Foreground, actions);
            }
        }
    }

    /// Probes a known peripheral, or scans when none has been seen yet.
    fn reconnect_or_scan(&mut self, purpose: ProbePurpose, actions: &mut Vec<LinkAction>) {
        match self.peripheral.clone() {
            Some(peripheral) => {
                self.pending_probe = Some(purpose);
                actions.push(LinkAction::Probe(peripheral));
            }
            None => self.start_scan(actions),
        }
    }

    fn start_scan(&mut self, actions: &mut Vec<LinkAction>) {
        self.cancel_retry(actions);
        self.resync = None;
        self.set_status(LinkStatus::Scanning);
        actions.push(LinkAction::StartScan);
    }

    fn cancel_retry(&mut self, actions: &mut Vec<LinkAction>) {
        if self.retry.take().is_some() {
            actions.push(LinkAction::CancelRetry);
        }
    }

    fn enter_reconnecting(&mut self, actions: &mut Vec<LinkAction>) {
        self.pending_probe = None;
        self.resync = None;

        if !self.adapter_ready() {
            self.set_status(LinkStatus::Disconnected);
            return;
        }

        self.set_status(LinkStatus::Reconnecting);
        if self.retry.is_none() {
            self.next_retry += 1;
            let id = RetryId(self.next_retry);
            self.retry = Some(id);
            info!("Retrying link in {:?}", self.retry_delay);
            actions.push(LinkAction::ScheduleRetry {
                id,
                delay: self.retry_delay,
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TARGET: &str = "ESP32_ACM";
    const DELAY: Duration = Duration::from_secs(5);
    const REFERENCE_FRAME: &[u8] =
        b"V:04B0,00001,0000,0,0000;L:0ff0,0ff0,0ff0,0ff0,0ff0,0ff0,0ff0,0ff0;M:00,00";

    fn device() -> PeripheralHandle {
        PeripheralHandle::new("AA:BB:CC:DD:EE:FF")
    }

    fn machine() -> LinkStateMachine {
        LinkStateMachine::new(TARGET, DELAY)
    }

    /// Walks a fresh machine to `Ready`.
    fn ready_machine() -> LinkStateMachine {
        let mut m = machine();
        assert_eq!(m.handle(LinkEvent::AdapterChanged(AdapterState::Ready)), vec![LinkAction::StartScan]);
        assert_eq!(
            m.handle(LinkEvent::Discovered {
                peripheral: device(),
                name: Some(TARGET.into())
            }),
            vec![LinkAction::StopScan, LinkAction::Connect(device())]
        );
        assert_eq!(m.status(), LinkStatus::Connecting);
        assert_eq!(
            m.handle(LinkEvent::Connected(device())),
            vec![LinkAction::ResolveCharacteristic(device())]
        );
        assert_eq!(m.status(), LinkStatus::ServiceDiscovery);
        assert_eq!(
            m.handle(LinkEvent::CharacteristicResolved(device())),
            vec![LinkAction::EnableNotifications(device())]
        );
        assert!(m.handle(LinkEvent::NotificationsEnabled(device())).is_empty());
        assert_eq!(m.status(), LinkStatus::Ready);
        m
    }

    fn retry_id(actions: &[LinkAction]) -> RetryId {
        actions
            .iter()
            .find_map(|a| match a {
                LinkAction::ScheduleRetry { id, delay } => {
                    assert_eq!(*delay, DELAY);
                    Some(*id)
                }
                _ => None,
            })
            .expect("a retry should be scheduled")
    }

    #[test]
    fn starts_disconnected() {
        let m = machine();
        assert_eq!(m.status(), LinkStatus::Disconnected);
        assert!(m.peripheral().is_none());
    }

    #[test]
    fn only_exact_name_matches() {
        let mut m = machine();
        m.handle(LinkEvent::AdapterChanged(AdapterState::Ready));

        for name in [None, Some("ESP32_ACM2"), Some("esp32_acm"), Some("Other")] {
            let actions = m.handle(LinkEvent::Discovered {
                peripheral: PeripheralHandle::new("x"),
                name: name.map(String::from),
            });
            assert!(actions.is_empty());
        }
        assert_eq!(m.status(), LinkStatus::Scanning);
    }

    #[test]
    fn first_match_wins() {
        let mut m = machine();
        m.handle(LinkEvent::AdapterChanged(AdapterState::Ready));
        m.handle(LinkEvent::Discovered {
            peripheral: device(),
            name: Some(TARGET.into()),
        });
        let second = m.handle(LinkEvent::Discovered {
            peripheral: PeripheralHandle::new("second"),
            name: Some(TARGET.into()),
        });

        assert!(second.is_empty());
        assert_eq!(m.peripheral(), Some(&device()));
    }

    #[test]
    fn reference_scenario_decodes_into_state() {
        let mut m = ready_machine();
        m.handle(LinkEvent::Notification(REFERENCE_FRAME.to_vec()));

        let state = m.device();
        assert!((state.telemetry.battery_voltage - 12.0).abs() < 1e-6);
        for channel in &state.channels.low_current {
            assert!(!channel.enabled);
            assert!((channel.brightness - 1.0).abs() < 1e-6);
        }
        assert!(state.channels.medium_current.iter().all(|c| !c.enabled));
    }

    #[test]
    fn only_first_channel_frame_after_ready_sets_switches() {
        let mut m = ready_machine();
        assert!(m.resync_pending());

        m.handle(LinkEvent::Notification(b"L:1ff0,1ff0,1ff0,1ff0,1ff0,1ff0,1ff0,1ff0;M:10,10".to_vec()));
        assert!(!m.resync_pending());
        assert!(m.device().channels.low_current.iter().all(|c| c.enabled));

        m.handle(LinkEvent::Notification(b"L:0802,0802,0802,0802,0802,0802,0802,0802;M:03,03".to_vec()));
        let channels = &m.device().channels;
        assert!(channels.low_current.iter().all(|c| c.enabled));
        assert!(channels.medium_current.iter().all(|c| c.enabled));
        assert!((channels.low_current[0].brightness - 128.0 / 255.0).abs() < 1e-6);
        assert!((channels.medium_current[1].current - 0.3).abs() < 1e-6);
    }

    #[test]
    fn reconnect_issues_a_new_resync_token() {
        let mut m = ready_machine();
        m.handle(LinkEvent::Notification(b"M:10,10".to_vec()));
        assert!(!m.resync_pending());

        let actions = m.handle(LinkEvent::Disconnected {
            peripheral: device(),
            reason: None,
        });
        let id = retry_id(&actions);
        assert_eq!(m.handle(LinkEvent::RetryElapsed(id)), vec![LinkAction::Probe(device())]);
        assert_eq!(
            m.handle(LinkEvent::Probed {
                peripheral: device(),
                connected: true
            }),
            vec![LinkAction::Connect(device())]
        );
        m.handle(LinkEvent::Connected(device()));
        m.handle(LinkEvent::CharacteristicResolved(device()));
        m.handle(LinkEvent::NotificationsEnabled(device()));

        assert!(m.resync_pending());
        m.handle(LinkEvent::Notification(b"M:00,00".to_vec()));
        assert!(m.device().channels.medium_current.iter().all(|c| !c.enabled));
    }

    #[test]
    fn unexpected_disconnect_retries_once_then_scans() {
        let mut m = ready_machine();
        let actions = m.handle(LinkEvent::Disconnected {
            peripheral: device(),
            reason: Some("link lost".into()),
        });
        assert_eq!(m.status(), LinkStatus::Reconnecting);
        assert_eq!(actions.len(), 1);
        let id = retry_id(&actions);

        // A second failure while waiting does not stack another retry.
        let again = m.handle(LinkEvent::WriteFailed("gone".into()));
        assert!(again.is_empty());

        assert_eq!(m.handle(LinkEvent::RetryElapsed(id)), vec![LinkAction::Probe(device())]);
        assert_eq!(m.status(), LinkStatus::Reconnecting);
        assert_eq!(
            m.handle(LinkEvent::Probed {
                peripheral: device(),
                connected: false
            }),
            vec![LinkAction::StartScan]
        );
        assert_eq!(m.status(), LinkStatus::Scanning);

        // The same timer firing twice is ignored.
        assert!(m.handle(LinkEvent::RetryElapsed(id)).is_empty());
    }

    #[test]
    fn connect_before_retry_cancels_it() {
        let mut m = ready_machine();
        let id = retry_id(&m.handle(LinkEvent::Disconnected {
            peripheral: device(),
            reason: None,
        }));

        // Foreground re-validation finds the link still up before the timer fires.
        assert_eq!(m.handle(LinkEvent::Foreground), vec![LinkAction::Probe(device())]);
        assert_eq!(
            m.handle(LinkEvent::Probed {
                peripheral: device(),
                connected: true
            }),
            vec![LinkAction::CancelRetry, LinkAction::ResolveCharacteristic(device())]
        );

        // A timer that raced the cancellation must not cause another connect.
        let late = m.handle(LinkEvent::RetryElapsed(id));
        assert!(!late.iter().any(|a| matches!(a, LinkAction::Connect(_))));
        assert!(late.is_empty());
        assert_eq!(m.status(), LinkStatus::ServiceDiscovery);
    }

    #[test]
    fn adapter_ready_fast_path_cancels_pending_retry() {
        let mut m = ready_machine();
        m.handle(LinkEvent::ConnectFailed {
            peripheral: device(),
            reason: "ignored while ready".into(),
        });
        assert_eq!(m.status(), LinkStatus::Ready);

        let id = retry_id(&m.handle(LinkEvent::Disconnected {
            peripheral: device(),
            reason: None,
        }));
        assert_eq!(
            m.handle(LinkEvent::AdapterChanged(AdapterState::Ready)),
            vec![LinkAction::CancelRetry, LinkAction::Probe(device())]
        );
        assert_eq!(
            m.handle(LinkEvent::Probed {
                peripheral: device(),
                connected: true
            }),
            vec![LinkAction::Connect(device())]
        );
        m.handle(LinkEvent::Connected(device()));
        assert!(m.handle(LinkEvent::RetryElapsed(id)).is_empty());
    }

    #[test]
    fn connect_failure_schedules_retry() {
        let mut m = machine();
        m.handle(LinkEvent::AdapterChanged(AdapterState::Ready));
        m.handle(LinkEvent::Discovered {
            peripheral: device(),
            name: Some(TARGET.into()),
        });
        let actions = m.handle(LinkEvent::ConnectFailed {
            peripheral: device(),
            reason: "timeout".into(),
        });
        retry_id(&actions);
        assert_eq!(m.status(), LinkStatus::Reconnecting);
    }

    #[test]
    fn discovery_failure_schedules_retry() {
        let mut m = machine();
        m.handle(LinkEvent::AdapterChanged(AdapterState::Ready));
        m.handle(LinkEvent::Discovered {
            peripheral: device(),
            name: Some(TARGET.into()),
        });
        m.handle(LinkEvent::Connected(device()));
        let actions = m.handle(LinkEvent::DiscoveryFailed {
            peripheral: device(),
            reason: "characteristic not found".into(),
        });
        retry_id(&actions);
        assert_eq!(m.status(), LinkStatus::Reconnecting);
    }

    #[test]
    fn adapter_loss_stops_everything_without_retry() {
        let mut m = ready_machine();
        let actions = m.handle(LinkEvent::AdapterChanged(AdapterState::PoweredOff));
        assert!(actions.is_empty());
        assert_eq!(m.status(), LinkStatus::Disconnected);

        // The resulting disconnect does not spin up a retry loop.
        let actions = m.handle(LinkEvent::Disconnected {
            peripheral: device(),
            reason: None,
        });
        assert!(actions.is_empty());
        assert!(m.handle(LinkEvent::Foreground).is_empty());
        assert_eq!(m.status(), LinkStatus::Disconnected);

        // Coming back uses the known device.
        assert_eq!(
            m.handle(LinkEvent::AdapterChanged(AdapterState::Ready)),
            vec![LinkAction::Probe(device())]
        );
    }

    #[test]
    fn adapter_loss_while_scanning_stops_scan_and_retry() {
        let mut m = machine();
        m.handle(LinkEvent::AdapterChanged(AdapterState::Ready));
        let actions = m.handle(LinkEvent::AdapterChanged(AdapterState::Unauthorized));
        assert_eq!(actions, vec![LinkAction::StopScan]);

        m.handle(LinkEvent::AdapterChanged(AdapterState::Ready));
        let id = retry_id(&m.handle(LinkEvent::ScanFailed("busy".into())));
        assert_eq!(
            m.handle(LinkEvent::AdapterChanged(AdapterState::Unsupported)),
            vec![LinkAction::CancelRetry]
        );
        assert!(m.handle(LinkEvent::RetryElapsed(id)).is_empty());
    }

    #[test]
    fn never_scans_while_link_is_busy() {
        let mut m = ready_machine();
        assert!(m.handle(LinkEvent::AdapterChanged(AdapterState::Ready)).is_empty());

        let mut m = machine();
        m.handle(LinkEvent::AdapterChanged(AdapterState::Ready));
        m.handle(LinkEvent::Discovered {
            peripheral: device(),
            name: Some(TARGET.into()),
        });
        assert!(m.handle(LinkEvent::Foreground).is_empty());
        assert!(m.handle(LinkEvent::AdapterChanged(AdapterState::Ready)).is_empty());
        assert_eq!(m.status(), LinkStatus::Connecting);
    }

    #[test]
    fn foreground_with_live_link_stays_ready() {
        let mut m = ready_machine();
        assert_eq!(m.handle(LinkEvent::Foreground), vec![LinkAction::Probe(device())]);
        // A second signal while the probe is out is folded into it.
        assert!(m.handle(LinkEvent::Foreground).is_empty());
        assert!(m
            .handle(LinkEvent::Probed {
                peripheral: device(),
                connected: true
            })
            .is_empty());
        assert_eq!(m.status(), LinkStatus::Ready);
    }

    #[test]
    fn foreground_with_dead_link_rescans() {
        let mut m = ready_machine();
        m.handle(LinkEvent::Foreground);
        assert_eq!(
            m.handle(LinkEvent::Probed {
                peripheral: device(),
                connected: false
            }),
            vec![LinkAction::StartScan]
        );
        assert_eq!(m.status(), LinkStatus::Scanning);
        assert!(!m.resync_pending());
    }

    #[test]
    fn foreground_without_known_device_scans() {
        let mut m = machine();
        m.handle(LinkEvent::AdapterChanged(AdapterState::Ready));
        m.handle(LinkEvent::ScanFailed("scan aborted".into()));
        assert_eq!(m.status(), LinkStatus::Reconnecting);
        assert_eq!(
            m.handle(LinkEvent::Foreground),
            vec![LinkAction::CancelRetry, LinkAction::StartScan]
        );
    }

    #[test]
    fn background_does_nothing() {
        let mut m = ready_machine();
        assert!(m.handle(LinkEvent::Background).is_empty());
        assert_eq!(m.status(), LinkStatus::Ready);
    }

    #[test]
    fn notifications_outside_ready_are_dropped() {
        let mut m = machine();
        m.handle(LinkEvent::AdapterChanged(AdapterState::Ready));
        m.handle(LinkEvent::Notification(REFERENCE_FRAME.to_vec()));
        assert_eq!(m.device(), &DeviceState::default());
    }

    #[test]
    fn delivered_commands_update_switches() {
        let mut m = ready_machine();
        m.handle(LinkEvent::Notification(REFERENCE_FRAME.to_vec()));
        m.handle(LinkEvent::CommandDelivered(Command::SetLowCurrent { channel: 2, on: true }));
        m.handle(LinkEvent::CommandDelivered(Command::SetMediumCurrent { channel: 1, on: true }));
        m.handle(LinkEvent::CommandDelivered(Command::SetBrightness { channel: 2, level: 0.25 }));

        // A frame sent before the device saw the toggle must not undo it.
        m.handle(LinkEvent::Notification(REFERENCE_FRAME.to_vec()));
        let channels = &m.device().channels;
        assert!(channels.low_current[1].enabled);
        assert!(!channels.low_current[0].enabled);
        assert!(channels.medium_current[0].enabled);
    }

    #[test]
    fn stale_peripheral_events_are_ignored() {
        let mut m = ready_machine();
        let other = PeripheralHandle::new("other");
        assert!(m
            .handle(LinkEvent::Disconnected {
                peripheral: other.clone(),
                reason: None
            })
            .is_empty());
        assert!(m.handle(LinkEvent::Connected(other)).is_empty());
        assert_eq!(m.status(), LinkStatus::Ready);
    }
}
