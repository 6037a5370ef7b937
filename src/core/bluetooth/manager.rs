//! Bluetooth manager for the ACM link
//! Runs the link state machine on a single task. Transport events, operation
//! results and timers all feed one queue, so state is only ever changed in order.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::config::LinkConfig;
use crate::core::bluetooth::transport::{EventSender, Transport};
use crate::core::error::{AdapterState, LinkError};
use crate::core::link::{LinkAction, LinkEvent, LinkStateMachine, LinkStatus};
use crate::core::telemetry::DeviceState;

/// Read-only view of a running link, plus the ways to poke it.
#[derive(Clone)]
pub struct LinkHandle {
    events: EventSender,
    status: watch::Receiver<LinkStatus>,
    device: watch::Receiver<DeviceState>,
    shutdown: CancellationToken,
}

impl LinkHandle {
    pub fn status(&self) -> LinkStatus {
        *self.status.borrow()
    }

    pub fn device_state(&self) -> DeviceState {
        self.device.borrow().clone()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    pub fn subscribe_device(&self) -> watch::Receiver<DeviceState> {
        self.device.clone()
    }

    /// Sender into the link's event queue, for collaborators such as the lifecycle hook.
    pub fn events(&self) -> EventSender {
        self.events.clone()
    }

    /// Stops the manager task. Pending retries are dropped and any scan is stopped.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Drives the link state machine against a transport
pub struct BluetoothManager<T: Transport> {
    transport: Arc<T>,
    machine: LinkStateMachine,
    events_tx: EventSender,
    events_rx: mpsc::UnboundedReceiver<LinkEvent>,
    status_tx: watch::Sender<LinkStatus>,
    device_tx: watch::Sender<DeviceState>,
    operations_tx: mpsc::UnboundedSender<LinkAction>,
    operations_rx: Option<mpsc::UnboundedReceiver<LinkAction>>,
    retry_token: Option<CancellationToken>,
    operation_timeout: Duration,
    shutdown: CancellationToken,
}

impl<T: Transport> BluetoothManager<T> {
    /// Creates a new BluetoothManager and the handle used to observe it
    pub fn new(transport: Arc<T>, config: &LinkConfig) -> (Self, LinkHandle) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (operations_tx, operations_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(LinkStatus::Disconnected);
        let (device_tx, device_rx) = watch::channel(DeviceState::default());
        let shutdown = CancellationToken::new();

        let handle = LinkHandle {
            events: events_tx.clone(),
            status: status_rx,
            device: device_rx,
            shutdown: shutdown.clone(),
        };

        let manager = Self {
            transport,
            machine: LinkStateMachine::new(config.device_name.clone(), config.retry_delay()),
            events_tx,
            events_rx,
            status_tx,
            device_tx,
            operations_tx,
            operations_rx: Some(operations_rx),
            retry_token: None,
            operation_timeout: config.operation_timeout(),
            shutdown,
        };
        (manager, handle)
    }

    pub fn spawn(self) -> JoinHandle<()> {
        tokio::spawn(self.run())
    }

    /// Processes events until the handle asks for shutdown.
    pub async fn run(mut self) {
        if let Some(operations_rx) = self.operations_rx.take() {
            tokio::spawn(Self::run_operations(
                self.transport.clone(),
                self.events_tx.clone(),
                operations_rx,
                self.operation_timeout,
            ));
        }

        info!("Starting Bluetooth link manager");
        if let Err(e) = self.transport.watch_adapter(self.events_tx.clone()).await {
            error!("Failed to watch Bluetooth adapter: {}", e);
            let state = match e {
                LinkError::AdapterUnavailable(state) => state,
                _ => AdapterState::Unsupported,
            };
            self.dispatch(LinkEvent::AdapterChanged(state));
        }

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => break,
                event = self.events_rx.recv() => match event {
                    Some(event) => self.dispatch(event),
                    None => break,
                },
            }
        }

        info!("Stopping Bluetooth link manager");
        if let Some(token) = self.retry_token.take() {
            token.cancel();
        }
        self.transport.stop_scan().await;
    }

    fn dispatch(&mut self, event: LinkEvent) {
        match &event {
            LinkEvent::Notification(data) => debug!("Received {} bytes of telemetry", data.len()),
            other => debug!("Link event: {:?}", other),
        }

        let actions = self.machine.handle(event);
        self.publish();
        for action in actions {
            self.execute(action);
        }
    }

    fn publish(&self) {
        let status = self.machine.status();
        self.status_tx.send_if_modified(|current| {
            let changed = *current != status;
            *current = status;
            changed
        });

        let device = self.machine.device();
        self.device_tx.send_if_modified(|current| {
            if *current == *device {
                return false;
            }
            *current = device.clone();
            true
        });
    }

    fn execute(&mut self, action: LinkAction) {
        match action {
            LinkAction::ScheduleRetry { id, delay } => {
                if let Some(previous) = self.retry_token.take() {
                    previous.cancel();
                }
                let token = CancellationToken::new();
                let cancelled = token.clone();
                let events = self.events_tx.clone();
                tokio::spawn(async move {
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {
                            if events.send(LinkEvent::RetryElapsed(id)).is_err() {
                                debug!("Link manager gone before retry fired");
                            }
                        }
                        _ = cancelled.cancelled() => {
                            debug!("Retry {:?} cancelled", id);
                        }
                    }
                });
                self.retry_token = Some(token);
            }
            LinkAction::CancelRetry => {
                if let Some(token) = self.retry_token.take() {
                    token.cancel();
                }
            }
            operation => {
                if self.operations_tx.send(operation).is_err() {
                    error!("Transport worker has stopped");
                }
            }
        }
    }

    /// Runs transport operations one at a time and turns their outcome into events.
    async fn run_operations(
        transport: Arc<T>,
        events: EventSender,
        mut operations: mpsc::UnboundedReceiver<LinkAction>,
        timeout: Duration,
    ) {
        while let Some(operation) = operations.recv().await {
            let event = match operation {
                LinkAction::StartScan => {
                    info!("Starting scan");
                    match transport.start_scan(events.clone()).await {
                        Ok(()) => None,
                        Err(e) => Some(LinkEvent::ScanFailed(e.to_string())),
                    }
                }
                LinkAction::StopScan => {
                    transport.stop_scan().await;
                    None
                }
                LinkAction::Probe(peripheral) => {
                    let connected = transport.is_connected(&peripheral).await;
                    Some(LinkEvent::Probed {
                        peripheral,
                        connected,
                    })
                }
                LinkAction::Connect(peripheral) => {
                    info!("Connecting to {}...", peripheral);
                    match bounded(timeout, transport.connect(&peripheral)).await {
                        Ok(()) => Some(LinkEvent::Connected(peripheral)),
                        Err(e) => Some(LinkEvent::ConnectFailed {
                            peripheral,
                            reason: e.to_string(),
                        }),
                    }
                }
                LinkAction::ResolveCharacteristic(peripheral) => {
                    match bounded(timeout, transport.resolve_characteristic(&peripheral)).await {
                        Ok(()) => Some(LinkEvent::CharacteristicResolved(peripheral)),
                        Err(e) => Some(LinkEvent::DiscoveryFailed {
                            peripheral,
                            reason: e.to_string(),
                        }),
                    }
                }
                LinkAction::EnableNotifications(peripheral) => {
                    let enable = transport.enable_notifications(&peripheral, events.clone());
                    match bounded(timeout, enable).await {
                        Ok(()) => Some(LinkEvent::NotificationsEnabled(peripheral)),
                        Err(e) => Some(LinkEvent::DiscoveryFailed {
                            peripheral,
                            reason: e.to_string(),
                        }),
                    }
                }
                LinkAction::ScheduleRetry { .. } | LinkAction::CancelRetry => {
                    warn!("Timer action routed to transport worker, ignoring");
                    None
                }
            };

            if let Some(event) = event {
                if events.send(event).is_err() {
                    break;
                }
            }
        }
        debug!("Transport worker stopped");
    }
}

/// Applies the operation timeout; platform defaults are not relied on.
async fn bounded<F>(limit: Duration, operation: F) -> Result<(), LinkError>
where
    F: Future<Output = Result<(), LinkError>>,
{
    match tokio::time::timeout(limit, operation).await {
        Ok(result) => result,
        Err(_) => Err(LinkError::Timeout(limit)),
    }
}
