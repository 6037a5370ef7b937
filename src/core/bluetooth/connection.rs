//! Bluetooth connection handling for the ACM controller
//! The bluest-backed transport: adapter watching, connecting, resolving the ACM
//! characteristic and writing commands.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bluest::{Adapter, AdapterEvent, Device, Uuid};
use futures_util::StreamExt;
use log::{error, info, warn};
use tokio::sync::Mutex;

use crate::config::LinkConfig;
use crate::core::bluetooth::notification::NotificationHandler;
use crate::core::bluetooth::scanner::BluetoothScanner;
use crate::core::bluetooth::transport::{EventSender, Transport};
use crate::core::bluetooth::types::ConnectedDeviceState;
use crate::core::error::{AdapterState, LinkError};
use crate::core::link::{LinkEvent, PeripheralHandle};

/// Transport backed by the platform Bluetooth stack
pub struct BluestTransport {
    adapter: Adapter,
    service_uuid: Uuid,
    characteristic_uuid: Uuid,
    /// Map of device IDs to devices seen while scanning
    devices: Arc<Mutex<HashMap<String, Device>>>,
    scanner: Mutex<BluetoothScanner>,
    /// Currently connected device
    connected_state: Mutex<Option<ConnectedDeviceState>>,
    notification_handler: NotificationHandler,
    /// How long to wait for the adapter to come up before reporting it off
    operation_timeout: Duration,
}

/// Maps the outcome of waiting for the adapter to its initial state. `None` means
/// the wait timed out, which is what a powered-off radio looks like.
fn initial_adapter_state(waited: Option<Result<(), LinkError>>) -> Result<AdapterState, LinkError> {
    match waited {
        Some(Ok(())) => Ok(AdapterState::Ready),
        Some(Err(LinkError::AdapterUnavailable(state))) => Ok(state),
        Some(Err(e)) => Err(e),
        None => Ok(AdapterState::PoweredOff),
    }
}

impl BluestTransport {
    pub async fn new(config: &LinkConfig) -> Result<Self, LinkError> {
        let adapter = Adapter::default()
            .await
            .ok_or(LinkError::AdapterUnavailable(AdapterState::Unsupported))?;
        let devices = Arc::new(Mutex::new(HashMap::new()));
        let scanner = BluetoothScanner::new(adapter.clone(), devices.clone(), config.service_uuid);

        Ok(Self {
            adapter,
            service_uuid: config.service_uuid,
            characteristic_uuid: config.characteristic_uuid,
            devices,
            scanner: Mutex::new(scanner),
            connected_state: Mutex::new(None),
            notification_handler: NotificationHandler::new(),
            operation_timeout: config.operation_timeout(),
        })
    }

    async fn device(&self, peripheral: &PeripheralHandle) -> Result<Device, LinkError> {
        self.devices
            .lock()
            .await
            .get(peripheral.id())
            .cloned()
            .ok_or_else(|| LinkError::Transport(format!("unknown peripheral {}", peripheral)))
    }

    /// Drops the current session: stops notifications and forgets the characteristic.
    async fn clear_session(&self) {
        self.notification_handler.stop_notifications().await;
        if let Some(state) = self.connected_state.lock().await.take() {
            info!("Releasing session with {}", state.device.id());
        }
    }
}

#[async_trait::async_trait]
impl Transport for BluestTransport {
    async fn watch_adapter(&self, events: EventSender) -> Result<(), LinkError> {
        let adapter = self.adapter.clone();
        let wait_limit = self.operation_timeout;
        tokio::spawn(async move {
            let waited = tokio::time::timeout(wait_limit, adapter.wait_available())
                .await
                .ok()
                .map(|result| result.map_err(LinkError::from));
            let initial = match initial_adapter_state(waited) {
                Ok(state) => state,
                Err(e) => {
                    error!("Failed to query Bluetooth adapter: {}", e);
                    AdapterState::Unsupported
                }
            };
            info!("Bluetooth adapter is {}", initial);
            if events.send(LinkEvent::AdapterChanged(initial)).is_err() {
                return;
            }

            let mut adapter_events = match adapter.events().await {
                Ok(stream) => stream,
                Err(e) => {
                    error!("Failed to subscribe to adapter events: {}", e);
                    return;
                }
            };
            while let Some(event) = adapter_events.next().await {
                let state = match event {
                    Ok(AdapterEvent::Available) => AdapterState::Ready,
                    Ok(AdapterEvent::Unavailable) => AdapterState::PoweredOff,
                    Err(e) => {
                        warn!("Error in adapter event stream: {}", e);
                        continue;
                    }
                };
                if events.send(LinkEvent::AdapterChanged(state)).is_err() {
                    break;
                }
            }
            info!("Adapter event stream ended");
        });
        Ok(())
    }

    async fn start_scan(&self, events: EventSender) -> Result<(), LinkError> {
        self.scanner.lock().await.start_scan(events).await
    }

    async fn stop_scan(&self) {
        self.scanner.lock().await.stop_scan().await;
    }

    async fn is_connected(&self, peripheral: &PeripheralHandle) -> bool {
        match self.device(peripheral).await {
            Ok(device) => device.is_connected().await,
            Err(_) => false,
        }
    }

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<(), LinkError> {
        let device = self.device(peripheral).await?;
        let name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!("Device details - ID: {}, Name: {:?}", peripheral, name);

        self.clear_session().await;

        if !device.is_connected().await {
            info!("Initiating connection to {}...", peripheral);
            self.adapter.connect_device(&device).await?;
        }
        info!("Connection successful");
        Ok(())
    }

    async fn resolve_characteristic(&self, peripheral: &PeripheralHandle) -> Result<(), LinkError> {
        let device = self.device(peripheral).await?;

        info!("Discovering services...");
        let services = device.services().await?;
        let acm_service = services
            .iter()
            .find(|s| s.uuid() == self.service_uuid)
            .ok_or_else(|| {
                for service in &services {
                    info!("Available service: {}", service.uuid());
                }
                LinkError::Transport(format!("ACM service not found: {}", self.service_uuid))
            })?
            .clone();
        info!("Found ACM service: {}", acm_service.uuid());

        let characteristic = acm_service
            .characteristics()
            .await?
            .into_iter()
            .find(|c| c.uuid() == self.characteristic_uuid)
            .ok_or_else(|| {
                LinkError::Transport(format!(
                    "ACM characteristic not found: {}",
                    self.characteristic_uuid
                ))
            })?;
        info!("Found ACM characteristic: {}", characteristic.uuid());

        *self.connected_state.lock().await = Some(ConnectedDeviceState {
            device,
            characteristic,
        });
        Ok(())
    }

    async fn enable_notifications(
        &self,
        peripheral: &PeripheralHandle,
        events: EventSender,
    ) -> Result<(), LinkError> {
        let characteristic = self
            .connected_state
            .lock()
            .await
            .as_ref()
            .map(|state| state.characteristic.clone())
            .ok_or(LinkError::NotConnected)?;

        self.notification_handler
            .setup_notifications(peripheral.clone(), characteristic, events)
            .await
    }

    async fn write(&self, payload: &[u8]) -> Result<(), LinkError> {
        let characteristic = self
            .connected_state
            .lock()
            .await
            .as_ref()
            .map(|state| state.characteristic.clone())
            .ok_or(LinkError::NotConnected)?;

        characteristic.write(payload).await?;
        Ok(())
    }
}
