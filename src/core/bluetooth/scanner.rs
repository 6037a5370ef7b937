use std::collections::HashMap;
use std::sync::Arc;

use bluest::{Adapter, Device, Uuid};
use futures_util::StreamExt;
use log::{debug, error, info};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::core::bluetooth::transport::EventSender;
use crate::core::error::LinkError;
use crate::core::link::{LinkEvent, PeripheralHandle};

pub struct BluetoothScanner {
    adapter: Adapter,
    devices: Arc<Mutex<HashMap<String, Device>>>,
    service_uuid: Uuid,
    cancel_token: CancellationToken,
    scan_task_handle: Option<JoinHandle<()>>,
}

impl BluetoothScanner {
    pub fn new(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        service_uuid: Uuid,
    ) -> Self {
        Self {
            adapter,
            devices,
            service_uuid,
            cancel_token: CancellationToken::new(),
            scan_task_handle: None,
        }
    }

    pub async fn start_scan(&mut self, events: EventSender) -> Result<(), LinkError> {
        if self.scan_task_handle.is_some() {
            self.stop_scan().await;
        }

        self.cancel_token = CancellationToken::new();
        let cancel_token_for_task = self.cancel_token.clone();
        let adapter_for_task = self.adapter.clone();
        let devices_for_task = self.devices.clone();
        let service_uuid = self.service_uuid;

        let handle = tokio::spawn(async move {
            let result = Self::internal_scan_task(
                adapter_for_task,
                devices_for_task,
                service_uuid,
                events.clone(),
                cancel_token_for_task,
            )
            .await;
            if let Err(e) = result {
                error!("Scan task failed: {}", e);
                let _ = events.send(LinkEvent::ScanFailed(e.to_string()));
            }
        });

        self.scan_task_handle = Some(handle);
        info!("Device scan task started.");
        Ok(())
    }

    /// Reports devices already connected with the service, then everything the
    /// filtered scan finds, until cancelled.
    async fn internal_scan_task(
        adapter: Adapter,
        devices: Arc<Mutex<HashMap<String, Device>>>,
        service_uuid: Uuid,
        events: EventSender,
        cancel_token: CancellationToken,
    ) -> Result<(), LinkError> {
        info!("Checking for connected devices");
        let connected_devices = adapter.connected_devices_with_services(&[service_uuid]).await?;
        for device in connected_devices {
            let name = device.name().ok();
            if !Self::report_device(&devices, &events, device, name).await {
                return Ok(());
            }
        }

        info!("Starting bluetooth scan");
        let services = [service_uuid];
        let mut scan_stream = adapter.scan(&services).await?;

        loop {
            tokio::select! {
                result = scan_stream.next() => {
                    match result {
                        Some(discovered_device) => {
                            let name = discovered_device
                                .adv_data
                                .local_name
                                .clone()
                                .or_else(|| discovered_device.device.name().ok());
                            debug!(
                                "Found device - Device: {:?}, RSSI: {:?}",
                                discovered_device.device, discovered_device.rssi
                            );
                            if !Self::report_device(&devices, &events, discovered_device.device, name).await {
                                break;
                            }
                        }
                        None => {
                            info!("Bluetooth scan stream has ended.");
                            break;
                        }
                    }
                }
                _ = cancel_token.cancelled() => {
                    break;
                }
            }
        }
        Ok(())
    }

    /// Remembers the device and reports it. Returns false once nobody is listening.
    async fn report_device(
        devices: &Mutex<HashMap<String, Device>>,
        events: &EventSender,
        device: Device,
        name: Option<String>,
    ) -> bool {
        let id = device.id().to_string();
        devices.lock().await.insert(id.clone(), device);

        events
            .send(LinkEvent::Discovered {
                peripheral: PeripheralHandle::new(id),
                name,
            })
            .is_ok()
    }

    pub async fn stop_scan(&mut self) {
        self.cancel_token.cancel();

        if let Some(handle) = self.scan_task_handle.take() {
            info!("Stopping Bluetooth scan.");
            match handle.await {
                Ok(()) => info!("Scan task finished."),
                Err(e) => {
                    if e.is_cancelled() {
                        info!("Scan task was cancelled successfully.");
                    } else {
                        error!("Scan task finished with an unexpected join error: {:?}", e);
                    }
                }
            }
        }
    }
}
