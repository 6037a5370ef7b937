//! Transport boundary
//! Everything the link needs from a Bluetooth stack. Operations that produce a stream
//! of results (scan hits, notifications, adapter changes) report them as link events.

use tokio::sync::mpsc;

use crate::core::error::LinkError;
use crate::core::link::{LinkEvent, PeripheralHandle};

/// Sending half of the link's serialized event queue.
pub type EventSender = mpsc::UnboundedSender<LinkEvent>;

#[async_trait::async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Reports the current adapter state, then every change, as `AdapterChanged` events.
    async fn watch_adapter(&self, events: EventSender) -> Result<(), LinkError>;

    /// Starts a scan filtered to the service; every hit is reported as `Discovered`.
    async fn start_scan(&self, events: EventSender) -> Result<(), LinkError>;

    /// Stops a running scan. Does nothing if none is running.
    async fn stop_scan(&self);

    /// Whether the transport still holds a live connection to the peripheral.
    async fn is_connected(&self, peripheral: &PeripheralHandle) -> bool;

    async fn connect(&self, peripheral: &PeripheralHandle) -> Result<(), LinkError>;

    /// Resolves the service and then the characteristic on a connected peripheral.
    async fn resolve_characteristic(&self, peripheral: &PeripheralHandle) -> Result<(), LinkError>;

    /// Subscribes to characteristic notifications. Returns once the subscription is
    /// active; payloads then arrive as `Notification`, and the end of the stream as
    /// `Disconnected`.
    async fn enable_notifications(
        &self,
        peripheral: &PeripheralHandle,
        events: EventSender,
    ) -> Result<(), LinkError>;

    /// Writes one command frame to the characteristic, with transport acknowledgement.
    async fn write(&self, payload: &[u8]) -> Result<(), LinkError>;
}
