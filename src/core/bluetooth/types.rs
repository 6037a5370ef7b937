//! Defines shared data structures for the Bluetooth module.

use bluest::{Characteristic, Device};

/// Represents the state of a successfully connected device.
/// This struct holds the active handles needed for interaction.
#[derive(Clone)]
pub struct ConnectedDeviceState {
    /// The device handle, used for things like checking connection status.
    pub device: Device,
    /// The single characteristic used for telemetry notifications and command writes.
    pub characteristic: Characteristic,
}
