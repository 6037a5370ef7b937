//! Last-known device state
//! Holds the decoded battery/solar values and both channel banks. Values are only
//! changed by applying a decoded frame, and stay displayed across reconnects.

use serde::Serialize;

use crate::core::protocol::{DecodedFrame, Section};

/// Number of low-current (dimmable) outputs.
pub const LOW_CURRENT_CHANNELS: usize = 8;

/// Number of medium-current outputs.
pub const MEDIUM_CURRENT_CHANNELS: usize = 2;

/// Total number of switchable outputs, in mask order (LC1..LC8, MC1, MC2).
pub const TOTAL_CHANNELS: usize = LOW_CURRENT_CHANNELS + MEDIUM_CURRENT_CHANNELS;

/// Battery and solar readings from the last accepted `V` section.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct TelemetrySnapshot {
    /// Battery voltage (V)
    pub battery_voltage: f32,
    /// Load current drawn from the battery (A)
    pub load_current: f32,
    /// Solar panel voltage (V)
    pub solar_voltage: f32,
    /// Solar charge current (A)
    pub solar_current: f32,
    /// Solar power (W)
    pub solar_power: f32,
    /// Whether the solar input is charging
    pub solar_charging: bool,
}

/// A low-current output. Brightness only exists on this bank.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct LowCurrentChannel {
    pub enabled: bool,
    /// Fraction in 0..=1
    pub brightness: f32,
    /// Measured current (A)
    pub current: f32,
}

impl Default for LowCurrentChannel {
    fn default() -> Self {
        Self {
            enabled: false,
            brightness: 1.0,
            current: 0.0,
        }
    }
}

/// A medium-current output.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct MediumCurrentChannel {
    pub enabled: bool,
    /// Measured current (A)
    pub current: f32,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct ChannelBank {
    pub low_current: [LowCurrentChannel; LOW_CURRENT_CHANNELS],
    pub medium_current: [MediumCurrentChannel; MEDIUM_CURRENT_CHANNELS],
}

/// Permission for the next channel update to overwrite on/off state.
///
/// Issued once when the link becomes ready and consumed by the first frame that
/// applies a channel entry. It cannot be cloned, so it can only be spent once.
#[derive(Debug, PartialEq, Eq)]
pub struct ResyncToken {
    _private: (),
}

impl ResyncToken {
    pub(crate) fn issue() -> Self {
        Self { _private: () }
    }
}

/// Everything the display layer reads about the device.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct DeviceState {
    pub telemetry: TelemetrySnapshot,
    pub channels: ChannelBank,
}

impl DeviceState {
    /// Applies a decoded frame.
    ///
    /// Without a resync token, on/off state is left alone and only brightness and
    /// current are refreshed, so a just-issued toggle is not undone by a frame that
    /// was in flight. The token is handed back if no channel entry was applied.
    pub fn apply(&mut self, frame: &DecodedFrame, resync: Option<ResyncToken>) -> Option<ResyncToken> {
        let authoritative = resync.is_some();
        let mut channels_applied = false;

        for section in &frame.sections {
            match section {
                Section::Voltage(snapshot) => {
                    self.telemetry = *snapshot;
                }
                Section::LowCurrent(entries) => {
                    for (slot, entry) in self.channels.low_current.iter_mut().zip(entries) {
                        let Some(reading) = entry else { continue };
                        if authoritative {
                            slot.enabled = reading.enabled;
                        }
                        slot.brightness = reading.brightness;
                        slot.current = reading.current;
                        channels_applied = true;
                    }
                }
                Section::MediumCurrent(entries) => {
                    for (slot, entry) in self.channels.medium_current.iter_mut().zip(entries) {
                        let Some(reading) = entry else { continue };
                        if authoritative {
                            slot.enabled = reading.enabled;
                        }
                        slot.current = reading.current;
                        channels_applied = true;
                    }
                }
            }
        }

        if channels_applied { None } else { resync }
    }

    /// Records a toggle the user just issued, ahead of the device confirming it.
    pub fn set_low_current_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(channel) = self.channels.low_current.get_mut(index) {
            channel.enabled = enabled;
        }
    }

    pub fn set_medium_current_enabled(&mut self, index: usize, enabled: bool) {
        if let Some(channel) = self.channels.medium_current.get_mut(index) {
            channel.enabled = enabled;
        }
    }

    pub fn set_brightness(&mut self, index: usize, brightness: f32) {
        if let Some(channel) = self.channels.low_current.get_mut(index) {
            channel.brightness = brightness.clamp(0.0, 1.0);
        }
    }
}
