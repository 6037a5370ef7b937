//! UI commands
//! This module defines the calls a display layer makes. Errors come back as strings,
//! ready to show to the user.

use log::info;

use crate::core::protocol::CutoffConfig;
use crate::core::telemetry::{DeviceState, LOW_CURRENT_CHANNELS, MEDIUM_CURRENT_CHANNELS};
use crate::core::{LifecycleSignal, LinkStatus, Transport};
use crate::state::AppState;

/// Converts a 0-based index within a bank into the 1-based wire channel.
fn channel_number(index: usize, bank_size: usize) -> Result<u8, String> {
    if index >= bank_size {
        return Err(format!("channel index {} out of range 0..{}", index, bank_size));
    }
    u8::try_from(index + 1).map_err(|e| e.to_string())
}

/// Switches a low-current output
///
/// # Arguments
/// * `state` - The application state
/// * `index` - Output index, 0 for LC1
/// * `on` - Requested state
pub async fn set_low_current<T: Transport>(
    state: &AppState<T>,
    index: usize,
    on: bool,
) -> Result<(), String> {
    let channel = channel_number(index, LOW_CURRENT_CHANNELS)?;
    state
        .dispatcher
        .set_low_current(channel, on)
        .await
        .map_err(|e| e.to_string())
}

/// Switches a medium-current output; `index` 0 is MC1.
pub async fn set_medium_current<T: Transport>(
    state: &AppState<T>,
    index: usize,
    on: bool,
) -> Result<(), String> {
    let channel = channel_number(index, MEDIUM_CURRENT_CHANNELS)?;
    state
        .dispatcher
        .set_medium_current(channel, on)
        .await
        .map_err(|e| e.to_string())
}

/// Sets the brightness of a low-current output as a fraction of full.
pub async fn set_brightness<T: Transport>(
    state: &AppState<T>,
    index: usize,
    level: f32,
) -> Result<(), String> {
    let channel = channel_number(index, LOW_CURRENT_CHANNELS)?;
    state
        .dispatcher
        .set_brightness(channel, level)
        .await
        .map_err(|e| e.to_string())
}

/// Sends the cutoff settings and remembers them once they were delivered.
pub async fn send_configuration<T: Transport>(
    state: &AppState<T>,
    config: CutoffConfig,
) -> Result<(), String> {
    state
        .dispatcher
        .send_configuration(config)
        .await
        .map_err(|e| e.to_string())?;
    *state.cutoff.lock().await = config;
    info!("Cutoff configuration sent");
    Ok(())
}

pub async fn cutoff_config<T: Transport>(state: &AppState<T>) -> CutoffConfig {
    *state.cutoff.lock().await
}

/// All ten channel labels, LC1 first.
pub async fn channel_names<T: Transport>(state: &AppState<T>) -> Vec<String> {
    state.names.lock().await.names()
}

/// Renames a channel and persists the labels
///
/// # Arguments
/// * `state` - The application state
/// * `index` - Channel index in mask order, 0 for LC1 and 8 for MC1
/// * `name` - The new label
pub async fn rename_channel<T: Transport>(
    state: &AppState<T>,
    index: usize,
    name: String,
) -> Result<(), String> {
    let mut names = state.names.lock().await;
    let mut updated = names.clone();
    updated.set_name(index, name).map_err(|e| e.to_string())?;
    state
        .name_store
        .save(&updated)
        .await
        .map_err(|e| e.to_string())?;
    *names = updated;
    Ok(())
}

pub fn link_status<T: Transport>(state: &AppState<T>) -> LinkStatus {
    state.link.status()
}

pub fn device_state<T: Transport>(state: &AppState<T>) -> DeviceState {
    state.link.device_state()
}

/// Called by the host when the app becomes active.
pub fn app_foreground<T: Transport>(state: &AppState<T>) {
    state.lifecycle.on_signal(LifecycleSignal::Foreground);
}

pub fn app_background<T: Transport>(state: &AppState<T>) {
    state.lifecycle.on_signal(LifecycleSignal::Background);
}
