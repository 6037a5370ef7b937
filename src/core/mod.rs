//! Core functionality for the ACM link
//! This module contains the protocol codec, device state, link state machine and
//! Bluetooth transport.

pub mod bluetooth;
pub mod error;
pub mod lifecycle;
pub mod link;
pub mod protocol;
pub mod telemetry;

pub use bluetooth::{BluetoothManager, CommandDispatcher, LinkHandle, Transport};
pub use error::{AdapterState, CommandError, FrameError, LinkError};
pub use lifecycle::{LifecycleCoordinator, LifecycleSignal};
pub use link::{LinkStatus, PeripheralHandle};
pub use telemetry::DeviceState;
