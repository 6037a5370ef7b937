//! Bluetooth link to the ACM controller
//! The transport boundary, the task that drives the link state machine, the command
//! path and the bluest-backed implementation used on real hardware.

mod commands;
mod connection;
mod constants;
mod manager;
mod notification;
mod scanner;
mod transport;
mod types;

// Re-export types that should be publicly accessible
pub use commands::CommandDispatcher;
pub use connection::BluestTransport;
pub use constants::*; // Re-export all constants
pub use manager::{BluetoothManager, LinkHandle};
pub use notification::NotificationHandler;
pub use scanner::BluetoothScanner;
pub use transport::{EventSender, Transport};
pub use types::ConnectedDeviceState;

#[cfg(test)]
pub(crate) use transport::testing;
