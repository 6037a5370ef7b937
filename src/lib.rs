//! ACM link library
//! BLE link to the ACM vehicle accessory controller: connection lifecycle, telemetry
//! decoding and control commands.

// Module declarations
pub mod commands;
pub mod config;
pub mod core;
pub mod logging;
pub mod state;
pub mod utils;

pub use config::{AppConfig, LinkConfig};
pub use state::AppState;
