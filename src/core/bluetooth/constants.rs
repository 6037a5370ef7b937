//! Constants used throughout the link
//! UUIDs, the advertised name and timing defaults for the ACM controller.

use uuid::Uuid;

/// Advertised name of the ACM controller
pub const DEVICE_NAME: &str = "ESP32_ACM";

/// The UUID of the ACM service, also used to filter scans
pub const UUID_ACM_SERVICE: Uuid = Uuid::from_u128(0x4fafc201_1fb5_459e_8fcc_c5c9c331914b);

/// The UUID of the ACM characteristic (notify for telemetry, write for commands)
pub const UUID_ACM_CHARACTERISTIC: Uuid = Uuid::from_u128(0xbeb5483e_36e1_4688_b7f5_ea07361b26a8);

/// Delay before retrying a failed or lost link in milliseconds
pub const RETRY_DELAY_MS: u64 = 5000;

/// Timeout for connect, characteristic resolution and notification setup in seconds
pub const BLUETOOTH_OPERATION_TIMEOUT_SECS: u64 = 10;
