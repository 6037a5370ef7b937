use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::bluetooth::{
    BLUETOOTH_OPERATION_TIMEOUT_SECS, DEVICE_NAME, RETRY_DELAY_MS, UUID_ACM_CHARACTERISTIC,
    UUID_ACM_SERVICE,
};

/// How the link finds and talks to the controller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LinkConfig {
    /// Advertised name that marks the controller during a scan
    pub device_name: String,
    pub service_uuid: Uuid,
    pub characteristic_uuid: Uuid,
    /// Wait between a lost or failed link and the next attempt
    pub retry_delay_ms: u64,
    /// Upper bound for connect, characteristic resolution and notification setup
    pub operation_timeout_secs: u64,
}

impl Default for LinkConfig {
    fn default() -> Self {
        LinkConfig {
            device_name: DEVICE_NAME.to_string(),
            service_uuid: UUID_ACM_SERVICE,
            characteristic_uuid: UUID_ACM_CHARACTERISTIC,
            retry_delay_ms: RETRY_DELAY_MS,
            operation_timeout_secs: BLUETOOTH_OPERATION_TIMEOUT_SECS,
        }
    }
}

impl LinkConfig {
    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn operation_timeout(&self) -> Duration {
        Duration::from_secs(self.operation_timeout_secs)
    }
}
