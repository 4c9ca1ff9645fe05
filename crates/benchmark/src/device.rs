use serde::{Deserialize, Serialize};
use sysinfo::System;

/// Descriptor of the machine a benchmark ran on.
///
/// Serialized with the field names of the phone-oriented submission
/// payload: `brand_name`, `manufacturer`, `phone_model`, `total_ram`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Device {
    #[serde(rename = "brand_name")]
    pub os_name: String,
    #[serde(rename = "manufacturer")]
    pub os_version: String,
    #[serde(rename = "phone_model")]
    pub host_name: String,
    /// Total physical memory in MB.
    pub total_ram: u64,
}

impl Device {
    pub fn detect() -> Self {
        let mut sys = System::new();
        sys.refresh_memory();

        let device = Self {
            os_name: System::name().unwrap_or_else(|| "unknown".to_string()),
            os_version: System::os_version().unwrap_or_else(|| "unknown".to_string()),
            host_name: System::host_name().unwrap_or_else(|| "unknown".to_string()),
            total_ram: sys.total_memory() / (1024 * 1024),
        };
        tracing::debug!(?device, "device detected");
        device
    }
}
