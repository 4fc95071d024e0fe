use std::time::Duration;
use serde::{Deserialize, Serialize};

use crate::device::constants::{CONNECT_TIMEOUT, DISCOVERY_TIMEOUT, RECONNECT_DELAY, SCAN_TIMEOUT};
use crate::device::manager::Timeouts;
use crate::error::ConfigError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub scan_timeout_ms: u64,
    pub connect_timeout_ms: u64,
    pub discovery_timeout_ms: u64,
    // scan for the dice again after it disconnected
    pub reconnect: bool,
    pub reconnect_delay_ms: u64,
    // use the first adapter whose description contains this string
    pub adapter: Option<String>,
}

impl Config {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let timeouts = [
            ("scanTimeoutMs", self.scan_timeout_ms),
            ("connectTimeoutMs", self.connect_timeout_ms),
            ("discoveryTimeoutMs", self.discovery_timeout_ms),
        ];

        for (name, value) in timeouts {
            if value == 0 {
                return Err(ConfigError::Invalid(format!("{} must be greater than 0", name)));
            }
        }

        Ok(())
    }

    pub fn timeouts(&self) -> Timeouts {
        Timeouts {
            scan: Duration::from_millis(self.scan_timeout_ms),
            connect: Duration::from_millis(self.connect_timeout_ms),
            discovery: Duration::from_millis(self.discovery_timeout_ms),
        }
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            scan_timeout_ms: SCAN_TIMEOUT,
            connect_timeout_ms: CONNECT_TIMEOUT,
            discovery_timeout_ms: DISCOVERY_TIMEOUT,
            reconnect: true,
            reconnect_delay_ms: RECONNECT_DELAY,
            adapter: None,
        }
    }
}
