//! Runtime options for quirked device instances.

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

const DEFAULT_WRITE_TIMEOUT_MS: u64 = 5000;
const DEFAULT_BUS_CAPACITY: usize = 16;
const DEFAULT_UPDATE_BUFFER: usize = 32;

fn default_write_timeout_ms() -> u64 {
    DEFAULT_WRITE_TIMEOUT_MS
}

fn default_bus_capacity() -> usize {
    DEFAULT_BUS_CAPACITY
}

fn default_update_buffer() -> usize {
    DEFAULT_UPDATE_BUFFER
}

/// Per-device tunables. Every field has a default, so `{}` is a valid
/// JSON configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceOptions {
    /// How long an outbound command may wait for the transport
    #[serde(default = "default_write_timeout_ms")]
    pub write_timeout_ms: u64,
    /// Maximum listeners per bus channel
    #[serde(default = "default_bus_capacity")]
    pub bus_capacity: usize,
    /// Attribute updates buffered per observer before it lags
    #[serde(default = "default_update_buffer")]
    pub update_buffer: usize,
    /// Local offset added to UTC in time sync answers
    #[serde(default)]
    pub utc_offset_secs: i32,
}

impl Default for DeviceOptions {
    fn default() -> Self {
        Self {
            write_timeout_ms: DEFAULT_WRITE_TIMEOUT_MS,
            bus_capacity: DEFAULT_BUS_CAPACITY,
            update_buffer: DEFAULT_UPDATE_BUFFER,
            utc_offset_secs: 0,
        }
    }
}

impl DeviceOptions {
    pub fn write_timeout(&self) -> Duration {
        Duration::from_millis(self.write_timeout_ms)
    }

    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout_ms = timeout.as_millis() as u64;
        self
    }

    pub fn with_utc_offset(mut self, secs: i32) -> Self {
        self.utc_offset_secs = secs;
        self
    }

    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_json(&text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_object_yields_defaults() {
        assert_eq!(DeviceOptions::from_json("{}").unwrap(), DeviceOptions::default());
    }

    #[test]
    fn partial_override() {
        let opts = DeviceOptions::from_json(r#"{"write_timeout_ms": 250, "utc_offset_secs": 3600}"#).unwrap();
        assert_eq!(opts.write_timeout(), Duration::from_millis(250));
        assert_eq!(opts.utc_offset_secs, 3600);
        assert_eq!(opts.bus_capacity, 16);
    }

    #[test]
    fn bad_json_is_reported() {
        assert!(matches!(
            DeviceOptions::from_json("{"),
            Err(crate::error::QuirkError::Json(_))
        ));
    }
}
