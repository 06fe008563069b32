//! Persisted device configuration.
//!
//! The monitor keeps its tunable settings in non-volatile storage and
//! re-reads them every cycle; downlink commands are the only writers.
//! Stores are plain key/value persistence with no cross-field
//! transactionality.

use chrono::{DateTime, Utc};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::constants::*;
use crate::error::Result;

/// The persisted settings of the monitor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Time between operating cycles in seconds
    pub tdc_seconds: u32,
    /// Measurement duration per polarity in ms
    pub measure_ms: u16,
    /// Fence voltage at full ADC scale
    pub fence_scale: u16,
    /// Battery-low threshold in mV
    pub battery_low_mv: u16,
    /// Consecutive low-battery cycles tolerated before deactivation
    pub battery_low_max_cycles: u8,
    /// Battery absolute minimum in mV, deactivates on the next cycle
    pub battery_min_mv: u16,
    /// Confirmed uplinks per day
    pub daily_confirmed: u8,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            tdc_seconds: INTERVAL_SECONDS,
            measure_ms: MEASURE_MS,
            fence_scale: MAXIMUM_FENCE_VOLTAGE,
            battery_low_mv: BATTERY_LOW_THRESHOLD,
            battery_low_max_cycles: BATTERY_LOW_MAX_CYCLES,
            battery_min_mv: BATTERY_ABSOLUTE_MINIMUM,
            daily_confirmed: DAILY_CONFIRMED_UPLINKS,
        }
    }
}

/// Non-volatile configuration storage.
pub trait ConfigStore {
    /// Read the stored configuration, falling back to defaults when nothing
    /// has been stored yet.
    fn load(&mut self) -> Result<DeviceConfig>;

    /// Persist the configuration.
    fn store(&mut self, config: &DeviceConfig) -> Result<()>;
}

/// Volatile store for tests and demos.
#[derive(Debug, Default)]
pub struct MemoryStore {
    config: DeviceConfig,
}

impl MemoryStore {
    pub fn new(config: DeviceConfig) -> Self {
        MemoryStore { config }
    }
}

impl ConfigStore for MemoryStore {
    fn load(&mut self) -> Result<DeviceConfig> {
        Ok(self.config.clone())
    }

    fn store(&mut self, config: &DeviceConfig) -> Result<()> {
        self.config = config.clone();
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ConfigFile {
    updated: DateTime<Utc>,
    config: DeviceConfig,
}

/// JSON-file-backed store.
///
/// A missing file yields the default configuration; an unreadable one is
/// reported and replaced on the next store.
#[derive(Debug)]
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonFileStore { path: path.into() }
    }
}

impl ConfigStore for JsonFileStore {
    fn load(&mut self) -> Result<DeviceConfig> {
        let text = match fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Ok(DeviceConfig::default());
            }
            Err(e) => return Err(e.into()),
        };

        match serde_json::from_str::<ConfigFile>(&text) {
            Ok(file) => Ok(file.config),
            Err(e) => {
                warn!("config file {} unreadable: {}", self.path.display(), e);
                Ok(DeviceConfig::default())
            }
        }
    }

    fn store(&mut self, config: &DeviceConfig) -> Result<()> {
        let file = ConfigFile {
            updated: Utc::now(),
            config: config.clone(),
        };
        fs::write(&self.path, serde_json::to_string_pretty(&file)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_match_factory_settings() {
        let config = DeviceConfig::default();
        assert_eq!(config.tdc_seconds, 300);
        assert_eq!(config.measure_ms, 6000);
        assert_eq!(config.fence_scale, 11850);
        assert_eq!(config.battery_low_mv, 3200);
        assert_eq!(config.battery_low_max_cycles, 5);
        assert_eq!(config.battery_min_mv, 3100);
        assert_eq!(config.daily_confirmed, 1);
    }

    #[test]
    fn test_memory_store_round_trip() {
        let mut store = MemoryStore::default();

        let mut config = store.load().unwrap();
        config.tdc_seconds = 3600;
        store.store(&config).unwrap();

        assert_eq!(store.load().unwrap().tdc_seconds, 3600);
    }

    #[test]
    fn test_json_store_missing_file_yields_defaults() {
        let mut store = JsonFileStore::new("/nonexistent/lofence-config.json");
        assert_eq!(store.load().unwrap(), DeviceConfig::default());
    }

    #[test]
    fn test_json_store_round_trip() {
        let path = std::env::temp_dir().join(format!(
            "lofence-config-test-{}.json",
            std::process::id()
        ));
        let mut store = JsonFileStore::new(&path);

        let mut config = DeviceConfig::default();
        config.battery_low_mv = 3300;
        config.daily_confirmed = 4;
        store.store(&config).unwrap();

        assert_eq!(store.load().unwrap(), config);
        let _ = fs::remove_file(&path);
    }
}
