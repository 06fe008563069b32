//! # LoFence Monitor Library
//!
//! A Rust library for a battery-powered electric-fence monitor that reports
//! fence and battery voltage over LoRaWAN through a Dragino LA66 modem
//! attached via serial.
//!
//! ## Features
//!
//! - LA66 AT-command protocol driver (query, join, confirmed/unconfirmed
//!   uplinks, downlink retrieval, network time sync)
//! - Operating-cycle controller with recurring settings broadcasts, a
//!   confirmed-uplink schedule and low-battery hysteresis
//! - Downlink-driven reconfiguration persisted across power cycles
//! - Hardware access behind small traits, so everything runs against test
//!   doubles
//!
//! ## Example
//!
//! ```no_run
//! use lofence::{FenceMonitor, JsonFileStore, La66};
//!
//! # struct MyBoard;
//! # impl lofence::Board for MyBoard {
//! #     fn measure(&mut self, _: &lofence::DeviceConfig) -> lofence::Measurement {
//! #         lofence::Measurement::default()
//! #     }
//! #     fn sleep_seconds(&mut self, _: u32) {}
//! #     fn halt(&mut self) {}
//! # }
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let la66 = La66::open("/dev/ttyUSB0")?;
//!     let store = JsonFileStore::new("lofence-config.json");
//!     let mut monitor = FenceMonitor::new(la66, MyBoard, store, rand::thread_rng());
//!     monitor.run()?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod constants;
pub mod controller;
pub mod error;
pub mod frames;
pub mod protocol;
pub mod transport;
pub mod types;

pub use config::{ConfigStore, DeviceConfig, JsonFileStore, MemoryStore};
pub use controller::{Board, CycleSchedule, CycleStatus, FenceMonitor};
pub use error::{La66Error, Result};
pub use frames::{DownlinkCommand, SettingsPage};
pub use protocol::{La66, Timeouts};
pub use transport::{LineTransport, ModemPort};
pub use types::{AtToken, Downlink, Measurement};
