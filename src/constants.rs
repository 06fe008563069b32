//! Protocol constants for the Dragino LA66 serial link.
//!
//! This module defines the constants used by the LA66 AT-command protocol
//! and the monitor's operating cycle: response tokens, timing parameters,
//! serial port configuration and factory-default settings.

use std::time::Duration;

/// Response terminating a successful command
pub const AT_OK: &str = "OK";

/// Generic command failure
pub const AT_ERROR: &str = "AT_ERROR";

/// Invalid parameter in a command
pub const AT_PARAM_ERROR: &str = "AT_PARAM_ERROR";

/// All configured frequency channels busy, retry later
pub const AT_BUSY_ERROR: &str = "AT_BUSY_ERROR";

/// Tried to transmit without a joined network
pub const AT_NO_NET_JOINED: &str = "AT_NO_NET_JOINED";

/// Unsolicited notification once the network join completes
pub const AT_JOINED: &str = "JOINED";

/// Radio finished transmitting an uplink
pub const AT_TX_DONE: &str = "txDone";

/// A downlink arrived in one of the receive windows
pub const AT_RX_DONE: &str = "rxDone";

/// A receive window closed without a downlink
pub const AT_RX_TIMEOUT: &str = "rxTimeout";

/// Network time synchronization completed
pub const AT_SYNC_TIME_OK: &str = "Sync time ok";

/// Maximum length of a single response line, matching the LA66 buffer
pub const MAX_LINE: usize = 236;

/// Baud rate of the LA66 UART (9600 bps)
pub const BAUD_RATE: u32 = 9600;

/// Per-character read timeout on the serial port
pub const CHAR_TIMEOUT: Duration = Duration::from_millis(50);

/// Interval between polls of the receive line
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Quiet period required when draining stale input
pub const CLEAR_QUIET: Duration = Duration::from_millis(100);

/// Time the reset line is held low to restart the module
pub const RESET_HOLD: Duration = Duration::from_millis(100);

/// Boot time after releasing the reset line
pub const RESET_SETTLE: Duration = Duration::from_secs(1);

/// Heartbeat sub-interval while waiting for the network join
pub const JOIN_HEARTBEAT: Duration = Duration::from_secs(1);

/// fPort carrying measurement frames
pub const PORT_MEASUREMENT: u8 = 1;

/// fPort carrying settings-page frames
pub const PORT_SETTINGS: u8 = 2;

/// fPort carrying error-report frames
pub const PORT_ERROR: u8 = 3;

/// Version byte leading every settings page
pub const SETTINGS_VERSION: u8 = 11;

/// Downlink command: set transmit duty cycle (3-byte seconds)
pub const CMD_SET_TDC: u8 = 0x01;

/// Downlink command: set measurement duration per polarity (u16 ms)
pub const CMD_SET_MEASURE_MS: u8 = 0x10;

/// Downlink command: set full-scale fence voltage (u16 V)
pub const CMD_SET_FENCE_SCALE: u8 = 0x11;

/// Downlink command: set battery-low threshold (u16 mV)
pub const CMD_SET_BATTERY_LOW: u8 = 0x12;

/// Downlink command: set battery-low cycle cap (u8)
pub const CMD_SET_BATTERY_LOW_CYCLES: u8 = 0x13;

/// Downlink command: set battery absolute minimum (u16 mV)
pub const CMD_SET_BATTERY_MIN: u8 = 0x14;

/// Downlink command: set daily confirmed-uplink count (u8)
pub const CMD_SET_DAILY_CONFIRMED: u8 = 0x15;

/// Downlink command: reset the modem
pub const CMD_MODEM_RESET: u8 = 0x30;

/// Downlink command: request a settings page with the next uplink
pub const CMD_REQUEST_SETTINGS: u8 = 0xFF;

/// Highest valid settings-page index
pub const SETTINGS_PAGE_MAX: u8 = 3;

/// Default time between operating cycles in seconds
pub const INTERVAL_SECONDS: u32 = 5 * 60;

/// Default uplinks to send confirmed per day
pub const DAILY_CONFIRMED_UPLINKS: u8 = 1;

/// Sleep jitter bound in seconds, applied as +-
pub const RANDOMNESS: i32 = 5;

/// Default time in ms a measurement takes per polarity
pub const MEASURE_MS: u16 = 6000;

/// Default fence voltage at full ADC scale, depends on the
/// actual divider resistor values (12 kV is the theoretical limit)
pub const MAXIMUM_FENCE_VOLTAGE: u16 = 11850;

/// Default battery-low threshold voltage in mV
pub const BATTERY_LOW_THRESHOLD: u16 = 3200;

/// Default number of consecutive low-battery cycles before deactivation
pub const BATTERY_LOW_MAX_CYCLES: u8 = 5;

/// Battery voltage in mV which forces deactivation on the next cycle
pub const BATTERY_ABSOLUTE_MINIMUM: u16 = 3100;

/// Cycles per day are derived from this span and the duty cycle
pub const SECONDS_PER_DAY: u32 = 86_400;
