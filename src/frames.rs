//! Application payload encoding and decoding.
//!
//! Uplink frames are raw byte payloads handed to the modem, which carries
//! them hex-encoded over the serial link:
//!
//! ```text
//! measurement (fPort 1): battery mV | fence+ V | fence- V   (3 x u16 BE)
//! settings    (fPort 2): version | page fields              (see below)
//! error       (fPort 3): error code                         (1 byte)
//! ```
//!
//! Downlinks select a configuration command with their first byte; the
//! remaining bytes are command-specific big-endian fields. Unknown command
//! bytes and wrong payload lengths are ignored.

use crate::config::DeviceConfig;
use crate::constants::*;
use crate::types::Measurement;

/// One of the periodically broadcast configuration pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SettingsPage {
    /// Duty cycle and measurement duration
    Timing,
    /// Fence scale and battery thresholds
    Thresholds,
    /// Cycle caps and confirmed-uplink schedule
    Schedule,
}

impl SettingsPage {
    /// Map a downlink page index (1-based) onto a page.
    pub fn from_index(index: u8) -> Option<SettingsPage> {
        match index {
            1 => Some(SettingsPage::Timing),
            2 => Some(SettingsPage::Thresholds),
            3 => Some(SettingsPage::Schedule),
            _ => None,
        }
    }

    pub fn index(&self) -> u8 {
        match self {
            SettingsPage::Timing => 1,
            SettingsPage::Thresholds => 2,
            SettingsPage::Schedule => 3,
        }
    }
}

/// Encode a measurement frame.
pub fn encode_measurement(measurement: &Measurement) -> Vec<u8> {
    let mut frame = Vec::with_capacity(6);
    frame.extend_from_slice(&measurement.battery_mv.to_be_bytes());
    frame.extend_from_slice(&measurement.fence_plus.to_be_bytes());
    frame.extend_from_slice(&measurement.fence_minus.to_be_bytes());
    frame
}

/// Encode a settings page from the active configuration.
pub fn encode_settings_page(page: SettingsPage, config: &DeviceConfig) -> Vec<u8> {
    let mut frame = vec![SETTINGS_VERSION];
    match page {
        SettingsPage::Timing => {
            // duty cycle travels as 3 bytes, like the downlink that sets it
            frame.extend_from_slice(&config.tdc_seconds.to_be_bytes()[1..]);
            frame.extend_from_slice(&config.measure_ms.to_be_bytes());
        }
        SettingsPage::Thresholds => {
            frame.extend_from_slice(&config.fence_scale.to_be_bytes());
            frame.extend_from_slice(&config.battery_low_mv.to_be_bytes());
            frame.extend_from_slice(&config.battery_min_mv.to_be_bytes());
        }
        SettingsPage::Schedule => {
            frame.push(config.battery_low_max_cycles);
            frame.push(config.daily_confirmed);
        }
    }
    frame
}

/// Encode an error-report frame.
pub fn encode_error(code: u8) -> Vec<u8> {
    vec![code]
}

/// A decoded downlink configuration command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownlinkCommand {
    /// Transmit duty cycle in seconds
    SetDutyCycle(u32),
    /// Measurement duration per polarity in ms
    SetMeasureMs(u16),
    /// Fence voltage at full ADC scale
    SetFenceScale(u16),
    /// Battery-low threshold in mV
    SetBatteryLow(u16),
    /// Consecutive low-battery cycles before deactivation
    SetBatteryLowMaxCycles(u8),
    /// Battery absolute minimum in mV
    SetBatteryMin(u16),
    /// Confirmed uplinks per day
    SetDailyConfirmed(u8),
    /// Reset the modem
    ResetModem,
    /// Broadcast a settings page with the next uplink
    RequestSettings(SettingsPage),
}

impl DownlinkCommand {
    /// Decode a downlink payload.
    ///
    /// Returns `None` for unknown command bytes, wrong payload lengths and
    /// out-of-range page requests; such downlinks are silently dropped.
    pub fn parse(data: &[u8]) -> Option<DownlinkCommand> {
        let command = *data.first()?;

        match (command, data.len()) {
            (CMD_SET_TDC, 4) => Some(DownlinkCommand::SetDutyCycle(u32::from_be_bytes([
                0, data[1], data[2], data[3],
            ]))),
            (CMD_SET_MEASURE_MS, 3) => Some(DownlinkCommand::SetMeasureMs(u16::from_be_bytes([
                data[1], data[2],
            ]))),
            (CMD_SET_FENCE_SCALE, 3) => Some(DownlinkCommand::SetFenceScale(u16::from_be_bytes([
                data[1], data[2],
            ]))),
            (CMD_SET_BATTERY_LOW, 3) => Some(DownlinkCommand::SetBatteryLow(u16::from_be_bytes([
                data[1], data[2],
            ]))),
            (CMD_SET_BATTERY_LOW_CYCLES, 2) => {
                Some(DownlinkCommand::SetBatteryLowMaxCycles(data[1]))
            }
            (CMD_SET_BATTERY_MIN, 3) => Some(DownlinkCommand::SetBatteryMin(u16::from_be_bytes([
                data[1], data[2],
            ]))),
            (CMD_SET_DAILY_CONFIRMED, 2) => Some(DownlinkCommand::SetDailyConfirmed(data[1])),
            (CMD_MODEM_RESET, 1) => Some(DownlinkCommand::ResetModem),
            (CMD_REQUEST_SETTINGS, 2) => {
                SettingsPage::from_index(data[1]).map(DownlinkCommand::RequestSettings)
            }
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_frame_hex_round_trip() {
        let measurement = Measurement {
            battery_mv: 3350,
            fence_plus: 11000,
            fence_minus: 500,
        };

        let frame = encode_measurement(&measurement);
        assert_eq!(hex::encode_upper(&frame), "0D162AF801F4");

        let decoded = hex::decode("0D162AF801F4").unwrap();
        assert_eq!(decoded, frame);
        assert_eq!(u16::from_be_bytes([decoded[0], decoded[1]]), 3350);
        assert_eq!(u16::from_be_bytes([decoded[2], decoded[3]]), 11000);
        assert_eq!(u16::from_be_bytes([decoded[4], decoded[5]]), 500);
    }

    #[test]
    fn test_settings_page_timing() {
        let config = DeviceConfig {
            tdc_seconds: 3600,
            measure_ms: 6000,
            ..DeviceConfig::default()
        };

        let frame = encode_settings_page(SettingsPage::Timing, &config);
        assert_eq!(frame, vec![SETTINGS_VERSION, 0x00, 0x0E, 0x10, 0x17, 0x70]);
    }

    #[test]
    fn test_settings_page_thresholds() {
        let config = DeviceConfig::default();

        let frame = encode_settings_page(SettingsPage::Thresholds, &config);
        assert_eq!(frame[0], SETTINGS_VERSION);
        assert_eq!(u16::from_be_bytes([frame[1], frame[2]]), MAXIMUM_FENCE_VOLTAGE);
        assert_eq!(u16::from_be_bytes([frame[3], frame[4]]), BATTERY_LOW_THRESHOLD);
        assert_eq!(u16::from_be_bytes([frame[5], frame[6]]), BATTERY_ABSOLUTE_MINIMUM);
    }

    #[test]
    fn test_settings_page_schedule() {
        let config = DeviceConfig::default();

        let frame = encode_settings_page(SettingsPage::Schedule, &config);
        assert_eq!(
            frame,
            vec![SETTINGS_VERSION, BATTERY_LOW_MAX_CYCLES, DAILY_CONFIRMED_UPLINKS]
        );
    }

    #[test]
    fn test_error_frame() {
        assert_eq!(encode_error(6), vec![6]);
    }

    #[test]
    fn test_parse_duty_cycle() {
        let command = DownlinkCommand::parse(&[0x01, 0x00, 0x0E, 0x10]).unwrap();
        assert_eq!(command, DownlinkCommand::SetDutyCycle(3600));
    }

    #[test]
    fn test_parse_threshold_commands() {
        assert_eq!(
            DownlinkCommand::parse(&[0x10, 0x17, 0x70]),
            Some(DownlinkCommand::SetMeasureMs(6000))
        );
        assert_eq!(
            DownlinkCommand::parse(&[0x11, 0x2E, 0x4A]),
            Some(DownlinkCommand::SetFenceScale(11850))
        );
        assert_eq!(
            DownlinkCommand::parse(&[0x12, 0x0C, 0x80]),
            Some(DownlinkCommand::SetBatteryLow(3200))
        );
        assert_eq!(
            DownlinkCommand::parse(&[0x13, 0x05]),
            Some(DownlinkCommand::SetBatteryLowMaxCycles(5))
        );
        assert_eq!(
            DownlinkCommand::parse(&[0x14, 0x0C, 0x1C]),
            Some(DownlinkCommand::SetBatteryMin(3100))
        );
        assert_eq!(
            DownlinkCommand::parse(&[0x15, 0x02]),
            Some(DownlinkCommand::SetDailyConfirmed(2))
        );
    }

    #[test]
    fn test_parse_modem_reset() {
        assert_eq!(DownlinkCommand::parse(&[0x30]), Some(DownlinkCommand::ResetModem));
    }

    #[test]
    fn test_parse_settings_request_validates_page() {
        assert_eq!(
            DownlinkCommand::parse(&[0xFF, 0x02]),
            Some(DownlinkCommand::RequestSettings(SettingsPage::Thresholds))
        );
        assert_eq!(DownlinkCommand::parse(&[0xFF, 0x00]), None);
        assert_eq!(DownlinkCommand::parse(&[0xFF, 0x04]), None);
    }

    #[test]
    fn test_parse_rejects_wrong_lengths() {
        assert_eq!(DownlinkCommand::parse(&[0x01, 0x0E, 0x10]), None);
        assert_eq!(DownlinkCommand::parse(&[0x10, 0x17]), None);
        assert_eq!(DownlinkCommand::parse(&[0x13, 0x05, 0x00]), None);
        assert_eq!(DownlinkCommand::parse(&[0x30, 0x01]), None);
    }

    #[test]
    fn test_parse_rejects_unknown_commands() {
        assert_eq!(DownlinkCommand::parse(&[0x02, 0x00]), None);
        assert_eq!(DownlinkCommand::parse(&[0x42]), None);
        assert_eq!(DownlinkCommand::parse(&[]), None);
    }
}
