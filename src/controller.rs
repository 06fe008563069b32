//! The monitor's operating cycle.
//!
//! One iteration of [`FenceMonitor::run_cycle`] is one wake cycle: decide
//! whether to measure, transmit data, broadcast settings, report an error or
//! deactivate; apply downlink commands; evaluate the battery; compute the
//! next sleep. The protocol layer never mutates persisted state, it only
//! returns outcomes, so everything stateful lives here.

use log::{debug, error, info, warn};
use rand::Rng;
use std::thread;
use std::time::Duration;

use crate::config::{ConfigStore, DeviceConfig};
use crate::constants::*;
use crate::error::Result;
use crate::frames::{self, DownlinkCommand, SettingsPage};
use crate::protocol::La66;
use crate::transport::ModemPort;
use crate::types::{Downlink, Measurement};

/// Hardware capabilities the cycle controller consumes.
///
/// Raw ADC sampling, pin control and power management stay outside the core;
/// this trait is the seam they plug in through.
pub trait Board {
    /// Acquire one round of measurements using the active configuration.
    fn measure(&mut self, config: &DeviceConfig) -> Measurement;

    /// Low-power sleep for the given number of seconds.
    fn sleep_seconds(&mut self, seconds: u32);

    /// Cut power for good; the monitor will not run another cycle.
    fn halt(&mut self);

    fn set_idle_led(&mut self, _on: bool) {}
    fn set_measure_led(&mut self, _on: bool) {}
    fn set_tx_led(&mut self, _on: bool) {}
    fn toggle_tx_led(&mut self) {}

    /// Signal an unrecoverable join failure.
    ///
    /// A device that never reaches its network cannot repair that on its
    /// own; the default implementation blinks until an external reset.
    fn join_alarm(&mut self) {
        loop {
            self.toggle_tx_led();
            thread::sleep(Duration::from_millis(100));
        }
    }
}

/// Volatile per-day schedule state, reset conditions per the cycle rules.
#[derive(Debug, Clone, Default)]
pub struct CycleSchedule {
    /// Cycles completed since the daily counters were last reset
    pub daily_cycles: u32,
    /// Confirmed uplinks sent today
    pub confirmed_sent: u8,
    /// Remaining sleeps to halve around an interleaved settings uplink
    pub bisect: u8,
    /// Settings page due with the next uplink
    pub pending_page: Option<SettingsPage>,
    /// Consecutive cycles the battery has been low
    pub battery_low_count: u8,
    /// Error code recorded by the previous cycle
    pub last_error: Option<u8>,
    /// Deactivate at the start of the next cycle
    pub deactivate: bool,
}

/// Outcome of a single cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleStatus {
    /// Sleep this many seconds, then run the next cycle
    Continue(u32),
    /// The monitor deactivated itself; no further cycles
    Halted,
}

/// Top-level control loop of the fence monitor.
pub struct FenceMonitor<P: ModemPort, B: Board, C: ConfigStore, R: Rng> {
    la66: La66<P>,
    board: B,
    store: C,
    rng: R,
    schedule: CycleSchedule,
    measurement: Measurement,
}

impl<P: ModemPort, B: Board, C: ConfigStore, R: Rng> FenceMonitor<P, B, C, R> {
    pub fn new(la66: La66<P>, board: B, store: C, rng: R) -> Self {
        FenceMonitor {
            la66,
            board,
            store,
            rng,
            schedule: CycleSchedule::default(),
            measurement: Measurement::default(),
        }
    }

    pub fn schedule(&self) -> &CycleSchedule {
        &self.schedule
    }

    pub fn last_measurement(&self) -> Measurement {
        self.measurement
    }

    pub fn board_mut(&mut self) -> &mut B {
        &mut self.board
    }

    pub fn store_mut(&mut self) -> &mut C {
        &mut self.store
    }

    /// Bring up the modem and join the network.
    ///
    /// A join failure here is unrecoverable: the modem is powered down and
    /// the board alarm takes over. Once joined, the network clock is synced
    /// best-effort.
    pub fn startup(&mut self) -> Result<()> {
        info!("activating LA66 module");
        self.la66.reset()?;

        info!("waiting to join network");
        let joined = {
            let Self { la66, board, .. } = self;
            board.set_tx_led(true);
            let mut blink = || board.toggle_tx_led();
            la66.wait_for_join(Some(&mut blink))
        };

        if let Err(e) = joined {
            error!("unable to join network: {}", e);
            let _ = self.la66.deactivate();
            self.board.join_alarm();
            return Err(e);
        }
        self.board.set_tx_led(false);

        match self.la66.sync_time() {
            Ok(()) => match self.la66.local_time() {
                Ok(time) => info!("modem clock: {}", time),
                Err(e) => debug!("clock readback failed: {}", e),
            },
            Err(e) => warn!("time sync failed: {}", e),
        }

        Ok(())
    }

    /// Run cycles until the monitor deactivates itself.
    pub fn run(&mut self) -> Result<()> {
        self.startup()?;

        loop {
            match self.run_cycle()? {
                CycleStatus::Continue(seconds) => {
                    info!("sleeping for {} seconds", seconds);
                    self.board.set_idle_led(true);
                    self.board.sleep_seconds(seconds);
                    self.board.set_idle_led(false);
                }
                CycleStatus::Halted => return Ok(()),
            }
        }
    }

    /// Execute one wake cycle.
    pub fn run_cycle(&mut self) -> Result<CycleStatus> {
        let mut config = self.store.load()?;

        if self.schedule.deactivate {
            self.deactivate_cycle();
            return Ok(CycleStatus::Halted);
        }

        if let Some(code) = self.schedule.last_error {
            self.recovery_cycle(code, &mut config)?;
        } else if let Some(page) = self.schedule.pending_page {
            self.settings_cycle(page, &mut config)?;
        } else {
            self.measurement_cycle(&mut config)?;
        }

        self.check_battery(&config);
        self.advance_day(&config);

        Ok(CycleStatus::Continue(self.next_sleep(&config)))
    }

    /// Regular cycle: update the settings schedule, measure, transmit.
    fn measurement_cycle(&mut self, config: &mut DeviceConfig) -> Result<()> {
        let daily_max = daily_cycle_max(config);

        if let Some(page) = self.due_settings_page(daily_max) {
            debug!("settings page {} due this cycle", page.index());
            self.schedule.pending_page = Some(page);
            self.schedule.bisect = 2;
        }

        info!("measuring");
        self.board.set_measure_led(true);
        self.measurement = self.board.measure(config);
        self.board.set_measure_led(false);
        info!(
            "battery {} mV, fence +{} V / -{} V",
            self.measurement.battery_mv, self.measurement.fence_plus, self.measurement.fence_minus
        );

        let confirm = self.confirmed_due(config, daily_max);
        let payload = frames::encode_measurement(&self.measurement);
        if self.transmit_frame(PORT_MEASUREMENT, confirm, &payload, config)? && confirm {
            self.schedule.confirmed_sent = self.schedule.confirmed_sent.saturating_add(1);
        }

        Ok(())
    }

    /// Broadcast the pending settings page.
    fn settings_cycle(&mut self, page: SettingsPage, config: &mut DeviceConfig) -> Result<()> {
        info!("transmitting settings page {}", page.index());

        let payload = frames::encode_settings_page(page, config);
        self.transmit_frame(PORT_SETTINGS, false, &payload, config)?;
        self.schedule.pending_page = None;

        Ok(())
    }

    /// Recover from an error recorded by the previous cycle: full modem
    /// reset, rejoin, and a confirmed error report.
    fn recovery_cycle(&mut self, code: u8, config: &mut DeviceConfig) -> Result<()> {
        warn!("recovering from error {}", code);

        if let Err(e) = self.la66.reset() {
            self.schedule.last_error = Some(e.code());
            return Ok(());
        }
        if let Err(e) = self.la66.wait_for_join(None) {
            warn!("rejoin failed: {}", e);
            self.schedule.last_error = Some(e.code());
            return Ok(());
        }

        let payload = frames::encode_error(code);
        if self.transmit_frame(PORT_ERROR, true, &payload, config)? {
            self.schedule.last_error = None;
        }

        Ok(())
    }

    /// Final cycle: report a zero battery voltage, then power down for good.
    fn deactivate_cycle(&mut self) {
        warn!("battery exhausted, deactivating");

        // keep the last fence values so the final uplink does not read as a
        // fence fault
        self.measurement.battery_mv = 0;
        let payload = frames::encode_measurement(&self.measurement);
        if let Err(e) = self.la66.transmit(PORT_MEASUREMENT, true, &payload) {
            warn!("final uplink failed: {}", e);
        }

        self.board.set_idle_led(false);
        self.board.set_measure_led(false);
        self.board.set_tx_led(false);
        let _ = self.la66.deactivate();
        self.board.halt();
    }

    /// Transmit one frame and apply any downlink it returns.
    ///
    /// Protocol failures are recorded for the next cycle rather than
    /// propagated; the return value says whether the transmission completed.
    fn transmit_frame(
        &mut self,
        fport: u8,
        confirm: bool,
        payload: &[u8],
        config: &mut DeviceConfig,
    ) -> Result<bool> {
        self.board.set_tx_led(true);
        let result = self.la66.transmit(fport, confirm, payload);
        self.board.set_tx_led(false);

        match result {
            Ok(Some(downlink)) => {
                self.handle_downlink(&downlink, config)?;
                Ok(true)
            }
            Ok(None) => Ok(true),
            Err(e) => {
                warn!("transmission failed: {}", e);
                self.schedule.last_error = Some(e.code());
                Ok(false)
            }
        }
    }

    /// Decode and apply a downlink command.
    ///
    /// Zero values restore the compile-time default of the field.
    fn handle_downlink(&mut self, downlink: &Downlink, config: &mut DeviceConfig) -> Result<()> {
        let Some(command) = DownlinkCommand::parse(&downlink.data) else {
            debug!(
                "ignoring unrecognized downlink: {}",
                hex::encode_upper(&downlink.data)
            );
            return Ok(());
        };
        info!("downlink command on port {}: {:?}", downlink.port, command);

        let mut changed = true;
        match command {
            DownlinkCommand::SetDutyCycle(seconds) => {
                config.tdc_seconds = if seconds == 0 { INTERVAL_SECONDS } else { seconds };
                self.schedule.daily_cycles = 0;
                self.schedule.confirmed_sent = 0;
            }
            DownlinkCommand::SetMeasureMs(ms) => {
                config.measure_ms = if ms == 0 { MEASURE_MS } else { ms };
            }
            DownlinkCommand::SetFenceScale(volts) => {
                config.fence_scale = if volts == 0 { MAXIMUM_FENCE_VOLTAGE } else { volts };
            }
            DownlinkCommand::SetBatteryLow(mv) => {
                config.battery_low_mv = if mv == 0 { BATTERY_LOW_THRESHOLD } else { mv };
            }
            DownlinkCommand::SetBatteryLowMaxCycles(cycles) => {
                config.battery_low_max_cycles = if cycles == 0 {
                    BATTERY_LOW_MAX_CYCLES
                } else {
                    cycles
                };
            }
            DownlinkCommand::SetBatteryMin(mv) => {
                config.battery_min_mv = if mv == 0 { BATTERY_ABSOLUTE_MINIMUM } else { mv };
            }
            DownlinkCommand::SetDailyConfirmed(count) => {
                config.daily_confirmed = if count == 0 {
                    DAILY_CONFIRMED_UPLINKS
                } else {
                    count
                };
            }
            DownlinkCommand::ResetModem => {
                changed = false;
                if let Err(e) = self.la66.reset() {
                    self.schedule.last_error = Some(e.code());
                }
            }
            DownlinkCommand::RequestSettings(page) => {
                changed = false;
                self.schedule.pending_page = Some(page);
                self.schedule.bisect = 2;
            }
        }

        if changed {
            self.store.store(config)?;
        }
        Ok(())
    }

    /// Which settings page, if any, is due at the current daily position.
    fn due_settings_page(&self, daily_max: u32) -> Option<SettingsPage> {
        let cycles = self.schedule.daily_cycles;
        if cycles == daily_max / 4 {
            Some(SettingsPage::Timing)
        } else if cycles == daily_max / 2 {
            Some(SettingsPage::Thresholds)
        } else if cycles == daily_max * 3 / 4 {
            Some(SettingsPage::Schedule)
        } else {
            None
        }
    }

    /// Whether this cycle's uplink must be confirmed.
    fn confirmed_due(&self, config: &DeviceConfig, daily_max: u32) -> bool {
        let confirmed = u32::from(config.daily_confirmed);
        if confirmed == 0 {
            return false;
        }
        if daily_max <= confirmed {
            return true;
        }

        let next = u32::from(self.schedule.confirmed_sent) + 1;
        self.schedule.daily_cycles + 1 >= (daily_max / confirmed) * next
    }

    /// Battery hysteresis, evaluated every cycle.
    ///
    /// Deactivation is postponed to the next cycle because it triggers an
    /// uplink with zero battery voltage; doing so right after a real
    /// measurement could be problematic.
    fn check_battery(&mut self, config: &DeviceConfig) {
        let voltage = self.measurement.battery_mv;
        let schedule = &mut self.schedule;

        if schedule.battery_low_count < config.battery_low_max_cycles
            && voltage > config.battery_min_mv
            && voltage < config.battery_low_mv
        {
            schedule.battery_low_count += 1;
        } else if voltage <= config.battery_min_mv {
            schedule.deactivate = true;
        } else if schedule.battery_low_count >= config.battery_low_max_cycles
            && voltage < config.battery_low_mv
        {
            schedule.deactivate = true;
        }
    }

    /// Advance the daily counter, wrapping at the computed maximum.
    fn advance_day(&mut self, config: &DeviceConfig) {
        self.schedule.daily_cycles += 1;
        if self.schedule.daily_cycles >= daily_cycle_max(config) {
            self.schedule.daily_cycles = 0;
            self.schedule.confirmed_sent = 0;
        }
    }

    /// Sleep duration for the coming pause.
    ///
    /// The interval is halved while a settings broadcast is being
    /// interleaved. Jitter desynchronizes neighboring devices; it is halved
    /// while bisecting and dropped when it would exceed a third of the
    /// sleep.
    fn next_sleep(&mut self, config: &DeviceConfig) -> u32 {
        let mut seconds = config.tdc_seconds;
        let bisecting = self.schedule.bisect > 0;
        if bisecting {
            seconds /= 2;
            self.schedule.bisect -= 1;
        }

        let mut jitter = self.rng.gen_range(-RANDOMNESS..=RANDOMNESS);
        if bisecting {
            jitter /= 2;
        }
        if jitter.unsigned_abs() > seconds / 3 {
            jitter = 0;
        }

        seconds.saturating_add_signed(jitter)
    }
}

fn daily_cycle_max(config: &DeviceConfig) -> u32 {
    (SECONDS_PER_DAY / config.tdc_seconds.max(1)).max(1)
}
