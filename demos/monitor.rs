//! Monitor Demo
//!
//! Runs the full operating cycle against a real LA66 modem on a serial
//! port, with a simulated measurement board. Useful for bench-testing the
//! LoRaWAN side (join, uplinks, downlink reconfiguration) before the
//! analog front end exists.
//!
//! Usage:
//!   cargo run --example monitor                  # Interactive port selection
//!   cargo run --example monitor -- /dev/ttyUSB0  # Specify port
//!
//! Set RUST_LOG to control logging:
//!   RUST_LOG=debug cargo run --example monitor

use inquire::Select;
use lofence::{Board, DeviceConfig, FenceMonitor, JsonFileStore, La66, Measurement, Result};
use rand::Rng;
use std::thread;
use std::time::Duration;

/// Interactive serial port selection using inquire
fn select_port() -> Result<String> {
    let ports = La66::list_ports()?;

    if ports.is_empty() {
        eprintln!("No serial ports found!");
        std::process::exit(1);
    }

    let port_names: Vec<String> = ports
        .iter()
        .map(|p| format!("{} - {:?}", p.port_name, p.port_type))
        .collect();

    let selection = Select::new("Select a serial port:", port_names)
        .prompt()
        .map_err(|e| {
            std::io::Error::new(
                std::io::ErrorKind::Other,
                format!("Selection cancelled: {}", e),
            )
        })?;

    // Extract just the port name (before " - ")
    let port_name = selection.split(" - ").next().unwrap().to_string();
    Ok(port_name)
}

/// Bench board: plausible readings instead of a real analog front end.
struct BenchBoard {
    battery_mv: u16,
}

impl Board for BenchBoard {
    fn measure(&mut self, _config: &DeviceConfig) -> Measurement {
        let mut rng = rand::thread_rng();
        // the battery drains a little every cycle
        self.battery_mv = self.battery_mv.saturating_sub(rng.gen_range(0..3));
        Measurement {
            battery_mv: self.battery_mv,
            fence_plus: rng.gen_range(9_500..11_500),
            fence_minus: rng.gen_range(200..800),
        }
    }

    fn sleep_seconds(&mut self, seconds: u32) {
        thread::sleep(Duration::from_secs(seconds.into()));
    }

    fn halt(&mut self) {
        println!("Monitor deactivated, exiting.");
        std::process::exit(0);
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let port_name = std::env::args()
        .nth(1)
        .map(Ok)
        .unwrap_or_else(select_port)?;

    println!("Connecting to LA66 on {}...", port_name);
    let la66 = La66::open(&port_name)?;

    let board = BenchBoard { battery_mv: 3600 };
    let store = JsonFileStore::new("lofence-config.json");
    let mut monitor = FenceMonitor::new(la66, board, store, rand::thread_rng());

    monitor.run()
}
