//! Power-delivery counters and the readings derived from them.

use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::counter::{read_counter, CounterPath, CounterSource};
use crate::error::CounterError;

pub const POWER_SUPPLY_PATH: &str = "/sys/class/power_supply";
pub const USB_SUPPLY: &str = "usb";
pub const BATTERY_SUPPLY: &str = "battery";

const MICRO: f64 = 1_000_000.0;

/// One instantaneous reading of the four power-delivery counters.
///
/// Currents are in microamps, voltages in microvolts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PowerReading {
    pub usb_current_ua: i64,
    pub usb_voltage_uv: i64,
    pub battery_current_ua: i64,
    pub battery_voltage_uv: i64,
}

impl PowerReading {
    /// Combined USB and battery power in watts.
    pub fn watts(&self) -> f64 {
        (self.usb_current_ua as f64 / MICRO) * (self.usb_voltage_uv as f64 / MICRO)
            + (self.battery_current_ua as f64 / MICRO) * (self.battery_voltage_uv as f64 / MICRO)
    }
}

/// Where the four power counters live.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PowerCounters {
    pub usb_current: CounterPath,
    pub usb_voltage: CounterPath,
    pub battery_current: CounterPath,
    pub battery_voltage: CounterPath,
}

impl Default for PowerCounters {
    fn default() -> Self {
        Self::with_supplies(POWER_SUPPLY_PATH, USB_SUPPLY, BATTERY_SUPPLY)
    }
}

impl PowerCounters {
    /// Counters for the named supplies under `root`.
    ///
    /// Only the USB current has an alternate node (`input_current_now`),
    /// which some devices populate instead of `current_now`.
    pub fn with_supplies(root: impl AsRef<Path>, usb: &str, battery: &str) -> Self {
        let usb: PathBuf = root.as_ref().join(usb);
        let battery: PathBuf = root.as_ref().join(battery);

        Self {
            usb_current: CounterPath::new(usb.join("current_now"))
                .with_fallback(usb.join("input_current_now")),
            usb_voltage: CounterPath::new(usb.join("voltage_now")),
            battery_current: CounterPath::new(battery.join("current_now")),
            battery_voltage: CounterPath::new(battery.join("voltage_now")),
        }
    }

    /// Reads all four counters. The first failing counter aborts the reading.
    pub fn read<S>(&self, source: &S) -> Result<PowerReading, CounterError>
    where
        S: CounterSource + ?Sized,
    {
        Ok(PowerReading {
            usb_current_ua: read_counter(source, &self.usb_current)?,
            usb_voltage_uv: read_counter(source, &self.usb_voltage)?,
            battery_current_ua: read_counter(source, &self.battery_current)?,
            battery_voltage_uv: read_counter(source, &self.battery_voltage)?,
        })
    }

    /// Labelled counters, for diagnostics.
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &CounterPath)> {
        [
            ("usb current", &self.usb_current),
            ("usb voltage", &self.usb_voltage),
            ("battery current", &self.battery_current),
            ("battery voltage", &self.battery_voltage),
        ]
        .into_iter()
    }
}

/// Point-in-time view of a power sampler's aggregates.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
pub struct PowerStats {
    /// Arithmetic mean of every sample, in watts.
    pub avg_power_watts: f64,
    /// Exponential moving average, in watts.
    pub moving_power_watts: f64,
    pub samples: u64,
    /// Cycles where a counter could not be read.
    pub skipped: u64,
}
