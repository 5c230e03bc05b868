//! Power and CPU utilization sampling for benchmark harnesses.
//!
//! This crate reads power-delivery counters from `/sys/class/power_supply`
//! and jiffy counters from `/proc`, and turns them into the aggregates a
//! benchmark reports: average and moving power, and the CPU utilization of
//! everything other than the benchmark itself.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use voltprobe_platform::PowerSampler;
//!
//! let mut sampler = PowerSampler::new(Duration::from_micros(100))?;
//! sampler.start();
//! std::thread::sleep(Duration::from_secs(10));
//! sampler.pause();
//! println!("{:.3} W", sampler.avg_power());
//! sampler.stop();
//! # Ok::<(), voltprobe_platform::SamplerError>(())
//! ```

mod affinity;
mod counter;
mod error;
mod lifecycle;
mod power;
mod sampler;
mod utilization;

pub use affinity::{
    current_affinity, pin_current_thread, pin_thread, pin_thread_to_cpus, CpuSet, MAX_CPUS,
};
pub use counter::{read_counter, CounterPath, CounterSource, StaticCounterSource, SysfsSource};
pub use error::{AffinityError, CounterError, SamplerError, UtilizationError};
pub use lifecycle::Lifecycle;
pub use power::{
    PowerCounters, PowerReading, PowerStats, BATTERY_SUPPLY, POWER_SUPPLY_PATH, USB_SUPPLY,
};
pub use sampler::{MovingAverageSeed, PowerSampler, SamplerOptions};
pub use utilization::{
    clock_ticks, uptime_jiffies, Clock, ProcFs, ProcSource, ProcessTimes, SystemClock,
    SystemTimes, UtilizationReading, UtilizationSampler, DEFAULT_REFRESH_INTERVAL,
    FALLBACK_CLOCK_TICKS,
};
