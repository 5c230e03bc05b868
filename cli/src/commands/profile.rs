use std::thread;
use std::time::Duration;

use color_eyre::eyre::{bail, Result};
use serde::Serialize;
use tracing::info;
use voltprobe_platform::{pin_current_thread, CpuSet, PowerSampler, PowerStats, SysfsSource};

use crate::config::PowerConfig;

#[derive(Debug, Serialize)]
struct ProfileReport {
    duration_secs: f64,
    interval_us: u64,
    /// `None` when no pinning was requested.
    #[serde(skip_serializing_if = "Option::is_none")]
    pinned: Option<bool>,
    #[serde(flatten)]
    power: PowerStats,
}

/// Samples power for `duration` and reports the aggregates.
pub fn run(
    config: &PowerConfig,
    duration: Duration,
    cpus: Option<&CpuSet>,
    json: bool,
) -> Result<()> {
    let pinned = cpus.map(pin);

    let mut sampler = PowerSampler::with_source(config.sampler_options(), SysfsSource)?;

    info!(
        duration = %humantime::format_duration(duration),
        interval_us = config.interval_us,
        "profiling power"
    );

    sampler.start();
    thread::sleep(duration);
    sampler.pause();
    let power = sampler.stats();
    sampler.stop();

    if power.samples == 0 && power.skipped > 0 {
        bail!(
            "no power samples collected: {} attempts could not read the counters under {}",
            power.skipped,
            config.supply_root.display()
        );
    }

    let report = ProfileReport {
        duration_secs: duration.as_secs_f64(),
        interval_us: config.interval_us,
        pinned,
        power,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

/// Pins the harness thread, reporting a failure and carrying on unpinned.
fn pin(cpus: &CpuSet) -> bool {
    match pin_current_thread(cpus) {
        Ok(()) => true,
        Err(e) => {
            eprintln!("warning: could not pin to CPUs {}: {}; profiling unpinned", cpus, e);
            false
        }
    }
}

fn print_report(report: &ProfileReport) {
    println!("Average power: {:.3} W", report.power.avg_power_watts);
    println!("Moving power:  {:.3} W", report.power.moving_power_watts);
    println!(
        "Samples:       {} over {:.1}s ({} skipped)",
        report.power.samples, report.duration_secs, report.power.skipped
    );
    if let Some(pinned) = report.pinned {
        println!("Pinned:        {}", if pinned { "yes" } else { "no" });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn report(pinned: Option<bool>) -> ProfileReport {
        ProfileReport {
            duration_secs: 1.0,
            interval_us: 100,
            pinned,
            power: PowerStats {
                avg_power_watts: 14.0,
                moving_power_watts: 14.0,
                samples: 3,
                skipped: 0,
            },
        }
    }

    #[test]
    fn test_pin_failure_is_reported() {
        let unreachable: CpuSet = [1_000_000].into_iter().collect();
        assert!(!pin(&unreachable));
    }

    #[test]
    fn test_report_includes_pin_outcome() {
        let doc = serde_json::to_value(report(Some(false))).unwrap();
        assert_eq!(doc["pinned"], serde_json::json!(false));
        assert_eq!(doc["samples"], serde_json::json!(3));

        let doc = serde_json::to_value(report(None)).unwrap();
        assert!(doc.get("pinned").is_none());
    }
}
