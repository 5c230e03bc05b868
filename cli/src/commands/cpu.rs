use std::time::Duration;

use color_eyre::eyre::Result;
use voltprobe_platform::{
    clock_ticks, ProcFs, SystemClock, UtilizationError, UtilizationReading, UtilizationSampler,
};

use crate::config::UtilizationConfig;

pub fn utilization_sampler(config: &UtilizationConfig) -> UtilizationSampler {
    let ticks = config.clock_ticks.unwrap_or_else(clock_ticks);
    UtilizationSampler::with_source(ProcFs::default(), SystemClock, ticks)
        .refresh_interval(Duration::from_millis(config.refresh_ms))
}

/// A sampler with its baseline taken, so every reading it reports is a delta.
pub fn primed_sampler(config: &UtilizationConfig) -> Result<UtilizationSampler, UtilizationError> {
    let mut sampler = utilization_sampler(config);
    sampler.prime()?;
    Ok(sampler)
}

pub fn run(config: &UtilizationConfig, samples: u32, interval: u64) -> Result<()> {
    let mut sampler = primed_sampler(config)?;

    let mut counter = 0u32;
    loop {
        std::thread::sleep(Duration::from_millis(interval));
        println!("{}", format_reading(&sampler.reading()?));

        counter += 1;
        if samples > 0 && counter >= samples {
            break;
        }
    }

    Ok(())
}

fn format_reading(reading: &UtilizationReading) -> String {
    format!(
        "system {:>6.1}%  process {:>6.1}%  other {:>6.1}%",
        reading.cpu_usage * 100.0,
        reading.process_usage * 100.0,
        reading.other_usage() * 100.0
    )
}
