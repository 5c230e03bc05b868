use std::time::Duration;

use color_eyre::eyre::Result;
use serde_json::json;
use tracing::warn;
use voltprobe_platform::{PowerSampler, SysfsSource};

use crate::commands::cpu::primed_sampler;
use crate::config::UserConfig;

pub fn run(config: &UserConfig, samples: u32, interval: u64, compact: bool) -> Result<()> {
    let mut power = PowerSampler::with_source(config.power.sampler_options(), SysfsSource)?;
    let mut utilization = primed_sampler(&config.utilization)?;
    let mut counter = 0u32;

    power.start();

    loop {
        std::thread::sleep(Duration::from_millis(interval));

        let cpu = match utilization.reading() {
            Ok(reading) => json!({
                "system": reading.cpu_usage,
                "process": reading.process_usage,
                "other": reading.other_usage(),
            }),
            Err(e) => {
                warn!(error = %e, "cpu utilization unavailable");
                serde_json::Value::Null
            }
        };

        let doc = json!({
            "timestamp": chrono::Utc::now().to_rfc3339(),
            "power": power.stats(),
            "cpu": cpu,
        });

        if compact {
            println!("{}", serde_json::to_string(&doc)?);
        } else {
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }

        counter += 1;
        if samples > 0 && counter >= samples {
            break;
        }
    }

    power.stop();
    Ok(())
}
