use std::time::Duration;

use color_eyre::eyre::Result;
use sysinfo::System;
use voltprobe_platform::{clock_ticks, current_affinity, read_counter, SysfsSource};

use crate::commands::cpu::utilization_sampler;
use crate::config::{config_path, UserConfig};
use crate::logging;

pub fn run(config: &UserConfig) -> Result<()> {
    println!("voltprobe debug information");
    println!("{}", "=".repeat(60));

    println!("\n--- System Info ---");
    println!(
        "Host: {}",
        System::host_name().unwrap_or_else(|| "Unknown".to_string())
    );
    println!(
        "OS: {}",
        System::long_os_version().unwrap_or_else(|| "Unknown".to_string())
    );
    println!(
        "Kernel: {}",
        System::kernel_version().unwrap_or_else(|| "Unknown".to_string())
    );
    match std::thread::available_parallelism() {
        Ok(cpus) => println!("Logical CPUs: {}", cpus),
        Err(e) => println!("Logical CPUs: unknown ({})", e),
    }
    match current_affinity() {
        Ok(cpus) => println!("Allowed CPUs: {}", cpus),
        Err(e) => println!("Allowed CPUs: unknown ({})", e),
    }

    println!("\n--- Power Counters ---");
    let counters = config.power.counters();
    for (label, counter) in counters.iter() {
        match read_counter(&SysfsSource, counter) {
            Ok(value) => println!(
                "{:<16} {:>12}  {}",
                label,
                value,
                counter.primary().display()
            ),
            Err(e) => println!("{:<16} {:>12}  {}", label, "-", e),
        }
        if let Some(fallback) = counter.fallback() {
            println!("{:<16} {:>12}  fallback: {}", "", "", fallback.display());
        }
    }
    match counters.read(&SysfsSource) {
        Ok(reading) => println!("Instantaneous power: {:.3} W", reading.watts()),
        Err(e) => println!("Instantaneous power: unavailable ({})", e),
    }

    println!("\n--- CPU Utilization ---");
    println!(
        "Clock ticks: {} Hz (kernel), {} Hz (in use)",
        clock_ticks(),
        config.utilization.clock_ticks.unwrap_or_else(clock_ticks)
    );
    let mut utilization = utilization_sampler(&config.utilization);
    // a failed baseline surfaces through the reading below
    let _ = utilization.prime();
    let mut sys = System::new();
    sys.refresh_cpu_usage();
    let settle = Duration::from_millis(config.utilization.refresh_ms);
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL.max(settle));
    sys.refresh_cpu_usage();
    match utilization.reading() {
        Ok(reading) => {
            println!("System: {:.1}%", reading.cpu_usage * 100.0);
            println!("Process: {:.1}%", reading.process_usage * 100.0);
        }
        Err(e) => println!("Unavailable: {}", e),
    }
    let cpus = sys.cpus();
    if !cpus.is_empty() {
        let total: f32 = cpus.iter().map(|cpu| cpu.cpu_usage()).sum();
        println!("sysinfo average: {:.1}% per core", total / cpus.len() as f32);
    }

    println!("\n--- Paths ---");
    println!("Config: {}", config_path().display());
    println!("Logs: {}", logging::log_dir().display());

    println!("\n--- Current Config ---");
    println!("{}", toml::to_string_pretty(config)?);

    Ok(())
}
