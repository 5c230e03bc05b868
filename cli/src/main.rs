mod commands;
mod config;
mod logging;

use std::time::Duration;

use clap::{Parser, Subcommand};
use color_eyre::eyre::Result;
use voltprobe_platform::CpuSet;

use config::{ensure_dirs, LogLevel, UserConfig};
use logging::LogMode;

#[derive(Debug, Subcommand)]
enum Commands {
    /// Sample power for a fixed duration and print the averages (default)
    #[command(alias = "run")]
    Profile {
        /// How long to sample (e.g. 10s, 1m30s)
        #[arg(short, long, default_value = "10s", value_parser = humantime::parse_duration)]
        duration: Duration,

        /// CPUs to pin the harness thread to (e.g. 0,2 or 4-7)
        #[arg(short, long)]
        cpus: Option<CpuSet>,

        /// Print the report as JSON
        #[arg(short, long)]
        json: bool,
    },

    /// Stream power and CPU metrics as JSON (suitable for piping)
    #[command(alias = "raw")]
    Pipe {
        /// Number of samples to output (0 = infinite)
        #[arg(short, long, default_value_t = 0)]
        samples: u32,

        /// Output interval in milliseconds
        #[arg(short, long, default_value_t = 1000)]
        interval: u64,

        /// Compact JSON output (one line per sample)
        #[arg(short, long)]
        compact: bool,
    },

    /// Print CPU utilization of everything except this process
    Cpu {
        /// Number of readings to print (0 = infinite)
        #[arg(short, long, default_value_t = 10)]
        samples: u32,

        /// Interval between readings in milliseconds
        #[arg(short, long, default_value_t = 500)]
        interval: u64,
    },

    /// Print debug information about power counters and procfs
    Debug,

    /// Show or reset configuration
    Config {
        /// Print config file path
        #[arg(long)]
        path: bool,

        /// Reset config to defaults
        #[arg(long)]
        reset: bool,
    },
}

/// Measure device power draw and background CPU load around benchmarks
#[derive(Debug, Parser)]
#[command(name = "voltprobe", version, verbatim_doc_comment)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Power sampling interval in microseconds
    #[arg(long, global = true)]
    interval_us: Option<u64>,

    /// Seed the moving average with the first sample
    #[arg(long, global = true)]
    seed_moving_average: bool,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, global = true)]
    log_level: Option<String>,

    /// Also write logs to a rotating file
    #[arg(long, global = true)]
    log_file: bool,
}

fn main() -> Result<()> {
    color_eyre::install()?;
    let _ = ensure_dirs();

    let cli = Cli::parse();
    let mut config = UserConfig::load();
    let log_level_override = cli.log_level.as_deref().map(LogLevel::from_str);
    let mode = if cli.log_file {
        LogMode::Both
    } else {
        LogMode::Stderr
    };
    let _guard = logging::init(config.log_level, mode, log_level_override);

    config.merge_with_args(cli.interval_us, cli.seed_moving_average);

    match cli.command {
        Some(Commands::Profile {
            duration,
            cpus,
            json,
        }) => commands::profile::run(&config.power, duration, cpus.as_ref(), json),
        Some(Commands::Pipe {
            samples,
            interval,
            compact,
        }) => commands::pipe::run(&config, samples, interval, compact),
        Some(Commands::Cpu { samples, interval }) => {
            commands::cpu::run(&config.utilization, samples, interval)
        }
        Some(Commands::Debug) => commands::debug::run(&config),
        Some(Commands::Config { path, reset }) => commands::config::run(path, reset),
        None => commands::profile::run(&config.power, Duration::from_secs(10), None, false),
    }
}
