use std::fs;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;
use voltprobe_platform::{
    MovingAverageSeed, PowerCounters, SamplerOptions, BATTERY_SUPPLY, DEFAULT_REFRESH_INTERVAL,
    POWER_SUPPLY_PATH, USB_SUPPLY,
};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Off,
    Error,
    #[default]
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevel {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "off" | "none" => LogLevel::Off,
            "error" => LogLevel::Error,
            "info" => LogLevel::Info,
            "debug" => LogLevel::Debug,
            "trace" => LogLevel::Trace,
            _ => LogLevel::Warn,
        }
    }

    pub fn as_tracing_level(&self) -> Option<tracing::Level> {
        match self {
            LogLevel::Off => None,
            LogLevel::Error => Some(tracing::Level::ERROR),
            LogLevel::Warn => Some(tracing::Level::WARN),
            LogLevel::Info => Some(tracing::Level::INFO),
            LogLevel::Debug => Some(tracing::Level::DEBUG),
            LogLevel::Trace => Some(tracing::Level::TRACE),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PowerConfig {
    pub interval_us: u64,
    pub seed_moving_average: bool,
    pub supply_root: PathBuf,
    pub usb_supply: String,
    pub battery_supply: String,
}

impl Default for PowerConfig {
    fn default() -> Self {
        Self {
            interval_us: 100,
            seed_moving_average: false,
            supply_root: PathBuf::from(POWER_SUPPLY_PATH),
            usb_supply: USB_SUPPLY.to_string(),
            battery_supply: BATTERY_SUPPLY.to_string(),
        }
    }
}

impl PowerConfig {
    pub fn counters(&self) -> PowerCounters {
        PowerCounters::with_supplies(&self.supply_root, &self.usb_supply, &self.battery_supply)
    }

    pub fn sampler_options(&self) -> SamplerOptions {
        let seed = if self.seed_moving_average {
            MovingAverageSeed::FirstSample
        } else {
            MovingAverageSeed::Recurrence
        };

        SamplerOptions::new(Duration::from_micros(self.interval_us))
            .counters(self.counters())
            .seed(seed)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UtilizationConfig {
    pub refresh_ms: u64,
    /// Overrides `sysconf(_SC_CLK_TCK)`.
    pub clock_ticks: Option<u64>,
}

impl Default for UtilizationConfig {
    fn default() -> Self {
        Self {
            refresh_ms: DEFAULT_REFRESH_INTERVAL.as_millis() as u64,
            clock_ticks: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct UserConfig {
    pub log_level: LogLevel,
    pub power: PowerConfig,
    pub utilization: UtilizationConfig,
}

pub fn config_dir() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("~/.config"))
        .join("voltprobe")
}

pub fn runtime_dir() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::cache_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("voltprobe")
}

pub fn config_path() -> PathBuf {
    config_dir().join("config.toml")
}

pub fn ensure_dirs() -> std::io::Result<()> {
    fs::create_dir_all(config_dir())
}

impl UserConfig {
    /// Loads the config file, falling back to defaults when it is missing or
    /// invalid.
    pub fn load() -> Self {
        match Self::try_load() {
            Ok(Some(config)) => config,
            Ok(None) => Self::default(),
            Err(e) => {
                // logging is not initialised yet at this point
                eprintln!("Warning: {}. Using defaults.", e);
                Self::default()
            }
        }
    }

    pub fn try_load() -> Result<Option<Self>, ConfigError> {
        let path = config_path();
        if !path.exists() {
            return Ok(None);
        }

        let content = fs::read_to_string(&path).map_err(|source| ConfigError::Read {
            path: path.clone(),
            source,
        })?;
        Self::parse(&content)
            .map(Some)
            .map_err(|source| ConfigError::Parse { path, source })
    }

    pub fn parse(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    pub fn save(&self) -> std::io::Result<()> {
        ensure_dirs()?;
        let path = config_path();
        let content = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
        fs::write(path, content)
    }

    pub fn merge_with_args(&mut self, interval_us: Option<u64>, seed_moving_average: bool) {
        if let Some(us) = interval_us {
            if us == 0 {
                warn!("ignoring zero sampling interval");
            } else {
                self.power.interval_us = us;
            }
        }
        if seed_moving_average {
            self.power.seed_moving_average = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::path::Path;

    #[test]
    fn test_defaults() {
        let config = UserConfig::default();
        assert_eq!(config.log_level, LogLevel::Warn);
        assert_eq!(config.power.interval_us, 100);
        assert!(!config.power.seed_moving_average);
        assert_eq!(config.utilization.refresh_ms, 100);
        assert_eq!(config.utilization.clock_ticks, None);
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let config = UserConfig::parse(
            r#"
            log_level = "debug"

            [power]
            interval_us = 5000
            battery_supply = "BAT0"
            "#,
        )
        .unwrap();

        assert_eq!(config.log_level, LogLevel::Debug);
        assert_eq!(config.power.interval_us, 5000);
        assert_eq!(config.power.usb_supply, "usb");
        assert_eq!(
            config.power.counters().battery_voltage.primary(),
            Path::new("/sys/class/power_supply/BAT0/voltage_now")
        );
        assert_eq!(config.utilization, UtilizationConfig::default());
    }

    #[test]
    fn test_round_trip_through_toml() {
        let mut config = UserConfig::default();
        config.utilization.clock_ticks = Some(250);
        let text = toml::to_string_pretty(&config).unwrap();
        assert_eq!(UserConfig::parse(&text).unwrap(), config);
    }

    #[test]
    fn test_invalid_file_is_error() {
        assert!(UserConfig::parse("power = 3").is_err());
    }

    #[test]
    fn test_merge_with_args() {
        let mut config = UserConfig::default();
        config.merge_with_args(Some(250), true);
        assert_eq!(config.power.interval_us, 250);
        assert!(config.power.seed_moving_average);

        config.merge_with_args(Some(0), false);
        assert_eq!(config.power.interval_us, 250);
        assert!(config.power.seed_moving_average);
    }

    #[test]
    fn test_sampler_options_follow_config() {
        let mut config = PowerConfig::default();
        config.interval_us = 2000;
        config.seed_moving_average = true;

        let options = config.sampler_options();
        assert_eq!(options.interval, Duration::from_millis(2));
        assert_eq!(options.seed, MovingAverageSeed::FirstSample);
        assert_eq!(options.counters, PowerCounters::default());
    }

    #[test]
    fn test_log_level_from_str() {
        assert_eq!(LogLevel::from_str("TRACE"), LogLevel::Trace);
        assert_eq!(LogLevel::from_str("off"), LogLevel::Off);
        assert_eq!(LogLevel::from_str("bogus"), LogLevel::Warn);
        assert_eq!(LogLevel::Off.as_tracing_level(), None);
    }
}
